//! Library class path.
//!
//! Holds the headers of classes that are referenced but not transformed: library jars passed
//! on the command line, the classes of a JDK runtime image when one is available, and a
//! built-in table of common `java.*` types underneath both. Only the header is kept because
//! common-superclass resolution never needs more than the superclass chain.
use crate::model::{access, OBJECT};
use jarcloak_utils::errors::{DecodeError, ResolutionError};
use std::collections::{HashMap, HashSet};

/// Name, superclass, interfaces and access flags of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access: u16,
}

impl ClassHeader {
    pub const fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }
}

/// Superclass of each built-in JDK class.
///
/// Covers the types library code most often merges at branch joins and exception handlers.
/// Anything else is read from the runtime image of a JDK, see [`ClassPath::add_class_bytes`].
const JDK_CLASSES: &[(&str, &str)] = &[
    // java.lang throwables
    ("java/lang/Throwable", OBJECT),
    ("java/lang/Exception", "java/lang/Throwable"),
    ("java/lang/Error", "java/lang/Throwable"),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/ArrayStoreException", "java/lang/RuntimeException"),
    ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
    ("java/lang/IllegalMonitorStateException", "java/lang/RuntimeException"),
    ("java/lang/IllegalCallerException", "java/lang/RuntimeException"),
    ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/StringIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/NumberFormatException", "java/lang/IllegalArgumentException"),
    ("java/lang/SecurityException", "java/lang/RuntimeException"),
    ("java/lang/TypeNotPresentException", "java/lang/RuntimeException"),
    ("java/lang/EnumConstantNotPresentException", "java/lang/RuntimeException"),
    ("java/lang/InterruptedException", "java/lang/Exception"),
    ("java/lang/CloneNotSupportedException", "java/lang/Exception"),
    ("java/lang/ReflectiveOperationException", "java/lang/Exception"),
    ("java/lang/ClassNotFoundException", "java/lang/ReflectiveOperationException"),
    ("java/lang/NoSuchFieldException", "java/lang/ReflectiveOperationException"),
    ("java/lang/NoSuchMethodException", "java/lang/ReflectiveOperationException"),
    ("java/lang/IllegalAccessException", "java/lang/ReflectiveOperationException"),
    ("java/lang/InstantiationException", "java/lang/ReflectiveOperationException"),
    ("java/lang/reflect/InvocationTargetException", "java/lang/ReflectiveOperationException"),
    ("java/lang/reflect/UndeclaredThrowableException", "java/lang/RuntimeException"),
    ("java/lang/invoke/WrongMethodTypeException", "java/lang/RuntimeException"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/NoClassDefFoundError", "java/lang/LinkageError"),
    ("java/lang/ExceptionInInitializerError", "java/lang/LinkageError"),
    ("java/lang/UnsatisfiedLinkError", "java/lang/LinkageError"),
    ("java/lang/VerifyError", "java/lang/LinkageError"),
    ("java/lang/ClassFormatError", "java/lang/LinkageError"),
    ("java/lang/UnsupportedClassVersionError", "java/lang/ClassFormatError"),
    ("java/lang/ClassCircularityError", "java/lang/LinkageError"),
    ("java/lang/BootstrapMethodError", "java/lang/LinkageError"),
    ("java/lang/IncompatibleClassChangeError", "java/lang/LinkageError"),
    ("java/lang/AbstractMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/IllegalAccessError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/InstantiationError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/NoSuchFieldError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/NoSuchMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/StackOverflowError", "java/lang/VirtualMachineError"),
    ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
    ("java/lang/InternalError", "java/lang/VirtualMachineError"),
    ("java/lang/UnknownError", "java/lang/VirtualMachineError"),
    ("java/lang/AssertionError", "java/lang/Error"),
    ("java/lang/ThreadDeath", "java/lang/Error"),
    // java.io throwables
    ("java/io/IOException", "java/lang/Exception"),
    ("java/io/FileNotFoundException", "java/io/IOException"),
    ("java/io/EOFException", "java/io/IOException"),
    ("java/io/InterruptedIOException", "java/io/IOException"),
    ("java/io/UnsupportedEncodingException", "java/io/IOException"),
    ("java/io/CharConversionException", "java/io/IOException"),
    ("java/io/UTFDataFormatException", "java/io/IOException"),
    ("java/io/SyncFailedException", "java/io/IOException"),
    ("java/io/ObjectStreamException", "java/io/IOException"),
    ("java/io/InvalidClassException", "java/io/ObjectStreamException"),
    ("java/io/InvalidObjectException", "java/io/ObjectStreamException"),
    ("java/io/NotSerializableException", "java/io/ObjectStreamException"),
    ("java/io/StreamCorruptedException", "java/io/ObjectStreamException"),
    ("java/io/OptionalDataException", "java/io/ObjectStreamException"),
    ("java/io/WriteAbortedException", "java/io/ObjectStreamException"),
    ("java/io/UncheckedIOException", "java/lang/RuntimeException"),
    ("java/io/IOError", "java/lang/Error"),
    // java.net, java.nio and friends throwables
    ("java/net/MalformedURLException", "java/io/IOException"),
    ("java/net/UnknownHostException", "java/io/IOException"),
    ("java/net/ProtocolException", "java/io/IOException"),
    ("java/net/UnknownServiceException", "java/io/IOException"),
    ("java/net/HttpRetryException", "java/io/IOException"),
    ("java/net/SocketException", "java/io/IOException"),
    ("java/net/ConnectException", "java/net/SocketException"),
    ("java/net/BindException", "java/net/SocketException"),
    ("java/net/NoRouteToHostException", "java/net/SocketException"),
    ("java/net/PortUnreachableException", "java/net/SocketException"),
    ("java/net/SocketTimeoutException", "java/io/InterruptedIOException"),
    ("java/net/URISyntaxException", "java/lang/Exception"),
    ("java/nio/BufferOverflowException", "java/lang/RuntimeException"),
    ("java/nio/BufferUnderflowException", "java/lang/RuntimeException"),
    ("java/nio/ReadOnlyBufferException", "java/lang/UnsupportedOperationException"),
    ("java/nio/InvalidMarkException", "java/lang/IllegalStateException"),
    ("java/nio/channels/ClosedChannelException", "java/io/IOException"),
    ("java/nio/channels/AsynchronousCloseException", "java/nio/channels/ClosedChannelException"),
    ("java/nio/channels/ClosedByInterruptException", "java/nio/channels/AsynchronousCloseException"),
    ("java/nio/channels/FileLockInterruptionException", "java/io/IOException"),
    ("java/nio/channels/OverlappingFileLockException", "java/lang/IllegalStateException"),
    ("java/nio/channels/NonReadableChannelException", "java/lang/IllegalStateException"),
    ("java/nio/channels/NonWritableChannelException", "java/lang/IllegalStateException"),
    ("java/nio/channels/ClosedSelectorException", "java/lang/IllegalStateException"),
    ("java/nio/charset/CharacterCodingException", "java/io/IOException"),
    ("java/nio/charset/MalformedInputException", "java/nio/charset/CharacterCodingException"),
    ("java/nio/charset/UnmappableCharacterException", "java/nio/charset/CharacterCodingException"),
    ("java/nio/charset/UnsupportedCharsetException", "java/lang/IllegalArgumentException"),
    ("java/nio/charset/IllegalCharsetNameException", "java/lang/IllegalArgumentException"),
    ("java/nio/file/FileSystemException", "java/io/IOException"),
    ("java/nio/file/NoSuchFileException", "java/nio/file/FileSystemException"),
    ("java/nio/file/FileAlreadyExistsException", "java/nio/file/FileSystemException"),
    ("java/nio/file/AccessDeniedException", "java/nio/file/FileSystemException"),
    ("java/nio/file/DirectoryNotEmptyException", "java/nio/file/FileSystemException"),
    ("java/nio/file/NotDirectoryException", "java/nio/file/FileSystemException"),
    ("java/nio/file/NotLinkException", "java/nio/file/FileSystemException"),
    ("java/nio/file/AtomicMoveNotSupportedException", "java/nio/file/FileSystemException"),
    ("java/nio/file/FileSystemLoopException", "java/nio/file/FileSystemException"),
    ("java/nio/file/InvalidPathException", "java/lang/IllegalArgumentException"),
    ("java/nio/file/FileSystemNotFoundException", "java/lang/RuntimeException"),
    ("java/nio/file/ProviderNotFoundException", "java/lang/RuntimeException"),
    ("java/nio/file/ClosedWatchServiceException", "java/lang/IllegalStateException"),
    ("java/util/NoSuchElementException", "java/lang/RuntimeException"),
    ("java/util/InputMismatchException", "java/util/NoSuchElementException"),
    ("java/util/ConcurrentModificationException", "java/lang/RuntimeException"),
    ("java/util/EmptyStackException", "java/lang/RuntimeException"),
    ("java/util/MissingResourceException", "java/lang/RuntimeException"),
    ("java/util/regex/PatternSyntaxException", "java/lang/IllegalArgumentException"),
    ("java/util/concurrent/ExecutionException", "java/lang/Exception"),
    ("java/util/concurrent/TimeoutException", "java/lang/Exception"),
    ("java/util/concurrent/BrokenBarrierException", "java/lang/Exception"),
    ("java/util/concurrent/CancellationException", "java/lang/IllegalStateException"),
    ("java/util/concurrent/CompletionException", "java/lang/RuntimeException"),
    ("java/util/concurrent/RejectedExecutionException", "java/lang/RuntimeException"),
    ("java/util/zip/ZipException", "java/io/IOException"),
    ("java/util/zip/DataFormatException", "java/lang/Exception"),
    ("java/util/jar/JarException", "java/util/zip/ZipException"),
    ("java/text/ParseException", "java/lang/Exception"),
    ("java/time/DateTimeException", "java/lang/RuntimeException"),
    ("java/time/format/DateTimeParseException", "java/time/DateTimeException"),
    ("java/time/temporal/UnsupportedTemporalTypeException", "java/time/DateTimeException"),
    ("java/security/GeneralSecurityException", "java/lang/Exception"),
    ("java/security/NoSuchAlgorithmException", "java/security/GeneralSecurityException"),
    ("java/security/NoSuchProviderException", "java/security/GeneralSecurityException"),
    ("java/security/KeyException", "java/security/GeneralSecurityException"),
    ("java/security/InvalidKeyException", "java/security/KeyException"),
    ("java/security/KeyStoreException", "java/security/GeneralSecurityException"),
    ("java/security/SignatureException", "java/security/GeneralSecurityException"),
    ("java/security/DigestException", "java/security/GeneralSecurityException"),
    ("java/security/UnrecoverableKeyException", "java/security/GeneralSecurityException"),
    ("java/security/InvalidAlgorithmParameterException", "java/security/GeneralSecurityException"),
    ("java/security/spec/InvalidKeySpecException", "java/security/GeneralSecurityException"),
    ("java/security/cert/CertificateException", "java/security/GeneralSecurityException"),
    ("java/security/PrivilegedActionException", "java/lang/Exception"),
    ("java/security/AccessControlException", "java/lang/SecurityException"),
    ("javax/crypto/BadPaddingException", "java/security/GeneralSecurityException"),
    ("javax/crypto/IllegalBlockSizeException", "java/security/GeneralSecurityException"),
    ("javax/crypto/NoSuchPaddingException", "java/security/GeneralSecurityException"),
    ("java/sql/SQLException", "java/lang/Exception"),
    ("java/sql/SQLWarning", "java/sql/SQLException"),
    ("java/sql/BatchUpdateException", "java/sql/SQLException"),
    ("java/sql/SQLTransientException", "java/sql/SQLException"),
    ("java/sql/SQLTimeoutException", "java/sql/SQLTransientException"),
    ("java/sql/SQLNonTransientException", "java/sql/SQLException"),
    ("java/sql/SQLFeatureNotSupportedException", "java/sql/SQLNonTransientException"),
    ("java/sql/SQLIntegrityConstraintViolationException", "java/sql/SQLNonTransientException"),
    // java.lang
    ("java/lang/String", OBJECT),
    ("java/lang/Class", OBJECT),
    ("java/lang/ClassLoader", OBJECT),
    ("java/lang/Thread", OBJECT),
    ("java/lang/ThreadGroup", OBJECT),
    ("java/lang/ThreadLocal", OBJECT),
    ("java/lang/InheritableThreadLocal", "java/lang/ThreadLocal"),
    ("java/lang/Enum", OBJECT),
    ("java/lang/Thread$State", "java/lang/Enum"),
    ("java/lang/Record", OBJECT),
    ("java/lang/Number", OBJECT),
    ("java/lang/Integer", "java/lang/Number"),
    ("java/lang/Long", "java/lang/Number"),
    ("java/lang/Short", "java/lang/Number"),
    ("java/lang/Byte", "java/lang/Number"),
    ("java/lang/Float", "java/lang/Number"),
    ("java/lang/Double", "java/lang/Number"),
    ("java/lang/Boolean", OBJECT),
    ("java/lang/Character", OBJECT),
    ("java/lang/Void", OBJECT),
    ("java/lang/Math", OBJECT),
    ("java/lang/StrictMath", OBJECT),
    ("java/lang/System", OBJECT),
    ("java/lang/Runtime", OBJECT),
    ("java/lang/Process", OBJECT),
    ("java/lang/ProcessBuilder", OBJECT),
    ("java/lang/StackTraceElement", OBJECT),
    ("java/lang/Module", OBJECT),
    ("java/lang/Package", OBJECT),
    ("java/lang/AbstractStringBuilder", OBJECT),
    ("java/lang/StringBuilder", "java/lang/AbstractStringBuilder"),
    ("java/lang/StringBuffer", "java/lang/AbstractStringBuilder"),
    ("java/lang/ref/Reference", OBJECT),
    ("java/lang/ref/WeakReference", "java/lang/ref/Reference"),
    ("java/lang/ref/SoftReference", "java/lang/ref/Reference"),
    ("java/lang/ref/PhantomReference", "java/lang/ref/Reference"),
    ("java/lang/ref/ReferenceQueue", OBJECT),
    ("java/lang/reflect/AccessibleObject", OBJECT),
    ("java/lang/reflect/Executable", "java/lang/reflect/AccessibleObject"),
    ("java/lang/reflect/Method", "java/lang/reflect/Executable"),
    ("java/lang/reflect/Constructor", "java/lang/reflect/Executable"),
    ("java/lang/reflect/Field", "java/lang/reflect/AccessibleObject"),
    ("java/lang/reflect/Parameter", OBJECT),
    ("java/lang/reflect/Array", OBJECT),
    ("java/lang/reflect/Modifier", OBJECT),
    ("java/lang/reflect/Proxy", OBJECT),
    ("java/lang/invoke/MethodHandle", OBJECT),
    ("java/lang/invoke/MethodHandles", OBJECT),
    ("java/lang/invoke/MethodHandles$Lookup", OBJECT),
    ("java/lang/invoke/MethodType", OBJECT),
    ("java/lang/invoke/VarHandle", OBJECT),
    ("java/lang/invoke/CallSite", OBJECT),
    ("java/lang/invoke/ConstantCallSite", "java/lang/invoke/CallSite"),
    ("java/lang/invoke/MutableCallSite", "java/lang/invoke/CallSite"),
    ("java/lang/invoke/VolatileCallSite", "java/lang/invoke/CallSite"),
    ("java/lang/invoke/LambdaMetafactory", OBJECT),
    ("java/lang/invoke/StringConcatFactory", OBJECT),
    ("java/math/BigInteger", "java/lang/Number"),
    ("java/math/BigDecimal", "java/lang/Number"),
    ("java/math/MathContext", OBJECT),
    ("java/math/RoundingMode", "java/lang/Enum"),
    // java.io
    ("java/io/InputStream", OBJECT),
    ("java/io/FileInputStream", "java/io/InputStream"),
    ("java/io/ByteArrayInputStream", "java/io/InputStream"),
    ("java/io/ObjectInputStream", "java/io/InputStream"),
    ("java/io/PipedInputStream", "java/io/InputStream"),
    ("java/io/SequenceInputStream", "java/io/InputStream"),
    ("java/io/FilterInputStream", "java/io/InputStream"),
    ("java/io/BufferedInputStream", "java/io/FilterInputStream"),
    ("java/io/DataInputStream", "java/io/FilterInputStream"),
    ("java/io/PushbackInputStream", "java/io/FilterInputStream"),
    ("java/io/OutputStream", OBJECT),
    ("java/io/FileOutputStream", "java/io/OutputStream"),
    ("java/io/ByteArrayOutputStream", "java/io/OutputStream"),
    ("java/io/ObjectOutputStream", "java/io/OutputStream"),
    ("java/io/PipedOutputStream", "java/io/OutputStream"),
    ("java/io/FilterOutputStream", "java/io/OutputStream"),
    ("java/io/BufferedOutputStream", "java/io/FilterOutputStream"),
    ("java/io/DataOutputStream", "java/io/FilterOutputStream"),
    ("java/io/PrintStream", "java/io/FilterOutputStream"),
    ("java/io/Reader", OBJECT),
    ("java/io/BufferedReader", "java/io/Reader"),
    ("java/io/LineNumberReader", "java/io/BufferedReader"),
    ("java/io/InputStreamReader", "java/io/Reader"),
    ("java/io/FileReader", "java/io/InputStreamReader"),
    ("java/io/StringReader", "java/io/Reader"),
    ("java/io/CharArrayReader", "java/io/Reader"),
    ("java/io/PipedReader", "java/io/Reader"),
    ("java/io/FilterReader", "java/io/Reader"),
    ("java/io/PushbackReader", "java/io/FilterReader"),
    ("java/io/Writer", OBJECT),
    ("java/io/BufferedWriter", "java/io/Writer"),
    ("java/io/OutputStreamWriter", "java/io/Writer"),
    ("java/io/FileWriter", "java/io/OutputStreamWriter"),
    ("java/io/PrintWriter", "java/io/Writer"),
    ("java/io/StringWriter", "java/io/Writer"),
    ("java/io/CharArrayWriter", "java/io/Writer"),
    ("java/io/PipedWriter", "java/io/Writer"),
    ("java/io/FilterWriter", "java/io/Writer"),
    ("java/io/File", OBJECT),
    ("java/io/FileDescriptor", OBJECT),
    ("java/io/RandomAccessFile", OBJECT),
    ("java/io/Console", OBJECT),
    ("java/io/ObjectStreamClass", OBJECT),
    ("java/util/zip/InflaterInputStream", "java/io/FilterInputStream"),
    ("java/util/zip/GZIPInputStream", "java/util/zip/InflaterInputStream"),
    ("java/util/zip/ZipInputStream", "java/util/zip/InflaterInputStream"),
    ("java/util/jar/JarInputStream", "java/util/zip/ZipInputStream"),
    ("java/util/zip/DeflaterInputStream", "java/io/FilterInputStream"),
    ("java/util/zip/CheckedInputStream", "java/io/FilterInputStream"),
    ("java/util/zip/DeflaterOutputStream", "java/io/FilterOutputStream"),
    ("java/util/zip/GZIPOutputStream", "java/util/zip/DeflaterOutputStream"),
    ("java/util/zip/ZipOutputStream", "java/util/zip/DeflaterOutputStream"),
    ("java/util/jar/JarOutputStream", "java/util/zip/ZipOutputStream"),
    ("java/util/zip/InflaterOutputStream", "java/io/FilterOutputStream"),
    ("java/util/zip/CheckedOutputStream", "java/io/FilterOutputStream"),
    ("java/util/zip/ZipFile", OBJECT),
    ("java/util/jar/JarFile", "java/util/zip/ZipFile"),
    ("java/util/zip/ZipEntry", OBJECT),
    ("java/util/jar/JarEntry", "java/util/zip/ZipEntry"),
    ("java/util/jar/Manifest", OBJECT),
    ("java/util/jar/Attributes", OBJECT),
    ("java/util/zip/Inflater", OBJECT),
    ("java/util/zip/Deflater", OBJECT),
    ("java/util/zip/CRC32", OBJECT),
    ("java/util/zip/Adler32", OBJECT),
    ("java/security/DigestInputStream", "java/io/FilterInputStream"),
    ("java/security/DigestOutputStream", "java/io/FilterOutputStream"),
    ("javax/crypto/CipherInputStream", "java/io/FilterInputStream"),
    ("javax/crypto/CipherOutputStream", "java/io/FilterOutputStream"),
    // java.net
    ("java/net/URI", OBJECT),
    ("java/net/URL", OBJECT),
    ("java/net/URLConnection", OBJECT),
    ("java/net/HttpURLConnection", "java/net/URLConnection"),
    ("java/net/JarURLConnection", "java/net/URLConnection"),
    ("java/net/URLEncoder", OBJECT),
    ("java/net/URLDecoder", OBJECT),
    ("java/net/Socket", OBJECT),
    ("java/net/ServerSocket", OBJECT),
    ("java/net/DatagramSocket", OBJECT),
    ("java/net/MulticastSocket", "java/net/DatagramSocket"),
    ("java/net/DatagramPacket", OBJECT),
    ("java/net/InetAddress", OBJECT),
    ("java/net/Inet4Address", "java/net/InetAddress"),
    ("java/net/Inet6Address", "java/net/InetAddress"),
    ("java/net/SocketAddress", OBJECT),
    ("java/net/InetSocketAddress", "java/net/SocketAddress"),
    ("java/net/Proxy", OBJECT),
    ("java/net/ProxySelector", OBJECT),
    ("java/security/SecureClassLoader", "java/lang/ClassLoader"),
    ("java/net/URLClassLoader", "java/security/SecureClassLoader"),
    // java.nio
    ("java/nio/Buffer", OBJECT),
    ("java/nio/ByteBuffer", "java/nio/Buffer"),
    ("java/nio/MappedByteBuffer", "java/nio/ByteBuffer"),
    ("java/nio/CharBuffer", "java/nio/Buffer"),
    ("java/nio/ShortBuffer", "java/nio/Buffer"),
    ("java/nio/IntBuffer", "java/nio/Buffer"),
    ("java/nio/LongBuffer", "java/nio/Buffer"),
    ("java/nio/FloatBuffer", "java/nio/Buffer"),
    ("java/nio/DoubleBuffer", "java/nio/Buffer"),
    ("java/nio/ByteOrder", OBJECT),
    ("java/nio/channels/spi/AbstractInterruptibleChannel", OBJECT),
    ("java/nio/channels/FileChannel", "java/nio/channels/spi/AbstractInterruptibleChannel"),
    ("java/nio/channels/SelectableChannel", "java/nio/channels/spi/AbstractInterruptibleChannel"),
    ("java/nio/channels/spi/AbstractSelectableChannel", "java/nio/channels/SelectableChannel"),
    ("java/nio/channels/SocketChannel", "java/nio/channels/spi/AbstractSelectableChannel"),
    ("java/nio/channels/ServerSocketChannel", "java/nio/channels/spi/AbstractSelectableChannel"),
    ("java/nio/channels/DatagramChannel", "java/nio/channels/spi/AbstractSelectableChannel"),
    ("java/nio/channels/Selector", OBJECT),
    ("java/nio/channels/spi/AbstractSelector", "java/nio/channels/Selector"),
    ("java/nio/channels/SelectionKey", OBJECT),
    ("java/nio/channels/FileLock", OBJECT),
    ("java/nio/channels/Channels", OBJECT),
    ("java/nio/charset/Charset", OBJECT),
    ("java/nio/charset/CharsetDecoder", OBJECT),
    ("java/nio/charset/CharsetEncoder", OBJECT),
    ("java/nio/charset/StandardCharsets", OBJECT),
    ("java/nio/file/Files", OBJECT),
    ("java/nio/file/Paths", OBJECT),
    ("java/nio/file/FileSystem", OBJECT),
    ("java/nio/file/FileSystems", OBJECT),
    ("java/nio/file/FileStore", OBJECT),
    ("java/nio/file/StandardOpenOption", "java/lang/Enum"),
    ("java/nio/file/StandardCopyOption", "java/lang/Enum"),
    ("java/nio/file/LinkOption", "java/lang/Enum"),
    ("java/nio/file/attribute/FileTime", OBJECT),
    // java.util
    ("java/util/AbstractCollection", OBJECT),
    ("java/util/AbstractList", "java/util/AbstractCollection"),
    ("java/util/AbstractSequentialList", "java/util/AbstractList"),
    ("java/util/ArrayList", "java/util/AbstractList"),
    ("java/util/LinkedList", "java/util/AbstractSequentialList"),
    ("java/util/Vector", "java/util/AbstractList"),
    ("java/util/Stack", "java/util/Vector"),
    ("java/util/AbstractSet", "java/util/AbstractCollection"),
    ("java/util/HashSet", "java/util/AbstractSet"),
    ("java/util/LinkedHashSet", "java/util/HashSet"),
    ("java/util/TreeSet", "java/util/AbstractSet"),
    ("java/util/EnumSet", "java/util/AbstractSet"),
    ("java/util/AbstractQueue", "java/util/AbstractCollection"),
    ("java/util/PriorityQueue", "java/util/AbstractQueue"),
    ("java/util/ArrayDeque", "java/util/AbstractCollection"),
    ("java/util/AbstractMap", OBJECT),
    ("java/util/HashMap", "java/util/AbstractMap"),
    ("java/util/LinkedHashMap", "java/util/HashMap"),
    ("java/util/TreeMap", "java/util/AbstractMap"),
    ("java/util/IdentityHashMap", "java/util/AbstractMap"),
    ("java/util/WeakHashMap", "java/util/AbstractMap"),
    ("java/util/EnumMap", "java/util/AbstractMap"),
    ("java/util/Dictionary", OBJECT),
    ("java/util/Hashtable", "java/util/Dictionary"),
    ("java/util/Properties", "java/util/Hashtable"),
    ("java/util/Arrays", OBJECT),
    ("java/util/Collections", OBJECT),
    ("java/util/Objects", OBJECT),
    ("java/util/Optional", OBJECT),
    ("java/util/OptionalInt", OBJECT),
    ("java/util/OptionalLong", OBJECT),
    ("java/util/BitSet", OBJECT),
    ("java/util/Random", OBJECT),
    ("java/util/UUID", OBJECT),
    ("java/util/Date", OBJECT),
    ("java/util/Calendar", OBJECT),
    ("java/util/GregorianCalendar", "java/util/Calendar"),
    ("java/util/TimeZone", OBJECT),
    ("java/util/SimpleTimeZone", "java/util/TimeZone"),
    ("java/util/Locale", OBJECT),
    ("java/util/Currency", OBJECT),
    ("java/util/Scanner", OBJECT),
    ("java/util/StringJoiner", OBJECT),
    ("java/util/StringTokenizer", OBJECT),
    ("java/util/Formatter", OBJECT),
    ("java/util/Base64", OBJECT),
    ("java/util/Timer", OBJECT),
    ("java/util/TimerTask", OBJECT),
    ("java/util/EventObject", OBJECT),
    ("java/util/ServiceLoader", OBJECT),
    ("java/util/ResourceBundle", OBJECT),
    ("java/util/PropertyResourceBundle", "java/util/ResourceBundle"),
    ("java/util/ListResourceBundle", "java/util/ResourceBundle"),
    ("java/util/regex/Pattern", OBJECT),
    ("java/util/regex/Matcher", OBJECT),
    ("java/util/stream/Collectors", OBJECT),
    ("java/util/stream/StreamSupport", OBJECT),
    ("java/util/logging/Logger", OBJECT),
    ("java/util/logging/Level", OBJECT),
    ("java/util/logging/LogRecord", OBJECT),
    ("java/util/logging/Handler", OBJECT),
    ("java/util/logging/StreamHandler", "java/util/logging/Handler"),
    ("java/util/logging/ConsoleHandler", "java/util/logging/StreamHandler"),
    ("java/util/logging/FileHandler", "java/util/logging/StreamHandler"),
    ("java/util/logging/Formatter", OBJECT),
    ("java/util/logging/SimpleFormatter", "java/util/logging/Formatter"),
    // java.util.concurrent
    ("java/util/concurrent/ConcurrentHashMap", "java/util/AbstractMap"),
    ("java/util/concurrent/ConcurrentSkipListMap", "java/util/AbstractMap"),
    ("java/util/concurrent/ConcurrentSkipListSet", "java/util/AbstractSet"),
    ("java/util/concurrent/CopyOnWriteArrayList", OBJECT),
    ("java/util/concurrent/CopyOnWriteArraySet", "java/util/AbstractSet"),
    ("java/util/concurrent/ConcurrentLinkedQueue", "java/util/AbstractQueue"),
    ("java/util/concurrent/ConcurrentLinkedDeque", "java/util/AbstractCollection"),
    ("java/util/concurrent/ArrayBlockingQueue", "java/util/AbstractQueue"),
    ("java/util/concurrent/LinkedBlockingQueue", "java/util/AbstractQueue"),
    ("java/util/concurrent/LinkedBlockingDeque", "java/util/AbstractQueue"),
    ("java/util/concurrent/PriorityBlockingQueue", "java/util/AbstractQueue"),
    ("java/util/concurrent/DelayQueue", "java/util/AbstractQueue"),
    ("java/util/concurrent/SynchronousQueue", "java/util/AbstractQueue"),
    ("java/util/concurrent/LinkedTransferQueue", "java/util/AbstractQueue"),
    ("java/util/concurrent/AbstractExecutorService", OBJECT),
    ("java/util/concurrent/ThreadPoolExecutor", "java/util/concurrent/AbstractExecutorService"),
    ("java/util/concurrent/ScheduledThreadPoolExecutor", "java/util/concurrent/ThreadPoolExecutor"),
    ("java/util/concurrent/ForkJoinPool", "java/util/concurrent/AbstractExecutorService"),
    ("java/util/concurrent/ForkJoinTask", OBJECT),
    ("java/util/concurrent/RecursiveTask", "java/util/concurrent/ForkJoinTask"),
    ("java/util/concurrent/RecursiveAction", "java/util/concurrent/ForkJoinTask"),
    ("java/util/concurrent/Executors", OBJECT),
    ("java/util/concurrent/FutureTask", OBJECT),
    ("java/util/concurrent/CompletableFuture", OBJECT),
    ("java/util/concurrent/CountDownLatch", OBJECT),
    ("java/util/concurrent/CyclicBarrier", OBJECT),
    ("java/util/concurrent/Semaphore", OBJECT),
    ("java/util/concurrent/Phaser", OBJECT),
    ("java/util/concurrent/Exchanger", OBJECT),
    ("java/util/concurrent/TimeUnit", "java/lang/Enum"),
    ("java/util/concurrent/ThreadLocalRandom", "java/util/Random"),
    ("java/util/concurrent/atomic/AtomicBoolean", OBJECT),
    ("java/util/concurrent/atomic/AtomicInteger", "java/lang/Number"),
    ("java/util/concurrent/atomic/AtomicLong", "java/lang/Number"),
    ("java/util/concurrent/atomic/AtomicReference", OBJECT),
    ("java/util/concurrent/atomic/AtomicIntegerArray", OBJECT),
    ("java/util/concurrent/atomic/AtomicLongArray", OBJECT),
    ("java/util/concurrent/atomic/AtomicReferenceArray", OBJECT),
    ("java/util/concurrent/atomic/Striped64", "java/lang/Number"),
    ("java/util/concurrent/atomic/LongAdder", "java/util/concurrent/atomic/Striped64"),
    ("java/util/concurrent/locks/AbstractOwnableSynchronizer", OBJECT),
    ("java/util/concurrent/locks/AbstractQueuedSynchronizer", "java/util/concurrent/locks/AbstractOwnableSynchronizer"),
    ("java/util/concurrent/locks/ReentrantLock", OBJECT),
    ("java/util/concurrent/locks/ReentrantReadWriteLock", OBJECT),
    ("java/util/concurrent/locks/StampedLock", OBJECT),
    ("java/util/concurrent/locks/LockSupport", OBJECT),
    // java.text, java.time
    ("java/text/Format", OBJECT),
    ("java/text/DateFormat", "java/text/Format"),
    ("java/text/SimpleDateFormat", "java/text/DateFormat"),
    ("java/text/NumberFormat", "java/text/Format"),
    ("java/text/DecimalFormat", "java/text/NumberFormat"),
    ("java/text/ChoiceFormat", "java/text/NumberFormat"),
    ("java/text/MessageFormat", "java/text/Format"),
    ("java/text/Collator", OBJECT),
    ("java/text/Normalizer", OBJECT),
    ("java/time/Instant", OBJECT),
    ("java/time/Duration", OBJECT),
    ("java/time/Period", OBJECT),
    ("java/time/LocalDate", OBJECT),
    ("java/time/LocalTime", OBJECT),
    ("java/time/LocalDateTime", OBJECT),
    ("java/time/ZonedDateTime", OBJECT),
    ("java/time/OffsetDateTime", OBJECT),
    ("java/time/ZoneId", OBJECT),
    ("java/time/ZoneOffset", "java/time/ZoneId"),
    ("java/time/Clock", OBJECT),
    ("java/time/DayOfWeek", "java/lang/Enum"),
    ("java/time/Month", "java/lang/Enum"),
    ("java/time/format/DateTimeFormatter", OBJECT),
    ("java/time/temporal/ChronoUnit", "java/lang/Enum"),
    // java.security, javax.crypto, java.sql
    ("java/security/MessageDigestSpi", OBJECT),
    ("java/security/MessageDigest", "java/security/MessageDigestSpi"),
    ("java/security/SignatureSpi", OBJECT),
    ("java/security/Signature", "java/security/SignatureSpi"),
    ("java/security/KeyPairGeneratorSpi", OBJECT),
    ("java/security/KeyPairGenerator", "java/security/KeyPairGeneratorSpi"),
    ("java/security/SecureRandom", "java/util/Random"),
    ("java/security/KeyStore", OBJECT),
    ("java/security/KeyFactory", OBJECT),
    ("java/security/KeyPair", OBJECT),
    ("java/security/Provider", "java/util/Properties"),
    ("java/security/AccessController", OBJECT),
    ("java/security/ProtectionDomain", OBJECT),
    ("java/security/CodeSource", OBJECT),
    ("java/security/Permission", OBJECT),
    ("java/security/BasicPermission", "java/security/Permission"),
    ("java/security/cert/Certificate", OBJECT),
    ("java/security/cert/X509Certificate", "java/security/cert/Certificate"),
    ("java/security/cert/CertificateFactory", OBJECT),
    ("javax/crypto/Cipher", OBJECT),
    ("javax/crypto/Mac", OBJECT),
    ("javax/crypto/KeyGenerator", OBJECT),
    ("javax/crypto/SecretKeyFactory", OBJECT),
    ("javax/crypto/spec/SecretKeySpec", OBJECT),
    ("javax/crypto/spec/IvParameterSpec", OBJECT),
    ("java/sql/DriverManager", OBJECT),
    ("java/sql/Date", "java/util/Date"),
    ("java/sql/Time", "java/util/Date"),
    ("java/sql/Timestamp", "java/util/Date"),
    ("java/beans/PropertyChangeSupport", OBJECT),
    ("java/beans/PropertyChangeEvent", "java/util/EventObject"),
];

/// Built-in JDK interfaces. Their superclass is `java/lang/Object`.
const JDK_INTERFACES: &[&str] = &[
    "java/lang/Runnable",
    "java/lang/Comparable",
    "java/lang/CharSequence",
    "java/lang/Iterable",
    "java/lang/AutoCloseable",
    "java/lang/Cloneable",
    "java/lang/Appendable",
    "java/lang/Readable",
    "java/lang/Thread$UncaughtExceptionHandler",
    "java/lang/annotation/Annotation",
    "java/lang/reflect/AnnotatedElement",
    "java/lang/reflect/GenericDeclaration",
    "java/lang/reflect/InvocationHandler",
    "java/lang/reflect/Member",
    "java/lang/reflect/Type",
    "java/lang/reflect/ParameterizedType",
    "java/io/Serializable",
    "java/io/Externalizable",
    "java/io/Closeable",
    "java/io/Flushable",
    "java/io/DataInput",
    "java/io/DataOutput",
    "java/io/ObjectInput",
    "java/io/ObjectOutput",
    "java/io/FileFilter",
    "java/io/FilenameFilter",
    "java/nio/file/Path",
    "java/nio/file/DirectoryStream",
    "java/nio/file/PathMatcher",
    "java/nio/file/WatchService",
    "java/nio/file/OpenOption",
    "java/nio/file/CopyOption",
    "java/nio/file/attribute/BasicFileAttributes",
    "java/nio/channels/Channel",
    "java/nio/channels/ReadableByteChannel",
    "java/nio/channels/WritableByteChannel",
    "java/nio/channels/ByteChannel",
    "java/nio/channels/SeekableByteChannel",
    "java/util/Collection",
    "java/util/List",
    "java/util/Set",
    "java/util/SortedSet",
    "java/util/NavigableSet",
    "java/util/Map",
    "java/util/Map$Entry",
    "java/util/SortedMap",
    "java/util/NavigableMap",
    "java/util/Queue",
    "java/util/Deque",
    "java/util/Iterator",
    "java/util/ListIterator",
    "java/util/Enumeration",
    "java/util/Comparator",
    "java/util/RandomAccess",
    "java/util/EventListener",
    "java/util/Spliterator",
    "java/util/function/Function",
    "java/util/function/BiFunction",
    "java/util/function/UnaryOperator",
    "java/util/function/BinaryOperator",
    "java/util/function/Supplier",
    "java/util/function/BooleanSupplier",
    "java/util/function/IntSupplier",
    "java/util/function/LongSupplier",
    "java/util/function/Consumer",
    "java/util/function/BiConsumer",
    "java/util/function/IntConsumer",
    "java/util/function/Predicate",
    "java/util/function/BiPredicate",
    "java/util/function/IntPredicate",
    "java/util/function/IntFunction",
    "java/util/function/ToIntFunction",
    "java/util/function/ToLongFunction",
    "java/util/stream/BaseStream",
    "java/util/stream/Stream",
    "java/util/stream/IntStream",
    "java/util/stream/LongStream",
    "java/util/stream/DoubleStream",
    "java/util/stream/Collector",
    "java/util/regex/MatchResult",
    "java/util/zip/Checksum",
    "java/util/concurrent/Callable",
    "java/util/concurrent/Executor",
    "java/util/concurrent/ExecutorService",
    "java/util/concurrent/ScheduledExecutorService",
    "java/util/concurrent/ThreadFactory",
    "java/util/concurrent/Future",
    "java/util/concurrent/RunnableFuture",
    "java/util/concurrent/ScheduledFuture",
    "java/util/concurrent/Delayed",
    "java/util/concurrent/CompletionStage",
    "java/util/concurrent/BlockingQueue",
    "java/util/concurrent/BlockingDeque",
    "java/util/concurrent/TransferQueue",
    "java/util/concurrent/ConcurrentMap",
    "java/util/concurrent/ConcurrentNavigableMap",
    "java/util/concurrent/locks/Lock",
    "java/util/concurrent/locks/ReadWriteLock",
    "java/util/concurrent/locks/Condition",
    "java/time/temporal/Temporal",
    "java/time/temporal/TemporalAccessor",
    "java/time/temporal/TemporalAdjuster",
    "java/time/temporal/TemporalAmount",
    "java/security/Key",
    "java/security/PublicKey",
    "java/security/PrivateKey",
    "java/security/Principal",
    "java/security/PrivilegedAction",
    "java/security/PrivilegedExceptionAction",
    "javax/crypto/SecretKey",
    "java/sql/Wrapper",
    "java/sql/Connection",
    "java/sql/Driver",
    "java/sql/Statement",
    "java/sql/PreparedStatement",
    "java/sql/CallableStatement",
    "java/sql/ResultSet",
    "java/sql/ResultSetMetaData",
    "java/sql/DatabaseMetaData",
    "javax/sql/DataSource",
    "java/beans/PropertyChangeListener",
];

/// Headers of library classes, keyed by internal name.
#[derive(Debug, Clone, Default)]
pub struct ClassPath {
    headers: HashMap<String, ClassHeader>,
}

impl ClassPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// A class path preloaded with the built-in JDK table.
    pub fn with_jdk() -> Self {
        let mut path = Self::new();
        path.add(ClassHeader {
            name: OBJECT.to_string(),
            super_name: None,
            interfaces: Vec::new(),
            access: access::PUBLIC,
        });
        let classes = JDK_CLASSES
            .iter()
            .map(|(name, super_name)| (*name, *super_name, access::PUBLIC));
        let interfaces = JDK_INTERFACES
            .iter()
            .map(|name| (*name, OBJECT, access::PUBLIC | access::INTERFACE | access::ABSTRACT));
        for (name, super_name, access) in classes.chain(interfaces) {
            path.add(ClassHeader {
                name: name.to_string(),
                super_name: Some(super_name.to_string()),
                interfaces: Vec::new(),
                access,
            });
        }
        path
    }

    /// Adds `header`, replacing any earlier entry of the same name.
    pub fn add(&mut self, header: ClassHeader) {
        self.headers.insert(header.name.clone(), header);
    }

    /// Parses the header of a library class file and adds it.
    pub fn add_class_bytes(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let header = crate::decoder::read_header(bytes)?;
        self.add(header);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ClassHeader> {
        self.headers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Superclass chain of `name`, starting with `name` itself. Stops at a cycle.
fn superclass_chain<F>(name: &str, lookup: &mut F) -> Result<Vec<ClassHeader>, ResolutionError>
where
    F: FnMut(&str) -> Option<ClassHeader>,
{
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(name.to_string());
    while let Some(name) = current {
        if !seen.insert(name.clone()) {
            break;
        }
        let header = lookup(&name).ok_or(ResolutionError::TypeNotFound(name))?;
        current = header.super_name.clone();
        chain.push(header);
    }
    Ok(chain)
}

/// Nearest common superclass of two classes, looking headers up through `lookup`.
///
/// Interfaces meet at `java/lang/Object`, the way the verifier treats them. Fails with the
/// first name `lookup` cannot resolve.
pub fn common_super_class<F>(left: &str, right: &str, mut lookup: F) -> Result<String, ResolutionError>
where
    F: FnMut(&str) -> Option<ClassHeader>,
{
    if left == right {
        return Ok(left.to_string());
    }
    let left_chain = superclass_chain(left, &mut lookup)?;
    let right_chain = superclass_chain(right, &mut lookup)?;
    if left_chain[0].is_interface() || right_chain[0].is_interface() {
        return Ok(OBJECT.to_string());
    }
    let right_names: HashSet<&str> = right_chain.iter().map(|h| h.name.as_str()).collect();
    Ok(left_chain
        .iter()
        .find(|header| right_names.contains(header.name.as_str()))
        .map_or_else(|| OBJECT.to_string(), |header| header.name.clone()))
}
