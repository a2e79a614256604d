use thiserror::Error;

/// Errors raised while parsing a class file.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The class data ended before a complete structure could be read.
    #[error("unexpected end of class data at offset {0}")]
    UnexpectedEof(usize),
    /// The first four bytes are not `0xCAFEBABE`.
    #[error("bad magic number 0x{0:08x}")]
    BadMagic(u32),
    /// A constant pool reference points outside the pool or at a padding slot.
    #[error("invalid constant pool index {0}")]
    InvalidConstantIndex(u16),
    /// A constant pool reference points at an entry of the wrong kind.
    #[error("constant pool entry {index} is not a {expected}")]
    UnexpectedConstant {
        index: u16,
        expected: &'static str,
    },
    #[error("unsupported constant pool tag {0}")]
    UnsupportedConstantTag(u8),
    #[error("malformed modified UTF-8 string")]
    InvalidUtf8,
    #[error("invalid opcode 0x{opcode:02x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },
    /// A branch, exception range or debug entry points outside the method code.
    #[error("code offset {0} is outside the method code")]
    InvalidCodeOffset(i64),
    #[error("malformed {0} attribute")]
    InvalidAttribute(String),
}

/// Errors raised while computing stack map frames or operand stack sizes.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("operand stack underflow at instruction {0}")]
    StackUnderflow(usize),
    /// Two paths reach the same instruction with different stack heights.
    #[error("stack height mismatch at instruction {index}: {expected} vs {found}")]
    StackHeightMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    /// A category 2 value was split or combined with a category 1 operation.
    #[error("invalid operand types at instruction {index}: {detail}")]
    InvalidOperands { index: usize, detail: String },
    #[error("invalid descriptor `{0}`")]
    InvalidDescriptor(String),
    #[error("jump target is not part of the instruction list")]
    UnknownLabel,
    /// `jsr`/`ret` subroutines cannot be described with stack map frames.
    #[error("subroutines are not supported by frame computation")]
    Subroutine,
    #[error("execution falls off the end of the code")]
    FallsOffEnd,
    #[error("type inference did not converge after {0} steps")]
    NoFixpoint(usize),
}

/// Errors raised while serializing a class file.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// A method's code exceeds the JVM limit.
    #[error("method {method} has {size} bytes of code, limit is {limit}")]
    MethodTooLarge {
        method: String,
        size: usize,
        limit: usize,
    },
    #[error("string of {0} bytes does not fit a constant pool entry")]
    StringTooLong(usize),
    #[error("constant pool overflow ({0} entries)")]
    ConstantPoolOverflow(usize),
    #[error("too many {0} for the class file format")]
    TooMany(&'static str),
    #[error("instruction in {0} references a label that is not in its code")]
    UnknownLabel(String),
    /// Frame or max computation failed for a method.
    #[error("frame computation failed in {method}: {source}")]
    Frames {
        method: String,
        #[source]
        source: FrameError,
    },
}

/// Fatal problems with the job input. Raised before any transformation starts.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input not found: {0}")]
    NotFound(String),
    #[error("input is not a regular file: {0}")]
    NotAFile(String),
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),
    /// The archive holds no class files at all.
    #[error("input contains no classes, it is not a proper jar")]
    NoClasses,
    #[error("corrupt class entry {entry}: {source}")]
    CorruptClass {
        entry: String,
        #[source]
        source: DecodeError,
    },
    #[error("archive error: {0}")]
    Archive(String),
    /// A JDK home holds no runtime image this tool can read, or the image is malformed.
    #[error("unreadable runtime image {path}: {reason}")]
    RuntimeImage { path: String, reason: String },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Entry counts the pipeline cannot address.
#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("too many classes: {0}")]
    TooManyClasses(usize),
    #[error("too many resources: {0}")]
    TooManyResources(usize),
    /// A name generator found no unused name within its attempt budget.
    #[error("no unused name left in scope `{scope}` after {attempts} attempts")]
    NamesExhausted { scope: String, attempts: usize },
}

/// Error type for transform operations.
#[derive(Debug, Error)]
pub enum TransformError {
    /// A transformed method no longer fits the JVM code size limit.
    #[error("method {method} grew to {size} bytes, limit is {limit}")]
    SizeLimitExceeded {
        method: String,
        size: usize,
        limit: usize,
    },
    #[error("invalid descriptor `{0}`")]
    InvalidDescriptor(String),
    #[error("frame analysis failed: {0}")]
    Frame(#[from] FrameError),
    #[error("{0}")]
    Generic(String),
}

/// A class could not be serialized even after every fallback mode.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("class {class} could not be written: {source}")]
    Encode {
        class: String,
        #[source]
        source: EncodeError,
    },
    #[error("job cancelled while writing")]
    Cancelled,
}

/// A type needed to merge stack map frames is unknown.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("type {0} is not present in the input or the library path")]
    TypeNotFound(String),
}

/// Transformer setup failed. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("invalid option `{option}`: {reason}")]
    InvalidOption { option: String, reason: String },
}

/// Errors that abort an obfuscation job.
#[derive(Debug, Error)]
pub enum ObfuscateError {
    /// The input could not be loaded.
    #[error("input error: {0}")]
    Input(#[from] InputError),
    /// The input is larger than the pipeline can address.
    #[error("capacity error: {0}")]
    Capacity(#[from] CapacityError),
    /// A transformer could not be constructed from the configuration.
    #[error("construction error: {0}")]
    Construction(#[from] ConstructionError),
    /// File read/write error.
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
