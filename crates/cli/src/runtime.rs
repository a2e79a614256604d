//! JDK runtime images.
//!
//! Library code merges JDK types at branch joins and exception handlers, so frame computation
//! needs the superclass chains of the whole platform, not just the built-in table. A JDK home
//! keeps its classes in one of three layouts, tried in this order:
//!
//! - `lib/modules`, the jimage file of JDK 9 and later.
//! - `jmods/*.jmod`, zip files behind a four-byte header, shipped by some JDK 9+ builds.
//! - `jre/lib/rt.jar` or `lib/rt.jar` on JDK 8 and earlier.
//!
//! Only class headers are kept, see [`ClassPath::add_class_bytes`].
use crate::archive;
use jarcloak_core::ClassPath;
use jarcloak_utils::errors::InputError;
use std::env;
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Environment variable naming the JDK home used when none is given explicitly.
pub const JAVA_HOME: &str = "JAVA_HOME";

const JIMAGE_MAGIC: u32 = 0xCAFE_DADA;
const JIMAGE_MAJOR_VERSION: u32 = 1;
const JIMAGE_HEADER_SIZE: usize = 7 * 4;
const JMOD_MAGIC: &[u8; 4] = b"JM\x01\x00";
const JMOD_CLASSES: &str = "classes/";
const MODULE_INFO: &str = "module-info";

/// A JDK home to read runtime classes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JdkHome {
    pub path: PathBuf,
    /// Named on the command line rather than taken from `JAVA_HOME`.
    pub explicit: bool,
}

impl JdkHome {
    pub fn explicit(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            explicit: true,
        }
    }

    /// The home named by `JAVA_HOME`, if set and non-empty.
    pub fn from_env() -> Option<Self> {
        env::var_os(JAVA_HOME)
            .filter(|value| !value.is_empty())
            .map(|value| Self {
                path: PathBuf::from(value),
                explicit: false,
            })
    }

    /// Loads the runtime image of this home into `class_path`.
    ///
    /// An explicit home must hold a readable image. A home only taken from `JAVA_HOME` is
    /// best effort: failures are logged and the built-in table is used alone.
    pub fn load_into(&self, class_path: &mut ClassPath) -> Result<usize, InputError> {
        let loaded = RuntimeImage::locate(&self.path).and_then(|image| image.load_into(class_path));
        match loaded {
            Err(error) if !self.explicit => {
                warn!("{JAVA_HOME} runtime not loaded, using built-in JDK types only: {error}");
                Ok(0)
            }
            loaded => loaded,
        }
    }
}

/// The runtime image layout found under a JDK home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeImage {
    Jimage(PathBuf),
    Jmods(PathBuf),
    RtJar(PathBuf),
}

impl RuntimeImage {
    /// Finds the runtime image of the JDK or JRE at `home`.
    pub fn locate(home: &Path) -> Result<Self, InputError> {
        let shown = home.display().to_string();
        if !home.exists() {
            return Err(InputError::NotFound(shown));
        }
        let modules = home.join("lib").join("modules");
        if modules.is_file() {
            return Ok(Self::Jimage(modules));
        }
        let jmods = home.join("jmods");
        if jmods.is_dir() {
            return Ok(Self::Jmods(jmods));
        }
        for rt in [home.join("jre").join("lib").join("rt.jar"), home.join("lib").join("rt.jar")] {
            if rt.is_file() {
                return Ok(Self::RtJar(rt));
            }
        }
        Err(InputError::RuntimeImage {
            path: shown,
            reason: "no lib/modules, jmods or rt.jar".into(),
        })
    }

    /// Adds the header of every class in the image to `class_path`. Returns how many were
    /// added. Classes that do not parse are logged and skipped.
    pub fn load_into(&self, class_path: &mut ClassPath) -> Result<usize, InputError> {
        let mut added = 0;
        let mut add = |origin: &Path, name: &str, bytes: &[u8]| match class_path.add_class_bytes(bytes) {
            Ok(()) => added += 1,
            Err(error) => warn!("runtime image {}: skipping {name}: {error}", origin.display()),
        };
        match self {
            Self::Jimage(path) => read_jimage(path, &mut add)?,
            Self::Jmods(dir) => {
                let mut jmods: Vec<PathBuf> = fs::read_dir(dir)?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|path| path.extension().is_some_and(|ext| ext == "jmod"))
                    .collect();
                jmods.sort();
                for jmod in &jmods {
                    read_jmod(jmod, &mut add)?;
                }
            }
            Self::RtJar(path) => {
                for entry in archive::read_archive(path)? {
                    if entry.name.ends_with(".class") {
                        add(path.as_path(), &entry.name, &entry.bytes);
                    }
                }
            }
        }
        info!("loaded {added} runtime classes from {}", self.path().display());
        Ok(added)
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Jimage(path) | Self::Jmods(path) | Self::RtJar(path) => path,
        }
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> InputError {
    InputError::RuntimeImage {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Reads the class entries of one `.jmod` file.
fn read_jmod<F>(path: &Path, add: &mut F) -> Result<(), InputError>
where
    F: FnMut(&Path, &str, &[u8]),
{
    let bytes = fs::read(path)?;
    if !bytes.starts_with(JMOD_MAGIC) {
        return Err(malformed(path, "missing jmod header"));
    }
    let mut jmod = ZipArchive::new(Cursor::new(&bytes[JMOD_MAGIC.len()..]))
        .map_err(|error| malformed(path, error.to_string()))?;
    for index in 0..jmod.len() {
        let mut entry = jmod
            .by_index(index)
            .map_err(|error| malformed(path, error.to_string()))?;
        let name = entry.name().to_string();
        let Some(class) = name.strip_prefix(JMOD_CLASSES) else {
            continue;
        };
        if !class.ends_with(".class") || class.starts_with(MODULE_INFO) {
            continue;
        }
        let mut class_bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
        entry.read_to_end(&mut class_bytes)?;
        add(path, class, &class_bytes);
    }
    Ok(())
}

/// Location attribute kinds of a jimage resource.
mod attribute {
    pub const END: usize = 0;
    pub const MODULE: usize = 1;
    pub const PARENT: usize = 2;
    pub const BASE: usize = 3;
    pub const EXTENSION: usize = 4;
    pub const OFFSET: usize = 5;
    pub const COMPRESSED: usize = 6;
    pub const UNCOMPRESSED: usize = 7;
    pub const COUNT: usize = 8;
}

/// The index of a jimage file: header fields plus the offsets, locations and strings tables.
struct JimageIndex {
    big_endian: bool,
    table_length: usize,
    locations_size: usize,
    strings_size: usize,
    /// Header plus tables. Resource contents start here.
    size: usize,
}

impl JimageIndex {
    fn parse_header(path: &Path, header: &[u8; JIMAGE_HEADER_SIZE]) -> Result<Self, InputError> {
        let big_endian = match u32::from_le_bytes([header[0], header[1], header[2], header[3]]) {
            JIMAGE_MAGIC => false,
            magic if magic.swap_bytes() == JIMAGE_MAGIC => true,
            _ => return Err(malformed(path, "bad jimage magic")),
        };
        let field = |index: usize| {
            let raw = [header[index * 4], header[index * 4 + 1], header[index * 4 + 2], header[index * 4 + 3]];
            let value = if big_endian {
                u32::from_be_bytes(raw)
            } else {
                u32::from_le_bytes(raw)
            };
            usize::try_from(value).unwrap_or(usize::MAX)
        };
        let major = field(1) >> 16;
        if major != JIMAGE_MAJOR_VERSION as usize {
            return Err(malformed(path, format!("unsupported jimage version {major}")));
        }
        let (table_length, locations_size, strings_size) = (field(4), field(5), field(6));
        let size = table_length
            .checked_mul(8)
            .and_then(|tables| tables.checked_add(JIMAGE_HEADER_SIZE))
            .and_then(|size| size.checked_add(locations_size))
            .and_then(|size| size.checked_add(strings_size))
            .ok_or_else(|| malformed(path, "jimage index size overflows"))?;
        Ok(Self {
            big_endian,
            table_length,
            locations_size,
            strings_size,
            size,
        })
    }

    fn u32_at(&self, bytes: &[u8], at: usize) -> Option<u32> {
        let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
        Some(if self.big_endian {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        })
    }
}

/// Decodes the attribute stream of one location. Each attribute is a byte holding the kind
/// in its upper five bits and the value length minus one in the lower three, followed by the
/// big-endian value.
fn location_attributes(locations: &[u8], mut at: usize) -> Option<[u64; attribute::COUNT]> {
    let mut values = [0u64; attribute::COUNT];
    loop {
        let byte = *locations.get(at)?;
        at += 1;
        let kind = usize::from(byte >> 3);
        if kind == attribute::END {
            return Some(values);
        }
        let length = usize::from(byte & 0x7) + 1;
        let value = locations
            .get(at..at + length)?
            .iter()
            .fold(0u64, |value, b| (value << 8) | u64::from(*b));
        at += length;
        *values.get_mut(kind)? = value;
    }
}

/// The NUL-terminated string at `offset` of the strings table.
fn string_at(strings: &[u8], offset: u64) -> Option<&str> {
    let start = usize::try_from(offset).ok()?;
    let rest = strings.get(start..)?;
    let end = rest.iter().position(|b| *b == 0)?;
    std::str::from_utf8(&rest[..end]).ok()
}

/// Reads the class resources of a jimage file. Compressed resources are skipped.
fn read_jimage<F>(path: &Path, add: &mut F) -> Result<(), InputError>
where
    F: FnMut(&Path, &str, &[u8]),
{
    let mut file = BufReader::new(File::open(path)?);
    let mut header = [0u8; JIMAGE_HEADER_SIZE];
    file.read_exact(&mut header)?;
    let index = JimageIndex::parse_header(path, &header)?;
    let mut tables = vec![0u8; index.size - JIMAGE_HEADER_SIZE];
    file.read_exact(&mut tables)?;

    let offsets_at = index.table_length * 4;
    let locations_at = offsets_at + index.table_length * 4;
    let strings_at = locations_at + index.locations_size;
    let locations = &tables[locations_at..strings_at];
    let strings = &tables[strings_at..strings_at + index.strings_size];

    let mut compressed = 0usize;
    let mut resources = Vec::new();
    for slot in 0..index.table_length {
        let offset = index
            .u32_at(&tables, offsets_at + slot * 4)
            .ok_or_else(|| malformed(path, "truncated offsets table"))?;
        let attributes = usize::try_from(offset)
            .ok()
            .and_then(|at| location_attributes(locations, at))
            .ok_or_else(|| malformed(path, format!("corrupt location {slot}")))?;
        if string_at(strings, attributes[attribute::EXTENSION]) != Some("class") {
            continue;
        }
        let base = string_at(strings, attributes[attribute::BASE]).unwrap_or_default();
        if base == MODULE_INFO {
            continue;
        }
        if attributes[attribute::COMPRESSED] != 0 {
            compressed += 1;
            continue;
        }
        let parent = string_at(strings, attributes[attribute::PARENT]).unwrap_or_default();
        let name = if parent.is_empty() {
            format!("{base}.class")
        } else {
            format!("{parent}/{base}.class")
        };
        let module = string_at(strings, attributes[attribute::MODULE]).unwrap_or_default();
        resources.push((
            format!("/{module}/{name}"),
            attributes[attribute::OFFSET],
            attributes[attribute::UNCOMPRESSED],
        ));
    }

    // content order keeps the reads sequential
    resources.sort_by_key(|(_, offset, _)| *offset);
    let mut bytes = Vec::new();
    for (name, offset, length) in resources {
        let (Ok(length), Some(start)) = (usize::try_from(length), (index.size as u64).checked_add(offset)) else {
            return Err(malformed(path, format!("resource {name} out of range")));
        };
        bytes.resize(length, 0);
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut bytes)?;
        add(path, &name, &bytes);
    }
    if compressed > 0 {
        warn!("runtime image {}: skipped {compressed} compressed classes", path.display());
    }
    debug!("read jimage index of {} entries from {}", index.table_length, path.display());
    Ok(())
}
