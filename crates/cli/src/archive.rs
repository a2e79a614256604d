//! Jar I/O: reading input archives into entries, writing output archives and loading library
//! class paths.
use crate::runtime::JdkHome;
use jarcloak_core::ClassPath;
use jarcloak_transform::entries::{InputEntry, OutputArchive};
use jarcloak_utils::errors::InputError;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// What an input path holds, judged by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Archive,
    Class,
}

/// Checks that `path` is an existing regular file and classifies it.
pub fn input_kind(path: &Path) -> Result<InputKind, InputError> {
    let shown = path.display().to_string();
    if !path.exists() {
        return Err(InputError::NotFound(shown));
    }
    if !path.is_file() {
        return Err(InputError::NotAFile(shown));
    }
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jar" | "zip") => Ok(InputKind::Archive),
        Some("class") => Ok(InputKind::Class),
        _ => Err(InputError::UnsupportedFormat(shown)),
    }
}

fn archive_error(error: zip::result::ZipError) -> InputError {
    InputError::Archive(error.to_string())
}

/// Reads every file entry of a jar, in archive order. Directory entries are left out.
pub fn read_archive(path: &Path) -> Result<Vec<InputEntry>, InputError> {
    let file = BufReader::new(File::open(path)?);
    let mut archive = ZipArchive::new(file).map_err(archive_error)?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(archive_error)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut bytes = Vec::with_capacity(usize::try_from(file.size()).unwrap_or_default());
        file.read_to_end(&mut bytes)?;
        entries.push(InputEntry::new(name, bytes));
    }
    debug!("read {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Reads the input of an `obfuscate` run. Only archives are accepted.
pub fn read_input(path: &Path) -> Result<Vec<InputEntry>, InputError> {
    match input_kind(path)? {
        InputKind::Archive => read_archive(path),
        InputKind::Class => Err(InputError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Writes `output` as a deflated jar at `path`, entries in output order.
pub fn write_archive(path: &Path, output: &OutputArchive) -> io::Result<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in output.iter() {
        writer.start_file(name, options).map_err(io::Error::other)?;
        writer.write_all(bytes)?;
    }
    if let Some(comment) = &output.comment {
        writer.set_comment(comment.clone());
    }
    writer.finish().map_err(io::Error::other)?.flush()
}

/// Builds a class path from the JDK table, the runtime image of `jdk` if given, and the class
/// headers of every library jar or class file, each layer replacing same-named entries of
/// the one before. Entries that do not parse are logged and skipped.
pub fn load_library<P: AsRef<Path>>(paths: &[P], jdk: Option<&JdkHome>) -> Result<ClassPath, InputError> {
    let mut class_path = ClassPath::with_jdk();
    if let Some(home) = jdk {
        home.load_into(&mut class_path)?;
    }
    for path in paths {
        let path = path.as_ref();
        let entries = match input_kind(path)? {
            InputKind::Archive => read_archive(path)?,
            InputKind::Class => vec![InputEntry::new(
                path.display().to_string(),
                std::fs::read(path)?,
            )],
        };
        for entry in entries.iter().filter(|e| e.name.ends_with(".class")) {
            if let Err(error) = class_path.add_class_bytes(&entry.bytes) {
                warn!("library {}: skipping {}: {error}", path.display(), entry.name);
            }
        }
    }
    debug!("library class path holds {} classes", class_path.len());
    Ok(class_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unsupported_and_missing_inputs_are_rejected() {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "hi").unwrap();
        assert!(matches!(input_kind(&text), Err(InputError::UnsupportedFormat(_))));
        assert!(matches!(
            input_kind(&dir.path().join("gone.jar")),
            Err(InputError::NotFound(_))
        ));
        assert!(matches!(input_kind(dir.path()), Err(InputError::NotAFile(_))));
    }

    #[test]
    fn archive_round_trip_keeps_order_and_comment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.jar");
        let mut output = OutputArchive::new();
        output.push("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".to_vec());
        output.push("a/B.class", vec![0xCA, 0xFE]);
        output.inject("    .class", vec![1, 2, 3]);
        output.comment = Some("made by jarcloak".into());
        write_archive(&path, &output).unwrap();

        let entries = read_archive(&path).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["META-INF/MANIFEST.MF", "a/B.class", "    .class"]);
        assert_eq!(entries[1].bytes, [0xCA, 0xFE]);

        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.comment(), b"made by jarcloak");
        assert_eq!(archive.by_index(0).unwrap().compression(), CompressionMethod::Deflated);
    }

    #[test]
    fn class_files_are_not_obfuscation_inputs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("A.class");
        std::fs::write(&path, [0xCA, 0xFE, 0xBA, 0xBE]).unwrap();
        assert_eq!(input_kind(&path).unwrap(), InputKind::Class);
        assert!(matches!(read_input(&path), Err(InputError::UnsupportedFormat(_))));
    }
}
