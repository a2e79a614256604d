//! Named archive entries going into and coming out of a job.
use indexmap::IndexMap;

/// A named blob as read from the input archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputEntry {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// A non-class entry carried through the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Set by transformers that rewrote the content.
    pub modified: bool,
}

impl Resource {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            modified: false,
        }
    }

    /// The content as text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// The finished archive: entries in write order plus an optional comment.
#[derive(Debug, Clone, Default)]
pub struct OutputArchive {
    entries: IndexMap<String, Vec<u8>>,
    /// Names of entries added by transformers rather than derived from the input.
    injected: Vec<String>,
    pub comment: Option<String>,
}

impl OutputArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry derived from the input. The first entry of a name wins; returns whether
    /// this one was kept.
    pub fn push(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> bool {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return false;
        }
        self.entries.insert(name, bytes);
        true
    }

    /// Adds an entry created by a transformer.
    pub fn inject(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> bool {
        let name = name.into();
        let added = self.push(name.clone(), bytes);
        if added {
            self.injected.push(name);
        }
        added
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn injected(&self) -> &[String] {
        &self.injected
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
    }

    pub fn into_entries(self) -> IndexMap<String, Vec<u8>> {
        self.entries
    }
}
