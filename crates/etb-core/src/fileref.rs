//! Content-addressed file references.
//!
//! A file reference pairs a relative path with the SHA-1 of the file body.
//! Two references denote the same blob exactly when their hashes agree; the
//! path is a human-facing name and does not participate in equality.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub file: String,
    pub sha1: String,
}

impl FileRef {
    pub fn new(file: impl Into<String>, sha1: impl Into<String>) -> Self {
        FileRef {
            file: file.into(),
            sha1: sha1.into(),
        }
    }
}

impl PartialEq for FileRef {
    fn eq(&self, other: &Self) -> bool {
        self.sha1 == other.sha1
    }
}

impl Eq for FileRef {}

impl std::hash::Hash for FileRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.sha1.hash(state);
    }
}

impl std::fmt::Display for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{file: \"{}\", sha1: \"{}\"}}", self.file, self.sha1)
    }
}
