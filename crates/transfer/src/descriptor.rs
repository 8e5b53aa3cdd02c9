use sha2::{Digest, Sha256};

/// Immutable metadata of a file admitted for upload.
///
/// The fingerprint derived from the descriptor identifies the same logical
/// file across process restarts: re-selecting a file with identical
/// metadata maps to the same fingerprint and therefore to the same
/// persisted transfer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    name: String,
    size: u64,
    mime_type: String,
    /// Milliseconds since the Unix epoch, as reported by the host.
    last_modified: i64,
}

impl FileDescriptor {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        last_modified: i64,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            last_modified,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    /// Lowercased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Computes the stable fingerprint: hex SHA-256 over the descriptor
    /// fields with length-prefixed framing, so `("ab", "c")` and
    /// `("a", "bc")` cannot collide.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [
            self.name.as_bytes(),
            &self.size.to_le_bytes()[..],
            &self.last_modified.to_le_bytes()[..],
            self.mime_type.as_bytes(),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        hex::encode(hasher.finalize())
    }
}
