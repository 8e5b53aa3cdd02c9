use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Errors from reading file bytes for upload.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read past end: offset {offset}, size {size}")]
    OutOfRange { offset: u64, size: u64 },
}

/// Supplies file bytes by offset.
///
/// The engine reads strictly sequentially within one session, but a resume
/// can start at any confirmed offset, so sources must support random
/// access. Implementations do not need to be shareable: each session owns
/// its source exclusively.
pub trait FileSource: Send {
    /// Total size of the underlying file in bytes.
    fn size(&self) -> u64;

    /// Reads up to `max_len` bytes starting at `offset`. Returns fewer
    /// bytes only at end of file.
    fn read_chunk(&mut self, offset: u64, max_len: usize) -> Result<Vec<u8>, SourceError>;
}

/// Re-supplies file bytes after a process restart.
///
/// Without a cache, a recovered session stays paused until the user
/// re-selects the same file (recognized by fingerprint). With one, the
/// engine resumes recovered sessions automatically.
pub trait BlobCache: Send + Sync {
    /// Returns a source for the given fingerprint, if the cache holds one.
    fn blob(&self, fingerprint: &str) -> Option<Box<dyn FileSource>>;
}

/// Disk-backed source reading through a seekable file handle.
pub struct DiskSource {
    file: std::fs::File,
    size: u64,
}

impl DiskSource {
    /// Opens `path` for chunked reading.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl FileSource for DiskSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_chunk(&mut self, offset: u64, max_len: usize) -> Result<Vec<u8>, SourceError> {
        if offset > self.size {
            return Err(SourceError::OutOfRange {
                offset,
                size: self.size,
            });
        }
        let want = max_len.min((self.size - offset) as usize);
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; want];
        let mut total = 0;
        while total < buf.len() {
            let n = self.file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        Ok(buf)
    }
}

/// In-memory source, used by tests and blob caches.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl FileSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_chunk(&mut self, offset: u64, max_len: usize) -> Result<Vec<u8>, SourceError> {
        let size = self.data.len() as u64;
        if offset > size {
            return Err(SourceError::OutOfRange { offset, size });
        }
        let start = offset as usize;
        let end = (start + max_len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn disk_source(data: &[u8]) -> (tempfile::TempDir, DiskSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        (dir, DiskSource::open(&path).unwrap())
    }

    #[test]
    fn disk_source_reads_sequential_chunks() {
        let (_dir, mut src) = disk_source(b"0123456789");
        assert_eq!(src.size(), 10);
        assert_eq!(src.read_chunk(0, 4).unwrap(), b"0123");
        assert_eq!(src.read_chunk(4, 4).unwrap(), b"4567");
        assert_eq!(src.read_chunk(8, 4).unwrap(), b"89");
        assert_eq!(src.read_chunk(10, 4).unwrap(), b"");
    }

    #[test]
    fn disk_source_random_access_for_resume() {
        let (_dir, mut src) = disk_source(b"0123456789");
        assert_eq!(src.read_chunk(6, 4).unwrap(), b"6789");
        // Resuming lower is also allowed (server offset can lag).
        assert_eq!(src.read_chunk(2, 2).unwrap(), b"23");
    }

    #[test]
    fn disk_source_rejects_offset_past_end() {
        let (_dir, mut src) = disk_source(b"abc");
        assert!(matches!(
            src.read_chunk(4, 1),
            Err(SourceError::OutOfRange { offset: 4, size: 3 })
        ));
    }

    #[test]
    fn memory_source_mirrors_disk_semantics() {
        let mut src = MemorySource::new(b"0123456789".to_vec());
        assert_eq!(src.size(), 10);
        assert_eq!(src.read_chunk(8, 4).unwrap(), b"89");
        assert_eq!(src.read_chunk(10, 4).unwrap(), b"");
        assert!(src.read_chunk(11, 1).is_err());
    }
}
