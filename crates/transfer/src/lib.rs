//! File identity, admission validation and chunk reading for chunkflow.

mod descriptor;
mod sanitize;
mod source;
mod validate;

pub use descriptor::FileDescriptor;
pub use sanitize::{MAX_DISPLAY_CHARS, sanitize_display_name};
pub use source::{BlobCache, DiskSource, FileSource, MemorySource, SourceError};
pub use validate::{RejectReason, ValidationRules, validate};

/// Default chunk size: 1 MiB.
///
/// Small enough that a lost in-flight chunk is cheap to resend, large
/// enough to keep per-chunk overhead (ACK round trip, persistence write)
/// low. The engine configuration can override it per instance.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
