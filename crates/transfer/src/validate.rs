use std::fmt;

use crate::FileDescriptor;

/// Machine-distinguishable reason a file was rejected at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooLarge,
    TooSmall,
    TypeNotAllowed,
    CountExceeded,
}

impl RejectReason {
    /// User-safe message from the stable vocabulary.
    pub fn user_message(&self) -> &'static str {
        match self {
            RejectReason::TooLarge => "size exceeded",
            RejectReason::TooSmall => "file too small",
            RejectReason::TypeNotAllowed => "type not allowed",
            RejectReason::CountExceeded => "too many files",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_message())
    }
}

/// Admission rules supplied by the caller. All bounds are optional;
/// an empty `allowed_types` list admits every type.
#[derive(Debug, Clone, Default)]
pub struct ValidationRules {
    pub max_file_size: Option<u64>,
    pub min_file_size: Option<u64>,
    pub max_file_count: Option<usize>,
    /// Accepted entries:
    /// - exact MIME type (`"image/png"`),
    /// - MIME wildcard (`"image/*"`),
    /// - extension with leading dot (`".pdf"`), matched case-insensitively.
    pub allowed_types: Vec<String>,
}

/// Validates a candidate file against the rules.
///
/// `current_count` is the number of files already admitted and not yet
/// evicted; it participates in the `max_file_count` check.
pub fn validate(
    descriptor: &FileDescriptor,
    current_count: usize,
    rules: &ValidationRules,
) -> Result<(), RejectReason> {
    if let Some(max) = rules.max_file_count
        && current_count >= max
    {
        return Err(RejectReason::CountExceeded);
    }
    if let Some(max) = rules.max_file_size
        && descriptor.size() > max
    {
        return Err(RejectReason::TooLarge);
    }
    if let Some(min) = rules.min_file_size
        && descriptor.size() < min
    {
        return Err(RejectReason::TooSmall);
    }
    if !rules.allowed_types.is_empty() && !type_allowed(descriptor, &rules.allowed_types) {
        return Err(RejectReason::TypeNotAllowed);
    }
    Ok(())
}

fn type_allowed(descriptor: &FileDescriptor, allowed: &[String]) -> bool {
    let mime = descriptor.mime_type().to_ascii_lowercase();
    let ext = descriptor.extension();
    allowed.iter().any(|entry| {
        let entry = entry.to_ascii_lowercase();
        if let Some(dot_ext) = entry.strip_prefix('.') {
            ext.as_deref() == Some(dot_ext)
        } else if entry.ends_with("/*") {
            // Keep the slash in the prefix so "image/*" cannot match
            // "imagination/x", and require a non-empty subtype.
            let prefix = &entry[..entry.len() - 1];
            mime.starts_with(prefix) && mime.len() > prefix.len()
        } else {
            mime == entry
        }
    })
}
