//! Engine event channel types.

use std::time::Duration;

use chunkflow_transfer::RejectReason;

/// Events emitted by the engine, multiplexed over one ordered channel
/// and tagged by session ID.
///
/// Reasons carried in events use the stable user-safe vocabulary
/// (`network`, `timeout`, `server unavailable`, ...), never raw
/// transport error strings.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The session is waiting for a concurrency slot.
    Queued { session_id: String },
    /// The session was admitted and its upload task started.
    Started { session_id: String },
    /// The confirmed offset advanced.
    Progress {
        session_id: String,
        offset: u64,
        size: u64,
    },
    /// The session stopped without finishing; offset is retained.
    Paused { session_id: String },
    /// A transient failure; the given attempt runs after `delay`.
    Retrying {
        session_id: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// All bytes confirmed; the checkpoint record was purged.
    Completed { session_id: String },
    /// Retry budget exhausted or fatal error; explicit retry required.
    Failed { session_id: String, reason: String },
    Cancelled { session_id: String },
    /// A file was rejected before any session existed.
    ValidationRejected { name: String, reason: RejectReason },
    /// The session paused because the server demands fresh credentials.
    /// Resume it after refreshing; retries cannot fix this.
    AuthRequired { session_id: String },
    /// Checkpoints degraded to memory-only; uploads continue but will
    /// not survive a restart.
    StorageDegraded,
}

impl EngineEvent {
    /// Session this event belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            EngineEvent::Queued { session_id }
            | EngineEvent::Started { session_id }
            | EngineEvent::Progress { session_id, .. }
            | EngineEvent::Paused { session_id }
            | EngineEvent::Retrying { session_id, .. }
            | EngineEvent::Completed { session_id }
            | EngineEvent::Failed { session_id, .. }
            | EngineEvent::Cancelled { session_id }
            | EngineEvent::AuthRequired { session_id } => Some(session_id),
            EngineEvent::ValidationRejected { .. } | EngineEvent::StorageDegraded => None,
        }
    }
}
