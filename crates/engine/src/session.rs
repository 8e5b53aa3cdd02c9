//! Per-file transfer session state.
//!
//! A [`Session`] is the engine-owned record of one upload: identity,
//! confirmed offset, state-machine status, and the exclusively-owned
//! chunk source. The async protocol loop that mutates it lives in
//! [`crate::runner`]; everything here is synchronous bookkeeping behind
//! a mutex.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use chunkflow_transfer::{FileDescriptor, FileSource, SourceError, sanitize_display_name};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::PersistedRecord;

/// State-machine status of a session.
///
/// `Completed`, `Failed` and `Cancelled` are sinks; `Failed` alone can be
/// revived by an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Created,
    Queued,
    Initiating,
    Uploading,
    Retrying,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Running means an upload task currently owns the session.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SessionStatus::Initiating | SessionStatus::Uploading | SessionStatus::Retrying
        )
    }
}

/// Point-in-time copy of a session for callers.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: String,
    pub fingerprint: String,
    /// Sanitized display name; `None` for recovered sessions whose file
    /// has not been re-supplied yet.
    pub name: Option<String>,
    pub status: SessionStatus,
    pub offset: u64,
    pub size: u64,
    pub chunk_size: u64,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

struct State {
    status: SessionStatus,
    remote_url: Option<String>,
    offset: u64,
    attempt: u32,
    last_error: Option<String>,
    descriptor: Option<FileDescriptor>,
    source: Option<Box<dyn FileSource>>,
    /// Token aborting the current run's in-flight operation, set while
    /// an upload task owns the session.
    run_abort: Option<CancellationToken>,
}

/// One upload, identified by fingerprint. At most one live session
/// exists per fingerprint at any time.
pub struct Session {
    id: String,
    fingerprint: String,
    size: u64,
    chunk_size: u64,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    state: Mutex<State>,
}

impl Session {
    /// Creates a fresh session for a validated file.
    pub(crate) fn new(descriptor: FileDescriptor, chunk_size: u64) -> Self {
        let fingerprint = descriptor.fingerprint();
        let size = descriptor.size();
        Self {
            id: Uuid::new_v4().to_string(),
            fingerprint,
            size,
            chunk_size,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            state: Mutex::new(State {
                status: SessionStatus::Created,
                remote_url: None,
                offset: 0,
                attempt: 0,
                last_error: None,
                descriptor: Some(descriptor),
                source: None,
                run_abort: None,
            }),
        }
    }

    /// Rehydrates a paused session from its checkpoint record. The file
    /// blob cannot survive a restart, so the session stays paused until
    /// a source is attached.
    pub(crate) fn rehydrate(record: &PersistedRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            fingerprint: record.fingerprint.clone(),
            size: record.size,
            chunk_size: record.chunk_size,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            state: Mutex::new(State {
                status: SessionStatus::Paused,
                remote_url: Some(record.remote_url.clone()),
                offset: record.offset.min(record.size),
                attempt: 0,
                last_error: None,
                descriptor: None,
                source: None,
                run_abort: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().unwrap().status
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub fn offset(&self) -> u64 {
        self.state.lock().unwrap().offset
    }

    /// Adopts a confirmed offset. Monotonic: a lower value never rewinds
    /// progress, and the offset is clamped to the declared size.
    pub(crate) fn adopt_offset(&self, offset: u64) -> u64 {
        let mut s = self.state.lock().unwrap();
        s.offset = s.offset.max(offset.min(self.size));
        s.offset
    }

    pub fn remote_url(&self) -> Option<String> {
        self.state.lock().unwrap().remote_url.clone()
    }

    /// Stores the remote URL from the creation step. Set exactly once;
    /// later calls are ignored.
    pub(crate) fn set_remote_url(&self, url: String) {
        let mut s = self.state.lock().unwrap();
        if s.remote_url.is_none() {
            s.remote_url = Some(url);
        }
    }

    pub fn attempt(&self) -> u32 {
        self.state.lock().unwrap().attempt
    }

    /// Records one failed try of the current operation and returns the
    /// total so far.
    pub(crate) fn bump_attempt(&self) -> u32 {
        let mut s = self.state.lock().unwrap();
        s.attempt += 1;
        s.attempt
    }

    pub(crate) fn reset_attempt(&self) {
        self.state.lock().unwrap().attempt = 0;
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().unwrap().last_error.clone()
    }

    pub(crate) fn set_last_error(&self, message: impl Into<String>) {
        self.state.lock().unwrap().last_error = Some(message.into());
    }

    pub(crate) fn attach_descriptor(&self, descriptor: FileDescriptor) {
        let mut s = self.state.lock().unwrap();
        if s.descriptor.is_none() {
            s.descriptor = Some(descriptor);
        }
    }

    pub(crate) fn attach_source(&self, source: Box<dyn FileSource>) {
        self.state.lock().unwrap().source = Some(source);
    }

    pub fn has_source(&self) -> bool {
        self.state.lock().unwrap().source.is_some()
    }

    /// Reads file bytes for the next append. Errors if no blob has been
    /// attached (recovered session before re-selection).
    pub(crate) fn read_chunk(&self, offset: u64, max_len: usize) -> Result<Vec<u8>, SourceError> {
        let mut s = self.state.lock().unwrap();
        match s.source.as_mut() {
            Some(source) => source.read_chunk(offset, max_len),
            None => Err(SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no file source attached",
            ))),
        }
    }

    /// Token cancelling the whole session.
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Installs a fresh pause token for a starting run.
    pub(crate) fn begin_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        self.state.lock().unwrap().run_abort = Some(token.clone());
        token
    }

    pub(crate) fn end_run(&self) {
        self.state.lock().unwrap().run_abort = None;
    }

    /// Aborts the current run's in-flight operation, if any. The upload
    /// task observes the token and winds down as paused.
    pub(crate) fn abort_run(&self) -> bool {
        let s = self.state.lock().unwrap();
        match &s.run_abort {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Durable projection of the session; `None` until the remote
    /// resource exists.
    pub(crate) fn record(&self) -> Option<PersistedRecord> {
        let s = self.state.lock().unwrap();
        Some(PersistedRecord {
            fingerprint: self.fingerprint.clone(),
            remote_url: s.remote_url.clone()?,
            offset: s.offset,
            size: self.size,
            chunk_size: self.chunk_size,
            updated_at: Utc::now(),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.state.lock().unwrap();
        SessionSnapshot {
            id: self.id.clone(),
            fingerprint: self.fingerprint.clone(),
            name: s
                .descriptor
                .as_ref()
                .map(|d| sanitize_display_name(d.name())),
            status: s.status,
            offset: s.offset,
            size: self.size,
            chunk_size: self.chunk_size,
            attempt: s.attempt,
            last_error: s.last_error.clone(),
            created_at: self.created_at,
        }
    }

    pub(crate) fn descriptor(&self) -> Option<FileDescriptor> {
        self.state.lock().unwrap().descriptor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let descriptor = FileDescriptor::new("clip.mp4", 1000, "video/mp4", 1_700_000_000_000);
        Session::new(descriptor, 100)
    }

    #[test]
    fn new_session_starts_created_at_zero() {
        let s = session();
        assert_eq!(s.status(), SessionStatus::Created);
        assert_eq!(s.offset(), 0);
        assert_eq!(s.attempt(), 0);
        assert!(s.remote_url().is_none());
        assert!(!s.has_source());
    }

    #[test]
    fn adopt_offset_is_monotonic_and_clamped() {
        let s = session();
        assert_eq!(s.adopt_offset(300), 300);
        // Lower server value never rewinds local progress.
        assert_eq!(s.adopt_offset(200), 300);
        assert_eq!(s.adopt_offset(300), 300);
        // Values past the declared size are clamped.
        assert_eq!(s.adopt_offset(5000), 1000);
    }

    #[test]
    fn remote_url_set_exactly_once() {
        let s = session();
        s.set_remote_url("up://first".into());
        s.set_remote_url("up://second".into());
        assert_eq!(s.remote_url().as_deref(), Some("up://first"));
    }

    #[test]
    fn record_requires_remote_url() {
        let s = session();
        assert!(s.record().is_none());
        s.set_remote_url("up://r1".into());
        s.adopt_offset(100);
        let record = s.record().unwrap();
        assert_eq!(record.remote_url, "up://r1");
        assert_eq!(record.offset, 100);
        assert_eq!(record.size, 1000);
        assert_eq!(record.chunk_size, 100);
    }

    #[test]
    fn rehydrated_session_is_paused_without_source() {
        let record = PersistedRecord {
            fingerprint: "fp".into(),
            remote_url: "up://r1".into(),
            offset: 400,
            size: 1000,
            chunk_size: 100,
            updated_at: Utc::now(),
        };
        let s = Session::rehydrate(&record);
        assert_eq!(s.status(), SessionStatus::Paused);
        assert_eq!(s.offset(), 400);
        assert_eq!(s.remote_url().as_deref(), Some("up://r1"));
        assert!(!s.has_source());
        assert!(s.snapshot().name.is_none());
        assert!(s.read_chunk(400, 100).is_err());
    }

    #[test]
    fn rehydrate_clamps_corrupt_offset() {
        let record = PersistedRecord {
            fingerprint: "fp".into(),
            remote_url: "up://r1".into(),
            offset: 9999,
            size: 1000,
            chunk_size: 100,
            updated_at: Utc::now(),
        };
        assert_eq!(Session::rehydrate(&record).offset(), 1000);
    }

    #[test]
    fn abort_run_only_fires_while_running() {
        let s = session();
        assert!(!s.abort_run());
        let token = s.begin_run();
        assert!(s.abort_run());
        assert!(token.is_cancelled());
        s.end_run();
        assert!(!s.abort_run());
    }

    #[test]
    fn snapshot_name_is_sanitized() {
        let descriptor = FileDescriptor::new("../<evil>.bin", 10, "", 0);
        let s = Session::new(descriptor, 4);
        assert_eq!(s.snapshot().name.as_deref(), Some("&lt;evil&gt;.bin"));
    }

    #[test]
    fn terminal_and_running_status_helpers() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
        assert!(SessionStatus::Uploading.is_running());
        assert!(SessionStatus::Retrying.is_running());
        assert!(!SessionStatus::Queued.is_running());
    }
}
