//! The upload engine: session registry, admission control and the
//! public operation surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chunkflow_transfer::{
    BlobCache, FileDescriptor, FileSource, ValidationRules, sanitize_display_name, validate,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::retry::RetryConfig;
use crate::runner;
use crate::scheduler::QueueScheduler;
use crate::session::{Session, SessionSnapshot, SessionStatus};
use crate::store::{DegradingStore, PersistenceStore, StoreError};
use crate::transport::Transport;

const EVENT_BUFFER: usize = 1024;

/// State shared between the engine facade and its upload tasks.
pub(crate) struct EngineShared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) retry: RetryConfig,
    store: DegradingStore,
    rules: ValidationRules,
    chunk_size: u64,
    scheduler: Mutex<QueueScheduler>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Fingerprint -> session ID, for duplicate-add detection. Entries
    /// for failed sessions stay registered so a re-add revives them.
    by_fingerprint: RwLock<HashMap<String, String>>,
    events_tx: mpsc::Sender<EngineEvent>,
    blob_cache: Mutex<Option<Box<dyn BlobCache>>>,
}

impl EngineShared {
    pub(crate) fn emit(&self, event: EngineEvent) {
        if self.events_tx.try_send(event).is_err() {
            warn!("event channel full or closed; dropping event");
        }
    }

    fn session(&self, id: &str) -> Result<Arc<Session>, EngineError> {
        self.sessions
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))
    }

    /// Count of non-terminal sessions, for the file-count rule.
    fn live_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|s| !s.status().is_terminal())
            .count()
    }

    pub(crate) fn persist(&self, session: &Session) {
        let Some(record) = session.record() else {
            return;
        };
        if let Err(err) = self.store.put(&record) {
            warn!(session = %session.id(), error = %err, "checkpoint write failed; upload continues");
        }
        if self.store.take_degrade_notice() {
            self.emit(EngineEvent::StorageDegraded);
        }
    }

    pub(crate) fn store_delete(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.store.delete(fingerprint)
    }

    pub(crate) fn unregister(&self, session: &Session) {
        let mut map = self.by_fingerprint.write().unwrap();
        if map.get(session.fingerprint()).is_some_and(|id| id == session.id()) {
            map.remove(session.fingerprint());
        }
    }

    /// Admits the session into a slot or queues it. The pause token is
    /// installed under the scheduler lock so a later `pause` always
    /// finds either a queued entry or a live run to abort.
    fn admit_or_queue(self: &Arc<Self>, session: &Arc<Session>) {
        let run = {
            let mut sched = self.scheduler.lock().unwrap();
            if sched.admit(session.id()) {
                let token = session.begin_run();
                session.set_status(SessionStatus::Initiating);
                Some(token)
            } else {
                session.set_status(SessionStatus::Queued);
                None
            }
        };
        match run {
            Some(token) => {
                tokio::spawn(runner::drive(self.clone(), session.clone(), token));
            }
            None => self.emit(EngineEvent::Queued {
                session_id: session.id().to_string(),
            }),
        }
    }

    /// Called by a finishing upload task: frees its slot and starts the
    /// next queued session, skipping entries whose session is gone.
    pub(crate) fn release_and_admit_next(self: &Arc<Self>, id: &str) {
        let (session, token) = {
            let mut sched = self.scheduler.lock().unwrap();
            let mut release_id = id.to_string();
            loop {
                let Some(next_id) = sched.release(&release_id) else {
                    return;
                };
                if let Some(session) = self.sessions.read().unwrap().get(&next_id).cloned() {
                    let token = session.begin_run();
                    session.set_status(SessionStatus::Initiating);
                    break (session, token);
                }
                release_id = next_id;
            }
        };
        tokio::spawn(runner::drive(self.clone(), session, token));
    }

    fn spawn_admitted(self: &Arc<Self>, ids: Vec<String>) {
        for id in ids {
            let Some(session) = self.sessions.read().unwrap().get(&id).cloned() else {
                continue;
            };
            let token = session.begin_run();
            session.set_status(SessionStatus::Initiating);
            tokio::spawn(runner::drive(self.clone(), session, token));
        }
    }

    /// Queue-wide pause: gates admission and aborts every running task.
    pub(crate) fn pause_all(&self) {
        self.scheduler.lock().unwrap().gate();
        let sessions: Vec<_> = self.sessions.read().unwrap().values().cloned().collect();
        for session in sessions {
            if session.status().is_running() {
                session.abort_run();
            }
        }
        info!("all uploads paused");
    }

    /// Lifts the gate and restarts every paused session that still has a
    /// file source attached.
    pub(crate) fn resume_all(self: &Arc<Self>) {
        let admitted = self.scheduler.lock().unwrap().ungate();
        self.spawn_admitted(admitted);
        let sessions: Vec<_> = self.sessions.read().unwrap().values().cloned().collect();
        for session in sessions {
            if session.status() == SessionStatus::Paused && session.has_source() {
                self.admit_or_queue(&session);
            }
        }
        info!("uploads resumed");
    }

    fn finalize_cancel(&self, session: &Session) {
        if let Err(err) = self.store.delete(session.fingerprint()) {
            warn!(session = %session.id(), error = %err, "failed to purge checkpoint");
        }
        session.set_status(SessionStatus::Cancelled);
        self.unregister(session);
        self.emit(EngineEvent::Cancelled {
            session_id: session.id().to_string(),
        });
    }
}

/// Queue manager and resumable transfer engine.
///
/// Owns every session from admission to a terminal state. All methods
/// are synchronous: they update registries and tokens, and the spawned
/// upload tasks do the actual protocol work.
pub struct UploadEngine {
    shared: Arc<EngineShared>,
    events_rx: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
}

impl UploadEngine {
    pub fn new(transport: Arc<dyn Transport>, store: Box<dyn PersistenceStore>, config: EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            shared: Arc::new(EngineShared {
                transport,
                retry: config.retry,
                store: DegradingStore::new(store),
                rules: config.rules,
                chunk_size: config.chunk_size,
                scheduler: Mutex::new(QueueScheduler::new(config.max_concurrent)),
                sessions: RwLock::new(HashMap::new()),
                by_fingerprint: RwLock::new(HashMap::new()),
                events_tx,
                blob_cache: Mutex::new(None),
            }),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Subsequent calls return `None`.
    pub fn take_events(&self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Installs a source of cached blobs consulted by [`recover`](Self::recover).
    pub fn set_blob_cache(&self, cache: Box<dyn BlobCache>) {
        *self.shared.blob_cache.lock().unwrap() = Some(cache);
    }

    /// Admits a file for upload and returns its session ID.
    ///
    /// Re-adding a file whose fingerprint matches a live session attaches
    /// the fresh blob to that session instead of creating a duplicate: a
    /// paused or failed one starts again, a running one just regains its
    /// data source. A fingerprint with a leftover checkpoint resumes from
    /// the checkpointed offset.
    pub fn add(&self, descriptor: FileDescriptor, source: Box<dyn FileSource>) -> Result<String, EngineError> {
        let shared = &self.shared;
        let fingerprint = descriptor.fingerprint();

        // Lookup and registration stay under one write lock: two
        // concurrent adds of the same file must not both miss the
        // existing session and register a duplicate.
        let mut by_fingerprint = shared.by_fingerprint.write().unwrap();
        if let Some(id) = by_fingerprint.get(&fingerprint).cloned()
            && let Ok(session) = shared.session(&id)
        {
            match session.status() {
                SessionStatus::Failed => {
                    session.attach_descriptor(descriptor);
                    session.attach_source(source);
                    session.reset_attempt();
                    debug!(session = %id, "re-added failed upload; retrying");
                    shared.admit_or_queue(&session);
                    return Ok(id);
                }
                status if !status.is_terminal() => {
                    session.attach_descriptor(descriptor);
                    session.attach_source(source);
                    debug!(session = %id, "re-added file matched live session");
                    if session.status() == SessionStatus::Paused {
                        shared.admit_or_queue(&session);
                    }
                    return Ok(id);
                }
                _ => {} // Completed or Cancelled: start fresh below.
            }
        }

        if let Err(reason) = validate(&descriptor, shared.live_count(), &shared.rules) {
            debug!(name = %descriptor.name(), %reason, "file rejected");
            shared.emit(EngineEvent::ValidationRejected {
                name: sanitize_display_name(descriptor.name()),
                reason,
            });
            return Err(EngineError::Validation(reason));
        }

        // A leftover checkpoint for this fingerprint means a previous run
        // got interrupted; resume from its offset instead of starting over.
        let session = match shared.store.get(&fingerprint) {
            Ok(Some(record)) => {
                info!(fingerprint = %record.fingerprint, offset = record.offset, "resuming from checkpoint");
                let session = Session::rehydrate(&record);
                session.attach_descriptor(descriptor);
                session
            }
            _ => Session::new(descriptor, shared.chunk_size),
        };
        session.attach_source(source);
        let session = Arc::new(session);
        let id = session.id().to_string();
        by_fingerprint.insert(fingerprint, id.clone());
        shared.sessions.write().unwrap().insert(id.clone(), session.clone());
        drop(by_fingerprint);
        shared.admit_or_queue(&session);
        Ok(id)
    }

    /// Pauses one session, keeping its confirmed offset. Queued sessions
    /// leave the queue; running ones abort their in-flight operation and
    /// release their slot. Pausing a paused session is a no-op.
    pub fn pause(&self, id: &str) -> Result<(), EngineError> {
        let session = self.shared.session(id)?;
        {
            let mut sched = self.shared.scheduler.lock().unwrap();
            if sched.remove_queued(id) {
                session.set_status(SessionStatus::Paused);
                drop(sched);
                self.shared.emit(EngineEvent::Paused {
                    session_id: id.to_string(),
                });
                return Ok(());
            }
            if session.abort_run() {
                // The upload task observes the token, winds down as
                // paused and emits the event itself.
                return Ok(());
            }
        }
        match session.status() {
            SessionStatus::Paused => Ok(()),
            SessionStatus::Created => {
                session.set_status(SessionStatus::Paused);
                self.shared.emit(EngineEvent::Paused {
                    session_id: id.to_string(),
                });
                Ok(())
            }
            status => Err(EngineError::InvalidState {
                id: id.to_string(),
                status,
            }),
        }
    }

    /// Resumes a paused session. It re-enters admission like a new one
    /// and reconciles its offset with the server before appending.
    pub fn resume(&self, id: &str) -> Result<(), EngineError> {
        let session = self.shared.session(id)?;
        match session.status() {
            SessionStatus::Paused => {}
            status => {
                return Err(EngineError::InvalidState {
                    id: id.to_string(),
                    status,
                });
            }
        }
        if !session.has_source() {
            return Err(EngineError::NoSource(id.to_string()));
        }
        self.shared.admit_or_queue(&session);
        Ok(())
    }

    /// Cancels a session. Idempotent; cancelling a terminal session is a
    /// no-op. The checkpoint record is purged so the next add of the same
    /// file starts from zero.
    pub fn cancel(&self, id: &str) -> Result<(), EngineError> {
        let session = self.shared.session(id)?;
        let queued = self.shared.scheduler.lock().unwrap().remove_queued(id);
        if queued {
            self.shared.finalize_cancel(&session);
            return Ok(());
        }
        match session.status() {
            SessionStatus::Created | SessionStatus::Paused | SessionStatus::Failed => {
                self.shared.finalize_cancel(&session);
                Ok(())
            }
            status if status.is_running() => {
                session.cancel_token().cancel();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Revives a failed session for another round of attempts.
    pub fn retry(&self, id: &str) -> Result<(), EngineError> {
        let session = self.shared.session(id)?;
        match session.status() {
            SessionStatus::Failed => {}
            status => {
                return Err(EngineError::InvalidState {
                    id: id.to_string(),
                    status,
                });
            }
        }
        if !session.has_source() {
            return Err(EngineError::NoSource(id.to_string()));
        }
        session.reset_attempt();
        self.shared.admit_or_queue(&session);
        Ok(())
    }

    /// Pauses every running session and gates admission. Queued sessions
    /// stay queued and run once [`resume_all`](Self::resume_all) lifts
    /// the gate.
    pub fn pause_all(&self) {
        self.shared.pause_all();
    }

    /// Lifts the gate and resumes every paused session that still has a
    /// file source attached.
    pub fn resume_all(&self) {
        self.shared.resume_all();
    }

    pub(crate) fn shared_arc(&self) -> Arc<EngineShared> {
        self.shared.clone()
    }

    /// Changes the concurrency limit at runtime. Raising it admits queued
    /// sessions immediately; lowering it only applies to new admissions.
    pub fn set_concurrency_limit(&self, max_concurrent: usize) {
        let admitted = self.shared.scheduler.lock().unwrap().set_limit(max_concurrent);
        self.shared.spawn_admitted(admitted);
    }

    /// Rehydrates sessions from checkpoint records left by a previous
    /// process. Sessions whose blob the [`BlobCache`] still holds resume
    /// immediately; the rest stay paused until the file is re-added.
    /// Returns the IDs of all recovered sessions.
    pub fn recover(&self) -> Result<Vec<String>, EngineError> {
        let shared = &self.shared;
        let records = shared.store.list_all()?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let mut by_fingerprint = shared.by_fingerprint.write().unwrap();
            if by_fingerprint.contains_key(&record.fingerprint) {
                continue;
            }
            let session = Arc::new(Session::rehydrate(&record));
            let id = session.id().to_string();
            by_fingerprint.insert(record.fingerprint.clone(), id.clone());
            shared.sessions.write().unwrap().insert(id.clone(), session.clone());
            drop(by_fingerprint);
            let blob = shared
                .blob_cache
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|cache| cache.blob(&record.fingerprint));
            if let Some(source) = blob {
                session.attach_source(source);
                info!(session = %id, offset = record.offset, "recovered upload; resuming");
                shared.admit_or_queue(&session);
            } else {
                debug!(session = %id, fingerprint = %record.fingerprint, "recovered upload awaiting file re-selection");
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Drops a terminal session from the registry, acknowledging it. Any
    /// leftover checkpoint for its fingerprint is purged as well, so a
    /// later add of the same file starts from zero.
    pub fn evict(&self, id: &str) -> Result<(), EngineError> {
        let session = self.shared.session(id)?;
        let status = session.status();
        if !status.is_terminal() {
            return Err(EngineError::InvalidState {
                id: id.to_string(),
                status,
            });
        }
        if let Err(err) = self.shared.store.delete(session.fingerprint()) {
            warn!(session = %id, error = %err, "failed to purge checkpoint");
        }
        self.shared.unregister(&session);
        self.shared.sessions.write().unwrap().remove(id);
        debug!(session = %id, ?status, "session evicted");
        Ok(())
    }

    /// Evicts every terminal session and returns how many were dropped.
    pub fn prune(&self) -> usize {
        let terminal: Vec<String> = self
            .shared
            .sessions
            .read()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.status().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        let count = terminal.len();
        for id in terminal {
            let _ = self.evict(&id);
        }
        count
    }

    pub fn session(&self, id: &str) -> Option<SessionSnapshot> {
        self.shared
            .sessions
            .read()
            .unwrap()
            .get(id)
            .map(|s| s.snapshot())
    }

    /// Snapshots of all known sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<_> = self
            .shared
            .sessions
            .read()
            .unwrap()
            .values()
            .map(|s| s.snapshot())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub fn active_count(&self) -> usize {
        self.shared.scheduler.lock().unwrap().active_count()
    }

    pub fn queued_count(&self) -> usize {
        self.shared.scheduler.lock().unwrap().queued_count()
    }
}
