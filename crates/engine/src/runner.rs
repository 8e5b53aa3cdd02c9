//! The per-session upload task.
//!
//! One task drives one session through the protocol: create (or
//! reconcile), then a strictly sequential chunk loop. The three await
//! points — transport calls, backoff sleeps — are guarded by the pause
//! and cancel tokens, so aborting an in-flight request is just dropping
//! its future.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;

use chunkflow_protocol::{AppendRequest, CreateRequest, ProbeRequest, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::EngineShared;
use crate::events::EngineEvent;
use crate::retry::{ErrorClass, classify};
use crate::session::{Session, SessionStatus};

/// How a run ended. The caller translates this into status, events and
/// checkpoint cleanup.
enum Outcome {
    Completed,
    Paused,
    Cancelled,
    AuthRequired,
    Failed(String),
}

enum Step<T> {
    Done(T),
    Paused,
    Cancelled,
}

/// Awaits `fut` unless the session is paused or cancelled first.
/// Dropping the future aborts the in-flight operation.
async fn guarded<F: Future>(fut: F, pause: &CancellationToken, cancel: &CancellationToken) -> Step<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => Step::Cancelled,
        _ = pause.cancelled() => Step::Paused,
        out = fut => Step::Done(out),
    }
}

/// Entry point of a session's upload task. Owns the session until the
/// run ends, then releases the concurrency slot.
pub(crate) async fn drive(shared: Arc<EngineShared>, session: Arc<Session>, pause: CancellationToken) {
    let id = session.id().to_string();
    shared.emit(EngineEvent::Started { session_id: id.clone() });

    let cancel = session.cancel_token();
    let outcome = run_protocol(&shared, &session, &pause, &cancel).await;
    session.end_run();

    match outcome {
        Outcome::Completed => {
            if let Err(err) = shared.store_delete(session.fingerprint()) {
                warn!(session = %id, error = %err, "failed to purge checkpoint");
            }
            session.set_status(SessionStatus::Completed);
            shared.unregister(&session);
            info!(session = %id, size = session.size(), "upload completed");
            shared.emit(EngineEvent::Completed { session_id: id.clone() });
        }
        Outcome::Paused => {
            session.set_status(SessionStatus::Paused);
            debug!(session = %id, offset = session.offset(), "upload paused");
            shared.emit(EngineEvent::Paused { session_id: id.clone() });
        }
        Outcome::AuthRequired => {
            session.set_status(SessionStatus::Paused);
            session.set_last_error("authorization required");
            warn!(session = %id, "credentials rejected; pausing until refreshed");
            shared.emit(EngineEvent::AuthRequired { session_id: id.clone() });
        }
        Outcome::Cancelled => {
            if let Err(err) = shared.store_delete(session.fingerprint()) {
                warn!(session = %id, error = %err, "failed to purge checkpoint");
            }
            session.set_status(SessionStatus::Cancelled);
            shared.unregister(&session);
            debug!(session = %id, "upload cancelled");
            shared.emit(EngineEvent::Cancelled { session_id: id.clone() });
        }
        Outcome::Failed(reason) => {
            session.set_status(SessionStatus::Failed);
            session.set_last_error(reason.clone());
            warn!(session = %id, reason = %reason, "upload failed");
            shared.emit(EngineEvent::Failed {
                session_id: id.clone(),
                reason,
            });
        }
    }

    shared.release_and_admit_next(&id);
}

async fn run_protocol(
    shared: &EngineShared,
    session: &Session,
    pause: &CancellationToken,
    cancel: &CancellationToken,
) -> Outcome {
    // Phase 1: ensure the remote resource exists. A session resuming
    // with a known resource adopts the server's offset first instead of
    // trusting the local value blindly.
    if session.remote_url().is_none() {
        session.set_status(SessionStatus::Initiating);
        let descriptor = session.descriptor();
        loop {
            let req = CreateRequest {
                fingerprint: session.fingerprint().to_string(),
                total_size: session.size(),
                file_name: descriptor.as_ref().map(|d| d.name().to_string()).unwrap_or_default(),
                mime_type: descriptor
                    .as_ref()
                    .map(|d| d.mime_type().to_string())
                    .unwrap_or_default(),
            };
            match guarded(shared.transport.create(req), pause, cancel).await {
                Step::Done(Ok(resp)) => {
                    session.set_remote_url(resp.remote_url);
                    session.reset_attempt();
                    shared.persist(session);
                    break;
                }
                Step::Done(Err(err)) => {
                    match backoff_or_bail(shared, session, pause, cancel, &err, SessionStatus::Initiating).await
                    {
                        ControlFlow::Continue(()) => continue,
                        ControlFlow::Break(outcome) => return outcome,
                    }
                }
                Step::Paused => return Outcome::Paused,
                Step::Cancelled => return Outcome::Cancelled,
            }
        }
    } else {
        session.set_status(SessionStatus::Initiating);
        if let Err(outcome) = reconcile(shared, session, pause, cancel).await {
            return outcome;
        }
    }

    // Phase 2: offset-ascending chunk loop. At most one append is in
    // flight, and the checkpoint is written before the next chunk goes
    // out, so a crash loses at most the unconfirmed chunk.
    session.set_status(SessionStatus::Uploading);
    let size = session.size();
    loop {
        let offset = session.offset();
        if offset >= size {
            return Outcome::Completed;
        }
        let want = session.chunk_size().min(size - offset) as usize;
        let data = match session.read_chunk(offset, want) {
            Ok(data) if !data.is_empty() => data,
            Ok(_) => {
                warn!(session = %session.id(), offset, "source ended before declared size");
                return Outcome::Failed("file unreadable".into());
            }
            Err(err) => {
                warn!(session = %session.id(), error = %err, "chunk read failed");
                return Outcome::Failed("file unreadable".into());
            }
        };
        let req = AppendRequest {
            remote_url: session.remote_url().unwrap_or_default(),
            offset,
            data,
        };
        match guarded(shared.transport.append(req), pause, cancel).await {
            Step::Done(Ok(ack)) => {
                let confirmed = session.adopt_offset(ack.offset);
                session.reset_attempt();
                shared.persist(session);
                shared.emit(EngineEvent::Progress {
                    session_id: session.id().to_string(),
                    offset: confirmed,
                    size,
                });
            }
            Step::Done(Err(err)) => {
                if classify(&err) == ErrorClass::Reconcile {
                    debug!(session = %session.id(), offset, "offset mismatch; reconciling");
                    if let Err(outcome) = reconcile(shared, session, pause, cancel).await {
                        return outcome;
                    }
                    session.set_status(SessionStatus::Uploading);
                    continue;
                }
                match backoff_or_bail(shared, session, pause, cancel, &err, SessionStatus::Uploading).await {
                    ControlFlow::Continue(()) => continue,
                    ControlFlow::Break(outcome) => return outcome,
                }
            }
            Step::Paused => return Outcome::Paused,
            Step::Cancelled => return Outcome::Cancelled,
        }
    }
}

/// Adopts `max(local, server)` after querying the authoritative offset.
/// The two diverge when an acknowledgment is lost after being applied
/// server-side.
async fn reconcile(
    shared: &EngineShared,
    session: &Session,
    pause: &CancellationToken,
    cancel: &CancellationToken,
) -> Result<(), Outcome> {
    let Some(remote_url) = session.remote_url() else {
        return Err(Outcome::Failed("server unavailable".into()));
    };
    loop {
        let req = ProbeRequest {
            remote_url: remote_url.clone(),
        };
        match guarded(shared.transport.probe(req), pause, cancel).await {
            Step::Done(Ok(resp)) => {
                let adopted = session.adopt_offset(resp.offset);
                session.reset_attempt();
                shared.persist(session);
                debug!(session = %session.id(), offset = adopted, "adopted reconciled offset");
                return Ok(());
            }
            Step::Done(Err(err)) => {
                match backoff_or_bail(shared, session, pause, cancel, &err, SessionStatus::Initiating).await {
                    ControlFlow::Continue(()) => continue,
                    ControlFlow::Break(outcome) => return Err(outcome),
                }
            }
            Step::Paused => return Err(Outcome::Paused),
            Step::Cancelled => return Err(Outcome::Cancelled),
        }
    }
}

/// Applies the retry policy to a failed operation: backoff and continue,
/// or end the run. `resume_status` is restored after a backoff sleep.
async fn backoff_or_bail(
    shared: &EngineShared,
    session: &Session,
    pause: &CancellationToken,
    cancel: &CancellationToken,
    err: &TransportError,
    resume_status: SessionStatus,
) -> ControlFlow<Outcome> {
    match classify(err) {
        ErrorClass::AuthRequired => ControlFlow::Break(Outcome::AuthRequired),
        ErrorClass::Fatal | ErrorClass::Reconcile => {
            session.set_last_error(err.user_message());
            ControlFlow::Break(Outcome::Failed(err.user_message().to_string()))
        }
        ErrorClass::Retryable => {
            let failures = session.bump_attempt();
            session.set_last_error(err.user_message());
            if shared.retry.exhausted(failures) {
                warn!(session = %session.id(), failures, "retry budget exhausted");
                return ControlFlow::Break(Outcome::Failed(err.user_message().to_string()));
            }
            let delay = shared.retry.delay_for_attempt(failures);
            session.set_status(SessionStatus::Retrying);
            debug!(
                session = %session.id(),
                attempt = failures + 1,
                delay_ms = delay.as_millis() as u64,
                "scheduling retry"
            );
            shared.emit(EngineEvent::Retrying {
                session_id: session.id().to_string(),
                attempt: failures + 1,
                delay,
                reason: err.user_message().to_string(),
            });
            match guarded(tokio::time::sleep(delay), pause, cancel).await {
                Step::Done(()) => {
                    session.set_status(resume_status);
                    ControlFlow::Continue(())
                }
                Step::Paused => ControlFlow::Break(Outcome::Paused),
                Step::Cancelled => ControlFlow::Break(Outcome::Cancelled),
            }
        }
    }
}
