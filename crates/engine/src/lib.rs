//! Upload queue manager and resumable transfer engine.
//!
//! The [`UploadEngine`] owns a set of per-file [`SessionSnapshot`]
//! sessions, bounds how many upload concurrently, and drives each one
//! through the create/probe/append protocol over an injected
//! [`Transport`]. Progress is checkpointed through a [`PersistenceStore`]
//! after every confirmed chunk, so an interrupted upload resumes from
//! its last acknowledged offset instead of starting over.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chunkflow_engine::{EngineConfig, JsonFileStore, UploadEngine};
//!
//! # fn run(transport: Arc<dyn chunkflow_engine::Transport>) -> Result<(), Box<dyn std::error::Error>> {
//! let store = JsonFileStore::new("uploads.json".into())?;
//! let engine = UploadEngine::new(transport, Box::new(store), EngineConfig::default());
//! let events = engine.take_events().expect("first take");
//! drop(events);
//! engine.recover()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
mod events;
mod observer;
mod retry;
mod runner;
mod scheduler;
mod session;
mod store;
mod transport;

pub use config::EngineConfig;
pub use engine::UploadEngine;
pub use error::EngineError;
pub use events::EngineEvent;
pub use observer::{NetworkObserver, NetworkState};
pub use retry::{ErrorClass, RetryConfig, classify};
pub use session::{SessionSnapshot, SessionStatus};
pub use store::{
    DegradingStore, JsonFileStore, MemoryStore, PersistedRecord, PersistenceStore, StoreError,
};
pub use transport::{Transport, TransportFuture};
