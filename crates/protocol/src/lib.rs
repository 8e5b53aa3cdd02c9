//! Wire protocol types for chunkflow resumable uploads.
//!
//! The protocol is a minimal create/probe/append contract:
//! - **create** declares the total size and returns a remote resource URL,
//! - **probe** returns the server's authoritative offset for a resource,
//! - **append** sends one offset-addressed chunk and returns the confirmed
//!   offset. Completion is implicit when the confirmed offset equals the
//!   declared size.

mod error;
mod wire;

pub use error::TransportError;
pub use wire::{AppendRequest, AppendResponse, CreateRequest, CreateResponse, ProbeRequest, ProbeResponse};
