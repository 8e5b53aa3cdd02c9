//! Abstract network transport.
//!
//! The host application implements [`Transport`] on top of its HTTP
//! client (or any request/response channel). Using a trait keeps the
//! engine decoupled from the actual stack and testable with mocks.

use std::future::Future;
use std::pin::Pin;

use chunkflow_protocol::{
    AppendRequest, AppendResponse, CreateRequest, CreateResponse, ProbeRequest, ProbeResponse,
    TransportError,
};

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Injected network transport for the create/probe/append protocol.
///
/// The engine guarantees at most one in-flight call per session and may
/// drop a returned future at any time to abort the request (pause,
/// cancel, connectivity loss). Implementations must tolerate that.
pub trait Transport: Send + Sync {
    /// Declares a new upload resource and returns its remote URL.
    fn create(&self, req: CreateRequest) -> TransportFuture<'_, CreateResponse>;

    /// Returns the server's authoritative offset for a resource.
    fn probe(&self, req: ProbeRequest) -> TransportFuture<'_, ProbeResponse>;

    /// Appends one chunk and returns the new confirmed offset.
    fn append(&self, req: AppendRequest) -> TransportFuture<'_, AppendResponse>;
}
