//! Transport error taxonomy.

/// Errors surfaced by a transport implementation.
///
/// Variants are deliberately coarse: the engine classifies them into
/// retry/reconcile/fatal buckets, and user-facing messages come from
/// [`TransportError::user_message`] rather than the raw error text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection reset")]
    ConnectionReset,

    #[error("network error: {0}")]
    Network(String),

    #[error("server returned status {0}")]
    Server(u16),

    #[error("authentication required")]
    Auth,

    #[error("offset mismatch: server is at {server_offset}")]
    OffsetMismatch { server_offset: u64 },

    #[error("malformed server response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Returns `true` for errors worth retrying with backoff.
    ///
    /// Offset mismatches are excluded: they require reconciliation,
    /// not a blind retry of the same request.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::ConnectionReset | TransportError::Network(_) => true,
            TransportError::Server(status) => *status >= 500,
            _ => false,
        }
    }

    /// Translates the error to a small stable user-safe vocabulary.
    ///
    /// Raw network strings (DNS codes, peer addresses) never leak through
    /// this method.
    pub fn user_message(&self) -> &'static str {
        match self {
            TransportError::Timeout => "timeout",
            TransportError::ConnectionReset | TransportError::Network(_) => "network",
            TransportError::Server(_) => "server unavailable",
            TransportError::Auth => "authorization required",
            TransportError::OffsetMismatch { .. } => "server unavailable",
            TransportError::Malformed(_) => "server unavailable",
        }
    }
}
