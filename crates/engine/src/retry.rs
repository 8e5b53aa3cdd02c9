//! Failure classification and backoff schedule.

use std::time::Duration;

use chunkflow_protocol::TransportError;

/// What the engine should do with a failed network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry the same operation after a backoff delay.
    Retryable,
    /// Re-query the server offset, then continue from the adopted value.
    Reconcile,
    /// Pause the session and ask the caller for a credential refresh.
    /// Blind retry would exhaust the attempt budget against a condition
    /// retries cannot fix.
    AuthRequired,
    /// Move the session to Failed; only an explicit retry revives it.
    Fatal,
}

/// Classifies a transport error into an [`ErrorClass`].
pub fn classify(err: &TransportError) -> ErrorClass {
    match err {
        TransportError::OffsetMismatch { .. } => ErrorClass::Reconcile,
        // A raw 401 is an expired credential too, even when the transport
        // did not map it to `Auth`.
        TransportError::Auth | TransportError::Server(401) => ErrorClass::AuthRequired,
        _ if err.is_transient() => ErrorClass::Retryable,
        _ => ErrorClass::Fatal,
    }
}

/// Exponential backoff configuration with jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Multiplier per additional attempt.
    pub backoff_factor: f64,
    /// Tries of one operation before the session fails.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        // Add ±25% jitter.
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }

    /// Returns `true` once `failures` tries have been spent.
    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}
