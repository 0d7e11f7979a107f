//! Exponential backoff with deterministic jitter for the socket's
//! reconnect loop.
//!
//! The jitter is a function of the attempt number rather than an RNG draw,
//! so backoff durations stay reproducible in tests while still spreading
//! out reconnect storms across many clients (each client's attempt clock
//! starts at a different wall-clock moment even though the formula itself
//! is deterministic).

use std::time::Duration;

/// Configuration for the socket's reconnect behavior.
///
/// Defaults:
/// - `max_retries`: 5
/// - `initial_backoff`: 1 second
/// - `max_backoff`: 30 seconds
/// - `jitter_factor`: 0.1 (10% of backoff duration)
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum reconnection attempts after the first disconnect (0 to
    /// disable reconnection entirely).
    pub max_retries: u32,
    /// Initial backoff duration before the first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff cap — backoff will never exceed this.
    pub max_backoff: Duration,
    /// Jitter factor in range `0.0..1.0`, added to backoff to avoid
    /// thundering herd.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

impl ReconnectConfig {
    /// Create a config, clamping `jitter_factor` to `[0.0, 1.0]` and
    /// ensuring `max_backoff >= initial_backoff`.
    pub fn new(max_retries: u32, initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            max_retries,
            initial_backoff: initial,
            max_backoff: if max < initial { initial } else { max },
            jitter_factor: jitter.clamp(0.0, 1.0),
        }
    }

    /// Calculate the backoff duration for a given attempt number (0-indexed).
    ///
    /// Uses exponential backoff: `initial_backoff * 2^attempt`, capped at
    /// `max_backoff`, plus deterministic jitter keyed on the attempt number.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as u64;
        let exponential = base.saturating_mul(2_u64.saturating_pow(attempt));
        let capped = exponential.min(self.max_backoff.as_millis() as u64);

        let jitter_range = (capped as f64 * self.jitter_factor.clamp(0.0, 1.0)) as u64;
        let jitter = if jitter_range > 0 {
            (attempt as u64 * 7 + 13) % (jitter_range + 1)
        } else {
            0
        };

        Duration::from_millis(capped.saturating_add(jitter))
    }

    /// Whether `attempt` (the number of retries already made) has used up
    /// the configured budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }

    /// Whether a [`tokio_tungstenite::tungstenite::Error`] is worth
    /// retrying. Connection resets, aborts, timeouts and the tungstenite
    /// variants for an already-torn-down socket are transient; protocol,
    /// TLS, URL and handshake errors are not (retrying would just fail the
    /// same way again).
    pub fn is_transient(err: &tokio_tungstenite::tungstenite::Error) -> bool {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => true,
            WsError::Io(io_err) => Self::is_transient_io(io_err),
            // Protocol, TLS, URL, HTTP and handshake errors are never
            // transient: retrying a malformed handshake just fails again.
            _ => false,
        }
    }

    /// Whether a raw `std::io::Error` is transient.
    pub fn is_transient_io(err: &std::io::Error) -> bool {
        matches!(
            err.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        )
    }
}
