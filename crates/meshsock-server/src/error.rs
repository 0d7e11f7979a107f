//! Server-level errors, largely surfaced as HTTP status codes on the
//! upgrade path rather than propagated into peer-fatal paths.

use thiserror::Error;

/// Errors raised while constructing or operating a [`crate::server::Server`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured bind address could not be parsed or bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that failed to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Encryption configuration was invalid (e.g. wrong key length for the algorithm).
    #[error("invalid encryption configuration: {0}")]
    Encryption(#[from] meshsock_crypto::CryptoError),
    /// The configured adapter could not be initialized.
    #[error("adapter initialization failed: {0}")]
    Adapter(#[from] meshsock_adapter::AdapterError),
    /// A core primitive (peer, room, upload) rejected an operation.
    #[error(transparent)]
    Core(#[from] meshsock_core::CoreError),
}

/// Convenience alias for this crate's `Result`.
pub type Result<T> = std::result::Result<T, ServerError>;

/// HTTP status codes the upgrade path may answer with: bad request, unknown
/// namespace, middleware rejection, capacity, and generic upgrade failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeRejection {
    /// The request URL could not be parsed.
    BadRequest,
    /// No namespace matched the request path.
    NotFound,
    /// A middleware in the chain rejected the handshake.
    MiddlewareRejected,
    /// `maxConnections` has been reached.
    Capacity,
    /// The upgrade itself failed for a reason unrelated to middleware or capacity.
    UpgradeFailed,
}

impl UpgradeRejection {
    /// The HTTP status code this rejection maps to.
    pub fn status_code(self) -> u16 {
        match self {
            UpgradeRejection::BadRequest => 400,
            UpgradeRejection::NotFound => 404,
            UpgradeRejection::MiddlewareRejected => 401,
            UpgradeRejection::Capacity => 503,
            UpgradeRejection::UpgradeFailed => 500,
        }
    }
}
