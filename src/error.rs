//! Error types reported by the client and by individual computations.

use thiserror::Error;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised by the client API or stored in a settled [`Computation`].
///
/// Errors are cloneable because a single transport failure settles every
/// computation in the affected batch.
///
/// [`Computation`]: crate::Computation
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The API rejected the auth token on a problem request (HTTP 401).
    #[error("API authentication failed")]
    Auth,

    /// The API rejected the auth token on a solver catalog request.
    #[error("solver catalog authentication failed")]
    SolverAuth,

    /// A single HTTP request exceeded the configured request timeout.
    #[error("API request timed out")]
    RequestTimeout,

    /// Total time spent polling a problem exceeded the polling timeout.
    #[error("problem status polling timed out")]
    PollingTimeout,

    /// `wait_result` gave up waiting. The computation is left unsettled and
    /// the pipeline keeps running.
    #[error("timed out waiting for a result")]
    WaitTimeout,

    /// The solver reported the problem as failed, or rejected it outright.
    #[error("solver failure: {0}")]
    SolverFailure(String),

    /// The solver reported failure because it is offline.
    #[error("solver is offline: {0}")]
    SolverOffline(String),

    /// No solver matched the requested name or feature filters.
    #[error("solver not found: {0}")]
    SolverNotFound(String),

    /// A solver descriptor could not be understood by this client.
    #[error("unsupported solver: {0}")]
    UnsupportedSolver(String),

    /// A status record was missing a required field.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// The remote side reported the problem as cancelled.
    #[error("problem cancelled")]
    Cancelled,

    /// The client was constructed from an unusable configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Any other transport or decoding failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Wraps an arbitrary failure cause as an I/O error.
    pub(crate) fn io<E: std::fmt::Display>(cause: E) -> Self {
        Error::Io(cause.to_string())
    }

    /// Maps a `FAILED` status to either the offline or the generic solver
    /// failure variant, based on the server-provided message.
    pub(crate) fn solver_failed(message: String) -> Self {
        if message.to_lowercase().contains("solver is offline") {
            Error::SolverOffline(message)
        } else {
            Error::SolverFailure(message)
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::RequestTimeout
        } else {
            Error::io(err)
        }
    }
}
