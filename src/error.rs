//! Error taxonomy for match execution.
//!
//! Only failures that end an operation live here. Transient network
//! failures are retried inside the remote client and never surface, and a
//! player timing out or crashing is a per-turn [`Verdict`], not an error.
//!
//! [`Verdict`]: crate::match_log::Verdict

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal failures surfaced by the match engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The service rejected the request outright (4xx). Never retried.
    #[error("service rejected the request ({status}): {message}")]
    PermanentRequest {
        /// HTTP status code of the rejection.
        status: u16,
        /// Response body, as a human-readable reason.
        message: String,
    },

    /// The judge raised an error or produced malformed output. No further
    /// turns can be computed, so the match aborts.
    #[error("judge failure: {0}")]
    Judge(String),

    /// A second match was started while one is active.
    #[error("a match is already running; abort it before starting another")]
    MatchAlreadyRunning,

    /// The match configuration failed validation.
    #[error("invalid match configuration: {0}")]
    InvalidConfiguration(String),

    /// The service answered with something the line protocol cannot parse.
    #[error("malformed service response: {0}")]
    Protocol(String),

    /// The pasted credential URL does not contain user ID and secret.
    #[error("credential URL does not match <base>/<userid>/<secret>/localai")]
    CredentialUrl,

    /// An abort interrupted a retry loop or poll wait.
    #[error("operation cancelled by abort")]
    Cancelled,
}
