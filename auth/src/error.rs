//! The `ssh-userauth` error taxonomy (§7): failures recoverable by trying another
//! method, and the terminal case where the method list is exhausted.

use thiserror::Error;

/// Per-attempt and whole-loop failures of the authentication method loop (§7
/// `UserAuthError`).
#[derive(Debug, Error, Clone)]
pub enum UserAuthError {
    /// The current method was rejected; the caller or the loop itself should try the
    /// next one.
    #[error("authentication method `{0}` failed")]
    MethodFailed(String),

    /// The server accepted this method but requires at least one more
    /// (`partial_success = true`), with the methods it will still accept.
    #[error("partial success, additional authentication required: {0:?}")]
    PartialSuccess(Vec<String>),

    /// No configured method remains to try.
    #[error("authentication methods exhausted")]
    Exhausted,

    #[error(transparent)]
    Transport(#[from] ssh_transport::Error),
}

pub type Result<T, E = UserAuthError> = std::result::Result<T, E>;
