//! The `ssh-connection` error taxonomy (§7): per-channel failures the caller can react
//! to, distinct from the fatal, whole-transport errors in [`ssh_transport::Error`].

use thiserror::Error;

pub use ssh_transport::error::OpenFailureReason;

#[derive(Debug, Error, Clone)]
pub enum ConnectionError {
    /// The peer refused a `CHANNEL_OPEN` with the given reason code and message.
    #[error("channel open rejected ({code}): {message}")]
    OpenRejected { code: u32, message: String },

    /// A channel or global request's reply was `FAILURE`, or the channel closed before
    /// replying.
    #[error("request failed")]
    RequestFailed,

    /// The channel was closed (by either side) while the caller was still using it.
    #[error("channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Transport(#[from] ssh_transport::Error),
}

impl ConnectionError {
    pub fn open_rejected(reason: OpenFailureReason, message: impl Into<String>) -> Self {
        Self::OpenRejected {
            code: reason as u32,
            message: message.into(),
        }
    }
}

pub type Result<T, E = ConnectionError> = std::result::Result<T, E>;
