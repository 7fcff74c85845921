use thiserror::Error;

/// The numeric SSH_MSG_DISCONNECT reason codes, RFC 4250 §3.2.
///
/// The source material this crate grew out of conflated `SSH_DISCONNECT_RESERVED`
/// and `MAC_ERROR` at code 4/5 in one place; this follows the RFC values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr)]
#[repr(u32)]
pub enum DisconnectReason {
    HostNotAllowedToConnect = 1,
    ProtocolError = 2,
    KeyExchangeFailed = 3,
    Reserved = 4,
    MacError = 5,
    CompressionError = 6,
    ServiceNotAvailable = 7,
    ProtocolVersionNotSupported = 8,
    HostKeyNotVerifiable = 9,
    ConnectionLost = 10,
    ByApplication = 11,
    TooManyConnections = 12,
    AuthCancelledByUser = 13,
    NoMoreAuthMethodsAvailable = 14,
    IllegalUserName = 15,
}

impl DisconnectReason {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Reasons a peer may refuse a `CHANNEL_OPEN`, RFC 4254 §5.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr)]
#[repr(u32)]
pub enum OpenFailureReason {
    AdministrativelyProhibited = 1,
    ConnectFailed = 2,
    UnknownChannelType = 3,
    ResourceShortage = 4,
}

/// Fatal, whole-transport error conditions (§7).
///
/// Any value of this type that escapes a read-pump or write call is fed to
/// [`crate::transport::TransportProtocol::notify_error`], which fans it out to every
/// awaiting thread and moves the transport to the `Dead` state.
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("MAC verification failed")]
    MacMismatch,

    #[error("the server's host key was rejected by every registered verifier")]
    HostKeyNotVerifiable,

    #[error("received an unexpected message for the current state: {0}")]
    UnexpectedMessage(String),

    #[error("key-exchange failed: {0}")]
    KexFailed(String),

    #[error("operation timed out")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(String),

    #[error("the transport has been stopped")]
    Stopped,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl Error {
    /// The disconnect reason this error should be reported to the peer with,
    /// best-effort, before the socket is torn down.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Error::ProtocolError(_) | Error::UnexpectedMessage(_) => {
                DisconnectReason::ProtocolError
            }
            Error::MacMismatch => DisconnectReason::MacError,
            Error::HostKeyNotVerifiable => DisconnectReason::HostKeyNotVerifiable,
            Error::KexFailed(_) => DisconnectReason::KeyExchangeFailed,
            Error::Timeout | Error::Io(_) => DisconnectReason::ConnectionLost,
            Error::Stopped => DisconnectReason::ByApplication,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
