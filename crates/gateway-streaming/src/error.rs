use thiserror::Error;

/// Failure modes of the fan-out layer. None of these carry retry advice;
/// callers decide whether a fresh `connecting` attempt is warranted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("user {user_id} already has {limit} connections open")]
    ConnectionLimitExceeded { user_id: String, limit: usize },

    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("connection {0} is not known to this node")]
    UnknownConnection(String),

    #[error("connection {0} has already disconnected")]
    AlreadyDisconnected(String),

    #[error("reconnect token is unknown or expired")]
    UnknownReconnectToken,

    #[error("reconnecting user does not match the held session")]
    ReconnectUserMismatch,
}
