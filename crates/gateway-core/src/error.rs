use std::fmt;

/// Errors fatal to one device session. Thiserror-derived, mirroring the
/// receiver session loop's error enum.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("login_rejected: {0}")]
    LoginRejected(String),
    #[error("io_error: {0}")]
    Io(#[from] std::io::Error),
    #[error("io_error: connection closed")]
    ConnectionClosed,
    #[error("read_timeout: no bytes within the configured deadline")]
    ReadTimeout,
    #[error("pending_command: a command is already outstanding")]
    PendingCommand,
    #[error("malformed_frame: {0}")]
    MalformedFrame(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<gt06_protocol::FrameError> for SessionError {
    fn from(e: gt06_protocol::FrameError) -> Self {
        SessionError::MalformedFrame(e.to_string())
    }
}

/// Storage-layer failures. Manual `Display`/`Error` impl, mirroring the
/// forwarder's journal/fanout error style rather than a derive — kept this
/// way so the mixed texture of the teacher's error types carries over.
#[derive(Debug)]
pub enum StoreError {
    Db(sqlx::Error),
    Encode(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Db(e) => write!(f, "db_error: {e}"),
            StoreError::Encode(msg) => write!(f, "db_error: failed to encode record: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Db(e) => Some(e),
            StoreError::Encode(_) => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Db(e)
    }
}
