use std::fmt;

#[derive(Debug)]
pub enum Error {
    InvalidArgument(String),
    StoreUnavailable(redis::RedisError),
    UnexpectedReply(String),
    SerializeError(serde_json::Error),
    SinkError(String)
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
            Self::UnexpectedReply(msg) => write!(f, "unexpected store reply: {msg}"),
            Self::SerializeError(e) => write!(f, "payload serialization failed: {e}"),
            Self::SinkError(msg) => write!(f, "sink failed: {msg}")
        }
    }
}

impl std::error::Error for Error {}

impl From<redis::RedisError> for Error {
    fn from(value: redis::RedisError) -> Self {
        Self::StoreUnavailable(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::SerializeError(value)
    }
}
