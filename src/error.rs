use thiserror::Error;

use crate::session::SessionError;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("too few live states: {live} < {required}")]
    TooFewStates { live: usize, required: usize },

    #[error("there are no candidate groups")]
    NoGroups,

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("write rejected for key {0}: not enough copies were written")]
    WriteRejected(String),

    #[error("bulk write rejected: not enough copies were written")]
    BulkWriteRejected,

    #[error("corrupt embedded framing: {0}")]
    Corrupt(String),

    #[error("balancer unavailable: {0}")]
    BalancerUnavailable(String),

    #[error("transport error: {0}")]
    Transport(#[from] SessionError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}
