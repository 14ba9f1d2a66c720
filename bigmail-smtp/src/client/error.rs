use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The relay sent something that is not a well-formed reply, or the
    /// client was driven out of sequence.
    #[error("malformed exchange: {0}")]
    Malformed(String),

    /// The relay answered with a code the current step does not accept.
    #[error("relay replied {code}: {message}")]
    Rejected { code: u16, message: String },

    #[error("TLS: {0}")]
    Tls(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("connection closed by relay")]
    ConnectionClosed,

    #[error("reply is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// The reply code, if the relay rejected the step.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
