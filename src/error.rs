use std::io;
use std::net::SocketAddr;

use thiserror::Error as ThisError;

use crate::codec::ReplyError;
use crate::command::{Command, Keyword};
use crate::frame::{self, RemoteError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("{command}: invalid argument: {reason}")]
    InvalidArgument { command: Keyword, reason: String },

    #[error("{command} is not allowed while subscribed")]
    Mode { command: Keyword },

    /// The reply could not be decoded. The connection it came from is no longer usable.
    #[error("{command}: protocol error: {source}")]
    Protocol {
        command: Keyword,
        #[source]
        source: frame::Error,
    },

    #[error("{command}{}: expected {expected}, got {actual}", on_key(.key))]
    UnexpectedReply {
        command: Keyword,
        key: Option<String>,
        expected: &'static str,
        actual: String,
    },

    /// The server answered with an error reply.
    #[error("{command}{} failed: {kind} {message}", on_key(.key))]
    Remote {
        command: Keyword,
        key: Option<String>,
        kind: String,
        message: String,
    },

    #[error("connection is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[source] io::Error),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(SocketAddr),

    #[error("gave up after {attempts} consecutive reconnect attempts")]
    ReconnectLimit { attempts: u32 },

    #[error("encryption error: {0}")]
    Crypto(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("could not detect the protocol generation: {0}")]
    Detection(#[source] Box<Error>),

    #[error("connection manager is already initialized")]
    AlreadyInitialized,

    #[error("connection manager is not initialized")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("subscription failed: {0}")]
    Subscription(String),
}

fn on_key(key: &Option<String>) -> String {
    match key {
        Some(key) => format!(" on key {:?}", key),
        None => String::new(),
    }
}

impl Error {
    /// Attaches the command that produced `err`.
    pub(crate) fn from_reply(command: &Command, err: ReplyError) -> Self {
        let key = command.key().map(str::to_string);
        let command = command.keyword();

        match err {
            ReplyError::Protocol(source) => Error::Protocol { command, source },
            ReplyError::Remote(RemoteError { kind, message }) => Error::Remote {
                command,
                key,
                kind,
                message,
            },
            ReplyError::Unexpected { expected, actual } => Error::UnexpectedReply {
                command,
                key,
                expected,
                actual,
            },
            ReplyError::NoMessage => Error::UnexpectedReply {
                command,
                key,
                expected: "a published message",
                actual: "no message".to_string(),
            },
        }
    }

    pub(crate) fn invalid_argument(command: Keyword, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            command,
            reason: reason.into(),
        }
    }

    /// Transient transport failures that a reconnect may cure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Tls(_) | Error::ConnectTimeout(_)
        )
    }

    /// Faults after which the bytes on the connection can no longer be trusted.
    pub fn is_corrupting(&self) -> bool {
        matches!(self, Error::Protocol { .. } | Error::Crypto(_))
    }
}
