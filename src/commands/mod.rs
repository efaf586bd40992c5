//! One type per command the client sends. Each knows how to validate and encode itself and how
//! to read the reply the server sends back.

pub mod auth;
pub mod client;
pub mod del;
pub mod exists;
pub mod expireat;
pub mod hdel;
pub mod hello;
pub mod hget;
pub mod hincrby;
pub mod hset;
pub mod publish;
pub mod subscribe;

pub use auth::Auth;
pub use client::{ClientReply, ReplyMode};
pub use del::Del;
pub use exists::Exists;
pub use expireat::ExpireAt;
pub use hdel::HDel;
pub use hello::Hello;
pub use hget::HGet;
pub use hincrby::HIncrBy;
pub use hset::HSet;
pub use publish::Publish;
pub use subscribe::{Subscribe, Unsubscribe};

use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::error::{Error, Result};

pub trait Request {
    type Output;

    const KEYWORD: Keyword;

    /// `false` when the server stays silent, so no read should follow the write.
    fn expects_reply(&self) -> bool {
        true
    }

    /// Rejects requests that would put the connection into a state `codec` cannot follow.
    fn validate(&self, _codec: Codec) -> Result<()> {
        Ok(())
    }

    /// Validates the arguments and builds the wire command.
    fn into_command(self) -> Result<Command>;

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<Self::Output, ReplyError>;
}

pub(crate) fn require(command: Keyword, what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_argument(
            command,
            format!("{what} must not be empty"),
        ));
    }
    Ok(())
}

pub(crate) fn require_all<S: AsRef<str>>(command: Keyword, what: &str, values: &[S]) -> Result<()> {
    if values.is_empty() {
        return Err(Error::invalid_argument(
            command,
            format!("at least one {what} is required"),
        ));
    }
    values
        .iter()
        .try_for_each(|value| require(command, what, value.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_rejects_empty_values() {
        assert!(require(Keyword::HGet, "key", "k").is_ok());

        let err = require(Keyword::HGet, "key", "").unwrap_err();
        assert_eq!(err.to_string(), "HGET: invalid argument: key must not be empty");
    }

    #[test]
    fn require_all_rejects_empty_lists_and_members() {
        assert!(require_all(Keyword::Del, "key", &["a", "b"]).is_ok());
        assert!(require_all::<&str>(Keyword::Del, "key", &[]).is_err());
        assert!(require_all(Keyword::Del, "key", &["a", ""]).is_err());
    }
}
