use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::{require, Request};
use crate::error::Result;

/// Sets `key` to expire at `timestamp`, in seconds since the Unix epoch. Replies `true` when
/// the timeout was set and `false` when the key does not exist.
///
/// Ref: <https://redis.io/docs/latest/commands/expireat/>
#[derive(Debug, PartialEq)]
pub struct ExpireAt {
    pub key: String,
    pub timestamp: i64,
}

impl Request for ExpireAt {
    type Output = bool;

    const KEYWORD: Keyword = Keyword::ExpireAt;

    fn into_command(self) -> Result<Command> {
        require(Self::KEYWORD, "key", &self.key)?;

        Ok(Command::new(Self::KEYWORD)
            .with_key(&self.key)
            .arg(self.timestamp.to_string()))
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<bool, ReplyError> {
        codec.read_bool(src)
    }
}
