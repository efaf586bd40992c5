use bytes::Bytes;

use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::{require, Request};
use crate::error::Result;

/// Posts `message` to `channel`. Replies with the number of subscribers that received it.
///
/// Ref: <https://redis.io/docs/latest/commands/publish/>
#[derive(Debug, PartialEq)]
pub struct Publish {
    pub channel: String,
    pub message: Bytes,
}

impl Request for Publish {
    type Output = i64;

    const KEYWORD: Keyword = Keyword::Publish;

    fn into_command(self) -> Result<Command> {
        require(Self::KEYWORD, "channel", &self.channel)?;

        Ok(Command::new(Self::KEYWORD)
            .arg(self.channel)
            .arg(self.message))
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<i64, ReplyError> {
        codec.read_integer(src)
    }
}
