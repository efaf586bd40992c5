use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::{require, Request};
use crate::error::Result;

/// Increments the number stored at `field` in the hash stored at `key` by `increment`.
///
/// Ref: <https://redis.io/docs/latest/commands/hincrby/>
#[derive(Debug, PartialEq)]
pub struct HIncrBy {
    pub key: String,
    pub field: String,
    pub increment: i64,
}

impl Request for HIncrBy {
    type Output = i64;

    const KEYWORD: Keyword = Keyword::HIncrBy;

    fn into_command(self) -> Result<Command> {
        require(Self::KEYWORD, "key", &self.key)?;
        require(Self::KEYWORD, "field", &self.field)?;

        Ok(Command::new(Self::KEYWORD)
            .with_key(&self.key)
            .arg(self.field)
            .arg(self.increment.to_string()))
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<i64, ReplyError> {
        codec.read_integer(src)
    }
}
