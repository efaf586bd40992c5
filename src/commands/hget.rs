use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::{require, Request};
use crate::error::Result;

/// Returns the value of `field` in the hash stored at `key`, or nothing when either is missing.
///
/// Ref: <https://redis.io/docs/latest/commands/hget/>
#[derive(Debug, PartialEq)]
pub struct HGet {
    pub key: String,
    pub field: String,
}

impl Request for HGet {
    type Output = Option<String>;

    const KEYWORD: Keyword = Keyword::HGet;

    fn into_command(self) -> Result<Command> {
        require(Self::KEYWORD, "key", &self.key)?;
        require(Self::KEYWORD, "field", &self.field)?;

        Ok(Command::new(Self::KEYWORD)
            .with_key(&self.key)
            .arg(self.field))
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<Option<String>, ReplyError> {
        codec.read_string(src)
    }
}
