use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::{require_all, Request};
use crate::error::Result;

/// Counts how many of `keys` exist. A key given twice is counted twice.
///
/// Ref: <https://redis.io/docs/latest/commands/exists/>
#[derive(Debug, PartialEq)]
pub struct Exists {
    pub keys: Vec<String>,
}

impl Request for Exists {
    type Output = i64;

    const KEYWORD: Keyword = Keyword::Exists;

    fn into_command(self) -> Result<Command> {
        require_all(Self::KEYWORD, "key", &self.keys)?;

        Ok(key_list(Self::KEYWORD, self.keys))
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<i64, ReplyError> {
        codec.read_integer(src)
    }
}

/// Builds a command whose arguments are all keys. The key is only recorded for error messages
/// when there is exactly one.
pub(crate) fn key_list(keyword: Keyword, keys: Vec<String>) -> Command {
    if keys.len() == 1 {
        Command::new(keyword).with_key(&keys[0])
    } else {
        Command::new(keyword).args(keys)
    }
}
