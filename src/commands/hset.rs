use bytes::Bytes;

use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::{require, Request};
use crate::error::{Error, Result};

/// Sets `field` to `value` for every pair in the hash stored at `key`.
/// Replies with the number of fields that were added, not counting updated ones.
///
/// Ref: <https://redis.io/docs/latest/commands/hset/>
#[derive(Debug, PartialEq)]
pub struct HSet {
    pub key: String,
    pub pairs: Vec<(String, Bytes)>,
}

impl Request for HSet {
    type Output = i64;

    const KEYWORD: Keyword = Keyword::HSet;

    fn into_command(self) -> Result<Command> {
        require(Self::KEYWORD, "key", &self.key)?;
        if self.pairs.is_empty() {
            return Err(Error::invalid_argument(
                Self::KEYWORD,
                "at least one field/value pair is required",
            ));
        }

        let mut cmd = Command::new(Self::KEYWORD).with_key(&self.key);
        for (field, value) in self.pairs {
            require(Self::KEYWORD, "field", &field)?;
            cmd = cmd.arg(field).arg(value);
        }
        Ok(cmd)
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<i64, ReplyError> {
        codec.read_integer(src)
    }
}
