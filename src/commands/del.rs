use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::exists::key_list;
use crate::commands::{require_all, Request};
use crate::error::Result;

/// Removes the specified keys. A key is ignored if it does not exist.
/// Replies with the number of keys that were removed.
///
/// Ref: <https://redis.io/docs/latest/commands/del/>
#[derive(Debug, PartialEq)]
pub struct Del {
    pub keys: Vec<String>,
}

impl Request for Del {
    type Output = i64;

    const KEYWORD: Keyword = Keyword::Del;

    fn into_command(self) -> Result<Command> {
        require_all(Self::KEYWORD, "key", &self.keys)?;

        Ok(key_list(Self::KEYWORD, self.keys))
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<i64, ReplyError> {
        codec.read_integer(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_keys() {
        let cmd = Del {
            keys: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        }
        .into_command()
        .unwrap();

        assert_eq!(cmd.to_string(), "DEL a b c");
        assert_eq!(Del::read_reply(Codec::Resp2, b":2\r\n"), Ok(2));
    }

    #[test]
    fn empty_key() {
        let res = Del {
            keys: vec!["a".to_string(), String::new()],
        }
        .into_command();

        assert!(res.is_err());
    }
}
