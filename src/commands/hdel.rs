use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::{require, require_all, Request};
use crate::error::Result;

/// Removes `fields` from the hash stored at `key`. Replies with the number of fields removed.
///
/// Ref: <https://redis.io/docs/latest/commands/hdel/>
#[derive(Debug, PartialEq)]
pub struct HDel {
    pub key: String,
    pub fields: Vec<String>,
}

impl Request for HDel {
    type Output = i64;

    const KEYWORD: Keyword = Keyword::HDel;

    fn into_command(self) -> Result<Command> {
        require(Self::KEYWORD, "key", &self.key)?;
        require_all(Self::KEYWORD, "field", &self.fields)?;

        Ok(Command::new(Self::KEYWORD)
            .with_key(&self.key)
            .args(self.fields))
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<i64, ReplyError> {
        codec.read_integer(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn several_fields() {
        let cmd = HDel {
            key: "k".to_string(),
            fields: vec!["a".to_string(), "b".to_string()],
        }
        .into_command()
        .unwrap();

        assert_eq!(cmd.to_string(), "HDEL k a b");
        assert_eq!(HDel::read_reply(Codec::Resp3, b":2\r\n"), Ok(2));
    }

    #[test]
    fn no_fields() {
        let res = HDel {
            key: "k".to_string(),
            fields: vec![],
        }
        .into_command();

        assert!(res.is_err());
    }
}
