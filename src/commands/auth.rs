use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::{require, Request};
use crate::error::Result;

/// Authenticates the connection, either with a password alone or as a named user.
///
/// Ref: <https://redis.io/docs/latest/commands/auth/>
#[derive(Debug, PartialEq)]
pub struct Auth {
    pub username: Option<String>,
    pub password: String,
}

impl Request for Auth {
    type Output = ();

    const KEYWORD: Keyword = Keyword::Auth;

    fn into_command(self) -> Result<Command> {
        require(Self::KEYWORD, "password", &self.password)?;

        let mut cmd = Command::new(Self::KEYWORD);
        if let Some(username) = self.username {
            require(Self::KEYWORD, "username", &username)?;
            cmd = cmd.arg(username);
        }
        Ok(cmd.arg(self.password))
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<(), ReplyError> {
        codec.read_ok(src)
    }
}
