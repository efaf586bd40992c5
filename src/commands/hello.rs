use crate::codec::{Codec, ReplyError, ServerInfo};
use crate::command::{Command, Keyword};
use crate::commands::{require, Request};
use crate::error::{Error, Result};

/// Switches the connection to protocol `version`, optionally authenticating in the same round
/// trip. Servers that only speak RESP2 answer with an error.
///
/// Ref: <https://redis.io/docs/latest/commands/hello/>
#[derive(Debug, PartialEq)]
pub struct Hello {
    pub version: u8,
    /// Username and password. Without a username the server's default user is assumed.
    pub auth: Option<(Option<String>, String)>,
}

const DEFAULT_USER: &str = "default";

impl Request for Hello {
    type Output = ServerInfo;

    const KEYWORD: Keyword = Keyword::Hello;

    /// Switching protocols would change how every later reply decodes.
    fn validate(&self, codec: Codec) -> Result<()> {
        let generation = codec.generation();
        if self.version != generation.version() {
            return Err(Error::invalid_argument(
                Self::KEYWORD,
                format!(
                    "connection speaks {generation}, cannot negotiate version {}",
                    self.version
                ),
            ));
        }
        Ok(())
    }

    fn into_command(self) -> Result<Command> {
        if !matches!(self.version, 2 | 3) {
            return Err(Error::invalid_argument(
                Self::KEYWORD,
                format!("unsupported protocol version {}", self.version),
            ));
        }

        let cmd = Command::new(Self::KEYWORD).arg(self.version.to_string());
        match self.auth {
            Some((username, password)) => {
                require(Self::KEYWORD, "password", &password)?;
                let username = username.unwrap_or_else(|| DEFAULT_USER.to_string());
                Ok(cmd.arg(Keyword::Auth.as_str()).arg(username).arg(password))
            }
            None => Ok(cmd),
        }
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<ServerInfo, ReplyError> {
        codec.read_hello(src)
    }
}
