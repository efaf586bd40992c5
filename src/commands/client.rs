use strum_macros::Display;

use crate::codec::{Codec, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::Request;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ReplyMode {
    On,
    Off,
    Skip,
}

/// Controls whether the server replies to the commands that follow. Only `ON` is itself
/// answered.
///
/// Ref: <https://redis.io/docs/latest/commands/client-reply/>
#[derive(Debug, PartialEq)]
pub struct ClientReply {
    pub mode: ReplyMode,
}

impl Request for ClientReply {
    type Output = ();

    const KEYWORD: Keyword = Keyword::Client;

    fn expects_reply(&self) -> bool {
        self.mode == ReplyMode::On
    }

    fn into_command(self) -> Result<Command> {
        Ok(Command::new(Self::KEYWORD)
            .arg(Keyword::Reply.as_str())
            .arg(self.mode.to_string()))
    }

    fn read_reply(codec: Codec, src: &[u8]) -> std::result::Result<(), ReplyError> {
        codec.read_ok(src)
    }
}
