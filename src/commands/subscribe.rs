use crate::codec::{Codec, Message, ReplyError};
use crate::command::{Command, Keyword};
use crate::commands::{require, Request};
use crate::error::{Error, Result};

/// Subscriptions change what the connection may carry, so they only go through the
/// `Database` methods that track them.
fn tracked_only(command: Keyword) -> Error {
    Error::invalid_argument(
        command,
        "subscriptions are managed by Database::subscribe and Database::unsubscribe",
    )
}

/// Starts listening on `channel`. The reply is read batch by batch: each batch reports whether
/// it held the confirmation and carries any messages that arrived with it.
///
/// Ref: <https://redis.io/docs/latest/commands/subscribe/>
#[derive(Debug, PartialEq)]
pub struct Subscribe {
    pub channel: String,
}

impl Request for Subscribe {
    type Output = (bool, Vec<Message>);

    const KEYWORD: Keyword = Keyword::Subscribe;

    fn validate(&self, _codec: Codec) -> Result<()> {
        Err(tracked_only(Self::KEYWORD))
    }

    fn into_command(self) -> Result<Command> {
        require(Self::KEYWORD, "channel", &self.channel)?;

        Ok(Command::new(Self::KEYWORD).arg(self.channel))
    }

    fn read_reply(
        codec: Codec,
        src: &[u8],
    ) -> std::result::Result<(bool, Vec<Message>), ReplyError> {
        codec.read_subscription(src, "subscribe")
    }
}

/// Stops listening on `channel`.
///
/// Ref: <https://redis.io/docs/latest/commands/unsubscribe/>
#[derive(Debug, PartialEq)]
pub struct Unsubscribe {
    pub channel: String,
}

impl Request for Unsubscribe {
    type Output = (bool, Vec<Message>);

    const KEYWORD: Keyword = Keyword::Unsubscribe;

    fn validate(&self, _codec: Codec) -> Result<()> {
        Err(tracked_only(Self::KEYWORD))
    }

    fn into_command(self) -> Result<Command> {
        require(Self::KEYWORD, "channel", &self.channel)?;

        Ok(Command::new(Self::KEYWORD).arg(self.channel))
    }

    fn read_reply(
        codec: Codec,
        src: &[u8],
    ) -> std::result::Result<(bool, Vec<Message>), ReplyError> {
        codec.read_subscription(src, "unsubscribe")
    }
}
