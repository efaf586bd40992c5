use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use itertools::Itertools;
use strum_macros::{Display, EnumString};
use thiserror::Error as ThisError;

use crate::command::Command;
use crate::frame::{self, resp2, resp3, RemoteError, WireValue};

/// The protocol generation a connection speaks. Chosen once, when the connection is set up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Generation {
    #[strum(to_string = "RESP2", serialize = "2")]
    Resp2,
    #[strum(to_string = "RESP3", serialize = "3")]
    Resp3,
}

impl Generation {
    /// The version number sent with `HELLO`.
    pub fn version(&self) -> u8 {
        match self {
            Generation::Resp2 => 2,
            Generation::Resp3 => 3,
        }
    }
}

#[derive(Debug, PartialEq, ThisError)]
pub enum ReplyError {
    #[error(transparent)]
    Protocol(#[from] frame::Error),
    #[error("{0}")]
    Remote(RemoteError),
    #[error("expected {expected}, got {actual}")]
    Unexpected {
        expected: &'static str,
        actual: String,
    },
    #[error("no published message found in the reply")]
    NoMessage,
}

impl ReplyError {
    fn unexpected(expected: &'static str, actual: impl fmt::Display) -> Self {
        ReplyError::Unexpected {
            expected,
            actual: actual.to_string(),
        }
    }
}

/// A message delivered to a subscriber.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Absent when the server only sent the payload.
    pub channel: Option<String>,
    pub payload: Bytes,
}

impl Message {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// What the server reports about itself in its `HELLO` reply.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerInfo {
    pub server: Option<String>,
    pub version: Option<String>,
    pub proto: Option<i64>,
    pub id: Option<i64>,
    pub mode: Option<String>,
    pub role: Option<String>,
    /// Every scalar field of the reply, including the ones above.
    pub fields: HashMap<String, String>,
}

impl ServerInfo {
    fn from_fields(fields: HashMap<String, String>) -> Self {
        let number = |name: &str| fields.get(name).and_then(|v| v.parse::<i64>().ok());
        Self {
            server: fields.get("server").cloned(),
            version: fields.get("version").cloned(),
            proto: number("proto"),
            id: number("id"),
            mode: fields.get("mode").cloned(),
            role: fields.get("role").cloned(),
            fields,
        }
    }
}

/// The encode/decode pair for one protocol generation, plus the helpers that turn decoded
/// frames into the shapes callers expect.
pub trait Protocol {
    type Frame: WireValue + fmt::Display;

    const GENERATION: Generation;

    /// Packages a command as an array of bulk strings.
    fn encode(command: &Command) -> Bytes {
        let frame = Self::Frame::array(command.parts().map(Self::Frame::bulk).collect());
        Bytes::from(frame.serialize())
    }

    /// Decodes every frame in `src`. Never asks for more data: a truncated frame is an error.
    fn decode(src: &[u8]) -> Result<Vec<Self::Frame>, frame::Error> {
        Self::Frame::parse_all(src)
    }

    fn read_ok(frames: Vec<Self::Frame>) -> Result<(), ReplyError>;

    fn read_integer(frames: Vec<Self::Frame>) -> Result<i64, ReplyError>;

    fn read_string(frames: Vec<Self::Frame>) -> Result<Option<String>, ReplyError>;

    fn read_map(frames: Vec<Self::Frame>) -> Result<HashMap<String, String>, ReplyError>;

    fn read_hello(frames: Vec<Self::Frame>) -> Result<ServerInfo, ReplyError>;

    /// Every published message in the batch, in order. Other frames are skipped.
    fn messages(frames: Vec<Self::Frame>) -> Vec<Message>;

    /// Whether the batch contains the `subscribe`/`unsubscribe` confirmation named `kind`.
    fn is_acknowledged(frames: &[Self::Frame], kind: &str) -> bool;

    fn remote_error(frames: &[Self::Frame]) -> Option<RemoteError>;

    fn extract_message(frames: Vec<Self::Frame>) -> Result<Message, ReplyError> {
        Self::messages(frames)
            .into_iter()
            .next()
            .ok_or(ReplyError::NoMessage)
    }
}

/// Fails on any error frame in the batch, then requires exactly one frame.
fn single<P: Protocol>(frames: Vec<P::Frame>) -> Result<P::Frame, ReplyError> {
    if let Some(err) = P::remote_error(&frames) {
        return Err(ReplyError::Remote(err));
    }

    match frames.len() {
        1 => frames
            .into_iter()
            .next()
            .ok_or(ReplyError::Protocol(frame::Error::Incomplete)),
        0 => Err(ReplyError::Protocol(frame::Error::Incomplete)),
        n => Err(ReplyError::unexpected("a single reply", format!("{} replies", n))),
    }
}

fn pairs_to_map<I>(pairs: I) -> Result<HashMap<String, String>, ReplyError>
where
    I: IntoIterator<Item = (Option<String>, Option<String>)>,
{
    pairs
        .into_iter()
        .map(|pair| match pair {
            (Some(key), Some(value)) => Ok((key, value)),
            _ => Err(ReplyError::unexpected(
                "string keys and values",
                "a non-string element",
            )),
        })
        .collect()
}

pub struct Resp2;

impl Protocol for Resp2 {
    type Frame = resp2::Frame;

    const GENERATION: Generation = Generation::Resp2;

    fn read_ok(frames: Vec<resp2::Frame>) -> Result<(), ReplyError> {
        match single::<Self>(frames)? {
            resp2::Frame::Simple(s) if s == "OK" => Ok(()),
            frame => Err(ReplyError::unexpected("+OK", frame)),
        }
    }

    fn read_integer(frames: Vec<resp2::Frame>) -> Result<i64, ReplyError> {
        let frame = single::<Self>(frames)?;
        frame
            .as_integer()
            .ok_or_else(|| ReplyError::unexpected("an integer", frame))
    }

    fn read_string(frames: Vec<resp2::Frame>) -> Result<Option<String>, ReplyError> {
        match single::<Self>(frames)? {
            resp2::Frame::Bulk(None) => Ok(None),
            frame => match frame.as_str() {
                Some(s) => Ok(Some(s.to_string())),
                None => Err(ReplyError::unexpected("a string", frame.kind())),
            },
        }
    }

    fn read_map(frames: Vec<resp2::Frame>) -> Result<HashMap<String, String>, ReplyError> {
        match single::<Self>(frames)? {
            resp2::Frame::Array(Some(items)) if items.len() % 2 == 0 => pairs_to_map(
                items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .tuples(),
            ),
            frame => Err(ReplyError::unexpected(
                "an array of field/value pairs",
                frame.kind(),
            )),
        }
    }

    fn read_hello(frames: Vec<resp2::Frame>) -> Result<ServerInfo, ReplyError> {
        match single::<Self>(frames)? {
            resp2::Frame::Array(Some(items)) if items.len() % 2 == 0 => {
                // Aggregate values such as the module list have no scalar form and are skipped.
                let fields = items
                    .iter()
                    .tuples()
                    .filter_map(|(key, value)| {
                        let value = match value {
                            resp2::Frame::Integer(i) => i.to_string(),
                            other => other.as_str()?.to_string(),
                        };
                        Some((key.as_str()?.to_string(), value))
                    })
                    .collect();
                Ok(ServerInfo::from_fields(fields))
            }
            frame => Err(ReplyError::unexpected("the HELLO reply", frame.kind())),
        }
    }

    // *3\r\n$7\r\nmessage\r\n$<channel>\r\n$<payload>\r\n
    fn messages(frames: Vec<resp2::Frame>) -> Vec<Message> {
        frames
            .into_iter()
            .filter_map(|frame| match frame {
                resp2::Frame::Array(Some(items))
                    if items.len() == 3 && items[0].as_str() == Some("message") =>
                {
                    let mut items = items.into_iter().skip(1);
                    let channel = items.next()?.as_str().map(str::to_string);
                    let payload = match items.next()? {
                        resp2::Frame::Bulk(Some(bytes)) => bytes,
                        resp2::Frame::Simple(s) => Bytes::from(s),
                        _ => return None,
                    };
                    Some(Message { channel, payload })
                }
                _ => None,
            })
            .collect()
    }

    fn is_acknowledged(frames: &[resp2::Frame], kind: &str) -> bool {
        frames.iter().any(|frame| match frame {
            resp2::Frame::Array(Some(items)) => {
                items.first().and_then(resp2::Frame::as_str) == Some(kind)
            }
            _ => false,
        })
    }

    fn remote_error(frames: &[resp2::Frame]) -> Option<RemoteError> {
        frames.iter().find_map(|frame| match frame {
            resp2::Frame::Error(err) => Some(err.clone()),
            _ => None,
        })
    }
}

pub struct Resp3;

impl Protocol for Resp3 {
    type Frame = resp3::Frame;

    const GENERATION: Generation = Generation::Resp3;

    fn read_ok(frames: Vec<resp3::Frame>) -> Result<(), ReplyError> {
        match single::<Self>(frames)?.into_unattributed() {
            resp3::Frame::Simple(s) if s == "OK" => Ok(()),
            frame => Err(ReplyError::unexpected("+OK", frame)),
        }
    }

    fn read_integer(frames: Vec<resp3::Frame>) -> Result<i64, ReplyError> {
        let frame = single::<Self>(frames)?;
        frame
            .as_integer()
            .ok_or_else(|| ReplyError::unexpected("a 64-bit number", frame))
    }

    fn read_string(frames: Vec<resp3::Frame>) -> Result<Option<String>, ReplyError> {
        let frame = single::<Self>(frames)?;
        if frame.is_null() {
            return Ok(None);
        }
        match frame.as_str() {
            Some(s) => Ok(Some(s.to_string())),
            None => Err(ReplyError::unexpected("a string", frame.kind())),
        }
    }

    fn read_map(frames: Vec<resp3::Frame>) -> Result<HashMap<String, String>, ReplyError> {
        match single::<Self>(frames)?.into_unattributed() {
            resp3::Frame::Map(pairs) => pairs_to_map(
                pairs
                    .iter()
                    .map(|(key, value)| (key.to_scalar_string(), value.to_scalar_string())),
            ),
            resp3::Frame::Array(items) if items.len() % 2 == 0 => pairs_to_map(
                items
                    .iter()
                    .map(resp3::Frame::to_scalar_string)
                    .tuples(),
            ),
            frame => Err(ReplyError::unexpected("a map", frame.kind())),
        }
    }

    fn read_hello(frames: Vec<resp3::Frame>) -> Result<ServerInfo, ReplyError> {
        match single::<Self>(frames)?.into_unattributed() {
            resp3::Frame::Map(pairs) => {
                let fields = pairs
                    .iter()
                    .filter_map(|(key, value)| Some((key.as_str()?.to_string(), value.to_scalar_string()?)))
                    .collect();
                Ok(ServerInfo::from_fields(fields))
            }
            frame => Err(ReplyError::unexpected("the HELLO map", frame.kind())),
        }
    }

    // >3\r\n$7\r\nmessage\r\n$<channel>\r\n$<payload>\r\n, or just the payload after the kind.
    fn messages(frames: Vec<resp3::Frame>) -> Vec<Message> {
        frames
            .into_iter()
            .map(resp3::Frame::into_unattributed)
            .filter_map(|frame| match frame {
                resp3::Frame::Push { kind, items } if kind == "message" => match items.as_slice() {
                    [payload] => Some(Message {
                        channel: None,
                        payload: payload.as_bytes()?,
                    }),
                    [channel, payload] => Some(Message {
                        channel: channel.as_str().map(str::to_string),
                        payload: payload.as_bytes()?,
                    }),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    fn is_acknowledged(frames: &[resp3::Frame], kind: &str) -> bool {
        frames.iter().any(|frame| match frame.unattributed() {
            resp3::Frame::Push { kind: tag, .. } => tag == kind,
            resp3::Frame::Array(items) => items.first().and_then(resp3::Frame::as_str) == Some(kind),
            _ => false,
        })
    }

    fn remote_error(frames: &[resp3::Frame]) -> Option<RemoteError> {
        frames
            .iter()
            .find_map(|frame| frame.remote_error().cloned())
    }
}

/// The protocol a connection was set up with, kept as a plain value so it can be copied into the
/// subscription task. Every method decodes `src` and interprets the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Resp2,
    Resp3,
}

macro_rules! dispatch {
    ($codec:expr, $method:ident, $src:expr $(, $arg:expr)*) => {
        match $codec {
            Codec::Resp2 => Resp2::$method(Resp2::decode($src)? $(, $arg)*),
            Codec::Resp3 => Resp3::$method(Resp3::decode($src)? $(, $arg)*),
        }
    };
}

impl Codec {
    pub fn generation(&self) -> Generation {
        match self {
            Codec::Resp2 => Resp2::GENERATION,
            Codec::Resp3 => Resp3::GENERATION,
        }
    }

    pub fn encode(&self, command: &Command) -> Bytes {
        match self {
            Codec::Resp2 => Resp2::encode(command),
            Codec::Resp3 => Resp3::encode(command),
        }
    }

    /// Decodes `src` and renders each frame for logging.
    pub fn describe(&self, src: &[u8]) -> Result<Vec<String>, frame::Error> {
        Ok(match self {
            Codec::Resp2 => Resp2::decode(src)?.iter().map(ToString::to_string).collect(),
            Codec::Resp3 => Resp3::decode(src)?.iter().map(ToString::to_string).collect(),
        })
    }

    pub fn read_ok(&self, src: &[u8]) -> Result<(), ReplyError> {
        dispatch!(self, read_ok, src)
    }

    pub fn read_integer(&self, src: &[u8]) -> Result<i64, ReplyError> {
        dispatch!(self, read_integer, src)
    }

    pub fn read_bool(&self, src: &[u8]) -> Result<bool, ReplyError> {
        match self.read_integer(src)? {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(ReplyError::unexpected("0 or 1", n)),
        }
    }

    pub fn read_string(&self, src: &[u8]) -> Result<Option<String>, ReplyError> {
        dispatch!(self, read_string, src)
    }

    pub fn read_map(&self, src: &[u8]) -> Result<HashMap<String, String>, ReplyError> {
        dispatch!(self, read_map, src)
    }

    pub fn read_hello(&self, src: &[u8]) -> Result<ServerInfo, ReplyError> {
        dispatch!(self, read_hello, src)
    }

    pub fn messages(&self, src: &[u8]) -> Result<Vec<Message>, ReplyError> {
        Ok(dispatch!(self, messages, src))
    }

    pub fn extract_message(&self, src: &[u8]) -> Result<Message, ReplyError> {
        dispatch!(self, extract_message, src)
    }

    /// Reads a batch that may contain the `kind` confirmation along with published messages.
    /// Returns whether the confirmation was present and every message that came with it.
    pub fn read_subscription(
        &self,
        src: &[u8],
        kind: &str,
    ) -> Result<(bool, Vec<Message>), ReplyError> {
        match self {
            Codec::Resp2 => read_subscription::<Resp2>(Resp2::decode(src)?, kind),
            Codec::Resp3 => read_subscription::<Resp3>(Resp3::decode(src)?, kind),
        }
    }
}

fn read_subscription<P: Protocol>(
    frames: Vec<P::Frame>,
    kind: &str,
) -> Result<(bool, Vec<Message>), ReplyError> {
    if let Some(err) = P::remote_error(&frames) {
        return Err(ReplyError::Remote(err));
    }
    let acknowledged = P::is_acknowledged(&frames, kind);
    Ok((acknowledged, P::messages(frames)))
}

impl From<Generation> for Codec {
    fn from(generation: Generation) -> Self {
        match generation {
            Generation::Resp2 => Codec::Resp2,
            Generation::Resp3 => Codec::Resp3,
        }
    }
}
