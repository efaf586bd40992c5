// https://redis.io/docs/reference/protocol-spec

pub mod resp2;
pub mod resp3;

use std::fmt;
use std::io::Cursor;
use std::str;
use std::string::FromUtf8Error;

use bytes::Buf;
use thiserror::Error as ThisError;

pub(crate) static CRLF: &[u8; 2] = b"\r\n";

/// Containers nested deeper than this are rejected instead of recursing further.
pub const MAX_NESTING_DEPTH: usize = 128;

#[derive(Debug, PartialEq, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0:?}")]
    InvalidDataType(char),
    #[error("invalid length prefix: {0}")]
    InvalidLength(String),
    #[error("invalid integer: {0}")]
    InvalidInteger(String),
    #[error("invalid double: {0}")]
    InvalidDouble(String),
    #[error("invalid boolean: {0}")]
    InvalidBoolean(String),
    #[error("invalid big number: {0}")]
    InvalidBigNumber(String),
    #[error("invalid verbatim string")]
    InvalidVerbatim,
    #[error("null frame carries a payload")]
    InvalidNull,
    #[error("push frame has no kind tag")]
    MissingPushKind,
    #[error("length-prefixed payload is not terminated by CRLF")]
    MissingTerminator,
    #[error("frames are nested deeper than {MAX_NESTING_DEPTH} levels")]
    TooDeep,
    #[error("protocol error; invalid frame format")]
    InvalidUtf8,
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        Error::InvalidUtf8
    }
}

impl From<str::Utf8Error> for Error {
    fn from(_src: str::Utf8Error) -> Error {
        Error::InvalidUtf8
    }
}

/// A value that can be read from and written to the wire. Both protocol generations implement
/// it, which lets the codec build and scan frames without knowing which one it talks to.
pub trait WireValue: Clone + fmt::Debug + PartialEq + Send + Sized + 'static {
    /// Parses exactly one frame, advancing the cursor past it.
    fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error>;

    /// The first byte of the serialized frame.
    fn prefix(&self) -> u8;

    fn write_to(&self, dst: &mut Vec<u8>);

    fn bulk(bytes: bytes::Bytes) -> Self;

    fn array(items: Vec<Self>) -> Self;

    fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes);
        bytes
    }

    /// Parses every frame in `src`. A single read may carry several pipelined replies, so the
    /// whole slice has to be consumed; a frame cut short anywhere is an error.
    fn parse_all(src: &[u8]) -> Result<Vec<Self>, Error> {
        let mut cursor = Cursor::new(src);
        let mut frames = Vec::new();

        while cursor.has_remaining() {
            frames.push(Self::parse(&mut cursor)?);
        }

        Ok(frames)
    }
}

/// An error reply: the first word is the error kind, the rest is the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn parse(line: &str) -> Self {
        match line.split_once(' ') {
            Some((kind, message)) => Self::new(kind, message),
            None => Self::new(line, ""),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} {}", self.kind, self.message)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DataType {
    SimpleString,   // '+'
    BulkString,     // '$'
    VerbatimString, // '='
    SimpleError,    // '-'
    BulkError,      // '!'
    Boolean,        // '#'
    Integer,        // ':'
    Double,         // ','
    BigNumber,      // '('
    Array,          // '*'
    Map,            // '%'
    Set,            // '~'
    Attribute,      // '|'
    Push,           // '>'
    // Due to historical reasons, RESP2 features two specially crafted values for representing null
    // values of bulk strings and arrays. The null type, introduced in RESP3, replaces both.
    Null, // '_'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'!' => Ok(Self::BulkError),
            b'*' => Ok(Self::Array),
            b'_' => Ok(Self::Null),
            b'#' => Ok(Self::Boolean),
            b',' => Ok(Self::Double),
            b'(' => Ok(Self::BigNumber),
            b'=' => Ok(Self::VerbatimString),
            b'%' => Ok(Self::Map),
            b'~' => Ok(Self::Set),
            b'|' => Ok(Self::Attribute),
            b'>' => Ok(Self::Push),
            _ => Err(Error::InvalidDataType(byte as char)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::BulkError => b'!',
            DataType::Array => b'*',
            DataType::Null => b'_',
            DataType::Boolean => b'#',
            DataType::Double => b',',
            DataType::BigNumber => b'(',
            DataType::VerbatimString => b'=',
            DataType::Map => b'%',
            DataType::Set => b'~',
            DataType::Attribute => b'|',
            DataType::Push => b'>',
        }
    }
}

pub(crate) fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

/// Returns the bytes up to the next CRLF and moves the cursor past it.
pub(crate) fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = src.get_ref();

    let end = buf[start..]
        .windows(2)
        .position(|window| window == CRLF)
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

pub(crate) fn get_string(src: &mut Cursor<&[u8]>) -> Result<String, Error> {
    let line = get_line(src)?;
    Ok(String::from_utf8(line.to_vec())?)
}

pub(crate) fn get_integer(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    let line = str::from_utf8(get_line(src)?)?;
    line.parse::<i64>()
        .map_err(|_| Error::InvalidInteger(line.to_string()))
}

/// Reads a length or count prefix. `-1` is the null marker and yields `None`.
pub(crate) fn get_length(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
    let line = str::from_utf8(get_line(src)?)?;
    match line.parse::<i64>() {
        Ok(-1) => Ok(None),
        Ok(length) if length >= 0 => Ok(Some(length as usize)),
        _ => Err(Error::InvalidLength(line.to_string())),
    }
}

/// Reads exactly `length` payload bytes followed by CRLF. Binary safe: the payload itself may
/// contain CRLF.
pub(crate) fn get_exact<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = src.get_ref();
    let end = start.checked_add(length).ok_or(Error::Incomplete)?;

    if buf.len() < end + CRLF.len() {
        return Err(Error::Incomplete);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(Error::MissingTerminator);
    }

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

pub(crate) fn put_line(dst: &mut Vec<u8>, data_type: DataType, line: &[u8]) {
    dst.reserve(1 + line.len() + CRLF.len());
    dst.push(u8::from(data_type));
    dst.extend_from_slice(line);
    dst.extend_from_slice(CRLF);
}

pub(crate) fn put_length(dst: &mut Vec<u8>, data_type: DataType, length: usize) {
    put_line(dst, data_type, length.to_string().as_bytes());
}

/// Writes a length-prefixed payload. The prefix counts bytes, not characters.
pub(crate) fn put_blob(dst: &mut Vec<u8>, data_type: DataType, payload: &[u8]) {
    put_length(dst, data_type, payload.len());
    dst.extend_from_slice(payload);
    dst.extend_from_slice(CRLF);
}
