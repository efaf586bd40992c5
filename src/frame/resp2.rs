//! RESP2 frames: simple strings, errors, integers, bulk strings and arrays.
//!
//! RESP2 has no dedicated null type. A bulk string or an array with a length of `-1` is the only
//! way to express null, so both variants carry an `Option`.

use std::fmt;
use std::io::Cursor;

use bytes::Bytes;

use super::{
    get_byte, get_exact, get_integer, get_length, get_string, put_blob, put_length, put_line,
    DataType, Error, RemoteError, WireValue, MAX_NESTING_DEPTH,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(RemoteError),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// The bulk string with a declared length of zero.
    pub fn empty() -> Frame {
        Frame::Bulk(Some(Bytes::new()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Bulk(None) | Frame::Array(None))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) => Some(s),
            Frame::Bulk(Some(bytes)) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Frame::Bulk(Some(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "simple string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(Some(_)) => "bulk string",
            Frame::Bulk(None) => "null bulk string",
            Frame::Array(Some(_)) => "array",
            Frame::Array(None) => "null array",
        }
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::TooDeep);
        }

        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => Ok(Frame::Simple(get_string(src)?)),
            DataType::SimpleError => Ok(Frame::Error(RemoteError::parse(&get_string(src)?))),
            DataType::Integer => Ok(Frame::Integer(get_integer(src)?)),
            // $<length>\r\n<data>\r\n
            DataType::BulkString => match get_length(src)? {
                None => Ok(Frame::Bulk(None)),
                Some(length) => {
                    let data = get_exact(src, length)?;
                    Ok(Frame::Bulk(Some(Bytes::copy_from_slice(data))))
                }
            },
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => match get_length(src)? {
                None => Ok(Frame::Array(None)),
                Some(length) => {
                    let mut frames = Vec::with_capacity(length.min(1024));
                    for _ in 0..length {
                        frames.push(Self::parse_nested(src, depth + 1)?);
                    }
                    Ok(Frame::Array(Some(frames)))
                }
            },
            // Everything else was introduced by RESP3.
            _ => Err(Error::InvalidDataType(first_byte as char)),
        }
    }
}

impl WireValue for Frame {
    fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    fn prefix(&self) -> u8 {
        let data_type = match self {
            Frame::Simple(_) => DataType::SimpleString,
            Frame::Error(_) => DataType::SimpleError,
            Frame::Integer(_) => DataType::Integer,
            Frame::Bulk(_) => DataType::BulkString,
            Frame::Array(_) => DataType::Array,
        };
        u8::from(data_type)
    }

    fn write_to(&self, dst: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => put_line(dst, DataType::SimpleString, s.as_bytes()),
            Frame::Error(err) => put_line(dst, DataType::SimpleError, err.to_string().as_bytes()),
            Frame::Integer(i) => put_line(dst, DataType::Integer, i.to_string().as_bytes()),
            Frame::Bulk(Some(bytes)) => put_blob(dst, DataType::BulkString, bytes),
            Frame::Bulk(None) => put_line(dst, DataType::BulkString, b"-1"),
            Frame::Array(Some(frames)) => {
                put_length(dst, DataType::Array, frames.len());
                for frame in frames {
                    frame.write_to(dst);
                }
            }
            Frame::Array(None) => put_line(dst, DataType::Array, b"-1"),
        }
    }

    fn bulk(bytes: Bytes) -> Self {
        Frame::Bulk(Some(bytes))
    }

    fn array(items: Vec<Self>) -> Self {
        Frame::Array(Some(items))
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(err) => write!(f, "-{}", err),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(Some(bytes)) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Bulk(None) => write!(f, "$-1"),
            Frame::Array(Some(frames)) => {
                write!(f, "*{}[", frames.len())?;
                for (i, frame) in frames.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", frame)?;
                }
                write!(f, "]")
            }
            Frame::Array(None) => write!(f, "*-1"),
        }
    }
}
