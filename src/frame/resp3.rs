//! RESP3 frames.
//!
//! RESP3 keeps the RESP2 types and adds:
//! - Null (`_`)
//! - Boolean (`#`)
//! - Double (`,`)
//! - Big number (`(`)
//! - Blob error (`!`)
//! - Verbatim string (`=`)
//! - Map (`%`), Set (`~`) and Push (`>`)
//! - Attribute (`|`), a map of metadata attached to the value that follows it

use std::fmt;
use std::io::Cursor;
use std::str::{self, FromStr};

use bytes::Bytes;
use num_bigint::BigInt;

use super::{
    get_byte, get_exact, get_integer, get_length, get_line, get_string, put_blob, put_length,
    put_line, DataType, Error, RemoteError, WireValue, MAX_NESTING_DEPTH,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Blob(Bytes),
    Simple(String),
    SimpleError(RemoteError),
    Number(i64),
    Null,
    Double(f64),
    Boolean(bool),
    BlobError(RemoteError),
    Verbatim {
        /// Three character format tag, e.g. `txt` or `mkd`.
        format: String,
        text: String,
    },
    BigNumber(BigInt),
    Array(Vec<Frame>),
    Map(Vec<(Frame, Frame)>),
    Set(Vec<Frame>),
    Push {
        kind: String,
        items: Vec<Frame>,
    },
    Attributed {
        attributes: Vec<(Frame, Frame)>,
        value: Box<Frame>,
    },
}

impl Frame {
    pub fn is_null(&self) -> bool {
        matches!(self.unattributed(), Frame::Null)
    }

    /// Returns the value without any attribute metadata attached to it.
    pub fn unattributed(&self) -> &Frame {
        match self {
            Frame::Attributed { value, .. } => value.unattributed(),
            frame => frame,
        }
    }

    pub fn into_unattributed(self) -> Frame {
        match self {
            Frame::Attributed { value, .. } => value.into_unattributed(),
            frame => frame,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unattributed() {
            Frame::Simple(s) => Some(s),
            Frame::Blob(bytes) => str::from_utf8(bytes).ok(),
            Frame::Verbatim { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<Bytes> {
        match self.unattributed() {
            Frame::Blob(bytes) => Some(bytes.clone()),
            Frame::Simple(s) => Some(Bytes::from(s.clone())),
            Frame::Verbatim { text, .. } => Some(Bytes::from(text.clone())),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        use num_traits::ToPrimitive;

        match self.unattributed() {
            Frame::Number(i) => Some(*i),
            Frame::BigNumber(n) => n.to_i64(),
            _ => None,
        }
    }

    pub fn remote_error(&self) -> Option<&RemoteError> {
        match self.unattributed() {
            Frame::SimpleError(err) | Frame::BlobError(err) => Some(err),
            _ => None,
        }
    }

    /// Renders scalar values as text. Aggregates and null have no scalar form.
    pub fn to_scalar_string(&self) -> Option<String> {
        match self.unattributed() {
            Frame::Number(i) => Some(i.to_string()),
            Frame::Double(d) => Some(format_double(*d)),
            Frame::Boolean(b) => Some(b.to_string()),
            Frame::BigNumber(n) => Some(n.to_string()),
            frame => frame.as_str().map(str::to_string),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Blob(_) => "blob string",
            Frame::Simple(_) => "simple string",
            Frame::SimpleError(_) => "simple error",
            Frame::Number(_) => "number",
            Frame::Null => "null",
            Frame::Double(_) => "double",
            Frame::Boolean(_) => "boolean",
            Frame::BlobError(_) => "blob error",
            Frame::Verbatim { .. } => "verbatim string",
            Frame::BigNumber(_) => "big number",
            Frame::Array(_) => "array",
            Frame::Map(_) => "map",
            Frame::Set(_) => "set",
            Frame::Push { .. } => "push",
            Frame::Attributed { value, .. } => value.kind(),
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
            DataType::SimpleError => Ok(Frame::SimpleError(RemoteError::parse(&get_string(src)?))),
            DataType::Integer => Ok(Frame::Number(get_integer(src)?)),
            // Servers speaking RESP3 send `_`, but a `-1` length is still accepted as null.
            DataType::BulkString => match get_length(src)? {
                None => Ok(Frame::Null),
                Some(length) => Ok(Frame::Blob(Bytes::copy_from_slice(get_exact(src, length)?))),
            },
            DataType::Null => {
                if !get_line(src)?.is_empty() {
                    return Err(Error::InvalidNull);
                }
                Ok(Frame::Null)
            }
            DataType::Boolean => match get_line(src)? {
                b"t" => Ok(Frame::Boolean(true)),
                b"f" => Ok(Frame::Boolean(false)),
                other => Err(Error::InvalidBoolean(
                    String::from_utf8_lossy(other).to_string(),
                )),
            },
            DataType::Double => {
                let line = str::from_utf8(get_line(src)?)?;
                parse_double(line).map(Frame::Double)
            }
            DataType::BigNumber => {
                let line = str::from_utf8(get_line(src)?)?;
                BigInt::from_str(line)
                    .map(Frame::BigNumber)
                    .map_err(|_| Error::InvalidBigNumber(line.to_string()))
            }
            // !<length>\r\n<kind> <message>\r\n
            DataType::BulkError => {
                let length = get_length(src)?.ok_or(Error::InvalidLength("-1".to_string()))?;
                let payload = str::from_utf8(get_exact(src, length)?)?;
                Ok(Frame::BlobError(RemoteError::parse(payload)))
            }
            // =<length>\r\n<format>:<text>\r\n
            DataType::VerbatimString => {
                let length = get_length(src)?.ok_or(Error::InvalidVerbatim)?;
                let payload = str::from_utf8(get_exact(src, length)?)?;
                match payload.split_once(':') {
                    Some((format, text)) if format.len() == 3 => Ok(Frame::Verbatim {
                        format: format.to_string(),
                        text: text.to_string(),
                    }),
                    _ => Err(Error::InvalidVerbatim),
                }
            }
            DataType::Array => match get_length(src)? {
                None => Ok(Frame::Null),
                Some(count) => Self::parse_items(src, count, depth).map(Frame::Array),
            },
            DataType::Set => {
                let count = get_count(src)?;
                Self::parse_items(src, count, depth).map(Frame::Set)
            }
            // The count of a map is the number of pairs, not of elements.
            DataType::Map => {
                let count = get_count(src)?;
                Self::parse_pairs(src, count, depth).map(Frame::Map)
            }
            DataType::Push => {
                let count = get_count(src)?;
                let mut items = Self::parse_items(src, count, depth)?;
                if items.is_empty() {
                    return Err(Error::MissingPushKind);
                }
                let kind = match items.remove(0) {
                    Frame::Blob(bytes) => String::from_utf8(bytes.to_vec())?,
                    Frame::Simple(s) => s,
                    _ => return Err(Error::MissingPushKind),
                };
                Ok(Frame::Push { kind, items })
            }
            DataType::Attribute => {
                let count = get_count(src)?;
                let attributes = Self::parse_pairs(src, count, depth)?;
                let value = Self::parse_nested(src, depth + 1)?;
                Ok(Frame::Attributed {
                    attributes,
                    value: Box::new(value),
                })
            }
        }
    }

    fn parse_items(
        src: &mut Cursor<&[u8]>,
        count: usize,
        depth: usize,
    ) -> Result<Vec<Frame>, Error> {
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(Self::parse_nested(src, depth + 1)?);
        }
        Ok(items)
    }

    fn parse_pairs(
        src: &mut Cursor<&[u8]>,
        count: usize,
        depth: usize,
    ) -> Result<Vec<(Frame, Frame)>, Error> {
        let mut pairs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = Self::parse_nested(src, depth + 1)?;
            let value = Self::parse_nested(src, depth + 1)?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }
}

fn get_count(src: &mut Cursor<&[u8]>) -> Result<usize, Error> {
    get_length(src)?.ok_or_else(|| Error::InvalidLength("-1".to_string()))
}

fn parse_double(line: &str) -> Result<f64, Error> {
    match line {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        "nan" => Ok(f64::NAN),
        _ => line
            .parse::<f64>()
            .map_err(|_| Error::InvalidDouble(line.to_string())),
    }
}

fn format_double(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value == f64::INFINITY {
        "inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        value.to_string()
    }
}

impl WireValue for Frame {
    fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    fn prefix(&self) -> u8 {
        let data_type = match self {
            Frame::Blob(_) => DataType::BulkString,
            Frame::Simple(_) => DataType::SimpleString,
            Frame::SimpleError(_) => DataType::SimpleError,
            Frame::Number(_) => DataType::Integer,
            Frame::Null => DataType::Null,
            Frame::Double(_) => DataType::Double,
            Frame::Boolean(_) => DataType::Boolean,
            Frame::BlobError(_) => DataType::BulkError,
            Frame::Verbatim { .. } => DataType::VerbatimString,
            Frame::BigNumber(_) => DataType::BigNumber,
            Frame::Array(_) => DataType::Array,
            Frame::Map(_) => DataType::Map,
            Frame::Set(_) => DataType::Set,
            Frame::Push { .. } => DataType::Push,
            Frame::Attributed { .. } => DataType::Attribute,
        };
        u8::from(data_type)
    }

    fn write_to(&self, dst: &mut Vec<u8>) {
        match self {
            Frame::Blob(bytes) => put_blob(dst, DataType::BulkString, bytes),
            Frame::Simple(s) => put_line(dst, DataType::SimpleString, s.as_bytes()),
            Frame::SimpleError(err) => {
                put_line(dst, DataType::SimpleError, err.to_string().as_bytes())
            }
            Frame::Number(i) => put_line(dst, DataType::Integer, i.to_string().as_bytes()),
            Frame::Null => put_line(dst, DataType::Null, b""),
            Frame::Double(d) => put_line(dst, DataType::Double, format_double(*d).as_bytes()),
            Frame::Boolean(b) => put_line(dst, DataType::Boolean, if *b { b"t" } else { b"f" }),
            Frame::BlobError(err) => put_blob(dst, DataType::BulkError, err.to_string().as_bytes()),
            Frame::Verbatim { format, text } => {
                let payload = format!("{}:{}", format, text);
                put_blob(dst, DataType::VerbatimString, payload.as_bytes())
            }
            Frame::BigNumber(n) => put_line(dst, DataType::BigNumber, n.to_string().as_bytes()),
            Frame::Array(items) => write_items(dst, DataType::Array, items),
            Frame::Set(items) => write_items(dst, DataType::Set, items),
            Frame::Map(pairs) => write_pairs(dst, DataType::Map, pairs),
            Frame::Push { kind, items } => {
                put_length(dst, DataType::Push, items.len() + 1);
                put_blob(dst, DataType::BulkString, kind.as_bytes());
                for item in items {
                    item.write_to(dst);
                }
            }
            Frame::Attributed { attributes, value } => {
                write_pairs(dst, DataType::Attribute, attributes);
                value.write_to(dst);
            }
        }
    }

    fn bulk(bytes: Bytes) -> Self {
        Frame::Blob(bytes)
    }

    fn array(items: Vec<Self>) -> Self {
        Frame::Array(items)
    }
}

fn write_items(dst: &mut Vec<u8>, data_type: DataType, items: &[Frame]) {
    put_length(dst, data_type, items.len());
    for item in items {
        item.write_to(dst);
    }
}

fn write_pairs(dst: &mut Vec<u8>, data_type: DataType, pairs: &[(Frame, Frame)]) {
    put_length(dst, data_type, pairs.len());
    for (key, value) in pairs {
        key.write_to(dst);
        value.write_to(dst);
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Blob(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::SimpleError(err) => write!(f, "-{}", err),
            Frame::Number(i) => write!(f, ":{}", i),
            Frame::Null => write!(f, "_"),
            Frame::Double(d) => write!(f, ",{}", format_double(*d)),
            Frame::Boolean(b) => write!(f, "#{}", if *b { 't' } else { 'f' }),
            Frame::BlobError(err) => write!(f, "!{}", err),
            Frame::Verbatim { format, text } => write!(f, "={}:{}", format, text),
            Frame::BigNumber(n) => write!(f, "({}", n),
            Frame::Array(items) => write_list(f, '*', items),
            Frame::Set(items) => write_list(f, '~', items),
            Frame::Map(pairs) => {
                write!(f, "%{}{{", pairs.len())?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Frame::Push { kind, items } => {
                write!(f, ">{} ", kind)?;
                write_list(f, '*', items)
            }
            Frame::Attributed { value, .. } => write!(f, "|{}", value),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, prefix: char, items: &[Frame]) -> fmt::Result {
    write!(f, "{}{}[", prefix, items.len())?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "]")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Result<Frame, Error> {
        let mut cursor = Cursor::new(data);
        Frame::parse(&mut cursor)
    }

    fn blob(s: &str) -> Frame {
        Frame::Blob(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn parse_blob_string_frame_empty() {
        assert_eq!(parse(b"$0\r\n\r\n"), Ok(Frame::Blob(Bytes::new())));
    }

    #[test]
    fn parse_null_frame() {
        assert_eq!(parse(b"_\r\n"), Ok(Frame::Null));
        assert_eq!(parse(b"_x\r\n"), Err(Error::InvalidNull));
    }

    #[test]
    fn parse_boolean_frame() {
        assert_eq!(parse(b"#t\r\n"), Ok(Frame::Boolean(true)));
        assert_eq!(parse(b"#f\r\n"), Ok(Frame::Boolean(false)));
        assert_eq!(
            parse(b"#x\r\n"),
            Err(Error::InvalidBoolean("x".to_string()))
        );
    }

    #[test]
    fn parse_double_frame() {
        assert_eq!(parse(b",1.23\r\n"), Ok(Frame::Double(1.23)));
        assert_eq!(parse(b",inf\r\n"), Ok(Frame::Double(f64::INFINITY)));
        assert_eq!(parse(b",-inf\r\n"), Ok(Frame::Double(f64::NEG_INFINITY)));
        assert!(matches!(parse(b",nan\r\n"), Ok(Frame::Double(d)) if d.is_nan()));
    }

    #[test]
    fn parse_big_number_frame() {
        let frame = parse(b"(3492890328409238509324850943850943825024385\r\n").unwrap();

        assert_eq!(
            frame,
            Frame::BigNumber(
                BigInt::from_str("3492890328409238509324850943850943825024385").unwrap()
            )
        );
        assert_eq!(frame.as_integer(), None);
        assert_eq!(parse(b"(-12\r\n").unwrap().as_integer(), Some(-12));
    }

    #[test]
    fn parse_blob_error_frame() {
        assert_eq!(
            parse(b"!21\r\nSYNTAX invalid syntax\r\n"),
            Ok(Frame::BlobError(RemoteError::new("SYNTAX", "invalid syntax")))
        );
    }

    #[test]
    fn parse_verbatim_string_frame() {
        assert_eq!(
            parse(b"=15\r\ntxt:Some string\r\n"),
            Ok(Frame::Verbatim {
                format: "txt".to_string(),
                text: "Some string".to_string(),
            })
        );
        assert_eq!(parse(b"=4\r\ntext\r\n"), Err(Error::InvalidVerbatim));
    }

    #[test]
    fn parse_map_frame_counts_pairs() {
        let frame = parse(b"%2\r\n+first\r\n:1\r\n+second\r\n:2\r\n");

        assert_eq!(
            frame,
            Ok(Frame::Map(vec![
                (Frame::Simple("first".to_string()), Frame::Number(1)),
                (Frame::Simple("second".to_string()), Frame::Number(2)),
            ]))
        );
    }

    #[test]
    fn parse_map_frame_missing_value() {
        assert_eq!(parse(b"%1\r\n+first\r\n"), Err(Error::Incomplete));
    }

    #[test]
    fn parse_set_frame() {
        assert_eq!(
            parse(b"~2\r\n:1\r\n:2\r\n"),
            Ok(Frame::Set(vec![Frame::Number(1), Frame::Number(2)]))
        );
    }

    #[test]
    fn parse_push_frame() {
        assert_eq!(
            parse(b">2\r\n$7\r\nmessage\r\n$5\r\nhello\r\n"),
            Ok(Frame::Push {
                kind: "message".to_string(),
                items: vec![blob("hello")],
            })
        );
    }

    #[test]
    fn parse_push_frame_without_kind() {
        assert_eq!(parse(b">0\r\n"), Err(Error::MissingPushKind));
        assert_eq!(parse(b">1\r\n:1\r\n"), Err(Error::MissingPushKind));
    }

    #[test]
    fn parse_attribute_attaches_to_next_value() {
        let frame = parse(b"|1\r\n+ttl\r\n:3600\r\n$3\r\nbar\r\n").unwrap();

        assert_eq!(
            frame,
            Frame::Attributed {
                attributes: vec![(Frame::Simple("ttl".to_string()), Frame::Number(3600))],
                value: Box::new(blob("bar")),
            }
        );
        assert_eq!(frame.as_str(), Some("bar"));
        assert_eq!(frame.into_unattributed(), blob("bar"));
    }

    #[test]
    fn parse_attribute_without_value() {
        assert_eq!(parse(b"|1\r\n+ttl\r\n:3600\r\n"), Err(Error::Incomplete));
    }

    #[test]
    fn parse_rejects_deep_nesting() {
        let data = "*1\r\n".repeat(MAX_NESTING_DEPTH + 2);
        assert_eq!(parse(data.as_bytes()), Err(Error::TooDeep));
    }

    #[test]
    fn parse_unknown_prefix() {
        assert_eq!(parse(b"?what\r\n"), Err(Error::InvalidDataType('?')));
    }

    #[test]
    fn serialize_is_stable_across_a_parse() {
        let frames = vec![
            blob(""),
            blob("héllo wörld"),
            Frame::Simple("OK".to_string()),
            Frame::SimpleError(RemoteError::new("ERR", "boom")),
            Frame::Number(i64::MIN),
            Frame::Null,
            Frame::Double(-2.5),
            Frame::Double(f64::INFINITY),
            Frame::Boolean(false),
            Frame::BlobError(RemoteError::new("SYNTAX", "invalid syntax")),
            Frame::Verbatim {
                format: "mkd".to_string(),
                text: "# title".to_string(),
            },
            Frame::BigNumber(BigInt::from_str("-123456789012345678901234567890").unwrap()),
            Frame::Array(vec![Frame::Number(1), Frame::Null]),
            Frame::Set(vec![blob("a")]),
            Frame::Map(vec![(blob("k"), Frame::Array(vec![]))]),
            Frame::Push {
                kind: "message".to_string(),
                items: vec![blob("ch"), blob("hi")],
            },
            Frame::Attributed {
                attributes: vec![(blob("key-popularity"), Frame::Double(0.5))],
                value: Box::new(Frame::Number(2)),
            },
        ];

        for frame in frames {
            let packaged = frame.serialize();
            let reparsed = parse(&packaged).unwrap();
            assert_eq!(reparsed.serialize(), packaged, "{}", frame);
            assert_eq!(frame.prefix(), packaged[0]);
        }
    }
}
