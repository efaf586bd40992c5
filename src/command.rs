use std::fmt;

use bytes::Bytes;
use strum_macros::{Display, IntoStaticStr};

/// Command names and the fixed sub-keywords the client sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Keyword {
    Auth,
    Hello,
    Client,
    Reply,
    HSet,
    HGet,
    HIncrBy,
    HDel,
    Exists,
    ExpireAt,
    Del,
    Subscribe,
    Unsubscribe,
    Publish,
}

impl Keyword {
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }
}

/// A single request: the command name followed by its arguments. Clients send commands as an
/// array of bulk strings, so every argument is kept as raw bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    keyword: Keyword,
    key: Option<String>,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(keyword: Keyword) -> Self {
        Self {
            keyword,
            key: None,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Appends `key` as the next argument and remembers it so errors can name it.
    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self.arg(key)
    }

    pub fn keyword(&self) -> Keyword {
        self.keyword
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The arguments after the command name.
    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }

    /// Every element of the command as it goes on the wire, starting with its name.
    pub fn parts(&self) -> impl Iterator<Item = Bytes> + '_ {
        std::iter::once(Bytes::from_static(self.keyword.as_str().as_bytes()))
            .chain(self.args.iter().cloned())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}
