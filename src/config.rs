use std::fmt;
use std::time::Duration;

use clap::Args;

use crate::codec::Generation;
use crate::connection::{RetryPolicy, MAX_ATTEMPTS, MAX_RECONNECT_ATTEMPTS};
use crate::encryption::EncryptionKey;
use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;

/// Connection settings. Every field can be given on the command line or through the
/// environment.
#[derive(Args, Clone)]
pub struct Config {
    /// Server host name or IP address.
    #[arg(long, env = "REDWIRE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Server port.
    #[arg(short, long, env = "REDWIRE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// User to authenticate as. Requires a password.
    #[arg(long, env = "REDWIRE_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "REDWIRE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Connect over TLS, verifying the server against the bundled web PKI roots.
    #[arg(long, env = "REDWIRE_TLS")]
    pub tls: bool,

    /// Base64 encoded 256-bit key. When set, every payload is sealed with AES-256-GCM.
    #[arg(long, env = "REDWIRE_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<EncryptionKey>,

    /// Skip detection and speak this protocol generation (resp2 or resp3).
    #[arg(long, env = "REDWIRE_PROTOCOL")]
    pub protocol: Option<Generation>,

    /// Seconds to wait for a connection to be established.
    #[arg(long, env = "REDWIRE_CONNECT_TIMEOUT", default_value_t = 60)]
    pub connect_timeout: u64,

    /// Milliseconds to wait between two attempts of the same operation.
    #[arg(long, env = "REDWIRE_RETRY_BACKOFF", default_value_t = 2000)]
    pub retry_backoff: u64,

    /// Attempts per operation before giving up.
    #[arg(long, env = "REDWIRE_MAX_ATTEMPTS", default_value_t = MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Consecutive failed reconnects after which a connection is abandoned.
    #[arg(long, env = "REDWIRE_MAX_RECONNECTS", default_value_t = MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnects: u32,
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let policy = RetryPolicy::default();
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            tls: false,
            encryption_key: None,
            protocol: None,
            connect_timeout: policy.connect_timeout.as_secs(),
            retry_backoff: policy.backoff.as_millis() as u64,
            max_attempts: policy.max_attempts,
            max_reconnects: policy.max_reconnects,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    pub fn with_protocol(mut self, generation: Generation) -> Self {
        self.protocol = Some(generation);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.connect_timeout = policy.connect_timeout.as_secs();
        self.retry_backoff = policy.backoff.as_millis() as u64;
        self.max_attempts = policy.max_attempts;
        self.max_reconnects = policy.max_reconnects;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            backoff: Duration::from_millis(self.retry_backoff),
            max_attempts: self.max_attempts,
            max_reconnects: self.max_reconnects,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("port must not be 0".to_string()));
        }
        if self.username.is_some() && self.password.is_none() {
            return Err(Error::InvalidConfig(
                "a username requires a password".to_string(),
            ));
        }
        if self.password.as_deref() == Some("") {
            return Err(Error::InvalidConfig("password must not be empty".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "at least one attempt per operation is required".to_string(),
            ));
        }
        if self.max_reconnects == 0 {
            return Err(Error::InvalidConfig(
                "at least one reconnect attempt is required".to_string(),
            ));
        }
        if self.connect_timeout == 0 {
            return Err(Error::InvalidConfig(
                "connect timeout must not be 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("tls", &self.tls)
            .field("encryption_key", &self.encryption_key)
            .field("protocol", &self.protocol)
            .field("retry_policy", &self.retry_policy())
            .finish()
    }
}
