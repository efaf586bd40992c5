use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::lookup_host;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{Codec, Generation};
use crate::commands::ReplyMode;
use crate::config::Config;
use crate::connection::{Connection, Endpoint, Transport};
use crate::database::Database;
use crate::encryption::Encrypted;
use crate::error::{Error, Result};
use crate::handshake::Greeting;
use crate::tls::TlsSettings;

/// Resolves the server once, works out which protocol generation it speaks and then hands out
/// ready to use [`Database`] handles, one connection each.
pub struct ConnectionManager {
    config: Config,
    state: Option<Initialized>,
}

struct Initialized {
    endpoint: Endpoint,
    generation: Generation,
}

impl ConnectionManager {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The generation settled on by [`ConnectionManager::initialize`].
    pub fn generation(&self) -> Option<Generation> {
        self.state.as_ref().map(|state| state.generation)
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.state.as_ref().map(|state| state.endpoint.addr)
    }

    /// Resolves the host and settles the protocol generation, either from the configuration
    /// or by probing the server. Can only be called once.
    #[instrument(skip(self), fields(host = %self.config.host, port = self.config.port))]
    pub async fn initialize(&mut self) -> Result<Generation> {
        if self.state.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let addr = self.resolve().await?;
        let tls = if self.config.tls {
            Some(TlsSettings::new(&self.config.host)?)
        } else {
            None
        };
        let endpoint = Endpoint { addr, tls };

        let generation = match self.config.protocol {
            Some(generation) => {
                debug!(%generation, "protocol generation set by configuration");
                generation
            }
            None => self.detect(&endpoint).await?,
        };

        info!(%addr, %generation, "connection manager initialized");
        self.state = Some(Initialized {
            endpoint,
            generation,
        });

        Ok(generation)
    }

    /// Opens a new connection, authenticated and switched to the detected generation. Every
    /// socket the connection opens later on goes through the same greeting.
    #[instrument(skip(self))]
    pub async fn create_connection(&self) -> Result<Database> {
        let state = self.state.as_ref().ok_or(Error::NotInitialized)?;
        self.open(&state.endpoint, state.generation).await
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let host = self.config.host.as_str();
        lookup_host((host, self.config.port))
            .await?
            .next()
            .ok_or_else(|| Error::InvalidConfig(format!("{host} did not resolve to an address")))
    }

    fn greeting(&self, generation: Generation) -> Greeting {
        let greeting = Greeting::new(generation);
        match &self.config.password {
            Some(password) => {
                greeting.with_credentials(self.config.username.clone(), password.clone())
            }
            None => greeting,
        }
    }

    async fn open(&self, endpoint: &Endpoint, generation: Generation) -> Result<Database> {
        let connection = Connection::new(endpoint.clone(), self.config.retry_policy());
        let mut transport: Box<dyn Transport> = match &self.config.encryption_key {
            Some(key) => Box::new(Encrypted::new(connection, key)),
            None => Box::new(connection),
        };

        transport.set_handshake(Arc::new(self.greeting(generation)));
        transport.open().await?;

        Ok(Database::new(Codec::from(generation), transport))
    }

    /// Tries `HELLO 3` first. A server that refuses it gets a second, fresh connection that
    /// has to accept `CLIENT REPLY ON` over RESP2.
    async fn detect(&self, endpoint: &Endpoint) -> Result<Generation> {
        match self.open(endpoint, Generation::Resp3).await {
            Ok(mut db) => {
                info!("server speaks RESP3");
                close_trial(&mut db).await;
                return Ok(Generation::Resp3);
            }
            Err(err) => warn!(error = %err, "RESP3 not accepted, trying RESP2"),
        }

        let resp2 = async {
            let mut db = self.open(endpoint, Generation::Resp2).await?;
            let result = db.client_reply(ReplyMode::On).await;
            close_trial(&mut db).await;
            result
        };

        match resp2.await {
            Ok(()) => {
                info!("server speaks RESP2");
                Ok(Generation::Resp2)
            }
            Err(err) => {
                error!(error = %err, "could not detect the protocol generation");
                Err(Error::Detection(Box::new(err)))
            }
        }
    }
}

async fn close_trial(db: &mut Database) {
    if let Err(err) = db.close().await {
        debug!(error = %err, "failed to close detection connection");
    }
}
