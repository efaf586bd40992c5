use futures::future::BoxFuture;
use tracing::debug;

use crate::codec::{Codec, Generation};
use crate::commands::{Auth, Hello, Request};
use crate::connection::{Handshake, Wire};
use crate::error::{Error, Result};

/// What every new socket is told before it carries commands: `HELLO 3` on RESP3 connections,
/// with the credentials folded in, or a plain `AUTH` on RESP2 ones.
#[derive(Clone, PartialEq, Eq)]
pub struct Greeting {
    generation: Generation,
    credentials: Option<(Option<String>, String)>,
}

impl Greeting {
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: String) -> Self {
        self.credentials = Some((username, password));
        self
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    async fn run(&self, wire: &mut dyn Wire) -> Result<()> {
        let codec = Codec::from(self.generation);

        match self.generation {
            Generation::Resp3 => {
                let hello = Hello {
                    version: 3,
                    auth: self.credentials.clone(),
                };
                let info = exchange(wire, codec, hello).await?;
                debug!(server = ?info.server, version = ?info.version, "negotiated RESP3");
            }
            Generation::Resp2 => {
                if let Some((username, password)) = self.credentials.clone() {
                    exchange(wire, codec, Auth { username, password }).await?;
                    debug!("authenticated");
                }
            }
        }

        Ok(())
    }
}

impl Handshake for Greeting {
    fn greet<'a>(&'a self, wire: &'a mut dyn Wire) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run(wire))
    }
}

async fn exchange<R: Request>(wire: &mut dyn Wire, codec: Codec, request: R) -> Result<R::Output> {
    let command = request.into_command()?;
    wire.send(&codec.encode(&command)).await?;

    let reply = wire.read_available().await?;
    R::read_reply(codec, &reply).map_err(|err| Error::from_reply(&command, err))
}

impl std::fmt::Debug for Greeting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Greeting")
            .field("generation", &self.generation)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}
