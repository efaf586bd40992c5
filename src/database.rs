use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{Codec, Generation, Message, ReplyError, ServerInfo};
use crate::command::{Command, Keyword};
use crate::commands::{
    Auth, ClientReply, Del, Exists, ExpireAt, HDel, HGet, HIncrBy, HSet, Hello, Publish,
    ReplyMode, Request, Subscribe, Unsubscribe,
};
use crate::connection::Transport;
use crate::error::{Error, Result};

/// A command interface over a single transport.
///
/// Every method takes `&mut self`, so requests on one connection are strictly sequential: a
/// reply is always read before the next command is written.
///
/// While subscribed, the transport belongs to a background task that forwards published
/// messages, and every other command is rejected with [`Error::Mode`].
pub struct Database {
    codec: Codec,
    transport: Option<Box<dyn Transport>>,
    subscription: Option<Subscription>,
}

struct Subscription {
    channel: String,
    cancel: CancellationToken,
    sink: UnboundedSender<Message>,
    handle: JoinHandle<(Box<dyn Transport>, Result<()>)>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("generation", &self.generation())
            .field("connected", &self.transport.as_ref().map(|t| t.is_connected()))
            .field(
                "subscription",
                &self.subscription.as_ref().map(|s| s.channel.as_str()),
            )
            .finish()
    }
}

impl Database {
    pub fn new(codec: Codec, transport: Box<dyn Transport>) -> Database {
        Database {
            codec,
            transport: Some(transport),
            subscription: None,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn generation(&self) -> Generation {
        self.codec.generation()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Whether the subscription loop stopped on its own: cancelled by the caller, the receiver
    /// went away or the connection failed.
    pub fn subscription_finished(&self) -> bool {
        self.subscription
            .as_ref()
            .map_or(false, |subscription| subscription.handle.is_finished())
    }

    fn transport(&mut self, command: Keyword) -> Result<&mut Box<dyn Transport>> {
        if self.subscription.is_some() {
            return Err(Error::Mode { command });
        }
        self.transport.as_mut().ok_or(Error::Closed)
    }

    /// Turns a reply that could not be interpreted into an error. When the bytes themselves
    /// were malformed the connection is dropped, since nothing after them can be trusted.
    fn fault(&mut self, command: &Command, err: ReplyError) -> Error {
        let err = Error::from_reply(command, err);

        if err.is_corrupting() {
            error!(command = %command.keyword(), error = %err, "corrupted reply");
            if let Some(transport) = self.transport.as_mut() {
                transport.mark_corrupted();
            }
        }

        err
    }

    async fn write(&mut self, command: &Command) -> Result<()> {
        let bytes = self.codec.encode(command);
        debug!(command = %command, "sending");
        self.transport(command.keyword())?.send(&bytes).await
    }

    async fn read(&mut self, command: &Command) -> Result<Bytes> {
        let reply = self.transport(command.keyword())?.read_available().await?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            match self.codec.describe(&reply) {
                Ok(frames) => debug!(command = %command.keyword(), ?frames, "received"),
                Err(_) => debug!(command = %command.keyword(), bytes = reply.len(), "received"),
            }
        }
        Ok(reply)
    }

    /// Sends `request` and reads its reply.
    pub async fn execute<R: Request>(&mut self, request: R) -> Result<R::Output> {
        self.transport(R::KEYWORD)?;
        request.validate(self.codec)?;

        if !request.expects_reply() {
            return Err(Error::invalid_argument(
                R::KEYWORD,
                "the server does not reply to this command",
            ));
        }

        let command = request.into_command()?;
        self.write(&command).await?;

        let reply = self.read(&command).await?;
        R::read_reply(self.codec, &reply).map_err(|err| self.fault(&command, err))
    }

    pub async fn auth(&mut self, password: &str) -> Result<()> {
        self.execute(Auth {
            username: None,
            password: password.to_string(),
        })
        .await
    }

    pub async fn auth_with(&mut self, username: &str, password: &str) -> Result<()> {
        self.execute(Auth {
            username: Some(username.to_string()),
            password: password.to_string(),
        })
        .await
    }

    /// Negotiates `version` and returns what the server reports about itself. The version has
    /// to match the generation this connection decodes with.
    pub async fn hello(&mut self, version: u8) -> Result<ServerInfo> {
        self.execute(Hello {
            version,
            auth: None,
        })
        .await
    }

    pub async fn client_reply(&mut self, mode: ReplyMode) -> Result<()> {
        let request = ClientReply { mode };
        if request.expects_reply() {
            return self.execute(request).await;
        }

        self.transport(ClientReply::KEYWORD)?;
        let command = request.into_command()?;
        self.write(&command).await
    }

    pub async fn hset<F, V>(&mut self, key: &str, pairs: &[(F, V)]) -> Result<i64>
    where
        F: AsRef<str>,
        V: AsRef<[u8]>,
    {
        self.execute(HSet {
            key: key.to_string(),
            pairs: pairs
                .iter()
                .map(|(field, value)| {
                    (
                        field.as_ref().to_string(),
                        Bytes::copy_from_slice(value.as_ref()),
                    )
                })
                .collect(),
        })
        .await
    }

    pub async fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>> {
        self.execute(HGet {
            key: key.to_string(),
            field: field.to_string(),
        })
        .await
    }

    pub async fn hincrby(&mut self, key: &str, field: &str, increment: i64) -> Result<i64> {
        self.execute(HIncrBy {
            key: key.to_string(),
            field: field.to_string(),
            increment,
        })
        .await
    }

    pub async fn hdel<F: AsRef<str>>(&mut self, key: &str, fields: &[F]) -> Result<i64> {
        self.execute(HDel {
            key: key.to_string(),
            fields: to_strings(fields),
        })
        .await
    }

    pub async fn exists<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<i64> {
        self.execute(Exists {
            keys: to_strings(keys),
        })
        .await
    }

    /// `timestamp` is in seconds since the Unix epoch.
    pub async fn expire_at(&mut self, key: &str, timestamp: i64) -> Result<bool> {
        self.execute(ExpireAt {
            key: key.to_string(),
            timestamp,
        })
        .await
    }

    pub async fn del<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<i64> {
        self.execute(Del {
            keys: to_strings(keys),
        })
        .await
    }

    pub async fn publish(&mut self, channel: &str, message: impl AsRef<[u8]>) -> Result<i64> {
        self.execute(Publish {
            channel: channel.to_string(),
            message: Bytes::copy_from_slice(message.as_ref()),
        })
        .await
    }

    /// Subscribes to `channel` and forwards every published message to `sink`.
    ///
    /// Returns once the server confirmed the subscription. From then on a background task
    /// owns the transport until [`Database::unsubscribe`] or [`Database::close`]. Cancelling
    /// `cancel` stops the forwarding without telling the server.
    #[instrument(skip(self, sink, cancel))]
    pub async fn subscribe(
        &mut self,
        channel: &str,
        sink: UnboundedSender<Message>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let command = Subscribe {
            channel: channel.to_string(),
        };
        self.transport(Subscribe::KEYWORD)?;
        let command = command.into_command()?;
        self.write(&command).await?;

        loop {
            let reply = self.read(&command).await?;
            let (acknowledged, messages) = Subscribe::read_reply(self.codec, &reply)
                .map_err(|err| self.fault(&command, err))?;

            forward(&sink, messages);
            if acknowledged {
                break;
            }
        }

        let transport = self.transport.take().ok_or(Error::Closed)?;
        let cancel = cancel.child_token();
        let handle = tokio::spawn(read_loop(
            transport,
            self.codec,
            command,
            sink.clone(),
            cancel.clone(),
        ));

        info!("subscribed");
        self.subscription = Some(Subscription {
            channel: channel.to_string(),
            cancel,
            sink,
            handle,
        });

        Ok(())
    }

    /// Stops the background task, takes the transport back and unsubscribes. Messages that
    /// arrive before the server confirms are still forwarded.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&mut self) -> Result<()> {
        let mut subscription = self
            .subscription
            .take()
            .ok_or_else(|| Error::Subscription("there is no active subscription".to_string()))?;

        self.stop(&mut subscription).await?;

        let command = Unsubscribe {
            channel: subscription.channel.clone(),
        }
        .into_command()?;
        self.write(&command).await?;

        loop {
            let reply = self.read(&command).await?;
            let (acknowledged, messages) = Unsubscribe::read_reply(self.codec, &reply)
                .map_err(|err| self.fault(&command, err))?;

            forward(&subscription.sink, messages);
            if acknowledged {
                break;
            }
        }

        info!(channel = %subscription.channel, "unsubscribed");
        Ok(())
    }

    /// Cancels the read loop, waits for it and puts its transport back in place.
    async fn stop(&mut self, subscription: &mut Subscription) -> Result<()> {
        subscription.cancel.cancel();

        let (transport, result) = (&mut subscription.handle).await.map_err(|err| {
            error!(error = %err, "subscription task failed");
            Error::Subscription(format!("read loop did not finish cleanly: {err}"))
        })?;
        self.transport = Some(transport);

        result
    }

    /// Ends any subscription and closes the transport. Later commands fail with
    /// [`Error::Closed`].
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut subscription) = self.subscription.take() {
            if let Err(err) = self.stop(&mut subscription).await {
                warn!(error = %err, "subscription ended with an error");
            }
        }

        match self.transport.take() {
            Some(mut transport) => transport.close().await,
            None => Ok(()),
        }
    }
}

fn to_strings<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values.iter().map(|v| v.as_ref().to_string()).collect()
}

fn forward(sink: &UnboundedSender<Message>, messages: Vec<Message>) {
    for message in messages {
        debug!(channel = ?message.channel, bytes = message.payload.len(), "message");
        if sink.send(message).is_err() {
            break;
        }
    }
}

/// Reads published messages until cancelled, the receiver is dropped or the transport fails,
/// then hands the transport back.
async fn read_loop(
    mut transport: Box<dyn Transport>,
    codec: Codec,
    command: Command,
    sink: UnboundedSender<Message>,
    cancel: CancellationToken,
) -> (Box<dyn Transport>, Result<()>) {
    let result = loop {
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            _ = sink.closed() => break Ok(()),
            reply = transport.read_available() => reply,
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                error!(error = %err, "subscription read failed");
                break Err(err);
            }
        };

        match codec.messages(&reply) {
            Ok(messages) => forward(&sink, messages),
            Err(err) => {
                transport.mark_corrupted();
                let err = Error::from_reply(&command, err);
                error!(error = %err, "corrupted subscription traffic");
                break Err(err);
            }
        }
    };

    debug!("subscription read loop finished");
    (transport, result)
}
