use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tls::TlsSettings;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);
pub const MAX_ATTEMPTS: u32 = 3;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Size of a single socket read. Reading continues while reads keep filling the whole chunk.
pub const READ_CHUNK: usize = 4096;

/// A bidirectional byte channel to the server.
///
/// Implementations own reconnection: a transport that lost its socket reopens it on the next
/// use, so callers only see the failures that outlast the retry policy.
pub trait Transport: Send {
    /// Opens the underlying channel.
    fn open(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Writes and flushes `data`.
    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Waits for data and returns everything that can be read without blocking again.
    fn read_available(&mut self) -> BoxFuture<'_, Result<Bytes>>;

    /// Drops the channel after a fault that left its byte stream in an unknown state. The next
    /// use reconnects.
    fn mark_corrupted(&mut self);

    fn is_connected(&self) -> bool;

    fn close(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Installs a handshake that runs on every socket opened from now on, the first one and
    /// each reconnect alike.
    fn set_handshake(&mut self, handshake: Arc<dyn Handshake>);
}

/// Raw request/response access to a socket that was just opened. Nothing is retried.
pub trait Wire: Send {
    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    fn read_available(&mut self) -> BoxFuture<'_, Result<Bytes>>;
}

/// Makes a fresh socket usable, e.g. by negotiating the protocol and authenticating. A socket
/// whose handshake fails is discarded.
///
/// Each reply is expected in a single read: a reply split across reads decodes as truncated
/// and fails the connection attempt, the same as any other truncated reply.
pub trait Handshake: Send + Sync {
    fn greet<'a>(&'a self, wire: &'a mut dyn Wire) -> BoxFuture<'a, Result<()>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        (**self).open()
    }

    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        (**self).send(data)
    }

    fn read_available(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        (**self).read_available()
    }

    fn mark_corrupted(&mut self) {
        (**self).mark_corrupted()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        (**self).close()
    }

    fn set_handshake(&mut self, handshake: Arc<dyn Handshake>) {
        (**self).set_handshake(handshake)
    }
}

/// Where to connect and whether to speak TLS once connected.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub tls: Option<TlsSettings>,
}

impl Endpoint {
    pub fn plain(addr: SocketAddr) -> Self {
        Self { addr, tls: None }
    }

    pub fn tls(addr: SocketAddr, settings: TlsSettings) -> Self {
        Self {
            addr,
            tls: Some(settings),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub connect_timeout: Duration,
    /// Pause between two attempts of the same operation.
    pub backoff: Duration,
    /// Attempts per operation, the first one included.
    pub max_attempts: u32,
    /// Consecutive failed reconnects after which the connection gives up for good.
    pub max_reconnects: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            backoff: RETRY_BACKOFF,
            max_attempts: MAX_ATTEMPTS,
            max_reconnects: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Stream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Stream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Stream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Stream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Writes and flushes `data`, giving up when `cancel` fires.
async fn write_to(stream: &mut Stream, cancel: &CancellationToken, data: &[u8]) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = async {
            stream.write_all(data).await?;
            stream.flush().await
        } => Ok(res?),
    }
}

/// Waits for one read, then keeps reading while reads fill the whole chunk. The flag is set
/// when the peer hung up right after sending.
async fn read_chunks(stream: &mut Stream, cancel: &CancellationToken) -> Result<(Bytes, bool)> {
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    let n = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        res = stream.read(&mut chunk) => res?,
    };
    if n == 0 {
        return Err(io::Error::from(io::ErrorKind::ConnectionReset).into());
    }
    buffer.extend_from_slice(&chunk[..n]);

    let mut last = n;
    while last == READ_CHUNK {
        match stream.read(&mut chunk).now_or_never() {
            Some(Ok(n)) if n > 0 => {
                buffer.extend_from_slice(&chunk[..n]);
                last = n;
            }
            // The peer hung up after sending: hand over what arrived and reconnect later.
            Some(Ok(_)) | Some(Err(_)) => return Ok((buffer.freeze(), true)),
            None => break,
        }
    }

    Ok((buffer.freeze(), false))
}

/// A socket that is still being greeted.
struct Fresh<'a> {
    stream: &'a mut Stream,
    cancel: CancellationToken,
}

impl Wire for Fresh<'_> {
    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(write_to(&mut *self.stream, &self.cancel, data))
    }

    fn read_available(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            let (bytes, _) = read_chunks(&mut *self.stream, &self.cancel).await?;
            Ok(bytes)
        })
    }
}

/// A socket connection to the server, plaintext or TLS.
///
/// The socket is created lazily and recreated from scratch after every failure. Every new
/// socket goes through the installed [`Handshake`] before it carries any other traffic.
/// Consecutive failed reconnects are counted per connection; once the count reaches
/// [`RetryPolicy::max_reconnects`] the connection refuses to open again.
pub struct Connection {
    id: Uuid,
    endpoint: Endpoint,
    policy: RetryPolicy,
    stream: Option<Stream>,
    handshake: Option<Arc<dyn Handshake>>,
    reconnects: u32,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(endpoint: Endpoint, policy: RetryPolicy) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            endpoint,
            policy,
            stream: None,
            handshake: None,
            reconnects: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Ties every connect, read, write and backoff of this connection to `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Connection {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.endpoint.addr
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Consecutive reconnects that have not been followed by a successful one.
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    #[instrument(
        name = "connection",
        skip(self),
        fields(connection_id = %self.id, addr = %self.endpoint.addr)
    )]
    async fn connect(&mut self) -> Result<()> {
        if self.reconnects >= self.policy.max_reconnects {
            error!(attempts = self.reconnects, "reconnect limit reached");
            return Err(Error::ReconnectLimit {
                attempts: self.reconnects,
            });
        }

        self.reconnects += 1;
        self.stream = None;

        let addr = self.endpoint.addr;
        let cancel = self.cancel.clone();

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;

        let tcp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = timeout(self.policy.connect_timeout, socket.connect(addr)) => {
                res.map_err(|_| Error::ConnectTimeout(addr))??
            }
        };
        tcp.set_nodelay(true)?;

        let mut stream = match &self.endpoint.tls {
            Some(tls) => {
                let tls_stream = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    res = tls.handshake(tcp) => res?,
                };
                Stream::Tls(Box::new(tls_stream))
            }
            None => Stream::Plain(tcp),
        };

        if let Some(handshake) = self.handshake.clone() {
            let mut wire = Fresh {
                stream: &mut stream,
                cancel,
            };
            if let Err(err) = handshake.greet(&mut wire).await {
                error!(error = %err, "handshake failed");
                return Err(err);
            }
            debug!("handshake completed");
        }

        self.stream = Some(stream);
        self.reconnects = 0;

        info!(tls = self.endpoint.tls.is_some(), "connected");
        Ok(())
    }

    /// Reopens the socket if it was dropped.
    async fn ensure_connected(&mut self) -> Result<()> {
        match self.stream {
            Some(_) => Ok(()),
            None => self.connect().await,
        }
    }

    /// Decides whether a failed attempt is worth another try. Drops the socket and waits out
    /// the backoff when it is, hands the error back when it is not.
    async fn recover(&mut self, attempt: u32, err: Error) -> Result<()> {
        if err.is_retryable() {
            self.stream = None;
        }

        if !err.is_retryable() || attempt >= self.policy.max_attempts {
            error!(connection_id = %self.id, attempt, error = %err, "giving up");
            return Err(err);
        }

        warn!(
            connection_id = %self.id,
            attempt,
            error = %err,
            backoff = ?self.policy.backoff,
            "retrying"
        );

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = sleep(self.policy.backoff) => Ok(()),
        }
    }

    async fn try_write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_connected().await?;

        let stream = self.stream.as_mut().ok_or(Error::Closed)?;
        write_to(stream, &self.cancel, data).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.try_write(data).await {
                Ok(()) => {
                    debug!(connection_id = %self.id, bytes = data.len(), "sent");
                    return Ok(());
                }
                Err(err) => self.recover(attempt, err).await?,
            }
            attempt += 1;
        }
    }

    async fn read(&mut self) -> Result<Bytes> {
        let mut attempt = 1;
        while let Err(err) = self.ensure_connected().await {
            self.recover(attempt, err).await?;
            attempt += 1;
        }

        let stream = self.stream.as_mut().ok_or(Error::Closed)?;
        match read_chunks(stream, &self.cancel).await {
            Ok((bytes, hung_up)) => {
                if hung_up {
                    self.stream = None;
                }
                debug!(connection_id = %self.id, bytes = bytes.len(), "received");
                Ok(bytes)
            }
            Err(err) => {
                // A reply lost with its socket cannot be read from a new one. Drop the socket so
                // the next request reconnects, and report the failure.
                if err.is_retryable() {
                    warn!(connection_id = %self.id, error = %err, "read failed");
                    self.stream = None;
                }
                Err(err)
            }
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        match self.stream.take() {
            Some(mut stream) => {
                info!(connection_id = %self.id, "closing connection");
                stream.shutdown().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Transport for Connection {
    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.connect())
    }

    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write(data))
    }

    fn read_available(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(self.read())
    }

    fn mark_corrupted(&mut self) {
        warn!(connection_id = %self.id, "dropping corrupted connection");
        self.stream = None;
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.shutdown())
    }

    fn set_handshake(&mut self, handshake: Arc<dyn Handshake>) {
        self.handshake = Some(handshake);
    }
}
