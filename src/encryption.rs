//! Payload encryption layered over any [`Transport`].
//!
//! Every outbound buffer becomes one sealed record:
//!
//! ```text
//! [u32 length, big endian][12 byte nonce][ciphertext][16 byte tag]
//! ```
//!
//! `length` counts everything after the length field itself. Records are sealed with
//! AES-256-GCM under a fresh random nonce.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose, Engine as _};
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use rand::RngCore;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};
use tracing::{debug, warn};

use crate::connection::{Handshake, Transport, Wire};
use crate::error::{Error, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const LENGTH_FIELD_LEN: usize = 4;

/// A 256-bit key. Its bytes never show up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }
}

impl FromStr for EncryptionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| Error::InvalidConfig(format!("encryption key is not base64: {e}")))?;

        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            Error::InvalidConfig(format!(
                "encryption key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;

        Ok(Self(bytes))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Sealing and opening of records, plus the ciphertext of records that have only partially
/// arrived.
struct Records {
    cipher: Aes256Gcm,
    codec: LengthDelimitedCodec,
    pending: BytesMut,
}

impl Records {
    fn new(cipher: Aes256Gcm) -> Self {
        Self {
            cipher,
            codec: record_codec(),
            pending: BytesMut::new(),
        }
    }

    fn seal(&mut self, plaintext: &[u8]) -> Result<BytesMut> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Crypto("failed to seal record"))?;

        let mut body = BytesMut::with_capacity(NONCE_LEN + ciphertext.len());
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&ciphertext);

        let mut record =
            BytesMut::with_capacity(plaintext.len() + NONCE_LEN + TAG_LEN + LENGTH_FIELD_LEN);
        self.codec
            .encode(body.freeze(), &mut record)
            .map_err(|_| Error::Crypto("record exceeds the maximum length"))?;

        Ok(record)
    }

    fn open(&self, record: &[u8]) -> Result<Vec<u8>> {
        if record.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Crypto("record is too short"));
        }

        let (nonce, ciphertext) = record.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("record failed authentication"))
    }

    /// Opens every complete record in the pending buffer.
    fn drain(&mut self) -> Result<BytesMut> {
        let mut plaintext = BytesMut::new();

        while let Some(record) = self
            .codec
            .decode(&mut self.pending)
            .map_err(|_| Error::Crypto("record exceeds the maximum length"))?
        {
            plaintext.extend_from_slice(&self.open(&record)?);
        }

        Ok(plaintext)
    }

    /// Forgets any partially received record. The codec remembers a header it already
    /// consumed, so it is replaced along with the buffer.
    fn reset(&mut self) {
        self.pending.clear();
        self.codec = record_codec();
    }
}

fn record_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_FIELD_LEN)
        .new_codec()
}

/// Records left over by the handshake of the newest socket, waiting for the next read.
type Greeted = Arc<Mutex<Option<Records>>>;

fn lock(greeted: &Mutex<Option<Records>>) -> MutexGuard<'_, Option<Records>> {
    greeted.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wraps a transport so that everything sent is sealed and everything read is opened.
pub struct Encrypted<T> {
    inner: T,
    records: Records,
    greeted: Greeted,
}

impl<T: Transport> Encrypted<T> {
    pub fn new(inner: T, key: &EncryptionKey) -> Self {
        Self {
            inner,
            records: Records::new(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0))),
            greeted: Greeted::default(),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn corrupted(&mut self, err: Error) -> Error {
        warn!(error = %err, "dropping connection after encryption failure");
        self.records.reset();
        self.inner.mark_corrupted();
        err
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let record = self.records.seal(data)?;
        debug!(plaintext = data.len(), record = record.len(), "sending sealed record");
        self.inner.send(&record).await
    }

    async fn read(&mut self) -> Result<Bytes> {
        // A socket greeted since the last read replaces whatever the old one left behind.
        let greeted = lock(&self.greeted).take();
        if let Some(records) = greeted {
            self.records = records;
        }

        loop {
            match self.records.drain() {
                Ok(plaintext) if !plaintext.is_empty() => return Ok(plaintext.freeze()),
                Ok(_) => {}
                Err(err) => return Err(self.corrupted(err)),
            }

            let ciphertext = match self.inner.read_available().await {
                Ok(ciphertext) => ciphertext,
                // The socket is gone, and with it the rest of any half received record.
                Err(err) if err.is_retryable() => {
                    self.records.reset();
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            self.records.pending.extend_from_slice(&ciphertext);
        }
    }
}

impl<T: Transport> Transport for Encrypted<T> {
    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        self.records.reset();
        self.inner.open()
    }

    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write(data))
    }

    fn read_available(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(self.read())
    }

    fn mark_corrupted(&mut self) {
        self.records.reset();
        lock(&self.greeted).take();
        self.inner.mark_corrupted();
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.records.reset();
        lock(&self.greeted).take();
        self.inner.close()
    }

    /// The handshake runs below this layer, on the raw socket, so it is wrapped to seal what
    /// it sends and open what it reads. Ciphertext that arrived behind the handshake reply is
    /// handed back to this layer for the next read.
    fn set_handshake(&mut self, handshake: Arc<dyn Handshake>) {
        self.inner.set_handshake(Arc::new(SealedHandshake {
            cipher: self.records.cipher.clone(),
            handshake,
            greeted: self.greeted.clone(),
        }));
    }
}

struct SealedHandshake {
    cipher: Aes256Gcm,
    handshake: Arc<dyn Handshake>,
    greeted: Greeted,
}

impl Handshake for SealedHandshake {
    fn greet<'a>(&'a self, wire: &'a mut dyn Wire) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut sealed = SealedWire {
                wire,
                records: Records::new(self.cipher.clone()),
            };
            self.handshake.greet(&mut sealed).await?;

            *lock(&self.greeted) = Some(sealed.records);
            Ok(())
        })
    }
}

struct SealedWire<'a> {
    wire: &'a mut dyn Wire,
    records: Records,
}

impl Wire for SealedWire<'_> {
    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let record = self.records.seal(data)?;
            self.wire.send(&record).await
        })
    }

    fn read_available(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            loop {
                let plaintext = self.records.drain()?;
                if !plaintext.is_empty() {
                    return Ok(plaintext.freeze());
                }

                let ciphertext = self.wire.read_available().await?;
                self.records.pending.extend_from_slice(&ciphertext);
            }
        })
    }
}
