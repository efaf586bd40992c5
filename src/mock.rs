//! An in-memory [`Transport`] for unit tests: records every write and replays scripted reads.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Poll, Waker};

use bytes::Bytes;
use futures::future::{self, BoxFuture};

use crate::connection::{Handshake, Transport, Wire};
use crate::error::{Error, Result};

#[derive(Default)]
struct State {
    writes: Vec<Bytes>,
    replies: VecDeque<io::Result<Bytes>>,
    // A read waiting for the next queued reply.
    reader: Option<Waker>,
    handshake: Option<Arc<dyn Handshake>>,
    opens: usize,
    corrupted: usize,
    closed: bool,
}

/// Clones share state, so a test can keep one handle while the code under test owns another.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn push_reply(&self, reply: io::Result<Bytes>) {
        let mut state = self.lock();
        state.replies.push_back(reply);
        if let Some(reader) = state.reader.take() {
            reader.wake();
        }
    }

    /// Queues bytes for a `read_available`, waking one that is already waiting.
    pub(crate) fn reply(&self, bytes: impl AsRef<[u8]>) -> &Self {
        self.push_reply(Ok(Bytes::copy_from_slice(bytes.as_ref())));
        self
    }

    pub(crate) fn fail_read(&self, kind: io::ErrorKind) -> &Self {
        self.push_reply(Err(io::Error::from(kind)));
        self
    }

    pub(crate) fn writes(&self) -> Vec<Bytes> {
        self.lock().writes.clone()
    }

    /// Writes rendered as text, for readable assertions.
    pub(crate) fn written(&self) -> Vec<String> {
        self.lock()
            .writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub(crate) fn opens(&self) -> usize {
        self.lock().opens
    }

    pub(crate) fn corrupted(&self) -> usize {
        self.lock().corrupted
    }

    pub(crate) fn closed(&self) -> bool {
        self.lock().closed
    }

    fn record_write(&self, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        state.writes.push(Bytes::copy_from_slice(data));
        Ok(())
    }

    /// Takes the next queued reply when polled, not when created, so a read dropped before
    /// it ran loses nothing.
    fn next_reply(&self) -> BoxFuture<'static, Result<Bytes>> {
        let state = self.state.clone();
        Box::pin(future::poll_fn(move |cx| {
            let mut state = lock(&state);
            match state.replies.pop_front() {
                Some(reply) => Poll::Ready(reply.map_err(Error::from)),
                None => {
                    state.reader = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
        }))
    }
}

/// The mock as seen by a handshake.
struct MockWire(MockTransport);

impl Wire for MockWire {
    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(future::ready(self.0.record_write(data)))
    }

    fn read_available(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        self.0.next_reply()
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        let handshake = {
            let mut state = self.lock();
            state.opens += 1;
            state.handshake.clone()
        };
        let mut wire = MockWire(self.clone());

        Box::pin(async move {
            match handshake {
                Some(handshake) => handshake.greet(&mut wire).await,
                None => Ok(()),
            }
        })
    }

    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(future::ready(self.record_write(data)))
    }

    fn read_available(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        self.next_reply()
    }

    fn mark_corrupted(&mut self) {
        self.lock().corrupted += 1;
    }

    fn is_connected(&self) -> bool {
        !self.lock().closed
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.lock().closed = true;
        Box::pin(future::ready(Ok(())))
    }

    fn set_handshake(&mut self, handshake: Arc<dyn Handshake>) {
        self.lock().handshake = Some(handshake);
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn dropped_read_leaves_the_reply_queued() {
        let mut mock = MockTransport::new();
        mock.reply(b"+OK\r\n");

        drop(mock.read_available());

        assert_eq!(
            mock.read_available().await.unwrap(),
            Bytes::from_static(b"+OK\r\n")
        );
    }

    #[tokio::test]
    async fn pending_read_is_woken_by_a_reply() {
        let mut reader = MockTransport::new();
        let mock = reader.clone();

        let mut read = reader.read_available();
        assert!((&mut read).now_or_never().is_none());

        mock.reply(b":1\r\n");

        assert_eq!(read.await.unwrap(), Bytes::from_static(b":1\r\n"));
    }
}
