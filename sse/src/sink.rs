use crate::error::Error;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Minimal capability the core needs from a transport: write bytes, signal close.
/// The registry and dispatcher never look past this trait.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, frame: &[u8]) -> Result<(), Error>;

    fn close(&self) -> Result<(), Error>;
}

/// Sink backed by an unbounded channel. Frames are delivered to the paired
/// `ClientStream` in write order.
pub struct ChannelSink {
    sender: Mutex<Option<UnboundedSender<Vec<u8>>>>,
}

impl ChannelSink {
    pub fn pair() -> (Self, ClientStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            ClientStream { receiver: rx },
        )
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn write(&self, frame: &[u8]) -> Result<(), Error> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx.send(frame.to_vec()).map_err(|_| Error::sink_closed()),
            None => Err(Error::sink_closed()),
        }
    }

    fn close(&self) -> Result<(), Error> {
        // Dropping the sender ends the paired stream once buffered frames drain
        match self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(_) => Ok(()),
            None => Err(Error::sink_closed()),
        }
    }
}

/// Receiving end of a `ChannelSink`, pumped by the transport layer.
#[derive(Debug)]
pub struct ClientStream {
    receiver: UnboundedReceiver<Vec<u8>>,
}

impl ClientStream {
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

impl Stream for ClientStream {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// In-memory sink recording every frame, with switchable failure modes.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemorySink {
    frames: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
    fail_close: AtomicBool,
    closed: AtomicBool,
}

#[cfg(test)]
impl MemorySink {
    pub(crate) fn failing() -> Self {
        let sink = Self::default();
        sink.set_fail_writes(true);
        sink
    }

    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, frame: &[u8]) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(Error::sink_closed());
        }
        self.frames
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(frame).into_owned());
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::sink_closed());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_preserves_write_order() {
        let (sink, mut stream) = ChannelSink::pair();
        sink.write(b"first").await.unwrap();
        sink.write(b"second").await.unwrap();

        assert_eq!(stream.recv().await.unwrap(), b"first".to_vec());
        assert_eq!(stream.recv().await.unwrap(), b"second".to_vec());
    }

    #[tokio::test]
    async fn test_close_ends_stream_and_rejects_writes() {
        let (sink, mut stream) = ChannelSink::pair();
        sink.write(b"buffered").await.unwrap();
        sink.close().unwrap();

        assert!(sink.write(b"late").await.is_err());
        assert_eq!(stream.recv().await.unwrap(), b"buffered".to_vec());
        assert!(stream.recv().await.is_none());
        // A second close reports the sink as already closed
        assert!(sink.close().is_err());
    }

    #[tokio::test]
    async fn test_write_fails_after_stream_dropped() {
        let (sink, stream) = ChannelSink::pair();
        drop(stream);
        assert!(sink.write(b"orphan").await.is_err());
    }
}
