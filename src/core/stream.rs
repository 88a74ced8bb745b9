//! Stream bridge between push-style chunk producers and pull-style byte streams.
//!
//! The two server models disagree on how bodies move. A socket server emits
//! request chunks as they arrive and expects response chunks to be written into
//! a mutable sink; a Request-object runtime hands out bodies as async sequences
//! that the consumer pulls. Everything in between (the `Request`, the
//! `Response` and the handler chain) only sees [`ByteStream`].
//!
//! * Forward (push -> pull): [`push_channel`] returns a [`PushSender`] for the
//!   producer and a [`ByteStream`] for the consumer. The channel is bounded, so
//!   `send` waits while the consumer is behind.
//! * Reverse (pull -> push): [`pipe`] drives a [`ByteStream`] into a
//!   [`ChunkSink`], awaiting each write before polling the next chunk.
//!
//! Chunks are moved as [`Bytes`]; text chunks are converted once with no
//! re-encoding, so binary payloads survive byte-for-byte.
use async_trait::async_trait;
use axum::body::Body as AxumBody;
use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, TryStreamExt, stream::BoxStream};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Boxed error type accepted from native bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pull-style body: an async sequence of byte chunks, readable once.
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

/// Errors raised while moving body chunks between the two models
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StreamError {
    /// The peer went away before the body was complete
    #[error("connection closed before the body was complete")]
    ConnectionClosed,

    /// Underlying transport failure
    #[error("stream I/O error: {0}")]
    Io(String),

    /// The receiving side of a bridge was dropped
    #[error("stream sink closed")]
    SinkClosed,

    /// The body grew past the configured limit
    #[error("body exceeds the limit of {limit} bytes")]
    TooLarge { limit: usize },
}

impl StreamError {
    /// Classify an error coming out of a native body.
    pub fn from_native(err: impl Into<BoxError>) -> Self {
        let err = err.into();
        let root: &(dyn std::error::Error + 'static) = &*err;
        let mut cause = Some(root);
        while let Some(current) = cause {
            if Self::is_disconnect(current) {
                return Self::ConnectionClosed;
            }
            cause = current.source();
        }
        Self::Io(err.to_string())
    }

    fn is_disconnect(err: &(dyn std::error::Error + 'static)) -> bool {
        if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
            return hyper_err.is_incomplete_message()
                || hyper_err.is_canceled()
                || hyper_err.is_closed();
        }
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return matches!(
                io_err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            );
        }
        false
    }
}

/// A single body chunk as handed over by a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Text(String),
    Binary(Bytes),
}

impl Chunk {
    pub fn len(&self) -> usize {
        match self {
            Chunk::Text(text) => text.len(),
            Chunk::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Chunk> for Bytes {
    fn from(chunk: Chunk) -> Self {
        match chunk {
            Chunk::Text(text) => Bytes::from(text),
            Chunk::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk::Text(text)
    }
}

impl From<&'static str> for Chunk {
    fn from(text: &'static str) -> Self {
        Chunk::Binary(Bytes::from_static(text.as_bytes()))
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Chunk::Binary(bytes)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk::Binary(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(bytes: &'static [u8]) -> Self {
        Chunk::Binary(Bytes::from_static(bytes))
    }
}

/// A stream that ends immediately.
pub fn empty() -> ByteStream {
    futures_util::stream::empty().boxed()
}

/// A stream with a single chunk, or none when `bytes` is empty.
pub fn once(bytes: impl Into<Bytes>) -> ByteStream {
    let bytes = bytes.into();
    if bytes.is_empty() {
        return empty();
    }
    futures_util::stream::once(async move { Ok(bytes) }).boxed()
}

/// Build a stream from already available chunks.
pub fn from_chunks<I>(chunks: I) -> ByteStream
where
    I: IntoIterator,
    I::Item: Into<Chunk>,
    I::IntoIter: Send + 'static,
{
    futures_util::stream::iter(chunks)
        .map(|chunk| Ok::<_, StreamError>(Bytes::from(chunk.into())))
        .try_filter(|bytes| futures_util::future::ready(!bytes.is_empty()))
        .boxed()
}

/// Adapt a native pull body (hyper `Incoming`, axum `Body`, ...) into a [`ByteStream`].
///
/// Trailers and other non-data frames are skipped.
pub fn from_body<B>(body: B) -> ByteStream
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    http_body_util::BodyStream::new(body)
        .map_err(StreamError::from_native)
        .try_filter_map(|frame| async move {
            Ok::<_, StreamError>(frame.into_data().ok().filter(|data| !data.is_empty()))
        })
        .boxed()
}

/// Hand a [`ByteStream`] to hyper. Hyper only polls when the connection can
/// take more data.
pub fn into_body(stream: ByteStream) -> AxumBody {
    AxumBody::from_stream(stream)
}

/// Read a whole stream into memory, failing once more than `limit` bytes arrive.
pub async fn collect(mut stream: ByteStream, limit: usize) -> Result<Bytes, StreamError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buffer.len() + chunk.len() > limit {
            return Err(StreamError::TooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// Producer half of a forward bridge.
#[derive(Debug, Clone)]
pub struct PushSender {
    tx: mpsc::Sender<Result<Bytes, StreamError>>,
}

/// Create a bounded push -> pull bridge.
///
/// `capacity` is the number of chunks that may wait for the consumer; a value
/// of zero is treated as one.
pub fn push_channel(capacity: usize) -> (PushSender, ByteStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PushSender { tx }, ReceiverStream::new(rx).boxed())
}

impl PushSender {
    /// Emit a chunk, waiting while the channel is full.
    ///
    /// Empty chunks are dropped.
    pub async fn send(&self, chunk: impl Into<Chunk>) -> Result<(), StreamError> {
        let bytes = Bytes::from(chunk.into());
        if bytes.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Ok(bytes))
            .await
            .map_err(|_| StreamError::SinkClosed)
    }

    /// Terminate the stream with an error seen by the consumer.
    pub async fn fail(self, err: StreamError) {
        if self.tx.send(Err(err)).await.is_err() {
            tracing::trace!("bridge consumer gone before the error could be delivered");
        }
    }

    /// Signal end of input.
    pub fn end(self) {}

    /// True once the consumer has dropped its stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Push-style destination for response chunks.
#[async_trait]
pub trait ChunkSink: Send {
    /// Accept one chunk. The bridge does not pull the next chunk until this resolves.
    async fn write(&mut self, chunk: Bytes) -> Result<(), StreamError>;

    /// Called once after the last chunk.
    async fn close(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    /// Called when the source failed mid-transfer.
    async fn abort(&mut self, _err: &StreamError) {}
}

#[async_trait]
impl ChunkSink for PushSender {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StreamError> {
        self.send(chunk).await
    }

    async fn abort(&mut self, err: &StreamError) {
        if self.tx.send(Err(err.clone())).await.is_err() {
            tracing::trace!("bridge consumer gone before abort");
        }
    }
}

#[async_trait]
impl ChunkSink for Vec<Bytes> {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StreamError> {
        self.push(chunk);
        Ok(())
    }
}

/// Drive `stream` into `sink` with backpressure. Returns the number of bytes written.
///
/// A source error is reported to the sink through [`ChunkSink::abort`]; a sink
/// error stops pulling. In both cases the source is dropped.
pub async fn pipe<S>(mut stream: ByteStream, sink: &mut S) -> Result<u64, StreamError>
where
    S: ChunkSink + ?Sized,
{
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                sink.abort(&err).await;
                return Err(err);
            }
        };
        if chunk.is_empty() {
            continue;
        }
        let len = chunk.len() as u64;
        sink.write(chunk).await?;
        written += len;
    }
    sink.close().await?;
    Ok(written)
}
