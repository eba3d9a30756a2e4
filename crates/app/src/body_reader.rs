//! Streaming access to the request body and the bounded buffering reader.
//!
//! [`BodyStream`] wraps whatever body the transport hands us. [`read_body`]
//! drains it into memory while enforcing the byte limit and the declared
//! `Content-Length`; raw-stream parsers receive the [`BodyStream`] untouched.

use crate::error::{BoxError, RequestError};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use http_body::{Body as HttpBody, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tracing::trace;

/// The raw request body as a stream of data chunks.
///
/// Trailers are skipped. An error item means the client went away or the
/// transport failed mid-body.
pub struct BodyStream {
    inner: UnsyncBoxBody<Bytes, BoxError>,
}

impl BodyStream {
    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self { inner: body.map_err(Into::into).boxed_unsync() }
    }

    pub fn empty() -> Self {
        Self::new(Empty::<Bytes>::new())
    }

    /// Reads the next data chunk, `None` at the end of the body.
    pub async fn chunk(&mut self) -> Option<Result<Bytes, BoxError>> {
        loop {
            match self.inner.frame().await? {
                Ok(frame) => match frame.into_data() {
                    Ok(data) => return Some(Ok(data)),
                    Err(_trailers) => {}
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }

    pub fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            return match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => Poll::Ready(Some(Ok(data))),
                    Err(_trailers) => continue,
                },
                Some(Err(e)) => Poll::Ready(Some(Err(e))),
                None => Poll::Ready(None),
            };
        }
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream").field("size_hint", &self.inner.size_hint()).finish_non_exhaustive()
    }
}

/// What a body parser receives: the assembled body, or the stream itself.
#[derive(Debug)]
pub enum RawBody {
    Text(String),
    Bytes(Bytes),
    Stream(BodyStream),
}

/// How a buffered parser wants its body assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseAs {
    String,
    Buffer,
}

/// Buffers the whole body, failing as soon as more than `limit` bytes arrive.
///
/// `declared_length` is the request's `Content-Length`, `None` for chunked
/// transfer. A declared length above the limit fails before reading anything;
/// a received length that differs from the declared one fails at the end.
pub(crate) async fn read_body(
    stream: &mut BodyStream,
    parse_as: ParseAs,
    declared_length: Option<u64>,
    limit: usize,
) -> Result<RawBody, RequestError> {
    if declared_length.is_some_and(|length| length > limit as u64) {
        return Err(RequestError::PayloadTooLarge);
    }

    let mut buf = BytesMut::with_capacity(declared_length.map_or(0, |length| length as usize));
    let mut received: usize = 0;

    while let Some(chunk) = stream.chunk().await {
        let chunk = chunk.map_err(|source| RequestError::BodyStream { source })?;

        received += chunk.len();
        if received > limit {
            trace!(received, limit, "request body exceeds the limit");
            return Err(RequestError::PayloadTooLarge);
        }

        buf.extend_from_slice(&chunk);
    }

    if let Some(expected) = declared_length {
        if expected != received as u64 {
            return Err(RequestError::BodyLengthMismatch { expected, received: received as u64 });
        }
    }

    let bytes = buf.freeze();
    match parse_as {
        ParseAs::Buffer => Ok(RawBody::Bytes(bytes)),
        ParseAs::String => match String::from_utf8(bytes.into()) {
            Ok(text) => Ok(RawBody::Text(text)),
            Err(_) => Err(RequestError::bad_request("request body is not utf8")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use http_body::Frame;
    use http_body_util::{Full, StreamBody};
    use std::io;

    fn chunked(chunks: Vec<Result<&'static str, io::Error>>) -> BodyStream {
        let frames = chunks.into_iter().map(|chunk| chunk.map(|s| Frame::data(Bytes::from_static(s.as_bytes()))));
        BodyStream::new(StreamBody::new(futures::stream::iter(frames)))
    }

    #[tokio::test]
    async fn reads_text_within_limit() {
        let mut stream = BodyStream::new(Full::new(Bytes::from("hello")));
        let body = read_body(&mut stream, ParseAs::String, Some(5), 5).await.unwrap();
        assert!(matches!(body, RawBody::Text(text) if text == "hello"));
    }

    #[tokio::test]
    async fn one_byte_over_the_limit_fails() {
        let mut stream = chunked(vec![Ok("abc"), Ok("def")]);
        let err = read_body(&mut stream, ParseAs::Buffer, None, 5).await.unwrap_err();
        assert!(matches!(err, RequestError::PayloadTooLarge));
    }

    #[tokio::test]
    async fn declared_length_over_the_limit_fails_before_reading() {
        let mut stream = BodyStream::new(Full::new(Bytes::from("hello")));
        let err = read_body(&mut stream, ParseAs::Buffer, Some(6), 5).await.unwrap_err();
        assert!(matches!(err, RequestError::PayloadTooLarge));
        // nothing was consumed
        assert_eq!(stream.chunk().await.unwrap().unwrap(), Bytes::from("hello"));
    }

    #[tokio::test]
    async fn length_mismatch_in_both_directions() {
        let mut short = BodyStream::new(Full::new(Bytes::from("abc")));
        let err = read_body(&mut short, ParseAs::Buffer, Some(4), 100).await.unwrap_err();
        assert!(matches!(err, RequestError::BodyLengthMismatch { expected: 4, received: 3 }));

        let mut long = BodyStream::new(Full::new(Bytes::from("abcde")));
        let err = read_body(&mut long, ParseAs::Buffer, Some(4), 100).await.unwrap_err();
        assert!(matches!(err, RequestError::BodyLengthMismatch { expected: 4, received: 5 }));
    }

    #[tokio::test]
    async fn stream_error_is_a_body_stream_error() {
        let mut stream = chunked(vec![Ok("abc"), Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))]);
        let err = read_body(&mut stream, ParseAs::Buffer, None, 100).await.unwrap_err();
        assert!(matches!(err, RequestError::BodyStream { .. }));
        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_bad_request() {
        let mut stream = BodyStream::new(Full::new(Bytes::from_static(&[0xff, 0xfe])));
        let err = read_body(&mut stream, ParseAs::String, None, 100).await.unwrap_err();
        assert!(matches!(err, RequestError::BadRequest { .. }));
    }

    #[tokio::test]
    async fn stream_yields_chunks_in_order() {
        let stream = chunked(vec![Ok("a"), Ok("b"), Ok("c")]);
        let chunks: Vec<_> = stream.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(chunks, vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
    }
}
