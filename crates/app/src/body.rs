use crate::context::RouteContext;
use crate::error::BoxError;
use crate::request::Request;
use crate::response::PayloadStream;
use bytes::Bytes;
use futures::Stream;
use http::{Extensions, HeaderMap, StatusCode};
use http_body::Body as HttpBody;
use http_body::{Frame, SizeHint};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tracing::trace;

/// How a response ended, as seen by onFinished hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every byte of the body was handed to the transport.
    Completed,
    /// The body was dropped early: the client went away or the payload stream failed.
    Aborted,
}

/// A read-only snapshot of a finished request, handed to onFinished hooks.
pub struct Finished {
    request: Request,
    status: StatusCode,
    headers: HeaderMap,
    extensions: Extensions,
    outcome: Outcome,
}

impl Finished {
    pub(crate) fn new(request: Request, status: StatusCode, headers: HeaderMap, extensions: Extensions) -> Self {
        Self { request, status, headers, extensions, outcome: Outcome::Aborted }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The response extensions, as left by the hooks and the handler.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }
}

impl fmt::Debug for Finished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finished")
            .field("method", self.request.method())
            .field("url", &self.request.url())
            .field("status", &self.status)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

/// Runs the onFinished hooks of a route once the body is done with.
pub(crate) struct FinishNotifier {
    route: triomphe::Arc<RouteContext>,
    finished: Finished,
}

impl FinishNotifier {
    pub(crate) fn new(route: triomphe::Arc<RouteContext>, finished: Finished) -> Self {
        Self { route, finished }
    }

    fn notify(mut self, outcome: Outcome) {
        self.finished.outcome = outcome;
        trace!(?outcome, status = %self.finished.status, "response finished");
        if let Some(hooks) = &self.route.on_finished {
            for hook in hooks.iter() {
                hook.on_finished(&self.finished);
            }
        }
    }
}

/// The body of every response the application produces.
///
/// When the response has onFinished hooks they run when the body is dropped,
/// which the transport does once it wrote the last frame or gave up on the
/// connection.
pub struct ResponseBody {
    inner: Kind,
    notifier: Option<FinishNotifier>,
}

enum Kind {
    Once(Option<Bytes>),
    Stream { first: Option<Bytes>, rest: PayloadStream, state: StreamState },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    Done,
    Failed,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: Kind::Once(None), notifier: None }
    }

    pub fn once(bytes: Bytes) -> Self {
        if bytes.is_empty() { Self::empty() } else { Self { inner: Kind::Once(Some(bytes)), notifier: None } }
    }

    /// A streaming body whose first chunk was already read.
    pub(crate) fn stream(first: Option<Bytes>, rest: PayloadStream) -> Self {
        Self { inner: Kind::Stream { first, rest, state: StreamState::Streaming }, notifier: None }
    }

    pub(crate) fn with_notifier(mut self, notifier: Option<FinishNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    fn completed(&self) -> bool {
        match &self.inner {
            Kind::Once(bytes) => bytes.is_none(),
            Kind::Stream { state, .. } => *state == StreamState::Done,
        }
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::once(Bytes::from(value))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::once(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        Self::once(value)
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().inner {
            Kind::Once(bytes) => Poll::Ready(bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            Kind::Stream { state: StreamState::Done | StreamState::Failed, .. } => Poll::Ready(None),
            Kind::Stream { first, rest, state } => {
                if let Some(bytes) = first.take() {
                    return Poll::Ready(Some(Ok(Frame::data(bytes))));
                }
                match ready!(Pin::new(rest).poll_next(cx)) {
                    Some(Ok(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    Some(Err(e)) => {
                        *state = StreamState::Failed;
                        Poll::Ready(Some(Err(e)))
                    }
                    None => {
                        *state = StreamState::Done;
                        Poll::Ready(None)
                    }
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Kind::Once(bytes) => bytes.is_none(),
            Kind::Stream { state, .. } => *state != StreamState::Streaming,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Once(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Stream { .. } => SizeHint::default(),
        }
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.take() {
            let outcome = if self.completed() { Outcome::Completed } else { Outcome::Aborted };
            notifier.notify(outcome);
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            Kind::Once(_) => "Once",
            Kind::Stream { .. } => "Stream",
        };
        f.debug_struct("ResponseBody")
            .field("kind", &kind)
            .field("size_hint", &self.size_hint())
            .field("notify", &self.notifier.is_some())
            .finish()
    }
}
