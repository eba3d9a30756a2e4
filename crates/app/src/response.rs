//! The outgoing side of a request.
//!
//! A [`Response`] collects the status, the headers and at most one payload.
//! Sending only records the payload: the engine picks it up after the current
//! hook or handler returns, serializes it, runs the onSend hooks and writes it.

use crate::context::{RouteConfig, RouteContext};
use crate::error::{AlreadySentError, BoxError};
use crate::serializer;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use http::header::{AsHeaderName, CONTENT_TYPE, IntoHeaderName, LOCATION};
use http::{Extensions, HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;
use std::fmt;

/// A response body produced chunk by chunk.
pub type PayloadStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// What handlers, hooks and error handlers send.
pub enum Payload {
    /// Defaults to `text/plain`.
    Text(String),
    /// Defaults to `application/octet-stream`.
    Bytes(Bytes),
    /// Defaults to `application/json`, serialized with the route's serializer for the status.
    Json(serde_json::Value),
    /// Defaults to `application/octet-stream`, piped to the client.
    Stream(PayloadStream),
}

impl Payload {
    /// Converts any serializable value into a JSON payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::Json)
    }

    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Stream(stream.map_err(Into::into).boxed())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A payload after serialization: what onSend hooks see and the transport writes.
pub enum SerializedPayload {
    Text(String),
    Bytes(Bytes),
    Stream(PayloadStream),
}

impl SerializedPayload {
    /// The payload as text, `None` for bytes that are not utf8 and for streams.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            Self::Stream(_) => None,
        }
    }

    /// Byte length of a buffered payload.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Text(text) => Some(text.len()),
            Self::Bytes(bytes) => Some(bytes.len()),
            Self::Stream(_) => None,
        }
    }
}

impl From<String> for SerializedPayload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SerializedPayload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Bytes> for SerializedPayload {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl fmt::Debug for SerializedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// The response under construction, handed to every hook and handler.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    sent: bool,
    pending: Option<Payload>,
    custom_error_used: bool,
    ran_on_send: bool,
    route: triomphe::Arc<RouteContext>,
    extensions: Extensions,
}

impl Response {
    pub(crate) fn new(route: triomphe::Arc<RouteContext>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            sent: false,
            pending: None,
            custom_error_used: false,
            ran_on_send: false,
            route,
            extensions: Extensions::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: impl AsHeaderName) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// Sets a header, replacing any previous values.
    pub fn set_header(&mut self, name: impl IntoHeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds a header value, keeping the previous ones.
    pub fn append_header(&mut self, name: impl IntoHeaderName, value: HeaderValue) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    pub fn remove_header(&mut self, name: impl AsHeaderName) -> &mut Self {
        self.headers.remove(name);
        self
    }

    /// Sets the `Content-Type` header.
    pub fn set_type(&mut self, content_type: HeaderValue) -> &mut Self {
        self.set_header(CONTENT_TYPE, content_type)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok())
    }

    /// The configuration of the route serving this request.
    pub fn config(&self) -> &RouteConfig {
        &self.route.config
    }

    /// Whether a response has been sent for this request.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Sends `payload` as the response.
    ///
    /// # Panics
    ///
    /// When a response was already sent; use [`Response::try_send`] to handle that case.
    pub fn send(&mut self, payload: impl Into<Payload>) {
        self.commit(Some(payload.into()));
    }

    /// Sends the response without a body.
    ///
    /// # Panics
    ///
    /// When a response was already sent.
    pub fn send_empty(&mut self) {
        self.commit(None);
    }

    pub fn try_send(&mut self, payload: impl Into<Payload>) -> Result<(), AlreadySentError> {
        self.try_commit(Some(payload.into()))
    }

    /// Sends an empty response with `status` and a `Location` header.
    ///
    /// # Panics
    ///
    /// When a response was already sent.
    pub fn redirect(&mut self, status: StatusCode, location: HeaderValue) {
        self.status = status;
        self.headers.insert(LOCATION, location);
        self.commit(None);
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    fn commit(&mut self, payload: Option<Payload>) {
        if let Err(e) = self.try_commit(payload) {
            panic!("{e}");
        }
    }

    pub(crate) fn try_commit(&mut self, payload: Option<Payload>) -> Result<(), AlreadySentError> {
        if self.sent {
            return Err(AlreadySentError);
        }
        self.sent = true;
        self.pending = payload;
        Ok(())
    }

    pub(crate) fn take_pending(&mut self) -> Option<Payload> {
        self.pending.take()
    }

    /// Allows sending again, dropping whatever was sent before.
    pub(crate) fn reset_sent(&mut self) {
        self.sent = false;
        self.pending = None;
    }

    pub(crate) fn route(&self) -> &triomphe::Arc<RouteContext> {
        &self.route
    }

    pub(crate) fn set_route(&mut self, route: triomphe::Arc<RouteContext>) {
        self.route = route;
    }

    /// Marks the custom error handler as used, returning whether it was still available.
    pub(crate) fn use_custom_error(&mut self) -> bool {
        !std::mem::replace(&mut self.custom_error_used, true)
    }

    /// Marks the onSend hooks as run, returning whether they still had to run.
    pub(crate) fn use_on_send(&mut self) -> bool {
        !std::mem::replace(&mut self.ran_on_send, true)
    }

    pub(crate) fn into_parts(self) -> (StatusCode, HeaderMap, Extensions) {
        (self.status, self.headers, self.extensions)
    }

    /// Fills in the default `Content-Type` and serializes JSON payloads.
    pub(crate) fn serialize(
        &mut self,
        payload: Option<Payload>,
    ) -> Result<Option<SerializedPayload>, serde_json::Error> {
        let Some(payload) = payload else {
            return Ok(None);
        };

        let default_type = match &payload {
            Payload::Text(_) => "text/plain",
            Payload::Bytes(_) | Payload::Stream(_) => "application/octet-stream",
            Payload::Json(_) => "application/json",
        };
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(default_type));
        }

        Ok(Some(match payload {
            Payload::Text(text) => SerializedPayload::Text(text),
            Payload::Bytes(bytes) => SerializedPayload::Bytes(bytes),
            Payload::Stream(stream) => SerializedPayload::Stream(stream),
            Payload::Json(value) => {
                SerializedPayload::Text(serializer::serialize(self.route.serializers.as_ref(), self.status, &value)?)
            }
        }))
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("sent", &self.sent)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
