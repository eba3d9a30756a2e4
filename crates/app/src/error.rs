//! Error types used across the request lifecycle.
//!
//! There are three families of errors:
//!
//! - [`ConfigurationError`]: raised while an application is being assembled
//!   (registering routes, hooks, body parsers) or finalized. These never occur
//!   while requests are being served.
//! - [`RequestError`]: request-time failures with a well-defined HTTP status.
//!   User code may return them (boxed into a [`BoxError`]) to choose the status
//!   of the error response.
//! - [`AlreadySentError`]: a programming defect, sending twice. It is never
//!   converted into a response.

use http::StatusCode;
use std::error::Error as StdError;
use thiserror::Error;

/// The error type returned by hooks, handlers, body parsers and error handlers.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Names accepted by [`crate::Scope::add_hook`], in lifecycle order.
pub(crate) const VALID_HOOK_NAMES: &str = "'onRequest', 'preHandler', 'onSend', 'onResponse', 'onFinished'";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("the content type must be a string and cannot be empty")]
    EmptyContentType,

    #[error("body parser for content type '{matcher}' already present")]
    DuplicateParser { matcher: String },

    #[error(
        "received the 'body_limit' option without the 'parse_as' option, \
         the 'body_limit' option has no effect without the 'parse_as' option"
    )]
    LimitWithoutParseAs,

    #[error("'body_limit' option must be an integer > 0, got '{limit}'")]
    InvalidBodyLimit { limit: usize },

    #[error("'{name}' is not a valid hook name. Valid hooks are: {valid}", valid = VALID_HOOK_NAMES)]
    InvalidHookName { name: String },

    #[error("the callback given for the '{name}' hook does not have the '{name}' signature")]
    HookKindMismatch { name: &'static str },

    #[error("{method} method is not supported!")]
    UnsupportedMethod { method: String },

    #[error("'prefix' must start with a '/' character. Got: '{prefix}'")]
    InvalidPrefix { prefix: String },

    #[error("not found handler already set for app instance with prefix: '{prefix}'")]
    DuplicateNotFoundHandler { prefix: String },

    #[error("method '{method}' is already declared for route '{path}'")]
    DuplicateRoute { method: String, path: String },

    #[error("failed to register route '{path}': {source}")]
    Route {
        path: String,
        #[source]
        source: matchit::InsertError,
    },
}

impl ConfigurationError {
    pub(crate) fn check_body_limit(limit: usize) -> Result<usize, Self> {
        if limit == 0 { Err(Self::InvalidBodyLimit { limit }) } else { Ok(limit) }
    }
}

/// Request-time errors, each with a fixed HTTP status.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{message}")]
    BadRequest { message: String },

    #[error("Invalid Content-Length: \"{value}\"")]
    InvalidContentLength { value: String },

    #[error("Request body size did not match Content-Length: expected {expected} bytes, received {received} bytes")]
    BodyLengthMismatch { expected: u64, received: u64 },

    #[error("request body stream error: {source}")]
    BodyStream {
        #[source]
        source: BoxError,
    },

    /// A body parser failed without choosing a status of its own.
    #[error("{source}")]
    InvalidBody {
        #[source]
        source: BoxError,
    },

    #[error("Request body is too large")]
    PayloadTooLarge,

    #[error("Unsupported Media Type: {content_type}")]
    UnsupportedMediaType { content_type: String },

    #[error("Not Found")]
    NotFound,

    #[error("{message}")]
    Status { status: StatusCode, message: String },
}

impl RequestError {
    pub fn bad_request<S: ToString>(message: S) -> Self {
        Self::BadRequest { message: message.to_string() }
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// An error that carries its own status, e.g. `403 Forbidden` from an auth hook.
    pub fn with_status<S: ToString>(status: StatusCode, message: S) -> Self {
        Self::Status { status, message: message.to_string() }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. }
            | Self::InvalidContentLength { .. }
            | Self::BodyLengthMismatch { .. }
            | Self::BodyStream { .. }
            | Self::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Status { status, .. } => *status,
        }
    }
}

/// Resolves the status of an error response.
///
/// Only a [`RequestError`] carries a status, found on the error itself or
/// anywhere down its `source()` chain. It is honored when it is an error
/// status (`400..=599`). Anything else is an `500 Internal Server Error`.
pub fn error_status(error: &(dyn StdError + Send + Sync + 'static)) -> StatusCode {
    let error: &(dyn StdError + 'static) = error;
    std::iter::successors(Some(error), |&e| e.source())
        .find_map(|e| e.downcast_ref::<RequestError>())
        .map(RequestError::status)
        .filter(|status| status.is_client_error() || status.is_server_error())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Returned by [`crate::Response::try_send`] when a response was already sent.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cannot send a response when a response has already been sent")]
pub struct AlreadySentError;
