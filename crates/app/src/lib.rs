//! An HTTP application server core built around a hook-driven request lifecycle.
//!
//! Every request to a route walks the same stages:
//!
//! ```text
//! onRequest hooks -> body parsing -> preHandler hooks -> handler
//!     -> serialization -> onSend hooks -> write -> onFinished hooks
//! ```
//!
//! Any stage may fail; failures run through one error pipeline that picks the
//! status, optionally hands over to a custom error handler and renders the
//! error. Applications nest: a sub-application inherits its parent's hooks,
//! body parsers and error handler and may add its own under a path prefix.
//!
//! ```no_run
//! use micro_app::{App, Server, get, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut app = App::builder();
//!     app.route("/", get(handler_fn(|_req, _res| Box::pin(async { Ok(Some("hello world".into())) }))))?;
//!
//!     Server::builder().app(app.finalize()?).address("127.0.0.1:3000").build()?.start().await?;
//!     Ok(())
//! }
//! ```

mod app;
mod body;
mod body_parser;
mod body_reader;
mod context;
mod error;
mod handler;
mod hooks;
mod inject;
mod lifecycle;
mod request;
mod response;
mod router;
mod serializer;
mod server;

pub use app::{App, AppBuilder, AppOptions, DEFAULT_BODY_LIMIT, Scope};
pub use body::{Finished, Outcome, ResponseBody};
pub use body_parser::{
    BodyParser, BodyParserRegistry, BodyParsers, ContentTypeMatcher, FnParser, JsonParser, ParserOptions, RequestBody,
    ResolvedParser, parser_fn,
};
pub use body_reader::{BodyStream, ParseAs, RawBody};
pub use context::{MethodClass, RouteConfig, RouteContext, SUPPORTED_METHODS};
pub use error::{AlreadySentError, BoxError, ConfigurationError, RequestError, error_status};
pub use handler::{ErrorHandler, FnErrorHandler, FnHandler, Handler, error_handler_fn, handler_fn};
pub use hooks::{FinishedHook, FnHook, FnSendHook, Hook, HookName, RequestHook, SendHook, hook_fn, send_hook_fn};
pub use inject::InjectedResponse;
pub use request::{PathParams, QueryMap, QueryParser, Request};
pub use response::{Payload, PayloadStream, Response, SerializedPayload};
pub use router::{RouteBuilder, all, delete, get, head, on, options, patch, post, put};
pub use serializer::{ResponseSerializers, SerializeFn, from_schema};
pub use server::{Server, ServerBuilder, ServerError, serve};
