use crate::error::BoxError;
use crate::request::Request;
use crate::response::{Payload, Response};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;

/// A route handler.
///
/// Returning `Ok(Some(payload))` sends the payload; a handler may instead call
/// [`Response::send`] itself and return `Ok(None)`. A handler that does neither
/// produces an empty `200 OK`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, req: &mut Request, res: &mut Response) -> Result<Option<Payload>, BoxError>;
}

/// Replaces the generic `{statusCode, error, message}` error response.
///
/// Runs at most once per request: an error it returns is rendered with the
/// generic response.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn call(&self, error: BoxError, req: &mut Request, res: &mut Response) -> Result<Option<Payload>, BoxError>;
}

/// a closure holder which implements [`Handler`]
pub struct FnHandler<F> {
    f: F,
}

/// Adapts a closure into a [`Handler`].
///
/// ```
/// use micro_app::handler_fn;
///
/// let hello = handler_fn(|req, _res| Box::pin(async move {
///     Ok(Some(format!("hello {}", req.path()).into()))
/// }));
/// # let _ = hello;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<Option<Payload>, BoxError>> + Send + Sync,
{
    FnHandler { f }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<Option<Payload>, BoxError>> + Send + Sync,
{
    async fn call(&self, req: &mut Request, res: &mut Response) -> Result<Option<Payload>, BoxError> {
        (self.f)(req, res).await
    }
}

/// a closure holder which implements [`ErrorHandler`]
pub struct FnErrorHandler<F> {
    f: F,
}

/// Adapts a closure into an [`ErrorHandler`].
pub fn error_handler_fn<F>(f: F) -> FnErrorHandler<F>
where
    F: for<'a> Fn(BoxError, &'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<Option<Payload>, BoxError>>
        + Send
        + Sync,
{
    FnErrorHandler { f }
}

impl<F> fmt::Debug for FnErrorHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnErrorHandler")
    }
}

#[async_trait]
impl<F> ErrorHandler for FnErrorHandler<F>
where
    F: for<'a> Fn(BoxError, &'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<Option<Payload>, BoxError>>
        + Send
        + Sync,
{
    async fn call(&self, error: BoxError, req: &mut Request, res: &mut Response) -> Result<Option<Payload>, BoxError> {
        (self.f)(error, req, res).await
    }
}

/// Sends `Not Found: <METHOD> <URL>` as plain text.
#[derive(Debug)]
pub(crate) struct DefaultNotFound;

#[async_trait]
impl Handler for DefaultNotFound {
    async fn call(&self, req: &mut Request, res: &mut Response) -> Result<Option<Payload>, BoxError> {
        res.set_status(http::StatusCode::NOT_FOUND);
        Ok(Some(not_found_message(req).into()))
    }
}

pub(crate) fn not_found_message(req: &Request) -> String {
    format!("Not Found: {} {}", req.method(), req.url())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::bare_context;
    use crate::request::PathParams;

    fn assert_is_handler<T: Handler>(_handler: &T) {
        // no op
    }

    fn assert_is_error_handler<T: ErrorHandler>(_handler: &T) {
        // no op
    }

    fn request(uri: &str) -> Request {
        let (parts, ()) = http::Request::builder().method("DELETE").uri(uri).body(()).unwrap().into_parts();
        Request::new(parts, PathParams::empty(), None, false)
    }

    #[test]
    fn closures_are_handlers() {
        let handler = handler_fn(|_req, res| {
            Box::pin(async move {
                res.send("sent");
                Ok(None)
            })
        });
        assert_is_handler(&handler);

        let error_handler = error_handler_fn(|error, _req, _res| Box::pin(async move { Err(error) }));
        assert_is_error_handler(&error_handler);

        assert_eq!(format!("{handler:?}"), "FnHandler");
        assert_eq!(format!("{error_handler:?}"), "FnErrorHandler");
    }

    #[tokio::test]
    async fn handler_fn_returns_the_payload() {
        let handler = handler_fn(|req, _res| Box::pin(async move { Ok(Some(req.path().to_owned().into())) }));
        let mut req = request("/echo");
        let mut res = Response::new(bare_context());

        let payload = handler.call(&mut req, &mut res).await.unwrap();
        assert!(matches!(payload, Some(Payload::Text(text)) if text == "/echo"));
    }

    #[tokio::test]
    async fn default_not_found() {
        let mut req = request("/missing?x=1");
        let mut res = Response::new(bare_context());

        let payload = DefaultNotFound.call(&mut req, &mut res).await.unwrap();
        assert_eq!(res.status(), http::StatusCode::NOT_FOUND);
        assert!(matches!(payload, Some(Payload::Text(text)) if text == "Not Found: DELETE /missing?x=1"));
    }
}
