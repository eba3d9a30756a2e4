//! Lifecycle hooks and the runners that drive them.
//!
//! | stage        | trait           | may send | may transform the payload |
//! |--------------|-----------------|----------|---------------------------|
//! | onRequest    | [`RequestHook`] | yes      | -                         |
//! | preHandler   | [`RequestHook`] | yes      | -                         |
//! | onSend       | [`SendHook`]    | no       | yes                       |
//! | onFinished   | [`FinishedHook`]| no       | no, read-only             |
//!
//! A request hook that sends a response skips every hook left in its own
//! stage and every later stage up to onSend.

use crate::body::Finished;
use crate::error::{BoxError, ConfigurationError};
use crate::request::Request;
use crate::response::{Response, SerializedPayload};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

/// A hook of the onRequest or preHandler stage.
#[async_trait]
pub trait RequestHook: Send + Sync {
    async fn call(&self, req: &mut Request, res: &mut Response) -> Result<(), BoxError>;
}

/// A hook of the onSend stage; it receives the serialized payload and returns
/// the one to write, `None` suppressing the body.
#[async_trait]
pub trait SendHook: Send + Sync {
    async fn call(
        &self,
        req: &mut Request,
        res: &mut Response,
        payload: Option<SerializedPayload>,
    ) -> Result<Option<SerializedPayload>, BoxError>;
}

/// Observes a finished request.
pub trait FinishedHook: Send + Sync {
    fn on_finished(&self, finished: &Finished);
}

impl<F> FinishedHook for F
where
    F: Fn(&Finished) + Send + Sync,
{
    fn on_finished(&self, finished: &Finished) {
        self(finished)
    }
}

/// a closure holder which implements [`RequestHook`]
pub struct FnHook<F> {
    f: F,
}

/// Adapts a closure into a [`RequestHook`].
pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync,
{
    FnHook { f }
}

impl<F> fmt::Debug for FnHook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHook")
    }
}

#[async_trait]
impl<F> RequestHook for FnHook<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync,
{
    async fn call(&self, req: &mut Request, res: &mut Response) -> Result<(), BoxError> {
        (self.f)(req, res).await
    }
}

/// a closure holder which implements [`SendHook`]
pub struct FnSendHook<F> {
    f: F,
}

/// Adapts a closure into a [`SendHook`].
pub fn send_hook_fn<F>(f: F) -> FnSendHook<F>
where
    F: for<'a> Fn(
            &'a mut Request,
            &'a mut Response,
            Option<SerializedPayload>,
        ) -> BoxFuture<'a, Result<Option<SerializedPayload>, BoxError>>
        + Send
        + Sync,
{
    FnSendHook { f }
}

impl<F> fmt::Debug for FnSendHook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSendHook")
    }
}

#[async_trait]
impl<F> SendHook for FnSendHook<F>
where
    F: for<'a> Fn(
            &'a mut Request,
            &'a mut Response,
            Option<SerializedPayload>,
        ) -> BoxFuture<'a, Result<Option<SerializedPayload>, BoxError>>
        + Send
        + Sync,
{
    async fn call(
        &self,
        req: &mut Request,
        res: &mut Response,
        payload: Option<SerializedPayload>,
    ) -> Result<Option<SerializedPayload>, BoxError> {
        (self.f)(req, res, payload).await
    }
}

/// The hook names accepted by [`crate::Scope::add_hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookName {
    OnRequest,
    PreHandler,
    OnSend,
    /// `onResponse` is accepted as another name for `onFinished`.
    OnFinished,
}

impl HookName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnRequest => "onRequest",
            Self::PreHandler => "preHandler",
            Self::OnSend => "onSend",
            Self::OnFinished => "onFinished",
        }
    }
}

impl FromStr for HookName {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onRequest" => Ok(Self::OnRequest),
            "preHandler" => Ok(Self::PreHandler),
            "onSend" => Ok(Self::OnSend),
            "onResponse" | "onFinished" => Ok(Self::OnFinished),
            _ => Err(ConfigurationError::InvalidHookName { name: s.to_owned() }),
        }
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hook of any stage, for registration by name.
#[derive(Clone)]
pub enum Hook {
    Request(Arc<dyn RequestHook>),
    Send(Arc<dyn SendHook>),
    Finished(Arc<dyn FinishedHook>),
}

impl Hook {
    pub fn request<H: RequestHook + 'static>(hook: H) -> Self {
        Self::Request(Arc::new(hook))
    }

    pub fn send<H: SendHook + 'static>(hook: H) -> Self {
        Self::Send(Arc::new(hook))
    }

    pub fn finished<H: FinishedHook + 'static>(hook: H) -> Self {
        Self::Finished(Arc::new(hook))
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(_) => f.write_str("Hook::Request"),
            Self::Send(_) => f.write_str("Hook::Send"),
            Self::Finished(_) => f.write_str("Hook::Finished"),
        }
    }
}

/// Runs request hooks in order, stopping at the first error or once one of
/// them sends a response.
pub(crate) async fn run_request_hooks(
    stage: HookName,
    hooks: &[Arc<dyn RequestHook>],
    req: &mut Request,
    res: &mut Response,
) -> Result<(), BoxError> {
    for (index, hook) in hooks.iter().enumerate() {
        if res.is_sent() {
            break;
        }
        trace!(%stage, index, "run hook");
        hook.call(req, res).await?;
    }
    Ok(())
}

/// Threads the payload through every onSend hook.
pub(crate) async fn run_send_hooks(
    hooks: &[Arc<dyn SendHook>],
    req: &mut Request,
    res: &mut Response,
    mut payload: Option<SerializedPayload>,
) -> Result<Option<SerializedPayload>, BoxError> {
    for (index, hook) in hooks.iter().enumerate() {
        trace!(stage = %HookName::OnSend, index, "run hook");
        payload = hook.call(req, res, payload).await?;
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::bare_context;
    use crate::request::PathParams;
    use http::HeaderValue;

    fn request() -> Request {
        let (parts, ()) = http::Request::builder().uri("/").body(()).unwrap().into_parts();
        Request::new(parts, PathParams::empty(), None, false)
    }

    fn tag(value: &'static str) -> Arc<dyn RequestHook> {
        Arc::new(hook_fn(move |_req, res| {
            Box::pin(async move {
                res.append_header("x-order", HeaderValue::from_static(value));
                Ok(())
            })
        }))
    }

    #[test]
    fn closure_hooks_are_debug() {
        let hook = hook_fn(|_req, _res| Box::pin(async { Ok(()) }));
        let send_hook = send_hook_fn(|_req, _res, payload| Box::pin(async move { Ok(payload) }));

        assert_eq!(format!("{hook:?}"), "FnHook");
        assert_eq!(format!("{send_hook:?}"), "FnSendHook");
    }

    #[test]
    fn parses_hook_names() {
        assert_eq!("onRequest".parse::<HookName>().unwrap(), HookName::OnRequest);
        assert_eq!("onResponse".parse::<HookName>().unwrap(), HookName::OnFinished);
        assert_eq!("onFinished".parse::<HookName>().unwrap(), HookName::OnFinished);

        let err = "notHook".parse::<HookName>().unwrap_err();
        assert!(err.to_string().contains("'notHook' is not a valid hook name"));
    }

    #[tokio::test]
    async fn request_hooks_run_in_order() {
        let hooks = vec![tag("1"), tag("2"), tag("3")];
        let mut req = request();
        let mut res = Response::new(bare_context());

        run_request_hooks(HookName::OnRequest, &hooks, &mut req, &mut res).await.unwrap();

        let order: Vec<_> = res.headers().get_all("x-order").iter().map(|v| v.to_str().unwrap()).collect();
        assert_eq!(order, ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn sending_short_circuits() {
        let sender: Arc<dyn RequestHook> = Arc::new(hook_fn(|_req, res| {
            Box::pin(async move {
                res.send("early");
                Ok(())
            })
        }));
        let hooks = vec![tag("1"), sender, tag("3")];
        let mut req = request();
        let mut res = Response::new(bare_context());

        run_request_hooks(HookName::PreHandler, &hooks, &mut req, &mut res).await.unwrap();

        assert!(res.is_sent());
        assert_eq!(res.headers().get_all("x-order").iter().count(), 1);
    }

    #[tokio::test]
    async fn errors_stop_the_stage() {
        let failing: Arc<dyn RequestHook> =
            Arc::new(hook_fn(|_req, _res| Box::pin(async { Err(std::io::Error::other("hook failed").into()) })));
        let hooks = vec![failing, tag("2")];
        let mut req = request();
        let mut res = Response::new(bare_context());

        let err = run_request_hooks(HookName::OnRequest, &hooks, &mut req, &mut res).await.unwrap_err();
        assert_eq!(err.to_string(), "hook failed");
        assert!(res.headers().get("x-order").is_none());
    }

    #[tokio::test]
    async fn send_hooks_chain_payloads() {
        let upper: Arc<dyn SendHook> = Arc::new(send_hook_fn(|_req, _res, payload| {
            Box::pin(async move {
                Ok(payload.and_then(|p| p.as_text().map(str::to_uppercase)).map(SerializedPayload::Text))
            })
        }));
        let exclaim: Arc<dyn SendHook> = Arc::new(send_hook_fn(|_req, _res, payload| {
            Box::pin(async move {
                Ok(payload.and_then(|p| p.as_text().map(|t| format!("{t}!"))).map(SerializedPayload::Text))
            })
        }));
        let mut req = request();
        let mut res = Response::new(bare_context());

        let out = run_send_hooks(&[upper, exclaim], &mut req, &mut res, Some("hi".into())).await.unwrap();
        assert_eq!(out.unwrap().as_text(), Some("HI!"));
    }
}
