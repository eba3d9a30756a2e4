//! Per-route configuration shared by every request to that route.
//!
//! A [`RouteContext`] is built once by [`crate::AppBuilder::finalize`] and is
//! read-only afterwards. Hook lists that resolved to nothing are stored as
//! `None` so the engine can skip the stage without touching a slice.

use crate::body_parser::BodyParserRegistry;
use crate::handler::{ErrorHandler, Handler};
use crate::hooks::{FinishedHook, RequestHook, SendHook};
use crate::serializer::ResponseSerializers;
use http::Method;
use std::fmt;
use std::sync::Arc;

/// The methods a route can be registered for.
pub const SUPPORTED_METHODS: [Method; 7] =
    [Method::DELETE, Method::GET, Method::HEAD, Method::PATCH, Method::POST, Method::PUT, Method::OPTIONS];

/// How a request method treats the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    /// `GET` and `HEAD`: the body is never parsed.
    NoBody,
    /// `POST`, `PUT` and `PATCH`: parsed whenever a body or a `Content-Type` is present.
    Body,
    /// `OPTIONS` and `DELETE`: parsed only when a `Content-Type` is present.
    OptionalBody,
}

impl MethodClass {
    /// `None` for methods routes cannot be registered for.
    pub fn of(method: &Method) -> Option<Self> {
        match *method {
            Method::GET | Method::HEAD => Some(Self::NoBody),
            Method::POST | Method::PUT | Method::PATCH => Some(Self::Body),
            Method::OPTIONS | Method::DELETE => Some(Self::OptionalBody),
            _ => None,
        }
    }
}

/// The user data attached to a route, plus the full URL it was registered at.
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    url: String,
    data: serde_json::Value,
}

impl RouteConfig {
    pub(crate) fn new(url: String, data: serde_json::Value) -> Self {
        Self { url, data }
    }

    /// The route path with every sub-application prefix applied.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

pub(crate) type Hooks<T> = Option<Box<[Arc<T>]>>;

pub(crate) fn hook_list<T: ?Sized>(hooks: Vec<Arc<T>>) -> Hooks<T> {
    if hooks.is_empty() { None } else { Some(hooks.into_boxed_slice()) }
}

/// Everything the lifecycle engine needs to serve one method of one route.
pub struct RouteContext {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) method_class: MethodClass,
    pub(crate) config: RouteConfig,
    pub(crate) serializers: Option<ResponseSerializers>,
    pub(crate) body_limit: Option<usize>,
    pub(crate) body_parser: Arc<BodyParserRegistry>,
    pub(crate) error_handler: Option<Arc<dyn ErrorHandler>>,
    pub(crate) on_request: Hooks<dyn RequestHook>,
    pub(crate) pre_handler: Hooks<dyn RequestHook>,
    pub(crate) on_send: Hooks<dyn SendHook>,
    pub(crate) on_finished: Hooks<dyn FinishedHook>,
    /// Where a 404 raised by this route is delegated; `None` inside a not-found context.
    pub(crate) not_found: Option<triomphe::Arc<RouteContext>>,
}

impl RouteContext {
    pub fn method_class(&self) -> MethodClass {
        self.method_class
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    /// The route's own body limit, overriding every parser's limit.
    pub fn body_limit(&self) -> Option<usize> {
        self.body_limit
    }

    pub fn is_not_found(&self) -> bool {
        self.not_found.is_none()
    }
}

impl fmt::Debug for RouteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn len<T: ?Sized>(hooks: &Hooks<T>) -> usize {
            hooks.as_ref().map_or(0, |hooks| hooks.len())
        }

        f.debug_struct("RouteContext")
            .field("url", &self.config.url)
            .field("method_class", &self.method_class)
            .field("body_limit", &self.body_limit)
            .field("on_request", &len(&self.on_request))
            .field("pre_handler", &len(&self.pre_handler))
            .field("on_send", &len(&self.on_send))
            .field("on_finished", &len(&self.on_finished))
            .field("error_handler", &self.error_handler.is_some())
            .field("not_found", &self.not_found.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::handler::handler_fn;

    /// A context with no hooks, for unit tests of the pieces the engine drives.
    pub(crate) fn bare_context() -> triomphe::Arc<RouteContext> {
        triomphe::Arc::new(RouteContext {
            handler: Arc::new(handler_fn(|_req, _res| Box::pin(async { Ok(None) }))),
            method_class: MethodClass::NoBody,
            config: RouteConfig::new("/".into(), serde_json::Value::Null),
            serializers: None,
            body_limit: None,
            body_parser: Arc::new(BodyParserRegistry::new(1024)),
            error_handler: None,
            on_request: None,
            pre_handler: None,
            on_send: None,
            on_finished: None,
            not_found: None,
        })
    }

    #[test]
    fn method_classes() {
        assert_eq!(MethodClass::of(&Method::GET), Some(MethodClass::NoBody));
        assert_eq!(MethodClass::of(&Method::HEAD), Some(MethodClass::NoBody));
        assert_eq!(MethodClass::of(&Method::PATCH), Some(MethodClass::Body));
        assert_eq!(MethodClass::of(&Method::DELETE), Some(MethodClass::OptionalBody));
        assert_eq!(MethodClass::of(&Method::TRACE), None);
        assert!(SUPPORTED_METHODS.iter().all(|method| MethodClass::of(method).is_some()));
    }

    #[test]
    fn empty_hook_lists_are_none() {
        assert!(hook_list::<dyn RequestHook>(Vec::new()).is_none());
    }

    #[test]
    fn route_config() {
        let config = RouteConfig::new("/users".into(), serde_json::json!({"auth": true}));
        assert_eq!(config.url(), "/users");
        assert_eq!(config.get("auth"), Some(&serde_json::Value::Bool(true)));
        assert!(config.get("missing").is_none());
    }
}
