use crate::body::ResponseBody;
use crate::context::{RouteContext, SUPPORTED_METHODS};
use crate::error::ConfigurationError;
use crate::handler::Handler;
use crate::hooks::RequestHook;
use crate::request::PathParams;
use crate::serializer::ResponseSerializers;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Method, StatusCode};
use std::collections::{BTreeMap, HashMap};
use std::collections::btree_map::Entry;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub(crate) type MethodMap = HashMap<Method, triomphe::Arc<RouteContext>>;

/// Maps request paths to route contexts.
///
/// Registered routes are tried first. A path that matches no route for the
/// request method falls through to the not-found routes, registered for every
/// supported method under each prefix that declared a not-found handler. Only
/// unsupported methods are left, and they get `501 Not Implemented`.
pub(crate) struct Router {
    routes: matchit::Router<MethodMap>,
    not_found: matchit::Router<MethodMap>,
}

pub(crate) enum Dispatch<'router> {
    Route(&'router triomphe::Arc<RouteContext>, PathParams),
    NotImplemented,
}

impl Router {
    pub(crate) fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub(crate) fn at(&self, method: &Method, path: &str) -> Dispatch<'_> {
        if let Ok(matched) = self.routes.at(path) {
            if let Some(route) = matched.value.get(method) {
                return Dispatch::Route(route, matched.params.into());
            }
        }

        match self.not_found.at(path) {
            Ok(matched) => match matched.value.get(method) {
                Some(route) => Dispatch::Route(route, PathParams::empty()),
                None => Dispatch::NotImplemented,
            },
            Err(_) => Dispatch::NotImplemented,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RouterBuilder {
    routes: BTreeMap<String, MethodMap>,
    not_found: BTreeMap<String, MethodMap>,
}

impl RouterBuilder {
    pub(crate) fn route(
        &mut self,
        path: &str,
        method: &Method,
        context: triomphe::Arc<RouteContext>,
    ) -> Result<&mut Self, ConfigurationError> {
        let methods = self.routes.entry(path.to_owned()).or_default();
        if methods.contains_key(method) {
            return Err(ConfigurationError::DuplicateRoute { method: method.to_string(), path: path.to_owned() });
        }
        methods.insert(method.clone(), context);
        Ok(self)
    }

    /// Routes every path under `prefix` to the not-found contexts.
    pub(crate) fn not_found(&mut self, prefix: &str, contexts: &MethodMap) -> &mut Self {
        let base = prefix.trim_end_matches('/');
        let paths = if base.is_empty() {
            vec!["/".to_owned(), "/{*rest}".to_owned()]
        } else {
            vec![base.to_owned(), format!("{base}/"), format!("{base}/{{*rest}}")]
        };

        for path in paths {
            if let Entry::Vacant(entry) = self.not_found.entry(path) {
                entry.insert(contexts.clone());
            }
        }
        self
    }

    pub(crate) fn build(self) -> Result<Router, ConfigurationError> {
        fn insert_all(from: BTreeMap<String, MethodMap>) -> Result<matchit::Router<MethodMap>, ConfigurationError> {
            let mut router = matchit::Router::new();
            for (path, methods) in from {
                debug!(path = %path, methods = ?methods.keys().collect::<Vec<_>>(), "register route");
                router.insert(path.clone(), methods).map_err(|source| ConfigurationError::Route { path, source })?;
            }
            Ok(router)
        }

        Ok(Router { routes: insert_all(self.routes)?, not_found: insert_all(self.not_found)? })
    }
}

/// The `501` response for methods no route can be registered for.
pub(crate) fn not_implemented(method: &Method) -> http::Response<ResponseBody> {
    let payload = format!("Unsupported request method: {method}");
    let length = HeaderValue::from(payload.len());

    let mut response = http::Response::new(ResponseBody::from(payload));
    *response.status_mut() = StatusCode::NOT_IMPLEMENTED;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response.headers_mut().insert(CONTENT_LENGTH, length);
    response
}

/// A route declaration: its methods, its handler and its options.
pub struct RouteBuilder {
    pub(crate) methods: Vec<Method>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) body_limit: Option<usize>,
    pub(crate) serializers: Option<ResponseSerializers>,
    pub(crate) config: serde_json::Value,
    pub(crate) pre_handler: Vec<Arc<dyn RequestHook>>,
}

impl RouteBuilder {
    fn new<H: Handler + 'static>(methods: Vec<Method>, handler: H) -> Self {
        Self {
            methods,
            handler: Arc::new(handler),
            body_limit: None,
            serializers: None,
            config: serde_json::Value::Null,
            pre_handler: Vec::new(),
        }
    }

    /// Overrides the body limit of every parser for this route.
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = Some(limit);
        self
    }

    pub fn serializers(mut self, serializers: ResponseSerializers) -> Self {
        self.serializers = Some(serializers);
        self
    }

    /// Arbitrary data available through [`crate::Response::config`].
    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// A preHandler hook for this route only, run after the scope's preHandler hooks.
    pub fn pre_handler<H: RequestHook + 'static>(mut self, hook: H) -> Self {
        self.pre_handler.push(Arc::new(hook));
        self
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(method) = self.methods.iter().find(|method| !SUPPORTED_METHODS.contains(*method)) {
            return Err(ConfigurationError::UnsupportedMethod { method: method.to_string() });
        }
        if let Some(limit) = self.body_limit {
            ConfigurationError::check_body_limit(limit)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RouteBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteBuilder")
            .field("methods", &self.methods)
            .field("body_limit", &self.body_limit)
            .field("config", &self.config)
            .field("pre_handler", &self.pre_handler.len())
            .finish_non_exhaustive()
    }
}

macro_rules! method_route {
    ($name:ident, $method:ident) => {
        #[doc = concat!("A route answering `", stringify!($method), "` requests.")]
        pub fn $name<H: Handler + 'static>(handler: H) -> RouteBuilder {
            RouteBuilder::new(vec![Method::$method], handler)
        }
    };
}

method_route!(get, GET);
method_route!(head, HEAD);
method_route!(post, POST);
method_route!(put, PUT);
method_route!(patch, PATCH);
method_route!(delete, DELETE);
method_route!(options, OPTIONS);

/// A route answering every supported method.
pub fn all<H: Handler + 'static>(handler: H) -> RouteBuilder {
    RouteBuilder::new(SUPPORTED_METHODS.to_vec(), handler)
}

/// A route answering the given methods.
pub fn on<H, I>(methods: I, handler: H) -> RouteBuilder
where
    H: Handler + 'static,
    I: IntoIterator<Item = Method>,
{
    RouteBuilder::new(methods.into_iter().collect(), handler)
}
