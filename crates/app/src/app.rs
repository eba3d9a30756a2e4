//! Application assembly: scopes, sub-applications and the finalize step.
//!
//! An application is declared through an [`AppBuilder`], which is the root
//! [`Scope`]. Every scope owns its hooks, body parsers, error handler and
//! not-found handler, and may open child scopes with [`Scope::sub_app`].
//! Nothing is resolved while declaring: [`AppBuilder::finalize`] walks the
//! scope tree once, layers each scope over its parent (hooks parent first,
//! parsers local first, nearest error handler wins), builds one
//! [`RouteContext`] per route and method and freezes the result into an [`App`].

use crate::body::ResponseBody;
use crate::body_parser::{BodyParser, BodyParserRegistry, BodyParsers, ContentTypeMatcher, ParserOptions};
use crate::body_reader::BodyStream;
use crate::context::{MethodClass, RouteConfig, RouteContext, SUPPORTED_METHODS, hook_list};
use crate::error::{BoxError, ConfigurationError};
use crate::handler::{DefaultNotFound, ErrorHandler, Handler};
use crate::hooks::{FinishedHook, Hook, HookName, RequestHook, SendHook};
use crate::lifecycle::{self, EngineOptions};
use crate::request::{QueryMap, QueryParser, Request};
use crate::router::{Dispatch, MethodMap, RouteBuilder, Router, not_implemented};
use bytes::Bytes;
use http::Method;
use http_body::Body as HttpBody;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, trace};

/// The default body limit of every parser, 1 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Application-wide settings.
#[derive(Clone)]
pub struct AppOptions {
    body_limit: usize,
    trust_proxy: bool,
    allow_unsupported_media_type: bool,
    query_parser: Option<QueryParser>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            body_limit: DEFAULT_BODY_LIMIT,
            trust_proxy: false,
            allow_unsupported_media_type: false,
            query_parser: None,
        }
    }
}

impl AppOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The body limit of parsers that do not set their own, must be > 0.
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Trusts the `X-Forwarded-Host` and `X-Forwarded-Proto` headers.
    pub fn trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    /// Leaves bodies no parser accepts unparsed instead of answering `415`.
    pub fn allow_unsupported_media_type(mut self, allow: bool) -> Self {
        self.allow_unsupported_media_type = allow;
        self
    }

    pub fn query_parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(&str) -> QueryMap + Send + Sync + 'static,
    {
        self.query_parser = Some(Arc::new(parser));
        self
    }
}

impl fmt::Debug for AppOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppOptions")
            .field("body_limit", &self.body_limit)
            .field("trust_proxy", &self.trust_proxy)
            .field("allow_unsupported_media_type", &self.allow_unsupported_media_type)
            .field("query_parser", &self.query_parser.is_some())
            .finish()
    }
}

/// One level of the application: the root or a sub-application.
pub struct Scope {
    prefix: String,
    routes: Vec<(String, RouteBuilder)>,
    on_request: Vec<Arc<dyn RequestHook>>,
    pre_handler: Vec<Arc<dyn RequestHook>>,
    on_send: Vec<Arc<dyn SendHook>>,
    on_finished: Vec<Arc<dyn FinishedHook>>,
    parsers: BodyParsers,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    not_found: Option<Arc<dyn Handler>>,
    children: Vec<Scope>,
}

impl Scope {
    fn new(prefix: String) -> Self {
        Self {
            prefix,
            routes: Vec::new(),
            on_request: Vec::new(),
            pre_handler: Vec::new(),
            on_send: Vec::new(),
            on_finished: Vec::new(),
            parsers: BodyParsers::new(),
            error_handler: None,
            not_found: None,
            children: Vec::new(),
        }
    }

    /// The full path prefix of this scope, empty at the root.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Registers a route under this scope's prefix.
    pub fn route(&mut self, path: &str, route: RouteBuilder) -> Result<&mut Self, ConfigurationError> {
        route.validate()?;
        let path = join_route(&self.prefix, path);
        debug!(path = %path, methods = ?route.methods(), "declare route");
        self.routes.push((path, route));
        Ok(self)
    }

    pub fn on_request<H: RequestHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.on_request.push(Arc::new(hook));
        self
    }

    pub fn pre_handler<H: RequestHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.pre_handler.push(Arc::new(hook));
        self
    }

    pub fn on_send<H: SendHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.on_send.push(Arc::new(hook));
        self
    }

    pub fn on_finished<H: FinishedHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.on_finished.push(Arc::new(hook));
        self
    }

    /// Registers a hook by stage name.
    ///
    /// Accepts `onRequest`, `preHandler`, `onSend`, `onFinished` and its alias
    /// `onResponse`. The hook kind must match the stage.
    pub fn add_hook(&mut self, name: &str, hook: Hook) -> Result<&mut Self, ConfigurationError> {
        let name = name.parse::<HookName>()?;
        match (name, hook) {
            (HookName::OnRequest, Hook::Request(hook)) => self.on_request.push(hook),
            (HookName::PreHandler, Hook::Request(hook)) => self.pre_handler.push(hook),
            (HookName::OnSend, Hook::Send(hook)) => self.on_send.push(hook),
            (HookName::OnFinished, Hook::Finished(hook)) => self.on_finished.push(hook),
            (name, _) => return Err(ConfigurationError::HookKindMismatch { name: name.as_str() }),
        }
        trace!(%name, prefix = %self.prefix, "add hook");
        Ok(self)
    }

    /// Adds a body parser to this scope and every scope below it.
    pub fn add_body_parser<M, P>(
        &mut self,
        matcher: M,
        options: ParserOptions,
        parser: P,
    ) -> Result<&mut Self, ConfigurationError>
    where
        M: Into<ContentTypeMatcher>,
        P: BodyParser + 'static,
    {
        self.parsers.add(matcher, options, parser)?;
        Ok(self)
    }

    /// Whether this scope itself declared a parser for `matcher`.
    pub fn has_body_parser(&self, matcher: impl Into<ContentTypeMatcher>) -> bool {
        self.parsers.has_parser(&matcher.into())
    }

    /// Replaces the generic error response for this scope and the scopes below
    /// it that do not set their own.
    pub fn set_error_handler<H: ErrorHandler + 'static>(&mut self, handler: H) -> &mut Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Handles requests under this scope's prefix that match no route, and
    /// 404 errors raised by its routes.
    pub fn set_not_found_handler<H: Handler + 'static>(&mut self, handler: H) -> Result<&mut Self, ConfigurationError> {
        if self.not_found.is_some() {
            return Err(duplicate_not_found(&self.prefix));
        }
        self.not_found = Some(Arc::new(handler));
        Ok(self)
    }

    /// Opens a child scope.
    ///
    /// The child inherits this scope's hooks, parsers and error handler. An
    /// empty `prefix` keeps the current one, any other must start with `/`.
    pub fn sub_app(&mut self, prefix: &str) -> Result<&mut Scope, ConfigurationError> {
        if !prefix.is_empty() && !prefix.starts_with('/') {
            return Err(ConfigurationError::InvalidPrefix { prefix: prefix.to_owned() });
        }

        let prefix = join_prefix(&self.prefix, prefix);
        debug!(prefix = %prefix, "open sub-application");
        self.children.push(Scope::new(prefix));
        let index = self.children.len() - 1;
        Ok(&mut self.children[index])
    }

    fn resolve(
        self,
        parent: &Resolved,
        body_limit: usize,
        out: &mut Collected,
    ) -> Result<Arc<Resolved>, ConfigurationError> {
        let resolved = Arc::new(parent.overlay(&self, body_limit)?);

        if let Some(handler) = self.not_found {
            match out.not_found.entry(not_found_key(&self.prefix).to_owned()) {
                Entry::Occupied(_) => return Err(duplicate_not_found(&self.prefix)),
                Entry::Vacant(entry) => {
                    entry.insert((handler, Arc::clone(&resolved)));
                }
            }
        }

        for (path, route) in self.routes {
            out.routes.push((path, route, Arc::clone(&resolved)));
        }
        for child in self.children {
            child.resolve(&resolved, body_limit, out)?;
        }
        Ok(resolved)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("prefix", &self.prefix)
            .field("routes", &self.routes.iter().map(|(path, _)| path).collect::<Vec<_>>())
            .field("parsers", &self.parsers)
            .field("not_found", &self.not_found.is_some())
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

fn duplicate_not_found(prefix: &str) -> ConfigurationError {
    let prefix = if prefix.is_empty() { "/" } else { prefix };
    ConfigurationError::DuplicateNotFoundHandler { prefix: prefix.to_owned() }
}

/// `/prefix` + `/` registers `/prefix`, `/prefix/` + `/route` registers `/prefix/route`.
fn join_route(prefix: &str, path: &str) -> String {
    if path == "/" && !prefix.is_empty() {
        return prefix.to_owned();
    }
    match path.strip_prefix('/') {
        Some(rest) if prefix.ends_with('/') => format!("{prefix}{rest}"),
        _ => format!("{prefix}{path}"),
    }
}

fn join_prefix(base: &str, prefix: &str) -> String {
    match prefix.strip_prefix('/') {
        Some(rest) if base.ends_with('/') => format!("{base}{rest}"),
        _ => format!("{base}{prefix}"),
    }
}

fn not_found_key(prefix: &str) -> &str {
    prefix.trim_end_matches('/')
}

/// A scope layered over all of its ancestors.
struct Resolved {
    prefix: String,
    on_request: Vec<Arc<dyn RequestHook>>,
    pre_handler: Vec<Arc<dyn RequestHook>>,
    on_send: Vec<Arc<dyn SendHook>>,
    on_finished: Vec<Arc<dyn FinishedHook>>,
    body_parser: Arc<BodyParserRegistry>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl Resolved {
    fn root(body_limit: usize) -> Self {
        Self {
            prefix: String::new(),
            on_request: Vec::new(),
            pre_handler: Vec::new(),
            on_send: Vec::new(),
            on_finished: Vec::new(),
            body_parser: Arc::new(BodyParserRegistry::new(body_limit)),
            error_handler: None,
        }
    }

    fn overlay(&self, scope: &Scope, body_limit: usize) -> Result<Self, ConfigurationError> {
        fn concat<T: ?Sized>(parent: &[Arc<T>], local: &[Arc<T>]) -> Vec<Arc<T>> {
            parent.iter().chain(local).cloned().collect()
        }

        Ok(Self {
            prefix: scope.prefix.clone(),
            on_request: concat(&self.on_request, &scope.on_request),
            pre_handler: concat(&self.pre_handler, &scope.pre_handler),
            on_send: concat(&self.on_send, &scope.on_send),
            on_finished: concat(&self.on_finished, &scope.on_finished),
            body_parser: Arc::new(self.body_parser.extend(&scope.parsers, body_limit)?),
            error_handler: scope.error_handler.as_ref().or(self.error_handler.as_ref()).map(Arc::clone),
        })
    }

    fn context(
        &self,
        handler: &Arc<dyn Handler>,
        method: &Method,
        route: Option<&RouteBuilder>,
        url: &str,
    ) -> Result<RouteContext, ConfigurationError> {
        let method_class = MethodClass::of(method)
            .ok_or_else(|| ConfigurationError::UnsupportedMethod { method: method.to_string() })?;
        let mut pre_handler = self.pre_handler.clone();
        if let Some(route) = route {
            pre_handler.extend(route.pre_handler.iter().cloned());
        }

        Ok(RouteContext {
            handler: Arc::clone(handler),
            method_class,
            config: RouteConfig::new(url.to_owned(), route.map(|route| route.config.clone()).unwrap_or_default()),
            serializers: route
                .and_then(|route| route.serializers.clone())
                .filter(|serializers| !serializers.is_empty()),
            body_limit: route.and_then(|route| route.body_limit),
            body_parser: Arc::clone(&self.body_parser),
            error_handler: self.error_handler.clone(),
            on_request: hook_list(self.on_request.clone()),
            pre_handler: hook_list(pre_handler),
            on_send: hook_list(self.on_send.clone()),
            on_finished: hook_list(self.on_finished.clone()),
            not_found: None,
        })
    }
}

#[derive(Default)]
struct Collected {
    routes: Vec<(String, RouteBuilder, Arc<Resolved>)>,
    not_found: BTreeMap<String, (Arc<dyn Handler>, Arc<Resolved>)>,
}

/// The not-found contexts of the nearest prefix level at or above `prefix`.
fn nearest<'m>(contexts: &'m BTreeMap<String, MethodMap>, prefix: &str) -> Option<&'m MethodMap> {
    let mut key = not_found_key(prefix);
    loop {
        if let Some(found) = contexts.get(key) {
            return Some(found);
        }
        let cut = key.rfind('/')?;
        key = &key[..cut];
    }
}

/// Declares an application; it derefs to the root [`Scope`].
pub struct AppBuilder {
    options: AppOptions,
    root: Scope,
}

impl AppBuilder {
    fn new(options: AppOptions) -> Self {
        Self { options, root: Scope::new(String::new()) }
    }

    /// Resolves every scope and route and freezes the application.
    pub fn finalize(self) -> Result<App, ConfigurationError> {
        let AppBuilder { options, root } = self;
        let body_limit = ConfigurationError::check_body_limit(options.body_limit)?;

        let mut collected = Collected::default();
        let root = root.resolve(&Resolved::root(body_limit), body_limit, &mut collected)?;
        let default_not_found: Arc<dyn Handler> = Arc::new(DefaultNotFound);
        collected.not_found.entry(String::new()).or_insert((default_not_found, root));

        let mut router = Router::builder();

        let mut not_found_contexts = BTreeMap::new();
        for (prefix, (handler, scope)) in collected.not_found {
            let url = if prefix.is_empty() { "/" } else { prefix.as_str() };
            let contexts = SUPPORTED_METHODS
                .iter()
                .map(|method| Ok((method.clone(), triomphe::Arc::new(scope.context(&handler, method, None, url)?))))
                .collect::<Result<MethodMap, ConfigurationError>>()?;
            router.not_found(&prefix, &contexts);
            not_found_contexts.insert(prefix, contexts);
        }

        let route_count = collected.routes.len();
        for (path, route, scope) in collected.routes {
            let not_found = nearest(&not_found_contexts, &scope.prefix);
            for method in &route.methods {
                let mut context = scope.context(&route.handler, method, Some(&route), &path)?;
                context.not_found = not_found.and_then(|contexts| contexts.get(method)).map(triomphe::Arc::clone);
                router.route(&path, method, triomphe::Arc::new(context))?;
            }
        }

        let router = router.build()?;
        debug!(routes = route_count, not_found = not_found_contexts.len(), "application finalized");

        Ok(App {
            inner: Arc::new(AppInner {
                router,
                query_parser: options.query_parser,
                trust_proxy: options.trust_proxy,
                engine: EngineOptions { allow_unsupported_media_type: options.allow_unsupported_media_type },
            }),
        })
    }
}

impl Deref for AppBuilder {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        &self.root
    }
}

impl DerefMut for AppBuilder {
    fn deref_mut(&mut self) -> &mut Scope {
        &mut self.root
    }
}

impl fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppBuilder").field("options", &self.options).field("root", &self.root).finish()
    }
}

/// A finalized application, cheap to clone and shared by every connection.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    router: Router,
    query_parser: Option<QueryParser>,
    trust_proxy: bool,
    engine: EngineOptions,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new(AppOptions::default())
    }

    pub fn with_options(options: AppOptions) -> AppBuilder {
        AppBuilder::new(options)
    }

    /// Serves one request.
    ///
    /// Never fails: every error becomes a response. Requests with a method no
    /// route can be registered for get `501 Not Implemented` without running
    /// any hook.
    pub async fn handle<B>(&self, request: http::Request<B>) -> http::Response<ResponseBody>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        match self.inner.router.at(&parts.method, parts.uri.path()) {
            Dispatch::Route(route, params) => {
                let route = triomphe::Arc::clone(route);
                let req = Request::new(parts, params, self.inner.query_parser.clone(), self.inner.trust_proxy);
                lifecycle::run(route, req, BodyStream::new(body), self.inner.engine).await
            }
            Dispatch::NotImplemented => {
                debug!(method = %parts.method, uri = %parts.uri, "unsupported method");
                not_implemented(&parts.method)
            }
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("trust_proxy", &self.inner.trust_proxy)
            .field("engine", &self.inner.engine)
            .finish_non_exhaustive()
    }
}
