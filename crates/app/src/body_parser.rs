//! Content-type based body parsing.
//!
//! Parsers are declared on a [`BodyParsers`] draft owned by each application
//! scope. When the application is finalized every scope's draft is layered on
//! top of its parent's resolved [`BodyParserRegistry`], so a sub-application
//! sees the parsers its parent declared, including ones declared after the
//! sub-application was created, while its own additions stay local.
//!
//! Lookup order:
//!
//! 1. the scope's own matchers, most recently added first, then the parent's
//! 2. `application/json`, matched on the exact media type only
//! 3. the catch-all (`*`) parser, if any

use crate::body_reader::{BodyStream, ParseAs, RawBody, read_body};
use crate::error::{BoxError, ConfigurationError, RequestError};
use crate::request::Request;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use mime::Mime;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

const LOOKUP_CACHE_CAPACITY: usize = 100;

/// A parsed request body.
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
    Bytes(Bytes),
    /// Anything else a custom parser produces.
    Other(Box<dyn Any + Send + Sync>),
}

impl RequestBody {
    pub fn other<T: Any + Send + Sync>(value: T) -> Self {
        Self::Other(Box::new(value))
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Other(value) => value.downcast_ref(),
            _ => None,
        }
    }

    /// Deserializes a JSON body into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, BoxError> {
        match self {
            Self::Json(value) => Ok(T::deserialize(value)?),
            _ => Err(RequestError::bad_request("request body is not json").into()),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Self::Other(_) => f.write_str("Other(..)"),
        }
    }
}

/// Turns a request body into a [`RequestBody`].
///
/// Buffered parsers receive [`RawBody::Text`] or [`RawBody::Bytes`], raw parsers
/// receive [`RawBody::Stream`]. An error that is not a [`RequestError`] turns
/// into a `400 Bad Request`.
#[async_trait]
pub trait BodyParser: Send + Sync {
    async fn parse(&self, req: &Request, body: RawBody) -> Result<RequestBody, BoxError>;
}

/// a closure holder which implements [`BodyParser`]
pub struct FnParser<F> {
    f: F,
}

/// Adapts a closure into a [`BodyParser`].
///
/// ```
/// use micro_app::{parser_fn, RawBody, RequestBody};
///
/// let csv = parser_fn(|_req, body| Box::pin(async move {
///     match body {
///         RawBody::Text(text) => Ok(RequestBody::other(text.split(',').map(str::to_owned).collect::<Vec<_>>())),
///         _ => Ok(RequestBody::other(Vec::<String>::new())),
///     }
/// }));
/// # let _ = csv;
/// ```
pub fn parser_fn<F>(f: F) -> FnParser<F>
where
    F: for<'a> Fn(&'a Request, RawBody) -> BoxFuture<'a, Result<RequestBody, BoxError>> + Send + Sync,
{
    FnParser { f }
}

#[async_trait]
impl<F> BodyParser for FnParser<F>
where
    F: for<'a> Fn(&'a Request, RawBody) -> BoxFuture<'a, Result<RequestBody, BoxError>> + Send + Sync,
{
    async fn parse(&self, req: &Request, body: RawBody) -> Result<RequestBody, BoxError> {
        (self.f)(req, body).await
    }
}

impl<F> fmt::Debug for FnParser<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnParser")
    }
}

/// The built-in `application/json` parser.
#[derive(Debug, Clone, Copy)]
pub struct JsonParser;

#[async_trait]
impl BodyParser for JsonParser {
    async fn parse(&self, _req: &Request, body: RawBody) -> Result<RequestBody, BoxError> {
        let parsed = match body {
            RawBody::Text(text) => serde_json::from_str(&text),
            RawBody::Bytes(bytes) => serde_json::from_slice(&bytes),
            RawBody::Stream(_) => return Err(RequestError::bad_request("json body must be buffered").into()),
        };
        parsed.map(RequestBody::Json).map_err(|e| RequestError::InvalidBody { source: e.into() }.into())
    }
}

/// Selects the requests a parser applies to, by their `Content-Type` header.
#[derive(Clone)]
pub enum ContentTypeMatcher {
    /// The media type, parameters excluded, equals this one (case-insensitive).
    Exact(String),
    /// The raw header starts with this string.
    Prefix(String),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
    /// Matches everything, tried after every other parser.
    Any,
}

impl ContentTypeMatcher {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn matches(&self, content_type: &str) -> bool {
        match self {
            Self::Exact(expected) => media_type_is(content_type, expected),
            Self::Prefix(prefix) => {
                content_type.len() >= prefix.len()
                    && content_type.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
            }
            Self::Predicate(f) => f(content_type),
            Self::Any => true,
        }
    }

    /// Identity used for duplicate detection, predicates never collide.
    fn key(&self) -> Option<String> {
        match self {
            Self::Exact(media_type) => Some(media_type.to_ascii_lowercase()),
            Self::Prefix(prefix) => Some(format!("{}*", prefix.to_ascii_lowercase())),
            Self::Predicate(_) => None,
            Self::Any => Some("*".to_owned()),
        }
    }

    fn is_json(&self) -> bool {
        matches!(self, Self::Exact(media_type) if media_type.eq_ignore_ascii_case(mime::APPLICATION_JSON.essence_str()))
    }

    fn is_empty(&self) -> bool {
        matches!(self, Self::Exact(s) | Self::Prefix(s) if s.is_empty())
    }
}

/// `"*"` is the catch-all, a trailing `*` makes a prefix, anything else is an exact media type.
impl From<&str> for ContentTypeMatcher {
    fn from(value: &str) -> Self {
        match value {
            "*" => Self::Any,
            prefix if prefix.ends_with('*') => Self::Prefix(prefix.trim_end_matches('*').to_owned()),
            exact => Self::Exact(exact.to_owned()),
        }
    }
}

impl From<String> for ContentTypeMatcher {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Debug for ContentTypeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(media_type) => f.debug_tuple("Exact").field(media_type).finish(),
            Self::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::Any => f.write_str("Any"),
        }
    }
}

fn media_type_is(content_type: &str, expected: &str) -> bool {
    match content_type.parse::<Mime>() {
        Ok(mime) => mime.essence_str().eq_ignore_ascii_case(expected),
        Err(_) => content_type.split(';').next().is_some_and(|essence| essence.trim().eq_ignore_ascii_case(expected)),
    }
}

/// Options of a body parser registration.
///
/// Without [`ParserOptions::parse_as`] the parser receives the raw stream and
/// no limit applies, so a `body_limit` alone is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    parse_as: Option<ParseAs>,
    body_limit: Option<usize>,
}

impl ParserOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_as(mut self, parse_as: ParseAs) -> Self {
        self.parse_as = Some(parse_as);
        self
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = Some(limit);
        self
    }
}

struct ParserEntry {
    matcher: ContentTypeMatcher,
    options: ParserOptions,
    parser: Arc<dyn BodyParser>,
}

/// The parsers declared by one application scope.
#[derive(Default)]
pub struct BodyParsers {
    entries: Vec<ParserEntry>,
    json: Option<ParserEntry>,
    catch_all: Option<ParserEntry>,
}

impl BodyParsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<M, P>(&mut self, matcher: M, options: ParserOptions, parser: P) -> Result<&mut Self, ConfigurationError>
    where
        M: Into<ContentTypeMatcher>,
        P: BodyParser + 'static,
    {
        let matcher = matcher.into();
        if matcher.is_empty() {
            return Err(ConfigurationError::EmptyContentType);
        }
        if options.parse_as.is_none() && options.body_limit.is_some() {
            return Err(ConfigurationError::LimitWithoutParseAs);
        }
        if let Some(limit) = options.body_limit {
            ConfigurationError::check_body_limit(limit)?;
        }
        if self.has_parser(&matcher) {
            return Err(duplicate(&matcher));
        }

        trace!(?matcher, "add body parser");
        let entry = ParserEntry { matcher, options, parser: Arc::new(parser) };
        if matches!(entry.matcher, ContentTypeMatcher::Any) {
            self.catch_all = Some(entry);
        } else if entry.matcher.is_json() {
            self.json = Some(entry);
        } else {
            self.entries.push(entry);
        }
        Ok(self)
    }

    /// Whether this scope declared a parser for `matcher`.
    ///
    /// The built-in JSON parser does not count, it may be replaced once.
    pub fn has_parser(&self, matcher: &ContentTypeMatcher) -> bool {
        match matcher {
            ContentTypeMatcher::Any => self.catch_all.is_some(),
            matcher if matcher.is_json() => self.json.is_some(),
            matcher => {
                let key = matcher.key();
                key.is_some() && self.entries.iter().any(|entry| entry.matcher.key() == key)
            }
        }
    }
}

impl fmt::Debug for BodyParsers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyParsers")
            .field("entries", &self.entries.iter().map(|entry| &entry.matcher).collect::<Vec<_>>())
            .field("json", &self.json.is_some())
            .field("catch_all", &self.catch_all.is_some())
            .finish()
    }
}

fn duplicate(matcher: &ContentTypeMatcher) -> ConfigurationError {
    let matcher = match matcher {
        ContentTypeMatcher::Exact(s) => s.clone(),
        other => other.key().unwrap_or_default(),
    };
    ConfigurationError::DuplicateParser { matcher }
}

/// A parser ready to run, its limit resolved against the application default.
pub struct ResolvedParser {
    matcher: ContentTypeMatcher,
    parse_as: Option<ParseAs>,
    limit: usize,
    parser: Arc<dyn BodyParser>,
    builtin: bool,
}

impl ResolvedParser {
    fn new(entry: &ParserEntry, default_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            matcher: entry.matcher.clone(),
            parse_as: entry.options.parse_as,
            limit: entry.options.body_limit.unwrap_or(default_limit),
            parser: Arc::clone(&entry.parser),
            builtin: false,
        })
    }

    pub fn parse_as(&self) -> Option<ParseAs> {
        self.parse_as
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Reads the body as this parser wants it and parses it.
    ///
    /// `route_limit` overrides the parser's own limit.
    pub(crate) async fn run(
        &self,
        req: &Request,
        mut stream: BodyStream,
        declared_length: Option<u64>,
        route_limit: Option<usize>,
    ) -> Result<RequestBody, BoxError> {
        let body = match self.parse_as {
            Some(parse_as) => {
                let limit = route_limit.unwrap_or(self.limit);
                read_body(&mut stream, parse_as, declared_length, limit).await?
            }
            None => RawBody::Stream(stream),
        };

        self.parser.parse(req, body).await.map_err(|e| {
            if e.downcast_ref::<RequestError>().is_some() { e } else { RequestError::InvalidBody { source: e }.into() }
        })
    }
}

impl fmt::Debug for ResolvedParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedParser")
            .field("matcher", &self.matcher)
            .field("parse_as", &self.parse_as)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

/// The parsers in effect for one scope, with a small lookup cache keyed by the
/// literal `Content-Type` header.
///
/// Read-only once built; the cache is copy-on-write so concurrent requests
/// never block each other.
pub struct BodyParserRegistry {
    entries: Vec<Arc<ResolvedParser>>,
    json: Arc<ResolvedParser>,
    catch_all: Option<Arc<ResolvedParser>>,
    cache: ArcSwap<HashMap<String, Arc<ResolvedParser>>>,
}

impl BodyParserRegistry {
    /// A registry holding only the built-in JSON parser.
    pub fn new(default_limit: usize) -> Self {
        let json = Arc::new(ResolvedParser {
            matcher: ContentTypeMatcher::Exact(mime::APPLICATION_JSON.essence_str().to_owned()),
            parse_as: Some(ParseAs::String),
            limit: default_limit,
            parser: Arc::new(JsonParser),
            builtin: true,
        });
        Self { entries: Vec::new(), json, catch_all: None, cache: ArcSwap::default() }
    }

    /// Layers a scope's own parsers on top of this registry.
    ///
    /// The result is independent: it shares no mutable state with `self`.
    /// Declaring a matcher both here and in `local` is a duplicate.
    pub fn extend(&self, local: &BodyParsers, default_limit: usize) -> Result<Self, ConfigurationError> {
        let mut entries = Vec::with_capacity(local.entries.len() + self.entries.len());
        for entry in local.entries.iter().rev() {
            let key = entry.matcher.key();
            if key.is_some() && self.entries.iter().any(|parent| parent.matcher.key() == key) {
                return Err(duplicate(&entry.matcher));
            }
            entries.push(ResolvedParser::new(entry, default_limit));
        }
        entries.extend(self.entries.iter().cloned());

        let json = match &local.json {
            Some(entry) if !self.json.builtin => return Err(duplicate(&entry.matcher)),
            Some(entry) => ResolvedParser::new(entry, default_limit),
            None => Arc::clone(&self.json),
        };

        let catch_all = match (&local.catch_all, &self.catch_all) {
            (Some(_), Some(_)) => return Err(duplicate(&ContentTypeMatcher::Any)),
            (Some(entry), None) => Some(ResolvedParser::new(entry, default_limit)),
            (None, parent) => parent.clone(),
        };

        Ok(Self { entries, json, catch_all, cache: ArcSwap::default() })
    }

    /// Finds the parser for a `Content-Type` header value, `None` when nothing,
    /// not even a catch-all, applies.
    pub fn lookup(&self, content_type: &str) -> Option<Arc<ResolvedParser>> {
        if let Some(parser) = self.cache.load().get(content_type) {
            return Some(Arc::clone(parser));
        }

        let found = self
            .entries
            .iter()
            .chain(std::iter::once(&self.json))
            .find(|parser| parser.matcher.matches(content_type));

        match found {
            Some(parser) => {
                self.remember(content_type, parser);
                Some(Arc::clone(parser))
            }
            None => self.catch_all.clone(),
        }
    }

    fn remember(&self, content_type: &str, parser: &Arc<ResolvedParser>) {
        self.cache.rcu(|cache| {
            let mut cache = HashMap::clone(cache);
            if cache.len() >= LOOKUP_CACHE_CAPACITY {
                cache.clear();
            }
            cache.insert(content_type.to_owned(), Arc::clone(parser));
            cache
        });
    }
}

impl fmt::Debug for BodyParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyParserRegistry")
            .field("entries", &self.entries)
            .field("json", &self.json)
            .field("catch_all", &self.catch_all)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::PathParams;
    use http_body_util::Full;

    const LIMIT: usize = 1024;

    fn tagged(
        tag: &'static str,
    ) -> FnParser<impl for<'a> Fn(&'a Request, RawBody) -> BoxFuture<'a, Result<RequestBody, BoxError>> + Send + Sync>
    {
        parser_fn(move |_req, _body| Box::pin(async move { Ok(RequestBody::Text(tag.to_owned())) }))
    }

    fn request() -> Request {
        let (parts, ()) = http::Request::builder().method("POST").uri("/").body(()).unwrap().into_parts();
        Request::new(parts, PathParams::empty(), None, false)
    }

    async fn parse_with(registry: &BodyParserRegistry, content_type: &str) -> Option<String> {
        let parser = registry.lookup(content_type)?;
        let body = parser.run(&request(), BodyStream::empty(), None, None).await.ok()?;
        body.as_text().map(str::to_owned)
    }

    #[test]
    fn rejects_duplicates_and_inconsistent_options() {
        let mut parsers = BodyParsers::new();
        parsers.add("text/plain", ParserOptions::new(), tagged("a")).unwrap();

        let err = parsers.add("text/plain", ParserOptions::new(), tagged("b")).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateParser { matcher } if matcher == "text/plain"));

        let err = parsers.add("text/html", ParserOptions::new().body_limit(10), tagged("c")).unwrap_err();
        assert!(matches!(err, ConfigurationError::LimitWithoutParseAs));

        let err = parsers.add("", ParserOptions::new(), tagged("d")).unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyContentType));

        let err = parsers.add("text/csv", ParserOptions::new().parse_as(ParseAs::String).body_limit(0), tagged("e"));
        assert!(matches!(err, Err(ConfigurationError::InvalidBodyLimit { limit: 0 })));
    }

    #[test]
    fn json_may_be_replaced_once() {
        let mut parsers = BodyParsers::new();
        assert!(!parsers.has_parser(&"application/json".into()));

        parsers.add("application/json", ParserOptions::new(), tagged("json")).unwrap();
        assert!(parsers.has_parser(&"application/json".into()));
        assert!(parsers.add("application/json", ParserOptions::new(), tagged("again")).is_err());
    }

    #[tokio::test]
    async fn later_registrations_take_priority() {
        let mut parsers = BodyParsers::new();
        parsers.add("text/*", ParserOptions::new(), tagged("prefix")).unwrap();
        parsers.add("text/plain", ParserOptions::new(), tagged("exact")).unwrap();
        let registry = BodyParserRegistry::new(LIMIT).extend(&parsers, LIMIT).unwrap();

        assert_eq!(parse_with(&registry, "text/plain").await.as_deref(), Some("exact"));
        assert_eq!(parse_with(&registry, "text/html").await.as_deref(), Some("prefix"));
        assert!(registry.lookup("image/png").is_none());
    }

    #[tokio::test]
    async fn default_json_matches_the_exact_media_type_only() {
        let registry = BodyParserRegistry::new(LIMIT);

        assert!(registry.lookup("application/json").is_some());
        assert!(registry.lookup("application/json; charset=utf-8").is_some());
        assert!(registry.lookup("application/jsonp").is_none());
        assert!(registry.lookup("application/json-patch+json").is_none());
    }

    #[tokio::test]
    async fn catch_all_is_tried_last() {
        let mut parsers = BodyParsers::new();
        parsers.add("*", ParserOptions::new(), tagged("any")).unwrap();
        let csv = ContentTypeMatcher::predicate(|ct| ct.contains("csv"));
        parsers.add(csv, ParserOptions::new(), tagged("csv")).unwrap();
        let registry = BodyParserRegistry::new(LIMIT).extend(&parsers, LIMIT).unwrap();

        assert_eq!(parse_with(&registry, "text/csv").await.as_deref(), Some("csv"));
        assert_eq!(parse_with(&registry, "unknown/type").await.as_deref(), Some("any"));
        assert_eq!(parse_with(&registry, "").await.as_deref(), Some("any"));
        assert_eq!(registry.lookup("application/json").unwrap().limit(), LIMIT);
    }

    #[tokio::test]
    async fn lookup_uses_the_cache() {
        let mut parsers = BodyParsers::new();
        parsers.add("text/plain", ParserOptions::new(), tagged("plain")).unwrap();
        let registry = BodyParserRegistry::new(LIMIT).extend(&parsers, LIMIT).unwrap();

        let first = registry.lookup("text/plain; charset=utf-8").unwrap();
        assert_eq!(registry.cache.load().len(), 1);
        let second = registry.lookup("text/plain; charset=utf-8").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn child_registry_is_independent() {
        let mut parent_parsers = BodyParsers::new();
        parent_parsers.add("text/plain", ParserOptions::new(), tagged("parent")).unwrap();
        let parent = BodyParserRegistry::new(LIMIT).extend(&parent_parsers, LIMIT).unwrap();

        let mut child_parsers = BodyParsers::new();
        child_parsers.add("text/html", ParserOptions::new(), tagged("child")).unwrap();
        let child = parent.extend(&child_parsers, LIMIT).unwrap();

        assert_eq!(parse_with(&child, "text/plain").await.as_deref(), Some("parent"));
        assert_eq!(parse_with(&child, "text/html").await.as_deref(), Some("child"));
        assert!(parent.lookup("text/html").is_none());

        let mut clashing = BodyParsers::new();
        clashing.add("text/plain", ParserOptions::new(), tagged("again")).unwrap();
        assert!(matches!(parent.extend(&clashing, LIMIT), Err(ConfigurationError::DuplicateParser { .. })));
    }

    #[tokio::test]
    async fn json_parse_failures_are_bad_requests() {
        let registry = BodyParserRegistry::new(LIMIT);
        let parser = registry.lookup("application/json").unwrap();

        let body = BodyStream::new(Full::new(Bytes::from(r#"{"hello":"world"}"#)));
        let parsed = parser.run(&request(), body, Some(17), None).await.unwrap();
        assert_eq!(parsed.as_json(), Some(&serde_json::json!({"hello": "world"})));

        let body = BodyStream::new(Full::new(Bytes::from("{not json")));
        let err = parser.run(&request(), body, None, None).await.unwrap_err();
        assert_eq!(crate::error::error_status(err.as_ref()), http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn parser_errors_keep_their_own_status() {
        let mut parsers = BodyParsers::new();
        parsers
            .add(
                "text/plain",
                ParserOptions::new(),
                parser_fn(|_req, _body| {
                    Box::pin(async {
                        Err(RequestError::with_status(http::StatusCode::UNPROCESSABLE_ENTITY, "nope").into())
                    })
                }),
            )
            .unwrap();
        parsers
            .add(
                "text/csv",
                ParserOptions::new(),
                parser_fn(|_req, _body| Box::pin(async { Err(std::io::Error::other("broken").into()) })),
            )
            .unwrap();
        let registry = BodyParserRegistry::new(LIMIT).extend(&parsers, LIMIT).unwrap();

        let parser = registry.lookup("text/plain").unwrap();
        let err = parser.run(&request(), BodyStream::empty(), None, None).await.unwrap_err();
        assert_eq!(crate::error::error_status(err.as_ref()), http::StatusCode::UNPROCESSABLE_ENTITY);

        let parser = registry.lookup("text/csv").unwrap();
        let err = parser.run(&request(), BodyStream::empty(), None, None).await.unwrap_err();
        assert_eq!(crate::error::error_status(err.as_ref()), http::StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "broken");
    }

    #[tokio::test]
    async fn route_limit_overrides_parser_limit() {
        let mut parsers = BodyParsers::new();
        let small = ParserOptions::new().parse_as(ParseAs::String).body_limit(2);
        parsers.add("text/plain", small, tagged("small")).unwrap();
        let registry = BodyParserRegistry::new(LIMIT).extend(&parsers, LIMIT).unwrap();
        let parser = registry.lookup("text/plain").unwrap();

        let err = parser.run(&request(), BodyStream::new(Full::new(Bytes::from("abc"))), None, None).await.unwrap_err();
        assert_eq!(crate::error::error_status(err.as_ref()), http::StatusCode::PAYLOAD_TOO_LARGE);

        let ok = parser.run(&request(), BodyStream::new(Full::new(Bytes::from("abc"))), None, Some(3)).await;
        assert!(ok.is_ok());
    }
}
