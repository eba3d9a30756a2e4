//! The incoming side of a request: method, headers, URL, path parameters,
//! the lazily parsed query string and the parsed body.
//!
//! - [`Request`]: read-mostly wrapper handed to every hook and handler
//! - [`PathParams`]: parameters captured by the router from the URL path

use crate::body_parser::RequestBody;
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, Uri, Version};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The parsed query string.
pub type QueryMap = HashMap<String, String>;

/// A custom query-string parser, see [`crate::AppOptions::query_parser`].
pub type QueryParser = Arc<dyn Fn(&str) -> QueryMap + Send + Sync>;

/// The request as seen by hooks and handlers.
///
/// The body slot is empty until the body-parsing stage fills it and is cleared
/// again once the response has been written. Application data travels in the
/// typed [`Request::extensions`] map.
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    params: PathParams,
    query: OnceCell<QueryMap>,
    query_parser: Option<QueryParser>,
    trust_proxy: bool,
    body: Option<RequestBody>,
    extensions: Extensions,
}

impl Request {
    pub(crate) fn new(parts: Parts, params: PathParams, query_parser: Option<QueryParser>, trust_proxy: bool) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            params,
            query: OnceCell::new(),
            query_parser,
            trust_proxy,
            body: None,
            extensions: parts.extensions,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as a string, `None` when absent or not visible ASCII.
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The request target: path plus query string.
    pub fn url(&self) -> &str {
        self.uri.path_and_query().map_or("/", |pq| pq.as_str())
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The raw query string without the leading `?`, empty when there is none.
    pub fn querystring(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// The query string parsed on first access.
    pub fn query(&self) -> &QueryMap {
        self.query.get_or_init(|| match &self.query_parser {
            Some(parser) => parser(self.querystring()),
            None => parse_query(self.querystring()),
        })
    }

    /// Deserializes the query string into `T`.
    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T, serde_urlencoded::de::Error> {
        serde_urlencoded::from_str(self.querystring())
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// `X-Forwarded-Host` when proxies are trusted, otherwise the `Host` header.
    pub fn host(&self) -> Option<&str> {
        let forwarded = if self.trust_proxy { self.header("x-forwarded-host") } else { None };
        forwarded.or_else(|| self.header(http::header::HOST)).or_else(|| self.uri.host())
    }

    /// The host without its port, IPv6 literals keep their brackets.
    pub fn hostname(&self) -> Option<&str> {
        let host = self.host()?;
        let search_from = if host.starts_with('[') { host.find(']').unwrap_or(0) } else { 0 };
        match host[search_from..].find(':') {
            Some(index) => Some(&host[..search_from + index]),
            None => Some(host),
        }
    }

    pub fn protocol(&self) -> &str {
        if self.trust_proxy {
            if let Some(proto) = self.header("x-forwarded-proto") {
                return proto;
            }
        }
        self.uri.scheme_str().unwrap_or("http")
    }

    /// The parsed body, present after the body-parsing stage for requests that carry one.
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    pub(crate) fn set_body(&mut self, body: RequestBody) {
        self.body = Some(body);
    }

    pub(crate) fn clear_body(&mut self) {
        self.body = None;
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

fn parse_query(querystring: &str) -> QueryMap {
    serde_urlencoded::from_str::<Vec<(String, String)>>(querystring).unwrap_or_default().into_iter().collect()
}

/// Parameters extracted from the URL path of a matched route.
///
/// In the route `/users/{id}`, `id` is a path parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    params: Vec<(String, String)>,
}

impl PathParams {
    /// Creates an empty PathParams instance with no parameters
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Gets the value of a path parameter by its name
    #[inline]
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.params.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl From<matchit::Params<'_, '_>> for PathParams {
    fn from(params: matchit::Params<'_, '_>) -> Self {
        Self { params: params.iter().map(|(name, value)| (name.to_owned(), value.to_owned())).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(builder: http::request::Builder, trust_proxy: bool) -> Request {
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        Request::new(parts, PathParams::empty(), None, trust_proxy)
    }

    #[test]
    fn url_and_query() {
        let req = request(http::Request::builder().uri("/search?q=rust&page=2"), false);

        assert_eq!(req.url(), "/search?q=rust&page=2");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.querystring(), "q=rust&page=2");
        assert_eq!(req.query().get("q").map(String::as_str), Some("rust"));
        assert_eq!(req.query().get("page").map(String::as_str), Some("2"));
    }

    #[test]
    fn typed_query() {
        #[derive(serde::Deserialize)]
        struct Page {
            page: u32,
        }

        let req = request(http::Request::builder().uri("/?page=7"), false);
        assert_eq!(req.query_as::<Page>().unwrap().page, 7);
    }

    #[test]
    fn custom_query_parser() {
        let (parts, ()) = http::Request::builder().uri("/?a=1").body(()).unwrap().into_parts();
        let parser: QueryParser = Arc::new(|qs| QueryMap::from([("raw".to_owned(), qs.to_owned())]));
        let req = Request::new(parts, PathParams::empty(), Some(parser), false);

        assert_eq!(req.query().get("raw").map(String::as_str), Some("a=1"));
    }

    #[test]
    fn host_and_hostname() {
        let req = request(http::Request::builder().uri("/").header("host", "example.com:8080"), false);
        assert_eq!(req.host(), Some("example.com:8080"));
        assert_eq!(req.hostname(), Some("example.com"));

        let req = request(http::Request::builder().uri("/").header("host", "[::1]:3000"), false);
        assert_eq!(req.hostname(), Some("[::1]"));
    }

    #[test]
    fn forwarded_headers_need_trust() {
        let builder = || {
            http::Request::builder()
                .uri("/")
                .header("host", "internal")
                .header("x-forwarded-host", "public.example")
                .header("x-forwarded-proto", "https")
        };

        let untrusted = request(builder(), false);
        assert_eq!(untrusted.host(), Some("internal"));
        assert_eq!(untrusted.protocol(), "http");

        let trusted = request(builder(), true);
        assert_eq!(trusted.host(), Some("public.example"));
        assert_eq!(trusted.protocol(), "https");
    }

    #[test]
    fn path_params() {
        let mut router = matchit::Router::new();
        router.insert("/users/{id}/posts/{post}", ()).unwrap();
        let matched = router.at("/users/7/posts/42").unwrap();

        let params = PathParams::from(matched.params);
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("post"), Some("42"));
        assert_eq!(params.get("missing"), None);
    }
}
