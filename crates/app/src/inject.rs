//! In-memory requests, for tests and tools that drive an [`App`] without a socket.

use crate::app::App;
use crate::error::BoxError;
use bytes::Bytes;
use http::header::{AsHeaderName, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::de::DeserializeOwned;

/// A response read to the end.
#[derive(Debug, Clone)]
pub struct InjectedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl InjectedResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: impl AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

impl App {
    /// Serves a request with an in-memory body and collects the response.
    ///
    /// A `Content-Length` header is added for a non-empty body unless the
    /// request declares its own length or a transfer encoding. Fails only when
    /// the response body stream fails.
    pub async fn inject<B: Into<Bytes>>(&self, request: http::Request<B>) -> Result<InjectedResponse, BoxError> {
        let (mut parts, body) = request.into_parts();
        let body = body.into();
        let framed = parts.headers.contains_key(CONTENT_LENGTH) || parts.headers.contains_key(TRANSFER_ENCODING);
        if !body.is_empty() && !framed {
            parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        let response = self.handle(http::Request::from_parts(parts, Full::new(body))).await;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(InjectedResponse { status: parts.status, headers: parts.headers, body })
    }
}

#[cfg(test)]
mod tests {
    use crate::{App, get, handler_fn};
    use http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn injects_and_collects() {
        let mut app = App::builder();
        app.route(
            "/hello/{name}",
            get(handler_fn(|req, _res| {
                Box::pin(async move { Ok(Some(json!({ "hello": req.params().get("name") }).into())) })
            })),
        )
        .unwrap();
        let app = app.finalize().unwrap();

        let response = app.inject(http::Request::get("/hello/world").body("").unwrap()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("content-length"), Some("17"));
        assert_eq!(response.json::<serde_json::Value>().unwrap(), json!({ "hello": "world" }));
    }
}
