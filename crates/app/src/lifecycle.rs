//! The per-request state machine.
//!
//! ```text
//! OnRequest -> ParseBody -> PreHandler -> Handler -> Send -> OnSend -> Write
//!     \            \             \           \         \        \        |
//!      +------------+-------------+-----------+---------+--------+--> Error
//! ```
//!
//! A request hook that sends jumps straight to `Send`. `Error` resolves the
//! status and either hands over to the not-found handler (404), to the route's
//! custom error handler (once per request) or renders the generic JSON error,
//! which joins the flow at `OnSend`. onSend hooks run at most once per request.

use crate::body::{FinishNotifier, Finished, ResponseBody};
use crate::body_reader::BodyStream;
use crate::context::{Hooks, MethodClass, RouteContext};
use crate::error::{BoxError, RequestError, error_status};
use crate::handler::not_found_message;
use crate::hooks::{HookName, RequestHook, run_request_hooks, run_send_hooks};
use crate::request::Request;
use crate::response::{Payload, PayloadStream, Response, SerializedPayload};
use crate::serializer::serialize_error;
use bytes::Bytes;
use futures::StreamExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tracing::{debug, error, trace, warn};

enum Stage {
    OnRequest,
    ParseBody,
    PreHandler,
    Handler,
    Send,
    OnSend(Option<SerializedPayload>),
    Error(BoxError),
    Write(Option<SerializedPayload>),
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Self::OnRequest => "on_request",
            Self::ParseBody => "parse_body",
            Self::PreHandler => "pre_handler",
            Self::Handler => "handler",
            Self::Send => "send",
            Self::OnSend(_) => "on_send",
            Self::Error(_) => "error",
            Self::Write(_) => "write",
        }
    }
}

/// Per-application settings the engine consults.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineOptions {
    pub(crate) allow_unsupported_media_type: bool,
}

/// Drives one request through its route, returning the response to write.
pub(crate) async fn run(
    route: triomphe::Arc<RouteContext>,
    mut req: Request,
    body: BodyStream,
    options: EngineOptions,
) -> http::Response<ResponseBody> {
    // onFinished hooks belong to the route the request was dispatched to
    let observers = triomphe::Arc::clone(&route);
    let mut res = Response::new(route);
    let mut body = Some(body);
    let mut stage = Stage::OnRequest;

    loop {
        trace!(stage = stage.name(), "enter stage");
        let route = triomphe::Arc::clone(res.route());

        stage = match stage {
            Stage::OnRequest => {
                let result = run_hooks(HookName::OnRequest, &route.on_request, &mut req, &mut res).await;
                after_hooks(result, &res, Stage::ParseBody)
            }
            Stage::ParseBody => match parse_body(&mut req, &route, body.take(), options).await {
                Ok(()) => Stage::PreHandler,
                Err(e) => Stage::Error(e),
            },
            Stage::PreHandler => {
                let result = run_hooks(HookName::PreHandler, &route.pre_handler, &mut req, &mut res).await;
                after_hooks(result, &res, Stage::Handler)
            }
            Stage::Handler => match route.handler.call(&mut req, &mut res).await {
                Ok(payload) => settle(&mut res, payload),
                Err(e) => Stage::Error(e),
            },
            Stage::Send => {
                let payload = res.take_pending();
                match res.serialize(payload) {
                    Ok(payload) => Stage::OnSend(payload),
                    Err(e) => Stage::Error(e.into()),
                }
            }
            Stage::OnSend(payload) => match route.on_send.as_deref() {
                Some(hooks) if res.use_on_send() => match run_send_hooks(hooks, &mut req, &mut res, payload).await {
                    Ok(payload) => Stage::Write(payload),
                    Err(e) => Stage::Error(e),
                },
                _ => Stage::Write(payload),
            },
            Stage::Error(e) => handle_error(e, &route, &mut req, &mut res).await,
            Stage::Write(payload) => match prepare(payload, req.method() == Method::HEAD).await {
                Ok(outgoing) => return write(req, res, outgoing, &observers),
                Err(e) => {
                    debug!(cause = %e, "payload stream failed before the headers were written");
                    Stage::Error(e)
                }
            },
        };
    }
}

async fn run_hooks(
    stage: HookName,
    hooks: &Hooks<dyn RequestHook>,
    req: &mut Request,
    res: &mut Response,
) -> Result<(), BoxError> {
    match hooks {
        Some(hooks) => run_request_hooks(stage, hooks, req, res).await,
        None => Ok(()),
    }
}

fn after_hooks(result: Result<(), BoxError>, res: &Response, next: Stage) -> Stage {
    match result {
        Err(e) => Stage::Error(e),
        Ok(()) if res.is_sent() => Stage::Send,
        Ok(()) => next,
    }
}

/// The handler or error handler finished; whatever it returned is the response.
fn settle(res: &mut Response, payload: Option<Payload>) -> Stage {
    match payload {
        // sending a payload after `res.send` is a double send and panics
        Some(payload) => res.send(payload),
        None if !res.is_sent() => res.send_empty(),
        None => {}
    }
    Stage::Send
}

async fn handle_error(error: BoxError, route: &RouteContext, req: &mut Request, res: &mut Response) -> Stage {
    // whatever was sent before failing is discarded
    res.reset_sent();

    let status = error_status(error.as_ref());
    if status == StatusCode::NOT_FOUND {
        res.remove_header(CONTENT_TYPE).set_status(StatusCode::NOT_FOUND);
        return match &route.not_found {
            Some(not_found) => {
                debug!(url = req.url(), "delegate to the not-found handler");
                res.set_route(triomphe::Arc::clone(not_found));
                Stage::Handler
            }
            None => {
                res.send(not_found_message(req));
                Stage::Send
            }
        };
    }

    if status.is_server_error() {
        error!(cause = %error, %status, method = %req.method(), url = req.url(), "request failed");
    } else {
        warn!(cause = %error, %status, method = %req.method(), url = req.url(), "request failed");
    }
    res.set_status(status);

    if let Some(handler) = &route.error_handler {
        if res.use_custom_error() {
            res.remove_header(CONTENT_TYPE);
            return match handler.call(error, req, res).await {
                Ok(payload) => settle(res, payload),
                Err(e) => Stage::Error(e),
            };
        }
    }

    let payload = serialize_error(status, &error.to_string());
    // content-length is computed on write
    res.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json")).remove_header(CONTENT_LENGTH);
    res.send_empty();
    // skipped when onSend already ran for this request
    Stage::OnSend(Some(SerializedPayload::Text(payload)))
}

async fn parse_body(
    req: &mut Request,
    route: &RouteContext,
    body: Option<BodyStream>,
    options: EngineOptions,
) -> Result<(), BoxError> {
    let content_type =
        req.headers().get(CONTENT_TYPE).map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

    match route.method_class {
        MethodClass::NoBody => return Ok(()),
        MethodClass::OptionalBody if content_type.is_none() => return Ok(()),
        MethodClass::Body | MethodClass::OptionalBody => {}
    }

    let declared_length = declared_length(req.headers())?;
    if content_type.is_none() && declared_length == Some(0) {
        return Ok(());
    }

    let content_type = content_type.unwrap_or_default();
    let Some(parser) = route.body_parser.lookup(&content_type) else {
        if options.allow_unsupported_media_type {
            debug!(content_type = %content_type, "no body parser, leaving the body unparsed");
            return Ok(());
        }
        return Err(RequestError::UnsupportedMediaType { content_type }.into());
    };

    trace!(content_type = %content_type, ?declared_length, ?parser, "parse request body");
    let stream = body.unwrap_or_else(BodyStream::empty);
    let parsed = parser.run(req, stream, declared_length, route.body_limit).await?;
    req.set_body(parsed);
    Ok(())
}

/// The declared body length, `None` when the body is chunked.
///
/// Only the leading digits count, so `2.0` declares 2 bytes. A value without
/// leading digits, a negative one included, is invalid.
fn declared_length(headers: &HeaderMap) -> Result<Option<u64>, RequestError> {
    if headers.contains_key(TRANSFER_ENCODING) {
        return Ok(None);
    }

    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(Some(0));
    };
    value
        .to_str()
        .ok()
        .map(|length| {
            let length = length.trim_start();
            let digits = length.bytes().take_while(u8::is_ascii_digit).count();
            &length[..digits]
        })
        .and_then(|digits| digits.parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| RequestError::InvalidContentLength {
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })
}

enum Outgoing {
    Empty,
    Buffered(Bytes),
    Stream(Option<Bytes>, PayloadStream),
}

/// Reads the first chunk of a stream payload while the headers can still change.
async fn prepare(payload: Option<SerializedPayload>, head: bool) -> Result<Outgoing, BoxError> {
    match payload {
        None => Ok(Outgoing::Empty),
        Some(SerializedPayload::Text(text)) => Ok(Outgoing::Buffered(Bytes::from(text))),
        Some(SerializedPayload::Bytes(bytes)) => Ok(Outgoing::Buffered(bytes)),
        Some(SerializedPayload::Stream(_)) if head => Ok(Outgoing::Empty),
        Some(SerializedPayload::Stream(mut stream)) => match stream.next().await {
            Some(Ok(first)) => Ok(Outgoing::Stream(Some(first), stream)),
            Some(Err(e)) => Err(e),
            None => Ok(Outgoing::Stream(None, stream)),
        },
    }
}

fn write(
    mut req: Request,
    res: Response,
    outgoing: Outgoing,
    observers: &triomphe::Arc<RouteContext>,
) -> http::Response<ResponseBody> {
    req.clear_body();
    let head = req.method() == Method::HEAD;
    let (status, mut headers, extensions) = res.into_parts();

    let body = match outgoing {
        Outgoing::Empty => {
            let has_length = !status.is_informational()
                && status != StatusCode::NO_CONTENT
                && status != StatusCode::NOT_MODIFIED
                && !head;
            if has_length {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(0));
            }
            ResponseBody::empty()
        }
        Outgoing::Buffered(bytes) => {
            if !headers.contains_key(CONTENT_LENGTH) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            }
            if head { ResponseBody::empty() } else { ResponseBody::once(bytes) }
        }
        Outgoing::Stream(first, rest) => ResponseBody::stream(first, rest),
    };

    trace!(%status, method = %req.method(), url = req.url(), "write response");
    let notifier = observers.on_finished.as_ref().map(|_| {
        let finished = Finished::new(req, status, headers.clone(), extensions);
        FinishNotifier::new(triomphe::Arc::clone(observers), finished)
    });

    let mut response = http::Response::new(body.with_notifier(notifier));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(name, value)| (http::HeaderName::from_static(name), HeaderValue::from_static(value)))
            .collect()
    }

    #[test]
    fn declared_lengths() {
        assert_eq!(declared_length(&headers(&[])).unwrap(), Some(0));
        assert_eq!(declared_length(&headers(&[("content-length", "42")])).unwrap(), Some(42));
        assert_eq!(declared_length(&headers(&[("transfer-encoding", "chunked")])).unwrap(), None);
        assert_eq!(declared_length(&headers(&[("content-length", "2.0")])).unwrap(), Some(2));
        assert_eq!(declared_length(&headers(&[("content-length", "1.5")])).unwrap(), Some(1));

        for invalid in ["abc", "-1", "", ".5"] {
            let err = declared_length(&headers(&[("content-length", invalid)])).unwrap_err();
            assert_eq!(err.to_string(), format!("Invalid Content-Length: \"{invalid}\""));
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn stream_errors_surface_before_headers() {
        let failing = futures::stream::iter(vec![Err::<Bytes, BoxError>(std::io::Error::other("boom").into())]).boxed();
        let err = prepare(Some(SerializedPayload::Stream(failing)), false).await.err().unwrap();
        assert_eq!(err.to_string(), "boom");

        let failing = futures::stream::iter(vec![Err::<Bytes, BoxError>(std::io::Error::other("boom").into())]).boxed();
        assert!(matches!(prepare(Some(SerializedPayload::Stream(failing)), true).await, Ok(Outgoing::Empty)));
    }
}
