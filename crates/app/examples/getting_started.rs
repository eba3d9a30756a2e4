use http::{HeaderValue, StatusCode};
use micro_app::{
    App, AppOptions, Finished, ParseAs, ParserOptions, RawBody, RequestBody, RequestError, Server, error_handler_fn,
    get, handler_fn, hook_fn, parser_fn, post, send_hook_fn,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tracing::info;

#[derive(Deserialize, Debug)]
struct User {
    name: String,
    zip: String,
}

#[derive(Clone)]
struct Started(Instant);

// curl -v -H 'Content-Type: application/json' -d '{"name":"hello","zip":"world"}' http://127.0.0.1:8080/api/users
// curl -v -H 'Content-Type: text/csv' -d 'a,b,c' http://127.0.0.1:8080/api/csv
// curl -v -H 'Authorization: nope' http://127.0.0.1:8080/api/users/1
#[tokio::main]
async fn main() {
    let mut app = App::with_options(AppOptions::new().body_limit(64 * 1024));

    app.on_request(hook_fn(|req, _res| {
        Box::pin(async move {
            req.extensions_mut().insert(Started(Instant::now()));
            Ok(())
        })
    }));
    app.on_send(send_hook_fn(|_req, res, payload| {
        Box::pin(async move {
            res.set_header("x-powered-by", HeaderValue::from_static("micro-app"));
            Ok(payload)
        })
    }));
    app.on_finished(|finished: &Finished| {
        let elapsed = finished.request().extensions().get::<Started>().map(|started| started.0.elapsed());
        info!(
            url = finished.request().url(),
            status = %finished.status(),
            ?elapsed,
            outcome = ?finished.outcome(),
            "request done"
        );
    });

    app.route("/", get(handler_fn(|_req, _res| Box::pin(async { Ok(Some("hello world\r\n".into())) })))).unwrap();

    let api = app.sub_app("/api").unwrap();
    api.pre_handler(hook_fn(|req, _res| {
        Box::pin(async move {
            match req.header("authorization") {
                Some("nope") => Err(RequestError::with_status(StatusCode::UNAUTHORIZED, "bad credentials").into()),
                _ => Ok(()),
            }
        })
    }));
    api.add_body_parser(
        "text/csv",
        ParserOptions::new().parse_as(ParseAs::String).body_limit(1024),
        parser_fn(|_req, body| {
            Box::pin(async move {
                match body {
                    RawBody::Text(text) => {
                        Ok(RequestBody::other(text.split(',').map(str::to_owned).collect::<Vec<_>>()))
                    }
                    _ => Ok(RequestBody::other(Vec::<String>::new())),
                }
            })
        }),
    )
    .unwrap();
    api.set_error_handler(error_handler_fn(|error, _req, res| {
        Box::pin(async move { Ok(Some(json!({ "code": res.status().as_u16(), "reason": error.to_string() }).into())) })
    }));

    api.route(
        "/users",
        post(handler_fn(|req, res| {
            Box::pin(async move {
                let user: User = req.body().ok_or_else(|| RequestError::bad_request("missing body"))?.deserialize()?;
                res.set_status(StatusCode::CREATED);
                Ok(Some(json!({ "name": user.name, "zip": user.zip }).into()))
            })
        })),
    )
    .unwrap();
    api.route(
        "/users/{id}",
        get(handler_fn(|req, _res| {
            Box::pin(async move { Ok(Some(json!({ "id": req.params().get("id") }).into())) })
        })),
    )
    .unwrap();
    api.route(
        "/csv",
        post(handler_fn(|req, _res| {
            Box::pin(async move {
                let fields =
                    req.body().and_then(|body| body.downcast_ref::<Vec<String>>()).cloned().unwrap_or_default();
                Ok(Some(format!("{} fields\r\n", fields.len()).into()))
            })
        })),
    )
    .unwrap();

    Server::builder().app(app.finalize().unwrap()).address("127.0.0.1:8080").build().unwrap().start().await.unwrap();
}
