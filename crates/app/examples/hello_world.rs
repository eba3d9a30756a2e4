use micro_app::{App, Server, get, handler_fn};

#[tokio::main]
async fn main() {
    let mut app = App::builder();
    app.route("/", get(handler_fn(|_req, _res| Box::pin(async { Ok(Some("hello world".into())) })))).unwrap();

    Server::builder().app(app.finalize().unwrap()).address("127.0.0.1:3000").build().unwrap().start().await.unwrap();
}
