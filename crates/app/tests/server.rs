use micro_app::{App, get, handler_fn, serve};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn exchange(raw_request: &str) -> String {
    let mut app = App::builder();
    app.route("/hello", get(handler_fn(|_req, _res| Box::pin(async { Ok(Some("hello world".into())) })))).unwrap();
    let app = app.finalize().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, app));

    let mut stream = TcpStream::connect(address).await.unwrap();
    stream.write_all(raw_request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8(response).unwrap()
}

#[tokio::test]
async fn serves_over_tcp() {
    let response = exchange("GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("content-type: text/plain\r\n"), "{response}");
    assert!(response.contains("content-length: 11\r\n"), "{response}");
    assert!(response.ends_with("\r\n\r\nhello world"), "{response}");
}

#[tokio::test]
async fn unsupported_methods_over_tcp() {
    let response = exchange("TRACE /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\n"), "{response}");
    assert!(response.ends_with("Unsupported request method: TRACE"), "{response}");
}
