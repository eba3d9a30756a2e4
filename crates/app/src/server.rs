use crate::app::App;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug)]
pub struct ServerBuilder {
    app: Option<App>,
    address: Option<io::Result<Vec<SocketAddr>>>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { app: None, address: None }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().map(Iterator::collect));
        self
    }

    pub fn app(mut self, app: App) -> Self {
        self.app = Some(app);
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        let app = self.app.ok_or(ServerError::MissingApp)?;
        let address = self.address.ok_or(ServerError::MissingAddress)?.map_err(ServerError::Address)?;
        Ok(Server { app, address })
    }
}

/// Serves an [`App`] over HTTP/1.1 with hyper on the tokio runtime.
#[derive(Debug)]
pub struct Server {
    app: App,
    address: Vec<SocketAddr>,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("app must be set")]
    MissingApp,
    #[error("address must be set")]
    MissingAddress,
    #[error("invalid address: {0}")]
    Address(#[source] io::Error),
    #[error("failed to bind {address:?}: {source}")]
    Bind {
        address: Vec<SocketAddr>,
        #[source]
        source: io::Error,
    },
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Installs a stdout subscriber, binds the address and serves until the
    /// process stops.
    pub async fn start(self) -> Result<(), ServerError> {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            debug!("a global tracing subscriber is already installed");
        }

        let listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Err(ServerError::Bind { address: self.address, source: e });
            }
        };
        info!("start listening at {:?}", self.address);

        serve(listener, self.app).await;
        Ok(())
    }
}

/// Accepts connections on `listener` forever, one task per connection.
pub async fn serve(listener: TcpListener, app: App) {
    loop {
        let (tcp_stream, remote_addr) = match listener.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let app = app.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: http::Request<Incoming>| {
                let app = app.clone();
                async move { Ok::<_, Infallible>(app.handle(req).await) }
            });

            match http1::Builder::new().serve_connection(TokioIo::new(tcp_stream), service).await {
                Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
                Err(e) => error!(%remote_addr, cause = %e, "service has error, connection shutdown"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_app_and_address() {
        let err = Server::builder().address("127.0.0.1:0").build().unwrap_err();
        assert!(matches!(err, ServerError::MissingApp));

        let app = App::builder().finalize().unwrap();
        let err = Server::builder().app(app.clone()).build().unwrap_err();
        assert!(matches!(err, ServerError::MissingAddress));

        let server = Server::builder().app(app).address("127.0.0.1:8080").build().unwrap();
        assert_eq!(server.address, vec![SocketAddr::from(([127, 0, 0, 1], 8080))]);
    }

    #[test]
    fn unresolvable_address() {
        let app = App::builder().finalize().unwrap();
        let err = Server::builder().app(app).address("not an address").build().unwrap_err();
        assert!(matches!(err, ServerError::Address(_)));
    }
}
