use http::{Request, Response};
use http_body::Body;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::{Service, ServiceExt};

type GenericError = Box<dyn std::error::Error + Send + Sync>;

/// A real HTTP server in front of a tower service
///
/// Each request carries the peer [`SocketAddr`] in its extensions, which is
/// where the `ip` field of a published message comes from.
pub struct TestServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Serve `service` on a random local port
    pub async fn start<S, B>(service: S) -> std::io::Result<Self>
    where
        S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<GenericError>,
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<GenericError>,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut stop_future = shutdown_rx;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, peer)) => {
                                let io = TokioIo::new(stream);
                                let service = service.clone();

                                tokio::spawn(async move {
                                    let hyper_service = service_fn(move |mut req: Request<Incoming>| {
                                        req.extensions_mut().insert(peer);
                                        service.clone().oneshot(req)
                                    });
                                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                                        .serve_connection(io, hyper_service)
                                        .await
                                    {
                                        tracing::debug!(error = %err, "Error serving connection");
                                    }
                                });
                            }
                            Err(err) => tracing::warn!(error = %err, "Accept error"),
                        }
                    }
                    _ = &mut stop_future => {
                        break;
                    }
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL using `localhost`, so the default route is `http.localhost`
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.addr.port())
    }

    /// URL for `path`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
