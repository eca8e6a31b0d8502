//! HTTP(S) front end.
//!
//! Routes `/` to the session handler. Plain HTTP goes through `axum::serve`;
//! HTTPS terminates TLS per connection and hands the stream to hyper with
//! upgrades enabled so the WebSocket handshake can complete.

pub mod tls;

use anyhow::{Context, Result};
use axum::extract::ConnectInfo;
use axum::routing::get;
use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::session::{self, BridgeState};

pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/", get(session::ws_handler))
        .with_state(state)
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn run<F>(config: &BridgeConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = BridgeState::new(config)?;
    let target = state.target();
    info!(
        irc = %format!("{}:{}", target.host, target.port),
        tls = target.tls,
        max_per_ip = state.limiter().max_per_identity(),
        "bridging to IRC"
    );

    let addr = config.server.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let app = router(state);

    match config.server.tls_files() {
        Some((cert, key)) => {
            let acceptor = tls::acceptor(cert, key)?;
            info!("Starting server with https on {}", listener.local_addr()?);
            serve_tls(listener, acceptor, app, shutdown).await
        }
        None => {
            info!("Starting server on {}", listener.local_addr()?);
            serve(listener, app, shutdown).await
        }
    }
}

pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("Server error")
}

pub async fn serve_tls<F>(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::pin!(shutdown);

    loop {
        let (tcp, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
            _ = &mut shutdown => break,
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(tcp).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(client = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
                request.extensions_mut().insert(ConnectInfo(peer));
                app.clone().oneshot(request)
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                debug!(client = %peer, error = %e, "connection error");
            }
        });
    }

    info!("Listener closed");
    Ok(())
}
