//! Session orchestration.
//!
//! Each inbound connection walks `Admitted → IRCConnecting → Relaying →
//! Closed`, or stops at `Rejected` before admission. The slot taken at
//! admission is held by a [`SessionPermit`] that travels with the session
//! and is released when the session ends, however it ends.

pub mod identity;
pub mod limiter;

pub use identity::ClientIdentity;
pub use limiter::{SessionLimiter, SessionPermit};

use axum::extract::ws::WebSocket;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::irc::{IrcDialer, IrcTarget};
use crate::relay;

/// Shared state handed to every connection.
#[derive(Clone)]
pub struct BridgeState {
    inner: Arc<Inner>,
}

struct Inner {
    target: IrcTarget,
    allowed_origin: Option<String>,
    dialer: IrcDialer,
    limiter: Arc<SessionLimiter>,
}

impl BridgeState {
    pub fn new(config: &BridgeConfig) -> anyhow::Result<Self> {
        let dialer = IrcDialer::new(config.irc.accept_invalid_certs)?;
        Ok(Self {
            inner: Arc::new(Inner {
                target: IrcTarget::from(&config.irc),
                allowed_origin: config.server.allowed_origin.clone(),
                dialer,
                limiter: SessionLimiter::new(config.limits.max_sessions_per_ip),
            }),
        })
    }

    pub fn limiter(&self) -> &Arc<SessionLimiter> {
        &self.inner.limiter
    }

    pub fn target(&self) -> &IrcTarget {
        &self.inner.target
    }

    fn check_origin(&self, headers: &HeaderMap) -> Result<(), BridgeError> {
        let Some(allowed) = &self.inner.allowed_origin else {
            return Ok(());
        };
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok());
        if origin == Some(allowed.as_str()) {
            Ok(())
        } else {
            Err(BridgeError::OriginRejected {
                origin: origin.map(str::to_owned),
            })
        }
    }
}

/// `GET /`: admit, upgrade, then bridge the socket to IRC.
pub async fn ws_handler(
    State(state): State<BridgeState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = ClientIdentity::from(remote);
    info!(client = %remote, "new client");

    if let Err(e) = state.check_origin(&headers) {
        warn!(client = %identity, error = %e, "rejected");
        return e.into_response();
    }

    let Some(permit) = state.limiter().admit(identity) else {
        warn!(client = %identity, "rejected: too many ongoing connections");
        return BridgeError::AdmissionRejected { identity }.into_response();
    };
    debug!(
        client = %identity,
        active = state.limiter().active_count(identity),
        "admitted"
    );

    ws.on_failed_upgrade(move |e: axum::Error| {
        warn!(client = %identity, error = %BridgeError::Upgrade(e.to_string()), "upgrade failed");
    })
    .on_upgrade(session_task(state, permit))
}

/// The work run once the upgrade completes. The permit lives inside the
/// returned closure: if the upgrade never completes the closure is dropped
/// unrun and the slot is given back.
fn session_task(
    state: BridgeState,
    permit: SessionPermit,
) -> impl FnOnce(WebSocket) -> BoxFuture<'static, ()> + Send + 'static {
    move |socket| {
        let span = info_span!("session", client = %permit.identity());
        run_session(state, socket, permit).instrument(span).boxed()
    }
}

/// Dial IRC and relay until either side goes away.
pub async fn run_session(state: BridgeState, mut socket: WebSocket, permit: SessionPermit) {
    let target = state.target();
    debug!(host = %target.host, port = target.port, tls = target.tls, "connecting to IRC");

    let irc = match state.inner.dialer.connect(target).await {
        Ok(irc) => irc,
        Err(e) => {
            warn!(error = %e, "IRC dial failed, closing client");
            match timeout(relay::CLOSE_TIMEOUT, socket.close()).await {
                Ok(Err(e)) => trace!(error = %e, "websocket close"),
                Err(_) => debug!("websocket close timed out"),
                Ok(Ok(())) => {}
            }
            drop(permit);
            return;
        }
    };

    info!(peer = ?irc.peer_addr().ok(), tls = irc.is_tls(), "relaying");
    match relay::run(socket, irc).await {
        Ok(()) => info!("session closed"),
        Err(e) => info!(reason = %e, "session ended"),
    }

    drop(permit);
}
