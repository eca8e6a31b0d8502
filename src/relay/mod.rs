//! Bidirectional relay between a WebSocket client and an IRC connection.
//!
//! WebSocket is frame-oriented and IRC is line-oriented; this module is the
//! only place that translates between the two:
//!
//! - **IRC → client**: every line read from the server, trailing `\n`
//!   included, becomes one text frame.
//! - **client → IRC**: every text frame becomes one line with `\r\n`
//!   appended. Binary frames are dropped.
//!
//! Both directions run inside one `select!`. Whichever finishes first wins;
//! the other future is dropped, which abandons its pending read or write,
//! and then both endpoints are closed.

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{BridgeError, Endpoint};

/// Initial capacity of the line buffer. RFC 1459 caps lines at 512 bytes;
/// longer lines still work, the buffer just grows.
const LINE_CAPACITY: usize = 512;

/// Upper bound on each close during teardown. A peer that stopped reading
/// must not keep the session, and its slot, alive.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridge an upgraded socket and an IRC connection until either side ends.
///
/// Returns `Ok(())` when a peer closed cleanly and the error that ended the
/// session otherwise. Both sides are closed before this returns.
pub async fn run<I>(socket: WebSocket, irc: I) -> Result<(), BridgeError>
where
    I: AsyncRead + AsyncWrite,
{
    let (ws_tx, ws_rx) = socket.split();
    pump(ws_tx, ws_rx, irc).await
}

/// Relay over an already split WebSocket. Generic so the engine can be
/// driven by anything that yields and accepts [`Message`]s.
pub async fn pump<Tx, Rx, E, I>(mut ws_tx: Tx, mut ws_rx: Rx, irc: I) -> Result<(), BridgeError>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    I: AsyncRead + AsyncWrite,
{
    let (irc_rx, mut irc_tx) = tokio::io::split(irc);
    let mut irc_rx = BufReader::new(irc_rx);

    let outcome = tokio::select! {
        res = irc_to_client(&mut irc_rx, &mut ws_tx) => res,
        res = client_to_irc(&mut ws_rx, &mut irc_tx) => res,
    };

    // Teardown. Either close may fail if the peer already went away.
    match timeout(CLOSE_TIMEOUT, irc_tx.shutdown()).await {
        Ok(Err(e)) => trace!(error = %e, "irc shutdown"),
        Err(_) => debug!("irc shutdown timed out"),
        Ok(Ok(())) => {}
    }
    match timeout(CLOSE_TIMEOUT, ws_tx.close()).await {
        Ok(Err(e)) => trace!(error = %e, "websocket close"),
        Err(_) => debug!("websocket close timed out"),
        Ok(Ok(())) => {}
    }

    outcome
}

async fn irc_to_client<R, Tx>(irc: &mut R, ws_tx: &mut Tx) -> Result<(), BridgeError>
where
    R: AsyncBufRead + Unpin,
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let mut line = Vec::with_capacity(LINE_CAPACITY);
    loop {
        line.clear();
        let n = irc
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| BridgeError::read(Endpoint::Irc, e))?;

        // EOF. An unterminated fragment is not a line and is not forwarded.
        if n == 0 || line.last() != Some(&b'\n') {
            debug!(dropped = line.len(), "irc server closed the connection");
            return Ok(());
        }

        trace!(line = %String::from_utf8_lossy(&line).trim_end(), "irc -> client");
        let text = String::from_utf8_lossy(&line).into_owned();
        ws_tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| BridgeError::write(Endpoint::Client, e))?;
    }
}

async fn client_to_irc<Rx, E, W>(ws_rx: &mut Rx, irc: &mut W) -> Result<(), BridgeError>
where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(LINE_CAPACITY);
    while let Some(frame) = ws_rx.next().await {
        match frame.map_err(|e| BridgeError::read(Endpoint::Client, e))? {
            Message::Text(text) => {
                trace!(line = %text.as_str(), "client -> irc");
                line.clear();
                line.extend_from_slice(text.as_str().as_bytes());
                line.extend_from_slice(b"\r\n");
                irc.write_all(&line)
                    .await
                    .map_err(|e| BridgeError::write(Endpoint::Irc, e))?;
                irc.flush()
                    .await
                    .map_err(|e| BridgeError::write(Endpoint::Irc, e))?;
            }
            Message::Binary(data) => {
                debug!(len = data.len(), "ignoring binary frame");
            }
            Message::Close(frame) => {
                debug!(?frame, "client sent close");
                return Ok(());
            }
            // Pings are answered by the websocket layer.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    debug!("client stream ended");
    Ok(())
}
