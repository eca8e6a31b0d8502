use crabbridge::config::BridgeConfig;
use crabbridge::server;
use crabbridge::session::{BridgeState, ClientIdentity};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn localhost() -> ClientIdentity {
    "127.0.0.1".parse().unwrap()
}

async fn start_bridge(irc_port: u16, max_per_ip: u32, origin: Option<&str>) -> (String, BridgeState) {
    let mut config = BridgeConfig::default();
    config.irc.host = "127.0.0.1".into();
    config.irc.port = irc_port;
    config.irc.tls = false;
    config.limits.max_sessions_per_ip = max_per_ip;
    config.server.allowed_origin = origin.map(str::to_owned);

    let state = BridgeState::new(&config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(
        listener,
        server::router(state.clone()),
        std::future::pending(),
    ));

    (format!("ws://{addr}/"), state)
}

async fn fake_irc() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn connect(url: &str) -> Client {
    let (client, _) = timeout(WAIT, connect_async(url)).await.unwrap().unwrap();
    client
}

async fn accept_irc(listener: &TcpListener) -> TcpStream {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    stream
}

/// Read until the bridge closes the socket, returning any text frames seen.
async fn drain(client: &mut Client) -> Vec<String> {
    let mut texts = Vec::new();
    loop {
        match timeout(WAIT, client.next()).await.unwrap() {
            Some(Ok(Message::Text(t))) => texts.push(t.as_str().to_owned()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return texts,
            Some(Ok(_)) => {}
        }
    }
}

async fn wait_released(state: &BridgeState, identity: ClientIdentity) {
    timeout(WAIT, async {
        while state.limiter().active_count(identity) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("slot was never released");
}

fn assert_forbidden(err: WsError) -> String {
    match err {
        WsError::Http(resp) => {
            assert_eq!(resp.status(), 403);
            String::from_utf8_lossy(resp.body().as_deref().unwrap_or_default()).into_owned()
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_session_from_same_ip_is_rejected() {
    let (irc, irc_port) = fake_irc().await;
    let (url, state) = start_bridge(irc_port, 1, None).await;

    let _first = connect(&url).await;
    let _irc_conn = accept_irc(&irc).await;
    assert_eq!(state.limiter().active_count(localhost()), 1);

    let err = timeout(WAIT, connect_async(url.as_str()))
        .await
        .unwrap()
        .err()
        .expect("connection should be rejected");
    let body = assert_forbidden(err);
    assert!(body.contains("Too many ongoing connections"));
    assert_eq!(state.limiter().active_count(localhost()), 1);
}

#[tokio::test]
async fn test_failed_dial_closes_client_and_releases_slot() {
    let (irc, irc_port) = fake_irc().await;
    drop(irc);
    let (url, state) = start_bridge(irc_port, 1, None).await;

    let mut client = connect(&url).await;
    assert!(drain(&mut client).await.is_empty());
    wait_released(&state, localhost()).await;

    // The freed slot admits the next connection.
    let mut again = connect(&url).await;
    assert!(drain(&mut again).await.is_empty());
}

#[tokio::test]
async fn test_text_frame_reaches_irc_with_crlf() {
    let (irc, irc_port) = fake_irc().await;
    let (url, _state) = start_bridge(irc_port, 1, None).await;

    let mut client = connect(&url).await;
    let irc_conn = accept_irc(&irc).await;
    let mut irc_lines = BufReader::new(irc_conn);

    client.send(Message::text("NICK bob".to_string())).await.unwrap();
    client.send(Message::binary(vec![0u8, 1, 2])).await.unwrap();
    client.send(Message::text("USER bob 0 * :Bob".to_string())).await.unwrap();

    let mut line = String::new();
    timeout(WAIT, irc_lines.read_line(&mut line)).await.unwrap().unwrap();
    assert_eq!(line, "NICK bob\r\n");

    line.clear();
    timeout(WAIT, irc_lines.read_line(&mut line)).await.unwrap().unwrap();
    assert_eq!(line, "USER bob 0 * :Bob\r\n");
}

#[tokio::test]
async fn test_irc_line_reaches_client_as_one_frame() {
    let (irc, irc_port) = fake_irc().await;
    let (url, _state) = start_bridge(irc_port, 1, None).await;

    let mut client = connect(&url).await;
    let mut irc_conn = accept_irc(&irc).await;

    irc_conn.write_all(b":server 001 bob :Welcome\n").await.unwrap();

    match timeout(WAIT, client.next()).await.unwrap() {
        Some(Ok(Message::Text(t))) => assert_eq!(t.as_str(), ":server 001 bob :Welcome\n"),
        other => panic!("expected one text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_irc_disconnect_closes_client() {
    let (irc, irc_port) = fake_irc().await;
    let (url, state) = start_bridge(irc_port, 1, None).await;

    let mut client = connect(&url).await;
    let mut irc_conn = accept_irc(&irc).await;
    irc_conn.write_all(b"ERROR :Closing link\n").await.unwrap();
    drop(irc_conn);

    assert_eq!(drain(&mut client).await, vec!["ERROR :Closing link\n".to_string()]);
    wait_released(&state, localhost()).await;
    assert_eq!(state.limiter().tracked_identities(), 0);
}

#[tokio::test]
async fn test_client_disconnect_closes_irc() {
    let (irc, irc_port) = fake_irc().await;
    let (url, state) = start_bridge(irc_port, 1, None).await;

    let mut client = connect(&url).await;
    let irc_conn = accept_irc(&irc).await;
    client.close(None).await.unwrap();

    let mut rest = String::new();
    let mut irc_lines = BufReader::new(irc_conn);
    let n = timeout(WAIT, irc_lines.read_line(&mut rest)).await.unwrap().unwrap();
    assert_eq!(n, 0, "irc side should see EOF, got {rest:?}");
    wait_released(&state, localhost()).await;
}

#[tokio::test]
async fn test_origin_check() {
    let (irc, irc_port) = fake_irc().await;
    let (url, state) = start_bridge(irc_port, 0, Some("https://chat.example.org")).await;

    let err = timeout(WAIT, connect_async(url.as_str()))
        .await
        .unwrap()
        .err()
        .expect("connection should be rejected");
    assert_forbidden(err);

    let mut request = url.as_str().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://evil.example"));
    let err = timeout(WAIT, connect_async(request))
        .await
        .unwrap()
        .err()
        .expect("connection should be rejected");
    assert_forbidden(err);
    assert_eq!(state.limiter().tracked_identities(), 0);

    let mut request = url.as_str().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://chat.example.org"));
    let (_client, _) = timeout(WAIT, connect_async(request)).await.unwrap().unwrap();
    let _irc_conn = accept_irc(&irc).await;
    assert_eq!(state.limiter().active_count(localhost()), 1);
}
