#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parley_common::init_data;
use parley_common::{ClientMessage, InitDataVerifier, Participant, ServerMessage};
use parleyd::config::ServerConfig;
use parleyd::server::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

pub const BOT_TOKEN: &str = "424242:integration-token";

type ClientStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        web_app_url: None,
        max_conns: 1000,
        msg_rate: 600,
        max_message_size: 65_536,
        send_queue: 256,
        ping_interval: 30,
        idle_timeout: 120,
    }
}

/// Signed init data for a user with the given id and first name.
pub fn credential(id: i64, first_name: &str) -> String {
    let user = format!(r#"{{"id":{id},"first_name":"{first_name}"}}"#);
    init_data::sign(BOT_TOKEN, &[("auth_date", "1700000000"), ("user", &user)]).unwrap()
}

pub async fn start_server_with(
    config: impl FnOnce(SocketAddr) -> ServerConfig,
    bot_token: Option<&str>,
) -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::new(
        config(addr),
        InitDataVerifier::new(bot_token),
    ));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = parleyd::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    start_server_with(test_config, Some(BOT_TOKEN)).await
}

/// Opens a raw WebSocket to `/ws/{init_data}` without reading anything.
pub async fn connect_raw(addr: &SocketAddr, init_data: &str) -> ClientStream {
    let url = format!("ws://{addr}/ws/{init_data}");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// Performs the upgrade over a bare socket and returns it unread.
///
/// The peer never reads, so it never answers pings.
pub async fn connect_silent(addr: &SocketAddr, init_data: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws/{init_data} HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<ClientStream, Message>,
    pub ws_rx: futures_util::stream::SplitStream<ClientStream>,
    pub id: i64,
    /// Roster received right after joining.
    pub join_roster: Vec<Participant>,
}

impl TestClient {
    /// Connects as `id` and consumes the roster broadcast triggered by the join.
    pub async fn connect(addr: &SocketAddr, id: i64, first_name: &str) -> Self {
        let ws = connect_raw(addr, &credential(id, first_name)).await;
        let (ws_tx, ws_rx) = ws.split();
        let mut client = Self {
            ws_tx,
            ws_rx,
            id,
            join_roster: Vec::new(),
        };

        let roster = client.recv_roster().await;
        assert!(
            roster.iter().any(|p| p.id().0 == id),
            "own join missing from roster"
        );
        client.join_roster = roster;
        client
    }

    pub async fn send(&mut self, msg: &ClientMessage) {
        self.send_text(msg.encode().unwrap()).await;
    }

    pub async fn send_text(&mut self, text: String) {
        self.ws_tx.send(Message::Text(text)).await.unwrap();
    }

    /// Next raw WebSocket message, skipping transport pings.
    pub async fn recv_raw(&mut self) -> Option<Message> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for message")?;
            match msg {
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(other) => return Some(other),
                Err(_) => return None,
            }
        }
    }

    pub async fn recv_message(&mut self) -> ServerMessage {
        match self.recv_raw().await {
            Some(Message::Text(text)) => ServerMessage::parse(&text).unwrap(),
            other => panic!("expected text message, got {other:?}"),
        }
    }

    /// Next message that is not a roster broadcast.
    pub async fn recv_signal(&mut self) -> ServerMessage {
        loop {
            match self.recv_message().await {
                ServerMessage::UserList(_) => continue,
                msg => return msg,
            }
        }
    }

    pub async fn recv_roster(&mut self) -> Vec<Participant> {
        match self.recv_message().await {
            ServerMessage::UserList(users) => users,
            other => panic!("expected user_list, got {other:?}"),
        }
    }

    pub async fn recv_message_timeout(&mut self, timeout: Duration) -> Option<ServerMessage> {
        tokio::time::timeout(timeout, self.recv_message()).await.ok()
    }
}
