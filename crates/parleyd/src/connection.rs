use crate::error::RelayError;
use crate::metrics::{counters, gauges, histograms};
use crate::ratelimit::RateLimiter;
use crate::registry::ConnId;
use crate::server::ServerState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_common::message::{ClientMessage, ProtocolError};
use parley_common::types::{ParticipantId, Profile, WS_PATH_PREFIX};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};
use tokio_tungstenite::tungstenite::http::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// Counts a connection against `max_conns` for as long as it lives.
struct ConnGuard {
    state: Arc<ServerState>,
}

impl ConnGuard {
    /// Reserves a slot, or returns `None` when the server is full.
    fn acquire(state: &Arc<ServerState>) -> Option<Self> {
        let max = state.config.max_conns;
        state
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        gauges::inc_connections_active();
        Some(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
        gauges::dec_connections_active();
    }
}

/// Extracts the raw credential from a `/ws/{init_data}` request path.
fn credential_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(WS_PATH_PREFIX)
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

fn authenticate(state: &ServerState, path: Option<&str>) -> Result<Profile, RelayError> {
    let init_data = path
        .and_then(credential_from_path)
        .ok_or(RelayError::MissingCredential)?;
    Ok(state.verifier.verify(init_data)?)
}

fn close_frame(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), RelayError> {
    let Some(_guard) = ConnGuard::acquire(&state) else {
        debug!(peer = %peer_addr, "max connections reached, rejecting");
        return Err(RelayError::AtCapacity);
    };

    let ws_config = WebSocketConfig {
        max_message_size: Some(state.config.max_message_size),
        max_frame_size: Some(state.config.max_message_size),
        ..WebSocketConfig::default()
    };

    let request_path = Arc::new(OnceLock::new());
    let path_cell = Arc::clone(&request_path);
    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        move |req: &Request<()>, resp: Response<()>| {
            let _ = path_cell.set(req.uri().path().to_owned());
            Ok(resp)
        },
        Some(ws_config),
    )
    .await?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let profile = match authenticate(&state, request_path.get().map(String::as_str)) {
        Ok(profile) => {
            counters::admissions_total("admitted");
            profile
        }
        Err(e) => {
            counters::admissions_total("rejected");
            debug!(peer = %peer_addr, error = %e, "refusing connection");
            let _ = ws_tx
                .send(close_frame(CloseCode::Policy, "authentication failed"))
                .await;
            return Err(e);
        }
    };

    let id = profile.id;
    let (tx, mut outbound) = mpsc::channel::<String>(state.config.send_queue);
    let conn = state.registry.register(profile, tx);
    info!(participant = %id, peer = %peer_addr, "participant connected");

    let mut session = Session {
        state: &state,
        id,
        conn,
        outbound: &mut outbound,
        shutdown: &mut shutdown,
    };
    let result = session.run(&mut ws_tx, &mut ws_rx).await;

    if state.registry.deregister(id, conn) {
        info!(participant = %id, "participant disconnected");
    }

    result
}

/// Decodes one text frame and hands it to the relay on behalf of `conn`.
///
/// Anything that does not decode is dropped here; the connection stays open.
fn dispatch(text: &str, state: &ServerState, sender: ParticipantId, conn: ConnId) {
    match ClientMessage::parse(text) {
        Ok(msg) => {
            let kind = msg.kind();
            let start = Instant::now();
            state.registry.route(sender, conn, msg);
            histograms::route_latency_seconds(start.elapsed().as_secs_f64());
            counters::messages_routed_total(kind);
        }
        Err(e) => {
            counters::messages_dropped_total("malformed");
            debug!(participant = %sender, error = %e, "discarding message");
        }
    }
}

/// A registered connection's view of the server.
struct Session<'a> {
    state: &'a ServerState,
    id: ParticipantId,
    conn: ConnId,
    outbound: &'a mut mpsc::Receiver<String>,
    shutdown: &'a mut watch::Receiver<()>,
}

impl Session<'_> {
    /// Drive the select loop until the connection closes.
    async fn run(&mut self, ws_tx: &mut WsSink, ws_rx: &mut WsRecv) -> Result<(), RelayError> {
        let config = &self.state.config;
        let id = self.id;
        let mut rate_limiter = RateLimiter::per_minute(config.msg_rate);
        let mut ping_interval = interval(Duration::from_secs(config.ping_interval));
        let idle_timeout = Duration::from_secs(config.idle_timeout);
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    last_activity = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if rate_limiter.check_and_record() {
                                dispatch(&text, self.state, id, self.conn);
                            } else {
                                counters::messages_dropped_total("rate_limit");
                                debug!(participant = %id, "rate limited, dropping message");
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            counters::messages_dropped_total("malformed");
                            debug!(participant = %id, error = %ProtocolError::NotText, "discarding message");
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                                debug!("failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => return Err(RelayError::WebSocket(e)),
                        _ => {}
                    }
                }
                frame = self.outbound.recv() => {
                    match frame {
                        Some(frame) => ws_tx.send(Message::Text(frame)).await?,
                        None => {
                            // registry dropped our handle: a newer connection took the id
                            debug!(participant = %id, "connection replaced, closing");
                            let _ = ws_tx.send(close_frame(CloseCode::Normal, "replaced")).await;
                            return Ok(());
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    debug!(participant = %id, "server shutting down, closing connection");
                    let _ = ws_tx.send(close_frame(CloseCode::Away, "server shutting down")).await;
                    return Ok(());
                }
                _ = ping_interval.tick() => {
                    if last_activity.elapsed() >= idle_timeout {
                        debug!(participant = %id, "idle timeout reached, closing connection");
                        let _ = ws_tx.send(close_frame(CloseCode::Away, "idle timeout")).await;
                        return Ok(());
                    }
                    if let Err(e) = ws_tx.send(Message::Ping(vec![])).await {
                        debug!("failed to send ping: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use parley_common::InitDataVerifier;

    fn state(max_conns: usize) -> Arc<ServerState> {
        let config = ServerConfig {
            listen: "127.0.0.1:8000".parse().unwrap(),
            metrics_addr: "127.0.0.1:9090".parse().unwrap(),
            web_app_url: None,
            max_conns,
            msg_rate: 600,
            max_message_size: 65_536,
            send_queue: 16,
            ping_interval: 30,
            idle_timeout: 120,
        };
        Arc::new(ServerState::new(config, InitDataVerifier::new(Some("1:test"))))
    }

    #[test]
    fn credential_is_taken_from_path() {
        assert_eq!(
            credential_from_path("/ws/user=%7B%7D&hash=ab"),
            Some("user=%7B%7D&hash=ab")
        );
    }

    #[test]
    fn credential_path_rejects_other_shapes() {
        assert_eq!(credential_from_path("/ws/"), None);
        assert_eq!(credential_from_path("/ws"), None);
        assert_eq!(credential_from_path("/"), None);
        assert_eq!(credential_from_path("/static/app.js"), None);
        assert_eq!(credential_from_path("/ws/a/b"), None);
    }

    #[test]
    fn authenticate_without_path_is_missing_credential() {
        let state = state(10);
        assert!(matches!(
            authenticate(&state, None),
            Err(RelayError::MissingCredential)
        ));
        assert!(matches!(
            authenticate(&state, Some("/ws/hash=00")),
            Err(RelayError::Auth(_))
        ));
    }

    #[test]
    fn authenticate_accepts_signed_credential() {
        let state = state(10);
        let data = parley_common::init_data::sign("1:test", &[("user", r#"{"id":77}"#)]).unwrap();
        let profile = authenticate(&state, Some(&format!("/ws/{data}"))).unwrap();
        assert_eq!(profile.id, ParticipantId(77));
        assert!(state.registry.is_empty());
    }

    #[test]
    fn conn_guard_enforces_limit_and_releases_on_drop() {
        let state = state(2);
        let first = ConnGuard::acquire(&state).unwrap();
        let _second = ConnGuard::acquire(&state).unwrap();
        assert!(ConnGuard::acquire(&state).is_none());
        assert_eq!(state.active_connections.load(Ordering::Acquire), 2);

        drop(first);
        assert_eq!(state.active_connections.load(Ordering::Acquire), 1);
        assert!(ConnGuard::acquire(&state).is_some());
    }

    #[test]
    fn dispatch_discards_malformed_text() {
        let state = state(10);
        let (tx, mut rx) = mpsc::channel(16);
        let conn = state.registry.register(Profile::new(ParticipantId(1)), tx);
        while rx.try_recv().is_ok() {}

        dispatch("{not json", &state, ParticipantId(1), conn);
        dispatch(r#"{"type":"call_user","data":{}}"#, &state, ParticipantId(1), conn);
        assert!(rx.try_recv().is_err());
        assert_eq!(
            state.registry.status(ParticipantId(1)),
            Some(parley_common::Status::Available)
        );
    }
}
