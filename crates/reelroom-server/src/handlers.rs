//! Connection handlers for the Reelroom server.
//!
//! This module handles the websocket lifecycle: join on upgrade, one writer
//! task draining the connection's outbound queue, one reader task feeding
//! the event router, and leave when either side stops.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{future, SinkExt, StreamExt};
use reelroom_core::{Hub, Session, TransportError};
use reelroom_protocol::{codec, ProtocolError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// How long the writer may take to finish its in-flight send and the close
/// frame once the reader has finished. Leaving closes the connection, so
/// events still queued at that point are discarded, not flushed.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How often hub statistics are published to the metrics exporter.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// The room hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state backed by the in-memory store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: Hub::in_memory(config.hub_config()),
            config,
        }
    }
}

/// Query parameters of the websocket upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    #[serde(default, alias = "roomId")]
    pub room_id: String,
    #[serde(default, alias = "userId")]
    pub user_id: String,
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        } else {
            spawn_stats_publisher(Arc::clone(&state));
        }
    }

    if config.rooms.evict_idle_rooms {
        state
            .hub
            .registry()
            .spawn_reaper(config.rooms.sweep_interval(), config.rooms.idle_grace());
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Reelroom server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let hub = state.hub.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            hub.registry().shutdown();
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn spawn_stats_publisher(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        loop {
            ticker.tick().await;
            metrics::record_hub_stats(&state.hub.registry().stats(), state.hub.store_errors());
        }
    });
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Room statistics handler.
async fn rooms_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.registry().stats();
    Json(serde_json::json!({
        "rooms": stats.room_count,
        "connections": stats.connection_count,
        "dispatchers_started": stats.dispatchers_started,
        "dropped_members": stats.dropped_members,
        "store_errors": state.hub.store_errors(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, query, state))
}

/// Map one websocket message to an inbound frame for the event router.
///
/// Control frames are skipped. A close frame ends the stream.
fn inbound_frame(
    msg: Result<Message, axum::Error>,
) -> Option<Result<String, TransportError>> {
    match msg {
        Ok(Message::Text(text)) => {
            metrics::record_message(text.len(), "inbound");
            Some(Ok(text))
        }
        Ok(Message::Binary(data)) => {
            metrics::record_message(data.len(), "inbound");
            Some(
                String::from_utf8(data)
                    .map_err(|e| TransportError::from(ProtocolError::Invalid(e.to_string()))),
            )
        }
        // axum answers pings itself
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Ok(Message::Close(_)) => Some(Err(TransportError::ConnectionClosed)),
        Err(e) => {
            metrics::record_error("websocket");
            Some(Err(TransportError::ReceiveFailed(e.to_string())))
        }
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, query: ConnectQuery, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let Session {
        connection,
        mut outbound,
        router,
    } = match state.hub.join(query.room_id, query.user_id).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Join failed");
            metrics::record_error("join");
            return;
        }
    };

    debug!(connection = %connection.id(), room = %connection.room_id(), "WebSocket connected");

    // Split the WebSocket
    let (mut sender, receiver) = socket.split();

    let writer_id = connection.id();
    let mut writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match codec::encode(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection = %writer_id, error = %e, "Failed to encode event");
                    metrics::record_error("encode");
                    continue;
                }
            };

            metrics::record_message(text.len(), "outbound");
            metrics::record_event(event.name());
            if sender.send(Message::Text(text)).await.is_err() {
                debug!(connection = %writer_id, "WebSocket send failed");
                break;
            }
        }
        // best effort close frame
        let _ = sender.close().await;
    });

    let inbound = receiver.filter_map(|msg| future::ready(inbound_frame(msg)));
    let mut reader = tokio::spawn(router.run(inbound));

    tokio::select! {
        _ = &mut reader => {
            // the router left the room; the writer stops at its next receive
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
                writer.abort();
            }
        }
        _ = &mut writer => reader.abort(),
    }

    state.hub.leave(&connection);
    debug!(connection = %connection.id(), "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelroom_protocol::{ChatMessage, ClientEvent, LikeUpdate, ServerEvent};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
        let state = Arc::new(AppState::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let router = app(Arc::clone(&state));
        tokio::spawn(async move { axum::serve(listener, router).await });
        (addr, state)
    }

    async fn connect(addr: SocketAddr, query: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{addr}/ws?{query}"))
            .await
            .unwrap();
        client
    }

    async fn send(client: &mut Client, event: &ClientEvent) {
        let text = codec::encode_client(event).unwrap();
        client.send(WsMessage::Text(text)).await.unwrap();
    }

    /// Read events until one matches `pred`.
    async fn recv_until(client: &mut Client, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match client.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        let event = codec::decode_server(&text).unwrap();
                        if pred(&event) {
                            return event;
                        }
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("connection ended: {other:?}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    fn user_message(event: &ServerEvent) -> Option<&ChatMessage> {
        event.chat_message().filter(|m| !m.is_system())
    }

    fn is_system_message(event: &ServerEvent) -> bool {
        event.chat_message().is_some_and(ChatMessage::is_system)
    }

    /// Read the join sequence: history, like snapshot and the client's own
    /// arrival announcement, in whatever order they land.
    async fn join_complete(client: &mut Client) -> (Vec<ChatMessage>, LikeUpdate) {
        let mut history = None;
        let mut snapshot = None;
        let mut announced = false;
        while history.is_none() || snapshot.is_none() || !announced {
            match recv_until(client, |_| true).await {
                ServerEvent::FirstMessage { first_message } => history = Some(first_message),
                ServerEvent::FirstLike(update) => snapshot = Some(update),
                event if is_system_message(&event) => announced = true,
                other => panic!("unexpected event during join: {other:?}"),
            }
        }
        (history.unwrap_or_default(), snapshot.unwrap())
    }

    fn is_total_like(event: &ServerEvent) -> bool {
        matches!(event, ServerEvent::TotalLike(_))
    }

    /// Poll until the room's member count settles at `expected`.
    async fn wait_for_members(state: &AppState, room_id: &str, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let count = state
                    .hub
                    .registry()
                    .get(room_id)
                    .map_or(0, |room| room.member_count());
                if count == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("member count never settled");
    }

    #[tokio::test]
    async fn test_room_scenario() {
        let (addr, state) = spawn_server(Config::default()).await;

        let mut a = connect(addr, "room_id=r1&user_id=A").await;
        let (history, snapshot) = join_complete(&mut a).await;
        assert!(history.is_empty());
        assert_eq!(snapshot, LikeUpdate::new(0, false, "A"));

        let mut b = connect(addr, "roomId=r1&userId=B").await;
        let (_, snapshot) = join_complete(&mut b).await;
        assert_eq!(snapshot, LikeUpdate::new(0, false, "B"));

        // A sees B's arrival
        let arrival = recv_until(&mut a, is_system_message).await;
        assert_eq!(arrival.chat_message().unwrap().room_id, "r1");
        wait_for_members(&state, "r1", 2).await;

        // chat reaches both members with the persisted count
        send(&mut a, &ClientEvent::message("A", "hi")).await;
        for client in [&mut a, &mut b] {
            let event = recv_until(client, |e| user_message(e).is_some()).await;
            let message = user_message(&event).unwrap();
            assert_eq!(message.username, "A");
            assert_eq!(message.text, "hi");
            assert_eq!(message.room_id, "r1");
            assert_eq!(message.total_count, 1);
        }

        // like toggles on and off
        send(&mut b, &ClientEvent::like("B")).await;
        for client in [&mut a, &mut b] {
            let event = recv_until(client, is_total_like).await;
            assert_eq!(event.like_update().unwrap(), &LikeUpdate::new(1, true, "B"));
        }
        send(&mut b, &ClientEvent::like("B")).await;
        for client in [&mut a, &mut b] {
            let event = recv_until(client, is_total_like).await;
            assert_eq!(event.like_update().unwrap(), &LikeUpdate::new(0, false, "B"));
        }

        // A leaves; B is told and keeps receiving
        a.close(None).await.unwrap();
        let departure = recv_until(&mut b, is_system_message).await;
        assert!(departure.chat_message().unwrap().text.contains("left"));
        assert_eq!(departure.chat_message().unwrap().total_count, 0);
        wait_for_members(&state, "r1", 1).await;

        send(&mut b, &ClientEvent::message("B", "still here")).await;
        let event = recv_until(&mut b, |e| user_message(e).is_some()).await;
        assert_eq!(user_message(&event).unwrap().total_count, 2);
    }

    #[tokio::test]
    async fn test_new_member_gets_history_oldest_first() {
        let (addr, _state) = spawn_server(Config::default()).await;

        let mut a = connect(addr, "room_id=video:7&user_id=A").await;
        for text in ["one", "two"] {
            send(&mut a, &ClientEvent::message("A", text)).await;
            recv_until(&mut a, |e| user_message(e).is_some_and(|m| m.text == text)).await;
        }

        let mut c = connect(addr, "room_id=video:7&user_id=C").await;
        let event = recv_until(&mut c, |e| matches!(e, ServerEvent::FirstMessage { .. })).await;
        let ServerEvent::FirstMessage { first_message } = event else {
            unreachable!()
        };
        let texts: Vec<_> = first_message.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(first_message.iter().all(|m| m.total_count == 2));
    }

    #[tokio::test]
    async fn test_binary_frames_and_connection_user_fallback() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut a = connect(addr, "room_id=r2&user_id=A").await;

        let data = br#"{"event_type":"like"}"#.to_vec();
        a.send(WsMessage::Binary(data)).await.unwrap();

        let event = recv_until(&mut a, is_total_like).await;
        assert_eq!(event.like_update().unwrap(), &LikeUpdate::new(1, true, "A"));
    }

    #[tokio::test]
    async fn test_anonymous_like_gets_error_event() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut anon = connect(addr, "room_id=r3").await;

        send(&mut anon, &ClientEvent::like("")).await;
        let event = recv_until(&mut anon, |e| e.error_code().is_some()).await;
        assert_eq!(
            event.error_code(),
            Some(reelroom_protocol::error_codes::MISSING_USER_ID)
        );
    }

    #[tokio::test]
    async fn test_raised_message_limit_accepts_large_chat() {
        let mut config = Config::default();
        config.limits.max_message_size = 1024 * 1024;
        let (addr, state) = spawn_server(config).await;

        let mut a = connect(addr, "room_id=r6&user_id=A").await;
        join_complete(&mut a).await;

        let text = "x".repeat(100 * 1024);
        send(&mut a, &ClientEvent::message("A", text.as_str())).await;
        let event = recv_until(&mut a, |e| user_message(e).is_some()).await;
        assert_eq!(user_message(&event).unwrap().text.len(), text.len());
        wait_for_members(&state, "r6", 1).await;
    }

    #[tokio::test]
    async fn test_malformed_frame_disconnects() {
        let (addr, state) = spawn_server(Config::default()).await;
        let mut a = connect(addr, "room_id=r4&user_id=A").await;
        wait_for_members(&state, "r4", 1).await;

        a.send(WsMessage::Text("not an event".to_string()))
            .await
            .unwrap();

        wait_for_members(&state, "r4", 0).await;
        let ended = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match a.next().await {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(ended.is_ok());
    }

    #[tokio::test]
    async fn test_http_endpoints() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut a = connect(addr, "room_id=r5&user_id=A").await;
        recv_until(&mut a, |e| matches!(e, ServerEvent::FirstLike(_))).await;

        for (path, needle) in [("/health", "\"status\":\"ok\""), ("/rooms", "\"rooms\":1")] {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let request =
                format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
            stream.write_all(request.as_bytes()).await.unwrap();

            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            assert!(response.starts_with("HTTP/1.1 200"), "{response}");
            assert!(response.contains(needle), "{response}");
        }
    }
}
