//! HTTP and WebSocket handlers.
//!
//! Each socket gets a broker connection and a mailbox. The connection loop
//! drains the mailbox onto the socket and feeds inbound frames to the
//! broker until either side goes away.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use ripple_core::{
    backend, identity_key, mailbox, Broker, Cache, ConnectionId, Delivery, Event, RateLimiter,
    StaticTokenAuthenticator, TooManyRequests,
};
use ripple_protocol::codec::MAX_FRAME_SIZE;
use ripple_protocol::{error_codes, ClientMessage, Format};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const STATS_CACHE_KEY: &str = "ripple:stats";
const STATS_TTL: Duration = Duration::from_secs(1);

/// Shared server state, built once at startup.
pub struct AppState {
    pub broker: Arc<Broker>,
    pub cache: Cache,
    pub limiter: RateLimiter,
    pub config: Config,
}

impl AppState {
    /// Build the broker and the configured cache and limiter backends.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend cannot be built.
    pub async fn new(config: Config) -> Result<Self> {
        let authenticator = StaticTokenAuthenticator::new(config.auth.tokens.clone());
        if authenticator.is_empty() {
            warn!("No auth tokens configured, every auth request will fail");
        }
        let broker = Broker::new(config.broker.to_broker_config(), Arc::new(authenticator));

        let cache = backend::build_cache(&config.backend, config.cache.to_cache_config())
            .await
            .context("Failed to build cache")?;
        let limiter = backend::build_limiter(&config.backend, config.limiter.connect_policy())
            .await
            .context("Failed to build rate limiter")?;

        Ok(Self {
            broker: Arc::new(broker),
            cache,
            limiter,
            config,
        })
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()).await?);

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Background tasks stop when these handles drop.
    let _heartbeat = state.broker.spawn_heartbeat();
    let _cache_sweeper = state.cache.spawn_sweeper();
    let _limiter_sweeper = state
        .limiter
        .spawn_sweeper(config.limiter.sweep_interval());

    let app = router(state);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Ripple server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Stats handler, served from the cache for a second at a time.
async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let app: &AppState = &state;
    let stats = app
        .cache
        .get_or_set(
            STATS_CACHE_KEY,
            || async move { Ok::<_, Infallible>(collect_stats(app).await) },
            STATS_TTL,
        )
        .await;
    match stats {
        Ok(stats) => Json(stats),
        Err(never) => match never {},
    }
}

async fn collect_stats(state: &AppState) -> Value {
    json!({
        "broker": state.broker.stats(),
        "cache": {
            "backend": state.cache.backend(),
            "entries": state.cache.len().await,
        },
        "limiter": {
            "backend": state.limiter.backend(),
            "windows": state.limiter.len().await,
        },
    })
}

/// WebSocket upgrade handler. Upgrades are rate limited per address.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if state.config.limiter.enabled {
        let decision = state.limiter.check(&identity_key(None, addr.ip())).await;
        if let Err(rejected) = decision.into_result() {
            debug!(addr = %addr, "WebSocket upgrade rate limited");
            metrics::record_rate_limited("connect");
            return too_many_requests(&rejected);
        }
    }

    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_websocket(socket, state, addr))
}

/// HTTP 429 with the time until the window resets.
fn too_many_requests(rejected: &TooManyRequests) -> Response {
    let retry_after = rejected.retry_after();
    let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_secs.to_string())],
        Json(json!({
            "error": rejected.to_string(),
            "reset_after_ms": retry_after.as_millis() as u64,
        })),
    )
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (mut sender, mut receiver) = socket.split();

    let (outbox, mut mailbox) = mailbox();
    let connection_id = match state.broker.connect(outbox) {
        Ok(id) => id,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Connection rejected");
            metrics::record_error("capacity");
            let event = Event::error(e.code(), e.to_string());
            let _ = send_event(&mut sender, &event, Format::Text).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    debug!(connection = %connection_id, addr = %addr, "WebSocket connected");

    // A disabled broker drops the outbox at once; keep serving regardless.
    let mailbox_open = state.broker.is_enabled();
    // Replies use the format of the last frame the client sent.
    let mut format = Format::Text;

    loop {
        tokio::select! {
            delivery = mailbox.recv(), if mailbox_open => {
                match delivery {
                    Some(Delivery::Event(event)) => {
                        if send_event(&mut sender, &event, format).await.is_err() {
                            break;
                        }
                    }
                    Some(Delivery::Probe) => {
                        if sender.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!(connection = %connection_id, "Dropped by broker, closing socket");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        format = Format::Text;
                        handle_frame(&state, &connection_id, addr, text.as_bytes(), format).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        format = Format::Binary;
                        handle_frame(&state, &connection_id, addr, &data, format).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.broker.acknowledge(&connection_id);
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.broker.disconnect(&connection_id);
    metrics::set_active_rooms(state.broker.stats().room_count);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Decode, rate limit and route one inbound frame.
///
/// Malformed frames are logged and dropped. A rate limited frame is answered
/// with an `error` event and not processed.
pub(crate) async fn handle_frame(
    state: &AppState,
    connection_id: &ConnectionId,
    addr: SocketAddr,
    data: &[u8],
    format: Format,
) {
    let start = Instant::now();
    metrics::record_message(data.len(), "inbound");

    let message = match format.decode(data) {
        Ok(message) => message,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Dropping malformed frame");
            metrics::record_error("malformed_frame");
            return;
        }
    };

    if state.config.limiter.enabled {
        let user = state.broker.connection_user(connection_id);
        let key = identity_key(user.as_deref(), addr.ip());
        let policy = state.config.limiter.message_policy();
        let decision = state
            .limiter
            .check_and_consume(&key, policy.max_requests, policy.window)
            .await;
        if let Err(rejected) = decision.into_result() {
            metrics::record_rate_limited("message");
            state.broker.send(
                connection_id,
                Event::error(error_codes::RATE_LIMITED, rejected.to_string()),
            );
            return;
        }
    }

    let changes_rooms = matches!(
        message,
        ClientMessage::JoinRoom { .. } | ClientMessage::LeaveRoom { .. }
    );
    state.broker.handle_message(connection_id, message).await;
    if changes_rooms {
        metrics::set_active_rooms(state.broker.stats().room_count);
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Encode an event and write it to the socket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &Event,
    format: Format,
) -> Result<()> {
    let data = format.encode(event)?;
    metrics::record_message(data.len(), "outbound");
    let message = match format {
        Format::Text => Message::Text(String::from_utf8(data.to_vec())?),
        Format::Binary => Message::Binary(data.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::Mailbox;
    use ripple_protocol::{decode_event, encode_message};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use ripple_protocol::event::kinds;
    use std::net::{IpAddr, Ipv4Addr};

    const ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 40000);

    async fn state(config: Config) -> Arc<AppState> {
        Arc::new(AppState::new(config).await.unwrap())
    }

    fn events(rx: &mut Mailbox) -> Vec<Arc<Event>> {
        let mut out = Vec::new();
        while let Ok(delivery) = rx.try_recv() {
            if let Delivery::Event(event) = delivery {
                out.push(event);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_frame_routes_to_broker() {
        let state = state(Config::default()).await;
        let (tx, mut rx) = mailbox();
        let id = state.broker.connect(tx).unwrap();
        events(&mut rx);

        let frame = br#"{"type":"join_room","payload":{"room":"venue:42"}}"#;
        handle_frame(&state, &id, ADDR, frame, Format::Text).await;

        assert_eq!(state.broker.room_members("venue:42"), vec![id]);
        assert!(events(&mut rx).iter().any(|e| e.is(kinds::JOINED_ROOM)));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped() {
        let state = state(Config::default()).await;
        let (tx, mut rx) = mailbox();
        let id = state.broker.connect(tx).unwrap();
        events(&mut rx);

        handle_frame(&state, &id, ADDR, b"{not json", Format::Text).await;
        handle_frame(&state, &id, ADDR, &[0xc1], Format::Binary).await;

        assert!(events(&mut rx).is_empty());
        assert!(state.broker.is_connected(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_are_rate_limited() {
        let mut config = Config::default();
        config.limiter.message_max_requests = 2;
        let state = state(config).await;
        let (tx, mut rx) = mailbox();
        let id = state.broker.connect(tx).unwrap();
        events(&mut rx);

        let ping = br#"{"type":"ping"}"#;
        for _ in 0..3 {
            handle_frame(&state, &id, ADDR, ping, Format::Text).await;
        }

        let received = events(&mut rx);
        assert_eq!(received.iter().filter(|e| e.is(kinds::PONG)).count(), 2);
        let error = received.iter().find(|e| e.is(kinds::ERROR)).unwrap();
        assert_eq!(error.payload["code"], error_codes::RATE_LIMITED);
    }

    #[tokio::test]
    async fn test_disabled_limiter_lets_everything_through() {
        let mut config = Config::default();
        config.limiter.enabled = false;
        config.limiter.message_max_requests = 0;
        let state = state(config).await;
        let (tx, mut rx) = mailbox();
        let id = state.broker.connect(tx).unwrap();
        events(&mut rx);

        handle_frame(&state, &id, ADDR, br#"{"type":"ping"}"#, Format::Text).await;
        assert!(events(&mut rx).iter().any(|e| e.is(kinds::PONG)));
    }

    #[tokio::test]
    async fn test_disabled_broker_ignores_frames() {
        let mut config = Config::default();
        config.broker.enabled = false;
        let state = state(config).await;
        let (tx, _rx) = mailbox();
        let id = state.broker.connect(tx).unwrap();

        let frame = br#"{"type":"join_room","payload":{"room":"venue:42"}}"#;
        handle_frame(&state, &id, ADDR, frame, Format::Text).await;
        assert!(!state.broker.room_exists("venue:42"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_are_cached() {
        let state = state(Config::default()).await;
        let Json(before) = stats_handler(State(state.clone())).await;
        assert_eq!(before["broker"]["connection_count"], 0);

        let (tx, _rx) = mailbox();
        state.broker.connect(tx).unwrap();

        let Json(cached) = stats_handler(State(state.clone())).await;
        assert_eq!(cached["broker"]["connection_count"], 0);

        tokio::time::advance(STATS_TTL).await;
        let Json(fresh) = stats_handler(State(state.clone())).await;
        assert_eq!(fresh["broker"]["connection_count"], 1);
        assert_eq!(fresh["cache"]["backend"], "memory");
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_many_requests_response() {
        let limiter = RateLimiter::in_memory(ripple_core::RateLimitPolicy::new(
            1,
            Duration::from_millis(1500),
        ));
        limiter.check("ip:10.0.0.1").await;
        let rejected = limiter.check("ip:10.0.0.1").await.into_result().unwrap_err();

        let response = too_many_requests(&rejected);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn serve(config: Config) -> (SocketAddr, Arc<AppState>) {
        let state = state(config).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });
        (addr, state)
    }

    async fn next_event(client: &mut Client) -> Event {
        loop {
            match client.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return decode_event(text.as_bytes(), Format::Text).unwrap(),
                WsMessage::Binary(data) => return decode_event(&data, Format::Binary).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_socket_session() {
        let mut config = Config::default();
        config.auth.tokens.insert("t1".into(), "u1".into());
        let (addr, state) = serve(config).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let connected = next_event(&mut client).await;
        assert!(connected.is(kinds::CONNECTED));

        client
            .send(WsMessage::Text(r#"{"type":"auth","payload":{"token":"t1"}}"#.into()))
            .await
            .unwrap();
        let authenticated = next_event(&mut client).await;
        assert!(authenticated.is(kinds::AUTHENTICATED));
        assert_eq!(authenticated.payload["userId"], "u1");

        // Switching to binary frames switches replies to MessagePack.
        let join = encode_message(
            &ClientMessage::JoinRoom {
                room: "venue:42".into(),
            },
            Format::Binary,
        )
        .unwrap();
        client.send(WsMessage::Binary(join.to_vec())).await.unwrap();
        loop {
            match client.next().await.unwrap().unwrap() {
                WsMessage::Binary(data) => {
                    let event = decode_event(&data, Format::Binary).unwrap();
                    assert!(event.is(kinds::JOINED_ROOM));
                    break;
                }
                WsMessage::Text(text) => panic!("Expected binary frame, got {text}"),
                _ => continue,
            }
        }

        assert_eq!(state.broker.broadcast_to_room("venue:42", Event::new("score", json!({"home": 1}))), 1);
        let score = next_event(&mut client).await;
        assert!(score.is("score"));
        assert_eq!(score.payload["home"], 1);

        client.close(None).await.unwrap();
        for _ in 0..200 {
            if state.broker.stats().connection_count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.broker.stats().connection_count, 0);
        assert!(!state.broker.room_exists("venue:42"));
    }

    #[tokio::test]
    async fn test_upgrade_is_rate_limited() {
        let mut config = Config::default();
        config.limiter.connect_max_requests = 1;
        let (addr, _state) = serve(config).await;
        let url = format!("ws://{addr}/ws");

        let (_first, _) = connect_async(url.as_str()).await.unwrap();
        match connect_async(url.as_str()).await {
            Ok(_) => panic!("Second upgrade should be rejected"),
            Err(WsError::Http(response)) => {
                assert_eq!(response.status().as_u16(), 429);
                assert!(response.headers().contains_key("retry-after"));
            }
            Err(e) => panic!("Unexpected error: {e}"),
        }
    }
}
