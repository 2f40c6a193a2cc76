//! WebSocket server
//!
//! ```text
//! socket ─► handshake ─► IdentityProvider ─► QueueGateway::on_connect
//!   │                                              │
//!   ├─ inbound text ─► RateLimiter ─► ClientEvent ─┤ on_join / on_leave / on_check
//!   └─ outbound ◄──── ConnectionHub channel ◄──────┘ (EventSink)
//! ```

use crate::error::WsError;
use crate::handshake;
use crate::hub::ConnectionHub;
use futures_util::{SinkExt, StreamExt};
use quill_core::application::{QueueGateway, RateLimiter, ShutdownToken};
use quill_core::domain::{ClientEvent, ConnectionId, ErrorCode, Identity, ServerEvent};
use quill_core::error::AppError;
use quill_core::port::{EventSink, Handshake, IdentityProvider};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_RATE_LIMIT_BURST: u32 = 20;
const DEFAULT_RATE_LIMIT_PER_SEC: u32 = 5;

/// WebSocket server configuration
#[derive(Debug, Clone)]
pub struct WsServerConfig {
    pub bind_addr: String,
    /// Inbound frames per connection: burst size
    pub rate_limit_burst: u32,
    /// Inbound frames per connection: sustained rate
    pub rate_limit_per_sec: u32,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
        }
    }
}

/// Shared per-server state handed to every connection task
struct Shared {
    config: WsServerConfig,
    gateway: Arc<QueueGateway>,
    identity: Arc<dyn IdentityProvider>,
    hub: Arc<ConnectionHub>,
}

/// The WebSocket server (bound, not yet accepting)
pub struct WsServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl WsServer {
    /// Bind the listener.
    ///
    /// `hub` must be the same sink the gateway was built with.
    pub async fn bind(
        config: WsServerConfig,
        gateway: Arc<QueueGateway>,
        identity: Arc<dyn IdentityProvider>,
        hub: Arc<ConnectionHub>,
    ) -> Result<Self, WsError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| WsError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                config,
                gateway,
                identity,
                hub,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, WsError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown
    pub async fn run(self, mut shutdown: ShutdownToken) -> Result<(), WsError> {
        info!(addr = %self.local_addr()?, "WebSocket server listening");

        loop {
            let (stream, addr) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        // Transient (e.g. fd exhaustion): keep serving
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
                _ = shutdown.wait() => break,
            };
            debug!(%addr, "New TCP connection");

            let shared = Arc::clone(&self.shared);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, shared, shutdown).await {
                    debug!(%addr, error = %e, "Connection ended with error");
                }
            });
        }

        info!("WebSocket server stopped accepting connections");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
    mut shutdown: ShutdownToken,
) -> Result<(), WsError> {
    let mut claims = Handshake::default();
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        claims = handshake::from_request(req);
        Ok(resp)
    })
    .await?;

    let identity = match shared.identity.resolve(&claims).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(%addr, error = %e, "Rejecting connection: identity not resolved");
            reject(ws, &e.to_string()).await;
            return Err(e.into());
        }
    };

    let connection = shared.gateway.next_connection_id();
    let mut outbound = shared.hub.register(connection.clone());
    shared
        .gateway
        .on_connect(connection.clone(), identity.clone())
        .await;

    info!(
        %addr,
        member_id = %identity.member_id,
        connection_id = %connection,
        lane = %identity.lane(),
        "WebSocket connection established"
    );

    let limiter = RateLimiter::new(
        shared.config.rate_limit_burst,
        shared.config.rate_limit_per_sec,
    );
    let (mut ws_sender, mut ws_receiver) = ws.split();

    let result: Result<(), WsError> = async {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !limiter.check() {
                            warn!(connection_id = %connection, "Inbound frame rate limited");
                            shared.hub.send(
                                &connection,
                                &ServerEvent::error(ErrorCode::RateLimited, "Rate limit exceeded. Please slow down."),
                            );
                            continue;
                        }
                        handle_frame(&shared, &connection, &identity, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        shared.hub.send(
                            &connection,
                            &ServerEvent::error(ErrorCode::MalformedEvent, "binary frames are not supported"),
                        );
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %connection, "Socket closed by client");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id = %connection, error = %e, "WebSocket error");
                        break;
                    }
                },

                frame = outbound.recv() => match frame {
                    Some(frame) => ws_sender.send(Message::Text(frame.into())).await?,
                    None => break,
                },

                _ = shutdown.wait() => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Away,
                            reason: "server shutting down".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
        Ok(())
    }
    .await;

    shared.hub.unregister(&connection);
    shared.gateway.on_disconnect(&connection).await;
    info!(
        member_id = %identity.member_id,
        connection_id = %connection,
        "WebSocket connection closed"
    );
    result
}

/// Decode one inbound frame and apply it to the gateway
async fn handle_frame(shared: &Shared, connection: &ConnectionId, identity: &Identity, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(connection_id = %connection, error = %e, "Malformed inbound frame");
            shared.hub.send(
                connection,
                &ServerEvent::error(ErrorCode::MalformedEvent, e.to_string()),
            );
            return;
        }
    };

    let result = match event {
        ClientEvent::Join { lane, request } => shared
            .gateway
            .on_join(connection, lane, request)
            .await
            .map(|_| ()),
        ClientEvent::Leave { lane } => shared.gateway.on_leave(connection, lane).await.map(|_| ()),
        ClientEvent::Check { lane } => shared.gateway.on_check(connection, lane).await.map(|_| ()),
    };

    match result {
        Ok(()) => {}
        // Reported to the client by the gateway, or an idempotent no-op
        Err(AppError::Domain(e)) => {
            debug!(member_id = %identity.member_id, error = %e, "Queue event rejected");
        }
        Err(e) => {
            error!(member_id = %identity.member_id, error = %e, "Queue event failed");
            shared.hub.send(
                connection,
                &ServerEvent::error(ErrorCode::Internal, e.to_string()),
            );
        }
    }
}

async fn reject(mut ws: WebSocketStream<TcpStream>, reason: &str) {
    let frame = ServerEvent::error(ErrorCode::Unauthorized, reason);
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = ws.send(Message::Text(text.into())).await;
    }
    let _ = ws
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "unauthorized".into(),
        })))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::application::{shutdown_channel, GatewayConfig, ShutdownSender};
    use quill_core::domain::Plan;
    use quill_core::port::id_provider::SequentialIdProvider;
    use quill_core::port::time_provider::SystemTimeProvider;
    use quill_core::port::IdentityError;
    use tokio::time::{timeout, Duration};
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_test::assert_ok;

    /// Trusts `x-user-id`; `x-plan: paid` selects the paid plan
    struct TestIdentity;

    #[async_trait::async_trait]
    impl IdentityProvider for TestIdentity {
        async fn resolve(&self, hs: &Handshake) -> Result<Identity, IdentityError> {
            let id = hs
                .member_id
                .clone()
                .ok_or_else(|| IdentityError::MissingCredentials("member id".into()))?;
            let plan = match hs.plan.as_deref() {
                Some("paid") => Plan::Paid,
                _ => Plan::Free,
            };
            Ok(Identity::new(id, plan))
        }
    }

    async fn start(config: WsServerConfig) -> (String, Arc<QueueGateway>, ShutdownSender) {
        let hub = Arc::new(ConnectionHub::default());
        let gateway = Arc::new(QueueGateway::new(
            hub.clone(),
            Arc::new(SequentialIdProvider::new("id")),
            Arc::new(SystemTimeProvider),
            GatewayConfig::default(),
        ));
        let server = WsServer::bind(
            WsServerConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                ..config
            },
            gateway.clone(),
            Arc::new(TestIdentity),
            hub,
        )
        .await
        .unwrap();
        let url = format!("ws://{}", server.local_addr().unwrap());
        let (tx, token) = shutdown_channel();
        tokio::spawn(server.run(token));
        (url, gateway, tx)
    }

    type Client = WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

    async fn connect(url: &str, member: Option<&str>) -> Client {
        let mut req = url.into_client_request().unwrap();
        if let Some(member) = member {
            req.headers_mut().insert("x-user-id", member.parse().unwrap());
        }
        let (ws, _) = assert_ok!(tokio_tungstenite::connect_async(req).await);
        ws
    }

    /// Next text frame whose event name matches
    async fn next_event(ws: &mut Client, name: &str) -> serde_json::Value {
        loop {
            let msg = timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = msg {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                if value["event"] == name {
                    return value;
                }
            }
        }
    }

    async fn send(ws: &mut Client, frame: serde_json::Value) {
        ws.send(Message::Text(frame.to_string().into())).await.unwrap();
    }

    fn join_frame(title: &str) -> serde_json::Value {
        serde_json::json!({
            "event": "join",
            "data": { "request": quill_core::domain::BookRequest::sample(title) }
        })
    }

    #[tokio::test]
    async fn test_join_over_socket() {
        let (url, gateway, _tx) = start(WsServerConfig::default()).await;
        let mut ws = connect(&url, Some("alice")).await;

        let users = next_event(&mut ws, "users").await;
        assert_eq!(users["data"]["userIds"], serde_json::json!(["alice"]));

        send(&mut ws, join_frame("t")).await;
        let status = next_event(&mut ws, "queueStatus").await;
        assert_eq!(status["data"]["status"], "queued");
        assert_eq!(status["data"]["position"], 1);
        assert_eq!(status["data"]["lane"], "shared");

        assert_eq!(gateway.stats().await.shared_size, 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_reports_error() {
        let (url, _gateway, _tx) = start(WsServerConfig::default()).await;
        let mut ws = connect(&url, Some("bob")).await;

        ws.send(Message::Text("{not json".to_string().into())).await.unwrap();
        let err = next_event(&mut ws, "error").await;
        assert_eq!(err["data"]["code"], "malformedEvent");
    }

    #[tokio::test]
    async fn test_missing_identity_rejected() {
        let (url, gateway, _tx) = start(WsServerConfig::default()).await;
        let mut ws = connect(&url, None).await;

        let err = next_event(&mut ws, "error").await;
        assert_eq!(err["data"]["code"], "unauthorized");
        assert!(gateway.connected_members().await.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_frames() {
        let (url, _gateway, _tx) = start(WsServerConfig {
            rate_limit_burst: 2,
            rate_limit_per_sec: 1,
            ..WsServerConfig::default()
        })
        .await;
        let mut ws = connect(&url, Some("carol")).await;

        for _ in 0..3 {
            send(&mut ws, serde_json::json!({"event": "check", "data": {}})).await;
        }
        let err = next_event(&mut ws, "error").await;
        assert_eq!(err["data"]["code"], "rateLimited");
    }

    #[tokio::test]
    async fn test_close_removes_entry() {
        let (url, gateway, _tx) = start(WsServerConfig::default()).await;
        let mut ws = connect(&url, Some("dave")).await;
        send(&mut ws, join_frame("t")).await;
        next_event(&mut ws, "queueStatus").await;

        assert_ok!(ws.close(None).await);

        for _ in 0..100 {
            if gateway.stats().await.shared_size == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(gateway.stats().await.shared_size, 0);
        assert!(gateway.connected_members().await.is_empty());
    }
}
