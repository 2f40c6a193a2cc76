//! WebSocket queue client
//!
//! One `QueueClient` is one socket. Events are read on demand with
//! [`QueueClient::next_event`], which also folds them into a [`QueueView`].

use crate::error::{Result, SdkError};
use futures_util::{SinkExt, StreamExt};
use quill_core::domain::{BookRequest, ClientEvent, Lane, QueueStatus, ServerEvent};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where to connect and who to claim to be
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub url: String,
    pub member_id: Option<String>,
    pub plan: Option<String>,
    pub token: Option<String>,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn member(mut self, member_id: impl Into<String>) -> Self {
        self.member_id = Some(member_id.into());
        self
    }

    pub fn plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Locally tracked queue state, folded from server events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    pub in_queue: bool,
    /// 1-based; 0 while not queued
    pub position_in_queue: usize,
    /// Size of the member's lane
    pub size: usize,
    pub lane: Option<Lane>,
    /// The member's request is being generated
    pub dispatched: bool,
    #[serde(skip)]
    shared_size: usize,
    #[serde(skip)]
    priority_size: usize,
}

impl QueueView {
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::QueueSize { lane, size } => {
                self.record_size(*lane, *size);
            }
            ServerEvent::PositionUpdate {
                lane,
                size,
                position_in_queue,
            } => {
                self.lane = Some(*lane);
                self.record_size(*lane, *size);
                self.in_queue = true;
                self.position_in_queue = *position_in_queue;
            }
            ServerEvent::QueueStatus {
                lane,
                status,
                position,
                ..
            } => {
                self.lane = Some(*lane);
                self.size = self.lane_size(*lane);
                match status {
                    QueueStatus::Queued | QueueStatus::AlreadyInQueue | QueueStatus::Checked => {
                        self.in_queue = position.is_some();
                        self.position_in_queue = position.unwrap_or(0);
                    }
                    QueueStatus::Left | QueueStatus::Processed => self.clear(),
                }
            }
            ServerEvent::DispatchStarted { lane, .. } => {
                self.lane = Some(*lane);
                self.dispatched = true;
            }
            ServerEvent::DispatchCompleted { .. } | ServerEvent::DispatchFailed { .. } => {
                self.clear();
            }
            ServerEvent::Users { .. } | ServerEvent::Error { .. } => {}
        }
    }

    fn clear(&mut self) {
        self.in_queue = false;
        self.position_in_queue = 0;
        self.dispatched = false;
    }

    fn record_size(&mut self, lane: Lane, size: usize) {
        match lane {
            Lane::Shared => self.shared_size = size,
            Lane::Priority => self.priority_size = size,
        }
        if self.lane == Some(lane) {
            self.size = size;
        }
    }

    fn lane_size(&self, lane: Lane) -> usize {
        match lane {
            Lane::Shared => self.shared_size,
            Lane::Priority => self.priority_size,
        }
    }
}

/// Queue client
///
/// # Example
///
/// ```no_run
/// use quill_core::domain::BookRequest;
/// use quill_sdk::{ConnectOptions, QueueClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut client = QueueClient::new(ConnectOptions::new("ws://127.0.0.1:8080").member("jane").plan("pro"));
/// client.connect().await?;
/// client.join(None, BookRequest::sample("Rust in Action")).await?;
/// while client.view().in_queue || client.view().dispatched {
///     println!("{:?}", client.next_event().await?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct QueueClient {
    options: ConnectOptions,
    stream: Option<WsStream>,
    view: QueueView,
}

impl QueueClient {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            options,
            stream: None,
            view: QueueView::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn view(&self) -> &QueueView {
        &self.view
    }

    /// Open the socket, sending identity claims as upgrade headers.
    ///
    /// Calling it again after [`disconnect`](Self::disconnect) reconnects;
    /// the server replays the position of a queued member.
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut request = self.options.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        if let Some(member_id) = &self.options.member_id {
            headers.insert("x-user-id", header_value(member_id)?);
        }
        if let Some(plan) = &self.options.plan {
            headers.insert("x-plan", header_value(plan)?);
        }
        if let Some(token) = &self.options.token {
            headers.insert(header::AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        debug!(url = %self.options.url, "Queue socket connected");
        self.stream = Some(stream);
        Ok(())
    }

    /// Close the socket; the server treats this like a leave unless a
    /// disconnect grace is configured
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        match stream.close(None).await {
            Ok(()) => Ok(()),
            Err(e) => match SdkError::from(e) {
                SdkError::Closed => Ok(()),
                other => Err(other),
            },
        }
    }

    pub async fn join(&mut self, lane: Option<Lane>, request: BookRequest) -> Result<()> {
        self.send(&ClientEvent::Join { lane, request }).await
    }

    pub async fn leave(&mut self, lane: Option<Lane>) -> Result<()> {
        self.send(&ClientEvent::Leave { lane }).await
    }

    pub async fn check(&mut self, lane: Option<Lane>) -> Result<()> {
        self.send(&ClientEvent::Check { lane }).await
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        let frame = serde_json::to_string(event)?;
        let stream = self.stream.as_mut().ok_or(SdkError::NotConnected)?;
        stream.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    /// Read the next server event and fold it into the view.
    ///
    /// Returns [`SdkError::Closed`] once the server closes the socket.
    pub async fn next_event(&mut self) -> Result<ServerEvent> {
        loop {
            let stream = self.stream.as_mut().ok_or(SdkError::NotConnected)?;
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(e.into());
                }
                None => {
                    self.stream = None;
                    return Err(SdkError::Closed);
                }
            };

            match message {
                Message::Text(text) => {
                    let event: ServerEvent = serde_json::from_str(text.as_str())?;
                    self.view.apply(&event);
                    return Ok(event);
                }
                Message::Close(_) => {
                    self.stream = None;
                    return Err(SdkError::Closed);
                }
                // Pings are answered by the protocol layer
                _ => continue,
            }
        }
    }

    /// Read events until one matches `predicate`
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Result<ServerEvent>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        loop {
            let event = self.next_event().await?;
            if predicate(&event) {
                return Ok(event);
            }
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| SdkError::Connection(format!("invalid header value: {}", e)))
}
