//! Test harness: real WebSocket gateway (and optionally the dispatcher)
//! on an ephemeral port, driven with the SDK.

#![allow(dead_code)]

use quill_core::application::{
    shutdown_channel, Dispatcher, GatewayConfig, QueueGateway, QueueStats, ShutdownSender,
};
use quill_core::domain::ServerEvent;
use quill_core::port::generator::mocks::MockBookGenerator;
use quill_core::port::id_provider::SequentialIdProvider;
use quill_core::port::time_provider::SystemTimeProvider;
use quill_gateway_ws::{ConnectionHub, WsServer, WsServerConfig};
use quill_infra::HandshakeIdentity;
use quill_sdk::{ConnectOptions, QueueClient};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct HarnessOptions {
    /// Run the dispatcher (otherwise entries only wait)
    pub dispatch: bool,
    pub slots: usize,
    pub disconnect_grace_ms: i64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            dispatch: true,
            slots: 1,
            disconnect_grace_ms: 0,
        }
    }
}

pub struct Harness {
    pub ws_url: String,
    pub gateway: Arc<QueueGateway>,
    /// Gated: each generation waits for `release`
    pub generator: Arc<MockBookGenerator>,
    shutdown: ShutdownSender,
}

impl Harness {
    pub async fn start(options: HarnessOptions) -> Self {
        let hub = Arc::new(ConnectionHub::default());
        let gateway = Arc::new(QueueGateway::new(
            hub.clone(),
            Arc::new(SequentialIdProvider::new("req")),
            Arc::new(SystemTimeProvider),
            GatewayConfig {
                disconnect_grace_ms: options.disconnect_grace_ms,
            },
        ));
        let generator = Arc::new(MockBookGenerator::new_success().gated());
        let (shutdown, token) = shutdown_channel();

        let config = WsServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let server = WsServer::bind(config, gateway.clone(), Arc::new(HandshakeIdentity::trusting_plan()), hub)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run(token.clone()));

        if options.dispatch {
            let dispatcher = Dispatcher::new(gateway.clone(), generator.clone(), options.slots);
            tokio::spawn(async move { dispatcher.run(token).await });
        }

        Self {
            ws_url: format!("ws://{}", addr),
            gateway,
            generator,
            shutdown,
        }
    }

    /// Connected client claiming `member` on `plan`
    pub async fn client(&self, member: &str, plan: &str) -> QueueClient {
        let mut client = QueueClient::new(ConnectOptions::new(&self.ws_url).member(member).plan(plan));
        client.connect().await.unwrap();
        client
    }

    /// Poll gateway statistics until `done` holds
    pub async fn wait_stats<F>(&self, done: F) -> QueueStats
    where
        F: Fn(&QueueStats) -> bool,
    {
        timeout(WAIT, async {
            loop {
                let stats = self.gateway.stats().await;
                if done(&stats) {
                    return stats;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("gateway never reached the expected state")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.generator.release(64);
        self.shutdown.shutdown();
    }
}

/// Next event matching `predicate`, failing the test after `WAIT`
pub async fn expect<F>(client: &mut QueueClient, predicate: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    timeout(WAIT, client.wait_for(predicate))
        .await
        .expect("timed out waiting for event")
        .unwrap()
}
