// Dispatcher - dispatch-slot pump

use crate::application::constants::{IDLE_POLL_INTERVAL, SHUTDOWN_DRAIN_TIMEOUT};
use crate::application::gateway::{DispatchOutcome, DispatchTicket, QueueGateway, Settlement};
use crate::application::shutdown::ShutdownToken;
use crate::domain::BookRequest;
use crate::error::Result;
use crate::port::{BookGenerator, GenerationError};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

/// Pulls the next eligible request whenever a slot is free and runs it
/// against the generator on its own task.
///
/// A failing or panicking generation only fails that request: the slot is
/// released and the pump keeps going. No retries.
pub struct Dispatcher {
    gateway: Arc<QueueGateway>,
    generator: Arc<dyn BookGenerator>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl Dispatcher {
    pub fn new(gateway: Arc<QueueGateway>, generator: Arc<dyn BookGenerator>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            gateway,
            generator,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently running a generation
    pub fn running(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Run the pump until shutdown, then wait for running jobs to settle
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(slots = self.capacity, "Dispatcher started");

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let permit = tokio::select! {
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break, // semaphore closed
                },
                _ = shutdown.wait() => break,
            };

            if self.claim(permit).await.is_some() {
                continue;
            }

            tokio::select! {
                _ = self.gateway.work_available() => {},
                _ = sleep(IDLE_POLL_INTERVAL) => {},
                _ = shutdown.wait() => break,
            }
        }

        info!(running = self.running(), "Dispatcher draining running jobs");
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        match timeout(SHUTDOWN_DRAIN_TIMEOUT, self.slots.acquire_many(all)).await {
            Ok(_) => info!("Dispatcher stopped"),
            Err(_) => warn!(
                running = self.running(),
                "Dispatcher stopped with jobs still running"
            ),
        }
        Ok(())
    }

    /// Claim and start one request if a slot is free.
    ///
    /// Returns the job handle, resolving to its settlement.
    pub async fn dispatch_once(&self) -> Option<JoinHandle<Settlement>> {
        let permit = self.slots.clone().try_acquire_owned().ok()?;
        self.claim(permit).await
    }

    async fn claim(&self, permit: OwnedSemaphorePermit) -> Option<JoinHandle<Settlement>> {
        // Permit is dropped (slot freed) when nothing is claimable
        let ticket = self.gateway.begin_dispatch().await?;
        Some(self.spawn_job(ticket, permit))
    }

    fn spawn_job(&self, ticket: DispatchTicket, permit: OwnedSemaphorePermit) -> JoinHandle<Settlement> {
        let gateway = Arc::clone(&self.gateway);
        let generator = Arc::clone(&self.generator);

        tokio::spawn(async move {
            let _permit = permit;
            let outcome = generate_isolated(generator, ticket.request.clone(), &ticket).await;
            gateway.finish_dispatch(&ticket, outcome).await
        })
    }
}

/// Run the generator on its own task so a panic surfaces as a JoinError
async fn generate_isolated(
    generator: Arc<dyn BookGenerator>,
    request: BookRequest,
    ticket: &DispatchTicket,
) -> DispatchOutcome {
    let handle = tokio::spawn(async move { generator.generate(&request).await });

    match handle.await {
        Ok(Ok(artifact)) => DispatchOutcome::Completed(artifact),
        Ok(Err(e)) => DispatchOutcome::Failed(e.to_string()),
        Err(join_err) => {
            let reason = if join_err.is_panic() {
                let msg = panic_message(join_err.into_panic());
                error!(
                    request_id = %ticket.request_id,
                    panic_msg = %msg,
                    "Generation task panicked"
                );
                GenerationError::Panicked(msg)
            } else {
                error!(request_id = %ticket.request_id, "Generation task cancelled");
                GenerationError::Unavailable("generation task cancelled".to_string())
            };
            DispatchOutcome::Failed(reason.to_string())
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::gateway::GatewayConfig;
    use crate::application::shutdown_channel;
    use crate::domain::{ConnectionId, Identity, MemberId, Plan, ServerEvent};
    use crate::port::event_sink::mocks::RecordingSink;
    use crate::port::generator::mocks::{MockBehavior, MockBookGenerator};
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::time_provider::SystemTimeProvider;
    use std::time::Duration;

    struct Harness {
        sink: Arc<RecordingSink>,
        gateway: Arc<QueueGateway>,
        generator: Arc<MockBookGenerator>,
    }

    impl Harness {
        fn new(generator: MockBookGenerator) -> Self {
            let sink = Arc::new(RecordingSink::new());
            let gateway = Arc::new(QueueGateway::new(
                sink.clone(),
                Arc::new(SequentialIdProvider::new("req")),
                Arc::new(SystemTimeProvider),
                GatewayConfig::default(),
            ));
            Self {
                sink,
                gateway,
                generator: Arc::new(generator),
            }
        }

        fn dispatcher(&self, slots: usize) -> Arc<Dispatcher> {
            Arc::new(Dispatcher::new(
                self.gateway.clone(),
                self.generator.clone(),
                slots,
            ))
        }

        async fn join(&self, member: &str, plan: Plan) -> ConnectionId {
            let conn = ConnectionId::new(format!("c-{}", member));
            self.gateway
                .on_connect(conn.clone(), Identity::new(member, plan))
                .await;
            self.gateway
                .on_join(&conn, None, BookRequest::sample(member))
                .await
                .unwrap();
            conn
        }
    }

    async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached: {}", what);
    }

    #[tokio::test]
    async fn test_priority_lane_dispatched_first() {
        let h = Harness::new(MockBookGenerator::new_success());
        h.join("a", Plan::Free).await;
        h.join("b", Plan::Paid).await;
        h.join("c", Plan::Free).await;

        let dispatcher = h.dispatcher(1);
        let (tx, token) = shutdown_channel();
        let pump = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.run(token).await })
        };

        let generator = h.generator.clone();
        eventually("three generations", || generator.call_count() == 3).await;
        assert_eq!(h.generator.titles(), vec!["b", "a", "c"]);

        tx.shutdown();
        pump.await.unwrap().unwrap();
        assert_eq!(h.gateway.stats().await.completed_total, 3);
    }

    #[tokio::test]
    async fn test_slot_capacity_respected() {
        let h = Harness::new(MockBookGenerator::new_success().gated());
        for m in ["a", "b", "c", "d"] {
            h.join(m, Plan::Free).await;
        }

        let dispatcher = h.dispatcher(2);
        let (tx, token) = shutdown_channel();
        let pump = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.run(token).await })
        };

        let generator = h.generator.clone();
        eventually("two running", || generator.call_count() == 2).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.generator.call_count(), 2);
        assert_eq!(dispatcher.running(), 2);

        h.generator.release(4);
        eventually("all four generated", || generator.call_count() == 4).await;
        assert!(h.generator.max_running() <= 2);

        tx.shutdown();
        pump.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_pump_continues() {
        let h = Harness::new(MockBookGenerator::new_fail("model overloaded"));
        h.join("a", Plan::Free).await;

        let dispatcher = h.dispatcher(1);
        let (tx, token) = shutdown_channel();
        let pump = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.run(token).await })
        };

        let sink = h.sink.clone();
        eventually("failure delivered", || {
            !sink.named("c-a", "dispatchFailed").is_empty()
        })
        .await;
        match &h.sink.named("c-a", "dispatchFailed")[0] {
            ServerEvent::DispatchFailed { reason, .. } => assert!(reason.contains("model overloaded")),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(h.gateway.position(&MemberId::new("a")).await, None);

        h.generator.set_behavior(MockBehavior::Success);
        h.join("b", Plan::Free).await;
        eventually("next request completes", || {
            !sink.named("c-b", "dispatchCompleted").is_empty()
        })
        .await;

        // Exactly one failure report, no retry
        assert_eq!(h.sink.named("c-a", "dispatchFailed").len(), 1);
        assert_eq!(h.generator.call_count(), 2);

        tx.shutdown();
        pump.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_panic_isolated() {
        let h = Harness::new(MockBookGenerator::new_panic_inducing("generator exploded"));
        h.join("a", Plan::Free).await;

        let dispatcher = h.dispatcher(1);
        let settlement = dispatcher.dispatch_once().await.unwrap().await.unwrap();
        assert_eq!(settlement, Settlement::Delivered(1));

        match &h.sink.named("c-a", "dispatchFailed")[0] {
            ServerEvent::DispatchFailed { reason, .. } => {
                assert!(reason.contains("panicked"));
                assert!(reason.contains("generator exploded"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(dispatcher.running(), 0);

        h.generator.set_behavior(MockBehavior::Success);
        h.join("b", Plan::Free).await;
        let settlement = dispatcher.dispatch_once().await.unwrap().await.unwrap();
        assert_eq!(settlement, Settlement::Delivered(1));
        assert_eq!(h.sink.named("c-b", "dispatchCompleted").len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_during_generation_discards_result() {
        let h = Harness::new(MockBookGenerator::new_success().gated());
        let conn = h.join("a", Plan::Free).await;

        let dispatcher = h.dispatcher(1);
        let job = dispatcher.dispatch_once().await.unwrap();
        let generator = h.generator.clone();
        eventually("generation started", || generator.call_count() == 1).await;

        h.sink.close(&conn);
        h.gateway.on_disconnect(&conn).await;
        h.generator.release(1);

        assert_eq!(job.await.unwrap(), Settlement::DiscardedLeft);
        assert!(h.sink.named("c-a", "dispatchCompleted").is_empty());
        assert_eq!(h.gateway.stats().await.discarded_total, 1);

        // Slot is free again
        h.generator.release(1);
        h.join("b", Plan::Free).await;
        let settlement = dispatcher.dispatch_once().await.unwrap().await.unwrap();
        assert_eq!(settlement, Settlement::Delivered(1));
    }

    #[tokio::test]
    async fn test_member_never_holds_two_slots() {
        let h = Harness::new(MockBookGenerator::new_success().gated());
        let conn = h.join("a", Plan::Free).await;

        let dispatcher = h.dispatcher(2);
        let first = dispatcher.dispatch_once().await.unwrap();

        // Leave during generation and join again
        h.gateway.on_leave(&conn, None).await.unwrap();
        h.gateway
            .on_join(&conn, None, BookRequest::sample("a-again"))
            .await
            .unwrap();

        assert!(dispatcher.dispatch_once().await.is_none());

        h.generator.release(1);
        assert_eq!(first.await.unwrap(), Settlement::DiscardedLeft);

        // The re-joined entry survived settlement of the old request
        let position = h.gateway.position(&MemberId::new("a")).await.unwrap();
        assert_eq!(position.position, 1);
        assert!(!position.dispatched);

        h.generator.release(1);
        let second = dispatcher.dispatch_once().await.unwrap();
        assert_eq!(second.await.unwrap(), Settlement::Delivered(1));
        assert_eq!(h.generator.titles(), vec!["a", "a-again"]);
    }
}
