// Book Generator Port
// Abstraction over the external AI book-generation worker

use crate::domain::{BookArtifact, BookRequest};
use async_trait::async_trait;
use thiserror::Error;

/// Generation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generator rejected request: {0}")]
    Rejected(String),

    #[error("Generation timeout after {0}ms")]
    Timeout(u64),

    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Generation worker panicked: {0}")]
    Panicked(String),
}

/// Book Generator trait
///
/// Implementations:
/// - HttpBookGenerator: POSTs the request to a generation service
/// - CommandBookGenerator: runs a local generator program
///
/// Duration, timeouts and internal retries are the implementation's concern.
#[async_trait]
pub trait BookGenerator: Send + Sync {
    /// Generate a book for the request
    ///
    /// # Errors
    /// - GenerationError::Timeout if the worker exceeds its deadline
    /// - GenerationError::Rejected if the worker refuses the request
    async fn generate(&self, request: &BookRequest) -> Result<BookArtifact, GenerationError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    /// Mock generator behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed with `{"title": <request title>}`
        Success,
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    /// Mock Book Generator
    ///
    /// When gated, every call waits for a permit released by the test.
    pub struct MockBookGenerator {
        behavior: Mutex<MockBehavior>,
        gate: Option<Arc<Semaphore>>,
        call_count: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        titles: Mutex<Vec<String>>,
    }

    impl MockBookGenerator {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                gate: None,
                call_count: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                titles: Mutex::new(Vec::new()),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        /// Hold every call until `release` is called
        pub fn gated(mut self) -> Self {
            self.gate = Some(Arc::new(Semaphore::new(0)));
            self
        }

        /// Let `n` held calls complete
        pub fn release(&self, n: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(n);
            }
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Highest number of concurrent calls observed
        pub fn max_running(&self) -> usize {
            self.max_running.load(Ordering::SeqCst)
        }

        /// Titles in call order
        pub fn titles(&self) -> Vec<String> {
            self.titles.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    #[async_trait]
    impl BookGenerator for MockBookGenerator {
        async fn generate(&self, request: &BookRequest) -> Result<BookArtifact, GenerationError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.titles
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(request.title.clone());

            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            let behavior = self.behavior.lock().unwrap_or_else(|e| e.into_inner()).clone();
            match behavior {
                MockBehavior::Success => Ok(BookArtifact::new(json!({
                    "title": request.title,
                    "chapters": request.num_chapters,
                }))),
                MockBehavior::Fail(msg) => Err(GenerationError::Rejected(msg)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
            }
        }
    }
}
