//! Operation work queue.
//!
//! Feeds operation ids to an [`Executor`] with bounded concurrency. An id is
//! never processed by two workers at once: adding an id that is already
//! queued is a no-op, adding one that is being processed schedules exactly
//! one more run after the current one ends.

use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use crate::config::QueueConfig;
use crate::error::ProcessResult;

/// Processes one operation and reports when to look at it again.
#[async_trait]
pub trait Executor: Send + Sync {
    /// `Ok(ZERO)` drops the id, `Ok(delay)` re-queues it after `delay`.
    async fn execute(&self, operation_id: &str) -> ProcessResult<Duration>;
}

#[derive(Default)]
struct QueueState {
    queued: HashSet<String>,
    processing: HashSet<String>,
    dirty: HashSet<String>,
}

struct QueueInner {
    config: QueueConfig,
    executor: Arc<dyn Executor>,
    sender: mpsc::UnboundedSender<String>,
    receiver: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    state: Mutex<QueueState>,
    semaphore: Arc<Semaphore>,
}

/// Cloneable handle to a worker queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub fn new(executor: Arc<dyn Executor>, mut config: QueueConfig) -> Self {
        config.workers = config.workers.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(config.workers));
        Self {
            inner: Arc::new(QueueInner {
                config,
                executor,
                sender,
                receiver: tokio::sync::Mutex::new(Some(receiver)),
                state: Mutex::new(QueueState::default()),
                semaphore,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an operation for processing.
    pub fn add(&self, operation_id: &str) {
        let mut state = self.state();
        if state.queued.contains(operation_id) {
            return;
        }
        if state.processing.contains(operation_id) {
            state.dirty.insert(operation_id.to_string());
            return;
        }
        state.queued.insert(operation_id.to_string());
        drop(state);

        if self.inner.sender.send(operation_id.to_string()).is_err() {
            tracing::warn!(queue = %self.name(), operation_id = %operation_id, "Queue closed, dropping operation");
            self.state().queued.remove(operation_id);
        }
    }

    /// Queue an operation once `delay` has passed.
    pub fn add_after(&self, operation_id: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(operation_id);
            return;
        }
        let queue = self.clone();
        let operation_id = operation_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&operation_id);
        });
    }

    /// Number of ids waiting for a worker.
    pub fn len(&self) -> usize {
        self.state().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self, operation_id: &str) -> bool {
        self.state().processing.contains(operation_id)
    }

    /// Process queued ids until `shutdown` resolves, then wait for the
    /// in-flight ones.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let Some(mut receiver) = self.inner.receiver.lock().await.take() else {
            tracing::warn!(queue = %self.name(), "Queue is already running");
            return;
        };
        tokio::pin!(shutdown);

        tracing::info!(queue = %self.name(), workers = self.inner.config.workers, "Queue started");

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.inner.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let operation_id = tokio::select! {
                _ = &mut shutdown => break,
                received = receiver.recv() => match received {
                    Some(id) => id,
                    None => break,
                },
            };

            {
                let mut state = self.state();
                state.queued.remove(&operation_id);
                state.processing.insert(operation_id.clone());
            }

            let queue = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                queue.process(operation_id).await;
            });
        }

        // Wait for workers still holding permits.
        let workers = u32::try_from(self.inner.config.workers).unwrap_or(u32::MAX);
        let _ = self.inner.semaphore.acquire_many(workers).await;

        *self.inner.receiver.lock().await = Some(receiver);
        tracing::info!(queue = %self.name(), "Queue stopped");
    }

    async fn process(&self, operation_id: String) {
        let result = self.inner.executor.execute(&operation_id).await;

        let dirty = {
            let mut state = self.state();
            state.processing.remove(&operation_id);
            state.dirty.remove(&operation_id)
        };

        match result {
            Ok(delay) if !delay.is_zero() => {
                tracing::debug!(
                    queue = %self.name(),
                    operation_id = %operation_id,
                    delay_ms = delay.as_millis() as u64,
                    "Operation re-queued"
                );
                self.add_after(&operation_id, delay);
            }
            Ok(_) => {
                tracing::debug!(queue = %self.name(), operation_id = %operation_id, "Operation processed");
            }
            Err(e) => {
                tracing::error!(
                    queue = %self.name(),
                    operation_id = %operation_id,
                    error = %e,
                    "Operation processing failed"
                );
            }
        }

        if dirty {
            self.add(&operation_id);
        }
    }
}
