//! Rate-limited request queue.
//!
//! One queue exists per (provider, tier) pair. Requests run strictly one at
//! a time in enqueue order, and consecutive starts are spaced by at least
//! `ceil(60000 / rpm)` milliseconds plus a uniform random jitter. A failing
//! or panicking task only rejects its own caller; the worker moves on to the
//! next request.

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::safety::SafetyTier;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace, warn};

/// What the worker decided for a dequeued request
enum Disposition {
    Run,
    Cancel,
}

type Job = Box<dyn FnOnce(Disposition) -> BoxFuture<'static, ()> + Send>;

/// A queued request; consumed exactly once (run or cancelled)
struct QueueRequest {
    job: Job,
    description: String,
    enqueued_at: Instant,
}

struct State {
    pending: VecDeque<QueueRequest>,
    processing: bool,
    last_start: Option<Instant>,
}

struct Inner {
    name: String,
    min_interval: Duration,
    jitter: Duration,
    state: Mutex<State>,
}

/// Snapshot of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    /// Requests waiting to start
    pub pending: usize,
    /// The worker is running or waiting to run a request
    pub processing: bool,
    /// Earliest time the next request may start, ignoring jitter
    pub next_available_at: Option<Instant>,
}

/// Serializes calls to one provider under a requests-per-minute budget
#[derive(Clone)]
pub struct RateLimitedQueue {
    inner: Arc<Inner>,
}

impl RateLimitedQueue {
    /// Create a queue allowing `rpm` starts per minute
    ///
    /// `rpm` of zero is treated as one.
    pub fn new(name: impl Into<String>, rpm: u32, jitter: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                min_interval: min_interval(rpm),
                jitter,
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    processing: false,
                    last_start: None,
                }),
            }),
        }
    }

    /// Queue name used in logs
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Minimum spacing between starts
    pub fn min_interval(&self) -> Duration {
        self.inner.min_interval
    }

    /// Queue a task and wait for its result
    ///
    /// The task is not started until its turn comes. If the queue is cleared
    /// first, the caller gets `QueueError::Cancelled` converted into `E`; a
    /// panic inside the task becomes `QueueError::Panicked`.
    pub async fn enqueue<T, E, F, Fut>(&self, task: F, description: impl Into<String>) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<QueueError> + Send + 'static,
    {
        let description = description.into();
        let (tx, rx) = oneshot::channel::<Result<T, E>>();

        let job_description = description.clone();
        let job: Job = Box::new(move |disposition| match disposition {
            Disposition::Run => async move {
                let outcome = AssertUnwindSafe(async move { task().await })
                    .catch_unwind()
                    .await;
                let result = outcome.unwrap_or_else(|_| {
                    warn!(description = %job_description, "queued task panicked");
                    Err(QueueError::Panicked {
                        description: job_description,
                    }
                    .into())
                });
                let _ = tx.send(result);
            }
            .boxed(),
            Disposition::Cancel => {
                let _ = tx.send(Err(QueueError::Cancelled {
                    description: job_description,
                }
                .into()));
                futures::future::ready(()).boxed()
            }
        });

        self.push(QueueRequest {
            job,
            description: description.clone(),
            enqueued_at: Instant::now(),
        });

        match rx.await {
            Ok(result) => result,
            // The worker dropped the request without answering
            Err(_) => Err(QueueError::Cancelled { description }.into()),
        }
    }

    /// Report pending count, processing flag and next start time
    pub fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock();
        QueueStatus {
            pending: state.pending.len(),
            processing: state.processing,
            next_available_at: state.last_start.map(|t| t + self.inner.min_interval),
        }
    }

    /// Cancel every request that has not started; returns how many
    ///
    /// A request already running is left to finish.
    pub fn clear(&self) -> usize {
        let drained: Vec<QueueRequest> = {
            let mut state = self.inner.state.lock();
            state.pending.drain(..).collect()
        };
        let count = drained.len();
        for request in drained {
            debug!(queue = %self.inner.name, description = %request.description, "cancelling queued request");
            // The cancel path answers synchronously
            drop((request.job)(Disposition::Cancel));
        }
        if count > 0 {
            info!(queue = %self.inner.name, cancelled = count, "queue cleared");
        }
        count
    }

    fn push(&self, request: QueueRequest) {
        let start_worker = {
            let mut state = self.inner.state.lock();
            state.pending.push_back(request);
            !std::mem::replace(&mut state.processing, true)
        };
        if start_worker {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run().await });
        }
    }
}

impl std::fmt::Debug for RateLimitedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedQueue")
            .field("name", &self.inner.name)
            .field("min_interval", &self.inner.min_interval)
            .field("status", &self.status())
            .finish()
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                if state.pending.is_empty() {
                    state.processing = false;
                    return;
                }
                self.wait_before_next(state.last_start)
            };

            if !wait.is_zero() {
                trace!(queue = %self.name, wait_ms = wait.as_millis() as u64, "waiting for rate limit");
                sleep(wait).await;
            }

            let request = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(request) => {
                        state.last_start = Some(Instant::now());
                        request
                    }
                    // Cleared while we slept
                    None => {
                        state.processing = false;
                        return;
                    }
                }
            };

            debug!(
                queue = %self.name,
                description = %request.description,
                queued_ms = request.enqueued_at.elapsed().as_millis() as u64,
                "starting queued request"
            );
            (request.job)(Disposition::Run).await;
        }
    }

    fn wait_before_next(&self, last_start: Option<Instant>) -> Duration {
        let spacing = last_start
            .map(|t| self.min_interval.saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO);
        spacing + self.sample_jitter()
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// `ceil(60000 / rpm)` milliseconds
fn min_interval(rpm: u32) -> Duration {
    let rpm = u64::from(rpm.max(1));
    Duration::from_millis(60_000u64.div_ceil(rpm))
}

/// Lazily created queues keyed by (provider, tier)
#[derive(Debug)]
pub struct QueueRegistry {
    config: QueueConfig,
    queues: Mutex<HashMap<(String, SafetyTier), RateLimitedQueue>>,
}

impl QueueRegistry {
    /// Create an empty registry
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// The queue for a provider and tier, created on first use
    pub fn queue(&self, provider: &str, tier: SafetyTier) -> RateLimitedQueue {
        let mut queues = self.queues.lock();
        queues
            .entry((provider.to_string(), tier))
            .or_insert_with(|| {
                let rpm = self.config.rpm_for(tier);
                debug!(provider, %tier, rpm, "creating request queue");
                RateLimitedQueue::new(
                    format!("{provider}/{tier}"),
                    rpm,
                    Duration::from_millis(self.config.jitter_ms),
                )
            })
            .clone()
    }

    /// Clear every queue; returns the total number of cancelled requests
    pub fn clear_all(&self) -> usize {
        let queues: Vec<RateLimitedQueue> = self.queues.lock().values().cloned().collect();
        queues.iter().map(RateLimitedQueue::clear).sum()
    }
}
