//! Scheduling engine: per-bucket FIFO lanes under a shared global ceiling.
//!
//! Every bucket key owns a lane holding its rate-limit state and its queue of
//! pending tasks. At most one worker drives a lane at a time, which gives
//! strict FIFO dispatch per bucket and a single writer for the bucket state.
//! Lanes never wait on each other; the only thing they share is the global
//! ceiling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

use super::classify::{classify_within, Classification};
use super::retry::RetryPolicy;
use super::task::{RequestTask, TaskId};
use super::transport::{Transport, TransportError};
use super::Response;
use crate::config::DispatcherConfig;
use crate::error::{RestError, Result};
use crate::ratelimit::{deadline, GlobalCeiling, RateLimitBucket, RateLimitHeaders};

/// Bucket state and pending tasks for one bucket key.
struct Lane {
    state: Mutex<LaneState>,
}

struct LaneState {
    bucket: RateLimitBucket,
    queue: VecDeque<RequestTask>,
    worker_active: bool,
    last_activity: Instant,
}

impl Lane {
    fn new(key: &str) -> Self {
        Self {
            state: Mutex::new(LaneState {
                bucket: RateLimitBucket::new(key),
                queue: VecDeque::new(),
                worker_active: false,
                last_activity: Instant::now(),
            }),
        }
    }
}

enum Step {
    Idle,
    Wait(Instant),
    Send(RequestTask),
}

enum Enqueued {
    Queued,
    SpawnWorker(Arc<Lane>),
    Rejected(RequestTask),
}

struct Inner {
    lanes: DashMap<String, Arc<Lane>>,
    global: Arc<GlobalCeiling>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    default_headers: Vec<(String, String)>,
    runtime: Handle,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    active_workers: AtomicUsize,
    workers_done: Notify,
    responses: AtomicU64,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Session-scoped request scheduler.
///
/// Cloning is cheap and every clone drives the same lanes.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Open a dispatcher on the current tokio runtime.
    pub fn open(config: &DispatcherConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::open_with_headers(config, transport, Vec::new())
    }

    /// Open a dispatcher that adds `default_headers` to every request.
    pub fn open_with_headers(
        config: &DispatcherConfig,
        transport: Arc<dyn Transport>,
        default_headers: Vec<(String, String)>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            RestError::Config("a dispatcher must be opened inside a tokio runtime".to_string())
        })?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let global = Arc::new(GlobalCeiling::new(
            config.global_limit,
            config.global_interval(),
        ));
        let mut background = vec![global.spawn_replenisher(&runtime, shutdown_rx)];

        let inner = Arc::new(Inner {
            lanes: DashMap::new(),
            global,
            transport,
            policy: RetryPolicy::from_config(config),
            default_headers,
            runtime,
            closed: AtomicBool::new(false),
            shutdown,
            active_workers: AtomicUsize::new(0),
            workers_done: Notify::new(),
            responses: AtomicU64::new(0),
            background: Mutex::new(Vec::new()),
        });

        if let Some(idle) = config.bucket_idle_eviction() {
            background.push(spawn_evictor(&inner, idle));
        }
        *inner.background.lock() = background;

        info!(
            global_limit = config.global_limit,
            global_interval_ms = config.global_interval_ms,
            max_server_retries = config.max_server_retries,
            "Dispatcher opened"
        );

        Ok(Self { inner })
    }

    /// Queue a task behind every earlier task of its bucket.
    ///
    /// Never blocks and may be called from any thread. After [`Dispatcher::close`]
    /// the task is completed with [`RestError::Cancelled`] right away.
    pub fn submit(&self, task: RequestTask) -> TaskId {
        let id = task.id();
        self.inner.enqueue(task);
        id
    }

    /// Remove a task that has not been handed to the transport yet.
    ///
    /// Returns `false` when the task is no longer queued, either because it is
    /// already with a worker or because it finished.
    pub fn cancel(&self, bucket_key: &str, id: TaskId) -> bool {
        let removed = self.inner.lanes.get(bucket_key).and_then(|lane| {
            let mut state = lane.state.lock();
            let position = state.queue.iter().position(|task| task.id() == id)?;
            state.queue.remove(position)
        });

        match removed {
            Some(task) => {
                debug!(bucket = %bucket_key, task_id = %id, "Request cancelled while queued");
                task.fail(RestError::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Stop scheduling and cancel everything still pending.
    ///
    /// Queued tasks and tasks waiting inside a worker complete with
    /// [`RestError::Cancelled`]; in-flight transport calls are abandoned.
    /// Returns once every worker has exited. Calling it again is a no-op.
    pub async fn close(&self) {
        let inner = &self.inner;

        if !inner.closed.swap(true, Ordering::SeqCst) {
            inner.shutdown.send_replace(true);

            let drained: Vec<RequestTask> = inner
                .lanes
                .iter()
                .flat_map(|entry| {
                    let mut state = entry.value().state.lock();
                    let queued: Vec<RequestTask> = state.queue.drain(..).collect();
                    queued
                })
                .collect();

            info!(cancelled = drained.len(), "Closing dispatcher");
            for task in drained {
                task.fail(RestError::Cancelled);
            }
        }

        loop {
            let done = inner.workers_done.notified();
            tokio::pin!(done);
            done.as_mut().enable();
            if inner.active_workers.load(Ordering::SeqCst) == 0 {
                break;
            }
            done.await;
        }

        let background: Vec<JoinHandle<()>> = inner.background.lock().drain(..).collect();
        for handle in background {
            let _ = handle.await;
        }
        debug!("Dispatcher closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of buckets currently tracked.
    pub fn bucket_count(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Tasks waiting in a bucket's queue, excluding one a worker holds.
    pub fn queued(&self, bucket_key: &str) -> usize {
        self.inner
            .lanes
            .get(bucket_key)
            .map(|lane| {
                let state = lane.state.lock();
                state.queue.len()
            })
            .unwrap_or(0)
    }

    /// Copy of a bucket's current rate-limit state.
    pub fn bucket(&self, bucket_key: &str) -> Option<RateLimitBucket> {
        self.inner
            .lanes
            .get(bucket_key)
            .map(|lane| {
                let state = lane.state.lock();
                state.bucket.clone()
            })
    }

    /// Time until the bucket admits its next request.
    pub fn time_until_available(&self, bucket_key: &str) -> Duration {
        self.bucket(bucket_key)
            .map(|bucket| bucket.time_until_available(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Responses received from the transport so far, retried ones included.
    pub fn response_total(&self) -> u64 {
        self.inner.responses.load(Ordering::Relaxed)
    }

    pub fn global(&self) -> &GlobalCeiling {
        &self.inner.global
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("buckets", &self.inner.lanes.len())
            .field("closed", &self.is_closed())
            .field("responses", &self.response_total())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl Inner {
    fn enqueue(self: &Arc<Self>, task: RequestTask) {
        let key = task.bucket_key().to_string();
        let id = task.id();

        // Callbacks must never run while a lane or map lock is held.
        let outcome = {
            let lane = self
                .lanes
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Lane::new(&key)));
            let mut state = lane.state.lock();

            if self.closed.load(Ordering::SeqCst) {
                Enqueued::Rejected(task)
            } else {
                state.queue.push_back(task);
                state.last_activity = Instant::now();
                debug!(bucket = %key, task_id = %id, queued = state.queue.len(), "Request queued");

                if state.worker_active {
                    Enqueued::Queued
                } else {
                    state.worker_active = true;
                    Enqueued::SpawnWorker(Arc::clone(lane.value()))
                }
            }
        };

        match outcome {
            Enqueued::Queued => {}
            Enqueued::SpawnWorker(lane) => self.spawn_worker(key, lane),
            Enqueued::Rejected(task) => {
                debug!(bucket = %key, task_id = %id, "Request rejected, dispatcher closed");
                task.fail(RestError::Cancelled);
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, key: String, lane: Arc<Lane>) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        let guard = WorkerGuard {
            inner: Arc::clone(self),
            key,
            lane,
        };
        self.runtime.spawn(async move {
            guard.inner.drive(&guard.key, &guard.lane).await;
        });
    }

    #[instrument(skip_all, fields(bucket = %key))]
    async fn drive(self: &Arc<Self>, key: &str, lane: &Arc<Lane>) {
        let mut shutdown = self.shutdown.subscribe();
        trace!("Lane worker started");

        loop {
            // close() drains the queue itself.
            if self.closed.load(Ordering::SeqCst) {
                break;
            }

            let step = {
                let mut state = lane.state.lock();
                let now = Instant::now();
                let step = match state.queue.front() {
                    None => {
                        state.worker_active = false;
                        Step::Idle
                    }
                    Some(task) => {
                        let ready_at = state
                            .bucket
                            .available_at(now)
                            .max(task.not_before().unwrap_or(now));
                        if ready_at <= now {
                            match state.queue.pop_front() {
                                Some(task) => Step::Send(task),
                                None => Step::Idle,
                            }
                        } else {
                            Step::Wait(ready_at)
                        }
                    }
                };
                step
            };

            let mut task = match step {
                Step::Idle => break,
                Step::Wait(until) => {
                    trace!(wait = ?until.saturating_duration_since(Instant::now()), "Waiting for bucket");
                    tokio::select! {
                        _ = tokio::time::sleep_until(until) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
                Step::Send(task) => task,
            };

            if task.is_cancelled() {
                debug!(task_id = %task.id(), "Request cancelled before dispatch");
                task.fail(RestError::Cancelled);
                continue;
            }

            tokio::select! {
                _ = self.global.acquire() => {}
                _ = shutdown.changed() => {
                    task.fail(RestError::Cancelled);
                    break;
                }
            }

            // Cancelled while waiting for the ceiling: the token was never spent.
            if task.is_cancelled() {
                self.global.release();
                debug!(task_id = %task.id(), "Request cancelled before dispatch");
                task.fail(RestError::Cancelled);
                continue;
            }

            let attempt = task.record_attempt();
            let request = task.to_transport_request(&self.default_headers);
            debug!(task_id = %task.id(), route = %task.route(), attempt, "Dispatching request");

            let result = tokio::select! {
                result = self.transport.send(request) => result,
                _ = shutdown.changed() => {
                    debug!(task_id = %task.id(), "In-flight request abandoned on close");
                    task.fail(RestError::Cancelled);
                    break;
                }
            };

            self.settle(key, lane, task, result);
        }

        trace!("Lane worker stopped");
    }

    /// Apply one transport result: update the bucket, then finish or requeue.
    fn settle(
        self: &Arc<Self>,
        key: &str,
        lane: &Arc<Lane>,
        mut task: RequestTask,
        result: std::result::Result<Response, TransportError>,
    ) {
        let now = Instant::now();

        let response = match result {
            Ok(response) => {
                self.responses.fetch_add(1, Ordering::Relaxed);
                response
            }
            Err(error) => {
                warn!(task_id = %task.id(), error = %error, "Transport failure");
                self.retry_or_fail(key, lane, task, None, error.message, now);
                return;
            }
        };

        let classification = {
            let mut state = lane.state.lock();
            let accounting =
                RateLimitHeaders::parse(&response.headers).capped(self.policy.max_cooldown);
            state.bucket.apply(&accounting, now);
            state.last_activity = now;
            trace!(
                remaining = ?state.bucket.remaining(),
                limit = ?state.bucket.limit(),
                "Bucket updated"
            );
            classify_within(&response, self.policy.max_cooldown)
        };

        match classification {
            Classification::Success => {
                trace!(task_id = %task.id(), status = response.status, "Request succeeded");
                task.succeed(response);
            }
            Classification::Throttled {
                retry_after,
                global,
            } => {
                let throttles = task.record_throttle();
                if global {
                    self.global.pause_until(deadline(now, retry_after));
                } else {
                    lane.state.lock().bucket.mark_throttled(retry_after, now);
                }
                warn!(
                    task_id = %task.id(),
                    retry_after = ?retry_after,
                    global,
                    throttles,
                    "Rate limited by server"
                );

                if self.policy.should_retry_throttle(throttles) {
                    self.requeue_front(lane, task);
                } else {
                    warn!(task_id = %task.id(), throttles, "Giving up after repeated rate limits");
                    task.fail(RestError::ThrottledTimeout {
                        bucket: key.to_string(),
                        attempts: throttles,
                    });
                }
            }
            Classification::ServerError { status, message } => {
                self.retry_or_fail(key, lane, task, Some(status), message, now);
            }
            Classification::ClientError(error) => {
                debug!(task_id = %task.id(), status = response.status, error = %error, "Request rejected");
                task.fail(error);
            }
        }
    }

    fn retry_or_fail(
        self: &Arc<Self>,
        key: &str,
        lane: &Arc<Lane>,
        mut task: RequestTask,
        status: Option<u16>,
        message: String,
        now: Instant,
    ) {
        let failures = task.record_server_failure();

        if self.policy.should_retry_server(failures) {
            let delay = self.policy.backoff.delay(failures);
            task.defer_until(deadline(now, delay));
            warn!(
                task_id = %task.id(),
                status = ?status,
                failures,
                delay = ?delay,
                "Retrying after server error"
            );
            self.requeue_front(lane, task);
        } else {
            let attempts = task.attempts();
            error!(
                bucket = %key,
                task_id = %task.id(),
                status = ?status,
                attempts,
                "Giving up after server errors"
            );
            task.fail(RestError::Server {
                status,
                attempts,
                message,
            });
        }
    }

    /// Put a retried task back ahead of everything submitted after it.
    fn requeue_front(&self, lane: &Arc<Lane>, task: RequestTask) {
        let rejected = {
            let mut state = lane.state.lock();
            if self.closed.load(Ordering::SeqCst) {
                Some(task)
            } else {
                state.queue.push_front(task);
                None
            }
        };

        if let Some(task) = rejected {
            task.fail(RestError::Cancelled);
        }
    }

    /// Drop lanes with nothing queued, no worker, no pending cooldown and no
    /// activity for `idle`.
    fn evict_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.lanes.len();
        self.lanes.retain(|_, lane| {
            let state = lane.state.lock();
            let evictable = state.queue.is_empty()
                && !state.worker_active
                && state.bucket.is_settled(now)
                && now.saturating_duration_since(state.last_activity) >= idle;
            !evictable
        });
        before.saturating_sub(self.lanes.len())
    }
}

/// Keeps the worker count honest and restarts a lane whose worker panicked.
struct WorkerGuard {
    inner: Arc<Inner>,
    key: String,
    lane: Arc<Lane>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let respawn = {
                let mut state = self.lane.state.lock();
                let respawn =
                    !state.queue.is_empty() && !self.inner.closed.load(Ordering::SeqCst);
                state.worker_active = respawn;
                respawn
            };
            error!(bucket = %self.key, respawn, "Lane worker panicked");
            if respawn {
                self.inner
                    .spawn_worker(self.key.clone(), Arc::clone(&self.lane));
            }
        }

        if self.inner.active_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.workers_done.notify_waiters();
        }
    }
}

fn spawn_evictor(inner: &Arc<Inner>, idle: Duration) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let mut shutdown = inner.shutdown.subscribe();
    inner.runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + idle, idle);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(inner) = weak.upgrade() else { break };
                    let evicted = inner.evict_idle(idle);
                    if evicted > 0 {
                        debug!(evicted, remaining = inner.lanes.len(), "Evicted idle buckets");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}
