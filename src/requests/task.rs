//! A single pending unit of REST work and its continuation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::error;
use uuid::Uuid;

use super::response::Response;
use super::transport::TransportRequest;
use crate::error::{RestError, Result};
use crate::route::CompiledRoute;

/// Identifier of one logical call, stable across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback receiving the terminal outcome of a task.
pub type Continuation = Box<dyn FnOnce(Result<Response>) + Send + 'static>;

/// Where the terminal outcome of a task goes.
pub enum Completion {
    /// Awaitable handle on the caller's side
    Channel(oneshot::Sender<Result<Response>>),
    /// Invoked on the dispatcher worker that finished the task
    Callback(Continuation),
}

impl Completion {
    fn deliver(self, outcome: Result<Response>) {
        match self {
            Completion::Channel(sender) => {
                // A dropped receiver means the caller stopped waiting.
                let _ = sender.send(outcome);
            }
            Completion::Callback(callback) => {
                if catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
                    error!("Request continuation panicked");
                }
            }
        }
    }
}

/// One pending request.
///
/// Retries mutate the same task, so its position in the bucket queue and its
/// identity survive every attempt. The continuation fires exactly once:
/// [`RequestTask::complete`] consumes the task, and dropping a task that was
/// never completed delivers [`RestError::Cancelled`].
pub struct RequestTask {
    id: TaskId,
    route: CompiledRoute,
    body: Option<Vec<u8>>,
    headers: Vec<(String, String)>,
    attempts: u32,
    throttles: u32,
    server_failures: u32,
    created_at: Instant,
    not_before: Option<Instant>,
    cancelled: Arc<AtomicBool>,
    completion: Option<Completion>,
}

impl RequestTask {
    pub fn new(route: CompiledRoute, body: Option<Vec<u8>>, completion: Completion) -> Self {
        Self {
            id: TaskId::new(),
            route,
            body,
            headers: Vec::new(),
            attempts: 0,
            throttles: 0,
            server_failures: 0,
            created_at: Instant::now(),
            not_before: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            completion: Some(completion),
        }
    }

    /// Build a task whose outcome arrives on the returned receiver.
    pub fn with_channel(
        route: CompiledRoute,
        body: Option<Vec<u8>>,
    ) -> (Self, oneshot::Receiver<Result<Response>>) {
        let (sender, receiver) = oneshot::channel();
        (Self::new(route, body, Completion::Channel(sender)), receiver)
    }

    pub fn with_callback<F>(route: CompiledRoute, body: Option<Vec<u8>>, callback: F) -> Self
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        Self::new(route, body, Completion::Callback(Box::new(callback)))
    }

    /// Add a request header sent on every attempt.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn route(&self) -> &CompiledRoute {
        &self.route
    }

    pub fn bucket_key(&self) -> &str {
        self.route.bucket_key()
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Transport calls made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn throttles(&self) -> u32 {
        self.throttles
    }

    pub fn server_failures(&self) -> u32 {
        self.server_failures
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Backoff instant before which the task must not be sent.
    pub fn not_before(&self) -> Option<Instant> {
        self.not_before
    }

    /// Shared flag that marks the task as cancelled.
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) fn record_throttle(&mut self) -> u32 {
        self.throttles += 1;
        self.throttles
    }

    pub(crate) fn record_server_failure(&mut self) -> u32 {
        self.server_failures += 1;
        self.server_failures
    }

    pub(crate) fn defer_until(&mut self, at: Instant) {
        self.not_before = Some(at);
    }

    /// Assemble the request for the transport.
    pub fn to_transport_request(&self, default_headers: &[(String, String)]) -> TransportRequest {
        let mut headers: Vec<(String, String)> = default_headers
            .iter()
            .filter(|(name, _)| !self.headers.iter().any(|(own, _)| own.eq_ignore_ascii_case(name)))
            .cloned()
            .collect();
        let has_content_type = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if self.body.is_some() && !has_content_type {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        headers.extend(self.headers.iter().cloned());

        TransportRequest {
            method: self.route.method(),
            path: self.route.path().to_string(),
            query: self.route.query().to_vec(),
            headers,
            body: self.body.clone(),
        }
    }

    /// Deliver the terminal outcome.
    pub fn complete(mut self, outcome: Result<Response>) {
        if let Some(completion) = self.completion.take() {
            completion.deliver(outcome);
        }
    }

    pub fn succeed(self, response: Response) {
        self.complete(Ok(response));
    }

    pub fn fail(self, error: RestError) {
        self.complete(Err(error));
    }
}

impl Drop for RequestTask {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.deliver(Err(RestError::Cancelled));
        }
    }
}

impl std::fmt::Debug for RequestTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTask")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("attempts", &self.attempts)
            .field("throttles", &self.throttles)
            .field("server_failures", &self.server_failures)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::requests::Headers;
    use crate::route::endpoints::webhooks;

    fn route() -> CompiledRoute {
        webhooks::EXECUTE_WEBHOOK.compile(&["1", "token"]).unwrap()
    }

    #[tokio::test]
    async fn test_channel_completion() {
        let (task, receiver) = RequestTask::with_channel(route(), None);
        task.succeed(Response::new(204, Headers::new(), Vec::new()));

        let response = receiver.await.unwrap().unwrap();
        assert_eq!(response.status, 204);
    }

    #[tokio::test]
    async fn test_drop_delivers_cancelled() {
        let (task, receiver) = RequestTask::with_channel(route(), None);
        drop(task);

        assert!(matches!(receiver.await.unwrap(), Err(RestError::Cancelled)));
    }

    #[test]
    fn test_callback_fires_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let task = RequestTask::with_callback(route(), None, move |outcome| {
            assert!(outcome.is_err());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        task.fail(RestError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let task = RequestTask::with_callback(route(), None, |_| panic!("caller bug"));
        task.fail(RestError::Cancelled);
    }

    #[test]
    fn test_transport_request_headers() {
        let defaults = vec![
            ("Authorization".to_string(), "Bot abc".to_string()),
            ("User-Agent".to_string(), "restline".to_string()),
        ];
        let (task, _receiver) = RequestTask::with_channel(route().with_query("wait", "true"), Some(b"{}".to_vec()));
        let task = task.with_header("user-agent", "custom");

        let request = task.to_transport_request(&defaults);
        assert_eq!(request.path, "webhooks/1/token");
        assert_eq!(request.path_and_query(), "webhooks/1/token?wait=true");
        assert_eq!(request.header("authorization"), Some("Bot abc"));
        assert_eq!(request.header("user-agent"), Some("custom"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn test_own_content_type_replaces_default() {
        let (task, _receiver) = RequestTask::with_channel(route(), Some(b"payload".to_vec()));
        let task = task.with_header("Content-Type", "multipart/form-data; boundary=x");

        let request = task.to_transport_request(&[]);
        let content_types: Vec<&str> = request
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
            .collect();
        assert_eq!(content_types, vec!["multipart/form-data; boundary=x"]);
    }

    #[test]
    fn test_counters_and_cancellation_flag() {
        let (mut task, _receiver) = RequestTask::with_channel(route(), None);
        assert_eq!(task.record_attempt(), 1);
        assert_eq!(task.record_attempt(), 2);
        assert_eq!(task.record_throttle(), 1);
        assert_eq!(task.record_server_failure(), 1);

        let flag = task.cancellation();
        assert!(!task.is_cancelled());
        flag.store(true, Ordering::SeqCst);
        assert!(task.is_cancelled());
    }
}
