//! Caller-facing submission API.
//!
//! A [`RestAction`] describes one call. Nothing is sent until it is consumed by
//! [`RestAction::complete`], [`RestAction::submit`], [`RestAction::queue`] or
//! [`RestAction::queue_with`]. Local permission checks run at that point, so a
//! denied action never reaches the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::RestConfig;
use crate::entity::{EntityBuilder, JsonEntityBuilder, Snowflake};
use crate::error::{RestError, Result};
use crate::permission::{AllowAll, Permission, PermissionOracle, Scope};
use crate::requests::{Dispatcher, RequestTask, Response, TaskId, Transport};
use crate::route::CompiledRoute;

/// Header carrying the audit-log reason of a moderation call.
pub const AUDIT_LOG_REASON: &str = "X-Audit-Log-Reason";

type Parser<T> = Box<dyn FnOnce(Response) -> Result<T> + Send + 'static>;

struct ClientInner {
    dispatcher: Dispatcher,
    permissions: Arc<dyn PermissionOracle>,
    entities: Arc<dyn EntityBuilder>,
    actor: Snowflake,
}

/// Handle to one authenticated REST session.
#[derive(Clone)]
pub struct RestClient {
    inner: Arc<ClientInner>,
}

/// Builder for [`RestClient`].
pub struct RestClientBuilder {
    config: RestConfig,
    transport: Option<Arc<dyn Transport>>,
    permissions: Arc<dyn PermissionOracle>,
    entities: Arc<dyn EntityBuilder>,
    actor: Snowflake,
}

impl RestClientBuilder {
    pub fn new(config: RestConfig) -> Self {
        Self {
            config,
            transport: None,
            permissions: Arc::new(AllowAll),
            entities: Arc::new(JsonEntityBuilder),
            actor: Snowflake(0),
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionOracle>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn entity_builder(mut self, entities: Arc<dyn EntityBuilder>) -> Self {
        self.entities = entities;
        self
    }

    /// Account whose capabilities local permission checks consult.
    pub fn actor(mut self, actor: Snowflake) -> Self {
        self.actor = actor;
        self
    }

    /// Open the session's dispatcher. Must run inside a tokio runtime.
    pub fn build(self) -> Result<RestClient> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let dispatcher = Dispatcher::open_with_headers(
            &self.config.dispatcher,
            transport,
            default_headers(&self.config),
        )?;

        Ok(RestClient {
            inner: Arc::new(ClientInner {
                dispatcher,
                permissions: self.permissions,
                entities: self.entities,
                actor: self.actor,
            }),
        })
    }
}

#[cfg(feature = "reqwest")]
fn default_transport() -> Result<Arc<dyn Transport>> {
    let transport = crate::requests::ReqwestTransport::with_defaults()
        .map_err(|e| RestError::Config(e.to_string()))?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Err(RestError::Config(
        "no transport configured; pass one to the builder or enable the `reqwest` feature".into(),
    ))
}

fn default_headers(config: &RestConfig) -> Vec<(String, String)> {
    let mut headers = vec![("User-Agent".to_string(), config.user_agent.clone())];
    if let Some(token) = config.token.as_deref().filter(|t| !t.trim().is_empty()) {
        headers.push(("Authorization".to_string(), format!("Bot {}", token)));
    }
    headers
}

impl RestClient {
    pub fn builder(config: RestConfig) -> RestClientBuilder {
        RestClientBuilder::new(config)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn actor(&self) -> Snowflake {
        self.inner.actor
    }

    pub fn entity_builder(&self) -> Arc<dyn EntityBuilder> {
        Arc::clone(&self.inner.entities)
    }

    pub fn has_capability(&self, permission: Permission, scope: &Scope) -> bool {
        self.inner
            .permissions
            .has_capability(self.inner.actor, permission, scope)
    }

    /// Call `route` and decode a JSON success body into `T`.
    pub fn request<T>(&self, route: CompiledRoute, payload: Option<serde_json::Value>) -> RestAction<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.request_with(route, payload, |response| response.json())
    }

    /// Call `route` and ignore the success body.
    pub fn request_empty(
        &self,
        route: CompiledRoute,
        payload: Option<serde_json::Value>,
    ) -> RestAction<()> {
        self.request_with(route, payload, |_| Ok(()))
    }

    /// Call `route` and turn the success response into `T` with `parser`.
    pub fn request_with<T, F>(
        &self,
        route: CompiledRoute,
        payload: Option<serde_json::Value>,
        parser: F,
    ) -> RestAction<T>
    where
        F: FnOnce(Response) -> Result<T> + Send + 'static,
    {
        RestAction {
            client: self.clone(),
            target: Ok(route),
            payload,
            headers: Vec::new(),
            required: None,
            parser: Box::new(parser),
        }
    }

    /// An action that fails with `error` once consumed, without any network call.
    pub fn failed<T>(&self, error: RestError) -> RestAction<T> {
        RestAction {
            client: self.clone(),
            target: Err(error),
            payload: None,
            headers: Vec::new(),
            required: None,
            parser: Box::new(|_: Response| Err(RestError::Cancelled)),
        }
    }

    /// Close the session's dispatcher, cancelling everything still pending.
    pub async fn close(&self) {
        self.inner.dispatcher.close().await;
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("actor", &self.inner.actor)
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

/// Permission an action needs, and where it is checked locally.
#[derive(Debug, Clone, Copy)]
struct Requirement {
    permission: Permission,
    scope: Option<Scope>,
}

/// A request waiting to be executed.
#[must_use = "a RestAction does nothing until it is completed, submitted or queued"]
pub struct RestAction<T> {
    client: RestClient,
    target: Result<CompiledRoute>,
    payload: Option<serde_json::Value>,
    headers: Vec<(String, String)>,
    required: Option<Requirement>,
    parser: Parser<T>,
}

struct Prepared<T> {
    client: RestClient,
    route: CompiledRoute,
    body: Option<Vec<u8>>,
    headers: Vec<(String, String)>,
    required: Option<Permission>,
    parser: Parser<T>,
}

fn with_headers(task: RequestTask, headers: Vec<(String, String)>) -> RequestTask {
    headers
        .into_iter()
        .fold(task, |task, (name, value)| task.with_header(name, value))
}

impl<T: Send + 'static> RestAction<T> {
    /// Require `permission`. It is checked locally when `scope` is known, and
    /// named on any permission rejection from the server.
    pub fn require(mut self, permission: Permission, scope: Option<Scope>) -> Self {
        self.required = Some(Requirement { permission, scope });
        self
    }

    /// Record a reason in the audit log of the affected guild.
    pub fn reason(self, reason: impl Into<String>) -> Self {
        self.header(AUDIT_LOG_REASON, reason)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn route(&self) -> Option<&CompiledRoute> {
        self.target.as_ref().ok()
    }

    /// Execute and wait for the decoded result.
    pub async fn complete(self) -> Result<T> {
        self.submit().wait().await
    }

    /// Hand the request to the dispatcher and return a handle to its outcome.
    pub fn submit(self) -> PendingRequest<T> {
        let Prepared {
            client,
            route,
            body,
            headers,
            required,
            parser,
        } = match self.prepare() {
            Ok(prepared) => prepared,
            Err(error) => {
                return PendingRequest {
                    state: PendingState::Failed(error),
                }
            }
        };

        let (task, receiver) = RequestTask::with_channel(route, body);
        let task = with_headers(task, headers);
        let ticket = Ticket {
            dispatcher: client.inner.dispatcher.clone(),
            bucket_key: task.bucket_key().to_string(),
            id: task.id(),
            cancellation: task.cancellation(),
        };
        client.inner.dispatcher.submit(task);

        PendingRequest {
            state: PendingState::Queued {
                receiver,
                parser,
                required,
                ticket,
            },
        }
    }

    /// Execute in the background, logging a failure.
    pub fn queue(self) {
        self.queue_with(
            |_| {},
            |error| warn!(error = %error, "Queued request failed"),
        );
    }

    /// Execute in the background, handing the outcome to exactly one callback.
    ///
    /// Callbacks run on a dispatcher worker, or right away on the calling
    /// thread when the action fails before it is queued.
    pub fn queue_with<S, F>(self, on_success: S, on_failure: F)
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(RestError) + Send + 'static,
    {
        let Prepared {
            client,
            route,
            body,
            headers,
            required,
            parser,
        } = match self.prepare() {
            Ok(prepared) => prepared,
            Err(error) => return on_failure(error),
        };

        let task = RequestTask::with_callback(route, body, move |outcome| {
            match finish(outcome, parser, required) {
                Ok(value) => on_success(value),
                Err(error) => on_failure(error),
            }
        });
        client.inner.dispatcher.submit(with_headers(task, headers));
    }

    /// Run the checks that happen before anything is queued.
    fn prepare(self) -> Result<Prepared<T>> {
        let route = self.target?;

        if let Some(Requirement {
            permission,
            scope: Some(scope),
        }) = self.required
        {
            if !self.client.has_capability(permission, &scope) {
                debug!(
                    route = %route,
                    permission = %permission,
                    actor = %self.client.actor(),
                    "Request denied by local permission check"
                );
                return Err(RestError::Permission {
                    permission: Some(permission),
                    message: format!("{} is not granted to {}", permission, self.client.actor()),
                });
            }
        }

        let body = self.payload.as_ref().map(serde_json::to_vec).transpose()?;

        Ok(Prepared {
            client: self.client,
            route,
            body,
            headers: self.headers,
            required: self.required.map(|r| r.permission),
            parser: self.parser,
        })
    }
}

fn finish<T>(
    outcome: Result<Response>,
    parser: Parser<T>,
    required: Option<Permission>,
) -> Result<T> {
    match outcome {
        Ok(response) => parser(response),
        Err(error) => Err(match required {
            Some(permission) => error.with_permission(permission),
            None => error,
        }),
    }
}

struct Ticket {
    dispatcher: Dispatcher,
    bucket_key: String,
    id: TaskId,
    cancellation: Arc<AtomicBool>,
}

enum PendingState<T> {
    Failed(RestError),
    Queued {
        receiver: oneshot::Receiver<Result<Response>>,
        parser: Parser<T>,
        required: Option<Permission>,
        ticket: Ticket,
    },
}

/// Awaitable, cancellable handle to a submitted [`RestAction`].
pub struct PendingRequest<T> {
    state: PendingState<T>,
}

impl<T> PendingRequest<T> {
    /// Identifier of the underlying task, if it reached the dispatcher.
    pub fn id(&self) -> Option<TaskId> {
        match &self.state {
            PendingState::Failed(_) => None,
            PendingState::Queued { ticket, .. } => Some(ticket.id),
        }
    }

    /// Cancel the request.
    ///
    /// A queued request is removed and completes with
    /// [`RestError::Cancelled`]. A request already with a worker is only
    /// flagged and is dropped before its next transport call. Returns whether
    /// the request was still queued.
    pub fn cancel(&self) -> bool {
        match &self.state {
            PendingState::Failed(_) => false,
            PendingState::Queued { ticket, .. } => {
                ticket.cancellation.store(true, Ordering::SeqCst);
                ticket.dispatcher.cancel(&ticket.bucket_key, ticket.id)
            }
        }
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> Result<T> {
        match self.state {
            PendingState::Failed(error) => Err(error),
            PendingState::Queued {
                receiver,
                parser,
                required,
                ..
            } => {
                let outcome = receiver.await.unwrap_or(Err(RestError::Cancelled));
                finish(outcome, parser, required)
            }
        }
    }
}

impl<T> std::fmt::Debug for PendingRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::json;

    use crate::config::DispatcherConfig;
    use crate::permission::StaticPermissions;
    use crate::requests::testing::{json_response, response, Scripted, ScriptedTransport};
    use crate::route::endpoints::{messages, webhooks};

    const ACTOR: Snowflake = Snowflake(7);
    const GUILD: Snowflake = Snowflake(100);

    fn config() -> RestConfig {
        RestConfig {
            token: Some("secret".to_string()),
            user_agent: "restline-tests".to_string(),
            dispatcher: DispatcherConfig {
                max_server_retries: 2,
                backoff_base_ms: 100,
                backoff_jitter: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn client(transport: Arc<ScriptedTransport>, permissions: Arc<StaticPermissions>) -> RestClient {
        RestClient::builder(config())
            .transport(transport)
            .permissions(permissions)
            .actor(ACTOR)
            .build()
            .unwrap()
    }

    #[derive(Debug, Deserialize)]
    struct Message {
        id: Snowflake,
        content: String,
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_decodes_body_and_sends_default_headers() {
        let transport = Arc::new(ScriptedTransport::new());
        let route = messages::SEND_MESSAGE.compile(&["5"]).unwrap();
        transport.script(
            route.path(),
            Scripted::Respond(json_response(200, r#"{"id": "9", "content": "hi"}"#)),
        );
        let client = client(transport.clone(), Arc::new(StaticPermissions::new()));

        let message: Message = client
            .request(route, Some(json!({"content": "hi"})))
            .reason("testing")
            .complete()
            .await
            .unwrap();
        assert_eq!(message.id, Snowflake(9));
        assert_eq!(message.content, "hi");

        let request = &transport.calls()[0].request;
        assert_eq!(request.header("authorization"), Some("Bot secret"));
        assert_eq!(request.header("user-agent"), Some("restline-tests"));
        assert_eq!(request.header("x-audit-log-reason"), Some("testing"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(&br#"{"content":"hi"}"#[..]));

        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_denial_makes_no_transport_call() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone(), Arc::new(StaticPermissions::new()));
        let route = webhooks::DELETE_WEBHOOK.compile(&["1"]).unwrap();

        let result = client
            .request_empty(route, None)
            .require(Permission::ManageWebhooks, Some(Scope::Guild(GUILD)))
            .complete()
            .await;

        match result {
            Err(RestError::Permission { permission, .. }) => {
                assert_eq!(permission, Some(Permission::ManageWebhooks))
            }
            other => panic!("unexpected {other:?}"),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(transport.calls().is_empty());

        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_granted_permission_is_sent() {
        let transport = Arc::new(ScriptedTransport::new());
        let permissions = Arc::new(StaticPermissions::new());
        permissions.grant(ACTOR, GUILD, Permission::ManageWebhooks);
        let client = client(transport.clone(), permissions);
        let route = webhooks::DELETE_WEBHOOK.compile(&["1"]).unwrap();

        client
            .request_empty(route, None)
            .require(Permission::ManageWebhooks, Some(Scope::Guild(GUILD)))
            .complete()
            .await
            .unwrap();
        assert_eq!(transport.calls().len(), 1);

        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_permission_rejection_names_requirement() {
        let transport = Arc::new(ScriptedTransport::new());
        let route = webhooks::DELETE_WEBHOOK.compile(&["1"]).unwrap();
        transport.script(
            route.path(),
            Scripted::Respond(json_response(403, r#"{"code": 50013, "message": "Missing Permissions"}"#)),
        );
        let client = client(transport.clone(), Arc::new(StaticPermissions::new()));

        let result = client
            .request_empty(route, None)
            .require(Permission::ManageWebhooks, None)
            .complete()
            .await;

        match result {
            Err(RestError::Permission { permission, message }) => {
                assert_eq!(permission, Some(Permission::ManageWebhooks));
                assert!(message.contains("Missing Permissions"));
            }
            other => panic!("unexpected {other:?}"),
        }

        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_success_body_is_deserialization_error() {
        let transport = Arc::new(ScriptedTransport::new());
        let route = messages::GET_MESSAGE.compile(&["1", "2"]).unwrap();
        transport.script(route.path(), Scripted::Respond(response(200, &[], "<html>")));
        let client = client(transport.clone(), Arc::new(StaticPermissions::new()));

        let result: Result<Message> = client.request(route, None).complete().await;
        assert!(matches!(result, Err(RestError::Deserialization(_))));
        assert_eq!(transport.calls().len(), 1);

        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_with_invokes_one_callback() {
        let transport = Arc::new(ScriptedTransport::new());
        let ok_route = messages::DELETE_MESSAGE.compile(&["1", "2"]).unwrap();
        let missing_route = messages::DELETE_MESSAGE.compile(&["1", "3"]).unwrap();
        transport.script(
            missing_route.path(),
            Scripted::Respond(json_response(404, r#"{"code": 10008, "message": "Unknown Message"}"#)),
        );
        let client = client(transport.clone(), Arc::new(StaticPermissions::new()));

        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        for route in [ok_route, missing_route] {
            let successes = Arc::clone(&successes);
            let failures = Arc::clone(&failures);
            client.request_empty(route, None).queue_with(
                move |()| {
                    successes.fetch_add(1, Ordering::SeqCst);
                },
                move |error| {
                    assert!(matches!(error, RestError::NotFound(_)));
                    failures.fetch_add(1, Ordering::SeqCst);
                },
            );
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_with_preflight_failure_runs_on_caller() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone(), Arc::new(StaticPermissions::new()));

        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        client.failed::<()>(RestError::Config("bad route".into())).queue_with(
            |()| panic!("must not succeed"),
            move |error| {
                assert!(matches!(error, RestError::Config(_)));
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(transport.calls().is_empty());

        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_request_cancel() {
        let transport = Arc::new(ScriptedTransport::new());
        let route = webhooks::DELETE_WEBHOOK.compile(&["1"]).unwrap();
        transport.script(
            route.path(),
            Scripted::Respond(response(
                204,
                &[("X-RateLimit-Remaining", "0"), ("X-RateLimit-Reset-After", "30")],
                "",
            )),
        );
        let client = client(transport.clone(), Arc::new(StaticPermissions::new()));

        client.request_empty(route.clone(), None).complete().await.unwrap();
        let pending = client.request_empty(route, None).submit();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(pending.id().is_some());
        assert!(pending.cancel());
        assert!(matches!(pending.wait().await, Err(RestError::Cancelled)));
        assert_eq!(transport.calls().len(), 1);

        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_requests() {
        let transport = Arc::new(ScriptedTransport::new());
        let route = webhooks::GET_WEBHOOK.compile(&["1"]).unwrap();
        transport.script(route.path(), Scripted::Hang);
        let client = client(transport.clone(), Arc::new(StaticPermissions::new()));

        let first = client.request::<serde_json::Value>(route.clone(), None).submit();
        let second = client.request::<serde_json::Value>(route, None).submit();
        tokio::time::sleep(Duration::from_millis(10)).await;

        client.close().await;
        assert!(matches!(first.wait().await, Err(RestError::Cancelled)));
        assert!(matches!(second.wait().await, Err(RestError::Cancelled)));
    }

    #[tokio::test]
    async fn test_builder_requires_transport_without_http_feature() {
        if cfg!(feature = "reqwest") {
            return;
        }
        assert!(matches!(
            RestClient::builder(config()).build(),
            Err(RestError::Config(_))
        ));
    }

    #[test]
    fn test_default_headers() {
        let mut config = config();
        let headers = default_headers(&config);
        assert!(headers.contains(&("Authorization".to_string(), "Bot secret".to_string())));

        config.token = Some("  ".to_string());
        let headers = default_headers(&config);
        assert!(headers.iter().all(|(name, _)| name != "Authorization"));
    }
}
