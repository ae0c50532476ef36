//! Restline - rate-limit-aware REST core for chat platform clients
//!
//! Every REST call of a session goes through one [`Dispatcher`]. Calls that
//! share a rate-limit bucket run one at a time in submission order, buckets
//! never wait on each other, and a session-wide ceiling caps the aggregate
//! request rate. Throttling and server errors are retried internally; callers
//! only ever see a terminal outcome.

pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod permission;
pub mod ratelimit;
pub mod requests;
pub mod route;
pub mod telemetry;

pub use client::{PendingRequest, RestAction, RestClient, RestClientBuilder};
pub use crate::config::{DispatcherConfig, LoggingConfig, RestConfig};
pub use entity::{Embed, EntityBuilder, JsonEntityBuilder, Snowflake, User, Webhook};
pub use error::{ApiError, ErrorCode, RestError, Result};
pub use permission::{AllowAll, Permission, PermissionOracle, Scope, StaticPermissions};
pub use requests::{
    Dispatcher, Headers, RequestTask, Response, TaskId, Transport, TransportError,
    TransportRequest,
};
pub use route::{CompiledRoute, Method, Route};
