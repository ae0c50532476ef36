//! Request tasks and the machinery that schedules them.

mod classify;
mod dispatcher;
mod response;
mod retry;
mod task;
mod transport;

pub use classify::{
    classify, classify_within, Classification, DEFAULT_MAX_COOLDOWN, DEFAULT_RETRY_AFTER,
};
pub use dispatcher::Dispatcher;
pub use response::{Headers, Response};
pub use retry::{Backoff, RetryPolicy};
pub use task::{Completion, Continuation, RequestTask, TaskId};
pub use transport::{Transport, TransportError, TransportRequest};

#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
