//! Execution engine.
//!
//! Every public call is turned into a command that knows how to build its
//! HTTP request and read the response. The [`executor`] runs a command
//! through the retry loop:
//!
//! 1. refuse writes that can only be routed to a secondary endpoint
//! 2. build the request with a body borrowed from the [`BufferPool`]
//! 3. send it through the [`TableTransport`] under the remaining time budget
//! 4. on a transient failure, ask the [`RetryPolicy`] for a delay and a
//!    target location, then go back to step 2
//!
//! Each attempt is recorded in the caller's [`OperationContext`].

pub(crate) mod commands;
pub mod context;
pub(crate) mod executor;
pub mod pool;
pub(crate) mod request;
pub mod retry;
pub mod transport;

pub use context::{OperationContext, RequestResult};
pub use pool::{BufferPool, PooledBuffer};
pub use retry::{ExponentialRetry, LinearRetry, NoRetry, RetryContext, RetryInfo, RetryPolicy};
pub use transport::{
    HttpTransport, TableTransport, TransportError, TransportRequest, TransportResponse,
};
