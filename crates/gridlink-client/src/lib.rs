//! gridlink-client — client core of the gridlink compute grid SDK.
//!
//! Application code submits opaque binary payloads as tasks, declares data
//! dependencies between them, and retrieves results by identifier, either
//! synchronously through the waiter or fire-and-forget through registered
//! handlers drained by a background dispatcher. Everything speaks to the
//! control plane through the [`transport::RpcTransport`] seam; the gRPC
//! binding lives outside this crate.

pub mod channel;
pub mod client;
pub mod dispatch;
mod legacy;
pub mod registry;
pub mod retry;
pub mod session;
pub mod submit;
pub mod transport;
pub mod waiter;

pub use channel::ChannelPool;
pub use client::GridClient;
pub use dispatch::DispatcherLoop;
pub use registry::{InvocationHandler, ResultRegistry};
pub use retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, RetryPolicy, retry};
pub use session::SessionContext;
pub use submit::{Submitter, TaskOutputMap, TaskSpec};
pub use waiter::{ResultStatusCollection, ResultWaiter};
