//! gridlink-worker — worker-side counterpart of the gridlink SDK.
//!
//! While executing one task, worker code uses a [`TaskContext`] to spawn
//! child tasks with dependencies on tasks it already submitted, optionally
//! binding a child's output to the parent's expected result. Incoming work
//! is routed through a string-keyed [`MethodRegistry`] with signatures
//! declared at registration.

pub mod context;
pub mod methods;

pub use context::TaskContext;
pub use methods::MethodRegistry;
