//! Method registry — string-keyed dispatch for worker entry points.
//!
//! Worker methods are registered by name with their argument count
//! declared up front. Dispatch looks the name up, checks the signature,
//! and runs the handler. A miss is a typed error, not a panic.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use gridlink_core::error::{GridError, MethodDispatchReason};

pub type MethodHandler = Arc<dyn Fn(Vec<Bytes>) -> Result<Bytes, GridError> + Send + Sync>;

struct MethodEntry {
    arity: usize,
    handler: MethodHandler,
}

/// Maps method names to handlers. Registration happens at worker startup;
/// dispatch is read-only afterwards.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodEntry>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method. Re-registering a name replaces the handler.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        handler: impl Fn(Vec<Bytes>) -> Result<Bytes, GridError> + Send + Sync + 'static,
    ) {
        self.methods.insert(
            name.into(),
            MethodEntry {
                arity,
                handler: Arc::new(handler),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Run the named method. Unknown names and argument-count mismatches
    /// surface as `MethodDispatch` errors.
    pub fn dispatch(&self, name: &str, args: Vec<Bytes>) -> Result<Bytes, GridError> {
        let entry = self
            .methods
            .get(name)
            .ok_or_else(|| GridError::MethodDispatch {
                method: name.to_string(),
                reason: MethodDispatchReason::UnknownMethod,
            })?;
        if args.len() != entry.arity {
            return Err(GridError::MethodDispatch {
                method: name.to_string(),
                reason: MethodDispatchReason::ArityMismatch {
                    declared: entry.arity,
                    supplied: args.len(),
                },
            });
        }
        (entry.handler)(args)
    }
}
