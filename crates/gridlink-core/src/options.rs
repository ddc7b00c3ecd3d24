//! Task options — the configuration record carried on session creation and
//! optionally overridden per submission.
//!
//! Options are cloned on assignment so a caller mutating its copy after
//! submission cannot leak into in-flight work.

use std::time::Duration;

/// Wire-protocol and submission-mode variant selector, declared per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineType {
    Symphony,
    #[default]
    Unified,
    DataSynapse,
}

impl EngineType {
    /// Whether this engine submits through the legacy bidirectional
    /// streaming upload instead of the small-id pathway.
    pub fn uses_streaming_upload(self) -> bool {
        !matches!(self, EngineType::Unified)
    }
}

/// Per-session defaults and per-task overrides for task execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOptions {
    /// Wall-clock budget the server enforces on one execution attempt.
    pub max_duration: Duration,
    /// Task-level retry budget, honored by the server scheduler.
    pub max_retries: u32,
    pub priority: i32,
    pub engine_type: EngineType,
    pub application_name: String,
    pub application_version: String,
    pub application_namespace: String,
    pub application_service: String,
    /// Scheduling pool. `None` = the server-default partition.
    pub partition_id: Option<String>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(300),
            max_retries: 3,
            priority: 1,
            engine_type: EngineType::default(),
            application_name: String::new(),
            application_version: String::new(),
            application_namespace: String::new(),
            application_service: String::new(),
            partition_id: None,
        }
    }
}

impl TaskOptions {
    /// Partitions to declare at session creation for these defaults:
    /// the configured partition if one is set, otherwise none (the server
    /// default partition).
    pub fn default_partitions(&self) -> Vec<String> {
        self.partition_id.iter().cloned().collect()
    }
}
