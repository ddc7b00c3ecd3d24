//! Session lifecycle — create, open, cancel.
//!
//! A session groups tasks under shared default options and partitions.
//! Every other operation in the SDK carries the session id; the open path
//! refuses any session that is not running.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use gridlink_core::TaskOptions;
use gridlink_core::error::GridError;
use gridlink_core::rpc::{CreateSessionRequest, SessionId, SessionStatus};

use crate::channel::ChannelPool;
use crate::retry::{RetryPolicy, retry};

/// A session the client has created or opened, with its defaults.
#[derive(Clone)]
pub struct SessionContext {
    pool: Arc<ChannelPool>,
    session_id: SessionId,
    default_options: TaskOptions,
    partitions: Vec<String>,
}

impl SessionContext {
    /// Create a new session. Partitions default to the one named by
    /// `options.partition_id`, or none (server default) when unset.
    pub async fn create(
        pool: Arc<ChannelPool>,
        cancel: &CancellationToken,
        options: TaskOptions,
        partitions: Option<Vec<String>>,
        policy: &RetryPolicy,
    ) -> Result<Self, GridError> {
        let partitions = partitions.unwrap_or_else(|| options.default_partitions());
        let session_id = retry(policy, cancel, |_| {
            let request = CreateSessionRequest {
                default_options: options.clone(),
                partitions: partitions.clone(),
            };
            let pool = pool.clone();
            async move {
                pool.with_channel(cancel, |transport| async move {
                    transport.create_session(request).await.map_err(Into::into)
                })
                .await
            }
        })
        .await?;

        tracing::info!(session_id, "session created");
        Ok(Self {
            pool,
            session_id,
            default_options: options,
            partitions,
        })
    }

    /// Open an existing session. Any status other than running raises
    /// `SessionNotOpenable`.
    pub async fn open(
        pool: Arc<ChannelPool>,
        cancel: &CancellationToken,
        session_id: SessionId,
        policy: &RetryPolicy,
    ) -> Result<Self, GridError> {
        let info = retry(policy, cancel, |_| {
            let pool = pool.clone();
            let session_id = session_id.clone();
            async move {
                pool.with_channel(cancel, |transport| async move {
                    transport.get_session(&session_id).await.map_err(Into::into)
                })
                .await
            }
        })
        .await?;

        if info.status != SessionStatus::Running {
            return Err(GridError::SessionNotOpenable {
                session_id: info.session_id,
                status: info.status,
            });
        }

        tracing::info!(session_id = info.session_id, "session opened");
        Ok(Self {
            pool,
            session_id: info.session_id,
            default_options: info.default_options,
            partitions: info.partitions,
        })
    }

    /// Cancel the session server-side. Subsequent opens fail the status
    /// gate.
    pub async fn cancel(&self, cancel: &CancellationToken) -> Result<(), GridError> {
        self.pool
            .with_channel(cancel, |transport| {
                let session_id = self.session_id.clone();
                async move {
                    transport
                        .cancel_session(&session_id)
                        .await
                        .map_err(Into::into)
                }
            })
            .await?;
        tracing::info!(session_id = self.session_id, "session cancelled");
        Ok(())
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn default_options(&self) -> &TaskOptions {
        &self.default_options
    }

    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }
}
