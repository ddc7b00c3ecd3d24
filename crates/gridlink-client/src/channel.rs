//! Channel pool — reusable RPC connections with lease/return discipline.
//!
//! Stream-based RPC clients are expensive to construct, so returned
//! channels are re-pooled. A channel whose call failed may hold half-closed
//! streams and is tagged faulted; faulted channels are destroyed on return,
//! never reused. The semaphore caps live channels at
//! `max_parallel_channels`, which also bounds every fan-out in the SDK.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use gridlink_core::error::GridError;

use crate::transport::{Connector, RpcTransport};

/// One pooled connection.
pub struct Channel {
    id: u64,
    transport: Arc<dyn RpcTransport>,
}

impl Channel {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn transport(&self) -> Arc<dyn RpcTransport> {
        self.transport.clone()
    }
}

pub struct ChannelPool {
    connector: Arc<dyn Connector>,
    free: Mutex<Vec<Channel>>,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl ChannelPool {
    pub fn new(connector: Arc<dyn Connector>, max_parallel_channels: usize) -> Arc<Self> {
        Arc::new(Self {
            connector,
            free: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_parallel_channels.max(1))),
            next_id: AtomicU64::new(0),
        })
    }

    /// Lease a channel, creating one if the free list is empty. Blocks
    /// while the concurrency cap is reached; cancellation interrupts the
    /// wait.
    pub async fn lease(self: &Arc<Self>, cancel: &CancellationToken) -> Result<Lease, GridError> {
        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => {
                // The semaphore is never closed while the pool is alive.
                permit.map_err(|_| GridError::Cancelled)?
            }
            _ = cancel.cancelled() => return Err(GridError::Cancelled),
        };

        let pooled = self.free.lock().map(|mut free| free.pop()).ok().flatten();
        let channel = match pooled {
            Some(channel) => channel,
            None => self.connect().await?,
        };

        Ok(Lease {
            pool: self.clone(),
            channel: Some(channel),
            _permit: permit,
            faulted: false,
        })
    }

    async fn connect(&self) -> Result<Channel, GridError> {
        let transport = self.connector.connect().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(channel = id, "channel created");
        Ok(Channel { id, transport })
    }

    /// Lease a channel, run `op` on its transport, and return the channel.
    /// If `op` fails the lease is tagged faulted first, so the channel is
    /// destroyed instead of re-pooled.
    pub async fn with_channel<T, F, Fut>(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, GridError>
    where
        F: FnOnce(Arc<dyn RpcTransport>) -> Fut,
        Fut: Future<Output = Result<T, GridError>>,
    {
        let mut lease = self.lease(cancel).await?;
        match op(lease.transport()).await {
            Ok(value) => Ok(value),
            Err(error) => {
                lease.mark_faulted();
                Err(error)
            }
        }
    }

    /// Channels currently sitting in the free list.
    pub fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

/// Exclusive ownership of a channel until drop. Dropping a healthy lease
/// re-pools the channel; dropping a faulted one destroys it.
pub struct Lease {
    pool: Arc<ChannelPool>,
    channel: Option<Channel>,
    _permit: OwnedSemaphorePermit,
    faulted: bool,
}

impl Lease {
    pub fn transport(&self) -> Arc<dyn RpcTransport> {
        self.channel
            .as_ref()
            .map(Channel::transport)
            .expect("lease already released")
    }

    pub fn channel_id(&self) -> u64 {
        self.channel.as_ref().map(Channel::id).unwrap_or(u64::MAX)
    }

    /// Tag the channel as faulted. It will be destroyed on drop.
    pub fn mark_faulted(&mut self) {
        self.faulted = true;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            if self.faulted {
                tracing::debug!(channel = channel.id, "faulted channel destroyed");
            } else if let Ok(mut free) = self.pool.free.lock() {
                free.push(channel);
            }
        }
    }
}
