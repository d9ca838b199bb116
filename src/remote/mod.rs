pub mod http;
pub mod tcp;

use crate::error::SyncError;
use crate::models::RemoteStatus;
use crate::models::event::InboundEvent;
use async_trait::async_trait;
use serde_json::Value;

/// On-demand pulls against the remote service.
#[async_trait]
pub trait PollSource: Send + Sync {
    async fn fetch_status(&self) -> Result<RemoteStatus, SyncError>;

    // Every poll the remote service knows about, as a `{ id: record }` mapping
    async fn fetch_polls(&self) -> Result<Value, SyncError>;
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PushStream>, SyncError>;
}

#[async_trait]
pub trait PushStream: Send {
    /// Next event from the channel. `Ok(None)` means the remote side closed it.
    /// `SyncError::MalformedPayload` covers one bad frame; the channel is still usable.
    async fn next_event(&mut self) -> Result<Option<InboundEvent>, SyncError>;
}
