pub mod local;
pub mod socket;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{call::EventSink, error::RelayError, signaling::RelayEvent};

/// Named-event bus shared with the other member of a room.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    async fn emit(&self, event: RelayEvent) -> Result<(), RelayError>;
    async fn close(&self);
}

/// Opens one relay channel per call attempt. Inbound events are delivered
/// to `events`; when the underlying connection ends, the channel reports it
/// with [`EventSink::relay_closed`].
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self, events: EventSink) -> Result<Arc<dyn RelayChannel>, RelayError>;
}
