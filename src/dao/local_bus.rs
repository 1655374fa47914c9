use futures::{StreamExt, future::BoxFuture, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::{
    dao::bus::{BusError, BusResult, EventBus},
    dto::sync::SyncEnvelope,
};

const DEFAULT_LOCAL_BUS_CAPACITY: usize = 256;

/// In-process bus carrying JSON-encoded envelopes over a tokio broadcast channel.
///
/// Cloning yields another handle onto the same channel, which is how two
/// processes are wired together in tests.
#[derive(Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<String>,
}

impl LocalBus {
    /// Bus buffering up to `capacity` envelopes per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_BUS_CAPACITY)
    }
}

impl EventBus for LocalBus {
    fn publish(&self, envelope: SyncEnvelope) -> BoxFuture<'static, BusResult<()>> {
        let result = serde_json::to_string(&envelope)
            .map_err(BusError::from)
            .map(|payload| {
                // No subscriber is not a failure: nobody is listening yet.
                let _ = self.sender.send(payload);
            });
        Box::pin(async move { result })
    }

    fn subscribe(&self) -> BoxStream<'static, BusResult<SyncEnvelope>> {
        BroadcastStream::new(self.sender.subscribe())
            .map(|received| match received {
                Ok(payload) => serde_json::from_str(&payload).map_err(BusError::from),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => Err(BusError::Lagged(skipped)),
            })
            .boxed()
    }
}
