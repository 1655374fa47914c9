use std::error::Error;

use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;

use crate::dto::sync::SyncEnvelope;

/// Result alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Error raised by message bus transports.
#[derive(Debug, Error)]
pub enum BusError {
    /// Transport failure.
    #[error("bus unavailable: {message}")]
    Unavailable {
        /// What failed.
        message: String,
        /// Backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The subscriber fell behind and envelopes were skipped.
    #[error("subscriber lagged behind by {0} envelopes")]
    Lagged(u64),
    /// Envelope could not be decoded.
    #[error("malformed envelope")]
    Codec(#[from] serde_json::Error),
}

impl BusError {
    /// Construct an unavailable error from any transport failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        BusError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Shared pub/sub channel between the authoritative and observer processes.
///
/// Delivery is at-least-once and unordered across channels; consumers must
/// apply envelopes idempotently.
pub trait EventBus: Send + Sync {
    /// Publish `envelope` to every subscribed process, this one included.
    fn publish(&self, envelope: SyncEnvelope) -> BoxFuture<'static, BusResult<()>>;
    /// Stream of envelopes published after the call.
    fn subscribe(&self) -> BoxStream<'static, BusResult<SyncEnvelope>>;
}
