use axum::response::sse::Event;
use serde::Serialize;

/// Named JSON payload ready to be written to an observer stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerEvent {
    /// SSE event name.
    pub name: &'static str,
    /// JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Serialise `payload` under the SSE event `name`.
    pub fn json<T: Serialize>(name: &'static str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            name,
            data: serde_json::to_string(payload)?,
        })
    }

    /// Build the axum SSE event.
    pub fn into_event(self) -> Event {
        Event::default().event(self.name).data(self.data)
    }
}
