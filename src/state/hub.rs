use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::{dto::observer::ObserverEvent, state::room::RoomId};

/// Broadcast hub fanning observer events out to the subscribers of one room.
pub struct RoomHub {
    sender: broadcast::Sender<ObserverEvent>,
}

impl RoomHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ObserverEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Per-room observer hubs, created lazily on first subscription or event.
pub struct ObserverHubs {
    hubs: DashMap<RoomId, RoomHub>,
    capacity: usize,
}

impl ObserverHubs {
    /// Hubs buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to the events of `room_id`.
    pub fn subscribe(&self, room_id: RoomId) -> broadcast::Receiver<ObserverEvent> {
        self.hubs
            .entry(room_id)
            .or_insert_with(|| RoomHub::new(self.capacity))
            .subscribe()
    }

    /// Push an event to the observers of `room_id`. Rooms nobody watches are skipped.
    pub fn broadcast(&self, room_id: RoomId, event: ObserverEvent) {
        if let Some(hub) = self.hubs.get(&room_id) {
            hub.broadcast(event);
        }
    }

    /// Push a last event, then drop the hub so subscriber streams end.
    pub fn close(&self, room_id: RoomId, event: ObserverEvent) {
        if let Some((_, hub)) = self.hubs.remove(&room_id) {
            hub.broadcast(event);
        }
    }

    /// Drop the hub of `room_id` when nobody listens to it any more.
    pub fn release(&self, room_id: RoomId) -> bool {
        self.hubs
            .remove_if(&room_id, |_, hub| hub.receiver_count() == 0)
            .is_some()
    }

    /// Number of live subscribers of `room_id`.
    pub fn subscriber_count(&self, room_id: RoomId) -> usize {
        self.hubs
            .get(&room_id)
            .map(|hub| hub.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_only_reach_the_addressed_room() {
        let hubs = ObserverHubs::new(4);
        let mut first = hubs.subscribe(1);
        let mut second = hubs.subscribe(2);

        hubs.broadcast(1, ObserverEvent::RoomClosed);

        assert_eq!(first.recv().await.unwrap(), ObserverEvent::RoomClosed);
        assert!(second.try_recv().is_err());
    }

    #[tokio::test]
    async fn closing_a_hub_ends_subscriber_streams() {
        let hubs = ObserverHubs::new(4);
        let mut receiver = hubs.subscribe(1);

        hubs.close(1, ObserverEvent::RoomClosed);

        assert_eq!(receiver.recv().await.unwrap(), ObserverEvent::RoomClosed);
        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(hubs.subscriber_count(1), 0);
    }
}
