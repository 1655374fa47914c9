use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::Mutex;

use crate::{
    error::SessionError,
    state::room::{Room, RoomId, UserId},
};

/// Arena of live rooms, each behind its own lock.
///
/// Operations on one room are serialized by that room's mutex; different rooms
/// never contend. The map shard lock is only held long enough to clone the
/// room handle, never across an await.
pub struct GameplayStore {
    rooms: DashMap<RoomId, Arc<Mutex<Room>>>,
    buffer_capacity: usize,
}

impl GameplayStore {
    /// Empty store whose rooms buffer `buffer_capacity` frames per player.
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            buffer_capacity,
        }
    }

    /// Register a new room hosted by `host_id`.
    pub fn create_room(&self, room_id: RoomId, host_id: UserId) -> Result<(), SessionError> {
        match self.rooms.entry(room_id) {
            Entry::Occupied(_) => Err(SessionError::InvalidState(format!(
                "room `{room_id}` already exists"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(Room::new(
                    room_id,
                    host_id,
                    self.buffer_capacity,
                ))));
                Ok(())
            }
        }
    }

    /// Make sure a room exists, creating it when missing. Returns `true` when created.
    pub fn ensure_room(&self, room_id: RoomId, host_id: UserId) -> bool {
        match self.rooms.entry(room_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(Room::new(
                    room_id,
                    host_id,
                    self.buffer_capacity,
                ))));
                true
            }
        }
    }

    fn handle(&self, room_id: RoomId) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(&room_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Run `f` with exclusive access to the room.
    pub async fn with_room<T, F>(&self, room_id: RoomId, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(&mut Room) -> T,
    {
        let room = self
            .handle(room_id)
            .ok_or(SessionError::RoomNotFound(room_id))?;
        let mut guard = room.lock().await;
        Ok(f(&mut guard))
    }

    /// Run `f` against the room, if it exists.
    pub async fn read_room<T, F>(&self, room_id: RoomId, f: F) -> Option<T>
    where
        F: FnOnce(&Room) -> T,
    {
        let room = self.handle(room_id)?;
        let guard = room.lock().await;
        Some(f(&guard))
    }

    /// Release the room entry.
    pub fn remove_room(&self, room_id: RoomId) -> bool {
        self.rooms.remove(&room_id).is_some()
    }

    /// Whether `room_id` is live.
    pub fn contains(&self, room_id: RoomId) -> bool {
        self.rooms.contains_key(&room_id)
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room is live.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
