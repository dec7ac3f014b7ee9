//! Room-based broadcast hub for long-lived sessions.
//!
//! Each room is a `tokio::sync::broadcast` channel created on first use.
//! Sessions subscribe to the rooms they care about; publishing to a room
//! with no subscribers is a no-op. Delivery is at-most-once per session:
//! a lagging receiver loses the oldest messages and a disconnected session
//! simply drops its receivers.
//!
//! Rooms used by the engine:
//! - `watch:<tourist>` — authorities observing one tourist
//! - `authorities` — the global alert stream
//! - `user:<tourist>` — private per-tourist zone status

use crate::types::TouristId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Global alert stream room.
pub const AUTHORITIES_ROOM: &str = "authorities";

/// Room for authorities watching a specific tourist.
#[must_use]
pub fn watch_room(tourist: &TouristId) -> String {
    format!("watch:{tourist}")
}

/// Private per-tourist room.
#[must_use]
pub fn user_room(tourist: &TouristId) -> String {
    format!("user:{tourist}")
}

/// Capacity of each room's broadcast channel.
const ROOM_CAPACITY: usize = 1000;

type RoomsMap<A> = Arc<RwLock<HashMap<String, broadcast::Sender<A>>>>;

/// Multi-room broadcaster.
///
/// Cheap to clone; all clones share the same room set.
pub struct RoomBroadcaster<A>
where
    A: Clone + Send + 'static,
{
    rooms: RoomsMap<A>,
}

impl<A> RoomBroadcaster<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create an empty broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish an event to one room.
    ///
    /// Returns the number of sessions that received it.
    pub async fn publish(&self, room: impl Into<String>, event: A) -> usize {
        let room = room.into();
        let rooms = self.rooms.read().await;
        match rooms.get(&room) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to a room, creating it on first use.
    pub async fn subscribe(&self, room: impl Into<String>) -> broadcast::Receiver<A> {
        let room = room.into();
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Drop rooms whose last subscriber disconnected.
    pub async fn prune(&self) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, sender| sender.receiver_count() > 0);
    }

    /// Number of rooms currently materialized.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl<A> Default for RoomBroadcaster<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for RoomBroadcaster<A>
where
    A: Clone + Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            rooms: Arc::clone(&self.rooms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_room_subscribers() {
        let hub = RoomBroadcaster::<String>::new();
        let mut rx = hub.subscribe("authorities").await;

        let delivered = hub.publish("authorities", "alert".to_string()).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap(), "alert");
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let hub = RoomBroadcaster::<String>::new();
        let mut watch_a = hub.subscribe("watch:a").await;
        let mut watch_b = hub.subscribe("watch:b").await;

        hub.publish("watch:a", "for-a".to_string()).await;

        assert_eq!(watch_a.recv().await.unwrap(), "for-a");
        assert!(watch_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let hub = RoomBroadcaster::<String>::new();
        assert_eq!(hub.publish("watch:ghost", "x".to_string()).await, 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let hub = RoomBroadcaster::<String>::new();
        let mut rx1 = hub.subscribe("authorities").await;
        let mut rx2 = hub.subscribe("authorities").await;

        hub.publish("authorities", "broadcast".to_string()).await;

        assert_eq!(rx1.recv().await.unwrap(), "broadcast");
        assert_eq!(rx2.recv().await.unwrap(), "broadcast");
    }

    #[tokio::test]
    async fn prune_drops_empty_rooms() {
        let hub = RoomBroadcaster::<String>::new();
        {
            let _rx = hub.subscribe("watch:t1").await;
            assert_eq!(hub.room_count().await, 1);
        }
        hub.prune().await;
        assert_eq!(hub.room_count().await, 0);
    }

    #[test]
    fn room_names() {
        let id = TouristId::new("t1");
        assert_eq!(watch_room(&id), "watch:t1");
        assert_eq!(user_room(&id), "user:t1");
    }
}
