//! 📇 The room directory: a two-way phone book between room names and stream ids.
//!
//! Humans say "Trading Floor". Servers say `lRwCZlDbxWLd2BC0sD7W4X___oc6a7GtdA`.
//! This module keeps both sides of that conversation in one place.
//!
//! 🧠 Knowledge graph:
//! - Cache-aside: lookups hit the maps first, the injected [`RoomLookup`] second.
//! - One `std::sync::Mutex` over both maps. Held for the map touch only. Never across
//!   an `.await`, never across a network call.
//! - Two concurrent misses for the same name may both go to the network. Both write
//!   the same answer. Nobody gets hurt.
//! - DMs are keyed by user identity (display name AND user id both point at the stream),
//!   since inbound events may show us either spelling.
//! - Nothing is ever evicted. A bot knows a finite number of rooms. Probably.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error};

use crate::backends::RoomLookup;

/// Anything at least this long with no whitespace is treated as a raw stream id.
pub const MIN_STREAM_ID_LEN: usize = 24;

/// 🕵️ Does this look like an opaque platform id rather than a room name?
pub fn looks_like_stream_id(candidate: &str) -> bool {
    candidate.len() >= MIN_STREAM_ID_LEN && !candidate.chars().any(char::is_whitespace)
}

#[derive(Debug, Default)]
struct Maps {
    name_to_id: HashMap<String, String>,
    id_to_name: HashMap<String, String>,
}

/// 📇 Thread-safe bidirectional room name ↔ stream id cache.
#[derive(Debug)]
pub struct RoomDirectory {
    maps: Mutex<Maps>,
    lookup: Arc<dyn RoomLookup>,
}

impl RoomDirectory {
    pub fn new(lookup: Arc<dyn RoomLookup>) -> Self {
        Self {
            maps: Mutex::new(Maps::default()),
            lookup,
        }
    }

    // -- 🔒 a panic mid-insert can't leave the maps half-written, so poison is just noise
    fn maps(&self) -> MutexGuard<'_, Maps> {
        self.maps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// ⚡ Cache or shape heuristic only. Never blocks on I/O, never calls the lookup.
    pub fn get_id(&self, name: &str) -> Option<String> {
        if let Some(id) = self.maps().name_to_id.get(name) {
            return Some(id.clone());
        }
        if looks_like_stream_id(name) {
            return Some(name.to_string());
        }
        None
    }

    /// 🐢 Like [`get_id`](Self::get_id), but a miss asks the platform.
    ///
    /// Only an exact name match counts. "Foo Bar Extended" is not "Foo Bar",
    /// no matter how hard the search endpoint believes in it.
    pub async fn get_id_async(&self, name: &str) -> Option<String> {
        if let Some(id) = self.get_id(name) {
            return Some(id);
        }

        let rooms = match self.lookup.search_rooms(name).await {
            Ok(rooms) => rooms,
            Err(err) => {
                error!("💀 room search for '{}' failed, treating as not found: {:#}", name, err);
                return None;
            }
        };

        match rooms.into_iter().find(|room| room.name == name && !room.id.is_empty()) {
            Some(room) => {
                self.register(&room.name, &room.id);
                Some(room.id)
            }
            None => {
                debug!("🔍 no room named exactly '{}'", name);
                None
            }
        }
    }

    /// ⚡ Cached name for a stream id, if we've met.
    pub fn get_name(&self, id: &str) -> Option<String> {
        self.maps().id_to_name.get(id).cloned()
    }

    /// 🐢 Cached name, or ask the platform for the room's info.
    pub async fn get_name_async(&self, id: &str) -> Option<String> {
        if let Some(name) = self.get_name(id) {
            return Some(name);
        }

        match self.lookup.room_info(id).await {
            Ok(Some(room)) if !room.name.is_empty() => {
                self.register(&room.name, id);
                Some(room.name)
            }
            Ok(_) => {
                debug!("🔍 no room info for stream '{}'", id);
                None
            }
            Err(err) => {
                error!("💀 room info for stream '{}' failed, treating as not found: {:#}", id, err);
                None
            }
        }
    }

    /// ✍️ Write a known pair in both directions. Idempotent.
    ///
    /// A name that moves to a new id (or an id that gets a new name) drops its old
    /// pairing, so both maps keep telling the same story.
    pub fn register(&self, name: &str, id: &str) {
        let mut maps = self.maps();
        if let Some(old_id) = maps.name_to_id.insert(name.to_string(), id.to_string()) {
            if old_id != id && maps.id_to_name.get(&old_id).is_some_and(|n| n == name) {
                maps.id_to_name.remove(&old_id);
            }
        }
        if let Some(old_name) = maps.id_to_name.insert(id.to_string(), name.to_string()) {
            if old_name != name && maps.name_to_id.get(&old_name).is_some_and(|i| i == id) {
                maps.name_to_id.remove(&old_name);
            }
        }
    }

    /// 🤝 Point a user's display name or user id at their DM stream.
    ///
    /// Forward only: one DM stream answers to several aliases, and a DM stream
    /// has no room name to look up in reverse.
    pub fn register_dm(&self, user: &str, stream_id: &str) {
        self.maps().name_to_id.insert(user.to_string(), stream_id.to_string());
    }

    /// 👥 Member user ids of a room, by name or stream id. Empty when unresolvable or on error.
    pub async fn member_ids(&self, room: &str) -> Vec<String> {
        let Some(id) = self.get_id_async(room).await else {
            return Vec::new();
        };
        match self.lookup.room_member_ids(&id).await {
            Ok(members) => members,
            Err(err) => {
                error!("💀 membership lookup for '{}' failed: {:#}", room, err);
                Vec::new()
            }
        }
    }

    /// How many names we know. Diagnostics only.
    pub fn len(&self) -> usize {
        self.maps().name_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryRooms, RoomSummary};
    use anyhow::Result;

    const LONG_ID: &str = "lRwCZlDbxWLd2BC0sD7W4X___oc6a7GtdA";

    fn directory_with(rooms: &InMemoryRooms) -> RoomDirectory {
        RoomDirectory::new(Arc::new(rooms.clone()))
    }

    #[test]
    fn the_one_where_registration_works_both_ways() {
        let rooms = InMemoryRooms::default();
        let directory = directory_with(&rooms);

        directory.register("Ops", "ops-id");
        assert_eq!(directory.get_id("Ops").as_deref(), Some("ops-id"));
        assert_eq!(directory.get_name("ops-id").as_deref(), Some("Ops"));
    }

    #[test]
    fn the_one_where_registering_twice_changes_nothing() {
        let rooms = InMemoryRooms::default();
        let directory = directory_with(&rooms);

        directory.register("Ops", "ops-id");
        directory.register("Ops", "ops-id");
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get_id("Ops").as_deref(), Some("ops-id"));
        assert_eq!(directory.get_name("ops-id").as_deref(), Some("Ops"));
    }

    #[test]
    fn the_one_where_a_room_moves_and_the_old_pairing_goes_with_it() {
        let rooms = InMemoryRooms::default();
        let directory = directory_with(&rooms);

        directory.register("Ops", "old-id");
        directory.register("Ops", "new-id");
        assert_eq!(directory.get_id("Ops").as_deref(), Some("new-id"));
        assert_eq!(directory.get_name("new-id").as_deref(), Some("Ops"));
        assert_eq!(directory.get_name("old-id"), None);

        // 🏷️ and the other way round: a stream that gets renamed
        directory.register("Ops Renamed", "new-id");
        assert_eq!(directory.get_name("new-id").as_deref(), Some("Ops Renamed"));
        assert_eq!(directory.get_id("Ops"), None);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn the_one_where_long_ids_pass_straight_through() {
        let rooms = InMemoryRooms::default();
        let directory = directory_with(&rooms);

        assert_eq!(directory.get_id(LONG_ID).as_deref(), Some(LONG_ID));
        assert!(directory.is_empty(), "shape matches are not cached");
        // 🧪 24 chars exactly is enough, 23 is not, whitespace never is
        assert!(looks_like_stream_id(&"x".repeat(24)));
        assert!(!looks_like_stream_id(&"x".repeat(23)));
        assert!(directory.get_id("a perfectly long room name here").is_none());
    }

    #[test]
    fn the_one_where_sync_lookup_never_calls_the_network() {
        let rooms = InMemoryRooms::with_rooms(vec![RoomSummary::new("Ops", "ops-id")]);
        let directory = directory_with(&rooms);

        assert_eq!(directory.get_id("Ops"), None);
        assert_eq!(directory.get_name("ops-id"), None);
        assert_eq!(rooms.calls(), 0);
    }

    #[tokio::test]
    async fn the_one_where_async_lookup_fills_the_cache() -> Result<()> {
        let rooms = InMemoryRooms::with_rooms(vec![RoomSummary::new("Ops", "ops-id")]);
        let directory = directory_with(&rooms);

        assert_eq!(directory.get_id_async("Ops").await.as_deref(), Some("ops-id"));
        assert_eq!(directory.get_id_async("Ops").await.as_deref(), Some("ops-id"));
        assert_eq!(rooms.calls(), 1, "second lookup is a cache hit");
        assert_eq!(directory.get_name("ops-id").as_deref(), Some("Ops"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_close_enough_is_not_good_enough() {
        let rooms = InMemoryRooms::with_rooms(vec![RoomSummary::new("Foo Bar Extended", "x")]);
        let directory = directory_with(&rooms);

        assert_eq!(directory.get_id_async("Foo Bar").await, None);
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_name_lookup_asks_room_info() {
        let rooms = InMemoryRooms::with_rooms(vec![RoomSummary::new("a sample room", "anything")]);
        let directory = directory_with(&rooms);

        assert_eq!(directory.get_name_async("anything").await.as_deref(), Some("a sample room"));
        assert_eq!(directory.get_name_async("anything").await.as_deref(), Some("a sample room"));
        assert_eq!(rooms.calls(), 1);
        assert_eq!(directory.get_id("a sample room").as_deref(), Some("anything"));
        assert_eq!(directory.get_name_async("nope").await, None);
    }

    #[tokio::test]
    async fn the_one_where_a_broken_lookup_is_just_a_miss() {
        let rooms = InMemoryRooms::failing();
        let directory = directory_with(&rooms);

        assert_eq!(directory.get_id_async("Ops").await, None);
        assert_eq!(directory.get_name_async("ops-id").await, None);
        assert!(directory.member_ids("Ops").await.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_dm_aliases_share_a_stream() {
        let rooms = InMemoryRooms::default();
        let directory = directory_with(&rooms);

        directory.register_dm("Alice", "s1");
        directory.register_dm("42", "s1");
        assert_eq!(directory.get_id("Alice").as_deref(), Some("s1"));
        assert_eq!(directory.get_id("42").as_deref(), Some("s1"));
        assert_eq!(directory.get_id_async("42").await.as_deref(), Some("s1"));
        assert_eq!(rooms.calls(), 0);
    }

    #[tokio::test]
    async fn the_one_where_members_are_listed_by_room_name() {
        let rooms = InMemoryRooms::with_rooms(vec![RoomSummary::new("Ops", "ops-id")])
            .with_members("ops-id", vec!["1".into(), "2".into()]);
        let directory = directory_with(&rooms);

        assert_eq!(directory.member_ids("Ops").await, vec!["1", "2"]);
        assert!(directory.member_ids("Nowhere").await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_two_threads_race_for_the_same_room() -> Result<()> {
        let rooms = InMemoryRooms::with_rooms(vec![RoomSummary::new("Ops", "ops-id")]);
        let directory = Arc::new(directory_with(&rooms));

        let left = tokio::spawn({
            let directory = directory.clone();
            async move { directory.get_id_async("Ops").await }
        });
        let right = tokio::spawn({
            let directory = directory.clone();
            async move { directory.get_id_async("Ops").await }
        });

        assert_eq!(left.await?.as_deref(), Some("ops-id"));
        assert_eq!(right.await?.as_deref(), Some("ops-id"));
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get_name("ops-id").as_deref(), Some("Ops"));
        Ok(())
    }
}
