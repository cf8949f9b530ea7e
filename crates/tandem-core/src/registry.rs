//! Room registry.
//!
//! The registry indexes live connections by document and fans events out to
//! room members. It is a passive structure: its operations run on the tasks
//! of the connections that call them.
//!
//! Membership is guarded by the map's per-entry lock. Each operation mutates
//! the room and copies the handles it needs while holding the entry, then
//! releases it before enqueueing anything.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tandem_protocol::{codec, Event, Position};
use tracing::{debug, trace, warn};

use crate::connection::ConnectionHandle;
use crate::room::{DocumentId, Room};

/// Registry of document rooms.
pub struct RoomRegistry {
    rooms: DashMap<DocumentId, Room>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Admit a connection into its document's room.
    ///
    /// Announces a `join` to the other members and sends the newcomer a
    /// `presence` snapshot that includes itself. Returns `false` if the
    /// connection was already registered, in which case no `join` is sent.
    pub fn register(&self, handle: ConnectionHandle) -> bool {
        let document_id = handle.document_id().clone();
        let identity = handle.identity().clone();

        let (is_new, others, members) = {
            let mut room = self
                .rooms
                .entry(document_id.clone())
                .or_insert_with(|| {
                    debug!(document = %document_id, "Creating room");
                    Room::new(document_id.clone())
                });
            let is_new = room.join(handle.clone());
            (is_new, room.handles_except(handle.id()), room.presence_snapshot())
        };

        if is_new {
            self.deliver(&others, &Event::join(identity.user_id, identity.label));
        } else {
            debug!(connection = %handle.id(), document = %document_id, "Connection already registered");
        }
        self.deliver(std::slice::from_ref(&handle), &Event::presence(members));

        is_new
    }

    /// Remove a connection from its room.
    ///
    /// Deletes the room when it becomes empty, then announces a `leave` to
    /// the remaining members. Returns `false` if the connection was not
    /// registered.
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let document_id = handle.document_id();

        let remaining = {
            let Some(mut room) = self.rooms.get_mut(document_id) else {
                return false;
            };
            if room.leave(handle.id()).is_none() {
                return false;
            }
            room.handles_except(handle.id())
        };

        if remaining.is_empty()
            && self
                .rooms
                .remove_if(document_id, |_, room| room.is_empty())
                .is_some()
        {
            debug!(document = %document_id, "Deleted empty room");
        }

        self.deliver(&remaining, &Event::leave(handle.identity().user_id.clone()));
        true
    }

    /// Fan a cursor update out to every other member of the sender's room.
    ///
    /// The position is also kept as the sender's last known position.
    pub fn route_cursor(&self, sender: &ConnectionHandle, position: Position) {
        let others = {
            let Some(mut room) = self.rooms.get_mut(sender.document_id()) else {
                warn!(connection = %sender.id(), "Cursor from connection without a room");
                return;
            };
            if !room.record_position(sender.id(), position.clone()) {
                warn!(connection = %sender.id(), "Cursor from unregistered connection");
                return;
            }
            room.handles_except(sender.id())
        };

        let event = Event::cursor(sender.identity().user_id.clone(), position);
        let count = self.deliver(&others, &event);
        trace!(connection = %sender.id(), recipients = count, "Routed cursor");
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, document_id: &str) -> bool {
        self.rooms.contains_key(document_id)
    }

    /// Get the member count for a room.
    #[must_use]
    pub fn member_count(&self, document_id: &str) -> usize {
        self.rooms.get(document_id).map(|r| r.len()).unwrap_or(0)
    }

    /// Get all document IDs with a live room.
    #[must_use]
    pub fn room_ids(&self) -> Vec<DocumentId> {
        self.rooms.iter().map(|r| r.key().clone()).collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            connection_count: self.rooms.iter().map(|r| r.len()).sum(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Encode once and enqueue to every target. Returns the number accepted.
    fn deliver(&self, targets: &[ConnectionHandle], event: &Event) -> usize {
        if targets.is_empty() {
            return 0;
        }

        let data: Bytes = match codec::encode(event) {
            Ok(data) => data,
            Err(e) => {
                warn!(kind = %event.kind(), error = %e, "Failed to encode event");
                return 0;
            }
        };

        let accepted = targets
            .iter()
            .filter(|target| target.enqueue(data.clone()))
            .count();
        let dropped = targets.len() - accepted;

        self.delivered.fetch_add(accepted as u64, Ordering::Relaxed);
        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            debug!(kind = %event.kind(), dropped, "Dropped events for full queues");
        }
        accepted
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of registered connections across all rooms.
    pub connection_count: usize,
    /// Events accepted into outbound queues.
    pub delivered: u64,
    /// Events dropped on full or closed queues.
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use std::sync::Arc;
    use tandem_protocol::Member;
    use tokio::sync::mpsc;

    struct Client {
        handle: ConnectionHandle,
        // Keeps the queue open; handles only hold a weak sender.
        _sender: mpsc::Sender<Bytes>,
        receiver: mpsc::Receiver<Bytes>,
    }

    impl Client {
        fn new(id: &str, user: &str, document_id: &str) -> Self {
            Self::with_capacity(id, user, document_id, 16)
        }

        fn with_capacity(id: &str, user: &str, document_id: &str, capacity: usize) -> Self {
            let (sender, receiver) = mpsc::channel(capacity);
            let identity = Identity::new(user, format!("{} label", user));
            let handle = ConnectionHandle::new(id.into(), identity, document_id, &sender);
            Self {
                handle,
                _sender: sender,
                receiver,
            }
        }

        fn events(&mut self) -> Vec<Event> {
            let mut events = Vec::new();
            while let Ok(data) = self.receiver.try_recv() {
                events.push(codec::decode(&data).unwrap());
            }
            events
        }
    }

    fn position(json: &str) -> Position {
        Position::from_json(json).unwrap()
    }

    #[test]
    fn test_register_sends_presence_to_newcomer() {
        let registry = RoomRegistry::new();
        let mut alice = Client::new("c1", "alice", "doc-1");

        assert!(registry.register(alice.handle.clone()));
        assert!(registry.room_exists("doc-1"));
        assert_eq!(
            alice.events(),
            vec![Event::presence(vec![Member::new("alice", "alice label")])]
        );
    }

    #[test]
    fn test_register_announces_join_to_others() {
        let registry = RoomRegistry::new();
        let mut alice = Client::new("c1", "alice", "doc-1");
        let mut bob = Client::new("c2", "bob", "doc-1");

        registry.register(alice.handle.clone());
        alice.events();
        registry.register(bob.handle.clone());

        assert_eq!(alice.events(), vec![Event::join("bob", "bob label")]);
        assert_eq!(
            bob.events(),
            vec![Event::presence(vec![
                Member::new("alice", "alice label"),
                Member::new("bob", "bob label"),
            ])]
        );
        assert_eq!(registry.member_count("doc-1"), 2);
    }

    #[test]
    fn test_duplicate_register_does_not_rejoin() {
        let registry = RoomRegistry::new();
        let mut alice = Client::new("c1", "alice", "doc-1");
        let mut bob = Client::new("c2", "bob", "doc-1");

        registry.register(alice.handle.clone());
        registry.register(bob.handle.clone());
        alice.events();
        bob.events();

        assert!(!registry.register(bob.handle.clone()));
        assert!(alice.events().is_empty());
        assert_eq!(registry.member_count("doc-1"), 2);
        assert!(matches!(bob.events().as_slice(), [Event::Presence { users }] if users.len() == 2));
    }

    #[test]
    fn test_unregister_broadcasts_leave_and_deletes_empty_room() {
        let registry = RoomRegistry::new();
        let mut alice = Client::new("c1", "alice", "doc-1");
        let mut bob = Client::new("c2", "bob", "doc-1");
        let mut carol = Client::new("c3", "carol", "doc-1");

        registry.register(alice.handle.clone());
        registry.register(bob.handle.clone());
        registry.register(carol.handle.clone());
        alice.events();
        bob.events();
        carol.events();

        assert!(registry.unregister(&bob.handle));
        assert_eq!(alice.events(), vec![Event::leave("bob")]);
        assert_eq!(carol.events(), vec![Event::leave("bob")]);
        assert!(bob.events().is_empty());

        assert!(registry.unregister(&alice.handle));
        assert!(registry.unregister(&carol.handle));
        assert!(!registry.room_exists("doc-1"));
        assert!(registry.room_ids().is_empty());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = RoomRegistry::new();
        let mut alice = Client::new("c1", "alice", "doc-1");
        let mut bob = Client::new("c2", "bob", "doc-1");

        registry.register(alice.handle.clone());
        registry.register(bob.handle.clone());
        alice.events();

        assert!(registry.unregister(&bob.handle));
        assert!(!registry.unregister(&bob.handle));
        assert_eq!(alice.events(), vec![Event::leave("bob")]);

        let stranger = Client::new("c9", "eve", "doc-unknown");
        assert!(!registry.unregister(&stranger.handle));
    }

    #[test]
    fn test_route_cursor_excludes_sender() {
        let registry = RoomRegistry::new();
        let mut alice = Client::new("c1", "alice", "doc-1");
        let mut bob = Client::new("c2", "bob", "doc-1");
        let mut carol = Client::new("c3", "carol", "doc-1");

        registry.register(alice.handle.clone());
        registry.register(bob.handle.clone());
        registry.register(carol.handle.clone());
        alice.events();
        bob.events();
        carol.events();

        registry.route_cursor(&bob.handle, position(r#"{"x":10,"y":20}"#));

        let expected = Event::cursor("bob", position(r#"{"x":10,"y":20}"#));
        assert_eq!(alice.events(), vec![expected.clone()]);
        assert_eq!(carol.events(), vec![expected]);
        assert!(bob.events().is_empty());
    }

    #[test]
    fn test_route_cursor_updates_presence() {
        let registry = RoomRegistry::new();
        let alice = Client::new("c1", "alice", "doc-1");
        let mut bob = Client::new("c2", "bob", "doc-1");

        registry.register(alice.handle.clone());
        registry.route_cursor(&alice.handle, position("[3,4]"));
        registry.register(bob.handle.clone());

        let expected = vec![
            Member::new("alice", "alice label").with_position(position("[3,4]")),
            Member::new("bob", "bob label"),
        ];
        assert_eq!(bob.events(), vec![Event::presence(expected)]);
    }

    #[test]
    fn test_rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let mut alice = Client::new("c1", "alice", "doc-1");
        let mut bob = Client::new("c2", "bob", "doc-2");

        registry.register(alice.handle.clone());
        registry.register(bob.handle.clone());
        alice.events();
        bob.events();

        registry.route_cursor(&alice.handle, position("1"));
        registry.unregister(&alice.handle);

        assert!(bob.events().is_empty());
        assert_eq!(registry.member_count("doc-2"), 1);
        assert!(!registry.room_exists("doc-1"));
    }

    #[test]
    fn test_route_cursor_from_unregistered_is_ignored() {
        let registry = RoomRegistry::new();
        let mut alice = Client::new("c1", "alice", "doc-1");
        let stranger = Client::new("c9", "eve", "doc-1");

        registry.register(alice.handle.clone());
        alice.events();

        registry.route_cursor(&stranger.handle, position("1"));
        assert!(alice.events().is_empty());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let registry = RoomRegistry::new();
        let mut slow = Client::with_capacity("c1", "slow", "doc-1", 1);
        let mut fast = Client::new("c2", "fast", "doc-1");
        let sender = Client::new("c3", "sender", "doc-1");

        registry.register(slow.handle.clone());
        // Presence fills the slow queue; everything after it is dropped.
        registry.register(fast.handle.clone());
        registry.register(sender.handle.clone());
        fast.events();

        for i in 0..5 {
            registry.route_cursor(&sender.handle, position(&i.to_string()));
        }

        assert_eq!(fast.events().len(), 5);
        assert!(matches!(slow.events().as_slice(), [Event::Presence { .. }]));

        let stats = registry.stats();
        assert_eq!(stats.room_count, 1);
        assert_eq!(stats.connection_count, 3);
        assert_eq!(stats.dropped, 7);
    }

    #[test]
    fn test_per_member_order_follows_issue_order() {
        let registry = RoomRegistry::new();
        let mut alice = Client::new("c1", "alice", "doc-1");
        let bob = Client::new("c2", "bob", "doc-1");

        registry.register(alice.handle.clone());
        registry.register(bob.handle.clone());
        alice.events();

        for i in 0..10 {
            registry.route_cursor(&bob.handle, position(&i.to_string()));
        }

        let positions: Vec<String> = alice
            .events()
            .into_iter()
            .map(|event| match event {
                Event::Cursor { position, .. } => position.as_str().to_string(),
                other => panic!("Expected Cursor event, got {:?}", other),
            })
            .collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(positions, expected);
    }

    #[test]
    fn test_dropped_connection_is_skipped() {
        let registry = RoomRegistry::new();
        let mut alice = Client::new("c1", "alice", "doc-1");
        let bob = Client::new("c2", "bob", "doc-1");

        registry.register(alice.handle.clone());
        registry.register(bob.handle.clone());
        alice.events();

        // The connection is gone but its index entry is still present.
        let bob_handle = bob.handle.clone();
        drop(bob);
        registry.route_cursor(&alice.handle, position("1"));
        assert_eq!(registry.stats().dropped, 1);

        assert!(registry.unregister(&bob_handle));
        assert_eq!(alice.events(), vec![Event::leave("bob")]);
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let registry = Arc::new(RoomRegistry::new());
        let mut observer = Client::with_capacity("observer", "observer", "doc-1", 1024);
        registry.register(observer.handle.clone());
        observer.events();

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..20 {
                        let client = Client::new(&format!("t{}-{}", t, i), "user", "doc-1");
                        registry.register(client.handle.clone());
                        registry.unregister(&client.handle);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(registry.member_count("doc-1"), 1);
        let events = observer.events();
        let joins = events.iter().filter(|e| matches!(e, Event::Join { .. })).count();
        let leaves = events.iter().filter(|e| matches!(e, Event::Leave { .. })).count();
        assert_eq!(joins, 160);
        assert_eq!(leaves, 160);
    }
}
