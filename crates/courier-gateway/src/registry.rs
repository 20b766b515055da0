use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_types::events::ChatEvent;
use courier_types::models::{ChatId, UserId};

/// Identifies one live socket. A user may hold several.
pub type SocketId = Uuid;

/// Pre-serialized event frame, shared between all sockets it is sent to.
pub type Outbound = Arc<str>;

/// In-memory routing table of live connections.
///
/// Holds no business data: it is created empty at startup and clients
/// re-register on reconnect. Sends snapshot the target senders under a read
/// lock and enqueue after releasing it, so no lock is held while a socket
/// task is writing.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    sockets: HashMap<SocketId, SocketEntry>,
    /// user_id -> sockets owned by that user
    users: HashMap<UserId, HashSet<SocketId>>,
    /// chat_id -> sockets subscribed to that chat
    groups: HashMap<ChatId, HashSet<SocketId>>,
}

struct SocketEntry {
    user_id: UserId,
    groups: HashSet<ChatId>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl RegistryState {
    fn remove_socket(&mut self, socket_id: SocketId) -> Option<SocketEntry> {
        let entry = self.sockets.remove(&socket_id)?;

        if let Some(owned) = self.users.get_mut(&entry.user_id) {
            owned.remove(&socket_id);
            if owned.is_empty() {
                self.users.remove(&entry.user_id);
            }
        }
        for chat_id in &entry.groups {
            if let Some(members) = self.groups.get_mut(chat_id) {
                members.remove(&socket_id);
                if members.is_empty() {
                    self.groups.remove(chat_id);
                }
            }
        }

        Some(entry)
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new socket for `user_id`, subscribed to `initial_groups`.
    /// Returns the socket id and the receiver the socket task drains.
    pub async fn register(
        &self,
        user_id: UserId,
        initial_groups: impl IntoIterator<Item = ChatId>,
    ) -> (SocketId, mpsc::UnboundedReceiver<Outbound>) {
        let socket_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let groups: HashSet<ChatId> = initial_groups.into_iter().collect();

        let mut state = self.inner.write().await;
        for chat_id in &groups {
            state.groups.entry(*chat_id).or_default().insert(socket_id);
        }
        state.users.entry(user_id).or_default().insert(socket_id);
        let group_count = groups.len();
        state.sockets.insert(socket_id, SocketEntry { user_id, groups, tx });

        debug!(
            "Registered socket {} for user {} in {} groups ({} sockets total)",
            socket_id,
            user_id,
            group_count,
            state.sockets.len()
        );
        (socket_id, rx)
    }

    /// Drop a socket. Safe to call more than once; returns whether anything
    /// was removed.
    pub async fn unregister(&self, socket_id: SocketId) -> bool {
        let removed = self.inner.write().await.remove_socket(socket_id);
        match removed {
            Some(entry) => {
                debug!("Unregistered socket {} of user {}", socket_id, entry.user_id);
                true
            }
            None => false,
        }
    }

    /// Subscribe every live socket of `user_id` to `chat_id`. Returns how
    /// many sockets joined; an offline user is a no-op.
    pub async fn join_group(&self, user_id: UserId, chat_id: ChatId) -> usize {
        let mut guard = self.inner.write().await;
        let state = &mut *guard;
        let Some(owned) = state.users.get(&user_id).cloned() else {
            return 0;
        };

        let mut joined = 0;
        for socket_id in owned {
            if let Some(entry) = state.sockets.get_mut(&socket_id) {
                if entry.groups.insert(chat_id) {
                    joined += 1;
                }
                state.groups.entry(chat_id).or_default().insert(socket_id);
            }
        }
        joined
    }

    /// Send an event to every socket of a user. Returns `true` when at least
    /// one socket accepted it.
    pub async fn send_to_user(&self, user_id: UserId, event: &ChatEvent) -> bool {
        let Some(frame) = encode(event) else {
            return false;
        };

        let targets: Vec<(SocketId, mpsc::UnboundedSender<Outbound>)> = {
            let state = self.inner.read().await;
            state
                .users
                .get(&user_id)
                .map(|owned| {
                    owned
                        .iter()
                        .filter_map(|id| state.sockets.get(id).map(|e| (*id, e.tx.clone())))
                        .collect()
                })
                .unwrap_or_default()
        };

        self.deliver(targets, frame).await > 0
    }

    /// Broadcast an event to every socket subscribed to a chat. Returns the
    /// number of sockets that accepted it.
    pub async fn send_to_group(&self, chat_id: ChatId, event: &ChatEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };

        let targets: Vec<(SocketId, mpsc::UnboundedSender<Outbound>)> = {
            let state = self.inner.read().await;
            state
                .groups
                .get(&chat_id)
                .map(|members| {
                    members
                        .iter()
                        .filter_map(|id| state.sockets.get(id).map(|e| (*id, e.tx.clone())))
                        .collect()
                })
                .unwrap_or_default()
        };

        self.deliver(targets, frame).await
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner
            .read()
            .await
            .users
            .get(&user_id)
            .is_some_and(|owned| !owned.is_empty())
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.sockets.len()
    }

    /// Drop every registered socket. Socket tasks observe their receiver
    /// closing and wind down.
    pub async fn shutdown(&self) {
        let mut state = self.inner.write().await;
        let count = state.sockets.len();
        state.sockets.clear();
        state.users.clear();
        state.groups.clear();
        info!("Connection registry shut down ({} sockets dropped)", count);
    }

    /// Enqueue `frame` on each target; sockets whose receiver is gone are
    /// pruned. Returns the number of successful enqueues.
    async fn deliver(
        &self,
        targets: Vec<(SocketId, mpsc::UnboundedSender<Outbound>)>,
        frame: Outbound,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (socket_id, tx) in targets {
            if tx.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(socket_id);
            }
        }

        if !dead.is_empty() {
            let mut state = self.inner.write().await;
            for socket_id in dead {
                if state.remove_socket(socket_id).is_some() {
                    debug!("Pruned closed socket {}", socket_id);
                }
            }
        }

        delivered
    }
}

fn encode(event: &ChatEvent) -> Option<Outbound> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.name(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::events::MessageReadPayload;

    fn read_event(chat_id: ChatId, ids: &[i64]) -> ChatEvent {
        ChatEvent::MessageRead(MessageReadPayload {
            chat_id,
            message_ids: ids.to_vec(),
        })
    }

    fn decode(frame: Outbound) -> ChatEvent {
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn send_reaches_every_socket_of_the_user() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = registry.register(1, []).await;
        let (_b, mut rx_b) = registry.register(1, []).await;
        let (_c, mut rx_c) = registry.register(2, []).await;

        assert!(registry.send_to_user(1, &read_event(9, &[101])).await);

        assert_eq!(decode(rx_a.recv().await.unwrap()), read_event(9, &[101]));
        assert_eq!(decode(rx_b.recv().await.unwrap()), read_event(9, &[101]));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_user_is_not_delivered() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.is_online(2).await);
        assert!(!registry.send_to_user(2, &read_event(1, &[1])).await);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (socket, _rx) = registry.register(1, [5]).await;
        assert!(registry.is_online(1).await);

        assert!(registry.unregister(socket).await);
        assert!(!registry.unregister(socket).await);
        assert!(!registry.is_online(1).await);
        assert_eq!(registry.send_to_group(5, &read_event(5, &[1])).await, 0);
    }

    #[tokio::test]
    async fn dropped_receiver_degrades_to_not_delivered() {
        let registry = ConnectionRegistry::new();
        let (_socket, rx) = registry.register(1, [3]).await;
        drop(rx);

        assert!(!registry.send_to_user(1, &read_event(3, &[1])).await);
        // The dead socket was pruned on the failed send
        assert!(!registry.is_online(1).await);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn group_send_only_reaches_subscribed_sockets() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = registry.register(1, [7]).await;
        let (_b, mut rx_b) = registry.register(2, []).await;
        let (_c, mut rx_c) = registry.register(3, [8]).await;

        assert_eq!(registry.join_group(2, 7).await, 1);
        assert_eq!(registry.join_group(2, 7).await, 0);
        assert_eq!(registry.join_group(4, 7).await, 0);

        assert_eq!(registry.send_to_group(7, &read_event(7, &[1])).await, 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_registration_and_sends() {
        let registry = ConnectionRegistry::new();
        let mut handles = Vec::new();
        for user_id in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (socket, mut rx) = registry.register(user_id, [1]).await;
                assert!(registry.send_to_user(user_id, &read_event(1, &[user_id])).await);
                let got = decode(rx.recv().await.unwrap());
                registry.unregister(socket).await;
                got
            }));
        }
        for (user_id, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), read_event(1, &[user_id as i64]));
        }
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_closes_receivers() {
        let registry = ConnectionRegistry::new();
        let (_socket, mut rx) = registry.register(1, []).await;
        registry.shutdown().await;
        assert!(rx.recv().await.is_none());
        assert!(!registry.is_online(1).await);
    }
}
