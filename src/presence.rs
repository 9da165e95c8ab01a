//! Presence registry and event fanout
//!
//! In-process maps of live streams keyed by task, user, and agent. State is
//! volatile: nothing here is persisted, and a reconnecting client simply
//! re-subscribes. Sends are best-effort and non-blocking; a stream whose
//! channel is full or closed is treated as disconnected and removed after
//! the enumeration finishes.

use crate::domain_types::{AgentId, PlanId, StreamId, UserId};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Default per-stream buffer before a peer counts as not ready
const STREAM_BUFFER: usize = 64;

/// Receiving half handed to the connected client
pub type PresenceReceiver = mpsc::Receiver<Value>;

/// Key spaces a stream can subscribe under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PresenceKey {
    /// Orchestration task channel
    Task(PlanId),
    /// User-wide channel
    User(UserId),
    /// Agent presence channel
    Agent(AgentId),
}

/// Connection counts per key space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceStats {
    /// Streams subscribed to task channels
    pub task_streams: usize,
    /// Streams subscribed to user channels
    pub user_streams: usize,
    /// Streams subscribed to agent channels
    pub agent_streams: usize,
}

/// Registry of live streams
///
/// The maps are the only mutable state; each key's bucket is guarded by the
/// map shard lock, held for insertion/removal and enumeration but never
/// across an actual send.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    tasks: DashMap<PlanId, HashMap<StreamId, mpsc::Sender<Value>>>,
    users: DashMap<UserId, HashMap<StreamId, mpsc::Sender<Value>>>,
    agents: DashMap<AgentId, HashMap<StreamId, mpsc::Sender<Value>>>,
}

impl PresenceRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a new stream under `key`; returns its id and receiver
    pub fn connect(&self, key: &PresenceKey) -> (StreamId, PresenceReceiver) {
        let stream_id = StreamId::generate();
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        match key {
            PresenceKey::Task(id) => {
                self.tasks.entry(*id).or_default().insert(stream_id, sender);
            }
            PresenceKey::User(id) => {
                self.users.entry(*id).or_default().insert(stream_id, sender);
            }
            PresenceKey::Agent(id) => {
                self.agents
                    .entry(*id)
                    .or_default()
                    .insert(stream_id, sender);
            }
        }
        debug!(?key, %stream_id, "stream connected");
        (stream_id, receiver)
    }

    /// Removes a stream from a key; empty buckets are dropped
    pub fn disconnect(&self, key: &PresenceKey, stream_id: StreamId) {
        match key {
            PresenceKey::Task(id) => Self::remove(&self.tasks, id, stream_id),
            PresenceKey::User(id) => Self::remove(&self.users, id, stream_id),
            PresenceKey::Agent(id) => Self::remove(&self.agents, id, stream_id),
        }
        debug!(?key, %stream_id, "stream disconnected");
    }

    fn remove<K: Eq + std::hash::Hash>(
        map: &DashMap<K, HashMap<StreamId, mpsc::Sender<Value>>>,
        key: &K,
        stream_id: StreamId,
    ) {
        if let Some(mut bucket) = map.get_mut(key) {
            bucket.remove(&stream_id);
            let empty = bucket.is_empty();
            drop(bucket);
            if empty {
                map.remove_if(key, |_, bucket| bucket.is_empty());
            }
        }
    }

    /// Pushes an event to every stream subscribed to a task
    pub fn send_to_task(&self, task_id: PlanId, event: &Value) -> usize {
        Self::fanout(&self.tasks, &task_id, event)
    }

    /// Pushes an event to every stream subscribed to a user
    pub fn send_to_user(&self, user_id: UserId, event: &Value) -> usize {
        Self::fanout(&self.users, &user_id, event)
    }

    /// Pushes an event to every stream subscribed to an agent
    pub fn send_to_agent(&self, agent_id: AgentId, event: &Value) -> usize {
        Self::fanout(&self.agents, &agent_id, event)
    }

    /// Whether any stream is currently subscribed for an agent
    #[must_use]
    pub fn agent_online(&self, agent_id: AgentId) -> bool {
        self.agents
            .get(&agent_id)
            .is_some_and(|bucket| !bucket.is_empty())
    }

    /// Delivers to each subscriber with `try_send`; failed streams are
    /// collected during enumeration and removed afterwards. Returns the
    /// number of successful sends.
    fn fanout<K: Eq + std::hash::Hash + Copy>(
        map: &DashMap<K, HashMap<StreamId, mpsc::Sender<Value>>>,
        key: &K,
        event: &Value,
    ) -> usize {
        let Some(bucket) = map.get(key) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (stream_id, sender) in bucket.iter() {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(*stream_id),
            }
        }
        drop(bucket);

        if !dead.is_empty() {
            if let Some(mut bucket) = map.get_mut(key) {
                for stream_id in dead {
                    bucket.remove(&stream_id);
                }
                let empty = bucket.is_empty();
                drop(bucket);
                if empty {
                    map.remove_if(key, |_, bucket| bucket.is_empty());
                }
            }
        }
        delivered
    }

    /// Snapshot of connection counts
    #[must_use]
    pub fn stats(&self) -> PresenceStats {
        PresenceStats {
            task_streams: self.tasks.iter().map(|b| b.len()).sum(),
            user_streams: self.users.iter().map(|b| b.len()).sum(),
            agent_streams: self.agents.iter().map(|b| b.len()).sum(),
        }
    }
}
