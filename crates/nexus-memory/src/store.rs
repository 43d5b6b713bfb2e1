//! Append-only memory store with vector recall.
//!
//! The store is the single owner of memories and their embeddings. Records
//! are immutable once inserted; the only mutation is refreshing
//! `last_access` when a memory is recalled (see [`MemoryStore::search`]).
//! All state sits behind one `std::sync::Mutex`, which is never held
//! across an `.await`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use nexus_types::{
    ConversationId, EmbeddingId, Memory, MemoryData, MemoryId, MemoryKind, PlayerId,
};
use tracing::{debug, trace};

use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::ranking::{self, RankInput};
use crate::reflection;
use crate::vector::{BruteForceIndex, VectorIndex};

/// A memory about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    /// Player who holds the memory.
    pub player_id: PlayerId,
    /// Free-text description; also the embedded text.
    pub description: String,
    /// Importance on the 0 to 9 scale.
    pub importance: f64,
    /// Initial access time in milliseconds.
    pub last_access: u64,
    /// Kind-specific payload.
    pub data: MemoryData,
}

struct Inner<V> {
    memories: BTreeMap<MemoryId, Memory>,
    by_embedding: BTreeMap<EmbeddingId, MemoryId>,
    /// Per-player memory ids in insertion order.
    by_player: BTreeMap<PlayerId, Vec<MemoryId>>,
    index: V,
}

/// Memory store generic over its vector index.
pub struct MemoryStore<V: VectorIndex = BruteForceIndex> {
    config: MemoryConfig,
    inner: Mutex<Inner<V>>,
}

impl MemoryStore<BruteForceIndex> {
    /// Create an empty store backed by a brute-force index.
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_index(config, BruteForceIndex::new())
    }
}

impl<V: VectorIndex> MemoryStore<V> {
    /// Create an empty store over the given index.
    pub fn with_index(config: MemoryConfig, index: V) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                memories: BTreeMap::new(),
                by_embedding: BTreeMap::new(),
                by_player: BTreeMap::new(),
                index,
            }),
        }
    }

    /// The store's configuration.
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<V>>, MemoryError> {
        self.inner.lock().map_err(|_poisoned| MemoryError::LockPoisoned)
    }

    /// Insert a memory together with its embedding.
    pub fn insert(
        &self,
        memory: NewMemory,
        embedding: Vec<f32>,
        now: u64,
    ) -> Result<Memory, MemoryError> {
        let mut inner = self.lock()?;
        let embedding_id = EmbeddingId::new();
        inner.index.insert(embedding_id, memory.player_id, embedding)?;
        let stored = Memory {
            id: MemoryId::new(),
            player_id: memory.player_id,
            description: memory.description,
            embedding_id,
            importance: memory.importance,
            last_access: memory.last_access,
            created: now,
            data: memory.data,
        };
        inner.by_embedding.insert(embedding_id, stored.id);
        inner
            .by_player
            .entry(stored.player_id)
            .or_default()
            .push(stored.id);
        inner.memories.insert(stored.id, stored.clone());
        debug!(
            player_id = %stored.player_id,
            memory_id = %stored.id,
            kind = ?stored.data.kind(),
            importance = stored.importance,
            "memory stored"
        );
        Ok(stored)
    }

    /// Fetch one memory.
    pub fn get(&self, id: MemoryId) -> Result<Memory, MemoryError> {
        self.lock()?
            .memories
            .get(&id)
            .cloned()
            .ok_or(MemoryError::MemoryNotFound(id))
    }

    /// Recall the `n` most relevant memories for a query embedding.
    ///
    /// Over-fetches `n * overfetch` nearest neighbours, ranks them by
    /// normalized similarity, importance and recency, and refreshes
    /// `last_access` on returned memories whose previous access is older
    /// than the throttle window.
    pub fn search(
        &self,
        player_id: PlayerId,
        query: &[f32],
        n: usize,
        now: u64,
    ) -> Result<Vec<Memory>, MemoryError> {
        let mut inner = self.lock()?;
        let hits = inner
            .index
            .search(query, player_id, n.saturating_mul(self.config.overfetch));
        let candidates: Vec<(f64, MemoryId)> = hits
            .iter()
            .filter_map(|hit| inner.by_embedding.get(&hit.id).map(|id| (hit.score, *id)))
            .collect();
        let inputs: Vec<RankInput> = candidates
            .iter()
            .filter_map(|(score, id)| {
                inner.memories.get(id).map(|m| RankInput {
                    similarity: *score,
                    importance: m.importance,
                    recency: ranking::recency_score(
                        m.last_access,
                        now,
                        self.config.recency_decay,
                    ),
                })
            })
            .collect();
        let ranked = ranking::rank(&inputs, n);

        let mut recalled = Vec::with_capacity(ranked.len());
        for r in ranked {
            let Some((_, id)) = candidates.get(r.index) else {
                continue;
            };
            let Some(memory) = inner.memories.get_mut(id) else {
                continue;
            };
            if ranking::needs_touch(memory.last_access, now, self.config.access_throttle_ms) {
                memory.last_access = now;
            }
            recalled.push(memory.clone());
        }
        trace!(player_id = %player_id, recalled = recalled.len(), "memories recalled");
        Ok(recalled)
    }

    /// The `n` newest memories of a player, optionally of one kind, newest
    /// first.
    pub fn recent(
        &self,
        player_id: PlayerId,
        kind: Option<MemoryKind>,
        n: usize,
    ) -> Result<Vec<Memory>, MemoryError> {
        let inner = self.lock()?;
        Ok(Self::newest_first(&inner, player_id)
            .filter(|m| kind.is_none_or(|k| m.data.kind() == k))
            .take(n)
            .cloned()
            .collect())
    }

    /// The newest memory of a kind.
    pub fn latest(
        &self,
        player_id: PlayerId,
        kind: MemoryKind,
    ) -> Result<Option<Memory>, MemoryError> {
        Ok(self.recent(player_id, Some(kind), 1)?.into_iter().next())
    }

    /// Event memories a player recorded during a conversation, oldest first.
    pub fn events_in_conversation(
        &self,
        player_id: PlayerId,
        conversation_id: ConversationId,
    ) -> Result<Vec<Memory>, MemoryError> {
        let inner = self.lock()?;
        let mut events: Vec<Memory> = Self::newest_first(&inner, player_id)
            .filter(|m| {
                m.data.kind() == MemoryKind::Event
                    && m.data.conversation_id() == Some(conversation_id)
            })
            .cloned()
            .collect();
        events.reverse();
        Ok(events)
    }

    /// Memories created after the player's latest reflection, newest first,
    /// capped at the reflection window.
    pub fn since_last_reflection(&self, player_id: PlayerId) -> Result<Vec<Memory>, MemoryError> {
        let inner = self.lock()?;
        Ok(Self::newest_first(&inner, player_id)
            .take_while(|m| m.data.kind() != MemoryKind::Reflection)
            .take(self.config.reflection_window)
            .cloned()
            .collect())
    }

    /// Whether the player has accumulated enough importance to reflect.
    ///
    /// Returns the memories the reflection should cover when it is due.
    pub fn reflection_candidates(
        &self,
        player_id: PlayerId,
    ) -> Result<Option<Vec<Memory>>, MemoryError> {
        let memories = self.since_last_reflection(player_id)?;
        if reflection::reflection_due(&memories, self.config.reflection_threshold) {
            Ok(Some(memories))
        } else {
            Ok(None)
        }
    }

    /// Number of stored memories.
    pub fn len(&self) -> Result<usize, MemoryError> {
        Ok(self.lock()?.memories.len())
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> Result<bool, MemoryError> {
        Ok(self.len()? == 0)
    }

    fn newest_first<'a>(
        inner: &'a Inner<V>,
        player_id: PlayerId,
    ) -> impl Iterator<Item = &'a Memory> + 'a {
        inner
            .by_player
            .get(&player_id)
            .into_iter()
            .flat_map(|ids| ids.iter().rev())
            .filter_map(|id| inner.memories.get(id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const HOUR: u64 = 3_600_000;

    fn make_event(player: u64, description: &str, importance: f64, last_access: u64) -> NewMemory {
        NewMemory {
            player_id: PlayerId(player),
            description: description.to_owned(),
            importance,
            last_access,
            data: MemoryData::Event {
                conversation_id: None,
                player_ids: Vec::new(),
            },
        }
    }

    fn make_store() -> MemoryStore {
        MemoryStore::new(MemoryConfig::default())
    }

    #[test]
    fn recall_prefers_relevant_important_recent() {
        let store = make_store();
        let now = 10 * HOUR;
        let relevant = store
            .insert(make_event(1, "relevant", 9.0, now), vec![1.0, 0.0], now)
            .unwrap();
        store
            .insert(make_event(1, "stale", 0.0, now - 5 * HOUR), vec![0.6, 0.8], now)
            .unwrap();
        store
            .insert(make_event(1, "orthogonal", 5.0, now - 9 * HOUR), vec![0.0, 1.0], now)
            .unwrap();
        store
            .insert(make_event(2, "someone else's", 9.0, now), vec![1.0, 0.0], now)
            .unwrap();

        let recalled = store.search(PlayerId(1), &[1.0, 0.0], 1, now).unwrap();
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled.first().unwrap().id, relevant.id);
    }

    #[test]
    fn recall_touches_only_stale_accesses() {
        let store = make_store();
        let now = 100 * HOUR;
        let stale = store
            .insert(make_event(1, "old", 5.0, now - 300_001), vec![1.0, 0.0], now)
            .unwrap();
        let fresh = store
            .insert(make_event(1, "new", 5.0, now - 1_000), vec![0.9, 0.1], now)
            .unwrap();

        let recalled = store.search(PlayerId(1), &[1.0, 0.0], 2, now).unwrap();
        assert_eq!(recalled.len(), 2);
        assert_eq!(store.get(stale.id).unwrap().last_access, now);
        assert_eq!(store.get(fresh.id).unwrap().last_access, now - 1_000);
    }

    #[test]
    fn recent_filters_by_kind_newest_first() {
        let store = make_store();
        store.insert(make_event(1, "first", 1.0, 0), vec![1.0], 0).unwrap();
        store
            .insert(
                NewMemory {
                    data: MemoryData::Plan {
                        related_memory_ids: Vec::new(),
                    },
                    ..make_event(1, "plan", 1.0, 0)
                },
                vec![1.0],
                1,
            )
            .unwrap();
        store.insert(make_event(1, "second", 1.0, 0), vec![1.0], 2).unwrap();

        let events = store.recent(PlayerId(1), Some(MemoryKind::Event), 10).unwrap();
        let names: Vec<&str> = events.iter().map(|m| m.description.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);
        let plan = store.latest(PlayerId(1), MemoryKind::Plan).unwrap().unwrap();
        assert_eq!(plan.description, "plan");
    }

    #[test]
    fn reflection_window_stops_at_previous_reflection() {
        let store = make_store();
        for i in 0..3 {
            store
                .insert(make_event(1, &format!("before {i}"), 9.0, 0), vec![1.0], i)
                .unwrap();
        }
        store
            .insert(
                NewMemory {
                    data: MemoryData::Reflection {
                        related_memory_ids: Vec::new(),
                    },
                    ..make_event(1, "reflection", 5.0, 0)
                },
                vec![1.0],
                3,
            )
            .unwrap();
        store.insert(make_event(1, "after", 9.0, 0), vec![1.0], 4).unwrap();

        let since = store.since_last_reflection(PlayerId(1)).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since.first().unwrap().description, "after");
        assert!(store.reflection_candidates(PlayerId(1)).unwrap().is_none());
    }

    #[test]
    fn reflection_due_after_enough_importance() {
        let store = make_store();
        for i in 0..56 {
            store
                .insert(make_event(1, &format!("event {i}"), 9.0, 0), vec![1.0], i)
                .unwrap();
        }
        // 56 * 9 = 504 > 500
        let due = store.reflection_candidates(PlayerId(1)).unwrap().unwrap();
        assert_eq!(due.len(), 56);
    }

    #[test]
    fn conversation_events_are_oldest_first() {
        let store = make_store();
        for (i, text) in ["a", "b"].iter().enumerate() {
            store
                .insert(
                    NewMemory {
                        data: MemoryData::Event {
                            conversation_id: Some(ConversationId(9)),
                            player_ids: vec![PlayerId(2)],
                        },
                        ..make_event(1, text, 9.0, 0)
                    },
                    vec![1.0],
                    u64::try_from(i).unwrap(),
                )
                .unwrap();
        }
        store.insert(make_event(1, "elsewhere", 9.0, 0), vec![1.0], 5).unwrap();
        let events = store.events_in_conversation(PlayerId(1), ConversationId(9)).unwrap();
        let names: Vec<&str> = events.iter().map(|m| m.description.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
