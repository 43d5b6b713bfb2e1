//! World repository with single-writer generation checks.
//!
//! [`WorldStore`] keeps the current [`Snapshot`] and the durable records a
//! step produces: archived conversations, participation edges, messages,
//! and the eavesdrop feed. A save is tagged with the generation the writer
//! loaded; if another writer saved in between, the save is rejected as
//! stale and nothing is written.
//!
//! Participation keeps only the latest end time per directed pair, and
//! expired feed entries are dropped on every write and read, so neither
//! grows with the age of the world.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use nexus_types::{
    ArchivedConversation, ConversationId, EavesdropFeedEntry, Message, MessageId,
    ParticipatedTogether, PlayerId, WorldStatus,
};
use tracing::{debug, info};

use crate::engine::Snapshot;
use crate::error::StoreError;
use crate::game::StepEffects;

struct Inner {
    snapshot: Snapshot,
    archived: BTreeMap<ConversationId, ArchivedConversation>,
    participated: BTreeMap<(PlayerId, PlayerId), u64>,
    messages: BTreeMap<ConversationId, Vec<Message>>,
    message_conversations: BTreeMap<MessageId, ConversationId>,
    feed: Vec<EavesdropFeedEntry>,
}

/// In-memory world repository.
pub struct WorldStore {
    inner: Mutex<Inner>,
}

impl WorldStore {
    /// A repository holding `snapshot`.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshot,
                archived: BTreeMap::new(),
                participated: BTreeMap::new(),
                messages: BTreeMap::new(),
                message_conversations: BTreeMap::new(),
                feed: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_poisoned| StoreError::LockPoisoned)
    }

    /// A copy of the current snapshot.
    pub fn load(&self) -> Result<Snapshot, StoreError> {
        Ok(self.lock()?.snapshot.clone())
    }

    /// The stored generation.
    pub fn generation(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.snapshot.engine.generation)
    }

    /// Replace the snapshot and append the step's effects.
    ///
    /// `expected_generation` is the generation the writer loaded. Fails
    /// with [`StoreError::StaleGeneration`] if the stored one differs.
    pub fn save(
        &self,
        expected_generation: u64,
        snapshot: Snapshot,
        effects: &StepEffects,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let actual = inner.snapshot.engine.generation;
        if actual != expected_generation {
            debug!(expected = expected_generation, actual, "rejecting stale save");
            return Err(StoreError::StaleGeneration {
                expected: expected_generation,
                actual,
            });
        }
        inner.snapshot = snapshot;
        for archived in &effects.archived {
            inner.archived.insert(archived.id, archived.clone());
        }
        for edge in &effects.participated {
            record_participation(&mut inner.participated, edge);
        }
        for message in &effects.messages {
            inner
                .message_conversations
                .insert(message.id, message.conversation_id);
            inner
                .messages
                .entry(message.conversation_id)
                .or_default()
                .push(message.clone());
        }
        Ok(())
    }

    /// Set the world status from outside a step and invalidate any
    /// scheduled step by bumping the generation.
    pub fn set_status(&self, status: WorldStatus, now: u64) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let snapshot = &mut inner.snapshot;
        snapshot.world.status = status;
        if status == WorldStatus::Running {
            snapshot.world.last_viewed = now;
        }
        snapshot.engine.running = status == WorldStatus::Running;
        snapshot.engine.generation = snapshot.engine.generation.saturating_add(1);
        info!(?status, generation = snapshot.engine.generation, "world status set");
        Ok(snapshot.engine.generation)
    }

    /// When `player` last finished a conversation with `other`.
    pub fn last_together(
        &self,
        player: PlayerId,
        other: PlayerId,
    ) -> Result<Option<u64>, StoreError> {
        Ok(self.lock()?.participated.get(&(player, other)).copied())
    }

    /// An archived conversation.
    pub fn archived(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ArchivedConversation>, StoreError> {
        Ok(self.lock()?.archived.get(&conversation_id).cloned())
    }

    /// Messages of a conversation in posting order.
    pub fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .lock()?
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Attach synthesized audio to a posted message.
    pub fn attach_audio(&self, message_id: MessageId, audio: String) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let Some(conversation_id) = inner.message_conversations.get(&message_id).copied() else {
            return Ok(false);
        };
        let Some(message) = inner
            .messages
            .get_mut(&conversation_id)
            .and_then(|messages| messages.iter_mut().rev().find(|m| m.id == message_id))
        else {
            return Ok(false);
        };
        message.audio = Some(audio);
        Ok(true)
    }

    /// Push an entry to a human eavesdropper's feed, dropping entries
    /// that expired by the new entry's timestamp.
    pub fn push_feed(&self, entry: EavesdropFeedEntry) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let now = entry.timestamp;
        inner.feed.retain(|e| e.expires > now);
        inner.feed.push(entry);
        Ok(())
    }

    /// Unexpired feed entries of a human; expired entries are dropped.
    pub fn feed(&self, human: &str, now: u64) -> Result<Vec<EavesdropFeedEntry>, StoreError> {
        let mut inner = self.lock()?;
        inner.feed.retain(|entry| entry.expires > now);
        Ok(inner
            .feed
            .iter()
            .filter(|entry| entry.human == human)
            .cloned()
            .collect())
    }

    /// The current snapshot as JSON, for viewers.
    pub fn snapshot_json(&self) -> Result<String, StoreError> {
        let inner = self.lock()?;
        Ok(serde_json::to_string(&inner.snapshot)?)
    }

    /// A repository restored from [`snapshot_json`](Self::snapshot_json)
    /// output.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        Ok(Self::new(snapshot))
    }
}

/// Keep the later end time of a directed pair.
fn record_participation(
    participated: &mut BTreeMap<(PlayerId, PlayerId), u64>,
    edge: &ParticipatedTogether,
) {
    participated
        .entry((edge.player1, edge.player2))
        .and_modify(|ended| *ended = (*ended).max(edge.ended))
        .or_insert(edge.ended);
}
