//! The input log: an ordered queue of submitted inputs with settle-once
//! results.
//!
//! Submitters get an [`InputId`] back and observe the result through
//! [`InputLog::result`] or [`InputLog::wait_for`]. The engine reads
//! everything submitted after its last processed input and settles each
//! entry exactly once; a second settle is ignored, which makes replays of
//! an already-applied input harmless.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use nexus_types::InputId;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::input::{Input, InputValue};

/// Settled outcome of an input; errors are kept as display strings.
pub type InputResult = Result<InputValue, String>;

/// One submitted input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedInput {
    /// Sequence number.
    pub id: InputId,
    /// The command.
    pub input: Input,
    /// Submission time.
    pub received: u64,
    /// Result once the engine has applied it.
    pub result: Option<InputResult>,
}

struct Inner {
    next: u64,
    entries: BTreeMap<InputId, LoggedInput>,
}

/// Ordered input queue; settled entries are pruned behind the engine.
pub struct InputLog {
    inner: Mutex<Inner>,
    settled: Notify,
}

impl InputLog {
    /// An empty log.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next: 0,
                entries: BTreeMap::new(),
            }),
            settled: Notify::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_poisoned| StoreError::LockPoisoned)
    }

    /// Append an input and return its sequence number.
    pub fn submit(&self, input: Input, now: u64) -> Result<InputId, StoreError> {
        let mut inner = self.lock()?;
        let id = InputId(inner.next);
        inner.next = inner.next.saturating_add(1);
        trace!(input_id = %id, name = input.name(), "input submitted");
        inner.entries.insert(
            id,
            LoggedInput {
                id,
                input,
                received: now,
                result: None,
            },
        );
        Ok(id)
    }

    /// Up to `limit` inputs submitted after `after`, oldest first.
    pub fn pending(
        &self,
        after: Option<InputId>,
        limit: usize,
    ) -> Result<Vec<(InputId, Input)>, StoreError> {
        let inner = self.lock()?;
        let pending = match after {
            Some(after) => inner
                .entries
                .range(InputId(after.0.saturating_add(1))..)
                .take(limit)
                .map(|(id, entry)| (*id, entry.input.clone()))
                .collect(),
            None => inner
                .entries
                .iter()
                .take(limit)
                .map(|(id, entry)| (*id, entry.input.clone()))
                .collect(),
        };
        Ok(pending)
    }

    /// Record the result of an input. Returns `false` if it was already
    /// settled.
    pub fn settle(&self, id: InputId, result: InputResult) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or(StoreError::InputNotFound(id))?;
        if entry.result.is_some() {
            debug!(input_id = %id, "input already settled");
            return Ok(false);
        }
        entry.result = Some(result);
        drop(inner);
        self.settled.notify_waiters();
        Ok(true)
    }

    /// The result of an input, if settled.
    pub fn result(&self, id: InputId) -> Result<Option<InputResult>, StoreError> {
        let inner = self.lock()?;
        let entry = inner.entries.get(&id).ok_or(StoreError::InputNotFound(id))?;
        Ok(entry.result.clone())
    }

    /// Drop settled inputs with ids below `before` and return how many
    /// were removed. Unsettled inputs are always kept.
    pub fn prune(&self, before: InputId) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let len = inner.entries.len();
        let mut kept = inner.entries.split_off(&before);
        let mut dropped = std::mem::take(&mut inner.entries);
        dropped.retain(|_, entry| entry.result.is_none());
        kept.append(&mut dropped);
        inner.entries = kept;
        let removed = len.saturating_sub(inner.entries.len());
        if removed > 0 {
            trace!(before = %before, removed, "settled inputs pruned");
        }
        Ok(removed)
    }

    /// Inputs currently held, settled or not.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.entries.len())
    }

    /// Whether the log holds no inputs.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Wait until an input is settled and return its result.
    pub async fn wait_for(&self, id: InputId) -> Result<InputResult, StoreError> {
        loop {
            let notified = self.settled.notified();
            if let Some(result) = self.result(id)? {
                return Ok(result);
            }
            notified.await;
        }
    }
}

impl Default for InputLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn pending_returns_inputs_after_the_cursor_in_order() {
        let log = InputLog::new();
        let a = log.submit(Input::Heartbeat, 0).unwrap();
        let b = log.submit(Input::Heartbeat, 1).unwrap();
        let c = log.submit(Input::Heartbeat, 2).unwrap();

        let ids = |pending: Vec<(InputId, Input)>| -> Vec<InputId> {
            pending.into_iter().map(|(id, _)| id).collect()
        };
        assert_eq!(ids(log.pending(None, 10).unwrap()), vec![a, b, c]);
        assert_eq!(ids(log.pending(Some(a), 1).unwrap()), vec![b]);
    }

    #[test]
    fn results_settle_once() {
        let log = InputLog::new();
        let id = log.submit(Input::Heartbeat, 0).unwrap();
        assert_eq!(log.result(id).unwrap(), None);
        assert!(log.settle(id, Ok(InputValue::Empty)).unwrap());
        assert!(!log.settle(id, Err(String::from("late"))).unwrap());
        assert_eq!(log.result(id).unwrap(), Some(Ok(InputValue::Empty)));
        assert!(matches!(
            log.result(InputId(99)),
            Err(StoreError::InputNotFound(_))
        ));
    }

    #[test]
    fn prune_drops_only_settled_inputs_below_the_cursor() {
        let log = InputLog::new();
        let ids: Vec<InputId> = (0..4)
            .map(|now| log.submit(Input::Heartbeat, now).unwrap())
            .collect();
        for id in ids.iter().take(3).filter(|id| id.0 != 1) {
            log.settle(*id, Ok(InputValue::Empty)).unwrap();
        }

        assert_eq!(log.prune(InputId(3)).unwrap(), 2);
        assert_eq!(log.len().unwrap(), 2);
        assert_eq!(log.result(InputId(1)).unwrap(), None);
        assert!(matches!(
            log.result(InputId(0)),
            Err(StoreError::InputNotFound(_))
        ));
        let pending: Vec<InputId> = log
            .pending(Some(InputId(1)), 10)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(pending, vec![InputId(3)]);

        let next = log.submit(Input::Heartbeat, 5).unwrap();
        assert_eq!(next, InputId(4));
    }

    #[test]
    fn prune_on_an_empty_log_is_a_no_op() {
        let log = InputLog::new();
        assert_eq!(log.prune(InputId(10)).unwrap(), 0);
        assert!(log.is_empty().unwrap());
    }

    #[tokio::test]
    async fn wait_for_wakes_on_settle() {
        let log = Arc::new(InputLog::new());
        let id = log.submit(Input::Heartbeat, 0).unwrap();
        let waiter = {
            let log = Arc::clone(&log);
            tokio::spawn(async move { log.wait_for(id).await })
        };
        tokio::task::yield_now().await;
        log.settle(id, Err(String::from("invalid player id p:1")))
            .unwrap();
        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result, Err(String::from("invalid player id p:1")));
    }
}
