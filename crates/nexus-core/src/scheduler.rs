//! Deferred task delivery.
//!
//! A step's scheduled tasks are handed to a [`Scheduler`] after the save.
//! Delivery is at least once: consumers must tolerate duplicates, which
//! the generation check on [`ScheduledTask::RunStep`] and the
//! correlation ids on operations already do.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::operation::ScheduledTask;

/// Fire-and-forget deferred execution.
pub trait Scheduler: Send + Sync {
    /// Deliver `task` after `delay`.
    fn run_after(&self, delay: Duration, task: ScheduledTask);
}

/// Scheduler backed by `tokio` timers and an unbounded channel.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<ScheduledTask>,
}

impl TokioScheduler {
    /// A scheduler and the receiving end the driver reads from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScheduledTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Scheduler for TokioScheduler {
    fn run_after(&self, delay: Duration, task: ScheduledTask) {
        if delay.is_zero() {
            if self.tx.send(task).is_err() {
                debug!("scheduler receiver dropped");
            }
            return;
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(task).is_err() {
                debug!("scheduler receiver dropped");
            }
        });
    }
}

/// Scheduler that only records what it was asked to run.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<(Duration, ScheduledTask)>>,
}

impl ManualScheduler {
    /// An empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every recorded task, in the order they were scheduled.
    pub fn drain(&self) -> Vec<(Duration, ScheduledTask)> {
        self.queue
            .lock()
            .map(|mut queue| std::mem::take(&mut *queue))
            .unwrap_or_default()
    }
}

impl Scheduler for ManualScheduler {
    fn run_after(&self, delay: Duration, task: ScheduledTask) {
        match self.queue.lock() {
            Ok(mut queue) => queue.push((delay, task)),
            Err(_poisoned) => warn!("manual scheduler lock poisoned"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_delivers_after_delay() {
        let (scheduler, mut rx) = TokioScheduler::new();
        scheduler.run_after(
            Duration::from_millis(500),
            ScheduledTask::RunStep { generation: 2 },
        );
        scheduler.run_after(Duration::ZERO, ScheduledTask::RunStep { generation: 1 });

        assert_eq!(rx.recv().await, Some(ScheduledTask::RunStep { generation: 1 }));
        assert!(rx.try_recv().is_err());
        tokio::time::advance(Duration::from_millis(501)).await;
        assert_eq!(rx.recv().await, Some(ScheduledTask::RunStep { generation: 2 }));
    }

    #[test]
    fn manual_scheduler_records_in_order() {
        let scheduler = ManualScheduler::new();
        scheduler.run_after(Duration::from_secs(1), ScheduledTask::RunStep { generation: 1 });
        scheduler.run_after(Duration::ZERO, ScheduledTask::RunStep { generation: 2 });
        let drained = scheduler.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained.first().unwrap().0, Duration::from_secs(1));
        assert!(scheduler.drain().is_empty());
    }
}
