//! Step callback that logs progress.
//!
//! Every step is logged at debug level. A summary goes out at info level
//! every `every` steps and whenever the world status changes.

use nexus_core::engine::Snapshot;
use nexus_core::runner::{StepCallback, StepSummary};
use nexus_types::WorldStatus;
use tracing::{debug, info};

/// Logs step summaries.
pub struct StepLog {
    every: u64,
    steps: u64,
    status: WorldStatus,
}

impl StepLog {
    /// A logger summarizing every `every` steps.
    pub const fn new(every: u64) -> Self {
        Self {
            every,
            steps: 0,
            status: WorldStatus::Running,
        }
    }

    /// Steps seen so far.
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Status after the latest step.
    pub const fn status(&self) -> WorldStatus {
        self.status
    }
}

impl StepCallback for StepLog {
    fn on_step(&mut self, summary: &StepSummary, snapshot: &Snapshot) {
        self.steps = self.steps.saturating_add(1);
        debug!(
            generation = summary.generation,
            inputs_applied = summary.inputs_applied,
            inputs_failed = summary.inputs_failed,
            scheduled = summary.scheduled,
            "step saved"
        );

        if summary.status != self.status {
            info!(
                from = ?self.status,
                to = ?summary.status,
                generation = summary.generation,
                "world status changed"
            );
            self.status = summary.status;
        }

        if self.every > 0 && self.steps.checked_rem(self.every) == Some(0) {
            let humans = snapshot
                .world
                .players
                .values()
                .filter(|p| p.human.is_some())
                .count();
            info!(
                steps = self.steps,
                generation = summary.generation,
                players = summary.players,
                humans,
                agents = snapshot.world.agents.len(),
                conversations = summary.conversations,
                "engine progress"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_summary(status: WorldStatus) -> StepSummary {
        StepSummary {
            generation: 3,
            inputs_applied: 1,
            inputs_failed: 0,
            players: 2,
            conversations: 1,
            scheduled: 4,
            status,
        }
    }

    #[test]
    fn counts_steps_and_tracks_status() {
        let mut log = StepLog::new(2);
        let snapshot = Snapshot::new(0);
        log.on_step(&make_summary(WorldStatus::Running), &snapshot);
        log.on_step(&make_summary(WorldStatus::Inactive), &snapshot);
        assert_eq!(log.steps(), 2);
        assert_eq!(log.status(), WorldStatus::Inactive);
    }

    #[test]
    fn zero_interval_never_summarizes() {
        let mut log = StepLog::new(0);
        log.on_step(&make_summary(WorldStatus::Running), &Snapshot::new(0));
        assert_eq!(log.steps(), 1);
    }
}
