//! Hands scheduled tasks from the engine loop to background tasks.

use std::sync::Arc;

use anyhow::Context;
use nexus_core::operation::ScheduledTask;
use nexus_core::runner::Dispatch;
use tracing::{debug, warn};

use crate::operations::OperationRunner;

/// [`Dispatch`] implementation spawning one tokio task per scheduled task.
pub struct OperationDispatcher {
    runner: Arc<OperationRunner>,
}

impl OperationDispatcher {
    /// A dispatcher running work on `runner`.
    pub const fn new(runner: Arc<OperationRunner>) -> Self {
        Self { runner }
    }

    /// The runner tasks are handed to.
    pub const fn runner(&self) -> &Arc<OperationRunner> {
        &self.runner
    }
}

impl Dispatch for OperationDispatcher {
    fn dispatch(&self, task: ScheduledTask) {
        match task {
            ScheduledTask::RunStep { generation } => {
                debug!(generation, "step task reached the dispatcher, ignoring");
            }
            ScheduledTask::Operation(op) => {
                let runner = Arc::clone(&self.runner);
                tokio::spawn(async move {
                    runner.run_operation(*op).await;
                });
            }
            ScheduledTask::Propagate(propagation) => {
                let runner = Arc::clone(&self.runner);
                let message_id = propagation.message.id;
                tokio::spawn(async move {
                    if let Err(e) = runner
                        .propagate(*propagation)
                        .await
                        .with_context(|| format!("propagating {message_id}"))
                    {
                        warn!(error = ?e, "message propagation failed");
                    }
                });
            }
            ScheduledTask::RememberEvent(event) => {
                let runner = Arc::clone(&self.runner);
                tokio::spawn(async move {
                    if let Err(e) = runner
                        .remember_event(event)
                        .await
                        .with_context(|| format!("remembering {:?} for {}", event.event, event.player_id))
                    {
                        warn!(error = ?e, "event memory failed");
                    }
                });
            }
        }
    }
}
