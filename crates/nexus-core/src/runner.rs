//! Engine driver: the only writer of the world.
//!
//! [`Engine`] wraps the pure [`step`](crate::engine::step) with the
//! repository, the input log and the scheduler. [`run_engine`] is the
//! long-running loop: it receives scheduled tasks, runs steps whose
//! generation still matches the stored one, and hands every other task to
//! a [`Dispatch`] implementation that runs operations out of band.
//!
//! Steps never overlap: the loop runs one task at a time, and a step that
//! loses the generation race is discarded without side effects.
//!
//! The step itself never reads the clock. The driver times each step and
//! sizes the next input batch from it: a step that overruns
//! `step_budget_ms` halves the batch, a step within budget doubles it back
//! toward `max_inputs_per_step`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use nexus_types::{InputId, WorldStatus};
use nexus_world::WorldMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::NexusConfig;
use crate::engine::{self, Snapshot, StepContext};
use crate::error::{EngineError, StoreError};
use crate::input::Input;
use crate::input_log::{InputLog, InputResult};
use crate::operation::ScheduledTask;
use crate::operator::OperatorState;
use crate::scheduler::Scheduler;
use crate::store::WorldStore;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Settled inputs kept behind the engine cursor so late `wait_for` callers
/// still find their results.
pub const SETTLED_INPUT_RETENTION: u64 = 1_024;

/// Runs tasks the engine does not execute itself.
pub trait Dispatch: Send + Sync {
    /// Start `task` in the background. Must not block.
    fn dispatch(&self, task: ScheduledTask);
}

/// What happened in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    /// Generation after the step.
    pub generation: u64,
    /// Inputs applied successfully.
    pub inputs_applied: usize,
    /// Inputs that failed.
    pub inputs_failed: usize,
    /// Players after the step.
    pub players: usize,
    /// Live conversations after the step.
    pub conversations: usize,
    /// Tasks handed to the scheduler.
    pub scheduled: usize,
    /// World status after the step.
    pub status: WorldStatus,
}

/// Callback invoked after each saved step.
pub trait StepCallback: Send {
    /// Called with the summary and the saved snapshot.
    fn on_step(&mut self, summary: &StepSummary, snapshot: &Snapshot);
}

/// A callback that does nothing.
pub struct NoOpCallback;

impl StepCallback for NoOpCallback {
    fn on_step(&mut self, _summary: &StepSummary, _snapshot: &Snapshot) {}
}

/// Why the driver loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Steps run by this driver.
    pub steps: u64,
    /// Stored generation at exit.
    pub generation: u64,
    /// World status at exit.
    pub status: WorldStatus,
    /// Wall-clock seconds since the operator state was created.
    pub elapsed_seconds: u64,
}

/// The world engine: repository, input log, map and configuration.
pub struct Engine {
    store: Arc<WorldStore>,
    inputs: Arc<InputLog>,
    map: Arc<WorldMap>,
    config: Arc<NexusConfig>,
    batch_limit: AtomicUsize,
}

impl Engine {
    /// Wire an engine over shared stores.
    pub fn new(
        store: Arc<WorldStore>,
        inputs: Arc<InputLog>,
        map: Arc<WorldMap>,
        config: Arc<NexusConfig>,
    ) -> Self {
        let batch_limit = AtomicUsize::new(config.engine.max_inputs_per_step.max(1));
        Self {
            store,
            inputs,
            map,
            config,
            batch_limit,
        }
    }

    /// Inputs the next step will take at most.
    pub fn batch_limit(&self) -> usize {
        self.batch_limit.load(Ordering::Relaxed)
    }

    /// The world repository.
    pub const fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }

    /// The input log.
    pub const fn inputs(&self) -> &Arc<InputLog> {
        &self.inputs
    }

    /// The map.
    pub const fn map(&self) -> &Arc<WorldMap> {
        &self.map
    }

    /// Engine configuration.
    pub const fn config(&self) -> &Arc<NexusConfig> {
        &self.config
    }

    /// Queue an input.
    ///
    /// A heartbeat for an inactive world restarts it. Any other input for
    /// a halted world is refused, since no step would ever apply it.
    pub fn submit(
        &self,
        input: Input,
        now: u64,
        scheduler: &dyn Scheduler,
    ) -> Result<InputId, EngineError> {
        let status = self.store.load()?.world.status;
        let restart = matches!(input, Input::Heartbeat) && status == WorldStatus::Inactive;
        if status != WorldStatus::Running && !restart {
            return Err(EngineError::NotRunning { status });
        }
        let id = self.inputs.submit(input, now)?;
        if restart {
            info!("viewer returned, restarting inactive world");
            self.resume_world(now, scheduler)?;
        }
        Ok(id)
    }

    /// Queue an input and wait for its result.
    pub async fn submit_and_wait(
        &self,
        input: Input,
        now: u64,
        scheduler: &dyn Scheduler,
    ) -> Result<InputResult, EngineError> {
        let id = self.submit(input, now, scheduler)?;
        Ok(self.inputs.wait_for(id).await?)
    }

    /// Stop the world on operator request.
    pub fn stop_world(&self, now: u64) -> Result<(), EngineError> {
        self.store.set_status(WorldStatus::StoppedByDeveloper, now)?;
        Ok(())
    }

    /// Restart a stopped world and schedule its next step.
    pub fn resume_world(&self, now: u64, scheduler: &dyn Scheduler) -> Result<(), EngineError> {
        let generation = self.store.set_status(WorldStatus::Running, now)?;
        scheduler.run_after(Duration::ZERO, ScheduledTask::RunStep { generation });
        Ok(())
    }

    /// Run one step if the stored generation is `expected_generation`.
    ///
    /// Returns `None` when the step is stale (another writer got there
    /// first) or the world is not running. Input results are settled and
    /// scheduled tasks handed over only after the save succeeds.
    pub fn run_step(
        &self,
        expected_generation: u64,
        now: u64,
        scheduler: &dyn Scheduler,
    ) -> Result<Option<(StepSummary, Snapshot)>, EngineError> {
        let snapshot = self.store.load()?;
        if snapshot.engine.generation != expected_generation {
            debug!(
                expected = expected_generation,
                actual = snapshot.engine.generation,
                "skipping stale step"
            );
            return Ok(None);
        }
        if !snapshot.engine.running {
            debug!(status = ?snapshot.world.status, "world not running, skipping step");
            return Ok(None);
        }
        let limit = self.batch_limit();
        let pending = self.inputs.pending(snapshot.engine.processed_input, limit)?;
        let started = Instant::now();
        let outcome = engine::step(
            snapshot,
            pending,
            StepContext::new(&self.map, &self.config),
            now,
        );
        let elapsed = started.elapsed();
        let next = next_batch_limit(
            limit,
            elapsed,
            Duration::from_millis(self.config.engine.step_budget_ms),
            self.config.engine.max_inputs_per_step,
        );
        if next < limit {
            warn!(
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                budget_ms = self.config.engine.step_budget_ms,
                batch = next,
                "step over budget, shrinking input batch"
            );
        }
        self.batch_limit.store(next, Ordering::Relaxed);

        match self
            .store
            .save(expected_generation, outcome.snapshot.clone(), &outcome.effects)
        {
            Ok(()) => {}
            Err(StoreError::StaleGeneration { expected, actual }) => {
                debug!(expected, actual, "step lost the generation race");
                return Ok(None);
            }
            Err(source) => return Err(source.into()),
        }

        let mut inputs_failed = 0_usize;
        for (id, result) in &outcome.results {
            let settled = match result {
                Ok(value) => Ok(*value),
                Err(error) => {
                    inputs_failed = inputs_failed.saturating_add(1);
                    Err(error.to_string())
                }
            };
            self.inputs.settle(*id, settled)?;
        }
        if let Some(processed) = outcome.snapshot.engine.processed_input {
            let before = InputId(processed.0.saturating_sub(SETTLED_INPUT_RETENTION));
            self.inputs.prune(before)?;
        }
        for scheduled in &outcome.effects.scheduled {
            scheduler.run_after(
                Duration::from_millis(scheduled.delay_ms),
                scheduled.task.clone(),
            );
        }

        let world = &outcome.snapshot.world;
        let summary = StepSummary {
            generation: outcome.snapshot.engine.generation,
            inputs_applied: outcome.results.len().saturating_sub(inputs_failed),
            inputs_failed,
            players: world.players.len(),
            conversations: world.conversations.len(),
            scheduled: outcome.effects.scheduled.len(),
            status: world.status,
        };
        Ok(Some((summary, outcome.snapshot)))
    }
}

/// Batch size for the step after one that took `elapsed`.
fn next_batch_limit(limit: usize, elapsed: Duration, budget: Duration, max: usize) -> usize {
    let max = max.max(1);
    if elapsed > budget {
        (limit / 2).max(1)
    } else {
        limit.saturating_mul(2).min(max)
    }
}

/// Drive the engine until the operator stops it or the scheduler closes.
///
/// Scheduled steps run inline; every other task goes to `dispatcher`.
/// A world that halts (inactive, stopped, or game over) leaves the loop
/// running so it can be resumed.
pub async fn run_engine(
    engine: &Engine,
    scheduler: &dyn Scheduler,
    tasks: &mut mpsc::UnboundedReceiver<ScheduledTask>,
    dispatcher: &dyn Dispatch,
    operator: &Arc<OperatorState>,
    callback: &mut dyn StepCallback,
) -> Result<RunResult, EngineError> {
    info!(
        step_interval_ms = engine.config.engine.step_interval_ms,
        max_inputs_per_step = engine.config.engine.max_inputs_per_step,
        "engine starting"
    );

    loop {
        // --- Check stop request ---
        if operator.is_stop_requested() {
            let snapshot = engine.store.load()?;
            info!(generation = snapshot.engine.generation, "operator stop requested");
            return Ok(RunResult {
                steps: operator.steps(),
                generation: snapshot.engine.generation,
                status: snapshot.world.status,
                elapsed_seconds: operator.elapsed_seconds(),
            });
        }

        let task = tokio::select! {
            task = tasks.recv() => task,
            () = operator.stopped() => continue,
        };
        let Some(task) = task else {
            warn!("scheduler channel closed");
            return Err(EngineError::SchedulerClosed);
        };

        match task {
            ScheduledTask::RunStep { generation } => {
                let Some((summary, snapshot)) = engine.run_step(generation, now_ms(), scheduler)?
                else {
                    continue;
                };
                operator.record_step();
                callback.on_step(&summary, &snapshot);
                if summary.status != WorldStatus::Running {
                    info!(status = ?summary.status, generation = summary.generation, "world halted");
                }
            }
            other => dispatcher.dispatch(other),
        }
    }
}

/// Log the end of a run.
pub fn log_run_end(result: &RunResult) {
    info!(
        steps = result.steps,
        generation = result.generation,
        status = ?result.status,
        elapsed_seconds = result.elapsed_seconds,
        "engine stopped"
    );
    if result.steps == 0 {
        warn!("engine stopped before running any step");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::input::InputValue;
    use crate::player::NewPlayer;
    use crate::scheduler::ManualScheduler;

    fn make_engine(now: u64) -> Engine {
        let map = WorldMap::from_rows(&vec![".".repeat(10); 10]).unwrap();
        Engine::new(
            Arc::new(WorldStore::new(Snapshot::new(now))),
            Arc::new(InputLog::new()),
            Arc::new(map),
            Arc::new(NexusConfig::default()),
        )
    }

    fn make_join(token: &str) -> Input {
        Input::Join(NewPlayer {
            name: token.to_owned(),
            character: String::from("f1"),
            description: String::from("a visitor"),
            human: Some(token.to_owned()),
            voice: None,
            has_secret_code: false,
            reported_as_human: false,
        })
    }

    #[test]
    fn run_step_settles_inputs_and_schedules_next_step() {
        let engine = make_engine(0);
        let scheduler = ManualScheduler::new();
        let id = engine.submit(make_join("h1"), 0, &scheduler).unwrap();

        let (summary, _) = engine.run_step(0, 10, &scheduler).unwrap().unwrap();
        assert_eq!(summary.generation, 1);
        assert_eq!(summary.inputs_applied, 1);
        assert_eq!(summary.players, 1);
        assert!(matches!(
            engine.inputs().result(id).unwrap(),
            Some(Ok(InputValue::Player { .. }))
        ));
        let scheduled = scheduler.drain();
        assert!(
            scheduled
                .iter()
                .any(|(_, task)| *task == ScheduledTask::RunStep { generation: 1 })
        );
    }

    #[test]
    fn settled_inputs_are_pruned_behind_the_retention_window() {
        let engine = make_engine(0);
        let scheduler = ManualScheduler::new();
        let total = SETTLED_INPUT_RETENTION + 10;
        for now in 0..total {
            engine.submit(Input::Heartbeat, now, &scheduler).unwrap();
        }
        let mut generation = 0;
        loop {
            let processed = engine.store().load().unwrap().engine.processed_input;
            if engine.inputs().pending(processed, 1).unwrap().is_empty() {
                break;
            }
            let (summary, _) = engine.run_step(generation, 10, &scheduler).unwrap().unwrap();
            generation = summary.generation;
        }

        let held = u64::try_from(engine.inputs().len().unwrap()).unwrap();
        assert_eq!(held, SETTLED_INPUT_RETENTION + 1);
        let newest = InputId(total - 1);
        assert_eq!(
            engine.inputs().result(newest).unwrap(),
            Some(Ok(InputValue::Empty))
        );
        assert!(engine.inputs().result(InputId(0)).is_err());
    }

    #[test]
    fn batch_limit_halves_over_budget_and_recovers() {
        let budget = Duration::from_millis(50);
        let slow = Duration::from_millis(80);
        let fast = Duration::from_millis(5);
        assert_eq!(next_batch_limit(64, slow, budget, 64), 32);
        assert_eq!(next_batch_limit(1, slow, budget, 64), 1);
        assert_eq!(next_batch_limit(32, fast, budget, 64), 64);
        assert_eq!(next_batch_limit(64, fast, budget, 64), 64);
        assert_eq!(next_batch_limit(4, fast, budget, 0), 1);
    }

    #[test]
    fn zero_budget_still_drains_the_queue() {
        let map = WorldMap::from_rows(&vec![".".repeat(10); 10]).unwrap();
        let mut config = NexusConfig::default();
        config.engine.step_budget_ms = 0;
        config.engine.max_inputs_per_step = 8;
        let engine = Engine::new(
            Arc::new(WorldStore::new(Snapshot::new(0))),
            Arc::new(InputLog::new()),
            Arc::new(map),
            Arc::new(config),
        );
        let scheduler = ManualScheduler::new();
        for now in 0..20 {
            engine.submit(Input::Heartbeat, now, &scheduler).unwrap();
        }
        let mut generation = 0;
        let mut applied = 0;
        while applied < 20 {
            let (summary, _) = engine.run_step(generation, 30, &scheduler).unwrap().unwrap();
            assert!(summary.inputs_applied >= 1);
            applied += summary.inputs_applied;
            generation = summary.generation;
        }
        assert_eq!(applied, 20);
        assert!(engine.batch_limit() >= 1);
        assert!(engine.batch_limit() <= 8);
    }

    #[test]
    fn stale_step_is_a_no_op() {
        let engine = make_engine(0);
        let scheduler = ManualScheduler::new();
        engine.run_step(0, 10, &scheduler).unwrap().unwrap();
        assert!(engine.run_step(0, 20, &scheduler).unwrap().is_none());
        assert_eq!(engine.store().generation().unwrap(), 1);
    }

    #[test]
    fn inputs_are_applied_once() {
        let engine = make_engine(0);
        let scheduler = ManualScheduler::new();
        engine.submit(make_join("h1"), 0, &scheduler).unwrap();
        engine.run_step(0, 10, &scheduler).unwrap().unwrap();
        let (summary, _) = engine.run_step(1, 20, &scheduler).unwrap().unwrap();
        assert_eq!(summary.inputs_applied, 0);
        assert_eq!(summary.players, 1);
    }

    #[test]
    fn halted_world_refuses_inputs_but_heartbeat_restarts_inactive() {
        let engine = make_engine(0);
        let scheduler = ManualScheduler::new();
        engine.store().set_status(WorldStatus::Inactive, 5).unwrap();
        assert!(matches!(
            engine.submit(make_join("h1"), 10, &scheduler),
            Err(EngineError::NotRunning {
                status: WorldStatus::Inactive
            })
        ));
        engine.submit(Input::Heartbeat, 10, &scheduler).unwrap();
        assert_eq!(
            engine.store().load().unwrap().world.status,
            WorldStatus::Running
        );
        assert_eq!(
            scheduler.drain().last().map(|(_, task)| task.clone()),
            Some(ScheduledTask::RunStep { generation: 2 })
        );
    }

    #[test]
    fn stopped_world_skips_steps_until_resumed() {
        let engine = make_engine(0);
        let scheduler = ManualScheduler::new();
        engine.stop_world(5).unwrap();
        assert!(engine.run_step(1, 10, &scheduler).unwrap().is_none());

        engine.resume_world(20, &scheduler).unwrap();
        let resumed = scheduler.drain();
        assert_eq!(
            resumed.last().map(|(_, task)| task.clone()),
            Some(ScheduledTask::RunStep { generation: 2 })
        );
        assert!(engine.run_step(2, 30, &scheduler).unwrap().is_some());
    }

    #[tokio::test]
    async fn submit_and_wait_returns_the_settled_result() {
        let engine = make_engine(0);
        let scheduler = ManualScheduler::new();
        let (result, ()) = tokio::join!(
            engine.submit_and_wait(make_join("h1"), 0, &scheduler),
            async {
                tokio::task::yield_now().await;
                engine.run_step(0, 10, &scheduler).unwrap().unwrap();
            }
        );
        assert!(matches!(result.unwrap(), Ok(InputValue::Player { .. })));
    }

    struct Recorder(std::sync::Mutex<Vec<ScheduledTask>>);

    impl Dispatch for Recorder {
        fn dispatch(&self, task: ScheduledTask) {
            self.0.lock().unwrap().push(task);
        }
    }

    #[tokio::test]
    async fn driver_runs_steps_and_stops_on_request() {
        let engine = make_engine(now_ms());
        let (scheduler, mut rx) = crate::scheduler::TokioScheduler::new();
        let operator = Arc::new(OperatorState::new());
        let recorder = Recorder(std::sync::Mutex::new(Vec::new()));
        engine.submit(make_join("h1"), now_ms(), &scheduler).unwrap();
        scheduler.run_after(Duration::ZERO, ScheduledTask::RunStep { generation: 0 });

        let stopper = {
            let operator = Arc::clone(&operator);
            let inputs = Arc::clone(engine.inputs());
            tokio::spawn(async move {
                inputs.wait_for(InputId(0)).await.unwrap();
                operator.request_stop();
            })
        };
        let result = run_engine(
            &engine,
            &scheduler,
            &mut rx,
            &recorder,
            &operator,
            &mut NoOpCallback,
        )
        .await
        .unwrap();
        stopper.await.unwrap();
        assert!(result.steps >= 1);
        assert!(result.generation >= 1);
        assert_eq!(result.status, WorldStatus::Running);
    }
}
