//! Engine binary for the Nexus simulation.
//!
//! Wires the world engine, the operation runner and operator controls
//! together and drives the step loop until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `nexus-config.yaml` (or `NEXUS_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the tile map
//! 4. Load the runner configuration from the environment
//! 5. Create the engine and queue the seed characters
//! 6. Build the operation runner and dispatcher
//! 7. Install the interrupt handler and the keep-alive heartbeat
//! 8. Run the engine loop
//! 9. Log the result

mod error;
mod seeder;
mod step_log;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nexus_core::config::{LoggingConfig, NexusConfig};
use nexus_core::engine::Snapshot;
use nexus_core::input::Input;
use nexus_core::input_log::InputLog;
use nexus_core::operator::OperatorState;
use nexus_core::runner::{self, Engine, now_ms};
use nexus_core::scheduler::TokioScheduler;
use nexus_core::store::WorldStore;
use nexus_memory::MemoryStore;
use nexus_runner::config::RunnerConfig;
use nexus_runner::dispatcher::OperationDispatcher;
use nexus_runner::embedding::Embedder;
use nexus_runner::llm::create_backend;
use nexus_runner::operations::OperationRunner;
use nexus_runner::prompt::PromptEngine;
use nexus_runner::tts::SpeechClient;
use nexus_world::WorldMap;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineBinError;
use crate::step_log::StepLog;

/// Steps between progress summaries.
const PROGRESS_EVERY_STEPS: u64 = 60;

/// Shortest keep-alive heartbeat interval.
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, the map, the runner setup or the
/// engine loop fails.
#[tokio::main]
async fn main() -> Result<(), EngineBinError> {
    // 1. Load configuration.
    let (config, config_path) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("nexus-engine starting");
    match &config_path {
        Some(path) => info!(path = %path.display(), "configuration file loaded"),
        None => info!("config file not found, using defaults"),
    }
    info!(
        world_name = config.world.name,
        seed = config.engine.seed,
        step_interval_ms = config.engine.step_interval_ms,
        characters = config.world.characters.len(),
        "configuration loaded"
    );

    // 3. Build the map.
    let map = WorldMap::from_rows(&config.world.map)?;
    info!(width = map.width(), height = map.height(), "map built");

    // 4. Runner configuration; a missing API key is fatal.
    let runner_config = RunnerConfig::from_env()?;
    info!(
        backend = ?runner_config.llm.backend_type,
        model = runner_config.llm.model,
        embedding_model = runner_config.embedding_model,
        speech = runner_config.speech.is_some(),
        operation_timeout_ms = runner_config.operation_timeout.as_millis(),
        "runner configuration loaded"
    );

    // 5. Engine and seed characters.
    let config = Arc::new(config);
    let engine = Arc::new(Engine::new(
        Arc::new(WorldStore::new(Snapshot::new(now_ms()))),
        Arc::new(InputLog::new()),
        Arc::new(map),
        Arc::clone(&config),
    ));
    let (scheduler, mut tasks) = TokioScheduler::new();
    let seeded = seeder::seed_characters(&engine, &config.world.characters, &scheduler)?;
    info!(characters = seeded, "seed characters queued");

    // 6. Operation runner.
    let mut operation_runner = OperationRunner::new(
        Arc::clone(&engine),
        Arc::new(scheduler.clone()),
        Arc::new(MemoryStore::new(config.memory.clone())),
        create_backend(&runner_config.llm),
        Embedder::openai(&runner_config.llm, &runner_config.embedding_model),
        PromptEngine::new(&runner_config.templates_dir)?,
    )
    .with_limits(
        runner_config.operation_timeout,
        runner_config.max_concurrent_calls,
    );
    if let Some(speech) = runner_config.speech {
        operation_runner = operation_runner.with_speech(SpeechClient::http(speech));
    }
    let dispatcher = OperationDispatcher::new(Arc::new(operation_runner));
    info!(
        templates_dir = runner_config.templates_dir,
        max_concurrent_calls = runner_config.max_concurrent_calls,
        "operation runner ready"
    );

    // 7. Operator controls.
    let operator = Arc::new(OperatorState::new());
    spawn_interrupt_handler(Arc::clone(&operator));
    spawn_keepalive(
        Arc::clone(&engine),
        scheduler.clone(),
        Duration::from_millis(config.engine.idle_world_timeout_ms.saturating_div(2))
            .max(MIN_HEARTBEAT),
    );

    // 8. Run the engine loop from a fresh generation.
    engine.resume_world(now_ms(), &scheduler)?;
    let mut callback = StepLog::new(PROGRESS_EVERY_STEPS);
    let result = runner::run_engine(
        &engine,
        &scheduler,
        &mut tasks,
        &dispatcher,
        &operator,
        &mut callback,
    )
    .await?;
    engine.stop_world(now_ms())?;

    // 9. Log results.
    runner::log_run_end(&result);
    info!(
        steps = callback.steps(),
        status = ?result.status,
        "nexus-engine shutdown complete"
    );

    Ok(())
}

/// Load `nexus-config.yaml`, or the file named by `NEXUS_CONFIG`.
///
/// Returns the path that was read, or `None` when defaults are used.
fn load_config() -> Result<(NexusConfig, Option<PathBuf>), EngineBinError> {
    let path = std::env::var("NEXUS_CONFIG")
        .map_or_else(|_| PathBuf::from("nexus-config.yaml"), PathBuf::from);
    if path.exists() {
        let config = NexusConfig::from_file(&path)?;
        Ok((config, Some(path)))
    } else {
        Ok((NexusConfig::parse("")?, None))
    }
}

/// Initialize the tracing subscriber; `RUST_LOG` wins over the config level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Request a stop on Ctrl-C.
fn spawn_interrupt_handler(operator: Arc<OperatorState>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping engine");
                operator.request_stop();
            }
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
    });
}

/// Heartbeat the world so it does not go inactive without viewers.
fn spawn_keepalive(engine: Arc<Engine>, scheduler: TokioScheduler, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            match engine.submit(Input::Heartbeat, now_ms(), &scheduler) {
                Ok(input_id) => debug!(%input_id, "heartbeat submitted"),
                Err(e) => debug!(error = %e, "heartbeat refused"),
            }
        }
    });
}
