//! Error types for the engine binary.
//!
//! [`EngineBinError`] wraps every failure mode of startup and the engine
//! loop so `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineBinError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: nexus_core::config::ConfigError,
    },

    /// The configured map is invalid.
    #[error("world error: {source}")]
    World {
        /// The underlying world error.
        #[from]
        source: nexus_world::WorldError,
    },

    /// The engine or its repository failed.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: nexus_core::error::EngineError,
    },

    /// The operation runner could not be set up.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: nexus_runner::error::RunnerError,
    },
}
