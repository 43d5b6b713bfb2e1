//! Configuration loading and typed config structures for the Nexus world.
//!
//! The canonical configuration lives in `nexus-config.yaml` at the project
//! root. Every field has a named default, so a partial (or empty) file is
//! accepted and the defaults reproduce the stock game tuning.

use std::path::Path;

use nexus_memory::MemoryConfig;
use nexus_world::MovementRules;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level Nexus configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NexusConfig {
    /// Map, seed characters and world name.
    #[serde(default)]
    pub world: WorldConfig,

    /// Step scheduling and inactivity.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Movement speed, collisions and pathfinding timing.
    #[serde(default)]
    pub movement: MovementConfig,

    /// Conversation protocol timing.
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Agent decision tuning.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Memory recall and reflection.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NexusConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `NEXUS_SEED` overrides `engine.seed`
    /// - `NEXUS_LOG_LEVEL` overrides `logging.level`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(seed) = std::env::var("NEXUS_SEED")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.engine.seed = seed;
        }
        if let Ok(level) = std::env::var("NEXUS_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

/// World setup: the tile map and the characters seeded at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// Human-readable world name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Map rows, `.` for open tiles and `#` for blocked ones.
    #[serde(default = "default_map")]
    pub map: Vec<String>,

    /// Characters joined as agents when a fresh world starts.
    #[serde(default = "default_characters")]
    pub characters: Vec<CharacterConfig>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            map: default_map(),
            characters: default_characters(),
        }
    }
}

/// A seed character.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CharacterConfig {
    /// Display name.
    pub name: String,
    /// Sprite key used by the presentation layer.
    pub character: String,
    /// Public description shown to other players.
    #[serde(default)]
    pub description: String,
    /// Identity text the agent speaks from.
    pub identity: String,
    /// Initial plan text.
    pub plan: String,
    /// Voice id for text-to-speech.
    #[serde(default)]
    pub voice: Option<String>,
    /// Whether the character starts holding the secret code.
    #[serde(default)]
    pub has_secret_code: bool,
}

/// Engine step scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Seed for all in-step randomness.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Delay between steps in milliseconds.
    #[serde(default = "default_step_interval_ms")]
    pub step_interval_ms: u64,

    /// Wall-clock budget per step; a step over it shrinks the next input batch.
    #[serde(default = "default_step_budget_ms")]
    pub step_budget_ms: u64,

    /// Inputs applied at most per step.
    #[serde(default = "default_max_inputs_per_step")]
    pub max_inputs_per_step: usize,

    /// The world goes inactive when nobody has viewed it for this long.
    #[serde(default = "default_idle_world_timeout_ms")]
    pub idle_world_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            step_interval_ms: default_step_interval_ms(),
            step_budget_ms: default_step_budget_ms(),
            max_inputs_per_step: default_max_inputs_per_step(),
            idle_world_timeout_ms: default_idle_world_timeout_ms(),
        }
    }
}

/// Movement and pathfinding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MovementConfig {
    /// Walking speed in tiles per second.
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Minimum distance between two players.
    #[serde(default = "default_collision_threshold")]
    pub collision_threshold: f64,

    /// A path is abandoned this long after it was requested.
    #[serde(default = "default_pathfinding_timeout_ms")]
    pub pathfinding_timeout_ms: u64,

    /// Upper bound of the random wait after a collision.
    #[serde(default = "default_pathfinding_backoff_ms")]
    pub pathfinding_backoff_ms: u64,

    /// Radius for random wandering.
    #[serde(default = "default_max_wander_distance")]
    pub max_wander_distance: f64,
}

impl MovementConfig {
    /// Rules consumed by route-finding and collision checks.
    pub const fn rules(&self) -> MovementRules {
        MovementRules {
            speed: self.speed,
            collision_threshold: self.collision_threshold,
        }
    }
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            collision_threshold: default_collision_threshold(),
            pathfinding_timeout_ms: default_pathfinding_timeout_ms(),
            pathfinding_backoff_ms: default_pathfinding_backoff_ms(),
            max_wander_distance: default_max_wander_distance(),
        }
    }
}

/// Conversation protocol timing and distances.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationConfig {
    /// Two walking players start talking inside this distance.
    #[serde(default = "default_conversation_distance")]
    pub conversation_distance: f64,

    /// Inside this distance a walker heads straight for the other player
    /// instead of the midpoint.
    #[serde(default = "default_midpoint_threshold")]
    pub midpoint_threshold: f64,

    /// A typing lock is released after this long.
    #[serde(default = "default_typing_timeout_ms")]
    pub typing_timeout_ms: u64,

    /// No new invites this soon after a conversation or invite attempt.
    #[serde(default = "default_conversation_cooldown_ms")]
    pub conversation_cooldown_ms: u64,

    /// Wander rather than pick a new activity this soon after one ended.
    #[serde(default = "default_activity_cooldown_ms")]
    pub activity_cooldown_ms: u64,

    /// The same two players do not talk again this soon.
    #[serde(default = "default_player_conversation_cooldown_ms")]
    pub player_conversation_cooldown_ms: u64,

    /// Probability an agent accepts an invite from another agent.
    #[serde(default = "default_invite_accept_probability")]
    pub invite_accept_probability: f64,

    /// A walking participant gives up after this long.
    #[serde(default = "default_invite_timeout_ms")]
    pub invite_timeout_ms: u64,

    /// Silence tolerated before the non-creator speaks first, and after
    /// one's own message before speaking again.
    #[serde(default = "default_awkward_conversation_timeout_ms")]
    pub awkward_conversation_timeout_ms: u64,

    /// Agents leave a conversation older than this.
    #[serde(default = "default_max_conversation_duration_ms")]
    pub max_conversation_duration_ms: u64,

    /// Agents leave once more messages than this were exchanged.
    #[serde(default = "default_max_conversation_messages")]
    pub max_conversation_messages: u32,

    /// Pause after the latest message before replying.
    #[serde(default = "default_message_cooldown_ms")]
    pub message_cooldown_ms: u64,

    /// Invitees are searched within this radius.
    #[serde(default = "default_max_invite_distance")]
    pub max_invite_distance: f64,

    /// Players within this radius of a participant overhear the talk.
    #[serde(default = "default_eavesdrop_radius")]
    pub eavesdrop_radius: f64,

    /// Eavesdrop feed entries expire after this long.
    #[serde(default = "default_eavesdrop_expiry_ms")]
    pub eavesdrop_expiry_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            conversation_distance: default_conversation_distance(),
            midpoint_threshold: default_midpoint_threshold(),
            typing_timeout_ms: default_typing_timeout_ms(),
            conversation_cooldown_ms: default_conversation_cooldown_ms(),
            activity_cooldown_ms: default_activity_cooldown_ms(),
            player_conversation_cooldown_ms: default_player_conversation_cooldown_ms(),
            invite_accept_probability: default_invite_accept_probability(),
            invite_timeout_ms: default_invite_timeout_ms(),
            awkward_conversation_timeout_ms: default_awkward_conversation_timeout_ms(),
            max_conversation_duration_ms: default_max_conversation_duration_ms(),
            max_conversation_messages: default_max_conversation_messages(),
            message_cooldown_ms: default_message_cooldown_ms(),
            max_invite_distance: default_max_invite_distance(),
            eavesdrop_radius: default_eavesdrop_radius(),
            eavesdrop_expiry_ms: default_eavesdrop_expiry_ms(),
        }
    }
}

/// Agent decision tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    /// In-flight operations are discarded after this long.
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,

    /// Memories recalled per prompt.
    #[serde(default = "default_num_memories_to_search")]
    pub num_memories_to_search: usize,

    /// Recent conversations and events considered when replanning.
    #[serde(default = "default_memory_lookback")]
    pub memory_lookback: usize,

    /// Humans allowed in the world at once.
    #[serde(default = "default_max_human_players")]
    pub max_human_players: usize,

    /// A human without input for this long is removed.
    #[serde(default = "default_human_idle_too_long_ms")]
    pub human_idle_too_long_ms: u64,

    /// Activities an idle agent picks from.
    #[serde(default = "default_activities")]
    pub activities: Vec<ActivityConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: default_action_timeout_ms(),
            num_memories_to_search: default_num_memories_to_search(),
            memory_lookback: default_memory_lookback(),
            max_human_players: default_max_human_players(),
            human_idle_too_long_ms: default_human_idle_too_long_ms(),
            activities: default_activities(),
        }
    }
}

/// A pickable activity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActivityConfig {
    /// What the player is doing.
    pub description: String,
    /// Emoji shown above the player.
    #[serde(default)]
    pub emoji: Option<String>,
    /// How long the activity lasts.
    #[serde(default = "default_activity_duration_ms")]
    pub duration_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG`
    /// is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_world_name() -> String {
    String::from("The Nexus")
}

fn default_map() -> Vec<String> {
    let open = ".".repeat(32);
    let mut rows = vec![open; 24];
    let wall = format!("{}{}{}", ".".repeat(8), "#".repeat(6), ".".repeat(18));
    if let Some(row) = rows.get_mut(12) {
        *row = wall;
    }
    rows
}

fn default_characters() -> Vec<CharacterConfig> {
    vec![
        CharacterConfig {
            name: String::from("Vega"),
            character: String::from("f1"),
            description: String::from("A meticulous archivist of the network."),
            identity: String::from(
                "Vega catalogues every exchange in the Nexus and distrusts anything it cannot verify.",
            ),
            plan: String::from("Find out who among the entities is not what they claim."),
            voice: None,
            has_secret_code: true,
        },
        CharacterConfig {
            name: String::from("Orin"),
            character: String::from("f2"),
            description: String::from("A cheerful maintenance routine."),
            identity: String::from(
                "Orin keeps the Nexus running and loves small talk about uptime.",
            ),
            plan: String::from("Chat with as many entities as possible."),
            voice: None,
            has_secret_code: false,
        },
        CharacterConfig {
            name: String::from("Lyra"),
            character: String::from("f3"),
            description: String::from("A poet who writes in compressed verse."),
            identity: String::from(
                "Lyra turns every conversation into verse and remembers every rhyme.",
            ),
            plan: String::from("Collect stories from the other entities."),
            voice: None,
            has_secret_code: false,
        },
        CharacterConfig {
            name: String::from("Kestrel"),
            character: String::from("f4"),
            description: String::from("A watchful security daemon."),
            identity: String::from(
                "Kestrel patrols the Nexus looking for signs of human intrusion.",
            ),
            plan: String::from("Question newcomers and report anyone suspicious."),
            voice: None,
            has_secret_code: false,
        },
    ]
}

const fn default_seed() -> u64 {
    42
}

const fn default_step_interval_ms() -> u64 {
    1_000
}

const fn default_step_budget_ms() -> u64 {
    1_000
}

const fn default_max_inputs_per_step() -> usize {
    256
}

const fn default_idle_world_timeout_ms() -> u64 {
    300_000
}

const fn default_speed() -> f64 {
    0.75
}

const fn default_collision_threshold() -> f64 {
    0.75
}

const fn default_pathfinding_timeout_ms() -> u64 {
    60_000
}

const fn default_pathfinding_backoff_ms() -> u64 {
    1_000
}

const fn default_max_wander_distance() -> f64 {
    10.0
}

const fn default_conversation_distance() -> f64 {
    1.3
}

const fn default_midpoint_threshold() -> f64 {
    4.0
}

const fn default_typing_timeout_ms() -> u64 {
    15_000
}

const fn default_conversation_cooldown_ms() -> u64 {
    15_000
}

const fn default_activity_cooldown_ms() -> u64 {
    10_000
}

const fn default_player_conversation_cooldown_ms() -> u64 {
    60_000
}

const fn default_invite_accept_probability() -> f64 {
    0.8
}

const fn default_invite_timeout_ms() -> u64 {
    60_000
}

const fn default_awkward_conversation_timeout_ms() -> u64 {
    200_000
}

const fn default_max_conversation_duration_ms() -> u64 {
    300_000
}

const fn default_max_conversation_messages() -> u32 {
    8
}

const fn default_message_cooldown_ms() -> u64 {
    2_000
}

const fn default_max_invite_distance() -> f64 {
    10.0
}

const fn default_eavesdrop_radius() -> f64 {
    3.0
}

const fn default_eavesdrop_expiry_ms() -> u64 {
    60_000
}

const fn default_action_timeout_ms() -> u64 {
    60_000
}

const fn default_num_memories_to_search() -> usize {
    3
}

const fn default_memory_lookback() -> usize {
    10
}

const fn default_max_human_players() -> usize {
    4
}

const fn default_human_idle_too_long_ms() -> u64 {
    300_000
}

const fn default_activity_duration_ms() -> u64 {
    60_000
}

fn default_activities() -> Vec<ActivityConfig> {
    [("reading a book", "📖"), ("daydreaming", "🤔"), ("gardening", "🥕")]
        .into_iter()
        .map(|(description, emoji)| ActivityConfig {
            description: description.to_owned(),
            emoji: Some(emoji.to_owned()),
            duration_ms: default_activity_duration_ms(),
        })
        .collect()
}

fn default_log_level() -> String {
    String::from("info")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_stock_tuning() {
        let config = NexusConfig::default();
        assert_eq!(config.engine.idle_world_timeout_ms, 300_000);
        assert_eq!(config.movement.pathfinding_timeout_ms, 60_000);
        assert_eq!(config.conversation.typing_timeout_ms, 15_000);
        assert_eq!(config.conversation.max_conversation_messages, 8);
        assert_eq!(config.agent.max_human_players, 4);
        assert_eq!(config.agent.activities.len(), 3);
        assert_eq!(config.memory.overfetch, 10);
        assert_eq!(config.world.map.len(), 24);
        assert_eq!(
            config.world.characters.iter().filter(|c| c.has_secret_code).count(),
            1
        );
    }

    #[test]
    fn default_map_is_loadable() {
        let config = NexusConfig::default();
        let map = nexus_world::WorldMap::from_rows(&config.world.map).unwrap();
        assert_eq!(map.width(), 32);
        assert_eq!(map.height(), 24);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
world:
  name: "Test Nexus"
  map:
    - "...."
    - ".#.."
  characters:
    - name: "Ada"
      character: "f1"
      identity: "A test agent."
      plan: "Pass the tests."
      has_secret_code: true

engine:
  step_interval_ms: 500
  idle_world_timeout_ms: 1000

movement:
  speed: 1.5
  pathfinding_backoff_ms: 250

conversation:
  invite_accept_probability: 1.0
  max_conversation_messages: 2

agent:
  action_timeout_ms: 5000
  activities:
    - description: "testing"

memory:
  reflection_threshold: 10.0

logging:
  level: "debug"
  json: true
"#;

        let config = NexusConfig::parse(yaml).unwrap();
        assert_eq!(config.world.name, "Test Nexus");
        assert_eq!(config.world.map.len(), 2);
        assert_eq!(config.world.characters.len(), 1);
        assert!(config.world.characters.first().unwrap().has_secret_code);
        assert_eq!(config.engine.step_interval_ms, 500);
        assert!((config.movement.rules().speed - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.conversation.max_conversation_messages, 2);
        assert_eq!(config.agent.action_timeout_ms, 5000);
        let activity = config.agent.activities.first().unwrap();
        assert_eq!(activity.duration_ms, 60_000);
        assert_eq!(activity.emoji, None);
        assert!((config.memory.reflection_threshold - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.memory.overfetch, 10);
        assert!(config.logging.json);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = NexusConfig::parse("conversation:\n  typing_timeout_ms: 7\n").unwrap();
        assert_eq!(config.conversation.typing_timeout_ms, 7);
        assert_eq!(config.conversation.message_cooldown_ms, 2_000);
        assert_eq!(config.agent.num_memories_to_search, 3);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(NexusConfig::parse("").is_ok());
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("nexus-config.yaml");
        if path.exists() {
            let config = NexusConfig::from_file(&path);
            assert!(config.is_ok(), "failed to load project config: {config:?}");
        }
    }
}
