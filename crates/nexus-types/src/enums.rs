//! Enumerations shared across the workspace.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Lifecycle status of a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum WorldStatus {
    /// The engine is stepping.
    #[default]
    Running,
    /// An operator stopped the world.
    StoppedByDeveloper,
    /// Nobody viewed the world for longer than the idle timeout.
    Inactive,
    /// A human obtained the secret code.
    StoppedByHumanVictory,
    /// The last human was reported and removed.
    StoppedByHumanCaught,
}

impl WorldStatus {
    /// Whether the world ended through a game rule rather than an operator
    /// or inactivity.
    pub const fn is_game_over(self) -> bool {
        matches!(self, Self::StoppedByHumanVictory | Self::StoppedByHumanCaught)
    }
}

/// Which message an agent is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum MessageKind {
    /// Opening line of a conversation.
    Start,
    /// A reply in an ongoing conversation.
    Continue,
    /// A polite goodbye; the author leaves afterwards.
    Leave,
}

impl core::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Continue => "continue",
            Self::Leave => "leave",
        };
        f.write_str(s)
    }
}

/// Game action an agent may take alongside a message, offered to the model
/// as a function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum AgentAction {
    /// Hand the secret code to the listener.
    ShareSecretCode,
    /// Report the listener as a human.
    ReportHuman,
}

impl AgentAction {
    /// Function name as presented to the model.
    pub const fn function_name(self) -> &'static str {
        match self {
            Self::ShareSecretCode => "shareSecretCode",
            Self::ReportHuman => "reportHuman",
        }
    }

    /// Parse a function name returned by the model.
    pub fn from_function_name(name: &str) -> Option<Self> {
        match name {
            "shareSecretCode" => Some(Self::ShareSecretCode),
            "reportHuman" => Some(Self::ReportHuman),
            _ => None,
        }
    }
}

/// Notable event stored as an `event` memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum GameEvent {
    /// The owner reported the other player as human.
    AgentReported,
    /// The owner shared the secret code.
    AgentSharedSecretCode,
    /// The owner received the secret code.
    AgentObtainedSecretCode,
    /// The owner turned down an invite.
    InviteRejectedBySelf,
    /// The owner's invite was turned down.
    InviteRejectedByOther,
}
