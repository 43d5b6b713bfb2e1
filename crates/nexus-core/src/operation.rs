//! Out-of-band operations and the tasks a step schedules.
//!
//! An operation carries everything the operation layer needs, captured at
//! dispatch time, plus the correlation id its finish input must echo. The
//! engine never waits on an operation; it only reconciles finish inputs.

use nexus_types::{
    Activity, AgentId, ConversationId, GameEvent, Message, MessageId, MessageKind, OperationId,
    PlayerId, Point,
};
use nexus_world::movement::wander_destination;
use nexus_world::{WorldMap, distance};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::config::NexusConfig;
use crate::player::Player;

/// The five agent operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    /// Wander, pick an activity, or invite someone.
    DoSomething,
    /// Produce the next conversation message.
    GenerateMessage,
    /// Summarize a finished conversation into memory.
    RememberConversation,
    /// Record a rejected invite as an event memory.
    RememberRejection,
    /// Reflect on recent memories and rewrite the plan.
    ReflectAndUpdatePlan,
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::DoSomething => "doSomething",
            Self::GenerateMessage => "generateMessage",
            Self::RememberConversation => "rememberConversation",
            Self::RememberRejection => "rememberRejection",
            Self::ReflectAndUpdatePlan => "reflectAndUpdatePlan",
        };
        f.write_str(s)
    }
}

/// Snapshot handed to the do-something decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoSomethingArgs {
    /// The deciding player.
    pub player: Player,
    /// The deciding agent.
    pub agent: Agent,
    /// Players not in any conversation.
    pub other_free_players: Vec<Player>,
}

/// Operation-specific arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OperationArgs {
    /// See [`OperationKind::DoSomething`].
    DoSomething(Box<DoSomethingArgs>),
    /// See [`OperationKind::GenerateMessage`].
    GenerateMessage {
        /// Conversation being spoken in.
        conversation_id: ConversationId,
        /// The listener.
        other_player_id: PlayerId,
        /// Correlation id of the typing lock.
        message_id: MessageId,
        /// Opening, reply, or farewell.
        message_kind: MessageKind,
        /// Whether the speaker may share the secret code.
        speaker_has_code: bool,
        /// Whether the listener already holds it.
        listener_has_code: bool,
    },
    /// See [`OperationKind::RememberConversation`].
    RememberConversation {
        /// The archived conversation.
        conversation_id: ConversationId,
    },
    /// See [`OperationKind::RememberRejection`].
    RememberRejection {
        /// The rejected conversation.
        conversation_id: ConversationId,
        /// The other side of the invite.
        other_player_id: PlayerId,
        /// Whether this agent did the rejecting.
        rejected_by_self: bool,
    },
    /// See [`OperationKind::ReflectAndUpdatePlan`].
    ReflectAndUpdatePlan,
}

impl OperationArgs {
    /// Which operation these arguments belong to.
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::DoSomething(_) => OperationKind::DoSomething,
            Self::GenerateMessage { .. } => OperationKind::GenerateMessage,
            Self::RememberConversation { .. } => OperationKind::RememberConversation,
            Self::RememberRejection { .. } => OperationKind::RememberRejection,
            Self::ReflectAndUpdatePlan => OperationKind::ReflectAndUpdatePlan,
        }
    }
}

/// A dispatched operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Correlation id.
    pub id: OperationId,
    /// Owning agent.
    pub agent_id: AgentId,
    /// The agent's player.
    pub player_id: PlayerId,
    /// Dispatch time.
    pub started: u64,
    /// Operation arguments.
    pub args: OperationArgs,
}

/// Fan-out of a posted message to its audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propagation {
    /// The posted message.
    pub message: Message,
    /// The other participant.
    pub listener: Option<PlayerId>,
    /// Whether the listener is human.
    pub listener_is_human: bool,
    /// Eavesdroppers driven by agents.
    pub overhearing: Vec<PlayerId>,
    /// Session tokens of human eavesdroppers.
    pub human_eavesdroppers: Vec<String>,
    /// Voice of the author.
    pub voice: Option<String>,
}

impl Propagation {
    /// Whether any human hears this message.
    pub fn has_human_audience(&self) -> bool {
        self.listener_is_human || !self.human_eavesdroppers.is_empty()
    }
}

/// An event worth remembering, written by the operation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMemory {
    /// Who remembers.
    pub player_id: PlayerId,
    /// Who else was involved.
    pub other_player_id: PlayerId,
    /// What happened.
    pub event: GameEvent,
    /// Where it happened.
    pub conversation_id: Option<ConversationId>,
}

/// Work a step hands to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScheduledTask {
    /// Run the next step if the generation still matches.
    RunStep {
        /// Generation the step expects to find.
        generation: u64,
    },
    /// Run an agent operation.
    Operation(Box<Operation>),
    /// Deliver a message to eavesdroppers and human listeners.
    Propagate(Box<Propagation>),
    /// Store an event memory.
    RememberEvent(EventMemory),
}

/// Outcome of the do-something decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoSomethingDecision {
    /// Where to wander.
    pub destination: Option<Point>,
    /// Activity to start.
    pub activity: Option<Activity>,
    /// Player to invite.
    pub invitee: Option<PlayerId>,
    /// Whether an invite search ran.
    pub attempted_invite: bool,
}

/// Decide what an idle agent does next.
///
/// A standing agent wanders when it just finished an activity or a
/// conversation, and otherwise starts an activity. A walking agent looks
/// for the nearest free player to invite unless it talked or searched
/// recently. `last_together(a, b)` returns when `a` and `b` last finished a
/// conversation together.
pub fn decide_do_something<R, F>(
    args: &DoSomethingArgs,
    map: &WorldMap,
    config: &NexusConfig,
    now: u64,
    last_together: F,
    rng: &mut R,
) -> DoSomethingDecision
where
    R: Rng,
    F: Fn(PlayerId, PlayerId) -> Option<u64>,
{
    let conversation = &config.conversation;
    let cooldown = conversation.conversation_cooldown_ms;
    let just_left_conversation = args
        .agent
        .last_conversation
        .is_some_and(|t| now < t.saturating_add(cooldown));
    let recently_attempted_invite = args
        .agent
        .last_invite_attempt
        .is_some_and(|t| now < t.saturating_add(cooldown));
    let recent_activity = args
        .player
        .activity
        .as_ref()
        .is_some_and(|a| now < a.until.saturating_add(conversation.activity_cooldown_ms));

    if args.player.pathfinding.is_none() {
        if !(recent_activity || just_left_conversation)
            && let Some(activity) = pick_activity(config, now, rng)
        {
            return DoSomethingDecision {
                activity: Some(activity),
                ..DoSomethingDecision::default()
            };
        }
        return DoSomethingDecision {
            destination: wander_destination(
                map,
                args.player.position,
                config.movement.max_wander_distance,
                rng,
            ),
            ..DoSomethingDecision::default()
        };
    }

    if just_left_conversation || recently_attempted_invite {
        return DoSomethingDecision::default();
    }
    DoSomethingDecision {
        invitee: find_invitee(args, config, now, last_together),
        attempted_invite: true,
        ..DoSomethingDecision::default()
    }
}

fn pick_activity<R: Rng>(config: &NexusConfig, now: u64, rng: &mut R) -> Option<Activity> {
    let activities = &config.agent.activities;
    if activities.is_empty() {
        return None;
    }
    let choice = activities.get(rng.random_range(0..activities.len()))?;
    Some(Activity {
        description: choice.description.clone(),
        emoji: choice.emoji.clone(),
        until: now.saturating_add(choice.duration_ms),
    })
}

/// Nearest free player within invite distance that this player has not
/// talked to during the cooldown.
fn find_invitee<F>(
    args: &DoSomethingArgs,
    config: &NexusConfig,
    now: u64,
    last_together: F,
) -> Option<PlayerId>
where
    F: Fn(PlayerId, PlayerId) -> Option<u64>,
{
    let position = args.player.position;
    let conversation = &config.conversation;
    let mut candidates: Vec<(f64, PlayerId)> = args
        .other_free_players
        .iter()
        .filter(|other| {
            last_together(args.player.id, other.id).is_none_or(|ended| {
                now >= ended.saturating_add(conversation.player_conversation_cooldown_ms)
            })
        })
        .map(|other| (distance(position, other.position), other.id))
        .filter(|(d, _)| *d <= conversation.max_invite_distance)
        .collect();
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
    candidates.first().map(|(_, id)| *id)
}
