//! Agents: the decision state machine that drives non-human players.
//!
//! Each tick an agent evaluates a strict priority list. Slow work
//! (remembering and replanning) comes first, then the fast path: wait for
//! an in-flight operation, pick something to do when idle, or follow the
//! conversation protocol. At most one fast and one slow operation are
//! outstanding per agent.

use nexus_types::{
    AgentDescription, AgentId, ConversationId, MessageKind, OperationId, PlayerId, Point,
};
use nexus_world::{distance, midpoint};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conversation::{self, MemberStatus};
use crate::error::GameError;
use crate::game::Game;
use crate::operation::{DoSomethingArgs, Operation, OperationArgs, OperationKind, ScheduledTask};
use crate::player::{self, NewPlayer};

/// The two operation slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Slot {
    /// Decisions and messages.
    Fast,
    /// Memory writes and reflection.
    Slow,
}

impl Slot {
    /// Slot name for logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
        }
    }
}

/// Marker for an operation in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProgress {
    /// Which operation.
    pub name: OperationKind,
    /// Correlation id its finish input must carry.
    pub operation_id: OperationId,
    /// Dispatch time.
    pub started: u64,
}

/// An invite this agent sent that was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedInvite {
    /// The ended conversation.
    pub conversation_id: ConversationId,
    /// Who rejected it.
    pub other_player_id: PlayerId,
}

/// Decision state of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Game id.
    pub id: AgentId,
    /// The driven player.
    pub player_id: PlayerId,
    /// Conversation waiting to be summarized.
    pub to_remember: Option<ConversationId>,
    /// Whether the plan should be revisited.
    pub to_replan: bool,
    /// Rejection waiting to be remembered.
    pub to_remember_rejection: Option<RejectedInvite>,
    /// When the agent last left a conversation.
    pub last_conversation: Option<u64>,
    /// When the agent last searched for someone to invite.
    pub last_invite_attempt: Option<u64>,
    /// Fast-slot operation.
    pub in_progress_operation: Option<InProgress>,
    /// Slow-slot operation.
    pub in_progress_slow_op: Option<InProgress>,
}

impl Agent {
    /// A fresh agent with nothing to do.
    pub const fn new(id: AgentId, player_id: PlayerId) -> Self {
        Self {
            id,
            player_id,
            to_remember: None,
            to_replan: false,
            to_remember_rejection: None,
            last_conversation: None,
            last_invite_attempt: None,
            in_progress_operation: None,
            in_progress_slow_op: None,
        }
    }

    /// The operation in `slot`.
    pub const fn slot(&self, slot: Slot) -> Option<&InProgress> {
        match slot {
            Slot::Fast => self.in_progress_operation.as_ref(),
            Slot::Slow => self.in_progress_slow_op.as_ref(),
        }
    }

    const fn slot_mut(&mut self, slot: Slot) -> &mut Option<InProgress> {
        match slot {
            Slot::Fast => &mut self.in_progress_operation,
            Slot::Slow => &mut self.in_progress_slow_op,
        }
    }

    /// Clear `slot` if it holds `operation_id`.
    ///
    /// Returns `false` when the slot is empty or holds another operation;
    /// the caller must then discard the completion.
    pub fn finish(&mut self, slot: Slot, operation_id: OperationId) -> bool {
        let slot = self.slot_mut(slot);
        if slot.is_some_and(|op| op.operation_id == operation_id) {
            *slot = None;
            return true;
        }
        false
    }

    /// Drop the operation in `slot` once `timeout_ms` has elapsed since it started.
    fn expire(&mut self, slot: Slot, now: u64, timeout_ms: u64) -> bool {
        let agent_id = self.id;
        let held = self.slot_mut(slot);
        if let Some(op) = *held
            && op.started.saturating_add(timeout_ms) <= now
        {
            warn!(
                agent_id = %agent_id,
                operation_id = %op.operation_id,
                name = %op.name,
                slot = slot.name(),
                "operation timed out"
            );
            *held = None;
            return true;
        }
        false
    }
}

/// Arguments of an agent creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAgent {
    /// Display name.
    pub name: String,
    /// Sprite key.
    pub character: String,
    /// Public description.
    pub description: String,
    /// Background story.
    pub identity: String,
    /// Initial plan.
    pub plan: String,
    /// Voice id for text-to-speech.
    #[serde(default)]
    pub voice: Option<String>,
    /// Whether the agent starts with the secret code.
    #[serde(default)]
    pub has_secret_code: bool,
}

/// Join a player and attach a new agent to it.
pub fn create(
    game: &mut Game<'_>,
    now: u64,
    new: NewAgent,
) -> Result<(AgentId, PlayerId), GameError> {
    let player_id = player::join(
        game,
        now,
        NewPlayer {
            name: new.name,
            character: new.character,
            description: new.description,
            human: None,
            voice: new.voice,
            has_secret_code: new.has_secret_code,
            reported_as_human: false,
        },
    )?;
    let agent_id = game.world.allocate_agent_id();
    game.world
        .agents
        .insert(agent_id, Agent::new(agent_id, player_id));
    game.descriptions.agents.insert(
        agent_id,
        AgentDescription {
            agent_id,
            identity: new.identity,
            plan: new.plan,
        },
    );
    game.effects.descriptions_changed = true;
    info!(agent_id = %agent_id, player_id = %player_id, "agent created");
    Ok((agent_id, player_id))
}

/// Dispatch an operation into an empty slot.
///
/// The operation is scheduled to run as soon as the step is saved. Fails
/// without side effects when the slot is occupied.
pub fn start_operation(
    game: &mut Game<'_>,
    agent_id: AgentId,
    slot: Slot,
    now: u64,
    args: OperationArgs,
) -> Result<OperationId, GameError> {
    let agent = game
        .world
        .agents
        .get(&agent_id)
        .ok_or(GameError::AgentNotFound(agent_id))?;
    if let Some(running) = agent.slot(slot) {
        return Err(GameError::OperationInProgress {
            agent_id,
            slot: slot.name(),
            name: running.name.to_string(),
        });
    }
    let player_id = agent.player_id;
    let name = args.kind();
    let operation_id = game.world.allocate_operation_id();
    if let Some(agent) = game.world.agents.get_mut(&agent_id) {
        *agent.slot_mut(slot) = Some(InProgress {
            name,
            operation_id,
            started: now,
        });
    }
    game.effects.schedule(
        0,
        ScheduledTask::Operation(Box::new(Operation {
            id: operation_id,
            agent_id,
            player_id,
            started: now,
            args,
        })),
    );
    info!(
        agent_id = %agent_id,
        operation_id = %operation_id,
        %name,
        slot = slot.name(),
        "starting operation"
    );
    Ok(operation_id)
}

fn dispatch(game: &mut Game<'_>, agent_id: AgentId, slot: Slot, now: u64, args: OperationArgs) {
    if let Err(error) = start_operation(game, agent_id, slot, now, args) {
        warn!(agent_id = %agent_id, %error, "failed to dispatch operation");
    }
}

/// Run every agent's decision logic once.
pub fn tick(game: &mut Game<'_>, now: u64) {
    let ids: Vec<AgentId> = game.world.agents.keys().copied().collect();
    for agent_id in ids {
        tick_agent(game, agent_id, now);
    }
}

fn tick_agent(game: &mut Game<'_>, agent_id: AgentId, now: u64) {
    let timeout = game.config.agent.action_timeout_ms;
    let Some(agent) = game.world.agents.get_mut(&agent_id) else {
        return;
    };
    let player_id = agent.player_id;

    let pending_slow = if agent.slot(Slot::Slow).is_some() {
        agent.expire(Slot::Slow, now, timeout);
        None
    } else if let Some(rejection) = agent.to_remember_rejection.take() {
        Some(OperationArgs::RememberRejection {
            conversation_id: rejection.conversation_id,
            other_player_id: rejection.other_player_id,
            rejected_by_self: false,
        })
    } else if let Some(conversation_id) = agent.to_remember.take() {
        Some(OperationArgs::RememberConversation { conversation_id })
    } else if agent.to_replan {
        agent.to_replan = false;
        Some(OperationArgs::ReflectAndUpdatePlan)
    } else {
        None
    };
    if let Some(args) = pending_slow {
        dispatch(game, agent_id, Slot::Slow, now, args);
        return;
    }

    if agent.slot(Slot::Fast).is_some() && !agent.expire(Slot::Fast, now, timeout) {
        return;
    }

    let cooldown = game.config.conversation.conversation_cooldown_ms;
    let recently_attempted_invite = agent
        .last_invite_attempt
        .is_some_and(|t| now < t.saturating_add(cooldown));
    let conversation_id = game.world.player_conversation_id(player_id);
    let Some(player) = game.world.players.get_mut(&player_id) else {
        warn!(agent_id = %agent_id, player_id = %player_id, "agent without a player");
        return;
    };
    let pathfinding = player.pathfinding.is_some();
    let mut doing_activity = player.is_doing_activity(now);
    if doing_activity
        && (conversation_id.is_some() || pathfinding)
        && let Some(activity) = player.activity.as_mut()
    {
        activity.until = now;
        doing_activity = false;
    }

    if conversation_id.is_none() && !doing_activity && (!pathfinding || !recently_attempted_invite)
    {
        let player = player.clone();
        let Some(agent) = game.world.agents.get(&agent_id).cloned() else {
            return;
        };
        let args = DoSomethingArgs {
            player,
            agent,
            other_free_players: game.world.free_players_except(player_id),
        };
        dispatch(
            game,
            agent_id,
            Slot::Fast,
            now,
            OperationArgs::DoSomething(Box::new(args)),
        );
        return;
    }

    if let Some(conversation_id) = conversation_id {
        tick_conversation(game, agent_id, player_id, conversation_id, now);
    }
}

fn tick_conversation(
    game: &mut Game<'_>,
    agent_id: AgentId,
    player_id: PlayerId,
    conversation_id: ConversationId,
    now: u64,
) {
    let Some(conversation) = game.world.conversations.get(&conversation_id) else {
        return;
    };
    let Ok(member) = conversation.member(player_id).copied() else {
        return;
    };
    let Some(other_id) = conversation.other_participant(player_id) else {
        return;
    };
    let creator = conversation.creator;
    let (Some(me), Some(other)) = (
        game.world.players.get(&player_id),
        game.world.players.get(&other_id),
    ) else {
        return;
    };
    let settings = &game.config.conversation;
    let invite_expired = member.invited.saturating_add(settings.invite_timeout_ms) < now;

    match member.status {
        MemberStatus::Invited => {
            if creator == player_id {
                if invite_expired {
                    info!(
                        agent_id = %agent_id,
                        conversation_id = %conversation_id,
                        "invite went unanswered"
                    );
                    leave_quietly(game, now, player_id, conversation_id);
                }
                return;
            }
            let accept = other.is_human()
                || game.rng.random::<f64>() < settings.invite_accept_probability;
            if accept {
                if let Err(error) = conversation::accept_invite(game, player_id, conversation_id) {
                    debug!(agent_id = %agent_id, %error, "accept failed");
                }
                return;
            }
            if let Err(error) = conversation::reject_invite(game, now, player_id, conversation_id) {
                debug!(agent_id = %agent_id, %error, "reject failed");
                return;
            }
            dispatch(
                game,
                agent_id,
                Slot::Fast,
                now,
                OperationArgs::RememberRejection {
                    conversation_id,
                    other_player_id: other_id,
                    rejected_by_self: true,
                },
            );
        }
        MemberStatus::WalkingOver => {
            if invite_expired {
                info!(
                    agent_id = %agent_id,
                    conversation_id = %conversation_id,
                    "gave up walking over"
                );
                leave_quietly(game, now, player_id, conversation_id);
                return;
            }
            let gap = distance(me.position, other.position);
            if gap < settings.conversation_distance || me.pathfinding.is_some() {
                return;
            }
            let destination: Point = if gap < settings.midpoint_threshold {
                other.position.floor()
            } else {
                midpoint(me.position, other.position).floor()
            };
            if let Err(error) = player::move_player(game, now, player_id, destination) {
                debug!(agent_id = %agent_id, %error, "cannot walk over");
            }
        }
        MemberStatus::Participating { started } => {
            if conversation.locked_by_other(player_id) {
                return;
            }
            let Some(last) = conversation.last_message else {
                let awkward =
                    started.saturating_add(settings.awkward_conversation_timeout_ms) < now;
                if creator == player_id || awkward {
                    send_message(
                        game,
                        agent_id,
                        player_id,
                        other_id,
                        conversation_id,
                        now,
                        MessageKind::Start,
                    );
                }
                return;
            };
            let too_long = started.saturating_add(settings.max_conversation_duration_ms) < now;
            if too_long || conversation.num_messages > settings.max_conversation_messages {
                send_message(
                    game,
                    agent_id,
                    player_id,
                    other_id,
                    conversation_id,
                    now,
                    MessageKind::Leave,
                );
                return;
            }
            if last.author == player_id
                && now < last.timestamp.saturating_add(settings.awkward_conversation_timeout_ms)
            {
                return;
            }
            if now < last.timestamp.saturating_add(settings.message_cooldown_ms) {
                return;
            }
            send_message(
                game,
                agent_id,
                player_id,
                other_id,
                conversation_id,
                now,
                MessageKind::Continue,
            );
        }
    }
}

fn leave_quietly(
    game: &mut Game<'_>,
    now: u64,
    player_id: PlayerId,
    conversation_id: ConversationId,
) {
    if let Err(error) = conversation::leave(game, now, player_id, conversation_id) {
        debug!(player_id = %player_id, %error, "leave failed");
    }
}

/// Take the typing lock and dispatch message generation.
fn send_message(
    game: &mut Game<'_>,
    agent_id: AgentId,
    player_id: PlayerId,
    other_player_id: PlayerId,
    conversation_id: ConversationId,
    now: u64,
    message_kind: MessageKind,
) {
    let message_id = match conversation::start_typing(game, now, player_id, conversation_id) {
        Ok(id) => id,
        Err(error) => {
            debug!(agent_id = %agent_id, %error, "cannot start typing");
            return;
        }
    };
    let has_code = |id: PlayerId| {
        game.world
            .players
            .get(&id)
            .is_some_and(|p| p.has_secret_code)
    };
    let speaker_has_code = has_code(player_id);
    let listener_has_code = has_code(other_player_id);
    dispatch(
        game,
        agent_id,
        Slot::Fast,
        now,
        OperationArgs::GenerateMessage {
            conversation_id,
            other_player_id,
            message_id,
            message_kind,
            speaker_has_code,
            listener_has_code,
        },
    );
}
