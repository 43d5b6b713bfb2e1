//! Inputs: the only way anything outside a step changes the world.
//!
//! Humans, operators and finished operations all submit an [`Input`]. The
//! engine applies inputs in submission order; each one either succeeds
//! with an [`InputValue`] or fails with a [`GameError`] recorded in its
//! result, without affecting the rest of the step.
//!
//! Finish inputs carry the correlation id of the operation that produced
//! them. A finish input whose id no longer matches the agent's in-flight
//! marker is discarded.

use nexus_types::{
    Activity, AgentAction, AgentId, ConversationId, GameEvent, MessageId, OperationId, PlayerId,
    Point,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{self, NewAgent, Slot};
use crate::conversation;
use crate::error::GameError;
use crate::game::Game;
use crate::player::{self, NewPlayer};
use crate::rules;

/// A named command with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "name",
    content = "args",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Input {
    /// A human joins.
    Join(NewPlayer),
    /// A player leaves the world.
    Leave {
        /// The leaving player.
        player_id: PlayerId,
    },
    /// Walk somewhere, or stop when `destination` is absent.
    MoveTo {
        /// The walker.
        player_id: PlayerId,
        /// Target tile.
        destination: Option<Point>,
    },
    /// Create an agent-driven player.
    CreateAgent(NewAgent),
    /// Invite another player.
    StartConversation {
        /// The inviter.
        player_id: PlayerId,
        /// The invitee.
        invitee: PlayerId,
    },
    /// Accept a pending invite.
    AcceptInvite {
        /// The invitee.
        player_id: PlayerId,
        /// The conversation.
        conversation_id: ConversationId,
    },
    /// Reject a pending invite.
    RejectInvite {
        /// The invitee.
        player_id: PlayerId,
        /// The conversation.
        conversation_id: ConversationId,
    },
    /// Leave a conversation.
    LeaveConversation {
        /// The leaving member.
        player_id: PlayerId,
        /// The conversation.
        conversation_id: ConversationId,
    },
    /// Take the typing lock.
    StartTyping {
        /// The typist.
        player_id: PlayerId,
        /// The conversation.
        conversation_id: ConversationId,
    },
    /// Post the message a human was typing.
    FinishSendingMessage {
        /// The author.
        player_id: PlayerId,
        /// The conversation.
        conversation_id: ConversationId,
        /// Id returned by `startTyping`.
        message_id: MessageId,
        /// Message body.
        text: String,
    },
    /// Set whether a player holds the secret code.
    UpdateSecretCode {
        /// The player.
        player_id: PlayerId,
        /// New value.
        has_secret_code: bool,
    },
    /// Set whether a player is marked as reported.
    UpdateReportedAsHuman {
        /// The player.
        player_id: PlayerId,
        /// New value.
        reported_as_human: bool,
    },
    /// Report a player as human.
    ReportPlayer {
        /// The reported player.
        player_id: PlayerId,
    },
    /// A viewer is watching.
    Heartbeat,
    /// Result of `doSomething`.
    FinishDoSomething {
        /// The agent.
        agent_id: AgentId,
        /// Correlation id.
        operation_id: OperationId,
        /// Where to wander.
        destination: Option<Point>,
        /// Activity to start.
        activity: Option<Activity>,
        /// Player to invite.
        invitee: Option<PlayerId>,
        /// Whether an invite search ran.
        #[serde(default)]
        attempted_invite: bool,
    },
    /// Result of `generateMessage`.
    AgentFinishSendingMessage {
        /// The agent.
        agent_id: AgentId,
        /// Correlation id.
        operation_id: OperationId,
        /// The conversation.
        conversation_id: ConversationId,
        /// Typing-lock id the message releases.
        message_id: MessageId,
        /// Generated text; absent when generation failed.
        text: Option<String>,
        /// Whether the agent leaves after this message.
        #[serde(default)]
        leave: bool,
        /// Game action taken alongside the message.
        action: Option<AgentAction>,
    },
    /// Result of `rememberConversation`.
    FinishRememberConversation {
        /// The agent.
        agent_id: AgentId,
        /// Correlation id.
        operation_id: OperationId,
    },
    /// Result of `rememberRejection`.
    FinishRememberRejection {
        /// The agent.
        agent_id: AgentId,
        /// Correlation id.
        operation_id: OperationId,
    },
    /// Result of `reflectAndUpdatePlan`.
    FinishReflectAndUpdatePlan {
        /// The agent.
        agent_id: AgentId,
        /// Correlation id.
        operation_id: OperationId,
        /// Rewritten plan, if any.
        plan: Option<String>,
    },
}

impl Input {
    /// Command name, as serialized.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Leave { .. } => "leave",
            Self::MoveTo { .. } => "moveTo",
            Self::CreateAgent(_) => "createAgent",
            Self::StartConversation { .. } => "startConversation",
            Self::AcceptInvite { .. } => "acceptInvite",
            Self::RejectInvite { .. } => "rejectInvite",
            Self::LeaveConversation { .. } => "leaveConversation",
            Self::StartTyping { .. } => "startTyping",
            Self::FinishSendingMessage { .. } => "finishSendingMessage",
            Self::UpdateSecretCode { .. } => "updateSecretCode",
            Self::UpdateReportedAsHuman { .. } => "updateReportedAsHuman",
            Self::ReportPlayer { .. } => "reportPlayer",
            Self::Heartbeat => "heartbeat",
            Self::FinishDoSomething { .. } => "finishDoSomething",
            Self::AgentFinishSendingMessage { .. } => "agentFinishSendingMessage",
            Self::FinishRememberConversation { .. } => "finishRememberConversation",
            Self::FinishRememberRejection { .. } => "finishRememberRejection",
            Self::FinishReflectAndUpdatePlan { .. } => "finishReflectAndUpdatePlan",
        }
    }
}

/// Success value of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InputValue {
    /// Nothing to return.
    Empty,
    /// A new player.
    Player {
        /// Its id.
        player_id: PlayerId,
    },
    /// A new agent and its player.
    Agent {
        /// Agent id.
        agent_id: AgentId,
        /// Player id.
        player_id: PlayerId,
    },
    /// A new conversation.
    Conversation {
        /// Its id.
        conversation_id: ConversationId,
    },
    /// A reserved message id.
    Message {
        /// Its id.
        message_id: MessageId,
    },
}

fn touch(game: &mut Game<'_>, player_id: PlayerId, now: u64) -> Result<(), GameError> {
    let player = game
        .world
        .players
        .get_mut(&player_id)
        .ok_or(GameError::PlayerNotFound(player_id))?;
    player.last_input = now;
    Ok(())
}

/// Apply one input to the world.
pub fn apply(game: &mut Game<'_>, now: u64, input: Input) -> Result<InputValue, GameError> {
    match input {
        Input::Join(new) => {
            let player_id = player::join(game, now, new)?;
            Ok(InputValue::Player { player_id })
        }
        Input::Leave { player_id } => {
            player::leave(game, now, player_id)?;
            Ok(InputValue::Empty)
        }
        Input::MoveTo {
            player_id,
            destination,
        } => {
            touch(game, player_id, now)?;
            match destination {
                Some(destination) => player::move_player(game, now, player_id, destination)?,
                None => {
                    if let Some(player) = game.world.players.get_mut(&player_id) {
                        player.stop();
                    }
                }
            }
            Ok(InputValue::Empty)
        }
        Input::CreateAgent(new) => {
            let (agent_id, player_id) = agent::create(game, now, new)?;
            Ok(InputValue::Agent {
                agent_id,
                player_id,
            })
        }
        Input::StartConversation { player_id, invitee } => {
            touch(game, player_id, now)?;
            let conversation_id = conversation::start(game, now, player_id, invitee)?;
            Ok(InputValue::Conversation { conversation_id })
        }
        Input::AcceptInvite {
            player_id,
            conversation_id,
        } => {
            touch(game, player_id, now)?;
            conversation::accept_invite(game, player_id, conversation_id)?;
            Ok(InputValue::Empty)
        }
        Input::RejectInvite {
            player_id,
            conversation_id,
        } => {
            touch(game, player_id, now)?;
            conversation::reject_invite(game, now, player_id, conversation_id)?;
            Ok(InputValue::Empty)
        }
        Input::LeaveConversation {
            player_id,
            conversation_id,
        } => {
            touch(game, player_id, now)?;
            conversation::leave(game, now, player_id, conversation_id)?;
            Ok(InputValue::Empty)
        }
        Input::StartTyping {
            player_id,
            conversation_id,
        } => {
            touch(game, player_id, now)?;
            let message_id = conversation::start_typing(game, now, player_id, conversation_id)?;
            Ok(InputValue::Message { message_id })
        }
        Input::FinishSendingMessage {
            player_id,
            conversation_id,
            message_id,
            text,
        } => {
            touch(game, player_id, now)?;
            conversation::post_message(game, now, player_id, conversation_id, message_id, text)?;
            Ok(InputValue::Empty)
        }
        Input::UpdateSecretCode {
            player_id,
            has_secret_code,
        } => {
            let player = game
                .world
                .players
                .get_mut(&player_id)
                .ok_or(GameError::PlayerNotFound(player_id))?;
            player.has_secret_code = has_secret_code;
            Ok(InputValue::Empty)
        }
        Input::UpdateReportedAsHuman {
            player_id,
            reported_as_human,
        } => {
            let player = game
                .world
                .players
                .get_mut(&player_id)
                .ok_or(GameError::PlayerNotFound(player_id))?;
            player.reported_as_human = reported_as_human;
            Ok(InputValue::Empty)
        }
        Input::ReportPlayer { player_id } => {
            rules::report_player(game, now, player_id)?;
            Ok(InputValue::Empty)
        }
        Input::Heartbeat => {
            game.world.last_viewed = now;
            Ok(InputValue::Empty)
        }
        Input::FinishDoSomething {
            agent_id,
            operation_id,
            destination,
            activity,
            invitee,
            attempted_invite,
        } => {
            let Some(player_id) = reconcile(game, agent_id, operation_id, &[Slot::Fast]) else {
                return Ok(InputValue::Empty);
            };
            if attempted_invite && let Some(agent) = game.world.agents.get_mut(&agent_id) {
                agent.last_invite_attempt = Some(now);
            }
            if let Some(destination) = destination
                && let Err(error) = player::move_player(game, now, player_id, destination)
            {
                debug!(agent_id = %agent_id, %error, "wander rejected");
            }
            if let Some(activity) = activity
                && let Some(player) = game.world.players.get_mut(&player_id)
            {
                player.activity = Some(activity);
            }
            if let Some(invitee) = invitee
                && let Err(error) = conversation::start(game, now, player_id, invitee)
            {
                debug!(agent_id = %agent_id, invitee = %invitee, %error, "invite failed");
            }
            Ok(InputValue::Empty)
        }
        Input::AgentFinishSendingMessage {
            agent_id,
            operation_id,
            conversation_id,
            message_id,
            text,
            leave,
            action,
        } => {
            let Some(player_id) = reconcile(game, agent_id, operation_id, &[Slot::Fast]) else {
                return Ok(InputValue::Empty);
            };
            finish_agent_message(
                game,
                now,
                player_id,
                conversation_id,
                message_id,
                text,
                leave,
                action,
            );
            Ok(InputValue::Empty)
        }
        Input::FinishRememberConversation {
            agent_id,
            operation_id,
        } => {
            if reconcile(game, agent_id, operation_id, &[Slot::Slow]).is_some()
                && let Some(agent) = game.world.agents.get_mut(&agent_id)
            {
                agent.to_replan = true;
            }
            Ok(InputValue::Empty)
        }
        Input::FinishRememberRejection {
            agent_id,
            operation_id,
        } => {
            reconcile(game, agent_id, operation_id, &[Slot::Slow, Slot::Fast]);
            Ok(InputValue::Empty)
        }
        Input::FinishReflectAndUpdatePlan {
            agent_id,
            operation_id,
            plan,
        } => {
            if reconcile(game, agent_id, operation_id, &[Slot::Slow]).is_some()
                && let Some(plan) = plan
                && let Some(description) = game.descriptions.agents.get_mut(&agent_id)
            {
                description.plan = plan;
                game.effects.descriptions_changed = true;
            }
            Ok(InputValue::Empty)
        }
    }
}

/// Clear the first of `slots` holding `operation_id` and return the
/// agent's player, or `None` when the completion is stale.
fn reconcile(
    game: &mut Game<'_>,
    agent_id: AgentId,
    operation_id: OperationId,
    slots: &[Slot],
) -> Option<PlayerId> {
    let Some(agent) = game.world.agents.get_mut(&agent_id) else {
        debug!(agent_id = %agent_id, operation_id = %operation_id, "completion for missing agent");
        return None;
    };
    if slots.iter().any(|slot| agent.finish(*slot, operation_id)) {
        return Some(agent.player_id);
    }
    debug!(agent_id = %agent_id, operation_id = %operation_id, "discarding stale completion");
    None
}

#[allow(clippy::too_many_arguments)]
fn finish_agent_message(
    game: &mut Game<'_>,
    now: u64,
    player_id: PlayerId,
    conversation_id: ConversationId,
    message_id: MessageId,
    text: Option<String>,
    leave: bool,
    action: Option<AgentAction>,
) {
    let other = game
        .world
        .conversations
        .get(&conversation_id)
        .and_then(|c| c.other_participant(player_id));
    match text {
        Some(text) => {
            if let Err(error) =
                conversation::post_message(game, now, player_id, conversation_id, message_id, text)
            {
                debug!(player_id = %player_id, %error, "agent message rejected");
            }
        }
        None => conversation::release_typing(game, conversation_id, message_id),
    }
    if leave && let Err(error) = conversation::leave(game, now, player_id, conversation_id) {
        debug!(player_id = %player_id, %error, "agent leave failed");
    }
    let (Some(action), Some(other)) = (action, other) else {
        return;
    };
    let result = match action {
        AgentAction::ShareSecretCode => {
            let has_code = game
                .world
                .players
                .get(&player_id)
                .is_some_and(|p| p.has_secret_code);
            if !has_code {
                debug!(player_id = %player_id, "cannot share a code it does not hold");
                return;
            }
            rules::share_secret_code(game, player_id, other, Some(conversation_id))
        }
        AgentAction::ReportHuman => {
            rules::remember_event(
                game,
                player_id,
                other,
                GameEvent::AgentReported,
                Some(conversation_id),
            );
            rules::report_player(game, now, other)
        }
    };
    if let Err(error) = result {
        debug!(player_id = %player_id, action = action.function_name(), %error, "action failed");
    }
}
