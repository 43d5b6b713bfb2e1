//! Conversations between exactly two players.
//!
//! Members move `invited -> walkingOver -> participating` and the
//! conversation ends from any state. A single typing lock serializes
//! message production: only its holder may post, and posting the message
//! whose id matches the lock releases it.

use std::collections::BTreeMap;

use nexus_types::{
    ArchivedConversation, ConversationId, Message, MessageId, ParticipatedTogether, PlayerId,
};
use nexus_world::distance;
use nexus_world::geometry::direction;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::RejectedInvite;
use crate::error::GameError;
use crate::game::Game;
use crate::operation::{Propagation, ScheduledTask};

/// Where a member is in the conversation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MemberStatus {
    /// Invite sent, not yet accepted.
    Invited,
    /// Accepted; walking toward the other member.
    WalkingOver,
    /// Close enough to talk.
    Participating {
        /// When talking became possible.
        started: u64,
    },
}

impl MemberStatus {
    /// Status name for errors and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Invited => "invited",
            Self::WalkingOver => "walkingOver",
            Self::Participating { .. } => "participating",
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Invited => 0,
            Self::WalkingOver => 1,
            Self::Participating { .. } => 2,
        }
    }
}

/// One side of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// The member.
    pub player_id: PlayerId,
    /// When the invite was sent.
    pub invited: u64,
    /// Lifecycle status.
    pub status: MemberStatus,
}

/// The typing lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingLock {
    /// Holder of the lock.
    pub player_id: PlayerId,
    /// Message the holder is producing.
    pub message_id: MessageId,
    /// When the lock was taken.
    pub since: u64,
}

/// Author and time of the latest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    /// Author.
    pub author: PlayerId,
    /// Post time.
    pub timestamp: u64,
}

/// A live conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Game id.
    pub id: ConversationId,
    /// Who sent the invite.
    pub creator: PlayerId,
    /// When the invite was sent.
    pub created: u64,
    /// Current typing lock.
    pub is_typing: Option<TypingLock>,
    /// Latest message, if any.
    pub last_message: Option<LastMessage>,
    /// Messages posted so far.
    pub num_messages: u32,
    /// Exactly two members.
    pub participants: BTreeMap<PlayerId, Member>,
    /// Players in earshot when the invite was sent.
    pub eavesdroppers: Vec<PlayerId>,
}

impl Conversation {
    /// The member other than `player_id`.
    pub fn other_participant(&self, player_id: PlayerId) -> Option<PlayerId> {
        self.participants
            .keys()
            .copied()
            .find(|id| *id != player_id)
    }

    /// Membership record of `player_id`.
    pub fn member(&self, player_id: PlayerId) -> Result<&Member, GameError> {
        self.participants
            .get(&player_id)
            .ok_or(GameError::NotInConversation {
                player_id,
                conversation_id: self.id,
            })
    }

    /// Advance a member by exactly one lifecycle state.
    pub fn transition(&mut self, player_id: PlayerId, to: MemberStatus) -> Result<(), GameError> {
        let conversation_id = self.id;
        let member = self
            .participants
            .get_mut(&player_id)
            .ok_or(GameError::NotInConversation {
                player_id,
                conversation_id,
            })?;
        if to.rank() != member.status.rank().saturating_add(1) {
            return Err(GameError::InvalidTransition {
                player_id,
                from: member.status.name(),
                to: to.name(),
            });
        }
        member.status = to;
        Ok(())
    }

    /// Take the typing lock for `message_id`.
    ///
    /// Fails when someone else holds it. Re-taking one's own lock replaces
    /// the pending message id.
    pub fn set_typing(
        &mut self,
        player_id: PlayerId,
        message_id: MessageId,
        now: u64,
    ) -> Result<(), GameError> {
        self.member(player_id)?;
        if let Some(lock) = self.is_typing
            && lock.player_id != player_id
        {
            return Err(GameError::TypingLocked {
                conversation_id: self.id,
                holder: lock.player_id,
            });
        }
        self.is_typing = Some(TypingLock {
            player_id,
            message_id,
            since: now,
        });
        Ok(())
    }

    /// Whether `player_id` must wait for another member's message.
    pub fn locked_by_other(&self, player_id: PlayerId) -> bool {
        self.is_typing.is_some_and(|lock| lock.player_id != player_id)
    }

    fn record_message(&mut self, author: PlayerId, message_id: MessageId, timestamp: u64) {
        if self
            .is_typing
            .is_some_and(|lock| lock.message_id == message_id)
        {
            self.is_typing = None;
        }
        self.last_message = Some(LastMessage { author, timestamp });
        self.num_messages = self.num_messages.saturating_add(1);
    }

    /// Read-only record of this conversation ending at `ended`.
    pub fn archive(&self, ended: u64) -> ArchivedConversation {
        ArchivedConversation {
            id: self.id,
            creator: self.creator,
            created: self.created,
            ended,
            participants: self.participants.keys().copied().collect(),
            num_messages: self.num_messages,
        }
    }
}

fn ensure_free(game: &Game<'_>, player_id: PlayerId) -> Result<(), GameError> {
    if !game.world.players.contains_key(&player_id) {
        return Err(GameError::PlayerNotFound(player_id));
    }
    if let Some(conversation_id) = game.world.player_conversation_id(player_id) {
        return Err(GameError::AlreadyInConversation {
            player_id,
            conversation_id,
        });
    }
    Ok(())
}

/// Invite `invitee` into a new conversation with `inviter`.
///
/// Players within the eavesdrop radius of either member at this moment
/// become eavesdroppers.
pub fn start(
    game: &mut Game<'_>,
    now: u64,
    inviter: PlayerId,
    invitee: PlayerId,
) -> Result<ConversationId, GameError> {
    if inviter == invitee {
        return Err(GameError::SelfInvite(inviter));
    }
    ensure_free(game, inviter)?;
    ensure_free(game, invitee)?;

    let radius = game.config.conversation.eavesdrop_radius;
    let positions: Vec<_> = [inviter, invitee]
        .iter()
        .filter_map(|id| game.world.players.get(id))
        .map(|p| p.position)
        .collect();
    let eavesdroppers: Vec<PlayerId> = game
        .world
        .players
        .values()
        .filter(|p| p.id != inviter && p.id != invitee)
        .filter(|p| positions.iter().any(|m| distance(*m, p.position) <= radius))
        .map(|p| p.id)
        .collect();

    let conversation_id = game.world.allocate_conversation_id();
    let participants = [inviter, invitee]
        .into_iter()
        .map(|player_id| {
            (
                player_id,
                Member {
                    player_id,
                    invited: now,
                    status: MemberStatus::Invited,
                },
            )
        })
        .collect();
    game.world.conversations.insert(
        conversation_id,
        Conversation {
            id: conversation_id,
            creator: inviter,
            created: now,
            is_typing: None,
            last_message: None,
            num_messages: 0,
            participants,
            eavesdroppers,
        },
    );
    info!(
        conversation_id = %conversation_id,
        inviter = %inviter,
        invitee = %invitee,
        "conversation started"
    );
    Ok(conversation_id)
}

fn live_conversation<'g>(
    game: &'g mut Game<'_>,
    conversation_id: ConversationId,
) -> Result<&'g mut Conversation, GameError> {
    game.world
        .conversations
        .get_mut(&conversation_id)
        .ok_or(GameError::ConversationNotFound(conversation_id))
}

fn ensure_invitee(conversation: &Conversation, player_id: PlayerId) -> Result<(), GameError> {
    let member = conversation.member(player_id)?;
    if member.status != MemberStatus::Invited || conversation.creator == player_id {
        return Err(GameError::InvalidTransition {
            player_id,
            from: member.status.name(),
            to: MemberStatus::WalkingOver.name(),
        });
    }
    Ok(())
}

/// Accept an invite: both members start walking and drop their current
/// movement so they can re-route toward each other.
pub fn accept_invite(
    game: &mut Game<'_>,
    player_id: PlayerId,
    conversation_id: ConversationId,
) -> Result<(), GameError> {
    let conversation = live_conversation(game, conversation_id)?;
    ensure_invitee(conversation, player_id)?;
    let members: Vec<PlayerId> = conversation.participants.keys().copied().collect();
    for member in &members {
        conversation.transition(*member, MemberStatus::WalkingOver)?;
    }
    for member in &members {
        if let Some(player) = game.world.players.get_mut(member) {
            player.stop();
        }
    }
    info!(conversation_id = %conversation_id, player_id = %player_id, "invite accepted");
    Ok(())
}

/// Turn down an invite, ending the conversation.
///
/// The inviter's agent, if any, is asked to remember the rejection.
pub fn reject_invite(
    game: &mut Game<'_>,
    now: u64,
    player_id: PlayerId,
    conversation_id: ConversationId,
) -> Result<(), GameError> {
    let conversation = live_conversation(game, conversation_id)?;
    ensure_invitee(conversation, player_id)?;
    let inviter = conversation.creator;
    if let Some(agent) = game
        .world
        .agents
        .values_mut()
        .find(|a| a.player_id == inviter)
    {
        agent.to_remember_rejection = Some(RejectedInvite {
            conversation_id,
            other_player_id: player_id,
        });
    }
    info!(conversation_id = %conversation_id, player_id = %player_id, "invite rejected");
    stop(game, now, conversation_id);
    Ok(())
}

/// Leave a conversation in any state, ending it for both members.
pub fn leave(
    game: &mut Game<'_>,
    now: u64,
    player_id: PlayerId,
    conversation_id: ConversationId,
) -> Result<(), GameError> {
    live_conversation(game, conversation_id)?.member(player_id)?;
    info!(conversation_id = %conversation_id, player_id = %player_id, "leaving conversation");
    stop(game, now, conversation_id);
    Ok(())
}

/// End a conversation: archive it, record who talked to whom, and flag
/// the members' agents.
///
/// Agents whose conversation carried messages are asked to remember it.
/// Every agent records when it last talked, for the re-invite cooldown.
pub fn stop(game: &mut Game<'_>, now: u64, conversation_id: ConversationId) {
    let Some(conversation) = game.world.conversations.remove(&conversation_id) else {
        debug!(conversation_id = %conversation_id, "conversation already ended");
        return;
    };
    let members: Vec<PlayerId> = conversation.participants.keys().copied().collect();
    for player_id in &members {
        if let Some(other) = conversation.other_participant(*player_id) {
            game.effects.participated.push(ParticipatedTogether {
                conversation_id,
                player1: *player_id,
                player2: other,
                ended: now,
            });
        }
        if let Some(agent) = game
            .world
            .agents
            .values_mut()
            .find(|a| a.player_id == *player_id)
        {
            agent.last_conversation = Some(now);
            if conversation.num_messages > 0 {
                agent.to_remember = Some(conversation_id);
            }
        }
    }
    game.effects.archived.push(conversation.archive(now));
    info!(
        conversation_id = %conversation_id,
        num_messages = conversation.num_messages,
        "conversation ended"
    );
}

/// Take the typing lock for a new message and return its id.
pub fn start_typing(
    game: &mut Game<'_>,
    now: u64,
    player_id: PlayerId,
    conversation_id: ConversationId,
) -> Result<MessageId, GameError> {
    let conversation = live_conversation(game, conversation_id)?;
    conversation.member(player_id)?;
    if let Some(lock) = conversation.is_typing
        && lock.player_id != player_id
    {
        return Err(GameError::TypingLocked {
            conversation_id,
            holder: lock.player_id,
        });
    }
    let message_id = game.world.allocate_message_id();
    live_conversation(game, conversation_id)?.set_typing(player_id, message_id, now)?;
    Ok(message_id)
}

/// Drop the typing lock if it still waits for `message_id`.
pub fn release_typing(game: &mut Game<'_>, conversation_id: ConversationId, message_id: MessageId) {
    if let Some(conversation) = game.world.conversations.get_mut(&conversation_id)
        && conversation
            .is_typing
            .is_some_and(|lock| lock.message_id == message_id)
    {
        conversation.is_typing = None;
    }
}

/// Post a message from a participating member.
///
/// The message releases the typing lock when its id matches the lock's.
/// Propagation to eavesdroppers and human listeners is scheduled
/// immediately.
pub fn post_message(
    game: &mut Game<'_>,
    now: u64,
    author: PlayerId,
    conversation_id: ConversationId,
    message_id: MessageId,
    text: String,
) -> Result<Message, GameError> {
    let conversation = live_conversation(game, conversation_id)?;
    let member = conversation.member(author)?;
    if !matches!(member.status, MemberStatus::Participating { .. }) {
        return Err(GameError::InvalidTransition {
            player_id: author,
            from: member.status.name(),
            to: "posting",
        });
    }
    if let Some(lock) = conversation.is_typing
        && lock.player_id != author
    {
        return Err(GameError::TypingLocked {
            conversation_id,
            holder: lock.player_id,
        });
    }
    conversation.record_message(author, message_id, now);
    let listener = conversation.other_participant(author);
    let eavesdroppers = conversation.eavesdroppers.clone();

    let message = Message {
        id: message_id,
        conversation_id,
        author,
        text,
        timestamp: now,
        eavesdroppers: eavesdroppers.clone(),
        audio: None,
    };
    let listener_is_human = listener
        .and_then(|id| game.world.players.get(&id))
        .is_some_and(|p| p.is_human());
    let overhearing = eavesdroppers
        .iter()
        .copied()
        .filter(|id| game.world.agent_for_player(*id).is_some())
        .collect();
    let human_eavesdroppers = eavesdroppers
        .iter()
        .filter_map(|id| game.world.players.get(id))
        .filter_map(|p| p.human.clone())
        .collect();
    let voice = game
        .descriptions
        .players
        .get(&author)
        .and_then(|d| d.voice.clone());
    game.effects.messages.push(message.clone());
    game.effects.schedule(
        0,
        ScheduledTask::Propagate(Box::new(Propagation {
            message: message.clone(),
            listener,
            listener_is_human,
            overhearing,
            human_eavesdroppers,
            voice,
        })),
    );
    debug!(
        conversation_id = %conversation_id,
        author = %author,
        message_id = %message_id,
        "message posted"
    );
    Ok(message)
}

/// Per-tick conversation update: expire stale typing locks and start
/// talking once both walking members are close enough.
pub fn tick(game: &mut Game<'_>, now: u64) {
    let typing_timeout = game.config.conversation.typing_timeout_ms;
    let conversation_distance = game.config.conversation.conversation_distance;
    let ids: Vec<ConversationId> = game.world.conversations.keys().copied().collect();
    for conversation_id in ids {
        let Some(conversation) = game.world.conversations.get_mut(&conversation_id) else {
            continue;
        };
        if let Some(lock) = conversation.is_typing
            && lock.since.saturating_add(typing_timeout) < now
        {
            debug!(
                conversation_id = %conversation_id,
                player_id = %lock.player_id,
                "typing lock expired"
            );
            conversation.is_typing = None;
        }

        let members: Vec<Member> = conversation.participants.values().copied().collect();
        let [first, second] = members.as_slice() else {
            continue;
        };
        if first.status != MemberStatus::WalkingOver || second.status != MemberStatus::WalkingOver
        {
            continue;
        }
        let (Some(a), Some(b)) = (
            game.world.players.get(&first.player_id),
            game.world.players.get(&second.player_id),
        ) else {
            continue;
        };
        let (a_position, b_position) = (a.position, b.position);
        if distance(a_position, b_position) >= conversation_distance {
            continue;
        }
        let status = MemberStatus::Participating { started: now };
        if let Err(error) = conversation
            .transition(first.player_id, status)
            .and_then(|()| conversation.transition(second.player_id, status))
        {
            debug!(conversation_id = %conversation_id, %error, "cannot start talking");
            continue;
        }
        if let Some(player) = game.world.players.get_mut(&first.player_id) {
            player.stop();
            if let Some(facing) = direction(a_position, b_position) {
                player.facing = facing;
            }
        }
        if let Some(player) = game.world.players.get_mut(&second.player_id) {
            player.stop();
            if let Some(facing) = direction(b_position, a_position) {
                player.facing = facing;
            }
        }
        info!(conversation_id = %conversation_id, "members started talking");
    }
}
