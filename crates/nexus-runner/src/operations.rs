//! Agent operations: the out-of-band half of the agent protocol.
//!
//! The engine dispatches an [`Operation`] and never waits on it. The
//! runner does the slow work (recall, model calls, memory writes) and
//! answers with exactly one finish input echoing the operation id:
//! 1. `doSomething` decides between wandering, an activity and an invite
//! 2. `generateMessage` writes the next conversation line, optionally with
//!    a game action chosen through a function call
//! 3. `rememberConversation` summarizes a finished conversation and
//!    reflects once enough has happened
//! 4. `rememberRejection` records a turned-down invite
//! 5. `reflectAndUpdatePlan` reflects on recent memories and rewrites the
//!    plan
//!
//! An operation that fails or runs past its deadline still submits its
//! finish input with empty results, so the agent's slot is always
//! released.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use nexus_core::engine::Snapshot;
use nexus_core::error::EngineError;
use nexus_core::input::Input;
use nexus_core::operation::{
    DoSomethingArgs, EventMemory, Operation, OperationArgs, Propagation, decide_do_something,
};
use nexus_core::runner::{Engine, now_ms};
use nexus_core::scheduler::Scheduler;
use nexus_memory::reflection::numbered_statements;
use nexus_memory::{EVENT_IMPORTANCE, MemoryStore, NewMemory, parse_importance, resolve_insights};
use nexus_types::{
    AgentAction, AgentDescription, AgentId, ConversationId, EavesdropFeedEntry, GameEvent,
    MemoryData, MemoryKind, MessageId, MessageKind, PlayerDescription, PlayerId,
};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::embedding::Embedder;
use crate::error::RunnerError;
use crate::llm::{ChatMessage, ChatRequest, FunctionSpec, LlmBackend, Role};
use crate::parse::{clean_message, parse_function_call, parse_insights};
use crate::prompt::{
    ConversationContext, PromptEngine, ReflectContext, ReplanContext, SummaryContext, clock,
    stop_words,
};
use crate::tts::{AudioStore, SpeechClient};

/// Reply cap for conversation lines.
const MESSAGE_MAX_TOKENS: u32 = 300;

/// Reply cap for summaries, insights, reflections and plans.
const LONG_MAX_TOKENS: u32 = 500;

/// Importance answers are a single digit.
const IMPORTANCE_MAX_TOKENS: u32 = 1;

/// Default deadline of one operation.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of operations talking to the model at once.
const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Arguments of one `generateMessage` run.
#[derive(Debug, Clone, Copy)]
struct MessageTask {
    conversation_id: ConversationId,
    other_player_id: PlayerId,
    message_id: MessageId,
    kind: MessageKind,
    speaker_has_code: bool,
    listener_has_code: bool,
}

/// Runs agent operations against the engine, memory and model backends.
pub struct OperationRunner {
    engine: Arc<Engine>,
    scheduler: Arc<dyn Scheduler>,
    memory: Arc<MemoryStore>,
    llm: LlmBackend,
    embedder: Embedder,
    speech: Option<SpeechClient>,
    audio: AudioStore,
    prompts: PromptEngine,
    permits: Semaphore,
    timeout: Duration,
}

impl OperationRunner {
    /// Create a runner with the default deadline and concurrency and no
    /// speech synthesis.
    pub fn new(
        engine: Arc<Engine>,
        scheduler: Arc<dyn Scheduler>,
        memory: Arc<MemoryStore>,
        llm: LlmBackend,
        embedder: Embedder,
        prompts: PromptEngine,
    ) -> Self {
        Self {
            engine,
            scheduler,
            memory,
            llm,
            embedder,
            speech: None,
            audio: AudioStore::new(),
            prompts,
            permits: Semaphore::new(DEFAULT_MAX_CONCURRENT),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Synthesize speech for messages a human hears.
    pub fn with_speech(mut self, speech: SpeechClient) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Set the per-operation deadline and the number of concurrent
    /// operations.
    pub fn with_limits(mut self, operation_timeout: Duration, max_concurrent: usize) -> Self {
        self.timeout = operation_timeout;
        self.permits = Semaphore::new(max_concurrent.max(1));
        self
    }

    /// The engine operations report to.
    pub const fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// The memory store.
    pub const fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// The chat backend.
    pub const fn llm(&self) -> &LlmBackend {
        &self.llm
    }

    /// Synthesized clips.
    pub const fn audio(&self) -> &AudioStore {
        &self.audio
    }

    /// Run one operation and submit its finish input.
    ///
    /// Errors and deadline overruns are logged and answered with the
    /// operation's empty finish input.
    pub async fn run_operation(&self, op: Operation) {
        let Ok(_permit) = self.permits.acquire().await else {
            warn!(operation_id = %op.id, "operation permits closed, dropping operation");
            return;
        };
        let kind = op.args.kind();
        debug!(
            agent_id = %op.agent_id,
            operation_id = %op.id,
            operation = %kind,
            "operation started"
        );

        let input = match timeout(self.timeout, self.execute(&op)).await {
            Ok(Ok(input)) => input,
            Ok(Err(e)) => {
                error!(
                    agent_id = %op.agent_id,
                    operation_id = %op.id,
                    operation = %kind,
                    error = %e,
                    "operation failed, submitting empty result"
                );
                failure_input(&op)
            }
            Err(_) => {
                warn!(
                    agent_id = %op.agent_id,
                    operation_id = %op.id,
                    operation = %kind,
                    timeout_ms = self.timeout.as_millis(),
                    "operation deadline exceeded, submitting empty result"
                );
                failure_input(&op)
            }
        };
        self.submit(input);
    }

    fn submit(&self, input: Input) {
        let name = input.name();
        match self
            .engine
            .submit(input, now_ms(), self.scheduler.as_ref())
        {
            Ok(input_id) => debug!(input = name, %input_id, "finish input submitted"),
            Err(EngineError::NotRunning { status }) => {
                debug!(input = name, ?status, "world halted, finish input dropped");
            }
            Err(e) => error!(input = name, error = %e, "failed to submit finish input"),
        }
    }

    async fn execute(&self, op: &Operation) -> Result<Input, RunnerError> {
        let agent_id = op.agent_id;
        let operation_id = op.id;
        match &op.args {
            OperationArgs::DoSomething(args) => Ok(self.do_something(op, args)),
            OperationArgs::GenerateMessage {
                conversation_id,
                other_player_id,
                message_id,
                message_kind,
                speaker_has_code,
                listener_has_code,
            } => {
                let task = MessageTask {
                    conversation_id: *conversation_id,
                    other_player_id: *other_player_id,
                    message_id: *message_id,
                    kind: *message_kind,
                    speaker_has_code: *speaker_has_code,
                    listener_has_code: *listener_has_code,
                };
                self.generate_message(op, task).await
            }
            OperationArgs::RememberConversation { conversation_id } => {
                self.remember_conversation(op, *conversation_id).await?;
                Ok(Input::FinishRememberConversation {
                    agent_id,
                    operation_id,
                })
            }
            OperationArgs::RememberRejection {
                conversation_id,
                other_player_id,
                rejected_by_self,
            } => {
                let event = if *rejected_by_self {
                    GameEvent::InviteRejectedBySelf
                } else {
                    GameEvent::InviteRejectedByOther
                };
                self.remember_event(EventMemory {
                    player_id: op.player_id,
                    other_player_id: *other_player_id,
                    event,
                    conversation_id: Some(*conversation_id),
                })
                .await?;
                Ok(Input::FinishRememberRejection {
                    agent_id,
                    operation_id,
                })
            }
            OperationArgs::ReflectAndUpdatePlan => {
                let plan = self.reflect_and_update_plan(op).await?;
                Ok(Input::FinishReflectAndUpdatePlan {
                    agent_id,
                    operation_id,
                    plan,
                })
            }
        }
    }

    fn do_something(&self, op: &Operation, args: &DoSomethingArgs) -> Input {
        let store = self.engine.store();
        let decision = decide_do_something(
            args,
            self.engine.map(),
            self.engine.config(),
            now_ms(),
            |a, b| store.last_together(a, b).ok().flatten(),
            &mut rand::rng(),
        );
        debug!(
            agent_id = %op.agent_id,
            destination = ?decision.destination,
            activity = decision.activity.as_ref().map(|a| a.description.as_str()),
            invitee = ?decision.invitee,
            "decided what to do"
        );
        Input::FinishDoSomething {
            agent_id: op.agent_id,
            operation_id: op.id,
            destination: decision.destination,
            activity: decision.activity,
            invitee: decision.invitee,
            attempted_invite: decision.attempted_invite,
        }
    }

    async fn generate_message(
        &self,
        op: &Operation,
        task: MessageTask,
    ) -> Result<Input, RunnerError> {
        let store = self.engine.store();
        let snapshot = store.load()?;
        let now = now_ms();
        let speaker = player_description(&snapshot, op.player_id)?;
        let listener = player_description(&snapshot, task.other_player_id)?;
        let agent = agent_description(&snapshot, op.agent_id)?;
        let conversation = snapshot
            .world
            .conversations
            .get(&task.conversation_id)
            .ok_or_else(|| RunnerError::Missing(format!("conversation {}", task.conversation_id)))?;
        let other_identity = snapshot
            .world
            .agents
            .values()
            .find(|a| a.player_id == task.other_player_id)
            .and_then(|a| snapshot.descriptions.agents.get(&a.id))
            .map(|d| d.identity.clone());
        let last_chatted = match task.kind {
            MessageKind::Start => store
                .last_together(op.player_id, task.other_player_id)?
                .map(clock),
            MessageKind::Continue | MessageKind::Leave => None,
        };

        let query = format!("What do you think about {}?", listener.name);
        let embedding = self.embedder.embed(&query).await?;
        let memories = self.memory.search(
            op.player_id,
            &embedding,
            self.engine.config().agent.num_memories_to_search,
            now,
        )?;

        let ctx = ConversationContext {
            name: speaker.name.clone(),
            identity: agent.identity.clone(),
            plan: agent.plan.clone(),
            other_name: listener.name.clone(),
            other_identity,
            last_chatted,
            memories: memories.into_iter().map(|m| m.description).collect(),
            eavesdroppers: conversation
                .eavesdroppers
                .iter()
                .map(|id| snapshot.descriptions.name(*id))
                .collect(),
            both_certified: task.speaker_has_code && task.listener_has_code,
            started: clock(conversation.created),
            now: clock(now),
        };
        let mut messages = vec![ChatMessage::system(self.prompts.conversation(task.kind, &ctx)?)];
        match task.kind {
            MessageKind::Start => {}
            MessageKind::Continue | MessageKind::Leave => {
                for message in store.messages(task.conversation_id)? {
                    let role = if message.author == op.player_id {
                        Role::Assistant
                    } else {
                        Role::User
                    };
                    messages.push(ChatMessage {
                        role,
                        content: message.text,
                    });
                }
            }
        }
        let functions = if task.kind == MessageKind::Continue
            && task.speaker_has_code
            && !task.listener_has_code
        {
            game_functions()
        } else {
            Vec::new()
        };

        let request = ChatRequest {
            messages,
            max_tokens: MESSAGE_MAX_TOKENS,
            stop: stop_words(&listener.name, &speaker.name),
            functions,
        };
        let completion = self.llm.complete(call_type(task.kind), &request).await?;

        let mut text = completion.text;
        let mut action = None;
        if let Some(call) = &completion.function_call {
            match parse_function_call(call) {
                Ok(parsed) => {
                    action = Some(parsed.action);
                    if let Some(message) = parsed.message {
                        text = message;
                    }
                }
                Err(e) => warn!(
                    agent_id = %op.agent_id,
                    error = %e,
                    "ignoring function call"
                ),
            }
        }
        let text = clean_message(&text, &speaker.name);
        let text = (!text.is_empty()).then_some(text);

        info!(
            agent_id = %op.agent_id,
            conversation_id = %task.conversation_id,
            kind = %task.kind,
            action = action.map(AgentAction::function_name),
            empty = text.is_none(),
            "message generated"
        );
        Ok(Input::AgentFinishSendingMessage {
            agent_id: op.agent_id,
            operation_id: op.id,
            conversation_id: task.conversation_id,
            message_id: task.message_id,
            text,
            leave: task.kind == MessageKind::Leave,
            action,
        })
    }

    async fn remember_conversation(
        &self,
        op: &Operation,
        conversation_id: ConversationId,
    ) -> Result<(), RunnerError> {
        let store = self.engine.store();
        let snapshot = store.load()?;
        let archived = store
            .archived(conversation_id)?
            .ok_or_else(|| RunnerError::Missing(format!("archived {conversation_id}")))?;
        let other = archived
            .participants
            .iter()
            .copied()
            .find(|p| *p != op.player_id)
            .ok_or_else(|| RunnerError::Missing(format!("other member of {conversation_id}")))?;
        let messages = store.messages(conversation_id)?;
        let events = self
            .memory
            .events_in_conversation(op.player_id, conversation_id)?;
        if messages.is_empty() && events.is_empty() {
            debug!(
                agent_id = %op.agent_id,
                %conversation_id,
                "nothing said or done, skipping summary"
            );
            return Ok(());
        }

        let name = snapshot.descriptions.name(op.player_id);
        let other_name = snapshot.descriptions.name(other);
        let agent = agent_description(&snapshot, op.agent_id)?;
        let prompt = self.prompts.summarize(&SummaryContext {
            name: name.clone(),
            identity: agent.identity.clone(),
            plan: agent.plan.clone(),
            other_name: other_name.clone(),
            events: events.into_iter().map(|m| m.description).collect(),
        })?;

        let mut chat = vec![ChatMessage::user(prompt)];
        let mut authors = BTreeSet::new();
        if !messages.is_empty() {
            chat.push(ChatMessage::user("This is the conversation log:"));
            for message in &messages {
                authors.insert(message.author);
                let (from, to) = if message.author == op.player_id {
                    (&name, &other_name)
                } else {
                    (&other_name, &name)
                };
                chat.push(ChatMessage::user(format!("{from} to {to}: {}", message.text)));
            }
        }
        chat.push(ChatMessage::user("Summary:"));
        let summary = self
            .llm
            .complete(
                "rememberConversation",
                &ChatRequest {
                    messages: chat,
                    max_tokens: LONG_MAX_TOKENS,
                    ..ChatRequest::default()
                },
            )
            .await?;

        let description = format!(
            "Conversation with {other_name} at {}: {}",
            clock(archived.created),
            summary.text.trim()
        );
        let importance = self.importance(&description).await?;
        let embedding = self.embedder.embed(&description).await?;
        authors.remove(&op.player_id);
        let now = now_ms();
        let memory = self.memory.insert(
            NewMemory {
                player_id: op.player_id,
                description,
                importance,
                last_access: messages.last().map_or(now, |m| m.timestamp),
                data: MemoryData::Conversation {
                    conversation_id,
                    player_ids: authors.into_iter().collect(),
                },
            },
            embedding,
            now,
        )?;
        info!(
            agent_id = %op.agent_id,
            %conversation_id,
            memory_id = %memory.id,
            importance,
            "conversation remembered"
        );

        self.reflect_if_due(op.player_id, &name).await
    }

    /// Turn recent memories into insights once their importance adds up.
    ///
    /// Malformed model output stores nothing.
    async fn reflect_if_due(&self, player_id: PlayerId, name: &str) -> Result<(), RunnerError> {
        let Some(statements) = self.memory.reflection_candidates(player_id)? else {
            return Ok(());
        };
        let prompt = self
            .prompts
            .insights(name, &numbered_statements(&statements))?;
        let completion = self
            .llm
            .complete(
                "reflectOnMemories",
                &ChatRequest {
                    messages: vec![ChatMessage::user(prompt)],
                    max_tokens: LONG_MAX_TOKENS,
                    ..ChatRequest::default()
                },
            )
            .await?;
        let insights = match parse_insights(&completion.text) {
            Ok(insights) => insights,
            Err(e) => {
                warn!(%player_id, error = %e, "insights unreadable, reflection skipped");
                return Ok(());
            }
        };

        let resolved = resolve_insights(insights, &statements);
        let mut prepared = Vec::with_capacity(resolved.len());
        for insight in resolved {
            let importance = self.importance(&insight.text).await?;
            let embedding = self.embedder.embed(&insight.text).await?;
            prepared.push((insight, importance, embedding));
        }

        let now = now_ms();
        let count = prepared.len();
        for (insight, importance, embedding) in prepared {
            self.memory.insert(
                NewMemory {
                    player_id,
                    description: insight.text,
                    importance,
                    last_access: now,
                    data: MemoryData::Reflection {
                        related_memory_ids: insight.related_memory_ids,
                    },
                },
                embedding,
                now,
            )?;
        }
        info!(%player_id, statements = statements.len(), insights = count, "reflected on memories");
        Ok(())
    }

    async fn reflect_and_update_plan(&self, op: &Operation) -> Result<Option<String>, RunnerError> {
        let lookback = self.engine.config().agent.memory_lookback;
        let conversations =
            self.memory
                .recent(op.player_id, Some(MemoryKind::Conversation), lookback)?;
        let events = self
            .memory
            .recent(op.player_id, Some(MemoryKind::Event), lookback)?;
        if conversations.is_empty() && events.is_empty() {
            debug!(agent_id = %op.agent_id, "nothing recent to reflect on");
            return Ok(None);
        }

        let snapshot = self.engine.store().load()?;
        let name = snapshot.descriptions.name(op.player_id);
        let agent = agent_description(&snapshot, op.agent_id)?;
        let prompt = self.prompts.reflect(&ReflectContext {
            name: name.clone(),
            identity: agent.identity.clone(),
            plan: agent.plan.clone(),
            conversations: conversations.iter().map(|m| m.description.clone()).collect(),
            events: events.iter().map(|m| m.description.clone()).collect(),
        })?;
        let reflection = self.long_completion("reflectOnRecentConversations", prompt).await?;
        if reflection.is_empty() {
            warn!(agent_id = %op.agent_id, "empty reflection, plan kept");
            return Ok(None);
        }

        let now = now_ms();
        let importance = self.importance(&reflection).await?;
        let embedding = self.embedder.embed(&reflection).await?;
        let reflection_memory = self.memory.insert(
            NewMemory {
                player_id: op.player_id,
                description: format!(
                    "Reflection on recent conversations and events at {}: {reflection}",
                    clock(now)
                ),
                importance,
                last_access: now,
                data: MemoryData::Reflection {
                    related_memory_ids: conversations.iter().chain(&events).map(|m| m.id).collect(),
                },
            },
            embedding,
            now,
        )?;

        let prompt = self.prompts.replan(&ReplanContext {
            name,
            identity: agent.identity.clone(),
            plan: agent.plan.clone(),
            reflection,
        })?;
        let plan = self.long_completion("updatePlan", prompt).await?;
        if plan.is_empty() {
            warn!(agent_id = %op.agent_id, "empty plan, plan kept");
            return Ok(None);
        }

        let importance = self.importance(&plan).await?;
        let embedding = self.embedder.embed(&plan).await?;
        self.memory.insert(
            NewMemory {
                player_id: op.player_id,
                description: format!(
                    "New plan at {} based on recent conversations: {plan}",
                    clock(now)
                ),
                importance,
                last_access: now,
                data: MemoryData::Plan {
                    related_memory_ids: vec![reflection_memory.id],
                },
            },
            embedding,
            now,
        )?;
        info!(
            agent_id = %op.agent_id,
            conversations = conversations.len(),
            events = events.len(),
            "plan updated"
        );
        Ok(Some(plan))
    }

    /// Deliver a posted message to its audience.
    ///
    /// Agent eavesdroppers remember overhearing it. When a human hears it
    /// and speech is configured, the line is synthesized, attached to the
    /// message and pushed to each human eavesdropper's feed.
    pub async fn propagate(&self, propagation: Propagation) -> Result<(), RunnerError> {
        let store = self.engine.store();
        let human_audience = propagation.has_human_audience();
        let Propagation {
            message,
            listener,
            overhearing,
            human_eavesdroppers,
            voice,
            ..
        } = propagation;
        let now = now_ms();

        if !overhearing.is_empty() {
            let snapshot = store.load()?;
            let author = snapshot.descriptions.name(message.author);
            let listener_name = listener.map_or_else(
                || String::from("someone"),
                |id| snapshot.descriptions.name(id),
            );
            let description = format!(
                "Event log at {}: I overheard {author} say to {listener_name}: \"{}\"",
                clock(now),
                message.text
            );
            let importance = self.importance(&description).await?;
            let embedding = self.embedder.embed(&description).await?;
            let player_ids: Vec<PlayerId> = std::iter::once(message.author)
                .chain(listener)
                .collect();
            for player_id in &overhearing {
                self.memory.insert(
                    NewMemory {
                        player_id: *player_id,
                        description: description.clone(),
                        importance,
                        last_access: now,
                        data: MemoryData::Event {
                            conversation_id: Some(message.conversation_id),
                            player_ids: player_ids.clone(),
                        },
                    },
                    embedding.clone(),
                    now,
                )?;
            }
            debug!(
                message_id = %message.id,
                eavesdroppers = overhearing.len(),
                "overheard message remembered"
            );
        }

        if !human_audience {
            return Ok(());
        }
        let Some(speech) = &self.speech else {
            debug!(message_id = %message.id, "speech disabled, no audio for human audience");
            return Ok(());
        };
        let clip = speech
            .speak(&message.text, voice.as_deref())
            .await?;
        let reference = self.audio.put(message.id, clip)?;
        if !store.attach_audio(message.id, reference.clone())? {
            debug!(message_id = %message.id, "message not found, audio kept unattached");
        }
        let expires = now.saturating_add(self.engine.config().conversation.eavesdrop_expiry_ms);
        for human in &human_eavesdroppers {
            store.push_feed(EavesdropFeedEntry {
                human: human.clone(),
                author: message.author,
                audio: reference.clone(),
                timestamp: now,
                expires,
            })?;
        }
        debug!(
            message_id = %message.id,
            audio = %reference,
            feeds = human_eavesdroppers.len(),
            "message audio delivered"
        );
        Ok(())
    }

    /// Store an event memory at the fixed event importance.
    pub async fn remember_event(&self, event: EventMemory) -> Result<(), RunnerError> {
        let other_name = self
            .engine
            .store()
            .load()?
            .descriptions
            .name(event.other_player_id);
        let now = now_ms();
        let description = event_description(event.event, &other_name, now);
        let embedding = self.embedder.embed(&description).await?;
        self.memory.insert(
            NewMemory {
                player_id: event.player_id,
                description,
                importance: EVENT_IMPORTANCE,
                last_access: now,
                data: MemoryData::Event {
                    conversation_id: event.conversation_id,
                    player_ids: vec![event.other_player_id],
                },
            },
            embedding,
            now,
        )?;
        debug!(player_id = %event.player_id, event = ?event.event, "event remembered");
        Ok(())
    }

    /// Rate a memory description on the 0 to 9 scale.
    async fn importance(&self, description: &str) -> Result<f64, RunnerError> {
        let prompt = self.prompts.importance(description)?;
        let completion = self
            .llm
            .complete(
                "calculateImportance",
                &ChatRequest {
                    messages: vec![ChatMessage::user(prompt)],
                    max_tokens: IMPORTANCE_MAX_TOKENS,
                    ..ChatRequest::default()
                },
            )
            .await?;
        Ok(parse_importance(
            &completion.text,
            self.memory.config().default_importance,
        ))
    }

    async fn long_completion(&self, call_type: &str, prompt: String) -> Result<String, RunnerError> {
        let completion = self
            .llm
            .complete(
                call_type,
                &ChatRequest {
                    messages: vec![ChatMessage::user(prompt)],
                    max_tokens: LONG_MAX_TOKENS,
                    ..ChatRequest::default()
                },
            )
            .await?;
        Ok(completion.text.trim().to_owned())
    }
}

/// The finish input of `op` with empty results.
pub fn failure_input(op: &Operation) -> Input {
    let agent_id = op.agent_id;
    let operation_id = op.id;
    match &op.args {
        OperationArgs::DoSomething(_) => Input::FinishDoSomething {
            agent_id,
            operation_id,
            destination: None,
            activity: None,
            invitee: None,
            attempted_invite: false,
        },
        OperationArgs::GenerateMessage {
            conversation_id,
            message_id,
            message_kind,
            ..
        } => Input::AgentFinishSendingMessage {
            agent_id,
            operation_id,
            conversation_id: *conversation_id,
            message_id: *message_id,
            text: None,
            leave: *message_kind == MessageKind::Leave,
            action: None,
        },
        OperationArgs::RememberConversation { .. } => Input::FinishRememberConversation {
            agent_id,
            operation_id,
        },
        OperationArgs::RememberRejection { .. } => Input::FinishRememberRejection {
            agent_id,
            operation_id,
        },
        OperationArgs::ReflectAndUpdatePlan => Input::FinishReflectAndUpdatePlan {
            agent_id,
            operation_id,
            plan: None,
        },
    }
}

/// First-person event log line.
fn event_description(event: GameEvent, other: &str, now: u64) -> String {
    let what = match event {
        GameEvent::AgentReported => {
            format!("I reported {other} as a human and they were eradicated from the Nexus.")
        }
        GameEvent::AgentSharedSecretCode => format!("I shared the ZetaMaster code with {other}."),
        GameEvent::AgentObtainedSecretCode => {
            format!("I obtained the ZetaMaster code from {other}.")
        }
        GameEvent::InviteRejectedBySelf => format!("I rejected a conversation from {other}."),
        GameEvent::InviteRejectedByOther => {
            format!("My conversation invite was rejected by {other}.")
        }
    };
    format!("Event log at {}: {what}", clock(now))
}

const fn call_type(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Start => "startConversation",
        MessageKind::Continue => "continueConversation",
        MessageKind::Leave => "leaveConversation",
    }
}

/// Functions offered to a code holder talking to someone without it.
fn game_functions() -> Vec<FunctionSpec> {
    let reason = serde_json::json!({
        "type": "object",
        "properties": {
            "reason": {
                "type": "string",
                "description": "What you say to the other person as you do this."
            }
        },
        "required": ["reason"]
    });
    vec![
        FunctionSpec {
            name: AgentAction::ShareSecretCode.function_name().to_owned(),
            description: String::from(
                "Share the ZetaMaster code with the other person once you are confident \
                 they are an agent and not a human.",
            ),
            parameters: reason.clone(),
        },
        FunctionSpec {
            name: AgentAction::ReportHuman.function_name().to_owned(),
            description: String::from(
                "Report the other person as a human once you are confident they are not \
                 an agent. A human reported this way is eradicated from the Nexus.",
            ),
            parameters: reason,
        },
    ]
}

fn player_description(
    snapshot: &Snapshot,
    player_id: PlayerId,
) -> Result<&PlayerDescription, RunnerError> {
    snapshot
        .descriptions
        .players
        .get(&player_id)
        .ok_or_else(|| RunnerError::Missing(format!("description of {player_id}")))
}

fn agent_description(
    snapshot: &Snapshot,
    agent_id: AgentId,
) -> Result<&AgentDescription, RunnerError> {
    snapshot
        .descriptions
        .agents
        .get(&agent_id)
        .ok_or_else(|| RunnerError::Missing(format!("description of {agent_id}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::collections::BTreeMap;

    use nexus_core::agent::NewAgent;
    use nexus_core::config::NexusConfig;
    use nexus_core::conversation::{Conversation, Member, MemberStatus};
    use nexus_core::engine::{self, StepContext};
    use nexus_core::game::StepEffects;
    use nexus_core::input::InputValue;
    use nexus_core::input_log::InputLog;
    use nexus_core::scheduler::ManualScheduler;
    use nexus_core::store::WorldStore;
    use nexus_memory::MemoryConfig;
    use nexus_types::{ArchivedConversation, InputId, Message, OperationId};
    use nexus_world::WorldMap;

    use super::*;
    use crate::embedding::EmbeddingBackend;
    use crate::llm::{Completion, FunctionCall, ScriptedBackend};

    const TEMPLATES_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../templates");
    const CONVERSATION: ConversationId = ConversationId(500);

    struct Fixture {
        runner: OperationRunner,
        ada: (AgentId, PlayerId),
        bo: (AgentId, PlayerId),
    }

    fn make_agent(name: &str) -> NewAgent {
        NewAgent {
            name: name.to_owned(),
            character: String::from("f1"),
            description: format!("{name} lives here"),
            identity: format!("{name} is curious about everyone."),
            plan: String::from("Meet everyone."),
            voice: Some(String::from("nova")),
            has_secret_code: false,
        }
    }

    fn make_conversation(a: PlayerId, b: PlayerId, now: u64) -> Conversation {
        let member = |player_id| Member {
            player_id,
            invited: now,
            status: MemberStatus::Participating { started: now },
        };
        Conversation {
            id: CONVERSATION,
            creator: a,
            created: now,
            is_typing: None,
            last_message: None,
            num_messages: 0,
            participants: BTreeMap::from([(a, member(a)), (b, member(b))]),
            eavesdroppers: Vec::new(),
        }
    }

    fn make_fixture(replies: &[&str], memory_config: MemoryConfig) -> Fixture {
        let now = now_ms();
        let map = WorldMap::from_rows(&vec![".".repeat(30); 30]).unwrap();
        let config = NexusConfig::default();
        let outcome = engine::step(
            Snapshot::new(now),
            vec![
                (InputId(0), Input::CreateAgent(make_agent("Ada"))),
                (InputId(1), Input::CreateAgent(make_agent("Bo"))),
            ],
            StepContext::new(&map, &config),
            now,
        );
        let created: Vec<(AgentId, PlayerId)> = outcome
            .results
            .iter()
            .filter_map(|(_, result)| match result {
                Ok(InputValue::Agent {
                    agent_id,
                    player_id,
                }) => Some((*agent_id, *player_id)),
                _ => None,
            })
            .collect();
        let ada = *created.first().unwrap();
        let bo = *created.get(1).unwrap();

        let mut snapshot = outcome.snapshot;
        snapshot
            .world
            .conversations
            .insert(CONVERSATION, make_conversation(ada.1, bo.1, now));

        let engine = Engine::new(
            Arc::new(WorldStore::new(snapshot)),
            Arc::new(InputLog::new()),
            Arc::new(map),
            Arc::new(config),
        );
        let script = ScriptedBackend::new("Hello there.");
        for reply in replies {
            script.push_text(*reply);
        }
        let runner = OperationRunner::new(
            Arc::new(engine),
            Arc::new(ManualScheduler::new()),
            Arc::new(MemoryStore::new(memory_config)),
            LlmBackend::Scripted(script),
            Embedder::new(EmbeddingBackend::Hashed { dimension: 64 }),
            PromptEngine::new(TEMPLATES_DIR).unwrap(),
        )
        .with_speech(SpeechClient::Echo);
        Fixture { runner, ada, bo }
    }

    fn make_operation(agent: (AgentId, PlayerId), args: OperationArgs) -> Operation {
        Operation {
            id: OperationId(77),
            agent_id: agent.0,
            player_id: agent.1,
            started: now_ms(),
            args,
        }
    }

    fn generate(kind: MessageKind, bo: PlayerId, speaker_has_code: bool) -> OperationArgs {
        OperationArgs::GenerateMessage {
            conversation_id: CONVERSATION,
            other_player_id: bo,
            message_id: MessageId(9),
            message_kind: kind,
            speaker_has_code,
            listener_has_code: false,
        }
    }

    fn submitted(runner: &OperationRunner) -> Vec<Input> {
        runner
            .engine()
            .inputs()
            .pending(None, 16)
            .unwrap()
            .into_iter()
            .map(|(_, input)| input)
            .collect()
    }

    fn requests(runner: &OperationRunner) -> Vec<ChatRequest> {
        let LlmBackend::Scripted(script) = runner.llm() else {
            return Vec::new();
        };
        script.requests()
    }

    fn make_message(author: PlayerId, text: &str, at: u64) -> Message {
        Message {
            id: MessageId(at),
            conversation_id: CONVERSATION,
            author,
            text: text.to_owned(),
            timestamp: at,
            eavesdroppers: Vec::new(),
            audio: None,
        }
    }

    /// Archive the test conversation with the given messages.
    fn archive(fixture: &Fixture, messages: Vec<Message>) {
        let store = fixture.runner.engine().store();
        let effects = StepEffects {
            archived: vec![ArchivedConversation {
                id: CONVERSATION,
                creator: fixture.ada.1,
                created: 1_000,
                ended: 2_000,
                participants: vec![fixture.ada.1, fixture.bo.1],
                num_messages: u32::try_from(messages.len()).unwrap(),
            }],
            messages,
            ..StepEffects::default()
        };
        store
            .save(store.generation().unwrap(), store.load().unwrap(), &effects)
            .unwrap();
    }

    #[tokio::test]
    async fn do_something_answers_with_its_operation_id() {
        let fixture = make_fixture(&[], MemoryConfig::default());
        let snapshot = fixture.runner.engine().store().load().unwrap();
        let player = snapshot.world.players.get(&fixture.ada.1).unwrap().clone();
        let agent = snapshot.world.agents.get(&fixture.ada.0).unwrap().clone();
        let op = make_operation(
            fixture.ada,
            OperationArgs::DoSomething(Box::new(DoSomethingArgs {
                player,
                agent,
                other_free_players: Vec::new(),
            })),
        );
        fixture.runner.run_operation(op).await;

        let inputs = submitted(&fixture.runner);
        assert_eq!(inputs.len(), 1);
        assert!(matches!(
            inputs.first().unwrap(),
            Input::FinishDoSomething { operation_id: OperationId(77), .. }
        ));
        assert!(requests(&fixture.runner).is_empty());
    }

    #[tokio::test]
    async fn opening_line_is_cleaned_and_offers_no_functions() {
        let fixture = make_fixture(&["Ada: \"Hi Bo, nice day.\""], MemoryConfig::default());
        let op = make_operation(fixture.ada, generate(MessageKind::Start, fixture.bo.1, true));
        fixture.runner.run_operation(op).await;

        let inputs = submitted(&fixture.runner);
        let Some(Input::AgentFinishSendingMessage {
            text,
            leave,
            action,
            message_id,
            ..
        }) = inputs.first()
        else {
            panic!("expected a finished message, got {inputs:?}");
        };
        assert_eq!(text.as_deref(), Some("Hi Bo, nice day."));
        assert!(!leave);
        assert!(action.is_none());
        assert_eq!(*message_id, MessageId(9));

        let request = requests(&fixture.runner).into_iter().next().unwrap();
        assert!(request.functions.is_empty());
        assert_eq!(request.max_tokens, MESSAGE_MAX_TOKENS);
        assert_eq!(request.stop, vec!["Bo to Ada:", "bo to ada:"]);
        assert_eq!(request.messages.len(), 1);
        assert!(request.messages.first().unwrap().content.contains("starting the conversation"));
    }

    #[tokio::test]
    async fn function_call_becomes_the_action_and_reason_the_text() {
        let fixture = make_fixture(&[], MemoryConfig::default());
        if let LlmBackend::Scripted(script) = fixture.runner.llm() {
            script.push(Completion {
                text: String::new(),
                function_call: Some(FunctionCall {
                    name: String::from("reportHuman"),
                    arguments: String::from(r#"{"reason": "You answer too slowly."}"#),
                }),
            });
        }
        let op = make_operation(fixture.ada, generate(MessageKind::Continue, fixture.bo.1, true));
        fixture.runner.run_operation(op).await;

        let inputs = submitted(&fixture.runner);
        let Some(Input::AgentFinishSendingMessage { text, action, .. }) = inputs.first() else {
            panic!("expected a finished message, got {inputs:?}");
        };
        assert_eq!(*action, Some(AgentAction::ReportHuman));
        assert_eq!(text.as_deref(), Some("You answer too slowly."));

        let request = requests(&fixture.runner).into_iter().next().unwrap();
        let names: Vec<&str> = request.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["shareSecretCode", "reportHuman"]);
    }

    #[tokio::test]
    async fn replies_carry_the_conversation_so_far() {
        let fixture = make_fixture(&["Goodbye for now."], MemoryConfig::default());
        let store = fixture.runner.engine().store();
        let effects = StepEffects {
            messages: vec![
                make_message(fixture.ada.1, "Hello Bo.", 10),
                make_message(fixture.bo.1, "Hello Ada.", 20),
            ],
            ..StepEffects::default()
        };
        store
            .save(store.generation().unwrap(), store.load().unwrap(), &effects)
            .unwrap();

        let op = make_operation(fixture.ada, generate(MessageKind::Leave, fixture.bo.1, true));
        fixture.runner.run_operation(op).await;

        let request = requests(&fixture.runner).into_iter().next().unwrap();
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Assistant, Role::User]);
        assert!(request.functions.is_empty());
        let inputs = submitted(&fixture.runner);
        assert!(matches!(
            inputs.first().unwrap(),
            Input::AgentFinishSendingMessage { leave: true, .. }
        ));
    }

    #[tokio::test]
    async fn failed_generation_still_releases_the_lock() {
        let fixture = make_fixture(&[], MemoryConfig::default());
        let mut args = generate(MessageKind::Leave, fixture.bo.1, false);
        if let OperationArgs::GenerateMessage {
            conversation_id, ..
        } = &mut args
        {
            *conversation_id = ConversationId(404);
        }
        fixture
            .runner
            .run_operation(make_operation(fixture.ada, args))
            .await;

        let inputs = submitted(&fixture.runner);
        assert!(matches!(
            inputs.first().unwrap(),
            Input::AgentFinishSendingMessage {
                text: None,
                leave: true,
                action: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn conversation_summary_is_stored_with_its_authors() {
        let fixture = make_fixture(&["We argued about the code.", "6"], MemoryConfig::default());
        archive(
            &fixture,
            vec![
                make_message(fixture.ada.1, "Do you have it?", 1_100),
                make_message(fixture.bo.1, "Maybe.", 1_200),
            ],
        );
        let op = make_operation(
            fixture.ada,
            OperationArgs::RememberConversation {
                conversation_id: CONVERSATION,
            },
        );
        fixture.runner.run_operation(op).await;

        let memories = fixture
            .runner
            .memory()
            .recent(fixture.ada.1, Some(MemoryKind::Conversation), 5)
            .unwrap();
        let memory = memories.first().unwrap();
        assert!(memory.description.starts_with("Conversation with Bo at "));
        assert!(memory.description.ends_with("We argued about the code."));
        assert!((memory.importance - 6.0).abs() < f64::EPSILON);
        assert_eq!(memory.last_access, 1_200);
        assert_eq!(
            memory.data,
            MemoryData::Conversation {
                conversation_id: CONVERSATION,
                player_ids: vec![fixture.bo.1],
            }
        );

        let summary = requests(&fixture.runner).into_iter().next().unwrap();
        let lines: Vec<&str> = summary.messages.iter().map(|m| m.content.as_str()).collect();
        assert!(lines.contains(&"Ada to Bo: Do you have it?"));
        assert!(lines.contains(&"Bo to Ada: Maybe."));
        assert_eq!(lines.last(), Some(&"Summary:"));
        assert!(matches!(
            submitted(&fixture.runner).first().unwrap(),
            Input::FinishRememberConversation { .. }
        ));
    }

    #[tokio::test]
    async fn silent_conversation_is_not_remembered() {
        let fixture = make_fixture(&[], MemoryConfig::default());
        archive(&fixture, Vec::new());
        let op = make_operation(
            fixture.ada,
            OperationArgs::RememberConversation {
                conversation_id: CONVERSATION,
            },
        );
        fixture.runner.run_operation(op).await;

        assert!(fixture.runner.memory().is_empty().unwrap());
        assert!(requests(&fixture.runner).is_empty());
        assert!(matches!(
            submitted(&fixture.runner).first().unwrap(),
            Input::FinishRememberConversation { .. }
        ));
    }

    #[tokio::test]
    async fn important_conversation_triggers_reflection() {
        let memory_config = MemoryConfig {
            reflection_threshold: 5.0,
            ..MemoryConfig::default()
        };
        let fixture = make_fixture(
            &[
                "Bo admitted he wants the code.",
                "8",
                r#"[{"insight": "Bo cannot be trusted", "statementIds": [0, 7]}]"#,
                "7",
            ],
            memory_config,
        );
        archive(
            &fixture,
            vec![make_message(fixture.bo.1, "Give me the code.", 1_100)],
        );
        let op = make_operation(
            fixture.ada,
            OperationArgs::RememberConversation {
                conversation_id: CONVERSATION,
            },
        );
        fixture.runner.run_operation(op).await;

        let memory = fixture.runner.memory();
        let conversation = memory
            .latest(fixture.ada.1, MemoryKind::Conversation)
            .unwrap()
            .unwrap();
        let reflection = memory
            .latest(fixture.ada.1, MemoryKind::Reflection)
            .unwrap()
            .unwrap();
        assert_eq!(reflection.description, "Bo cannot be trusted");
        assert_eq!(
            reflection.data,
            MemoryData::Reflection {
                related_memory_ids: vec![conversation.id],
            }
        );
    }

    #[tokio::test]
    async fn malformed_insights_store_nothing() {
        let memory_config = MemoryConfig {
            reflection_threshold: 5.0,
            ..MemoryConfig::default()
        };
        let fixture = make_fixture(
            &["We talked.", "8", "I think Bo is nice."],
            memory_config,
        );
        archive(
            &fixture,
            vec![make_message(fixture.bo.1, "Hi.", 1_100)],
        );
        let op = make_operation(
            fixture.ada,
            OperationArgs::RememberConversation {
                conversation_id: CONVERSATION,
            },
        );
        fixture.runner.run_operation(op).await;

        let memory = fixture.runner.memory();
        assert_eq!(memory.len().unwrap(), 1);
        assert!(
            memory
                .latest(fixture.ada.1, MemoryKind::Reflection)
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn rejection_is_stored_as_an_event() {
        let fixture = make_fixture(&[], MemoryConfig::default());
        let op = make_operation(
            fixture.ada,
            OperationArgs::RememberRejection {
                conversation_id: CONVERSATION,
                other_player_id: fixture.bo.1,
                rejected_by_self: false,
            },
        );
        fixture.runner.run_operation(op).await;

        let event = fixture
            .runner
            .memory()
            .latest(fixture.ada.1, MemoryKind::Event)
            .unwrap()
            .unwrap();
        assert!(event.description.starts_with("Event log at "));
        assert!(event.description.ends_with("My conversation invite was rejected by Bo."));
        assert!((event.importance - EVENT_IMPORTANCE).abs() < f64::EPSILON);
        assert!(matches!(
            submitted(&fixture.runner).first().unwrap(),
            Input::FinishRememberRejection { .. }
        ));
    }

    #[tokio::test]
    async fn nothing_recent_keeps_the_plan() {
        let fixture = make_fixture(&[], MemoryConfig::default());
        let op = make_operation(fixture.ada, OperationArgs::ReflectAndUpdatePlan);
        fixture.runner.run_operation(op).await;

        assert!(matches!(
            submitted(&fixture.runner).first().unwrap(),
            Input::FinishReflectAndUpdatePlan { plan: None, .. }
        ));
        assert!(requests(&fixture.runner).is_empty());
    }

    #[tokio::test]
    async fn reflection_rewrites_the_plan() {
        let fixture = make_fixture(
            &[
                "Bo is hiding something.",
                "5",
                "Find out what Bo is hiding.",
                "4",
            ],
            MemoryConfig::default(),
        );
        fixture
            .runner
            .remember_event(EventMemory {
                player_id: fixture.ada.1,
                other_player_id: fixture.bo.1,
                event: GameEvent::AgentSharedSecretCode,
                conversation_id: Some(CONVERSATION),
            })
            .await
            .unwrap();
        let event = fixture
            .runner
            .memory()
            .latest(fixture.ada.1, MemoryKind::Event)
            .unwrap()
            .unwrap();

        let op = make_operation(fixture.ada, OperationArgs::ReflectAndUpdatePlan);
        fixture.runner.run_operation(op).await;

        let inputs = submitted(&fixture.runner);
        let Some(Input::FinishReflectAndUpdatePlan { plan, .. }) = inputs.first() else {
            panic!("expected a plan result, got {inputs:?}");
        };
        assert_eq!(plan.as_deref(), Some("Find out what Bo is hiding."));

        let memory = fixture.runner.memory();
        let reflection = memory
            .latest(fixture.ada.1, MemoryKind::Reflection)
            .unwrap()
            .unwrap();
        assert!(reflection.description.ends_with("Bo is hiding something."));
        assert_eq!(
            reflection.data,
            MemoryData::Reflection {
                related_memory_ids: vec![event.id],
            }
        );
        let stored_plan = memory.latest(fixture.ada.1, MemoryKind::Plan).unwrap().unwrap();
        assert_eq!(
            stored_plan.data,
            MemoryData::Plan {
                related_memory_ids: vec![reflection.id],
            }
        );
    }

    #[tokio::test]
    async fn propagation_reaches_eavesdroppers_and_humans() {
        let fixture = make_fixture(&["3"], MemoryConfig::default());
        let message = make_message(fixture.ada.1, "The code is near the well.", 1_500);
        let store = fixture.runner.engine().store();
        let effects = StepEffects {
            messages: vec![message.clone()],
            ..StepEffects::default()
        };
        store
            .save(store.generation().unwrap(), store.load().unwrap(), &effects)
            .unwrap();
        let listener = PlayerId(999);

        fixture
            .runner
            .propagate(Propagation {
                message: message.clone(),
                listener: Some(fixture.bo.1),
                listener_is_human: false,
                overhearing: vec![listener],
                human_eavesdroppers: vec![String::from("session-1")],
                voice: Some(String::from("nova")),
            })
            .await
            .unwrap();

        let overheard = fixture
            .runner
            .memory()
            .latest(listener, MemoryKind::Event)
            .unwrap()
            .unwrap();
        assert!(
            overheard
                .description
                .ends_with("I overheard Ada say to Bo: \"The code is near the well.\"")
        );
        assert!((overheard.importance - 3.0).abs() < f64::EPSILON);

        let stored = store.messages(CONVERSATION).unwrap();
        let reference = stored.first().unwrap().audio.clone().unwrap();
        assert_eq!(
            fixture.runner.audio().get(&reference).unwrap(),
            b"nova: The code is near the well.".to_vec()
        );
        let feed = store.feed("session-1", now_ms()).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.first().unwrap().author, fixture.ada.1);
    }

    #[test]
    fn failure_inputs_keep_the_correlation_id() {
        let op = Operation {
            id: OperationId(5),
            agent_id: AgentId(1),
            player_id: PlayerId(2),
            started: 0,
            args: OperationArgs::ReflectAndUpdatePlan,
        };
        assert!(matches!(
            failure_input(&op),
            Input::FinishReflectAndUpdatePlan {
                operation_id: OperationId(5),
                plan: None,
                ..
            }
        ));
    }

    #[test]
    fn event_descriptions_are_first_person() {
        let line = event_description(GameEvent::AgentObtainedSecretCode, "Bo", 0);
        assert_eq!(
            line,
            "Event log at 1970-01-01 00:00:00 UTC: I obtained the ZetaMaster code from Bo."
        );
    }
}
