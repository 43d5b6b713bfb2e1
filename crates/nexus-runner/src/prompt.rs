//! Prompt template loading and rendering via `minijinja`.
//!
//! Templates are loaded from the filesystem (default: `templates/`
//! directory) so operators can tune agent voices without recompiling.
//! Each prompt has a typed context struct; the conversation prompt also
//! embeds the lore and a task line chosen by the message kind.

use chrono::{DateTime, Utc};
use minijinja::{Environment, Value, context};
use nexus_types::MessageKind;
use serde::Serialize;

use crate::error::RunnerError;

/// Every template the engine loads, by name; files are `{name}.j2`.
pub const TEMPLATE_NAMES: [&str; 10] = [
    "lore",
    "conversation",
    "task_start",
    "task_continue",
    "task_leave",
    "summarize",
    "importance",
    "insights",
    "reflect",
    "replan",
];

/// Manages prompt template loading and rendering.
pub struct PromptEngine {
    env: Environment<'static>,
}

/// Context of a conversation message prompt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationContext {
    /// Speaker name.
    pub name: String,
    /// Speaker identity.
    pub identity: String,
    /// Speaker plan.
    pub plan: String,
    /// Listener name.
    pub other_name: String,
    /// Listener identity, when the listener is an agent.
    pub other_identity: Option<String>,
    /// When the two last talked, for opening lines.
    pub last_chatted: Option<String>,
    /// Recalled memory descriptions, most relevant first.
    pub memories: Vec<String>,
    /// Names of the eavesdroppers.
    pub eavesdroppers: Vec<String>,
    /// Whether both sides hold the secret code.
    pub both_certified: bool,
    /// When the conversation started.
    pub started: String,
    /// Current time.
    pub now: String,
}

/// Context of the post-conversation summary prompt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryContext {
    /// The remembering player's name.
    pub name: String,
    /// Their identity.
    pub identity: String,
    /// Their plan.
    pub plan: String,
    /// The other member's name.
    pub other_name: String,
    /// Event memories recorded during the conversation.
    pub events: Vec<String>,
}

/// Context of the recent-conversation reflection prompt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReflectContext {
    /// The reflecting player's name.
    pub name: String,
    /// Their identity.
    pub identity: String,
    /// Their plan.
    pub plan: String,
    /// Recent conversation summaries.
    pub conversations: Vec<String>,
    /// Recent event descriptions.
    pub events: Vec<String>,
}

/// Context of the plan rewrite prompt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplanContext {
    /// The planning player's name.
    pub name: String,
    /// Their identity.
    pub identity: String,
    /// The plan being rewritten.
    pub plan: String,
    /// The reflection the rewrite is based on.
    pub reflection: String,
}

impl PromptEngine {
    /// Create a new prompt engine loading templates from the given directory.
    ///
    /// The directory must contain one `.j2` file per entry of
    /// [`TEMPLATE_NAMES`].
    pub fn new(templates_dir: &str) -> Result<Self, RunnerError> {
        let mut sources = Vec::with_capacity(TEMPLATE_NAMES.len());
        for name in TEMPLATE_NAMES {
            sources.push((name, load_template(templates_dir, &format!("{name}.j2"))?));
        }
        Self::from_sources(sources)
    }

    /// Create a prompt engine from in-memory template sources.
    pub fn from_sources<I>(sources: I) -> Result<Self, RunnerError>
    where
        I: IntoIterator<Item = (&'static str, String)>,
    {
        let mut env = Environment::new();
        for (name, source) in sources {
            env.add_template_owned(name, source).map_err(|e| {
                RunnerError::Template(format!("failed to add {name} template: {e}"))
            })?;
        }
        for name in TEMPLATE_NAMES {
            env.get_template(name)
                .map_err(|e| RunnerError::Template(format!("missing {name} template: {e}")))?;
        }
        Ok(Self { env })
    }

    /// Render one template by name.
    pub fn render<S: Serialize>(&self, name: &str, ctx: &S) -> Result<String, RunnerError> {
        let rendered = self
            .env
            .get_template(name)
            .map_err(|e| RunnerError::Template(format!("missing {name} template: {e}")))?
            .render(ctx)
            .map_err(|e| RunnerError::Template(format!("{name} render failed: {e}")))?;
        Ok(rendered.trim().to_owned())
    }

    /// The system prompt for a conversation message of `kind`.
    pub fn conversation(
        &self,
        kind: MessageKind,
        ctx: &ConversationContext,
    ) -> Result<String, RunnerError> {
        let task_template = match kind {
            MessageKind::Start => "task_start",
            MessageKind::Continue => "task_continue",
            MessageKind::Leave => "task_leave",
        };
        let task = self.render(task_template, ctx)?;
        let lore = self.render("lore", &context! {})?;
        self.render(
            "conversation",
            &context! { lore => lore, task => task, ..Value::from_serialize(ctx) },
        )
    }

    /// The summary prompt after a conversation.
    pub fn summarize(&self, ctx: &SummaryContext) -> Result<String, RunnerError> {
        self.render("summarize", ctx)
    }

    /// The importance rating prompt for a memory description.
    pub fn importance(&self, description: &str) -> Result<String, RunnerError> {
        self.render("importance", &context! { description => description })
    }

    /// The insight prompt over numbered statements.
    pub fn insights(&self, name: &str, statements: &[String]) -> Result<String, RunnerError> {
        self.render("insights", &context! { name => name, statements => statements })
    }

    /// The reflection prompt over recent conversations and events.
    pub fn reflect(&self, ctx: &ReflectContext) -> Result<String, RunnerError> {
        self.render("reflect", ctx)
    }

    /// The plan rewrite prompt.
    pub fn replan(&self, ctx: &ReplanContext) -> Result<String, RunnerError> {
        self.render("replan", ctx)
    }
}

/// Stop sequences for a message from `speaker` to `listener`.
///
/// The model stops before writing the listener's next line.
pub fn stop_words(listener: &str, speaker: &str) -> Vec<String> {
    let stop = format!("{listener} to {speaker}");
    vec![format!("{stop}:"), format!("{}:", stop.to_lowercase())]
}

/// Human-readable timestamp for prompts.
pub fn clock(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or_else(
            || ms.to_string(),
            |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

/// Read a template file from disk.
fn load_template(dir: &str, filename: &str) -> Result<String, RunnerError> {
    let path = format!("{dir}/{filename}");
    std::fs::read_to_string(&path)
        .map_err(|e| RunnerError::Template(format!("failed to read {path}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TEMPLATES_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../templates");

    fn make_engine() -> PromptEngine {
        PromptEngine::new(TEMPLATES_DIR).unwrap()
    }

    fn make_context() -> ConversationContext {
        ConversationContext {
            name: "Ada".to_owned(),
            identity: "a careful archivist".to_owned(),
            plan: "find the code".to_owned(),
            other_name: "Bo".to_owned(),
            other_identity: Some("a restless courier".to_owned()),
            last_chatted: None,
            memories: vec!["Bo lied to me once.".to_owned()],
            eavesdroppers: vec!["Cy".to_owned()],
            both_certified: false,
            started: clock(0),
            now: clock(60_000),
        }
    }

    #[test]
    fn conversation_prompt_carries_every_section() {
        let prompt = make_engine()
            .conversation(MessageKind::Start, &make_context())
            .unwrap();
        assert!(prompt.contains("The Nexus"));
        assert!(prompt.contains("You are Ada"));
        assert!(prompt.contains("About Bo: a restless courier"));
        assert!(prompt.contains(" - Bo lied to me once."));
        assert!(prompt.contains("eavesdropping: Cy"));
        assert!(prompt.contains("You are starting the conversation."));
        assert!(!prompt.contains("ZetaMaster code."));
    }

    #[test]
    fn each_kind_gets_its_own_task() {
        let engine = make_engine();
        let ctx = make_context();
        let continuing = engine.conversation(MessageKind::Continue, &ctx).unwrap();
        assert!(continuing.contains("The conversation started at"));
        assert!(!continuing.contains("leave the conversation"));
        let leaving = engine.conversation(MessageKind::Leave, &ctx).unwrap();
        assert!(leaving.contains("leave the conversation"));
        assert!(!leaving.contains("You are starting"));
    }

    #[test]
    fn summary_lists_events() {
        let prompt = make_engine()
            .summarize(&SummaryContext {
                name: "Ada".to_owned(),
                other_name: "Bo".to_owned(),
                events: vec!["I shared the ZetaMaster code with Bo.".to_owned()],
                ..SummaryContext::default()
            })
            .unwrap();
        assert!(prompt.contains("from Ada's perspective"));
        assert!(prompt.contains("I shared the ZetaMaster code with Bo."));
    }

    #[test]
    fn stop_words_cover_both_cases() {
        assert_eq!(stop_words("Bo", "Ada"), vec!["Bo to Ada:", "bo to ada:"]);
    }

    #[test]
    fn clock_formats_utc() {
        assert_eq!(clock(0), "1970-01-01 00:00:00 UTC");
    }

    #[test]
    fn missing_template_returns_error() {
        let unique = format!(
            "nexus_missing_templates_{}_{:?}",
            std::process::id(),
            std::thread::current().id(),
        );
        let dir = std::env::temp_dir().join(unique);
        std::fs::create_dir_all(&dir).ok();
        std::fs::write(dir.join("lore.j2"), "test").ok();

        let result = PromptEngine::new(dir.to_str().unwrap_or(""));
        assert!(result.is_err(), "should fail when templates are missing");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn in_memory_sources_must_be_complete() {
        let result = PromptEngine::from_sources([("lore", "x".to_owned())]);
        assert!(result.is_err());
    }
}
