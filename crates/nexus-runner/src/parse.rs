//! Model response parsing.
//!
//! Conversation replies are free text that needs light cleanup. Function
//! calls and insights are JSON, which models often wrap in markdown or
//! leave with trailing commas, so JSON goes through several recovery
//! strategies before it is rejected.

use nexus_memory::Insight;
use nexus_types::AgentAction;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::RunnerError;
use crate::llm::FunctionCall;

/// A game action taken through a function call, with its spoken message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAction {
    /// The action.
    pub action: AgentAction,
    /// The message sent alongside, from the `reason` argument.
    pub message: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct FunctionArguments {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum InsightPayload {
    List(Vec<Insight>),
    Wrapped { insights: Vec<Insight> },
}

/// Clean a generated conversation line.
///
/// Strips a leading `"{speaker}:"` label and wrapping quotes.
pub fn clean_message(raw: &str, speaker: &str) -> String {
    let mut text = raw.trim();
    let label = format!("{speaker}:");
    if let Some(rest) = text.strip_prefix(label.as_str()) {
        text = rest.trim_start();
    }
    if text.len() >= 2
        && let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"'))
    {
        text = inner.trim();
    }
    text.to_owned()
}

/// Interpret a function call chosen by the model.
///
/// Unknown function names are rejected. Unparseable arguments keep the
/// action and drop the message.
pub fn parse_function_call(call: &FunctionCall) -> Result<ParsedAction, RunnerError> {
    let action = AgentAction::from_function_name(&call.name)
        .ok_or_else(|| RunnerError::Parse(format!("unknown function: {}", call.name)))?;
    let message = match parse_json::<FunctionArguments>(&call.arguments) {
        Ok(args) => args.reason.filter(|r| !r.trim().is_empty()),
        Err(e) => {
            warn!(
                function = %call.name,
                error = %e,
                "function arguments unreadable, keeping the action only"
            );
            None
        }
    };
    Ok(ParsedAction { action, message })
}

/// Parse reflection insights.
///
/// Accepts a bare array or an object with an `insights` array.
pub fn parse_insights(raw: &str) -> Result<Vec<Insight>, RunnerError> {
    Ok(match parse_json::<InsightPayload>(raw)? {
        InsightPayload::List(insights) | InsightPayload::Wrapped { insights } => insights,
    })
}

/// Deserialize JSON through multiple recovery strategies:
/// 1. Direct `serde_json` deserialization
/// 2. Extract JSON from a markdown code block
/// 3. Strip trailing commas and retry
/// 4. Extract from a code block, then strip commas
fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, RunnerError> {
    let trimmed = raw.trim();

    if let Ok(parsed) = serde_json::from_str::<T>(trimmed) {
        return Ok(parsed);
    }

    if let Some(json_str) = extract_json_from_codeblock(trimmed)
        && let Ok(parsed) = serde_json::from_str::<T>(json_str)
    {
        return Ok(parsed);
    }

    let cleaned = strip_trailing_commas(trimmed);
    if let Ok(parsed) = serde_json::from_str::<T>(&cleaned) {
        return Ok(parsed);
    }

    if let Some(json_str) = extract_json_from_codeblock(trimmed) {
        let cleaned_inner = strip_trailing_commas(json_str);
        if let Ok(parsed) = serde_json::from_str::<T>(&cleaned_inner) {
            return Ok(parsed);
        }
    }

    Err(RunnerError::Parse(format!(
        "all parse strategies failed for: {trimmed}"
    )))
}

/// Extract JSON from a markdown code block.
fn extract_json_from_codeblock(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = text.get(open.checked_add(3)?..)?;
    let body_start = after_fence.find('\n').and_then(|nl| nl.checked_add(1))?;
    let body = after_fence.get(body_start..)?;
    let end = body.find("```")?;
    body.get(..end).map(str::trim)
}

/// Strip trailing commas before closing braces and brackets (common LLM error).
fn strip_trailing_commas(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == ',' {
            let rest: String = chars.clone().skip_while(|n| n.is_whitespace()).take(1).collect();
            if rest == "}" || rest == "]" {
                continue;
            }
        }
        result.push(c);
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_call(name: &str, arguments: &str) -> FunctionCall {
        FunctionCall {
            name: name.to_owned(),
            arguments: arguments.to_owned(),
        }
    }

    #[test]
    fn clean_message_strips_label_and_quotes() {
        assert_eq!(clean_message("Ada: \"Hello, Bo.\"", "Ada"), "Hello, Bo.");
        assert_eq!(clean_message("  Just talking.  ", "Ada"), "Just talking.");
        assert_eq!(clean_message("\"", "Ada"), "\"");
    }

    #[test]
    fn function_call_reason_becomes_message() {
        let parsed = parse_function_call(&make_call(
            "shareSecretCode",
            r#"{"reason": "You earned my trust."}"#,
        ))
        .unwrap();
        assert_eq!(parsed.action, AgentAction::ShareSecretCode);
        assert_eq!(parsed.message.as_deref(), Some("You earned my trust."));
    }

    #[test]
    fn function_call_with_bad_arguments_keeps_action() {
        let parsed = parse_function_call(&make_call("reportHuman", "not json")).unwrap();
        assert_eq!(parsed.action, AgentAction::ReportHuman);
        assert!(parsed.message.is_none());
    }

    #[test]
    fn unknown_function_is_rejected() {
        assert!(parse_function_call(&make_call("launchMissiles", "{}")).is_err());
    }

    #[test]
    fn insights_accept_array_and_wrapped_forms() {
        let bare = parse_insights(r#"[{"insight": "Bo is kind", "statementIds": [0, 2]}]"#).unwrap();
        assert_eq!(bare.len(), 1);
        assert_eq!(bare.first().unwrap().statement_ids, vec![0, 2]);

        let wrapped = parse_insights(
            "```json\n{\"insights\": [{\"insight\": \"Cy hides things\", \"statementIds\": [1],}]}\n```",
        )
        .unwrap();
        assert_eq!(wrapped.first().unwrap().insight, "Cy hides things");
    }

    #[test]
    fn malformed_insights_are_an_error() {
        assert!(parse_insights("I think Bo is nice.").is_err());
        assert!(parse_insights("").is_err());
    }

    #[test]
    fn extract_json_from_markdown() {
        let text = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(extract_json_from_codeblock(text), Some("{\"key\": \"value\"}"));
        let plain = "```\n[1]\n```";
        assert_eq!(extract_json_from_codeblock(plain), Some("[1]"));
    }

    #[test]
    fn strip_trailing_commas_basic() {
        assert_eq!(strip_trailing_commas(r#"{"a": 1, "b": 2,}"#), r#"{"a": 1, "b": 2}"#);
        assert_eq!(strip_trailing_commas("[1, 2, 3,\n]"), "[1, 2, 3\n]");
        assert_eq!(strip_trailing_commas("a, b"), "a, b");
    }
}
