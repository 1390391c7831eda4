use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use crate::agent_engine::state::PlannedAction;
use crate::vision::types::VisualCheck;

/// Which structured reply a request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaTag {
    Action,
    SupervisorDecision,
    VisualCheck,
}

impl SchemaTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaTag::Action => "action",
            SchemaTag::SupervisorDecision => "supervisor_decision",
            SchemaTag::VisualCheck => "visual_check",
        }
    }

    /// Example shape repeated back to the model after a malformed reply.
    pub fn shape_hint(&self) -> &'static str {
        match self {
            SchemaTag::Action => {
                r#"{"action_type": "tap" | "type" | "press_key" | "swipe" | "wait" | "verify" | "complete", ...action fields..., "reasoning": "..."}"#
            }
            SchemaTag::SupervisorDecision => {
                r#"{"decision": "continue" | "verdict", "status": "pass" | "fail", "failure_kind": "application" | "technical", "bug_classification": "...", "rationale": "..."}"#
            }
            SchemaTag::VisualCheck => r#"{"found": true | false, "evidence": "..."}"#,
        }
    }
}

/// A structured reply type the gateway can parse and validate.
pub trait ResponseSchema: DeserializeOwned + Send {
    const TAG: SchemaTag;
}

impl ResponseSchema for PlannedAction {
    const TAG: SchemaTag = SchemaTag::Action;
}

impl ResponseSchema for VisualCheck {
    const TAG: SchemaTag = SchemaTag::VisualCheck;
}

/// Pulls the JSON object out of a model reply: fenced code block first,
/// otherwise the span from the first `{` to the last `}`.
pub fn extract_json(raw: &str) -> Option<&str> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").ok())
        .as_ref();

    if let Some(caps) = fence.and_then(|re| re.captures(raw)) {
        if let Some(m) = caps.get(1) {
            return Some(m.as_str());
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parses `raw` into `T`, returning a human-readable reason on failure.
pub fn parse_reply<T: ResponseSchema>(raw: &str) -> Result<T, String> {
    let Some(json) = extract_json(raw) else {
        return Err("no JSON object found in reply".into());
    };
    serde_json::from_str(json).map_err(|e| format!("reply does not match {} schema: {e}", T::TAG.as_str()))
}

/// Follow-up prompt sent once after a malformed reply.
pub fn clarification_prompt(tag: SchemaTag, reason: &str) -> String {
    format!(
        "Your previous reply could not be used ({reason}).\n\
         Reply again with exactly one JSON object and nothing else, shaped like:\n{}",
        tag.shape_hint()
    )
}
