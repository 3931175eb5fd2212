//! Provider stream chunks resolved into one typed shape.
//!
//! Providers name the same concept differently (`content` vs `text`,
//! `reasoning_content` vs `reasoning` vs `thinking`) and nest it at
//! different depths. Each concept has an ordered list of candidate field
//! names, resolved once here; nothing downstream inspects raw JSON.

use serde_json::Value;

use crate::Result;

/// Candidate field names for visible text, in priority order.
pub const CONTENT_FIELDS: &[&str] = &["content", "text", "output_text"];

/// Candidate field names for reasoning text, in priority order.
pub const REASONING_FIELDS: &[&str] = &["reasoning_content", "reasoning", "thinking"];

/// Candidate field names for the finish reason, in priority order.
pub const FINISH_FIELDS: &[&str] = &["finish_reason", "stop_reason"];

/// Sentinel that ends an OpenAI-style event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One streamed chunk with its fields resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    /// Resolve a chunk from provider JSON.
    ///
    /// Scopes are searched from most to least specific:
    /// `choices[0].delta`, `choices[0].message`, `choices[0]`, `delta`,
    /// then the top level. Within a scope the first candidate holding a
    /// string wins.
    pub fn from_json(value: &Value) -> Self {
        let scopes = scopes(value);
        Self {
            content: resolve(&scopes, CONTENT_FIELDS),
            reasoning: resolve(&scopes, REASONING_FIELDS),
            finish_reason: resolve(&scopes, FINISH_FIELDS),
        }
    }

    /// Parse and resolve a JSON payload.
    pub fn parse(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        Ok(Self::from_json(&value))
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.reasoning.is_none() && self.finish_reason.is_none()
    }
}

fn scopes(value: &Value) -> Vec<&Value> {
    let mut scopes = Vec::with_capacity(5);
    if let Some(choice) = value.get("choices").and_then(|c| c.get(0)) {
        scopes.extend(choice.get("delta"));
        scopes.extend(choice.get("message"));
        scopes.push(choice);
    }
    scopes.extend(value.get("delta"));
    scopes.push(value);
    scopes
}

fn resolve(scopes: &[&Value], candidates: &[&str]) -> Option<String> {
    scopes.iter().find_map(|scope| {
        candidates
            .iter()
            .find_map(|name| scope.get(*name).and_then(Value::as_str))
            .map(str::to_owned)
    })
}

/// Payload of one server-sent-events line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseData<'a> {
    Payload(&'a str),
    Done,
}

/// Extract the payload of a `data:` line.
///
/// Comments, `event:`/`id:` lines and empty data lines yield `None`.
pub fn parse_sse_data(line: &str) -> Option<SseData<'_>> {
    let data = line.strip_prefix("data:")?.trim();
    match data {
        "" => None,
        DONE_SENTINEL => Some(SseData::Done),
        payload => Some(SseData::Payload(payload)),
    }
}
