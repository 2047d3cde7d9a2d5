//! Parses one line of the assistant's `--output-format stream-json` stdout
//! into a tagged variant, per spec §4.2:
//!
//! - `{"type":"assistant",...}` → text progress
//! - `{"type":"result","subtype":"success",...}` → terminal result
//! - anything else → forwarded opaque, never fails parsing
//!
//! Only the terminal `result` line is required to parse; any other
//! malformed line is tolerated by the caller (see `execute_streaming`).

use serde::Deserialize;
use wfctl_core::AppError;

/// The terminal `result` envelope's payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultEnvelope {
    #[serde(default)]
    pub subtype: String,
    #[serde(default, deserialize_with = "result_as_string")]
    pub result: String,
    #[serde(default)]
    pub structured_output: Option<serde_json::Value>,
}

/// Deserialize `result` as a string whether the assistant emitted a JSON
/// string or any other scalar/object value (defensive: spec only promises
/// "any" for structured_output, not for result itself).
fn result_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum RawEnvelope {
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },
    #[serde(rename = "result")]
    Result(ResultEnvelope),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

/// One parsed line of the NDJSON stream.
#[derive(Debug, Clone)]
pub enum NdjsonEvent {
    Assistant { text: String },
    Result(ResultEnvelope),
    /// Any other `type`, or a line whose shape didn't match a known variant;
    /// carried as the raw parsed JSON value.
    Other(serde_json::Value),
}

/// Parse one stdout line. Only fails for a line that looks like the terminal
/// `result` envelope but is malformed JSON; any other unparsable line is
/// surfaced by the caller as `NdjsonEvent::Other` wrapping the raw text, not
/// as an error from this function.
pub fn parse_line(line: &str) -> Result<NdjsonEvent, AppError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(NdjsonEvent::Other(serde_json::Value::Null));
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            // Only treat this as a hard parse error if the line is plausibly
            // a `result` envelope (contains `"type":"result"`); anything else
            // is an intermediate line the spec says we must tolerate.
            if trimmed.contains("\"type\"") && trimmed.contains("\"result\"") {
                return Err(AppError::AssistantParseError(e.to_string()));
            }
            return Ok(NdjsonEvent::Other(serde_json::Value::String(line.to_string())));
        }
    };

    match serde_json::from_value::<RawEnvelope>(value.clone()) {
        Ok(RawEnvelope::Assistant { message }) => {
            let text = message
                .content
                .into_iter()
                .filter(|c| c.block_type == "text")
                .map(|c| c.text)
                .collect::<Vec<_>>()
                .join("");
            Ok(NdjsonEvent::Assistant { text })
        }
        Ok(RawEnvelope::Result(env)) => Ok(NdjsonEvent::Result(env)),
        Ok(RawEnvelope::Other) => Ok(NdjsonEvent::Other(value)),
        Err(e) => {
            if value.get("type").and_then(|t| t.as_str()) == Some("result") {
                Err(AppError::AssistantParseError(e.to_string()))
            } else {
                Ok(NdjsonEvent::Other(value))
            }
        }
    }
}
