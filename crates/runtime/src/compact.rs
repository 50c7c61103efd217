//! Context compaction — collapses archived messages into a single
//! system-role summary under token pressure (§4.2.4, §4.5).
//!
//! Unlike the teacher's transcript-marker idiom (a persisted line scanned
//! backwards for a `compaction` flag), this operates on the in-memory
//! [`MessageStore`] directly: compaction replaces the prefix outright
//! rather than appending a marker, since there is no persisted transcript
//! to preserve history in.

use al_domain::config::CompactionConfig;
use al_domain::tool::{ContentPart, Message, MessageContent, Role};

/// Whether compaction should run given the current pressure estimate.
/// Pressure-driven only; a list at or under `keep_last_messages` is
/// naturally a no-op in [`run_compaction`] regardless of pressure.
pub fn should_compact(pressure: f64, config: &CompactionConfig) -> bool {
    config.auto && pressure >= config.pressure_threshold
}

/// Split `messages` into (archived_prefix, kept_suffix), where the suffix
/// is the last `keep_last_messages` messages verbatim.
pub fn split_for_compaction(messages: &[Message], keep_last_messages: usize) -> (&[Message], &[Message]) {
    if messages.len() <= keep_last_messages {
        return (&[], messages);
    }
    let split_at = messages.len() - keep_last_messages;
    (&messages[..split_at], &messages[split_at..])
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn first_n_runes(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Build the archived-prefix summary: up to `max_lines` lines of
/// `"- role: first-100-runes..."`.
pub fn summarize_archived(archived: &[Message], max_lines: usize) -> String {
    let mut lines = Vec::with_capacity(max_lines + 1);
    lines.push("Compressed context summary:".to_string());
    for message in archived.iter().take(max_lines) {
        let text = message.content.extract_all_text();
        let snippet = first_n_runes(&text, 100);
        lines.push(format!("- {}: {}...", role_label(message.role), snippet));
    }
    lines.join("\n")
}

/// Truncate a tool-result payload's textual content to `max_runes`,
/// suffixed `" ... [compressed]"`, if it exceeds the cap.
fn truncate_tool_result(message: &Message, max_runes: usize) -> Message {
    match &message.content {
        MessageContent::Parts(parts) => {
            let new_parts = parts
                .iter()
                .map(|p| match p {
                    ContentPart::ToolResultPart { call_id, payload } => {
                        let mut payload = payload.clone();
                        if let Some(details) = payload.get("details").and_then(|v| v.as_str()) {
                            if details.chars().count() > max_runes {
                                let truncated = format!("{} ... [compressed]", first_n_runes(details, max_runes));
                                payload["details"] = serde_json::Value::String(truncated);
                            }
                        }
                        ContentPart::ToolResultPart { call_id: call_id.clone(), payload }
                    }
                    other => other.clone(),
                })
                .collect();
            Message { role: message.role, content: MessageContent::Parts(new_parts) }
        }
        MessageContent::Text(_) => message.clone(),
    }
}

/// Run compaction: returns the new message list (summary + kept suffix),
/// or `None` if `messages.len() <= keep_last_messages` (a no-op).
pub fn run_compaction(messages: &[Message], config: &CompactionConfig) -> Option<Vec<Message>> {
    let (archived, kept) = split_for_compaction(messages, config.keep_last_messages);
    if archived.is_empty() {
        return None;
    }

    let summary = summarize_archived(archived, config.summary_max_lines);
    let mut result = Vec::with_capacity(kept.len() + 1);
    result.push(Message::system(summary));
    result.extend(kept.iter().map(|m| truncate_tool_result(m, config.tool_result_truncate_runes)));
    Some(result)
}
