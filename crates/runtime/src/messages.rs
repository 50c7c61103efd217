//! In-memory message store: append rules plus the heuristic token
//! estimator (no tokenizer — §4.5).

use al_domain::tool::{Message, MessageContent, ToolDefinition};

/// Divisor applied to the raw rune count. Anthropic-style providers pack
/// more runes per token on average.
pub const GENERIC_TOKEN_FACTOR: f64 = 4.0;
pub const ANTHROPIC_TOKEN_FACTOR: f64 = 3.8;

/// Append-only conversation history. Never reordered; tool results for a
/// step are appended immediately after the assistant message carrying
/// their calls, preserving call order.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append the assistant message carrying `calls`, followed by one
    /// tool-role message per result, in the same order as `calls`.
    pub fn append_step(&mut self, assistant: Message, tool_results: Vec<Message>) {
        self.messages.push(assistant);
        self.messages.extend(tool_results);
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }
}

/// Rough rune count of a tool definition's name, description, and schema.
fn tool_def_rune_len(def: &ToolDefinition) -> usize {
    def.name.chars().count() + def.description.chars().count() + def.parameters.to_string().chars().count()
}

/// `tokens ≈ (sum of rune-counts over message content and tool defs) /
/// factor + 32` (§4.5).
pub fn estimate_tokens(messages: &[Message], tools: &[ToolDefinition], factor: f64) -> u32 {
    let message_runes: usize = messages.iter().map(|m| content_rune_len(&m.content)).sum();
    let tool_runes: usize = tools.iter().map(tool_def_rune_len).sum();
    let total = (message_runes + tool_runes) as f64;
    (total / factor + 32.0).round() as u32
}

fn content_rune_len(content: &MessageContent) -> usize {
    content.rune_len()
}

/// Token pressure = estimate / context_limit. ≥ 0.70 triggers compaction.
pub fn pressure(estimated_tokens: u32, context_limit: u32) -> f64 {
    if context_limit == 0 {
        return 0.0;
    }
    estimated_tokens as f64 / context_limit as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use al_domain::tool::ToolResult;

    #[test]
    fn append_step_preserves_call_order() {
        let mut store = MessageStore::new();
        let r1 = ToolResult::ok("a", "exec", "ok");
        let r2 = ToolResult::ok("b", "read", "ok");
        store.append_step(
            Message::assistant("thinking"),
            vec![Message::tool_result(&r1), Message::tool_result(&r2)],
        );
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn estimate_tokens_scales_inversely_with_factor() {
        let messages = vec![Message::user("a".repeat(400))];
        let generic = estimate_tokens(&messages, &[], GENERIC_TOKEN_FACTOR);
        let anthropic = estimate_tokens(&messages, &[], ANTHROPIC_TOKEN_FACTOR);
        assert!(anthropic >= generic);
    }

    #[test]
    fn pressure_crosses_threshold_at_seventy_percent() {
        assert!(pressure(700, 1000) >= 0.70);
        assert!(pressure(699, 1000) < 0.70);
    }

    #[test]
    fn pressure_with_zero_limit_is_zero() {
        assert_eq!(pressure(100, 0), 0.0);
    }
}
