use al_domain::cancel::CancelToken;
use al_domain::error::Result;
use al_domain::stream::{BoxStream, StreamEvent, TurnResult};
use al_domain::tool::{Message, ToolDefinition};

/// Response format the model is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Default,
    Text,
    JsonObject,
}

/// A provider-agnostic request for one turn.
///
/// Mirrors the external-interface contract: `parallel_tool_calls` is
/// always sent as `false` so the model emits a single batch per step.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub response_format: ResponseFormat,
    pub thinking_budget_tokens: Option<u32>,
}

impl TurnRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools,
            max_output_tokens: None,
            temperature: None,
            top_p: None,
            response_format: ResponseFormat::Default,
            thinking_budget_tokens: None,
        }
    }
}

/// Trait every LLM adapter must implement.
///
/// A single call drives one turn: the adapter suspends while reading the
/// provider's event stream, emits canonical [`StreamEvent`]s as they
/// arrive, and yields the aggregated [`TurnResult`] as the stream's final
/// item. The caller (the turn controller) drains the stream; the adapter
/// never inspects provider-specific frames outside this module.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Unique identifier for this provider instance (`"{provider_id}"` half
    /// of the run's `model` field).
    fn provider_id(&self) -> &str;

    /// Stream one turn. Honors `cancel`: a per-frame read must observe
    /// cancellation and terminate the stream promptly rather than blocking
    /// indefinitely.
    async fn stream_turn(
        &self,
        req: &TurnRequest,
        cancel: &CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

/// Drains a provider's event stream, reassembling it into a single
/// [`TurnResult`] (spec's "adapter suspends ... emits StreamEvents ...
/// returns aggregated TurnResult on stream end"). Shared by every adapter
/// so the aggregation rules — ordering, missing-completion detection,
/// finish-reason normalization — are implemented exactly once.
pub async fn aggregate_turn(
    mut events: BoxStream<'static, Result<StreamEvent>>,
) -> Result<TurnResult> {
    use al_domain::error::Error;
    use al_domain::stream::{FinishReason, SourceRef, Usage};
    use al_domain::tool::ToolCall;
    use futures_util::StreamExt;
    use std::collections::BTreeMap;

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut usage = Usage::default();
    let mut finish_reason: Option<FinishReason> = None;
    let mut sources: Vec<SourceRef> = Vec::new();

    // call_id -> (first_seen_index, tool_name, arguments) for calls that
    // received an explicit tool_call_end.
    let mut ended_calls: BTreeMap<String, (usize, String, serde_json::Value)> = BTreeMap::new();
    let mut next_index = 0usize;

    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::TextDelta { text: delta } => text.push_str(&delta),
            StreamEvent::ThinkingDelta { text: delta } => reasoning.push_str(&delta),
            StreamEvent::ToolCallStart { .. } => {}
            StreamEvent::ToolCallDelta { .. } => {}
            StreamEvent::ToolCallEnd { call_id, tool_name, arguments } => {
                let idx = next_index;
                next_index += 1;
                ended_calls.insert(call_id, (idx, tool_name, arguments));
            }
            StreamEvent::Usage { usage: u } => usage = u,
            StreamEvent::FinishReason { reason } => finish_reason = Some(reason),
            StreamEvent::Error { message } => return Err(Error::Provider {
                provider: "stream".into(),
                message,
            }),
        }
    }

    // Primary order: first-seen index. Ties (none possible here since each
    // call_id is unique) would break lexicographically by call_id.
    let mut indexed: Vec<(usize, ToolCall)> = ended_calls
        .into_iter()
        .map(|(call_id, (idx, tool_name, arguments))| (idx, ToolCall { call_id, tool_name, arguments }))
        .collect();
    indexed.sort_by_key(|(idx, _)| *idx);
    let tool_calls: Vec<ToolCall> = indexed.into_iter().map(|(_, c)| c).collect();

    let resolved_reason = match finish_reason {
        Some(r) => r,
        None if !tool_calls.is_empty() => FinishReason::ToolCalls,
        None if !text.is_empty() => FinishReason::Stop,
        None => {
            return Err(Error::MissingCompletion(
                "stream ended without a terminal frame".into(),
            ))
        }
    };

    let result = TurnResult {
        finish_reason: resolved_reason,
        text,
        reasoning,
        tool_calls,
        usage,
        sources,
        raw_diag: None,
    }
    .normalize_finish_reason();

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use al_domain::stream::FinishReason;
    use futures_util::stream;

    fn boxed(events: Vec<Result<StreamEvent>>) -> BoxStream<'static, Result<StreamEvent>> {
        Box::pin(stream::iter(events))
    }

    #[tokio::test]
    async fn aggregates_text_only_turn() {
        let events = boxed(vec![
            Ok(StreamEvent::TextDelta { text: "hel".into() }),
            Ok(StreamEvent::TextDelta { text: "lo".into() }),
            Ok(StreamEvent::FinishReason { reason: FinishReason::Stop }),
        ]);
        let result = aggregate_turn(events).await.unwrap();
        assert_eq!(result.text, "hello");
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert!(result.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn tool_calls_force_finish_reason_override() {
        let events = boxed(vec![
            Ok(StreamEvent::ToolCallEnd {
                call_id: "a".into(),
                tool_name: "exec".into(),
                arguments: serde_json::json!({"cmd": "ls"}),
            }),
            Ok(StreamEvent::FinishReason { reason: FinishReason::Stop }),
        ]);
        let result = aggregate_turn(events).await.unwrap();
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(result.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn missing_terminal_frame_with_ended_call_yields_tool_calls() {
        let events = boxed(vec![Ok(StreamEvent::ToolCallEnd {
            call_id: "a".into(),
            tool_name: "exec".into(),
            arguments: serde_json::json!({}),
        })]);
        let result = aggregate_turn(events).await.unwrap();
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
    }

    #[tokio::test]
    async fn missing_terminal_frame_no_text_no_calls_errors() {
        let events = boxed(vec![]);
        let err = aggregate_turn(events).await.unwrap_err();
        assert!(err.to_string().contains("missing completion event") || err.to_string().contains("terminal frame"));
    }

    #[tokio::test]
    async fn preserves_first_seen_order_for_tool_calls() {
        let events = boxed(vec![
            Ok(StreamEvent::ToolCallEnd {
                call_id: "b".into(),
                tool_name: "read".into(),
                arguments: serde_json::json!({}),
            }),
            Ok(StreamEvent::ToolCallEnd {
                call_id: "a".into(),
                tool_name: "write".into(),
                arguments: serde_json::json!({}),
            }),
            Ok(StreamEvent::FinishReason { reason: FinishReason::ToolCalls }),
        ]);
        let result = aggregate_turn(events).await.unwrap();
        assert_eq!(result.tool_calls[0].call_id, "b");
        assert_eq!(result.tool_calls[1].call_id, "a");
    }
}
