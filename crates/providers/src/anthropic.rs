//! Anthropic-style adapter.
//!
//! Implements content-block-indexed streaming: tool-call arguments arrive
//! as `input_json_delta` fragments keyed by content-block index, and must
//! be accumulated and parsed only once the block closes.

use crate::naming::{sanitize_provider_tool_name, ToolNameAliasMap};
use crate::traits::{LlmProvider, ResponseFormat, TurnRequest};
use crate::util::from_reqwest;
use al_domain::cancel::CancelToken;
use al_domain::error::{Error, Result};
use al_domain::stream::{BoxStream, FinishReason, StreamEvent, Usage};
use al_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use serde_json::Value;
use std::collections::HashMap;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicStyleProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicStyleProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &TurnRequest, alias_map: &ToolNameAliasMap, stream: bool) -> Value {
        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.extract_all_text()),
                Role::User => api_messages.push(user_msg_to_anthropic(msg)),
                Role::Assistant => api_messages.push(assistant_msg_to_anthropic(msg)),
                Role::Tool => api_messages.push(tool_result_to_anthropic(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": api_messages,
            "stream": stream,
            "parallel_tool_calls": false,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(|t| tool_to_anthropic(t, alias_map)).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if matches!(req.response_format, ResponseFormat::JsonObject) {
            // Anthropic has no native json_object mode; callers rely on a
            // tool-forced response instead. Recorded, not acted on here.
        }
        if let Some(budget) = req.thinking_budget_tokens {
            body["thinking"] = serde_json::json!({"type": "enabled", "budget_tokens": budget});
        }
        body["max_tokens"] = serde_json::json!(req.max_output_tokens.unwrap_or(4096));

        body
    }
}

fn real_tool_name(alias: &str, alias_map: &ToolNameAliasMap) -> String {
    alias_map.resolve(alias)
}

fn user_msg_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({"role": "user", "content": t}),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
                    ContentPart::Image { uri, media_type } => Some(serde_json::json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": media_type.as_deref().unwrap_or("image/png"),
                            "data": uri,
                        }
                    })),
                    _ => None,
                })
                .collect();
            serde_json::json!({"role": "user", "content": content})
        }
    }
}

fn assistant_msg_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({
            "role": "assistant",
            "content": [{"type": "text", "text": t}],
        }),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
                    ContentPart::ToolCall { id, name, args_json } => Some(serde_json::json!({
                        "type": "tool_use",
                        "id": id,
                        "name": sanitize_provider_tool_name(name),
                        "input": args_json,
                    })),
                    _ => None,
                })
                .collect();
            serde_json::json!({"role": "assistant", "content": content})
        }
    }
}

fn tool_result_to_anthropic(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResultPart { call_id, payload } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": payload.to_string(),
                    "is_error": payload.get("status").and_then(|s| s.as_str()) == Some("error"),
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![serde_json::json!({
            "type": "tool_result",
            "tool_use_id": "",
            "content": t,
        })],
    };
    serde_json::json!({"role": "user", "content": content})
}

fn tool_to_anthropic(tool: &ToolDefinition, _alias_map: &ToolNameAliasMap) -> Value {
    serde_json::json!({
        "name": sanitize_provider_tool_name(&tool.name),
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

/// Per-index accumulation state for one in-flight streaming call.
struct PendingCall {
    call_id: String,
    tool_name: String,
    args_buf: String,
}

struct StreamState {
    alias_map: ToolNameAliasMap,
    pending: HashMap<u64, PendingCall>,
    usage: Usage,
}

fn parse_anthropic_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    let event_type = v.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "message_start" => {
            if let Some(u) = v.get("message").and_then(|m| m.get("usage")) {
                if let Some(input) = u.get("input_tokens").and_then(|x| x.as_u64()) {
                    state.usage.input = input as u32;
                }
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                    let call_id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let alias = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let tool_name = real_tool_name(&alias, &state.alias_map);
                    events.push(Ok(StreamEvent::ToolCallStart {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                    }));
                    state.pending.insert(idx, PendingCall { call_id, tool_name, args_buf: String::new() });
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|v| v.as_str()) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::TextDelta { text: text.to_string() }));
                            }
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(text) = delta.get("thinking").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::ThinkingDelta { text: text.to_string() }));
                            }
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                            if let Some(call) = state.pending.get_mut(&idx) {
                                call.args_buf.push_str(partial);
                                let parsed = serde_json::from_str(&call.args_buf).ok();
                                events.push(Ok(StreamEvent::ToolCallDelta {
                                    call_id: call.call_id.clone(),
                                    raw: call.args_buf.clone(),
                                    parsed,
                                }));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(call) = state.pending.remove(&idx) {
                let arguments: Value = if call.args_buf.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&call.args_buf).unwrap_or(Value::Object(Default::default()))
                };
                events.push(Ok(StreamEvent::ToolCallEnd {
                    call_id: call.call_id,
                    tool_name: call.tool_name,
                    arguments,
                }));
            }
        }

        "message_delta" => {
            if let Some(output) = v.get("usage").and_then(|u| u.get("output_tokens")).and_then(|x| x.as_u64()) {
                state.usage.output = output as u32;
            }
            if let Some(stop_reason) = v.get("delta").and_then(|d| d.get("stop_reason")).and_then(|v| v.as_str()) {
                events.push(Ok(StreamEvent::Usage { usage: state.usage }));
                events.push(Ok(StreamEvent::FinishReason { reason: map_stop_reason(stop_reason) }));
            }
        }

        "error" => {
            let msg = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            events.push(Ok(StreamEvent::Error { message: msg.to_string() }));
        }

        _ => {}
    }

    events
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" => FinishReason::Stop,
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" => FinishReason::Length,
        "stop_sequence" => FinishReason::Stop,
        _ => FinishReason::Unknown,
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicStyleProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn stream_turn(
        &self,
        req: &TurnRequest,
        cancel: &CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let alias_map = ToolNameAliasMap::build(req.tools.iter().map(|t| t.name.clone()));
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(req, &alias_map, true);
        let provider_id = self.id.clone();

        tracing::debug!(provider = %self.id, url = %url, "anthropic-style stream request");

        if cancel.is_canceled() {
            return Err(Error::Canceled("canceled before request sent".into()));
        }

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: provider_id,
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let mut state = StreamState { alias_map, pending: HashMap::new(), usage: Usage::default() };
        Ok(crate::sse::sse_response_stream(resp, move |data| parse_anthropic_sse(data, &mut state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_stop_reason_tool_use_maps_to_tool_calls() {
        assert_eq!(map_stop_reason("tool_use"), FinishReason::ToolCalls);
    }

    #[test]
    fn map_stop_reason_end_turn_maps_to_stop() {
        assert_eq!(map_stop_reason("end_turn"), FinishReason::Stop);
    }

    #[test]
    fn map_stop_reason_unknown_status_maps_to_unknown() {
        assert_eq!(map_stop_reason("something_new"), FinishReason::Unknown);
    }

    #[test]
    fn content_block_delta_accumulates_and_parses_cumulatively() {
        let mut state = StreamState {
            alias_map: ToolNameAliasMap::build(vec!["exec"]),
            pending: HashMap::new(),
            usage: Usage::default(),
        };
        let start = r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"c1","name":"exec"}}"#;
        parse_anthropic_sse(start, &mut state);

        let delta1 = r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"cmd\""}}"#;
        let ev1 = parse_anthropic_sse(delta1, &mut state);
        match ev1.into_iter().next().unwrap().unwrap() {
            StreamEvent::ToolCallDelta { parsed, .. } => assert!(parsed.is_none()),
            _ => panic!("expected ToolCallDelta"),
        }

        let delta2 = r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":":\"ls\"}"}}"#;
        let ev2 = parse_anthropic_sse(delta2, &mut state);
        match ev2.into_iter().next().unwrap().unwrap() {
            StreamEvent::ToolCallDelta { parsed, .. } => {
                assert_eq!(parsed.unwrap()["cmd"], "ls");
            }
            _ => panic!("expected ToolCallDelta"),
        }
    }

    #[test]
    fn content_block_stop_emits_tool_call_end_with_real_name() {
        let mut state = StreamState {
            alias_map: ToolNameAliasMap::build(vec!["terminal.exec"]),
            pending: HashMap::new(),
            usage: Usage::default(),
        };
        let start = r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"c1","name":"terminal_exec"}}"#;
        parse_anthropic_sse(start, &mut state);
        let stop = r#"{"type":"content_block_stop","index":0}"#;
        let events = parse_anthropic_sse(stop, &mut state);
        match events.into_iter().next().unwrap().unwrap() {
            StreamEvent::ToolCallEnd { tool_name, .. } => assert_eq!(tool_name, "terminal.exec"),
            _ => panic!("expected ToolCallEnd"),
        }
    }
}
