//! OpenAI-compatible adapter (OpenAI, Azure OpenAI-shaped endpoints,
//! DeepSeek, and other chat-completions-wire-format providers).
//!
//! Implements call-id keyed streaming: `delta.tool_calls[]` entries carry
//! an `id` only on the first delta for a call; subsequent deltas carry
//! only `index` plus an `arguments` fragment, and must be correlated back
//! to the call via an index-to-id table.

use crate::naming::{sanitize_provider_tool_name, ToolNameAliasMap};
use crate::traits::{LlmProvider, ResponseFormat, TurnRequest};
use crate::util::from_reqwest;
use al_domain::cancel::CancelToken;
use al_domain::error::{Error, Result};
use al_domain::stream::{BoxStream, FinishReason, StreamEvent, Usage};
use al_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use serde_json::Value;
use std::collections::HashMap;

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
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

    fn build_body(&self, req: &TurnRequest, alias_map: &ToolNameAliasMap) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(|t| tool_to_openai(t, alias_map)).collect();
            body["tools"] = Value::Array(tools);
            body["parallel_tool_calls"] = Value::Bool(false);
        }
        if let Some(max) = req.max_output_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        match req.response_format {
            ResponseFormat::JsonObject => body["response_format"] = serde_json::json!({"type": "json_object"}),
            ResponseFormat::Text => body["response_format"] = serde_json::json!({"type": "text"}),
            ResponseFormat::Default => {}
        }

        body
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::System => serde_json::json!({"role": "system", "content": msg.content.extract_all_text()}),
        Role::User => serde_json::json!({"role": "user", "content": msg.content.extract_all_text()}),
        Role::Assistant => assistant_to_openai(msg),
        Role::Tool => tool_result_to_openai(msg),
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({"role": "assistant", "content": t}),
        MessageContent::Parts(parts) => {
            let text = msg.content.extract_all_text();
            let tool_calls: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolCall { id, name, args_json } => Some(serde_json::json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": sanitize_provider_tool_name(name),
                            "arguments": args_json.to_string(),
                        }
                    })),
                    _ => None,
                })
                .collect();

            let mut obj = serde_json::json!({"role": "assistant"});
            obj["content"] = if text.is_empty() { Value::Null } else { Value::String(text) };
            if !tool_calls.is_empty() {
                obj["tool_calls"] = Value::Array(tool_calls);
            }
            obj
        }
    }
}

fn tool_result_to_openai(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Parts(parts) => {
            // OpenAI allows exactly one tool_call_id per tool-role message;
            // a result with multiple parts is split by the caller upstream.
            if let Some(ContentPart::ToolResultPart { call_id, payload }) =
                parts.iter().find(|p| matches!(p, ContentPart::ToolResultPart { .. }))
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": payload.to_string(),
                });
            }
            serde_json::json!({"role": "tool", "tool_call_id": "", "content": ""})
        }
        MessageContent::Text(t) => serde_json::json!({"role": "tool", "tool_call_id": "", "content": t}),
    }
}

fn tool_to_openai(tool: &ToolDefinition, _alias_map: &ToolNameAliasMap) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": sanitize_provider_tool_name(&tool.name),
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// One in-flight tool call, correlated by the provider's delta `index`
/// until its `id` arrives, then accumulated by `call_id`.
struct PendingCall {
    call_id: String,
    tool_name: String,
    args_buf: String,
    started: bool,
}

struct StreamState {
    alias_map: ToolNameAliasMap,
    index_to_call: HashMap<u64, PendingCall>,
    usage: Usage,
}

fn parse_openai_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    if data == "[DONE]" {
        return events;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    if let Some(err) = v.get("error") {
        let msg = err.get("message").and_then(|m| m.as_str()).unwrap_or("unknown error");
        events.push(Ok(StreamEvent::Error { message: msg.to_string() }));
        return events;
    }

    if let Some(usage) = v.get("usage") {
        if let Some(input) = usage.get("prompt_tokens").and_then(|x| x.as_u64()) {
            state.usage.input = input as u32;
        }
        if let Some(output) = usage.get("completion_tokens").and_then(|x| x.as_u64()) {
            state.usage.output = output as u32;
        }
        if let Some(reasoning) = usage
            .get("completion_tokens_details")
            .and_then(|d| d.get("reasoning_tokens"))
            .and_then(|x| x.as_u64())
        {
            state.usage.reasoning = reasoning as u32;
        }
        events.push(Ok(StreamEvent::Usage { usage: state.usage }));
    }

    let choice = match v.get("choices").and_then(|c| c.get(0)) {
        Some(c) => c,
        None => return events,
    };

    if let Some(delta) = choice.get("delta") {
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::TextDelta { text: text.to_string() }));
            }
        }
        if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::ThinkingDelta { text: text.to_string() }));
            }
        }
        if let Some(tool_calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tool_calls {
                let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let incoming_id = tc.get("id").and_then(|v| v.as_str());
                let fn_obj = tc.get("function");
                let incoming_name = fn_obj.and_then(|f| f.get("name")).and_then(|v| v.as_str());
                let incoming_args = fn_obj.and_then(|f| f.get("arguments")).and_then(|v| v.as_str());

                if let Some(id) = incoming_id {
                    let alias = incoming_name.unwrap_or("");
                    let tool_name = state.alias_map.resolve(alias);
                    state.index_to_call.insert(index, PendingCall {
                        call_id: id.to_string(),
                        tool_name: tool_name.clone(),
                        args_buf: String::new(),
                        started: false,
                    });
                }

                if let Some(call) = state.index_to_call.get_mut(&index) {
                    if !call.started {
                        call.started = true;
                        events.push(Ok(StreamEvent::ToolCallStart {
                            call_id: call.call_id.clone(),
                            tool_name: call.tool_name.clone(),
                        }));
                    }
                    if let Some(frag) = incoming_args {
                        call.args_buf.push_str(frag);
                        let parsed = serde_json::from_str(&call.args_buf).ok();
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            call_id: call.call_id.clone(),
                            raw: call.args_buf.clone(),
                            parsed,
                        }));
                    }
                }
            }
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
        let mut ended: Vec<(u64, PendingCall)> = state.index_to_call.drain().collect();
        ended.sort_by_key(|(index, _)| *index);
        for (_, call) in ended {
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
        events.push(Ok(StreamEvent::FinishReason { reason: map_finish_reason(reason) }));
    }

    events
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn stream_turn(
        &self,
        req: &TurnRequest,
        cancel: &CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let alias_map = ToolNameAliasMap::build(req.tools.iter().map(|t| t.name.clone()));
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req, &alias_map);
        let provider_id = self.id.clone();

        tracing::debug!(provider = %self.id, url = %url, "openai-compatible stream request");

        if cancel.is_canceled() {
            return Err(Error::Canceled("canceled before request sent".into()));
        }

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: provider_id,
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let mut state = StreamState { alias_map, index_to_call: HashMap::new(), usage: Usage::default() };
        Ok(crate::sse::sse_response_stream(resp, move |data| parse_openai_sse(data, &mut state)))
    }
}
