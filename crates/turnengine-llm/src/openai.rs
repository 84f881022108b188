use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::adapter::LlmAdapter;
use crate::types::{ChatMessage, ChatOptions, DeltaControl, ProviderError, Role, ToolCall, Usage};

/// An OpenAI-compatible chat-completions adapter (Groq, DeepSeek,
/// OpenRouter, local vLLM/Ollama-openai shims, and OpenAI itself all speak
/// this wire format).
pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_path: String,
    provider_name: String,
}

impl OpenAiAdapter {
    pub fn new(provider_name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_path(provider_name, base_url, "/v1/chat/completions", api_key)
    }

    pub fn with_path(
        provider_name: impl Into<String>,
        base_url: impl Into<String>,
        chat_path: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            chat_path: chat_path.into(),
            provider_name: provider_name.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.chat_path)
    }

    fn build_request_body(&self, messages: &[ChatMessage], options: &ChatOptions, stream: bool) -> Value {
        let messages: Vec<Value> = messages.iter().map(convert_message).collect();
        let mut body = serde_json::json!({
            "model": options.model,
            "messages": messages,
            "stream": stream,
        });

        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = Value::from(max_tokens);
        }
        if !options.tools.is_empty() {
            body["tools"] = Value::Array(
                options
                    .tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": { "name": t.name, "description": t.description, "parameters": t.parameters },
                        })
                    })
                    .collect(),
            );
        }
        for (k, v) in &options.passthrough {
            body[k] = v.clone();
        }
        body
    }
}

fn convert_message(m: &ChatMessage) -> Value {
    let role = match m.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    };
    let mut obj = serde_json::json!({ "role": role, "content": m.content });
    if let Some(id) = &m.tool_call_id {
        obj["tool_call_id"] = Value::String(id.clone());
    }
    if let Some(name) = &m.name {
        obj["name"] = Value::String(name.clone());
    }
    obj
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamChunk {
    model: Option<String>,
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamChoice {
    delta: StreamDeltaBody,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StreamDeltaBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCallDelta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[ChatMessage],
        options: &ChatOptions,
        on_delta: &mut (dyn FnMut(&[u8]) -> DeltaControl + Send),
    ) -> Result<Usage, ProviderError> {
        let body = self.build_request_body(messages, options, true);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(1000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(ProviderError::Api { status, message });
        }

        self.process_stream(response, cancel, on_delta).await
    }
}

impl OpenAiAdapter {
    async fn process_stream(
        &self,
        response: reqwest::Response,
        cancel: &CancellationToken,
        on_delta: &mut (dyn FnMut(&[u8]) -> DeltaControl + Send),
    ) -> Result<Usage, ProviderError> {
        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut usage = Usage::default();
        let mut tool_calls: Vec<(String, String, String)> = Vec::new(); // (id, name, args)
        let mut finish_reason = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                chunk = byte_stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let chunk = chunk?;
                    buffer.push_str(&String::from_utf8_lossy(&chunk));

                    while let Some(pos) = buffer.find('\n') {
                        let line = buffer[..pos].trim_end_matches('\r').to_string();
                        buffer.drain(..=pos);
                        let Some(data) = line.strip_prefix("data: ") else { continue };
                        if data == "[DONE]" {
                            continue;
                        }
                        let parsed: StreamChunk = match serde_json::from_str(data) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(error = %e, "failed to parse stream chunk");
                                continue;
                            }
                        };
                        if let Some(model) = parsed.model {
                            usage.model = model;
                        }
                        if let Some(u) = parsed.usage {
                            usage.tokens_in = u.prompt_tokens;
                            usage.tokens_out = u.completion_tokens;
                        }
                        for choice in parsed.choices {
                            if let Some(reason) = choice.finish_reason {
                                finish_reason = reason;
                            }
                            if let Some(text) = choice.delta.content {
                                if on_delta(text.as_bytes()) == DeltaControl::Break {
                                    usage.stop_reason = finish_reason.clone();
                                    return Ok(usage);
                                }
                            }
                            for (i, tc) in choice.delta.tool_calls.into_iter().enumerate() {
                                if tool_calls.len() <= i {
                                    tool_calls.push((String::new(), String::new(), String::new()));
                                }
                                let entry = &mut tool_calls[i];
                                if let Some(id) = tc.id {
                                    entry.0 = id;
                                }
                                if let Some(f) = tc.function {
                                    if let Some(name) = f.name {
                                        entry.1 = name;
                                    }
                                    if let Some(args) = f.arguments {
                                        entry.2.push_str(&args);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        usage.stop_reason = finish_reason;
        usage.tool_calls = tool_calls
            .into_iter()
            .map(|(id, name, args)| ToolCall {
                id,
                name,
                arguments: serde_json::from_str(&args).unwrap_or(Value::String(args)),
            })
            .collect();
        Ok(usage)
    }
}
