//! OpenAI-compatible completion client.
//!
//! Works against OpenAI and any API speaking the same chat-completions
//! dialect. Non-streaming: the orchestrator consumes whole completions.

use reqwest::Client;
use serde::Deserialize;

use super::{ChatRole, Completion, CompletionRequest, LlmClient, LlmError, LlmSettings};

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    settings: LlmSettings,
    client: Client,
}

impl OpenAiCompatClient {
    /// Create a client from settings.
    pub fn new(settings: LlmSettings) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(settings.call_timeout()).build()?;
        Ok(Self { settings, client })
    }

    /// The configured settings.
    #[must_use]
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn convert_messages(request: &CompletionRequest) -> Vec<serde_json::Value> {
        request
            .messages
            .iter()
            .map(|message| {
                serde_json::json!({
                    "role": match message.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    "content": message.content,
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    function: ApiToolFunction,
}

#[derive(Debug, Deserialize)]
struct ApiToolFunction {
    name: String,
    arguments: String,
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "messages": Self::convert_messages(&request),
            "temperature": request.temperature.unwrap_or(self.settings.temperature),
            "max_tokens": request.max_tokens.unwrap_or(self.settings.max_tokens),
        });

        let mut http_request = self.client.post(self.api_url()).json(&body);
        if let Some(ref api_key) = self.settings.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = http_request.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Request(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Request(format!("status {status}: {detail}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| LlmError::Malformed(error.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed("response carried no choices".to_string()))?;

        if let Some(tool_calls) = choice.message.tool_calls {
            if let Some(call) = tool_calls.into_iter().next() {
                let arguments = serde_json::from_str::<serde_json::Value>(&call.function.arguments)
                    .ok()
                    .and_then(|value| value.as_object().cloned())
                    .unwrap_or_default();
                return Ok(Completion::ToolCall {
                    name: call.function.name,
                    arguments,
                });
            }
        }

        match choice.message.content {
            Some(content) => Ok(Completion::Text(content)),
            None => Err(LlmError::Malformed(
                "response carried neither content nor tool calls".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_tolerates_trailing_slash() {
        let settings = LlmSettings {
            base_url: "http://localhost:8000/".to_string(),
            ..LlmSettings::default()
        };
        let client = OpenAiCompatClient::new(settings).unwrap();
        assert_eq!(client.api_url(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn message_conversion_maps_roles() {
        let request = CompletionRequest::new(vec![
            super::super::ChatMessage::system("be terse"),
            super::super::ChatMessage::user("hello"),
        ]);
        let converted = OpenAiCompatClient::convert_messages(&request);
        assert_eq!(converted[0]["role"], "system");
        assert_eq!(converted[1]["role"], "user");
        assert_eq!(converted[1]["content"], "hello");
    }

    #[test]
    fn tool_call_response_parses_argument_map() {
        let payload = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "web_search",
                            "arguments": "{\"query\": \"rust web frameworks\"}"
                        }
                    }]
                }
            }]
        });
        let parsed: ChatCompletionResponse = serde_json::from_value(payload).unwrap();
        let call = parsed.choices[0]
            .message
            .tool_calls
            .as_ref()
            .unwrap()
            .first()
            .unwrap();
        assert_eq!(call.function.name, "web_search");
    }
}
