use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use narcissus_core::config::ModelConfig;
use narcissus_core::error::{NarcissusError, Result};
use narcissus_core::traits::{LlmClient, StructuredRequest};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn request(&self, prompt: String, response_format: Option<ResponseFormat>) -> ChatRequest {
        ChatRequest {
            model: self.config.model_id.clone(),
            messages: vec![OaiMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: if self.config.temperature > 0.0 {
                Some(self.config.temperature)
            } else {
                None
            },
            response_format,
        }
    }

    async fn send(&self, body: ChatRequest) -> Result<String> {
        let url = self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
        let mut req = self.http.post(url).json(&body);

        if let Some(api_key) = &self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| NarcissusError::LlmRequest(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(NarcissusError::LlmRequest(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| NarcissusError::LlmParse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }

        first_content(parsed)
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct OaiMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: String,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn first_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| NarcissusError::LlmParse("response has no message content".into()))
}

/// Parse a JSON answer, tolerating a surrounding Markdown code fence.
fn parse_json_answer(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).map_err(|e| NarcissusError::LlmParse(e.to_string()))
}

impl LlmClient for OpenAiClient {
    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let body = self.request(prompt, None);
            self.send(body).await
        })
    }

    fn predict_json(&self, request: StructuredRequest) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let format = ResponseFormat {
                r#type: "json_schema".to_string(),
                json_schema: JsonSchemaFormat {
                    name: request.name,
                    schema: request.schema,
                    strict: true,
                },
            };
            let body = self.request(request.prompt, Some(format));
            let text = self.send(body).await?;
            parse_json_answer(&text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ModelConfig {
        toml::from_str::<ModelConfig>("model_id = \"gpt-4o-mini\"").unwrap()
    }

    #[test]
    fn test_completion_request_shape() {
        let client = OpenAiClient::new(config());
        let body = serde_json::to_value(client.request("hello".into(), None)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_structured_request_shape() {
        let client = OpenAiClient::new(config());
        let format = ResponseFormat {
            r#type: "json_schema".into(),
            json_schema: JsonSchemaFormat {
                name: "ResearchPlan".into(),
                schema: json!({"type": "object"}),
                strict: true,
            },
        };
        let body = serde_json::to_value(client.request("plan".into(), Some(format))).unwrap();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "ResearchPlan");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn test_zero_temperature_omitted() {
        let mut cfg = config();
        cfg.temperature = 0.0;
        let client = OpenAiClient::new(cfg);
        let body = serde_json::to_value(client.request("x".into(), None)).unwrap();
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_first_content() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "An essay."}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3}
        }))
        .unwrap();
        assert_eq!(first_content(response).unwrap(), "An essay.");
    }

    #[test]
    fn test_first_content_empty() {
        let response: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(first_content(response), Err(NarcissusError::LlmParse(_))));
    }

    #[test]
    fn test_parse_json_answer_fenced() {
        let value = parse_json_answer("```json\n{\"queries\": []}\n```").unwrap();
        assert_eq!(value, json!({"queries": []}));

        let value = parse_json_answer("  {\"a\": 1} ").unwrap();
        assert_eq!(value, json!({"a": 1}));

        assert!(parse_json_answer("not json").is_err());
    }
}
