use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
        ResponseFormat,
    },
    Client,
};

use crate::{
    config::{parse_provider_model, LlmConfig},
    error::{MnemaError, Result},
    intelligence::RawKnowledge,
    llm::prompts,
    models::{format_messages, Message},
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";

const EXTRACTION_MAX_TOKENS: u32 = 2000;
const TOPIC_MAX_TOKENS: u32 = 500;
const SUMMARY_MAX_TOKENS: u32 = 400;
const JSON_TEMPERATURE: f32 = 0.1;

/// Summary and topical metadata distilled from a full conversation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationDigest {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Topics and entities extracted from free-form query text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicAnalysis {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Model-backed extraction and summarization calls.
///
/// Every method is degradable at the call site: services treat failures
/// here as a reason to skip enrichment, not to fail the operation.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Extract entities, relationships, and temporal facts from a conversation.
    async fn extract_knowledge(&self, messages: &[Message]) -> Result<RawKnowledge>;

    /// Summarize the conversation and identify its topics and entities.
    async fn digest(&self, messages: &[Message]) -> Result<ConversationDigest>;

    /// Extract topics and entities from raw query text.
    async fn analyze_topics(&self, text: &str) -> Result<TopicAnalysis>;

    /// Synthesize a short natural-language summary of retrieved context.
    async fn summarize_context(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
struct ApiConfig {
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

/// [`ExtractionClient`] backed by an OpenAI-compatible chat completion API.
#[derive(Clone)]
pub struct OpenAiExtraction {
    client: Client<OpenAIConfig>,
    config: ApiConfig,
}

impl OpenAiExtraction {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_config = ApiConfig::from_llm_config(config);

        let (provider, _) = parse_provider_model(&config.model);
        let needs_api_key = !matches!(provider.to_lowercase().as_str(), "ollama" | "lmstudio");

        if needs_api_key && api_config.api_key.is_none() {
            return Err(MnemaError::Llm(
                "API key required for this provider".to_string(),
            ));
        }

        let openai_config = OpenAIConfig::new()
            .with_api_base(api_config.base_url.clone())
            .with_api_key(api_config.api_key.clone().unwrap_or_default());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api_config.timeout_secs))
            .build()
            .map_err(|error| {
                MnemaError::Llm(format!("Failed to create LLM HTTP client: {error}"))
            })?;

        // Bound async-openai's internal backoff to our timeout. Its default
        // max_elapsed_time retries 500s for up to 15 minutes, independent of
        // the retry loop in complete()/complete_json().
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(api_config.timeout_secs)),
            ..Default::default()
        };

        let client = Client::with_config(openai_config)
            .with_http_client(http_client)
            .with_backoff(backoff);

        Ok(Self {
            client,
            config: api_config,
        })
    }

    async fn complete(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(MnemaError::Validation("Prompt cannot be empty".to_string()));
        }

        let mut last_error: Option<MnemaError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay_ms = 100 * 2_u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let request = self.build_request(prompt, system_prompt, None, SUMMARY_MAX_TOKENS)?;

            match self.client.chat().create(request).await {
                Ok(response) => return Self::extract_content(response),
                Err(error) => {
                    if let Some(rate_limit_error) = Self::rate_limit_error(&error) {
                        return Err(rate_limit_error);
                    }

                    if let Some(auth_error) = Self::auth_error(&error) {
                        return Err(auth_error);
                    }

                    let retryable = Self::is_retryable(&error);
                    let mapped_error = Self::map_openai_error(error);

                    if retryable && attempt < self.config.max_retries {
                        last_error = Some(mapped_error);
                        continue;
                    }

                    return Err(mapped_error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| MnemaError::Llm("LLM completion failed after retries".to_string())))
    }

    async fn complete_json<T>(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        max_tokens: u32,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if prompt.trim().is_empty() {
            return Err(MnemaError::Validation("Prompt cannot be empty".to_string()));
        }

        let mut last_error: Option<MnemaError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay_ms = 100 * 2_u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let request = self.build_request(
                prompt,
                system_prompt,
                Some(ResponseFormat::JsonObject),
                max_tokens,
            )?;

            match self.client.chat().create(request).await {
                Ok(response) => {
                    let content = Self::extract_content(response)?;
                    tracing::debug!(response_len = content.len(), "LLM JSON response received");
                    return serde_json::from_str(&content).map_err(|e| {
                        tracing::error!(
                            response_len = content.len(),
                            response_preview = %content.chars().take(100).collect::<String>(),
                            error = %e,
                            "Failed to parse JSON response"
                        );
                        MnemaError::Llm(format!("Failed to parse JSON response: {e}"))
                    });
                }
                Err(error) => {
                    if let Some(rate_limit_error) = Self::rate_limit_error(&error) {
                        return Err(rate_limit_error);
                    }

                    if let Some(auth_error) = Self::auth_error(&error) {
                        return Err(auth_error);
                    }

                    let retryable = Self::is_retryable(&error);
                    let mapped_error = Self::map_openai_error(error);

                    if retryable && attempt < self.config.max_retries {
                        last_error = Some(mapped_error);
                        continue;
                    }

                    return Err(mapped_error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            MnemaError::Llm("LLM JSON completion failed after retries".to_string())
        }))
    }

    fn build_request(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        response_format: Option<ResponseFormat>,
        max_tokens: u32,
    ) -> Result<CreateChatCompletionRequest> {
        let mut messages = Vec::new();

        if let Some(system_prompt) = system_prompt.filter(|value| !value.trim().is_empty()) {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(|error| {
                        MnemaError::Validation(format!("Invalid system prompt: {error}"))
                    })?
                    .into(),
            );
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|error| MnemaError::Validation(format!("Invalid user prompt: {error}")))?
                .into(),
        );

        let mut request = CreateChatCompletionRequestArgs::default();
        request
            .model(self.config.model.clone())
            .messages(messages)
            .max_tokens(max_tokens);

        if let Some(format) = response_format {
            request.response_format(format).temperature(JSON_TEMPERATURE);
        }

        request
            .build()
            .map_err(|error| MnemaError::Validation(format!("Invalid LLM request: {error}")))
    }

    fn extract_content(response: CreateChatCompletionResponse) -> Result<String> {
        let message = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| MnemaError::Llm("LLM response contained no choices".to_string()))?
            .message
            .content
            .unwrap_or_default();

        if message.trim().is_empty() {
            return Err(MnemaError::Llm(
                "LLM response contained empty content".to_string(),
            ));
        }

        Ok(message)
    }

    fn is_retryable(error: &OpenAIError) -> bool {
        match error {
            OpenAIError::ApiError(api_error) => {
                api_error.r#type.is_none() && api_error.code.is_none()
            }
            OpenAIError::Reqwest(reqwest_error) => reqwest_error
                .status()
                .map(|status| status.is_server_error())
                .unwrap_or(true),
            _ => false,
        }
    }

    fn rate_limit_error(error: &OpenAIError) -> Option<MnemaError> {
        match error {
            OpenAIError::Reqwest(reqwest_error)
                if reqwest_error.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) =>
            {
                Some(MnemaError::LlmRateLimit { retry_after: None })
            }
            OpenAIError::ApiError(api_error) if Self::is_rate_limit_api_error(api_error) => {
                Some(MnemaError::LlmRateLimit { retry_after: None })
            }
            _ => None,
        }
    }

    fn auth_error(error: &OpenAIError) -> Option<MnemaError> {
        match error {
            OpenAIError::Reqwest(reqwest_error)
                if reqwest_error.status() == Some(reqwest::StatusCode::UNAUTHORIZED)
                    || reqwest_error.status() == Some(reqwest::StatusCode::FORBIDDEN) =>
            {
                Some(MnemaError::Llm(format!(
                    "LLM authentication failed: {reqwest_error}"
                )))
            }
            OpenAIError::ApiError(api_error) if Self::is_auth_api_error(api_error) => Some(
                MnemaError::Llm(format!("LLM authentication failed: {api_error}")),
            ),
            _ => None,
        }
    }

    fn is_rate_limit_api_error(api_error: &ApiError) -> bool {
        let message = api_error.message.to_lowercase();
        let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
        let code = api_error.code.clone().unwrap_or_default().to_lowercase();

        message.contains("rate limit")
            || message.contains("too many requests")
            || error_type.contains("rate_limit")
            || code.contains("rate_limit")
            || code == "insufficient_quota"
    }

    fn is_auth_api_error(api_error: &ApiError) -> bool {
        let message = api_error.message.to_lowercase();
        let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
        let code = api_error.code.clone().unwrap_or_default().to_lowercase();

        message.contains("unauthorized")
            || message.contains("forbidden")
            || message.contains("authentication")
            || message.contains("invalid api key")
            || code.contains("invalid_api_key")
            || code.contains("authentication")
            || error_type.contains("authentication")
    }

    fn map_openai_error(error: OpenAIError) -> MnemaError {
        match error {
            OpenAIError::Reqwest(reqwest_error) => {
                MnemaError::Llm(format!("LLM request failed: {reqwest_error}"))
            }
            OpenAIError::ApiError(api_error) => {
                MnemaError::Llm(format!("LLM API error: {api_error}"))
            }
            OpenAIError::JSONDeserialize(err) => {
                MnemaError::Llm(format!("Failed to parse LLM response: {err}"))
            }
            OpenAIError::InvalidArgument(message) => MnemaError::Validation(message),
            other => MnemaError::Llm(other.to_string()),
        }
    }
}

#[async_trait]
impl ExtractionClient for OpenAiExtraction {
    async fn extract_knowledge(&self, messages: &[Message]) -> Result<RawKnowledge> {
        if messages.is_empty() {
            return Err(MnemaError::Validation(
                "Cannot extract knowledge from empty conversation".to_string(),
            ));
        }

        let conversation = format_messages(messages);
        let prompt = prompts::extraction_prompt(&conversation);

        self.complete_json(
            &prompt,
            Some(prompts::EXTRACTION_SYSTEM_PROMPT),
            EXTRACTION_MAX_TOKENS,
        )
        .await
    }

    async fn digest(&self, messages: &[Message]) -> Result<ConversationDigest> {
        if messages.is_empty() {
            return Err(MnemaError::Validation(
                "Cannot summarize an empty conversation".to_string(),
            ));
        }

        let conversation = format_messages(messages);
        let prompt = prompts::digest_prompt(&conversation);

        self.complete_json(&prompt, None, SUMMARY_MAX_TOKENS).await
    }

    async fn analyze_topics(&self, text: &str) -> Result<TopicAnalysis> {
        let prompt = prompts::topic_analysis_prompt(text);
        self.complete_json(&prompt, None, TOPIC_MAX_TOKENS).await
    }

    async fn summarize_context(&self, prompt: &str) -> Result<String> {
        self.complete(prompt, None).await
    }
}

impl ApiConfig {
    fn from_llm_config(config: &LlmConfig) -> Self {
        let (provider, model) = parse_provider_model(&config.model);

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        Self {
            base_url,
            api_key: config.api_key.clone(),
            model: model.to_string(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openrouter" => OPENROUTER_BASE_URL,
        "ollama" => OLLAMA_BASE_URL,
        "lmstudio" => LMSTUDIO_BASE_URL,
        _ => OPENAI_BASE_URL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_llm_config() -> LlmConfig {
        LlmConfig {
            model: "ollama/llama3".to_string(),
            api_key: None,
            base_url: None,
            timeout_secs: 30,
            max_retries: 0,
        }
    }

    #[test]
    fn test_extraction_response_deserializes() {
        let response = r#"{
            "entities": [
                {"name": "PostgreSQL", "type": "Tool", "description": "Relational database"}
            ],
            "relationships": [
                {"source": "User", "target": "PostgreSQL", "type": "CHOSE", "confidence": 0.9}
            ],
            "facts": [
                {"subject": "User", "predicate": "WORKS_AT", "object": "Google", "confidence": 0.9}
            ]
        }"#;

        let raw: RawKnowledge = serde_json::from_str(response).unwrap();
        assert_eq!(raw.entities.len(), 1);
        assert_eq!(raw.relationships.len(), 1);
        assert_eq!(raw.facts.len(), 1);
    }

    #[test]
    fn test_digest_tolerates_missing_fields() {
        let digest: ConversationDigest =
            serde_json::from_str(r#"{"summary": "Picked a database"}"#).unwrap();
        assert_eq!(digest.summary, "Picked a database");
        assert!(digest.topics.is_empty());
        assert!(digest.entities.is_empty());
    }

    #[test]
    fn test_missing_api_key_rejected_for_hosted_provider() {
        let config = LlmConfig {
            model: "openai/gpt-4o-mini".to_string(),
            ..test_llm_config()
        };

        assert!(OpenAiExtraction::new(&config).is_err());
    }

    #[test]
    fn test_local_provider_needs_no_api_key() {
        let client = OpenAiExtraction::new(&test_llm_config());
        assert!(client.is_ok());
    }

    #[test]
    fn test_json_request_sets_response_format() {
        let client = OpenAiExtraction::new(&test_llm_config()).unwrap();

        let request = client
            .build_request("prompt", None, Some(ResponseFormat::JsonObject), 500)
            .unwrap();

        assert!(matches!(
            request.response_format,
            Some(ResponseFormat::JsonObject)
        ));
    }

    #[test]
    fn test_topic_prompt_truncates_long_text() {
        let text = "x".repeat(5000);
        let prompt = prompts::topic_analysis_prompt(&text);
        assert!(prompt.len() < 3000);
    }
}
