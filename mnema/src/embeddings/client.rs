use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client,
};
use async_trait::async_trait;

use crate::config::{parse_provider_model, EmbeddingsConfig};
use crate::error::{MnemaError, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Text-to-vector interface. Batch calls preserve input order.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
}

/// Embeddings over any OpenAI-compatible API.
pub struct OpenAiEmbeddings {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingsConfig) -> Result<Self> {
        let (provider, model) = parse_provider_model(&config.model);

        let needs_api_key = !matches!(provider.to_lowercase().as_str(), "ollama" | "lmstudio");
        if needs_api_key && config.api_key.is_none() {
            return Err(MnemaError::Embedding(
                "API key required for this provider".to_string(),
            ));
        }

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        let openai_config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(config.api_key.clone().unwrap_or_default());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| {
                MnemaError::Embedding(format!("Failed to create embedding HTTP client: {error}"))
            })?;

        // Bound async-openai's internal backoff to the request timeout so
        // a flapping endpoint cannot retry for its 15-minute default.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(config.timeout_secs)),
            ..Default::default()
        };

        let client = Client::with_config(openai_config)
            .with_http_client(http_client)
            .with_backoff(backoff);

        Ok(Self {
            client,
            model: model.to_string(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error: Option<MnemaError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay_ms = 100 * 2_u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let request = CreateEmbeddingRequestArgs::default()
                .model(self.model.clone())
                .input(EmbeddingInput::StringArray(texts.to_vec()))
                .build()
                .map_err(|error| {
                    MnemaError::Embedding(format!("Invalid embedding request: {error}"))
                })?;

            match self.client.embeddings().create(request).await {
                Ok(response) => {
                    // The API is free to reorder; index restores input order.
                    let mut data = response.data;
                    data.sort_by_key(|e| e.index);

                    if data.len() != texts.len() {
                        return Err(MnemaError::Embedding(format!(
                            "Expected {} embeddings, got {}",
                            texts.len(),
                            data.len()
                        )));
                    }
                    return Ok(data.into_iter().map(|e| e.embedding).collect());
                }
                Err(error) => {
                    let retryable = is_retryable(&error);
                    let mapped = map_openai_error(error);
                    if retryable && attempt < self.max_retries {
                        last_error = Some(mapped);
                        continue;
                    }
                    return Err(mapped);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| MnemaError::Embedding("Embedding failed after retries".to_string())))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MnemaError::Validation(
                "Cannot embed empty text".to_string(),
            ));
        }

        let batch = self.request_batch(&[text.to_string()]).await?;
        batch
            .into_iter()
            .next()
            .ok_or_else(|| MnemaError::Embedding("Empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(MnemaError::Validation(
                "Cannot embed empty text".to_string(),
            ));
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.request_batch(batch).await?);
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn is_retryable(error: &OpenAIError) -> bool {
    match error {
        OpenAIError::ApiError(api_error) => api_error.r#type.is_none() && api_error.code.is_none(),
        OpenAIError::Reqwest(reqwest_error) => reqwest_error
            .status()
            .map(|status| status.is_server_error())
            .unwrap_or(true),
        _ => false,
    }
}

fn map_openai_error(error: OpenAIError) -> MnemaError {
    match error {
        OpenAIError::Reqwest(reqwest_error)
            if reqwest_error.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) =>
        {
            MnemaError::LlmRateLimit { retry_after: None }
        }
        OpenAIError::Reqwest(reqwest_error) => {
            MnemaError::Embedding(format!("Embedding request failed: {reqwest_error}"))
        }
        OpenAIError::ApiError(api_error) => {
            MnemaError::Embedding(format!("Embedding API error: {api_error}"))
        }
        other => MnemaError::Embedding(other.to_string()),
    }
}

fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openrouter" => OPENROUTER_BASE_URL,
        "ollama" => OLLAMA_BASE_URL,
        "lmstudio" => "http://localhost:1234/v1",
        _ => OPENAI_BASE_URL,
    }
}
