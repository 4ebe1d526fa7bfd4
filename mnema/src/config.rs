use serde::Deserialize;
use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub embeddings: EmbeddingsConfig,
    pub llm: Option<LlmConfig>,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// LLM configuration for the extraction/summarization models
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Character budgets for the semantic chunker.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    pub target_size: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub overlap_sentences: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    pub similarity_threshold: f32,
    pub max_chunks: u32,
    /// Weight of the semantic component in hybrid chunk search.
    pub hybrid_semantic_weight: f32,
    /// Truncation limit for assembled context prompts, in characters.
    pub max_context_length: usize,
}

/// Weights and thresholds shared by session matching and recommendations.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    pub relevance_weight: f32,
    pub recency_weight: f32,
    pub quality_weight: f32,
    /// Minimum final score for auto-selecting the top candidate.
    pub auto_select_threshold: f32,
    /// Required lead over the runner-up when more than one candidate exists.
    pub auto_select_margin: f32,
    /// Score above which a session is suggested to the user.
    pub suggest_threshold: f32,
    /// Score above which a session is listed as a weak match.
    pub weak_match_threshold: f32,
    /// Window of full recency credit, in hours.
    pub recency_full_hours: f32,
    /// Recency decays linearly to zero at this age, in days.
    pub recency_zero_days: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: parse_env_or("CHUNK_TARGET_SIZE", 600),
            min_size: parse_env_or("CHUNK_MIN_SIZE", 200),
            max_size: parse_env_or("CHUNK_MAX_SIZE", 1000),
            overlap_sentences: parse_env_or("CHUNK_OVERLAP_SENTENCES", 2),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: parse_env_or("RETRIEVAL_SIMILARITY_THRESHOLD", 0.7),
            max_chunks: parse_env_or("RETRIEVAL_MAX_CHUNKS", 5),
            hybrid_semantic_weight: parse_env_or("RETRIEVAL_HYBRID_SEMANTIC_WEIGHT", 0.7),
            max_context_length: parse_env_or("RETRIEVAL_MAX_CONTEXT_LENGTH", 8000),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            relevance_weight: parse_env_or("SCORING_RELEVANCE_WEIGHT", 0.60),
            recency_weight: parse_env_or("SCORING_RECENCY_WEIGHT", 0.25),
            quality_weight: parse_env_or("SCORING_QUALITY_WEIGHT", 0.15),
            auto_select_threshold: parse_env_or("SCORING_AUTO_SELECT_THRESHOLD", 0.85),
            auto_select_margin: parse_env_or("SCORING_AUTO_SELECT_MARGIN", 0.20),
            suggest_threshold: parse_env_or("SCORING_SUGGEST_THRESHOLD", 0.70),
            weak_match_threshold: parse_env_or("SCORING_WEAK_MATCH_THRESHOLD", 0.50),
            recency_full_hours: parse_env_or("SCORING_RECENCY_FULL_HOURS", 24.0),
            recency_zero_days: parse_env_or("SCORING_RECENCY_ZERO_DAYS", 30.0),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embeddings: EmbeddingsConfig {
                model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "openai/text-embedding-3-small".to_string()),
                api_key: env::var("EMBEDDING_API_KEY").ok(),
                base_url: env::var("EMBEDDING_BASE_URL").ok(),
                dimensions: parse_env_or("EMBEDDING_DIMENSIONS", 1536),
                batch_size: parse_env_or("EMBEDDING_BATCH_SIZE", 64),
                timeout_secs: parse_env_or("EMBEDDING_TIMEOUT", 30),
                max_retries: parse_env_or("EMBEDDING_MAX_RETRIES", 3),
            },
            llm: env::var("LLM_MODEL").ok().map(|model| LlmConfig {
                model,
                api_key: env::var("LLM_API_KEY").ok(),
                base_url: env::var("LLM_BASE_URL").ok(),
                timeout_secs: parse_env_or("LLM_TIMEOUT", 30),
                max_retries: parse_env_or("LLM_MAX_RETRIES", 3),
            }),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Known providers that use OpenAI-compatible APIs
pub const KNOWN_PROVIDERS: &[&str] = &["openai", "azure", "openrouter", "ollama", "lmstudio"];

/// Parse a model name into (provider, model) tuple.
pub fn parse_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    // No recognized prefix, treat the whole string as the model name
    ("openai", model)
}
