use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EdgeStatus, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieveMode {
    Query,
    Full,
    Session,
    Conversation,
}

/// Caller-side filters and overrides for context assembly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextOptions {
    #[serde(default)]
    pub include_exploring: bool,
    #[serde(default)]
    pub include_rejected: bool,
    /// Drop decisions that came from anyone but the user.
    #[serde(default)]
    pub only_user_attributed: bool,
    #[serde(default)]
    pub only_verified: bool,
    #[serde(default)]
    pub exclude_entities: Vec<String>,
    #[serde(default)]
    pub exclude_decision_ids: Vec<String>,
    /// Free-form note prepended to the context prompt.
    #[serde(default)]
    pub custom_note: Option<String>,
    /// Replaces the generated summary entirely.
    #[serde(default)]
    pub custom_summary: Option<String>,
    #[serde(default)]
    pub skip_summary_generation: bool,
    /// Overrides the configured context truncation limit.
    #[serde(default)]
    pub max_context_length: Option<usize>,
    /// Blend keyword matching into chunk search (query mode only).
    #[serde(default)]
    pub hybrid_search: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrieveRequest {
    pub mode: RetrieveMode,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub options: ContextOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionInfo {
    pub id: String,
    pub subject: String,
    pub decision: String,
    pub relation: String,
    pub status: EdgeStatus,
    pub confidence: f32,
    pub verified: bool,
    pub reason: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FactInfo {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub conversation_id: String,
    pub source: String,
    pub snippet: String,
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveResponse {
    pub summary: String,
    /// Assembled, bounded prompt ready to paste into a model context.
    pub context_prompt: String,
    pub decisions: Vec<DecisionInfo>,
    pub facts: Vec<FactInfo>,
    pub entities: Vec<String>,
    pub sources: Vec<SourceInfo>,
    pub chunks_found: usize,
    pub session: Option<Session>,
}
