use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Message;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendRequest {
    #[serde(default)]
    pub query: Option<String>,
    /// Recent messages to match against when no explicit query exists.
    #[serde(default)]
    pub context_messages: Vec<Message>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Session,
    Conversation,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub relevance: f32,
    pub recency: f32,
    pub quality: f32,
    #[serde(rename = "final")]
    pub final_score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationItem {
    pub id: String,
    pub kind: RecommendationKind,
    pub name: String,
    pub summary: Option<String>,
    pub source: Option<String>,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub score: ScoreBreakdown,
    pub conversation_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryAnalysis {
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    /// Entities pulled in by graph expansion of the query terms.
    pub graph_expanded: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendResponse {
    pub recommendations: Vec<RecommendationItem>,
    pub auto_selected: Option<RecommendationItem>,
    pub query_analysis: QueryAnalysis,
}
