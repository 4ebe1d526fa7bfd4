use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Order-preserving union of member conversation topics.
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub conversation_count: usize,
    /// Rolling mean of member conversation embeddings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Feedback log entry: every suggestion is recorded, then resolved when
/// the user accepts it or picks a different session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSuggestionRecord {
    pub id: String,
    pub conversation_id: String,
    pub suggested_session_id: String,
    pub confidence: f32,
    pub accepted: Option<bool>,
    pub actual_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    HighConfidenceMatch,
    NeedsConfirmation,
    WeakMatches,
    NoMatchingSessions,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMatch {
    pub session_id: String,
    pub name: String,
    pub score: f32,
    pub topics: Vec<String>,
    pub conversation_count: usize,
}

/// Outcome of matching a conversation against the user's sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SessionAnalysis {
    pub suggested: Option<SessionMatch>,
    pub confidence: f32,
    /// True when the top match cleared both the auto-link threshold and
    /// the runner-up margin.
    pub auto_link: bool,
    pub all_matches: Vec<SessionMatch>,
    pub reason: MatchReason,
}

impl SessionAnalysis {
    pub fn no_match() -> Self {
        Self {
            suggested: None,
            confidence: 0.0,
            auto_link: false,
            all_matches: Vec::new(),
            reason: MatchReason::NoMatchingSessions,
        }
    }
}
