use serde::{Deserialize, Serialize};

use super::{Message, SessionAnalysis};

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub source: String,
    pub messages: Vec<Message>,
    /// Target an existing conversation to append to it.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// When appending: the payload contains only new messages. Otherwise
    /// the full transcript is sent and new messages are the suffix past
    /// the stored count.
    #[serde(default)]
    pub append_only: bool,
    /// Explicit session to link to; must exist.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Allow high-confidence matches to link without confirmation.
    #[serde(default)]
    pub auto_link_session: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub conversation_id: String,
    pub chunks_created: usize,
    pub entities_extracted: usize,
    pub relationships_created: usize,
    pub facts_recorded: usize,
    pub appended_messages: usize,
    pub session_suggestion: Option<SessionAnalysis>,
    pub linked_session_id: Option<String>,
}
