use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Standalone,
    Linked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    /// Originating platform, e.g. "claude", "cursor", "chatgpt".
    pub source: String,
    pub messages: Vec<Message>,
    pub message_count: usize,
    pub summary: Option<String>,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub session_id: Option<String>,
    pub session_status: SessionStatus,
    pub has_decisions: bool,
    pub has_facts: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub content: String,
    /// Contiguous position within the conversation; appends continue
    /// from the stored maximum rather than renumbering.
    pub chunk_index: u32,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// A chunk similarity hit with its conversation context attached.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk: Chunk,
    pub source: String,
    pub session_id: Option<String>,
    pub similarity: f32,
}
