use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, ChunkHit, Conversation, Session, SessionSuggestionRecord};

// ---------------------------------------------------------------------------
// Individual store traits
// ---------------------------------------------------------------------------

/// CRUD and similarity search for conversations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;
    async fn get_conversation(&self, user_id: &str, id: &str) -> Result<Option<Conversation>>;
    /// Full replacement by id.
    async fn update_conversation(&self, conversation: &Conversation) -> Result<()>;
    /// Most recently updated first.
    async fn recent_conversations(&self, user_id: &str, limit: u32) -> Result<Vec<Conversation>>;
    async fn conversations_by_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Conversation>>;
    /// Conversations not linked to any session, most recent first.
    async fn standalone_conversations(&self, user_id: &str, limit: u32)
        -> Result<Vec<Conversation>>;
    async fn search_conversations(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: u32,
        threshold: f32,
    ) -> Result<Vec<(Conversation, f32)>>;
    /// Deletes the conversation and cascades to its chunks.
    async fn delete_conversation(&self, user_id: &str, id: &str) -> Result<bool>;
}

/// CRUD, similarity search, and membership management for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<()>;
    async fn get_session(&self, user_id: &str, id: &str) -> Result<Option<Session>>;
    async fn update_session(&self, session: &Session) -> Result<()>;
    async fn list_sessions(&self, user_id: &str, limit: u32) -> Result<Vec<Session>>;
    async fn search_sessions(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: u32,
        threshold: f32,
    ) -> Result<Vec<(Session, f32)>>;
    /// Attach a conversation; refreshes the session's member count and
    /// last activity.
    async fn link_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        session_id: &str,
    ) -> Result<()>;
    async fn unlink_conversation(&self, user_id: &str, conversation_id: &str) -> Result<()>;
    /// Deletes the session; members revert to standalone.
    async fn delete_session(&self, user_id: &str, id: &str) -> Result<bool>;
}

/// Batch writes and vector search for conversation chunks.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn create_chunks(&self, chunks: &[Chunk]) -> Result<()>;
    async fn chunks_by_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Chunk>>;
    /// Highest chunk_index stored for a conversation; appends continue
    /// from here.
    async fn max_chunk_index(&self, user_id: &str, conversation_id: &str) -> Result<Option<u32>>;
    async fn search_chunks(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: u32,
        threshold: f32,
    ) -> Result<Vec<ChunkHit>>;
    /// Weighted blend of semantic similarity and keyword-match ratio.
    async fn search_chunks_hybrid(
        &self,
        user_id: &str,
        embedding: &[f32],
        keywords: &[String],
        limit: u32,
        semantic_weight: f32,
    ) -> Result<Vec<ChunkHit>>;
}

/// The session-suggestion feedback log.
#[async_trait]
pub trait SuggestionStore: Send + Sync {
    async fn create_suggestion(&self, record: &SessionSuggestionRecord) -> Result<()>;
    /// Mark the latest open suggestion for a conversation as accepted or
    /// overridden. Returns false when no suggestion exists.
    async fn resolve_suggestion(
        &self,
        conversation_id: &str,
        accepted: bool,
        actual_session_id: Option<&str>,
    ) -> Result<bool>;
    async fn suggestions_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<SessionSuggestionRecord>>;
}

// ---------------------------------------------------------------------------
// Combined backend
// ---------------------------------------------------------------------------

/// Everything the services need from relational storage. Blanket-implemented
/// for any type carrying all four stores.
pub trait RelationalStore:
    ConversationStore + SessionStore + ChunkStore + SuggestionStore
{
}

impl<T: ConversationStore + SessionStore + ChunkStore + SuggestionStore> RelationalStore for T {}
