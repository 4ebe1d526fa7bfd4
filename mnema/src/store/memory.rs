use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{MnemaError, Result};
use crate::models::{
    Chunk, ChunkHit, Conversation, Session, SessionStatus, SessionSuggestionRecord,
};
use crate::store::{
    cosine_similarity, ChunkStore, ConversationStore, SessionStore, SuggestionStore,
};

#[derive(Default)]
struct StoreData {
    conversations: HashMap<String, Conversation>,
    sessions: HashMap<String, Session>,
    chunks: Vec<Chunk>,
    suggestions: Vec<SessionSuggestionRecord>,
}

/// In-memory `RelationalStore` with cosine-similarity search. The
/// reference backend for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<StoreData>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> MnemaError {
        MnemaError::Store("store lock poisoned".to_string())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        data.conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn get_conversation(&self, user_id: &str, id: &str) -> Result<Option<Conversation>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(data
            .conversations
            .get(id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        if !data.conversations.contains_key(&conversation.id) {
            return Err(MnemaError::NotFound(format!(
                "conversation {}",
                conversation.id
            )));
        }
        data.conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn recent_conversations(&self, user_id: &str, limit: u32) -> Result<Vec<Conversation>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        let mut conversations: Vec<Conversation> = data
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations.truncate(limit as usize);
        Ok(conversations)
    }

    async fn conversations_by_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Conversation>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        let mut conversations: Vec<Conversation> = data
            .conversations
            .values()
            .filter(|c| c.user_id == user_id && c.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(conversations)
    }

    async fn standalone_conversations(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Conversation>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        let mut conversations: Vec<Conversation> = data
            .conversations
            .values()
            .filter(|c| c.user_id == user_id && c.session_id.is_none())
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations.truncate(limit as usize);
        Ok(conversations)
    }

    async fn search_conversations(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: u32,
        threshold: f32,
    ) -> Result<Vec<(Conversation, f32)>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        let mut hits: Vec<(Conversation, f32)> = data
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .filter_map(|c| {
                let similarity = cosine_similarity(c.embedding.as_deref()?, embedding);
                (similarity >= threshold).then(|| (c.clone(), similarity))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn delete_conversation(&self, user_id: &str, id: &str) -> Result<bool> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        let existed = data
            .conversations
            .get(id)
            .is_some_and(|c| c.user_id == user_id);
        if existed {
            data.conversations.remove(id);
            data.chunks.retain(|chunk| chunk.conversation_id != id);
        }
        Ok(existed)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        data.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, user_id: &str, id: &str) -> Result<Option<Session>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(data
            .sessions
            .get(id)
            .filter(|s| s.user_id == user_id)
            .cloned())
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        if !data.sessions.contains_key(&session.id) {
            return Err(MnemaError::NotFound(format!("session {}", session.id)));
        }
        data.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn list_sessions(&self, user_id: &str, limit: u32) -> Result<Vec<Session>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        let mut sessions: Vec<Session> = data
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            b.last_activity
                .unwrap_or(b.updated_at)
                .cmp(&a.last_activity.unwrap_or(a.updated_at))
        });
        sessions.truncate(limit as usize);
        Ok(sessions)
    }

    async fn search_sessions(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: u32,
        threshold: f32,
    ) -> Result<Vec<(Session, f32)>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        let mut hits: Vec<(Session, f32)> = data
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .filter_map(|s| {
                let similarity = cosine_similarity(s.embedding.as_deref()?, embedding);
                (similarity >= threshold).then(|| (s.clone(), similarity))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn link_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        session_id: &str,
    ) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        if !data
            .sessions
            .get(session_id)
            .is_some_and(|s| s.user_id == user_id)
        {
            return Err(MnemaError::NotFound(format!("session {session_id}")));
        }

        let conversation = data
            .conversations
            .get_mut(conversation_id)
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| MnemaError::NotFound(format!("conversation {conversation_id}")))?;
        conversation.session_id = Some(session_id.to_string());
        conversation.session_status = SessionStatus::Linked;
        conversation.updated_at = Utc::now();

        let member_count = data
            .conversations
            .values()
            .filter(|c| c.session_id.as_deref() == Some(session_id))
            .count();
        if let Some(session) = data.sessions.get_mut(session_id) {
            session.conversation_count = member_count;
            session.last_activity = Some(Utc::now());
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn unlink_conversation(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        let conversation = data
            .conversations
            .get_mut(conversation_id)
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| MnemaError::NotFound(format!("conversation {conversation_id}")))?;

        let Some(session_id) = conversation.session_id.take() else {
            return Ok(());
        };
        conversation.session_status = SessionStatus::Standalone;
        conversation.updated_at = Utc::now();

        let member_count = data
            .conversations
            .values()
            .filter(|c| c.session_id.as_deref() == Some(session_id.as_str()))
            .count();
        if let Some(session) = data.sessions.get_mut(&session_id) {
            session.conversation_count = member_count;
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_session(&self, user_id: &str, id: &str) -> Result<bool> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        let existed = data.sessions.get(id).is_some_and(|s| s.user_id == user_id);
        if existed {
            data.sessions.remove(id);
            for conversation in data.conversations.values_mut() {
                if conversation.session_id.as_deref() == Some(id) {
                    conversation.session_id = None;
                    conversation.session_status = SessionStatus::Standalone;
                }
            }
        }
        Ok(existed)
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn create_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        data.chunks.extend_from_slice(chunks);
        Ok(())
    }

    async fn chunks_by_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Chunk>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        let mut chunks: Vec<Chunk> = data
            .chunks
            .iter()
            .filter(|c| c.user_id == user_id && c.conversation_id == conversation_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn max_chunk_index(&self, user_id: &str, conversation_id: &str) -> Result<Option<u32>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(data
            .chunks
            .iter()
            .filter(|c| c.user_id == user_id && c.conversation_id == conversation_id)
            .map(|c| c.chunk_index)
            .max())
    }

    async fn search_chunks(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: u32,
        threshold: f32,
    ) -> Result<Vec<ChunkHit>> {
        self.search_chunks_hybrid(user_id, embedding, &[], limit, 1.0)
            .await
            .map(|mut hits| {
                hits.retain(|h| h.similarity >= threshold);
                hits
            })
    }

    async fn search_chunks_hybrid(
        &self,
        user_id: &str,
        embedding: &[f32],
        keywords: &[String],
        limit: u32,
        semantic_weight: f32,
    ) -> Result<Vec<ChunkHit>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        let lowered: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

        let mut hits: Vec<ChunkHit> = data
            .chunks
            .iter()
            .filter(|c| c.user_id == user_id)
            .filter_map(|chunk| {
                let semantic = cosine_similarity(&chunk.embedding, embedding);
                let keyword = if lowered.is_empty() {
                    0.0
                } else {
                    let content = chunk.content.to_lowercase();
                    let matched = lowered.iter().filter(|k| content.contains(k.as_str())).count();
                    matched as f32 / lowered.len() as f32
                };
                let score = semantic * semantic_weight + keyword * (1.0 - semantic_weight);
                if score <= 0.0 {
                    return None;
                }

                let conversation = data.conversations.get(&chunk.conversation_id)?;
                Some(ChunkHit {
                    chunk: chunk.clone(),
                    source: conversation.source.clone(),
                    session_id: conversation.session_id.clone(),
                    similarity: score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit as usize);
        Ok(hits)
    }
}

#[async_trait]
impl SuggestionStore for InMemoryStore {
    async fn create_suggestion(&self, record: &SessionSuggestionRecord) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        data.suggestions.push(record.clone());
        Ok(())
    }

    async fn resolve_suggestion(
        &self,
        conversation_id: &str,
        accepted: bool,
        actual_session_id: Option<&str>,
    ) -> Result<bool> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        let open = data
            .suggestions
            .iter_mut()
            .filter(|s| s.conversation_id == conversation_id && s.accepted.is_none())
            .last();

        match open {
            Some(record) => {
                record.accepted = Some(accepted);
                record.actual_session_id = actual_session_id.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn suggestions_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<SessionSuggestionRecord>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(data
            .suggestions
            .iter()
            .filter(|s| s.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
