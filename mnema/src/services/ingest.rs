//! The consolidation pipeline. One ingest call takes a raw transcript
//! through chunking, embedding, session matching, and knowledge
//! extraction, with each enrichment degrading independently of the core
//! write path.

use std::sync::Arc;

use chrono::Utc;
use futures::try_join;
use nanoid::nanoid;
use tokio_util::sync::CancellationToken;

use crate::config::{ChunkingConfig, ScoringConfig};
use crate::embeddings::EmbeddingClient;
use crate::error::{MnemaError, Result};
use crate::graph::{FactWriter, GraphStore};
use crate::llm::{ConversationDigest, ExtractionClient};
use crate::models::{
    format_messages, Chunk, Conversation, IngestOutcome, IngestRequest, Message, SessionAnalysis,
    SessionStatus, SessionSuggestionRecord,
};
use crate::processing::SemanticChunker;
use crate::services::SessionService;
use crate::store::RelationalStore;

/// Character cap on the text embedded for whole-conversation similarity.
const EMBED_TEXT_LIMIT: usize = 4000;

pub struct IngestService {
    store: Arc<dyn RelationalStore>,
    graph: Option<Arc<dyn GraphStore>>,
    embeddings: Arc<dyn EmbeddingClient>,
    llm: Option<Arc<dyn ExtractionClient>>,
    chunker: SemanticChunker,
    sessions: SessionService,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        graph: Option<Arc<dyn GraphStore>>,
        embeddings: Arc<dyn EmbeddingClient>,
        llm: Option<Arc<dyn ExtractionClient>>,
        chunking: &ChunkingConfig,
        scoring: ScoringConfig,
    ) -> Self {
        let sessions = SessionService::new(store.clone(), embeddings.clone(), scoring);
        Self {
            store,
            graph,
            embeddings,
            llm,
            chunker: SemanticChunker::new(chunking),
            sessions,
        }
    }

    /// Run the full pipeline for one transcript. The cancellation token
    /// is honored between remote calls; a cancelled ingest leaves no
    /// partially enriched conversation behind because the conversation
    /// write happens only after embedding succeeds.
    pub async fn ingest(
        &self,
        user_id: &str,
        request: &IngestRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        if request.messages.is_empty() {
            return Err(MnemaError::Validation(
                "Messages cannot be empty".to_string(),
            ));
        }
        if request.messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(MnemaError::Validation(
                "All messages are empty".to_string(),
            ));
        }

        let existing = match &request.conversation_id {
            Some(id) => Some(self.store.get_conversation(user_id, id).await?.ok_or_else(
                || MnemaError::NotFound(format!("Conversation {id} not found")),
            )?),
            None => None,
        };

        // Explicit session targets must exist before any expensive work.
        if let Some(session_id) = &request.session_id {
            if self.store.get_session(user_id, session_id).await?.is_none() {
                return Err(MnemaError::NotFound(format!(
                    "Session {session_id} not found"
                )));
            }
        }

        match existing {
            Some(conversation) => self.append(user_id, request, conversation, cancel).await,
            None => self.create(user_id, request, cancel).await,
        }
    }

    async fn create(
        &self,
        user_id: &str,
        request: &IngestRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        let digest = self.digest(&request.messages).await;
        check_cancelled(cancel)?;

        let chunk_texts = self.chunker.chunk(&request.messages);
        let embed_text = embedding_text(digest.summary.as_deref(), &request.messages);

        let (embedding, chunk_embeddings) = try_join!(
            self.embeddings.embed(&embed_text),
            self.embeddings.embed_batch(&chunk_texts)
        )?;
        check_cancelled(cancel)?;

        let now = Utc::now();
        let conversation_id = nanoid!();
        let mut conversation = Conversation {
            id: conversation_id.clone(),
            user_id: user_id.to_string(),
            source: request.source.clone(),
            message_count: request.messages.len(),
            messages: request.messages.clone(),
            summary: digest.summary.clone(),
            topics: digest.topics.clone(),
            entities: digest.entities.clone(),
            embedding: Some(embedding),
            session_id: None,
            session_status: SessionStatus::Standalone,
            has_decisions: false,
            has_facts: false,
            created_at: now,
            updated_at: now,
        };
        self.store.create_conversation(&conversation).await?;

        let chunks = build_chunks(&conversation, &chunk_texts, &chunk_embeddings, 0);
        self.store.create_chunks(&chunks).await?;

        let (entities, relationships, facts) = self
            .extract_knowledge(user_id, &request.messages, &mut conversation)
            .await;
        check_cancelled(cancel)?;

        let (suggestion, linked_session_id) =
            self.resolve_session(user_id, request, &mut conversation).await?;

        self.store.update_conversation(&conversation).await?;
        if let Some(session_id) = &linked_session_id {
            self.store
                .link_conversation(user_id, &conversation.id, session_id)
                .await?;
            self.sessions.refresh_session(user_id, session_id).await?;
        }

        tracing::info!(
            user_id,
            conversation_id = %conversation.id,
            chunks = chunks.len(),
            entities,
            relationships,
            facts,
            linked = linked_session_id.is_some(),
            "conversation ingested"
        );

        Ok(IngestOutcome {
            conversation_id,
            chunks_created: chunks.len(),
            entities_extracted: entities,
            relationships_created: relationships,
            facts_recorded: facts,
            appended_messages: 0,
            session_suggestion: suggestion,
            linked_session_id,
        })
    }

    async fn append(
        &self,
        user_id: &str,
        request: &IngestRequest,
        mut conversation: Conversation,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        // append_only payloads carry only the new tail; otherwise the
        // caller re-sent the whole transcript and the new part is the
        // suffix past what we already stored.
        let new_messages: Vec<Message> = if request.append_only {
            request.messages.clone()
        } else if request.messages.len() > conversation.message_count {
            request.messages[conversation.message_count..].to_vec()
        } else {
            Vec::new()
        };

        if new_messages.is_empty() {
            // Idempotent re-send: nothing to do.
            return Ok(IngestOutcome {
                conversation_id: conversation.id,
                chunks_created: 0,
                entities_extracted: 0,
                relationships_created: 0,
                facts_recorded: 0,
                appended_messages: 0,
                session_suggestion: None,
                linked_session_id: conversation.session_id,
            });
        }

        conversation.messages.extend(new_messages.iter().cloned());
        conversation.message_count = conversation.messages.len();

        let digest = self.digest(&conversation.messages).await;
        if digest.summary.is_some() {
            conversation.summary = digest.summary.clone();
        }
        if !digest.topics.is_empty() {
            conversation.topics = digest.topics.clone();
        }
        if !digest.entities.is_empty() {
            conversation.entities = digest.entities.clone();
        }
        check_cancelled(cancel)?;

        // Re-embed the whole conversation, but only chunk the new tail.
        let chunk_texts = self.chunker.chunk(&new_messages);
        let embed_text = embedding_text(conversation.summary.as_deref(), &conversation.messages);

        let (embedding, chunk_embeddings) = try_join!(
            self.embeddings.embed(&embed_text),
            self.embeddings.embed_batch(&chunk_texts)
        )?;
        conversation.embedding = Some(embedding);
        check_cancelled(cancel)?;

        let next_index = self
            .store
            .max_chunk_index(user_id, &conversation.id)
            .await?
            .map(|max| max + 1)
            .unwrap_or(0);
        let chunks = build_chunks(&conversation, &chunk_texts, &chunk_embeddings, next_index);
        self.store.create_chunks(&chunks).await?;

        let (entities, relationships, facts) = self
            .extract_knowledge(user_id, &new_messages, &mut conversation)
            .await;
        check_cancelled(cancel)?;

        conversation.updated_at = Utc::now();
        self.store.update_conversation(&conversation).await?;

        if let Some(session_id) = &conversation.session_id {
            self.sessions.refresh_session(user_id, session_id).await?;
        }

        tracing::info!(
            user_id,
            conversation_id = %conversation.id,
            appended = new_messages.len(),
            chunks = chunks.len(),
            "conversation appended"
        );

        Ok(IngestOutcome {
            conversation_id: conversation.id.clone(),
            chunks_created: chunks.len(),
            entities_extracted: entities,
            relationships_created: relationships,
            facts_recorded: facts,
            appended_messages: new_messages.len(),
            session_suggestion: None,
            linked_session_id: conversation.session_id,
        })
    }

    /// Summarization is an enrichment: a failing model leaves the
    /// conversation without a summary instead of failing the ingest.
    async fn digest(&self, messages: &[Message]) -> Digest {
        let Some(llm) = &self.llm else {
            return Digest::default();
        };

        match llm.digest(messages).await {
            Ok(ConversationDigest {
                summary,
                topics,
                entities,
            }) => Digest {
                summary: Some(summary).filter(|s| !s.trim().is_empty()),
                topics,
                entities,
            },
            Err(error) => {
                tracing::warn!(%error, "conversation digest failed");
                Digest::default()
            }
        }
    }

    /// Extraction and graph writes are best-effort. Returns
    /// (entities, relationships, facts) counts.
    async fn extract_knowledge(
        &self,
        user_id: &str,
        messages: &[Message],
        conversation: &mut Conversation,
    ) -> (usize, usize, usize) {
        let (Some(llm), Some(graph)) = (&self.llm, &self.graph) else {
            tracing::debug!(user_id, "extraction not configured, skipping knowledge layer");
            return (0, 0, 0);
        };

        let raw = match llm.extract_knowledge(messages).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(user_id, %error, "knowledge extraction failed");
                return (0, 0, 0);
            }
        };
        let normalized = crate::intelligence::normalize(&raw);

        if let Err(error) = self
            .write_knowledge(user_id, graph, &normalized, conversation)
            .await
        {
            tracing::warn!(user_id, %error, "knowledge graph write failed");
            return (0, 0, 0);
        }

        (
            normalized.entities.len(),
            normalized.relationships.len(),
            normalized.facts.len(),
        )
    }

    async fn write_knowledge(
        &self,
        user_id: &str,
        graph: &Arc<dyn GraphStore>,
        normalized: &crate::intelligence::NormalizedKnowledge,
        conversation: &mut Conversation,
    ) -> Result<()> {
        graph.ensure_user(user_id).await?;

        let now = Utc::now();
        for entity in &normalized.entities {
            graph
                .upsert_entity(
                    user_id,
                    &crate::models::Entity {
                        name: entity.name.clone(),
                        kind: entity.kind,
                        description: entity.description.clone(),
                        first_mentioned: now,
                    },
                )
                .await?;
        }

        for relationship in &normalized.relationships {
            let edge = crate::models::KnowledgeEdge {
                id: nanoid!(),
                user_id: user_id.to_string(),
                source: relationship.source.clone(),
                target: relationship.target.clone(),
                relation: relationship.relation,
                status: relationship.status,
                confidence: relationship.confidence,
                attributed_to: relationship.attributed_to,
                temporal: relationship.temporal,
                verified: relationship.verified,
                marked_incorrect: false,
                reason: relationship.reason.clone(),
                conversation_id: Some(conversation.id.clone()),
                created_at: now,
            };
            graph.create_edge(&edge).await?;
            if edge.relation.is_decision() {
                conversation.has_decisions = true;
            }
        }

        if !normalized.facts.is_empty() {
            let writer = FactWriter::new(graph.clone());
            for fact in &normalized.facts {
                writer.record(user_id, fact).await?;
            }
            conversation.has_facts = true;
        }

        Ok(())
    }

    /// Decide the conversation's session. Explicit targets were already
    /// validated; otherwise the matcher runs and a suggestion is always
    /// recorded for the feedback log.
    async fn resolve_session(
        &self,
        user_id: &str,
        request: &IngestRequest,
        conversation: &mut Conversation,
    ) -> Result<(Option<SessionAnalysis>, Option<String>)> {
        if let Some(session_id) = &request.session_id {
            conversation.session_id = Some(session_id.clone());
            conversation.session_status = SessionStatus::Linked;
            return Ok((None, Some(session_id.clone())));
        }

        let embedding = match &conversation.embedding {
            Some(embedding) => embedding.clone(),
            None => return Ok((None, None)),
        };

        let analysis = match self.sessions.analyze_embedding(user_id, &embedding).await {
            Ok(analysis) => analysis,
            Err(error) => {
                tracing::warn!(user_id, %error, "session analysis failed");
                return Ok((None, None));
            }
        };

        let Some(suggested) = &analysis.suggested else {
            return Ok((Some(analysis), None));
        };

        let auto_link = request.auto_link_session && analysis.auto_link;
        let record = SessionSuggestionRecord {
            id: nanoid!(),
            conversation_id: conversation.id.clone(),
            suggested_session_id: suggested.session_id.clone(),
            confidence: analysis.confidence,
            accepted: None,
            actual_session_id: None,
            created_at: Utc::now(),
        };
        self.store.create_suggestion(&record).await?;

        if auto_link {
            let session_id = suggested.session_id.clone();
            conversation.session_id = Some(session_id.clone());
            conversation.session_status = SessionStatus::Linked;
            self.store
                .resolve_suggestion(&conversation.id, true, Some(&session_id))
                .await?;
            return Ok((Some(analysis), Some(session_id)));
        }

        Ok((Some(analysis), None))
    }
}

#[derive(Default)]
struct Digest {
    summary: Option<String>,
    topics: Vec<String>,
    entities: Vec<String>,
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(MnemaError::Cancelled);
    }
    Ok(())
}

fn embedding_text(summary: Option<&str>, messages: &[Message]) -> String {
    match summary.filter(|s| !s.trim().is_empty()) {
        Some(summary) => summary.to_string(),
        None => format_messages(messages)
            .chars()
            .take(EMBED_TEXT_LIMIT)
            .collect(),
    }
}

fn build_chunks(
    conversation: &Conversation,
    texts: &[String],
    embeddings: &[Vec<f32>],
    start_index: u32,
) -> Vec<Chunk> {
    let now = Utc::now();
    texts
        .iter()
        .zip(embeddings.iter())
        .enumerate()
        .map(|(offset, (content, embedding))| Chunk {
            id: nanoid!(),
            conversation_id: conversation.id.clone(),
            user_id: conversation.user_id.clone(),
            content: content.clone(),
            chunk_index: start_index + offset as u32,
            embedding: embedding.clone(),
            created_at: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_embedding_text_prefers_summary() {
        let messages = vec![Message::user("hello world")];
        assert_eq!(
            embedding_text(Some("A summary"), &messages),
            "A summary".to_string()
        );
    }

    #[test]
    fn test_embedding_text_falls_back_to_transcript() {
        let messages = vec![Message::user("hello world")];
        assert_eq!(embedding_text(None, &messages), "USER: hello world");
        assert_eq!(embedding_text(Some("   "), &messages), "USER: hello world");
    }

    #[test]
    fn test_embedding_text_caps_length() {
        let messages = vec![Message::user("x".repeat(10_000))];
        assert_eq!(
            embedding_text(None, &messages).chars().count(),
            EMBED_TEXT_LIMIT
        );
    }

    #[test]
    fn test_build_chunks_continues_index() {
        let now = Utc::now();
        let conversation = Conversation {
            id: "c1".to_string(),
            user_id: "u1".to_string(),
            source: "claude".to_string(),
            messages: Vec::new(),
            message_count: 0,
            summary: None,
            topics: Vec::new(),
            entities: Vec::new(),
            embedding: None,
            session_id: None,
            session_status: SessionStatus::Standalone,
            has_decisions: false,
            has_facts: false,
            created_at: now,
            updated_at: now,
        };

        let texts = vec!["first".to_string(), "second".to_string()];
        let embeddings = vec![vec![0.1], vec![0.2]];
        let chunks = build_chunks(&conversation, &texts, &embeddings, 3);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 3);
        assert_eq!(chunks[1].chunk_index, 4);
    }
}
