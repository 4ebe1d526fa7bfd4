//! Session matching and lifecycle. A session is a named thread of work
//! that related conversations accumulate into; matching decides which
//! session, if any, a new conversation belongs to.

use std::sync::Arc;

use chrono::Utc;
use nanoid::nanoid;

use crate::config::ScoringConfig;
use crate::embeddings::EmbeddingClient;
use crate::error::{MnemaError, Result};
use crate::models::{
    format_messages, MatchReason, Message, Session, SessionAnalysis, SessionMatch, SessionStatus,
};
use crate::store::{cosine_similarity, RelationalStore};

/// How much a direct conversation-to-conversation similarity counts when
/// it points at a session that direct session search did not find.
const CONVERSATION_MATCH_DAMPING: f32 = 0.8;
/// Weight of a corroborating conversation match on an already-matched
/// session.
const CONVERSATION_BOOST_WEIGHT: f32 = 0.3;
/// Maximum additive recency boost for a session active within the last
/// day.
const RECENCY_BOOST_MAX: f32 = 0.1;

const MATCH_SEARCH_LIMIT: u32 = 10;
const MATCH_TEXT_LIMIT: usize = 4000;

pub struct SessionService {
    store: Arc<dyn RelationalStore>,
    embeddings: Arc<dyn EmbeddingClient>,
    scoring: ScoringConfig,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        embeddings: Arc<dyn EmbeddingClient>,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            scoring,
        }
    }

    /// Match a conversation against the user's existing sessions.
    pub async fn analyze(&self, user_id: &str, messages: &[Message]) -> Result<SessionAnalysis> {
        if messages.is_empty() {
            return Ok(SessionAnalysis::no_match());
        }

        let text: String = format_messages(messages)
            .chars()
            .take(MATCH_TEXT_LIMIT)
            .collect();
        let embedding = self.embeddings.embed(&text).await?;

        self.analyze_embedding(user_id, &embedding).await
    }

    /// Match using an already-computed conversation embedding.
    pub async fn analyze_embedding(
        &self,
        user_id: &str,
        embedding: &[f32],
    ) -> Result<SessionAnalysis> {
        let mut scores = self.session_scores(user_id, embedding).await?;
        self.blend_conversation_signal(user_id, embedding, &mut scores)
            .await?;

        scores.retain(|candidate| candidate.score >= self.scoring.weak_match_threshold);
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));

        let Some(top) = scores.first().cloned() else {
            return Ok(SessionAnalysis::no_match());
        };

        let margin_ok = match scores.get(1) {
            Some(runner_up) => top.score - runner_up.score >= self.scoring.auto_select_margin,
            None => true,
        };

        let (reason, auto_link) = if top.score >= self.scoring.auto_select_threshold {
            (MatchReason::HighConfidenceMatch, margin_ok)
        } else if top.score >= self.scoring.suggest_threshold {
            (MatchReason::NeedsConfirmation, false)
        } else {
            (MatchReason::WeakMatches, false)
        };

        tracing::debug!(
            user_id,
            top_session = %top.session_id,
            score = top.score,
            auto_link,
            candidates = scores.len(),
            "session match analysis"
        );

        Ok(SessionAnalysis {
            confidence: top.score,
            suggested: Some(top),
            auto_link,
            all_matches: scores,
            reason,
        })
    }

    /// Direct session similarity, with a recency boost for sessions
    /// active within the last day.
    async fn session_scores(
        &self,
        user_id: &str,
        embedding: &[f32],
    ) -> Result<Vec<SessionMatch>> {
        let hits = self
            .store
            .search_sessions(
                user_id,
                embedding,
                MATCH_SEARCH_LIMIT,
                self.scoring.weak_match_threshold,
            )
            .await?;

        let now = Utc::now();
        Ok(hits
            .into_iter()
            .map(|(session, similarity)| {
                let boost = session
                    .last_activity
                    .map(|at| {
                        let hours = (now - at).num_minutes() as f32 / 60.0;
                        if hours < 0.0 || hours >= self.scoring.recency_full_hours {
                            0.0
                        } else {
                            RECENCY_BOOST_MAX * (1.0 - hours / self.scoring.recency_full_hours)
                        }
                    })
                    .unwrap_or(0.0);

                SessionMatch {
                    session_id: session.id,
                    name: session.name,
                    score: (similarity + boost).min(1.0),
                    topics: session.topics,
                    conversation_count: session.conversation_count,
                }
            })
            .collect())
    }

    /// Fold conversation-to-conversation similarity into the session
    /// scores: a similar linked conversation either corroborates an
    /// existing candidate or introduces its session at a damped score.
    async fn blend_conversation_signal(
        &self,
        user_id: &str,
        embedding: &[f32],
        scores: &mut Vec<SessionMatch>,
    ) -> Result<()> {
        let similar = self
            .store
            .search_conversations(
                user_id,
                embedding,
                MATCH_SEARCH_LIMIT,
                self.scoring.suggest_threshold,
            )
            .await?;

        for (conversation, similarity) in similar {
            let Some(session_id) = conversation.session_id else {
                continue;
            };

            if let Some(existing) = scores.iter_mut().find(|m| m.session_id == session_id) {
                existing.score =
                    (existing.score + similarity * CONVERSATION_BOOST_WEIGHT).min(1.0);
            } else if let Some(session) = self.store.get_session(user_id, &session_id).await? {
                scores.push(SessionMatch {
                    session_id: session.id,
                    name: session.name,
                    score: (similarity * CONVERSATION_MATCH_DAMPING).min(1.0),
                    topics: session.topics,
                    conversation_count: session.conversation_count,
                });
            }
        }

        Ok(())
    }

    pub async fn create_session(&self, user_id: &str, name: &str) -> Result<Session> {
        if name.trim().is_empty() {
            return Err(MnemaError::Validation(
                "Session name cannot be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let session = Session {
            id: nanoid!(),
            user_id: user_id.to_string(),
            name: name.trim().to_string(),
            description: None,
            topics: Vec::new(),
            entities: Vec::new(),
            conversation_count: 0,
            embedding: None,
            created_at: now,
            updated_at: now,
            last_activity: None,
        };
        self.store.create_session(&session).await?;
        Ok(session)
    }

    /// Attach a conversation to a session and refresh the session's
    /// rolling embedding and metadata from its members.
    pub async fn link(
        &self,
        user_id: &str,
        conversation_id: &str,
        session_id: &str,
    ) -> Result<()> {
        let mut conversation = self
            .store
            .get_conversation(user_id, conversation_id)
            .await?
            .ok_or_else(|| {
                MnemaError::NotFound(format!("Conversation {conversation_id} not found"))
            })?;

        if self.store.get_session(user_id, session_id).await?.is_none() {
            return Err(MnemaError::NotFound(format!(
                "Session {session_id} not found"
            )));
        }

        conversation.session_id = Some(session_id.to_string());
        conversation.session_status = SessionStatus::Linked;
        conversation.updated_at = Utc::now();
        self.store.update_conversation(&conversation).await?;
        self.store
            .link_conversation(user_id, conversation_id, session_id)
            .await?;

        self.refresh_session(user_id, session_id).await
    }

    pub async fn unlink(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        let mut conversation = self
            .store
            .get_conversation(user_id, conversation_id)
            .await?
            .ok_or_else(|| {
                MnemaError::NotFound(format!("Conversation {conversation_id} not found"))
            })?;

        let previous_session = conversation.session_id.take();
        conversation.session_status = SessionStatus::Standalone;
        conversation.updated_at = Utc::now();
        self.store.update_conversation(&conversation).await?;
        self.store
            .unlink_conversation(user_id, conversation_id)
            .await?;

        if let Some(session_id) = previous_session {
            self.refresh_session(user_id, &session_id).await?;
        }
        Ok(())
    }

    /// Recompute a session's embedding as the mean of its members'
    /// embeddings, and union member topics and entities in first-seen
    /// order.
    pub async fn refresh_session(&self, user_id: &str, session_id: &str) -> Result<()> {
        let Some(mut session) = self.store.get_session(user_id, session_id).await? else {
            return Ok(());
        };

        let members = self
            .store
            .conversations_by_session(user_id, session_id)
            .await?;

        let embeddings: Vec<&Vec<f32>> = members
            .iter()
            .filter_map(|c| c.embedding.as_ref())
            .collect();
        session.embedding = mean_embedding(&embeddings);

        let mut topics = Vec::new();
        let mut entities = Vec::new();
        for member in &members {
            for topic in &member.topics {
                if !topics.iter().any(|t: &String| t.eq_ignore_ascii_case(topic)) {
                    topics.push(topic.clone());
                }
            }
            for entity in &member.entities {
                if !entities
                    .iter()
                    .any(|e: &String| e.eq_ignore_ascii_case(entity))
                {
                    entities.push(entity.clone());
                }
            }
        }
        session.topics = topics;
        session.entities = entities;
        session.conversation_count = members.len();
        session.last_activity = members.iter().map(|c| c.updated_at).max();
        session.updated_at = Utc::now();

        self.store.update_session(&session).await
    }

    /// Sanity check: a member's embedding should still resemble the
    /// session it belongs to. Exposed for diagnostics.
    pub fn member_similarity(session: &Session, conversation_embedding: &[f32]) -> Option<f32> {
        session
            .embedding
            .as_ref()
            .map(|e| cosine_similarity(e, conversation_embedding))
    }
}

fn mean_embedding(embeddings: &[&Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let dims = first.len();
    let mut sum = vec![0.0f32; dims];
    let mut count = 0usize;

    for embedding in embeddings {
        if embedding.len() != dims {
            continue;
        }
        for (slot, value) in sum.iter_mut().zip(embedding.iter()) {
            *slot += value;
        }
        count += 1;
    }

    if count == 0 {
        return None;
    }
    for slot in &mut sum {
        *slot /= count as f32;
    }
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mean_embedding_averages_componentwise() {
        let a = vec![1.0, 0.0, 3.0];
        let b = vec![3.0, 2.0, 1.0];
        let mean = mean_embedding(&[&a, &b]).unwrap();
        assert_eq!(mean, vec![2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_mean_embedding_skips_mismatched_dimensions() {
        let a = vec![2.0, 4.0];
        let b = vec![1.0, 2.0, 3.0];
        let mean = mean_embedding(&[&a, &b]).unwrap();
        assert_eq!(mean, vec![2.0, 4.0]);
    }

    #[test]
    fn test_mean_embedding_empty() {
        assert_eq!(mean_embedding(&[]), None);
    }
}
