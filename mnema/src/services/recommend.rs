//! Recommendation scoring: given a query (or recent messages), rank the
//! user's sessions and standalone conversations by a weighted blend of
//! relevance, recency, and content quality, and auto-select an
//! unambiguous winner.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::ScoringConfig;
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::llm::ExtractionClient;
use crate::models::{
    format_messages, Conversation, QueryAnalysis, RecommendRequest, RecommendResponse,
    RecommendationItem, RecommendationKind, ScoreBreakdown, Session,
};
use crate::store::RelationalStore;

const DEFAULT_LIMIT: u32 = 10;
const SEARCH_THRESHOLD: f32 = 0.3;
const TOPIC_OVERLAP_BONUS: f32 = 0.1;
const MAX_KEYWORDS: usize = 10;
const GRAPH_EXPANSION_HOPS: u32 = 2;
const GRAPH_EXPANSION_LIMIT: u32 = 10;
const NAME_SNIPPET_LEN: usize = 50;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "need", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into",
    "through", "during", "before", "after", "above", "below", "between", "under", "again",
    "further", "then", "once", "here", "there", "when", "where", "why", "how", "all", "each",
    "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same",
    "so", "than", "too", "very", "just", "and", "but", "if", "or", "because", "until", "while",
    "about", "what", "which", "who", "whom", "this", "that", "these", "those", "am", "i", "me",
    "my", "myself", "we", "our", "ours", "you", "your", "yours", "he", "him", "his", "she",
    "her", "hers", "it", "its", "they", "them", "their", "theirs",
];

/// Tiered quality weights. Defaults match the scoring model; callers can
/// tune them without touching the service.
#[derive(Debug, Clone)]
pub struct QualityPolicy {
    pub session_count_tiers: [(usize, f32); 3],
    pub session_description_bonus: f32,
    pub session_topics_bonus: f32,
    pub session_entities_bonus: f32,
    pub conversation_summary_bonus: f32,
    pub conversation_topics_bonus: f32,
    pub conversation_entities_bonus: f32,
    pub conversation_message_tiers: [(usize, f32); 3],
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            session_count_tiers: [(5, 0.4), (3, 0.3), (1, 0.2)],
            session_description_bonus: 0.2,
            session_topics_bonus: 0.2,
            session_entities_bonus: 0.2,
            conversation_summary_bonus: 0.3,
            conversation_topics_bonus: 0.2,
            conversation_entities_bonus: 0.2,
            conversation_message_tiers: [(10, 0.3), (5, 0.2), (2, 0.1)],
        }
    }
}

impl QualityPolicy {
    /// Session quality: membership size tier plus flat bonuses for
    /// having a description, topics, and entities.
    pub fn session_quality(&self, session: &Session) -> f32 {
        let mut score = tier_score(&self.session_count_tiers, session.conversation_count);
        if session.description.is_some() {
            score += self.session_description_bonus;
        }
        if !session.topics.is_empty() {
            score += self.session_topics_bonus;
        }
        if !session.entities.is_empty() {
            score += self.session_entities_bonus;
        }
        score.min(1.0)
    }

    pub fn conversation_quality(&self, conversation: &Conversation) -> f32 {
        let mut score = tier_score(
            &self.conversation_message_tiers,
            conversation.message_count,
        );
        if conversation.summary.is_some() {
            score += self.conversation_summary_bonus;
        }
        if !conversation.topics.is_empty() {
            score += self.conversation_topics_bonus;
        }
        if !conversation.entities.is_empty() {
            score += self.conversation_entities_bonus;
        }
        score.min(1.0)
    }
}

fn tier_score(tiers: &[(usize, f32)], count: usize) -> f32 {
    tiers
        .iter()
        .find(|(threshold, _)| count >= *threshold)
        .map(|(_, score)| *score)
        .unwrap_or(0.0)
}

pub struct RecommendationService {
    store: Arc<dyn RelationalStore>,
    graph: Option<Arc<dyn GraphStore>>,
    embeddings: Arc<dyn EmbeddingClient>,
    llm: Option<Arc<dyn ExtractionClient>>,
    scoring: ScoringConfig,
    quality: QualityPolicy,
}

impl RecommendationService {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        graph: Option<Arc<dyn GraphStore>>,
        embeddings: Arc<dyn EmbeddingClient>,
        llm: Option<Arc<dyn ExtractionClient>>,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            store,
            graph,
            embeddings,
            llm,
            scoring,
            quality: QualityPolicy::default(),
        }
    }

    pub fn with_quality_policy(mut self, quality: QualityPolicy) -> Self {
        self.quality = quality;
        self
    }

    pub async fn recommend(
        &self,
        user_id: &str,
        request: &RecommendRequest,
    ) -> Result<RecommendResponse> {
        let limit = request.limit.unwrap_or(DEFAULT_LIMIT).max(1);

        let query_text = match &request.query {
            Some(query) if !query.trim().is_empty() => Some(query.trim().to_string()),
            _ if !request.context_messages.is_empty() => {
                Some(format_messages(&request.context_messages))
            }
            _ => None,
        };

        let Some(query_text) = query_text else {
            // No signal at all: fall back to recent activity.
            return self.recent_activity(user_id, limit).await;
        };

        let embedding = self.embeddings.embed(&query_text).await?;
        let mut analysis = self.analyze_query(&query_text).await;

        // Graph expansion is best-effort recall improvement; a missing or
        // failing graph never fails the request.
        if let Some(graph) = &self.graph {
            let keywords = extract_keywords(&query_text);
            if !keywords.is_empty() {
                match graph
                    .related_entities(
                        user_id,
                        &keywords,
                        GRAPH_EXPANSION_HOPS,
                        GRAPH_EXPANSION_LIMIT,
                    )
                    .await
                {
                    Ok(expanded) => {
                        if !expanded.is_empty() {
                            tracing::debug!(user_id, ?expanded, "graph expansion for recommend");
                        }
                        analysis.graph_expanded = expanded;
                    }
                    Err(error) => {
                        tracing::warn!(user_id, %error, "graph expansion failed");
                    }
                }
            }
        }

        let match_terms: HashSet<String> = analysis
            .topics
            .iter()
            .chain(analysis.entities.iter())
            .chain(analysis.graph_expanded.iter())
            .map(|term| term.to_lowercase())
            .collect();

        let mut recommendations = self
            .score_sessions(user_id, &embedding, &match_terms, limit)
            .await?;
        recommendations.extend(
            self.score_conversations(user_id, &embedding, &match_terms, limit)
                .await?,
        );

        recommendations.sort_by(|a, b| b.score.final_score.total_cmp(&a.score.final_score));
        recommendations.truncate(limit as usize);

        let auto_selected = self.determine_auto_select(&recommendations);

        Ok(RecommendResponse {
            recommendations,
            auto_selected,
            query_analysis: analysis,
        })
    }

    async fn analyze_query(&self, query: &str) -> QueryAnalysis {
        let Some(llm) = &self.llm else {
            return QueryAnalysis::default();
        };

        match llm.analyze_topics(query).await {
            Ok(topics) => QueryAnalysis {
                topics: topics.topics,
                entities: topics.entities,
                graph_expanded: Vec::new(),
            },
            Err(error) => {
                tracing::warn!(%error, "query analysis failed");
                QueryAnalysis::default()
            }
        }
    }

    async fn score_sessions(
        &self,
        user_id: &str,
        embedding: &[f32],
        match_terms: &HashSet<String>,
        limit: u32,
    ) -> Result<Vec<RecommendationItem>> {
        let hits = self
            .store
            .search_sessions(user_id, embedding, limit, SEARCH_THRESHOLD)
            .await?;

        Ok(hits
            .into_iter()
            .map(|(session, similarity)| {
                let relevance = with_topic_bonus(similarity, &session.topics, match_terms);
                let recency = self.recency_score(session.last_activity);
                let quality = self.quality.session_quality(&session);

                RecommendationItem {
                    id: session.id,
                    kind: RecommendationKind::Session,
                    name: session.name,
                    summary: session.description,
                    source: None,
                    topics: session.topics,
                    entities: session.entities,
                    score: self.breakdown(relevance, recency, quality),
                    conversation_count: session.conversation_count,
                    last_activity: session.last_activity,
                }
            })
            .collect())
    }

    async fn score_conversations(
        &self,
        user_id: &str,
        embedding: &[f32],
        match_terms: &HashSet<String>,
        limit: u32,
    ) -> Result<Vec<RecommendationItem>> {
        let hits = self
            .store
            .search_conversations(user_id, embedding, limit * 2, SEARCH_THRESHOLD)
            .await?;

        let items: Vec<RecommendationItem> = hits
            .into_iter()
            // Session members surface through their session instead.
            .filter(|(conversation, _)| conversation.session_id.is_none())
            .map(|(conversation, similarity)| {
                let relevance = with_topic_bonus(similarity, &conversation.topics, match_terms);
                let recency = self.recency_score(Some(conversation.created_at));
                let quality = self.quality.conversation_quality(&conversation);
                let name = conversation_name(&conversation);

                RecommendationItem {
                    id: conversation.id,
                    kind: RecommendationKind::Conversation,
                    name,
                    summary: conversation.summary,
                    source: Some(conversation.source),
                    topics: conversation.topics,
                    entities: conversation.entities,
                    score: self.breakdown(relevance, recency, quality),
                    conversation_count: 1,
                    last_activity: Some(conversation.created_at),
                }
            })
            .take(limit as usize)
            .collect();

        Ok(items)
    }

    /// No query and no context: list the most recently active sessions
    /// and standalone conversations with relevance zeroed out.
    async fn recent_activity(&self, user_id: &str, limit: u32) -> Result<RecommendResponse> {
        let mut recommendations = Vec::new();

        for session in self.store.list_sessions(user_id, limit).await? {
            let recency = self.recency_score(session.last_activity);
            let quality = self.quality.session_quality(&session);
            recommendations.push(RecommendationItem {
                id: session.id,
                kind: RecommendationKind::Session,
                name: session.name,
                summary: session.description,
                source: None,
                topics: session.topics,
                entities: session.entities,
                score: self.breakdown(0.0, recency, quality),
                conversation_count: session.conversation_count,
                last_activity: session.last_activity,
            });
        }

        for conversation in self.store.standalone_conversations(user_id, limit).await? {
            let recency = self.recency_score(Some(conversation.created_at));
            let quality = self.quality.conversation_quality(&conversation);
            let name = conversation_name(&conversation);
            recommendations.push(RecommendationItem {
                id: conversation.id,
                kind: RecommendationKind::Conversation,
                name,
                summary: conversation.summary,
                source: Some(conversation.source),
                topics: conversation.topics,
                entities: conversation.entities,
                score: self.breakdown(0.0, recency, quality),
                conversation_count: 1,
                last_activity: Some(conversation.created_at),
            });
        }

        recommendations.sort_by(|a, b| b.score.final_score.total_cmp(&a.score.final_score));
        recommendations.truncate(limit as usize);

        Ok(RecommendResponse {
            recommendations,
            // Auto-selection needs a query to be meaningful.
            auto_selected: None,
            query_analysis: QueryAnalysis::default(),
        })
    }

    fn breakdown(&self, relevance: f32, recency: f32, quality: f32) -> ScoreBreakdown {
        ScoreBreakdown {
            relevance,
            recency,
            quality,
            final_score: relevance * self.scoring.relevance_weight
                + recency * self.scoring.recency_weight
                + quality * self.scoring.quality_weight,
        }
    }

    /// 1.0 within the full-credit window, then linear decay to zero.
    fn recency_score(&self, timestamp: Option<DateTime<Utc>>) -> f32 {
        let Some(timestamp) = timestamp else {
            return 0.0;
        };

        let hours_ago = (Utc::now() - timestamp).num_minutes() as f32 / 60.0;
        if hours_ago <= self.scoring.recency_full_hours {
            return 1.0;
        }

        let days_ago = hours_ago / 24.0;
        if days_ago >= self.scoring.recency_zero_days {
            return 0.0;
        }
        1.0 - days_ago / self.scoring.recency_zero_days
    }

    fn determine_auto_select(
        &self,
        recommendations: &[RecommendationItem],
    ) -> Option<RecommendationItem> {
        let top = recommendations.first()?;
        if top.score.final_score < self.scoring.auto_select_threshold {
            return None;
        }

        if let Some(second) = recommendations.get(1) {
            if top.score.final_score - second.score.final_score < self.scoring.auto_select_margin {
                return None;
            }
        }

        Some(top.clone())
    }
}

fn with_topic_bonus(similarity: f32, topics: &[String], match_terms: &HashSet<String>) -> f32 {
    let overlap = topics
        .iter()
        .filter(|topic| match_terms.contains(&topic.to_lowercase()))
        .count();
    (similarity + TOPIC_OVERLAP_BONUS * overlap as f32).min(1.0)
}

fn conversation_name(conversation: &Conversation) -> String {
    if let Some(summary) = conversation
        .summary
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        return summary.chars().take(NAME_SNIPPET_LEN).collect();
    }

    match conversation.messages.first() {
        Some(first) => {
            let snippet: String = first.content.chars().take(NAME_SNIPPET_LEN).collect();
            if first.content.chars().count() > NAME_SNIPPET_LEN {
                format!("{snippet}...")
            } else {
                snippet
            }
        }
        None => "Conversation".to_string(),
    }
}

/// Keyword extraction for graph lookup: lowercase, drop stop words and
/// short tokens, strip edge punctuation, dedupe preserving order.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for word in query.to_lowercase().split_whitespace() {
        if word.len() < 3 || STOP_WORDS.contains(&word) {
            continue;
        }
        let stripped = word.trim_matches(|c: char| ".,!?;:'\"()[]{}".contains(c));
        if stripped.is_empty() {
            continue;
        }
        if seen.insert(stripped.to_string()) {
            keywords.push(stripped.to_string());
        }
        if keywords.len() >= MAX_KEYWORDS {
            break;
        }
    }

    keywords
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn scoring() -> ScoringConfig {
        ScoringConfig {
            relevance_weight: 0.60,
            recency_weight: 0.25,
            quality_weight: 0.15,
            auto_select_threshold: 0.85,
            auto_select_margin: 0.20,
            suggest_threshold: 0.70,
            weak_match_threshold: 0.50,
            recency_full_hours: 24.0,
            recency_zero_days: 30.0,
        }
    }

    fn service() -> RecommendationService {
        use crate::store::InMemoryStore;

        struct NoopEmbeddings;

        #[async_trait::async_trait]
        impl EmbeddingClient for NoopEmbeddings {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![1.0, 0.0])
            }
            async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
            fn dimensions(&self) -> usize {
                2
            }
        }

        RecommendationService::new(
            Arc::new(InMemoryStore::new()),
            None,
            Arc::new(NoopEmbeddings),
            None,
            scoring(),
        )
    }

    fn session(count: usize) -> Session {
        let now = Utc::now();
        Session {
            id: "s1".to_string(),
            user_id: "u1".to_string(),
            name: "API redesign".to_string(),
            description: None,
            topics: Vec::new(),
            entities: Vec::new(),
            conversation_count: count,
            embedding: None,
            created_at: now,
            updated_at: now,
            last_activity: None,
        }
    }

    #[test]
    fn test_extract_keywords_drops_stop_words_and_short_tokens() {
        let keywords = extract_keywords("What database should I use for the project?");
        assert_eq!(keywords, vec!["database", "use", "project"]);
    }

    #[test]
    fn test_extract_keywords_strips_punctuation_and_dedupes() {
        let keywords = extract_keywords("postgres, postgres! redis?");
        assert_eq!(keywords, vec!["postgres", "redis"]);
    }

    #[test]
    fn test_extract_keywords_caps_at_ten() {
        let query = "alpha bravo charlie delta echo foxtrot golf hotel india juliet kilo lima";
        assert_eq!(extract_keywords(query).len(), 10);
    }

    #[test]
    fn test_recency_full_credit_within_a_day() {
        let svc = service();
        let score = svc.recency_score(Some(Utc::now() - Duration::hours(2)));
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_recency_zero_after_decay_window() {
        let svc = service();
        let score = svc.recency_score(Some(Utc::now() - Duration::days(31)));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_recency_linear_decay_midpoint() {
        let svc = service();
        let score = svc.recency_score(Some(Utc::now() - Duration::days(15)));
        assert!((score - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_session_quality_tiers() {
        let quality = QualityPolicy::default();
        assert_eq!(quality.session_quality(&session(0)), 0.0);
        assert_eq!(quality.session_quality(&session(1)), 0.2);
        assert_eq!(quality.session_quality(&session(3)), 0.3);
        assert_eq!(quality.session_quality(&session(7)), 0.4);
    }

    #[test]
    fn test_session_quality_metadata_bonuses() {
        let quality = QualityPolicy::default();
        let mut s = session(5);
        s.description = Some("Rework of the public API".to_string());
        s.topics = vec!["api".to_string()];
        s.entities = vec!["axum".to_string()];
        assert!((quality.session_quality(&s) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_topic_bonus_caps_at_one() {
        let terms: HashSet<String> = ["api", "database", "cache"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let topics: Vec<String> = ["api", "database", "cache"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(with_topic_bonus(0.9, &topics, &terms), 1.0);
    }

    #[test]
    fn test_auto_select_requires_threshold_and_margin() {
        let svc = service();

        let item = |id: &str, final_score: f32| RecommendationItem {
            id: id.to_string(),
            kind: RecommendationKind::Session,
            name: id.to_string(),
            summary: None,
            source: None,
            topics: Vec::new(),
            entities: Vec::new(),
            score: ScoreBreakdown {
                relevance: 0.0,
                recency: 0.0,
                quality: 0.0,
                final_score,
            },
            conversation_count: 0,
            last_activity: None,
        };

        // Below threshold.
        assert!(svc.determine_auto_select(&[item("a", 0.80)]).is_none());
        // Clears threshold, single candidate.
        assert_eq!(
            svc.determine_auto_select(&[item("a", 0.90)]).map(|r| r.id),
            Some("a".to_string())
        );
        // Clears threshold but the runner-up is too close.
        assert!(svc
            .determine_auto_select(&[item("a", 0.90), item("b", 0.85)])
            .is_none());
        // Clear margin.
        assert_eq!(
            svc.determine_auto_select(&[item("a", 0.95), item("b", 0.60)])
                .map(|r| r.id),
            Some("a".to_string())
        );
    }
}
