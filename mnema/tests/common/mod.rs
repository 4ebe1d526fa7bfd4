#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;

use mnema::config::{ChunkingConfig, RetrievalConfig, ScoringConfig};
use mnema::embeddings::EmbeddingClient;
use mnema::error::Result;
use mnema::graph::InMemoryGraph;
use mnema::intelligence::RawKnowledge;
use mnema::llm::{ConversationDigest, ExtractionClient, TopicAnalysis};
use mnema::models::Message;
use mnema::services::{IngestService, KnowledgeService, RecommendationService, RetrieveService};
use mnema::store::InMemoryStore;

const FAKE_DIMS: usize = 256;

/// Deterministic embeddings: a hashed bag-of-words vector, L2-normalized.
/// Identical texts embed identically and texts sharing words land close,
/// which is all the similarity machinery needs.
pub struct FakeEmbeddings;

fn token_slot(token: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % FAKE_DIMS
}

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; FAKE_DIMS];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        vector[token_slot(token)] += 1.0;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[async_trait]
impl EmbeddingClient for FakeEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(bag_of_words(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }

    fn dimensions(&self) -> usize {
        FAKE_DIMS
    }
}

/// Canned extraction responses.
#[derive(Default)]
pub struct FakeExtraction {
    pub knowledge: RawKnowledge,
    pub digest: Option<ConversationDigest>,
    pub topics: TopicAnalysis,
    pub summary: String,
}

impl FakeExtraction {
    pub fn with_knowledge(knowledge: serde_json::Value) -> Self {
        Self {
            knowledge: serde_json::from_value(knowledge).expect("knowledge fixture must parse"),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExtractionClient for FakeExtraction {
    async fn extract_knowledge(&self, _messages: &[Message]) -> Result<RawKnowledge> {
        Ok(self.knowledge.clone())
    }

    async fn digest(&self, messages: &[Message]) -> Result<ConversationDigest> {
        Ok(self.digest.clone().unwrap_or_else(|| ConversationDigest {
            // Derive the digest from the transcript so different
            // conversations keep distinct embeddings.
            summary: messages
                .first()
                .map(|m| m.content.clone())
                .unwrap_or_default(),
            topics: vec!["testing".to_string()],
            entities: Vec::new(),
        }))
    }

    async fn analyze_topics(&self, _text: &str) -> Result<TopicAnalysis> {
        Ok(TopicAnalysis {
            topics: self.topics.topics.clone(),
            entities: self.topics.entities.clone(),
        })
    }

    async fn summarize_context(&self, _prompt: &str) -> Result<String> {
        Ok(self.summary.clone())
    }
}

pub fn chunking_config() -> ChunkingConfig {
    ChunkingConfig {
        target_size: 600,
        min_size: 200,
        max_size: 1000,
        overlap_sentences: 2,
    }
}

pub fn scoring_config() -> ScoringConfig {
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

pub fn retrieval_config() -> RetrievalConfig {
    RetrievalConfig {
        // Hashed bag-of-words similarities run lower than real embedding
        // models; keep the gate permissive for the flows.
        similarity_threshold: 0.35,
        max_chunks: 5,
        hybrid_semantic_weight: 0.7,
        max_context_length: 8000,
    }
}

/// Everything the flows need, wired over in-memory backends.
pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub graph: Arc<InMemoryGraph>,
    pub embeddings: Arc<FakeEmbeddings>,
    pub llm: Arc<FakeExtraction>,
}

impl TestHarness {
    pub fn new(llm: FakeExtraction) -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            graph: Arc::new(InMemoryGraph::new()),
            embeddings: Arc::new(FakeEmbeddings),
            llm: Arc::new(llm),
        }
    }

    pub fn ingest_service(&self) -> IngestService {
        IngestService::new(
            self.store.clone(),
            Some(self.graph.clone()),
            self.embeddings.clone(),
            Some(self.llm.clone()),
            &chunking_config(),
            scoring_config(),
        )
    }

    /// Ingest wired without a knowledge graph, for degradation tests.
    pub fn ingest_service_without_graph(&self) -> IngestService {
        IngestService::new(
            self.store.clone(),
            None,
            self.embeddings.clone(),
            Some(self.llm.clone()),
            &chunking_config(),
            scoring_config(),
        )
    }

    pub fn retrieve_service(&self) -> RetrieveService {
        RetrieveService::new(
            self.store.clone(),
            Some(self.graph.clone()),
            self.embeddings.clone(),
            Some(self.llm.clone()),
            retrieval_config(),
        )
    }

    pub fn recommend_service(&self) -> RecommendationService {
        RecommendationService::new(
            self.store.clone(),
            Some(self.graph.clone()),
            self.embeddings.clone(),
            Some(self.llm.clone()),
            scoring_config(),
        )
    }

    pub fn knowledge_service(&self) -> KnowledgeService {
        KnowledgeService::new(self.graph.clone())
    }
}

pub fn conversation_about_databases() -> Vec<Message> {
    vec![
        Message::user("What database should I use for my analytics project?"),
        Message::assistant(
            "PostgreSQL is a strong default for analytics workloads. \
             It has mature indexing and window functions.",
        ),
        Message::user("I decided to go with PostgreSQL because of ACID compliance."),
    ]
}

pub fn knowledge_with_decision() -> serde_json::Value {
    serde_json::json!({
        "entities": [
            {"name": "PostgreSQL", "type": "Tool", "description": "Relational database"}
        ],
        "relationships": [
            {
                "source": "User",
                "target": "PostgreSQL",
                "type": "CHOSE",
                "confidence": 0.9,
                "attributed_to": "user",
                "temporal": "current",
                "reason": "ACID compliance"
            }
        ],
        "facts": [
            {"subject": "User", "predicate": "WORKS_AT", "object": "Acme", "confidence": 0.9}
        ]
    })
}
