//! Context retrieval: four modes (query, full, session, conversation)
//! that assemble stored conversations, knowledge, and chunk hits into a
//! bounded, ready-to-inject context prompt.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingClient;
use crate::error::{MnemaError, Result};
use crate::graph::GraphStore;
use crate::llm::{prompts, ExtractionClient};
use crate::models::{
    Attribution, ChunkHit, ContextOptions, Conversation, DecisionInfo, EdgeStatus, FactInfo,
    RetrieveMode, RetrieveRequest, RetrieveResponse, Session, SourceInfo,
};
use crate::services::recommend::extract_keywords;
use crate::store::RelationalStore;

const SESSION_MESSAGE_LIMIT: usize = 800;
const FULL_MESSAGE_LIMIT: usize = 500;
const QUERY_SNIPPET_LIMIT: usize = 300;
const SOURCE_SNIPPET_LIMIT: usize = 200;
const MAX_KNOWLEDGE_ITEMS: u32 = 50;

pub struct RetrieveService {
    store: Arc<dyn RelationalStore>,
    graph: Option<Arc<dyn GraphStore>>,
    embeddings: Arc<dyn EmbeddingClient>,
    llm: Option<Arc<dyn ExtractionClient>>,
    config: RetrievalConfig,
}

/// Knowledge pulled for a retrieval, already filtered by the caller's
/// context options.
#[derive(Default)]
struct KnowledgeContext {
    decisions: Vec<DecisionInfo>,
    facts: Vec<FactInfo>,
    entities: Vec<String>,
}

impl RetrieveService {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        graph: Option<Arc<dyn GraphStore>>,
        embeddings: Arc<dyn EmbeddingClient>,
        llm: Option<Arc<dyn ExtractionClient>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            graph,
            embeddings,
            llm,
            config,
        }
    }

    pub async fn retrieve(
        &self,
        user_id: &str,
        request: &RetrieveRequest,
    ) -> Result<RetrieveResponse> {
        let limit = request.limit.unwrap_or(self.config.max_chunks).max(1);

        let mut chunks: Vec<ChunkHit> = Vec::new();
        let mut conversations: Vec<Conversation> = Vec::new();
        let mut session: Option<Session> = None;

        match request.mode {
            RetrieveMode::Query => {
                let query = request
                    .query
                    .as_deref()
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .ok_or_else(|| {
                        MnemaError::Validation("Query is required for query mode".to_string())
                    })?;

                let embedding = self.embeddings.embed(query).await?;
                chunks = if request.options.hybrid_search {
                    let keywords = extract_keywords(query);
                    self.store
                        .search_chunks_hybrid(
                            user_id,
                            &embedding,
                            &keywords,
                            limit,
                            self.config.hybrid_semantic_weight,
                        )
                        .await?
                } else {
                    self.store
                        .search_chunks(user_id, &embedding, limit, self.config.similarity_threshold)
                        .await?
                };
            }
            RetrieveMode::Full => {
                conversations = self.store.recent_conversations(user_id, limit).await?;
            }
            RetrieveMode::Session => {
                let session_id = request.session_id.as_deref().ok_or_else(|| {
                    MnemaError::Validation("session_id is required for session mode".to_string())
                })?;

                session = Some(
                    self.store
                        .get_session(user_id, session_id)
                        .await?
                        .ok_or_else(|| {
                            MnemaError::NotFound(format!("Session {session_id} not found"))
                        })?,
                );
                conversations = self
                    .store
                    .conversations_by_session(user_id, session_id)
                    .await?;
            }
            RetrieveMode::Conversation => {
                let conversation_id = request.conversation_id.as_deref().ok_or_else(|| {
                    MnemaError::Validation(
                        "conversation_id is required for conversation mode".to_string(),
                    )
                })?;

                let conversation = self
                    .store
                    .get_conversation(user_id, conversation_id)
                    .await?
                    .ok_or_else(|| {
                        MnemaError::NotFound(format!("Conversation {conversation_id} not found"))
                    })?;

                if let Some(session_id) = &conversation.session_id {
                    session = self.store.get_session(user_id, session_id).await?;
                }
                conversations = vec![conversation];
            }
        }

        // Knowledge is optional context; a failing graph degrades to the
        // memory layer alone.
        let knowledge = self.knowledge_context(user_id, &request.options).await;

        let sources = build_sources(&chunks, &conversations);
        let chunks_found = if chunks.is_empty() {
            conversations.len()
        } else {
            chunks.len()
        };

        let max_length = request
            .options
            .max_context_length
            .unwrap_or(self.config.max_context_length);
        let context_prompt = build_context_prompt(
            request.mode,
            &knowledge,
            &chunks,
            &conversations,
            session.as_ref(),
            request.options.custom_note.as_deref(),
            max_length,
        );

        let summary = self
            .build_summary(request, &knowledge, &chunks, &conversations)
            .await;

        Ok(RetrieveResponse {
            summary,
            context_prompt,
            decisions: knowledge.decisions,
            facts: knowledge.facts,
            entities: knowledge.entities,
            sources,
            chunks_found,
            session,
        })
    }

    async fn knowledge_context(&self, user_id: &str, options: &ContextOptions) -> KnowledgeContext {
        let Some(graph) = &self.graph else {
            tracing::debug!(user_id, "graph unavailable, memory layer only");
            return KnowledgeContext::default();
        };

        let edges = match graph.edges(user_id).await {
            Ok(edges) => edges,
            Err(error) => {
                tracing::warn!(user_id, %error, "graph edge query failed");
                return KnowledgeContext::default();
            }
        };

        let mut decisions: Vec<DecisionInfo> = edges
            .iter()
            .filter(|edge| !edge.marked_incorrect)
            .filter(|edge| match edge.status {
                EdgeStatus::Decided => edge.relation.is_decision(),
                EdgeStatus::Exploring => options.include_exploring,
                EdgeStatus::Rejected => options.include_rejected,
            })
            .filter(|edge| {
                !options.only_user_attributed || edge.attributed_to == Attribution::User
            })
            .filter(|edge| !options.only_verified || edge.verified)
            .filter(|edge| {
                !options
                    .exclude_entities
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&edge.target))
            })
            .filter(|edge| !options.exclude_decision_ids.contains(&edge.id))
            .map(|edge| DecisionInfo {
                id: edge.id.clone(),
                subject: edge.source.clone(),
                decision: edge.target.clone(),
                relation: edge.relation.as_str().to_string(),
                status: edge.status,
                confidence: edge.confidence,
                verified: edge.verified,
                reason: edge.reason.clone(),
                date: edge.created_at,
            })
            .collect();
        decisions.sort_by(|a, b| b.date.cmp(&a.date));
        decisions.truncate(MAX_KNOWLEDGE_ITEMS as usize);

        let facts = match graph.current_facts(user_id, MAX_KNOWLEDGE_ITEMS).await {
            Ok(facts) => facts
                .into_iter()
                .map(|fact| FactInfo {
                    subject: fact.subject,
                    predicate: fact.predicate,
                    object: fact.object,
                    confidence: fact.confidence,
                    since: fact.valid_from,
                })
                .collect(),
            Err(error) => {
                tracing::warn!(user_id, %error, "graph fact query failed");
                Vec::new()
            }
        };

        let entities = match graph.entities(user_id, MAX_KNOWLEDGE_ITEMS).await {
            Ok(entities) => entities
                .into_iter()
                .map(|entity| entity.name)
                .filter(|name| {
                    !options
                        .exclude_entities
                        .iter()
                        .any(|excluded| excluded.eq_ignore_ascii_case(name))
                })
                .collect(),
            Err(error) => {
                tracing::warn!(user_id, %error, "graph entity query failed");
                Vec::new()
            }
        };

        KnowledgeContext {
            decisions,
            facts,
            entities,
        }
    }

    async fn build_summary(
        &self,
        request: &RetrieveRequest,
        knowledge: &KnowledgeContext,
        chunks: &[ChunkHit],
        conversations: &[Conversation],
    ) -> String {
        if let Some(custom) = &request.options.custom_summary {
            return custom.clone();
        }
        if request.options.skip_summary_generation {
            return String::new();
        }

        let query = match request.mode {
            RetrieveMode::Query => request.query.as_deref().unwrap_or_default().to_string(),
            _ => "Provide full context summary".to_string(),
        };

        if let Some(llm) = &self.llm {
            let prompt = prompts::context_summary_prompt(
                &query,
                &format_chunks(chunks, conversations),
                &format_decisions(&knowledge.decisions),
                &format_facts(&knowledge.facts),
                &format_entities(&knowledge.entities),
            );
            match llm.summarize_context(&prompt).await {
                Ok(summary) => return summary,
                Err(error) => {
                    tracing::warn!(%error, "summary generation failed, using fallback");
                }
            }
        }

        fallback_summary(knowledge, chunks, conversations)
    }
}

fn fallback_summary(
    knowledge: &KnowledgeContext,
    chunks: &[ChunkHit],
    conversations: &[Conversation],
) -> String {
    let found = if chunks.is_empty() {
        conversations.len()
    } else {
        chunks.len()
    };
    format!(
        "Found {found} relevant conversation(s), {} decision(s), and {} current fact(s).",
        knowledge.decisions.len(),
        knowledge.facts.len()
    )
}

fn format_chunks(chunks: &[ChunkHit], conversations: &[Conversation]) -> String {
    if !chunks.is_empty() {
        return chunks
            .iter()
            .map(|hit| format!("[{}]\n{}", hit.source, hit.chunk.content))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
    }
    if !conversations.is_empty() {
        return conversations
            .iter()
            .map(|conversation| {
                format!(
                    "[{}]\n{}",
                    conversation.source,
                    conversation.summary.as_deref().unwrap_or("(no summary)")
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
    }
    "No relevant conversations found.".to_string()
}

fn format_decisions(decisions: &[DecisionInfo]) -> String {
    if decisions.is_empty() {
        return "No decisions recorded.".to_string();
    }
    decisions
        .iter()
        .map(|d| {
            format!(
                "- {} {} {} ({})",
                d.subject,
                d.relation,
                d.decision,
                d.reason.as_deref().unwrap_or("no reason given")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_facts(facts: &[FactInfo]) -> String {
    if facts.is_empty() {
        return "No facts recorded.".to_string();
    }
    facts
        .iter()
        .map(|f| format!("- {} {} {}", f.subject, f.predicate, f.object))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_entities(entities: &[String]) -> String {
    if entities.is_empty() {
        return "None".to_string();
    }
    entities.join(", ")
}

fn build_sources(chunks: &[ChunkHit], conversations: &[Conversation]) -> Vec<SourceInfo> {
    if !chunks.is_empty() {
        return chunks
            .iter()
            .map(|hit| SourceInfo {
                conversation_id: hit.chunk.conversation_id.clone(),
                source: hit.source.clone(),
                snippet: truncate(&hit.chunk.content, SOURCE_SNIPPET_LIMIT),
                similarity: Some(hit.similarity),
            })
            .collect();
    }

    conversations
        .iter()
        .map(|conversation| {
            let snippet = conversation
                .summary
                .clone()
                .or_else(|| {
                    conversation
                        .messages
                        .first()
                        .map(|message| message.content.clone())
                })
                .unwrap_or_default();
            SourceInfo {
                conversation_id: conversation.id.clone(),
                source: conversation.source.clone(),
                snippet: truncate(&snippet, SOURCE_SNIPPET_LIMIT),
                similarity: None,
            }
        })
        .collect()
}

/// Assemble the injectable context prompt. Section layout depends on the
/// mode; the whole prompt is truncated to `max_length` characters.
fn build_context_prompt(
    mode: RetrieveMode,
    knowledge: &KnowledgeContext,
    chunks: &[ChunkHit],
    conversations: &[Conversation],
    session: Option<&Session>,
    custom_note: Option<&str>,
    max_length: usize,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push("[CONTEXT FROM PREVIOUS AI CONVERSATIONS]".to_string());
    sections.push(String::new());

    if let Some(note) = custom_note.filter(|n| !n.trim().is_empty()) {
        sections.push(format!("Note: {note}"));
        sections.push(String::new());
    }

    if let (Some(session), RetrieveMode::Session) = (session, mode) {
        sections.push(format!("## Session: {}", session.name));
        if let Some(description) = &session.description {
            sections.push(format!("Description: {description}"));
        }
        if !session.topics.is_empty() {
            sections.push(format!("Topics: {}", session.topics.join(", ")));
        }
        sections.push(format!(
            "Conversations in session: {}",
            session.conversation_count
        ));
        sections.push(String::new());
    }

    match mode {
        RetrieveMode::Session if !conversations.is_empty() => {
            sections.push("## Complete Session History (chronological):".to_string());
            sections.push(String::new());
            for conversation in conversations {
                sections.push(format!(
                    "### [{}] - {}",
                    conversation.source,
                    conversation.created_at.to_rfc3339()
                ));
                push_messages(&mut sections, conversation, Some(SESSION_MESSAGE_LIMIT));
                sections.push(String::new());
            }
        }
        RetrieveMode::Full if !conversations.is_empty() => {
            sections.push("## Complete Conversation History:".to_string());
            sections.push(String::new());
            for conversation in conversations {
                sections.push(format!("### Conversation from {}:", conversation.source));
                push_messages(&mut sections, conversation, Some(FULL_MESSAGE_LIMIT));
                sections.push(String::new());
            }
        }
        RetrieveMode::Conversation if !conversations.is_empty() => {
            sections.push("## Full Conversation:".to_string());
            sections.push(String::new());
            for conversation in conversations {
                push_messages(&mut sections, conversation, None);
                sections.push(String::new());
            }
        }
        _ => {}
    }

    if !knowledge.decisions.is_empty() {
        sections.push("## Key Decisions Made:".to_string());
        for decision in &knowledge.decisions {
            let reason = decision
                .reason
                .as_deref()
                .map(|r| format!(" (Reason: {r})"))
                .unwrap_or_default();
            sections.push(format!(
                "- {} {} {}{reason}",
                decision.subject, decision.relation, decision.decision
            ));
        }
        sections.push(String::new());
    }

    if !knowledge.facts.is_empty() {
        sections.push("## Current Facts:".to_string());
        for fact in &knowledge.facts {
            sections.push(format!("- {} {} {}", fact.subject, fact.predicate, fact.object));
        }
        sections.push(String::new());
    }

    if !knowledge.entities.is_empty() {
        sections.push("## Key Entities/Topics:".to_string());
        sections.push(format!("- {}", knowledge.entities.join(", ")));
        sections.push(String::new());
    }

    if mode == RetrieveMode::Query && !chunks.is_empty() {
        sections.push("## Relevant Past Discussions:".to_string());
        for hit in chunks.iter().take(5) {
            sections.push(format!(
                "- {}",
                truncate(&hit.chunk.content, QUERY_SNIPPET_LIMIT)
            ));
        }
        sections.push(String::new());
    }

    sections.push("## Instructions:".to_string());
    sections.push("- Use this context to maintain conversation continuity".to_string());
    sections.push("- Don't ask questions the user has already answered".to_string());
    sections.push("- Reference past decisions when relevant".to_string());
    sections.push("- If the user contradicts a past decision, acknowledge it".to_string());
    if matches!(mode, RetrieveMode::Full | RetrieveMode::Session) {
        sections.push("- This is the user's COMPLETE context - use all of it as needed".to_string());
    }
    sections.push(String::new());
    sections.push("[END CONTEXT]".to_string());

    let prompt = sections.join("\n");
    if prompt.chars().count() > max_length {
        let mut truncated: String = prompt.chars().take(max_length).collect();
        truncated.push_str("\n... [context truncated]");
        truncated
    } else {
        prompt
    }
}

fn push_messages(sections: &mut Vec<String>, conversation: &Conversation, limit: Option<usize>) {
    for message in &conversation.messages {
        let content = match limit {
            Some(limit) => truncate_marked(&message.content, limit),
            None => message.content.clone(),
        };
        sections.push(format!("**{}**: {content}", message.role.label()));
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

fn truncate_marked(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("... [truncated]");
    out
}
