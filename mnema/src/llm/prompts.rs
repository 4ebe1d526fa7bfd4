//! Prompt templates for the extraction and summarization calls.

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a knowledge extraction assistant. Extract structured information from conversations. Always return valid JSON.";

pub fn extraction_prompt(conversation: &str) -> String {
    format!(
        r#"Analyze this conversation and extract structured knowledge.

CONVERSATION:
{conversation}

Extract the following:

1. ENTITIES: People, companies, tools, technologies, projects, or concepts mentioned.
   - Include the entity name, type, and optional description
   - Types can be: Tool, Project, Company, Person, Concept, Technology

2. RELATIONSHIPS: How entities are connected.
   - Relationship types:
     - CHOSE/DECIDED: when the user chooses or decides on something
     - CONSIDERING: when the user is weighing an option
     - REJECTED: when the user rules an option out
     - BUILDS: when the user is building a project
     - USES: when a project or user uses a tool
     - USED: when something was used in the past
     - WORKS_AT: when the user works at a company
     - PREFERS: when the user expresses a preference
     - RELATED_TO: general relationship between entities
   - Include "confidence" (0.0-1.0), "attributed_to" (user, colleague,
     article, docs, ai_suggestion, other), "temporal" (current, past,
     future), and a "reason" when one is stated

3. FACTS: Statements that might change over time.
   - Include subject, predicate, object
   - These are for temporal tracking (e.g., "User works at Google" might change)

Return valid JSON in this exact format:
{{
  "entities": [
    {{"name": "PostgreSQL", "type": "Tool", "description": "Relational database"}}
  ],
  "relationships": [
    {{"source": "User", "target": "PostgreSQL", "type": "CHOSE", "confidence": 0.9, "attributed_to": "user", "temporal": "current", "reason": "ACID compliance"}}
  ],
  "facts": [
    {{"subject": "User", "predicate": "WORKS_AT", "object": "Google", "confidence": 0.9}}
  ]
}}

Important:
- Only extract information explicitly mentioned in the conversation
- Use "User" as the subject when referring to the person in the conversation
- Be conservative, do not infer things that are not clearly stated
- If no entities/relationships/facts are found, return empty arrays"#
    )
}

pub fn digest_prompt(conversation: &str) -> String {
    format!(
        r#"Summarize this conversation and identify what it is about.

CONVERSATION:
{conversation}

Return valid JSON in this exact format:
{{
  "summary": "2-3 sentence summary of what was discussed and decided",
  "topics": ["topic1", "topic2"],
  "entities": ["entity1", "entity2"]
}}"#
    )
}

pub fn topic_analysis_prompt(text: &str) -> String {
    let truncated: String = text.chars().take(2000).collect();
    format!(
        r#"Analyze this text and extract:
1. Main topics (general subjects being discussed)
2. Key entities (specific things like technologies, products, names)

Text: {truncated}

Return JSON:
{{"topics": ["topic1", "topic2"], "entities": ["entity1", "entity2"]}}"#
    )
}

pub fn context_summary_prompt(
    query: &str,
    chunks: &str,
    decisions: &str,
    facts: &str,
    entities: &str,
) -> String {
    format!(
        r#"Based on the user's query and their past context, provide a helpful summary.

USER'S QUERY:
{query}

RELEVANT CONVERSATIONS:
{chunks}

DECISIONS MADE:
{decisions}

CURRENT FACTS:
{facts}

RELATED ENTITIES:
{entities}

---

Provide a concise, helpful summary that:
1. Directly addresses the user's query
2. References specific decisions they've made
3. Mentions relevant context from past conversations

If there's no relevant context, say so clearly.

Keep the summary to 2-4 sentences. Be specific and actionable."#
    )
}
