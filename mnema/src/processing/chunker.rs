use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::models::Message;

const CODE_BLOCK_PLACEHOLDER: &str = "___CODE_BLOCK_{}_END___";
const CODE_BLOCK_MARKER: &str = "___CODE_BLOCK_";

/// Decision-language patterns. Sentence boundaries that fall inside a
/// padded window around a match are not used as split points, so a
/// decision and its reason stay in the same chunk.
const DECISION_PATTERNS: &[&str] = &[
    // Positive decisions
    r"I'll\s+\w+",
    r"I\s+will\s+\w+",
    r"I\s+decided",
    r"I\s+chose",
    r"I\s+picked",
    r"I\s+selected",
    r"going\s+with",
    r"let's\s+use",
    r"let's\s+go\s+with",
    r"we\s+should\s+use",
    r"I\s+recommend",
    r"the\s+best\s+option\s+is",
    r"my\s+choice\s+is",
    // Negative decisions
    r"NOT\s+going\s+to",
    r"won't\s+\w+",
    r"don't\s+want",
    r"don't\s+use",
    r"shouldn't\s+use",
    r"wouldn't\s+recommend",
    r"would\s+NOT\s+recommend",
    r"avoid\s+\w+",
    r"rejected\s+\w+",
    r"ruled\s+out",
    r"not\s+a\s+good\s+fit",
    r"decided\s+against",
    // Comparisons
    r"better\s+than",
    r"worse\s+than",
    r"prefer\s+\w+\s+over",
    r"compared\s+to",
    r"instead\s+of",
    r"rather\s+than",
    r"as\s+opposed\s+to",
    // Conditionals
    r"if\s+.{5,50}\s+then",
    r"in\s+case\s+of",
    r"assuming\s+",
    r"provided\s+that",
    // Conclusions and reasons
    r"because\s+",
    r"therefore\s+",
    r"thus\s+",
    r"hence\s+",
    r"so\s+that",
    r"in\s+order\s+to",
    r"the\s+reason\s+is",
    r"due\s+to",
    r"as\s+a\s+result",
    // Contrasts
    r"however\s+",
    r"although\s+",
    r"even\s+though",
    r"on\s+the\s+other\s+hand",
    r"nevertheless",
    r"nonetheless",
    r"despite\s+",
    // Uncertainty markers stay with their subject
    r"maybe\s+",
    r"perhaps\s+",
    r"probably\s+",
    r"might\s+\w+",
    r"could\s+be",
    r"I\s+think\s+",
    r"I\s+believe\s+",
    r"I'm\s+not\s+sure",
    r"I'm\s+considering",
];

const ZONE_PADDING_BEFORE: usize = 50;
const ZONE_PADDING_AFTER: usize = 100;

/// Splits conversations into semantically coherent chunks: sentence
/// boundaries only, fenced code blocks intact, decision statements kept
/// with their context.
pub struct SemanticChunker {
    target_size: usize,
    min_size: usize,
    max_size: usize,
    overlap_sentences: usize,
    code_fence: Regex,
    decision_patterns: Vec<Regex>,
}

impl SemanticChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        let decision_patterns = DECISION_PATTERNS
            .iter()
            .map(|pattern| {
                Regex::new(&format!("(?i){pattern}")).expect("decision pattern must compile")
            })
            .collect();

        Self {
            target_size: config.target_size,
            min_size: config.min_size,
            max_size: config.max_size,
            overlap_sentences: config.overlap_sentences,
            code_fence: Regex::new(r"```[\s\S]*?```").expect("code fence pattern must compile"),
            decision_patterns,
        }
    }

    /// Chunk a conversation. Each message is processed independently with
    /// a `ROLE:` prefix; short messages become one chunk, long messages
    /// split at sentence boundaries with sentence overlap, and chunks
    /// below `min_size` merge into their neighbor.
    pub fn chunk(&self, messages: &[Message]) -> Vec<String> {
        let mut chunks = Vec::new();

        for msg in messages {
            let content = msg.content.trim();
            if content.is_empty() {
                continue;
            }

            let (masked, code_blocks) = self.mask_code_blocks(content);
            let role = msg.role.label();
            let full_text = format!("{role}: {masked}");

            if full_text.len() <= self.max_size {
                chunks.push(restore_code_blocks(full_text, &code_blocks));
                continue;
            }

            let sentences = split_into_sentences(&masked);
            if sentences.is_empty() {
                chunks.push(restore_code_blocks(full_text, &code_blocks));
                continue;
            }

            let zones = self.find_decision_zones(&masked);
            let spans = sentence_spans(&masked, &sentences);

            for chunk in self.split_message(role, &sentences, &spans, &zones) {
                chunks.push(restore_code_blocks(chunk, &code_blocks));
            }
        }

        self.merge_short_chunks(chunks)
    }

    /// Greedy sentence accumulation for one oversized message.
    fn split_message(
        &self,
        role: &str,
        sentences: &[String],
        spans: &[(usize, usize)],
        zones: &[(usize, usize)],
    ) -> Vec<String> {
        let prefix = format!("{role}: ");
        let mut chunks = Vec::new();
        let mut current = prefix.clone();
        let mut current_sentences: Vec<String> = Vec::new();

        // Widening to protect a decision zone is bounded so a run of
        // overlapping zones cannot produce an unbounded chunk.
        let widen_limit = self.max_size + self.target_size;

        for (i, sentence) in sentences.iter().enumerate() {
            let would_be = current.len() + sentence.len() + 1;

            if would_be > self.max_size && !current_sentences.is_empty() {
                let split_at = spans[i].0;
                if in_zone(split_at, zones) && current.len() < widen_limit {
                    current.push(' ');
                    current.push_str(sentence);
                    current_sentences.push(sentence.clone());
                    continue;
                }

                chunks.push(current.trim().to_string());

                let overlap_start = current_sentences
                    .len()
                    .saturating_sub(self.overlap_sentences);
                // A masked block in the overlap would restore into two
                // chunks, so placeholder sentences never carry over.
                let overlap: Vec<String> = current_sentences[overlap_start..]
                    .iter()
                    .filter(|s| !s.contains(CODE_BLOCK_MARKER))
                    .cloned()
                    .collect();
                current = format!("{prefix}{}", overlap.join(" "));
                current_sentences = overlap;
            }

            if !current.ends_with(' ') {
                current.push(' ');
            }
            current.push_str(sentence);
            current_sentences.push(sentence.clone());
        }

        let trimmed = current.trim();
        if !trimmed.is_empty() && trimmed != prefix.trim() {
            chunks.push(trimmed.to_string());
        }

        chunks
    }

    /// Replace fenced code blocks with indexed placeholders so the
    /// sentence splitter never sees them.
    fn mask_code_blocks(&self, text: &str) -> (String, Vec<(String, String)>) {
        let mut blocks = Vec::new();
        let mut masked = String::with_capacity(text.len());
        let mut cursor = 0;

        for (i, m) in self.code_fence.find_iter(text).enumerate() {
            let placeholder = CODE_BLOCK_PLACEHOLDER.replace("{}", &i.to_string());
            masked.push_str(&text[cursor..m.start()]);
            masked.push_str(&placeholder);
            blocks.push((placeholder, m.as_str().to_string()));
            cursor = m.end();
        }
        masked.push_str(&text[cursor..]);

        (masked, blocks)
    }

    fn find_decision_zones(&self, text: &str) -> Vec<(usize, usize)> {
        let mut zones = Vec::new();
        for pattern in &self.decision_patterns {
            for m in pattern.find_iter(text) {
                let start = m.start().saturating_sub(ZONE_PADDING_BEFORE);
                let end = (m.end() + ZONE_PADDING_AFTER).min(text.len());
                zones.push((start, end));
            }
        }
        zones
    }

    fn merge_short_chunks(&self, chunks: Vec<String>) -> Vec<String> {
        let mut merged: Vec<String> = Vec::new();

        for chunk in chunks {
            if chunk.len() < self.min_size {
                if let Some(last) = merged.last_mut() {
                    last.push(' ');
                    last.push_str(&chunk);
                    continue;
                }
            } else if let Some(last) = merged.last() {
                // A short leading chunk absorbs the next one instead.
                if last.len() < self.min_size {
                    let prev = merged.pop().unwrap_or_default();
                    merged.push(format!("{prev} {chunk}"));
                    continue;
                }
            }
            merged.push(chunk);
        }

        merged.retain(|c| !c.trim().is_empty());
        merged
    }
}

fn in_zone(pos: usize, zones: &[(usize, usize)]) -> bool {
    zones.iter().any(|(start, end)| pos > *start && pos < *end)
}

fn restore_code_blocks(mut text: String, blocks: &[(String, String)]) -> String {
    for (placeholder, original) in blocks {
        text = text.replace(placeholder, original);
    }
    text
}

/// Locate each sentence's byte span in the source text. Sentences arrive
/// in order and differ from the source only by surrounding whitespace,
/// so an incremental forward search is exact.
fn sentence_spans(text: &str, sentences: &[String]) -> Vec<(usize, usize)> {
    let mut spans = Vec::with_capacity(sentences.len());
    let mut cursor = 0;

    for sentence in sentences {
        match text[cursor..].find(sentence.as_str()) {
            Some(offset) => {
                let start = cursor + offset;
                let end = start + sentence.len();
                spans.push((start, end));
                cursor = end;
            }
            None => spans.push((cursor, cursor + sentence.len())),
        }
    }

    spans
}

/// Sentence splitter with guards for abbreviations, initials, decimal
/// numbers, and URLs. A boundary is a terminator followed by whitespace.
fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for grapheme in text.graphemes(true) {
        let is_whitespace = grapheme.chars().all(char::is_whitespace);

        if is_whitespace && is_sentence_boundary(&current) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }

        current.push_str(grapheme);
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

fn is_sentence_boundary(text: &str) -> bool {
    let trimmed = text.trim_end();
    let Some(last_char) = trimmed.chars().last() else {
        return false;
    };

    if !matches!(last_char, '.' | '!' | '?') {
        return false;
    }

    if last_char != '.' {
        return true;
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() >= 2 && chars[chars.len() - 2].is_ascii_digit() {
        // "3." inside a number or enumeration
        return false;
    }

    let Some(last_word) = trimmed.split_whitespace().last() else {
        return false;
    };

    const ABBREVIATIONS: &[&str] = &[
        "Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "Sr.", "Jr.", "vs.", "etc.", "i.e.", "e.g.",
        "Inc.", "Ltd.", "Corp.", "Co.", "No.", "Vol.", "Ch.", "Fig.", "Eq.", "Sec.",
    ];
    if ABBREVIATIONS.contains(&last_word) {
        return false;
    }

    // Single-capital initials like "J."
    if last_word.len() == 2 {
        let first = last_word.chars().next().unwrap_or(' ');
        if first.is_uppercase() {
            return false;
        }
    }

    if last_word.contains("://") || last_word.starts_with("www.") {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn chunker() -> SemanticChunker {
        SemanticChunker::new(&ChunkingConfig {
            target_size: 600,
            min_size: 200,
            max_size: 1000,
            overlap_sentences: 2,
        })
    }

    fn long_prose(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("This is filler sentence number {i} that talks about the project at some length."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    // -----------------------------------------------------------------
    // Sentence splitting
    // -----------------------------------------------------------------

    #[test]
    fn test_split_basic_sentences() {
        let sentences = split_into_sentences("First sentence. Second one! Third?");
        assert_eq!(
            sentences,
            vec!["First sentence.", "Second one!", "Third?"]
        );
    }

    #[test]
    fn test_split_preserves_abbreviations() {
        let sentences = split_into_sentences("Dr. Smith chose Postgres. It works well.");
        assert_eq!(
            sentences,
            vec!["Dr. Smith chose Postgres.", "It works well."]
        );
    }

    #[test]
    fn test_split_preserves_decimals() {
        let sentences = split_into_sentences("Latency is 3.14 ms on avg. 2. Throughput is fine.");
        assert!(sentences[0].contains("3.14"));
        // "2." starts an enumeration item and must not end a sentence
        assert!(sentences.iter().any(|s| s.contains("2. Throughput")));
    }

    #[test]
    fn test_split_preserves_urls() {
        let sentences =
            split_into_sentences("See https://docs.rs/regex. for details. That helps.");
        assert!(sentences[0].starts_with("See https://docs.rs/regex."));
    }

    // -----------------------------------------------------------------
    // Chunking
    // -----------------------------------------------------------------

    #[test]
    fn test_empty_input_produces_no_chunks() {
        assert!(chunker().chunk(&[]).is_empty());
    }

    #[test]
    fn test_empty_messages_are_skipped() {
        let messages = vec![
            Message::user("   "),
            Message::assistant("Short answer."),
        ];
        let chunks = chunker().chunk(&messages);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("ASSISTANT: Short answer."));
    }

    #[test]
    fn test_short_message_is_single_chunk_with_role_prefix() {
        let messages = vec![Message::user("What ORM should I use with Postgres?")];
        let chunks = chunker().chunk(&messages);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("USER: "));
    }

    #[test]
    fn test_long_message_splits_within_max_size() {
        let messages = vec![Message::assistant(long_prose(60))];
        let chunks = chunker().chunk(&messages);

        assert!(chunks.len() > 1, "long message should split");
        for chunk in &chunks {
            assert!(chunk.starts_with("ASSISTANT: "));
            assert!(
                chunk.len() <= 1000 + 600,
                "chunk exceeds widening bound: {} chars",
                chunk.len()
            );
        }
    }

    #[test]
    fn test_consecutive_chunks_share_overlap_sentences() {
        let messages = vec![Message::assistant(long_prose(60))];
        let chunks = chunker().chunk(&messages);
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            let tail_sentence = split_into_sentences(&pair[0])
                .last()
                .cloned()
                .expect("chunk has sentences");
            assert!(
                pair[1].contains(&tail_sentence),
                "next chunk should repeat the previous chunk's tail"
            );
        }
    }

    #[test]
    fn test_code_block_is_never_split() {
        let code = format!("```rust\n{}\n```", "let x = 1;\n".repeat(80));
        let content = format!("{} Here is the code: {code} {}", long_prose(20), long_prose(20));
        let messages = vec![Message::assistant(content)];

        let chunks = chunker().chunk(&messages);
        let holding = chunks.iter().filter(|c| c.contains("```rust")).count();
        assert_eq!(holding, 1, "exactly one chunk should hold the code block");
        let block_chunk = chunks.iter().find(|c| c.contains("```rust")).unwrap();
        assert!(
            block_chunk.contains(&code),
            "the fenced block must appear verbatim"
        );
        assert!(
            chunks.iter().all(|c| !c.contains("___CODE_BLOCK_")),
            "placeholders must all be restored"
        );
    }

    #[test]
    fn test_overlap_never_carries_a_code_block_forward() {
        let code = format!("```python\n{}\n```", "print(\"hello\")\n".repeat(60));
        let content = format!("{} {code} {}", long_prose(25), long_prose(25));
        let messages = vec![Message::assistant(content)];

        let chunks = chunker().chunk(&messages);
        let holder = chunks
            .iter()
            .position(|c| c.contains("```python"))
            .expect("some chunk holds the block");
        for chunk in &chunks[holder + 1..] {
            assert!(
                !chunk.contains("```python"),
                "the block must not repeat in a later chunk"
            );
            assert!(
                chunk.len() <= 1000,
                "prose chunks after the block stay within max_size"
            );
        }
    }

    #[test]
    fn test_decision_zone_is_not_split() {
        // Place a negated recommendation right where a greedy splitter
        // would want to cut.
        let lead_in = long_prose(13);
        let decision = "After weighing everything, I would NOT recommend MongoDB for this because the access patterns are relational.";
        let content = format!("{lead_in} {decision} {}", long_prose(13));
        let messages = vec![Message::user(content)];

        let chunks = chunker().chunk(&messages);
        assert!(
            chunks
                .iter()
                .any(|c| c.contains("NOT recommend MongoDB for this because")),
            "decision and its reason must stay in one chunk"
        );
    }

    #[test]
    fn test_short_chunks_merge_into_neighbor() {
        let messages = vec![
            Message::user("Brief."),
            Message::assistant("Also brief."),
        ];
        let chunks = chunker().chunk(&messages);
        assert_eq!(chunks.len(), 1, "two tiny chunks should merge");
        assert!(chunks[0].contains("USER: Brief."));
        assert!(chunks[0].contains("ASSISTANT: Also brief."));
    }

    #[test]
    fn test_all_content_is_covered() {
        let prose = long_prose(50);
        let messages = vec![Message::assistant(prose.clone())];
        let chunks = chunker().chunk(&messages);

        let combined = chunks.join(" ");
        for sentence in split_into_sentences(&prose) {
            assert!(
                combined.contains(&sentence),
                "sentence lost during chunking: {sentence}"
            );
        }
    }

    #[test]
    fn test_role_prefix_uses_uppercase_labels() {
        let messages = vec![Message::new(Role::System, "You are terse.")];
        let chunks = chunker().chunk(&messages);
        assert!(chunks[0].starts_with("SYSTEM: "));
    }
}
