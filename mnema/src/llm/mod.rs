mod client;
pub mod prompts;

pub use client::{ConversationDigest, ExtractionClient, OpenAiExtraction, TopicAnalysis};
