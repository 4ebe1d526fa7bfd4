mod client;

pub use client::{EmbeddingClient, OpenAiEmbeddings};
