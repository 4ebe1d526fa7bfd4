//! Mnema is a conversational memory consolidation engine. It turns raw
//! conversation transcripts into durable memory: semantically coherent
//! chunks with embeddings, a temporal knowledge graph of decisions and
//! facts, and sessions that group related conversations.
//!
//! The crate is storage-agnostic. Services operate against the
//! [`store::RelationalStore`] and [`graph::GraphStore`] trait seams;
//! in-memory implementations of both ship with the crate.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod intelligence;
pub mod llm;
pub mod models;
pub mod processing;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{MnemaError, Result};
