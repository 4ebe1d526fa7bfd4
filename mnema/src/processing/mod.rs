mod chunker;

pub use chunker::SemanticChunker;
