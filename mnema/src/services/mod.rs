mod ingest;
mod knowledge;
mod recommend;
mod retrieve;
mod session;

pub use ingest::IngestService;
pub use knowledge::{EdgeUpdate, KnowledgeService};
pub use recommend::{QualityPolicy, RecommendationService};
pub use retrieve::RetrieveService;
pub use session::SessionService;
