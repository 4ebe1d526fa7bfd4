mod contradiction;
mod normalizer;
mod verification;

pub use contradiction::ContradictionDetector;
pub use normalizer::{
    normalize, NormalizedEntity, NormalizedFact, NormalizedKnowledge, NormalizedRelationship,
    RawKnowledge,
};
pub use verification::{confirm, mark_exploring, mark_rejected, reject_incorrect};
