mod memory;
mod store;
mod temporal;

pub use memory::InMemoryGraph;
pub use store::GraphStore;
pub use temporal::FactWriter;
