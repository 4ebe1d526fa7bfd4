mod conversation;
mod ingest;
mod knowledge;
mod message;
mod recommend;
mod retrieve;
mod session;

pub use conversation::*;
pub use ingest::*;
pub use knowledge::*;
pub use message::*;
pub use recommend::*;
pub use retrieve::*;
pub use session::*;
