pub mod consensus;
pub mod coordinator;
pub mod errors;
pub mod model;
pub mod processes;
pub mod tasks;

pub use consensus::{Consensus, NodeMode};
