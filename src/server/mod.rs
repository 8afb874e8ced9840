//! Process architecture: supervision, worker runtime, and the accept path.

pub mod listener;
pub mod registry;
pub mod supervisor;
pub mod worker;
