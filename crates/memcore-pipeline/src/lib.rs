//! memcore-pipeline: the two-stage ingestion pipeline, the retrieval
//! pipeline, the follow-up short-circuit, and post-storage reconciliation.
//! `orchestrator::Orchestrator::handle_turn` is the crate's single entry
//! point, called once per turn by the `memcore-hook` binary.

pub mod assemble;
pub mod classify;
pub mod context;
pub mod conversation_state;
pub mod curate;
pub mod error;
pub mod extract;
pub mod followup;
pub mod format;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod reconcile;
pub mod retrieve_agent;
pub mod sentence;
pub mod store_agent;
pub mod store_filter;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::PipelineContext;
pub use error::{PipelineError, Result};
pub use orchestrator::{Orchestrator, TurnResult};
