//! Generated posts and their approval lifecycle.

mod approval;
mod content;
mod store;

pub use approval::{ApprovalOutcome, ApprovalStateMachine, DecisionResult};
pub use content::{ContentService, MAX_PROMPT_CHARS};
pub use store::{
    Decision, DecisionOutcome, InMemoryPostStore, Post, PostId, PostStatus, PostStore,
    PostTransition, Provenance, TransitionOutcome,
};
