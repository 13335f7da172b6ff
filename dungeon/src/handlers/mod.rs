//! Work the workers do when signalled.
//!
//! - **compute**: attack and cipher (barbarian, wizard)
//! - **gate**: lever hold and treasure handoff
//! - **negotiation**: the rogue's pick-angle search and the orchestrator's judge

pub mod compute;
pub mod gate;
pub mod negotiation;
