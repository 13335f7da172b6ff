//! Orchestrator/worker bridge.
//!
//! # Architecture
//!
//! - **protocol**: Roles, triggers, ack statuses and the worker startup env
//! - **signal**: Sending triggers and receiving them as tokio streams
//! - **mailbox**: Sequence-numbered request/ack exchanges in the shared region

pub mod mailbox;
pub mod protocol;
pub mod signal;
