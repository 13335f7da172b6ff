//! Session configuration shared by the orchestrator and its workers.
//!
//! The orchestrator builds these values once and hands the worker-relevant
//! subset to each child through the `DUNGEON_WORKER` environment variable
//! (see [`crate::bridge::protocol::WorkerEnv`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default name of the shared region.
pub const DEFAULT_REGION_NAME: &str = "/dungeon";
/// Default name of the barbarian's lever.
pub const DEFAULT_LEVER_ONE_NAME: &str = "/dungeon-lever-one";
/// Default name of the wizard's lever.
pub const DEFAULT_LEVER_TWO_NAME: &str = "/dungeon-lever-two";

/// Unique identifier for one orchestrated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Short form used inside POSIX names (which are length-limited).
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..12].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// System-wide names of the region and both levers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNames {
    pub region: String,
    pub lever_one: String,
    pub lever_two: String,
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION_NAME.to_string(),
            lever_one: DEFAULT_LEVER_ONE_NAME.to_string(),
            lever_two: DEFAULT_LEVER_TWO_NAME.to_string(),
        }
    }
}

impl ResourceNames {
    /// Names private to one session, so concurrent sessions never collide.
    pub fn scoped(session: &SessionId) -> Self {
        let tag = session.short();
        Self {
            region: format!("/dungeon-{tag}"),
            lever_one: format!("/dungeon-{tag}-lever-one"),
            lever_two: format!("/dungeon-{tag}-lever-two"),
        }
    }
}

/// Every bound the protocol waits on.
///
/// None of these are sleeps that stand in for synchronization: each one is the
/// upper limit of a wait for an explicit acknowledgment, except
/// `loot_interval`, which paces the treasure handoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    /// How long a freshly spawned worker has to announce itself.
    pub ready_timeout: Duration,
    /// How long a compute or gate exchange may take before it is abandoned.
    pub ack_timeout: Duration,
    /// How long the rogue waits for the peer's verdict on one candidate.
    pub round_timeout: Duration,
    /// Upper bound on a whole negotiation, as seen by the orchestrator.
    pub negotiation_timeout: Duration,
    /// How long a gate worker waits to acquire its lever.
    pub lever_timeout: Duration,
    /// Time between SIGTERM and SIGKILL for an unresponsive worker.
    pub terminate_grace: Duration,
    /// Granularity of every sequence-counter poll.
    pub poll_interval: Duration,
    /// Delay between consecutive treasure items during the handoff.
    pub loot_interval: Duration,
    /// Whether the rogue halts the orchestrator between negotiation rounds.
    pub suspend_peer: bool,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
            round_timeout: Duration::from_secs(1),
            negotiation_timeout: Duration::from_secs(30),
            lever_timeout: Duration::from_secs(5),
            terminate_grace: Duration::from_secs(2),
            poll_interval: Duration::from_millis(1),
            loot_interval: Duration::from_millis(750),
            suspend_peer: true,
        }
    }
}

impl Timings {
    /// Bound on a full treasure handoff exchange.
    pub fn handoff_timeout(&self, items: usize) -> Duration {
        self.ack_timeout + self.loot_interval * items as u32
    }

    /// Apply `DUNGEON_LOOT_INTERVAL_MS` and `DUNGEON_SUSPEND_PEER` overrides.
    pub fn apply_env(mut self) -> Self {
        if let Some(ms) = env_u64("DUNGEON_LOOT_INTERVAL_MS") {
            self.loot_interval = Duration::from_millis(ms);
        }
        if let Some(flag) = env_flag("DUNGEON_SUSPEND_PEER") {
            self.suspend_peer = flag;
        }
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "Ignoring malformed environment override");
            None
        }
    }
}

pub(crate) fn env_flag(key: &str) -> Option<bool> {
    match std::env::var(key).ok()?.trim() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        other => {
            tracing::warn!(key, value = other, "Ignoring malformed boolean override");
            None
        }
    }
}
