//! Protocol vocabulary shared by the orchestrator and the workers.
//!
//! Signals carry no payload, so everything a worker needs to know is either in
//! the shared region or in [`WorkerEnv`], which the orchestrator serializes
//! into the child's environment at spawn time.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{ResourceNames, Timings};

/// Environment variable carrying the JSON-encoded [`WorkerEnv`].
pub const WORKER_ENV_VAR: &str = "DUNGEON_WORKER";

/// One of the three worker processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Barbarian,
    Wizard,
    Rogue,
}

impl Role {
    pub const COUNT: usize = 3;

    /// Spawn order. Workers are terminated in the reverse order.
    pub const ALL: [Role; Role::COUNT] = [Role::Barbarian, Role::Wizard, Role::Rogue];

    /// Slot of this worker's mailbox in the shared region.
    pub fn index(self) -> usize {
        match self {
            Role::Barbarian => 0,
            Role::Wizard => 1,
            Role::Rogue => 2,
        }
    }

    /// The lever this worker holds during the handoff, if any.
    ///
    /// The rogue owns no lever: it is the one that releases both.
    pub fn lever(self) -> Option<LeverId> {
        match self {
            Role::Barbarian => Some(LeverId::One),
            Role::Wizard => Some(LeverId::Two),
            Role::Rogue => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Barbarian => "barbarian",
            Role::Wizard => "wizard",
            Role::Rogue => "rogue",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "barbarian" => Ok(Role::Barbarian),
            "wizard" => Ok(Role::Wizard),
            "rogue" => Ok(Role::Rogue),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Identity of a lever. The owner mapping is fixed by [`Role::lever`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeverId {
    One,
    Two,
}

impl LeverId {
    pub fn name(self, names: &ResourceNames) -> &str {
        match self {
            LeverId::One => &names.lever_one,
            LeverId::Two => &names.lever_two,
        }
    }

    pub fn owner(self) -> Role {
        match self {
            LeverId::One => Role::Barbarian,
            LeverId::Two => Role::Wizard,
        }
    }
}

/// What a signal asks the receiving worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Run the role's computation (attack, cipher, or negotiation).
    Compute,
    /// Hold the role's lever, or perform the handoff (rogue).
    Gate,
    /// Tear down and exit.
    Terminate,
}

/// Completion status a worker publishes next to its acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AckStatus {
    Pending = 0,
    Done = 1,
    Failed = 2,
}

impl AckStatus {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => AckStatus::Done,
            2 => AckStatus::Failed,
            _ => AckStatus::Pending,
        }
    }
}

/// Everything a worker needs at startup, passed from the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEnv {
    pub role: Role,
    pub names: ResourceNames,
    pub timings: Timings,
    /// Process the rogue suspends and resumes during negotiation.
    pub peer_pid: i32,
    /// Exclusive upper bound of the negotiated range.
    pub max_pick: u32,
}

impl WorkerEnv {
    pub fn to_env_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Read the worker environment set by the orchestrator.
    pub fn from_env() -> Result<Self, WorkerEnvError> {
        let raw = std::env::var(WORKER_ENV_VAR).map_err(|_| WorkerEnvError::Missing)?;
        serde_json::from_str(&raw).map_err(WorkerEnvError::Malformed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerEnvError {
    #[error("DUNGEON_WORKER is not set (workers are started by the orchestrator)")]
    Missing,
    #[error("DUNGEON_WORKER is malformed: {0}")]
    Malformed(#[source] serde_json::Error),
}
