//! dungeon: four cooperating processes over one shared memory region.
//!
//! The orchestrator creates the region and two named levers, spawns a
//! barbarian, a wizard and a rogue, and drives them through signals and
//! acknowledged mailbox exchanges.

mod teardown;
mod version;

pub mod bridge;
pub mod config;
pub mod exit;
pub mod game;
pub mod handlers;
pub mod lever;
pub mod orchestrator;
pub mod region;
pub mod report;
pub mod script;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
mod testing;

pub use bridge::protocol::{Role, WorkerEnv, WorkerEnvError};
pub use config::{ResourceNames, SessionId, Timings};
pub use exit::ExitCode;
pub use game::{GameError, GameHandle};
pub use orchestrator::{
    ExeSpawner, OrchestratorConfig, OrchestratorError, SessionOutcome, WorkerSpawner, run_session,
};
pub use report::{ChallengeReport, SessionReport, SessionStatus, WorkerExit, WorkerReport};
pub use script::{ClassicDungeon, DungeonScript};
pub use teardown::TeardownError;
pub use telemetry::init_tracing;
pub use version::{DUNGEON_VERSION, VersionInfo};
pub use worker::{WorkerError, run_worker};
