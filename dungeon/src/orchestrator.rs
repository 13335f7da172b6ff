//! Orchestrator - owns the named resources and drives the workers.
//!
//! A session:
//! 1. Unlinks stale names, creates and maps the region, opens both levers
//! 2. Spawns barbarian, wizard, rogue, waiting for each to announce itself
//! 3. Runs the [`DungeonScript`] through a [`GameHandle`]
//! 4. Terminates rogue, wizard, barbarian (SIGTERM, then SIGKILL after a grace)
//! 5. Unmaps, closes and unlinks everything it created
//!
//! Steps 4 and 5 run on every path out of steps 2 and 3.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::bridge::mailbox::MailboxClient;
use crate::bridge::protocol::{LeverId, Role, Trigger, WORKER_ENV_VAR, WorkerEnv};
use crate::bridge::signal;
use crate::config::{ResourceNames, SessionId, Timings, env_flag};
use crate::exit::ExitCode;
use crate::game::{GameError, GameHandle};
use crate::lever::{self, Lever, LeverError};
use crate::region::{self, DungeonLayout, MAX_PICK_ANGLE, MappedRegion, RegionError, SharedRegion};
use crate::report::{SessionReport, WorkerExit, WorkerReport};
use crate::script::DungeonScript;
use crate::teardown::{TeardownError, best_effort};

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn {role}: {source}")]
    Spawn {
        role: Role,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode environment for {role}: {source}")]
    Env {
        role: Role,
        #[source]
        source: serde_json::Error,
    },
}

impl SpawnError {
    pub fn role(&self) -> Role {
        match self {
            SpawnError::Spawn { role, .. } | SpawnError::Env { role, .. } => *role,
        }
    }

    /// Missing or non-executable binaries map to the exec codes, everything
    /// else to the fork codes.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            SpawnError::Spawn { role, source }
                if matches!(
                    source.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) =>
            {
                ExitCode::exec(*role)
            }
            _ => ExitCode::spawn(self.role()),
        }
    }
}

/// Extension point for different worker spawn strategies.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, env: &WorkerEnv) -> Result<Child, SpawnError>;
}

/// Re-executes a dungeon binary as `<exe> worker <role>`.
pub struct ExeSpawner {
    exe: Option<PathBuf>,
}

impl ExeSpawner {
    /// Spawn the currently running executable.
    pub fn current() -> Self {
        Self { exe: None }
    }

    pub fn with_exe(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: Some(exe.into()),
        }
    }
}

impl WorkerSpawner for ExeSpawner {
    fn spawn(&self, env: &WorkerEnv) -> Result<Child, SpawnError> {
        let role = env.role;
        let exe = match &self.exe {
            Some(exe) => exe.clone(),
            None => std::env::current_exe().map_err(|source| SpawnError::Spawn { role, source })?,
        };
        let encoded = env
            .to_env_value()
            .map_err(|source| SpawnError::Env { role, source })?;

        Command::new(exe)
            .args(["worker", role.as_str()])
            .env(WORKER_ENV_VAR, encoded)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Spawn { role, source })
    }
}

pub struct OrchestratorConfig {
    pub session: SessionId,
    pub names: ResourceNames,
    pub timings: Timings,
    pub max_pick: u32,
    pub spawner: Arc<dyn WorkerSpawner>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self {
            session: SessionId::new(),
            names: ResourceNames::default(),
            timings: Timings::default(),
            max_pick: MAX_PICK_ANGLE,
            spawner: Arc::new(ExeSpawner::current()),
        }
    }

    /// Defaults plus `DUNGEON_ISOLATE`, `DUNGEON_LOOT_INTERVAL_MS` and
    /// `DUNGEON_SUSPEND_PEER`.
    pub fn from_env() -> Self {
        let config = Self::new().with_timings(Timings::default().apply_env());
        if env_flag("DUNGEON_ISOLATE").unwrap_or(false) {
            config.isolated()
        } else {
            config
        }
    }

    /// Use names private to this session.
    pub fn isolated(mut self) -> Self {
        self.names = ResourceNames::scoped(&self.session);
        self
    }

    pub fn with_names(mut self, names: ResourceNames) -> Self {
        self.names = names;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_max_pick(mut self, max_pick: u32) -> Self {
        self.max_pick = max_pick;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Lever(#[from] LeverError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("{role} exited before announcing itself ({status})")]
    WorkerExited { role: Role, status: String },

    #[error("{role} did not announce itself within {timeout:?}")]
    ReadyTimeout { role: Role, timeout: Duration },

    #[error("script failed: {0:#}")]
    Script(anyhow::Error),
}

impl OrchestratorError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            OrchestratorError::Region(e) => e.exit_code(),
            OrchestratorError::Lever(e) => e.exit_code(),
            OrchestratorError::Spawn(e) => e.exit_code(),
            OrchestratorError::WorkerExited { .. } | OrchestratorError::ReadyTimeout { .. } => {
                ExitCode::Handshake
            }
            OrchestratorError::Script(e) => match e.downcast_ref::<GameError>() {
                Some(GameError::Exchange(_)) => ExitCode::Handshake,
                _ => ExitCode::Script,
            },
        }
    }
}

/// The report plus the error that ended the session early, if any.
pub struct SessionOutcome {
    pub report: SessionReport,
    pub error: Option<OrchestratorError>,
}

impl SessionOutcome {
    pub fn exit_code(&self) -> ExitCode {
        self.error
            .as_ref()
            .map_or(ExitCode::Success, OrchestratorError::exit_code)
    }
}

/// Named resources created by the orchestrator. Released on drop if
/// [`Resources::release`] was not called.
struct Resources {
    names: ResourceNames,
    region: SharedRegion,
    mapped: MappedRegion,
    levers: [Lever; 2],
    released: bool,
}

fn clear_stale(step: &str, result: Result<(), TeardownError>) {
    match result {
        Ok(()) => tracing::warn!(step, "Removed a stale resource from an earlier run"),
        Err(e) if e.is_already_released() => {}
        Err(e) => tracing::warn!(step, error = %e, "Could not remove stale resource"),
    }
}

impl Resources {
    fn create(names: &ResourceNames) -> Result<Self, OrchestratorError> {
        clear_stale("unlink stale region", region::unlink(&names.region));
        clear_stale("unlink stale lever one", lever::unlink(&names.lever_one));
        clear_stale("unlink stale lever two", lever::unlink(&names.lever_two));

        let shm = SharedRegion::create(&names.region, DungeonLayout::SIZE)?;
        let partial = |e: OrchestratorError| {
            best_effort("unlink region", region::unlink(&names.region));
            best_effort("unlink lever one", lever::unlink(&names.lever_one));
            e
        };
        let mapped = shm.map().map_err(|e| partial(e.into()))?;
        let lever_one = Lever::open(LeverId::One, names).map_err(|e| partial(e.into()))?;
        let lever_two = Lever::open(LeverId::Two, names).map_err(|e| partial(e.into()))?;

        tracing::info!(region = %names.region, lever_one = %names.lever_one, lever_two = %names.lever_two, "Created dungeon resources");
        Ok(Self {
            names: names.clone(),
            region: shm,
            mapped,
            levers: [lever_one, lever_two],
            released: false,
        })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        best_effort("unmap region", self.mapped.unmap());
        best_effort("close region", self.region.close());
        for lever in &mut self.levers {
            let step = format!("close {}", lever.name());
            best_effort(&step, lever.close());
        }
        best_effort("unlink region", region::unlink(&self.names.region));
        best_effort("unlink lever one", lever::unlink(&self.names.lever_one));
        best_effort("unlink lever two", lever::unlink(&self.names.lever_two));
        tracing::info!("Released dungeon resources");
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.release();
    }
}

struct SpawnedWorker {
    role: Role,
    child: Child,
}

/// Run one complete session.
pub async fn run_session(config: &OrchestratorConfig, script: &dyn DungeonScript) -> SessionOutcome {
    let mut report = SessionReport::starting(config.session);
    tracing::info!(session = %config.session, "Starting session");

    let mut resources = match Resources::create(&config.names) {
        Ok(resources) => resources,
        Err(e) => {
            let report = report.finish(false, Some(e.to_string()));
            return SessionOutcome {
                report,
                error: Some(e),
            };
        }
    };

    let mut workers = Vec::with_capacity(Role::COUNT);
    let (result, running) = match resources.mapped.layout() {
        Ok(layout) => {
            layout.game().set_running(true);
            let result = drive(config, script, layout, &mut workers, &mut report).await;
            report.workers = shutdown(&mut workers, &config.timings).await;
            (result, layout.game().running())
        }
        Err(e) => (Err(e.into()), false),
    };
    resources.release();

    let error = result.err();
    if let Some(e) = &error {
        tracing::error!(error = %e, "Session failed");
    }
    let report = report.finish(running, error.as_ref().map(ToString::to_string));
    tracing::info!(status = ?report.status, "Session finished");
    SessionOutcome { report, error }
}

async fn drive(
    config: &OrchestratorConfig,
    script: &dyn DungeonScript,
    layout: &DungeonLayout,
    workers: &mut Vec<SpawnedWorker>,
    report: &mut SessionReport,
) -> Result<(), OrchestratorError> {
    let peer_pid = std::process::id() as i32;
    for role in Role::ALL {
        let env = WorkerEnv {
            role,
            names: config.names.clone(),
            timings: config.timings.clone(),
            peer_pid,
            max_pick: config.max_pick,
        };
        tracing::info!(%role, "Spawning worker");
        let child = config.spawner.spawn(&env)?;
        workers.push(SpawnedWorker { role, child });
        if let Some(worker) = workers.last_mut() {
            let pid = wait_ready(layout, worker, &config.timings).await?;
            tracing::info!(%role, pid, "Worker ready");
        }
    }

    let game = GameHandle::new(layout, config.timings.clone());
    let result = script.run(&game).await;
    report.challenges = game.take_challenges();
    result.map_err(OrchestratorError::Script)
}

/// Wait for the worker's pid to appear in its mailbox.
async fn wait_ready(
    layout: &DungeonLayout,
    worker: &mut SpawnedWorker,
    timings: &Timings,
) -> Result<i32, OrchestratorError> {
    let role = worker.role;
    let client = MailboxClient::new(layout, role);
    let ready = tokio::time::timeout(timings.ready_timeout, async {
        loop {
            if let Some(pid) = client.pid() {
                return Ok(pid);
            }
            match worker.child.try_wait() {
                Ok(Some(status)) => {
                    return Err(OrchestratorError::WorkerExited {
                        role,
                        status: status.to_string(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(OrchestratorError::WorkerExited {
                        role,
                        status: format!("unknown: {e}"),
                    });
                }
            }
            tokio::time::sleep(timings.poll_interval).await;
        }
    })
    .await;

    match ready {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::ReadyTimeout {
            role,
            timeout: timings.ready_timeout,
        }),
    }
}

/// Terminate in reverse spawn order: rogue, wizard, barbarian.
async fn shutdown(workers: &mut [SpawnedWorker], timings: &Timings) -> Vec<WorkerReport> {
    let mut reports = Vec::with_capacity(workers.len());
    for worker in workers.iter_mut().rev() {
        let exit = terminate(worker, timings.terminate_grace).await;
        reports.push(WorkerReport {
            role: worker.role,
            exit,
        });
    }
    reports
}

async fn terminate(worker: &mut SpawnedWorker, grace: Duration) -> WorkerExit {
    let role = worker.role;
    match worker.child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!(%role, %status, "Worker already exited");
            return WorkerExit::from_status(status);
        }
        Ok(None) => {}
        Err(e) => return WorkerExit::Lost { reason: e.to_string() },
    }
    let Some(pid) = worker.child.id() else {
        return WorkerExit::Lost {
            reason: "no pid".to_string(),
        };
    };

    if let Err(e) = signal::send(pid as i32, Trigger::Terminate) {
        tracing::warn!(%role, error = %e, "Failed to send terminate");
    }

    match tokio::time::timeout(grace, worker.child.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!(%role, %status, "Worker exited");
            WorkerExit::from_status(status)
        }
        Ok(Err(e)) => {
            tracing::warn!(%role, error = %e, "Failed to wait for worker");
            WorkerExit::Lost { reason: e.to_string() }
        }
        Err(_) => {
            tracing::warn!(%role, ?grace, "Worker ignored terminate, killing");
            match worker.child.kill().await {
                Ok(()) => WorkerExit::Killed,
                Err(e) => {
                    tracing::error!(%role, error = %e, "Failed to kill worker");
                    WorkerExit::Lost { reason: e.to_string() }
                }
            }
        }
    }
}
