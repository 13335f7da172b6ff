//! Worker process: one of barbarian, wizard or rogue.
//!
//! The orchestrator re-executes the current binary with the role on the
//! command line and a [`WorkerEnv`] in the environment. The worker:
//! 1. Registers its trigger streams (before anyone may signal it)
//! 2. Opens and maps the region, opens its levers
//! 3. Announces its pid in its mailbox
//! 4. Serves compute/gate triggers one at a time until terminated
//! 5. Unmaps and closes its handles (the orchestrator owns the names)

use async_trait::async_trait;

use crate::bridge::mailbox::MailboxServer;
use crate::bridge::protocol::{AckStatus, LeverId, Role, Trigger, WorkerEnv};
use crate::bridge::signal::{SignalError, TriggerStreams};
use crate::config::Timings;
use crate::exit::ExitCode;
use crate::handlers::{compute, gate, negotiation};
use crate::handlers::negotiation::{CooperativePeer, NegotiationStatus, PeerControl, SignalPeer};
use crate::lever::{Lever, LeverError};
use crate::region::{DungeonLayout, MappedRegion, RegionError, SharedRegion, TREASURE_SLOTS};
use crate::teardown::best_effort;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error(transparent)]
    Lever(#[from] LeverError),
}

impl WorkerError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            WorkerError::Signal(e) => e.exit_code(),
            WorkerError::Region(e) => e.exit_code(),
            WorkerError::Lever(e) => e.exit_code(),
        }
    }
}

/// What one role does with each trigger.
#[async_trait]
pub trait RoleHandler: Send + Sync {
    fn role(&self) -> Role;

    async fn compute(&self, layout: &DungeonLayout) -> AckStatus;

    async fn gate(&self, layout: &DungeonLayout) -> AckStatus;

    /// Close every lever handle.
    fn close(&mut self);
}

fn close_lever(lever: &mut Lever) {
    let step = format!("close {}", lever.name());
    best_effort(&step, lever.close());
}

pub struct Barbarian {
    lever: Lever,
    timings: Timings,
}

#[async_trait]
impl RoleHandler for Barbarian {
    fn role(&self) -> Role {
        Role::Barbarian
    }

    async fn compute(&self, layout: &DungeonLayout) -> AckStatus {
        let value = compute::attack(layout.attacker());
        tracing::info!(attack = value, "Attacked");
        AckStatus::Done
    }

    async fn gate(&self, _layout: &DungeonLayout) -> AckStatus {
        match gate::hold(&self.lever, &self.timings).await {
            Ok(()) => AckStatus::Done,
            Err(e) => {
                tracing::warn!(error = %e, "Could not hold lever");
                AckStatus::Failed
            }
        }
    }

    fn close(&mut self) {
        close_lever(&mut self.lever);
    }
}

pub struct Wizard {
    lever: Lever,
    timings: Timings,
}

#[async_trait]
impl RoleHandler for Wizard {
    fn role(&self) -> Role {
        Role::Wizard
    }

    async fn compute(&self, layout: &DungeonLayout) -> AckStatus {
        match compute::dispel(layout.caster()) {
            Ok(()) => {
                tracing::info!("Spell decrypted");
                AckStatus::Done
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejected spell");
                AckStatus::Failed
            }
        }
    }

    async fn gate(&self, _layout: &DungeonLayout) -> AckStatus {
        match gate::hold(&self.lever, &self.timings).await {
            Ok(()) => AckStatus::Done,
            Err(e) => {
                tracing::warn!(error = %e, "Could not hold lever");
                AckStatus::Failed
            }
        }
    }

    fn close(&mut self) {
        close_lever(&mut self.lever);
    }
}

pub struct Rogue {
    lever_one: Lever,
    lever_two: Lever,
    peer: Box<dyn PeerControl>,
    max_pick: u32,
    timings: Timings,
}

#[async_trait]
impl RoleHandler for Rogue {
    fn role(&self) -> Role {
        Role::Rogue
    }

    async fn compute(&self, layout: &DungeonLayout) -> AckStatus {
        let search = negotiation::negotiate(
            layout.picker(),
            self.peer.as_ref(),
            self.max_pick,
            &self.timings,
        );
        match tokio::time::timeout(self.timings.negotiation_timeout, search).await {
            Ok(Ok(outcome)) if outcome.status == NegotiationStatus::Accepted => AckStatus::Done,
            Ok(Ok(outcome)) => {
                tracing::warn!(status = ?outcome.status, rounds = outcome.rounds, "Negotiation failed");
                AckStatus::Failed
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Negotiation aborted");
                AckStatus::Failed
            }
            Err(_) => {
                let picker = layout.picker();
                picker.deactivate();
                picker.set_status(NegotiationStatus::TimedOut);
                tracing::warn!(timeout = ?self.timings.negotiation_timeout, "Negotiation timed out");
                AckStatus::Failed
            }
        }
    }

    async fn gate(&self, layout: &DungeonLayout) -> AckStatus {
        let loot = gate::handoff(
            layout.picker(),
            &self.lever_one,
            &self.lever_two,
            self.timings.loot_interval,
        );
        let timeout = self.timings.handoff_timeout(TREASURE_SLOTS);
        match tokio::time::timeout(timeout, loot).await {
            Ok(Ok(_)) => AckStatus::Done,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Handoff failed");
                AckStatus::Failed
            }
            Err(_) => {
                tracing::warn!(?timeout, "Handoff timed out");
                AckStatus::Failed
            }
        }
    }

    fn close(&mut self) {
        close_lever(&mut self.lever_one);
        close_lever(&mut self.lever_two);
    }
}

/// Build the handler for `env.role`, opening the levers it needs.
pub fn handler_for(env: &WorkerEnv) -> Result<Box<dyn RoleHandler>, LeverError> {
    let timings = env.timings.clone();
    let handler: Box<dyn RoleHandler> = match env.role {
        Role::Barbarian => Box::new(Barbarian {
            lever: Lever::open(LeverId::One, &env.names)?,
            timings,
        }),
        Role::Wizard => Box::new(Wizard {
            lever: Lever::open(LeverId::Two, &env.names)?,
            timings,
        }),
        Role::Rogue => {
            let peer: Box<dyn PeerControl> = if timings.suspend_peer {
                Box::new(SignalPeer::new(env.peer_pid))
            } else {
                Box::new(CooperativePeer)
            };
            Box::new(Rogue {
                lever_one: Lever::open(LeverId::One, &env.names)?,
                lever_two: Lever::open(LeverId::Two, &env.names)?,
                peer,
                max_pick: env.max_pick,
                timings,
            })
        }
    };
    Ok(handler)
}

/// Worker entry point. Returns once terminated.
pub async fn run_worker(env: WorkerEnv) -> Result<(), WorkerError> {
    let mut streams = TriggerStreams::register()?;
    let mut region = SharedRegion::open(&env.names.region)?;
    let mut mapped = region.map()?;
    let mut handler = handler_for(&env)?;

    let result = serve(&mapped, handler.as_ref(), &mut streams).await;

    handler.close();
    best_effort("unmap region", mapped.unmap());
    best_effort("close region", region.close());
    tracing::info!(role = %env.role, "Worker exiting");
    result
}

async fn serve(
    mapped: &MappedRegion,
    handler: &dyn RoleHandler,
    streams: &mut TriggerStreams,
) -> Result<(), WorkerError> {
    let layout = mapped.layout()?;
    let role = handler.role();
    let server = MailboxServer::new(layout, role);
    server.announce(std::process::id());
    tracing::info!(%role, pid = std::process::id(), "Worker ready");

    loop {
        match streams.next().await {
            Some(Trigger::Terminate) => {
                tracing::info!(%role, "Terminate received");
                return Ok(());
            }
            Some(trigger) => handle(&server, handler, layout, trigger).await,
            None => {
                tracing::warn!(%role, "Signal streams closed");
                return Ok(());
            }
        }
    }
}

/// Run one trigger to completion and acknowledge it.
pub(crate) async fn handle(
    server: &MailboxServer<'_>,
    handler: &dyn RoleHandler,
    layout: &DungeonLayout,
    trigger: Trigger,
) {
    let Some(seq) = server.pending(trigger) else {
        tracing::debug!(?trigger, "Signal without a pending request, ignoring");
        return;
    };
    let status = match trigger {
        Trigger::Compute => handler.compute(layout).await,
        Trigger::Gate => handler.gate(layout).await,
        Trigger::Terminate => return,
    };
    server.complete(trigger, seq, status);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bridge::mailbox::MailboxClient;
    use crate::config::{ResourceNames, SessionId};
    use crate::lever;

    fn env(role: Role, names: &ResourceNames) -> WorkerEnv {
        WorkerEnv {
            role,
            names: names.clone(),
            timings: Timings {
                lever_timeout: Duration::from_millis(100),
                loot_interval: Duration::from_millis(1),
                suspend_peer: false,
                ..Timings::default()
            },
            peer_pid: std::process::id() as i32,
            max_pick: 360,
        }
    }

    struct Names(ResourceNames);

    impl Drop for Names {
        fn drop(&mut self) {
            let _ = lever::unlink(&self.0.lever_one);
            let _ = lever::unlink(&self.0.lever_two);
        }
    }

    #[tokio::test]
    async fn handler_roles_match() {
        let names = Names(ResourceNames::scoped(&SessionId::new()));
        for role in Role::ALL {
            let mut handler = handler_for(&env(role, &names.0)).unwrap();
            assert_eq!(handler.role(), role);
            handler.close();
        }
    }

    #[tokio::test]
    async fn handle_acknowledges_pending_request() {
        let names = Names(ResourceNames::scoped(&SessionId::new()));
        let layout = DungeonLayout::zeroed();
        layout.game().set_enemy_health(33);

        let mut handler = handler_for(&env(Role::Barbarian, &names.0)).unwrap();
        let server = MailboxServer::new(&layout, Role::Barbarian);
        let client = MailboxClient::new(&layout, Role::Barbarian);

        let seq = client.begin(Trigger::Compute).unwrap();
        handle(&server, handler.as_ref(), &layout, Trigger::Compute).await;
        client
            .wait_ack(Trigger::Compute, seq, Duration::from_millis(50), Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(layout.game().attack(), 33);
        handler.close();
    }

    #[tokio::test]
    async fn spurious_signal_is_ignored() {
        let names = Names(ResourceNames::scoped(&SessionId::new()));
        let layout = DungeonLayout::zeroed();
        layout.game().set_enemy_health(9);

        let mut handler = handler_for(&env(Role::Barbarian, &names.0)).unwrap();
        let server = MailboxServer::new(&layout, Role::Barbarian);
        handle(&server, handler.as_ref(), &layout, Trigger::Compute).await;
        assert_eq!(layout.game().attack(), 0);
        handler.close();
    }

    #[tokio::test]
    async fn rogue_handoff_fails_without_held_levers() {
        let names = Names(ResourceNames::scoped(&SessionId::new()));
        let layout = DungeonLayout::zeroed();
        let mut rogue = handler_for(&env(Role::Rogue, &names.0)).unwrap();
        assert_eq!(rogue.gate(&layout).await, AckStatus::Failed);
        rogue.close();
    }

    #[tokio::test]
    async fn negotiation_timeout_keeps_rounds_used() {
        let names = Names(ResourceNames::scoped(&SessionId::new()));
        let layout = DungeonLayout::zeroed();
        let mut env = env(Role::Rogue, &names.0);
        env.timings.round_timeout = Duration::from_secs(5);
        env.timings.negotiation_timeout = Duration::from_millis(30);
        let mut rogue = handler_for(&env).unwrap();

        // Nobody judges the first candidate, so the outer bound fires mid-round.
        assert_eq!(rogue.compute(&layout).await, AckStatus::Failed);
        let game = layout.game();
        assert_eq!(game.negotiation_status(), NegotiationStatus::TimedOut);
        assert_eq!(game.negotiation_rounds(), 1);
        rogue.close();
    }

    #[tokio::test]
    async fn gate_sequence_in_process() {
        let names = Names(ResourceNames::scoped(&SessionId::new()));
        let layout = DungeonLayout::zeroed();
        layout.game().write_treasure(b"RUBY");

        let mut barbarian = handler_for(&env(Role::Barbarian, &names.0)).unwrap();
        let mut wizard = handler_for(&env(Role::Wizard, &names.0)).unwrap();
        let mut rogue = handler_for(&env(Role::Rogue, &names.0)).unwrap();

        assert_eq!(barbarian.gate(&layout).await, AckStatus::Done);
        assert_eq!(wizard.gate(&layout).await, AckStatus::Done);
        assert_eq!(rogue.gate(&layout).await, AckStatus::Done);
        assert_eq!(&layout.game().spoils(), b"RUBY");

        // Levers are free again, so a second round works too.
        assert_eq!(barbarian.gate(&layout).await, AckStatus::Done);

        barbarian.close();
        wizard.close();
        rogue.close();
    }
}
