//! In-process stand-ins for the worker processes.

use std::time::Duration;

use crate::bridge::mailbox::MailboxServer;
use crate::bridge::protocol::{Role, Trigger, WorkerEnv};
use crate::config::{ResourceNames, SessionId, Timings};
use crate::lever;
use crate::region::DungeonLayout;
use crate::worker::{self, RoleHandler};

pub(crate) fn fast_timings() -> Timings {
    Timings {
        ack_timeout: Duration::from_secs(2),
        lever_timeout: Duration::from_millis(200),
        loot_interval: Duration::from_millis(1),
        suspend_peer: false,
        ..Timings::default()
    }
}

/// All three role handlers, served by polling their mailboxes.
///
/// Callers must hold registered [`crate::bridge::signal::TriggerStreams`] so
/// the triggers sent to this process are absorbed.
pub(crate) struct Crew {
    names: ResourceNames,
    handlers: Vec<Box<dyn RoleHandler>>,
}

impl Crew {
    pub(crate) fn hire(layout: &DungeonLayout) -> Self {
        let names = ResourceNames::scoped(&SessionId::new());
        let handlers = Role::ALL
            .iter()
            .map(|&role| {
                let env = WorkerEnv {
                    role,
                    names: names.clone(),
                    timings: fast_timings(),
                    peer_pid: std::process::id() as i32,
                    max_pick: 360,
                };
                MailboxServer::new(layout, role).announce(std::process::id());
                worker::handler_for(&env).unwrap()
            })
            .collect();
        Self { names, handlers }
    }

    pub(crate) async fn serve(&self, layout: &DungeonLayout) {
        loop {
            for handler in &self.handlers {
                let server = MailboxServer::new(layout, handler.role());
                for trigger in [Trigger::Compute, Trigger::Gate] {
                    worker::handle(&server, handler.as_ref(), layout, trigger).await;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl Drop for Crew {
    fn drop(&mut self) {
        for handler in &mut self.handlers {
            handler.close();
        }
        let _ = lever::unlink(&self.names.lever_one);
        let _ = lever::unlink(&self.names.lever_two);
    }
}
