//! Orchestrator-side operations a script drives.
//!
//! Each operation writes its inputs through the orchestrator's view, runs one
//! acknowledged exchange per worker involved and reads the results back. It
//! also records a [`ChallengeReport`] for the session report.

use std::sync::Mutex;

use serde_json::json;

use crate::bridge::mailbox::{ExchangeError, MailboxClient};
use crate::bridge::protocol::{Role, Trigger};
use crate::config::Timings;
use crate::handlers::negotiation::{NegotiationOutcome, NegotiationStatus, TrapLock, serve_trap};
use crate::region::views::GameView;
use crate::region::{DungeonLayout, SPELL_CAPACITY, TREASURE_SLOTS};
use crate::report::{Challenge, ChallengeReport};

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("spell payload is {len} bytes, at most {max} fit", max = SPELL_CAPACITY)]
    SpellTooLong { len: usize },

    #[error("wizard rejected the spell")]
    SpellRejected,

    #[error("handoff failed: {filled} of {expected} items arrived", expected = TREASURE_SLOTS)]
    HandoffFailed { filled: u32 },
}

pub struct GameHandle<'a> {
    layout: &'a DungeonLayout,
    timings: Timings,
    challenges: Mutex<Vec<ChallengeReport>>,
}

impl<'a> GameHandle<'a> {
    pub fn new(layout: &'a DungeonLayout, timings: Timings) -> Self {
        Self {
            layout,
            timings,
            challenges: Mutex::new(Vec::new()),
        }
    }

    fn game(&self) -> GameView<'a> {
        self.layout.game()
    }

    fn client(&self, role: Role) -> MailboxClient<'a> {
        MailboxClient::new(self.layout, role)
    }

    fn record(&self, report: ChallengeReport) {
        if let Ok(mut challenges) = self.challenges.lock() {
            challenges.push(report);
        }
    }

    /// Reports recorded so far, in call order.
    pub fn take_challenges(&self) -> Vec<ChallengeReport> {
        self.challenges
            .lock()
            .map(|mut c| std::mem::take(&mut *c))
            .unwrap_or_default()
    }

    async fn call(&self, role: Role, trigger: Trigger) -> Result<u64, ExchangeError> {
        self.client(role)
            .call(trigger, self.timings.ack_timeout, self.timings.poll_interval)
            .await
    }

    /// Set the enemy's health and have the barbarian attack.
    pub async fn attack(&self, enemy_health: i32) -> Result<i32, GameError> {
        let report = ChallengeReport::starting(Challenge::Attack);
        self.game().set_enemy_health(enemy_health);

        if let Err(e) = self.call(Role::Barbarian, Trigger::Compute).await {
            self.record(report.failed(json!({ "error": e.to_string() })));
            return Err(e.into());
        }

        let attack = self.game().attack();
        tracing::info!(enemy_health, attack, "Barbarian attacked");
        self.record(report.succeeded(json!({ "enemy_health": enemy_health, "attack": attack })));
        Ok(attack)
    }

    /// Hand the wizard an encrypted spell and return the decrypted payload.
    pub async fn dispel(&self, key: u8, payload: &[u8]) -> Result<Vec<u8>, GameError> {
        let report = ChallengeReport::starting(Challenge::Dispel);
        if payload.len() > SPELL_CAPACITY {
            self.record(report.failed(json!({ "error": "payload too long" })));
            return Err(GameError::SpellTooLong { len: payload.len() });
        }
        self.game().write_spell(key, payload);

        match self.call(Role::Wizard, Trigger::Compute).await {
            Ok(_) => {}
            Err(ExchangeError::Failed { .. }) => {
                self.record(report.failed(json!({ "error": "rejected" })));
                return Err(GameError::SpellRejected);
            }
            Err(e) => {
                self.record(report.failed(json!({ "error": e.to_string() })));
                return Err(e.into());
            }
        }

        let plaintext = self.game().spell_output()[..payload.len()].to_vec();
        let text = String::from_utf8_lossy(&plaintext).into_owned();
        tracing::info!(spell = %text, "Wizard decrypted the spell");
        self.record(report.succeeded(json!({ "key": key, "plaintext": text })));
        Ok(plaintext)
    }

    /// Have the rogue negotiate the pick angle against a lock at `target`.
    ///
    /// A negotiation that ends without agreement is not an error: the
    /// outcome's status says what happened.
    pub async fn pick_lock(&self, target: f32) -> Result<NegotiationOutcome, GameError> {
        let report = ChallengeReport::starting(Challenge::PickLock);
        let poll = self.timings.poll_interval;
        let timeout = self.timings.negotiation_timeout + self.timings.ack_timeout;

        let rogue = self.client(Role::Rogue);
        let exchange = rogue.call(Trigger::Compute, timeout, poll);
        let result = tokio::select! {
            result = exchange => result,
            never = serve_trap(self.game(), TrapLock::new(target), poll) => match never {},
        };

        let game = self.game();
        let rounds = game.negotiation_rounds();
        let outcome = NegotiationOutcome {
            status: game.negotiation_status(),
            pick: (rounds > 0).then(|| game.pick()),
            rounds,
        };
        let detail = json!({
            "target": target,
            "status": outcome.status,
            "pick": outcome.pick,
            "rounds": outcome.rounds,
        });

        match result {
            Ok(_) if outcome.status == NegotiationStatus::Accepted => {
                tracing::info!(pick = ?outcome.pick, rounds, "Lock picked");
                self.record(report.succeeded(detail));
                Ok(outcome)
            }
            Ok(_) | Err(ExchangeError::Failed { .. }) => {
                tracing::warn!(status = ?outcome.status, rounds, "Lock held");
                self.record(report.failed(detail));
                Ok(outcome)
            }
            Err(e) => {
                self.record(report.failed(detail));
                Err(e.into())
            }
        }
    }

    /// Run the lever-gated handoff and return the spoils.
    pub async fn loot(&self, treasure: &[u8; TREASURE_SLOTS]) -> Result<[u8; TREASURE_SLOTS], GameError> {
        let report = ChallengeReport::starting(Challenge::Loot);
        self.game().write_treasure(treasure);

        let handoff_timeout = self.timings.handoff_timeout(TREASURE_SLOTS);
        let steps = async {
            self.call(Role::Barbarian, Trigger::Gate).await?;
            self.call(Role::Wizard, Trigger::Gate).await?;
            self.client(Role::Rogue)
                .call(Trigger::Gate, handoff_timeout, self.timings.poll_interval)
                .await
        };

        let filled = match steps.await {
            Ok(_) => self.game().spoils_filled(),
            Err(ExchangeError::Failed { role, .. }) => {
                let filled = self.game().spoils_filled();
                tracing::warn!(%role, filled, "Handoff step failed");
                self.record(report.failed(json!({ "failed": role, "filled": filled })));
                return Err(GameError::HandoffFailed { filled });
            }
            Err(e) => {
                self.record(report.failed(json!({ "error": e.to_string() })));
                return Err(e.into());
            }
        };

        let spoils = self.game().spoils();
        tracing::info!(filled, "Treasure handed off");
        self.record(report.succeeded(json!({
            "spoils": String::from_utf8_lossy(&spoils),
            "filled": filled,
        })));
        Ok(spoils)
    }

    /// Clear the shared running flag.
    pub fn finish(&self) {
        self.game().set_running(false);
    }

    pub fn running(&self) -> bool {
        self.game().running()
    }
}
