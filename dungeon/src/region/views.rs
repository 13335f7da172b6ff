//! Role-scoped access to the shared region.
//!
//! Each view exposes reads of anything its role needs and writes only of the
//! fields its role owns. Mailbox access lives in [`crate::bridge::mailbox`].

use std::sync::atomic::Ordering;

use super::layout::{DungeonLayout, SPELL_CAPACITY, TREASURE_SLOTS};
use crate::handlers::negotiation::{Direction, NegotiationStatus};

/// The key byte followed by the encrypted payload.
pub type SpellInput = [u8; SPELL_CAPACITY + 1];

/// A candidate published by the rogue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposal {
    pub seq: u64,
    pub pick: f32,
    pub active: bool,
}

/// The peer's answer to the latest evaluated candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub seq: u64,
    pub locked: bool,
    pub direction: Direction,
}

impl DungeonLayout {
    pub fn game(&self) -> GameView<'_> {
        GameView { layout: self }
    }

    pub fn attacker(&self) -> AttackerView<'_> {
        AttackerView { layout: self }
    }

    pub fn caster(&self) -> CasterView<'_> {
        CasterView { layout: self }
    }

    pub fn picker(&self) -> PickerView<'_> {
        PickerView { layout: self }
    }
}

/// Orchestrator's view.
#[derive(Clone, Copy)]
pub struct GameView<'a> {
    layout: &'a DungeonLayout,
}

impl<'a> GameView<'a> {
    pub fn set_running(&self, running: bool) {
        self.layout.running.store(running, Ordering::SeqCst);
    }

    pub fn running(&self) -> bool {
        self.layout.running.load(Ordering::SeqCst)
    }

    pub fn set_enemy_health(&self, health: i32) {
        self.layout.enemy_health.store(health, Ordering::Release);
    }

    pub fn enemy_health(&self) -> i32 {
        self.layout.enemy_health.load(Ordering::Acquire)
    }

    pub fn attack(&self) -> i32 {
        self.layout.attack.load(Ordering::Acquire)
    }

    /// Write the key byte and payload. Bytes past `payload` are zeroed and a
    /// payload longer than [`SPELL_CAPACITY`] is cut short. Returns the number
    /// of payload bytes written.
    pub fn write_spell(&self, key: u8, payload: &[u8]) -> usize {
        let input = &self.layout.spell_input;
        input[0].store(key, Ordering::Relaxed);
        let written = payload.len().min(SPELL_CAPACITY);
        for (i, slot) in input[1..].iter().enumerate() {
            let byte = payload.get(i).copied().unwrap_or(0);
            slot.store(byte, Ordering::Relaxed);
        }
        std::sync::atomic::fence(Ordering::Release);
        written
    }

    pub fn spell_output(&self) -> [u8; SPELL_CAPACITY] {
        std::sync::atomic::fence(Ordering::Acquire);
        std::array::from_fn(|i| self.layout.spell_output[i].load(Ordering::Relaxed))
    }

    pub fn write_treasure(&self, items: &[u8; TREASURE_SLOTS]) {
        for (slot, item) in self.layout.treasure.iter().zip(items) {
            slot.store(*item, Ordering::Release);
        }
    }

    pub fn spoils(&self) -> [u8; TREASURE_SLOTS] {
        std::array::from_fn(|i| self.layout.spoils[i].load(Ordering::Acquire))
    }

    pub fn spoils_filled(&self) -> u32 {
        self.layout.spoils_filled.load(Ordering::Acquire)
    }

    /// Latest candidate, read sequence number first.
    pub fn proposal(&self) -> Proposal {
        let trap = &self.layout.trap;
        let seq = trap.proposal.load(Ordering::Acquire);
        Proposal {
            seq,
            pick: f32::from_bits(trap.pick.load(Ordering::Relaxed)),
            active: trap.active.load(Ordering::Relaxed),
        }
    }

    /// Answer proposal `seq`. The sequence number is published last so the
    /// rogue never pairs it with a stale answer.
    pub fn publish_verdict(&self, seq: u64, locked: bool, direction: Direction) {
        let trap = &self.layout.trap;
        trap.locked.store(locked, Ordering::Relaxed);
        trap.direction.store(direction as u8, Ordering::Relaxed);
        trap.verdict.store(seq, Ordering::Release);
    }

    /// Sequence number of the latest answered proposal.
    pub fn verdict_seq(&self) -> u64 {
        self.layout.trap.verdict.load(Ordering::Acquire)
    }

    pub fn negotiation_status(&self) -> NegotiationStatus {
        NegotiationStatus::from_u8(self.layout.trap.status.load(Ordering::Acquire))
    }

    pub fn negotiation_rounds(&self) -> u32 {
        self.layout.trap.rounds.load(Ordering::Acquire)
    }

    pub fn pick(&self) -> f32 {
        f32::from_bits(self.layout.trap.pick.load(Ordering::Acquire))
    }
}

/// Barbarian's view.
#[derive(Clone, Copy)]
pub struct AttackerView<'a> {
    layout: &'a DungeonLayout,
}

impl<'a> AttackerView<'a> {
    pub fn enemy_health(&self) -> i32 {
        self.layout.enemy_health.load(Ordering::Acquire)
    }

    pub fn set_attack(&self, value: i32) {
        self.layout.attack.store(value, Ordering::Release);
    }
}

/// Wizard's view.
#[derive(Clone, Copy)]
pub struct CasterView<'a> {
    layout: &'a DungeonLayout,
}

impl<'a> CasterView<'a> {
    pub fn spell_input(&self) -> SpellInput {
        std::sync::atomic::fence(Ordering::Acquire);
        std::array::from_fn(|i| self.layout.spell_input[i].load(Ordering::Relaxed))
    }

    pub fn write_output(&self, output: &[u8; SPELL_CAPACITY]) {
        for (slot, byte) in self.layout.spell_output.iter().zip(output) {
            slot.store(*byte, Ordering::Relaxed);
        }
        std::sync::atomic::fence(Ordering::Release);
    }
}

/// Rogue's view.
#[derive(Clone, Copy)]
pub struct PickerView<'a> {
    layout: &'a DungeonLayout,
}

impl<'a> PickerView<'a> {
    /// Publish a new candidate and return its sequence number. Each proposal
    /// counts as one round.
    pub fn propose(&self, pick: f32) -> u64 {
        let trap = &self.layout.trap;
        trap.rounds.fetch_add(1, Ordering::Relaxed);
        trap.pick.store(pick.to_bits(), Ordering::Relaxed);
        trap.active.store(true, Ordering::Relaxed);
        trap.proposal.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn deactivate(&self) {
        self.layout.trap.active.store(false, Ordering::Release);
    }

    pub fn verdict(&self) -> Verdict {
        let trap = &self.layout.trap;
        let seq = trap.verdict.load(Ordering::Acquire);
        Verdict {
            seq,
            locked: trap.locked.load(Ordering::Relaxed),
            direction: Direction::from_u8(trap.direction.load(Ordering::Relaxed)),
        }
    }

    pub fn set_outcome(&self, status: NegotiationStatus, rounds: u32) {
        let trap = &self.layout.trap;
        trap.rounds.store(rounds, Ordering::Relaxed);
        trap.status.store(status as u8, Ordering::Release);
    }

    /// Set the status without touching the round count.
    pub fn set_status(&self, status: NegotiationStatus) {
        self.layout.trap.status.store(status as u8, Ordering::Release);
    }

    pub fn treasure(&self) -> [u8; TREASURE_SLOTS] {
        std::array::from_fn(|i| self.layout.treasure[i].load(Ordering::Acquire))
    }

    pub fn clear_spoils(&self) {
        for slot in &self.layout.spoils {
            slot.store(0, Ordering::Relaxed);
        }
        self.layout.spoils_filled.store(0, Ordering::Release);
    }

    /// Store one item and publish the new fill count.
    pub fn store_spoil(&self, index: usize, item: u8) {
        self.layout.spoils[index].store(item, Ordering::Release);
        self.layout
            .spoils_filled
            .store(index as u32 + 1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spell_is_zero_padded() {
        let layout = DungeonLayout::zeroed();
        let game = layout.game();
        game.write_spell(3, &[b'X'; SPELL_CAPACITY]);
        assert_eq!(game.write_spell(7, b"abc"), 3);

        let input = layout.caster().spell_input();
        assert_eq!(input[0], 7);
        assert_eq!(&input[1..4], b"abc");
        assert!(input[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn oversized_spell_is_truncated() {
        let layout = DungeonLayout::zeroed();
        let written = layout.game().write_spell(1, &[b'a'; SPELL_CAPACITY + 10]);
        assert_eq!(written, SPELL_CAPACITY);
    }

    #[test]
    fn proposals_are_numbered() {
        let layout = DungeonLayout::zeroed();
        let picker = layout.picker();
        assert_eq!(picker.propose(180.0), 1);
        assert_eq!(picker.propose(270.0), 2);

        let seen = layout.game().proposal();
        assert_eq!(seen.seq, 2);
        assert_eq!(seen.pick, 270.0);
        assert!(seen.active);
        assert_eq!(layout.game().negotiation_rounds(), 2);
    }

    #[test]
    fn status_update_keeps_rounds() {
        let layout = DungeonLayout::zeroed();
        let picker = layout.picker();
        picker.set_outcome(NegotiationStatus::Idle, 0);
        picker.propose(180.0);
        picker.propose(90.0);
        picker.propose(135.0);
        picker.set_status(NegotiationStatus::TimedOut);

        let game = layout.game();
        assert_eq!(game.negotiation_status(), NegotiationStatus::TimedOut);
        assert_eq!(game.negotiation_rounds(), 3);
    }

    #[test]
    fn verdict_carries_its_sequence() {
        let layout = DungeonLayout::zeroed();
        layout.game().publish_verdict(5, true, Direction::Down);
        assert_eq!(
            layout.picker().verdict(),
            Verdict {
                seq: 5,
                locked: true,
                direction: Direction::Down,
            }
        );
    }

    #[test]
    fn spoils_track_fill_count() {
        let layout = DungeonLayout::zeroed();
        let picker = layout.picker();
        picker.store_spoil(0, b'G');
        picker.store_spoil(1, b'E');
        assert_eq!(layout.game().spoils_filled(), 2);
        picker.clear_spoils();
        assert_eq!(layout.game().spoils_filled(), 0);
        assert_eq!(layout.game().spoils(), [0; TREASURE_SLOTS]);
    }
}
