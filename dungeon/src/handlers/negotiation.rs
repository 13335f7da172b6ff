//! Binary-search negotiation of the trap's pick angle.
//!
//! The rogue proposes, the orchestrator judges. Between rounds the rogue can
//! freeze the orchestrator with SIGSTOP so that the candidate and the verdict
//! change strictly in turns; the proposal and verdict sequence numbers keep
//! the exchange correct even when suspension is disabled.

use std::convert::Infallible;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::bridge::signal::{self, SignalError};
use crate::config::Timings;
use crate::region::views::{GameView, PickerView, Proposal, Verdict};

/// Which way the next candidate should move after a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Direction {
    None = 0,
    Up = 1,
    Down = 2,
}

impl Direction {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Direction::Up,
            2 => Direction::Down,
            _ => Direction::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NegotiationStatus {
    /// No negotiation has finished yet.
    Idle = 0,
    Accepted = 1,
    /// The range collapsed without an accepted candidate.
    Exhausted = 2,
    /// The peer did not answer a round in time.
    TimedOut = 3,
    /// A candidate was rejected without a direction.
    Aborted = 4,
}

impl NegotiationStatus {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => NegotiationStatus::Accepted,
            2 => NegotiationStatus::Exhausted,
            3 => NegotiationStatus::TimedOut,
            4 => NegotiationStatus::Aborted,
            _ => NegotiationStatus::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NegotiationOutcome {
    pub status: NegotiationStatus,
    /// Accepted candidate, or the last one tried.
    pub pick: Option<f32>,
    pub rounds: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("failed to control peer: {0}")]
    Peer(#[from] SignalError),
}

/// Integer bisection over `0..=max`.
#[derive(Debug, Clone, Copy)]
pub struct BinarySearch {
    min: i64,
    max: i64,
}

impl BinarySearch {
    pub fn new(max: u32) -> Self {
        Self {
            min: 0,
            max: i64::from(max),
        }
    }

    /// Midpoint of the remaining range, or `None` once it is empty.
    pub fn candidate(&self) -> Option<u32> {
        (self.min <= self.max).then(|| ((self.min + self.max) / 2) as u32)
    }

    /// Shrink the range after `pick` was rejected. Returns false if the
    /// direction gives no way to continue.
    pub fn narrow(&mut self, pick: u32, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.min = i64::from(pick) + 1,
            Direction::Down => self.max = i64::from(pick) - 1,
            Direction::None => return false,
        }
        true
    }
}

/// Freezes and thaws the judging peer.
pub trait PeerControl: Send + Sync {
    fn suspend(&self) -> Result<(), SignalError>;
    fn resume(&self) -> Result<(), SignalError>;
}

/// SIGSTOP/SIGCONT to a process.
pub struct SignalPeer {
    pid: i32,
}

impl SignalPeer {
    pub fn new(pid: i32) -> Self {
        Self { pid }
    }
}

impl PeerControl for SignalPeer {
    fn suspend(&self) -> Result<(), SignalError> {
        signal::send_signal(self.pid, Signal::SIGSTOP)
    }

    fn resume(&self) -> Result<(), SignalError> {
        signal::send_signal(self.pid, Signal::SIGCONT)
    }
}

/// Leaves the peer running; ordering relies on sequence numbers alone.
pub struct CooperativePeer;

impl PeerControl for CooperativePeer {
    fn suspend(&self) -> Result<(), SignalError> {
        Ok(())
    }

    fn resume(&self) -> Result<(), SignalError> {
        Ok(())
    }
}

/// Resumes the peer when dropped while it is suspended.
struct SuspendGuard<'a, P: PeerControl + ?Sized> {
    peer: &'a P,
    suspended: bool,
}

impl<'a, P: PeerControl + ?Sized> SuspendGuard<'a, P> {
    fn new(peer: &'a P) -> Self {
        Self {
            peer,
            suspended: false,
        }
    }

    fn suspend(&mut self) -> Result<(), SignalError> {
        self.peer.suspend()?;
        self.suspended = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SignalError> {
        if self.suspended {
            self.suspended = false;
            self.peer.resume()?;
        }
        Ok(())
    }
}

impl<P: PeerControl + ?Sized> Drop for SuspendGuard<'_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.resume() {
            tracing::error!(error = %e, "Failed to resume peer");
        }
    }
}

async fn wait_for_verdict(
    picker: PickerView<'_>,
    seq: u64,
    timeout: Duration,
    poll: Duration,
) -> Option<Verdict> {
    tokio::time::timeout(timeout, async {
        loop {
            let verdict = picker.verdict();
            if verdict.seq >= seq {
                return verdict;
            }
            tokio::time::sleep(poll).await;
        }
    })
    .await
    .ok()
}

/// Rogue: search `0..=max` for a candidate the peer accepts.
///
/// The outcome is also published to the region. The peer is resumed on
/// every exit path.
pub async fn negotiate<P: PeerControl + ?Sized>(
    picker: PickerView<'_>,
    peer: &P,
    max: u32,
    timings: &Timings,
) -> Result<NegotiationOutcome, NegotiationError> {
    picker.set_outcome(NegotiationStatus::Idle, 0);

    let mut search = BinarySearch::new(max);
    let mut guard = SuspendGuard::new(peer);
    guard.suspend()?;

    let mut rounds = 0;
    let mut last = None;
    let status = loop {
        let Some(pick) = search.candidate() else {
            break NegotiationStatus::Exhausted;
        };
        rounds += 1;
        last = Some(pick as f32);

        let seq = picker.propose(pick as f32);
        guard.resume()?;
        let verdict =
            wait_for_verdict(picker, seq, timings.round_timeout, timings.poll_interval).await;
        guard.suspend()?;

        let Some(verdict) = verdict else {
            tracing::warn!(round = rounds, pick, "Peer did not answer in time");
            break NegotiationStatus::TimedOut;
        };
        tracing::debug!(round = rounds, pick, locked = verdict.locked, direction = ?verdict.direction, "Verdict");
        if !verdict.locked {
            break NegotiationStatus::Accepted;
        }
        if !search.narrow(pick, verdict.direction) {
            break NegotiationStatus::Aborted;
        }
    };

    picker.deactivate();
    picker.set_outcome(status, rounds);
    guard.resume()?;

    tracing::info!(?status, rounds, pick = ?last, "Negotiation finished");
    Ok(NegotiationOutcome {
        status,
        pick: last,
        rounds,
    })
}

/// Orchestrator side: accepts any candidate within one unit of `target`.
#[derive(Debug, Clone, Copy)]
pub struct TrapLock {
    target: f32,
}

impl TrapLock {
    pub fn new(target: f32) -> Self {
        Self { target }
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Returns `(locked, direction)` for a candidate.
    pub fn judge(&self, pick: f32) -> (bool, Direction) {
        if (pick - self.target).abs() < 1.0 {
            (false, Direction::None)
        } else if pick < self.target {
            (true, Direction::Up)
        } else {
            (true, Direction::Down)
        }
    }

    /// Answer the latest proposal if it is still unanswered.
    pub fn evaluate(&self, game: GameView<'_>) -> Option<Proposal> {
        let proposal = game.proposal();
        if !proposal.active || proposal.seq <= game.verdict_seq() {
            return None;
        }
        let (locked, direction) = self.judge(proposal.pick);
        game.publish_verdict(proposal.seq, locked, direction);
        Some(proposal)
    }
}

/// Keep answering proposals. Runs until dropped.
pub async fn serve_trap(game: GameView<'_>, lock: TrapLock, poll: Duration) -> Infallible {
    loop {
        if let Some(proposal) = lock.evaluate(game) {
            tracing::debug!(seq = proposal.seq, pick = proposal.pick, "Judged candidate");
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::region::{DungeonLayout, MAX_PICK_ANGLE};

    fn timings() -> Timings {
        Timings {
            round_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(1),
            ..Timings::default()
        }
    }

    async fn run<P: PeerControl>(
        layout: &DungeonLayout,
        peer: &P,
        lock: TrapLock,
        max: u32,
    ) -> NegotiationOutcome {
        let timings = timings();
        tokio::select! {
            outcome = negotiate(layout.picker(), peer, max, &timings) => outcome.unwrap(),
            never = serve_trap(layout.game(), lock, timings.poll_interval) => match never {},
        }
    }

    fn max_rounds(max: u32) -> u32 {
        (f64::from(max) + 1.0).log2().ceil() as u32
    }

    #[test]
    fn judge_accepts_within_one_unit() {
        let lock = TrapLock::new(217.5);
        assert_eq!(lock.judge(217.0), (false, Direction::None));
        assert_eq!(lock.judge(218.0), (false, Direction::None));
        assert_eq!(lock.judge(216.0), (true, Direction::Up));
        assert_eq!(lock.judge(219.0), (true, Direction::Down));
    }

    #[test]
    fn bisection_converges_for_every_target() {
        let bound = max_rounds(MAX_PICK_ANGLE);
        for whole in 0..=MAX_PICK_ANGLE {
            for target in [whole as f32, whole as f32 + 0.5] {
                if target > MAX_PICK_ANGLE as f32 {
                    continue;
                }
                let lock = TrapLock::new(target);
                let mut search = BinarySearch::new(MAX_PICK_ANGLE);
                let mut rounds = 0;
                let accepted = loop {
                    let pick = search.candidate().unwrap();
                    rounds += 1;
                    let (locked, direction) = lock.judge(pick as f32);
                    if !locked {
                        break pick;
                    }
                    assert!(search.narrow(pick, direction));
                };
                assert!((accepted as f32 - target).abs() < 1.0, "target {target}");
                assert!(rounds <= bound, "target {target} took {rounds} rounds");
            }
        }
    }

    #[tokio::test]
    async fn negotiation_through_the_region() {
        let layout = DungeonLayout::zeroed();
        let outcome = run(&layout, &CooperativePeer, TrapLock::new(217.5), MAX_PICK_ANGLE).await;

        assert_eq!(outcome.status, NegotiationStatus::Accepted);
        assert_eq!(outcome.pick, Some(217.0));
        assert_eq!(outcome.rounds, 8);

        let game = layout.game();
        assert_eq!(game.pick(), 217.0);
        assert_eq!(game.negotiation_status(), NegotiationStatus::Accepted);
        assert_eq!(game.negotiation_rounds(), 8);
        assert!(!game.proposal().active);
    }

    #[tokio::test]
    async fn unreachable_target_exhausts_the_range() {
        let layout = DungeonLayout::zeroed();
        let outcome = run(&layout, &CooperativePeer, TrapLock::new(1000.0), MAX_PICK_ANGLE).await;

        assert_eq!(outcome.status, NegotiationStatus::Exhausted);
        assert!(outcome.rounds <= max_rounds(MAX_PICK_ANGLE));
        assert_eq!(layout.game().negotiation_status(), NegotiationStatus::Exhausted);
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let layout = DungeonLayout::zeroed();
        let timings = Timings {
            round_timeout: Duration::from_millis(20),
            ..timings()
        };
        let outcome = negotiate(layout.picker(), &CooperativePeer, MAX_PICK_ANGLE, &timings)
            .await
            .unwrap();
        assert_eq!(outcome.status, NegotiationStatus::TimedOut);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.pick, Some(180.0));
    }

    #[tokio::test]
    async fn rejection_without_direction_aborts() {
        let layout = DungeonLayout::zeroed();
        let game = layout.game();
        let stubborn = async {
            loop {
                let proposal = game.proposal();
                if proposal.active && proposal.seq > game.verdict_seq() {
                    game.publish_verdict(proposal.seq, true, Direction::None);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        let timings = timings();
        let outcome = tokio::select! {
            outcome = negotiate(layout.picker(), &CooperativePeer, MAX_PICK_ANGLE, &timings) => outcome.unwrap(),
            _ = stubborn => unreachable!(),
        };
        assert_eq!(outcome.status, NegotiationStatus::Aborted);
        assert_eq!(outcome.rounds, 1);
    }

    #[derive(Default)]
    struct RecordingPeer {
        calls: Mutex<Vec<&'static str>>,
    }

    impl PeerControl for RecordingPeer {
        fn suspend(&self) -> Result<(), SignalError> {
            self.calls.lock().unwrap().push("suspend");
            Ok(())
        }

        fn resume(&self) -> Result<(), SignalError> {
            self.calls.lock().unwrap().push("resume");
            Ok(())
        }
    }

    #[tokio::test]
    async fn peer_is_suspended_and_resumed_in_turns() {
        let layout = DungeonLayout::zeroed();
        let peer = RecordingPeer::default();
        let outcome = run(&layout, &peer, TrapLock::new(90.0), MAX_PICK_ANGLE).await;
        assert_eq!(outcome.status, NegotiationStatus::Accepted);

        let calls = peer.calls.lock().unwrap().clone();
        assert_eq!(calls.first(), Some(&"suspend"));
        assert_eq!(calls.last(), Some(&"resume"));
        for pair in calls.windows(2) {
            assert_ne!(pair[0], pair[1], "calls must alternate: {calls:?}");
        }
        // One suspend up front, one per round, all balanced by resumes.
        assert_eq!(calls.len(), 2 * (outcome.rounds as usize + 1));
    }

    #[test]
    fn guard_resumes_on_drop() {
        let peer = RecordingPeer::default();
        {
            let mut guard = SuspendGuard::new(&peer);
            guard.suspend().unwrap();
        }
        assert_eq!(*peer.calls.lock().unwrap(), ["suspend", "resume"]);
    }

    #[test]
    fn evaluate_answers_each_proposal_once() {
        let layout = DungeonLayout::zeroed();
        let lock = TrapLock::new(10.0);
        assert!(lock.evaluate(layout.game()).is_none());

        layout.picker().propose(5.0);
        assert!(lock.evaluate(layout.game()).is_some());
        assert!(lock.evaluate(layout.game()).is_none());

        let verdict = layout.picker().verdict();
        assert_eq!(verdict.seq, 1);
        assert!(verdict.locked);
        assert_eq!(verdict.direction, Direction::Up);
    }

    #[test]
    fn status_serializes_snake_case() {
        insta::assert_json_snapshot!(
            [
                NegotiationStatus::Accepted,
                NegotiationStatus::Exhausted,
                NegotiationStatus::TimedOut,
                NegotiationStatus::Aborted,
            ],
            @r#"
        [
          "accepted",
          "exhausted",
          "timed_out",
          "aborted"
        ]
        "#
        );
    }
}
