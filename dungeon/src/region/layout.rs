//! Fixed byte layout of the shared region.
//!
//! Every field is an atomic so that concurrent access from four processes is
//! defined behaviour. All-zero bytes are a valid value of every type here,
//! which is what a freshly sized POSIX shared memory object contains.
//!
//! Each field has exactly one writing process. Fields are crate-private; the
//! role views in [`super::views`] are the public way to reach them, and each
//! view exposes only its role's writes.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, AtomicU64, Ordering};

use crate::bridge::protocol::Role;

/// Payload bytes in the encrypted spell (the key byte comes on top).
pub const SPELL_CAPACITY: usize = 64;
/// Number of treasure items moved during the handoff.
pub const TREASURE_SLOTS: usize = 4;
/// Default exclusive upper bound of the negotiated pick angle.
pub const MAX_PICK_ANGLE: u32 = 360;

/// "DUNGEON\0" in big-endian bytes.
pub const LAYOUT_MAGIC: u64 = u64::from_be_bytes(*b"DUNGEON\0");
/// Bumped whenever a field is added, removed or reordered.
pub const LAYOUT_VERSION: u32 = 1;

#[repr(C)]
pub struct Header {
    magic: AtomicU64,
    version: AtomicU32,
    size: AtomicU32,
}

/// Request/acknowledgment pair for one kind of trigger.
///
/// `request` is written by the orchestrator, `ack` and `status` by the worker.
#[repr(C)]
pub struct Channel {
    pub(crate) request: AtomicU64,
    pub(crate) ack: AtomicU64,
    pub(crate) status: AtomicU8,
}

/// Per-worker rendezvous block.
#[repr(C)]
pub struct Mailbox {
    /// Worker pid, published once setup is complete (zero until then).
    pub(crate) pid: AtomicU32,
    pub(crate) compute: Channel,
    pub(crate) gate: Channel,
}

/// Negotiation state of the trap.
#[repr(C)]
pub struct TrapState {
    /// Candidate angle as `f32` bits. Rogue.
    pub(crate) pick: AtomicU32,
    /// A negotiation is in progress. Rogue.
    pub(crate) active: AtomicBool,
    /// Sequence number of the latest candidate. Rogue.
    pub(crate) proposal: AtomicU64,
    /// Candidate rejected. Orchestrator.
    pub(crate) locked: AtomicBool,
    /// [`crate::handlers::negotiation::Direction`] hint. Orchestrator.
    pub(crate) direction: AtomicU8,
    /// Sequence number of the latest evaluated candidate. Orchestrator.
    pub(crate) verdict: AtomicU64,
    /// [`crate::handlers::negotiation::NegotiationStatus`]. Rogue.
    pub(crate) status: AtomicU8,
    /// Rounds used by the latest negotiation. Rogue.
    pub(crate) rounds: AtomicU32,
}

#[repr(C)]
pub struct DungeonLayout {
    header: Header,
    pub(crate) running: AtomicBool,
    pub(crate) enemy_health: AtomicI32,
    pub(crate) attack: AtomicI32,
    pub(crate) spell_input: [AtomicU8; SPELL_CAPACITY + 1],
    pub(crate) spell_output: [AtomicU8; SPELL_CAPACITY],
    pub(crate) trap: TrapState,
    pub(crate) treasure: [AtomicU8; TREASURE_SLOTS],
    pub(crate) spoils: [AtomicU8; TREASURE_SLOTS],
    pub(crate) spoils_filled: AtomicU32,
    pub(crate) mailboxes: [Mailbox; Role::COUNT],
}

impl DungeonLayout {
    pub const SIZE: usize = std::mem::size_of::<DungeonLayout>();

    /// Write the header. Only the creating process does this, right after
    /// sizing the region and before any worker exists.
    pub(crate) fn stamp(&self) {
        self.header.size.store(Self::SIZE as u32, Ordering::Relaxed);
        self.header.version.store(LAYOUT_VERSION, Ordering::Relaxed);
        self.header.magic.store(LAYOUT_MAGIC, Ordering::Release);
    }

    /// Check that the region was stamped by a compatible creator.
    pub(crate) fn validate(&self) -> Result<(), LayoutMismatch> {
        let magic = self.header.magic.load(Ordering::Acquire);
        let version = self.header.version.load(Ordering::Relaxed);
        let size = self.header.size.load(Ordering::Relaxed);
        if magic != LAYOUT_MAGIC || version != LAYOUT_VERSION || size as usize != Self::SIZE {
            return Err(LayoutMismatch {
                magic,
                version,
                size,
            });
        }
        Ok(())
    }

    pub(crate) fn mailbox(&self, role: Role) -> &Mailbox {
        &self.mailboxes[role.index()]
    }

    /// Heap-allocated zeroed layout for in-process tests.
    #[cfg(test)]
    pub(crate) fn zeroed() -> Box<Self> {
        // SAFETY: every field is an atomic integer or bool (or an array of
        // them), for which the all-zero bit pattern is valid.
        let layout: Box<Self> = unsafe { Box::new(std::mem::zeroed()) };
        layout.stamp();
        layout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error(
    "layout mismatch: magic {magic:#x}, version {version}, size {size} (expected version {expected_version}, size {expected_size})",
    expected_version = LAYOUT_VERSION,
    expected_size = DungeonLayout::SIZE
)]
pub struct LayoutMismatch {
    pub magic: u64,
    pub version: u32,
    pub size: u32,
}
