//! Named shared memory region holding the [`DungeonLayout`].
//!
//! Lifecycle:
//! 1. Orchestrator: [`SharedRegion::create`] (sizes the object) then [`SharedRegion::map`]
//!    (stamps the header)
//! 2. Workers: [`SharedRegion::open`] then [`SharedRegion::map`] (validates the header)
//! 3. Everyone: [`MappedRegion::unmap`] and [`SharedRegion::close`]
//! 4. Orchestrator, once every worker was asked to terminate: [`unlink`]
//!
//! Stores through a mapping are visible to every other process that maps the
//! same name; nothing is buffered.

mod layout;
pub mod views;

pub use layout::{
    DungeonLayout, LAYOUT_MAGIC, LAYOUT_VERSION, LayoutMismatch, MAX_PICK_ANGLE, SPELL_CAPACITY,
    TREASURE_SLOTS,
};
pub(crate) use layout::{Channel, Mailbox};

use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;

use crate::exit::ExitCode;
use crate::teardown::TeardownError;

const MAP_LEN: NonZeroUsize = match NonZeroUsize::new(DungeonLayout::SIZE) {
    Some(len) => len,
    None => panic!("DungeonLayout must not be zero-sized"),
};

#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    #[error("failed to create shared region {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: Errno,
    },

    /// The orchestrator has not created the region (or already unlinked it).
    #[error("failed to open shared region {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("failed to size shared region {name} to {size} bytes: {source}")]
    Size {
        name: String,
        size: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("shared region {name} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        actual: u64,
        expected: usize,
    },

    #[error("failed to map shared region {name}: {source}")]
    Map {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("failed to inspect shared region {name}: {source}")]
    Stat {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shared region {name} has an incompatible layout: {source}")]
    Layout {
        name: String,
        #[source]
        source: LayoutMismatch,
    },

    #[error("shared region {0} has been closed")]
    Closed(String),

    #[error("shared region {0} is not mapped")]
    Unmapped(String),
}

impl RegionError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RegionError::Create { .. } | RegionError::Open { .. } => ExitCode::RegionOpen,
            RegionError::Size { .. } => ExitCode::RegionSize,
            RegionError::SizeMismatch { .. }
            | RegionError::Map { .. }
            | RegionError::Stat { .. }
            | RegionError::Layout { .. }
            | RegionError::Closed(_)
            | RegionError::Unmapped(_) => ExitCode::RegionMap,
        }
    }
}

/// Handle to a named shared memory object.
#[derive(Debug)]
pub struct SharedRegion {
    name: String,
    file: Option<File>,
    created: bool,
}

impl SharedRegion {
    /// Create a fresh region of `size` bytes. Fails if the name already exists.
    pub fn create(name: &str, size: usize) -> Result<Self, RegionError> {
        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o666),
        )
        .map_err(|source| RegionError::Create {
            name: name.to_string(),
            source,
        })?;
        let file = File::from(fd);

        if let Err(source) = file.set_len(size as u64) {
            // Don't leave a zero-sized object behind for the next run.
            let _ = shm_unlink(name);
            return Err(RegionError::Size {
                name: name.to_string(),
                size,
                source,
            });
        }

        tracing::debug!(name, size, "Created shared region");
        Ok(Self {
            name: name.to_string(),
            file: Some(file),
            created: true,
        })
    }

    /// Open a region the orchestrator already created.
    pub fn open(name: &str) -> Result<Self, RegionError> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|source| {
            RegionError::Open {
                name: name.to_string(),
                source,
            }
        })?;

        tracing::debug!(name, "Opened shared region");
        Ok(Self {
            name: name.to_string(),
            file: Some(File::from(fd)),
            created: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Map the region read-write.
    ///
    /// The creator stamps the layout header; everyone else validates it.
    pub fn map(&self) -> Result<MappedRegion, RegionError> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| RegionError::Closed(self.name.clone()))?;

        let actual = file
            .metadata()
            .map_err(|source| RegionError::Stat {
                name: self.name.clone(),
                source,
            })?
            .len();
        if actual != DungeonLayout::SIZE as u64 {
            return Err(RegionError::SizeMismatch {
                name: self.name.clone(),
                actual,
                expected: DungeonLayout::SIZE,
            });
        }

        // SAFETY: we map a fresh address chosen by the kernel; nothing else
        // in this process aliases it yet.
        let ptr = unsafe {
            mmap(
                None,
                MAP_LEN,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file,
                0,
            )
        }
        .map_err(|source| RegionError::Map {
            name: self.name.clone(),
            source,
        })?;

        let mapped = MappedRegion {
            name: self.name.clone(),
            ptr: Some(ptr.cast::<DungeonLayout>()),
        };

        let layout = mapped.layout()?;
        if self.created {
            layout.stamp();
        }
        layout.validate().map_err(|source| RegionError::Layout {
            name: self.name.clone(),
            source,
        })?;

        tracing::debug!(name = %self.name, size = DungeonLayout::SIZE, "Mapped shared region");
        Ok(mapped)
    }

    /// Close the descriptor. A second call reports `AlreadyReleased`.
    pub fn close(&mut self) -> Result<(), TeardownError> {
        match self.file.take() {
            Some(file) => {
                drop(file);
                Ok(())
            }
            None => Err(TeardownError::already_released(format!(
                "descriptor of {}",
                self.name
            ))),
        }
    }
}

/// Remove the region's name. Existing mappings stay valid until unmapped.
pub fn unlink(name: &str) -> Result<(), TeardownError> {
    shm_unlink(name).map_err(|e| TeardownError::from_errno(name, e))
}

/// A live mapping of the region in this process.
#[derive(Debug)]
pub struct MappedRegion {
    name: String,
    ptr: Option<NonNull<DungeonLayout>>,
}

// SAFETY: the mapping is made only of atomics, so shared references may be
// used from any thread; unmapping requires `&mut self`.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    pub fn layout(&self) -> Result<&DungeonLayout, RegionError> {
        let ptr = self
            .ptr
            .ok_or_else(|| RegionError::Unmapped(self.name.clone()))?;
        // SAFETY: ptr is a live, page-aligned MAP_SHARED mapping of exactly
        // DungeonLayout::SIZE bytes. It is only unmapped through `&mut self`,
        // so it outlives the returned borrow.
        Ok(unsafe { ptr.as_ref() })
    }

    pub fn is_mapped(&self) -> bool {
        self.ptr.is_some()
    }

    /// Unmap from this process. A second call reports `AlreadyReleased`.
    pub fn unmap(&mut self) -> Result<(), TeardownError> {
        let resource = format!("mapping of {}", self.name);
        let ptr = self
            .ptr
            .take()
            .ok_or_else(|| TeardownError::already_released(resource.clone()))?;
        // SAFETY: ptr came from mmap with MAP_LEN bytes and no borrow of it
        // can outlive `&mut self`.
        unsafe { munmap(ptr.cast(), MAP_LEN.get()) }
            .map_err(|e| TeardownError::from_errno(resource, e))
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if self.ptr.is_some()
            && let Err(e) = self.unmap()
        {
            tracing::warn!(error = %e, "Failed to unmap shared region on drop");
        }
    }
}
