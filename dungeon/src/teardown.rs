//! Best-effort release of named resources.
//!
//! By the time a process tears down, a peer may already have unmapped,
//! closed or unlinked the same resource. A second release is reported and
//! otherwise ignored; teardown always continues to the next step.

use nix::errno::Errno;

#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("{resource} has already been released")]
    AlreadyReleased { resource: String },

    #[error("failed to release {resource}: {source}")]
    Failed {
        resource: String,
        #[source]
        source: Errno,
    },
}

impl TeardownError {
    pub fn already_released(resource: impl Into<String>) -> Self {
        Self::AlreadyReleased {
            resource: resource.into(),
        }
    }

    /// Classify an errno from an unlink/unmap/close call.
    pub fn from_errno(resource: impl Into<String>, source: Errno) -> Self {
        match source {
            Errno::ENOENT | Errno::EBADF => Self::already_released(resource),
            source => Self::Failed {
                resource: resource.into(),
                source,
            },
        }
    }

    pub fn is_already_released(&self) -> bool {
        matches!(self, Self::AlreadyReleased { .. })
    }
}

/// Log the outcome of one teardown step and carry on.
pub fn best_effort(step: &str, result: Result<(), TeardownError>) {
    match result {
        Ok(()) => tracing::debug!(step, "Released"),
        Err(e) if e.is_already_released() => {
            tracing::info!(step, "{}", e);
        }
        Err(e) => {
            tracing::warn!(step, error = %e, "Teardown step failed, continuing");
        }
    }
}
