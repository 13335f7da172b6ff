//! Levers: named binary semaphores gating the treasure handoff.
//!
//! A lever starts free (value 1). Its owner pulls it (decrements to 0) and
//! the rogue lets it go once the treasure has moved. A lever never counts
//! above 1: releasing a free lever is refused.

use std::ffi::CString;
use std::ptr::NonNull;
use std::time::Duration;

use nix::errno::Errno;

use crate::bridge::protocol::LeverId;
use crate::config::ResourceNames;
use crate::exit::ExitCode;
use crate::teardown::TeardownError;

#[derive(Debug, thiserror::Error)]
pub enum LeverError {
    #[error("lever name {0:?} contains a NUL byte")]
    InvalidName(String),

    #[error("failed to open lever {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("timed out after {timeout:?} waiting for lever {name}")]
    Timeout { name: String, timeout: Duration },

    #[error("lever {name} is already free")]
    AlreadyFree { name: String },

    #[error("lever {name} has been closed")]
    Closed { name: String },

    #[error("{op} on lever {name} failed: {source}")]
    Sys {
        op: &'static str,
        name: String,
        #[source]
        source: Errno,
    },
}

impl LeverError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            LeverError::InvalidName(_) | LeverError::Open { .. } => ExitCode::LeverOpen,
            _ => ExitCode::Handshake,
        }
    }
}

/// Handle to one named lever.
#[derive(Debug)]
pub struct Lever {
    id: LeverId,
    name: String,
    sem: Option<NonNull<libc::sem_t>>,
}

// SAFETY: POSIX semaphores are safe to operate on from any thread, and the
// handle is only closed through `&mut self`.
unsafe impl Send for Lever {}
unsafe impl Sync for Lever {}

impl Lever {
    /// Open the lever, creating it free if it does not exist yet.
    pub fn open(id: LeverId, names: &ResourceNames) -> Result<Self, LeverError> {
        let name = id.name(names).to_string();
        let c_name = CString::new(name.clone()).map_err(|_| LeverError::InvalidName(name.clone()))?;

        // SAFETY: c_name is a valid C string; mode and initial value are
        // passed as the promoted integer types sem_open expects.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o644 as libc::c_uint,
                1 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(LeverError::Open {
                name,
                source: Errno::last(),
            });
        }
        let sem = NonNull::new(sem).ok_or_else(|| LeverError::Open {
            name: name.clone(),
            source: Errno::EINVAL,
        })?;

        tracing::debug!(lever = %name, "Opened lever");
        Ok(Self {
            id,
            name,
            sem: Some(sem),
        })
    }

    pub fn id(&self) -> LeverId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn sem(&self) -> Result<*mut libc::sem_t, LeverError> {
        self.sem
            .map(NonNull::as_ptr)
            .ok_or_else(|| LeverError::Closed {
                name: self.name.clone(),
            })
    }

    fn sys_error(&self, op: &'static str) -> LeverError {
        LeverError::Sys {
            op,
            name: self.name.clone(),
            source: Errno::last(),
        }
    }

    /// Pull the lever if it is free. Never blocks.
    pub fn try_acquire(&self) -> Result<bool, LeverError> {
        let sem = self.sem()?;
        loop {
            // SAFETY: sem is an open semaphore handle.
            if unsafe { libc::sem_trywait(sem) } == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::EAGAIN => return Ok(false),
                Errno::EINTR => continue,
                _ => return Err(self.sys_error("sem_trywait")),
            }
        }
    }

    /// Pull the lever, waiting at most `timeout`.
    pub async fn acquire(&self, timeout: Duration, poll: Duration) -> Result<(), LeverError> {
        let result = tokio::time::timeout(timeout, async {
            loop {
                if self.try_acquire()? {
                    return Ok(());
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(LeverError::Timeout {
                name: self.name.clone(),
                timeout,
            }),
        }
    }

    /// Let the lever go. Refused if it is already free.
    pub fn release(&self) -> Result<(), LeverError> {
        if self.is_free()? {
            return Err(LeverError::AlreadyFree {
                name: self.name.clone(),
            });
        }
        let sem = self.sem()?;
        // SAFETY: sem is an open semaphore handle.
        if unsafe { libc::sem_post(sem) } != 0 {
            return Err(self.sys_error("sem_post"));
        }
        Ok(())
    }

    pub fn value(&self) -> Result<i32, LeverError> {
        let sem = self.sem()?;
        let mut value: libc::c_int = 0;
        // SAFETY: sem is an open semaphore handle and value is a valid out
        // pointer.
        if unsafe { libc::sem_getvalue(sem, &mut value) } != 0 {
            return Err(self.sys_error("sem_getvalue"));
        }
        Ok(value)
    }

    pub fn is_free(&self) -> Result<bool, LeverError> {
        Ok(self.value()? >= 1)
    }

    /// Close this handle. A second call reports `AlreadyReleased`.
    pub fn close(&mut self) -> Result<(), TeardownError> {
        let Some(sem) = self.sem.take() else {
            return Err(TeardownError::already_released(format!(
                "handle of {}",
                self.name
            )));
        };
        // SAFETY: sem came from sem_open and is closed exactly once.
        if unsafe { libc::sem_close(sem.as_ptr()) } != 0 {
            return Err(TeardownError::from_errno(&self.name, Errno::last()));
        }
        Ok(())
    }
}

impl Drop for Lever {
    fn drop(&mut self) {
        if self.sem.is_some()
            && let Err(e) = self.close()
        {
            tracing::warn!(lever = %self.name, error = %e, "Failed to close lever on drop");
        }
    }
}

/// Remove a lever's name. Open handles stay usable.
pub fn unlink(name: &str) -> Result<(), TeardownError> {
    let c_name = CString::new(name).map_err(|_| TeardownError::Failed {
        resource: name.to_string(),
        source: Errno::EINVAL,
    })?;
    // SAFETY: c_name is a valid C string.
    if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
        return Err(TeardownError::from_errno(name, Errno::last()));
    }
    Ok(())
}
