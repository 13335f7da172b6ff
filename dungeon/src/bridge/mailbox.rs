//! Acknowledged exchanges over payload-free signals.
//!
//! Each worker has a [`Mailbox`] in the shared region. For one exchange the
//! orchestrator bumps the channel's `request` counter, sends the trigger
//! signal and polls until the worker's `ack` reaches that number. The worker
//! writes `status` before `ack`, so a caller that sees the ack also sees the
//! outcome.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::protocol::{AckStatus, Role, Trigger};
use super::signal::{self, SignalError};
use crate::exit::ExitCode;
use crate::region::{Channel, DungeonLayout, Mailbox};

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("{role} has not announced itself")]
    NotReady { role: Role },

    #[error("{trigger:?} is not an acknowledged exchange")]
    NotAnExchange { trigger: Trigger },

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error("{role} did not acknowledge {trigger:?} #{seq} within {timeout:?}")]
    Timeout {
        role: Role,
        trigger: Trigger,
        seq: u64,
        timeout: Duration,
    },

    #[error("{role} reported failure for {trigger:?} #{seq}")]
    Failed {
        role: Role,
        trigger: Trigger,
        seq: u64,
    },
}

impl ExchangeError {
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::Handshake
    }
}

fn channel(mailbox: &Mailbox, trigger: Trigger) -> Result<&Channel, ExchangeError> {
    match trigger {
        Trigger::Compute => Ok(&mailbox.compute),
        Trigger::Gate => Ok(&mailbox.gate),
        Trigger::Terminate => Err(ExchangeError::NotAnExchange { trigger }),
    }
}

/// Orchestrator half of a worker's mailbox.
#[derive(Clone, Copy)]
pub struct MailboxClient<'a> {
    role: Role,
    mailbox: &'a Mailbox,
}

impl<'a> MailboxClient<'a> {
    pub fn new(layout: &'a DungeonLayout, role: Role) -> Self {
        Self {
            role,
            mailbox: layout.mailbox(role),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The worker's pid, once it has announced itself.
    pub fn pid(&self) -> Option<i32> {
        match self.mailbox.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid as i32),
        }
    }

    /// Open a new request on `trigger`'s channel without signalling.
    pub fn begin(&self, trigger: Trigger) -> Result<u64, ExchangeError> {
        let channel = channel(self.mailbox, trigger)?;
        Ok(channel.request.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Poll until request `seq` is acknowledged.
    pub async fn wait_ack(
        &self,
        trigger: Trigger,
        seq: u64,
        timeout: Duration,
        poll: Duration,
    ) -> Result<(), ExchangeError> {
        let channel = channel(self.mailbox, trigger)?;
        let status = tokio::time::timeout(timeout, async {
            loop {
                if channel.ack.load(Ordering::Acquire) >= seq {
                    return AckStatus::from_u8(channel.status.load(Ordering::Acquire));
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await
        .map_err(|_| ExchangeError::Timeout {
            role: self.role,
            trigger,
            seq,
            timeout,
        })?;

        match status {
            AckStatus::Done => Ok(()),
            AckStatus::Failed | AckStatus::Pending => Err(ExchangeError::Failed {
                role: self.role,
                trigger,
                seq,
            }),
        }
    }

    /// Signal the worker and wait for the acknowledgment.
    pub async fn call(
        &self,
        trigger: Trigger,
        timeout: Duration,
        poll: Duration,
    ) -> Result<u64, ExchangeError> {
        let pid = self.pid().ok_or(ExchangeError::NotReady { role: self.role })?;
        let seq = self.begin(trigger)?;
        tracing::debug!(role = %self.role, ?trigger, seq, "Sending trigger");
        signal::send(pid, trigger)?;
        self.wait_ack(trigger, seq, timeout, poll).await?;
        tracing::debug!(role = %self.role, ?trigger, seq, "Acknowledged");
        Ok(seq)
    }
}

/// Worker half of its own mailbox.
#[derive(Clone, Copy)]
pub struct MailboxServer<'a> {
    role: Role,
    mailbox: &'a Mailbox,
}

impl<'a> MailboxServer<'a> {
    pub fn new(layout: &'a DungeonLayout, role: Role) -> Self {
        Self {
            role,
            mailbox: layout.mailbox(role),
        }
    }

    /// Publish this worker's pid; the orchestrator waits for it before
    /// sending any signal.
    pub fn announce(&self, pid: u32) {
        self.mailbox.pid.store(pid, Ordering::Release);
    }

    /// Latest unacknowledged request on `trigger`'s channel.
    pub fn pending(&self, trigger: Trigger) -> Option<u64> {
        let channel = channel(self.mailbox, trigger).ok()?;
        let request = channel.request.load(Ordering::Acquire);
        let ack = channel.ack.load(Ordering::Acquire);
        (request > ack).then_some(request)
    }

    pub fn complete(&self, trigger: Trigger, seq: u64, status: AckStatus) {
        let Ok(channel) = channel(self.mailbox, trigger) else {
            return;
        };
        channel.status.store(status as u8, Ordering::Release);
        channel.ack.store(seq, Ordering::Release);
        tracing::debug!(role = %self.role, ?trigger, seq, ?status, "Completed exchange");
    }
}
