//! Signal delivery.
//!
//! The orchestrator sends with `kill(2)`; workers receive through tokio signal
//! streams, so handlers run as ordinary tasks and never inside an
//! async-signal context.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::signal::unix::{SignalKind, signal};

use super::protocol::Trigger;
use crate::exit::ExitCode;

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("failed to register handler for {trigger:?}: {source}")]
    Register {
        trigger: Trigger,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send {signal} to pid {pid}: {source}")]
    Send {
        pid: i32,
        signal: Signal,
        #[source]
        source: Errno,
    },
}

impl SignalError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            SignalError::Register { .. } => ExitCode::SignalSetup,
            SignalError::Send { .. } => ExitCode::Handshake,
        }
    }
}

impl Trigger {
    pub fn signal(self) -> Signal {
        match self {
            Trigger::Compute => Signal::SIGUSR1,
            Trigger::Gate => Signal::SIGUSR2,
            Trigger::Terminate => Signal::SIGTERM,
        }
    }

    fn kind(self) -> SignalKind {
        match self {
            Trigger::Compute => SignalKind::user_defined1(),
            Trigger::Gate => SignalKind::user_defined2(),
            Trigger::Terminate => SignalKind::terminate(),
        }
    }
}

pub fn send(pid: i32, trigger: Trigger) -> Result<(), SignalError> {
    send_signal(pid, trigger.signal())
}

pub fn send_signal(pid: i32, signal: Signal) -> Result<(), SignalError> {
    kill(Pid::from_raw(pid), signal).map_err(|source| SignalError::Send {
        pid,
        signal,
        source,
    })
}

/// The three trigger streams of a worker.
///
/// Registering replaces the default dispositions, so this must happen before
/// the worker announces itself.
pub struct TriggerStreams {
    compute: tokio::signal::unix::Signal,
    gate: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

impl TriggerStreams {
    pub fn register() -> Result<Self, SignalError> {
        let open = |trigger: Trigger| {
            signal(trigger.kind()).map_err(|source| SignalError::Register { trigger, source })
        };
        Ok(Self {
            compute: open(Trigger::Compute)?,
            gate: open(Trigger::Gate)?,
            terminate: open(Trigger::Terminate)?,
        })
    }

    /// Wait for the next trigger. Terminate wins when several are ready.
    ///
    /// Repeated deliveries of one signal may coalesce; the mailbox sequence
    /// numbers tell the handler how much work is actually pending.
    pub async fn next(&mut self) -> Option<Trigger> {
        tokio::select! {
            biased;
            Some(()) = self.terminate.recv() => Some(Trigger::Terminate),
            Some(()) = self.compute.recv() => Some(Trigger::Compute),
            Some(()) = self.gate.recv() => Some(Trigger::Gate),
            else => None,
        }
    }
}
