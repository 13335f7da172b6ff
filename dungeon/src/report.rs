//! Session report printed by the binary.

use serde::{Deserialize, Serialize};

use crate::bridge::protocol::Role;
use crate::config::SessionId;
use crate::version::VersionInfo;

/// The four scripted exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Challenge {
    Attack,
    Dispel,
    PickLock,
    Loot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Started,
    Succeeded,
    Failed,
}

/// Outcome of one exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeReport {
    pub challenge: Challenge,
    pub status: ChallengeStatus,
    /// When the exchange started (ISO 8601 format).
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Challenge-specific values, e.g. the attack value or the accepted pick.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl ChallengeReport {
    pub fn starting(challenge: Challenge) -> Self {
        Self {
            challenge,
            status: ChallengeStatus::Started,
            started_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn succeeded(self, detail: serde_json::Value) -> Self {
        self.complete(ChallengeStatus::Succeeded, detail)
    }

    pub fn failed(self, detail: serde_json::Value) -> Self {
        self.complete(ChallengeStatus::Failed, detail)
    }

    fn complete(mut self, status: ChallengeStatus, detail: serde_json::Value) -> Self {
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
        self.status = status;
        self.detail = detail;
        self
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerExit {
    /// Exited on its own with this code.
    Exited { code: i32 },
    /// Died from a signal it did not handle.
    Signaled { signal: i32 },
    /// Ignored terminate and was killed after the grace period.
    Killed,
    /// The orchestrator could not observe the exit.
    Lost { reason: String },
}

impl WorkerExit {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => WorkerExit::Exited { code },
            (None, Some(signal)) => WorkerExit::Signaled { signal },
            (None, None) => WorkerExit::Lost {
                reason: status.to_string(),
            },
        }
    }

    pub fn is_clean(&self) -> bool {
        *self == WorkerExit::Exited { code: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub role: Role,
    pub exit: WorkerExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: SessionId,
    pub version: VersionInfo,
    pub status: SessionStatus,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Final value of the shared `running` flag.
    pub running: bool,
    pub challenges: Vec<ChallengeReport>,
    /// Workers in the order they were terminated.
    pub workers: Vec<WorkerReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionReport {
    pub fn starting(session: SessionId) -> Self {
        Self {
            session,
            version: VersionInfo::new(),
            status: SessionStatus::Running,
            started_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
            running: true,
            challenges: Vec::new(),
            workers: Vec::new(),
            error: None,
        }
    }

    pub fn finish(mut self, running: bool, error: Option<String>) -> Self {
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
        self.running = running;
        self.status = if error.is_none()
            && self
                .challenges
                .iter()
                .all(|c| c.status == ChallengeStatus::Succeeded)
            && self.workers.iter().all(|w| w.exit.is_clean())
        {
            SessionStatus::Succeeded
        } else {
            SessionStatus::Failed
        };
        self.error = error;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == SessionStatus::Succeeded
    }

    /// One line per challenge, for the non-JSON output.
    pub fn summary(&self) -> String {
        let mut out = format!("session {} {:?}\n", self.session, self.status);
        for c in &self.challenges {
            out.push_str(&format!("  {:?}: {:?} {}\n", c.challenge, c.status, c.detail));
        }
        for w in &self.workers {
            out.push_str(&format!("  {}: {:?}\n", w.role, w.exit));
        }
        if let Some(error) = &self.error {
            out.push_str(&format!("  error: {error}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(challenge: Challenge, status: ChallengeStatus, detail: serde_json::Value) -> ChallengeReport {
        ChallengeReport {
            challenge,
            status,
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
            completed_at: Some("2026-01-01T00:00:01+00:00".to_string()),
            detail,
        }
    }

    #[test]
    fn challenge_completion_sets_timestamp() {
        let report = ChallengeReport::starting(Challenge::Attack);
        assert_eq!(report.status, ChallengeStatus::Started);
        assert!(report.completed_at.is_none());

        let report = report.succeeded(serde_json::json!({ "attack": 42 }));
        assert_eq!(report.status, ChallengeStatus::Succeeded);
        assert!(report.completed_at.is_some());
    }

    #[test]
    fn any_failed_challenge_fails_the_session() {
        let mut report = SessionReport::starting(SessionId::new());
        report
            .challenges
            .push(fixed(Challenge::Attack, ChallengeStatus::Succeeded, serde_json::Value::Null));
        report
            .challenges
            .push(fixed(Challenge::PickLock, ChallengeStatus::Failed, serde_json::Value::Null));
        let report = report.finish(false, None);
        assert_eq!(report.status, SessionStatus::Failed);
        assert!(!report.succeeded());
    }

    #[test]
    fn unclean_worker_exit_fails_the_session() {
        let mut report = SessionReport::starting(SessionId::new());
        report.workers.push(WorkerReport {
            role: Role::Rogue,
            exit: WorkerExit::Exited { code: 0 },
        });
        report.workers.push(WorkerReport {
            role: Role::Wizard,
            exit: WorkerExit::Killed,
        });
        let report = report.finish(false, None);
        assert_eq!(report.status, SessionStatus::Failed);
        assert!(report.summary().contains("wizard: Killed"));
    }

    #[test]
    fn exit_status_is_classified() {
        use std::os::unix::process::ExitStatusExt;

        let clean = WorkerExit::from_status(std::process::ExitStatus::from_raw(0));
        assert!(clean.is_clean());
        assert_eq!(
            WorkerExit::from_status(std::process::ExitStatus::from_raw(12 << 8)),
            WorkerExit::Exited { code: 12 }
        );
        assert_eq!(
            WorkerExit::from_status(std::process::ExitStatus::from_raw(libc::SIGKILL)),
            WorkerExit::Signaled { signal: libc::SIGKILL }
        );
    }

    #[test]
    fn worker_report_serializes() {
        let workers = vec![
            WorkerReport {
                role: Role::Rogue,
                exit: WorkerExit::Exited { code: 0 },
            },
            WorkerReport {
                role: Role::Barbarian,
                exit: WorkerExit::Killed,
            },
        ];
        insta::assert_json_snapshot!(workers, @r#"
        [
          {
            "role": "rogue",
            "exit": {
              "kind": "exited",
              "code": 0
            }
          },
          {
            "role": "barbarian",
            "exit": {
              "kind": "killed"
            }
          }
        ]
        "#);
    }

    #[test]
    fn error_fails_the_session() {
        let report = SessionReport::starting(SessionId::new()).finish(true, Some("boom".into()));
        assert_eq!(report.status, SessionStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("boom"));
    }

    #[test]
    fn challenge_report_serializes() {
        let report = fixed(
            Challenge::PickLock,
            ChallengeStatus::Succeeded,
            serde_json::json!({ "pick": 217.0, "rounds": 8, "status": "accepted" }),
        );
        insta::assert_json_snapshot!(report, @r#"
        {
          "challenge": "pick_lock",
          "status": "succeeded",
          "started_at": "2026-01-01T00:00:00+00:00",
          "completed_at": "2026-01-01T00:00:01+00:00",
          "detail": {
            "pick": 217.0,
            "rounds": 8,
            "status": "accepted"
          }
        }
        "#);
    }

    #[test]
    fn null_detail_is_omitted() {
        let report = ChallengeReport {
            completed_at: None,
            ..fixed(Challenge::Loot, ChallengeStatus::Started, serde_json::Value::Null)
        };
        insta::assert_json_snapshot!(report, @r#"
        {
          "challenge": "loot",
          "status": "started",
          "started_at": "2026-01-01T00:00:00+00:00"
        }
        "#);
    }
}
