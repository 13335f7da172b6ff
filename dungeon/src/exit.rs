//! Process exit codes.

use crate::bridge::protocol::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    SpawnBarbarian = 1,
    SpawnWizard = 2,
    SpawnRogue = 3,
    RegionOpen = 4,
    RegionSize = 5,
    RegionMap = 6,
    ExecBarbarian = 7,
    ExecWizard = 8,
    ExecRogue = 9,
    SignalSetup = 10,
    LeverOpen = 11,
    Handshake = 12,
    Script = 13,
    Runtime = 14,
    Usage = 64,
}

impl ExitCode {
    pub fn spawn(role: Role) -> Self {
        match role {
            Role::Barbarian => ExitCode::SpawnBarbarian,
            Role::Wizard => ExitCode::SpawnWizard,
            Role::Rogue => ExitCode::SpawnRogue,
        }
    }

    pub fn exec(role: Role) -> Self {
        match role {
            Role::Barbarian => ExitCode::ExecBarbarian,
            Role::Wizard => ExitCode::ExecWizard,
            Role::Rogue => ExitCode::ExecRogue,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_role_codes() {
        let spawn: Vec<i32> = Role::ALL.iter().map(|r| ExitCode::spawn(*r).code()).collect();
        let exec: Vec<i32> = Role::ALL.iter().map(|r| ExitCode::exec(*r).code()).collect();
        assert_eq!(spawn, [1, 2, 3]);
        assert_eq!(exec, [7, 8, 9]);
    }

    #[test]
    fn runtime_failure_has_its_own_code() {
        assert_eq!(ExitCode::Runtime.code(), 14);
        assert_ne!(ExitCode::Runtime, ExitCode::SignalSetup);
    }
}
