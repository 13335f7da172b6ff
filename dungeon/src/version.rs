//! Version information for dungeon.

use crate::region::LAYOUT_VERSION;

/// Dungeon version from Cargo.toml
pub const DUNGEON_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Versions a session was run with.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    /// Crate version.
    pub dungeon: &'static str,
    /// Shared region layout version.
    pub layout: u32,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            dungeon: DUNGEON_VERSION,
            layout: LAYOUT_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}
