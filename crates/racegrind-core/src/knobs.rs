use std::path::Path;

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

/// Options controlling what gets instrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Knobs {
    /// Skip prefetch instructions. They may touch addresses that are never
    /// actually accessed.
    pub ignore_prefetch: bool,

    /// Bracket synchronization routines with ignore-conflicts regions so
    /// their internal memory traffic is not reported as application accesses.
    pub ignore_sync_internals: bool,

    /// Log every routine entry and exit.
    pub print_routine_names: bool,
}

impl Default for Knobs {
    fn default() -> Self {
        Self {
            ignore_prefetch: true,
            ignore_sync_internals: true,
            print_routine_names: false,
        }
    }
}

impl Knobs {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read knobs from {}", path.display()))?;
        Self::from_json(&json)
    }
}
