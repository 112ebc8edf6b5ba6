use serde::{Deserialize, Serialize};

/// A built-in routine that is executed instead of the application's own
/// implementation. Replaced routines are never instrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Replacement {
    Strlen,
}

impl Replacement {
    /// Runs the replacement on the memory its first argument points to and
    /// returns the routine's result.
    pub fn invoke(&self, memory: &[u8]) -> u64 {
        match self {
            Replacement::Strlen => strlen(memory) as u64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Replacement::Strlen => "strlen",
        }
    }
}

/// Length of the NUL-terminated string at the start of `bytes`. A buffer
/// without terminator counts as a whole.
pub fn strlen(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .position(|byte| *byte == 0)
        .unwrap_or(bytes.len())
}
