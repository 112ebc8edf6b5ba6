use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use race_events::metadata::{NameRecord, TraceMetadata};

#[derive(Default)]
struct Interned {
    names: Vec<Arc<str>>,
    index: HashMap<Arc<str>, u32>,
}

/// Interns names into small, dense identifiers.
///
/// Identifiers are handed out in first-seen order starting at `1`; `0` is
/// reserved for "unknown" and is what the empty name maps to. Identifiers
/// are stable for the lifetime of the registry only.
///
/// All mutations go through a single lock, so a registry may be shared by
/// every thread that instruments code.
#[derive(Default)]
pub struct NameRegistry {
    inner: Mutex<Interned>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identifier of `name`, assigning the next free one if the
    /// name has not been seen before.
    pub fn intern(&self, name: &str) -> u32 {
        if name.is_empty() {
            return 0;
        }

        let mut inner = self.inner.lock();
        if let Some(id) = inner.index.get(name) {
            return *id;
        }

        let name: Arc<str> = Arc::from(name);
        inner.names.push(name.clone());
        let id = u32::try_from(inner.names.len()).unwrap_or(u32::MAX);
        inner.index.insert(name, id);
        id
    }

    /// Returns the identifier of `name` without interning it.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.inner.lock().index.get(name).copied()
    }

    /// Returns the name behind `id`, if any.
    pub fn name(&self, id: u32) -> Option<Arc<str>> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.inner.lock().names.get(idx).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every interned name together with its identifier, ordered by
    /// identifier.
    pub fn records(&self) -> Vec<NameRecord> {
        self.inner
            .lock()
            .names
            .iter()
            .zip(1..)
            .map(|(name, id)| NameRecord {
                id,
                name: name.to_string(),
            })
            .collect()
    }
}

/// The name registries of one analysis run: source files and routines.
#[derive(Default)]
pub struct Registry {
    pub files: NameRegistry,
    pub routines: NameRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freezes the current state of both registries into trace metadata.
    pub fn to_metadata(&self) -> TraceMetadata {
        TraceMetadata::new(self.files.records(), self.routines.records())
    }
}
