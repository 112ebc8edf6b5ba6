use std::io::Read;

use anyhow::Error;
use serde::{Deserialize, Serialize};

/// A single entry of a name table.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct NameRecord {
    pub id: u32,
    pub name: String,
}

/// The names behind the compact file and routine identifiers of a trace.
///
/// Identifiers are only meaningful together with the trace they were
/// produced with. `0` never appears in a table; it stands for "unknown".
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct TraceMetadata {
    pub files: Vec<NameRecord>,
    pub routines: Vec<NameRecord>,
}

impl TraceMetadata {
    pub fn new(files: Vec<NameRecord>, routines: Vec<NameRecord>) -> Self {
        Self { files, routines }
    }

    pub fn file_name(&self, id: u32) -> Option<&str> {
        Self::lookup(&self.files, id)
    }

    pub fn routine_name(&self, id: u32) -> Option<&str> {
        Self::lookup(&self.routines, id)
    }

    fn lookup(records: &[NameRecord], id: u32) -> Option<&str> {
        records
            .binary_search_by_key(&id, |record| record.id)
            .ok()
            .map(|idx| records[idx].name.as_str())
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(&self).map_err(Error::from)
    }

    pub fn from_json<R: Read>(reader: R) -> Result<Self, Error> {
        serde_json::from_reader(reader).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Error;

    use super::{NameRecord, TraceMetadata};

    fn records(names: &[&str]) -> Vec<NameRecord> {
        names
            .iter()
            .zip(1..)
            .map(|(name, id)| NameRecord {
                id,
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn metadata_json_roundtrip() -> Result<(), Error> {
        let metadata = TraceMetadata::new(
            records(&["main.c", "queue.c"]),
            records(&["main", "worker", "pthread_mutex_lock"]),
        );
        let json = metadata.to_json()?;
        assert_eq!(metadata, TraceMetadata::from_json(json.as_bytes())?);

        Ok(())
    }

    #[test]
    fn lookup_by_id() {
        let metadata = TraceMetadata::new(records(&["main.c"]), records(&["main", "worker"]));
        assert_eq!(metadata.file_name(1), Some("main.c"));
        assert_eq!(metadata.routine_name(2), Some("worker"));
        assert_eq!(metadata.routine_name(0), None);
        assert_eq!(metadata.file_name(7), None);
    }
}
