//! Recorded time-series streams.
//!
//! A [`ReplayStore`] holds `(time, value)` streams keyed by recordable id.
//! Record mode appends to it tick by tick; replay mode reads it back through
//! [`ReplayCursor`]s in place of live push producers. The store persists as
//! JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tickflow_core::{EngineTime, FlowError, Result, Value};

/// One recorded tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEntry {
    /// Engine time of the tick.
    pub time: EngineTime,
    /// Value written at that tick.
    pub value: Value,
}

/// In-memory record/replay streams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayStore {
    streams: BTreeMap<String, Vec<ReplayEntry>>,
}

impl ReplayStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tick to stream `id`. Times must not decrease.
    pub fn append(&mut self, id: &str, time: EngineTime, value: Value) -> Result<()> {
        let stream = self.streams.entry(id.to_string()).or_default();
        if let Some(last) = stream.last() {
            if time < last.time {
                return Err(FlowError::Replay {
                    recordable_id: id.to_string(),
                    cause: format!("time {} is before the last recorded time {}", time, last.time),
                });
            }
        }
        stream.push(ReplayEntry { time, value });
        Ok(())
    }

    /// Entries of stream `id`.
    pub fn series(&self, id: &str) -> Option<&[ReplayEntry]> {
        self.streams.get(id).map(Vec::as_slice)
    }

    /// Ids of all recorded streams.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Cursor over stream `id`, skipped to the first entry at or after `start`.
    pub fn cursor(&self, id: &str, start: EngineTime) -> Result<ReplayCursor> {
        let stream = self.streams.get(id).ok_or_else(|| FlowError::Replay {
            recordable_id: id.to_string(),
            cause: "no such stream".into(),
        })?;
        let first = stream.partition_point(|e| e.time < start);
        Ok(ReplayCursor {
            entries: stream[first..].to_vec(),
            position: 0,
        })
    }

    /// Entries of stream `id` strictly before `time`.
    pub fn entries_before(&self, id: &str, time: EngineTime) -> &[ReplayEntry] {
        match self.streams.get(id) {
            Some(stream) => &stream[..stream.partition_point(|e| e.time < time)],
            None => &[],
        }
    }

    /// Write the store as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FlowError::Serialization(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| FlowError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), streams = self.streams.len(), "Replay store saved");
        Ok(())
    }

    /// Read a store written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| FlowError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| FlowError::Serialization(e.to_string()))
    }
}

/// Forward-only reader over one recorded stream.
#[derive(Debug, Clone)]
pub struct ReplayCursor {
    entries: Vec<ReplayEntry>,
    position: usize,
}

impl ReplayCursor {
    /// Time of the next unread entry.
    pub fn peek_time(&self) -> Option<EngineTime> {
        self.entries.get(self.position).map(|e| e.time)
    }

    /// Take the next entry if it is due at or before `time`.
    pub fn next_due(&mut self, time: EngineTime) -> Option<Value> {
        let entry = self.entries.get(self.position)?;
        if entry.time > time {
            return None;
        }
        self.position += 1;
        Some(entry.value.clone())
    }

    /// Whether every entry has been read.
    pub fn is_exhausted(&self) -> bool {
        self.position >= self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn t(micros: i64) -> EngineTime {
        EngineTime::from_micros(micros)
    }

    #[test]
    fn append_rejects_time_going_backwards() {
        let mut store = ReplayStore::new();
        store.append("feed", t(10), Value::int(1)).unwrap();
        store.append("feed", t(10), Value::int(2)).unwrap();
        let err = store.append("feed", t(9), Value::int(3)).unwrap_err();
        assert_eq!(err.code(), "E601");
        assert_eq!(store.series("feed").unwrap().len(), 2);
    }

    #[test]
    fn cursor_skips_to_start() {
        let mut store = ReplayStore::new();
        for (time, value) in [(1, 10), (5, 50), (9, 90)] {
            store.append("feed", t(time), Value::int(value)).unwrap();
        }
        let mut cursor = store.cursor("feed", t(4)).unwrap();
        assert_eq!(cursor.peek_time(), Some(t(5)));
        assert_eq!(cursor.next_due(t(4)), None);
        assert_eq!(cursor.next_due(t(5)), Some(Value::int(50)));
        assert_eq!(cursor.next_due(t(100)), Some(Value::int(90)));
        assert!(cursor.is_exhausted());

        assert_eq!(store.entries_before("feed", t(5)).len(), 1);
        assert!(store.entries_before("missing", t(5)).is_empty());
        assert_eq!(store.cursor("missing", t(0)).unwrap_err().code(), "E601");
    }

    #[test]
    fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("replay.json");
        let mut store = ReplayStore::new();
        store.append("a", t(1), Value::from("x")).unwrap();
        store.append("b", t(2), Value::float(1.5)).unwrap();
        store.save(&path).unwrap();

        let loaded = ReplayStore::load(&path).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(loaded.ids().collect::<Vec<_>>(), vec!["a", "b"]);

        let err = ReplayStore::load(dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.code(), "E901");
    }
}
