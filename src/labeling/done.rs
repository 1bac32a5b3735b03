//! Record ids already labeled in a batch output stream.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::Value;

use crate::model::Rid;

/// Ids present in a `seeds_*.jsonl` stream. Loaded once per batch run and
/// consulted before every model call, which makes re-runs resumable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoneSet {
    ids: HashSet<Rid>,
}

impl DoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect `rid`s from an output stream. Lines that do not parse or lack
    /// an integer `rid` are ignored.
    pub fn from_reader(reader: impl BufRead) -> std::io::Result<Self> {
        let mut done = Self::new();
        for line in reader.lines() {
            let line = line?;
            if let Some(rid) = serde_json::from_str::<Value>(&line)
                .ok()
                .and_then(|v| v.get("rid").and_then(Value::as_i64))
            {
                done.insert(rid);
            }
        }
        Ok(done)
    }

    /// Load from `path`; a missing file is an empty set.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match File::open(path) {
            Ok(file) => Self::from_reader(BufReader::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.ids.contains(&rid)
    }

    pub fn insert(&mut self, rid: Rid) -> bool {
        self.ids.insert(rid)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<Rid> for DoneSet {
    fn from_iter<I: IntoIterator<Item = Rid>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
