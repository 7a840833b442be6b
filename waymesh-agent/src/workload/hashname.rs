//! Stable string-to-u32 identity assignment. The packet-path tables key
//! on compact ids while discovery speaks in resource names; this mapping
//! bridges the two and survives restarts through a yaml snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::error;

pub struct HashName {
    str_to_num: ahash::HashMap<String, u32>,
    num_to_str: ahash::HashMap<u32, String>,
    next_id: u32,
    snapshot_path: PathBuf,
}

impl HashName {
    /// Loads the snapshot at `path`, starting empty when it is missing or
    /// unreadable. An unreadable snapshot only costs a full
    /// reconciliation on the next restart.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let snapshot_path = path.into();
        let entries = match fs::read_to_string(&snapshot_path) {
            Ok(raw) => match serde_yaml::from_str::<BTreeMap<String, u32>>(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    error!(path = %snapshot_path.display(), %err, "hash-name snapshot is unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                error!(path = %snapshot_path.display(), %err, "failed to read hash-name snapshot, starting empty");
                BTreeMap::new()
            }
        };

        let next_id = entries.values().max().map(|max| max + 1).unwrap_or(1);
        let mut str_to_num = ahash::HashMap::default();
        let mut num_to_str = ahash::HashMap::default();
        for (name, id) in entries {
            str_to_num.insert(name.clone(), id);
            num_to_str.insert(id, name);
        }

        Self {
            str_to_num,
            num_to_str,
            next_id,
            snapshot_path,
        }
    }

    /// Returns the id assigned to `name`, allocating one on first sight.
    /// Allocation persists the snapshot; a persistence failure is logged
    /// and the in-memory assignment stands.
    pub fn str_to_num(&mut self, name: &str) -> u32 {
        if let Some(id) = self.str_to_num.get(name) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.str_to_num.insert(name.to_string(), id);
        self.num_to_str.insert(id, name.to_string());
        self.persist();
        id
    }

    pub fn num_to_str(&self, id: u32) -> Option<&str> {
        self.num_to_str.get(&id).map(String::as_str)
    }

    pub fn delete(&mut self, name: &str) {
        if let Some(id) = self.str_to_num.remove(name) {
            self.num_to_str.remove(&id);
            self.persist();
        }
    }

    /// Snapshot of the mapping, sorted by name, for the reconciliation
    /// sweep.
    pub fn entries(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<(String, u32)> = self
            .str_to_num
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        entries.sort();
        entries
    }

    fn persist(&self) {
        let entries: BTreeMap<&str, u32> = self
            .str_to_num
            .iter()
            .map(|(name, id)| (name.as_str(), *id))
            .collect();
        let raw = match serde_yaml::to_string(&entries) {
            Ok(raw) => raw,
            Err(err) => {
                error!(%err, "failed to serialize hash-name snapshot");
                return;
            }
        };
        // write-then-rename keeps the snapshot whole under a crash
        let tmp = self.snapshot_path.with_extension("tmp");
        if let Err(err) = fs::write(&tmp, raw).and_then(|()| fs::rename(&tmp, &self.snapshot_path))
        {
            error!(path = %self.snapshot_path.display(), %err, "failed to persist hash-name snapshot");
        }
    }
}
