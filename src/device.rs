use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use evlog::meta;
use serde::{Deserialize, Serialize};

use crate::runtime::get_logger;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Cached anonymous token for this poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Selections submitted from this device, present once a vote was
    /// confirmed by the datastore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selections: Option<Vec<String>>,
}

/// Per-device keyed storage, one record per poll. This is the stand-in for
/// the browser's localStorage: used only for anonymous voters, and clearing
/// it allows re-voting (a documented limitation of weak anonymous identity).
pub struct DeviceStore {
    path: Option<PathBuf>,
    records: DashMap<String, DeviceRecord>,
}

impl DeviceStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: DashMap::new(),
        }
    }

    /// Opens a file-backed store. A missing file starts empty; an unreadable
    /// one is logged and discarded rather than failing the caller.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = DashMap::new();

        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, DeviceRecord>>(&raw) {
                Ok(loaded) => {
                    for (poll_id, record) in loaded {
                        records.insert(poll_id, record);
                    }
                }
                Err(e) => {
                    get_logger().info("Discarding unreadable device store file.", meta! {
                        "Path" => path.display(),
                        "Error" => e,
                    });
                }
            },
            Err(_) => {}
        }

        Self {
            path: Some(path),
            records,
        }
    }

    pub fn cached_identity(&self, poll_id: &str) -> Option<String> {
        self.records.get(poll_id).and_then(|r| r.identity.clone())
    }

    pub fn cache_identity(&self, poll_id: &str, token: &str) {
        self.records
            .entry(poll_id.to_owned())
            .or_insert_with(DeviceRecord::default)
            .identity = Some(token.to_owned());
        self.persist();
    }

    pub fn voted_selections(&self, poll_id: &str) -> Option<Vec<String>> {
        self.records.get(poll_id).and_then(|r| r.selections.clone())
    }

    pub fn has_voted(&self, poll_id: &str) -> bool {
        self.voted_selections(poll_id).is_some()
    }

    /// Records a confirmed vote; called only after the datastore write
    /// succeeded.
    pub fn mark_voted(&self, poll_id: &str, selections: &[String]) {
        self.records
            .entry(poll_id.to_owned())
            .or_insert_with(DeviceRecord::default)
            .selections = Some(selections.to_vec());
        self.persist();
    }

    fn persist(&self) {
        let path = match &self.path {
            None => return,
            Some(v) => v,
        };

        let snapshot: BTreeMap<String, DeviceRecord> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let raw = match serde_json::to_string_pretty(&snapshot) {
            Ok(v) => v,
            Err(e) => {
                get_logger().error_with_err("Failed to serialize device store.", &e, None);
                return;
            }
        };

        if let Err(e) = fs::write(path, raw) {
            get_logger().error_with_err("Failed to write device store file.", &e, None);
        }
    }
}
