//! Persistent check-value store.
//!
//! One JSON file in the build directory mapping resource name to the
//! last probed value and when it was recorded. Loaded once at start,
//! flushed at completion with write-to-temp-then-rename so a crash
//! mid-run never corrupts committed entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use mason_core::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreEntry {
    pub value: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of comparing a fresh probe value against the store.
#[derive(Clone, Copy, Debug)]
pub struct ProbeOutcome {
    pub changed: bool,
    pub recorded_at: DateTime<Utc>,
}

pub struct CheckStore {
    path: PathBuf,
    entries: HashMap<String, StoreEntry>,
    dirty: bool,
}

impl CheckStore {
    /// Load the store from `path`. Missing or corrupt files start empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path).await {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt check store, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        debug!(path = %path.display(), entries = entries.len(), "check store loaded");
        Self {
            path,
            entries,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&StoreEntry> {
        self.entries.get(name)
    }

    /// Compare `current` against the stored value for `name`. A new or
    /// differing value is recorded at `now` and marks the store dirty;
    /// an unchanged value reports the original recording time.
    pub fn probe_and_update(
        &mut self,
        name: &str,
        current: serde_json::Value,
        now: DateTime<Utc>,
    ) -> ProbeOutcome {
        match self.entries.get(name) {
            Some(entry) if entry.value == current => ProbeOutcome {
                changed: false,
                recorded_at: entry.recorded_at,
            },
            _ => {
                self.entries.insert(
                    name.to_string(),
                    StoreEntry {
                        value: current,
                        recorded_at: now,
                    },
                );
                self.dirty = true;
                ProbeOutcome {
                    changed: true,
                    recorded_at: now,
                }
            }
        }
    }

    /// Write the store out if anything changed. Temp-then-rename in the
    /// same directory keeps already-committed entries intact on a crash.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).await?;
            }
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .expect("check store entries serialize");
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        self.dirty = false;
        debug!(path = %self.path.display(), entries = self.entries.len(), "check store flushed");
        Ok(())
    }
}
