//! Per-guild daily usage counters, one JSON file per guild.
//!
//! Each file maps an ISO date string to the number of admitted requests on
//! that day. Old dates are never pruned; the file just accumulates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// On-disk store of per-guild daily counters.
pub struct GuildCounterStore {
    dir: PathBuf,
}

impl GuildCounterStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Today's date key, e.g. "2026-08-08".
    pub fn today() -> String {
        chrono::Local::now().format("%Y-%m-%d").to_string()
    }

    fn path(&self, guild_id: u64) -> PathBuf {
        self.dir.join(format!("guild_data_{guild_id}.json"))
    }

    /// Load a guild's counter map. A missing or unreadable file is empty
    /// state, not an error: the guild simply starts the day at zero.
    fn load(&self, guild_id: u64) -> HashMap<String, u32> {
        let path = self.path(guild_id);
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(_) => return HashMap::new(),
        };

        match serde_json::from_str(&json) {
            Ok(counts) => counts,
            Err(e) => {
                warn!("Malformed counter file {:?}, resetting: {e}", path);
                HashMap::new()
            }
        }
    }

    /// The admitted-request count for a guild on the given date.
    pub fn count(&self, guild_id: u64, date: &str) -> u32 {
        self.load(guild_id).get(date).copied().unwrap_or(0)
    }

    /// Increment the counter for a guild on the given date and persist the
    /// file. Returns the new count.
    pub fn increment(&self, guild_id: u64, date: &str) -> Result<u32, String> {
        let mut counts = self.load(guild_id);
        let count = counts.entry(date.to_string()).or_insert(0);
        *count += 1;
        let new_count = *count;

        let json = serde_json::to_string(&counts)
            .map_err(|e| format!("Failed to serialize counters: {e}"))?;
        std::fs::write(self.path(guild_id), json)
            .map_err(|e| format!("Failed to write counter file: {e}"))?;

        Ok(new_count)
    }
}
