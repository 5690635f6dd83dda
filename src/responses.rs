//! Canned response tables loaded from JSON resource files.

use rand::Rng;
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Fallback when the busy table is missing. The bot must answer something
/// on this path.
const DEFAULT_BUSY: &str = "Hang on, my hands are full right now. Back in a bit!";

#[derive(Deserialize)]
struct BusyFile {
    responses: Vec<String>,
}

#[derive(Deserialize)]
struct AttachmentFile {
    reactions: Vec<String>,
}

/// Static reply tables: busy/fallback lines and attachment reactions.
pub struct ResponseTables {
    busy: Vec<String>,
    attachment: Vec<String>,
}

impl ResponseTables {
    /// Load tables from a resources directory. A missing or malformed file
    /// leaves that table empty; it never stops startup.
    pub fn load<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            busy: load_list(&dir.join("busy_responses.json"), |f: BusyFile| f.responses),
            attachment: load_list(&dir.join("attachment_responses.json"), |f: AttachmentFile| {
                f.reactions
            }),
        }
    }

    /// A random busy line; falls back to a default so this never goes quiet.
    pub fn busy_line(&self) -> &str {
        pick(&self.busy).unwrap_or(DEFAULT_BUSY)
    }

    /// A random attachment reaction, or `None` when the table is empty —
    /// the one case the bot is allowed to skip silently.
    pub fn attachment_line(&self) -> Option<&str> {
        pick(&self.attachment)
    }
}

fn pick(lines: &[String]) -> Option<&str> {
    if lines.is_empty() {
        return None;
    }
    let idx = rand::rng().random_range(0..lines.len());
    Some(&lines[idx])
}

fn load_list<F, T>(path: &Path, extract: fn(F) -> Vec<T>) -> Vec<T>
where
    F: serde::de::DeserializeOwned,
{
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) => {
            warn!("No response table at {:?}: {e}", path);
            return Vec::new();
        }
    };

    match serde_json::from_str(&json) {
        Ok(file) => extract(file),
        Err(e) => {
            warn!("Malformed response table {:?}: {e}", path);
            Vec::new()
        }
    }
}
