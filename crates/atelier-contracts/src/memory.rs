use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AtelierError, AtelierResult};
use crate::events::{append_line, now_utc_iso};

/// A creation as handed to [`MemoryStore::store_creation`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewCreation {
    pub user_prompt: String,
    pub enhanced_prompt: String,
    pub image_path: Option<String>,
    pub model_path: Option<String>,
    pub metadata: Map<String, Value>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationRecord {
    pub id: String,
    pub timestamp: String,
    pub user_prompt: String,
    pub enhanced_prompt: String,
    pub image_path: Option<String>,
    pub model_path: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CreationRecord {
    fn matches(&self, needle: &str) -> bool {
        self.user_prompt.to_lowercase().contains(needle)
            || self.enhanced_prompt.to_lowercase().contains(needle)
            || self
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(needle))
    }
}

/// Long-term memory of past creations.
pub trait MemoryStore: Send + Sync {
    fn store_creation(&self, creation: NewCreation) -> AtelierResult<CreationRecord>;
    fn get(&self, id: &str) -> AtelierResult<Option<CreationRecord>>;
    /// Newest first.
    fn recent(&self, limit: usize) -> AtelierResult<Vec<CreationRecord>>;
    /// Case-insensitive substring match over both prompts and tags, newest first.
    fn search(&self, query: &str, limit: usize) -> AtelierResult<Vec<CreationRecord>>;

    /// One `Previous creation` line per match; empty when nothing matches.
    fn context_for(&self, query: Option<&str>, limit: usize) -> AtelierResult<String> {
        let creations = match query.map(str::trim).filter(|value| !value.is_empty()) {
            Some(query) => self.search(query, limit)?,
            None => self.recent(limit)?,
        };
        Ok(creations
            .iter()
            .map(|creation| {
                format!(
                    "Previous creation: '{}' - Enhanced as: '{}'",
                    creation.user_prompt, creation.enhanced_prompt
                )
            })
            .collect::<Vec<String>>()
            .join("\n"))
    }
}

/// Append-only JSON-lines memory. One record per line, written with a single
/// append under the store lock.
#[derive(Debug)]
pub struct JsonlMemoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlMemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!(path = %path.display(), "memory store opened");
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_all(&self) -> AtelierResult<Vec<CreationRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AtelierError::Memory(format!(
                    "failed reading {}: {err}",
                    self.path.display()
                )))
            }
        };
        let mut records = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CreationRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(line = idx + 1, error = %err, "skipping unreadable memory record"),
            }
        }
        Ok(records)
    }

    fn newest_first(&self) -> AtelierResult<Vec<CreationRecord>> {
        let mut records = self.load_all()?;
        records.reverse();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

impl MemoryStore for JsonlMemoryStore {
    fn store_creation(&self, creation: NewCreation) -> AtelierResult<CreationRecord> {
        let record = CreationRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: now_utc_iso(),
            user_prompt: creation.user_prompt,
            enhanced_prompt: creation.enhanced_prompt,
            image_path: creation.image_path,
            model_path: creation.model_path,
            metadata: creation.metadata,
            tags: creation.tags,
        };
        let line = serde_json::to_string(&record)
            .map_err(|err| AtelierError::Memory(format!("failed to serialize creation: {err}")))?;
        append_line(&self.path, &self.lock, &line)
            .map_err(|err| AtelierError::Memory(format!("{err:#}")))?;
        debug!(id = %record.id, "creation stored");
        Ok(record)
    }

    fn get(&self, id: &str) -> AtelierResult<Option<CreationRecord>> {
        Ok(self.load_all()?.into_iter().find(|record| record.id == id))
    }

    fn recent(&self, limit: usize) -> AtelierResult<Vec<CreationRecord>> {
        Ok(self.newest_first()?.into_iter().take(limit).collect())
    }

    fn search(&self, query: &str, limit: usize) -> AtelierResult<Vec<CreationRecord>> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .newest_first()?
            .into_iter()
            .filter(|record| record.matches(&needle))
            .take(limit)
            .collect())
    }
}
