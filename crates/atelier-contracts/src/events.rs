use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

pub const PIPELINE_STARTED: &str = "pipeline_started";
pub const STAGE_ENTERED: &str = "stage_entered";
pub const CONTEXT_RESOLVED: &str = "context_resolved";
pub const PROMPT_ENHANCED: &str = "prompt_enhanced";
pub const ARTIFACT_CREATED: &str = "artifact_created";
pub const GENERATION_FAILED: &str = "generation_failed";
pub const MEMORY_WRITTEN: &str = "memory_written";
pub const MEMORY_WRITE_FAILED: &str = "memory_write_failed";
pub const PIPELINE_FINISHED: &str = "pipeline_finished";

/// Append-only `events.jsonl` journal for pipeline runs.
///
/// Every line carries `type`, `run_id` and `ts`; the caller payload is merged
/// after those and may not override them. Clones share one lock so lines from
/// concurrent pipelines never interleave.
#[derive(Debug, Clone)]
pub struct RunJournal {
    inner: Arc<RunJournalInner>,
}

#[derive(Debug)]
struct RunJournalInner {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RunJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RunJournalInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn emit(
        &self,
        run_id: &str,
        event_type: &str,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        let mut event = Map::new();
        for (key, value) in payload {
            event.insert(key, value);
        }
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("run_id".to_string(), Value::String(run_id.to_string()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));

        let line = serde_json::to_string(&event)?;
        append_line(&self.inner.path, &self.inner.lock, &line)?;
        Ok(Value::Object(event))
    }
}

/// Appends `line` plus a newline with a single `write_all` while holding `lock`.
pub(crate) fn append_line(path: &Path, lock: &Mutex<()>, line: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut record = String::with_capacity(line.len() + 1);
    record.push_str(line);
    record.push('\n');

    let _guard = lock
        .lock()
        .map_err(|_| anyhow::anyhow!("journal lock poisoned"))?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(record.as_bytes())?;
    Ok(())
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let journal = RunJournal::new(&path);

        let mut payload = EventPayload::new();
        payload.insert("stage".to_string(), Value::String("image_generation".to_string()));
        let emitted = journal.emit("run-123", STAGE_ENTERED, payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String(STAGE_ENTERED.to_string()));
        assert_eq!(parsed["run_id"], Value::String("run-123".to_string()));
        assert_eq!(parsed["stage"], Value::String("image_generation".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_cannot_spoof_envelope_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let journal = RunJournal::new(temp.path().join("events.jsonl"));

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        payload.insert("run_id".to_string(), Value::String("other".to_string()));
        let emitted = journal.emit("run-123", PIPELINE_STARTED, payload)?;

        assert_eq!(emitted["type"], Value::String(PIPELINE_STARTED.to_string()));
        assert_eq!(emitted["run_id"], Value::String("run-123".to_string()));
        Ok(())
    }

    #[test]
    fn concurrent_emitters_produce_whole_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let journal = RunJournal::new(&path);

        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let journal = journal.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        let run_id = format!("run-{idx}");
                        let _ = journal.emit(&run_id, STAGE_ENTERED, EventPayload::new());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().map_err(|_| anyhow::anyhow!("emitter panicked"))?;
        }

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 80);
        for line in lines {
            let parsed: Value = serde_json::from_str(line)?;
            assert_eq!(parsed["type"], Value::String(STAGE_ENTERED.to_string()));
        }
        Ok(())
    }
}
