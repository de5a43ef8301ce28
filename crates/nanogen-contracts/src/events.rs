use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

pub const GENERATION_STARTED: &str = "generation_started";
pub const ATTEMPT_FAILED: &str = "attempt_failed";
pub const ATTEMPT_SUCCEEDED: &str = "attempt_succeeded";
pub const GENERATION_FAILED: &str = "generation_failed";
pub const IMAGE_SAVED: &str = "image_saved";

/// Append-only JSONL event log for one run.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: PathBuf,
    run_id: String,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event line and returns the event as written.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = EventPayload::from_iter([
            ("type".to_string(), Value::from(event_type)),
            ("run_id".to_string(), Value::from(self.run_id.as_str())),
            ("ts".to_string(), Value::from(now_utc_iso())),
        ]);
        event.extend(payload);

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        self.append(line.as_bytes())?;
        Ok(Value::Object(event))
    }

    // One write per line.
    fn append(&self, line: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line))
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }
}

/// Builds a payload from `(key, value)` pairs.
pub fn payload<I, K>(pairs: I) -> EventPayload
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect()
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
