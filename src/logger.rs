use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::EngineId;
use crate::error::{Error, Result};
use crate::event::Event;

/// Metadata about a run, stored alongside its NDJSON event log. Diagnostic
/// only — nothing in the bridge reads this back to resume a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SessionMeta {
    pub session_id: String,
    pub engine: String,
    pub thread_id: i64,
    pub prompt: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub success: bool,
}

/// Tees one run's events to an NDJSON file for post-mortem debugging.
///
/// Writes to a `.ndjson.tmp` file, atomically renamed to `.ndjson` on
/// [`finalize`]; if the process crashes mid-run the `.tmp` file and its
/// partial contents remain on disk.
pub struct SessionLogger {
    session_id: String,
    session_dir: PathBuf,
    writer: std::io::BufWriter<std::fs::File>,
    engine_id: EngineId,
    thread_id: i64,
    prompt: String,
    start_secs: u64,
}

impl SessionLogger {
    /// Create a logger for one run under `~/.local/share/takopi/sessions/`.
    pub fn new(session_id: &str, engine_id: EngineId, thread_id: i64, prompt: &str) -> Result<Self> {
        let session_dir = Self::sessions_dir()?;
        std::fs::create_dir_all(&session_dir)
            .map_err(|e| Error::Other(format!("failed to create session dir: {e}")))?;

        let tmp_path = session_dir.join(format!("{session_id}.ndjson.tmp"));
        let file = std::fs::File::create(&tmp_path)
            .map_err(|e| Error::Other(format!("failed to create session log: {e}")))?;

        let start_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Ok(Self {
            session_id: session_id.to_string(),
            session_dir,
            writer: std::io::BufWriter::new(file),
            engine_id,
            thread_id,
            prompt: prompt.to_string(),
            start_secs,
        })
    }

    /// Append one event as a line of NDJSON.
    pub fn log_event(&mut self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(json) => {
                if let Err(e) = writeln!(self.writer, "{json}") {
                    tracing::warn!("failed to write session log: {e}");
                }
            }
            Err(e) => {
                tracing::warn!("failed to serialize event for session log: {e}");
            }
        }
    }

    /// Flush, atomically rename the NDJSON file, and write the meta sidecar.
    pub fn finalize(&mut self, success: bool, duration_ms: Option<u64>) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!("failed to flush session log: {e}");
        }

        let tmp_path = self.session_dir.join(format!("{}.ndjson.tmp", self.session_id));
        let final_path = self.session_dir.join(format!("{}.ndjson", self.session_id));
        if let Err(e) = std::fs::rename(&tmp_path, &final_path) {
            tracing::warn!("failed to rename session log: {e}");
        }

        let meta = SessionMeta {
            session_id: self.session_id.clone(),
            engine: self.engine_id.to_string(),
            thread_id: self.thread_id,
            prompt: self.prompt.clone(),
            start_time: self.start_secs.to_string(),
            duration_ms,
            success,
        };

        let meta_path = self.session_dir.join(format!("{}.meta.json", self.session_id));
        if let Ok(json) = serde_json::to_string_pretty(&meta) {
            if let Err(e) = std::fs::write(&meta_path, json) {
                tracing::warn!("failed to write session metadata: {e}");
            }
        }
    }

    fn is_finalized(&self) -> bool {
        let tmp_path = self.session_dir.join(format!("{}.ndjson.tmp", self.session_id));
        !tmp_path.exists()
    }

    /// Default sessions directory: `~/.local/share/takopi/sessions/`.
    pub fn sessions_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|d| d.join("takopi").join("sessions"))
            .ok_or_else(|| Error::Other("cannot determine data directory".into()))
    }
}

impl Drop for SessionLogger {
    fn drop(&mut self) {
        if !self.is_finalized() {
            if let Err(e) = self.writer.flush() {
                tracing::warn!("SessionLogger dropped without finalize, flush failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CompletedEvent, Event};

    #[test]
    fn session_meta_round_trip() {
        let meta = SessionMeta {
            session_id: "test-123".into(),
            engine: "codex".into(),
            thread_id: 42,
            prompt: "fix the bug".into(),
            start_time: "1700000000".into(),
            duration_ms: Some(5000),
            success: true,
        };
        let json = serde_json::to_string(&meta).unwrap();
        let parsed: SessionMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id, "test-123");
        assert_eq!(parsed.thread_id, 42);
        assert!(parsed.success);
    }

    #[test]
    fn logger_writes_events_and_finalizes_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        let session_dir = tmp.path().join("sessions");
        std::fs::create_dir_all(&session_dir).unwrap();

        let tmp_path = session_dir.join("test-session.ndjson.tmp");
        let file = std::fs::File::create(&tmp_path).unwrap();

        let mut logger = SessionLogger {
            session_id: "test-session".into(),
            session_dir: session_dir.clone(),
            writer: std::io::BufWriter::new(file),
            engine_id: EngineId::new("codex").unwrap(),
            thread_id: 7,
            prompt: "test prompt".into(),
            start_secs: 1700000000,
        };

        let event = Event::Completed(CompletedEvent {
            engine_id: EngineId::new("codex").unwrap(),
            ok: true,
            answer: Some("Hello".into()),
            error: None,
            resume_token: None,
            timestamp_ms: 123456,
        });
        logger.log_event(&event);
        logger.finalize(true, Some(1000));

        let ndjson_path = session_dir.join("test-session.ndjson");
        let content = std::fs::read_to_string(&ndjson_path).unwrap();
        assert!(content.contains("Hello"));
        assert!(!tmp_path.exists());

        let meta_path = session_dir.join("test-session.meta.json");
        assert!(meta_path.exists());
        let meta_content = std::fs::read_to_string(&meta_path).unwrap();
        assert!(meta_content.contains("test-session"));
    }
}
