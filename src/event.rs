use serde::{Deserialize, Serialize};

use crate::engine::EngineId;
use crate::runner::ResumeToken;

/// Returns the current epoch time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Status of a single action within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Done,
    Warning,
    Error,
}

/// Unified event stream — the common language spoken by every engine adapter.
///
/// Every adapter translates its native JSONL dialect into this enum so that
/// consumers (the tracker, the session logger) only need to handle one set of
/// types regardless of which engine produced them. Every variant carries the
/// owning `engine_id`; once a resume token has been observed it is attached to
/// every subsequent event for the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The engine session has been initialized.
    Started(StartedEvent),

    /// A loose, unstructured progress note (no action id).
    Action(ActionEvent),

    /// A new tracked action has begun.
    ActionStarted(ActionStartedEvent),

    /// An existing action's fields were patched.
    ActionUpdated(ActionUpdatedEvent),

    /// A tracked action reached a terminal status.
    ActionCompleted(ActionCompletedEvent),

    /// The run has finished — exactly one per run, always last.
    Completed(CompletedEvent),
}

impl Event {
    /// Stamp the event with the current wall-clock time (epoch ms).
    pub fn stamp(self) -> Self {
        let ts = now_ms();
        match self {
            Event::Started(mut e) => {
                e.timestamp_ms = ts;
                Event::Started(e)
            }
            Event::Action(mut e) => {
                e.timestamp_ms = ts;
                Event::Action(e)
            }
            Event::ActionStarted(mut e) => {
                e.timestamp_ms = ts;
                Event::ActionStarted(e)
            }
            Event::ActionUpdated(mut e) => {
                e.timestamp_ms = ts;
                Event::ActionUpdated(e)
            }
            Event::ActionCompleted(mut e) => {
                e.timestamp_ms = ts;
                Event::ActionCompleted(e)
            }
            Event::Completed(mut e) => {
                e.timestamp_ms = ts;
                Event::Completed(e)
            }
        }
    }

    /// The engine that produced this event.
    pub fn engine_id(&self) -> &EngineId {
        match self {
            Event::Started(e) => &e.engine_id,
            Event::Action(e) => &e.engine_id,
            Event::ActionStarted(e) => &e.engine_id,
            Event::ActionUpdated(e) => &e.engine_id,
            Event::ActionCompleted(e) => &e.engine_id,
            Event::Completed(e) => &e.engine_id,
        }
    }

    /// The resume token carried by this event, if any has been observed yet.
    pub fn resume_token(&self) -> Option<&ResumeToken> {
        match self {
            Event::Started(e) => e.resume_token.as_ref(),
            Event::Action(e) => e.resume_token.as_ref(),
            Event::ActionStarted(e) => e.resume_token.as_ref(),
            Event::ActionUpdated(e) => e.resume_token.as_ref(),
            Event::ActionCompleted(e) => e.resume_token.as_ref(),
            Event::Completed(e) => e.resume_token.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartedEvent {
    pub engine_id: EngineId,
    /// Whether a resume token was supplied for this run (not whether one was
    /// discovered — that's reflected by `resume_token` becoming `Some`).
    pub resume_known: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<ResumeToken>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionEvent {
    pub engine_id: EngineId,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<ResumeToken>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionStartedEvent {
    pub engine_id: EngineId,
    pub id: String,
    pub kind: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<ResumeToken>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionUpdatedEvent {
    pub engine_id: EngineId,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<ResumeToken>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionCompletedEvent {
    pub engine_id: EngineId,
    pub id: String,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<ResumeToken>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedEvent {
    pub engine_id: EngineId,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<ResumeToken>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Started(e) => write!(f, "[started] engine={}", e.engine_id),
            Event::Action(e) => write!(f, "[action] {}", e.text),
            Event::ActionStarted(e) => write!(f, "[action:start] {} ({})", e.title, e.kind),
            Event::ActionUpdated(e) => write!(f, "[action:update] {}", e.id),
            Event::ActionCompleted(e) => write!(f, "[action:{:?}] {}", e.status, e.id),
            Event::Completed(e) => {
                let status = if e.ok { "ok" } else { "error" };
                write!(f, "[completed:{status}]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_sets_timestamp() {
        let event = Event::Started(StartedEvent {
            engine_id: EngineId::new("mock").unwrap(),
            resume_known: false,
            resume_token: None,
            timestamp_ms: 0,
        });
        let stamped = event.stamp();
        assert!(matches!(stamped, Event::Started(e) if e.timestamp_ms > 0));
    }

    #[test]
    fn engine_id_accessor_covers_all_variants() {
        let engine = EngineId::new("codex").unwrap();
        let events = vec![
            Event::Started(StartedEvent {
                engine_id: engine.clone(),
                resume_known: false,
                resume_token: None,
                timestamp_ms: 0,
            }),
            Event::Completed(CompletedEvent {
                engine_id: engine.clone(),
                ok: true,
                answer: None,
                error: None,
                resume_token: None,
                timestamp_ms: 0,
            }),
        ];
        for e in &events {
            assert_eq!(e.engine_id(), &engine);
        }
    }
}
