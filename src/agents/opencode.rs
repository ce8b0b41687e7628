use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineOverride, PermissionMode};
use crate::engine::{self, EngineId};
use crate::error::Result;
use crate::event::{
    ActionCompletedEvent, ActionStartedEvent, ActionStatus, CompletedEvent, Event, StartedEvent,
};
use crate::process::{spawn_and_stream, SpawnSpec};
use crate::runner::{EventStream, ResumeToken, Runner};

/// Adapter for OpenCode CLI (`opencode` binary).
///
/// Headless invocation:
///   opencode run --format json [--continue <session_id>] "<prompt>"
///
/// `run` is non-interactive and auto-approves tool use. With `--format json`
/// output is NDJSON with event types `step_start`/`text`/`tool_use`/`step_finish`.
pub struct OpenCodeRunner {
    id: EngineId,
    work_dir: PathBuf,
    override_: EngineOverride,
}

impl OpenCodeRunner {
    pub fn new(work_dir: PathBuf, override_: EngineOverride) -> Self {
        Self {
            id: EngineId::new(engine::OPENCODE).unwrap(),
            work_dir,
            override_,
        }
    }

    fn build_args(&self, prompt: &str, resume: Option<&ResumeToken>) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--format".to_string(), "json".to_string()];

        if let Some(token) = resume {
            if let Some(ref session_id) = token.session_id {
                args.push("--continue".to_string());
                args.push(session_id.clone());
            }
        }

        if let Some(ref model) = self.override_.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        match self.override_.permission_mode() {
            PermissionMode::FullAccess => {}
            PermissionMode::ReadOnly => {
                args.push("--agent".to_string());
                args.push("plan".to_string());
            }
        }

        args.extend(self.override_.extra_args.iter().cloned());
        args.push(prompt.to_string());
        args
    }
}

#[async_trait]
impl Runner for OpenCodeRunner {
    fn engine_id(&self) -> &EngineId {
        &self.id
    }

    fn is_available(&self) -> bool {
        engine::is_available(&self.id, self.override_.binary.as_deref())
    }

    fn resolve_resume(&self, text: &str) -> Option<ResumeToken> {
        text.lines().find_map(|line| {
            let trimmed = line.trim();
            let rest = trimmed.strip_prefix("opencode --continue ")?;
            let session_id = rest.split_whitespace().next()?;
            Some(
                ResumeToken::new(self.id.clone(), trimmed.to_string())
                    .with_session_id(session_id.to_string()),
            )
        })
    }

    async fn run(
        &self,
        prompt: &str,
        resume: Option<ResumeToken>,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let binary = engine::resolve_binary(&self.id, self.override_.binary.as_deref())?;
        let args = self.build_args(prompt, resume.as_ref());
        let spec = SpawnSpec {
            engine_id: self.id.clone(),
            binary,
            args,
            env: vec![],
            cwd: self.work_dir.clone(),
            stdin_prompt: None,
        };

        spawn_and_stream(spec, parse_opencode_line, cancel).await
    }
}

fn parse_opencode_line(line: &str) -> Vec<Event> {
    let engine_id = EngineId::new(engine::OPENCODE).unwrap();
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            // OpenCode may emit non-JSON progress chatter on stdout; surface it
            // as a loose action note rather than treating it as fatal.
            return vec![Event::Action(crate::event::ActionEvent {
                engine_id,
                text: line.to_string(),
                resume_token: None,
                timestamp_ms: 0,
            })];
        }
    };

    let Some(event_type) = value.get("type").and_then(|v| v.as_str()) else {
        return vec![];
    };

    match event_type {
        "step_start" => {
            let session_id = value.get("sessionID").and_then(|v| v.as_str());
            let resume_token = session_id.map(|sid| {
                ResumeToken::new(engine_id.clone(), format!("opencode --continue {sid}"))
                    .with_session_id(sid.to_string())
            });
            vec![Event::Started(StartedEvent {
                engine_id,
                resume_known: resume_token.is_some(),
                resume_token,
                timestamp_ms: 0,
            })]
        }

        "text" => {
            let text = value.pointer("/part/text").and_then(|v| v.as_str()).unwrap_or("");
            if text.is_empty() {
                return vec![];
            }
            vec![Event::Action(crate::event::ActionEvent {
                engine_id,
                text: text.to_string(),
                resume_token: None,
                timestamp_ms: 0,
            })]
        }

        "tool_use" => {
            let Some(part) = value.get("part") else { return vec![] };
            let id = part.get("callID").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
            let tool = part.get("tool").and_then(|v| v.as_str()).unwrap_or("tool").to_string();
            let state = part.get("state");
            let status = state.and_then(|s| s.get("status")).and_then(|v| v.as_str()).unwrap_or("completed");
            let ok = status == "completed";
            let detail = state
                .and_then(|s| s.get("output"))
                .and_then(|v| v.as_str())
                .map(String::from);

            vec![
                Event::ActionStarted(ActionStartedEvent {
                    engine_id: engine_id.clone(),
                    id: id.clone(),
                    kind: "tool".to_string(),
                    title: tool,
                    resume_token: None,
                    timestamp_ms: 0,
                }),
                Event::ActionCompleted(ActionCompletedEvent {
                    engine_id,
                    id,
                    status: if ok { ActionStatus::Done } else { ActionStatus::Error },
                    detail,
                    resume_token: None,
                    timestamp_ms: 0,
                }),
            ]
        }

        "step_finish" => {
            let Some(part) = value.get("part") else { return vec![] };
            let reason = part.get("reason").and_then(|v| v.as_str()).unwrap_or("");
            if reason != "stop" {
                return vec![];
            }
            vec![Event::Completed(CompletedEvent {
                engine_id,
                ok: true,
                answer: None,
                error: None,
                resume_token: None,
                timestamp_ms: 0,
            })]
        }

        "error" => {
            let message = value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();
            vec![Event::Completed(CompletedEvent {
                engine_id,
                ok: false,
                answer: None,
                error: Some(message),
                resume_token: None,
                timestamp_ms: 0,
            })]
        }

        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_step_start_emits_resume_token() {
        let line = r#"{"type":"step_start","sessionID":"ses_abc123"}"#;
        let events = parse_opencode_line(line);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Started(s) if s.resume_known));
    }

    #[test]
    fn parse_text_as_action() {
        let line = r#"{"type":"text","part":{"text":"Hello world"}}"#;
        let events = parse_opencode_line(line);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Action(a) if a.text == "Hello world"));
    }

    #[test]
    fn parse_tool_use_emits_started_then_completed() {
        let line = r#"{"type":"tool_use","part":{"callID":"toolu_01","tool":"bash","state":{"status":"completed","output":"file.txt"}}}"#;
        let events = parse_opencode_line(line);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::ActionStarted(a) if a.id == "toolu_01" && a.title == "bash"));
        assert!(matches!(&events[1], Event::ActionCompleted(a) if a.status == ActionStatus::Done));
    }

    #[test]
    fn parse_step_finish_stop_completes_run() {
        let line = r#"{"type":"step_finish","part":{"reason":"stop"}}"#;
        let events = parse_opencode_line(line);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Completed(c) if c.ok));
    }

    #[test]
    fn parse_step_finish_tool_calls_emits_nothing() {
        let line = r#"{"type":"step_finish","part":{"reason":"tool-calls"}}"#;
        assert!(parse_opencode_line(line).is_empty());
    }

    #[test]
    fn non_json_line_becomes_action_note() {
        let events = parse_opencode_line("Processing your request...");
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Action(a) if a.text == "Processing your request..."));
    }

    #[test]
    fn build_args_read_only_adds_plan_agent() {
        let mut override_ = EngineOverride::default();
        override_.permission_mode = Some(PermissionMode::ReadOnly);
        let runner = OpenCodeRunner::new(PathBuf::from("."), override_);
        let args = runner.build_args("analyze", None);
        assert!(args.contains(&"--agent".to_string()));
        assert!(args.contains(&"plan".to_string()));
        assert_eq!(args.last().unwrap(), "analyze");
    }
}
