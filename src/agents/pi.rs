use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::EngineOverride;
use crate::engine::{self, EngineId};
use crate::error::Result;
use crate::event::{
    ActionCompletedEvent, ActionStartedEvent, ActionStatus, CompletedEvent, Event, StartedEvent,
};
use crate::process::{spawn_and_stream, SpawnSpec};
use crate::runner::{EventStream, ResumeToken, Runner};

/// Adapter for the Pi CLI (`pi` binary).
///
/// Headless invocation:
///   pi --print --mode json [--session <path>] "<prompt>"
///
/// Stream format: NDJSON with event types `session`/`message`/`tool_call`/
/// `tool_result`/`done`.
pub struct PiRunner {
    id: EngineId,
    work_dir: PathBuf,
    override_: EngineOverride,
}

impl PiRunner {
    pub fn new(work_dir: PathBuf, override_: EngineOverride) -> Self {
        Self {
            id: EngineId::new(engine::PI).unwrap(),
            work_dir,
            override_,
        }
    }

    fn build_args(&self, prompt: &str, resume: Option<&ResumeToken>) -> Vec<String> {
        let mut args = vec!["--print".to_string(), "--mode".to_string(), "json".to_string()];

        if let Some(token) = resume {
            if let Some(ref session_path) = token.session_path {
                args.push("--session".to_string());
                args.push(session_path.clone());
            }
        }

        if let Some(ref model) = self.override_.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        args.extend(self.override_.extra_args.iter().cloned());
        args.push(prompt.to_string());
        args
    }
}

#[async_trait]
impl Runner for PiRunner {
    fn engine_id(&self) -> &EngineId {
        &self.id
    }

    fn is_available(&self) -> bool {
        engine::is_available(&self.id, self.override_.binary.as_deref())
    }

    fn resolve_resume(&self, text: &str) -> Option<ResumeToken> {
        text.lines().find_map(|line| {
            let trimmed = line.trim();
            let rest = trimmed.strip_prefix("pi --session ")?;
            let path = rest.split_whitespace().next()?;
            Some(
                ResumeToken::new(self.id.clone(), trimmed.to_string())
                    .with_session_path(path.to_string()),
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

        spawn_and_stream(spec, parse_pi_line, cancel).await
    }
}

fn parse_pi_line(line: &str) -> Vec<Event> {
    let engine_id = EngineId::new(engine::PI).unwrap();
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return vec![Event::Completed(CompletedEvent {
                engine_id,
                ok: false,
                answer: None,
                error: Some(format!("failed to translate engine output: {e}")),
                resume_token: None,
                timestamp_ms: 0,
            })]
        }
    };

    let Some(event_type) = value.get("type").and_then(|v| v.as_str()) else {
        return vec![];
    };

    match event_type {
        "session" => {
            let path = value.get("path").and_then(|v| v.as_str());
            let resume_token = path.map(|p| {
                ResumeToken::new(engine_id.clone(), format!("pi --session {p}")).with_session_path(p.to_string())
            });
            vec![Event::Started(StartedEvent {
                engine_id,
                resume_known: resume_token.is_some(),
                resume_token,
                timestamp_ms: 0,
            })]
        }

        "message" => {
            let text = value.get("text").and_then(|v| v.as_str()).unwrap_or("");
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

        "tool_call" => {
            let id = value.get("id").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
            let name = value.get("name").and_then(|v| v.as_str()).unwrap_or("tool").to_string();
            vec![Event::ActionStarted(ActionStartedEvent {
                engine_id,
                id,
                kind: "tool".to_string(),
                title: name,
                resume_token: None,
                timestamp_ms: 0,
            })]
        }

        "tool_result" => {
            let id = value.get("id").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
            let ok = value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true);
            let detail = value.get("output").and_then(|v| v.as_str()).map(String::from);
            vec![Event::ActionCompleted(ActionCompletedEvent {
                engine_id,
                id,
                status: if ok { ActionStatus::Done } else { ActionStatus::Error },
                detail,
                resume_token: None,
                timestamp_ms: 0,
            })]
        }

        "done" => {
            let ok = value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true);
            let answer = value.get("answer").and_then(|v| v.as_str()).map(String::from);
            let error = value.get("error").and_then(|v| v.as_str()).map(String::from);
            vec![Event::Completed(CompletedEvent {
                engine_id,
                ok,
                answer,
                error,
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
    fn parse_session_emits_resume_token_with_path() {
        let line = r#"{"type":"session","path":"/tmp/pi-session-1.json"}"#;
        let events = parse_pi_line(line);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Started(s) => {
                assert_eq!(
                    s.resume_token.as_ref().unwrap().session_path.as_deref(),
                    Some("/tmp/pi-session-1.json")
                );
            }
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[test]
    fn parse_tool_call_and_result() {
        let started = parse_pi_line(r#"{"type":"tool_call","id":"t1","name":"grep"}"#);
        assert!(matches!(&started[0], Event::ActionStarted(a) if a.title == "grep"));
        let completed = parse_pi_line(r#"{"type":"tool_result","id":"t1","ok":true,"output":"match"}"#);
        assert!(matches!(&completed[0], Event::ActionCompleted(a) if a.status == ActionStatus::Done));
    }

    #[test]
    fn parse_done_failure() {
        let line = r#"{"type":"done","ok":false,"error":"timed out"}"#;
        let events = parse_pi_line(line);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Completed(c) if !c.ok && c.error.as_deref() == Some("timed out")));
    }

    #[test]
    fn resolve_resume_matches_pi_session_syntax() {
        let runner = PiRunner::new(PathBuf::from("."), EngineOverride::default());
        let token = runner
            .resolve_resume("pi --session /tmp/s1.json\ncontinue please")
            .unwrap();
        assert_eq!(token.session_path.as_deref(), Some("/tmp/s1.json"));
    }

    #[test]
    fn build_args_includes_session_flag_when_resuming() {
        let runner = PiRunner::new(PathBuf::from("."), EngineOverride::default());
        let token = ResumeToken::new(runner.id.clone(), "pi --session /tmp/s1.json")
            .with_session_path("/tmp/s1.json");
        let args = runner.build_args("continue", Some(&token));
        assert!(args.windows(2).any(|w| w == ["--session".to_string(), "/tmp/s1.json".to_string()]));
    }
}
