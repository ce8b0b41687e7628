use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineOverride, PermissionMode};
use crate::engine::{self, EngineId};
use crate::error::Result;
use crate::event::{ActionEvent, CompletedEvent, Event, StartedEvent};
use crate::process::{spawn_and_stream, SpawnSpec};
use crate::runner::{EventStream, ResumeToken, Runner};

/// Adapter for the OpenAI Codex CLI (`codex` binary).
///
/// Headless invocation:
///   codex exec --json [resume <session_id>] - <prompt on stdin>
///
/// Stream format: NDJSON with event types `thread.started`/`item.started`/
/// `item.completed`/`turn.completed`/`turn.failed`/`error`.
pub struct CodexRunner {
    id: EngineId,
    work_dir: PathBuf,
    override_: EngineOverride,
}

impl CodexRunner {
    pub fn new(work_dir: PathBuf, override_: EngineOverride) -> Self {
        Self {
            id: EngineId::new(engine::CODEX).unwrap(),
            work_dir,
            override_,
        }
    }

    fn build_args(&self, resume: Option<&ResumeToken>) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--json".to_string()];

        if let Some(token) = resume {
            if let Some(ref session_id) = token.session_id {
                args.push("resume".to_string());
                args.push(session_id.clone());
            }
        }

        if let Some(ref model) = self.override_.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        match self.override_.permission_mode() {
            PermissionMode::FullAccess => {
                args.push("--sandbox".to_string());
                args.push("danger-full-access".to_string());
                args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
            }
            PermissionMode::ReadOnly => {
                args.push("--sandbox".to_string());
                args.push("read-only".to_string());
            }
        }

        args.extend(self.override_.extra_args.iter().cloned());
        args.push("-".to_string());
        args
    }
}

#[async_trait]
impl Runner for CodexRunner {
    fn engine_id(&self) -> &EngineId {
        &self.id
    }

    fn is_available(&self) -> bool {
        engine::is_available(&self.id, self.override_.binary.as_deref())
    }

    fn resolve_resume(&self, text: &str) -> Option<ResumeToken> {
        text.lines().find_map(|line| {
            let trimmed = line.trim();
            let rest = trimmed.strip_prefix("codex resume ")?;
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
        let args = self.build_args(resume.as_ref());
        let spec = SpawnSpec {
            engine_id: self.id.clone(),
            binary,
            args,
            env: vec![],
            cwd: self.work_dir.clone(),
            stdin_prompt: Some(prompt.to_string()),
        };

        spawn_and_stream(spec, parse_codex_line, cancel).await
    }
}

fn parse_codex_line(line: &str) -> Vec<Event> {
    let engine_id = EngineId::new(engine::CODEX).unwrap();
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

    let event_type = match value.get("type").and_then(|v| v.as_str()) {
        Some(t) => t,
        None => return vec![],
    };

    match event_type {
        "thread.started" => {
            let thread_id = value.get("thread_id").and_then(|v| v.as_str());
            let resume_token = thread_id.map(|tid| {
                ResumeToken::new(engine_id.clone(), format!("codex resume {tid}"))
                    .with_session_id(tid.to_string())
            });
            vec![Event::Started(StartedEvent {
                engine_id,
                resume_known: resume_token.is_some(),
                resume_token,
                timestamp_ms: 0,
            })]
        }

        "item.started" => {
            let Some(item) = value.get("item") else { return vec![] };
            if item.get("type").and_then(|v| v.as_str()) != Some("command_execution") {
                return vec![];
            }
            let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
            let command = item.get("command").and_then(|v| v.as_str()).unwrap_or("").to_string();
            vec![Event::ActionStarted(crate::event::ActionStartedEvent {
                engine_id,
                id,
                kind: "shell".to_string(),
                title: command,
                resume_token: None,
                timestamp_ms: 0,
            })]
        }

        "item.completed" | "item.created" => {
            let Some(item) = value.get("item") else { return vec![] };
            let item_type = item.get("type").and_then(|v| v.as_str()).unwrap_or("");

            match item_type {
                "agent_message" | "message" => {
                    let text = item
                        .get("text")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                        .or_else(|| {
                            item.get("content").and_then(|v| v.as_array()).map(|arr| {
                                arr.iter()
                                    .filter_map(|c| c.get("text").and_then(|v| v.as_str()))
                                    .collect::<Vec<_>>()
                                    .join("")
                            })
                        })
                        .unwrap_or_default();
                    if text.is_empty() {
                        return vec![];
                    }
                    vec![Event::Action(ActionEvent {
                        engine_id,
                        text,
                        resume_token: None,
                        timestamp_ms: 0,
                    })]
                }
                "command_execution" | "command" | "shell" => {
                    let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
                    let exit_code = item.get("exit_code").and_then(|v| v.as_i64());
                    let ok = exit_code.map(|c| c == 0).unwrap_or(true);
                    let detail = item
                        .get("aggregated_output")
                        .or_else(|| item.get("output"))
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    vec![Event::ActionCompleted(crate::event::ActionCompletedEvent {
                        engine_id,
                        id,
                        status: if ok {
                            crate::event::ActionStatus::Done
                        } else {
                            crate::event::ActionStatus::Error
                        },
                        detail,
                        resume_token: None,
                        timestamp_ms: 0,
                    })]
                }
                "file_change" => {
                    let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
                    let path = item.get("path").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    vec![
                        Event::ActionStarted(crate::event::ActionStartedEvent {
                            engine_id: engine_id.clone(),
                            id: id.clone(),
                            kind: "file_change".to_string(),
                            title: path,
                            resume_token: None,
                            timestamp_ms: 0,
                        }),
                        Event::ActionCompleted(crate::event::ActionCompletedEvent {
                            engine_id,
                            id,
                            status: crate::event::ActionStatus::Done,
                            detail: None,
                            resume_token: None,
                            timestamp_ms: 0,
                        }),
                    ]
                }
                _ => vec![],
            }
        }

        "turn.completed" => vec![Event::Completed(CompletedEvent {
            engine_id,
            ok: true,
            answer: None,
            error: None,
            resume_token: None,
            timestamp_ms: 0,
        })],

        "turn.failed" | "error" => {
            let message = value
                .get("error")
                .and_then(|v| v.as_str())
                .or_else(|| value.get("message").and_then(|v| v.as_str()))
                .unwrap_or("turn failed")
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
    fn parse_thread_started_emits_resume_token() {
        let line = r#"{"type":"thread.started","thread_id":"th-123"}"#;
        let events = parse_codex_line(line);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Started(s) => {
                assert_eq!(
                    s.resume_token.as_ref().unwrap().session_id.as_deref(),
                    Some("th-123")
                );
            }
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[test]
    fn parse_agent_message() {
        let line = r#"{"type":"item.completed","item":{"id":"item_2","type":"agent_message","text":"Hello!"}}"#;
        let events = parse_codex_line(line);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Action(a) if a.text == "Hello!"));
    }

    #[test]
    fn parse_command_lifecycle() {
        let started = parse_codex_line(
            r#"{"type":"item.started","item":{"id":"item_1","type":"command_execution","command":"ls"}}"#,
        );
        assert!(matches!(&started[0], Event::ActionStarted(a) if a.id == "item_1"));

        let completed = parse_codex_line(
            r#"{"type":"item.completed","item":{"id":"item_1","type":"command_execution","exit_code":0,"aggregated_output":"file.txt"}}"#,
        );
        assert!(
            matches!(&completed[0], Event::ActionCompleted(a) if a.status == crate::event::ActionStatus::Done)
        );
    }

    #[test]
    fn parse_turn_failed() {
        let line = r#"{"type":"turn.failed","error":"rate limit exceeded"}"#;
        let events = parse_codex_line(line);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Completed(c) if !c.ok));
    }

    #[test]
    fn build_args_places_prompt_marker_last() {
        let runner = CodexRunner::new(PathBuf::from("."), EngineOverride::default());
        let args = runner.build_args(None);
        assert_eq!(args.last().unwrap(), "-");
        assert!(args.contains(&"--dangerously-bypass-approvals-and-sandbox".to_string()));
    }

    #[test]
    fn build_args_with_resume_uses_positional_subcommand() {
        let runner = CodexRunner::new(PathBuf::from("."), EngineOverride::default());
        let token = ResumeToken::new(runner.id.clone(), "codex resume th-1").with_session_id("th-1");
        let args = runner.build_args(Some(&token));
        assert!(args.windows(2).any(|w| w == ["resume".to_string(), "th-1".to_string()]));
    }
}
