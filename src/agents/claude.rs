use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineOverride, PermissionMode};
use crate::engine::{self, EngineId};
use crate::error::Result;
use crate::event::{ActionCompletedEvent, ActionStatus, CompletedEvent, Event, StartedEvent};
use crate::process::{spawn_and_stream, SpawnSpec};
use crate::runner::{EventStream, ResumeToken, Runner};

/// Adapter for Claude Code (`claude` CLI).
///
/// Headless invocation:
///   claude -p "<prompt>" --output-format stream-json --verbose [--resume <id>]
///
/// Stream format: NDJSON with event types `system`/`assistant`/`user`/`result`.
pub struct ClaudeRunner {
    id: EngineId,
    work_dir: PathBuf,
    override_: EngineOverride,
}

impl ClaudeRunner {
    pub fn new(work_dir: PathBuf, override_: EngineOverride) -> Self {
        Self {
            id: EngineId::new(engine::CLAUDE).unwrap(),
            work_dir,
            override_,
        }
    }

    fn build_args(&self, prompt: &str, resume: Option<&ResumeToken>) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];

        if let Some(ref model) = self.override_.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        match self.override_.permission_mode() {
            PermissionMode::FullAccess => args.push("--dangerously-skip-permissions".to_string()),
            PermissionMode::ReadOnly => {
                args.push("--permission-mode".to_string());
                args.push("plan".to_string());
            }
        }

        if let Some(token) = resume {
            if let Some(ref session_id) = token.session_id {
                args.push("--resume".to_string());
                args.push(session_id.clone());
            }
        }

        args.extend(self.override_.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl Runner for ClaudeRunner {
    fn engine_id(&self) -> &EngineId {
        &self.id
    }

    fn is_available(&self) -> bool {
        engine::is_available(&self.id, self.override_.binary.as_deref())
    }

    fn resolve_resume(&self, text: &str) -> Option<ResumeToken> {
        text.lines().find_map(|line| {
            let trimmed = line.trim();
            let rest = trimmed.strip_prefix("claude --resume ")?;
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

        spawn_and_stream(spec, parse_claude_line, cancel).await
    }
}

fn parse_claude_line(line: &str) -> Vec<Event> {
    let engine_id = EngineId::new(engine::CLAUDE).unwrap();
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
        "system" => {
            let subtype = value.get("subtype").and_then(|v| v.as_str()).unwrap_or("");
            if subtype != "init" {
                return vec![];
            }
            let session_id = value.get("session_id").and_then(|v| v.as_str());
            let resume_token = session_id.map(|sid| {
                ResumeToken::new(engine_id.clone(), format!("claude --resume {sid}"))
                    .with_session_id(sid.to_string())
            });
            vec![Event::Started(StartedEvent {
                engine_id,
                resume_known: resume_token.is_some(),
                resume_token,
                timestamp_ms: 0,
            })]
        }

        "assistant" => {
            let mut events = Vec::new();
            let content = value.pointer("/message/content").and_then(|v| v.as_array());
            if let Some(blocks) = content {
                for block in blocks {
                    let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
                    match block_type {
                        "text" => {
                            if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                                if !t.is_empty() {
                                    events.push(Event::Action(crate::event::ActionEvent {
                                        engine_id: engine_id.clone(),
                                        text: t.to_string(),
                                        resume_token: None,
                                        timestamp_ms: 0,
                                    }));
                                }
                            }
                        }
                        "tool_use" => {
                            let id = block
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or("unknown")
                                .to_string();
                            let name = block
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or("tool")
                                .to_string();
                            events.push(Event::ActionStarted(crate::event::ActionStartedEvent {
                                engine_id: engine_id.clone(),
                                id,
                                kind: "tool".to_string(),
                                title: name,
                                resume_token: None,
                                timestamp_ms: 0,
                            }));
                        }
                        _ => {}
                    }
                }
            }
            events
        }

        "user" => {
            let mut events = Vec::new();
            let content = value.pointer("/message/content").and_then(|v| v.as_array());
            if let Some(blocks) = content {
                for block in blocks {
                    if block.get("type").and_then(|v| v.as_str()) != Some("tool_result") {
                        continue;
                    }
                    let id = block
                        .get("tool_use_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string();
                    let is_error = block.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false);
                    let detail = block.get("content").map(|v| {
                        v.as_str()
                            .map(String::from)
                            .unwrap_or_else(|| v.to_string())
                    });
                    events.push(Event::ActionCompleted(ActionCompletedEvent {
                        engine_id: engine_id.clone(),
                        id,
                        status: if is_error { ActionStatus::Error } else { ActionStatus::Done },
                        detail,
                        resume_token: None,
                        timestamp_ms: 0,
                    }));
                }
            }
            events
        }

        "result" => {
            let subtype = value.get("subtype").and_then(|v| v.as_str()).unwrap_or("success");
            let ok = subtype == "success";
            let answer = value.get("result").and_then(|v| v.as_str()).map(String::from);
            vec![Event::Completed(CompletedEvent {
                engine_id,
                ok,
                answer: if ok { answer } else { None },
                error: if ok { None } else { Some(subtype.to_string()) },
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
    fn parse_init_emits_started_with_resume() {
        let line = r#"{"type":"system","subtype":"init","session_id":"abc-123"}"#;
        let events = parse_claude_line(line);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Started(s) => {
                assert!(s.resume_known);
                assert_eq!(
                    s.resume_token.as_ref().unwrap().session_id.as_deref(),
                    Some("abc-123")
                );
            }
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[test]
    fn parse_assistant_text_and_tool_use() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Checking"},{"type":"tool_use","id":"tu-1","name":"bash"}]}}"#;
        let events = parse_claude_line(line);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::Action(a) if a.text == "Checking"));
        assert!(matches!(&events[1], Event::ActionStarted(a) if a.id == "tu-1" && a.title == "bash"));
    }

    #[test]
    fn parse_tool_result_error() {
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu-1","is_error":true,"content":"boom"}]}}"#;
        let events = parse_claude_line(line);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::ActionCompleted(a) if a.status == ActionStatus::Error));
    }

    #[test]
    fn parse_result_success() {
        let line = r#"{"type":"result","subtype":"success","result":"Done"}"#;
        let events = parse_claude_line(line);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Completed(c) => {
                assert!(c.ok);
                assert_eq!(c.answer.as_deref(), Some("Done"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test]
    fn resolve_resume_matches_claude_syntax() {
        let runner = ClaudeRunner::new(PathBuf::from("."), EngineOverride::default());
        let token = runner.resolve_resume("claude --resume abc123\ncontinue").unwrap();
        assert_eq!(token.session_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn build_args_full_access_includes_skip_permissions() {
        let runner = ClaudeRunner::new(PathBuf::from("."), EngineOverride::default());
        let args = runner.build_args("fix the bug", None);
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(args.contains(&"fix the bug".to_string()));
    }
}
