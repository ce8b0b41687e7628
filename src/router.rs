use std::sync::Arc;

use crate::engine::EngineId;
use crate::error::{Error, Result};
use crate::runner::{ResumeToken, RunnerRegistry};

/// Result of routing one incoming message to an engine.
#[derive(Debug, Clone)]
pub struct Route {
    pub engine_id: EngineId,
    pub resume: Option<ResumeToken>,
    /// The prompt with any matched engine-prefix or resume line stripped.
    pub prompt: String,
}

/// Scans incoming text (and optional reply-to text) to decide which engine
/// should handle a message, in first-match-wins order:
/// 1. An explicit `/<engine_id>` prefix on the first line.
/// 2. Each registered runner's own resume syntax, checked in stable
///    registration order, against the message text then the reply text.
/// 3. The configured default engine, with no resume token.
pub struct AutoRouter {
    registry: Arc<RunnerRegistry>,
    default_engine: EngineId,
}

impl AutoRouter {
    pub fn new(registry: Arc<RunnerRegistry>, default_engine: EngineId) -> Self {
        Self {
            registry,
            default_engine,
        }
    }

    pub fn route(&self, text: &str, reply_to_text: Option<&str>) -> Result<Route> {
        if self.registry.is_empty() {
            return Err(Error::NoEngines);
        }

        if let Some((engine_id, rest)) = strip_engine_prefix(text) {
            if self.registry.get(&engine_id).is_some() {
                return Ok(Route {
                    engine_id,
                    resume: None,
                    prompt: rest,
                });
            }
            return Err(Error::RunnerUnavailable(engine_id.to_string()));
        }

        for runner in self.registry.in_order() {
            if let Some(token) = runner.resolve_resume(text) {
                let prompt = strip_line_containing(text, &token.raw);
                return Ok(Route {
                    engine_id: runner.engine_id().clone(),
                    resume: Some(token),
                    prompt,
                });
            }
            if let Some(reply_text) = reply_to_text {
                if let Some(token) = runner.resolve_resume(reply_text) {
                    return Ok(Route {
                        engine_id: runner.engine_id().clone(),
                        resume: Some(token),
                        prompt: text.to_string(),
                    });
                }
            }
        }

        if self.registry.get(&self.default_engine).is_none() {
            return Err(Error::RunnerUnavailable(self.default_engine.to_string()));
        }
        Ok(Route {
            engine_id: self.default_engine.clone(),
            resume: None,
            prompt: text.to_string(),
        })
    }
}

fn strip_engine_prefix(text: &str) -> Option<(EngineId, String)> {
    let first_line = text.lines().next()?;
    let rest_of_text = &text[first_line.len()..];
    let id_str = first_line.strip_prefix('/')?.trim();
    if id_str.is_empty() {
        return None;
    }
    let engine_id = EngineId::new(id_str).ok()?;
    Some((engine_id, rest_of_text.trim_start_matches('\n').to_string()))
}

fn strip_line_containing(text: &str, needle: &str) -> String {
    text.lines()
        .filter(|line| !line.contains(needle))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
