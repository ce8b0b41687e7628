pub mod claude;
pub mod codex;
pub mod mock;
pub mod opencode;
pub mod pi;

use std::path::Path;
use std::sync::Arc;

use crate::config::Settings;
use crate::engine::{self, EngineId};
use crate::runner::{Runner, RunnerRegistry};

/// Build a runner for a single built-in engine, applying its config override.
/// Returns `None` for an id this bridge ships no translator for (custom ids
/// are expected to be wired up by the embedding application, not here).
pub fn create_runner(id: &EngineId, settings: &Settings) -> Option<Arc<dyn Runner>> {
    let override_ = settings.engine_override(id);
    let work_dir = settings.work_dir.clone();

    match id.as_str() {
        engine::CODEX => Some(Arc::new(codex::CodexRunner::new(work_dir, override_))),
        engine::CLAUDE => Some(Arc::new(claude::ClaudeRunner::new(work_dir, override_))),
        engine::OPENCODE => Some(Arc::new(opencode::OpenCodeRunner::new(work_dir, override_))),
        engine::PI => Some(Arc::new(pi::PiRunner::new(work_dir, override_))),
        engine::MOCK => Some(Arc::new(mock::MockRunner::new())),
        _ => None,
    }
}

/// Build a registry containing every `enabled_engines` entry `settings`
/// names, in configured order, skipping unknown custom ids silently (they
/// have no built-in translator and must be registered separately).
pub fn build_registry(settings: &Settings, _project_root: &Path) -> RunnerRegistry {
    let mut registry = RunnerRegistry::new();
    for id in &settings.enabled_engines {
        if let Some(runner) = create_runner(id, settings) {
            registry.register(runner);
        } else {
            tracing::warn!(engine = %id, "no built-in translator for configured engine, skipping");
        }
    }
    registry
}
