use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::EngineId;
use crate::error::{Error, Result};

/// How an engine should handle tool/permission prompts during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    #[default]
    FullAccess,
    ReadOnly,
}

/// Per-engine override loaded from the `[engines.<id>]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineOverride {
    pub binary: Option<PathBuf>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    pub model: Option<String>,
    pub permission_mode: Option<PermissionMode>,
}

impl EngineOverride {
    fn merge(base: &EngineOverride, overlay: &EngineOverride) -> EngineOverride {
        EngineOverride {
            binary: overlay.binary.clone().or_else(|| base.binary.clone()),
            extra_args: base
                .extra_args
                .iter()
                .cloned()
                .chain(overlay.extra_args.iter().cloned())
                .collect(),
            model: overlay.model.clone().or_else(|| base.model.clone()),
            permission_mode: overlay.permission_mode.or(base.permission_mode),
        }
    }

    pub fn permission_mode(&self) -> PermissionMode {
        self.permission_mode.unwrap_or_default()
    }
}

/// Raw, directly-deserialized shape of a config TOML file. Both the global
/// and project files use this shape; merging happens after parsing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct RawConfig {
    default_engine: Option<String>,
    enabled_engines: Option<Vec<String>>,
    transport: Option<String>,
    allowed_chat_ids: Option<Vec<i64>>,
    log_level: Option<String>,
    work_dir: Option<PathBuf>,
    #[serde(default)]
    engines: HashMap<String, EngineOverride>,
}

/// The bridge's fully-resolved, immutable configuration, loaded once at
/// startup from a two-tier TOML merge: a global `~/.config/takopi/config.toml`
/// and an optional project `takopi.toml` discovered by walking up from the
/// current directory. Project fields win field-by-field; list fields
/// (engine `extra_args`) concatenate, global entries first.
#[derive(Debug, Clone)]
pub struct Settings {
    pub default_engine: EngineId,
    pub enabled_engines: Vec<EngineId>,
    pub transport: String,
    pub allowed_chat_ids: Vec<i64>,
    pub log_level: Option<String>,
    /// Working directory engines are invoked in. Defaults to the process's
    /// current directory at load time.
    pub work_dir: PathBuf,
    pub engines: HashMap<EngineId, EngineOverride>,
}

impl Settings {
    /// Load global + project config, falling back to defaults for anything
    /// unset. Invalid/missing files degrade with a warning, except an
    /// unknown `default_engine`/`transport` id, which is a fatal error.
    pub fn load(project_root: Option<&Path>) -> Result<Self> {
        let global = global_config_path()
            .and_then(|path| read_raw(&path).ok())
            .unwrap_or_default();

        let project = project_root
            .map(find_project_config)
            .unwrap_or_else(|| find_project_config(&std::env::current_dir().unwrap_or_default()))
            .and_then(|path| read_raw(&path).ok())
            .unwrap_or_default();

        Self::from_raw(merge_raw(global, project))
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let default_engine = EngineId::new(raw.default_engine.unwrap_or_else(|| "codex".into()))?;
        let enabled_engines = raw
            .enabled_engines
            .unwrap_or_else(|| vec!["codex".into(), "claude".into(), "opencode".into(), "pi".into()])
            .into_iter()
            .map(EngineId::new)
            .collect::<Result<Vec<_>>>()?;
        let transport = raw.transport.unwrap_or_else(|| "telegram".into());

        let mut engines = HashMap::new();
        for (id, overrides) in raw.engines {
            engines.insert(EngineId::new(id)?, overrides);
        }

        Ok(Settings {
            default_engine,
            enabled_engines,
            transport,
            allowed_chat_ids: raw.allowed_chat_ids.unwrap_or_default(),
            log_level: raw.log_level,
            work_dir: raw
                .work_dir
                .unwrap_or(std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))),
            engines,
        })
    }

    pub fn engine_override(&self, id: &EngineId) -> EngineOverride {
        self.engines.get(id).cloned().unwrap_or_default()
    }

    /// Render a template config file, used by `takopi config init`.
    pub fn template() -> String {
        r#"# Takopi configuration.
default_engine = "codex"
enabled_engines = ["codex", "claude", "opencode", "pi"]
transport = "telegram"
allowed_chat_ids = []
log_level = "info"

[engines.codex]
# binary = "/usr/local/bin/codex"
# extra_args = []
"#
        .to_string()
    }
}

fn merge_raw(base: RawConfig, overlay: RawConfig) -> RawConfig {
    let mut engines = base.engines.clone();
    for (id, overlay_override) in &overlay.engines {
        let merged = match engines.get(id) {
            Some(base_override) => EngineOverride::merge(base_override, overlay_override),
            None => overlay_override.clone(),
        };
        engines.insert(id.clone(), merged);
    }

    RawConfig {
        default_engine: overlay.default_engine.or(base.default_engine),
        enabled_engines: overlay.enabled_engines.or(base.enabled_engines),
        transport: overlay.transport.or(base.transport),
        allowed_chat_ids: overlay.allowed_chat_ids.or(base.allowed_chat_ids),
        log_level: overlay.log_level.or(base.log_level),
        work_dir: overlay.work_dir.or(base.work_dir),
        engines,
    }
}

fn read_raw(path: &Path) -> Result<RawConfig> {
    let text = std::fs::read_to_string(path).map_err(Error::Io)?;
    toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("takopi").join("config.toml"))
}

/// Walk up from `start` looking for `takopi.toml`.
fn find_project_config(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join("takopi.toml");
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_files_present() {
        let settings = Settings::from_raw(RawConfig::default()).unwrap();
        assert_eq!(settings.default_engine.as_str(), "codex");
        assert_eq!(settings.transport, "telegram");
    }

    #[test]
    fn project_overrides_global_field_by_field() {
        let base = RawConfig {
            default_engine: Some("codex".into()),
            transport: Some("telegram".into()),
            ..Default::default()
        };
        let overlay = RawConfig {
            default_engine: Some("claude".into()),
            ..Default::default()
        };
        let merged = merge_raw(base, overlay);
        assert_eq!(merged.default_engine.as_deref(), Some("claude"));
        assert_eq!(merged.transport.as_deref(), Some("telegram"));
    }

    #[test]
    fn engine_extra_args_concatenate_global_first() {
        let mut base_engines = HashMap::new();
        base_engines.insert(
            "codex".to_string(),
            EngineOverride {
                binary: None,
                extra_args: vec!["--global-flag".into()],
                model: None,
                permission_mode: None,
            },
        );
        let mut overlay_engines = HashMap::new();
        overlay_engines.insert(
            "codex".to_string(),
            EngineOverride {
                binary: None,
                extra_args: vec!["--project-flag".into()],
                model: None,
                permission_mode: None,
            },
        );
        let base = RawConfig {
            engines: base_engines,
            ..Default::default()
        };
        let overlay = RawConfig {
            engines: overlay_engines,
            ..Default::default()
        };
        let merged = merge_raw(base, overlay);
        let codex = &merged.engines["codex"];
        assert_eq!(codex.extra_args, vec!["--global-flag", "--project-flag"]);
    }

    #[test]
    fn invalid_engine_id_in_default_engine_is_rejected() {
        let raw = RawConfig {
            default_engine: Some("Not Valid".into()),
            ..Default::default()
        };
        assert!(Settings::from_raw(raw).is_err());
    }
}
