use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque symbolic id of an engine (`codex`, `claude`, `pi`, `opencode`, `mock`, ...).
///
/// Engines are registered into a keyed registry at startup (see
/// [`crate::registry`]); `EngineId` itself only carries the validated string,
/// it does not enumerate the set of built-in engines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    /// Validate and construct an `EngineId`. Must match `^[a-z][a-z0-9_-]*$`.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let mut chars = raw.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !valid {
            return Err(Error::Config(format!("invalid engine id: `{raw}`")));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EngineId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EngineId::new(s)
    }
}

/// The four built-in engines the bridge ships translators for, plus `mock`
/// used by tests and the scripted "happy path" scenario.
pub const CODEX: &str = "codex";
pub const CLAUDE: &str = "claude";
pub const OPENCODE: &str = "opencode";
pub const PI: &str = "pi";
pub const MOCK: &str = "mock";

/// Static metadata about a built-in engine: binary candidates and a
/// human-readable name. Arbitrary/custom engines configured by the user carry
/// no such metadata and rely entirely on config overrides.
pub fn binary_candidates(id: &str) -> &'static [&'static str] {
    match id {
        CODEX => &["codex"],
        CLAUDE => &["claude"],
        OPENCODE => &["opencode"],
        PI => &["pi"],
        _ => &[],
    }
}

pub fn display_name(id: &str) -> &str {
    match id {
        CODEX => "Codex",
        CLAUDE => "Claude",
        OPENCODE => "OpenCode",
        PI => "Pi",
        MOCK => "Mock",
        other => other,
    }
}

/// Resolve the binary to invoke for `id`: an explicit override wins, else the
/// first of its known candidate names found on `PATH`, else (for custom
/// engines with no known candidates) the id itself.
pub fn resolve_binary(id: &EngineId, override_binary: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_binary {
        return Ok(path.to_path_buf());
    }

    let candidates = binary_candidates(id.as_str());
    let names: Vec<&str> = if candidates.is_empty() {
        vec![id.as_str()]
    } else {
        candidates.to_vec()
    };

    for name in &names {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    Err(Error::BinaryNotFound {
        engine: id.to_string(),
        binary: names.first().copied().unwrap_or(id.as_str()).to_string(),
    })
}

pub fn is_available(id: &EngineId, override_binary: Option<&Path>) -> bool {
    resolve_binary(id, override_binary).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        assert!(EngineId::new("codex").is_ok());
        assert!(EngineId::new("my-engine_2").is_ok());
    }

    #[test]
    fn rejects_invalid_ids() {
        assert!(EngineId::new("Codex").is_err());
        assert!(EngineId::new("2codex").is_err());
        assert!(EngineId::new("").is_err());
    }
}
