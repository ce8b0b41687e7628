use std::path::PathBuf;

/// All errors that can occur in the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("engine binary not found: {binary} (is {engine} installed?)")]
    BinaryNotFound { engine: String, binary: String },

    #[error("failed to spawn engine process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("engine process failed with exit code {code}: {stderr}")]
    ProcessFailed { code: i32, stderr: String },

    #[error("failed to translate engine output: {0}")]
    Translation(String),

    #[error("working directory does not exist: {0}")]
    InvalidWorkDir(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no runner registered for engine `{0}`")]
    RunnerUnavailable(String),

    #[error("no engines are registered")]
    NoEngines,

    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("transport error (transient): {0}")]
    TransportTransient(String),

    #[error("transport error (fatal): {0}")]
    TransportFatal(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable error code string for programmatic consumption and logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::BinaryNotFound { .. } => "E001",
            Error::SpawnFailed(_) => "E002",
            Error::ProcessFailed { .. } => "E003",
            Error::Translation(_) => "E004",
            Error::InvalidWorkDir(_) => "E006",
            Error::Io(_) => "E007",
            Error::Json(_) => "E008",
            Error::Config(_) => "E020",
            Error::RunnerUnavailable(_) => "E021",
            Error::NoEngines => "E022",
            Error::AlreadyRunning(_) => "E023",
            Error::TransportTransient(_) => "E030",
            Error::TransportFatal(_) => "E031",
            Error::Cancelled => "E040",
            Error::Other(_) => "E999",
        }
    }

    /// Whether this error represents a user-visible run failure (as opposed
    /// to a fatal startup condition).
    pub fn is_run_scoped(&self) -> bool {
        matches!(
            self,
            Error::ProcessFailed { .. }
                | Error::Translation(_)
                | Error::Cancelled
                | Error::SpawnFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
