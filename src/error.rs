use thiserror::Error;

/// Errors surfaced by the bridge components
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tmux invocation failed or timed out
    #[error("tmux error: {0}")]
    Tmux(String),

    /// Chat channel error
    #[error("Channel error: {0}")]
    Channel(String),

    /// Pane never showed an interactive menu within the readiness window
    #[error("pane {0} did not become ready")]
    NotReady(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config file could not be parsed
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Why a message could not be injected into a session
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectError {
    #[error("no tracked session with that id")]
    SessionNotFound,

    #[error("message is empty")]
    Empty,

    #[error("agent is busy")]
    Busy,

    /// Liveness probe or key delivery failed after every retry
    #[error("tmux pane is gone")]
    PaneDead,
}
