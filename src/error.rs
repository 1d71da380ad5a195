/// Errors surfaced by the live session engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LiveError {
    /// Transport failure. The session moves to `Errored` and is never retried.
    #[error("connection error: {0}")]
    Connection(String),
    /// A connect attempt was superseded by `disconnect` or another `connect`.
    #[error("connection attempt aborted")]
    Aborted,
    #[error("not connected")]
    NotConnected,
    #[error("session config cannot change while the session is {0}")]
    SessionLocked(String),
    /// Camera or microphone access was denied or the device is missing.
    #[error("{device} unavailable: {detail}")]
    Permission { device: String, detail: String },
    /// The pose model failed to load; pose and image features degrade to "no landmarks".
    #[error("pose detector failed to initialise: {0}")]
    DetectorInit(String),
    /// Unmatched or malformed tool call. Logged, never fatal to the response cycle.
    #[error("tool call {name} ({id}): {detail}")]
    ToolDispatch {
        id: String,
        name: String,
        detail: String,
    },
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LiveError {
    pub(crate) fn permission(device: &str, err: impl std::fmt::Display) -> Self {
        LiveError::Permission {
            device: device.to_string(),
            detail: format!("{:#}", err),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        LiveError::Connection(e.to_string())
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(e: serde_json::Error) -> Self {
        LiveError::Encode(e.to_string())
    }
}

impl From<image::ImageError> for LiveError {
    fn from(e: image::ImageError) -> Self {
        LiveError::Encode(e.to_string())
    }
}

pub type Result<T, E = LiveError> = std::result::Result<T, E>;
