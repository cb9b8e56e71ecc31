use thiserror::Error;

/// Failure taxonomy for the generation and assembly pipeline. Transient
/// remote failures (429/503/500, connection drops) are retried inside the
/// client and never surface here; everything below is terminal for the
/// operation that produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input caught before any network call.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A scene produced a result that cannot anchor the rest of the chain.
    #[error("scene {scene}: {reason}")]
    ChainIntegrity { scene: usize, reason: String },

    /// Produced items disagree with the requested count.
    #[error("{what}: expected {expected}, got {actual}")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Non-retryable HTTP status from the remote service.
    #[error("remote returned HTTP {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    /// The token provider could not supply a usable token.
    #[error("token provider: {0}")]
    Token(String),

    /// A 2xx response that did not carry the fields the call needs.
    #[error("{context}: unexpected response shape: {detail}")]
    UnexpectedPayload {
        context: &'static str,
        detail: String,
    },

    /// External media tool exited non-zero; diagnostic output attached.
    #[error("{context}: {diagnostics}")]
    MediaTool {
        context: &'static str,
        diagnostics: String,
    },

    #[error("config {path}: {reason}")]
    Config { path: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    pub fn chain(scene: usize, reason: impl Into<String>) -> Self {
        Error::ChainIntegrity {
            scene,
            reason: reason.into(),
        }
    }
}
