use thiserror::Error;

/**
    Coarse classification of a [`StreamError`].

    Callers that only need to decide how to react (report to the user, retry
    later, give up) can match on this instead of on every variant.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidAddress,
    UpstreamProtocol,
    SandboxExecution,
    Transport,
    Cancelled,
}

/**
    Errors produced while resolving a room stream.
*/
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    // ── Local validation ──────────────────────────────────────────────
    #[error("invalid room address '{0}'")]
    InvalidAddress(String),

    // ── Upstream protocol ─────────────────────────────────────────────
    #[error("unexpected status code from {endpoint}: {status}, {body}")]
    UnexpectedStatus {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("unexpected error code from {endpoint}: {code}")]
    UnexpectedErrorCode {
        endpoint: &'static str,
        code: i64,
        envelope: String,
    },
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse {
        endpoint: &'static str,
        reason: String,
    },
    #[error("no offered quality matches bitrate code {rate} (offered: {offered})")]
    QualityUnresolvable { rate: i64, offered: String },

    // ── Sandbox ───────────────────────────────────────────────────────
    #[error("signing script failed: {0}")]
    Sandbox(String),

    // ── Transport / cancellation ──────────────────────────────────────
    #[error("http request failed: {0}")]
    Transport(String),
    #[error("stream resolution deadline elapsed")]
    DeadlineElapsed,
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAddress(_) => ErrorKind::InvalidAddress,
            Self::UnexpectedStatus { .. }
            | Self::UnexpectedErrorCode { .. }
            | Self::MalformedResponse { .. }
            | Self::QualityUnresolvable { .. } => ErrorKind::UpstreamProtocol,
            Self::Sandbox(_) => ErrorKind::SandboxExecution,
            Self::Transport(_) => ErrorKind::Transport,
            Self::DeadlineElapsed => ErrorKind::Cancelled,
        }
    }

    pub fn is_upstream_protocol(&self) -> bool {
        self.kind() == ErrorKind::UpstreamProtocol
    }

    pub(crate) fn malformed(endpoint: &'static str, reason: impl ToString) -> Self {
        Self::MalformedResponse {
            endpoint,
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StreamError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Sandbox(format!("sandbox task did not complete: {e}"))
    }
}

/**
    Type alias for results that may return a [`StreamError`].
*/
pub type StreamResult<T> = std::result::Result<T, StreamError>;
