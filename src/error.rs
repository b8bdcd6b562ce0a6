use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("os rng error: {message}")]
    OsRng { message: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error(
        "TickTick client ID or client secret is missing. Set TICKTICK_CLIENT_ID and \
         TICKTICK_CLIENT_SECRET or pass them explicitly."
    )]
    MissingCredentials,

    #[error("invalid redirect uri: {0}")]
    InvalidRedirectUri(String),

    #[error("could not bind callback server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("authorization denied: {reason}")]
    AuthorizationDenied { reason: String },

    #[error("state mismatch in authorization callback (received={received:?})")]
    StateMismatch { received: Option<String> },

    #[error("authentication timed out after {timeout:?}, please try again")]
    TimedOut { timeout: Duration },

    #[error("missing authorization code")]
    MissingAuthorizationCode,

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("token exchange failed (http {status}): {body}")]
    TokenExchange {
        status: u16,
        error: Option<String>,
        body: String,
    },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String, body: String },

    #[error("failed to persist credentials to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl OAuthError {
    /// Whether re-running the whole flow may succeed without user configuration changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. }
                | Self::AuthorizationDenied { .. }
                | Self::StateMismatch { .. }
                | Self::TimedOut { .. }
                | Self::Network(_)
                | Self::TokenExchange { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required: no access token stored, run the auth flow first")]
    AuthRequired,

    #[error("access token rejected (http 401): {body}")]
    Unauthorized { body: String },

    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {message}")]
    InvalidResponse { message: String, body: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid priority {0}, must be 0 (none), 1 (low), 3 (medium) or 5 (high)")]
    InvalidPriority(i32),

    #[error(transparent)]
    Auth(#[from] OAuthError),
}

impl ApiError {
    /// Whether the caller should send the user through the authorization flow again.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::AuthRequired | Self::Unauthorized { .. })
    }
}
