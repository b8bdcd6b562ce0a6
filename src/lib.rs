//! OAuth 2.0 authorization code flow for TickTick, plus a small task API client.
//!
//! [`OAuthClient`] opens the consent page, captures the redirect on a local
//! port, exchanges the code with HTTP Basic client authentication and writes
//! the tokens to a flat `KEY=VALUE` credential file. [`TickTickClient`] reads
//! that file and calls the task API with the stored bearer token.

mod api;
mod client;
mod config;
mod error;
mod exchange;
#[cfg(feature = "local-server")]
mod local_server;
mod state;
mod store;
mod types;

pub use api::{
    ChecklistItem, DEFAULT_BASE_URL, INBOX_PROJECT_ID, NewProject, NewTask, Priority, Project,
    ProjectData, Task, TaskUpdate, TickTickClient,
};
pub use client::{AuthOutcome, OAuthClient};
pub use config::{
    DEFAULT_AUTHORIZATION_ENDPOINT, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_LOCAL_PORT,
    DEFAULT_REDIRECT_URI, DEFAULT_SCOPES, DEFAULT_TOKEN_ENDPOINT, OAuthConfig,
};
pub use error::{ApiError, OAuthError};
pub use exchange::TokenExchange;
#[cfg(feature = "local-server")]
pub use local_server::{CaptureHandle, CapturePhase, LocalServer, LocalServerConfig};
pub use state::generate_state;
pub use store::{
    ACCESS_TOKEN_KEY, CLIENT_ID_KEY, CLIENT_SECRET_KEY, CredentialStore, Credentials,
    DEFAULT_CREDENTIALS_FILE, REFRESH_TOKEN_KEY,
};
pub use types::{AuthorizationRequest, AuthorizationResult, CallbackParams, TokenSet};
