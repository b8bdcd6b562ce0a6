use std::time::Duration;

use crate::OAuthError;
use crate::store::{CLIENT_ID_KEY, CLIENT_SECRET_KEY, Credentials};

pub const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://ticktick.com/oauth/authorize";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://ticktick.com/oauth/token";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8002";
pub const DEFAULT_LOCAL_PORT: u16 = 8002;
pub const DEFAULT_SCOPES: &[&str] = &["tasks:read", "tasks:write"];
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const AUTH_URL_VAR: &str = "TICKTICK_AUTH_URL";
const TOKEN_URL_VAR: &str = "TICKTICK_TOKEN_URL";

#[derive(Clone)]
pub struct OAuthConfig {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub local_port: u16,
    pub scopes: Vec<String>,
    pub callback_timeout: Duration,
    pub http_timeout: Option<Duration>,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("local_port", &self.local_port)
            .field("scopes", &self.scopes)
            .field("callback_timeout", &self.callback_timeout)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl OAuthConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            local_port: DEFAULT_LOCAL_PORT,
            scopes: DEFAULT_SCOPES.iter().map(|scope| scope.to_string()).collect(),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            http_timeout: None,
        }
    }

    /// Resolves settings from process environment, then `credentials`, then defaults.
    pub fn from_env(credentials: &Credentials) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), credentials)
    }

    pub fn from_lookup<F>(lookup: F, credentials: &Credentials) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolve = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .or_else(|| credentials.non_empty(key).map(str::to_string))
        };

        let mut config = Self::new(
            resolve(CLIENT_ID_KEY).unwrap_or_default(),
            resolve(CLIENT_SECRET_KEY).unwrap_or_default(),
        );
        if let Some(url) = resolve(AUTH_URL_VAR) {
            config.authorization_endpoint = url;
        }
        if let Some(url) = resolve(TOKEN_URL_VAR) {
            config.token_endpoint = url;
        }
        config
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = client_secret.into();
        self
    }

    pub fn with_authorization_endpoint(mut self, url: impl Into<String>) -> Self {
        self.authorization_endpoint = url.into();
        self
    }

    pub fn with_token_endpoint(mut self, url: impl Into<String>) -> Self {
        self.token_endpoint = url.into();
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Space-joined scope list as sent to the provider.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    pub fn validate(&self) -> Result<(), OAuthError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(OAuthError::MissingCredentials);
        }
        Ok(())
    }
}
