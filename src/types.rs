use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use url::form_urlencoded;

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub state: String,
    pub scopes: Vec<String>,
}

/// What the redirect capture server observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    Code(String),
    Error(String),
    StateMismatch { received: Option<String> },
    TimedOut,
}

/// Query parameters delivered to the redirect endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            // First occurrence wins.
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }

    /// Turns the callback into a result, checking the echoed state against `expected_state`.
    pub fn into_result(self, expected_state: Option<&str>) -> AuthorizationResult {
        if let Some(expected) = expected_state {
            if self.state.as_deref() != Some(expected) {
                return AuthorizationResult::StateMismatch {
                    received: self.state,
                };
            }
        }

        match self.code {
            Some(code) if !code.is_empty() => AuthorizationResult::Code(code),
            _ => AuthorizationResult::Error(self.failure_reason()),
        }
    }

    fn failure_reason(&self) -> String {
        match (&self.error, &self.error_description) {
            (Some(error), Some(description)) => format!("{error}: {description}"),
            (Some(error), None) => error.clone(),
            (None, _) => "missing authorization code".to_string(),
        }
    }
}

fn default_token_type() -> String {
    "bearer".to_string()
}

// `"token_type": null` reads as the default.
fn token_type_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_token_type))
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type", deserialize_with = "token_type_or_default")]
    pub token_type: String,
    #[serde(default, rename = "expires_in", skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
    #[serde(flatten)]
    pub raw: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.is_some())
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_in_seconds: None,
            raw: HashMap::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}
