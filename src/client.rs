use std::fmt;

use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use crate::state::generate_state;
#[cfg(feature = "local-server")]
use crate::{AuthorizationResult, LocalServer};
use crate::{
    AuthorizationRequest, CredentialStore, OAuthConfig, OAuthError, TokenExchange, TokenSet,
};

/// Result of a completed authorization. Tokens survive a failed save.
#[derive(Debug)]
pub struct AuthOutcome {
    pub tokens: TokenSet,
    pub persist_error: Option<OAuthError>,
    store_path: String,
}

impl AuthOutcome {
    pub fn is_persisted(&self) -> bool {
        self.persist_error.is_none()
    }
}

impl fmt::Display for AuthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.persist_error {
            None => write!(
                f,
                "Authentication successful! Access token saved to {}.",
                self.store_path
            ),
            Some(err) => write!(
                f,
                "Authentication successful, but the access token could not be saved: {err}"
            ),
        }
    }
}

/// Drives the authorization code flow against TickTick.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: OAuthConfig,
    exchange: TokenExchange,
    store: CredentialStore,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, store: CredentialStore) -> Result<Self, OAuthError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.http_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(OAuthError::Network)?;
        Ok(Self::with_http_client(config, store, http))
    }

    pub fn with_http_client(config: OAuthConfig, store: CredentialStore, http: Client) -> Self {
        let store = store.with_client_credentials(&config.client_id, &config.client_secret);
        Self {
            exchange: TokenExchange::new(&config, http),
            config,
            store,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn token_exchange(&self) -> &TokenExchange {
        &self.exchange
    }

    pub fn authorization_request(&self) -> Result<AuthorizationRequest, OAuthError> {
        self.authorization_request_with_state(generate_state()?)
    }

    pub fn authorization_request_with_state(
        &self,
        state: String,
    ) -> Result<AuthorizationRequest, OAuthError> {
        let scope = self.config.scope();
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("state", state.as_str()),
        ];

        let mut url = Url::parse(&self.config.authorization_endpoint)?;
        url.query_pairs_mut().extend_pairs(params);

        Ok(AuthorizationRequest {
            authorization_url: url.to_string(),
            state,
            scopes: self.config.scopes.clone(),
        })
    }

    /// Runs one login: opens the browser, waits for the redirect and stores the tokens.
    #[cfg(all(feature = "local-server", feature = "browser"))]
    pub async fn start_auth_flow(&self) -> Result<AuthOutcome, OAuthError> {
        self.start_auth_flow_with(open_browser).await
    }

    /// Same as `start_auth_flow`, with `on_authorize` in place of the browser launch.
    /// It runs once the callback listener is already bound.
    #[cfg(feature = "local-server")]
    pub async fn start_auth_flow_with<F>(&self, on_authorize: F) -> Result<AuthOutcome, OAuthError>
    where
        F: FnOnce(&AuthorizationRequest) -> Result<(), OAuthError>,
    {
        self.config.validate()?;

        let auth = self.authorization_request()?;
        let server = LocalServer::from_redirect_uri(&self.config.redirect_uri, self.config.local_port)?
            .expect_state(auth.state.clone());
        let mut capture = server.start().await?;

        info!(port = capture.local_addr().port(), "waiting for authorization callback");

        if let Err(err) = on_authorize(&auth) {
            capture.stop().await;
            return Err(err);
        }

        match capture.wait(self.config.callback_timeout).await {
            AuthorizationResult::Code(code) => self.exchange_code(&code).await,
            AuthorizationResult::Error(reason) => Err(OAuthError::AuthorizationDenied { reason }),
            AuthorizationResult::StateMismatch { received } => {
                Err(OAuthError::StateMismatch { received })
            }
            AuthorizationResult::TimedOut => Err(OAuthError::TimedOut {
                timeout: self.config.callback_timeout,
            }),
        }
    }

    /// Exchanges `code` for tokens and persists them.
    pub async fn exchange_code(&self, code: &str) -> Result<AuthOutcome, OAuthError> {
        let tokens = self.exchange.exchange_code(code).await?;

        let persist_error = match self.store.save(&tokens) {
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "obtained tokens but could not save them");
                Some(err)
            }
        };

        Ok(AuthOutcome {
            tokens,
            persist_error,
            store_path: self.store.path().display().to_string(),
        })
    }
}

#[cfg(feature = "browser")]
fn open_browser(auth: &AuthorizationRequest) -> Result<(), OAuthError> {
    eprintln!("Opening browser for TickTick authorization...");
    eprintln!("If the browser doesn't open automatically, visit this URL:");
    eprintln!("{}", auth.authorization_url);
    if let Err(err) = webbrowser::open(&auth.authorization_url) {
        warn!(error = %err, "failed to open browser automatically");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    fn client_in(dir: &tempfile::TempDir, config: OAuthConfig) -> OAuthClient {
        OAuthClient::new(config, CredentialStore::new(dir.path().join(".env"))).unwrap()
    }

    #[test]
    fn authorization_url_includes_each_param_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = OAuthConfig::new("client-id", "secret")
            .with_redirect_uri("http://localhost:8002/cb?x=1&y=2")
            .with_scopes(["tasks:read", "tasks:write"]);
        let client = client_in(&dir, config);

        let auth = client
            .authorization_request_with_state("st+ate/=".to_string())
            .unwrap();

        let url = Url::parse(&auth.authorization_url).unwrap();
        assert!(auth.authorization_url.starts_with("https://ticktick.com/oauth/authorize?"));

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let keys: Vec<&str> = pairs.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(
            keys,
            ["client_id", "redirect_uri", "response_type", "scope", "state"]
        );

        let pairs: HashMap<_, _> = pairs.into_iter().collect();
        assert_eq!(pairs["client_id"], "client-id");
        assert_eq!(pairs["redirect_uri"], "http://localhost:8002/cb?x=1&y=2");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "tasks:read tasks:write");
        assert_eq!(pairs["state"], "st+ate/=");
    }

    #[test]
    fn authorization_url_is_stable_for_a_given_state() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(&dir, OAuthConfig::new("id", "secret"));

        let first = client.authorization_request_with_state("s".into()).unwrap();
        let second = client.authorization_request_with_state("s".into()).unwrap();

        assert_eq!(first.authorization_url, second.authorization_url);
    }

    #[test]
    fn each_request_gets_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(&dir, OAuthConfig::new("id", "secret"));

        let first = client.authorization_request().unwrap();
        let second = client.authorization_request().unwrap();

        assert_ne!(first.state, second.state);
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(&dir, OAuthConfig::new("", ""));

        let result = client
            .start_auth_flow_with(|_| panic!("browser must not be launched"))
            .await;

        assert!(matches!(result, Err(OAuthError::MissingCredentials)));
    }

    #[tokio::test]
    async fn timeout_returns_error_and_releases_port() {
        let dir = tempfile::tempdir().unwrap();
        let port = free_port();
        let config = OAuthConfig::new("id", "secret")
            .with_redirect_uri(format!("http://127.0.0.1:{port}/callback"))
            .with_local_port(port)
            .with_callback_timeout(Duration::from_millis(300));
        let client = client_in(&dir, config);

        let result = client.start_auth_flow_with(|_| Ok(())).await;

        assert!(matches!(result, Err(OAuthError::TimedOut { .. })));
        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[tokio::test]
    async fn full_flow_exchanges_code_and_persists_tokens() {
        let token_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("code=ABC123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-flow",
                "refresh_token": "rt-flow",
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&token_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let port = free_port();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");
        let config = OAuthConfig::new("id", "secret")
            .with_token_endpoint(format!("{}/oauth/token", token_server.uri()))
            .with_redirect_uri(redirect_uri.clone())
            .with_local_port(port)
            .with_callback_timeout(Duration::from_secs(10));
        let client = client_in(&dir, config);

        let outcome = client
            .start_auth_flow_with(move |auth| {
                let url = format!("{redirect_uri}?code=ABC123&state={}", auth.state);
                tokio::spawn(async move {
                    let _ = reqwest::get(url).await;
                });
                Ok(())
            })
            .await
            .unwrap();

        assert!(outcome.is_persisted());
        assert_eq!(outcome.tokens.access_token, "at-flow");
        assert!(outcome.to_string().starts_with("Authentication successful!"));

        let credentials = client.store().load().unwrap();
        assert_eq!(credentials.access_token(), Some("at-flow"));
        assert_eq!(credentials.refresh_token(), Some("rt-flow"));
        assert_eq!(credentials.get("TICKTICK_CLIENT_ID"), Some("id"));
    }

    #[tokio::test]
    async fn denied_consent_skips_exchange() {
        let token_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&token_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let port = free_port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let config = OAuthConfig::new("id", "secret")
            .with_token_endpoint(token_server.uri())
            .with_redirect_uri(redirect_uri.clone())
            .with_local_port(port)
            .with_callback_timeout(Duration::from_secs(10));
        let client = client_in(&dir, config);

        let result = client
            .start_auth_flow_with(move |auth| {
                let url = format!("{redirect_uri}?error=access_denied&state={}", auth.state);
                tokio::spawn(async move {
                    let _ = reqwest::get(url).await;
                });
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(OAuthError::AuthorizationDenied { ref reason }) if reason == "access_denied"
        ));
    }

    #[tokio::test]
    async fn forged_state_skips_exchange() {
        let token_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&token_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let port = free_port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let config = OAuthConfig::new("id", "secret")
            .with_token_endpoint(token_server.uri())
            .with_redirect_uri(redirect_uri.clone())
            .with_local_port(port)
            .with_callback_timeout(Duration::from_secs(10));
        let client = client_in(&dir, config);

        let result = client
            .start_auth_flow_with(move |_| {
                let url = format!("{redirect_uri}?code=X&state=forged");
                tokio::spawn(async move {
                    let _ = reqwest::get(url).await;
                });
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(OAuthError::StateMismatch { ref received }) if received.as_deref() == Some("forged")
        ));
        assert!(!dir.path().join(".env").exists());
    }

    #[tokio::test]
    async fn persistence_failure_keeps_tokens() {
        let token_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "kept"})),
            )
            .mount(&token_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = OAuthConfig::new("id", "secret").with_token_endpoint(token_server.uri());
        let store = CredentialStore::new(dir.path().join("missing-dir").join(".env"));
        let client = OAuthClient::new(config, store).unwrap();

        let outcome = client.exchange_code("code").await.unwrap();

        assert_eq!(outcome.tokens.access_token, "kept");
        assert!(matches!(outcome.persist_error, Some(OAuthError::Persist { .. })));
        assert!(!outcome.is_persisted());
        assert!(!format!("{outcome:?}").contains("kept"));
    }
}
