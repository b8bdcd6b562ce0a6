use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, header};
use tracing::{debug, warn};

use crate::{OAuthConfig, OAuthError, TokenSet};

/// Talks to the provider's token endpoint with HTTP Basic client authentication.
#[derive(Clone)]
pub struct TokenExchange {
    http: Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
}

impl std::fmt::Debug for TokenExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchange")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl TokenExchange {
    pub fn new(config: &OAuthConfig, http: Client) -> Self {
        Self {
            http,
            token_endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope(),
        }
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, OAuthError> {
        if code.is_empty() {
            return Err(OAuthError::MissingAuthorizationCode);
        }

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", self.scope.as_str()),
        ];

        debug!(endpoint = %self.token_endpoint, "exchanging authorization code");
        self.send_token_request(&form).await
    }

    /// Uses a refresh token to obtain a new access token. The previous refresh
    /// token is carried over when the provider does not rotate it.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OAuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        debug!(endpoint = %self.token_endpoint, "refreshing access token");
        let mut tokens = self.send_token_request(&form).await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    fn basic_authorization(&self) -> String {
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", STANDARD.encode(credentials))
    }

    async fn send_token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, OAuthError> {
        let response = self
            .http
            .post(&self.token_endpoint)
            .header(header::AUTHORIZATION, self.basic_authorization())
            .header(header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(OAuthError::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(OAuthError::Network)?;

        if !status.is_success() {
            let err = token_error(status.as_u16(), body);
            warn!(status = status.as_u16(), "token endpoint rejected request");
            return Err(err);
        }

        let tokens: TokenSet =
            serde_json::from_str(&body).map_err(|err| OAuthError::InvalidResponse {
                message: err.to_string(),
                body: String::new(),
            })?;

        if tokens.access_token.is_empty() {
            return Err(OAuthError::InvalidResponse {
                message: "token response has an empty access_token".to_string(),
                body: String::new(),
            });
        }

        Ok(tokens)
    }
}

fn token_error(status: u16, body: String) -> OAuthError {
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => OAuthError::TokenExchange {
            status,
            error: json
                .get("error")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
            body: json.to_string(),
        },
        Err(_) => OAuthError::TokenExchange {
            status,
            error: None,
            body,
        },
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn exchange_for(server: &MockServer) -> TokenExchange {
        let config = OAuthConfig::new("abc", "s3cret")
            .with_token_endpoint(format!("{}/oauth/token", server.uri()))
            .with_redirect_uri("http://localhost:8002");
        TokenExchange::new(&config, Client::new())
    }

    #[tokio::test]
    async fn exchanges_code_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            // base64("abc:s3cret")
            .and(header("authorization", "Basic YWJjOnMzY3JldA=="))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=ABC123"))
            .and(body_string_contains("redirect_uri=http%3A%2F%2Flocalhost%3A8002"))
            .and(body_string_contains("scope=tasks%3Aread+tasks%3Awrite"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = exchange_for(&server).exchange_code("ABC123").await.unwrap();

        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(tokens.expires_in_seconds, Some(3600));
    }

    #[tokio::test]
    async fn rejected_exchange_carries_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let err = exchange_for(&server)
            .exchange_code("expired")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("invalid_grant"));
        match err {
            OAuthError::TokenExchange { status, error, .. } => {
                assert_eq!(status, 400);
                assert_eq!(error.as_deref(), Some("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_body_is_kept_raw() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = exchange_for(&server).exchange_code("c").await.unwrap_err();

        assert!(matches!(
            err,
            OAuthError::TokenExchange { status: 502, error: None, ref body } if body == "bad gateway"
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = OAuthConfig::new("abc", "s3cret")
            .with_token_endpoint(format!("http://127.0.0.1:{port}/oauth/token"));
        let err = TokenExchange::new(&config, Client::new())
            .exchange_code("c")
            .await
            .unwrap_err();

        assert!(matches!(err, OAuthError::Network(_)));
    }

    #[tokio::test]
    async fn refresh_keeps_previous_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "at-2"})),
            )
            .mount(&server)
            .await;

        let tokens = exchange_for(&server).refresh("rt-old").await.unwrap();

        assert_eq!(tokens.access_token, "at-2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-old"));
    }

    #[tokio::test]
    async fn empty_code_is_rejected_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = exchange_for(&server).exchange_code("").await.unwrap_err();

        assert!(matches!(err, OAuthError::MissingAuthorizationCode));
    }
}
