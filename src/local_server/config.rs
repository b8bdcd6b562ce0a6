use url::{Host, Url};

use crate::OAuthError;

pub(crate) const DEFAULT_SUCCESS_HTML: &str = include_str!("html/success.html");
pub(crate) const DEFAULT_ERROR_HTML: &str = include_str!("html/error.html");

#[derive(Debug, Clone)]
pub struct LocalServerConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub success_html: String,
    pub error_html: String,
}

impl LocalServerConfig {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: normalize_path(path.into()),
            success_html: DEFAULT_SUCCESS_HTML.to_string(),
            error_html: DEFAULT_ERROR_HTML.to_string(),
        }
    }

    /// Derives host and path from `redirect_uri`; the listener binds `port`.
    pub fn from_redirect_uri(redirect_uri: &str, port: u16) -> Result<Self, OAuthError> {
        let url = Url::parse(redirect_uri)?;
        if url.scheme() != "http" {
            return Err(OAuthError::InvalidRedirectUri(
                "redirect uri must use http scheme".to_string(),
            ));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => {
                return Err(OAuthError::InvalidRedirectUri(
                    "redirect uri is missing host".to_string(),
                ));
            }
        };

        Ok(Self::new(host, port, url.path()))
    }

    pub fn with_success_html(mut self, html: impl Into<String>) -> Self {
        self.success_html = html.into();
        self
    }

    pub fn with_error_html(mut self, html: impl Into<String>) -> Self {
        self.error_html = html.into();
        self
    }
}

fn normalize_path(path: String) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}
