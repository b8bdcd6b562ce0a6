//! Flat `KEY=VALUE` credential file, compatible with a `.env` file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::{OAuthError, TokenSet};

pub const CLIENT_ID_KEY: &str = "TICKTICK_CLIENT_ID";
pub const CLIENT_SECRET_KEY: &str = "TICKTICK_CLIENT_SECRET";
pub const ACCESS_TOKEN_KEY: &str = "TICKTICK_ACCESS_TOKEN";
pub const REFRESH_TOKEN_KEY: &str = "TICKTICK_REFRESH_TOKEN";

pub const DEFAULT_CREDENTIALS_FILE: &str = ".env";

/// Key/value pairs read from the credential file, in file order.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    entries: IndexMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values are secrets.
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl Credentials {
    pub fn parse(contents: &str) -> Self {
        let mut entries = IndexMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                entries.insert(key.to_string(), value.to_string());
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Like [`Credentials::get`] but treats empty values as absent.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.non_empty(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.non_empty(REFRESH_TOKEN_KEY)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    path: PathBuf,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            client_id: None,
            client_secret: None,
        }
    }

    /// Client credentials written on save when the file does not hold them yet.
    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into()).filter(|id| !id.is_empty());
        self.client_secret = Some(client_secret.into()).filter(|secret| !secret.is_empty());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file; a missing file is an empty set of credentials.
    pub fn load(&self) -> Result<Credentials, OAuthError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Credentials::parse(&contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "credential file not found");
                Ok(Credentials::default())
            }
            Err(err) => Err(OAuthError::Io(err)),
        }
    }

    /// Merges `tokens` into the stored credentials and rewrites the file.
    pub fn save(&self, tokens: &TokenSet) -> Result<Credentials, OAuthError> {
        let mut credentials = self.load()?;

        credentials.insert(ACCESS_TOKEN_KEY, tokens.access_token.as_str());
        if let Some(refresh_token) = &tokens.refresh_token {
            credentials.insert(REFRESH_TOKEN_KEY, refresh_token.as_str());
        }

        if let Some(client_id) = &self.client_id {
            if !credentials.contains(CLIENT_ID_KEY) {
                credentials.insert(CLIENT_ID_KEY, client_id.as_str());
            }
        }
        if let Some(client_secret) = &self.client_secret {
            if !credentials.contains(CLIENT_SECRET_KEY) {
                credentials.insert(CLIENT_SECRET_KEY, client_secret.as_str());
            }
        }

        self.write(&credentials)
            .map_err(|source| OAuthError::Persist {
                path: self.path.clone(),
                source,
            })?;

        info!(path = %self.path.display(), "tokens saved");
        Ok(credentials)
    }

    // Sibling temp file, renamed over the original.
    fn write(&self, credentials: &Credentials) -> io::Result<()> {
        let mut tmp_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| DEFAULT_CREDENTIALS_FILE.into());
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        let result = (|| {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(credentials.render().as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIALS_FILE)
    }
}
