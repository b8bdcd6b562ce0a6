use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};

use crate::OAuthError;

// 240 bits of entropy, 40 url-safe characters once encoded.
const STATE_BYTES: usize = 30;

/// Generates a fresh CSRF `state` value for one authorization attempt.
pub fn generate_state() -> Result<String, OAuthError> {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| OAuthError::OsRng {
            message: err.to_string(),
        })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
