//! HTTP basic authentication

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::config::BasicAuthConfig;
use crate::error::{Result, WsGateError};

/// Validates `Authorization: Basic` credentials against the configured pair
pub struct BasicAuthenticator {
    realm: String,
    username: String,
    password: String,
}

impl BasicAuthenticator {
    pub fn new(config: &BasicAuthConfig) -> Result<Self> {
        let username = config
            .username
            .clone()
            .ok_or_else(|| WsGateError::config_msg("basic-auth.username is required"))?;
        let password = config
            .password
            .clone()
            .ok_or_else(|| WsGateError::config_msg("basic-auth.password is required"))?;
        Ok(Self {
            realm: config.realm.clone(),
            username,
            password,
        })
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Check the request's basic credentials and return the authenticated
    /// username.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                WsGateError::Authentication("missing Authorization header".to_string())
            })?;
        let encoded = header.strip_prefix("Basic ").ok_or_else(|| {
            WsGateError::Authentication("expected Basic authorization".to_string())
        })?;
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| WsGateError::Authentication("malformed Basic credentials".to_string()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| WsGateError::Authentication("malformed Basic credentials".to_string()))?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            WsGateError::Authentication("malformed Basic credentials".to_string())
        })?;

        let user_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
        if user_ok && pass_ok {
            Ok(username.to_string())
        } else {
            Err(WsGateError::Authentication(
                "invalid username or password".to_string(),
            ))
        }
    }
}

/// Compare without early exit so response timing does not leak the match
/// prefix length.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> BasicAuthenticator {
        BasicAuthenticator::new(&BasicAuthConfig {
            enabled: true,
            realm: "wsgate".to_string(),
            username: Some("proxy".to_string()),
            password: Some("secret".to_string()),
        })
        .unwrap()
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_valid_credentials() {
        let header = format!("Basic {}", BASE64.encode("proxy:secret"));
        let user = authenticator().authenticate(&headers_with(&header)).unwrap();
        assert_eq!(user, "proxy");
    }

    #[test]
    fn test_wrong_password() {
        let header = format!("Basic {}", BASE64.encode("proxy:nope"));
        assert!(authenticator().authenticate(&headers_with(&header)).is_err());
    }

    #[test]
    fn test_missing_header() {
        assert!(authenticator().authenticate(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_not_basic_scheme() {
        assert!(authenticator()
            .authenticate(&headers_with("Bearer abc"))
            .is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
