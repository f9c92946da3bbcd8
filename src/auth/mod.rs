//! Request authentication
//!
//! The proxy runs with exactly one auth directive: disabled, HTTP basic, or
//! OpenID Connect bearer tokens. Authentication happens before query
//! parameters are parsed and before any session state is touched.

mod basic;
mod oidc;

pub use basic::BasicAuthenticator;
pub use oidc::OidcAuthenticator;

use axum::http::HeaderMap;

use crate::config::ProxyConfig;
use crate::error::Result;

/// The authenticated caller of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
}

impl Principal {
    fn anonymous() -> Self {
        Self {
            name: "anonymous".to_string(),
        }
    }
}

enum AuthMode {
    Disabled,
    Basic(BasicAuthenticator),
    Oidc(OidcAuthenticator),
}

/// Applies the configured auth directive to incoming requests
pub struct Authenticator {
    mode: AuthMode,
}

impl Authenticator {
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let mode = if config.basic_auth.enabled {
            AuthMode::Basic(BasicAuthenticator::new(&config.basic_auth)?)
        } else if config.openid_connect.enabled {
            AuthMode::Oidc(OidcAuthenticator::new(&config.openid_connect)?)
        } else {
            AuthMode::Disabled
        };
        Ok(Self { mode })
    }

    /// Authenticate one request from its headers
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal> {
        match &self.mode {
            AuthMode::Disabled => Ok(Principal::anonymous()),
            AuthMode::Basic(basic) => basic.authenticate(headers).map(|name| Principal { name }),
            AuthMode::Oidc(oidc) => oidc
                .authenticate(headers)
                .await
                .map(|name| Principal { name }),
        }
    }
}
