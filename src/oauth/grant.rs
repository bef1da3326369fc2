//! Grant sender
//!
//! Posts grants to the token endpoint of the authorization server
//! (RFC 6749 §4) with HTTP Basic client authentication (§2.3.1).

use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{
    Client, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::GrantSenderConfig;
use crate::http::{FORM_CONTENT_TYPE, parse_content};
use crate::{Error, Result};

/// Grant sent to the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// RFC 6749 §4.1.3
    AuthorizationCode {
        /// Code received from the authorization server
        code: String,
        /// Redirect URI used when the code was requested
        redirect_uri: String,
    },
    /// RFC 6749 §4.4.2
    ClientCredentials {
        /// Requested scope
        scope: Option<String>,
    },
    /// RFC 6749 §4.3.2
    Password {
        /// Resource owner username
        username: String,
        /// Resource owner password
        password: String,
        /// Requested scope
        scope: Option<String>,
    },
    /// RFC 6749 §6
    RefreshToken {
        /// Refresh token issued earlier
        refresh_token: String,
        /// Requested scope
        scope: Option<String>,
    },
}

impl Grant {
    /// Value of the `grant_type` field
    #[must_use]
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::ClientCredentials { .. } => "client_credentials",
            Self::Password { .. } => "password",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }

    /// Form fields of the token request, `grant_type` first
    ///
    /// An empty scope is left out.
    #[must_use]
    pub fn form_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![("grant_type", self.grant_type())];

        let scope = match self {
            Self::AuthorizationCode { code, redirect_uri } => {
                fields.push(("code", code));
                fields.push(("redirect_uri", redirect_uri));
                None
            }
            Self::ClientCredentials { scope } => scope.as_deref(),
            Self::Password {
                username,
                password,
                scope,
            } => {
                fields.push(("username", username));
                fields.push(("password", password));
                scope.as_deref()
            }
            Self::RefreshToken {
                refresh_token,
                scope,
            } => {
                fields.push(("refresh_token", refresh_token));
                scope.as_deref()
            }
        };

        if let Some(scope) = scope.filter(|s| !s.is_empty()) {
            fields.push(("scope", scope));
        }

        fields
    }
}

/// Sends grants for one OAuth client registration
#[derive(Debug, Clone)]
pub struct GrantSender {
    /// HTTP client for token requests
    http_client: Client,

    /// Full token endpoint URL
    token_url: String,

    /// `Basic` credentials header value
    credentials: HeaderValue,

    /// Inbound headers copied onto token requests
    forward_headers: Vec<HeaderName>,
}

impl GrantSender {
    /// Create a sender with its own HTTP client
    ///
    /// The client honors `timeout` and `unsafe_https` from the config.
    pub fn new(config: &GrantSenderConfig) -> Result<Self> {
        config.validate()?;

        let http_client = Client::builder()
            .timeout(Duration::from_millis(config.timeout))
            .danger_accept_invalid_certs(config.unsafe_https)
            .build()?;

        Self::with_client(http_client, config)
    }

    /// Create a sender around an existing HTTP client
    pub fn with_client(http_client: Client, config: &GrantSenderConfig) -> Result<Self> {
        config.validate()?;

        let encoded = STANDARD.encode(format!("{}:{}", config.client_id, config.client_secret));
        let credentials = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|e| Error::Config(format!("Invalid client credentials: {e}")))?;

        let forward_headers = config
            .forward_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| Error::Config(format!("Invalid forwarded header \"{name}\": {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            http_client,
            token_url: config.token_url(),
            credentials,
            forward_headers,
        })
    }

    /// Token endpoint this sender posts to
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Send a grant and return the raw success body
    ///
    /// Non-200 answers become [`Error::Upstream`] carrying the status
    /// and the RFC 6749 §5.2 error body.
    pub async fn send(&self, grant: &Grant, inbound: &HeaderMap) -> Result<Value> {
        let started = Instant::now();
        debug!(grant_type = grant.grant_type(), url = %self.token_url, "Sending grant");

        let response = self
            .http_client
            .post(&self.token_url)
            .headers(self.prepare_headers(inbound))
            .form(&grant.form_fields())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let content = parse_content(&text);

        trace!(
            grant_type = grant.grant_type(),
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis(),
            "Token endpoint answered"
        );

        if status == StatusCode::OK {
            return Ok(content);
        }

        warn!(
            grant_type = grant.grant_type(),
            status = status.as_u16(),
            "Grant rejected by authorization server"
        );
        Err(Error::upstream(status, content))
    }

    fn prepare_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for name in &self.forward_headers {
            for value in inbound.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        headers.insert(AUTHORIZATION, self.credentials.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        headers
    }
}
