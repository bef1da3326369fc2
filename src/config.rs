//! Configuration management

use std::{collections::BTreeMap, env, path::Path, sync::LazyLock, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default access token cookie lifetime (1 hour)
pub const DEFAULT_ACCESS_TOKEN_EXPIRATION: u64 = 3600;
/// Default refresh token cookie lifetime (about 100 years)
pub const DEFAULT_REFRESH_TOKEN_EXPIRATION: u64 = 3_110_400_000;
/// Default password form size limit
pub const DEFAULT_MAX_BODY_SIZE: usize = 512;

/// Endpoint names that would collide with gateway routes
const RESERVED_NAMES: &[&str] = &["health", "resources"];

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("valid env var regex")
});

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// OAuth 2.0 client configuration
    pub authorization: AuthorizationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            shutdown_timeout: 30,
        }
    }
}

impl ServerConfig {
    /// Graceful shutdown timeout
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// OAuth 2.0 client section: one client registration, its endpoints
/// and the resource servers trusting its tokens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Client registration and token endpoint transport
    #[serde(flatten)]
    pub sender: GrantSenderConfig,
    /// Grant flow endpoints by name
    pub endpoints: BTreeMap<String, EndpointConfig>,
    /// Resource servers by name
    pub resource_servers: BTreeMap<String, ResourceServerConfig>,
}

/// Client credentials and transport parameters for the token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantSenderConfig {
    /// Client ID (supports `${VAR}`)
    pub client_id: String,
    /// Client secret (supports `${VAR}`)
    pub client_secret: String,
    /// Base URL of the authorization server
    pub auth_server_url: String,
    /// Path of the token endpoint on the authorization server
    pub token_endpoint_path: String,
    /// Grant send timeout in milliseconds
    pub timeout: u64,
    /// Accept invalid TLS certificates from the authorization server
    pub unsafe_https: bool,
    /// Inbound request headers copied onto token requests
    pub forward_headers: Vec<String>,
}

impl Default for GrantSenderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_server_url: String::new(),
            token_endpoint_path: "/token".to_string(),
            timeout: 30_000,
            unsafe_https: false,
            forward_headers: Vec::new(),
        }
    }
}

impl GrantSenderConfig {
    /// Check required fields
    ///
    /// A colon in the client ID or secret would break the Basic
    /// credentials encoding (RFC 6749 §2.3.1).
    pub fn validate(&self) -> Result<()> {
        if self.auth_server_url.is_empty() {
            return Err(Error::Config(
                "Config parameter \"auth_server_url\" must be specified".to_string(),
            ));
        }
        url::Url::parse(&self.auth_server_url).map_err(|e| {
            Error::Config(format!("Invalid \"auth_server_url\" {}: {e}", self.auth_server_url))
        })?;
        if self.client_id.is_empty() {
            return Err(Error::Config(
                "Config parameter \"client_id\" must be specified".to_string(),
            ));
        }
        if self.client_secret.is_empty() {
            return Err(Error::Config(
                "Config parameter \"client_secret\" must be specified".to_string(),
            ));
        }
        if self.client_id.contains(':') || self.client_secret.contains(':') {
            return Err(Error::Config(
                "Client ID or client secret must not contain colon (':') character".to_string(),
            ));
        }
        Ok(())
    }

    /// Full token endpoint URL
    #[must_use]
    pub fn token_url(&self) -> String {
        let path = if self.token_endpoint_path.is_empty() {
            "/token"
        } else {
            self.token_endpoint_path.as_str()
        };
        let base = self.auth_server_url.trim_end_matches('/');

        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

/// Grant type served by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization code grant
    AuthorizationCode,
    /// Client credentials grant (endpoint plus auto-acquiring middleware)
    ClientCredentials,
    /// Resource owner password credentials grant
    Password,
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthorizationCode => write!(f, "authorization_code"),
            Self::ClientCredentials => write!(f, "client_credentials"),
            Self::Password => write!(f, "password"),
        }
    }
}

/// Grant flow endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Grant type of the primary endpoint
    pub grant_type: GrantType,
    /// Access scope requested by the endpoint
    #[serde(default)]
    pub scope: Option<String>,
    /// Redirect URI used for obtaining the code (authorization code only)
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Where to send the user agent after authorization (authorization code only)
    #[serde(default)]
    pub return_uri: Option<String>,
    /// Upper bound of the password form body in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Token cookie configuration
    pub cookie: CookieConfig,
}

fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}

impl EndpointConfig {
    /// Create an endpoint configuration with defaults
    #[must_use]
    pub fn new(grant_type: GrantType, cookie: CookieConfig) -> Self {
        Self {
            grant_type,
            scope: None,
            redirect_uri: None,
            return_uri: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            cookie,
        }
    }

    /// Validate the endpoint configured under `name`
    pub fn validate(&self, name: &str) -> Result<()> {
        validate_endpoint_name(name)?;
        self.cookie.validate()?;

        if self.grant_type == GrantType::AuthorizationCode {
            if self.redirect_uri.as_deref().is_none_or(str::is_empty) {
                return Err(Error::Config(format!(
                    "\"redirect_uri\" not found in config of endpoint \"{name}\""
                )));
            }
            if self.return_uri.as_deref().is_none_or(str::is_empty) {
                return Err(Error::Config(format!(
                    "\"return_uri\" not found in config of endpoint \"{name}\""
                )));
            }
        }

        Ok(())
    }
}

/// Validate that an endpoint name is usable as a single path segment
pub fn validate_endpoint_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("Endpoint name must be specified".to_string()));
    }
    if name.contains(['/', '?', '#', '{', '}', '*']) || name.chars().any(char::is_whitespace) {
        return Err(Error::Config(format!(
            "Endpoint name \"{name}\" must be a single URL path segment"
        )));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::Config(format!("Endpoint name \"{name}\" is reserved")));
    }
    Ok(())
}

/// Token cookie configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Name of the access token cookie
    pub access_token_name: String,
    /// Name of the refresh token cookie
    pub refresh_token_name: String,
    /// Access cookie lifetime when the server sends no `expires_in`
    pub access_token_expires_in: u64,
    /// Refresh cookie lifetime
    pub refresh_token_expires_in: u64,
    /// Path attribute
    pub path: String,
    /// Domain attribute
    pub domain: Option<String>,
    /// Secure attribute
    pub secure: Option<bool>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            access_token_name: String::new(),
            refresh_token_name: String::new(),
            access_token_expires_in: DEFAULT_ACCESS_TOKEN_EXPIRATION,
            refresh_token_expires_in: DEFAULT_REFRESH_TOKEN_EXPIRATION,
            path: "/".to_string(),
            domain: None,
            secure: None,
        }
    }
}

impl CookieConfig {
    /// Create a cookie configuration with default lifetimes and path
    #[must_use]
    pub fn new(access_token_name: impl Into<String>, refresh_token_name: impl Into<String>) -> Self {
        Self {
            access_token_name: access_token_name.into(),
            refresh_token_name: refresh_token_name.into(),
            ..Self::default()
        }
    }

    /// Both cookie names must be set and be valid cookie names
    pub fn validate(&self) -> Result<()> {
        if self.access_token_name.is_empty() || self.refresh_token_name.is_empty() {
            return Err(Error::Config(
                "At least two parameters: \"cookie.access_token_name\" and \"cookie.refresh_token_name\" must be set"
                    .to_string(),
            ));
        }
        for name in [&self.access_token_name, &self.refresh_token_name] {
            if !is_cookie_token(name) {
                return Err(Error::Config(format!("Invalid cookie name \"{name}\"")));
            }
        }
        Ok(())
    }

    /// Path attribute, `/` when unset
    #[must_use]
    pub fn path(&self) -> &str {
        if self.path.is_empty() { "/" } else { &self.path }
    }

    /// Domain attribute, `None` when unset or empty
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref().filter(|d| !d.is_empty())
    }
}

/// RFC 6265 §4.1.1 cookie-name (an RFC 2616 token)
fn is_cookie_token(name: &str) -> bool {
    name.bytes().all(|b| {
        b.is_ascii_graphic()
            && !matches!(
                b,
                b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/'
                    | b'[' | b']' | b'?' | b'=' | b'{' | b'}'
            )
    })
}

/// Protected resource server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceServerConfig {
    /// Base URL of the resource server (supports `${VAR}`)
    pub host: String,
    /// Endpoint whose tokens the resource server trusts
    pub endpoint: ResourceEndpointConfig,
    /// Accept invalid TLS certificates from the resource server
    #[serde(default)]
    pub unsafe_https: bool,
}

/// Link between a resource server and a grant flow endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEndpointConfig {
    /// Name of the grant flow endpoint
    pub name: String,
    /// Name of the access token cookie
    pub access_token_name: String,
}

impl ResourceServerConfig {
    /// Check required fields
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("\"host\" parameter not defined".to_string()));
        }
        url::Url::parse(&self.host)
            .map_err(|e| Error::Config(format!("Invalid resource server host {}: {e}", self.host)))?;
        if self.endpoint.name.is_empty() {
            return Err(Error::Config("\"endpoint.name\" parameter not defined".to_string()));
        }
        if self.endpoint.access_token_name.is_empty() {
            return Err(Error::Config(
                "\"endpoint.access_token_name\" parameter not defined".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (OAUTH_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("OAUTH_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in credentials and URLs
        config.expand_env_vars();

        Ok(config)
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        let authorization = &self.authorization;

        if authorization.endpoints.is_empty() {
            return Err(Error::Config("Authorization endpoints not found".to_string()));
        }

        authorization.sender.validate()?;

        for (name, endpoint) in &authorization.endpoints {
            endpoint.validate(name)?;
        }

        for (name, server) in &authorization.resource_servers {
            server.validate()?;
            if !authorization.endpoints.contains_key(&server.endpoint.name) {
                return Err(Error::Config(format!(
                    "Resource server \"{name}\" refers to unknown endpoint \"{}\"",
                    server.endpoint.name
                )));
            }
        }

        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        let sender = &mut self.authorization.sender;
        for value in [
            &mut sender.client_id,
            &mut sender.client_secret,
            &mut sender.auth_server_url,
        ] {
            *value = expand_string(value);
        }

        for server in self.authorization.resource_servers.values_mut() {
            server.host = expand_string(&server.host);
        }
    }
}

/// Expand environment variables in a string
fn expand_string(value: &str) -> String {
    ENV_VAR_RE
        .replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}
