//! Flow registry
//!
//! Builds every configured endpoint and mounts it:
//!
//! | Path | Resource |
//! |---|---|
//! | `/{name}` | grant exchange of the configured grant type |
//! | `/{name}/refresh` | refresh token exchange |
//! | `/{name}/remove` | invalidation |
//!
//! Client credentials endpoints also install a middleware over the whole
//! router, except their own three resources.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{Router, extract::Request, http::Method, middleware, routing::any};
use reqwest::Client;
use tracing::info;

use super::flow::{GrantFlowEndpoint, GrantStrategy};
use super::invalidation::InvalidationEndpoint;
use super::middleware::client_credentials_middleware;
use crate::config::{AuthorizationConfig, EndpointConfig, GrantType, ResourceServerConfig};
use crate::http::{endpoint_path, refresh_path, remove_path};
use crate::oauth::{CookieTokenStore, GrantSender, ResourceServerClient};
use crate::{Error, Result};

/// Route of a mounted resource, for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    /// Request path
    pub path: String,
    /// Accepted method
    pub method: Method,
    /// Grant type or `invalidation`
    pub purpose: &'static str,
}

/// Resources mounted for one configured endpoint
#[derive(Debug, Clone)]
struct MountedEndpoint {
    primary: Arc<GrantFlowEndpoint>,
    refresh: Arc<GrantFlowEndpoint>,
    remove: Arc<InvalidationEndpoint>,
}

/// All grant flows built from configuration
#[derive(Debug, Clone)]
pub struct FlowRegistry {
    endpoints: BTreeMap<String, MountedEndpoint>,
    middlewares: Vec<Arc<GrantFlowEndpoint>>,
    resource_servers: BTreeMap<String, ResourceServerConfig>,
    http_client: Option<Client>,
}

impl FlowRegistry {
    /// Build the registry with HTTP clients configured from `config`
    pub fn new(config: &AuthorizationConfig) -> Result<Self> {
        let sender = Arc::new(GrantSender::new(&config.sender)?);
        Self::build(config, sender, None)
    }

    /// Build the registry on a shared HTTP client
    ///
    /// The client is used for the token endpoint and every resource server.
    pub fn with_client(http_client: Client, config: &AuthorizationConfig) -> Result<Self> {
        let sender = Arc::new(GrantSender::with_client(http_client.clone(), &config.sender)?);
        Self::build(config, sender, Some(http_client))
    }

    fn build(
        config: &AuthorizationConfig,
        sender: Arc<GrantSender>,
        http_client: Option<Client>,
    ) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(Error::Config("Authorization endpoints not found".to_string()));
        }

        let mut endpoints = BTreeMap::new();
        let mut middlewares = Vec::new();

        for (name, endpoint_config) in &config.endpoints {
            endpoint_config.validate(name)?;
            let store = CookieTokenStore::new(endpoint_config.cookie.clone())?;

            let flow = |strategy| {
                Arc::new(GrantFlowEndpoint::new(
                    name.clone(),
                    strategy,
                    endpoint_config.scope.clone(),
                    Arc::clone(&sender),
                    store.clone(),
                ))
            };

            let primary = flow(primary_strategy(name, endpoint_config)?);
            if endpoint_config.grant_type == GrantType::ClientCredentials {
                middlewares.push(Arc::clone(&primary));
            }

            endpoints.insert(
                name.clone(),
                MountedEndpoint {
                    primary,
                    refresh: flow(GrantStrategy::RefreshToken),
                    remove: Arc::new(InvalidationEndpoint::new(name.clone(), store.clone())),
                },
            );
            info!(endpoint = %name, grant_type = %endpoint_config.grant_type, "Registered grant flow");
        }

        Ok(Self {
            endpoints,
            middlewares,
            resource_servers: config.resource_servers.clone(),
            http_client,
        })
    }

    /// Names of the configured endpoints
    pub fn endpoint_names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Every mounted resource
    #[must_use]
    pub fn routes(&self) -> Vec<RouteInfo> {
        let mut routes = Vec::with_capacity(self.endpoints.len() * 3);
        for (name, mounted) in &self.endpoints {
            let strategy = mounted.primary.strategy();
            routes.push(RouteInfo {
                path: endpoint_path(name),
                method: strategy.method(),
                purpose: strategy.grant_type(),
            });
            routes.push(RouteInfo {
                path: refresh_path(name),
                method: Method::GET,
                purpose: GrantStrategy::RefreshToken.grant_type(),
            });
            routes.push(RouteInfo {
                path: remove_path(name),
                method: Method::GET,
                purpose: "invalidation",
            });
        }
        routes
    }

    /// Router with every grant flow resource
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let mut router = Router::new();

        for (name, mounted) in &self.endpoints {
            let primary = Arc::clone(&mounted.primary);
            let refresh = Arc::clone(&mounted.refresh);
            let remove = Arc::clone(&mounted.remove);

            router = router
                .route(
                    &endpoint_path(name),
                    any(move |request: Request| {
                        let primary = Arc::clone(&primary);
                        async move { primary.handle(request).await }
                    }),
                )
                .route(
                    &refresh_path(name),
                    any(move |request: Request| {
                        let refresh = Arc::clone(&refresh);
                        async move { refresh.handle(request).await }
                    }),
                )
                .route(
                    &remove_path(name),
                    any(move |request: Request| {
                        let remove = Arc::clone(&remove);
                        async move { remove.handle(request).await }
                    }),
                );
        }

        router
    }

    /// Wrap a router in the client credentials middlewares
    ///
    /// Applies to every route already added to `router`.
    pub fn layer_middlewares<S>(&self, mut router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        for endpoint in &self.middlewares {
            router = router.layer(middleware::from_fn_with_state(
                Arc::clone(endpoint),
                client_credentials_middleware,
            ));
        }
        router
    }

    /// Create a client for a configured resource server
    pub fn create_resource_server(&self, name: &str) -> Result<ResourceServerClient> {
        let config = self.resource_servers.get(name).ok_or_else(|| {
            Error::Config(format!("Configuration for resource server \"{name}\" not found"))
        })?;

        match &self.http_client {
            Some(client) => ResourceServerClient::with_client(client.clone(), config.clone()),
            None => ResourceServerClient::new(config.clone()),
        }
    }

    /// Create clients for every configured resource server
    pub fn create_resource_servers(&self) -> Result<BTreeMap<String, ResourceServerClient>> {
        self.resource_servers
            .keys()
            .map(|name| Ok((name.clone(), self.create_resource_server(name)?)))
            .collect()
    }
}

fn primary_strategy(name: &str, config: &EndpointConfig) -> Result<GrantStrategy> {
    let strategy = match config.grant_type {
        GrantType::AuthorizationCode => {
            let (Some(redirect_uri), Some(return_uri)) =
                (config.redirect_uri.clone(), config.return_uri.clone())
            else {
                return Err(Error::Config(format!(
                    "\"redirect_uri\" and \"return_uri\" must be set for endpoint \"{name}\""
                )));
            };
            GrantStrategy::AuthorizationCode {
                redirect_uri,
                return_uri,
            }
        }
        GrantType::ClientCredentials => GrantStrategy::ClientCredentials,
        GrantType::Password => GrantStrategy::PasswordCredentials {
            max_body_size: config.max_body_size,
        },
    };
    Ok(strategy)
}
