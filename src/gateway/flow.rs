//! Grant flow endpoints
//!
//! One request skeleton shared by every grant type:
//! extract input, send the grant, validate the issued authorization,
//! persist it into cookies and emit the response. The grant type only
//! decides how input is extracted and how the response looks.

use std::fmt;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    http::{Method, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, trace, warn};

use crate::http::{
    FORM_CONTENT_TYPE, check_content_type, check_method, endpoint_path, json_response,
    query_params, read_body_limited, redirect_response, refresh_path, remove_path, with_query,
};
use crate::oauth::{CookieTokenStore, CookieWrites, Grant, GrantSender, IssuedAuthorization};
use crate::{Error, Result};

const FIELD_CODE: &str = "code";
const FIELD_USERNAME: &str = "username";
const FIELD_PASSWORD: &str = "password";
const FIELD_SCOPE: &str = "scope";
const FIELD_RETURN_URI: &str = "return_uri";

/// Stage of a grant flow request, used for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    /// Reading the grant input from the request
    ExtractingInput,
    /// Waiting for the token endpoint
    AwaitingGrantResponse,
    /// Checking the issued authorization
    ValidatingIssuedAuth,
    /// Writing the token cookies
    PersistingTokens,
    /// Writing the response
    EmittingResponse,
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::ExtractingInput => "extracting_input",
            Self::AwaitingGrantResponse => "awaiting_grant_response",
            Self::ValidatingIssuedAuth => "validating_issued_auth",
            Self::PersistingTokens => "persisting_tokens",
            Self::EmittingResponse => "emitting_response",
        };
        f.write_str(stage)
    }
}

/// How a flow endpoint obtains its grant and answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantStrategy {
    /// Exchange `?code=` and redirect to `return_uri`
    AuthorizationCode {
        /// Redirect URI the code was requested with
        redirect_uri: String,
        /// Where to send the user agent afterwards
        return_uri: String,
    },
    /// Exchange the client's own credentials
    ClientCredentials,
    /// Exchange a username and password posted as a form
    PasswordCredentials {
        /// Upper bound of the form body in bytes
        max_body_size: usize,
    },
    /// Exchange the refresh token cookie
    RefreshToken,
}

impl GrantStrategy {
    /// Grant type name, for logs
    #[must_use]
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::PasswordCredentials { .. } => "password",
            Self::RefreshToken => "refresh_token",
        }
    }

    /// Method the endpoint answers to
    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::PasswordCredentials { .. } => Method::POST,
            _ => Method::GET,
        }
    }

    /// Build the grant from the request
    ///
    /// The body is only read by the password flow, up to its size limit.
    pub async fn extract_input(
        &self,
        parts: &Parts,
        body: Body,
        store: &CookieTokenStore,
        scope: Option<&str>,
    ) -> Result<Grant> {
        let scope = scope.map(ToString::to_string);

        match self {
            Self::AuthorizationCode { redirect_uri, .. } => {
                let code = query_params(&parts.uri)
                    .remove(FIELD_CODE)
                    .ok_or_else(|| required(FIELD_CODE))?;
                Ok(Grant::AuthorizationCode {
                    code,
                    redirect_uri: redirect_uri.clone(),
                })
            }
            Self::ClientCredentials => Ok(Grant::ClientCredentials { scope }),
            Self::PasswordCredentials { max_body_size } => {
                check_content_type(&parts.headers, FORM_CONTENT_TYPE)?;
                let upstream = read_body_limited(body, *max_body_size).await?;

                let mut fields: std::collections::HashMap<String, String> =
                    url::form_urlencoded::parse(&upstream).into_owned().collect();
                let username = fields
                    .remove(FIELD_USERNAME)
                    .ok_or_else(|| required(FIELD_USERNAME))?;
                let password = fields
                    .remove(FIELD_PASSWORD)
                    .ok_or_else(|| required(FIELD_PASSWORD))?;
                let scope = fields
                    .remove(FIELD_SCOPE)
                    .filter(|s| !s.is_empty())
                    .or(scope);

                Ok(Grant::Password {
                    username,
                    password,
                    scope,
                })
            }
            Self::RefreshToken => {
                let refresh_token = store.refresh_token(&parts.headers).ok_or_else(|| {
                    Error::BadRequest("Refresh token must be specified".to_string())
                })?;
                Ok(Grant::RefreshToken {
                    refresh_token,
                    scope,
                })
            }
        }
    }
}

fn required(field: &str) -> Error {
    Error::BadRequest(format!("\"{field}\" is required parameter"))
}

/// One mounted grant flow resource
#[derive(Debug, Clone)]
pub struct GrantFlowEndpoint {
    name: String,
    strategy: GrantStrategy,
    scope: Option<String>,
    sender: Arc<GrantSender>,
    store: CookieTokenStore,
}

impl GrantFlowEndpoint {
    /// Create an endpoint
    pub fn new(
        name: impl Into<String>,
        strategy: GrantStrategy,
        scope: Option<String>,
        sender: Arc<GrantSender>,
        store: CookieTokenStore,
    ) -> Self {
        Self {
            name: name.into(),
            strategy,
            scope: scope.filter(|s| !s.is_empty()),
            sender,
            store,
        }
    }

    /// Endpoint name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Grant strategy
    #[must_use]
    pub fn strategy(&self) -> &GrantStrategy {
        &self.strategy
    }

    /// Token cookie store
    #[must_use]
    pub fn store(&self) -> &CookieTokenStore {
        &self.store
    }

    /// Whether `path` is one of the resources mounted for this endpoint
    #[must_use]
    pub fn owns_path(&self, path: &str) -> bool {
        path == endpoint_path(&self.name)
            || path == refresh_path(&self.name)
            || path == remove_path(&self.name)
    }

    fn stage(&self, stage: FlowStage) {
        trace!(
            endpoint = %self.name,
            grant_type = self.strategy.grant_type(),
            %stage,
            "Grant flow stage"
        );
    }

    /// Run the grant exchange up to and including cookie persistence
    async fn exchange(
        &self,
        parts: &mut Parts,
        body: Body,
    ) -> Result<(IssuedAuthorization, CookieWrites)> {
        self.stage(FlowStage::ExtractingInput);
        let grant = self
            .strategy
            .extract_input(parts, body, &self.store, self.scope.as_deref())
            .await?;

        self.stage(FlowStage::AwaitingGrantResponse);
        let content = self.sender.send(&grant, &parts.headers).await?;

        self.stage(FlowStage::ValidatingIssuedAuth);
        let authorization = IssuedAuthorization::from_response(content)?;

        self.stage(FlowStage::PersistingTokens);
        let writes = self.store.persist(parts, &authorization)?;
        debug!(endpoint = %self.name, grant_type = grant.grant_type(), "Authorization issued");

        Ok((authorization, writes))
    }

    /// Handle a request to the endpoint
    pub async fn handle(&self, request: Request) -> Response {
        let (mut parts, body) = request.into_parts();

        if let Err(e) = check_method(&parts.method, &self.strategy.method()) {
            warn!(endpoint = %self.name, method = %parts.method, "Method not allowed");
            return e.into_response();
        }

        let requested_return = query_params(&parts.uri).remove(FIELD_RETURN_URI);

        let (authorization, writes) = match self.exchange(&mut parts, body).await {
            Ok(issued) => issued,
            Err(e) => {
                error!(endpoint = %self.name, grant_type = self.strategy.grant_type(), error = %e, "Grant flow failed");
                return self.failure_response(&parts, e, requested_return.as_deref());
            }
        };

        self.stage(FlowStage::EmittingResponse);
        let emitted = match &self.strategy {
            GrantStrategy::AuthorizationCode { return_uri, .. } => redirect_response(return_uri),
            GrantStrategy::RefreshToken => match requested_return.as_deref() {
                Some(location) => redirect_response(location),
                None => Ok(json_response(StatusCode::OK, &authorization.to_json())),
            },
            GrantStrategy::ClientCredentials | GrantStrategy::PasswordCredentials { .. } => {
                Ok(json_response(StatusCode::OK, &authorization.to_json()))
            }
        };

        let mut response = emitted.unwrap_or_else(|e| {
            warn!(endpoint = %self.name, error = %e, "Refused redirect");
            e.into_response()
        });
        writes.apply(&mut response);
        response
    }

    /// Refresh failures send the user agent to invalidation, others get
    /// the error body
    fn failure_response(&self, parts: &Parts, e: Error, return_uri: Option<&str>) -> Response {
        if self.strategy != GrantStrategy::RefreshToken {
            return e.into_response();
        }

        let access_token = self.store.access_token(&parts.headers);
        let mut params = Vec::with_capacity(2);
        if let Some(token) = access_token.as_deref() {
            params.push(("token", token));
        }
        if let Some(return_uri) = return_uri {
            params.push((FIELD_RETURN_URI, return_uri));
        }

        let location = with_query(&remove_path(&self.name), &params);
        redirect_response(&location).unwrap_or_else(IntoResponse::into_response)
    }

    /// Obtain a token before the request reaches the rest of the application
    ///
    /// Nothing happens when an access token cookie is already present or
    /// the request targets this endpoint's own resources. Failures are
    /// logged and the request continues without tokens.
    pub async fn acquire(&self, request: Request, next: Next) -> Response {
        if self.owns_path(request.uri().path())
            || self.store.access_token(request.headers()).is_some()
        {
            return next.run(request).await;
        }

        let (mut parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        // The client credentials grant never reads the body
        match self.exchange(&mut parts, Body::empty()).await {
            Ok((_, writes)) => {
                debug!(endpoint = %self.name, path = %path, "Client credentials token acquired");
                let mut response = next.run(Request::from_parts(parts, body)).await;
                writes.apply(&mut response);
                response
            }
            Err(e) => {
                error!(endpoint = %self.name, path = %path, error = %e, "Failed to acquire client credentials token");
                next.run(Request::from_parts(parts, body)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, header};

    use super::*;
    use crate::config::{CookieConfig, GrantSenderConfig};

    fn endpoint(strategy: GrantStrategy) -> GrantFlowEndpoint {
        let sender = GrantSender::new(&GrantSenderConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            auth_server_url: "http://127.0.0.1:9".to_string(),
            ..GrantSenderConfig::default()
        })
        .unwrap();
        GrantFlowEndpoint::new(
            "app",
            strategy,
            Some("read".to_string()),
            Arc::new(sender),
            CookieTokenStore::new(CookieConfig::new("at", "rt")).unwrap(),
        )
    }

    fn parts(method: Method, uri: &str, content_type: Option<&'static str>, cookie: Option<&'static str>) -> Parts {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, HeaderValue::from_static(cookie));
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn password() -> GrantStrategy {
        GrantStrategy::PasswordCredentials { max_body_size: 512 }
    }

    // =========================================================================
    // Input extraction
    // =========================================================================

    #[tokio::test]
    async fn authorization_code_reads_code_from_query() {
        let strategy = GrantStrategy::AuthorizationCode {
            redirect_uri: "/app".to_string(),
            return_uri: "/".to_string(),
        };
        let endpoint = endpoint(strategy.clone());

        let grant = strategy
            .extract_input(&parts(Method::GET, "/app?code=ABC", None, None), Body::empty(), endpoint.store(), None)
            .await
            .unwrap();
        assert_eq!(
            grant,
            Grant::AuthorizationCode {
                code: "ABC".to_string(),
                redirect_uri: "/app".to_string(),
            }
        );

        let err = strategy
            .extract_input(&parts(Method::GET, "/app", None, None), Body::empty(), endpoint.store(), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "\"code\" is required parameter");
    }

    #[tokio::test]
    async fn password_reads_form_and_falls_back_to_configured_scope() {
        let endpoint = endpoint(password());
        let grant = password()
            .extract_input(
                &parts(Method::POST, "/app", Some("application/x-www-form-urlencoded"), None),
                Body::from("username=jo+doe&password=p%40ss"),
                endpoint.store(),
                Some("read"),
            )
            .await
            .unwrap();
        assert_eq!(
            grant,
            Grant::Password {
                username: "jo doe".to_string(),
                password: "p@ss".to_string(),
                scope: Some("read".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn password_scope_from_body_wins() {
        let endpoint = endpoint(password());
        let grant = password()
            .extract_input(
                &parts(Method::POST, "/app", Some("application/x-www-form-urlencoded"), None),
                Body::from("username=u&password=p&scope=write"),
                endpoint.store(),
                Some("read"),
            )
            .await
            .unwrap();
        assert!(matches!(grant, Grant::Password { scope: Some(ref s), .. } if s == "write"));
    }

    #[tokio::test]
    async fn password_guards() {
        let endpoint = endpoint(password());
        let form = Some("application/x-www-form-urlencoded");

        let err = password()
            .extract_input(&parts(Method::POST, "/app", Some("application/json"), None), Body::empty(), endpoint.store(), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_ACCEPTABLE);

        let err = password()
            .extract_input(&parts(Method::POST, "/app", form, None), Body::from(vec![b'a'; 513]), endpoint.store(), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let err = password()
            .extract_input(&parts(Method::POST, "/app", form, None), Body::from("password=p"), endpoint.store(), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "\"username\" is required parameter");

        let err = password()
            .extract_input(&parts(Method::POST, "/app", form, None), Body::from("username=u"), endpoint.store(), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "\"password\" is required parameter");
    }

    #[tokio::test]
    async fn refresh_reads_cookie() {
        let endpoint = endpoint(GrantStrategy::RefreshToken);
        let grant = GrantStrategy::RefreshToken
            .extract_input(&parts(Method::GET, "/app/refresh", None, Some("rt=RT1")), Body::empty(), endpoint.store(), None)
            .await
            .unwrap();
        assert_eq!(
            grant,
            Grant::RefreshToken {
                refresh_token: "RT1".to_string(),
                scope: None,
            }
        );

        let err = GrantStrategy::RefreshToken
            .extract_input(&parts(Method::GET, "/app/refresh", None, None), Body::empty(), endpoint.store(), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Refresh token must be specified");
    }

    // =========================================================================
    // Request handling without the network
    // =========================================================================

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let endpoint = endpoint(password());
        let request = axum::http::Request::builder()
            .method(Method::GET)
            .uri("/app")
            .body(Body::empty())
            .unwrap();
        let response = endpoint.handle(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn refresh_without_cookie_redirects_to_remove() {
        let endpoint = endpoint(GrantStrategy::RefreshToken);
        let request = axum::http::Request::builder()
            .uri("/app/refresh?return_uri=%2Fpage")
            .header(header::COOKIE, "at=AT1")
            .body(Body::empty())
            .unwrap();
        let response = endpoint.handle(request).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/app/remove?token=AT1&return_uri=%2Fpage"
        );
    }

    #[test]
    fn owns_only_its_three_paths() {
        let endpoint = endpoint(GrantStrategy::ClientCredentials);
        assert!(endpoint.owns_path("/app"));
        assert!(endpoint.owns_path("/app/refresh"));
        assert!(endpoint.owns_path("/app/remove"));
        assert!(!endpoint.owns_path("/"));
        assert!(!endpoint.owns_path("/apps"));
        assert!(!endpoint.owns_path("/app/other"));
    }

    #[test]
    fn methods_per_strategy() {
        assert_eq!(password().method(), Method::POST);
        assert_eq!(GrantStrategy::RefreshToken.method(), Method::GET);
        assert_eq!(GrantStrategy::ClientCredentials.method(), Method::GET);
        assert_eq!(FlowStage::PersistingTokens.to_string(), "persisting_tokens");
    }
}
