//! Shared fixtures: an in-process authorization and resource server

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use oauth_gateway::config::{
    AuthorizationConfig, Config, CookieConfig, EndpointConfig, GrantSenderConfig, GrantType,
    ResourceEndpointConfig, ResourceServerConfig,
};
use oauth_gateway::gateway::Gateway;

/// `base64("client:secret")`
pub const CLIENT_CREDENTIALS: &str = "Basic Y2xpZW50OnNlY3JldA==";

/// A request received by the mock server
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl Recorded {
    /// Decoded form body
    pub fn form(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .into_owned()
            .collect()
    }

    /// Value of the Authorization header
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone, Default)]
struct MockState {
    recorded: Arc<Mutex<Vec<Recorded>>>,
    replies: Arc<Mutex<VecDeque<(StatusCode, String)>>>,
}

/// Answers scripted replies in order and records every request
pub struct MockServer {
    pub url: String,
    state: MockState,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .fallback(record_and_reply)
            .with_state(state.clone());

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    /// Queue a JSON reply
    pub fn reply(&self, status: u16, body: Value) {
        self.reply_raw(status, &body.to_string());
    }

    /// Queue a raw text reply
    pub fn reply_raw(&self, status: u16, body: &str) {
        self.state
            .replies
            .lock()
            .unwrap()
            .push_back((StatusCode::from_u16(status).unwrap(), body.to_string()));
    }

    /// Requests received so far
    pub fn recorded(&self) -> Vec<Recorded> {
        self.state.recorded.lock().unwrap().clone()
    }
}

async fn record_and_reply(State(state): State<MockState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap();

    state.recorded.lock().unwrap().push(Recorded {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(ToString::to_string),
        headers: parts.headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let (status, body) = state
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or((StatusCode::OK, "{}".to_string()));

    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Gateway configuration against the mock server
///
/// Endpoints: `app` (authorization code, cookies `at`/`rt`) and `login`
/// (password, cookies `pat`/`prt`). Resource server `api` trusts `app`.
pub fn config(mock_url: &str) -> Config {
    let mut app = EndpointConfig::new(GrantType::AuthorizationCode, CookieConfig::new("at", "rt"));
    app.redirect_uri = Some("https://www.example.org/app".to_string());
    app.return_uri = Some("/".to_string());

    let mut login = EndpointConfig::new(GrantType::Password, CookieConfig::new("pat", "prt"));
    login.scope = Some("profile".to_string());

    let mut endpoints = BTreeMap::new();
    endpoints.insert("app".to_string(), app);
    endpoints.insert("login".to_string(), login);

    let mut resource_servers = BTreeMap::new();
    resource_servers.insert(
        "api".to_string(),
        ResourceServerConfig {
            host: format!("{mock_url}/api"),
            endpoint: ResourceEndpointConfig {
                name: "app".to_string(),
                access_token_name: "at".to_string(),
            },
            unsafe_https: false,
        },
    );

    Config {
        authorization: AuthorizationConfig {
            sender: GrantSenderConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                auth_server_url: mock_url.to_string(),
                ..GrantSenderConfig::default()
            },
            endpoints,
            resource_servers,
        },
        ..Config::default()
    }
}

/// Add a client credentials endpoint `service` with cookies `sat`/`srt`
pub fn with_service(mut config: Config) -> Config {
    let mut service =
        EndpointConfig::new(GrantType::ClientCredentials, CookieConfig::new("sat", "srt"));
    service.scope = Some("internal".to_string());
    config
        .authorization
        .endpoints
        .insert("service".to_string(), service);
    config
}

/// HTTP client that never goes through a system proxy
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Gateway router over `config`
pub fn router(config: Config) -> Router {
    Gateway::with_client(config, http_client())
        .unwrap()
        .router()
}

/// Send one request through a router
pub async fn send(router: &Router, request: axum::http::Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

/// GET with an optional Cookie header
pub fn get(uri: &str, cookie: Option<&str>) -> axum::http::Request<Body> {
    let mut builder = axum::http::Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

/// POST a URL-encoded form
pub fn post_form(uri: &str, form: &str) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

/// Response body as JSON
pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        return json!(null);
    }
    serde_json::from_slice(&bytes).unwrap()
}

/// All Set-Cookie header values
pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// Location header
pub fn location(response: &Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}
