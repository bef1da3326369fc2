//! Configuration loading and gateway construction tests

mod common;

use std::io::Write;

use axum::http::StatusCode;
use serde_json::json;

use common::{get, json_body, send};
use oauth_gateway::config::{Config, GrantType};
use oauth_gateway::gateway::Gateway;

const CONFIG: &str = r#"
server:
  port: 39555
authorization:
  client_id: "${OAUTH_GATEWAY_IT_CLIENT_ID:-web}"
  client_secret: secret
  auth_server_url: https://auth.example.org
  token_endpoint_path: /oauth/token
  timeout: 5000
  forward_headers: [x-request-id]
  endpoints:
    app:
      grant_type: authorization_code
      redirect_uri: https://www.example.org/app
      return_uri: /
      cookie:
        access_token_name: at
        refresh_token_name: rt
    login:
      grant_type: password
      max_body_size: 1024
      cookie:
        access_token_name: pat
        refresh_token_name: prt
        secure: true
"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_full_configuration() {
    let file = write_config(CONFIG);
    let config = Config::load(Some(file.path())).unwrap();
    config.validate().unwrap();

    assert_eq!(config.server.port, 39555);
    assert_eq!(config.server.host, "127.0.0.1");

    let auth = &config.authorization;
    assert_eq!(auth.sender.client_id, "web");
    assert_eq!(auth.sender.token_url(), "https://auth.example.org/oauth/token");
    assert_eq!(auth.sender.timeout, 5000);
    assert_eq!(auth.sender.forward_headers, vec!["x-request-id".to_string()]);

    let login = &auth.endpoints["login"];
    assert_eq!(login.grant_type, GrantType::Password);
    assert_eq!(login.max_body_size, 1024);
    assert_eq!(login.cookie.secure, Some(true));
}

#[test]
fn gateway_lists_routes() {
    let file = write_config(CONFIG);
    let gateway = Gateway::new(Config::load(Some(file.path())).unwrap()).unwrap();

    let paths: Vec<String> = gateway.routes().into_iter().map(|r| r.path).collect();
    assert_eq!(
        paths,
        vec!["/app", "/app/refresh", "/app/remove", "/login", "/login/refresh", "/login/remove"]
    );
}

#[test]
fn unknown_grant_type_fails_to_load() {
    let file = write_config(&CONFIG.replace("grant_type: password", "grant_type: implicit"));
    assert!(Config::load(Some(file.path())).is_err());
}

#[test]
fn colon_in_client_secret_fails_construction() {
    let file = write_config(&CONFIG.replace("client_secret: secret", "client_secret: \"se:cret\""));
    let config = Config::load(Some(file.path())).unwrap();
    assert!(Gateway::new(config).is_err());
}

#[test]
fn reserved_endpoint_name_fails_validation() {
    let file = write_config(&CONFIG.replace("    login:", "    health:"));
    let config = Config::load(Some(file.path())).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("reserved"));
}

#[tokio::test]
async fn health_reports_version() {
    let file = write_config(CONFIG);
    let app = Gateway::new(Config::load(Some(file.path())).unwrap())
        .unwrap()
        .router();

    let response = send(&app, get("/health", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"status": "healthy", "version": env!("CARGO_PKG_VERSION")})
    );
}
