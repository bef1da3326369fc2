//! Token invalidation endpoint
//!
//! Expires the token cookies of one endpoint. When an access token is
//! present the request must echo it in `?token=`; a cross-site page cannot
//! read the cookie and so cannot log the user out.

use axum::{
    extract::Request,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::http::{check_method, query_params, redirect_response};
use crate::oauth::CookieTokenStore;
use crate::{Error, Result};

const FIELD_TOKEN: &str = "token";
const FIELD_RETURN_URI: &str = "return_uri";

/// `/{name}/remove` resource
#[derive(Debug, Clone)]
pub struct InvalidationEndpoint {
    name: String,
    store: CookieTokenStore,
}

impl InvalidationEndpoint {
    /// Create an invalidation endpoint over the cookies of `store`
    pub fn new(name: impl Into<String>, store: CookieTokenStore) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    /// Handle a request
    pub async fn handle(&self, request: Request) -> Response {
        match self.invalidate(&request) {
            Ok(response) => response,
            Err(e) => {
                warn!(endpoint = %self.name, error = %e, "Invalidation refused");
                e.into_response()
            }
        }
    }

    fn invalidate(&self, request: &Request) -> Result<Response> {
        check_method(request.method(), &Method::GET)?;

        let mut params = query_params(request.uri());
        let access_token = self
            .store
            .access_token(request.headers())
            .filter(|token| !token.is_empty());

        if let Some(access_token) = access_token {
            let supplied = params.remove(FIELD_TOKEN).unwrap_or_default();
            let matches = constant_time_eq(supplied.as_bytes(), access_token.as_bytes());
            if !matches {
                return Err(Error::Forbidden(
                    "Wrong token specified for invalidation".to_string(),
                ));
            }
        }

        let writes = self.store.clear(request.headers())?;
        debug!(endpoint = %self.name, cleared = writes.values().len(), "Tokens invalidated");

        // Cookies are cleared even when the redirect target is refused
        let mut response = match params.remove(FIELD_RETURN_URI) {
            Some(location) if !location.is_empty() => {
                redirect_response(&location).unwrap_or_else(|e| {
                    warn!(endpoint = %self.name, error = %e, "Refused redirect");
                    e.into_response()
                })
            }
            _ => StatusCode::OK.into_response(),
        };
        writes.apply(&mut response);
        Ok(response)
    }
}

/// Compare without short-circuiting on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
