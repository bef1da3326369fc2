//! OAuth 2.0 client role
//!
//! Implements the client side of RFC 6749 for a web application:
//! - Grant sending to the token endpoint with Basic client authentication
//! - Validation of issued authorizations (Bearer only)
//! - Token storage in user agent cookies
//! - Bearer-decorated calls to protected resource servers

pub mod cookie;
pub mod grant;
pub mod resource;
pub mod token;

pub use cookie::{CookieSetup, CookieTokenStore, CookieWrites, EffectiveTokens};
pub use grant::{Grant, GrantSender};
pub use resource::{RequestContext, ResourceOutcome, ResourceRequest, ResourceServerClient};
pub use token::IssuedAuthorization;
