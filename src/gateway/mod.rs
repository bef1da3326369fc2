//! Gateway server implementation

pub mod flow;
pub mod flows;
pub mod invalidation;
mod middleware;
mod router;
mod server;

pub use flow::{FlowStage, GrantFlowEndpoint, GrantStrategy};
pub use flows::{FlowRegistry, RouteInfo};
pub use invalidation::InvalidationEndpoint;
pub use middleware::client_credentials_middleware;
pub use router::{AppState, create_router};
pub use server::Gateway;
