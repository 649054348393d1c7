pub mod auth;
pub mod gateway;
pub mod proxy;
pub mod rate_limiter;
pub mod responses;
pub mod signer;

pub use auth::JwtAuthenticator;
pub use gateway::Gateway;
pub use proxy::{ProxyCache, ServiceProxy};
pub use rate_limiter::RateLimiterRegistry;
pub use signer::RequestSigner;
