pub mod client;
pub mod credentials;
pub mod endpoints;
pub mod error;
pub mod mutation_limit;
pub mod parse;
pub mod proxy;
pub mod rate_limit;

pub use client::{ClientConfig, FollowingPager, ProtocolClient, SocialClient};
pub use credentials::{CredentialPool, CredentialPoolStats};
pub use endpoints::{Endpoint, ProtocolRequest, SearchProduct};
pub use error::{ClientError, Result};
pub use mutation_limit::{MutationKind, MutationLimiter, MutationLimits};
pub use proxy::ProxyPool;
pub use rate_limit::{RateLimitHeaders, RateLimiter};
