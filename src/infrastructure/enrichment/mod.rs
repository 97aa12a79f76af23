//! Best-effort enrichment collaborators for access records.
//!
//! Lookups may fail independently; callers store whatever succeeded.

mod geo;
mod user_agent;

pub use geo::{GeoInfo, GeoLocator, LOCAL_NETWORK, NetworkClassLocator};
pub use user_agent::{AgentInfo, RegexUserAgentParser, UserAgentParser};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnrichError {
    #[error("invalid client address: {0}")]
    InvalidAddress(String),

    #[error("unrecognized user agent")]
    UnknownAgent,

    #[error("lookup failed: {0}")]
    Lookup(String),
}
