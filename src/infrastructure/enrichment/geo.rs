//! Client geolocation.

use async_trait::async_trait;
use std::net::IpAddr;

use super::EnrichError;

/// Country marker for addresses that never leave the local network.
pub const LOCAL_NETWORK: &str = "LAN";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: &str) -> Result<GeoInfo, EnrichError>;
}

/// Classifies addresses by network class only.
///
/// Loopback, private and link-local addresses resolve to [`LOCAL_NETWORK`];
/// public addresses resolve to an empty [`GeoInfo`] since no database is
/// consulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkClassLocator;

fn is_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unique_local() || v6.is_unicast_link_local()
        }
    }
}

#[async_trait]
impl GeoLocator for NetworkClassLocator {
    async fn locate(&self, ip: &str) -> Result<GeoInfo, EnrichError> {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| EnrichError::InvalidAddress(ip.to_string()))?;

        if is_local(&addr) {
            return Ok(GeoInfo {
                country: Some(LOCAL_NETWORK.to_string()),
                region: Some(LOCAL_NETWORK.to_string()),
                city: Some(LOCAL_NETWORK.to_string()),
            });
        }

        Ok(GeoInfo::default())
    }
}
