//! Domain-to-IP translation for `DOMAIN` ATYP requests.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::errors::ResolutionError;

/// Resolves a domain name to one or more IP addresses. The session uses the
/// first entry returned. No caching is mandated.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, domain: &str, port: u16) -> Result<Vec<IpAddr>, ResolutionError>;
}

/// Uses the OS resolver via `tokio::net::lookup_host`, which is acceptable
/// per spec.
pub struct TokioResolver;

#[async_trait]
impl Resolver for TokioResolver {
    async fn resolve(&self, domain: &str, port: u16) -> Result<Vec<IpAddr>, ResolutionError> {
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((domain, port))
            .await
            .map_err(|source| ResolutionError::Failed {
                domain: domain.to_string(),
                source,
            })?
            .map(|addr| addr.ip())
            .collect();

        if addrs.is_empty() {
            return Err(ResolutionError::Empty(domain.to_string()));
        }
        Ok(addrs)
    }
}
