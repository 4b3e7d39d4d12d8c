//! # Broker Address Resolution
//!
//! The session resolves its broker endpoint once per reconnect cycle. A host
//! string that is already a literal IP address never touches the resolver;
//! anything else goes through the [`ResolveAddr`] collaborator. A concrete
//! resolver over the `embassy-net` DNS client is provided.

use core::net::{IpAddr, SocketAddr};

use embassy_net::Stack;
use embassy_net::dns::DnsQueryType;

use crate::error::ResolveError;
use crate::fmt::Debug2Format;

/// Hostname-to-address resolution collaborator.
#[allow(async_fn_in_trait)]
pub trait ResolveAddr {
    /// The error type returned by a failed lookup.
    type Error: core::fmt::Debug;

    /// Resolves `host` to a connectable address for `port`.
    async fn resolve(&mut self, host: &str, port: u16) -> Result<SocketAddr, Self::Error>;
}

/// Parses `host` as a literal IP address, bypassing DNS entirely.
pub(crate) fn literal_addr(host: &str, port: u16) -> Option<SocketAddr> {
    host.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, port))
}

/// DNS resolver over an `embassy-net` stack.
#[derive(Clone, Copy)]
pub struct DnsResolver<'a> {
    stack: Stack<'a>,
}

impl<'a> DnsResolver<'a> {
    pub fn new(stack: Stack<'a>) -> Self {
        Self { stack }
    }
}

impl ResolveAddr for DnsResolver<'_> {
    type Error = ResolveError;

    async fn resolve(&mut self, host: &str, port: u16) -> Result<SocketAddr, Self::Error> {
        let addrs = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|e| {
                error!("DNS query for {} failed: {:?}", host, Debug2Format(&e));
                ResolveError::Lookup
            })?;

        let Some(first) = addrs.first().copied() else {
            return Err(ResolveError::NoRecords);
        };

        match first {
            embassy_net::IpAddress::Ipv4(v4) => Ok(SocketAddr::new(IpAddr::V4(v4), port)),
            #[allow(unreachable_patterns)]
            _ => Err(ResolveError::NoRecords),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_ipv4_skips_dns() {
        let addr = literal_addr("192.168.4.20", 1883).unwrap();
        assert_eq!(addr.port(), 1883);
        assert_eq!(addr.ip(), "192.168.4.20".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn hostname_is_not_a_literal() {
        assert!(literal_addr("test.broker.example", 1883).is_none());
        assert!(literal_addr("", 1883).is_none());
    }
}
