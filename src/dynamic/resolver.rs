//! Hostname resolution.
//!
//! Lookups block the calling thread; they only ever run on a dedicated lookup
//! thread or during an administrative call.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Translates a hostname into socket addresses.
///
/// Only reports addresses. Health and membership stay with the pool.
pub trait AddressResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl AddressResolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let mut addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        // getaddrinfo reports one entry per socket type on some platforms.
        let mut seen = Vec::with_capacity(addrs.len());
        addrs.retain(|a| {
            if seen.contains(a) {
                false
            } else {
                seen.push(*a);
                true
            }
        });
        Ok(addrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_addresses_resolve_without_network() {
        let addrs = SystemResolver.resolve("127.0.0.1", 8080).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8080".parse().unwrap()]);

        let addrs = SystemResolver.resolve("::1", 80).unwrap();
        assert_eq!(addrs, vec!["[::1]:80".parse().unwrap()]);
    }
}
