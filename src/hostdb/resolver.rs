/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{collections::HashMap, net::IpAddr, sync::Arc};

use async_trait::async_trait;
use log::debug;
use smol::lock::RwLock;
use url::{Host, Url};

use crate::{Error, Result};

/// Atomic pointer to a resolver
pub type ResolverPtr = Arc<dyn Resolver>;

/// Maps a host name to the set of addresses it currently points to.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Resolves names through the system resolver.
#[derive(Default)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        // Port is irrelevant, it is only needed by the lookup API.
        let addrs = smol::net::resolve((host, 0))
            .await
            .map_err(|e| Error::ResolutionFailure(format!("{}: {}", host, e)))?;

        let mut ips: Vec<IpAddr> = addrs.into_iter().map(|a| a.ip()).collect();
        ips.sort_unstable();
        ips.dedup();

        if ips.is_empty() {
            return Err(Error::ResolutionFailure(host.to_string()))
        }
        Ok(ips)
    }
}

/// Resolves names from a fixed table. Unknown names fail to resolve.
/// Entries can be changed at runtime to simulate re-announcements.
#[derive(Default)]
pub struct StaticResolver {
    table: RwLock<HashMap<String, Vec<IpAddr>>>,
}

impl StaticResolver {
    pub fn new(entries: impl IntoIterator<Item = (String, Vec<IpAddr>)>) -> Arc<Self> {
        Arc::new(Self { table: RwLock::new(entries.into_iter().collect()) })
    }

    pub async fn set(&self, host: &str, addrs: Vec<IpAddr>) {
        self.table.write().await.insert(host.to_string(), addrs);
    }

    pub async fn remove(&self, host: &str) {
        self.table.write().await.remove(host);
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        match self.table.read().await.get(host) {
            Some(addrs) if !addrs.is_empty() => Ok(addrs.clone()),
            _ => Err(Error::ResolutionFailure(host.to_string())),
        }
    }
}

/// Resolve the host of an announced address. IP literals are returned
/// as they are, domains go through `resolver`.
pub async fn resolve_host(resolver: &dyn Resolver, addr: &Url) -> Result<Vec<IpAddr>> {
    // Hack so special schemes parse IPs properly.
    // https://github.com/whatwg/url/issues/749
    let parsed;
    let addr = if addr.scheme() == "http" {
        addr
    } else {
        parsed = Url::parse(&addr.as_str().replacen(addr.scheme(), "http", 1))?;
        &parsed
    };

    match addr.host() {
        Some(Host::Ipv4(ip)) => Ok(vec![IpAddr::V4(ip)]),
        Some(Host::Ipv6(ip)) => Ok(vec![IpAddr::V6(ip)]),
        Some(Host::Domain(domain)) => {
            debug!(target: "hostdb::resolver::resolve_host()", "Resolving {}", domain);
            resolver.resolve(domain).await
        }
        None => Err(Error::ResolutionFailure(addr.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn static_table() {
        smol::block_on(async {
            let resolver = StaticResolver::new([(
                "host1.com".to_string(),
                vec![IpAddr::V4(Ipv4Addr::new(128, 0, 0, 1))],
            )]);

            let addr = Url::parse("tcp://host1.com:9982").unwrap();
            let ips = resolve_host(resolver.as_ref(), &addr).await.unwrap();
            assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(128, 0, 0, 1))]);

            let unknown = Url::parse("tcp://host9.com:9982").unwrap();
            let err = resolve_host(resolver.as_ref(), &unknown).await.unwrap_err();
            assert!(matches!(err, Error::ResolutionFailure(_)));

            resolver.remove("host1.com").await;
            assert!(resolve_host(resolver.as_ref(), &addr).await.is_err());
        });
    }

    #[test]
    fn literals_skip_resolver() {
        smol::block_on(async {
            let resolver = StaticResolver::default();

            let v4 = Url::parse("tcp://10.1.2.3:9982").unwrap();
            let ips = resolve_host(&resolver, &v4).await.unwrap();
            assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))]);

            let v6 = Url::parse("tcp://[2001:db8::1]:9982").unwrap();
            let ips = resolve_host(&resolver, &v6).await.unwrap();
            assert_eq!(ips, vec!["2001:db8::1".parse::<IpAddr>().unwrap()]);
        });
    }

    #[test]
    fn system_resolver() {
        smol::block_on(async {
            let ips = DnsResolver.resolve("127.0.0.1").await.unwrap();
            assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);

            let ips = DnsResolver.resolve("::1").await.unwrap();
            assert_eq!(ips, vec![IpAddr::V6(Ipv6Addr::LOCALHOST)]);

            let ips = DnsResolver.resolve("localhost").await.unwrap();
            assert!(!ips.is_empty());
            assert!(ips.iter().all(|ip| ip.is_loopback()));

            let err = DnsResolver.resolve("no-such-host.invalid").await.unwrap_err();
            assert!(matches!(err, Error::ResolutionFailure(_)));
        });
    }
}
