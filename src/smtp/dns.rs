use std::net::{SocketAddr, ToSocketAddrs};

use crate::mx::{LookupMx, MxStatus, resolve_with};
use crate::smtp::error::SmtpError;

#[derive(Debug, Clone)]
pub struct HostCandidate {
    pub host: String,
    pub preference: u16,
    pub addresses: Vec<SocketAddr>,
}

/// MX hosts for `domain`, best preference first, with the implicit MX
/// (A/AAAA of the domain itself) as fallback.
pub fn resolve_hosts(
    resolver: &dyn LookupMx,
    domain: &str,
    max_hosts: usize,
    allow_ipv6: bool,
) -> Result<Vec<HostCandidate>, SmtpError> {
    let status =
        resolve_with(resolver, domain).map_err(|source| SmtpError::Lookup { source })?;

    let mut hosts = Vec::new();
    if let MxStatus::Records(records) = &status {
        for record in records {
            let addresses = resolve_addrs(&record.exchange, 25, allow_ipv6)?;
            if addresses.is_empty() {
                continue;
            }
            hosts.push(HostCandidate {
                host: record.exchange.clone(),
                preference: record.preference,
                addresses,
            });
        }
    }

    if hosts.is_empty() {
        let addresses = resolve_addrs(domain, 25, allow_ipv6)?;
        if addresses.is_empty() {
            return Err(SmtpError::NoSmtpServers);
        }
        hosts.push(HostCandidate {
            host: domain.to_string(),
            preference: 0,
            addresses,
        });
    }

    hosts.sort_by_key(|h| h.preference);
    hosts.truncate(max_hosts.max(1));
    Ok(hosts)
}

pub fn resolve_addrs(
    host: &str,
    port: u16,
    allow_ipv6: bool,
) -> Result<Vec<SocketAddr>, SmtpError> {
    let iter = (host, port).to_socket_addrs().map_err(SmtpError::io)?;
    Ok(iter.filter(|addr| allow_ipv6 || addr.is_ipv4()).collect())
}
