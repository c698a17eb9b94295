//! Refuses URLs that point at loopback, private or otherwise internal hosts,
//! both by literal address and by what the name resolves to.

use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use tracing::warn;

use super::FetchError;

const DNS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// DNS lookup seam so the resolves-to-private-address path can be tested offline.
pub trait DnsResolver {
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, FetchError>;
}

pub struct TokioDnsResolver;

impl DnsResolver for TokioDnsResolver {
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, FetchError> {
        let addrs = tokio::time::timeout(
            DNS_LOOKUP_TIMEOUT,
            tokio::net::lookup_host(format!("{host}:{port}")),
        )
        .await
        .map_err(|_| FetchError::DnsResolution("DNS lookup timed out".to_string()))?
        .map_err(|e| FetchError::DnsResolution(e.to_string()))?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

pub struct HostGuard<R> {
    resolver: R,
    allow_private_hosts: bool,
}

impl<R: DnsResolver> HostGuard<R> {
    pub fn new(resolver: R, allow_private_hosts: bool) -> Self {
        Self {
            resolver,
            allow_private_hosts,
        }
    }

    /// Scheme check always applies; address checks unless private hosts are allowed.
    pub async fn check(&self, raw: &str) -> Result<(), FetchError> {
        let parsed = parse_http_url(raw)?;
        if self.allow_private_hosts {
            return Ok(());
        }

        if is_internal_host(&parsed) {
            warn!(url = %redact_credentials(raw), "refusing fetch of internal host");
            return Err(FetchError::InternalHost);
        }

        if let Some(url::Host::Domain(domain)) = parsed.host() {
            let port = parsed.port_or_known_default().unwrap_or(80);
            for ip in self.resolver.lookup(domain, port).await? {
                if is_internal_ip(ip) {
                    warn!(host = %domain, ip = %ip, "host resolves to internal address");
                    return Err(FetchError::InternalHost);
                }
            }
        }
        Ok(())
    }
}

/// Drops `user:password@` before a URL reaches the logs.
pub(super) fn redact_credentials(raw: &str) -> Cow<'_, str> {
    if !raw.contains('@') {
        return Cow::Borrowed(raw);
    }
    if let Ok(mut parsed) = url::Url::parse(raw)
        && (!parsed.username().is_empty() || parsed.password().is_some())
    {
        let _ = parsed.set_username("");
        let _ = parsed.set_password(None);
        return Cow::Owned(parsed.to_string());
    }
    Cow::Borrowed(raw)
}

fn parse_http_url(raw: &str) -> Result<url::Url, FetchError> {
    let parsed = url::Url::parse(raw)?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(FetchError::InvalidScheme),
    }
}

fn is_internal_host(parsed: &url::Url) -> bool {
    match parsed.host() {
        Some(url::Host::Ipv4(v4)) => is_internal_ip(IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_internal_ip(IpAddr::V6(v6)),
        Some(url::Host::Domain(domain)) => {
            let lower = domain.trim_end_matches('.').to_ascii_lowercase();
            lower == "localhost"
                || [".localhost", ".local", ".internal", ".arpa"]
                    .iter()
                    .any(|suffix| lower.ends_with(suffix))
        }
        None => true,
    }
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || is_v6_link_local(&v6)
                || is_v6_unique_local(&v6)
                || v6.to_ipv4_mapped().is_some_and(is_internal_v4)
        }
    }
}

fn is_internal_v4(v4: Ipv4Addr) -> bool {
    let [a, b, ..] = v4.octets();
    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        || a == 0
        // carrier-grade NAT, 100.64.0.0/10
        || (a == 100 && (64..=127).contains(&b))
}

fn is_v6_link_local(v6: &Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}

fn is_v6_unique_local(v6: &Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}
