//! SSRF guard for proxied camera targets.
//!
//! Every candidate URL is parsed, classified and, for hostnames, resolved on
//! each call. Verdicts are never cached: a hostname that was public a minute
//! ago may point at the LAN now.

use crate::{BlockReason, CoreResult, RelayError, UpstreamErrorKind};

use std::{
    future::Future,
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    panic::Location,
};

use error_location::ErrorLocation;
use tracing::{debug, instrument, warn};
use url::{Host, Url};

/// Ports a camera may be reached on when no override is configured.
pub const DEFAULT_ALLOWED_PORTS: &[u16] = &[80, 443, 8000, 8080, 8081, 8443, 8888];

/// Dynamic-DNS providers whose hostnames may legitimately resolve to a LAN
/// address (hairpin NAT on the camera owner's network).
pub const DEFAULT_DDNS_SUFFIXES: &[&str] = &["duckdns.org", "no-ip.org", "ddns.net", "dynu.net"];

/// Allow-lists consulted by [`UrlGuard`].
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    /// Destination ports that may be proxied.
    pub allowed_ports: Vec<u16>,
    /// Hostname suffixes exempt from the private-address rule.
    pub ddns_suffixes: Vec<String>,
    /// Literal address prefixes (e.g. `192.168.1.`) exempt from the
    /// private-address rule.
    pub lan_prefixes: Vec<String>,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            allowed_ports: DEFAULT_ALLOWED_PORTS.to_vec(),
            ddns_suffixes: DEFAULT_DDNS_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            lan_prefixes: Vec::new(),
        }
    }
}

/// A target accepted by the guard. Valid for one proxied request only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    /// The parsed URL.
    pub url: Url,
    /// `http` or `https`.
    pub scheme: String,
    /// Hostname or literal address.
    pub host: String,
    /// Explicit or scheme-default port.
    pub port: u16,
    /// Addresses approved during validation. Connections must use exactly
    /// these so a second DNS answer cannot redirect them. Empty for literal
    /// address targets.
    pub resolved: Vec<SocketAddr>,
}

/// Address classification used by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// Globally routable.
    Public,
    /// RFC 1918, CGNAT, unique-local and other non-routable unicast ranges.
    Private,
    /// Loopback, unspecified, multicast and broadcast.
    Loopback,
    /// Link-local unicast.
    LinkLocal,
}

/// Classify an address.
pub fn classify(ip: IpAddr) -> AddressClass {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    }
}

fn classify_v4(ip: Ipv4Addr) -> AddressClass {
    let [a, b, c, _] = ip.octets();

    if ip.is_loopback() || ip.is_unspecified() || ip.is_broadcast() || ip.is_multicast() {
        return AddressClass::Loopback;
    }
    if ip.is_link_local() {
        return AddressClass::LinkLocal;
    }

    let carrier_nat = a == 100 && (b & 0xc0) == 64;
    let benchmarking = a == 198 && (b & 0xfe) == 18;
    let ietf_protocol = a == 192 && b == 0 && c == 0;
    let this_network = a == 0;
    let reserved = a >= 240;

    if ip.is_private()
        || ip.is_documentation()
        || carrier_nat
        || benchmarking
        || ietf_protocol
        || this_network
        || reserved
    {
        return AddressClass::Private;
    }

    AddressClass::Public
}

fn classify_v6(ip: Ipv6Addr) -> AddressClass {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return classify_v4(mapped);
    }
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return AddressClass::Loopback;
    }
    if let Some(embedded) = embedded_ipv4(ip) {
        return classify_v4(embedded);
    }

    let first = ip.segments()[0];
    if (first & 0xffc0) == 0xfe80 {
        return AddressClass::LinkLocal;
    }

    let unique_local = (first & 0xfe00) == 0xfc00;
    let site_local = (first & 0xffc0) == 0xfec0;
    let documentation = first == 0x2001 && ip.segments()[1] == 0x0db8;
    if unique_local || site_local || documentation {
        return AddressClass::Private;
    }

    AddressClass::Public
}

/// The IPv4 address carried by a NAT64 (`64:ff9b::/96`), 6to4 (`2002::/16`)
/// or IPv4-compatible (`::a.b.c.d`) address. These route to the embedded
/// address, so they classify as it does.
fn embedded_ipv4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    let seg = ip.segments();
    let octets = ip.octets();
    let tail = Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]);

    if seg[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        return Some(tail);
    }
    if seg[0] == 0x2002 {
        return Some(Ipv4Addr::new(octets[2], octets[3], octets[4], octets[5]));
    }
    if seg[..6] == [0, 0, 0, 0, 0, 0] {
        return Some(tail);
    }
    None
}

/// DNS lookup seam.
pub trait Resolver: Send + Sync {
    /// Resolve `host` to every address it currently maps to.
    fn resolve(&self, host: &str, port: u16) -> impl Future<Output = io::Result<Vec<IpAddr>>> + Send;
}

/// Resolver backed by the operating system. Lookups run on tokio's blocking
/// pool so a slow resolver never stalls other requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> impl Future<Output = io::Result<Vec<IpAddr>>> + Send {
        let target = format!("{host}:{port}");
        async move {
            let addrs = tokio::net::lookup_host(target).await?;
            Ok(addrs.map(|addr| addr.ip()).collect())
        }
    }
}

/// Fail-closed URL validator.
pub struct UrlGuard<R = SystemResolver> {
    policy: GuardPolicy,
    resolver: R,
}

impl UrlGuard<SystemResolver> {
    /// Guard using the system resolver.
    pub fn new(policy: GuardPolicy) -> Self {
        Self::with_resolver(policy, SystemResolver)
    }
}

impl<R: Resolver> UrlGuard<R> {
    /// Guard using a custom resolver.
    pub fn with_resolver(policy: GuardPolicy, resolver: R) -> Self {
        Self { policy, resolver }
    }

    /// The active policy.
    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Validate `raw` and return the accepted target.
    ///
    /// Rules, in order: scheme, loopback/link-local literal, private literal
    /// (unless LAN-prefix allow-listed), port allow-list, then DNS for
    /// hostnames where every resolved address must pass.
    #[instrument(skip(self))]
    pub async fn validate(&self, raw: &str) -> CoreResult<StreamTarget> {
        let url = Url::parse(raw.trim()).map_err(|e| RelayError::InvalidUrl {
            reason: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let scheme = url.scheme().to_string();
        if scheme != "http" && scheme != "https" {
            return Err(self.reject(BlockReason::UnsupportedScheme, &url));
        }

        let host = match url.host() {
            Some(host) => host.to_owned(),
            None => return Err(self.reject(BlockReason::MissingHost, &url)),
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| self.reject(BlockReason::MissingHost, &url))?;

        match host {
            Host::Ipv4(v4) => self.check_literal(IpAddr::V4(v4), &url)?,
            Host::Ipv6(v6) => self.check_literal(IpAddr::V6(v6), &url)?,
            Host::Domain(ref name) => {
                if is_localhost_name(name) {
                    return Err(self.reject(BlockReason::LoopbackAddress, &url));
                }
            }
        }

        if !self.policy.allowed_ports.contains(&port) {
            return Err(self.reject(BlockReason::DisallowedPort(port), &url));
        }

        let (host_name, resolved) = match host {
            Host::Domain(name) => {
                let addrs = self.check_resolved(&name, port, &url).await?;
                let resolved = addrs.into_iter().map(|ip| SocketAddr::new(ip, port)).collect();
                (name, resolved)
            }
            Host::Ipv4(v4) => (v4.to_string(), Vec::new()),
            Host::Ipv6(v6) => (v6.to_string(), Vec::new()),
        };

        debug!(host = %host_name, port, "Target accepted");

        Ok(StreamTarget {
            url,
            scheme,
            host: host_name,
            port,
            resolved,
        })
    }

    #[track_caller]
    fn check_literal(&self, ip: IpAddr, url: &Url) -> CoreResult<()> {
        match classify(ip) {
            AddressClass::Public => Ok(()),
            AddressClass::Loopback => Err(self.reject(BlockReason::LoopbackAddress, url)),
            AddressClass::LinkLocal => Err(self.reject(BlockReason::LinkLocalAddress, url)),
            AddressClass::Private => {
                if self.lan_prefix_allowed(ip) {
                    Ok(())
                } else {
                    Err(self.reject(BlockReason::PrivateAddress, url))
                }
            }
        }
    }

    async fn check_resolved(&self, name: &str, port: u16, url: &Url) -> CoreResult<Vec<IpAddr>> {
        let ddns = self.ddns_allowed(name);

        let addrs = self
            .resolver
            .resolve(name, port)
            .await
            .map_err(|e| RelayError::upstream(UpstreamErrorKind::Dns, e.to_string()))?;

        if addrs.is_empty() {
            return Err(RelayError::upstream(
                UpstreamErrorKind::Dns,
                format!("{name} resolved to no addresses"),
            ));
        }

        for ip in &addrs {
            let acceptable = match classify(*ip) {
                AddressClass::Public => true,
                AddressClass::Private => ddns || self.lan_prefix_allowed(*ip),
                AddressClass::Loopback | AddressClass::LinkLocal => false,
            };
            if !acceptable {
                return Err(self.reject(BlockReason::ResolvedToPrivate, url));
            }
        }

        debug!(host = %name, resolved = addrs.len(), ddns, "DNS answer accepted");

        Ok(addrs)
    }

    fn ddns_allowed(&self, name: &str) -> bool {
        let name = name.trim_end_matches('.');
        self.policy.ddns_suffixes.iter().any(|suffix| {
            let suffix = suffix.trim_start_matches('.');
            name == suffix || name.ends_with(&format!(".{suffix}"))
        })
    }

    fn lan_prefix_allowed(&self, ip: IpAddr) -> bool {
        let text = ip.to_string();
        self.policy
            .lan_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && text.starts_with(prefix.as_str()))
    }

    #[track_caller]
    fn reject(&self, reason: BlockReason, url: &Url) -> RelayError {
        warn!(reason = reason.code(), scheme = url.scheme(), "Target blocked");
        RelayError::blocked(reason)
    }
}

fn is_localhost_name(name: &str) -> bool {
    let name = name.trim_end_matches('.');
    name == "localhost" || name.ends_with(".localhost")
}
