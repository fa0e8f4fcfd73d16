//! Gatekeeper for capture targets.
//!
//! Every URL passes through [`validate_url`] before a seed is stored or
//! enqueued. The crawler runs inside our network, so anything pointing at
//! loopback, private ranges or well-known service ports is refused here.

use crate::UrlError;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, ParseError, Position, Url};

const ALLOWED_SCHEMES: [&str; 2] = ["https", "http"];

/// Ports 1 through 1022 are refused. 1023 is let through.
const WELL_KNOWN_PORTS: std::ops::Range<u16> = 1..1023;

const PRIVATE_RANGES: [IpNet; 4] = [
    IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 8)),
    IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::new(172, 16, 0, 0), 12)),
    IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::new(192, 168, 0, 0), 16)),
    IpNet::V6(Ipv6Net::new_assert(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7)),
];

/// A URL that passed validation, with credentials removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanUrl {
    url: Url,
    canonical: String,
}

impl CleanUrl {
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn into_string(self) -> String {
        self.canonical
    }
}

impl fmt::Display for CleanUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Parse and clean a submitted URL.
///
/// Surrounding whitespace is trimmed and user credentials are dropped.
/// Without `strict`, a missing scheme is filled in as `https`. Only
/// `http`/`https` are accepted, the host must not be `localhost`, a loopback
/// or a private IP literal, and an explicit port must not be in 1-1022.
///
/// The URL length is not checked here; callers enforce their own limit.
pub fn validate_url(raw: &str, strict: bool) -> Result<CleanUrl, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::EmptyUri);
    }

    let (mut url, source) = match Url::parse(raw) {
        Ok(url) => (url, raw.to_string()),
        // No scheme: the host would otherwise end up in the path, so the
        // whole string is parsed again behind the default scheme.
        Err(ParseError::RelativeUrlWithoutBase) if !strict => {
            let prefixed = format!("https://{raw}");
            let url = Url::parse(&prefixed).map_err(|e| UrlError::Parse(e.to_string()))?;
            (url, prefixed)
        }
        Err(ParseError::RelativeUrlWithoutBase) => return Err(UrlError::EmptyScheme),
        Err(e) => return Err(UrlError::Parse(e.to_string())),
    };

    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(UrlError::ForbiddenScheme(url.scheme().to_string()));
    }

    // Special schemes always carry a host, so both calls succeed.
    let _ = url.set_username("");
    let _ = url.set_password(None);

    match url.host() {
        Some(Host::Domain(domain)) if domain == "localhost" => return Err(UrlError::Loopback),
        Some(Host::Ipv4(ip)) => check_ip(IpAddr::V4(ip))?,
        Some(Host::Ipv6(ip)) => match ip.to_ipv4_mapped() {
            Some(mapped) => check_ip(IpAddr::V4(mapped))?,
            None => check_ip(IpAddr::V6(ip))?,
        },
        _ => {}
    }

    if let Some(port) = explicit_port(&url, &source) {
        if WELL_KNOWN_PORTS.contains(&port) {
            return Err(UrlError::WellKnownPort(port));
        }
    }

    let canonical = canonical_string(&url, &source);
    Ok(CleanUrl { url, canonical })
}

fn check_ip(ip: IpAddr) -> Result<(), UrlError> {
    if ip.is_loopback() {
        return Err(UrlError::Loopback);
    }
    if PRIVATE_RANGES.iter().any(|range| range.contains(&ip)) {
        return Err(UrlError::PrivateIp);
    }
    Ok(())
}

/// `Url` drops a port equal to the scheme default, but `:80` and `:443`
/// are still explicit well-known ports, so they are read from the source.
fn explicit_port(url: &Url, source: &str) -> Option<u16> {
    url.port().or_else(|| authority_port(source)?.parse().ok())
}

fn authority_port(source: &str) -> Option<&str> {
    let (_, rest) = source.split_once("://")?;
    let authority = rest.split(['/', '?', '#', '\\']).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host_port)| host_port);
    match host_port.rfind(']') {
        Some(end) => host_port[end + 1..].strip_prefix(':'),
        None => host_port.rsplit_once(':').map(|(_, port)| port),
    }
}

/// Serialize without the `/` that `Url` adds when the submitted URL had no
/// path, so `example.com` becomes `https://example.com`.
fn canonical_string(url: &Url, source: &str) -> String {
    if url.path() == "/" && !has_path(source) {
        format!("{}{}", &url[..Position::BeforePath], &url[Position::AfterPath..])
    } else {
        url.as_str().to_string()
    }
}

fn has_path(source: &str) -> bool {
    match source.split_once("://") {
        Some((_, rest)) => rest
            .find(['/', '?', '#', '\\'])
            .is_some_and(|index| matches!(rest.as_bytes()[index], b'/' | b'\\')),
        None => true,
    }
}
