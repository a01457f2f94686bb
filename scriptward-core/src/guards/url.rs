use std::net::IpAddr;

use scriptward_config::PolicySet;
use tracing::debug;
use url::{Host, Url};

use crate::error::UrlError;

/// Validate `raw` as a fetch target and return the parsed URL.
///
/// Shape checks (parse, scheme, host) come first, then the local-host
/// denial. The host is compared after parsing, so ports, userinfo and
/// numeric spellings such as `0x7f.1` do not slip past it.
pub fn check_url(raw: &str, policy: &PolicySet) -> Result<Url, UrlError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|error| UrlError::Malformed {
        url: trimmed.to_owned(),
        reason: error.to_string(),
    })?;

    if !policy.allowed_url_schemes.contains(url.scheme()) {
        debug!(scheme = url.scheme(), "url rejected: scheme");
        return Err(UrlError::SchemeForbidden(url.scheme().to_owned()));
    }

    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => {
            LocalCheck::Domain(domain.trim_end_matches('.').to_ascii_lowercase())
        }
        Some(Host::Ipv4(ip)) => LocalCheck::Ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => LocalCheck::Ip(IpAddr::V6(ip)),
        Some(Host::Domain(_)) | None => return Err(UrlError::NoHost(trimmed.to_owned())),
    };

    if host.is_local(policy) {
        let shown = host.to_string();
        debug!(host = %shown, "url rejected: local host");
        return Err(UrlError::LocalhostForbidden(shown));
    }

    Ok(url)
}

enum LocalCheck {
    Domain(String),
    Ip(IpAddr),
}

impl LocalCheck {
    fn is_local(&self, policy: &PolicySet) -> bool {
        match self {
            Self::Domain(domain) => {
                policy.blocked_hosts.contains(domain)
                    || domain == "localhost"
                    || domain.ends_with(".localhost")
            }
            Self::Ip(ip) => {
                policy.blocked_hosts.contains(&ip.to_string()) || is_loopback_or_unspecified(*ip)
            }
        }
    }
}

impl std::fmt::Display for LocalCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Domain(domain) => f.write_str(domain),
            Self::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

fn is_loopback_or_unspecified(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| v4.is_loopback() || v4.is_unspecified())
        }
    }
}
