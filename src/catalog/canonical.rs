//! Domain name canonicalization
//!
//! Every raw domain or URL entering the catalog goes through
//! [`canonicalize_domain`] exactly once, so different spellings of the same
//! site collapse to one row.

use url::{Host, Url};

use crate::error::{Error, Result};

/// Canonical form of a raw domain, `host:port` or URL
///
/// Lowercase, no scheme, no default port, no trailing dot, no leading
/// `www.`, IDN in punycode. Idempotent.
///
/// # Examples
///
/// ```
/// use crawl_lease::catalog::canonical::canonicalize_domain;
///
/// assert_eq!(canonicalize_domain("HTTPS://WWW.Example.COM./path").unwrap(), "example.com");
/// assert_eq!(canonicalize_domain("example.com:8080").unwrap(), "example.com:8080");
/// ```
pub fn canonicalize_domain(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_domain(raw, "empty input"));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| Error::invalid_domain(raw, e.to_string()))?;

    let host = match url.host() {
        Some(Host::Domain(d)) => strip_www(&d.trim_end_matches('.').to_ascii_lowercase()).to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => format!("[{ip}]"),
        None => return Err(Error::invalid_domain(raw, "no host")),
    };

    if host.is_empty() || host.starts_with('.') || host.contains("..") {
        return Err(Error::invalid_domain(raw, "no usable host name"));
    }

    // Default ports for the parsed scheme are already dropped by `url`;
    // 80/443 under the other scheme still need stripping.
    match url.port() {
        Some(80) | Some(443) | None => Ok(host),
        Some(port) => Ok(format!("{host}:{port}")),
    }
}

fn strip_www(mut host: &str) -> &str {
    while let Some(rest) = host.strip_prefix("www.") {
        if rest.is_empty() {
            break;
        }
        host = rest;
    }
    host
}
