use crate::UrlError;
use url::Url;

/// Extracts the domain from a URL
///
/// The host is lowercased; the port is not part of the domain, so
/// `example.com:8080` and `example.com` share one politeness budget.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_dispatch::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM:8080/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// The form a host takes in task domains: lowercased, without `www.`
///
/// Throttle overrides and admin calls go through this so that
/// `WWW.Example.com` and `example.com` name the same domain.
pub fn domain_key(host: &str) -> String {
    let host = host.trim().to_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => host,
    }
}

/// Like [`extract_domain`], but a missing host is an error
pub fn require_domain(url: &Url) -> Result<String, UrlError> {
    extract_domain(url).ok_or(UrlError::MissingDomain)
}
