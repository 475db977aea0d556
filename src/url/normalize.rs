use crate::url::domain_key;
use crate::UrlError;
use url::Url;

/// Query parameters that never change the fetched resource
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "_ga", "ref", "source",
];

/// Normalizes a URL so that equivalent spellings share one fingerprint
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Lowercase the host and strip a leading `www.`
/// 3. Drop the default port for the scheme
/// 4. Normalize the path: remove dot segments, collapse repeated slashes,
///    drop the trailing slash (except for root)
/// 5. Remove the fragment
/// 6. Remove tracking query parameters (`utm_*` and a fixed list)
/// 7. Sort the remaining query parameters; drop an empty query
///
/// The scheme is preserved: `http://a/` and `https://a/` are distinct resources.
///
/// # Examples
///
/// ```
/// use sumi_dispatch::url::normalize_url;
///
/// let url = normalize_url("https://WWW.EXAMPLE.COM:443/a/./b/?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/a/b");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = domain_key(url.host_str().ok_or(UrlError::MissingDomain)?);
    if host.is_empty() {
        return Err(UrlError::MissingDomain);
    }
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    // Url already hides default ports; clear explicit ones that match
    if url.port().is_some() && url.port() == default_port(url.scheme()) {
        url.set_port(None)
            .map_err(|_| UrlError::Malformed("Failed to clear default port".to_string()))?;
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Removes dot segments, empty segments and the trailing slash
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_cases() {
        let cases = [
            ("http://example.com/page", "http://example.com/page"),
            ("https://www.example.com/", "https://example.com/"),
            ("https://example.com", "https://example.com/"),
            ("https://example.com/page/", "https://example.com/page"),
            ("https://example.com/page#section", "https://example.com/page"),
            ("https://EXAMPLE.COM/Page", "https://example.com/Page"),
            ("https://example.com:443/page", "https://example.com/page"),
            ("http://example.com:80/", "http://example.com/"),
            ("http://example.com:8080/page", "http://example.com:8080/page"),
            ("https://example.com///a/../b/./c//", "https://example.com/b/c"),
            ("https://example.com/../page", "https://example.com/page"),
            (
                "https://example.com/p?keep=yes&utm_medium=email&another=value&fbclid=123",
                "https://example.com/p?another=value&keep=yes",
            ),
            ("https://example.com/p?utm_custom=a&gclid=c", "https://example.com/p"),
        ];

        for (input, expected) in cases {
            let normalized = normalize_url(input).unwrap();
            assert_eq!(normalized.as_str(), expected, "normalizing {}", input);
        }
    }

    #[test]
    fn test_equivalent_spellings_match() {
        let a = normalize_url("https://www.Example.com/a/b/?x=1&y=2#frag").unwrap();
        let b = normalize_url("https://example.com:443/a/./b?y=2&x=1&utm_source=feed").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once = normalize_url("https://WWW.example.com/a/../b/?z=1&a=2").unwrap();
        let twice = normalize_url(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rejected_urls() {
        assert!(matches!(
            normalize_url("ftp://example.com/file"),
            Err(UrlError::InvalidScheme(_))
        ));
        assert!(matches!(normalize_url("mailto:a@example.com"), Err(UrlError::InvalidScheme(_))));
        assert!(matches!(normalize_url("not a url"), Err(UrlError::Parse(_))));
    }
}
