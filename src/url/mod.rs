//! URL handling module for Sumi-Dispatch
//!
//! This module provides URL normalization, domain extraction and the
//! fingerprints used to deduplicate discovered URLs.

mod domain;
mod fingerprint;
mod normalize;

pub use domain::{domain_key, extract_domain, require_domain};
pub use fingerprint::{fingerprint, Fingerprint};
pub use normalize::normalize_url;

use crate::UrlError;
use url::Url;

/// A URL ready for scheduling: normalized, with its domain and fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl {
    pub url: Url,
    pub domain: String,
    pub fingerprint: Fingerprint,
}

/// Normalizes a raw URL and derives its domain and fingerprint
///
/// # Examples
///
/// ```
/// use sumi_dispatch::url::canonicalize;
///
/// let a = canonicalize("https://www.example.com/docs/").unwrap();
/// let b = canonicalize("https://example.com/docs#intro").unwrap();
/// assert_eq!(a.fingerprint, b.fingerprint);
/// assert_eq!(a.domain, "example.com");
/// ```
pub fn canonicalize(raw: &str) -> Result<CanonicalUrl, UrlError> {
    let url = normalize_url(raw)?;
    let domain = require_domain(&url)?;
    let fingerprint = fingerprint(&url);
    Ok(CanonicalUrl {
        url,
        domain,
        fingerprint,
    })
}
