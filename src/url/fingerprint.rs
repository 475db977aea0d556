use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// SHA-256 digest of a normalized URL
///
/// Two URLs share a fingerprint exactly when their normalized forms are
/// byte-identical, so callers must run [`normalize_url`](super::normalize_url)
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the hex form produced by [`Fingerprint::to_hex`]
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for log lines
        write!(f, "{}", &self.to_hex()[..12])
    }
}

/// Computes the fingerprint of an already normalized URL
pub fn fingerprint(url: &Url) -> Fingerprint {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Fingerprint(bytes)
}
