use crate::url::Fingerprint;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Admissions between two progress lines in the log
const PROGRESS_EVERY: usize = 100_000;

/// Set of every URL fingerprint seen during a crawl
///
/// The check-and-record in [`admit`](Self::admit) holds the store's lock, so
/// concurrent discoveries of the same URL never both succeed. Fingerprints are
/// never removed.
#[derive(Debug, Default)]
pub struct FingerprintStore {
    seen: Mutex<HashSet<Fingerprint>>,
}

impl FingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted fingerprints
    pub fn from_fingerprints(fingerprints: impl IntoIterator<Item = Fingerprint>) -> Self {
        Self {
            seen: Mutex::new(fingerprints.into_iter().collect()),
        }
    }

    /// Records `fingerprint`, returning true the first time it is seen
    pub fn admit(&self, fingerprint: Fingerprint) -> bool {
        let mut seen = self.lock();
        if !seen.insert(fingerprint) {
            return false;
        }

        if seen.len() % PROGRESS_EVERY == 0 {
            tracing::info!("Fingerprint store holds {} URLs", seen.len());
        }
        true
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Every recorded fingerprint, sorted (for persistence)
    pub fn snapshot(&self) -> Vec<Fingerprint> {
        let mut fingerprints: Vec<Fingerprint> = self.lock().iter().copied().collect();
        fingerprints.sort();
        fingerprints
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Fingerprint>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
