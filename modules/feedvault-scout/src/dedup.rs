use std::collections::HashSet;

use feedvault_common::Fingerprint;

/// Session-scoped set of fingerprints already handled. Once marked, a
/// fingerprint is rejected for the rest of the session, whether or not its
/// extraction succeeded.
#[derive(Debug, Default, Clone)]
pub struct DedupStore {
    seen: HashSet<Fingerprint>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Mark a fingerprint. Returns false if it was already marked.
    pub fn mark(&mut self, fingerprint: Fingerprint) -> bool {
        self.seen.insert(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
