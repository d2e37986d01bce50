//! The set of thumbprints authorized to connect inbound. Additive and live: a [`TrustSet::trust`]
//! call takes effect for every connection accepted afterward; there is no corresponding untrust
//! in the core.

use std::collections::HashSet;
use std::sync::RwLock;

use wire::Thumbprint;

/// A plain `std` lock, not `tokio::sync` — the listener consults [`TrustSet::is_trusted`] from
/// inside a synchronous trust predicate callback, and a lookup never spans an `.await`.
#[derive(Default)]
pub struct TrustSet {
    thumbprints: RwLock<HashSet<Thumbprint>>,
}

impl TrustSet {
    pub fn new() -> TrustSet {
        TrustSet::default()
    }

    pub fn trust(&self, thumbprint: Thumbprint) {
        self.thumbprints.write().unwrap().insert(thumbprint);
    }

    pub fn is_trusted(&self, thumbprint: &Thumbprint) -> bool {
        self.thumbprints.read().unwrap().contains(thumbprint)
    }
}
