use std::collections::HashSet;

use crate::domain::entities::purchase::Purchase;

/// Remembers which store purchases have already been accepted by the
/// backend, so repeated store callbacks for one transaction are handled once.
/// Lives for the process only.
#[derive(Debug, Default)]
pub(crate) struct DeduplicationCache {
    handled: HashSet<String>,
}

impl DeduplicationCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn should_process(&self, purchase: &Purchase) -> bool {
        !self.handled.contains(purchase.dedup_key())
    }

    pub(crate) fn mark_processed(&mut self, purchase: &Purchase) {
        self.handled.insert(purchase.dedup_key().to_string());
    }

    pub(crate) fn mark_all_processed(&mut self, purchases: &[Purchase]) {
        for purchase in purchases {
            self.mark_processed(purchase);
        }
    }
}
