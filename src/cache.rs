//! Latest-result cache read by the display side.
//!
//! One slot per camera source. The processing worker overwrites a slot on
//! every completed frame; readers poll on their own cadence and may see the
//! same result twice or skip one, but never block a pipeline stage and
//! never observe a torn result.

use std::sync::{Arc, RwLock};

use crate::frame::{ProcessedResult, SourceId};

pub struct ResultCache {
    slots: Vec<RwLock<Option<Arc<ProcessedResult>>>>,
}

impl ResultCache {
    /// Create a cache with one empty slot per source.
    pub fn new(sources: usize) -> Self {
        Self {
            slots: (0..sources).map(|_| RwLock::new(None)).collect(),
        }
    }

    pub fn sources(&self) -> usize {
        self.slots.len()
    }

    /// Overwrite the slot for the result's source.
    ///
    /// Only the processing worker calls this; readers are unaffected beyond
    /// the brief write lock.
    pub fn publish(&self, result: ProcessedResult) {
        let source = result.source;
        if let Some(slot) = self.slots.get(source) {
            let mut guard = slot.write().expect("result cache lock poisoned");
            *guard = Some(Arc::new(result));
        } else {
            log::warn!("result for unknown source {} discarded", source);
        }
    }

    /// Latest completed result for a source, if any has been produced yet.
    pub fn latest(&self, source: SourceId) -> Option<Arc<ProcessedResult>> {
        self.slots
            .get(source)?
            .read()
            .expect("result cache lock poisoned")
            .clone()
    }
}
