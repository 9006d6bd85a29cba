//! Holds the feature definitions snapshot that evaluations read from.
//!
//! A snapshot ([`GlobalContext`]) is never modified after it is stored. Fetching fresh
//! definitions means decoding a new snapshot and swapping it in; evaluations already running keep
//! the snapshot they started with.
use std::sync::{Arc, RwLock};

use crate::context::GlobalContext;

/// Slot for the current [`GlobalContext`], shared between the code that loads definitions and the
/// [`Evaluator`](crate::eval::Evaluator)s reading them.
#[derive(Debug, Default)]
pub struct ConfigurationStore {
    global_context: RwLock<Option<Arc<GlobalContext>>>,
}

impl ConfigurationStore {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    /// Current snapshot, or `None` until the first one is stored.
    pub fn get_global_context(&self) -> Option<Arc<GlobalContext>> {
        let global_context = self
            .global_context
            .read()
            .expect("thread holding configuration lock should not panic");

        global_context.clone()
    }

    /// Swap in a new snapshot. Returns the one it replaced, if any.
    pub fn set_global_context(
        &self,
        global_context: Arc<GlobalContext>,
    ) -> Option<Arc<GlobalContext>> {
        let mut slot = self
            .global_context
            .write()
            .expect("thread holding configuration lock should not panic");

        slot.replace(global_context)
    }
}
