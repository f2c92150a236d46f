use std::sync::{Arc, RwLock};

use super::types::Relay;

/// The published relay handle.
///
/// The session manager is the only writer; gateway connections read a clone of
/// whatever is published at the moment they ask. Publishing and clearing are a
/// single swap under the lock, so a reader sees either the old or the new value.
#[derive(Clone, Default)]
pub struct RelaySlot {
    inner: Arc<RwLock<Option<Arc<dyn Relay>>>>,
}

impl RelaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, relay: Arc<dyn Relay>) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(relay);
    }

    /// Unpublishes and returns the relay that was published, if any.
    pub fn clear(&self) -> Option<Arc<dyn Relay>> {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        slot.take()
    }

    pub fn current(&self) -> Option<Arc<dyn Relay>> {
        let slot = self.inner.read().unwrap_or_else(|e| e.into_inner());
        slot.clone()
    }

    pub fn is_published(&self) -> bool {
        self.current().is_some()
    }
}
