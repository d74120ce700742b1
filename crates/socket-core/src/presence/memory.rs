use std::collections::HashMap;
use std::sync::RwLock;

use event_protocol::Descriptor;

use crate::error::PresenceError;

/// `id -> descriptor` behind a read/write lock.
#[derive(Default)]
pub struct MemoryPresence {
    connections: RwLock<HashMap<i64, Descriptor>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn online(&self, desc: Descriptor) -> Result<(), PresenceError> {
        self.connections.write().unwrap().insert(desc.id, desc);
        Ok(())
    }

    pub(super) fn offline(&self, id: i64) -> Result<(), PresenceError> {
        self.connections.write().unwrap().remove(&id);
        Ok(())
    }

    pub(super) fn find(&self, id: i64) -> Result<Option<Descriptor>, PresenceError> {
        Ok(self.connections.read().unwrap().get(&id).copied())
    }
}
