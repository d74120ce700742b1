//! Presence store: tracks which connection ids are currently online and
//! where the descriptor for a given id can be found.

mod memory;
#[cfg(feature = "remote-presence")]
mod remote;

pub use memory::MemoryPresence;
#[cfg(feature = "remote-presence")]
pub use remote::RedisPresence;

use event_protocol::Descriptor;

use crate::error::PresenceError;

/// Either backing store spec §4.3 requires, chosen at startup from config.
///
/// An enum rather than a trait object: the two variants are the whole set
/// the system supports and neither is swapped at runtime, so static
/// dispatch keeps the call sites plain `await` instead of boxed futures.
pub enum Presence {
    Memory(MemoryPresence),
    #[cfg(feature = "remote-presence")]
    Remote(RedisPresence),
}

impl Presence {
    pub async fn online(&self, desc: Descriptor) -> Result<(), PresenceError> {
        match self {
            Self::Memory(m) => m.online(desc),
            #[cfg(feature = "remote-presence")]
            Self::Remote(r) => r.online(desc).await,
        }
    }

    pub async fn offline(&self, id: i64) -> Result<(), PresenceError> {
        match self {
            Self::Memory(m) => m.offline(id),
            #[cfg(feature = "remote-presence")]
            Self::Remote(r) => r.offline(id).await,
        }
    }

    pub async fn find(&self, id: i64) -> Result<Option<Descriptor>, PresenceError> {
        match self {
            Self::Memory(m) => m.find(id),
            #[cfg(feature = "remote-presence")]
            Self::Remote(r) => r.find(id).await,
        }
    }
}
