//! Bounded client table (spec §3.6): a single lock guards structural
//! changes (insert/remove); steady-state field access goes through each
//! `ClientInfo`'s own atomics. An explicit capacity cap is checked
//! atomically with insertion, which is why this is a plain
//! `RwLock`-guarded map rather than a concurrent map with no way to
//! make "check full, then insert" a single linearizable step.

use crate::client::info::{ClientInfo, SharedClient};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub struct ClientManager {
    max_clients: usize,
    slots: RwLock<HashMap<u32, SharedClient>>,
    next_id: AtomicU32,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            max_clients,
            slots: RwLock::new(HashMap::with_capacity(max_clients)),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_clients
    }

    /// Allocate the next monotonic client id, never reused server-wide.
    pub fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a newly-constructed client, failing if the table is full.
    /// Holds the lock only long enough to check capacity and publish.
    pub fn insert(&self, client: ClientInfo) -> Result<SharedClient, ClientInfo> {
        let mut slots = self.slots.write();
        if slots.len() >= self.max_clients {
            return Err(client);
        }
        let shared = Arc::new(client);
        slots.insert(shared.id, shared.clone());
        Ok(shared)
    }

    pub fn get(&self, id: u32) -> Option<SharedClient> {
        self.slots.read().get(&id).cloned()
    }

    pub fn remove(&self, id: u32) -> Option<SharedClient> {
        self.slots.write().remove(&id)
    }

    /// Snapshot of every currently-active client, used by the broadcast
    /// loop and mixer so neither holds the table lock on their hot path.
    pub fn snapshot(&self) -> Vec<SharedClient> {
        self.slots.read().values().cloned().collect()
    }

    /// Remove every client whose three tasks have all observed
    /// `shutting_down` and finished (spec §4.8 `Dead` state); called
    /// from the reaper loop.
    pub fn reap_dead(&self, is_dead: impl Fn(&ClientInfo) -> bool) -> Vec<u32> {
        let mut reaped = Vec::new();
        let mut slots = self.slots.write();
        slots.retain(|id, client| {
            if is_dead(client) {
                reaped.push(*id);
                false
            } else {
                true
            }
        });
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::info::CryptoSession;
    use crate::transport::{RecvFrame, TransportReader, TransportWriter};
    use crate::errors::AcipError;
    use std::time::Duration;

    struct NullReader;
    impl TransportReader for NullReader {
        fn recv(&mut self, _: Duration) -> Result<RecvFrame, AcipError> {
            Err(AcipError::Timeout("null transport"))
        }
        fn close(&mut self) {}
        fn is_connected(&self) -> bool {
            true
        }
    }

    struct NullWriter;
    impl TransportWriter for NullWriter {
        fn send(&mut self, _: &crate::protocol::PacketHeader, _: &[u8]) -> Result<(), AcipError> {
            Ok(())
        }
        fn close(&mut self) {}
        fn is_connected(&self) -> bool {
            true
        }
        fn provides_encryption(&self) -> bool {
            false
        }
    }

    fn test_client(id: u32) -> ClientInfo {
        ClientInfo::new(id, Box::new(NullReader), Box::new(NullWriter), CryptoSession::new([0; 32], [0; 32]))
    }

    #[test]
    fn insert_respects_capacity() {
        let mgr = ClientManager::new(2);
        let a = mgr.allocate_id();
        let b = mgr.allocate_id();
        let c = mgr.allocate_id();
        assert!(mgr.insert(test_client(a)).is_ok());
        assert!(mgr.insert(test_client(b)).is_ok());
        assert!(mgr.insert(test_client(c)).is_err());
        assert!(mgr.is_full());
    }

    #[test]
    fn remove_then_reinsert_reuses_slot_not_id() {
        let mgr = ClientManager::new(4);
        let id = mgr.allocate_id();
        mgr.insert(test_client(id)).unwrap();
        mgr.remove(id);
        assert_eq!(mgr.len(), 0);
        let next_id = mgr.allocate_id();
        assert_ne!(next_id, id);
    }
}
