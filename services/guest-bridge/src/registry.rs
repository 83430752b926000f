//! Instance registry: the table of live guest connections.
//!
//! Slots are stable small indices into an arena; freed slots are reused
//! before the arena grows, so memory stays bounded under instance churn.
//! The same slot index keys the reactor's readiness table, which is how
//! readiness events map back to an instance without a descriptor-keyed
//! lookup table.

use std::collections::HashMap;

use thiserror::Error;
use tokio::net::unix::OwnedWriteHalf;
use tracing::debug;

use crate::framer::StreamFramer;

/// One live guest connection.
#[derive(Debug)]
pub struct Instance {
    /// Instance name, taken from the guest's socket filename.
    pub name: String,

    /// Write half of the guest stream connection. The read half lives in
    /// the reactor's readiness table under the same slot.
    pub writer: OwnedWriteHalf,

    /// Reassembly state for bytes read from this connection.
    pub framer: StreamFramer,

    /// Index of this instance in the registry and the reactor.
    pub slot: usize,
}

/// Registry insertion failure. The caller's connection is dropped (and
/// thereby closed) in both cases.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The name is already connected; re-discovery of a known instance.
    #[error("instance '{name}' already registered")]
    AlreadyExists { name: String },

    /// All slots are in use.
    #[error("instance table full ({capacity} slots)")]
    CapacityExceeded { capacity: usize },
}

/// Fixed-capacity table mapping instance name <-> connection <-> slot.
#[derive(Debug)]
pub struct InstanceRegistry {
    slots: Vec<Option<Instance>>,
    free: Vec<usize>,
    by_name: HashMap<String, usize>,
    capacity: usize,
}

impl InstanceRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_name: HashMap::new(),
            capacity,
        }
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Instance> {
        self.by_name.get(name).and_then(|&slot| self.get(slot))
    }

    pub fn get(&self, slot: usize) -> Option<&Instance> {
        self.slots.get(slot).and_then(|entry| entry.as_ref())
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Instance> {
        self.slots.get_mut(slot).and_then(|entry| entry.as_mut())
    }

    /// Claim a slot for a new instance. On `AlreadyExists` the existing
    /// entry is left untouched and `writer` is dropped, which closes the
    /// duplicate connection; callers treat this as success (idempotent
    /// re-discovery). On `CapacityExceeded` the connection is likewise
    /// dropped and the error reported.
    pub fn insert(&mut self, name: String, writer: OwnedWriteHalf) -> Result<usize, RegistryError> {
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::AlreadyExists { name });
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                debug!(slot, "reusing registry slot");
                slot
            }
            None => {
                if self.slots.len() >= self.capacity {
                    return Err(RegistryError::CapacityExceeded {
                        capacity: self.capacity,
                    });
                }
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        self.by_name.insert(name.clone(), slot);
        self.slots[slot] = Some(Instance {
            name,
            writer,
            framer: StreamFramer::new(),
            slot,
        });
        Ok(slot)
    }

    /// Release a slot. Dropping the returned instance closes its write
    /// half. A second remove of the same slot is a no-op returning `None`,
    /// so the hang-up and deletion-event teardown paths can race freely.
    pub fn remove(&mut self, slot: usize) -> Option<Instance> {
        let instance = self.slots.get_mut(slot).and_then(|entry| entry.take())?;
        self.by_name.remove(&instance.name);
        self.free.push(slot);
        Some(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixStream;

    fn writer_pair() -> (OwnedWriteHalf, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        let (_read, write) = a.into_split();
        (write, b)
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let mut reg = InstanceRegistry::new(4);
        let (w, _peer) = writer_pair();

        let slot = reg.insert("guest-a".to_string(), w).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.find_by_name("guest-a").unwrap().slot, slot);
        assert_eq!(reg.get(slot).unwrap().name, "guest-a");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let mut reg = InstanceRegistry::new(4);
        let (w1, _p1) = writer_pair();
        let (w2, _p2) = writer_pair();

        reg.insert("guest-a".to_string(), w1).unwrap();
        let err = reg.insert("guest-a".to_string(), w2).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { .. }));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let mut reg = InstanceRegistry::new(2);
        let (w1, _p1) = writer_pair();
        let (w2, _p2) = writer_pair();
        let (w3, _p3) = writer_pair();

        reg.insert("a".to_string(), w1).unwrap();
        reg.insert("b".to_string(), w2).unwrap();
        let err = reg.insert("c".to_string(), w3).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::CapacityExceeded { capacity: 2 }
        ));
    }

    #[tokio::test]
    async fn test_slot_reuse_after_remove() {
        let mut reg = InstanceRegistry::new(2);
        let (w1, _p1) = writer_pair();
        let (w2, _p2) = writer_pair();
        let (w3, _p3) = writer_pair();

        let slot_a = reg.insert("a".to_string(), w1).unwrap();
        reg.insert("b".to_string(), w2).unwrap();

        reg.remove(slot_a).unwrap();
        let slot_c = reg.insert("c".to_string(), w3).unwrap();
        assert_eq!(slot_c, slot_a);
        assert!(reg.find_by_name("a").is_none());
        assert_eq!(reg.find_by_name("c").unwrap().slot, slot_c);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let mut reg = InstanceRegistry::new(2);
        let (w, _p) = writer_pair();

        let slot = reg.insert("a".to_string(), w).unwrap();
        assert!(reg.remove(slot).is_some());
        assert!(reg.remove(slot).is_none());
        assert_eq!(reg.len(), 0);
        // The freed slot must not be double-counted on the free list.
        let (w2, _p2) = writer_pair();
        let (w3, _p3) = writer_pair();
        reg.insert("b".to_string(), w2).unwrap();
        reg.insert("c".to_string(), w3).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn test_name_and_slot_maps_stay_consistent() {
        let mut reg = InstanceRegistry::new(8);
        let mut peers = Vec::new();

        for name in ["a", "b", "c", "d"] {
            let (w, p) = writer_pair();
            peers.push(p);
            reg.insert(name.to_string(), w).unwrap();
        }

        let slot_b = reg.find_by_name("b").unwrap().slot;
        reg.remove(slot_b);

        for name in ["a", "c", "d"] {
            let instance = reg.find_by_name(name).unwrap();
            assert_eq!(reg.get(instance.slot).unwrap().name, name);
        }
        assert!(reg.find_by_name("b").is_none());
    }
}
