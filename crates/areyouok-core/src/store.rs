//! Registry persistence
//!
//! The registry keeps its live state in memory and writes every change
//! through a [`RegistryStore`] before publishing it. A store that rejects a
//! write makes the whole operation fail with nothing changed.

use crate::events::EventRecord;
use crate::identity::SwitchId;
use crate::registry::RegistryEntry;
use crate::switch::SwitchSnapshot;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

/// Everything a registry needs to resume.
///
/// The journal itself stays in the store; only its head is loaded and
/// records are read on demand through [`RegistryStore::events_since`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredRegistry {
    /// Registry entries in creation order
    pub entries: Vec<RegistryEntry>,
    /// Latest state of every switch
    pub switches: HashMap<SwitchId, SwitchSnapshot>,
    /// `seq` of the newest journal record, 0 when the journal is empty
    pub last_seq: u64,
}

/// Durable backing for a registry.
///
/// Each commit must be atomic: either all of it is stored or none of it.
pub trait RegistryStore: Send + Sync {
    /// Read the registry state needed to resume.
    fn load(&self) -> Result<StoredRegistry, StoreError>;

    /// Journal records with `seq > cursor`, oldest first.
    fn events_since(&self, cursor: u64) -> Result<Vec<EventRecord>, StoreError>;

    /// Record a newly created switch together with its creation events.
    fn commit_creation(
        &self,
        entry: &RegistryEntry,
        state: &SwitchSnapshot,
        events: &[EventRecord],
    ) -> Result<(), StoreError>;

    /// Record the new state of an existing switch and the event that produced it.
    fn commit(
        &self,
        switch_id: SwitchId,
        state: &SwitchSnapshot,
        event: &EventRecord,
    ) -> Result<(), StoreError>;
}

impl<S: RegistryStore + ?Sized> RegistryStore for Arc<S> {
    fn load(&self) -> Result<StoredRegistry, StoreError> {
        (**self).load()
    }

    fn events_since(&self, cursor: u64) -> Result<Vec<EventRecord>, StoreError> {
        (**self).events_since(cursor)
    }

    fn commit_creation(
        &self,
        entry: &RegistryEntry,
        state: &SwitchSnapshot,
        events: &[EventRecord],
    ) -> Result<(), StoreError> {
        (**self).commit_creation(entry, state, events)
    }

    fn commit(
        &self,
        switch_id: SwitchId,
        state: &SwitchSnapshot,
        event: &EventRecord,
    ) -> Result<(), StoreError> {
        (**self).commit(switch_id, state, event)
    }
}

#[derive(Debug, Default)]
struct MemoryData {
    registry: StoredRegistry,
    events: Vec<EventRecord>,
}

/// In-process store. Lives as long as the value does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing data, e.g. a fixture.
    ///
    /// `registry.last_seq` is taken as given, `events` are kept in `seq` order.
    pub fn with_data(registry: StoredRegistry, mut events: Vec<EventRecord>) -> Self {
        events.sort_by_key(|r| r.seq);
        Self {
            data: Mutex::new(MemoryData { registry, events }),
        }
    }

    fn data(&self) -> MutexGuard<'_, MemoryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RegistryStore for MemoryStore {
    fn load(&self) -> Result<StoredRegistry, StoreError> {
        Ok(self.data().registry.clone())
    }

    fn events_since(&self, cursor: u64) -> Result<Vec<EventRecord>, StoreError> {
        let data = self.data();
        let start = data.events.partition_point(|r| r.seq <= cursor);
        Ok(data.events[start..].to_vec())
    }

    fn commit_creation(
        &self,
        entry: &RegistryEntry,
        state: &SwitchSnapshot,
        events: &[EventRecord],
    ) -> Result<(), StoreError> {
        let mut data = self.data();
        if data.registry.switches.contains_key(&entry.switch_id) {
            return Err(StoreError::Corrupt(format!(
                "switch {} already stored",
                entry.switch_id
            )));
        }
        data.registry.entries.push(entry.clone());
        data.registry.switches.insert(entry.switch_id, state.clone());
        if let Some(last) = events.last() {
            data.registry.last_seq = last.seq;
        }
        data.events.extend_from_slice(events);
        Ok(())
    }

    fn commit(
        &self,
        switch_id: SwitchId,
        state: &SwitchSnapshot,
        event: &EventRecord,
    ) -> Result<(), StoreError> {
        let mut data = self.data();
        let slot = data
            .registry
            .switches
            .get_mut(&switch_id)
            .ok_or_else(|| StoreError::Corrupt(format!("switch {} not stored", switch_id)))?;
        *slot = state.clone();
        data.registry.last_seq = event.seq;
        data.events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SwitchEvent;
    use crate::identity::IDENTITY_LEN;
    use crate::test_utils::{alice, bob};

    fn fixture() -> (RegistryEntry, SwitchSnapshot, EventRecord) {
        let switch_id = SwitchId::from_bytes([7; IDENTITY_LEN]);
        let entry = RegistryEntry {
            switch_id,
            owner: alice(),
            beneficiary: bob(),
            created_at: 10,
        };
        let state = SwitchSnapshot {
            owner: alice(),
            beneficiary: bob(),
            balance: 0,
            last_check_in: 10,
            check_in_interval: 100,
        };
        let created = EventRecord {
            seq: 1,
            switch_id,
            timestamp: 10,
            event: SwitchEvent::SwitchCreated {
                switch_id,
                owner: alice(),
                beneficiary: bob(),
                timestamp: 10,
            },
        };
        (entry, state, created)
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let (entry, mut state, created) = fixture();
        store.commit_creation(&entry, &state, &[created]).unwrap();

        state.balance = 5;
        let deposited = EventRecord {
            seq: 2,
            switch_id: entry.switch_id,
            timestamp: 11,
            event: SwitchEvent::Deposited {
                from: bob(),
                amount: 5,
            },
        };
        store.commit(entry.switch_id, &state, &deposited).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.entries, vec![entry.clone()]);
        assert_eq!(loaded.switches[&entry.switch_id].balance, 5);
        assert_eq!(loaded.last_seq, 2);

        let all = store.events_since(0).unwrap();
        assert_eq!(all.len(), 2);
        let tail = store.events_since(1).unwrap();
        assert_eq!(tail, vec![deposited]);
        assert!(store.events_since(2).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_rejects_unknown_and_duplicate() {
        let store = MemoryStore::new();
        let (entry, state, created) = fixture();
        assert!(matches!(
            store.commit(entry.switch_id, &state, &created),
            Err(StoreError::Corrupt(_))
        ));
        store
            .commit_creation(&entry, &state, &[created.clone()])
            .unwrap();
        assert!(matches!(
            store.commit_creation(&entry, &state, &[created]),
            Err(StoreError::Corrupt(_))
        ));
        let loaded = store.load().unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.last_seq, 1);
        assert_eq!(store.events_since(0).unwrap().len(), 1);
    }
}
