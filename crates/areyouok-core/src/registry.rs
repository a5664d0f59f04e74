//! Switch factory and index
//!
//! The registry creates switches, assigns their ids and keeps three lookups:
//! every switch in creation order, switches by owner, switches by
//! beneficiary. The per-identity lists are append-only and record the
//! parties **at creation time**. A later `set_beneficiary` or
//! `transfer_ownership` changes the live switch but not the index or the
//! [`RegistryEntry`], so `get_switch_info` can report a stale owner or
//! beneficiary. Use [`SwitchHandle::snapshot`] for the live values.
//!
//! # Concurrency
//!
//! Each switch sits behind its own `RwLock`: mutations are serialised per
//! switch, reads share the lock and see one consistent snapshot. Every
//! mutation runs on a copy that is written to the store before it replaces
//! the live state, so a failure at any step leaves nothing changed.

use crate::amount::Amount;
use crate::clock::{Clock, Timestamp, CHECK_IN_INTERVAL};
use crate::events::{EventRecord, SwitchEvent};
use crate::identity::{Identity, SwitchId, IDENTITY_LEN};
use crate::store::{MemoryStore, RegistryStore, StoreError};
use crate::switch::{Switch, SwitchError, SwitchSnapshot};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Switch not found: {0}")]
    NotFound(SwitchId),

    #[error(transparent)]
    Switch(#[from] SwitchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Creation-time record of a switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub switch_id: SwitchId,
    /// Owner when the switch was created
    pub owner: Identity,
    /// Beneficiary when the switch was created
    pub beneficiary: Identity,
    pub created_at: Timestamp,
}

#[derive(Debug, Default)]
struct Index {
    entries: Vec<RegistryEntry>,
    positions: HashMap<SwitchId, usize>,
    by_owner: HashMap<Identity, Vec<SwitchId>>,
    by_beneficiary: HashMap<Identity, Vec<SwitchId>>,
}

impl Index {
    fn push(&mut self, entry: RegistryEntry) {
        self.positions.insert(entry.switch_id, self.entries.len());
        self.by_owner
            .entry(entry.owner)
            .or_default()
            .push(entry.switch_id);
        self.by_beneficiary
            .entry(entry.beneficiary)
            .or_default()
            .push(entry.switch_id);
        self.entries.push(entry);
    }
}

/// Head of the event journal. The records live in the store; `seq`
/// starts at 1 and has no gaps.
#[derive(Debug, Default)]
struct Journal {
    last_seq: u64,
}

impl Journal {
    /// Build records for `events` without appending them yet.
    fn stage(
        &self,
        switch_id: SwitchId,
        timestamp: Timestamp,
        events: Vec<SwitchEvent>,
    ) -> Vec<EventRecord> {
        let first = self.last_seq + 1;
        events
            .into_iter()
            .zip(first..)
            .map(|(event, seq)| EventRecord {
                seq,
                switch_id,
                timestamp,
                event,
            })
            .collect()
    }
}

/// Factory and index over all switches
pub struct Registry<S: RegistryStore = MemoryStore> {
    store: S,
    clock: Arc<dyn Clock>,
    check_in_interval: u64,
    index: RwLock<Index>,
    switches: RwLock<HashMap<SwitchId, Arc<RwLock<Switch>>>>,
    journal: Mutex<Journal>,
}

impl Registry<MemoryStore> {
    /// A fresh registry backed by a [`MemoryStore`].
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::empty(MemoryStore::new(), clock, CHECK_IN_INTERVAL)
    }
}

impl<S: RegistryStore> Registry<S> {
    /// Open a registry over `store` with the standard check-in interval.
    pub fn open(store: S, clock: Arc<dyn Clock>) -> Result<Self, RegistryError> {
        Self::open_with_interval(store, clock, CHECK_IN_INTERVAL)
    }

    /// Open a registry over `store`, rebuilding indexes from it.
    ///
    /// `check_in_interval` applies to switches created from now on; stored
    /// switches keep the interval they were created with.
    pub fn open_with_interval(
        store: S,
        clock: Arc<dyn Clock>,
        check_in_interval: u64,
    ) -> Result<Self, RegistryError> {
        let stored = store.load()?;

        let mut index = Index::default();
        let mut switches = HashMap::with_capacity(stored.entries.len());
        for entry in stored.entries {
            if index.positions.contains_key(&entry.switch_id) {
                return Err(StoreError::Corrupt(format!(
                    "duplicate registry entry for {}",
                    entry.switch_id
                ))
                .into());
            }
            let snapshot = stored.switches.get(&entry.switch_id).cloned().ok_or_else(|| {
                StoreError::Corrupt(format!("no state stored for {}", entry.switch_id))
            })?;
            let switch = Switch::restore(snapshot).map_err(|e| {
                StoreError::Corrupt(format!("invalid state for {}: {}", entry.switch_id, e))
            })?;
            switches.insert(entry.switch_id, Arc::new(RwLock::new(switch)));
            index.push(entry);
        }

        log::info!(
            "Opened registry: {} switches, journal at #{}",
            index.entries.len(),
            stored.last_seq
        );

        Ok(Self {
            store,
            clock,
            check_in_interval,
            index: RwLock::new(index),
            switches: RwLock::new(switches),
            journal: Mutex::new(Journal {
                last_seq: stored.last_seq,
            }),
        })
    }

    fn empty(store: S, clock: Arc<dyn Clock>, check_in_interval: u64) -> Self {
        Self {
            store,
            clock,
            check_in_interval,
            index: RwLock::new(Index::default()),
            switches: RwLock::new(HashMap::new()),
            journal: Mutex::new(Journal::default()),
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a switch owned by `caller`.
    ///
    /// `initial_deposit` may be zero. Emits `SwitchCreated`, followed by
    /// `Deposited` when value was forwarded.
    pub fn create_switch(
        &self,
        caller: Identity,
        beneficiary: Identity,
        initial_deposit: Amount,
    ) -> Result<SwitchId, RegistryError> {
        let now = self.clock.now();
        let switch = Switch::create(
            caller,
            beneficiary,
            initial_deposit,
            now,
            self.check_in_interval,
        )?;

        let mut index = write(&self.index);
        let switch_id = derive_switch_id(caller, index.entries.len() as u64);
        if index.positions.contains_key(&switch_id) {
            return Err(StoreError::Corrupt(format!("switch id {} already taken", switch_id)).into());
        }

        let entry = RegistryEntry {
            switch_id,
            owner: caller,
            beneficiary,
            created_at: now,
        };

        let mut events = vec![SwitchEvent::SwitchCreated {
            switch_id,
            owner: caller,
            beneficiary,
            timestamp: now,
        }];
        if initial_deposit > 0 {
            events.push(SwitchEvent::Deposited {
                from: caller,
                amount: initial_deposit,
            });
        }

        {
            let mut journal = lock(&self.journal);
            let records = journal.stage(switch_id, now, events);
            self.store
                .commit_creation(&entry, &switch.snapshot(), &records)?;
            if let Some(last) = records.last() {
                journal.last_seq = last.seq;
            }
        }

        write(&self.switches).insert(switch_id, Arc::new(RwLock::new(switch)));
        index.push(entry);

        log::info!(
            "Created switch {} (owner {}, beneficiary {}, deposit {})",
            switch_id,
            caller,
            beneficiary,
            initial_deposit
        );
        Ok(switch_id)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Operate on one switch.
    pub fn switch(&self, switch_id: SwitchId) -> Result<SwitchHandle<'_, S>, RegistryError> {
        let cell = read(&self.switches)
            .get(&switch_id)
            .cloned()
            .ok_or(RegistryError::NotFound(switch_id))?;
        Ok(SwitchHandle {
            registry: self,
            switch_id,
            cell,
        })
    }

    /// Switches created with `owner` as owner, in creation order.
    pub fn get_owner_switches(&self, owner: &Identity) -> Vec<SwitchId> {
        read(&self.index)
            .by_owner
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    /// Switches created with `beneficiary` as beneficiary, in creation order.
    pub fn get_beneficiary_switches(&self, beneficiary: &Identity) -> Vec<SwitchId> {
        read(&self.index)
            .by_beneficiary
            .get(beneficiary)
            .cloned()
            .unwrap_or_default()
    }

    /// Creation-time record of a switch. May be stale, see the module docs.
    pub fn get_switch_info(&self, switch_id: SwitchId) -> Result<RegistryEntry, RegistryError> {
        let index = read(&self.index);
        index
            .positions
            .get(&switch_id)
            .map(|&pos| index.entries[pos].clone())
            .ok_or(RegistryError::NotFound(switch_id))
    }

    pub fn get_total_switches(&self) -> usize {
        read(&self.index).entries.len()
    }

    /// The `index`-th switch ever created.
    pub fn switch_at(&self, index: usize) -> Option<SwitchId> {
        read(&self.index).entries.get(index).map(|e| e.switch_id)
    }

    pub fn owner_switch_at(&self, owner: &Identity, index: usize) -> Option<SwitchId> {
        read(&self.index)
            .by_owner
            .get(owner)
            .and_then(|ids| ids.get(index).copied())
    }

    pub fn beneficiary_switch_at(&self, beneficiary: &Identity, index: usize) -> Option<SwitchId> {
        read(&self.index)
            .by_beneficiary
            .get(beneficiary)
            .and_then(|ids| ids.get(index).copied())
    }

    /// Every switch id in creation order.
    pub fn all_switches(&self) -> Vec<SwitchId> {
        read(&self.index)
            .entries
            .iter()
            .map(|e| e.switch_id)
            .collect()
    }

    /// Live snapshots of every switch, in creation order.
    pub fn snapshots(&self) -> Vec<(SwitchId, SwitchSnapshot)> {
        let ids = self.all_switches();
        let switches = read(&self.switches);
        ids.into_iter()
            .filter_map(|id| switches.get(&id).map(|cell| (id, read(cell).snapshot())))
            .collect()
    }

    /// Journal records with `seq > cursor`, oldest first. Pass 0 for all.
    ///
    /// Reads from the store, so only the requested tail is materialised.
    pub fn events_since(&self, cursor: u64) -> Result<Vec<EventRecord>, RegistryError> {
        // Held so no commit lands between the head and the read.
        let _journal = lock(&self.journal);
        Ok(self.store.events_since(cursor)?)
    }

    /// Sequence number of the newest journal record (0 when empty).
    pub fn last_event_seq(&self) -> u64 {
        lock(&self.journal).last_seq
    }

    /// Interval given to newly created switches.
    pub fn check_in_interval(&self) -> u64 {
        self.check_in_interval
    }

    /// Current time according to the registry's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Write a mutated switch and its event through the store, then journal it.
    fn commit(
        &self,
        switch_id: SwitchId,
        state: &Switch,
        now: Timestamp,
        event: SwitchEvent,
    ) -> Result<(), RegistryError> {
        let mut journal = lock(&self.journal);
        let mut records = journal.stage(switch_id, now, vec![event]);
        let record = records.remove(0);
        self.store.commit(switch_id, &state.snapshot(), &record)?;
        log::debug!("[{}] journaled #{} {}", switch_id, record.seq, record.event.kind());
        journal.last_seq = record.seq;
        Ok(())
    }
}

/// Entry point for the operations of one switch.
///
/// Reads the current time from the registry clock on every call.
pub struct SwitchHandle<'r, S: RegistryStore> {
    registry: &'r Registry<S>,
    switch_id: SwitchId,
    cell: Arc<RwLock<Switch>>,
}

impl<S: RegistryStore> SwitchHandle<'_, S> {
    pub fn id(&self) -> SwitchId {
        self.switch_id
    }

    /// Add value from any caller.
    pub fn deposit(&self, caller: Identity, amount: Amount) -> Result<(), RegistryError> {
        self.apply("deposit", |switch, _| {
            switch.deposit(caller, amount).map(|event| ((), event))
        })?;
        log::debug!("[{}] {} deposited {}", self.switch_id, caller, amount);
        Ok(())
    }

    /// Owner liveness proof.
    pub fn check_in(&self, caller: Identity) -> Result<(), RegistryError> {
        self.apply("check_in", |switch, now| {
            switch.check_in(caller, now).map(|event| ((), event))
        })?;
        log::info!("[{}] owner checked in", self.switch_id);
        Ok(())
    }

    /// Beneficiary sweep. Returns the amount to pay out.
    pub fn withdraw(&self, caller: Identity) -> Result<Amount, RegistryError> {
        let amount = self.apply("withdraw", |switch, now| switch.withdraw(caller, now))?;
        log::info!(
            "[{}] beneficiary {} swept {}",
            self.switch_id,
            caller,
            amount
        );
        Ok(amount)
    }

    pub fn set_beneficiary(
        &self,
        caller: Identity,
        new_beneficiary: Identity,
    ) -> Result<(), RegistryError> {
        self.apply("set_beneficiary", |switch, _| {
            switch
                .set_beneficiary(caller, new_beneficiary)
                .map(|event| ((), event))
        })?;
        log::info!(
            "[{}] beneficiary changed to {}",
            self.switch_id,
            new_beneficiary
        );
        Ok(())
    }

    pub fn transfer_ownership(&self, caller: Identity, new_owner: Identity) -> Result<(), RegistryError> {
        self.apply("transfer_ownership", |switch, _| {
            switch
                .transfer_ownership(caller, new_owner)
                .map(|event| ((), event))
        })?;
        log::info!("[{}] ownership transferred to {}", self.switch_id, new_owner);
        Ok(())
    }

    pub fn get_balance(&self) -> Amount {
        read(&self.cell).balance()
    }

    pub fn get_remaining_time(&self) -> u64 {
        let now = self.registry.now();
        read(&self.cell).remaining_time(now)
    }

    pub fn is_expired(&self) -> bool {
        let now = self.registry.now();
        read(&self.cell).is_expired(now)
    }

    pub fn get_deadline(&self) -> Timestamp {
        read(&self.cell).deadline()
    }

    pub fn owner(&self) -> Identity {
        read(&self.cell).owner()
    }

    pub fn beneficiary(&self) -> Identity {
        read(&self.cell).beneficiary()
    }

    pub fn last_check_in(&self) -> Timestamp {
        read(&self.cell).last_check_in()
    }

    pub fn check_in_interval(&self) -> u64 {
        read(&self.cell).check_in_interval()
    }

    /// All live fields, read under one lock.
    pub fn snapshot(&self) -> SwitchSnapshot {
        read(&self.cell).snapshot()
    }

    /// Run `op` on a copy under the write lock, persist, then publish.
    fn apply<T>(
        &self,
        name: &str,
        op: impl FnOnce(&mut Switch, Timestamp) -> Result<(T, SwitchEvent), SwitchError>,
    ) -> Result<T, RegistryError> {
        let mut guard = write(&self.cell);
        let now = self.registry.now();
        let mut next = guard.clone();
        let (value, event) = op(&mut next, now).map_err(|e| {
            log::debug!("[{}] {} rejected: {}", self.switch_id, name, e);
            e
        })?;
        self.registry.commit(self.switch_id, &next, now, event)?;
        *guard = next;
        Ok(value)
    }
}

/// Registry-assigned id: first 20 bytes of SHA-256 over owner and nonce.
fn derive_switch_id(owner: Identity, nonce: u64) -> SwitchId {
    let mut hasher = Sha256::new();
    hasher.update(b"areyouok/switch");
    hasher.update(owner.as_bytes());
    hasher.update(nonce.to_be_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; IDENTITY_LEN];
    bytes.copy_from_slice(&digest[..IDENTITY_LEN]);
    SwitchId::from_bytes(bytes)
}

// Mutations never leave a half-applied value behind a lock, so a poisoned
// lock still holds consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::ONE_UNIT;
    use crate::clock::{ManualClock, SECS_PER_DAY};
    use crate::store::StoredRegistry;
    use crate::test_utils::{alice, bob, carol, identity};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn setup() -> (Arc<ManualClock>, Registry) {
        let clock = Arc::new(ManualClock::new(1_000));
        let registry = Registry::in_memory(clock.clone());
        (clock, registry)
    }

    /// Memory store that can be told to reject writes.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(StoreError::Backend("disk full".into()))
            } else {
                Ok(())
            }
        }
    }

    impl RegistryStore for FlakyStore {
        fn load(&self) -> Result<StoredRegistry, StoreError> {
            self.inner.load()
        }

        fn events_since(&self, cursor: u64) -> Result<Vec<EventRecord>, StoreError> {
            self.inner.events_since(cursor)
        }

        fn commit_creation(
            &self,
            entry: &RegistryEntry,
            state: &SwitchSnapshot,
            events: &[EventRecord],
        ) -> Result<(), StoreError> {
            self.check()?;
            self.inner.commit_creation(entry, state, events)
        }

        fn commit(
            &self,
            switch_id: SwitchId,
            state: &SwitchSnapshot,
            event: &EventRecord,
        ) -> Result<(), StoreError> {
            self.check()?;
            self.inner.commit(switch_id, state, event)
        }
    }

    #[test]
    fn test_create_and_index() {
        let (_clock, registry) = setup();
        let s1 = registry.create_switch(alice(), bob(), ONE_UNIT).unwrap();
        let s2 = registry.create_switch(alice(), carol(), 0).unwrap();
        let s3 = registry.create_switch(carol(), bob(), 0).unwrap();

        assert_eq!(registry.get_total_switches(), 3);
        assert_eq!(registry.get_owner_switches(&alice()), vec![s1, s2]);
        assert_eq!(registry.get_owner_switches(&carol()), vec![s3]);
        assert_eq!(registry.get_beneficiary_switches(&bob()), vec![s1, s3]);
        assert_eq!(registry.get_beneficiary_switches(&carol()), vec![s2]);
        assert!(registry.get_owner_switches(&bob()).is_empty());
        assert!(registry.get_beneficiary_switches(&alice()).is_empty());

        assert_eq!(registry.all_switches(), vec![s1, s2, s3]);
        assert_eq!(registry.switch_at(1), Some(s2));
        assert_eq!(registry.switch_at(3), None);
        assert_eq!(registry.owner_switch_at(&alice(), 1), Some(s2));
        assert_eq!(registry.beneficiary_switch_at(&bob(), 0), Some(s1));
        assert_eq!(registry.beneficiary_switch_at(&alice(), 0), None);

        let info = registry.get_switch_info(s1).unwrap();
        assert_eq!(info.owner, alice());
        assert_eq!(info.beneficiary, bob());
        assert_eq!(info.created_at, 1_000);
    }

    #[test]
    fn test_same_pair_twice_is_two_switches() {
        let (_clock, registry) = setup();
        let a = registry.create_switch(alice(), bob(), 0).unwrap();
        let b = registry.create_switch(alice(), bob(), 0).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.get_owner_switches(&alice()), vec![a, b]);
        assert_eq!(registry.get_beneficiary_switches(&bob()), vec![a, b]);
    }

    #[test]
    fn test_failed_creation_changes_nothing() {
        let (_clock, registry) = setup();
        assert!(matches!(
            registry.create_switch(alice(), alice(), ONE_UNIT),
            Err(RegistryError::Switch(SwitchError::InvalidBeneficiary(_)))
        ));
        assert!(matches!(
            registry.create_switch(alice(), Identity::ZERO, 0),
            Err(RegistryError::Switch(SwitchError::InvalidBeneficiary(_)))
        ));
        assert_eq!(registry.get_total_switches(), 0);
        assert!(registry.get_owner_switches(&alice()).is_empty());
        assert_eq!(registry.last_event_seq(), 0);
    }

    #[test]
    fn test_unknown_switch_not_found() {
        let (_clock, registry) = setup();
        let ghost = SwitchId::from_bytes([0xEE; IDENTITY_LEN]);
        assert!(matches!(
            registry.get_switch_info(ghost),
            Err(RegistryError::NotFound(id)) if id == ghost
        ));
        assert!(matches!(
            registry.switch(ghost),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_handle_uses_registry_clock() {
        let (clock, registry) = setup();
        let id = registry.create_switch(alice(), bob(), ONE_UNIT).unwrap();
        let handle = registry.switch(id).unwrap();

        assert_eq!(handle.get_deadline(), 1_000 + CHECK_IN_INTERVAL);
        assert_eq!(handle.get_remaining_time(), CHECK_IN_INTERVAL);
        assert!(!handle.is_expired());

        clock.advance(CHECK_IN_INTERVAL);
        assert!(handle.is_expired());
        assert_eq!(handle.get_remaining_time(), 0);

        assert_eq!(handle.withdraw(bob()).unwrap(), ONE_UNIT);
        assert_eq!(handle.get_balance(), 0);
    }

    #[test]
    fn test_info_is_creation_snapshot() {
        let (_clock, registry) = setup();
        let id = registry.create_switch(alice(), bob(), 0).unwrap();
        let handle = registry.switch(id).unwrap();
        handle.set_beneficiary(alice(), carol()).unwrap();
        handle.transfer_ownership(alice(), identity(0xD0)).unwrap();

        // Live state moved on.
        assert_eq!(handle.owner(), identity(0xD0));
        assert_eq!(handle.beneficiary(), carol());

        // Registry keeps what it saw at creation.
        let info = registry.get_switch_info(id).unwrap();
        assert_eq!(info.owner, alice());
        assert_eq!(info.beneficiary, bob());
        assert_eq!(registry.get_owner_switches(&alice()), vec![id]);
        assert!(registry.get_owner_switches(&identity(0xD0)).is_empty());
        assert!(registry.get_beneficiary_switches(&carol()).is_empty());
    }

    #[test]
    fn test_journal_order_and_cursor() {
        let (clock, registry) = setup();
        let id = registry.create_switch(alice(), bob(), ONE_UNIT).unwrap();
        let handle = registry.switch(id).unwrap();
        clock.advance(SECS_PER_DAY);
        handle.check_in(alice()).unwrap();
        handle.deposit(carol(), 5).unwrap();
        assert!(handle.deposit(carol(), 0).is_err());

        let all = registry.events_since(0).unwrap();
        let kinds: Vec<&str> = all.iter().map(|r| r.event.kind()).collect();
        assert_eq!(
            kinds,
            vec!["switch_created", "deposited", "checked_in", "deposited"]
        );
        let seqs: Vec<u64> = all.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert!(all.iter().all(|r| r.switch_id == id));
        assert_eq!(
            all[2].event,
            SwitchEvent::CheckedIn {
                owner: alice(),
                timestamp: 1_000 + SECS_PER_DAY
            }
        );

        let tail = registry.events_since(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].seq, 3);
        assert!(registry.events_since(4).unwrap().is_empty());
        assert_eq!(registry.last_event_seq(), 4);
    }

    #[test]
    fn test_zero_initial_deposit_emits_only_creation() {
        let (_clock, registry) = setup();
        registry.create_switch(alice(), bob(), 0).unwrap();
        let events = registry.events_since(0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.kind(), "switch_created");
    }

    #[test]
    fn test_store_failure_is_all_or_nothing() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(FlakyStore::default());
        let registry = Registry::open(store.clone(), clock.clone()).unwrap();

        let id = registry.create_switch(alice(), bob(), ONE_UNIT).unwrap();
        let handle = registry.switch(id).unwrap();

        store.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            handle.deposit(carol(), ONE_UNIT),
            Err(RegistryError::Store(_))
        ));
        clock.advance(SECS_PER_DAY);
        assert!(handle.check_in(alice()).is_err());
        assert!(registry.create_switch(carol(), bob(), 0).is_err());

        assert_eq!(handle.get_balance(), ONE_UNIT);
        assert_eq!(handle.last_check_in(), 0);
        assert_eq!(registry.get_total_switches(), 1);
        assert_eq!(registry.last_event_seq(), 2);

        store.failing.store(false, Ordering::SeqCst);
        handle.deposit(carol(), ONE_UNIT).unwrap();
        assert_eq!(handle.get_balance(), 2 * ONE_UNIT);
        assert_eq!(registry.last_event_seq(), 3);
    }

    #[test]
    fn test_reopen_restores_everything() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new());
        let (first, second) = {
            let registry = Registry::open(store.clone(), clock.clone()).unwrap();
            let first = registry.create_switch(alice(), bob(), ONE_UNIT).unwrap();
            let second = registry.create_switch(carol(), bob(), 0).unwrap();
            let handle = registry.switch(first).unwrap();
            clock.advance(SECS_PER_DAY);
            handle.check_in(alice()).unwrap();
            handle.set_beneficiary(alice(), carol()).unwrap();
            (first, second)
        };

        let reopened = Registry::open(store, clock.clone()).unwrap();
        assert_eq!(reopened.all_switches(), vec![first, second]);
        assert_eq!(reopened.get_beneficiary_switches(&bob()), vec![first, second]);
        assert_eq!(reopened.get_switch_info(first).unwrap().beneficiary, bob());

        let handle = reopened.switch(first).unwrap();
        assert_eq!(handle.beneficiary(), carol());
        assert_eq!(handle.last_check_in(), SECS_PER_DAY);
        assert_eq!(handle.get_balance(), ONE_UNIT);
        assert_eq!(reopened.last_event_seq(), 5);

        // Ids keep being unique after a restart.
        let third = reopened.create_switch(alice(), bob(), 0).unwrap();
        assert!(third != first && third != second);
        assert_eq!(reopened.events_since(5).unwrap()[0].seq, 6);
        assert_eq!(reopened.events_since(0).unwrap().len(), 6);
    }

    #[test]
    fn test_open_rejects_inconsistent_store() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new());
        {
            let registry = Registry::open(store.clone(), clock.clone()).unwrap();
            registry.create_switch(alice(), bob(), 0).unwrap();
        }
        let mut data = store.load().unwrap();
        data.switches.clear();
        let broken = MemoryStore::with_data(data, store.events_since(0).unwrap());
        assert!(matches!(
            Registry::open(broken, clock),
            Err(RegistryError::Store(StoreError::Corrupt(_)))
        ));
    }

    #[test]
    fn test_journal_head_comes_from_store() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new());
        {
            let registry = Registry::open(store.clone(), clock.clone()).unwrap();
            let id = registry.create_switch(alice(), bob(), ONE_UNIT).unwrap();
            registry.switch(id).unwrap().deposit(carol(), 1).unwrap();
        }

        // Only the head is loaded; records are read back on request.
        let loaded = store.load().unwrap();
        assert_eq!(loaded.last_seq, 3);

        let reopened = Registry::open(store.clone(), clock).unwrap();
        assert_eq!(reopened.last_event_seq(), 3);
        let tail = reopened.events_since(1).unwrap();
        let seqs: Vec<u64> = tail.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn test_expired_switch_still_accepts_owner_admin() {
        let (clock, registry) = setup();
        let id = registry.create_switch(alice(), bob(), ONE_UNIT).unwrap();
        let handle = registry.switch(id).unwrap();

        clock.advance(CHECK_IN_INTERVAL + 1);
        assert!(handle.is_expired());

        handle.set_beneficiary(alice(), carol()).unwrap();
        assert_eq!(handle.beneficiary(), carol());
        assert!(handle.is_expired());
        assert!(matches!(
            handle.withdraw(bob()),
            Err(RegistryError::Switch(SwitchError::Unauthorized { .. }))
        ));
        assert_eq!(handle.withdraw(carol()).unwrap(), ONE_UNIT);
    }

    #[test]
    fn test_open_with_interval_applies_to_new_switches() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Registry::open_with_interval(MemoryStore::new(), clock, 60).unwrap();
        assert_eq!(registry.check_in_interval(), 60);
        let id = registry.create_switch(alice(), bob(), 0).unwrap();
        assert_eq!(registry.switch(id).unwrap().get_deadline(), 60);
    }

    #[test]
    fn test_derive_switch_id_is_deterministic() {
        assert_eq!(derive_switch_id(alice(), 0), derive_switch_id(alice(), 0));
        assert_ne!(derive_switch_id(alice(), 0), derive_switch_id(alice(), 1));
        assert_ne!(derive_switch_id(alice(), 0), derive_switch_id(bob(), 0));
    }
}
