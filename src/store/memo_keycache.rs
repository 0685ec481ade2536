// Copyright 2023-2025 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::ikeycache::{IKeyCache, InsertOutcome};
use super::pubkey::{Fingerprint, PublicKeyRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

/// Default number of derived keys kept by a [`MemoKeyCache`]
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Slot {
    record: PublicKeyRecord,
    /// Logical time of the last lookup or insert
    last_used: AtomicU64,
}

/// In-memory, bounded cache of the public keys recovered from verified chain
/// links, indexed by key fingerprint.
///
/// Lookups only take the read lock (recency is tracked with an atomic tick),
/// so concurrent verifications do not serialise on cache hits.  When the cache
/// is full, inserting a new record evicts the least recently used one.
#[derive(Debug)]
pub struct MemoKeyCache {
    p: RwLock<HashMap<Fingerprint, Slot>>,
    clock: AtomicU64,
    capacity: usize,
}

impl Default for MemoKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoKeyCache {
    /// Returns a new empty cache with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Returns a new empty cache holding at most `capacity` records (at least
    /// one)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            p: Default::default(),
            clock: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.p.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a record for the fingerprint is cached.  Does not count as a use.
    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.p.read().unwrap().contains_key(fp)
    }

    pub fn remove(&self, fp: &Fingerprint) -> Option<PublicKeyRecord> {
        self.p.write().unwrap().remove(fp).map(|s| s.record)
    }

    pub fn clear(&self) {
        self.p.write().unwrap().clear()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn evict_lru(slots: &mut HashMap<Fingerprint, Slot>) -> Option<Fingerprint> {
        let victim = slots
            .iter()
            .min_by_key(|(_, s)| s.last_used.load(Ordering::Relaxed))
            .map(|(fp, _)| *fp)?;

        slots.remove(&victim);

        Some(victim)
    }
}

impl IKeyCache for MemoKeyCache {
    fn lookup(&self, fp: &Fingerprint) -> Option<PublicKeyRecord> {
        let slots = self.p.read().unwrap();

        let slot = slots.get(fp)?;
        slot.last_used.store(self.tick(), Ordering::Relaxed);

        Some(slot.record.clone())
    }

    fn insert(&self, record: PublicKeyRecord) -> InsertOutcome {
        let now = self.tick();
        let mut slots = self.p.write().unwrap();

        if let Some(slot) = slots.get(&record.fingerprint) {
            if slot.record.same_key(&record) {
                slot.last_used.store(now, Ordering::Relaxed);
                return InsertOutcome::AlreadyPresent;
            }
        }

        let mut outcome = InsertOutcome::Inserted;

        if !slots.contains_key(&record.fingerprint) && slots.len() >= self.capacity {
            if let Some(evicted) = Self::evict_lru(&mut slots) {
                outcome = InsertOutcome::Evicted(evicted);
            }
        }

        debug!(fingerprint = %record.fingerprint, "caching derived key");

        slots.insert(
            record.fingerprint,
            Slot {
                record,
                last_used: AtomicU64::new(now),
            },
        );

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use std::sync::Arc;

    fn record(link: usize) -> PublicKeyRecord {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let k = EcKey::generate(&group).unwrap();
        let pkey = PKey::public_key_from_der(&k.public_key_to_der().unwrap()).unwrap();
        let fp = Fingerprint::of(&pkey).unwrap();

        PublicKeyRecord::derived(fp, pkey, link)
    }

    #[test]
    fn insert_and_lookup_ok() {
        let c = MemoKeyCache::new();
        let r = record(0);

        assert_eq!(c.insert(r.clone()), InsertOutcome::Inserted);

        let res = c.lookup(&r.fingerprint);
        assert!(res.is_some());
        assert_eq!(res.unwrap(), r);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn reinsert_is_noop() {
        let c = MemoKeyCache::new();
        let r = record(0);

        c.insert(r.clone());

        // the same key derived at a different position in another chain
        let mut again = r.clone();
        again.derived_from_link = Some(2);

        assert_eq!(c.insert(again), InsertOutcome::AlreadyPresent);
        assert_eq!(c.len(), 1);
        assert_eq!(c.lookup(&r.fingerprint).unwrap().derived_from_link, Some(0));
    }

    #[test]
    fn evicts_least_recently_used() {
        let c = MemoKeyCache::with_capacity(2);
        let (a, b, d) = (record(0), record(1), record(2));

        c.insert(a.clone());
        c.insert(b.clone());

        // touch a, so that b becomes the LRU
        assert!(c.lookup(&a.fingerprint).is_some());

        assert_eq!(c.insert(d.clone()), InsertOutcome::Evicted(b.fingerprint));
        assert_eq!(c.len(), 2);
        assert!(c.contains(&a.fingerprint));
        assert!(!c.contains(&b.fingerprint));
        assert!(c.contains(&d.fingerprint));
    }

    #[test]
    fn zero_capacity_holds_one() {
        let c = MemoKeyCache::with_capacity(0);
        assert_eq!(c.capacity(), 1);

        let (a, b) = (record(0), record(1));
        c.insert(a.clone());

        assert_eq!(c.insert(b.clone()), InsertOutcome::Evicted(a.fingerprint));
        assert!(c.lookup(&b.fingerprint).is_some());
    }

    #[test]
    fn remove_and_clear() {
        let c = MemoKeyCache::new();
        let (a, b) = (record(0), record(1));
        c.insert(a.clone());
        c.insert(b.clone());

        assert_eq!(c.remove(&a.fingerprint), Some(a.clone()));
        assert!(c.lookup(&a.fingerprint).is_none());

        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn concurrent_inserts_converge() {
        let c = Arc::new(MemoKeyCache::with_capacity(16));
        let shared = record(0);
        let others: Vec<PublicKeyRecord> = (1..=8).map(record).collect();

        std::thread::scope(|s| {
            for other in others.iter() {
                let c = c.clone();
                let shared = shared.clone();
                s.spawn(move || {
                    c.insert(shared.clone());
                    c.insert(other.clone());
                    assert!(c.lookup(&shared.fingerprint).is_some());
                });
            }
        });

        assert_eq!(c.len(), 9);
        assert!(c.lookup(&shared.fingerprint).unwrap().same_key(&shared));
    }
}
