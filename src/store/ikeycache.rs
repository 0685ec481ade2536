// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::pubkey::{Fingerprint, PublicKeyRecord};

/// What happened to a record handed to [`IKeyCache::insert`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same key material was already cached
    AlreadyPresent,
    /// The record was inserted after evicting the least recently used one
    Evicted(Fingerprint),
}

/// Interface to the process-wide cache of public keys recovered from
/// verified chain links.  Implementations must tolerate concurrent lookups
/// and inserts.
pub trait IKeyCache {
    /// Lookup a previously derived key given its fingerprint
    fn lookup(&self, fp: &Fingerprint) -> Option<PublicKeyRecord>;

    /// Insert a derived key.  Re-inserting a content-identical record is a
    /// no-op.
    fn insert(&self, record: PublicKeyRecord) -> InsertOutcome;
}
