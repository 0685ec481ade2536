// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Key stores consulted while walking a trust chain: the read-only
//! [`MemoTrustAnchorStore`] of root keys, and the bounded [`MemoKeyCache`] of
//! keys recovered from previously verified links.

pub use self::errors::Error;
pub use self::ikeycache::{IKeyCache, InsertOutcome};
pub use self::itrustanchorstore::ITrustAnchorStore;
pub use self::memo_keycache::{MemoKeyCache, DEFAULT_CACHE_CAPACITY};
pub use self::memo_trustanchorstore::MemoTrustAnchorStore;
pub use self::pubkey::{Fingerprint, Provenance, PublicKeyRecord, FINGERPRINT_LEN};
pub use self::trustanchor::{TrustAnchor, TrustAnchorEntry};

mod errors;
mod ikeycache;
mod itrustanchorstore;
mod memo_keycache;
mod memo_trustanchorstore;
mod pubkey;
mod trustanchor;
