// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Trust-chain verification for tokens signed by keys issued through a
//! multi-level authority hierarchy (e.g., root authority → cluster → node →
//! workload).
//!
//! Only the root keys are trusted a priori.  A token carries, in its header,
//! an ordered chain of signed links; each link holds the next level's X.509
//! certificate protected so that only the holder of the current level's
//! (already trusted) public key can recover it.  No certificate travels in
//! plaintext.
//!
//! The API allows:
//! * Decoding and producing chain links and tokens (JWS compact serialization)
//! * Walking a trust chain from a trust anchor down to the token signer
//! * Caching the keys recovered along the way, so that chains sharing a prefix
//!   skip re-derivation
//! * Verifying the token signature with the terminal key of the walk

pub mod config;
pub mod store;
pub mod token;
