// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::pubkey::{Fingerprint, PublicKeyRecord};

/// Interface to the store where the root-of-trust public keys are stashed.
/// The store is read-only from the point of view of chain verification.
pub trait ITrustAnchorStore {
    /// Lookup a trust anchor from the store given its key fingerprint
    fn lookup(&self, fp: &Fingerprint) -> Option<PublicKeyRecord>;
}
