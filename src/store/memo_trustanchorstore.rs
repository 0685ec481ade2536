// Copyright 2023-2025 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::pubkey::{Fingerprint, PublicKeyRecord};
use super::trustanchor::{TrustAnchor, TrustAnchorEntry};
use super::ITrustAnchorStore;
use std::collections::HashMap;
use std::sync::RwLock;

/// The store where the root-of-trust keys are stashed.  Trust anchors are
/// indexed by their key fingerprint.
#[derive(Debug)]
pub struct MemoTrustAnchorStore {
    p: RwLock<HashMap<Fingerprint, TrustAnchor>>,
}

impl Default for MemoTrustAnchorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoTrustAnchorStore {
    /// Returns a new empty TrustAnchorStore
    pub fn new() -> Self {
        Self {
            p: Default::default(),
        }
    }

    /// Add a single trust anchor, replacing any anchor with the same
    /// fingerprint
    pub fn add(&mut self, ta: TrustAnchor) {
        self.p.write().unwrap().insert(ta.fingerprint, ta);
    }

    /// Add to an existing (and possibly empty) TrustAnchorStore the trust
    /// anchors loaded from the given JSON file.  Either all the anchors in the
    /// file are added, or none.
    pub fn load_json(&mut self, j: &str) -> Result<(), Error> {
        let entries: Vec<TrustAnchorEntry> =
            serde_json::from_str(j).map_err(|e| Error::Syntax(e.to_string()))?;

        let tas = entries
            .iter()
            .map(TrustAnchor::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        for ta in tas {
            self.add(ta);
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.p.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ITrustAnchorStore for MemoTrustAnchorStore {
    /// Lookup a trust anchor from the store given its key fingerprint
    fn lookup(&self, fp: &Fingerprint) -> Option<PublicKeyRecord> {
        return self.p.read().unwrap().get(fp).map(TrustAnchor::to_record);
    }
}
