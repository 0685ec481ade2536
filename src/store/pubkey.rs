// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use openssl::pkey::{PKey, PKeyRef, Public};
use openssl::sha::sha256;

/// Length in bytes of a key fingerprint (SHA-256)
pub const FINGERPRINT_LEN: usize = 32;

/// The SHA-256 digest of the DER-encoded SubjectPublicKeyInfo of a public
/// key.  Identical keys always yield identical fingerprints, which is what
/// allows independently received chains to hit the same cache entries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Compute the fingerprint of the supplied public key
    pub fn of<T>(pkey: &PKeyRef<T>) -> Result<Self, Error>
    where
        T: openssl::pkey::HasPublic,
    {
        let der = pkey
            .public_key_to_der()
            .map_err(|e| Error::Key(format!("encoding public key: {e}")))?;

        Ok(Self(sha256(&der)))
    }

    /// Wrap an existing digest, which must be exactly 32 bytes long
    pub fn from_slice(v: &[u8]) -> Result<Self, Error> {
        let d: [u8; FINGERPRINT_LEN] = v.try_into().map_err(|_| {
            Error::Syntax(format!(
                "fingerprint must be {FINGERPRINT_LEN} bytes, got {}",
                v.len()
            ))
        })?;

        Ok(Self(d))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl From<[u8; FINGERPRINT_LEN]> for Fingerprint {
    fn from(v: [u8; FINGERPRINT_LEN]) -> Self {
        Self(v)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(self.0))
    }
}

/// Where a public key comes from, and therefore how far it can be trusted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// Provisioned out-of-band in the trust anchor store
    Anchor,
    /// Recovered from a verified chain link
    Derived,
    /// Retrieved from a URL and not (yet) matched against a trusted key
    Fetched,
}

/// A verified public key together with its provenance.  Records are
/// immutable once created: stores only ever insert or evict them.
#[derive(Clone, Debug)]
pub struct PublicKeyRecord {
    pub fingerprint: Fingerprint,
    pub public_key: PKey<Public>,
    pub provenance: Provenance,
    /// Position of the chain link the key was recovered from
    pub derived_from_link: Option<usize>,
}

impl PublicKeyRecord {
    pub fn anchor(fingerprint: Fingerprint, public_key: PKey<Public>) -> Self {
        Self {
            fingerprint,
            public_key,
            provenance: Provenance::Anchor,
            derived_from_link: None,
        }
    }

    pub fn derived(fingerprint: Fingerprint, public_key: PKey<Public>, link: usize) -> Self {
        Self {
            fingerprint,
            public_key,
            provenance: Provenance::Derived,
            derived_from_link: Some(link),
        }
    }

    /// Two records carry the same key material, regardless of the link
    /// position they were first derived at
    pub fn same_key(&self, other: &PublicKeyRecord) -> bool {
        self.fingerprint == other.fingerprint && self.public_key.public_eq(&other.public_key)
    }
}

impl PartialEq for PublicKeyRecord {
    fn eq(&self, other: &Self) -> bool {
        self.same_key(other)
            && self.provenance == other.provenance
            && self.derived_from_link == other.derived_from_link
    }
}
