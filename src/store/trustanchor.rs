// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::pubkey::{Fingerprint, PublicKeyRecord};
use openssl::pkey::{PKey, Public};
use serde::Deserialize;

/// A root-of-trust public key as provisioned in the trust anchor JSON file
#[serde_with::serde_as]
#[derive(Clone, Deserialize, Debug)]
pub struct TrustAnchorEntry {
    /// The public key wrapped in a Subject Public Key Info and serialised
    /// using the textual encoding described in §13 of RFC7468
    pub pkey: String,

    /// (Optional) the expected SHA-256 fingerprint of the key, hex encoded.
    /// When present it must match the fingerprint computed from `pkey`.
    #[serde(rename = "x5t#S256")]
    #[serde_as(as = "Option<serde_with::hex::Hex>")]
    pub fingerprint: Option<[u8; 32]>,

    /// (Optional) human readable label, e.g., "root-authority"
    #[serde(default)]
    pub label: Option<String>,
}

/// A public key trusted a priori, outside the protocol
#[derive(Clone, Debug)]
pub struct TrustAnchor {
    pub fingerprint: Fingerprint,
    pub public_key: PKey<Public>,
    pub label: Option<String>,
}

impl TrustAnchor {
    pub fn new(public_key: PKey<Public>) -> Result<Self, Error> {
        let fingerprint = Fingerprint::of(&public_key)?;

        Ok(Self {
            fingerprint,
            public_key,
            label: None,
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self, Error> {
        let pkey = PKey::public_key_from_pem(pem.as_bytes())
            .map_err(|e| Error::Syntax(format!("parsing PEM public key: {e}")))?;

        Self::new(pkey)
    }

    pub fn to_record(&self) -> PublicKeyRecord {
        PublicKeyRecord::anchor(self.fingerprint, self.public_key.clone())
    }
}

impl TryFrom<&TrustAnchorEntry> for TrustAnchor {
    type Error = Error;

    fn try_from(entry: &TrustAnchorEntry) -> Result<Self, Error> {
        let mut ta = TrustAnchor::from_pem(&entry.pkey)?;

        if let Some(declared) = entry.fingerprint {
            let declared = Fingerprint::from(declared);

            if declared != ta.fingerprint {
                return Err(Error::Sema(format!(
                    "declared fingerprint {declared} does not match computed {}",
                    ta.fingerprint
                )));
            }
        }

        ta.label = entry.label.clone();

        Ok(ta)
    }
}
