// Copyright 2023-2025 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use crate::store::DEFAULT_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use serde_json::Error;
use std::time::Duration;

/// Tunables of the token verifier.  Missing fields take their default value.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct VerifierConfig {
    /// Maximum number of derived keys kept in the key cache
    pub cache_capacity: usize,

    /// Time allowed to each URL-based key fetch, in milliseconds
    pub fetch_timeout_ms: u64,

    /// Longest trust chain accepted
    pub max_chain_len: usize,

    /// Require every recovered certificate to carry a valid X.509 signature
    /// from the key that recovered it
    pub check_issuer_signature: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            fetch_timeout_ms: 5000,
            max_chain_len: 8,
            check_issuer_signature: true,
        }
    }
}

impl VerifierConfig {
    pub fn load_json(j: &str) -> Result<Self, Error> {
        serde_json::from_str(j)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CONFIG: &str = include_str!("../testdata/config.json");

    #[test]
    fn load_json_ok() {
        let c = VerifierConfig::load_json(TEST_CONFIG).unwrap();

        assert_eq!(c.cache_capacity, 64);
        assert_eq!(c.fetch_timeout(), Duration::from_millis(250));
        assert_eq!(c.max_chain_len, 4);
        // not in the file
        assert!(c.check_issuer_signature);
    }

    #[test]
    fn load_json_defaults_and_errors() {
        assert_eq!(VerifierConfig::load_json("{}").unwrap(), VerifierConfig::default());
        assert!(VerifierConfig::load_json(r#"{"cache-size": 1}"#).is_err());
    }
}
