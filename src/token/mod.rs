// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! The token module decodes chain links and tokens and walks their trust
//! chain.  [`TokenVerifier`] is the entry point.
//!
//! # Example
//!
//! The following example assumes that `token` contains a JWS compact token
//! whose `chain` header parameter starts at one of the loaded trust anchors.
//!
//! ```no_run
//! use chaintoken::store::{MemoKeyCache, MemoTrustAnchorStore};
//! use chaintoken::token::{TokenVerifier, Verdict};
//!
//! let token = std::fs::read_to_string("token.jwt").expect("reading token");
//!
//! const jta: &str = include_str!("../../testdata/ta.json");
//! let mut tas = MemoTrustAnchorStore::new();
//! tas.load_json(jta).expect("loading trust anchors");
//!
//! // the cache is meant to outlive single verifications
//! let cache = MemoKeyCache::new();
//!
//! match TokenVerifier::new(&tas, &cache).verify(&token) {
//!     Verdict::Trusted(t) => println!("signed by {}", t.identity),
//!     Verdict::Untrusted(e) => println!("rejected: {e}"),
//! }
//! ```

pub use self::chain::{ChainVerifier, TerminalKey};
pub use self::errors::Error;
pub use self::link::{ChainLink, Header, KeyRef, UrlKind, LINK_TYP};
pub use self::resolver::{
    FetchError, Fetcher, FileFetcher, KeyRefResolver, MemoFetcher, Resolved, DEFAULT_FETCH_TIMEOUT,
};
pub use self::verifier::{Token, TokenHeader, TokenVerifier, Trusted, Verdict};

pub mod crypto;

mod base64;
mod chain;
mod errors;
mod link;
mod resolver;
#[cfg(test)]
mod testutil;
mod verifier;
