// Copyright 2023-2025 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::crypto;
use super::errors::Error;
use super::link::{ChainLink, KeyRef};
use super::resolver::{KeyRefResolver, Resolved};
use crate::store::{
    Fingerprint, IKeyCache, ITrustAnchorStore, InsertOutcome, Provenance, PublicKeyRecord,
};
use openssl::pkey::{PKey, Public};
use tracing::{debug, warn};

/// The key produced at the end of a successful chain walk
#[derive(Clone, Debug)]
pub struct TerminalKey {
    pub fingerprint: Fingerprint,
    pub public_key: PKey<Public>,
}

impl From<Resolved> for TerminalKey {
    fn from(r: Resolved) -> Self {
        Self {
            fingerprint: r.fingerprint,
            public_key: r.public_key,
        }
    }
}

/// Walks a trust chain link by link.
///
/// Only the key of link 0 is resolved, and it must already be trusted (trust
/// anchor or key cache).  Every subsequent link is verified with the key
/// recovered from the previous one; its own key reference can only confirm
/// that key, never replace it.  Each recovered key is committed to the cache
/// as soon as its link has been verified, so a failure further down the chain
/// leaves the keys already proven in place.
pub struct ChainVerifier<'a, T, C> {
    resolver: KeyRefResolver<'a, T, C>,
    cache: &'a C,
    check_issuer_signature: bool,
}

impl<'a, T, C> ChainVerifier<'a, T, C>
where
    T: ITrustAnchorStore,
    C: IKeyCache,
{
    pub fn new(resolver: KeyRefResolver<'a, T, C>, cache: &'a C) -> Self {
        Self {
            resolver,
            cache,
            check_issuer_signature: true,
        }
    }

    /// Whether recovered certificates must also carry a valid X.509
    /// signature from the key that recovered them
    pub fn check_issuer_signature(mut self, v: bool) -> Self {
        self.check_issuer_signature = v;
        self
    }

    /// Walk `chain` and return the terminal public key.
    ///
    /// `signer_ref` is the key reference of the object the terminal key is
    /// meant to verify.  With an empty chain it is resolved like link 0 and is
    /// therefore mandatory; otherwise a fingerprint must match the terminal
    /// key and a URL is ignored.
    pub fn walk(
        &self,
        chain: &[ChainLink],
        signer_ref: Option<&KeyRef>,
    ) -> Result<TerminalKey, Error> {
        let mut current: Option<TerminalKey> = None;

        for (i, link) in chain.iter().enumerate() {
            let key = match current.take() {
                None => self.resolve_root(&link.header().key_ref).map_err(|e| e.at_link(i))?,
                Some(k) => {
                    self.bind(&link.header().key_ref, &k).map_err(|e| e.at_link(i))?;
                    k
                }
            };

            let next = self.step(i, link, &key).map_err(|e| e.at_link(i))?;

            current = Some(next);
        }

        match (current, signer_ref) {
            (None, Some(r)) => self.resolve_root(r),
            (None, None) => Err(Error::Syntax(
                "token carries neither a trust chain nor a key reference".to_string(),
            )),
            (Some(k), Some(r)) => {
                self.bind(r, &k)?;
                Ok(k)
            }
            (Some(k), None) => Ok(k),
        }
    }

    /// Resolve the key at the root of the walk.  Anything not already trusted
    /// is rejected: a fetched key only supplies material, never trust.
    fn resolve_root(&self, key_ref: &KeyRef) -> Result<TerminalKey, Error> {
        let r = self.resolver.resolve(key_ref).map_err(|e| match e {
            Error::UnresolvedKeyRef(m) => Error::UntrustedRoot(m),
            e => e,
        })?;

        if r.provenance == Provenance::Fetched {
            warn!(fingerprint = %r.fingerprint, "fetched root key matches no trusted key");
            return Err(Error::UntrustedRoot(format!(
                "fetched key {} matches no trust anchor or cached key",
                r.fingerprint
            )));
        }

        debug!(fingerprint = %r.fingerprint, provenance = ?r.provenance, "chain root resolved");

        Ok(r.into())
    }

    /// Check that a key reference past the root agrees with the key carried
    /// over from the previous step
    fn bind(&self, key_ref: &KeyRef, current: &TerminalKey) -> Result<(), Error> {
        match key_ref {
            KeyRef::Fingerprint(fp) if *fp != current.fingerprint => {
                Err(Error::FingerprintBindingMismatch(format!(
                    "expecting {}, got {fp}",
                    current.fingerprint
                )))
            }
            KeyRef::Fingerprint(_) => Ok(()),
            KeyRef::Url { url, .. } => {
                debug!(url, "URL key reference is informational past the root");
                Ok(())
            }
        }
    }

    /// Verify one link with `key`, recover the next certificate, and cache its
    /// public key
    fn step(&self, i: usize, link: &ChainLink, key: &TerminalKey) -> Result<TerminalKey, Error> {
        let header = link.header();

        crypto::verify(header.alg, &key.public_key, link.signing_input(), link.signature())?;

        if header.enc != crypto::ENC_RSA_PKCS1 {
            return Err(Error::RecoveryFailed(format!(
                "unsupported protection transform {}",
                header.enc
            )));
        }

        let der = crypto::recover(link.protected_cert(), &key.public_key)?;
        let cert = crypto::parse_cert(&der)?;

        if self.check_issuer_signature {
            let ok = cert
                .verify(&key.public_key)
                .map_err(|e| Error::RecoveryFailed(e.to_string()))?;

            if !ok {
                return Err(Error::RecoveryFailed(format!(
                    "recovered certificate is not signed by {}",
                    key.fingerprint
                )));
            }
        }

        let next = cert
            .public_key()
            .map_err(|e| Error::RecoveryFailed(format!("extracting public key: {e}")))?;
        let fingerprint = Fingerprint::of(&next)?;

        debug!(link = i, issuer = %key.fingerprint, subject = %fingerprint, "link verified");

        match self
            .cache
            .insert(PublicKeyRecord::derived(fingerprint, next.clone(), i))
        {
            InsertOutcome::Evicted(old) => {
                let e = Error::CacheCapacityExceeded(format!("evicted {old}"));
                warn!("{e}");
            }
            InsertOutcome::AlreadyPresent => {
                debug!(fingerprint = %fingerprint, "key already cached")
            }
            InsertOutcome::Inserted => {}
        }

        Ok(TerminalKey {
            fingerprint,
            public_key: next,
        })
    }
}
