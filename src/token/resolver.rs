// Copyright 2023-2025 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::crypto;
use super::errors::Error;
use super::link::{KeyRef, UrlKind};
use crate::store::{Fingerprint, IKeyCache, ITrustAnchorStore, Provenance, PublicKeyRecord};
use openssl::pkey::{PKey, Public};
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::RwLock;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default time allowed to a single key fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FetchError {
    #[error("{0}")]
    Failed(String),
    #[error("timed out")]
    Timeout,
}

/// Retrieves key material named by URL.  What comes back is never trusted
/// until its fingerprint matches an anchor or a cached key.
pub trait Fetcher: Send + Sync {
    /// Fetch the raw certificate (`UrlKind::X509`) or JWK set
    /// (`UrlKind::JwkSet`) found at `url`, giving up after `timeout`
    fn fetch(
        &self,
        url: &str,
        kind: UrlKind,
        timeout: Duration,
    ) -> Result<Vec<u8>, FetchError>;
}

/// Fetches `file://` URLs from the local filesystem.
///
/// The read runs on its own thread.  When it does not complete within the
/// timeout (a FIFO nobody writes to, a stalled network mount) the thread is
/// left behind and `FetchError::Timeout` is returned.
#[derive(Debug, Default)]
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn fetch(&self, url: &str, _kind: UrlKind, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| FetchError::Failed(format!("unsupported URL scheme in {url}")))?
            .to_string();

        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let r = std::fs::read(&path).map_err(|e| FetchError::Failed(format!("{path}: {e}")));
            // the receiver is gone once the deadline has passed
            let _ = tx.send(r);
        });

        match rx.recv_timeout(timeout) {
            Ok(r) => r,
            Err(RecvTimeoutError::Timeout) => Err(FetchError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(FetchError::Failed(format!("{url}: reader exited")))
            }
        }
    }
}

/// Serves key material from an in-memory map of URL to bytes
#[derive(Debug, Default)]
pub struct MemoFetcher {
    p: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoFetcher {
    pub fn new() -> Self {
        Self {
            p: Default::default(),
        }
    }

    pub fn insert(&self, url: &str, material: Vec<u8>) {
        self.p.write().unwrap().insert(url.to_string(), material);
    }
}

impl Fetcher for MemoFetcher {
    fn fetch(&self, url: &str, _kind: UrlKind, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
        self.p
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Failed(format!("{url} not found")))
    }
}

/// A candidate public key and how it was obtained
#[derive(Clone, Debug)]
pub struct Resolved {
    pub fingerprint: Fingerprint,
    pub public_key: PKey<Public>,
    pub provenance: Provenance,
}

impl From<PublicKeyRecord> for Resolved {
    fn from(r: PublicKeyRecord) -> Self {
        Self {
            fingerprint: r.fingerprint,
            public_key: r.public_key,
            provenance: r.provenance,
        }
    }
}

/// Turns a key reference into a candidate public key, using the key cache,
/// the trust anchors and, for URL references, the fetcher.
pub struct KeyRefResolver<'a, T, C> {
    anchors: &'a T,
    cache: &'a C,
    fetcher: Option<&'a dyn Fetcher>,
    timeout: Duration,
}

impl<'a, T, C> KeyRefResolver<'a, T, C>
where
    T: ITrustAnchorStore,
    C: IKeyCache,
{
    pub fn new(anchors: &'a T, cache: &'a C) -> Self {
        Self {
            anchors,
            cache,
            fetcher: None,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetcher(mut self, fetcher: &'a dyn Fetcher, timeout: Duration) -> Self {
        self.fetcher = Some(fetcher);
        self.timeout = timeout;
        self
    }

    /// Look a fingerprint up in the cache first, then in the trust anchors
    pub fn lookup_trusted(&self, fp: &Fingerprint) -> Option<Resolved> {
        if let Some(r) = self.cache.lookup(fp) {
            debug!(fingerprint = %fp, "key cache hit");
            return Some(r.into());
        }

        self.anchors.lookup(fp).map(|r| {
            debug!(fingerprint = %fp, "trust anchor hit");
            r.into()
        })
    }

    /// Resolve a key reference.
    ///
    /// A fingerprint never triggers network access and never discovers a new
    /// root of trust: it is either known, or `UnresolvedKeyRef`.  A URL is
    /// fetched; if any of the fetched keys is already known, the stored
    /// trusted record is returned, otherwise the first fetched key is returned
    /// with `Provenance::Fetched`.
    pub fn resolve(&self, key_ref: &KeyRef) -> Result<Resolved, Error> {
        match key_ref {
            KeyRef::Fingerprint(fp) => self
                .lookup_trusted(fp)
                .ok_or_else(|| Error::UnresolvedKeyRef(format!("unknown key fingerprint {fp}"))),
            KeyRef::Url { url, kind } => self.resolve_url(url, *kind),
        }
    }

    fn resolve_url(&self, url: &str, kind: UrlKind) -> Result<Resolved, Error> {
        let material = self.fetch(url, kind)?;

        let keys = match kind {
            UrlKind::X509 => crypto::keys_from_x509(&material)?,
            UrlKind::JwkSet => crypto::keys_from_jwk_set(&material)?,
        };

        let mut first: Option<Resolved> = None;

        for key in keys {
            let fp = Fingerprint::of(&key)?;

            if let Some(trusted) = self.lookup_trusted(&fp) {
                return Ok(trusted);
            }

            first.get_or_insert(Resolved {
                fingerprint: fp,
                public_key: key,
                provenance: Provenance::Fetched,
            });
        }

        first.ok_or_else(|| Error::UnresolvedKeyRef(format!("no usable key at {url}")))
    }

    fn fetch(&self, url: &str, kind: UrlKind) -> Result<Vec<u8>, Error> {
        let fetcher = self
            .fetcher
            .ok_or_else(|| Error::KeyFetchFailed(format!("no fetcher configured for {url}")))?;

        debug!(url, ?kind, timeout = ?self.timeout, "fetching key material");

        let start = Instant::now();

        let material = fetcher.fetch(url, kind, self.timeout).map_err(|e| {
            warn!(url, "key fetch failed: {e}");
            match e {
                FetchError::Timeout => Error::KeyFetchTimeout(url.to_string()),
                FetchError::Failed(m) => Error::KeyFetchFailed(format!("{url}: {m}")),
            }
        })?;

        // material that shows up after the deadline is discarded
        if start.elapsed() > self.timeout {
            warn!(url, "key fetch exceeded its deadline");
            return Err(Error::KeyFetchTimeout(url.to_string()));
        }

        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoKeyCache, MemoTrustAnchorStore};
    use crate::token::testutil;
    use std::thread;

    struct SlowFetcher {
        delay: Duration,
        material: Vec<u8>,
    }

    impl Fetcher for SlowFetcher {
        fn fetch(
            &self,
            _url: &str,
            _kind: UrlKind,
            _timeout: Duration,
        ) -> Result<Vec<u8>, FetchError> {
            thread::sleep(self.delay);
            Ok(self.material.clone())
        }
    }

    struct TimeoutFetcher;

    impl Fetcher for TimeoutFetcher {
        fn fetch(
            &self,
            _url: &str,
            _kind: UrlKind,
            _timeout: Duration,
        ) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Timeout)
        }
    }

    fn x5u(url: &str) -> KeyRef {
        KeyRef::Url {
            url: url.to_string(),
            kind: UrlKind::X509,
        }
    }

    #[test]
    fn fingerprint_from_anchor() {
        let pki = testutil::pki();
        let tas = testutil::anchors(&pki.root);
        let cache = MemoKeyCache::new();

        let r = KeyRefResolver::new(&tas, &cache)
            .resolve(&KeyRef::Fingerprint(pki.root.fp))
            .unwrap();

        assert_eq!(r.provenance, Provenance::Anchor);
        assert_eq!(r.fingerprint, pki.root.fp);
        assert!(r.public_key.public_eq(&pki.root.key));
    }

    #[test]
    fn fingerprint_prefers_cache() {
        let pki = testutil::pki();
        let tas = testutil::anchors(&pki.root);
        let cache = MemoKeyCache::new();
        cache.insert(PublicKeyRecord::derived(
            pki.root.fp,
            testutil::public(&pki.root.key),
            0,
        ));

        let r = KeyRefResolver::new(&tas, &cache)
            .resolve(&KeyRef::Fingerprint(pki.root.fp))
            .unwrap();

        assert_eq!(r.provenance, Provenance::Derived);
    }

    #[test]
    fn fingerprint_unknown() {
        let pki = testutil::pki();
        let tas = testutil::anchors(&pki.root);
        let cache = MemoKeyCache::new();
        let fetcher = MemoFetcher::new();

        let r = KeyRefResolver::new(&tas, &cache)
            .with_fetcher(&fetcher, DEFAULT_FETCH_TIMEOUT)
            .resolve(&KeyRef::Fingerprint(pki.node.fp));

        assert!(matches!(r, Err(Error::UnresolvedKeyRef(_))));
    }

    #[test]
    fn url_unknown_key_is_fetched() {
        let pki = testutil::pki();
        let tas = testutil::anchors(&pki.root);
        let cache = MemoKeyCache::new();
        let fetcher = MemoFetcher::new();
        fetcher.insert("https://ca.example/node.pem", pki.node.cert.to_pem().unwrap());

        let r = KeyRefResolver::new(&tas, &cache)
            .with_fetcher(&fetcher, DEFAULT_FETCH_TIMEOUT)
            .resolve(&x5u("https://ca.example/node.pem"))
            .unwrap();

        assert_eq!(r.provenance, Provenance::Fetched);
        assert_eq!(r.fingerprint, pki.node.fp);
    }

    #[test]
    fn url_known_key_is_confirmed() {
        let pki = testutil::pki();
        let tas = testutil::anchors(&pki.root);
        let cache = MemoKeyCache::new();
        let fetcher = MemoFetcher::new();
        fetcher.insert("https://ca.example/root.der", pki.root.cert.to_der().unwrap());

        let r = KeyRefResolver::new(&tas, &cache)
            .with_fetcher(&fetcher, DEFAULT_FETCH_TIMEOUT)
            .resolve(&x5u("https://ca.example/root.der"))
            .unwrap();

        assert_eq!(r.provenance, Provenance::Anchor);
        assert_eq!(r.fingerprint, pki.root.fp);
    }

    #[test]
    fn jwk_set_picks_known_key() {
        let pki = testutil::pki();
        let tas = testutil::anchors(&pki.root);
        let cache = MemoKeyCache::new();
        let fetcher = MemoFetcher::new();
        let set = testutil::jwk_set(&[&pki.node.key, &pki.root.key]);
        fetcher.insert("https://ca.example/jwks", set.into_bytes());

        let r = KeyRefResolver::new(&tas, &cache)
            .with_fetcher(&fetcher, DEFAULT_FETCH_TIMEOUT)
            .resolve(&KeyRef::Url {
                url: "https://ca.example/jwks".to_string(),
                kind: UrlKind::JwkSet,
            })
            .unwrap();

        assert_eq!(r.provenance, Provenance::Anchor);
        assert_eq!(r.fingerprint, pki.root.fp);
    }

    #[test]
    fn url_fetch_failures() {
        let pki = testutil::pki();
        let tas = testutil::anchors(&pki.root);
        let cache = MemoKeyCache::new();
        let fetcher = MemoFetcher::new();
        fetcher.insert("https://ca.example/junk", b"junk".to_vec());

        // no fetcher at all
        let r = KeyRefResolver::new(&tas, &cache).resolve(&x5u("https://ca.example/x"));
        assert!(matches!(r, Err(Error::KeyFetchFailed(_))));

        let resolver =
            KeyRefResolver::new(&tas, &cache).with_fetcher(&fetcher, DEFAULT_FETCH_TIMEOUT);

        let r = resolver.resolve(&x5u("https://ca.example/missing"));
        assert!(matches!(r, Err(Error::KeyFetchFailed(_))));

        let r = resolver.resolve(&x5u("https://ca.example/junk"));
        assert!(matches!(r, Err(Error::UnresolvedKeyRef(_))));

        let r = resolver.resolve(&x5u("ftp://ca.example/junk"));
        assert!(matches!(r, Err(Error::KeyFetchFailed(_))));
    }

    #[test]
    fn url_fetch_timeouts() {
        let pki = testutil::pki();
        let tas = testutil::anchors(&pki.root);
        let cache = MemoKeyCache::new();

        let r = KeyRefResolver::new(&tas, &cache)
            .with_fetcher(&TimeoutFetcher, DEFAULT_FETCH_TIMEOUT)
            .resolve(&x5u("https://ca.example/root.der"));
        assert!(matches!(r, Err(Error::KeyFetchTimeout(_))));

        // trusted material that arrives late is still discarded
        let slow = SlowFetcher {
            delay: Duration::from_millis(50),
            material: pki.root.cert.to_der().unwrap(),
        };

        let r = KeyRefResolver::new(&tas, &cache)
            .with_fetcher(&slow, Duration::from_millis(10))
            .resolve(&x5u("https://ca.example/root.der"));
        assert!(matches!(r, Err(Error::KeyFetchTimeout(_))));
    }

    #[test]
    fn file_fetcher() {
        let pki = testutil::pki();
        let path =
            std::env::temp_dir().join(format!("chaintoken-{}-root.pem", std::process::id()));
        std::fs::write(&path, pki.root.cert.to_pem().unwrap()).unwrap();

        let url = format!("file://{}", path.display());
        let m = FileFetcher.fetch(&url, UrlKind::X509, DEFAULT_FETCH_TIMEOUT).unwrap();
        assert_eq!(m, pki.root.cert.to_pem().unwrap());

        assert!(FileFetcher
            .fetch("https://ca.example/root.pem", UrlKind::X509, DEFAULT_FETCH_TIMEOUT)
            .is_err());

        std::fs::remove_file(path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn file_fetcher_gives_up_on_blocked_read() {
        let fifo = testutil::Fifo::new("blocked");

        let start = Instant::now();
        let r = FileFetcher.fetch(&fifo.url(), UrlKind::X509, Duration::from_millis(100));

        assert_eq!(r, Err(FetchError::Timeout));
        assert!(start.elapsed() < Duration::from_secs(2));

        let pki = testutil::pki();
        let tas = testutil::anchors(&pki.root);
        let cache = MemoKeyCache::new();

        let r = KeyRefResolver::new(&tas, &cache)
            .with_fetcher(&FileFetcher, Duration::from_millis(100))
            .resolve(&x5u(&fifo.url()));
        assert!(matches!(r, Err(Error::KeyFetchTimeout(_))));
    }
}
