// Copyright 2023-2025 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! In-process PKI used by the unit tests: root authority → cluster → node →
//! workload, all RSA so that every level can protect the next one.

use super::base64;
use super::crypto;
use super::link::{ChainLink, Header, KeyRef};
use crate::store::{Fingerprint, MemoTrustAnchorStore, TrustAnchor};
use jsonwebtoken::Algorithm;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

static SERIAL: AtomicU32 = AtomicU32::new(1);

pub struct Level {
    pub key: PKey<Private>,
    pub cert: X509,
    pub fp: Fingerprint,
}

impl Level {
    /// A new level whose certificate is issued by `issuer`, or self-signed
    pub fn new(cn: &str, key: PKey<Private>, issuer: Option<&Level>) -> Self {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
        let name = name.build();

        let serial = BigNum::from_u32(SERIAL.fetch_add(1, Ordering::Relaxed))
            .unwrap()
            .to_asn1_integer()
            .unwrap();

        let mut b = X509Builder::new().unwrap();
        b.set_version(2).unwrap();
        b.set_serial_number(&serial).unwrap();
        b.set_subject_name(&name).unwrap();
        b.set_pubkey(&key).unwrap();
        b.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        b.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();

        match issuer {
            Some(i) => {
                b.set_issuer_name(i.cert.subject_name()).unwrap();
                b.sign(&i.key, MessageDigest::sha256()).unwrap();
            }
            None => {
                b.set_issuer_name(&name).unwrap();
                b.sign(&key, MessageDigest::sha256()).unwrap();
            }
        }

        let fp = Fingerprint::of(&key).unwrap();

        Self {
            key,
            cert: b.build(),
            fp,
        }
    }
}

pub struct Pki {
    pub root: Level,
    pub cluster: Level,
    pub node: Level,
    pub workload: Level,
}

/// The shared test hierarchy (key generation is slow, so it is built once)
pub fn pki() -> &'static Pki {
    static PKI: OnceLock<Pki> = OnceLock::new();

    PKI.get_or_init(|| {
        let root = Level::new("root-authority", rsa_key(), None);
        let cluster = Level::new("cluster", rsa_key(), Some(&root));
        let node = Level::new("node", rsa_key(), Some(&cluster));
        let workload = Level::new("workload", rsa_key(), Some(&node));

        Pki {
            root,
            cluster,
            node,
            workload,
        }
    })
}

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub fn ec_key(nid: Nid) -> PKey<Private> {
    let group = EcGroup::from_curve_name(nid).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub fn public(key: &PKey<Private>) -> PKey<Public> {
    PKey::public_key_from_der(&key.public_key_to_der().unwrap()).unwrap()
}

pub fn anchors(root: &Level) -> MemoTrustAnchorStore {
    let mut tas = MemoTrustAnchorStore::new();
    tas.add(TrustAnchor::new(public(&root.key)).unwrap());
    tas
}

/// A link from `issuer` to `subject`, naming the issuer by fingerprint
pub fn link(issuer: &Level, subject: &Level) -> ChainLink {
    link_with(issuer, subject, KeyRef::Fingerprint(issuer.fp))
}

pub fn link_with(issuer: &Level, subject: &Level, key_ref: KeyRef) -> ChainLink {
    let protected = crypto::protect(&subject.cert.to_der().unwrap(), &issuer.key).unwrap();

    ChainLink::new_signed(Header::new(Algorithm::RS256, key_ref), protected, &issuer.key).unwrap()
}

/// root → cluster → node → workload
pub fn chain(pki: &Pki) -> Vec<ChainLink> {
    vec![
        link(&pki.root, &pki.cluster),
        link(&pki.cluster, &pki.node),
        link(&pki.node, &pki.workload),
    ]
}

/// A JWK set (as JSON) with the public halves of the given RSA or EC keys
pub fn jwk_set(keys: &[&PKey<Private>]) -> String {
    let jwks: Vec<serde_json::Value> = keys.iter().map(|k| jwk(k)).collect();

    serde_json::json!({ "keys": jwks }).to_string()
}

fn jwk(key: &PKey<Private>) -> serde_json::Value {
    match key.id() {
        Id::RSA => {
            let rsa = key.rsa().unwrap();
            serde_json::json!({
                "kty": "RSA",
                "n": base64::encode(&rsa.n().to_vec()),
                "e": base64::encode(&rsa.e().to_vec()),
            })
        }
        _ => {
            let ec = key.ec_key().unwrap();
            let mut ctx = BigNumContext::new().unwrap();
            let mut x = BigNum::new().unwrap();
            let mut y = BigNum::new().unwrap();
            ec.public_key()
                .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)
                .unwrap();
            serde_json::json!({
                "kty": "EC",
                "crv": "P-256",
                "x": base64::encode(&x.to_vec_padded(32).unwrap()),
                "y": base64::encode(&y.to_vec_padded(32).unwrap()),
            })
        }
    }
}

/// A named pipe nobody writes to: reading it blocks until the pipe is dropped
#[cfg(unix)]
pub struct Fifo {
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl Fifo {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "chaintoken-{}-{}-{name}.fifo",
            std::process::id(),
            SERIAL.fetch_add(1, Ordering::Relaxed)
        ));

        nix::unistd::mkfifo(&path, nix::sys::stat::Mode::S_IRWXU).unwrap();

        Self { path }
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

#[cfg(unix)]
impl Drop for Fifo {
    fn drop(&mut self) {
        // opening read-write never blocks on Linux, and lets any abandoned
        // reader see EOF once the handle is closed
        let _ = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path);
        let _ = std::fs::remove_file(&self.path);
    }
}
