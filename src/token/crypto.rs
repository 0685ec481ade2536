// Copyright 2023-2025 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Thin adapter over openssl for the primitives the trust walk relies on:
//! JWS signatures, the RSA certificate protection transform, and parsing of
//! fetched key material.

use super::base64;
use super::errors::Error;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, JwkSet};
use jsonwebtoken::Algorithm;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::ecdsa::EcdsaSig;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, Id, PKey, PKeyRef, Private, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::{RsaPssSaltlen, Signer, Verifier};
use openssl::x509::X509;
use std::str::FromStr;
use tracing::debug;

/// The only supported certificate protection transform: PKCS#1 v1.5
/// (type 1) RSA private-key operation over consecutive blocks of the DER
/// certificate.
pub const ENC_RSA_PKCS1: &str = "RSA-PKCS1";

// PKCS#1 v1.5 padding overhead
const PKCS1_OVERHEAD: usize = 11;

/// Parse a JWS `alg` value, accepting only the RSA and ECDSA algorithms the
/// trust walk can verify
pub fn parse_alg(s: &str) -> Result<Algorithm, Error> {
    let alg = Algorithm::from_str(s).map_err(|_| Error::Syntax(format!("unknown alg {s}")))?;

    match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512
        | Algorithm::ES256
        | Algorithm::ES384 => Ok(alg),
        a => Err(Error::Syntax(format!("unsupported alg {a:?}"))),
    }
}

pub fn alg_name(alg: Algorithm) -> String {
    format!("{alg:?}")
}

fn digest(alg: Algorithm) -> Result<MessageDigest, Error> {
    let md = match alg {
        Algorithm::RS256 | Algorithm::PS256 | Algorithm::ES256 => MessageDigest::sha256(),
        Algorithm::RS384 | Algorithm::PS384 | Algorithm::ES384 => MessageDigest::sha384(),
        Algorithm::RS512 | Algorithm::PS512 => MessageDigest::sha512(),
        a => return Err(Error::Key(format!("unsupported algorithm {a:?}"))),
    };

    Ok(md)
}

/// Size in bytes of each of the r and s values of a JWS ECDSA signature
fn ec_coord_len(alg: Algorithm) -> Option<usize> {
    match alg {
        Algorithm::ES256 => Some(32),
        Algorithm::ES384 => Some(48),
        _ => None,
    }
}

fn check_key_type<T: HasPublic>(alg: Algorithm, key: &PKeyRef<T>) -> Result<(), String> {
    let ok = match ec_coord_len(alg) {
        Some(n) => key.id() == Id::EC && (key.bits() as usize).div_ceil(8) == n,
        None => key.id() == Id::RSA,
    };

    if !ok {
        return Err(format!(
            "algorithm {alg:?} cannot be used with a {}-bit {:?} key",
            key.bits(),
            key.id()
        ));
    }

    Ok(())
}

fn raw_to_der(sig: &[u8], n: usize) -> Result<Vec<u8>, ErrorStack> {
    let r = BigNum::from_slice(&sig[..n])?;
    let s = BigNum::from_slice(&sig[n..])?;

    EcdsaSig::from_private_components(r, s)?.to_der()
}

fn der_to_raw(der: &[u8], n: usize) -> Result<Vec<u8>, ErrorStack> {
    let sig = EcdsaSig::from_der(der)?;

    let mut raw = sig.r().to_vec_padded(n as i32)?;
    raw.extend(sig.s().to_vec_padded(n as i32)?);

    Ok(raw)
}

/// Verify a JWS signature over `msg` using the given public key
pub fn verify(alg: Algorithm, key: &PKeyRef<Public>, msg: &[u8], sig: &[u8]) -> Result<(), Error> {
    let md = digest(alg)?;

    check_key_type(alg, key).map_err(Error::SignatureInvalid)?;

    let ok = verify_with(alg, md, key, msg, sig)
        .map_err(|e| Error::SignatureInvalid(e.to_string()))?;

    if !ok {
        return Err(Error::SignatureInvalid(format!(
            "{alg:?} signature does not verify"
        )));
    }

    Ok(())
}

fn verify_with(
    alg: Algorithm,
    md: MessageDigest,
    key: &PKeyRef<Public>,
    msg: &[u8],
    sig: &[u8],
) -> Result<bool, ErrorStack> {
    let mut verifier = Verifier::new(md, key)?;

    match alg {
        Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512 => {
            verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
            verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
            verifier.set_rsa_mgf1_md(md)?;
        }
        Algorithm::ES256 | Algorithm::ES384 => {
            // JWS carries r || s, openssl wants a DER SEQUENCE
            let n = ec_coord_len(alg).unwrap_or_default();
            if sig.len() != 2 * n {
                return Ok(false);
            }
            verifier.update(msg)?;
            return verifier.verify(&raw_to_der(sig, n)?);
        }
        _ => verifier.set_rsa_padding(Padding::PKCS1)?,
    }

    verifier.update(msg)?;
    verifier.verify(sig)
}

/// Produce a JWS signature over `msg` using the given private key
pub fn sign(alg: Algorithm, key: &PKeyRef<Private>, msg: &[u8]) -> Result<Vec<u8>, Error> {
    let md = digest(alg)?;

    check_key_type(alg, key).map_err(Error::Key)?;

    sign_with(alg, md, key, msg).map_err(|e| Error::Key(e.to_string()))
}

fn sign_with(
    alg: Algorithm,
    md: MessageDigest,
    key: &PKeyRef<Private>,
    msg: &[u8],
) -> Result<Vec<u8>, ErrorStack> {
    let mut signer = Signer::new(md, key)?;

    match alg {
        Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512 => {
            signer.set_rsa_padding(Padding::PKCS1_PSS)?;
            signer.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
            signer.set_rsa_mgf1_md(md)?;
        }
        Algorithm::ES256 | Algorithm::ES384 => {
            signer.update(msg)?;
            let der = signer.sign_to_vec()?;
            return der_to_raw(&der, ec_coord_len(alg).unwrap_or_default());
        }
        _ => signer.set_rsa_padding(Padding::PKCS1)?,
    }

    signer.update(msg)?;
    signer.sign_to_vec()
}

/// Protect a DER certificate so that it can only be recovered with the
/// public half of `key`
pub fn protect(cert_der: &[u8], key: &PKeyRef<Private>) -> Result<Vec<u8>, Error> {
    let rsa = key
        .rsa()
        .map_err(|_| Error::Key("certificate protection needs an RSA key".to_string()))?;

    let k = rsa.size() as usize;
    let mut out = Vec::with_capacity(cert_der.len().div_ceil(k - PKCS1_OVERHEAD) * k);

    for chunk in cert_der.chunks(k - PKCS1_OVERHEAD) {
        let mut block = vec![0u8; k];
        let n = rsa
            .private_encrypt(chunk, &mut block, Padding::PKCS1)
            .map_err(|e| Error::Key(e.to_string()))?;
        block.truncate(n);
        out.extend(block);
    }

    Ok(out)
}

/// Recover the DER certificate protected by the private half of `key`
pub fn recover(protected: &[u8], key: &PKeyRef<Public>) -> Result<Vec<u8>, Error> {
    let rsa = key
        .rsa()
        .map_err(|_| Error::RecoveryFailed(format!("{:?} key cannot recover", key.id())))?;

    let k = rsa.size() as usize;

    if protected.is_empty() || protected.len() % k != 0 {
        return Err(Error::RecoveryFailed(format!(
            "protected certificate length {} is not a multiple of {k}",
            protected.len()
        )));
    }

    let mut out = Vec::with_capacity(protected.len());

    for block in protected.chunks(k) {
        let mut plain = vec![0u8; k];
        let n = rsa
            .public_decrypt(block, &mut plain, Padding::PKCS1)
            .map_err(|e| Error::RecoveryFailed(e.to_string()))?;
        plain.truncate(n);
        out.extend(plain);
    }

    Ok(out)
}

pub fn parse_cert(der: &[u8]) -> Result<X509, Error> {
    X509::from_der(der).map_err(|e| Error::RecoveryFailed(format!("parsing certificate: {e}")))
}

/// Extract the candidate keys from fetched X.509 material (DER or PEM)
pub fn keys_from_x509(material: &[u8]) -> Result<Vec<PKey<Public>>, Error> {
    let cert = X509::from_der(material)
        .or_else(|_| X509::from_pem(material))
        .map_err(|e| Error::UnresolvedKeyRef(format!("parsing fetched certificate: {e}")))?;

    let pkey = cert
        .public_key()
        .map_err(|e| Error::UnresolvedKeyRef(e.to_string()))?;

    Ok(vec![pkey])
}

/// Extract the candidate keys from a fetched JWK set.  Keys of unsupported
/// types are skipped.
pub fn keys_from_jwk_set(material: &[u8]) -> Result<Vec<PKey<Public>>, Error> {
    let set: JwkSet = serde_json::from_slice(material)
        .map_err(|e| Error::UnresolvedKeyRef(format!("parsing fetched JWK set: {e}")))?;

    let mut keys = vec![];

    for jwk in set.keys.iter() {
        match pkey_from_jwk(&jwk.algorithm) {
            Ok(Some(k)) => keys.push(k),
            Ok(None) => debug!(kid = ?jwk.common.key_id, "skipping unsupported JWK"),
            Err(e) => debug!(kid = ?jwk.common.key_id, "skipping malformed JWK: {e}"),
        }
    }

    Ok(keys)
}

fn pkey_from_jwk(params: &AlgorithmParameters) -> Result<Option<PKey<Public>>, Error> {
    let key_err = |e: ErrorStack| Error::Key(e.to_string());

    let pkey = match params {
        AlgorithmParameters::RSA(rsa) => {
            let n = BigNum::from_slice(&base64::decode_str(&rsa.n)?).map_err(key_err)?;
            let e = BigNum::from_slice(&base64::decode_str(&rsa.e)?).map_err(key_err)?;
            let rsa = Rsa::from_public_components(n, e).map_err(key_err)?;
            PKey::from_rsa(rsa).map_err(key_err)?
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let nid = match ec.curve {
                EllipticCurve::P256 => Nid::X9_62_PRIME256V1,
                EllipticCurve::P384 => Nid::SECP384R1,
                _ => return Ok(None),
            };
            let group = EcGroup::from_curve_name(nid).map_err(key_err)?;
            let x = BigNum::from_slice(&base64::decode_str(&ec.x)?).map_err(key_err)?;
            let y = BigNum::from_slice(&base64::decode_str(&ec.y)?).map_err(key_err)?;
            let ec = EcKey::from_public_key_affine_coordinates(&group, &x, &y).map_err(key_err)?;
            PKey::from_ec_key(ec).map_err(key_err)?
        }
        _ => return Ok(None),
    };

    Ok(Some(pkey))
}
