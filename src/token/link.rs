// Copyright 2023-2025 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::base64::{self, Bytes};
use super::crypto;
use super::errors::Error;
use crate::store::Fingerprint;
use jsonwebtoken::Algorithm;
use openssl::pkey::{PKeyRef, Private};
use serde::{Deserialize, Deserializer, Serialize};

/// Default `typ` of the chain links produced by [`ChainLink::new_signed`]
pub const LINK_TYP: &str = "chain-link+jwt";

/// What a URL key reference points at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrlKind {
    /// An X.509 certificate (`x5u`)
    X509,
    /// A JWK set (`jku`)
    JwkSet,
}

/// How a signed object names the key that verifies it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyRef {
    /// SHA-256 fingerprint of the key (`x5t#S256`)
    Fingerprint(Fingerprint),
    /// Location the key material can be fetched from (`x5u` or `jku`)
    Url { url: String, kind: UrlKind },
}

/// Key reference related header parameters, shared between link headers and
/// the outer token header.  Link headers, which deny unknown fields, declare
/// them inline.
#[derive(Default, Deserialize, Serialize, Debug)]
pub(crate) struct KeyRefFields {
    #[serde(rename = "x5t#S256", default, skip_serializing_if = "Option::is_none")]
    x5t: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x5u: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jku: Option<String>,

    // never acceptable: a link must not carry the key material it asks to be
    // trusted with
    #[serde(default, deserialize_with = "present", skip_serializing)]
    x5c: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "present", skip_serializing)]
    jwk: Option<serde_json::Value>,
}

/// `Some` whenever the parameter is present, even with a `null` value
fn present<'de, D>(d: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(d).map(Some)
}

impl KeyRefFields {
    /// Extract the (at most one) key reference, rejecting embedded keys
    pub(crate) fn key_ref(&self) -> Result<Option<KeyRef>, Error> {
        if self.x5c.is_some() || self.jwk.is_some() {
            return Err(Error::MalformedLink(
                "header carries embedded key material (x5c/jwk)".to_string(),
            ));
        }

        let key_ref = match (&self.x5t, &self.x5u, &self.jku) {
            (None, None, None) => None,
            (Some(x5t), None, None) => {
                let raw = base64::decode_str(x5t)
                    .map_err(|e| Error::MalformedLink(format!("x5t#S256: {e}")))?;
                let fp = Fingerprint::from_slice(&raw)
                    .map_err(|e| Error::MalformedLink(format!("x5t#S256: {e}")))?;
                Some(KeyRef::Fingerprint(fp))
            }
            (None, Some(url), None) => Some(KeyRef::Url {
                url: url.clone(),
                kind: UrlKind::X509,
            }),
            (None, None, Some(url)) => Some(KeyRef::Url {
                url: url.clone(),
                kind: UrlKind::JwkSet,
            }),
            _ => {
                return Err(Error::MalformedLink(
                    "header carries more than one key reference".to_string(),
                ))
            }
        };

        Ok(key_ref)
    }

    pub(crate) fn from_key_ref(key_ref: Option<&KeyRef>) -> Self {
        let mut f = KeyRefFields::default();

        match key_ref {
            Some(KeyRef::Fingerprint(fp)) => f.x5t = Some(base64::encode(fp.as_bytes())),
            Some(KeyRef::Url {
                url,
                kind: UrlKind::X509,
            }) => f.x5u = Some(url.clone()),
            Some(KeyRef::Url {
                url,
                kind: UrlKind::JwkSet,
            }) => f.jku = Some(url.clone()),
            None => {}
        }

        f
    }
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(deny_unknown_fields)]
struct RawHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enc: Option<String>,
    #[serde(rename = "x5t#S256", default, skip_serializing_if = "Option::is_none")]
    x5t: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x5u: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jku: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing)]
    x5c: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "present", skip_serializing)]
    jwk: Option<serde_json::Value>,
}

impl RawHeader {
    fn key_ref_fields(&self) -> KeyRefFields {
        KeyRefFields {
            x5t: self.x5t.clone(),
            x5u: self.x5u.clone(),
            jku: self.jku.clone(),
            x5c: self.x5c.clone(),
            jwk: self.jwk.clone(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(deny_unknown_fields)]
struct RawPayload {
    pcert: Bytes,
}

/// The protected header of a chain link
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Signature algorithm
    pub alg: Algorithm,
    pub typ: Option<String>,
    /// Certificate protection transform
    pub enc: String,
    /// The key that signed this link and protected its certificate
    pub key_ref: KeyRef,
}

impl Header {
    pub fn new(alg: Algorithm, key_ref: KeyRef) -> Self {
        Self {
            alg,
            typ: Some(LINK_TYP.to_string()),
            enc: crypto::ENC_RSA_PKCS1.to_string(),
            key_ref,
        }
    }

    fn from_raw(raw: RawHeader) -> Result<Self, Error> {
        let alg = crypto::parse_alg(&raw.alg).map_err(|e| Error::MalformedLink(e.to_string()))?;

        let key_ref = raw
            .key_ref_fields()
            .key_ref()?
            .ok_or_else(|| Error::MalformedLink("header carries no key reference".to_string()))?;

        let enc = raw
            .enc
            .ok_or_else(|| Error::MalformedLink("missing enc header parameter".to_string()))?;

        Ok(Self {
            alg,
            typ: raw.typ,
            enc,
            key_ref,
        })
    }

    fn to_raw(&self) -> RawHeader {
        let f = KeyRefFields::from_key_ref(Some(&self.key_ref));

        RawHeader {
            alg: crypto::alg_name(self.alg),
            typ: self.typ.clone(),
            enc: Some(self.enc.clone()),
            x5t: f.x5t,
            x5u: f.x5u,
            jku: f.jku,
            x5c: None,
            jwk: None,
        }
    }
}

/// One element of a trust chain: a JWS whose payload carries the next
/// level's certificate, protected with the current level's private key.
///
/// Decoding only checks structure and header policy; no cryptography is
/// performed.  The received encoding is retained so that signatures are
/// checked over exactly the bytes that were signed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainLink {
    header: Header,
    protected_cert: Vec<u8>,
    signature: Vec<u8>,
    signing_input: String,
}

impl ChainLink {
    /// Decode a link from its JWS compact serialization
    pub fn decode(raw: &str) -> Result<ChainLink, Error> {
        let (h, p, s) = base64::split_compact(raw)
            .ok_or_else(|| Error::MalformedLink("expecting three JWS segments".to_string()))?;

        let header = base64::decode_str(h)
            .map_err(|e| Error::MalformedLink(format!("header: {e}")))?;
        let header: RawHeader = serde_json::from_slice(&header)
            .map_err(|e| Error::MalformedLink(format!("header: {e}")))?;
        let header = Header::from_raw(header)?;

        let payload = base64::decode_str(p)
            .map_err(|e| Error::MalformedLink(format!("payload: {e}")))?;
        let payload: RawPayload = serde_json::from_slice(&payload)
            .map_err(|e| Error::MalformedLink(format!("payload: {e}")))?;

        if payload.pcert.as_slice().is_empty() {
            return Err(Error::MalformedLink(
                "empty protected certificate".to_string(),
            ));
        }

        let signature = base64::decode_str(s)
            .map_err(|e| Error::MalformedLink(format!("signature: {e}")))?;

        if signature.is_empty() {
            return Err(Error::MalformedLink("missing signature".to_string()));
        }

        Ok(ChainLink {
            header,
            protected_cert: payload.pcert.into_vec(),
            signature,
            signing_input: format!("{h}.{p}"),
        })
    }

    /// Build and sign a link.  `key` must be the private half of the key
    /// `header.key_ref` names, and `protected_cert` must have been produced
    /// with [`crypto::protect`] using the same key.
    pub fn new_signed(
        header: Header,
        protected_cert: Vec<u8>,
        key: &PKeyRef<Private>,
    ) -> Result<ChainLink, Error> {
        let h = serde_json::to_vec(&header.to_raw()).map_err(|e| Error::Syntax(e.to_string()))?;
        let p = serde_json::to_vec(&RawPayload {
            pcert: Bytes::from(protected_cert.as_slice()),
        })
        .map_err(|e| Error::Syntax(e.to_string()))?;

        let signing_input = format!("{}.{}", base64::encode(&h), base64::encode(&p));
        let signature = crypto::sign(header.alg, key, signing_input.as_bytes())?;

        Ok(ChainLink {
            header,
            protected_cert,
            signature,
            signing_input,
        })
    }

    /// Encode the link in JWS compact serialization
    pub fn encode(&self) -> String {
        format!("{}.{}", self.signing_input, base64::encode(&self.signature))
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn protected_cert(&self) -> &[u8] {
        &self.protected_cert
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// The bytes covered by the signature
    pub fn signing_input(&self) -> &[u8] {
        self.signing_input.as_bytes()
    }
}
