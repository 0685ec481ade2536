// Copyright 2023-2025 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::base64;
use super::chain::ChainVerifier;
use super::crypto;
use super::errors::Error;
use super::link::{ChainLink, KeyRef, KeyRefFields};
use super::resolver::{Fetcher, KeyRefResolver};
use crate::config::VerifierConfig;
use crate::store::{Fingerprint, IKeyCache, ITrustAnchorStore};
use jsonwebtoken::Algorithm;
use openssl::pkey::{PKeyRef, Private};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Deserialize, Serialize, Debug)]
struct RawTokenHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    chain: Vec<String>,
    #[serde(flatten)]
    key_ref: KeyRefFields,
}

/// The header of the outer token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: Algorithm,
    pub typ: Option<String>,
    /// Names the token signer.  Mandatory when the chain is empty.
    pub key_ref: Option<KeyRef>,
}

/// A signed token carrying its trust chain in the `chain` header parameter
#[derive(Clone, Debug)]
pub struct Token {
    header: TokenHeader,
    chain: Vec<ChainLink>,
    payload: Vec<u8>,
    signature: Vec<u8>,
    signing_input: String,
}

impl Token {
    /// Decode a token from its JWS compact serialization, rejecting chains
    /// longer than `max_chain_len` links
    pub fn decode(raw: &str, max_chain_len: usize) -> Result<Token, Error> {
        let (h, p, s) = base64::split_compact(raw)
            .ok_or_else(|| Error::Syntax("expecting three JWS segments".to_string()))?;

        let header = base64::decode_str(h)?;
        let header: RawTokenHeader =
            serde_json::from_slice(&header).map_err(|e| Error::Syntax(format!("header: {e}")))?;

        if header.chain.len() > max_chain_len {
            return Err(Error::MalformedLink(format!(
                "chain of {} links exceeds the limit of {max_chain_len}",
                header.chain.len()
            )));
        }

        let chain = header
            .chain
            .iter()
            .enumerate()
            .map(|(i, l)| ChainLink::decode(l).map_err(|e| e.at_link(i)))
            .collect::<Result<Vec<_>, _>>()?;

        let key_ref = header.key_ref.key_ref()?;

        let payload = base64::decode_str(p)?;
        let signature = base64::decode_str(s)?;

        if signature.is_empty() {
            return Err(Error::Syntax("missing signature".to_string()));
        }

        Ok(Token {
            header: TokenHeader {
                alg: crypto::parse_alg(&header.alg)?,
                typ: header.typ,
                key_ref,
            },
            chain,
            payload,
            signature,
            signing_input: format!("{h}.{p}"),
        })
    }

    /// Build and sign a token with the key at the end of `chain` (or the key
    /// named by `key_ref` when the chain is empty)
    pub fn new_signed(
        alg: Algorithm,
        key_ref: Option<KeyRef>,
        chain: Vec<ChainLink>,
        payload: &[u8],
        key: &PKeyRef<Private>,
    ) -> Result<Token, Error> {
        let raw = RawTokenHeader {
            alg: crypto::alg_name(alg),
            typ: Some("JWT".to_string()),
            chain: chain.iter().map(ChainLink::encode).collect(),
            key_ref: KeyRefFields::from_key_ref(key_ref.as_ref()),
        };

        let h = serde_json::to_vec(&raw).map_err(|e| Error::Syntax(e.to_string()))?;
        let signing_input = format!("{}.{}", base64::encode(&h), base64::encode(payload));
        let signature = crypto::sign(alg, key, signing_input.as_bytes())?;

        Ok(Token {
            header: TokenHeader {
                alg,
                typ: raw.typ,
                key_ref,
            },
            chain,
            payload: payload.to_vec(),
            signature,
            signing_input,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}.{}", self.signing_input, base64::encode(&self.signature))
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn chain(&self) -> &[ChainLink] {
        &self.chain
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// A token whose signature chains back to a trust anchor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trusted {
    /// Fingerprint of the terminal key, i.e., the verified signer identity
    pub identity: Fingerprint,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Trusted(Trusted),
    Untrusted(Error),
}

impl Verdict {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Verdict::Trusted(_))
    }
}

/// Entry point: decodes a token, walks its trust chain and checks the token
/// signature with the resulting terminal key.
///
/// The verifier only borrows its stores, so the same anchors and key cache
/// can be shared by any number of verifiers running in parallel.
pub struct TokenVerifier<'a, T, C> {
    anchors: &'a T,
    cache: &'a C,
    fetcher: Option<&'a dyn Fetcher>,
    config: VerifierConfig,
}

impl<'a, T, C> TokenVerifier<'a, T, C>
where
    T: ITrustAnchorStore,
    C: IKeyCache,
{
    pub fn new(anchors: &'a T, cache: &'a C) -> Self {
        Self {
            anchors,
            cache,
            fetcher: None,
            config: Default::default(),
        }
    }

    pub fn with_config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_fetcher(mut self, fetcher: &'a dyn Fetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Verify a JWS compact token, folding any failure into the verdict
    pub fn verify(&self, raw: &str) -> Verdict {
        match self.verify_token(raw) {
            Ok(t) => {
                info!(identity = %t.identity, "token trusted");
                Verdict::Trusted(t)
            }
            Err(e) => {
                warn!("token untrusted: {e}");
                Verdict::Untrusted(e)
            }
        }
    }

    pub fn verify_token(&self, raw: &str) -> Result<Trusted, Error> {
        let token = Token::decode(raw, self.config.max_chain_len)?;

        let mut resolver = KeyRefResolver::new(self.anchors, self.cache);
        if let Some(f) = self.fetcher {
            resolver = resolver.with_fetcher(f, self.config.fetch_timeout());
        }

        let terminal = ChainVerifier::new(resolver, self.cache)
            .check_issuer_signature(self.config.check_issuer_signature)
            .walk(token.chain(), token.header().key_ref.as_ref())?;

        crypto::verify(
            token.header().alg,
            &terminal.public_key,
            token.signing_input.as_bytes(),
            &token.signature,
        )?;

        Ok(Trusted {
            identity: terminal.fingerprint,
            payload: token.payload,
        })
    }
}
