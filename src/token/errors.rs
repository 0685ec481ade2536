// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

#[derive(thiserror::Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Malformed link: {0}")]
    MalformedLink(String),
    #[error("Untrusted root: {0}")]
    UntrustedRoot(String),
    #[error("Unresolved key reference: {0}")]
    UnresolvedKeyRef(String),
    #[error("Fingerprint binding mismatch: {0}")]
    FingerprintBindingMismatch(String),
    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),
    #[error("Certificate recovery failed: {0}")]
    RecoveryFailed(String),
    #[error("Key fetch failed: {0}")]
    KeyFetchFailed(String),
    #[error("Key fetch timed out: {0}")]
    KeyFetchTimeout(String),
    #[error("Key cache capacity exceeded: {0}")]
    CacheCapacityExceeded(String),
    #[error("Key error: {0}")]
    Key(String),
}

impl Error {
    fn message_mut(&mut self) -> &mut String {
        match self {
            Error::Syntax(e)
            | Error::MalformedLink(e)
            | Error::UntrustedRoot(e)
            | Error::UnresolvedKeyRef(e)
            | Error::FingerprintBindingMismatch(e)
            | Error::SignatureInvalid(e)
            | Error::RecoveryFailed(e)
            | Error::KeyFetchFailed(e)
            | Error::KeyFetchTimeout(e)
            | Error::CacheCapacityExceeded(e)
            | Error::Key(e) => e,
        }
    }

    /// Prefix the error message with the position of the offending chain link
    pub fn at_link(mut self, i: usize) -> Self {
        let m = self.message_mut();
        *m = format!("link {i}: {m}");
        self
    }
}

impl From<crate::store::Error> for Error {
    fn from(e: crate::store::Error) -> Self {
        Error::Key(e.to_string())
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Syntax(e)
            | Error::MalformedLink(e)
            | Error::UntrustedRoot(e)
            | Error::UnresolvedKeyRef(e)
            | Error::FingerprintBindingMismatch(e)
            | Error::SignatureInvalid(e)
            | Error::RecoveryFailed(e)
            | Error::KeyFetchFailed(e)
            | Error::KeyFetchTimeout(e)
            | Error::CacheCapacityExceeded(e)
            | Error::Key(e) => {
                write!(f, "{}", e)
            }
        }
    }
}
