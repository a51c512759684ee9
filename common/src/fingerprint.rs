//! Signing certificate fingerprints.
//!
//! Fingerprints are configured as human-readable hex (`AA:BB:CC...`, any
//! case) and only decoded the first time they are compared against a live
//! certificate.

use std::{fmt, sync::OnceLock};

use sha2::{Digest, Sha256};

/// Separators tolerated between hex octets.
const SEPARATORS: [char; 2] = [':', ' '];

/// One expected signer of an authorized package.
#[derive(Clone)]
pub struct CertificateFingerprint {
    source:     String,
    normalized: OnceLock<Option<Box<[u8]>>>,
}

impl CertificateFingerprint {
    /// Wraps a hex fingerprint without decoding it.
    pub fn from_hex<S: Into<String>>(hex: S) -> Self {
        Self {
            source:     hex.into(),
            normalized: OnceLock::new(),
        }
    }

    /// Wraps already-normalized digest bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let normalized = OnceLock::new();
        let _ = normalized.set(Some(Box::from(bytes)));
        Self {
            source: hex::encode(bytes),
            normalized,
        }
    }

    /// SHA-256 fingerprint of a DER-encoded certificate.
    pub fn of_certificate(der: &[u8]) -> Self {
        Self::from_bytes(&digest_certificate(der))
    }

    /// The normalized digest bytes, or `None` if the configured text is not
    /// valid hex. A malformed fingerprint never matches anything.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.normalized
            .get_or_init(|| normalize(&self.source))
            .as_deref()
    }

    /// Whether `digest` is exactly this fingerprint.
    pub fn matches(&self, digest: &[u8]) -> bool {
        self.bytes().is_some_and(|bytes| bytes == digest)
    }

    /// Lower-case, separator-free hex of the normalized bytes.
    pub fn to_hex(&self) -> Option<String> {
        self.bytes().map(hex::encode)
    }

    /// The text this fingerprint was configured with.
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// SHA-256 digest of a certificate, the form registered fingerprints take.
pub fn digest_certificate(der: &[u8]) -> [u8; 32] {
    Sha256::digest(der).into()
}

fn normalize(source: &str) -> Option<Box<[u8]>> {
    let cleaned: String = source
        .chars()
        .filter(|c| !SEPARATORS.contains(c))
        .map(|c| c.to_ascii_lowercase())
        .collect();

    match hex::decode(&cleaned) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes.into_boxed_slice()),
        Ok(_) => {
            tracing::warn!("Ignoring empty signing certificate fingerprint");
            None
        }
        Err(e) => {
            tracing::warn!(fingerprint = %source, "Ignoring malformed signing certificate fingerprint: {}", e);
            None
        }
    }
}

impl PartialEq for CertificateFingerprint {
    fn eq(&self, other: &Self) -> bool {
        match (self.bytes(), other.bytes()) {
            (Some(a), Some(b)) => a == b,
            _ => self.source == other.source,
        }
    }
}

impl Eq for CertificateFingerprint {}

impl fmt::Debug for CertificateFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CertificateFingerprint")
            .field(&self.source)
            .finish()
    }
}

impl fmt::Display for CertificateFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
