//! The trust registry: which signers are acceptable for which sibling
//! package.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};

use crate::{
    config::TRUSTED_SIGNERS_ENV,
    fingerprint::CertificateFingerprint,
    types::PackageName,
};

/// Immutable mapping from package name to the fingerprints it may be signed
/// with. Built once at startup and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct TrustRegistry {
    signers: HashMap<PackageName, Vec<CertificateFingerprint>>,
}

impl TrustRegistry {
    pub fn builder() -> TrustRegistryBuilder {
        TrustRegistryBuilder::default()
    }

    /// Fingerprints registered for `package`, if it is known at all.
    pub fn expected_for(&self, package: &PackageName) -> Option<&[CertificateFingerprint]> {
        self.signers.get(package).map(Vec::as_slice)
    }

    /// Whether `digest` is one of the registered fingerprints for `package`.
    pub fn is_trusted_signer(&self, package: &PackageName, digest: &[u8]) -> bool {
        self.expected_for(package)
            .is_some_and(|expected| expected.iter().any(|fp| fp.matches(digest)))
    }

    pub fn packages(&self) -> impl Iterator<Item = &PackageName> {
        self.signers.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    /// Parses a JSON object of `package -> [fingerprint hex, ...]`.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: BTreeMap<String, Vec<String>> =
            serde_json::from_str(json).context("Failed to parse trust registry JSON")?;

        let mut builder = Self::builder();
        for (package, fingerprints) in entries {
            builder = builder.trust(package, fingerprints);
        }
        Ok(builder.build())
    }

    /// Reads the registry from `SIBLINK_TRUSTED_SIGNERS`.
    ///
    /// The format is `package=HEX|HEX;other.package=HEX`. A missing variable
    /// yields an empty registry, which trusts nobody.
    pub fn from_env() -> Self {
        match std::env::var(TRUSTED_SIGNERS_ENV) {
            Ok(value) => Self::parse_signers(&value),
            Err(_) => {
                tracing::warn!("{} not set, no sibling package is trusted", TRUSTED_SIGNERS_ENV);
                Self::default()
            }
        }
    }

    /// Parses the `package=HEX|HEX;...` format used by [`Self::from_env`].
    pub fn parse_signers(value: &str) -> Self {
        let mut builder = Self::builder();

        for segment in value.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let Some((package, fingerprints)) = segment.split_once('=') else {
                tracing::warn!(segment, "Skipping trusted signer entry without '='");
                continue;
            };

            let fingerprints = fingerprints
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            builder = builder.trust(package.trim(), fingerprints);
        }

        builder.build()
    }
}

/// Accumulates registry entries before freezing them.
#[derive(Debug, Default)]
pub struct TrustRegistryBuilder {
    signers: HashMap<PackageName, Vec<CertificateFingerprint>>,
}

impl TrustRegistryBuilder {
    /// Adds acceptable signers for `package`. Repeated calls for the same
    /// package extend its set.
    pub fn trust<P, I, S>(mut self, package: P, fingerprints: I) -> Self
    where
        P: Into<PackageName>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.signers.entry(package.into()).or_default();
        for hex in fingerprints {
            let fingerprint = CertificateFingerprint::from_hex(hex);
            if !entry.iter().any(|known| known.source() == fingerprint.source()) {
                entry.push(fingerprint);
            }
        }
        self
    }

    pub fn build(self) -> TrustRegistry {
        tracing::debug!(packages = self.signers.len(), "Trust registry built");
        TrustRegistry {
            signers: self.signers,
        }
    }
}
