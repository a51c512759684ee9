//! Peer trust verification.
//!
//! Decides whether a process identity belongs to an authorized sibling app
//! by comparing the live signing certificates of every package installed
//! under that identity with the [`TrustRegistry`]. Decisions are computed
//! once per identity and cached for the lifetime of the verifier.

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::{
    fingerprint::digest_certificate,
    platform::PackageRegistry,
    registry::TrustRegistry,
    single_flight::SingleFlight,
    types::{PackageName, ProcessIdentity},
};

/// Answers "may this process use the channel?".
///
/// Safe to share between tasks; concurrent calls for the same identity run
/// exactly one certificate check and share its result.
pub struct PeerTrustVerifier<P> {
    packages:  Arc<P>,
    registry:  Arc<TrustRegistry>,
    decisions: SingleFlight<ProcessIdentity, bool>,
}

impl<P: PackageRegistry> PeerTrustVerifier<P> {
    pub fn new(packages: Arc<P>, registry: Arc<TrustRegistry>) -> Self {
        Self {
            packages,
            registry,
            decisions: SingleFlight::new(),
        }
    }

    /// Whether `identity` is a trusted sibling. Never fails: any error while
    /// reading package metadata counts as "not trusted" for that package.
    pub async fn is_uid_allowed(&self, identity: ProcessIdentity) -> bool {
        if identity.is_none() {
            tracing::debug!("Rejecting caller without a process identity");
            return false;
        }

        let packages = Arc::clone(&self.packages);
        let registry = Arc::clone(&self.registry);
        let decision = self
            .decisions
            .get_or_spawn(identity, move || check_identity(packages, registry, identity))
            .await;

        decision.unwrap_or(false)
    }

    /// The cached decision for `identity`, if its check has completed.
    pub fn cached_decision(&self, identity: ProcessIdentity) -> Option<bool> {
        self.decisions
            .peek(&identity)
            .map(|decision| decision.unwrap_or(false))
    }

    pub fn registry(&self) -> &TrustRegistry {
        &self.registry
    }
}

/// Allowed iff at least one package under `identity` is signed by a
/// registered certificate. Resolves `true` as soon as one package matches
/// and `false` only once every package has been checked.
async fn check_identity<P: PackageRegistry>(
    packages: Arc<P>,
    registry: Arc<TrustRegistry>,
    identity: ProcessIdentity,
) -> bool {
    let names = {
        let packages = Arc::clone(&packages);
        match tokio::task::spawn_blocking(move || packages.packages_for_identity(identity)).await {
            Ok(Ok(names)) => names,
            Ok(Err(e)) => {
                tracing::warn!(uid = %identity, "Failed to list packages: {}", e);
                return false;
            }
            Err(e) => {
                tracing::error!(uid = %identity, "Package listing task failed: {}", e);
                return false;
            }
        }
    };

    if names.is_empty() {
        tracing::info!(uid = %identity, "✗ No packages installed under identity");
        return false;
    }

    let mut checks = JoinSet::new();
    for package in names {
        let packages = Arc::clone(&packages);
        let registry = Arc::clone(&registry);
        checks.spawn_blocking(move || {
            let matched = package_matches(packages.as_ref(), &registry, &package);
            (package, matched)
        });
    }

    while let Some(joined) = checks.join_next().await {
        match joined {
            Ok((package, true)) => {
                // Remaining checks are no longer needed.
                checks.abort_all();
                tracing::info!(uid = %identity, package = %package, "✓ Trusted sibling package");
                return true;
            }
            Ok((package, false)) => {
                tracing::debug!(uid = %identity, package = %package, "Package does not match");
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::warn!(uid = %identity, "Package check failed: {}", e);
            }
        }
    }

    tracing::info!(uid = %identity, "✗ No trusted sibling package under identity");
    false
}

/// Whether any live signer of `package` is registered for it. Unreadable or
/// missing signing information never matches.
fn package_matches<P: PackageRegistry + ?Sized>(
    packages: &P,
    registry: &TrustRegistry,
    package: &PackageName,
) -> bool {
    let Some(expected) = registry.expected_for(package) else {
        tracing::debug!(package = %package, "Package has no registered signers");
        return false;
    };

    let signing = match packages.signing_certificates(package) {
        Ok(Some(signing)) => signing,
        Ok(None) => {
            tracing::debug!(package = %package, "Package reports no signing information");
            return false;
        }
        Err(e) => {
            tracing::warn!(package = %package, "Failed to read signing certificates: {}", e);
            return false;
        }
    };

    signing.candidates().iter().any(|certificate| {
        let digest = digest_certificate(certificate);
        expected.iter().any(|fingerprint| fingerprint.matches(&digest))
    })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::{memory::MemoryPackageRegistry, platform::SigningCertificates};

    const SIBLING: &str = "com.example.wallet";
    const SIBLING_CERT: &[u8] = b"wallet release certificate";

    fn registry() -> Arc<TrustRegistry> {
        Arc::new(
            TrustRegistry::builder()
                .trust(SIBLING, [hex::encode_upper(digest_certificate(SIBLING_CERT))])
                .trust("com.example.notes", [hex::encode(digest_certificate(b"notes"))])
                .build(),
        )
    }

    fn verifier(packages: &Arc<MemoryPackageRegistry>) -> PeerTrustVerifier<MemoryPackageRegistry> {
        PeerTrustVerifier::new(Arc::clone(packages), registry())
    }

    fn signed_by(cert: &[u8]) -> SigningCertificates {
        SigningCertificates::Current(vec![cert.to_vec()])
    }

    #[tokio::test]
    async fn sentinel_identity_is_rejected_without_lookups() {
        let packages = Arc::new(MemoryPackageRegistry::new());
        let verifier = verifier(&packages);

        assert!(!verifier.is_uid_allowed(ProcessIdentity::NONE).await);
        assert_eq!(packages.identity_lookups(), 0);
    }

    #[tokio::test]
    async fn identity_without_packages_is_denied() {
        let packages = Arc::new(MemoryPackageRegistry::new());
        let verifier = verifier(&packages);

        assert!(!verifier.is_uid_allowed(ProcessIdentity(10_500)).await);
        assert_eq!(verifier.cached_decision(ProcessIdentity(10_500)), Some(false));
    }

    #[tokio::test]
    async fn sibling_signed_package_is_allowed() {
        let packages = Arc::new(MemoryPackageRegistry::new());
        packages.install(ProcessIdentity(10_100), SIBLING, signed_by(SIBLING_CERT));

        assert!(verifier(&packages).is_uid_allowed(ProcessIdentity(10_100)).await);
    }

    #[tokio::test]
    async fn rotation_history_counts_as_candidates() {
        let packages = Arc::new(MemoryPackageRegistry::new());
        packages.install(
            ProcessIdentity(10_100),
            SIBLING,
            SigningCertificates::RotationHistory(vec![SIBLING_CERT.to_vec(), b"rotated".to_vec()]),
        );

        assert!(verifier(&packages).is_uid_allowed(ProcessIdentity(10_100)).await);
    }

    #[tokio::test]
    async fn impostor_signed_with_other_key_is_denied() {
        let packages = Arc::new(MemoryPackageRegistry::new());
        packages.install(ProcessIdentity(10_200), SIBLING, signed_by(b"attacker certificate"));

        assert!(!verifier(&packages).is_uid_allowed(ProcessIdentity(10_200)).await);
    }

    #[tokio::test]
    async fn registered_certificate_on_wrong_package_is_denied() {
        let packages = Arc::new(MemoryPackageRegistry::new());
        packages.install(ProcessIdentity(10_200), "com.example.notes", signed_by(SIBLING_CERT));

        assert!(!verifier(&packages).is_uid_allowed(ProcessIdentity(10_200)).await);
    }

    #[tokio::test]
    async fn one_matching_package_is_enough_under_shared_identity() {
        let packages = Arc::new(MemoryPackageRegistry::new());
        let shared = ProcessIdentity(10_300);
        packages.install(shared, "com.thirdparty.game", signed_by(b"game"));
        packages.install_unreadable(shared, "com.example.notes");
        packages.install_unsigned(shared, "com.example.legacy");
        packages.install(shared, SIBLING, signed_by(SIBLING_CERT));

        assert!(verifier(&packages).is_uid_allowed(shared).await);
    }

    #[tokio::test]
    async fn denial_waits_for_every_package() {
        let packages = Arc::new(MemoryPackageRegistry::new());
        let shared = ProcessIdentity(10_400);
        packages.install(shared, SIBLING, signed_by(b"wrong"));
        packages.install(shared, "com.example.notes", signed_by(b"also wrong"));
        packages.set_read_delay("com.example.notes", Duration::from_millis(100));
        packages.install_unreadable(shared, "com.example.notes.extra");

        assert!(!verifier(&packages).is_uid_allowed(shared).await);
        // Two registered packages were read; the unregistered one is rejected
        // without touching its certificates.
        assert_eq!(packages.certificate_lookups(), 2);
    }

    #[tokio::test]
    async fn match_does_not_wait_for_slow_packages() {
        let packages = Arc::new(MemoryPackageRegistry::new());
        let shared = ProcessIdentity(10_500);
        packages.install(shared, "com.example.notes", signed_by(b"wrong"));
        packages.set_read_delay("com.example.notes", Duration::from_millis(1500));
        packages.install(shared, SIBLING, signed_by(SIBLING_CERT));

        let started = Instant::now();
        assert!(verifier(&packages).is_uid_allowed(shared).await);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn concurrent_checks_for_one_identity_run_once() {
        let packages = Arc::new(MemoryPackageRegistry::new());
        let shared = ProcessIdentity(10_600);
        packages.install(shared, SIBLING, signed_by(b"wrong"));
        packages.install(shared, "com.example.notes", signed_by(b"wrong"));
        packages.set_read_delay(SIBLING, Duration::from_millis(50));
        let verifier = verifier(&packages);

        let (first, second) = tokio::join!(
            verifier.is_uid_allowed(shared),
            verifier.is_uid_allowed(shared)
        );
        assert!(!first && !second);
        assert_eq!(packages.identity_lookups(), 1);
        assert_eq!(packages.certificate_lookups(), 2);

        // Denials stick for the lifetime of the verifier.
        packages.install(shared, "com.example.wallet.debug", signed_by(SIBLING_CERT));
        assert!(!verifier.is_uid_allowed(shared).await);
        assert_eq!(packages.identity_lookups(), 1);
    }
}
