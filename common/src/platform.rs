//! Host platform seams.
//!
//! The binding primitive, the remote binder handle and the package metadata
//! store are provided by the OS. These traits describe exactly what the
//! channel needs from them so the state machine and the trust verifier can
//! run against a real host or against [`crate::memory`].

use std::io;

use async_trait::async_trait;

use crate::{
    error::HostError,
    events::{DeathRecipient, ServiceConnection},
    protocol::{ChannelMessage, RelayToken},
    relay::BlobRelay,
    types::{PackageName, ProcessIdentity, ServiceTarget},
};

/// Live handle to a service hosted by another process.
#[async_trait]
pub trait RemoteBinder: Clone + Send + Sync + 'static {
    /// Identity of the process hosting the binder.
    fn remote_identity(&self) -> ProcessIdentity;

    /// Registers `recipient` for the remote process's death. Fails with
    /// [`HostError::DeadObject`] if the process is already gone.
    fn link_to_death(&self, recipient: &DeathRecipient) -> Result<(), HostError>;

    fn unlink_to_death(&self, recipient: &DeathRecipient);

    /// Sends one message and waits for the reply.
    async fn transact(&self, message: ChannelMessage) -> Result<ChannelMessage, HostError>;

    /// Opens a relayed payload through the bulk-read path.
    async fn open_relay(&self, token: RelayToken) -> Result<BlobRelay, HostError>;
}

/// The OS service-binding primitive.
pub trait ServiceHost: Send + Sync + 'static {
    type Binder: RemoteBinder;

    /// Asks the host to bind `target`, reporting progress through
    /// `connection`. `Ok(false)` means the service was not found.
    ///
    /// Permission refusals are reported as [`HostError::Security`].
    fn bind(
        &self,
        target: &ServiceTarget,
        connection: &ServiceConnection<Self::Binder>,
    ) -> Result<bool, HostError>;

    /// Releases the binding registered with `connection`.
    fn unbind(&self, connection: &ServiceConnection<Self::Binder>);
}

/// Holder-side handler behind a binder. Calls carry the identity of the
/// calling process as reported by the kernel.
#[async_trait]
pub trait ServiceEndpoint: Send + Sync + 'static {
    async fn transact(
        &self,
        caller: ProcessIdentity,
        message: ChannelMessage,
    ) -> Result<ChannelMessage, HostError>;

    async fn open_relay(
        &self,
        caller: ProcessIdentity,
        token: RelayToken,
    ) -> Result<BlobRelay, HostError>;
}

/// Signing information the package manager reports for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningCertificates {
    /// Older API shape: the current signer set only.
    Current(Vec<Vec<u8>>),
    /// Newer API shape: every certificate in the rotation history.
    RotationHistory(Vec<Vec<u8>>),
}

impl SigningCertificates {
    /// DER bytes of every certificate that may prove the package's identity.
    pub fn candidates(&self) -> &[Vec<u8>] {
        match self {
            SigningCertificates::Current(certs) | SigningCertificates::RotationHistory(certs) => {
                certs
            }
        }
    }
}

/// The OS package-metadata store. Calls may block and are always made from
/// the blocking pool.
pub trait PackageRegistry: Send + Sync + 'static {
    /// Every package installed under `identity`.
    fn packages_for_identity(&self, identity: ProcessIdentity) -> io::Result<Vec<PackageName>>;

    /// Current signing information for `package`; `None` when the package
    /// reports none.
    fn signing_certificates(&self, package: &PackageName)
        -> io::Result<Option<SigningCertificates>>;
}
