//! Siblink Server Library
//!
//! The holder side of a sibling channel. An [`AccountHolder`] sits behind
//! the binder the host hands out, checks every caller against the
//! [`PeerTrustVerifier`] and answers payload requests, parking payloads
//! that are too large for one transaction in a one-shot relay. At most one
//! relay is parked per caller identity; a newer request replaces it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Result;
use async_trait::async_trait;
use siblink_common::{
    config::{transport_limit_from_env, DEFAULT_TRANSPORT_LIMIT},
    BlobRelay, ChannelMessage, HostError, PackageRegistry, PeerTrustVerifier, ProcessIdentity,
    RelayToken, ServiceEndpoint,
};

/// Produces the payload a holder shares with its siblings.
#[async_trait]
pub trait PayloadSource: Send + Sync + 'static {
    async fn payload(&self) -> Result<Vec<u8>>;
}

/// A payload fixed at construction time.
#[derive(Debug, Clone)]
pub struct StaticPayload(Arc<[u8]>);

impl StaticPayload {
    pub fn new<B: Into<Arc<[u8]>>>(bytes: B) -> Self {
        Self(bytes.into())
    }
}

#[async_trait]
impl PayloadSource for StaticPayload {
    async fn payload(&self) -> Result<Vec<u8>> {
        Ok(self.0.to_vec())
    }
}

/// Configuration for the payload holder
#[derive(Debug, Clone)]
pub struct HolderConfig {
    /// Largest encoded response sent inline; anything bigger is relayed
    pub transport_limit: usize,
}

impl Default for HolderConfig {
    fn default() -> Self {
        Self {
            transport_limit: DEFAULT_TRANSPORT_LIMIT,
        }
    }
}

impl HolderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads SIBLINK_TRANSPORT_LIMIT
    pub fn from_env() -> Self {
        Self {
            transport_limit: transport_limit_from_env(),
        }
    }

    pub fn with_transport_limit(mut self, limit: usize) -> Self {
        self.transport_limit = limit;
        self
    }
}

struct ParkedRelay {
    token: RelayToken,
    relay: BlobRelay,
}

/// Serves the payload to trusted siblings.
pub struct AccountHolder<P, S> {
    verifier: Arc<PeerTrustVerifier<P>>,
    source:   S,
    config:   HolderConfig,
    relays:   Mutex<HashMap<ProcessIdentity, ParkedRelay>>,
}

impl<P: PackageRegistry, S: PayloadSource> AccountHolder<P, S> {
    pub fn new(verifier: Arc<PeerTrustVerifier<P>>, source: S, config: HolderConfig) -> Self {
        Self {
            verifier,
            source,
            config,
            relays: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HolderConfig {
        &self.config
    }

    /// Relays parked and not yet opened, at most one per caller.
    pub fn pending_relays(&self) -> usize {
        self.relays().len()
    }

    async fn serve_payload(&self, caller: ProcessIdentity, id: u32) -> ChannelMessage {
        let data = match self.source.payload().await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(uid = %caller, "Failed to produce payload: {:#}", e);
                return ChannelMessage::Error {
                    id,
                    message: "payload unavailable".to_string(),
                };
            }
        };

        let inline = ChannelMessage::Payload { id, data };
        let encoded_len = inline.encoded_len();
        match inline {
            ChannelMessage::Payload { data, .. } if encoded_len > self.config.transport_limit => {
                let token = RelayToken::random();
                tracing::info!(
                    uid = %caller,
                    bytes = encoded_len,
                    limit = self.config.transport_limit,
                    "✓ Payload exceeds transport limit, relaying as {}",
                    token
                );
                let parked = ParkedRelay {
                    token,
                    relay: BlobRelay::new(data),
                };
                if let Some(stale) = self.relays().insert(caller, parked) {
                    tracing::debug!(uid = %caller, "Dropping unopened relay {}", stale.token);
                }
                ChannelMessage::PayloadRelayed { id, token }
            }
            inline => {
                tracing::info!(uid = %caller, bytes = encoded_len, "✓ Sending payload inline");
                inline
            }
        }
    }

    fn relays(&self) -> MutexGuard<'_, HashMap<ProcessIdentity, ParkedRelay>> {
        self.relays.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<P: PackageRegistry, S: PayloadSource> ServiceEndpoint for AccountHolder<P, S> {
    async fn transact(
        &self,
        caller: ProcessIdentity,
        message: ChannelMessage,
    ) -> Result<ChannelMessage, HostError> {
        let id = message.id();
        if !self.verifier.is_uid_allowed(caller).await {
            tracing::warn!(uid = %caller, "✗ Denying request {} from untrusted caller", id);
            return Ok(ChannelMessage::Denied { id });
        }

        match message {
            ChannelMessage::RequestPayload { id } => Ok(self.serve_payload(caller, id).await),
            other => {
                tracing::warn!(uid = %caller, "Unexpected message: {:?}", other);
                Ok(ChannelMessage::Error {
                    id,
                    message: "unexpected message".to_string(),
                })
            }
        }
    }

    async fn open_relay(
        &self,
        caller: ProcessIdentity,
        token: RelayToken,
    ) -> Result<BlobRelay, HostError> {
        if !self.verifier.is_uid_allowed(caller).await {
            tracing::warn!(uid = %caller, "✗ Refusing relay {} to untrusted caller", token);
            return Err(HostError::Security(format!("uid {caller} is not a trusted sibling")));
        }

        let parked = {
            let mut relays = self.relays();
            match relays.remove(&caller) {
                Some(parked) if parked.token == token => Some(parked),
                Some(newer) => {
                    relays.insert(caller, newer);
                    None
                }
                None => None,
            }
        };

        parked.map(|parked| parked.relay).ok_or_else(|| {
            tracing::warn!(uid = %caller, "Unknown, replaced or already opened relay {}", token);
            HostError::Unavailable(format!("no relay for token {token}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use siblink_common::{
        memory::MemoryPackageRegistry, CertificateFingerprint, SigningCertificates, TrustRegistry,
    };

    use super::*;

    const SIBLING: ProcessIdentity = ProcessIdentity(10_200);
    const STRANGER: ProcessIdentity = ProcessIdentity(10_666);
    const CERT: &[u8] = b"sibling release certificate";

    fn holder(payload: &[u8], limit: usize) -> AccountHolder<MemoryPackageRegistry, StaticPayload> {
        let packages = MemoryPackageRegistry::new();
        packages.install(
            SIBLING,
            "com.example.reader",
            SigningCertificates::Current(vec![CERT.to_vec()]),
        );
        packages.install(
            STRANGER,
            "com.example.reader",
            SigningCertificates::Current(vec![b"somebody else".to_vec()]),
        );
        let fingerprint = CertificateFingerprint::of_certificate(CERT);
        let registry = TrustRegistry::builder()
            .trust("com.example.reader", [fingerprint.source()])
            .build();
        let verifier = Arc::new(PeerTrustVerifier::new(Arc::new(packages), Arc::new(registry)));

        AccountHolder::new(
            verifier,
            StaticPayload::new(payload.to_vec()),
            HolderConfig::new().with_transport_limit(limit),
        )
    }

    #[tokio::test]
    async fn small_payload_travels_inline() {
        let holder = holder(b"refresh-token", 1024);

        let response = holder
            .transact(SIBLING, ChannelMessage::RequestPayload { id: 7 })
            .await
            .unwrap();

        assert_eq!(response, ChannelMessage::Payload { id: 7, data: b"refresh-token".to_vec() });
        assert_eq!(holder.pending_relays(), 0);
    }

    #[tokio::test]
    async fn large_payload_is_relayed_once() {
        let payload = vec![0xabu8; 4096];
        let holder = holder(&payload, 1024);

        let token = match holder
            .transact(SIBLING, ChannelMessage::RequestPayload { id: 1 })
            .await
            .unwrap()
        {
            ChannelMessage::PayloadRelayed { id: 1, token } => token,
            other => panic!("expected relay, got {other:?}"),
        };
        assert_eq!(holder.pending_relays(), 1);

        let relay = holder.open_relay(SIBLING, token).await.unwrap();
        assert_eq!(relay.read_blob().unwrap(), payload);
        assert!(matches!(
            holder.open_relay(SIBLING, token).await,
            Err(HostError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn untrusted_caller_is_denied() {
        let holder = holder(&vec![1u8; 4096], 1024);

        let response = holder
            .transact(STRANGER, ChannelMessage::RequestPayload { id: 3 })
            .await
            .unwrap();
        assert_eq!(response, ChannelMessage::Denied { id: 3 });
        assert_eq!(holder.pending_relays(), 0);
    }

    #[tokio::test]
    async fn relay_is_not_handed_to_untrusted_caller() {
        let holder = holder(&vec![1u8; 4096], 1024);
        let token = match holder
            .transact(SIBLING, ChannelMessage::RequestPayload { id: 1 })
            .await
            .unwrap()
        {
            ChannelMessage::PayloadRelayed { token, .. } => token,
            other => panic!("expected relay, got {other:?}"),
        };

        let stolen = holder.open_relay(STRANGER, token).await;
        assert!(matches!(stolen, Err(ref e) if e.is_security()));
        assert_eq!(holder.pending_relays(), 1);
    }

    #[tokio::test]
    async fn unopened_relays_do_not_pile_up() {
        let payload = vec![0x5au8; 4096];
        let holder = holder(&payload, 1024);

        let mut tokens = Vec::new();
        for id in 1..=100 {
            match holder
                .transact(SIBLING, ChannelMessage::RequestPayload { id })
                .await
                .unwrap()
            {
                ChannelMessage::PayloadRelayed { token, .. } => tokens.push(token),
                other => panic!("expected relay, got {other:?}"),
            }
        }
        assert_eq!(holder.pending_relays(), 1);

        let latest = tokens.pop().unwrap();
        assert!(matches!(
            holder.open_relay(SIBLING, tokens[0]).await,
            Err(HostError::Unavailable(_))
        ));
        let relay = holder.open_relay(SIBLING, latest).await.unwrap();
        assert_eq!(relay.read_blob().unwrap(), payload);
        assert_eq!(holder.pending_relays(), 0);
    }

    #[tokio::test]
    async fn failing_source_reports_an_error() {
        struct Broken;

        #[async_trait]
        impl PayloadSource for Broken {
            async fn payload(&self) -> Result<Vec<u8>> {
                anyhow::bail!("keystore locked")
            }
        }

        let base = holder(b"", 1024);
        let holder = AccountHolder::new(Arc::clone(&base.verifier), Broken, HolderConfig::new());

        let response = holder
            .transact(SIBLING, ChannelMessage::RequestPayload { id: 9 })
            .await
            .unwrap();
        assert!(matches!(response, ChannelMessage::Error { id: 9, .. }));
    }
}
