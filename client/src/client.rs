use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use siblink_common::{
    config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_BIND_ATTEMPTS, DEFAULT_RECONNECT_TIMEOUT},
    ChannelMessage, HostError, PackageRegistry, PeerTrustVerifier, RemoteBinder, ServiceHost,
    ServiceTarget,
};

use crate::{
    channel::BoundChannel,
    error::{ChannelError, ConnectionLost, Result},
    policy::StandardPolicy,
};

/// Configuration for the sibling client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for the first connection of a bind cycle
    pub connect_timeout:   Duration,
    /// How long to wait for the host to reconnect after a disconnect
    pub reconnect_timeout: Duration,
    /// Bind cycles attempted before giving up
    pub max_bind_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout:   DEFAULT_CONNECT_TIMEOUT,
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            max_bind_attempts: DEFAULT_MAX_BIND_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    /// Creates a client configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the grace period for reconnection after a disconnect
    pub fn with_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = timeout;
        self
    }

    /// Set the number of bind cycles attempted before giving up
    pub fn with_max_bind_attempts(mut self, attempts: u32) -> Self {
        self.max_bind_attempts = attempts.max(1);
        self
    }
}

/// Requester side of a sibling channel: binds the holder's service, checks
/// that the holder is a trusted sibling and fetches its opaque payload.
pub struct SiblingClient<H: ServiceHost, P> {
    channel:         BoundChannel<H>,
    verifier:        Arc<PeerTrustVerifier<P>>,
    config:          ClientConfig,
    request_counter: AtomicU32,
}

impl<H: ServiceHost, P: PackageRegistry> SiblingClient<H, P> {
    pub fn new(
        host: Arc<H>,
        target: ServiceTarget,
        verifier: Arc<PeerTrustVerifier<P>>,
        config: ClientConfig,
    ) -> Self {
        Self {
            channel: BoundChannel::new(host, target),
            verifier,
            config,
            request_counter: AtomicU32::new(0),
        }
    }

    pub fn channel(&self) -> &BoundChannel<H> {
        &self.channel
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetches the holder's payload, reading it through a relay when it was
    /// too large for one transaction.
    ///
    /// A holder that dies mid-exchange counts as a failed bind cycle and is
    /// retried within the configured attempt budget.
    pub async fn fetch_payload(&self) -> Result<Vec<u8>> {
        let policy = StandardPolicy::new(&self.config, || Err(ChannelError::GaveUp));
        self.channel
            .try_run(&policy, |binder| async move {
                match self.exchange(binder).await {
                    Err(ChannelError::Host(HostError::DeadObject)) => Err(ConnectionLost),
                    result => Ok(result),
                }
            })
            .await?
    }

    async fn exchange(&self, binder: H::Binder) -> Result<Vec<u8>> {
        let holder = binder.remote_identity();
        if !self.verifier.is_uid_allowed(holder).await {
            tracing::warn!(uid = %holder, "✗ Refusing to talk to untrusted holder");
            return Err(ChannelError::Untrusted(holder));
        }

        let request_id = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(uid = %holder, "Sending payload request {}", request_id);

        match binder
            .transact(ChannelMessage::RequestPayload { id: request_id })
            .await?
        {
            ChannelMessage::Payload { id, data } if id == request_id => {
                tracing::info!(bytes = data.len(), "✓ Received payload inline");
                Ok(data)
            }
            ChannelMessage::PayloadRelayed { id, token } if id == request_id => {
                let relay = binder.open_relay(token).await?;
                let data = relay.read_blob()?;
                tracing::info!(bytes = data.len(), "✓ Received payload through relay");
                Ok(data)
            }
            ChannelMessage::Denied { id } if id == request_id => Err(ChannelError::Denied(id)),
            ChannelMessage::Error { id, message } if id == request_id => {
                Err(ChannelError::Protocol(format!("request {id} failed: {message}")))
            }
            msg => Err(ChannelError::Protocol(format!(
                "expected response to request {request_id}, got: {msg:?}"
            ))),
        }
    }
}
