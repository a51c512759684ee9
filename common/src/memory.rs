//! In-memory platform.
//!
//! A scriptable service host, binder and package store that stand in for
//! the OS in tests and demos. Every host interaction is counted so callers
//! can assert on bind/unbind pairing and on the number of metadata reads.

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    error::HostError,
    events::{DeathRecipient, ServiceConnection},
    platform::{PackageRegistry, RemoteBinder, ServiceEndpoint, ServiceHost, SigningCertificates},
    protocol::{ChannelMessage, RelayToken},
    relay::BlobRelay,
    types::{PackageName, ProcessIdentity, ServiceTarget},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Package metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum PackageSigning {
    Signed(SigningCertificates),
    Unsigned,
    Unreadable,
}

/// Package store keyed by process identity.
#[derive(Debug, Default)]
pub struct MemoryPackageRegistry {
    identities:          Mutex<HashMap<ProcessIdentity, Vec<PackageName>>>,
    signing:             Mutex<HashMap<PackageName, PackageSigning>>,
    read_delays:         Mutex<HashMap<PackageName, Duration>>,
    identity_lookups:    AtomicUsize,
    certificate_lookups: AtomicUsize,
}

impl MemoryPackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `package` under `identity`, signed with `certificates`.
    pub fn install<P: Into<PackageName>>(
        &self,
        identity: ProcessIdentity,
        package: P,
        certificates: SigningCertificates,
    ) {
        self.add(identity, package.into(), PackageSigning::Signed(certificates));
    }

    /// Installs a package that reports no signing information.
    pub fn install_unsigned<P: Into<PackageName>>(&self, identity: ProcessIdentity, package: P) {
        self.add(identity, package.into(), PackageSigning::Unsigned);
    }

    /// Installs a package whose certificates cannot be read.
    pub fn install_unreadable<P: Into<PackageName>>(&self, identity: ProcessIdentity, package: P) {
        self.add(identity, package.into(), PackageSigning::Unreadable);
    }

    /// Makes every certificate read for `package` block for `delay`.
    pub fn set_read_delay<P: Into<PackageName>>(&self, package: P, delay: Duration) {
        lock(&self.read_delays).insert(package.into(), delay);
    }

    pub fn identity_lookups(&self) -> usize {
        self.identity_lookups.load(Ordering::SeqCst)
    }

    pub fn certificate_lookups(&self) -> usize {
        self.certificate_lookups.load(Ordering::SeqCst)
    }

    fn add(&self, identity: ProcessIdentity, package: PackageName, signing: PackageSigning) {
        lock(&self.identities)
            .entry(identity)
            .or_default()
            .push(package.clone());
        lock(&self.signing).insert(package, signing);
    }
}

impl PackageRegistry for MemoryPackageRegistry {
    fn packages_for_identity(&self, identity: ProcessIdentity) -> io::Result<Vec<PackageName>> {
        self.identity_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.identities)
            .get(&identity)
            .cloned()
            .unwrap_or_default())
    }

    fn signing_certificates(
        &self,
        package: &PackageName,
    ) -> io::Result<Option<SigningCertificates>> {
        self.certificate_lookups.fetch_add(1, Ordering::SeqCst);

        let delay = lock(&self.read_delays).get(package).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        match lock(&self.signing).get(package).cloned() {
            Some(PackageSigning::Signed(certificates)) => Ok(Some(certificates)),
            Some(PackageSigning::Unsigned) => Ok(None),
            Some(PackageSigning::Unreadable) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("cannot read signing info for {package}"),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("package {package} not installed"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Binder
// ---------------------------------------------------------------------------

struct BinderState {
    remote:     ProcessIdentity,
    caller:     ProcessIdentity,
    endpoint:   Option<Arc<dyn ServiceEndpoint>>,
    alive:      AtomicBool,
    recipients: Mutex<Vec<DeathRecipient>>,
}

/// In-process binder. Transactions are forwarded to an optional
/// [`ServiceEndpoint`] tagged with the configured caller identity.
#[derive(Clone)]
pub struct MemoryBinder {
    state: Arc<BinderState>,
}

impl MemoryBinder {
    /// A binder with no endpoint behind it; transactions fail.
    pub fn new(remote: ProcessIdentity) -> Self {
        Self::build(remote, ProcessIdentity::NONE, None)
    }

    /// A binder whose transactions reach `endpoint` as if sent by `caller`.
    pub fn with_endpoint(
        remote: ProcessIdentity,
        caller: ProcessIdentity,
        endpoint: Arc<dyn ServiceEndpoint>,
    ) -> Self {
        Self::build(remote, caller, Some(endpoint))
    }

    fn build(
        remote: ProcessIdentity,
        caller: ProcessIdentity,
        endpoint: Option<Arc<dyn ServiceEndpoint>>,
    ) -> Self {
        Self {
            state: Arc::new(BinderState {
                remote,
                caller,
                endpoint,
                alive: AtomicBool::new(true),
                recipients: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Simulates death of the hosting process.
    pub fn kill(&self) {
        self.state.alive.store(false, Ordering::SeqCst);
        let recipients = std::mem::take(&mut *lock(&self.state.recipients));
        for recipient in recipients {
            recipient.binder_died();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    /// Number of currently registered death recipients.
    pub fn death_links(&self) -> usize {
        lock(&self.state.recipients).len()
    }

    fn endpoint(&self) -> Result<&Arc<dyn ServiceEndpoint>, HostError> {
        if !self.is_alive() {
            return Err(HostError::DeadObject);
        }
        self.state
            .endpoint
            .as_ref()
            .ok_or_else(|| HostError::Unavailable("binder has no endpoint".to_string()))
    }
}

#[async_trait]
impl RemoteBinder for MemoryBinder {
    fn remote_identity(&self) -> ProcessIdentity {
        self.state.remote
    }

    fn link_to_death(&self, recipient: &DeathRecipient) -> Result<(), HostError> {
        let mut recipients = lock(&self.state.recipients);
        if !self.is_alive() {
            return Err(HostError::DeadObject);
        }
        recipients.push(recipient.clone());
        Ok(())
    }

    fn unlink_to_death(&self, recipient: &DeathRecipient) {
        lock(&self.state.recipients).retain(|linked| !linked.same_as(recipient));
    }

    async fn transact(&self, message: ChannelMessage) -> Result<ChannelMessage, HostError> {
        let endpoint = Arc::clone(self.endpoint()?);
        endpoint.transact(self.state.caller, message).await
    }

    async fn open_relay(&self, token: RelayToken) -> Result<BlobRelay, HostError> {
        let endpoint = Arc::clone(self.endpoint()?);
        endpoint.open_relay(self.state.caller, token).await
    }
}

// ---------------------------------------------------------------------------
// Service host
// ---------------------------------------------------------------------------

/// What the next `bind` call does.
#[derive(Clone)]
pub enum BindOutcome {
    /// Accept the bind; events are delivered by the test.
    Accept,
    /// Accept and immediately report `binder` as connected.
    Connect(MemoryBinder),
    /// Report that the service does not exist.
    NotFound,
    /// Refuse for permission reasons.
    Refuse(String),
    /// Fail in a way no policy can handle.
    Fail(String),
}

struct HostState {
    script: VecDeque<BindOutcome>,
    active: Option<ServiceConnection<MemoryBinder>>,
}

/// Scriptable service host. Unscripted binds are accepted.
pub struct MemoryServiceHost {
    state:        Mutex<HostState>,
    binds:        watch::Sender<usize>,
    unbind_calls: AtomicUsize,
}

impl Default for MemoryServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServiceHost {
    pub fn new() -> Self {
        Self {
            state:        Mutex::new(HostState {
                script: VecDeque::new(),
                active: None,
            }),
            binds:        watch::Sender::new(0),
            unbind_calls: AtomicUsize::new(0),
        }
    }

    /// Queues the outcome of a future `bind` call.
    pub fn script(&self, outcome: BindOutcome) -> &Self {
        lock(&self.state).script.push_back(outcome);
        self
    }

    pub fn bind_calls(&self) -> usize {
        *self.binds.borrow()
    }

    pub fn unbind_calls(&self) -> usize {
        self.unbind_calls.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` bind calls have been made.
    pub async fn wait_for_binds(&self, count: usize) {
        let mut binds = self.binds.subscribe();
        let _ = binds.wait_for(|calls| *calls >= count).await;
    }

    /// Whether a connection is currently registered.
    pub fn is_bound(&self) -> bool {
        lock(&self.state).active.is_some()
    }

    /// Reports `binder` as connected to the registered connection.
    pub fn connect(&self, binder: MemoryBinder) {
        if let Some(connection) = self.active() {
            connection.service_connected(binder);
        }
    }

    pub fn disconnect(&self) {
        if let Some(connection) = self.active() {
            connection.service_disconnected();
        }
    }

    pub fn binding_died(&self) {
        if let Some(connection) = self.active() {
            connection.binding_died();
        }
    }

    pub fn null_binding(&self) {
        if let Some(connection) = self.active() {
            connection.null_binding();
        }
    }

    fn active(&self) -> Option<ServiceConnection<MemoryBinder>> {
        lock(&self.state).active.clone()
    }
}

impl ServiceHost for MemoryServiceHost {
    type Binder = MemoryBinder;

    fn bind(
        &self,
        target: &ServiceTarget,
        connection: &ServiceConnection<MemoryBinder>,
    ) -> Result<bool, HostError> {
        let outcome = {
            let mut state = lock(&self.state);
            let outcome = state.script.pop_front().unwrap_or(BindOutcome::Accept);
            if matches!(outcome, BindOutcome::Accept | BindOutcome::Connect(_)) {
                state.active = Some(connection.clone());
            }
            outcome
        };
        self.binds.send_modify(|calls| *calls += 1);
        tracing::debug!(service = %target, "Memory host bind");

        match outcome {
            BindOutcome::Accept => Ok(true),
            BindOutcome::Connect(binder) => {
                connection.service_connected(binder);
                Ok(true)
            }
            BindOutcome::NotFound => Ok(false),
            BindOutcome::Refuse(reason) => Err(HostError::Security(reason)),
            BindOutcome::Fail(reason) => Err(HostError::Unavailable(reason)),
        }
    }

    fn unbind(&self, connection: &ServiceConnection<MemoryBinder>) {
        self.unbind_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if state
            .active
            .as_ref()
            .is_some_and(|active| active.same_as(connection))
        {
            state.active = None;
        }
    }
}
