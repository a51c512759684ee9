//! Connection state machine for a single bind cycle.
//!
//! ```text
//! Unbound -> Binding -> AwaitingConnect -> Connected -> AwaitingReconnect -> Connected ...
//!               |              |               |               |
//!               +--------------+---------------+---------------+--> issue / value, then Unbound
//! ```
//!
//! Each wait is a race between the host's callback slots, the policy's
//! timeout and (while connected) the caller's payload block. Losing branches
//! are dropped as soon as one branch wins. The host's unbind is issued
//! exactly once when the cycle is dropped, whatever the exit path,
//! including cancellation of the enclosing future.

use std::future::{self, Future};

use futures_util::future::BoxFuture;
use siblink_common::{
    DeathRecipient, HostError, RemoteBinder, ServiceConnection, ServiceHost, ServiceTarget,
};
use tokio::sync::watch;

use crate::policy::{BindingIssue, BindingPolicy, DisconnectResolution, WaitKind};

/// Phase of the current bind cycle. A cycle is in exactly one phase at a
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Unbound,
    Binding,
    AwaitingConnect,
    Connected,
    AwaitingReconnect,
}

/// How a bind cycle ended.
#[derive(Debug)]
pub(crate) enum CycleOutcome<R> {
    /// The payload block or a disconnect policy produced a value.
    Finished(R),
    /// The cycle hit a binding issue for the policy to resolve.
    Issue(BindingIssue),
}

enum Awaited<B, R> {
    Connected(B),
    Issue(BindingIssue),
    GaveUp(R),
}

enum Served<R> {
    Finished(R),
    Issue(BindingIssue),
    Disconnected,
}

/// One bind/unbind pair against the host.
pub(crate) struct BindCycle<'a, H: ServiceHost> {
    host:       &'a H,
    target:     &'a ServiceTarget,
    phases:     &'a watch::Sender<Phase>,
    connection: ServiceConnection<H::Binder>,
    attempt:    u32,
}

impl<'a, H: ServiceHost> BindCycle<'a, H> {
    pub(crate) fn new(
        host: &'a H,
        target: &'a ServiceTarget,
        phases: &'a watch::Sender<Phase>,
        attempt: u32,
    ) -> Self {
        Self {
            host,
            target,
            phases,
            connection: ServiceConnection::new(),
            attempt,
        }
    }

    /// Drives the cycle until the payload block finishes, a disconnect
    /// policy returns a value, or a binding issue occurs. A block that
    /// resolves to an issue ends the cycle like a host-reported one. Only
    /// host failures that are not permission refusals are returned as errors.
    pub(crate) async fn run<R, P, F, Fut>(
        &self,
        policy: &P,
        block: &mut F,
    ) -> Result<CycleOutcome<R>, HostError>
    where
        R: Send + 'static,
        P: BindingPolicy<R> + ?Sized,
        F: FnMut(H::Binder) -> Fut,
        Fut: Future<Output = Result<R, BindingIssue>>,
    {
        self.enter(Phase::Binding);
        // The bind call is synchronous, so it cannot be abandoned halfway;
        // cancellation is observed at the next await.
        match self.host.bind(self.target, &self.connection) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(service = %self.target, "Service not found");
                return Ok(CycleOutcome::Issue(BindingIssue::NotFoundOrNoPermission {
                    cause: None,
                }));
            }
            Err(e) if e.is_security() => {
                tracing::warn!(service = %self.target, "Bind refused: {}", e);
                return Ok(CycleOutcome::Issue(BindingIssue::NotFoundOrNoPermission {
                    cause: Some(e.into()),
                }));
            }
            Err(e) => return Err(e),
        }

        let mut wait = WaitKind::InitialBind;
        let mut give_up = None;
        loop {
            let binder = match self.await_connection(policy, wait, give_up.take()).await {
                Awaited::Connected(binder) => binder,
                Awaited::Issue(issue) => return Ok(CycleOutcome::Issue(issue)),
                Awaited::GaveUp(value) => return Ok(CycleOutcome::Finished(value)),
            };

            tracing::info!(
                attempt = self.attempt,
                uid = %binder.remote_identity(),
                "✓ Connected to {}",
                self.target
            );

            match self.serve(binder, block).await {
                Served::Finished(value) => return Ok(CycleOutcome::Finished(value)),
                Served::Issue(issue) => return Ok(CycleOutcome::Issue(issue)),
                Served::Disconnected => {}
            }

            match policy.on_disconnected().await {
                DisconnectResolution::UnbindImmediately(value) => {
                    tracing::info!(service = %self.target, "Disconnected, unbinding");
                    return Ok(CycleOutcome::Finished(value));
                }
                DisconnectResolution::AwaitRebind(until) => {
                    tracing::info!(service = %self.target, "Disconnected, awaiting rebind");
                    wait = WaitKind::Reconnect;
                    give_up = Some(until);
                }
            }
        }
    }

    async fn await_connection<R, P>(
        &self,
        policy: &P,
        wait: WaitKind,
        give_up: Option<BoxFuture<'static, R>>,
    ) -> Awaited<H::Binder, R>
    where
        R: Send + 'static,
        P: BindingPolicy<R> + ?Sized,
    {
        self.enter(match wait {
            WaitKind::InitialBind => Phase::AwaitingConnect,
            WaitKind::Reconnect => Phase::AwaitingReconnect,
        });

        let give_up = async move {
            match give_up {
                Some(until) => until.await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            biased;
            binder = self.connection.connected() => Awaited::Connected(binder),
            issue = self.connection.issue() => Awaited::Issue(issue.into()),
            value = give_up => Awaited::GaveUp(value),
            () = policy.timeout(wait) => {
                tracing::warn!(attempt = self.attempt, wait = ?wait, "Timed out waiting for {}", self.target);
                Awaited::Issue(BindingIssue::Timeout)
            }
        }
    }

    async fn serve<R, F, Fut>(&self, binder: H::Binder, block: &mut F) -> Served<R>
    where
        F: FnMut(H::Binder) -> Fut,
        Fut: Future<Output = Result<R, BindingIssue>>,
    {
        self.enter(Phase::Connected);

        let death = DeathRecipient::new();
        if let Err(e) = binder.link_to_death(&death) {
            tracing::warn!(uid = %binder.remote_identity(), "Binder died before use: {}", e);
            return Served::Issue(BindingIssue::BindingDied);
        }

        // The block is polled first so a finished payload is never discarded
        // in favour of an event that arrived in the same wakeup.
        let served = tokio::select! {
            biased;
            outcome = block(binder.clone()) => match outcome {
                Ok(value) => Served::Finished(value),
                Err(issue) => {
                    tracing::warn!(
                        uid = %binder.remote_identity(),
                        issue = ?issue,
                        "Payload block lost the connection"
                    );
                    Served::Issue(issue)
                }
            },
            issue = self.connection.issue() => Served::Issue(issue.into()),
            () = death.died() => {
                tracing::warn!(uid = %binder.remote_identity(), "Remote process died");
                Served::Issue(BindingIssue::BindingDied)
            }
            () = self.connection.disconnected() => Served::Disconnected,
        };

        binder.unlink_to_death(&death);
        served
    }

    fn enter(&self, phase: Phase) {
        tracing::debug!(attempt = self.attempt, phase = ?phase, "Connection phase");
        self.phases.send_replace(phase);
    }
}

impl<H: ServiceHost> Drop for BindCycle<'_, H> {
    fn drop(&mut self) {
        tracing::info!(attempt = self.attempt, "Unbinding {}", self.target);
        self.host.unbind(&self.connection);
        self.phases.send_replace(Phase::Unbound);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use siblink_common::{
        memory::{BindOutcome, MemoryBinder, MemoryServiceHost},
        ProcessIdentity,
    };

    use super::*;
    use crate::policy::IssueResolution;

    /// Never times out, waits for rebinds, retries everything.
    struct Patient;

    #[async_trait]
    impl BindingPolicy<u32> for Patient {
        async fn timeout(&self, _wait: WaitKind) {
            future::pending::<()>().await
        }

        async fn on_disconnected(&self) -> DisconnectResolution<u32> {
            DisconnectResolution::AwaitRebind(Box::pin(future::pending()))
        }

        async fn on_binding_issue(&self, _issue: &BindingIssue) -> IssueResolution<u32> {
            IssueResolution::UnbindAndRetry
        }
    }

    fn target() -> ServiceTarget {
        ServiceTarget::new("com.example.wallet", "TokenService")
    }

    #[tokio::test]
    async fn missing_service_is_an_issue_and_still_unbinds() {
        let host = MemoryServiceHost::new();
        host.script(BindOutcome::NotFound);
        let target = target();
        let (phases, rx) = watch::channel(Phase::Unbound);

        let outcome = {
            let cycle = BindCycle::new(&host, &target, &phases, 1);
            cycle.run(&Patient, &mut |_binder: MemoryBinder| async { Ok(0) }).await
        };

        assert!(matches!(
            outcome,
            Ok(CycleOutcome::Issue(BindingIssue::NotFoundOrNoPermission { cause: None }))
        ));
        assert_eq!(host.unbind_calls(), 1);
        assert_eq!(*rx.borrow(), Phase::Unbound);
    }

    #[tokio::test]
    async fn host_failure_is_returned_as_error() {
        let host = MemoryServiceHost::new();
        host.script(BindOutcome::Fail("binder driver gone".into()));
        let target = target();
        let (phases, _rx) = watch::channel(Phase::Unbound);

        let cycle = BindCycle::new(&host, &target, &phases, 1);
        let outcome = cycle.run(&Patient, &mut |_binder: MemoryBinder| async { Ok(0) }).await;

        assert!(matches!(outcome, Err(HostError::Unavailable(_))));
    }

    #[tokio::test]
    async fn block_runs_with_connected_binder() {
        let host = MemoryServiceHost::new();
        host.script(BindOutcome::Connect(MemoryBinder::new(ProcessIdentity(10_100))));
        let target = target();
        let (phases, rx) = watch::channel(Phase::Unbound);
        let runs = AtomicUsize::new(0);

        let cycle = BindCycle::new(&host, &target, &phases, 1);
        let outcome = cycle
            .run(&Patient, &mut |binder: MemoryBinder| {
                runs.fetch_add(1, Ordering::SeqCst);
                let phase = *rx.borrow();
                async move {
                    assert_eq!(phase, Phase::Connected);
                    Ok(binder.remote_identity().0 as u32)
                }
            })
            .await;

        assert!(matches!(outcome, Ok(CycleOutcome::Finished(10_100))));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(host.unbind_calls(), 0);
        drop(cycle);
        assert_eq!(host.unbind_calls(), 1);
    }

    #[tokio::test]
    async fn dead_binder_is_reported_as_binding_died() {
        let binder = MemoryBinder::new(ProcessIdentity(10_100));
        binder.kill();
        let host = MemoryServiceHost::new();
        host.script(BindOutcome::Connect(binder));
        let target = target();
        let (phases, _rx) = watch::channel(Phase::Unbound);

        let cycle = BindCycle::new(&host, &target, &phases, 1);
        let outcome = cycle.run(&Patient, &mut |_binder: MemoryBinder| async { Ok(0) }).await;

        assert!(matches!(outcome, Ok(CycleOutcome::Issue(BindingIssue::BindingDied))));
    }

    #[tokio::test]
    async fn block_can_end_the_cycle_with_an_issue() {
        let binder = MemoryBinder::new(ProcessIdentity(10_100));
        let host = MemoryServiceHost::new();
        host.script(BindOutcome::Connect(binder.clone()));
        let target = target();
        let (phases, _rx) = watch::channel(Phase::Unbound);

        let cycle = BindCycle::new(&host, &target, &phases, 1);
        let outcome = cycle
            .run(&Patient, &mut |_binder: MemoryBinder| async {
                Err::<u32, _>(BindingIssue::BindingDied)
            })
            .await;

        assert!(matches!(outcome, Ok(CycleOutcome::Issue(BindingIssue::BindingDied))));
        assert_eq!(binder.death_links(), 0);
    }

    #[tokio::test]
    async fn null_binding_ends_the_wait() {
        let host = MemoryServiceHost::new();
        let target = target();
        let (phases, mut rx) = watch::channel(Phase::Unbound);

        let cycle = BindCycle::new(&host, &target, &phases, 1);
        let mut session = |_binder: MemoryBinder| async { Ok(0) };
        let run = cycle.run(&Patient, &mut session);
        let trigger = async {
            rx.wait_for(|phase| *phase == Phase::AwaitingConnect).await.unwrap();
            host.null_binding();
        };

        let (outcome, ()) = tokio::join!(run, trigger);
        assert!(matches!(outcome, Ok(CycleOutcome::Issue(BindingIssue::NullBinding))));
    }
}
