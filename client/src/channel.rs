//! Bound-channel orchestrator: runs bind cycles until the payload block
//! completes or the policy gives up.

use std::{future::Future, sync::Arc};

use futures_util::FutureExt;
use siblink_common::{ServiceHost, ServiceTarget};
use tokio::sync::watch;

use crate::{
    connection::{BindCycle, CycleOutcome, Phase},
    error::{ConnectionLost, Result},
    policy::{BindingIssue, BindingPolicy, IssueResolution},
};

/// A logical binding to one sibling service.
///
/// The channel can be reused for several runs. Runs may overlap, each with
/// its own bind cycle, but they share one phase readout: while more than one
/// run is in flight, [`phase`](Self::phase) and [`phases`](Self::phases)
/// report whichever cycle changed phase last.
pub struct BoundChannel<H: ServiceHost> {
    host:   Arc<H>,
    target: ServiceTarget,
    phases: watch::Sender<Phase>,
}

impl<H: ServiceHost> BoundChannel<H> {
    pub fn new(host: Arc<H>, target: ServiceTarget) -> Self {
        let (phases, _) = watch::channel(Phase::Unbound);
        Self {
            host,
            target,
            phases,
        }
    }

    pub fn target(&self) -> &ServiceTarget {
        &self.target
    }

    /// Current phase of the bind cycle in progress.
    pub fn phase(&self) -> Phase {
        *self.phases.borrow()
    }

    /// Subscribes to phase changes.
    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phases.subscribe()
    }

    /// Runs `block` with a live binder, binding and rebinding as `policy`
    /// directs.
    ///
    /// Returns the block's value, or whatever value the policy chose when it
    /// gave up. Binding issues never surface as errors; only host failures
    /// the policy cannot see do. Dropping the returned future cancels the
    /// run and still unbinds.
    pub async fn run<R, P, F, Fut>(&self, policy: &P, mut block: F) -> Result<R>
    where
        R: Send + 'static,
        P: BindingPolicy<R> + ?Sized,
        F: FnMut(H::Binder) -> Fut,
        Fut: Future<Output = R>,
    {
        self.drive(policy, move |binder| block(binder).map(Ok)).await
    }

    /// Like [`run`](Self::run), but the block may report that the
    /// connection was lost mid-exchange, for example when a transaction
    /// fails because the remote process died. That ends the cycle with
    /// [`BindingIssue::BindingDied`] and goes to the policy like any other
    /// binding issue.
    pub async fn try_run<R, P, F, Fut>(&self, policy: &P, mut block: F) -> Result<R>
    where
        R: Send + 'static,
        P: BindingPolicy<R> + ?Sized,
        F: FnMut(H::Binder) -> Fut,
        Fut: Future<Output = std::result::Result<R, ConnectionLost>>,
    {
        self.drive(policy, move |binder| {
            block(binder)
                .map(|outcome| outcome.map_err(|ConnectionLost| BindingIssue::BindingDied))
        })
        .await
    }

    async fn drive<R, P, F, Fut>(&self, policy: &P, mut block: F) -> Result<R>
    where
        R: Send + 'static,
        P: BindingPolicy<R> + ?Sized,
        F: FnMut(H::Binder) -> Fut,
        Fut: Future<Output = std::result::Result<R, BindingIssue>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let cycle = BindCycle::new(self.host.as_ref(), &self.target, &self.phases, attempt);

            let issue = match cycle.run(policy, &mut block).await? {
                CycleOutcome::Finished(value) => {
                    tracing::debug!(attempts = attempt, "Bound channel finished");
                    return Ok(value);
                }
                CycleOutcome::Issue(issue) => issue,
            };

            tracing::warn!(attempt, issue = ?issue, "Binding issue on {}", self.target);
            match policy.on_binding_issue(&issue).await {
                IssueResolution::UnbindAndRetry => drop(cycle),
                IssueResolution::GiveUp(value) => {
                    tracing::info!(attempts = attempt, "Gave up on {}", self.target);
                    return Ok(value);
                }
            }
        }
    }
}

/// Runs `block` against `target` with a fresh [`BoundChannel`].
pub async fn with_bound_channel<H, R, P, F, Fut>(
    host: Arc<H>,
    target: ServiceTarget,
    policy: &P,
    block: F,
) -> Result<R>
where
    H: ServiceHost,
    R: Send + 'static,
    P: BindingPolicy<R> + ?Sized,
    F: FnMut(H::Binder) -> Fut,
    Fut: Future<Output = R>,
{
    BoundChannel::new(host, target).run(policy, block).await
}
