//! Binding policies.
//!
//! The state machine never decides on its own what a timeout, a disconnect
//! or a failed bind means for the caller. It asks a [`BindingPolicy`].

use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use futures_util::future::{self, BoxFuture, FutureExt};
use siblink_common::{ConnectionIssue, HostError};

use crate::client::ClientConfig;

/// Recoverable-or-fatal binding failures handed to
/// [`BindingPolicy::on_binding_issue`].
#[derive(Debug, Clone)]
pub enum BindingIssue {
    /// The service does not exist or the caller may not bind it.
    NotFoundOrNoPermission {
        /// Security error raised by the host, if any
        cause: Option<Arc<HostError>>,
    },
    /// The hosting process died and the binding will not recover.
    BindingDied,
    /// The service returned no binder.
    NullBinding,
    /// The policy's timeout elapsed while waiting for a connection.
    Timeout,
}

impl From<ConnectionIssue> for BindingIssue {
    fn from(issue: ConnectionIssue) -> Self {
        match issue {
            ConnectionIssue::BindingDied => BindingIssue::BindingDied,
            ConnectionIssue::NullBinding => BindingIssue::NullBinding,
        }
    }
}

/// Which wait a timeout applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// Waiting for the first connection of a bind cycle.
    InitialBind,
    /// Waiting for the host to reconnect after a disconnect.
    Reconnect,
}

/// What to do about a binding issue.
#[derive(Debug, PartialEq, Eq)]
pub enum IssueResolution<R> {
    /// Unbind and start a fresh bind cycle.
    UnbindAndRetry,
    /// Stop and return this value.
    GiveUp(R),
}

/// What to do when a connected service disconnects.
pub enum DisconnectResolution<R> {
    /// Unbind and return this value.
    UnbindImmediately(R),
    /// Stay bound and wait for the host to reconnect. If the future
    /// completes first, its value is returned instead.
    AwaitRebind(BoxFuture<'static, R>),
}

impl<R> fmt::Debug for DisconnectResolution<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectResolution::UnbindImmediately(_) => f.write_str("UnbindImmediately"),
            DisconnectResolution::AwaitRebind(_) => f.write_str("AwaitRebind"),
        }
    }
}

/// Caller-supplied decisions for the bound channel.
#[async_trait]
pub trait BindingPolicy<R: Send + 'static>: Send + Sync {
    /// Completes when a wait for a connection should be abandoned.
    async fn timeout(&self, wait: WaitKind);

    async fn on_disconnected(&self) -> DisconnectResolution<R>;

    async fn on_binding_issue(&self, issue: &BindingIssue) -> IssueResolution<R>;
}

/// Timeouts and retry budget taken from a [`ClientConfig`].
///
/// Missing services and permission refusals give up at once. Deaths, null
/// bindings and timeouts are retried until `max_bind_attempts` cycles have
/// failed. Disconnects wait for the host to rebind, bounded by the
/// reconnect timeout.
pub struct StandardPolicy<R> {
    config:   ClientConfig,
    failures: AtomicU32,
    fallback: Box<dyn Fn() -> R + Send + Sync>,
}

impl<R: Send + 'static> StandardPolicy<R> {
    /// `fallback` produces the value returned when the policy gives up.
    pub fn new<F>(config: &ClientConfig, fallback: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
    {
        Self {
            config:   config.clone(),
            failures: AtomicU32::new(0),
            fallback: Box::new(fallback),
        }
    }

    /// Bind cycles that ended in a binding issue so far.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Send + 'static> BindingPolicy<R> for StandardPolicy<R> {
    async fn timeout(&self, wait: WaitKind) {
        let limit = match wait {
            WaitKind::InitialBind => self.config.connect_timeout,
            WaitKind::Reconnect => self.config.reconnect_timeout,
        };
        tokio::time::sleep(limit).await;
    }

    async fn on_disconnected(&self) -> DisconnectResolution<R> {
        DisconnectResolution::AwaitRebind(future::pending().boxed())
    }

    async fn on_binding_issue(&self, issue: &BindingIssue) -> IssueResolution<R> {
        if let BindingIssue::NotFoundOrNoPermission { cause } = issue {
            match cause {
                Some(cause) => tracing::warn!("Cannot bind sibling service: {}", cause),
                None => tracing::warn!("Sibling service not found"),
            }
            return IssueResolution::GiveUp((self.fallback)());
        }

        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.max_bind_attempts {
            tracing::warn!(failures, issue = ?issue, "Giving up on sibling service");
            IssueResolution::GiveUp((self.fallback)())
        } else {
            tracing::debug!(failures, issue = ?issue, "Retrying bind");
            IssueResolution::UnbindAndRetry
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn policy(max_bind_attempts: u32) -> StandardPolicy<&'static str> {
        let config = ClientConfig::new()
            .with_connect_timeout(Duration::from_millis(5))
            .with_reconnect_timeout(Duration::from_millis(5))
            .with_max_bind_attempts(max_bind_attempts);
        StandardPolicy::new(&config, || "fallback")
    }

    #[tokio::test]
    async fn permission_refusal_gives_up_at_once() {
        let policy = policy(5);
        let issue = BindingIssue::NotFoundOrNoPermission {
            cause: Some(Arc::new(HostError::Security("not exported".into()))),
        };

        assert_eq!(policy.on_binding_issue(&issue).await, IssueResolution::GiveUp("fallback"));
        assert_eq!(policy.failures(), 0);
    }

    #[tokio::test]
    async fn transient_issues_retry_until_budget_is_spent() {
        let policy = policy(3);

        assert_eq!(
            policy.on_binding_issue(&BindingIssue::Timeout).await,
            IssueResolution::UnbindAndRetry
        );
        assert_eq!(
            policy.on_binding_issue(&BindingIssue::BindingDied).await,
            IssueResolution::UnbindAndRetry
        );
        assert_eq!(
            policy.on_binding_issue(&BindingIssue::NullBinding).await,
            IssueResolution::GiveUp("fallback")
        );
    }

    #[tokio::test]
    async fn initial_bind_timeout_uses_connect_timeout() {
        let policy = policy(1);
        tokio::time::timeout(Duration::from_secs(1), policy.timeout(WaitKind::InitialBind))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reconnect_wait_uses_reconnect_timeout() {
        let config = ClientConfig::new()
            .with_connect_timeout(Duration::from_secs(3600))
            .with_reconnect_timeout(Duration::from_millis(5));
        let policy = StandardPolicy::new(&config, || ());

        tokio::time::timeout(Duration::from_secs(1), policy.timeout(WaitKind::Reconnect))
            .await
            .unwrap();
        let initial =
            tokio::time::timeout(Duration::from_millis(50), policy.timeout(WaitKind::InitialBind))
                .await;
        assert!(initial.is_err());
    }
}
