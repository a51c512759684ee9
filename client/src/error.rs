//! Error types for the requester side.

use siblink_common::{HostError, ProcessIdentity, RelayError};
use thiserror::Error;

/// Errors surfaced by the bound channel and the sibling client.
///
/// Ordinary binding issues are never reported here; they are resolved by
/// the caller's binding policy.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The host failed in a way no binding policy can handle.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// The bound peer is not a trusted sibling.
    #[error("peer {0} is not a trusted sibling")]
    Untrusted(ProcessIdentity),

    /// The holder refused to serve this process.
    #[error("holder denied request {0}")]
    Denied(u32),

    /// The holder answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A relayed payload could not be read.
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// The binding policy gave up before a payload was obtained.
    #[error("gave up binding to the holder")]
    GaveUp,
}

/// Result type for requester operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Returned by a payload block to report that the connection it was using
/// went away mid-exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection to the bound service was lost")]
pub struct ConnectionLost;
