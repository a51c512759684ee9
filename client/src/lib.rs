//! Siblink Client Library
//!
//! The requester side of a sibling channel. It binds to a service hosted by
//! another app, keeps the binding alive across disconnects and process
//! deaths as directed by a [`BindingPolicy`], verifies that the peer is a
//! trusted sibling and fetches its payload.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use siblink_client::{ClientConfig, SiblingClient};
//! use siblink_common::{
//!     memory::{MemoryPackageRegistry, MemoryServiceHost},
//!     PeerTrustVerifier, ServiceTarget, TrustRegistry,
//! };
//!
//! # async fn run() -> Result<(), siblink_client::ChannelError> {
//! let verifier = Arc::new(PeerTrustVerifier::new(
//!     Arc::new(MemoryPackageRegistry::new()),
//!     Arc::new(TrustRegistry::from_env()),
//! ));
//! let client = SiblingClient::new(
//!     Arc::new(MemoryServiceHost::new()),
//!     ServiceTarget::new("com.example.wallet", "TokenService"),
//!     verifier,
//!     ClientConfig::new(),
//! );
//!
//! let payload = client.fetch_payload().await?;
//! println!("received {} bytes", payload.len());
//! # Ok(())
//! # }
//! ```

mod channel;
mod client;
mod connection;
mod error;
mod policy;

pub use channel::{with_bound_channel, BoundChannel};
pub use client::*;
pub use connection::Phase;
pub use error::{ChannelError, ConnectionLost, Result};
pub use policy::{
    BindingIssue, BindingPolicy, DisconnectResolution, IssueResolution, StandardPolicy, WaitKind,
};
