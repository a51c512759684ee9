//! Siblink Common Library
//!
//! Shared building blocks for a trusted channel between two independently
//! installed sibling apps. It includes:
//!
//! - Signing certificate fingerprints and the trust registry
//! - The peer trust verifier with its single-flight decision cache
//! - Platform seams for service binding, binders and package metadata
//! - Callback-to-future event slots used by the connection state machine
//! - Channel protocol messages and the large-payload relay
//! - An in-memory platform for tests and demos
//!
//! # Features
//!
//! - **Shared-UID aware trust**: an identity is trusted when any of its
//!   packages is signed by a registered certificate
//! - **Single-flight decisions**: concurrent checks for one identity share
//!   one computation, and decisions are cached for the process lifetime
//! - **Fail closed**: unreadable signing information never grants trust

/// Environment-backed configuration and defaults
pub mod config;

/// Error types
pub mod error;

/// Callback event slots and the service connection object
pub mod events;

/// Certificate fingerprints
pub mod fingerprint;

/// In-memory platform implementation
pub mod memory;

/// Host platform traits
pub mod platform;

/// Channel protocol messages
pub mod protocol;

/// Trust registry
pub mod registry;

/// Single-row payload relay
pub mod relay;

/// Keyed single-flight cache
pub mod single_flight;

/// Identities, package names and service targets
pub mod types;

/// Peer trust verification
pub mod verifier;

// Re-export commonly used types for convenience
pub use error::{HostError, RelayError};
pub use events::{ConnectionIssue, DeathRecipient, ServiceConnection};
pub use fingerprint::CertificateFingerprint;
pub use platform::{PackageRegistry, RemoteBinder, ServiceEndpoint, ServiceHost, SigningCertificates};
pub use protocol::{ChannelMessage, RelayToken};
pub use registry::TrustRegistry;
pub use relay::{BlobRelay, Dataset};
pub use types::{PackageName, ProcessIdentity, ServiceTarget};
pub use verifier::PeerTrustVerifier;
