use std::fmt;

use serde::{Deserialize, Serialize};

/// OS-assigned identity of a remote process (the UID on Android-like
/// systems). Shared by every package installed under the same sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessIdentity(pub i32);

impl ProcessIdentity {
    /// Sentinel the platform reports when no caller identity is available.
    pub const NONE: ProcessIdentity = ProcessIdentity(-1);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an installed application package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageName(String);

impl PackageName {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for PackageName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Ask the host to start the service if it is not already running.
pub const BIND_AUTO_CREATE: u32 = 0x0001;

/// The remotely hosted service a requester binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    /// Package hosting the service
    pub package: PackageName,
    /// Service component name inside that package
    pub service: String,
    /// Host-defined bind flags
    pub flags:   u32,
}

impl ServiceTarget {
    pub fn new<P: Into<PackageName>, S: Into<String>>(package: P, service: S) -> Self {
        Self {
            package: package.into(),
            service: service.into(),
            flags:   BIND_AUTO_CREATE,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.service)
    }
}
