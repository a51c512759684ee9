use std::{env, time::Duration};

/// Environment variable holding the trusted signer table
/// (`package=HEX|HEX;other.package=HEX`).
pub const TRUSTED_SIGNERS_ENV: &str = "SIBLINK_TRUSTED_SIGNERS";

/// Environment variable overriding the relay threshold in bytes.
pub const TRANSPORT_LIMIT_ENV: &str = "SIBLINK_TRANSPORT_LIMIT";

/// Largest message we are willing to put on the binder transport in one
/// transaction. The platform buffer is shared by every in-flight
/// transaction of the process, so stay well below it.
pub const DEFAULT_TRANSPORT_LIMIT: usize = 512 * 1024;

/// How long to wait for the initial connection of a bind attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the host to reconnect after a disconnect.
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bind cycles attempted before a standard policy gives up.
pub const DEFAULT_MAX_BIND_ATTEMPTS: u32 = 3;

/// Transport limit from the environment, falling back to the default.
pub fn transport_limit_from_env() -> usize {
    match env::var(TRANSPORT_LIMIT_ENV) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(
                "Ignoring invalid {}={:?}, using {}",
                TRANSPORT_LIMIT_ENV,
                value,
                DEFAULT_TRANSPORT_LIMIT
            );
            DEFAULT_TRANSPORT_LIMIT
        }),
        Err(_) => DEFAULT_TRANSPORT_LIMIT,
    }
}
