//! Centralized configuration for monarch.
//!
//! Policy constants for the IPC layer, the startup handoff, and the
//! environment variables exchanged with a newly started primary.

use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const PRODUCT_NAME: &'static str = "Monarch";
    /// Executable name, used to label the main process in reports.
    pub const APPLICATION_NAME: &'static str = "monarch";
    pub const PRODUCT_VERSION: &'static str = env!("CARGO_PKG_VERSION");
}

/// Limits for the local IPC endpoint.
pub struct IpcConfig;

impl IpcConfig {
    /// Largest accepted frame payload (1 MiB). Start requests carry a full
    /// environment, so this is generous.
    pub const MAX_IPC_MESSAGE_SIZE: usize = 1_048_576;
    /// Concurrent launch connections served by a primary.
    pub const MAX_IPC_CONNECTIONS: usize = 32;
    /// `sun_path` budget for Unix socket paths, leaving room for the NUL.
    pub const MAX_SOCKET_PATH_LEN: usize = 103;
    /// Prefix of named pipes on Windows.
    pub const PIPE_PREFIX: &'static str = r"\\.\pipe\";
    /// Hex characters of the data-dir hash used in derived endpoint names.
    pub const ENDPOINT_HASH_LEN: usize = 8;
}

/// Startup handoff policy.
pub struct StartupConfig;

impl StartupConfig {
    /// How long a secondary waits on a silent primary before asking the UI
    /// layer to show a "not responding" notice.
    pub const STARTUP_WARNING_THRESHOLD: Duration = Duration::from_secs(10);
}

/// Environment variables owned by the launch handoff.
pub struct EnvConfig;

impl EnvConfig {
    /// Process id of the primary, set by the primary itself.
    pub const PID: &'static str = "MONARCH_PID";
    /// Endpoint the primary is bound to.
    pub const IPC_HOOK: &'static str = "MONARCH_IPC_HOOK";
    /// Locale configuration, passed through unchanged.
    pub const NLS_CONFIG: &'static str = "MONARCH_NLS_CONFIG";
    /// Log directory, passed through unchanged.
    pub const LOGS: &'static str = "MONARCH_LOGS";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_are_reasonable() {
        assert!(IpcConfig::MAX_IPC_MESSAGE_SIZE >= 64 * 1024);
        assert!(IpcConfig::MAX_IPC_CONNECTIONS > 0);
        assert!(StartupConfig::STARTUP_WARNING_THRESHOLD > Duration::ZERO);
    }
}
