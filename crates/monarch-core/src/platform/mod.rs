//! Platform abstraction layer.
//!
//! The coordinator never branches on the host OS itself. It asks a
//! [`Platform`] what the host can do, which keeps the state machine testable
//! on any OS. All `#[cfg]` blocks for OS-specific behavior live here.
//!
//! # Supported Platforms
//!
//! - **Linux**: Full support
//! - **macOS**: Full support (no dock integration without a GUI layer)
//! - **Windows**: Named pipes, foreground grant

mod foreground;

use std::io;
use tracing::debug;

/// Host capabilities consulted by the coordinator and the report formatter.
pub trait Platform: Send + Sync {
    /// Whether a stale endpoint artifact may be deleted and rebound.
    fn can_delete_stale_endpoint(&self) -> bool;

    /// Whether a background process needs an explicit grant before another
    /// process may bring its window to the foreground.
    fn requires_foreground_grant(&self) -> bool;

    /// Grant `pid` the right to take the foreground. Best effort.
    fn allow_set_foreground(&self, pid: u32) -> io::Result<()>;

    /// Restore a hidden dock/taskbar presence once this process is primary.
    fn restore_shell_presence(&self);

    /// Whether the OS reports load averages.
    fn exposes_load_average(&self) -> bool;
}

/// The platform this binary was compiled for.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn can_delete_stale_endpoint(&self) -> bool {
        cfg!(unix)
    }

    fn requires_foreground_grant(&self) -> bool {
        cfg!(windows)
    }

    fn allow_set_foreground(&self, pid: u32) -> io::Result<()> {
        foreground::allow_set_foreground(pid)
    }

    fn restore_shell_presence(&self) {
        debug!(
            "No shell presence to restore on {} without a GUI layer",
            current_platform()
        );
    }

    fn exposes_load_average(&self) -> bool {
        !cfg!(windows)
    }
}

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_platform() {
        let platform = current_platform();
        assert!(["linux", "windows", "macos", "unknown"].contains(&platform));
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_host_capabilities() {
        let host = HostPlatform;
        assert!(host.can_delete_stale_endpoint());
        assert!(!host.requires_foreground_grant());
        assert!(host.exposes_load_average());
        assert!(host.allow_set_foreground(1).is_ok());
    }

    #[cfg(windows)]
    #[test]
    fn test_windows_host_capabilities() {
        let host = HostPlatform;
        assert!(!host.can_delete_stale_endpoint());
        assert!(host.requires_foreground_grant());
        assert!(!host.exposes_load_average());
    }
}
