//! Foreground window grants.
//!
//! # Platform Behavior
//! - **Windows**: `AllowSetForegroundWindow(pid)`
//! - **Others**: No-op; any process may raise its own windows

use std::io;

#[cfg(windows)]
#[allow(unsafe_code)]
pub(super) fn allow_set_foreground(pid: u32) -> io::Result<()> {
    use windows_sys::Win32::UI::WindowsAndMessaging::AllowSetForegroundWindow;

    // SAFETY: AllowSetForegroundWindow takes a plain process id and touches
    // no caller memory.
    let granted = unsafe { AllowSetForegroundWindow(pid) };
    if granted == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(windows))]
pub(super) fn allow_set_foreground(_pid: u32) -> io::Result<()> {
    Ok(())
}
