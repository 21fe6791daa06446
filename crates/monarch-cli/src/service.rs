//! Launch service of a running primary.
//!
//! There is no window layer here; each forwarded launch is recorded as a new
//! window of the main process and echoed to stdout as `MONARCH_START=<json>`.
//! The primary's environment is held by the service rather than written into
//! the process environment, and is what windows would be started with.

use monarch_core::{LaunchService, MainProcessInfo, StartRequest, WindowInfo};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

pub struct AppLaunchService {
    windows: Mutex<Vec<WindowInfo>>,
    environment: BTreeMap<String, String>,
}

impl AppLaunchService {
    /// Service whose first window was opened by the primary's own launch.
    pub fn new(initial_args: &[String], environment: BTreeMap<String, String>) -> Self {
        let service = Self {
            windows: Mutex::new(Vec::new()),
            environment,
        };
        service.open_window(initial_args);
        service
    }

    /// Environment of the primary, including `MONARCH_PID` and `MONARCH_IPC_HOOK`.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    fn open_window(&self, args: &[String]) {
        let title = window_title(args);
        info!("Opening window \"{}\"", title);
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(WindowInfo {
                pid: self.main_process_id(),
                title,
            });
    }
}

fn window_title(args: &[String]) -> String {
    args.iter()
        .rev()
        .find(|arg| !arg.starts_with('-'))
        .cloned()
        .unwrap_or_else(|| "Untitled".to_string())
}

#[async_trait::async_trait]
impl LaunchService for AppLaunchService {
    async fn main_process_info(&self) -> monarch_core::Result<MainProcessInfo> {
        let windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(MainProcessInfo {
            main_pid: self.main_process_id(),
            windows,
        })
    }

    async fn start(&self, request: StartRequest) -> monarch_core::Result<()> {
        let json = serde_json::to_string(&request)?;
        // Intentional stdout: the launch record is machine-read
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "MONARCH_START={}", json).and_then(|()| stdout.flush()) {
            warn!("Failed to write start record: {}", e);
        }
        drop(stdout);

        self.open_window(&request.args);
        Ok(())
    }
}
