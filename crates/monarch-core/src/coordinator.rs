//! Instance coordination: become the primary, or hand off to the one that is.
//!
//! A launch first tries to bind the well-known endpoint. Losing that race
//! means a primary may already exist, so the launch connects to it and either
//! prints a diagnostic report or forwards its arguments and environment.
//! A socket file left behind by a crashed primary is removed, but only if it
//! is still the same file that refused the connection, and the bind is
//! retried exactly once.

use crate::config::StartupConfig;
use crate::diagnostics::{ProcessTreeCollector, ProductInfo, ReportFormatter, SystemSnapshot};
use crate::ipc::{InstanceHandle, Transport};
use crate::launch::{LaunchChannel, StartRequest};
use crate::platform::Platform;
use crate::startup_warning::StartupWarning;
use crate::MonarchError;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Terminal result of one coordination attempt.
#[derive(Debug)]
pub enum CoordinatorOutcome<L> {
    /// This process owns the endpoint and should run full startup.
    Primary(L),
    /// The launch was delivered to a running primary.
    ForwardedToExisting,
    /// A diagnostic report for the running primary was printed.
    DiagnosticPrinted,
    Failed(MonarchError),
}

impl<L> CoordinatorOutcome<L> {
    /// Forwarding and diagnostics end the process cleanly.
    pub fn is_expected_termination(&self) -> bool {
        matches!(
            self,
            CoordinatorOutcome::ForwardedToExisting | CoordinatorOutcome::DiagnosticPrinted
        )
    }
}

/// What this launch wants from coordination.
#[derive(Debug, Clone, Default)]
pub struct CoordinateRequest {
    /// Forwarded to a running primary.
    pub start: StartRequest,
    /// Print a process report instead of forwarding.
    pub diagnostic: bool,
    /// Wait on the primary indefinitely; no startup warning.
    pub wait: bool,
    /// This launch is a headless test run that needs the primary to itself.
    pub exclusive_test_run: bool,
}

/// Destination for the diagnostic report.
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &str) -> io::Result<()>;
}

/// Writes reports to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn emit(&self, report: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(report.as_bytes())?;
        stdout.flush()
    }
}

/// Notified when a primary takes too long to acknowledge a forwarded launch.
pub trait StartupNotice: Send + Sync + 'static {
    fn peer_not_responding(&self, handle: &InstanceHandle);
}

/// Logs the notice; a UI layer would show a dialog instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStartupNotice;

impl StartupNotice for LogStartupNotice {
    fn peer_not_responding(&self, handle: &InstanceHandle) {
        warn!(
            "Another instance is running at {} but is not responding",
            handle
        );
    }
}

/// Drives one coordination attempt against an [`InstanceHandle`].
pub struct Coordinator<T: Transport> {
    handle: InstanceHandle,
    transport: T,
    platform: Arc<dyn Platform>,
    collector: Arc<dyn ProcessTreeCollector>,
    report_sink: Arc<dyn ReportSink>,
    startup_notice: Arc<dyn StartupNotice>,
    product: ProductInfo,
    system: Option<SystemSnapshot>,
    screen_reader: bool,
    warning_threshold: Duration,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(
        handle: InstanceHandle,
        transport: T,
        platform: Arc<dyn Platform>,
        collector: Arc<dyn ProcessTreeCollector>,
    ) -> Self {
        Self {
            handle,
            transport,
            platform,
            collector,
            report_sink: Arc::new(StdoutSink),
            startup_notice: Arc::new(LogStartupNotice),
            product: ProductInfo::current(),
            system: None,
            screen_reader: false,
            warning_threshold: StartupConfig::STARTUP_WARNING_THRESHOLD,
        }
    }

    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.report_sink = sink;
        self
    }

    pub fn with_startup_notice(mut self, notice: Arc<dyn StartupNotice>) -> Self {
        self.startup_notice = notice;
        self
    }

    pub fn with_product(mut self, product: ProductInfo) -> Self {
        self.product = product;
        self
    }

    /// Use a fixed host snapshot instead of reading the host at report time.
    pub fn with_system_snapshot(mut self, system: SystemSnapshot) -> Self {
        self.system = Some(system);
        self
    }

    pub fn with_screen_reader(mut self, enabled: bool) -> Self {
        self.screen_reader = enabled;
        self
    }

    pub fn with_warning_threshold(mut self, threshold: Duration) -> Self {
        self.warning_threshold = threshold;
        self
    }

    pub fn handle(&self) -> &InstanceHandle {
        &self.handle
    }

    /// Coordinate with the stale-endpoint retry allowed.
    pub async fn coordinate(&self, request: &CoordinateRequest) -> CoordinatorOutcome<T::Listener> {
        self.coordinate_with_retry(request, true).await
    }

    /// Coordinate, optionally allowing one stale-endpoint retry.
    pub async fn coordinate_with_retry(
        &self,
        request: &CoordinateRequest,
        allow_retry: bool,
    ) -> CoordinatorOutcome<T::Listener> {
        let mut allow_retry = allow_retry;

        let stream = loop {
            match self.transport.bind(&self.handle).await {
                Ok(listener) => {
                    info!("Bound instance endpoint {}", self.handle);
                    self.platform.restore_shell_presence();
                    return CoordinatorOutcome::Primary(listener);
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    debug!("Instance endpoint {} is in use, connecting", self.handle);
                }
                Err(source) => {
                    return CoordinatorOutcome::Failed(MonarchError::Bind {
                        endpoint: self.handle.to_string(),
                        source,
                    });
                }
            }

            let observed = match self.transport.identify(&self.handle).await {
                Ok(id) => id,
                Err(e) => {
                    debug!("Could not stat instance endpoint {}: {}", self.handle, e);
                    None
                }
            };

            match self.transport.connect(&self.handle).await {
                Ok(stream) => break stream,
                Err(e)
                    if allow_retry
                        && e.kind() == io::ErrorKind::ConnectionRefused
                        && self.platform.can_delete_stale_endpoint() =>
                {
                    allow_retry = false;
                    let Some(expected) = observed else {
                        debug!("Instance endpoint {} vanished, binding again", self.handle);
                        continue;
                    };
                    match self.transport.remove_stale(&self.handle, expected).await {
                        Ok(true) => info!("Removed stale instance endpoint {}", self.handle),
                        Ok(false) => info!(
                            "Instance endpoint {} changed after the refused connect, leaving it",
                            self.handle
                        ),
                        Err(source) => {
                            return CoordinatorOutcome::Failed(MonarchError::StaleEndpoint {
                                path: self.handle.as_path().to_path_buf(),
                                source,
                            });
                        }
                    }
                }
                Err(e) => return CoordinatorOutcome::Failed(self.connect_error(e)),
            }
        };

        let channel = LaunchChannel::new(stream, self.handle.clone());
        let outcome = if request.diagnostic {
            self.print_diagnostics(&channel).await
        } else {
            self.forward_launch(&channel, request).await
        };

        if let Err(e) = channel.close().await {
            debug!("Closing launch channel failed: {}", e);
        }
        outcome
    }

    fn connect_error(&self, source: io::Error) -> MonarchError {
        let endpoint = self.handle.to_string();
        match source.kind() {
            io::ErrorKind::PermissionDenied => MonarchError::PermissionConflict { endpoint },
            io::ErrorKind::ConnectionRefused => MonarchError::ConnectionRefused { endpoint },
            _ => MonarchError::Connect { endpoint, source },
        }
    }

    async fn print_diagnostics<S: crate::ipc::IpcStream>(
        &self,
        channel: &LaunchChannel<S>,
    ) -> CoordinatorOutcome<T::Listener> {
        let info = match channel.get_main_process_info().await {
            Ok(info) => info,
            Err(e) => return CoordinatorOutcome::Failed(e),
        };
        let tree = match self.collector.collect(info.main_pid).await {
            Ok(tree) => tree,
            Err(e) => return CoordinatorOutcome::Failed(e),
        };

        let system = match &self.system {
            Some(system) => system.clone(),
            None => SystemSnapshot::capture(self.platform.as_ref(), self.screen_reader),
        };
        let report = ReportFormatter::new(self.product.clone(), system).format(&info, &tree);

        if let Err(e) = self.report_sink.emit(&report) {
            return CoordinatorOutcome::Failed(e.into());
        }
        info!("Printed process report for instance {}", info.main_pid);
        CoordinatorOutcome::DiagnosticPrinted
    }

    async fn forward_launch<S: crate::ipc::IpcStream>(
        &self,
        channel: &LaunchChannel<S>,
        request: &CoordinateRequest,
    ) -> CoordinatorOutcome<T::Listener> {
        // Running instances never share themselves with a test run.
        if request.exclusive_test_run {
            return CoordinatorOutcome::Failed(MonarchError::TestModeConflict {
                product: self.product.name.clone(),
            });
        }

        let mut warning = StartupWarning::new();
        if !request.wait {
            let notice = self.startup_notice.clone();
            let handle = self.handle.clone();
            warning.arm(self.warning_threshold, move || notice.peer_not_responding(&handle));
        }

        if self.platform.requires_foreground_grant() {
            match channel.get_main_process_id().await {
                Ok(pid) => {
                    if let Err(e) = self.platform.allow_set_foreground(pid) {
                        debug!("Foreground grant for {} failed: {}", pid, e);
                    }
                }
                Err(e) => debug!("Could not query main process id: {}", e),
            }
        }

        let sent = channel.start(&request.start).await;
        warning.disarm();

        match sent {
            Ok(()) => {
                info!("Forwarded launch to running instance at {}", self.handle);
                CoordinatorOutcome::ForwardedToExisting
            }
            Err(e) => CoordinatorOutcome::Failed(e),
        }
    }
}
