//! Monarch Core - single-instance coordination for desktop applications.
//!
//! At most one primary process runs per user session. Every later launch
//! either forwards its arguments and environment to that primary and exits,
//! or, in diagnostic mode, prints a report of the primary's process tree.
//!
//! # Example
//!
//! ```rust,ignore
//! use monarch_core::{
//!     Coordinator, CoordinateRequest, CoordinatorOutcome, HostPlatform, InstanceHandle,
//!     LocalTransport, StartRequest, SysinfoCollector,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = InstanceHandle::for_user_data_dir("/home/me/.monarch".as_ref(), "1.0.0");
//!     let coordinator = Coordinator::new(
//!         handle,
//!         LocalTransport,
//!         Arc::new(HostPlatform),
//!         Arc::new(SysinfoCollector::new()),
//!     );
//!
//!     let request = CoordinateRequest {
//!         start: StartRequest::from_current_process(),
//!         ..Default::default()
//!     };
//!     match coordinator.coordinate(&request).await {
//!         CoordinatorOutcome::Primary(listener) => { /* serve the launch channel */ }
//!         CoordinatorOutcome::ForwardedToExisting | CoordinatorOutcome::DiagnosticPrinted => {}
//!         CoordinatorOutcome::Failed(e) => eprintln!("{}", e),
//!     }
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod ipc;
pub mod launch;
pub mod platform;
pub mod startup_warning;

// Re-export commonly used types
pub use coordinator::{
    CoordinateRequest, Coordinator, CoordinatorOutcome, LogStartupNotice, ReportSink,
    StartupNotice, StdoutSink,
};
pub use diagnostics::{
    ProcessItem, ProcessTreeCollector, ProductInfo, ReportFormatter, SysinfoCollector,
    SystemSnapshot,
};
pub use env::primary_environment;
pub use error::{MonarchError, Result};
pub use ipc::{
    EndpointId, EndpointListener, InstanceHandle, IpcServer, IpcServerHandle, LocalListener, LocalTransport,
    Transport,
};
pub use launch::{
    LaunchChannel, LaunchDispatcher, LaunchService, MainProcessInfo, StartRequest, WindowInfo,
};
pub use platform::{HostPlatform, Platform};
pub use startup_warning::StartupWarning;
