//! Launch channel: the fixed RPC surface between a secondary launch and the
//! primary instance.
//!
//! Three operations, carried as JSON-RPC over one IPC connection:
//! - `getMainProcessId` - the primary's own process id
//! - `getMainProcessInfo` - process id plus open windows
//! - `start` - forward argv and environment to the primary

mod channel;
mod service;
mod types;

pub use channel::LaunchChannel;
pub use service::{LaunchDispatcher, LaunchService, LaunchSession};
pub use types::{LaunchMethod, MainProcessInfo, StartRequest, WindowInfo};
