//! Read-only process report for diagnostic (`--status`) launches.

mod collector;
mod formatter;
mod virtualization;

pub use collector::{
    build_process_tree, ProcessItem, ProcessSample, ProcessTreeCollector, SysinfoCollector,
};
pub use formatter::{ProductInfo, ReportFormatter, SystemSnapshot};
pub use virtualization::{likelihood_from_macs, virtual_machine_likelihood};
