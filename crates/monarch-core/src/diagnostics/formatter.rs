//! Human-readable process report printed by `--status`.
//!
//! [`ReportFormatter::format`] is pure: the host snapshot is captured once up
//! front, so the same `(info, tree)` always renders byte-identical text.

use super::collector::ProcessItem;
use super::virtualization;
use crate::launch::MainProcessInfo;
use crate::platform::Platform;
use std::fmt::Write as _;
use sysinfo::System;

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = MB * 1024.0;

/// Marker on the command line of window-hosting child processes.
const WINDOW_PROCESS_MARKER: &str = "--type=window";

/// Identity of the running product, shown in the report header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub name: String,
    pub application_name: String,
    pub version: String,
    pub commit: Option<String>,
    pub date: Option<String>,
}

impl ProductInfo {
    /// Product info for this build.
    pub fn current() -> Self {
        Self {
            name: crate::config::AppConfig::PRODUCT_NAME.to_string(),
            application_name: crate::config::AppConfig::APPLICATION_NAME.to_string(),
            version: crate::config::AppConfig::PRODUCT_VERSION.to_string(),
            commit: option_env!("MONARCH_COMMIT").map(str::to_string),
            date: option_env!("MONARCH_BUILD_DATE").map(str::to_string),
        }
    }
}

/// Host facts captured once per report.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemSnapshot {
    pub os_type: String,
    pub arch: String,
    pub os_release: String,
    pub cpu_model: String,
    pub cpu_speed_mhz: u64,
    pub cpu_count: usize,
    /// Bytes.
    pub total_memory: u64,
    /// Bytes.
    pub free_memory: u64,
    /// 1, 5 and 15 minute averages; `None` where the OS has none.
    pub load_average: Option<[f64; 3]>,
    /// 0.0-1.0
    pub virtualization_likelihood: f64,
    pub screen_reader: bool,
}

impl SystemSnapshot {
    /// Read the current host state.
    pub fn capture(platform: &dyn Platform, screen_reader: bool) -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        let (cpu_model, cpu_speed_mhz) = system
            .cpus()
            .first()
            .map(|cpu| (cpu.brand().trim().to_string(), cpu.frequency()))
            .unwrap_or_else(|| ("unknown".to_string(), 0));

        let load_average = platform.exposes_load_average().then(|| {
            let load = System::load_average();
            [load.one, load.five, load.fifteen]
        });

        Self {
            os_type: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            arch: std::env::consts::ARCH.to_string(),
            os_release: System::kernel_version().unwrap_or_default(),
            cpu_model,
            cpu_speed_mhz,
            cpu_count: system.cpus().len(),
            total_memory: system.total_memory(),
            free_memory: system.free_memory(),
            load_average,
            virtualization_likelihood: virtualization::virtual_machine_likelihood(),
            screen_reader,
        }
    }
}

/// Renders the header block and process table.
#[derive(Debug, Clone)]
pub struct ReportFormatter {
    product: ProductInfo,
    system: SystemSnapshot,
}

impl ReportFormatter {
    pub fn new(product: ProductInfo, system: SystemSnapshot) -> Self {
        Self { product, system }
    }

    pub fn format(&self, info: &MainProcessInfo, tree: &ProcessItem) -> String {
        let mut out = String::new();
        self.write_header(&mut out);
        out.push('\n');
        out.push_str("CPU %\tMem MB\t   PID\tProcess\n");
        self.write_rows(&mut out, info, tree, 0);
        out
    }

    fn write_header(&self, out: &mut String) {
        let product = &self.product;
        let system = &self.system;

        let _ = writeln!(
            out,
            "Version:          {} {} ({}, {})",
            product.name,
            product.version,
            product.commit.as_deref().unwrap_or("Commit unknown"),
            product.date.as_deref().unwrap_or("Date unknown"),
        );
        let _ = writeln!(
            out,
            "OS Version:       {} {} {}",
            system.os_type, system.arch, system.os_release
        );
        let _ = writeln!(
            out,
            "CPUs:             {} ({} x {})",
            system.cpu_model, system.cpu_count, system.cpu_speed_mhz
        );
        let _ = writeln!(
            out,
            "Memory (System):  {:.2}GB ({:.2}GB free)",
            system.total_memory as f64 / GB,
            system.free_memory as f64 / GB
        );
        if let Some(load) = system.load_average {
            let _ = writeln!(
                out,
                "Load (avg):       {}",
                load.iter()
                    .map(|value| format!("{}", value.round()))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        let _ = writeln!(
            out,
            "VM:               {}%",
            (system.virtualization_likelihood * 100.0).round()
        );
        let _ = writeln!(
            out,
            "Screen Reader:    {}",
            if system.screen_reader { "yes" } else { "no" }
        );
    }

    fn write_rows(&self, out: &mut String, info: &MainProcessInfo, item: &ProcessItem, depth: usize) {
        let name = if depth == 0 {
            format!("{} main", self.product.application_name)
        } else {
            display_name(info, item)
        };
        let mem_mb = (self.system.total_memory as f64 * (item.mem_percent / 100.0) / MB).round();

        let _ = writeln!(
            out,
            "{:>5}\t{:>6}\t{:>6}\t{}{}",
            item.cpu_load_percent.round(),
            mem_mb,
            item.pid,
            "  ".repeat(depth),
            name
        );

        for child in &item.children {
            self.write_rows(out, info, child, depth + 1);
        }
    }
}

fn is_window_process(item: &ProcessItem) -> bool {
    item.name.contains(WINDOW_PROCESS_MARKER) || item.cmd.contains(WINDOW_PROCESS_MARKER)
}

fn display_name(info: &MainProcessInfo, item: &ProcessItem) -> String {
    if !is_window_process(item) {
        return item.name.clone();
    }
    match info.window_title(item.pid) {
        Some(title) => format!("window ({})", title),
        None => "window".to_string(),
    }
}
