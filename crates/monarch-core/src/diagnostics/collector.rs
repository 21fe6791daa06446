//! Process tree collection for the diagnostic report.
//!
//! The coordinator only needs [`ProcessTreeCollector`]; [`SysinfoCollector`]
//! is the host implementation. Tree assembly is a pure function over
//! [`ProcessSample`]s so it can be tested without a live process table.

use crate::{MonarchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

/// One process and its descendants, rooted at the primary's main process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessItem {
    pub pid: u32,
    pub name: String,
    /// Full command line, space-joined.
    pub cmd: String,
    pub cpu_load_percent: f64,
    /// Share of total system memory, 0-100.
    pub mem_percent: f64,
    pub children: Vec<ProcessItem>,
}

/// Flat per-process sample used to assemble a [`ProcessItem`] tree.
#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
    pub cmd: String,
    pub cpu_usage: f32,
    pub memory_bytes: u64,
}

/// Collects the process tree below a root process.
#[async_trait::async_trait]
pub trait ProcessTreeCollector: Send + Sync {
    async fn collect(&self, root_pid: u32) -> Result<ProcessItem>;
}

/// Assemble the tree rooted at `root_pid`. Children are ordered by pid.
///
/// Returns `None` when `root_pid` is not among the samples.
pub fn build_process_tree(
    samples: &[ProcessSample],
    root_pid: u32,
    total_memory: u64,
) -> Option<ProcessItem> {
    let by_pid: HashMap<u32, &ProcessSample> = samples.iter().map(|s| (s.pid, s)).collect();
    let mut children_of: HashMap<u32, Vec<u32>> = HashMap::new();
    for sample in samples {
        if let Some(parent) = sample.parent {
            if parent != sample.pid {
                children_of.entry(parent).or_default().push(sample.pid);
            }
        }
    }
    for children in children_of.values_mut() {
        children.sort_unstable();
    }

    let mut visited = HashSet::new();
    build_node(root_pid, &by_pid, &children_of, total_memory, &mut visited)
}

fn build_node(
    pid: u32,
    by_pid: &HashMap<u32, &ProcessSample>,
    children_of: &HashMap<u32, Vec<u32>>,
    total_memory: u64,
    visited: &mut HashSet<u32>,
) -> Option<ProcessItem> {
    // pid reuse can make the parent table cyclic
    if !visited.insert(pid) {
        return None;
    }
    let sample = by_pid.get(&pid)?;

    let children = children_of
        .get(&pid)
        .map(|pids| {
            pids.iter()
                .filter_map(|child| build_node(*child, by_pid, children_of, total_memory, visited))
                .collect()
        })
        .unwrap_or_default();

    let mem_percent = if total_memory > 0 {
        sample.memory_bytes as f64 / total_memory as f64 * 100.0
    } else {
        0.0
    };

    Some(ProcessItem {
        pid,
        name: sample.name.clone(),
        cmd: sample.cmd.clone(),
        cpu_load_percent: f64::from(sample.cpu_usage),
        mem_percent,
        children,
    })
}

/// Collects the tree from the host process table via sysinfo.
#[derive(Debug, Clone)]
pub struct SysinfoCollector {
    sample_interval: Duration,
}

impl SysinfoCollector {
    pub fn new() -> Self {
        Self {
            sample_interval: sysinfo::MINIMUM_CPU_UPDATE_INTERVAL,
        }
    }

    fn sample(sample_interval: Duration) -> (Vec<ProcessSample>, u64) {
        let refresh_kind = ProcessRefreshKind::new()
            .with_cpu()
            .with_memory()
            .with_cmd(UpdateKind::OnlyIfNotSet);

        let mut system = System::new();
        system.refresh_memory();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind);
        // CPU usage is a delta between two refreshes
        std::thread::sleep(sample_interval);
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind);

        let samples = system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessSample {
                pid: pid.as_u32(),
                parent: process.parent().map(Pid::as_u32),
                name: process.name().to_string_lossy().into_owned(),
                cmd: process
                    .cmd()
                    .iter()
                    .map(|part| part.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" "),
                cpu_usage: process.cpu_usage(),
                memory_bytes: process.memory(),
            })
            .collect();

        (samples, system.total_memory())
    }
}

impl Default for SysinfoCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProcessTreeCollector for SysinfoCollector {
    async fn collect(&self, root_pid: u32) -> Result<ProcessItem> {
        let interval = self.sample_interval;
        let (samples, total_memory) = tokio::task::spawn_blocking(move || Self::sample(interval))
            .await
            .map_err(|e| MonarchError::Other(format!("Process sampling failed: {}", e)))?;

        debug!("Sampled {} processes for tree rooted at {}", samples.len(), root_pid);

        build_process_tree(&samples, root_pid, total_memory)
            .ok_or(MonarchError::ProcessNotFound { pid: root_pid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pid: u32, parent: Option<u32>, name: &str, memory_bytes: u64) -> ProcessSample {
        ProcessSample {
            pid,
            parent,
            name: name.to_string(),
            cmd: format!("/usr/bin/{}", name),
            cpu_usage: 1.5,
            memory_bytes,
        }
    }

    #[test]
    fn test_build_tree_orders_children_by_pid() {
        let samples = vec![
            sample(1, None, "init", 0),
            sample(100, Some(1), "monarch", 200),
            sample(130, Some(100), "helper", 100),
            sample(110, Some(100), "window", 100),
            sample(111, Some(110), "gpu", 50),
            sample(200, Some(1), "unrelated", 10),
        ];

        let tree = build_process_tree(&samples, 100, 1000).unwrap();

        assert_eq!(tree.pid, 100);
        assert_eq!(tree.mem_percent, 20.0);
        let child_pids: Vec<u32> = tree.children.iter().map(|c| c.pid).collect();
        assert_eq!(child_pids, vec![110, 130]);
        assert_eq!(tree.children[0].children[0].pid, 111);
        assert!(tree.children[1].children.is_empty());
    }

    #[test]
    fn test_build_tree_missing_root() {
        let samples = vec![sample(1, None, "init", 0)];
        assert!(build_process_tree(&samples, 99, 1000).is_none());
    }

    #[test]
    fn test_build_tree_survives_parent_cycles() {
        let samples = vec![sample(5, Some(6), "a", 0), sample(6, Some(5), "b", 0)];

        let tree = build_process_tree(&samples, 5, 0).unwrap();
        assert_eq!(tree.children.len(), 1);
        assert!(tree.children[0].children.is_empty());
        assert_eq!(tree.mem_percent, 0.0);
    }

    #[tokio::test]
    async fn test_sysinfo_collector_finds_current_process() {
        let collector = SysinfoCollector::new();
        let tree = collector.collect(std::process::id()).await.unwrap();

        assert_eq!(tree.pid, std::process::id());
        assert!(tree.mem_percent >= 0.0);
    }

    #[tokio::test]
    async fn test_sysinfo_collector_unknown_pid() {
        let collector = SysinfoCollector::new();
        let result = collector.collect(999_999_999).await;
        assert!(matches!(result, Err(MonarchError::ProcessNotFound { pid: 999_999_999 })));
    }
}
