//! Messages exchanged over the launch channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// JSON-RPC method names of the launch channel.
pub struct LaunchMethod;

impl LaunchMethod {
    pub const GET_MAIN_PROCESS_ID: &'static str = "getMainProcessId";
    pub const GET_MAIN_PROCESS_INFO: &'static str = "getMainProcessInfo";
    pub const START: &'static str = "start";
}

/// One open top-level window of the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub pid: u32,
    pub title: String,
}

/// Main process id and window list of the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainProcessInfo {
    pub main_pid: u32,
    pub windows: Vec<WindowInfo>,
}

impl MainProcessInfo {
    /// Title of the window hosted by `pid`, if any.
    pub fn window_title(&self, pid: u32) -> Option<&str> {
        self.windows
            .iter()
            .find(|w| w.pid == pid)
            .map(|w| w.title.as_str())
    }
}

/// Arguments and environment of a later launch, forwarded to the primary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl StartRequest {
    pub fn new<A, K, V>(args: A, env: impl IntoIterator<Item = (K, V)>) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            env: env.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Capture this process's arguments (minus the program name) and environment.
    pub fn from_current_process() -> Self {
        Self::new(
            std::env::args_os()
                .skip(1)
                .map(|a| a.to_string_lossy().into_owned()),
            std::env::vars_os().map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.to_string_lossy().into_owned(),
                )
            }),
        )
    }
}
