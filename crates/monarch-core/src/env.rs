//! Environment handed to a process that has just become the primary.

use crate::config::EnvConfig;
use crate::ipc::InstanceHandle;
use std::collections::BTreeMap;

/// Variables to set on the new primary.
///
/// `MONARCH_PID` and `MONARCH_IPC_HOOK` describe this process. Locale and log
/// settings are copied from `source` as-is, never recomputed.
pub fn primary_environment<K, V>(
    handle: &InstanceHandle,
    source: impl IntoIterator<Item = (K, V)>,
) -> BTreeMap<String, String>
where
    K: AsRef<str>,
    V: Into<String>,
{
    let mut env = BTreeMap::new();
    env.insert(EnvConfig::PID.to_string(), std::process::id().to_string());
    env.insert(EnvConfig::IPC_HOOK.to_string(), handle.to_string());

    for (key, value) in source {
        let key = key.as_ref();
        if key == EnvConfig::NLS_CONFIG || key == EnvConfig::LOGS {
            env.insert(key.to_string(), value.into());
        }
    }
    env
}
