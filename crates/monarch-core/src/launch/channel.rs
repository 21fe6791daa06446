//! Secondary side of the launch channel.

use super::types::{LaunchMethod, MainProcessInfo, StartRequest};
use crate::ipc::{InstanceHandle, IpcClient, IpcStream};
use crate::{MonarchError, Result};

/// Typed launch channel calls over one connection to the primary.
#[derive(Debug)]
pub struct LaunchChannel<S> {
    client: IpcClient<S>,
}

impl<S: IpcStream> LaunchChannel<S> {
    pub fn new(stream: S, endpoint: InstanceHandle) -> Self {
        Self {
            client: IpcClient::new(stream, endpoint),
        }
    }

    pub async fn get_main_process_id(&self) -> Result<u32> {
        let value = self
            .client
            .call(LaunchMethod::GET_MAIN_PROCESS_ID, serde_json::json!({}))
            .await?;
        value
            .as_u64()
            .and_then(|pid| u32::try_from(pid).ok())
            .ok_or_else(|| MonarchError::Validation {
                field: "mainPid".to_string(),
                message: format!("expected a process id, got {}", value),
            })
    }

    pub async fn get_main_process_info(&self) -> Result<MainProcessInfo> {
        let value = self
            .client
            .call(LaunchMethod::GET_MAIN_PROCESS_INFO, serde_json::json!({}))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Deliver a start request and wait for the primary's acknowledgment.
    pub async fn start(&self, request: &StartRequest) -> Result<()> {
        self.client
            .call(LaunchMethod::START, serde_json::to_value(request)?)
            .await?;
        Ok(())
    }

    /// Dispose of the connection.
    pub async fn close(self) -> Result<()> {
        self.client.close().await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ipc::{IpcServer, LocalTransport, Transport};
    use crate::launch::{LaunchDispatcher, LaunchService, WindowInfo};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Primary {
        starts: Mutex<Vec<StartRequest>>,
    }

    #[async_trait::async_trait]
    impl LaunchService for Primary {
        async fn main_process_info(&self) -> Result<MainProcessInfo> {
            Ok(MainProcessInfo {
                main_pid: self.main_process_id(),
                windows: vec![WindowInfo {
                    pid: 77,
                    title: "Welcome".into(),
                }],
            })
        }

        async fn start(&self, request: StartRequest) -> Result<()> {
            self.starts.lock().unwrap().push(request);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_channel_calls_reach_primary() {
        let dir = tempfile::tempdir().unwrap();
        let handle = InstanceHandle::from_path(dir.path().join("launch.sock"));
        let primary = Arc::new(Primary::default());
        let listener = LocalTransport.bind(&handle).await.unwrap();
        let _server = IpcServer::start(listener, Arc::new(LaunchDispatcher::new(primary.clone())));

        let stream = LocalTransport.connect(&handle).await.unwrap();
        let channel = LaunchChannel::new(stream, handle);

        assert_eq!(channel.get_main_process_id().await.unwrap(), std::process::id());

        let info = channel.get_main_process_info().await.unwrap();
        assert_eq!(info.main_pid, std::process::id());
        assert_eq!(info.window_title(77), Some("Welcome"));

        let request = StartRequest::new(["--open", "/tmp/x"], [("A", "1")]);
        channel.start(&request).await.unwrap();
        assert!(matches!(
            channel.start(&request).await,
            Err(MonarchError::Rpc { .. })
        ));
        channel.close().await.unwrap();

        assert_eq!(*primary.starts.lock().unwrap(), vec![request]);
    }
}
