//! Primary side of the launch channel.

use super::types::{LaunchMethod, MainProcessInfo, StartRequest};
use crate::ipc::IpcDispatch;
use crate::{MonarchError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// What the primary application exposes to later launches.
#[async_trait::async_trait]
pub trait LaunchService: Send + Sync + 'static {
    /// Process id of the primary's main process.
    fn main_process_id(&self) -> u32 {
        std::process::id()
    }

    /// Main process id and open windows. Must not wait on user interaction.
    async fn main_process_info(&self) -> Result<MainProcessInfo>;

    /// Act on a forwarded launch (open windows, files, ...).
    async fn start(&self, request: StartRequest) -> Result<()>;
}

/// Per-connection launch state.
#[derive(Debug, Default)]
pub struct LaunchSession {
    start_delivered: bool,
}

/// Routes launch channel calls to a [`LaunchService`].
///
/// Each connection may deliver at most one `start` request; a second one is
/// rejected without reaching the service.
pub struct LaunchDispatcher<T> {
    service: Arc<T>,
}

impl<T: LaunchService> LaunchDispatcher<T> {
    pub fn new(service: Arc<T>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl<T: LaunchService> IpcDispatch for LaunchDispatcher<T> {
    type Session = LaunchSession;

    async fn dispatch(
        &self,
        session: &mut LaunchSession,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, MonarchError> {
        match method {
            LaunchMethod::GET_MAIN_PROCESS_ID => Ok(serde_json::json!(self.service.main_process_id())),
            LaunchMethod::GET_MAIN_PROCESS_INFO => {
                let info = self.service.main_process_info().await?;
                Ok(serde_json::to_value(info)?)
            }
            LaunchMethod::START => {
                if session.start_delivered {
                    return Err(MonarchError::Validation {
                        field: "start".to_string(),
                        message: "start was already delivered on this connection".to_string(),
                    });
                }
                let request: StartRequest =
                    serde_json::from_value(params).map_err(|e| MonarchError::InvalidParams {
                        message: format!("Invalid start request: {}", e),
                    })?;
                session.start_delivered = true;
                info!("Received start request with {} argument(s)", request.args.len());
                debug!("Forwarded args: {:?}", request.args);
                self.service.start(request).await?;
                Ok(serde_json::json!(true))
            }
            _ => Err(MonarchError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }
}
