//! The primary's side of the launch channel.
//!
//! One accept loop owns the listener; every connection runs as a task in a
//! [`JoinSet`] owned by that loop, so stopping the loop also tears down every
//! open connection before the listener is released.

use super::transport::{EndpointListener, InstanceHandle, IpcStream};
use super::wire::{Call, FramedStream, Reply, RpcCode};
use crate::config::IpcConfig;
use crate::{MonarchError, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Routes calls to the primary's handlers.
#[async_trait::async_trait]
pub trait IpcDispatch: Send + Sync + 'static {
    /// Per-connection state, created when a connection is accepted.
    type Session: Send + Default;

    async fn dispatch(
        &self,
        session: &mut Self::Session,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, MonarchError>;
}

/// A running server. Dropping it aborts the server without waiting.
pub struct IpcServerHandle {
    handle: InstanceHandle,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl IpcServerHandle {
    pub fn handle(&self) -> &InstanceHandle {
        &self.handle
    }

    /// Stop accepting, close open connections and wait until the listener
    /// is released.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Launch server task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for IpcServerHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct IpcServer;

impl IpcServer {
    /// Serve `dispatch` on an already bound listener, in the background.
    pub fn start<L, D>(listener: L, dispatch: Arc<D>) -> IpcServerHandle
    where
        L: EndpointListener,
        D: IpcDispatch,
    {
        let handle = listener.handle().clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        info!("Serving launch channel on {}", handle);

        IpcServerHandle {
            handle,
            stop_tx,
            task: Some(tokio::spawn(serve(listener, dispatch, stop_rx))),
        }
    }
}

async fn serve<L: EndpointListener, D: IpcDispatch>(
    mut listener: L,
    dispatch: Arc<D>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        let stream = tokio::select! {
            _ = stop_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Accept on {} failed: {}", listener.handle(), e);
                    continue;
                }
            },
        };

        while connections.try_join_next().is_some() {}
        if connections.len() >= IpcConfig::MAX_IPC_CONNECTIONS {
            warn!(
                "Dropping launch connection, {} already open",
                IpcConfig::MAX_IPC_CONNECTIONS
            );
            continue;
        }

        let dispatch = dispatch.clone();
        connections.spawn(async move {
            if let Err(e) = serve_connection(stream, &*dispatch).await {
                debug!("Launch connection closed with error: {}", e);
            }
        });
    }

    connections.shutdown().await;
    debug!("Launch server on {} stopped", listener.handle());
}

/// Answer calls in order until the peer hangs up.
async fn serve_connection<S: IpcStream, D: IpcDispatch>(stream: S, dispatch: &D) -> Result<()> {
    let mut framed = FramedStream::new(stream);
    let mut session = D::Session::default();

    while let Some(frame) = framed.recv().await? {
        let reply = answer(dispatch, &mut session, &frame).await;
        framed.send(&reply).await?;
    }
    Ok(())
}

async fn answer<D: IpcDispatch>(dispatch: &D, session: &mut D::Session, frame: &[u8]) -> Reply {
    let call: Call = match serde_json::from_slice(frame) {
        Ok(call) => call,
        Err(e) => return unreadable(frame, &e),
    };

    match dispatch.dispatch(session, &call.method, call.params).await {
        Ok(result) => Reply::ok(call.id, result),
        Err(e) => {
            debug!("{} failed: {}", call.method, e);
            Reply::from_error(call.id, &e)
        }
    }
}

/// Well-formed JSON that is not a call gets `INVALID_REQUEST` and its id if
/// one can be read; anything else is a parse error.
fn unreadable(frame: &[u8], err: &serde_json::Error) -> Reply {
    match serde_json::from_slice::<Value>(frame) {
        Ok(value) => Reply::fault(
            value.get("id").and_then(Value::as_u64),
            RpcCode::INVALID_REQUEST,
            format!("Invalid request: {}", err),
        ),
        Err(_) => Reply::fault(None, RpcCode::PARSE_ERROR, format!("Parse error: {}", err)),
    }
}
