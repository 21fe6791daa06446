//! The launching process's connection to the primary.
//!
//! Calls are strictly one at a time: the stream sits behind a tokio `Mutex`
//! held from sending a call until its reply has been read.

use super::transport::{InstanceHandle, IpcStream};
use super::wire::{Call, FramedStream, Reply};
use crate::{MonarchError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct IpcClient<S> {
    framed: Mutex<FramedStream<S>>,
    endpoint: InstanceHandle,
    next_id: AtomicU64,
}

impl<S: IpcStream> IpcClient<S> {
    pub fn new(stream: S, endpoint: InstanceHandle) -> Self {
        debug!("Connected to running instance at {}", endpoint);
        Self {
            framed: Mutex::new(FramedStream::new(stream)),
            endpoint,
            next_id: AtomicU64::new(1),
        }
    }

    /// Send one call and wait for its reply.
    ///
    /// # Errors
    /// - `PeerLost` when the connection breaks or closes mid-call
    /// - `Validation` when the call is too large to send, or the reply is
    ///   too large or answers a different id
    /// - `Rpc` when the primary answers with an error
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut framed = self.framed.lock().await;

        framed
            .send(&Call::new(id, method, params))
            .await
            .map_err(|e| self.lost_on_io(e))?;

        let frame = framed
            .recv()
            .await
            .map_err(|e| self.lost_on_io(e))?
            .ok_or_else(|| self.peer_lost())?;
        drop(framed);

        let reply: Reply = serde_json::from_slice(&frame)?;
        if reply.id.is_some_and(|answered| answered != id) {
            return Err(MonarchError::Validation {
                field: "id".to_string(),
                message: format!("reply to call {} answered {:?}", id, reply.id),
            });
        }
        reply.into_result()
    }

    /// Close our side of the connection.
    pub async fn close(self) -> Result<()> {
        self.framed.into_inner().close().await?;
        debug!("Disconnected from {}", self.endpoint);
        Ok(())
    }

    /// I/O failures mean the peer is gone; local rejections pass through.
    fn lost_on_io(&self, err: MonarchError) -> MonarchError {
        match err {
            MonarchError::Io(_) => self.peer_lost(),
            other => other,
        }
    }

    fn peer_lost(&self) -> MonarchError {
        MonarchError::PeerLost {
            endpoint: self.endpoint.to_string(),
        }
    }
}
