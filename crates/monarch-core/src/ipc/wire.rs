//! What travels over the instance endpoint.
//!
//! Every message is one frame: a big-endian `u32` byte count, then that many
//! bytes of JSON. Launches send a [`Call`]; the primary answers each call with
//! exactly one [`Reply`] carrying the same id.
//!
//! ```text
//! [u32 BE: len][JSON of len bytes]
//! ```

use crate::config::IpcConfig;
use crate::{MonarchError, Result};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::transport::IpcStream;

/// JSON-RPC error codes used on the launch channel.
pub struct RpcCode;

impl RpcCode {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL: i32 = -32603;
    /// A second `start` on one connection.
    pub const LAUNCH_REJECTED: i32 = -32010;
    pub const PROCESS_NOT_FOUND: i32 = -32011;
}

/// The `"jsonrpc": "2.0"` member. Any other version fails to deserialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version2;

impl Serialize for Version2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for Version2 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == "2.0" {
            Ok(Version2)
        } else {
            Err(de::Error::custom(format!(
                "unsupported jsonrpc version {:?}",
                version
            )))
        }
    }
}

/// A method call from a launching process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub jsonrpc: Version2,
    pub id: u64,
    pub method: String,
    /// Absent params read as an empty object.
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

impl Call {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Version2,
            id,
            method: method.into(),
            params,
        }
    }
}

/// Answer to one [`Call`].
///
/// `id` is `None` only when the call was unreadable and its id unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub jsonrpc: Version2,
    pub id: Option<u64>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Either a result or an error member, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(Fault),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

impl Reply {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: Version2,
            id: Some(id),
            outcome: Outcome::Result(result),
        }
    }

    pub fn fault(id: Option<u64>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Version2,
            id,
            outcome: Outcome::Error(Fault {
                code,
                message: message.into(),
            }),
        }
    }

    /// Reply for a handler error, keeping its code.
    pub fn from_error(id: u64, err: &MonarchError) -> Self {
        Self::fault(Some(id), err.to_rpc_error_code(), err.to_string())
    }

    /// The result value, or the primary's error as [`MonarchError::Rpc`].
    pub fn into_result(self) -> Result<Value> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(fault) => Err(MonarchError::Rpc {
                code: fault.code,
                message: fault.message,
            }),
        }
    }
}

/// A connection that sends and receives whole frames.
#[derive(Debug)]
pub struct FramedStream<S> {
    inner: S,
}

impl<S: IpcStream> FramedStream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Next frame payload, or `None` when the peer closed between frames.
    ///
    /// A length above the frame cap is rejected before anything is allocated.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let len = match self.inner.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        check_frame_len(len)?;

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }

    /// Serialize `message` and send it as one frame.
    ///
    /// An oversized message fails with `Validation` and nothing is written.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        check_frame_len(payload.len())?;

        self.inner.write_u32(payload.len() as u32).await?;
        self.inner.write_all(&payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close the write half so the peer sees end of stream.
    pub async fn close(mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

fn check_frame_len(len: usize) -> Result<()> {
    if len > IpcConfig::MAX_IPC_MESSAGE_SIZE {
        return Err(MonarchError::Validation {
            field: "frame".to_string(),
            message: format!(
                "{} bytes exceeds the {} byte frame limit",
                len,
                IpcConfig::MAX_IPC_MESSAGE_SIZE
            ),
        });
    }
    Ok(())
}
