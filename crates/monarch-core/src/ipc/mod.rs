//! Local IPC between the primary instance and later launches.
//!
//! Length-prefixed JSON-RPC 2.0 over a named local endpoint (Unix domain
//! socket or Windows named pipe).
//!
//! # Architecture
//!
//! - **Transport**: Binds or connects the well-known instance endpoint
//! - **Server**: Runs on the primary, accepts connections, dispatches method calls
//! - **Client**: Used by a secondary to call the primary over one connection
//! - **Wire**: Frames plus the call and reply messages they carry

pub mod client;
pub mod server;
pub mod transport;
pub mod wire;

pub use client::IpcClient;
pub use wire::{Call, FramedStream, Reply, RpcCode};
pub use server::{IpcDispatch, IpcServer, IpcServerHandle};
pub use transport::{
    EndpointId, EndpointListener, InstanceHandle, IpcStream, LocalListener, LocalTransport,
    Transport,
};
