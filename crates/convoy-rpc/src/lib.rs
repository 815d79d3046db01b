// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! JSON-RPC 2.0 framing over subprocess stdio.
//!
//! One JSON object per newline on the child's stdin/stdout.  A writer half
//! serializes requests with monotonically increasing integer ids; a reader
//! task demultiplexes responses by id and routes server-initiated
//! notifications to a sink channel.  Each request carries its own timeout;
//! a timeout resolves only that request and leaves the connection open.
mod transport;
mod wire;

pub use transport::{SpawnSpec, StdioTransport, RPC_GRACE_PERIOD};
pub use wire::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, CODE_INTERNAL_ERROR,
    CODE_METHOD_NOT_FOUND,
};

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize an outgoing frame.
    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The subprocess closed its end of the pipe; all in-flight requests fail.
    #[error("transport closed")]
    TransportClosed,

    /// One request exceeded its deadline; the connection stays open.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// JSON-RPC error response from the server.
    #[error("{0}")]
    Remote(#[from] JsonRpcError),
}
