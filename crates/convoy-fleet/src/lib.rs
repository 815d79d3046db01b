// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Subprocess fleet supervisor.
//!
//! Each configured server is a child process speaking newline-delimited
//! JSON-RPC 2.0 on its stdio.  [`ManagedServer`] owns one process and its
//! capability snapshot; [`ServerManager`] owns the fleet, the aggregated
//! tool catalog and parallel dispatch, and implements the engine's
//! [`convoy_core::ToolBroker`] port.
mod content;
mod manager;
mod server;

pub use content::{render_fragments, RawInvocation};
pub use manager::{ExecuteError, ServerManager, ServerStatusEntry, CATALOG_TTL};
pub use server::{ConnectError, ManagedServer, ServerStatus};
