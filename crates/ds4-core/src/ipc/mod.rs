//! IPC module - local socket service and client.

pub mod bridge;
pub mod client;

pub use bridge::{IpcBridge, IpcError, Served};
pub use client::IpcClient;
