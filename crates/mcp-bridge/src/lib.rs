//! `bs-mcp-bridge`: supervised stdio JSON-RPC bridge to an external provider.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for the provider dialect.
//! - A line codec that separates protocol frames from log noise.
//! - A request correlator that matches responses to callers by id.
//! - [`ProcessBridge`], which owns one provider child process and drives
//!   it through handshake, calls and shutdown.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bs_mcp_bridge::ProcessBridge;
//!
//! let bridge = ProcessBridge::new(config.provider.clone(), tenant);
//! let snapshot = bridge.start().await?;
//! let text = bridge.call("extraer_info_web", json!({ "url": "https://example.com" })).await?;
//! bridge.stop().await;
//! ```

pub mod bridge;
pub mod codec;
pub mod correlator;
pub mod error;
pub mod protocol;
pub mod state;

pub use bridge::ProcessBridge;
pub use codec::{DiagnosticSink, Frame, FrameReader, FrameWriter, TracingDiagnostics};
pub use correlator::{CloseReason, Correlator};
pub use error::BridgeError;
pub use protocol::JsonRpcError;
pub use state::BridgeState;
