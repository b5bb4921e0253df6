//! `bs-server`: per-tenant tool server.
//!
//! A [`TenantServer`] binds one [`Registry`] of tools, resources and
//! prompts to one tenant, and hands an immutable capability snapshot plus
//! a [`ToolInvoker`] to whatever [`TransportHost`] exposes it to clients.
//!
//! ```rust,no_run
//! use bs_server::{catalog, AnnounceTransport, TenantServer, TransportMode};
//! use bs_domain::TenantContext;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let server = TenantServer::new(
//!     TenantContext::for_tenant("acme", ".data/entities/acme"),
//!     "2025-06-18",
//!     Arc::new(AnnounceTransport::default()),
//! );
//! catalog::install(&server)?;
//! server.start(TransportMode::None).await?;
//! let envelope = server.invoke("bs.create_dataset", serde_json::json!({ "name": "docs" })).await;
//! assert!(!envelope.is_error);
//! # Ok(()) }
//! ```

pub mod catalog;
pub mod envelope;
pub mod registry;
pub mod tenant;
pub mod transport;
pub mod types;

pub use envelope::ToolEnvelope;
pub use registry::{
    handler_fn, PromptTemplate, Registry, RegistryError, ToolDefinition, ToolHandler,
};
pub use tenant::{ResourceContents, ServerError, TenantServer};
pub use transport::{
    AnnounceTransport, ToolInvoker, TransportBinding, TransportError, TransportHost,
    TransportMode,
};
pub use types::{ToolContext, ToolError, ToolResult};
