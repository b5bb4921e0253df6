//! `bs-domain`: shared types for the BrainSlot tenant host.
//!
//! Everything here is plain data: tenant identity, the capability shapes
//! exchanged with transports and providers, configuration, and the shared
//! error type.  Runtime behaviour lives in `bs-mcp-bridge`, `bs-server`
//! and `bs-spawner`.

pub mod capability;
pub mod config;
pub mod error;
pub mod tenant;

pub use capability::{
    CapabilitySnapshot, PromptArg, PromptDescriptor, ResourceDescriptor, ResourceTemplate,
    ServerCapabilities, TemplateParameter, ToolDescriptor,
};
pub use error::{Error, Result};
pub use tenant::TenantContext;
