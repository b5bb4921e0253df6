//! Seam between a tenant server and the client-facing wire transport.
//!
//! The transport itself (stdio framing, HTTP, auth) lives outside this
//! crate.  A [`TransportHost`] receives a [`TransportBinding`] when a
//! server starts and is told to let go of it when the server stops.
//! Bindings are keyed by the server's instance id: one tenant may have
//! several live servers.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use bs_domain::config::{TransportConfig, TransportKind};
use bs_domain::{ServerCapabilities, TenantContext};

use crate::envelope::ToolEnvelope;
use crate::registry::RegistryError;
use crate::tenant::{ResourceContents, TenantServer};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    /// Not exposed to clients.
    None,
    Stdio,
    Http {
        host: String,
        /// `None` lets the transport pick one.
        port: Option<u16>,
        token: Option<String>,
    },
}

impl TransportMode {
    pub fn from_config(cfg: &TransportConfig) -> Self {
        match cfg.mode {
            TransportKind::None => TransportMode::None,
            TransportKind::Stdio => TransportMode::Stdio,
            TransportKind::Http => TransportMode::Http {
                host: cfg.host.clone(),
                port: cfg.port,
                token: cfg.token.clone(),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportMode::None => "none",
            TransportMode::Stdio => "stdio",
            TransportMode::Http { .. } => "http",
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            TransportMode::Http { token, .. } => token.as_deref(),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Binding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Callback surface a transport uses to serve client requests.
#[derive(Clone)]
pub struct ToolInvoker {
    server: TenantServer,
}

impl ToolInvoker {
    pub(crate) fn new(server: TenantServer) -> Self {
        Self { server }
    }

    /// Run a tool.  Never fails; errors come back as failure envelopes.
    pub async fn invoke(&self, tool: &str, args: Value) -> ToolEnvelope {
        self.server.invoke(tool, args).await
    }

    pub fn render_prompt(
        &self,
        name: &str,
        args: &HashMap<String, String>,
    ) -> Result<String, RegistryError> {
        self.server.render_prompt(name, args)
    }

    pub fn read_resource(&self, uri: &str) -> Option<ResourceContents> {
        self.server.read_resource(uri)
    }

    /// Current snapshot (may have grown since the binding was made).
    pub fn capabilities(&self) -> ServerCapabilities {
        self.server.capabilities()
    }
}

/// What a transport gets when a server starts.
#[derive(Clone)]
pub struct TransportBinding {
    /// Opaque id of the server instance; `detach` receives the same id.
    pub instance_id: String,
    pub mode: TransportMode,
    pub tenant: TenantContext,
    pub capabilities: ServerCapabilities,
    pub invoker: ToolInvoker,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not supported: {0}")]
    Unsupported(String),
    #[error("transport bind failed: {0}")]
    Bind(String),
}

/// Exposes tenant servers to clients.
#[async_trait::async_trait]
pub trait TransportHost: Send + Sync {
    /// Start serving a binding.  Returns the client-facing address, if any.
    async fn attach(&self, binding: TransportBinding) -> Result<Option<String>, TransportError>;

    /// Stop serving the binding made for `instance_id`.
    async fn detach(&self, instance_id: &str);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AnnounceTransport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default host: announces the capability surface as a structured log
// event and reports the address a wire transport would listen on.

#[derive(Default)]
pub struct AnnounceTransport {
    /// instance id → tenant label
    attached: Mutex<HashMap<String, String>>,
}

impl AnnounceTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live bindings for a tenant label (`"general"` for none).
    pub fn attached(&self, tenant_label: &str) -> usize {
        self.attached
            .lock()
            .values()
            .filter(|label| label.as_str() == tenant_label)
            .count()
    }
}

pub fn http_address(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("http://{host}:{port}"),
        None => format!("http://{host}:<auto>"),
    }
}

#[async_trait::async_trait]
impl TransportHost for AnnounceTransport {
    async fn attach(&self, binding: TransportBinding) -> Result<Option<String>, TransportError> {
        let address = match &binding.mode {
            TransportMode::Http { host, port, .. } => Some(http_address(host, *port)),
            TransportMode::None | TransportMode::Stdio => None,
        };

        let caps = &binding.capabilities;
        tracing::info!(
            instance_id = %binding.instance_id,
            tenant = %binding.tenant,
            transport = binding.mode.kind(),
            address = address.as_deref().unwrap_or("-"),
            protocol_version = %caps.protocol_version,
            tools = ?caps.tool_names(),
            resources = caps.resources.len(),
            resource_templates = caps.resource_templates.len(),
            prompts = caps.prompts.len(),
            "tenant server capabilities"
        );

        self.attached
            .lock()
            .insert(binding.instance_id, binding.tenant.label().to_string());
        Ok(address)
    }

    async fn detach(&self, instance_id: &str) {
        match self.attached.lock().remove(instance_id) {
            Some(tenant) => {
                tracing::debug!(instance_id = %instance_id, tenant = %tenant, "tenant server detached")
            }
            None => tracing::debug!(instance_id = %instance_id, "detach for unknown binding"),
        }
    }
}
