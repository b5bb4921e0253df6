//! [`TenantServer`]: one registry bound to one tenant.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};

use bs_domain::{ResourceDescriptor, ResourceTemplate, ServerCapabilities, TenantContext};

use crate::envelope::ToolEnvelope;
use crate::registry::{PromptTemplate, Registry, RegistryError, ToolDefinition};
use crate::transport::{
    ToolInvoker, TransportBinding, TransportError, TransportHost, TransportMode,
};
use crate::types::{ToolContext, ToolError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Placeholder body returned for a registered resource or template match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

struct Running {
    mode: TransportMode,
    address: Option<String>,
}

struct ServerInner {
    instance_id: String,
    tenant: TenantContext,
    protocol_version: String,
    registry: RwLock<Registry>,
    transport: Arc<dyn TransportHost>,
    running: tokio::sync::Mutex<Option<Running>>,
}

/// Cheap to clone; clones share the registry and running state.
#[derive(Clone)]
pub struct TenantServer {
    inner: Arc<ServerInner>,
}

impl TenantServer {
    /// A server with a freshly generated instance id.
    pub fn new(
        tenant: TenantContext,
        protocol_version: impl Into<String>,
        transport: Arc<dyn TransportHost>,
    ) -> Self {
        let instance_id = uuid::Uuid::new_v4().simple().to_string();
        Self::with_instance_id(instance_id, tenant, protocol_version, transport)
    }

    /// A server whose transport binding is keyed by `instance_id`.
    pub fn with_instance_id(
        instance_id: impl Into<String>,
        tenant: TenantContext,
        protocol_version: impl Into<String>,
        transport: Arc<dyn TransportHost>,
    ) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                instance_id: instance_id.into(),
                tenant,
                protocol_version: protocol_version.into(),
                registry: RwLock::new(Registry::new()),
                transport,
                running: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn tenant(&self) -> &TenantContext {
        &self.inner.tenant
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    // ── Registration ───────────────────────────────────────────────

    pub fn add_tool(&self, tool: ToolDefinition) -> Result<(), RegistryError> {
        self.inner.registry.write().add_tool(tool)
    }

    pub fn replace_tool(&self, tool: ToolDefinition) -> Result<Option<ToolDefinition>, RegistryError> {
        self.inner.registry.write().replace_tool(tool)
    }

    pub fn add_prompt(&self, prompt: PromptTemplate) -> Result<(), RegistryError> {
        self.inner.registry.write().add_prompt(prompt)
    }

    pub fn add_resource(&self, resource: ResourceDescriptor) {
        self.inner.registry.write().add_resource(resource);
    }

    pub fn add_resource_template(&self, template: ResourceTemplate) {
        self.inner.registry.write().add_resource_template(template);
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn capabilities(&self) -> ServerCapabilities {
        self.inner.registry.read().snapshot(&self.inner.protocol_version)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.inner.registry.read().tool(name).is_some()
    }

    pub fn render_prompt(
        &self,
        name: &str,
        args: &HashMap<String, String>,
    ) -> Result<String, RegistryError> {
        self.inner.registry.read().render_prompt(name, args)
    }

    /// Placeholder contents for a registered resource URI, or for a URI
    /// matching one of the registered templates.
    pub fn read_resource(&self, uri: &str) -> Option<ResourceContents> {
        let registry = self.inner.registry.read();
        let tenant_id = self.inner.tenant.tenant_id();

        if let Some(res) = registry.resources().iter().find(|r| r.uri == uri) {
            let body = json!({
                "message": "Resource content placeholder",
                "uri": res.uri,
                "entityId": tenant_id,
            });
            return Some(ResourceContents {
                uri: res.uri.clone(),
                mime_type: res
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/json".into()),
                text: pretty(&body),
            });
        }

        let template = registry
            .resource_templates()
            .iter()
            .find(|t| template_matches(&t.uri_template, uri))?;
        let body = json!({
            "message": "Template resource placeholder",
            "uri": uri,
            "template": template.uri_template,
            "entityId": tenant_id,
        });
        Some(ResourceContents {
            uri: uri.to_string(),
            mime_type: "application/json".into(),
            text: pretty(&body),
        })
    }

    // ── Invocation ─────────────────────────────────────────────────

    /// Run a tool and wrap the outcome.  Never fails.
    ///
    /// Unknown tools, schema violations, handler errors and handler panics
    /// all produce a failure envelope.
    pub async fn invoke(&self, name: &str, args: Value) -> ToolEnvelope {
        let args = if args.is_null() { json!({}) } else { args };

        let (handler, validator) = {
            let registry = self.inner.registry.read();
            match registry.registered_tool(name) {
                Some(tool) => (tool.definition.handler.clone(), tool.validator.clone()),
                None => {
                    tracing::warn!(tenant = %self.inner.tenant, tool = %name, "unknown tool");
                    return ToolEnvelope::failure(name, ToolError::NotFound(name.to_string()));
                }
            }
        };

        let violations: Vec<String> = validator.iter_errors(&args).map(|e| e.to_string()).collect();
        if !violations.is_empty() {
            tracing::debug!(
                tenant = %self.inner.tenant,
                tool = %name,
                violations = violations.len(),
                "tool arguments rejected"
            );
            return ToolEnvelope::failure(name, ToolError::InvalidArgs(violations.join("; ")));
        }

        let ctx = ToolContext {
            request_id: uuid::Uuid::new_v4().to_string(),
            tool_name: name.to_string(),
            tenant: self.inner.tenant.clone(),
        };
        let request_id = ctx.request_id.clone();
        tracing::debug!(tenant = %self.inner.tenant, tool = %name, request_id = %request_id, "invoking tool");

        // catch_unwind: a panicking handler still yields an envelope.
        match AssertUnwindSafe(handler.call(ctx, args)).catch_unwind().await {
            Ok(Ok(output)) => ToolEnvelope::success(output),
            Ok(Err(e)) => {
                tracing::warn!(
                    tenant = %self.inner.tenant,
                    tool = %name,
                    request_id = %request_id,
                    error = %e,
                    "tool failed"
                );
                ToolEnvelope::failure(name, e)
            }
            Err(_panic) => {
                tracing::error!(
                    tenant = %self.inner.tenant,
                    tool = %name,
                    request_id = %request_id,
                    "tool handler panicked"
                );
                ToolEnvelope::failure(name, ToolError::Failed("tool handler panicked".into()))
            }
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Hand the snapshot to the transport.  A second call is a no-op that
    /// returns the existing address.
    pub async fn start(&self, mode: TransportMode) -> Result<Option<String>, ServerError> {
        let mut running = self.inner.running.lock().await;
        if let Some(current) = running.as_ref() {
            tracing::debug!(tenant = %self.inner.tenant, transport = current.mode.kind(), "server already started");
            return Ok(current.address.clone());
        }

        let binding = TransportBinding {
            instance_id: self.inner.instance_id.clone(),
            mode: mode.clone(),
            tenant: self.inner.tenant.clone(),
            capabilities: self.capabilities(),
            invoker: ToolInvoker::new(self.clone()),
        };
        let address = self.inner.transport.attach(binding).await?;

        tracing::info!(
            tenant = %self.inner.tenant,
            transport = mode.kind(),
            address = address.as_deref().unwrap_or("-"),
            "tenant server started"
        );
        *running = Some(Running {
            mode,
            address: address.clone(),
        });
        Ok(address)
    }

    /// Detach from the transport.  Idempotent.
    pub async fn stop(&self) {
        let mut running = self.inner.running.lock().await;
        if running.take().is_none() {
            return;
        }
        self.inner.transport.detach(&self.inner.instance_id).await;
        tracing::info!(
            instance_id = %self.inner.instance_id,
            tenant = %self.inner.tenant,
            "tenant server stopped"
        );
    }

    pub async fn is_running(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }

    pub async fn address(&self) -> Option<String> {
        self.inner
            .running
            .lock()
            .await
            .as_ref()
            .and_then(|r| r.address.clone())
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// `bs://datasets/{id}` matches `bs://datasets/abc` but not
/// `bs://datasets/abc/docs/1`: each `{param}` spans exactly one
/// non-empty path segment.
fn template_matches(template: &str, uri: &str) -> bool {
    let pattern: Vec<&str> = template.split('/').collect();
    let candidate: Vec<&str> = uri.split('/').collect();
    pattern.len() == candidate.len()
        && pattern.iter().zip(&candidate).all(|(p, c)| {
            if p.starts_with('{') && p.ends_with('}') {
                !c.is_empty()
            } else {
                p == c
            }
        })
}
