//! Instance lifecycle: spawn, list, stop.
//!
//! Instances are keyed by an opaque instance id, never by tenant id.  Two
//! spawns for the same tenant yield two independent instances, each with
//! its own server and its own provider bridge.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use bs_domain::config::ProviderConfig;
use bs_domain::{CapabilitySnapshot, TenantContext};
use bs_mcp_bridge::{BridgeState, DiagnosticSink, ProcessBridge, TracingDiagnostics};
use bs_server::{catalog, TenantServer, TransportHost, TransportMode};

use crate::error::SpawnError;
use crate::provider_tools;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// `None` spawns the general tenant.
    pub tenant_id: Option<String>,
    pub data_root: PathBuf,
    pub transport: TransportMode,
    /// Back the server with this provider.  Start failures degrade the
    /// spawn to the built-in catalog.
    pub provider: Option<ProviderConfig>,
}

impl SpawnOptions {
    pub fn new(tenant_id: Option<String>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            tenant_id,
            data_root: data_root.into(),
            transport: TransportMode::None,
            provider: None,
        }
    }

    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = Some(provider);
        self
    }
}

/// Summary of a running instance (returned by [`Spawner::list`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub instance_id: String,
    pub tenant_id: Option<String>,
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_state: Option<BridgeState>,
}

/// Returned by [`Spawner::spawn`].
pub struct SpawnHandle {
    pub instance_id: String,
    pub tenant_id: Option<String>,
    pub address: Option<String>,
    pub token: Option<String>,
    /// Present when a provider bridge reached `Ready`.
    pub provider_capabilities: Option<CapabilitySnapshot>,
    spawner: Spawner,
}

impl SpawnHandle {
    /// Stop this instance.  Returns false if it was already stopped.
    pub async fn stop(&self) -> bool {
        self.spawner.stop(&self.instance_id).await
    }
}

impl std::fmt::Debug for SpawnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnHandle")
            .field("instance_id", &self.instance_id)
            .field("tenant_id", &self.tenant_id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

struct SpawnRecord {
    instance_id: String,
    tenant: TenantContext,
    server: TenantServer,
    bridge: Option<ProcessBridge>,
    address: Option<String>,
    /// Serializes concurrent stops; true once stopped.
    stopped: tokio::sync::Mutex<bool>,
}

impl SpawnRecord {
    /// Bridge first, then server.
    async fn shut_down(&self) {
        if let Some(bridge) = &self.bridge {
            bridge.stop().await;
        }
        self.server.stop().await;
    }
}

/// `None` marks an id reserved by a spawn still in progress.
type Slot = Option<Arc<SpawnRecord>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Spawner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SpawnerInner {
    instances: RwLock<HashMap<String, Slot>>,
    /// Bumped by every `stop_all`; a spawn that started under an older
    /// epoch is torn down instead of registered.
    stop_epoch: AtomicU64,
    transport: Arc<dyn TransportHost>,
    protocol_version: String,
    diagnostics: Arc<dyn DiagnosticSink>,
}

/// Owns the set of running instances.  Cheap to clone.
#[derive(Clone)]
pub struct Spawner {
    inner: Arc<SpawnerInner>,
}

impl Spawner {
    pub fn new(transport: Arc<dyn TransportHost>, protocol_version: impl Into<String>) -> Self {
        Self::with_diagnostics(transport, protocol_version, Arc::new(TracingDiagnostics))
    }

    /// Route provider stdout/stderr diagnostics to `diagnostics`.
    pub fn with_diagnostics(
        transport: Arc<dyn TransportHost>,
        protocol_version: impl Into<String>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            inner: Arc::new(SpawnerInner {
                instances: RwLock::new(HashMap::new()),
                stop_epoch: AtomicU64::new(0),
                transport,
                protocol_version: protocol_version.into(),
                diagnostics,
            }),
        }
    }

    /// Start a tenant server.
    ///
    /// Fails on registry conflicts or transport errors, and with
    /// [`SpawnError::Cancelled`] when `stop_all` ran while the spawn was in
    /// progress.  A provider that cannot be started is logged and left out.
    pub async fn spawn(&self, opts: SpawnOptions) -> Result<SpawnHandle, SpawnError> {
        let (instance_id, epoch) = self.reserve_id();
        let (record, handle) = match self.build(&instance_id, opts).await {
            Ok(built) => built,
            Err(e) => {
                self.inner.instances.write().remove(&instance_id);
                return Err(e);
            }
        };

        let registered = {
            let mut instances = self.inner.instances.write();
            if self.inner.stop_epoch.load(Ordering::SeqCst) == epoch {
                instances.insert(instance_id.clone(), Some(Arc::new(record)));
                None
            } else {
                instances.remove(&instance_id);
                Some(record)
            }
        };
        match registered {
            None => Ok(handle),
            Some(record) => {
                tracing::info!(
                    instance_id = %instance_id,
                    tenant = %record.tenant,
                    "shutdown began during spawn; stopping new instance"
                );
                record.shut_down().await;
                Err(SpawnError::Cancelled)
            }
        }
    }

    /// Fresh 8-character id, reserved in the instance map, plus the stop
    /// epoch it was reserved under.
    fn reserve_id(&self) -> (String, u64) {
        let mut instances = self.inner.instances.write();
        let epoch = self.inner.stop_epoch.load(Ordering::SeqCst);
        loop {
            let mut id = uuid::Uuid::new_v4().simple().to_string();
            id.truncate(8);
            if !instances.contains_key(&id) {
                instances.insert(id.clone(), None);
                return (id, epoch);
            }
        }
    }

    async fn build(
        &self,
        instance_id: &str,
        opts: SpawnOptions,
    ) -> Result<(SpawnRecord, SpawnHandle), SpawnError> {
        let tenant = TenantContext::new(opts.tenant_id, opts.data_root);
        tracing::info!(instance_id = %instance_id, tenant = %tenant, "spawning tenant server");

        let bridge = match opts.provider {
            Some(config) => self.start_bridge(instance_id, config, &tenant).await,
            None => None,
        };

        let server = TenantServer::with_instance_id(
            instance_id,
            tenant.clone(),
            self.inner.protocol_version.clone(),
            self.inner.transport.clone(),
        );
        let started = self
            .start_server(&server, bridge.as_ref(), opts.transport)
            .await;
        let (address, token) = match started {
            Ok(started) => started,
            Err(e) => {
                if let Some(bridge) = &bridge {
                    bridge.stop().await;
                }
                tracing::error!(instance_id = %instance_id, tenant = %tenant, error = %e, "spawn failed");
                return Err(e);
            }
        };

        let handle = SpawnHandle {
            instance_id: instance_id.to_string(),
            tenant_id: tenant.tenant_id().map(str::to_string),
            address: address.clone(),
            token,
            provider_capabilities: bridge.as_ref().and_then(ProcessBridge::capabilities),
            spawner: self.clone(),
        };
        tracing::info!(
            instance_id = %instance_id,
            tenant = %tenant,
            address = address.as_deref().unwrap_or("-"),
            provider = bridge.is_some(),
            "tenant server spawned"
        );
        let record = SpawnRecord {
            instance_id: instance_id.to_string(),
            tenant,
            server,
            bridge,
            address,
            stopped: tokio::sync::Mutex::new(false),
        };
        Ok((record, handle))
    }

    /// `None` when the provider could not be brought to `Ready`.
    async fn start_bridge(
        &self,
        instance_id: &str,
        config: ProviderConfig,
        tenant: &TenantContext,
    ) -> Option<ProcessBridge> {
        let bridge =
            ProcessBridge::with_diagnostics(config, tenant.clone(), self.inner.diagnostics.clone());
        match bridge.start().await {
            Ok(_) => Some(bridge),
            Err(e) => {
                tracing::warn!(
                    instance_id = %instance_id,
                    tenant = %tenant,
                    provider = %bridge.provider_id(),
                    error = %e,
                    "provider unavailable; continuing without provider tools"
                );
                None
            }
        }
    }

    async fn start_server(
        &self,
        server: &TenantServer,
        bridge: Option<&ProcessBridge>,
        transport: TransportMode,
    ) -> Result<(Option<String>, Option<String>), SpawnError> {
        catalog::install(server)?;
        if let Some(bridge) = bridge {
            provider_tools::install(server, bridge)?;
        }

        let transport = match transport {
            TransportMode::Http { host, port, token } => TransportMode::Http {
                host,
                port,
                token: Some(token.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())),
            },
            other => other,
        };
        let token = transport.token().map(str::to_string);
        let address = server.start(transport).await?;
        Ok((address, token))
    }

    // ── Queries ────────────────────────────────────────────────────

    fn record(&self, instance_id: &str) -> Option<Arc<SpawnRecord>> {
        self.inner.instances.read().get(instance_id).cloned().flatten()
    }

    pub fn list(&self) -> Vec<InstanceInfo> {
        let mut out: Vec<InstanceInfo> = self
            .inner
            .instances
            .read()
            .values()
            .flatten()
            .map(|r| InstanceInfo {
                instance_id: r.instance_id.clone(),
                tenant_id: r.tenant.tenant_id().map(str::to_string),
                address: r.address.clone(),
                bridge_state: r.bridge.as_ref().map(ProcessBridge::state),
            })
            .collect();
        out.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        out
    }

    pub fn bridge(&self, instance_id: &str) -> Option<ProcessBridge> {
        self.record(instance_id)?.bridge.clone()
    }

    pub fn server(&self, instance_id: &str) -> Option<TenantServer> {
        self.record(instance_id).map(|r| r.server.clone())
    }

    /// Instance ids running for a tenant (`None` for the general tenant).
    pub fn instances_for_tenant(&self, tenant_id: Option<&str>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .instances
            .read()
            .values()
            .flatten()
            .filter(|r| r.tenant.tenant_id() == tenant_id)
            .map(|r| r.instance_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.instances.read().values().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Shutdown ───────────────────────────────────────────────────

    /// Stop one instance: bridge first, then server.
    ///
    /// Returns false for unknown or already-stopped ids.
    pub async fn stop(&self, instance_id: &str) -> bool {
        let Some(record) = self.record(instance_id) else {
            return false;
        };

        let mut stopped = record.stopped.lock().await;
        if *stopped {
            return false;
        }
        record.shut_down().await;
        *stopped = true;

        self.inner.instances.write().remove(instance_id);
        tracing::info!(instance_id = %instance_id, tenant = %record.tenant, "tenant server stopped");
        true
    }

    /// Stop every running instance.  Returns how many were stopped.
    ///
    /// Spawns still in progress are not counted; they stop themselves
    /// when they finish and return [`SpawnError::Cancelled`].
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<String> = {
            let instances = self.inner.instances.write();
            self.inner.stop_epoch.fetch_add(1, Ordering::SeqCst);
            instances
                .iter()
                .filter(|(_, slot)| slot.is_some())
                .map(|(id, _)| id.clone())
                .collect()
        };

        let futs = ids.iter().map(|id| self.stop(id));
        futures_util::future::join_all(futs)
            .await
            .into_iter()
            .filter(|stopped| *stopped)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bs_server::AnnounceTransport;

    fn spawner() -> (Spawner, Arc<AnnounceTransport>) {
        let transport = Arc::new(AnnounceTransport::new());
        (Spawner::new(transport.clone(), "2025-06-18"), transport)
    }

    #[tokio::test]
    async fn spawn_general_without_provider() {
        let (spawner, transport) = spawner();
        let handle = spawner
            .spawn(SpawnOptions::new(None, "/tmp/general"))
            .await
            .unwrap();

        assert_eq!(handle.instance_id.len(), 8);
        assert_eq!(handle.tenant_id, None);
        assert_eq!(handle.address, None);
        assert!(handle.provider_capabilities.is_none());
        assert_eq!(transport.attached("general"), 1);

        let server = spawner.server(&handle.instance_id).unwrap();
        assert!(server.has_tool(catalog::INGEST_URL));
        assert!(!server.has_tool(provider_tools::ADVANCED_CRAWL));
        assert!(spawner.bridge(&handle.instance_id).is_none());

        assert!(handle.stop().await);
        assert!(!handle.stop().await);
        assert!(spawner.is_empty());
        assert_eq!(transport.attached("general"), 0);
    }

    #[tokio::test]
    async fn http_spawn_gets_generated_token() {
        let (spawner, _) = spawner();
        let handle = spawner
            .spawn(
                SpawnOptions::new(Some("t1".into()), "/tmp/t1").with_transport(TransportMode::Http {
                    host: "127.0.0.1".into(),
                    port: Some(9200),
                    token: None,
                }),
            )
            .await
            .unwrap();
        assert_eq!(handle.address.as_deref(), Some("http://127.0.0.1:9200"));
        let token = handle.token.clone().unwrap();
        assert_eq!(token.len(), 32);

        let listed = spawner.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].tenant_id.as_deref(), Some("t1"));
        assert_eq!(listed[0].bridge_state, None);
    }

    #[tokio::test]
    async fn same_tenant_twice_is_two_instances() {
        let (spawner, transport) = spawner();
        let a = spawner
            .spawn(SpawnOptions::new(Some("t1".into()), "/tmp/t1"))
            .await
            .unwrap();
        let b = spawner
            .spawn(SpawnOptions::new(Some("t1".into()), "/tmp/t1"))
            .await
            .unwrap();
        assert_ne!(a.instance_id, b.instance_id);
        assert_eq!(spawner.instances_for_tenant(Some("t1")).len(), 2);
        assert_eq!(transport.attached("t1"), 2);

        assert!(spawner.stop(&a.instance_id).await);
        assert_eq!(transport.attached("t1"), 1);
        assert_eq!(spawner.instances_for_tenant(Some("t1")), vec![b.instance_id.clone()]);
        assert!(spawner.server(&b.instance_id).unwrap().is_running().await);
    }

    #[tokio::test]
    async fn stop_all_and_unknown_ids() {
        let (spawner, _) = spawner();
        for tenant in ["a", "b", "c"] {
            spawner
                .spawn(SpawnOptions::new(Some(tenant.into()), "/tmp"))
                .await
                .unwrap();
        }
        assert!(!spawner.stop("nope").await);
        assert_eq!(spawner.stop_all().await, 3);
        assert_eq!(spawner.stop_all().await, 0);
        assert!(spawner.list().is_empty());
    }

    #[tokio::test]
    async fn concurrent_stops_stop_once() {
        let (spawner, _) = spawner();
        let handle = spawner
            .spawn(SpawnOptions::new(None, "/tmp"))
            .await
            .unwrap();
        let (first, second) = tokio::join!(
            spawner.stop(&handle.instance_id),
            spawner.stop(&handle.instance_id)
        );
        assert!(first ^ second);
    }
}
