//! The `serve` command: spawn the general tenant plus every configured
//! tenant, wait for a shutdown signal, stop everything.

use std::sync::Arc;

use anyhow::Context;

use bs_domain::config::{Config, TenantConfig};
use bs_server::{AnnounceTransport, TransportMode};
use bs_spawner::{SpawnOptions, Spawner};

use crate::cli::ServeArgs;

/// Fold command-line overrides into the loaded config.
pub fn apply_overrides(config: &mut Config, args: &ServeArgs) {
    if let Some(transport) = args.transport {
        config.server.transport.mode = transport.into();
    }
    if let Some(port) = args.port {
        config.server.transport.port = Some(port);
    }
    if args.provider {
        config.provider.enabled = true;
    }
    for id in &args.tenants {
        if config.tenants.iter().any(|t| &t.id == id) {
            continue;
        }
        config.tenants.push(TenantConfig {
            id: id.clone(),
            data_root: None,
            transport: None,
            provider: None,
        });
    }
}

/// One [`SpawnOptions`] per server to start, general tenant first.
pub fn plan(config: &Config) -> Vec<SpawnOptions> {
    let provider = |wanted: bool| wanted.then(|| config.provider.clone());

    let general = SpawnOptions {
        tenant_id: None,
        data_root: config.server.data_root.clone(),
        transport: TransportMode::from_config(&config.server.transport),
        provider: provider(config.provider.enabled),
    };

    let tenants = config.tenants.iter().map(|tenant| {
        let transport = tenant
            .transport
            .as_ref()
            .unwrap_or(&config.server.transport);
        SpawnOptions {
            tenant_id: Some(tenant.id.clone()),
            data_root: tenant.resolved_data_root(&config.server),
            transport: TransportMode::from_config(transport),
            provider: provider(tenant.provider.unwrap_or(config.provider.enabled)),
        }
    });

    std::iter::once(general).chain(tenants).collect()
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        tenants = config.tenants.len(),
        provider = config.provider.enabled,
        "BrainSlot starting"
    );

    let spawner = Spawner::new(
        Arc::new(AnnounceTransport::new()),
        config.server.protocol_version.clone(),
    );

    for opts in plan(&config) {
        let label = opts.tenant_id.clone().unwrap_or_else(|| "general".into());
        let handle = match spawner.spawn(opts).await {
            Ok(handle) => handle,
            Err(e) => {
                spawner.stop_all().await;
                return Err(e).with_context(|| format!("spawning tenant '{label}'"));
            }
        };
        tracing::info!(
            instance_id = %handle.instance_id,
            tenant = %label,
            address = handle.address.as_deref().unwrap_or("-"),
            token = handle.token.as_deref().unwrap_or("-"),
            provider_tools = handle
                .provider_capabilities
                .as_ref()
                .map(|c| c.tools.len())
                .unwrap_or(0),
            "tenant ready"
        );
    }

    shutdown_signal().await;

    let stopped = spawner.stop_all().await;
    tracing::info!(stopped, "shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
