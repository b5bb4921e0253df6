//! Spawns tenant servers backed by a POSIX `sh` stub provider that
//! speaks just enough of the dialect for the crawl and currency tools.

#![cfg(unix)]

use std::sync::Arc;

use serde_json::json;

use bs_domain::config::ProviderConfig;
use bs_mcp_bridge::BridgeState;
use bs_server::{catalog, AnnounceTransport};
use bs_spawner::provider_tools::{ADVANCED_CRAWL, CONVERT_CURRENCY};
use bs_spawner::{SpawnError, SpawnOptions, Spawner};

const LOOP: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\),.*/\1/p')
  [ -n "$id" ] || continue
  case "$line" in
    *'"method":"initialize"'*)
      __INIT__ ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"extraer_info_web"},{"name":"usd_to_eur"}]}}\n' "$id" ;;
    *'"name":"usd_to_eur"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"85.0"}]}}\n' "$id" ;;
    *'"name":"extraer_info_web"'*)
      __CRAWL__ ;;
  esac
done
"#;

const INIT_OK: &str = r#"printf '{"jsonrpc":"2.0","id":%s,"result":{"capabilities":{"tools":{}},"serverInfo":{"name":"stub","version":"0.9.1"}}}\n' "$id""#;
const INIT_SLOW: &str = r#"sleep 1; printf '{"jsonrpc":"2.0","id":%s,"result":{"capabilities":{"tools":{}},"serverInfo":{"name":"stub","version":"0.9.1"}}}\n' "$id""#;
const INIT_ERROR: &str = r#"printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32603,"message":"boot failed"}}\n' "$id""#;

const CRAWL_PAGE: &str = r##"printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"# Example Domain\\nThis domain is for use in examples."}]}}\n' "$id""##;
const CRAWL_MARKED: &str = r#"printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"Error al extraer la web"}]}}\n' "$id""#;
const CRAWL_CRASH: &str = "exit 7";

fn provider(init: &str, crawl: &str) -> ProviderConfig {
    let script = LOOP.replace("__INIT__", init).replace("__CRAWL__", crawl);
    ProviderConfig {
        enabled: true,
        id: "crawler".into(),
        command: "sh".into(),
        args: vec!["-c".into(), script],
        cwd: None,
        request_timeout_ms: 5_000,
        handshake_timeout_ms: 5_000,
        shutdown_grace_ms: 500,
        ..ProviderConfig::default()
    }
}

fn spawner() -> Spawner {
    Spawner::new(Arc::new(AnnounceTransport::new()), "2025-06-18")
}

fn options(tenant: &str, provider: ProviderConfig) -> SpawnOptions {
    let root = std::env::temp_dir().join("brainslot-spawner-test").join(tenant);
    SpawnOptions::new(Some(tenant.into()), root).with_provider(provider)
}

#[tokio::test]
async fn provider_tools_replace_the_stub() {
    let spawner = spawner();
    let handle = spawner
        .spawn(options("acme", provider(INIT_OK, CRAWL_PAGE)))
        .await
        .unwrap();

    let caps = handle.provider_capabilities.clone().unwrap();
    assert_eq!(caps.version, "0.9.1");
    assert!(caps.has_tool("extraer_info_web"));

    let bridge = spawner.bridge(&handle.instance_id).unwrap();
    assert_eq!(bridge.state(), BridgeState::Ready);
    assert_eq!(spawner.list()[0].bridge_state, Some(BridgeState::Ready));

    let server = spawner.server(&handle.instance_id).unwrap();
    assert!(server.has_tool(ADVANCED_CRAWL));
    assert!(server.has_tool(CONVERT_CURRENCY));
    assert!(server.capabilities().tool(catalog::INGEST_URL).unwrap().requires_approval);

    let ingest = server
        .invoke(catalog::INGEST_URL, json!({ "url": "https://example.com" }))
        .await;
    assert!(!ingest.is_error);
    let payload = ingest.payload().unwrap();
    assert_eq!(payload["status"], "completed");
    assert_eq!(payload["title"], "Example Domain");
    assert_eq!(payload["providerVersion"], "0.9.1");
    assert_eq!(payload["source"], "provider:crawler");
    assert_eq!(payload["tenantId"], "acme");
    assert!(payload["jobId"].as_str().unwrap().starts_with("job_"));

    let crawl = server
        .invoke(ADVANCED_CRAWL, json!({ "url": "https://example.com" }))
        .await
        .payload()
        .unwrap();
    assert_eq!(crawl["success"], true);
    assert!(crawl["content"].as_str().unwrap().contains("for use in examples"));

    let converted = server
        .invoke(CONVERT_CURRENCY, json!({ "amount": 100 }))
        .await
        .payload()
        .unwrap();
    assert_eq!(converted["originalAmount"], 100);
    assert_eq!(converted["convertedAmount"], 85.0);
    assert_eq!(converted["convertedCurrency"], "EUR");

    assert!(handle.stop().await);
    assert_eq!(bridge.state(), BridgeState::Stopped);
}

#[tokio::test]
async fn unlaunchable_provider_degrades_to_stub_catalog() {
    let spawner = spawner();
    let mut config = provider(INIT_OK, CRAWL_PAGE);
    config.command = "/nonexistent/brainslot-provider".into();

    let handle = spawner.spawn(options("acme", config)).await.unwrap();
    assert!(handle.provider_capabilities.is_none());
    assert!(spawner.bridge(&handle.instance_id).is_none());

    let server = spawner.server(&handle.instance_id).unwrap();
    assert!(!server.has_tool(ADVANCED_CRAWL));
    let payload = server
        .invoke(catalog::INGEST_URL, json!({ "url": "https://example.com" }))
        .await
        .payload()
        .unwrap();
    assert_eq!(payload["accepted"], true);
    assert!(payload.get("source").is_none());

    spawner.stop_all().await;
}

#[tokio::test]
async fn handshake_rejection_degrades() {
    let spawner = spawner();
    let handle = spawner
        .spawn(options("acme", provider(INIT_ERROR, CRAWL_PAGE)))
        .await
        .unwrap();
    assert!(handle.provider_capabilities.is_none());
    let server = spawner.server(&handle.instance_id).unwrap();
    assert!(!server.has_tool(CONVERT_CURRENCY));
    spawner.stop_all().await;
}

#[tokio::test]
async fn same_tenant_gets_independent_bridges() {
    let spawner = spawner();
    let first = spawner
        .spawn(options("t1", provider(INIT_OK, CRAWL_PAGE)))
        .await
        .unwrap();
    let second = spawner
        .spawn(options("t1", provider(INIT_OK, CRAWL_PAGE)))
        .await
        .unwrap();
    assert_ne!(first.instance_id, second.instance_id);

    assert!(first.stop().await);
    let bridge = spawner.bridge(&second.instance_id).unwrap();
    assert_eq!(bridge.state(), BridgeState::Ready);
    let out = bridge
        .call("usd_to_eur", json!({ "amount": 1 }))
        .await
        .unwrap();
    assert_eq!(out, json!("85.0"));

    spawner.stop_all().await;
}

#[tokio::test]
async fn provider_crash_yields_failure_payload() {
    let spawner = spawner();
    let handle = spawner
        .spawn(options("acme", provider(INIT_OK, CRAWL_CRASH)))
        .await
        .unwrap();
    let server = spawner.server(&handle.instance_id).unwrap();

    let env = server
        .invoke(catalog::INGEST_URL, json!({ "url": "https://example.com" }))
        .await;
    assert!(env.is_error);
    let payload = env.payload().unwrap();
    assert_eq!(payload["success"], false);
    assert_eq!(payload["status"], "failed");
    assert_eq!(payload["accepted"], false);
    assert!(payload["jobId"].as_str().unwrap().starts_with("job_error_"));

    // The bridge is gone; later calls fail the same way.
    let env = server
        .invoke(CONVERT_CURRENCY, json!({ "amount": 5 }))
        .await;
    assert!(env.is_error);

    assert!(handle.stop().await);
}

#[tokio::test]
async fn default_failure_marker_marks_crawl_failed() {
    let spawner = spawner();
    let handle = spawner
        .spawn(options("acme", provider(INIT_OK, CRAWL_MARKED)))
        .await
        .unwrap();
    let server = spawner.server(&handle.instance_id).unwrap();
    let env = server
        .invoke(catalog::INGEST_URL, json!({ "url": "https://example.com" }))
        .await;
    assert!(env.is_error);
    assert_eq!(env.payload().unwrap()["status"], "failed");

    spawner.stop_all().await;
}

#[tokio::test]
async fn stop_all_cancels_spawn_in_progress() {
    let spawner = spawner();
    let s = spawner.clone();
    let pending = tokio::spawn(async move {
        s.spawn(options("acme", provider(INIT_SLOW, CRAWL_PAGE))).await
    });

    // The provider is still sleeping before its initialize answer.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(spawner.stop_all().await, 0);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, SpawnError::Cancelled), "{err}");
    assert!(spawner.is_empty());
    assert!(spawner.list().is_empty());

    // Later spawns are unaffected.
    let handle = spawner.spawn(options("acme", provider(INIT_OK, CRAWL_PAGE))).await.unwrap();
    assert_eq!(spawner.len(), 1);
    assert!(handle.stop().await);
}
