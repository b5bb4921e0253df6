//! External provider configuration.
//!
//! These structs deserialize the `[provider]` section.  The process
//! supervision and RPC logic lives in the `bs-mcp-bridge` crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How to launch and talk to the external provider (the crawler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Attach a provider bridge to spawned tenants.
    #[serde(default)]
    pub enabled: bool,

    /// Identifier used in logs (`provider = "crawler"`).
    #[serde(default = "d_id")]
    pub id: String,

    /// The command to spawn (e.g. `"uv"`).
    #[serde(default = "d_command")]
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default = "d_args")]
    pub args: Vec<String>,

    /// Working directory for the child.  Inherited when `None`.
    #[serde(default = "d_cwd")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables set on the child, on top of the
    /// tenant overrides.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// `protocolVersion` sent in `initialize`.
    #[serde(default = "d_protocol_version")]
    pub protocol_version: String,

    #[serde(default = "d_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "d_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Time between SIGTERM and a forced kill.
    #[serde(default = "d_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Skip `tools/list` and use this list verbatim.
    #[serde(default)]
    pub static_capabilities: Option<StaticCapabilities>,

    /// Names of the provider-side tools the bridge-backed handlers call.
    #[serde(default)]
    pub tools: ProviderToolNames,

    /// Substring in crawl output that marks the crawl as failed.  The
    /// default is the message the bundled crawler prints on failure; an
    /// empty string disables the check.
    #[serde(default = "d_failure_marker")]
    pub failure_marker: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            id: d_id(),
            command: d_command(),
            args: d_args(),
            cwd: d_cwd(),
            env: HashMap::new(),
            protocol_version: d_protocol_version(),
            request_timeout_ms: d_timeout_ms(),
            handshake_timeout_ms: d_timeout_ms(),
            shutdown_grace_ms: d_shutdown_grace_ms(),
            static_capabilities: None,
            tools: ProviderToolNames::default(),
            failure_marker: d_failure_marker(),
        }
    }
}

/// Preconfigured tool/feature list for providers whose discovery is broken.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StaticCapabilities {
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderToolNames {
    #[serde(default = "d_crawl_tool")]
    pub crawl: String,
    #[serde(default = "d_currency_tool")]
    pub convert_currency: String,
}

impl Default for ProviderToolNames {
    fn default() -> Self {
        Self {
            crawl: d_crawl_tool(),
            convert_currency: d_currency_tool(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_id() -> String {
    "crawler".into()
}
fn d_command() -> String {
    "uv".into()
}
fn d_args() -> Vec<String> {
    vec!["run".into(), "main.py".into()]
}
fn d_cwd() -> Option<PathBuf> {
    Some(PathBuf::from("./external-mcps/crawler-mcp"))
}
fn d_protocol_version() -> String {
    super::DEFAULT_PROTOCOL_VERSION.into()
}
fn d_timeout_ms() -> u64 {
    60_000
}
fn d_shutdown_grace_ms() -> u64 {
    1_000
}
fn d_crawl_tool() -> String {
    "extraer_info_web".into()
}
fn d_currency_tool() -> String {
    "usd_to_eur".into()
}
fn d_failure_marker() -> Option<String> {
    Some("Error al extraer".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_capabilities_parse() {
        let cfg: ProviderConfig = toml::from_str(
            r#"
enabled = true
command = "python"
args = ["server.py"]

[static_capabilities]
tools = ["extraer_info_web", "usd_to_eur"]
features = ["web-crawling"]

[env]
CRAWL_DEPTH = "2"
"#,
        )
        .unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.command, "python");
        assert_eq!(cfg.args, vec!["server.py"]);
        let caps = cfg.static_capabilities.unwrap();
        assert_eq!(caps.tools.len(), 2);
        assert_eq!(caps.features, vec!["web-crawling"]);
        assert_eq!(cfg.env.get("CRAWL_DEPTH").map(String::as_str), Some("2"));
        // Untouched fields keep their defaults.
        assert_eq!(cfg.request_timeout_ms, 60_000);
        assert_eq!(cfg.tools.crawl, "extraer_info_web");
    }
}
