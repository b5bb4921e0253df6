use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings shared by every tenant server this process hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Protocol version advertised in capability snapshots.
    #[serde(default = "d_protocol_version")]
    pub protocol_version: String,
    /// Base folder for datasets, runs, etc.
    #[serde(default = "d_data_root")]
    pub data_root: PathBuf,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol_version: d_protocol_version(),
            data_root: d_data_root(),
            transport: TransportConfig::default(),
        }
    }
}

/// How a tenant server is exposed to clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Not exposed; capabilities are only announced in the log.
    #[default]
    None,
    Stdio,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportKind,
    #[serde(default = "d_host")]
    pub host: String,
    /// `None` lets the transport pick a port.
    #[serde(default = "d_port")]
    pub port: Option<u16>,
    /// Bearer token for HTTP mode.  Generated when absent.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportKind::None,
            host: d_host(),
            port: d_port(),
            token: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

fn d_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.into()
}
fn d_data_root() -> PathBuf {
    PathBuf::from(".data")
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> Option<u16> {
    Some(7334)
}
