mod observability;
mod provider;
mod server;

pub use observability::*;
pub use provider::*;
pub use server::*;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Additional tenants spawned at startup (besides the general one).
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a TOML document.  Missing sections take their defaults.
    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// Returns one message per problem; an empty vec means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.provider.enabled && self.provider.command.trim().is_empty() {
            problems.push("provider.enabled is true but provider.command is empty".into());
        }
        if self.provider.request_timeout_ms == 0 {
            problems.push("provider.request_timeout_ms must be > 0".into());
        }
        if self.provider.handshake_timeout_ms == 0 {
            problems.push("provider.handshake_timeout_ms must be > 0".into());
        }

        let mut seen = std::collections::HashSet::new();
        for tenant in &self.tenants {
            if tenant.id.trim().is_empty() {
                problems.push("tenants: entry with empty id".into());
            } else if !seen.insert(tenant.id.as_str()) {
                problems.push(format!("tenants: duplicate id '{}'", tenant.id));
            }
        }

        problems
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tenants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tenant to spawn at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    /// Defaults to `<server.data_root>/entities/<id>`.
    #[serde(default)]
    pub data_root: Option<PathBuf>,
    /// Overrides `server.transport` for this tenant.
    #[serde(default)]
    pub transport: Option<TransportConfig>,
    /// Attach a provider bridge (defaults to `provider.enabled`).
    #[serde(default)]
    pub provider: Option<bool>,
}

impl TenantConfig {
    pub fn resolved_data_root(&self, server: &ServerConfig) -> PathBuf {
        self.data_root
            .clone()
            .unwrap_or_else(|| server.data_root.join("entities").join(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_valid() {
        let cfg: Config = toml::from_str("").unwrap();
        assert!(cfg.validate().is_empty());
        assert!(cfg.tenants.is_empty());
    }

    #[test]
    fn duplicate_tenant_ids_flagged() {
        let cfg: Config = toml::from_str(
            r#"
[[tenants]]
id = "t1"

[[tenants]]
id = "t1"
"#,
        )
        .unwrap();
        let problems = cfg.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("duplicate id 't1'"));
    }

    #[test]
    fn enabled_provider_needs_command() {
        let cfg: Config = toml::from_str(
            r#"
[provider]
enabled = true
command = ""
"#,
        )
        .unwrap();
        assert!(cfg.validate().iter().any(|p| p.contains("provider.command")));
    }

    #[test]
    fn tenant_data_root_defaults_under_server_root() {
        let cfg: Config = toml::from_str(
            r#"
[server]
data_root = "/var/bs"

[[tenants]]
id = "acme"
"#,
        )
        .unwrap();
        assert_eq!(
            cfg.tenants[0].resolved_data_root(&cfg.server),
            PathBuf::from("/var/bs/entities/acme")
        );
    }
}
