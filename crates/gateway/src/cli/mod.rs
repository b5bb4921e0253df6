pub mod config;

use std::path::Path;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};

use bs_domain::config::{Config, TransportKind};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "BRAINSLOT_CONFIG";

/// BrainSlot: multi-tenant tool servers with external provider bridges.
#[derive(Debug, Parser)]
#[command(name = "brainslot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Spawn the configured tenant servers (default when no subcommand is given).
    Serve(ServeArgs),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any problems.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Overrides applied on top of the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Spawn an extra tenant (repeatable).
    #[arg(long = "tenant", value_name = "ID")]
    pub tenants: Vec<String>,
    /// Transport for servers without a per-tenant transport.
    #[arg(long, value_enum)]
    pub transport: Option<TransportArg>,
    /// HTTP port for servers without a per-tenant transport.
    #[arg(long)]
    pub port: Option<u16>,
    /// Attach the provider bridge even if `provider.enabled` is false.
    #[arg(long)]
    pub provider: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    None,
    Stdio,
    Http,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::None => TransportKind::None,
            TransportArg::Stdio => TransportKind::Stdio,
            TransportArg::Http => TransportKind::Http,
        }
    }
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `$BRAINSLOT_CONFIG` (or `config.toml`).
/// Returns the parsed [`Config`] and the path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(Path::new(&config_path))?;
    Ok((config, config_path))
}

/// A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Config::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.tenants.is_empty());
        assert!(!config.provider.enabled);
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nbroken").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(format!("{err}").contains("config.toml"), "{err:#}");
    }

    #[test]
    fn reads_tenants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[tenants]]\nid = \"acme\"\n").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.tenants[0].id, "acme");
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::parse_from([
            "brainslot", "serve", "--tenant", "a", "--tenant", "b", "--transport", "http",
            "--port", "9000", "--provider",
        ]);
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.tenants, vec!["a", "b"]);
        assert_eq!(args.transport, Some(TransportArg::Http));
        assert_eq!(args.port, Some(9000));
        assert!(args.provider);
    }

    #[test]
    fn no_subcommand_is_allowed() {
        let cli = Cli::parse_from(["brainslot"]);
        assert!(cli.command.is_none());
    }
}
