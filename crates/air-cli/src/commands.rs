use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use air_config::{AirConfig, ConfigLoader};
use air_core::AirError;
use air_policy::{EpisodeLedger, Policy, PolicyStore, RiskTier, TierDescriptor};
use air_server::AppState;

/// AIR: policy decision engine for agent oversight
#[derive(Parser)]
#[command(name = "air", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to air.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the policy engine HTTP API
    Serve {
        /// Address to listen on (overrides server.listen)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Show the autonomy tiers and what each allows per risk tier
    Tiers {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a policy document (a single policy or an array of policies)
    Check {
        /// Path to the JSON policy file
        file: PathBuf,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version and build info
    Version,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> air_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Serve { listen } => Self::cmd_serve(config_loader, listen).await,
            Commands::Tiers { json } => Self::cmd_tiers(json),
            Commands::Check { file } => Self::cmd_check(&file),
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Version => Self::cmd_version(),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    async fn cmd_serve(config_loader: ConfigLoader, listen: Option<String>) -> air_core::Result<()> {
        let shared = config_loader.shared();
        if let Some(listen) = listen {
            shared.write().server.listen = listen;
        }

        // The watcher stops when dropped, so it lives as long as the server.
        let _watcher = if config_loader.path().exists() {
            match config_loader.watch() {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, "config hot-reload disabled");
                    None
                }
            }
        } else {
            None
        };

        let state = AppState::from_config(shared)?;
        println!("AIR policy engine v{}", env!("CARGO_PKG_VERSION"));
        println!("   Listening: http://{}", state.config.read().server.listen);
        println!("   Policies:  {}", state.engine.store().len());
        println!("   Ledger:    {}", state.engine.trust().ledger().name());
        println!();

        air_server::start_server(Arc::new(state)).await
    }

    fn cmd_tiers(json: bool) -> air_core::Result<()> {
        let tiers = air_policy::list_tiers();
        if json {
            println!("{}", serde_json::to_string_pretty(&tiers)?);
        } else {
            print!("{}", render_tiers(&tiers));
        }
        Ok(())
    }

    fn cmd_check(file: &Path) -> air_core::Result<()> {
        let raw = std::fs::read_to_string(file)?;
        let policies = check_document(&raw)?;
        for p in &policies {
            println!(
                "ok  {} ({} tier, {} tool risks, {} kill switches, {} conditions)",
                p.id,
                p.autonomy_tier,
                p.tool_risks.len(),
                p.kill_switches.len(),
                p.conditions.len()
            );
        }
        println!("{} valid in {}", policies.len(), file.display());
        Ok(())
    }

    fn cmd_config(config: AirConfig, json: bool) -> air_core::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| AirError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_version() -> air_core::Result<()> {
        println!("AIR v{}", env!("CARGO_PKG_VERSION"));
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> air_core::Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "air", &mut std::io::stdout());
        Ok(())
    }
}

/// RUST_LOG wins over the resolved level.
fn init_tracing(log_level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

/// Parse and validate a policy document. Accepts one policy object or an array.
pub fn check_document(raw: &str) -> air_core::Result<Vec<Policy>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let policies: Vec<Policy> = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };

    let mut seen = std::collections::HashSet::new();
    for p in &policies {
        p.validate()?;
        if !seen.insert(p.id.as_str()) {
            return Err(AirError::validation("id", format!("duplicate policy id '{}'", p.id)));
        }
    }
    Ok(policies)
}

fn render_tiers(tiers: &[TierDescriptor]) -> String {
    let row = |label: &str, cells: Vec<&str>| {
        let mut line = format!("{label:<12}");
        for cell in cells {
            line.push_str(&format!("{cell:<18}"));
        }
        format!("{}\n", line.trim_end())
    };

    let mut out = row("tier", RiskTier::ALL.iter().map(|r| r.name()).collect());
    for t in tiers {
        out.push_str(&row(
            t.name.name(),
            t.gates.iter().map(|g| g.verdict.name()).collect(),
        ));
    }
    out
}
