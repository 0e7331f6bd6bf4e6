//! switch-gate - a mode-switching local egress gateway

use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use switch_gate::error::Result;
use switch_gate::{App, Config};

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // Initialize logging: RUST_LOG wins over the config file
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| config.logging.level.parse().ok())
        .unwrap_or(Level::INFO);

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);
    if config.logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())
            .expect("Failed to set tracing subscriber");
    } else {
        tracing::subscriber::set_global_default(builder.finish())
            .expect("Failed to set tracing subscriber");
    }

    info!("switch-gate v{} starting...", env!("CARGO_PKG_VERSION"));
    if args.config.is_none() {
        info!("No config file specified, using defaults");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let app = App::from_config(config)?;
        app.run().await
    })?;

    info!("Goodbye!");
    Ok(())
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') && config.is_none() => {
                    // Positional argument: treat as config file
                    config = Some(PathBuf::from(arg));
                }
                _ => {}
            }
            i += 1;
        }

        Self { config, version }
    }
}

fn print_help() {
    println!(
        r#"switch-gate - a mode-switching local egress gateway

USAGE:
    switch-gate [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    -v, --version           Print version information
    -h, --help              Print help information

EXAMPLES:
    switch-gate -c /etc/switch-gate/config.json
    RUST_LOG=debug switch-gate -c config.json

API ENDPOINTS:
    GET  /status            Current mode, traffic and limit overview
    POST /mode/{{mode}}       Switch routing mode (direct/warp/home)
    POST /limit/home        Set the home traffic cap in MB
    GET  /metrics           Prometheus metrics
    GET  /health            Liveness probe
"#
    );
}

fn print_version() {
    println!("switch-gate v{}", env!("CARGO_PKG_VERSION"));
}
