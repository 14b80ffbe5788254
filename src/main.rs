use std::path::PathBuf;

use clap::Parser;
use r2_motion_runtime::config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Gamepad-driven wheel and dome pan runtime")]
struct Args {
    /// TOML config file; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log notices only, never open a Zenoh session
    #[arg(long)]
    no_zenoh: bool,
    /// Print the effective config as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error ({}): {}", e.kind(), e);
                std::process::exit(1);
            }
        },
        None => {
            info!("No config file given, using defaults");
            Config::default()
        }
    };
    if args.no_zenoh {
        config.zenoh.enabled = false;
    }

    if args.dump_config {
        match config.to_toml() {
            Ok(text) => print!("{}", text),
            Err(e) => {
                eprintln!("Config error ({}): {}", e.kind(), e);
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = r2_motion_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
