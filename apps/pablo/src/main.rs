//! # Pablo
//!
//! The command-line binary for the Pablo linguistic graph core.
//!
//! This application provides:
//! - Graph building from collaborator token units (JSON)
//! - `.pgraph` encoding, decoding and provenance inspection
//! - Rule, vocabulary and retention store maintenance
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │            apps/pablo (THE BINARY)            │
//! │                                               │
//! │   ┌──────────────┐      ┌─────────────────┐   │
//! │   │     CLI      │      │  File I/O, JSON │   │
//! │   │    (clap)    │      │   (serde_json)  │   │
//! │   └──────┬───────┘      └────────┬────────┘   │
//! │          └───────────┬───────────┘            │
//! │                      ▼                        │
//! │              ┌───────────────┐                │
//! │              │  pablo-core   │                │
//! │              │  (THE LOGIC)  │                │
//! │              └───────────────┘                │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! pablo build --input unit.json --output unit.pgraph --compress
//! pablo justify --input unit.pgraph --edge 7
//! pablo --config pablo.toml retain --input unit.pgraph
//! pablo --json-mode query --input other.pgraph -k 3
//! ```

use clap::Parser;
use pablo::cli;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // PABLO_LOG takes precedence over RUST_LOG; -v raises the default to debug.
    let default_filter = if cli.verbose {
        "pablo=debug,pablo_core=debug"
    } else {
        "pablo=info,pablo_core=info"
    };
    let filter = EnvFilter::try_from_env("PABLO_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Logs go to stderr so JSON output on stdout stays parseable.
    let log_format = std::env::var("PABLO_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Pablo startup banner.
fn print_banner() {
    eprintln!(
        r#"
  ██████╗  █████╗ ██████╗ ██╗      ██████╗
  ██╔══██╗██╔══██╗██╔══██╗██║     ██╔═══██╗
  ██████╔╝███████║██████╔╝██║     ██║   ██║
  ██╔═══╝ ██╔══██║██╔══██╗██║     ██║   ██║
  ██║     ██║  ██║██████╔╝███████╗╚██████╔╝
  ╚═╝     ╚═╝  ╚═╝╚═════╝ ╚══════╝ ╚═════╝

  Linguistic Graph Core v{}

  Typed • Justified • Retrievable
"#,
        env!("CARGO_PKG_VERSION")
    );
}
