// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Relay - route requests across AI backends with fallback
//!
//! Entry point for the relay CLI application.

use clap::Parser;

use relay::cli::commands::{load_settings, run_ask, run_media, run_models, run_providers};
use relay::cli::{Cli, Commands};
use relay::registry::Modality;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` turns on the core diagnostics without knowing target names.
    // `RUST_LOG` still takes precedence.
    if cli.verbose > 0 {
        let level = if cli.verbose > 1 { "trace" } else { "debug" };
        for target in ["relay.router", "relay.session", "relay.models", "relay.fallback"] {
            if let Ok(parsed) = format!("{}={}", target, level).parse() {
                env_filter = env_filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {}", err.user_message());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> relay::Result<()> {
    let settings = load_settings(cli.config.as_deref())?;
    settings.ensure_directories()?;

    let format = cli.format;
    match cli.command {
        Commands::Ask(args) => run_ask(args, settings, format).await,
        Commands::Speak(args) => run_media(Modality::Speech, args, settings, format).await,
        Commands::Image(args) => run_media(Modality::Image, args, settings, format).await,
        Commands::Video(args) => run_media(Modality::Video, args, settings, format).await,
        Commands::Models(args) => run_models(args, settings, cli.config.as_deref(), format).await,
        Commands::Providers => run_providers(&settings, format),
    }
}
