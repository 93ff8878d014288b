// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Relay - route requests across AI backends with fallback
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(version, about = "Route requests across AI backends with fallback")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path (defaults to ~/.relay/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question; routed to a specialized agent or plain chat
    Ask(AskArgs),

    /// Synthesize speech
    Speak(MediaArgs),

    /// Generate an image
    Image(MediaArgs),

    /// Generate a video
    Video(MediaArgs),

    /// Self-hosted model management
    Models(ModelsArgs),

    /// List known providers and whether they are configured
    Providers,
}

/// Arguments for the ask subcommand
#[derive(clap::Args, Debug)]
pub struct AskArgs {
    /// The question to ask
    pub prompt: String,

    /// Attach files to the request
    #[arg(short, long, num_args = 1..)]
    pub file: Vec<PathBuf>,

    /// Audio output is engaged (suppresses text-only agents)
    #[arg(long)]
    pub audio: bool,

    /// Provider to use instead of the configured default
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Model to use instead of the configured default
    #[arg(short, long)]
    pub model: Option<String>,
}

/// Arguments for speak, image and video
#[derive(clap::Args, Debug)]
pub struct MediaArgs {
    /// Text or prompt
    pub prompt: String,

    /// Where to write binary output (defaults to a file in the current directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Extra service options, e.g. `--option voice=nova --option size=512x512`
    #[arg(long = "option", value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,
}

/// Arguments for models management
#[derive(clap::Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommands,
}

/// Models subcommands
#[derive(Subcommand, Debug)]
pub enum ModelsCommands {
    /// List installed self-hosted models
    List,

    /// Download a model if it is not installed
    Pull {
        /// Model id (an Ollama tag or a configured artifact)
        id: String,
    },

    /// Make a model the active self-hosted model
    Use {
        /// Model id
        id: String,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Text,

    /// JSON output
    Json,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_ask_defaults() {
        let cli = Cli::parse_from(["relay", "ask", "hello"]);
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.format, OutputFormat::Text);
        match cli.command {
            Commands::Ask(args) => {
                assert_eq!(args.prompt, "hello");
                assert!(args.file.is_empty());
                assert!(!args.audio);
                assert!(args.provider.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ask_with_files_and_audio() {
        let cli = Cli::parse_from([
            "relay", "-vv", "ask", "summarize", "--file", "a.pdf", "b.txt", "--audio",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.file, vec![PathBuf::from("a.pdf"), PathBuf::from("b.txt")]);
        assert!(args.audio);
    }

    #[test]
    fn test_media_options() {
        let cli = Cli::parse_from([
            "relay", "speak", "hi", "--option", "voice=nova", "--option", "speed = 1.2",
        ]);
        let Commands::Speak(args) = cli.command else {
            panic!("expected speak");
        };
        assert_eq!(
            args.options,
            vec![
                ("voice".to_string(), "nova".to_string()),
                ("speed".to_string(), "1.2".to_string())
            ]
        );
    }

    #[test]
    fn test_bad_option_rejected() {
        assert!(Cli::try_parse_from(["relay", "image", "cat", "--option", "novalue"]).is_err());
    }

    #[test]
    fn test_models_pull() {
        let cli = Cli::parse_from(["relay", "--format", "json", "models", "pull", "llama3.2"]);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Models(ModelsArgs {
                command: ModelsCommands::Pull { id },
            }) => assert_eq!(id, "llama3.2"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["relay"]).is_err());
    }
}
