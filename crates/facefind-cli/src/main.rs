use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use facefind_core::{FallbackExtractor, OnnxProvider};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod dispatch;

use config::Config;
use dispatch::{Dispatcher, Response};

#[derive(Parser)]
#[command(
    name = "facefind",
    version,
    about = "Find the indexed photos a selfie's face appears in"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every face found in a photo
    Index {
        /// Face store file (JSON)
        store: PathBuf,
        /// Photo to index
        image: PathBuf,
    },
    /// List the indexed photos that contain the selfie's face
    Search {
        /// Face store file (JSON)
        store: PathBuf,
        /// Selfie to search with
        image: PathBuf,
    },
    /// Count stored face records and distinct photos
    Stats {
        /// Face store file (JSON)
        store: PathBuf,
    },
}

fn main() -> ExitCode {
    // stdout carries the JSON result; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FACEFIND_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            println!("{}", Response::error(argument_error(&e)).to_json());
            return ExitCode::from(2);
        }
    };

    match run(cli.command) {
        Ok(response) => {
            println!("{}", response.to_json());
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            println!("{}", Response::error(format!("{e:#}")).to_json());
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<Response> {
    if let Commands::Stats { store } = &command {
        return Ok(dispatch::stats(store));
    }

    let config = Config::load().context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let provider = OnnxProvider::load(&config.model_dir, config.thresholds())
        .context("loading face recognition model")?;
    let extractor = FallbackExtractor::new(provider, &config.detector_priority);
    let mut dispatcher = Dispatcher::new(extractor, config.match_engine());

    let response = match command {
        Commands::Index { store, image } => dispatcher.index(&store, &image)?,
        Commands::Search { store, image } => dispatcher.search(&store, &image)?,
        Commands::Stats { store } => dispatch::stats(&store),
    };
    Ok(response)
}

/// One-line description of a command-line parse failure.
fn argument_error(e: &clap::Error) -> String {
    match e.kind() {
        ErrorKind::InvalidSubcommand => "Invalid command".to_string(),
        ErrorKind::MissingSubcommand | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            "Missing arguments".to_string()
        }
        _ => {
            // First paragraph of clap's message, folded onto one line.
            let rendered = e.render().to_string();
            let message = rendered
                .lines()
                .take_while(|line| !line.trim().is_empty())
                .map(str::trim)
                .collect::<Vec<_>>()
                .join(" ");
            match message.trim_start_matches("error:").trim() {
                "" => "invalid arguments".to_string(),
                text => text.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("facefind").chain(args.iter().copied()))
    }

    #[test]
    fn test_parses_index_and_search() {
        let cli = parse(&["index", "db.json", "photo.jpg"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Index { store, image } if store == PathBuf::from("db.json") && image == PathBuf::from("photo.jpg")
        ));

        let cli = parse(&["search", "db.json", "selfie.jpg"]).unwrap();
        assert!(matches!(cli.command, Commands::Search { .. }));
    }

    #[test]
    fn test_unknown_command_is_invalid() {
        let err = parse(&["delete", "db.json"]).err().unwrap();
        assert_eq!(argument_error(&err), "Invalid command");
    }

    #[test]
    fn test_missing_command() {
        let err = parse(&[]).err().unwrap();
        assert_eq!(argument_error(&err), "Missing arguments");
    }

    #[test]
    fn test_missing_image_path() {
        let err = parse(&["search", "db.json"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        let message = argument_error(&err);
        assert!(message.contains("<IMAGE>"), "unexpected message: {message}");
        assert!(!message.contains('\n'));
    }

    #[test]
    fn test_stats_needs_no_models() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("faces.json");
        let response = run(Commands::Stats { store }).unwrap();
        assert_eq!(response.to_json(), r#"{"records":0,"photos":0}"#);
    }
}
