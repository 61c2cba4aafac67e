//! `syncpad`: relay server and one-shot compile runner.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use syncpad_collab::{RelayServer, ServerConfig};
use syncpad_runner::{CompileRunPipeline, ExecutionLimits, Language};

#[derive(Parser)]
#[command(name = "syncpad")]
#[command(about = "Shared code rooms: WebSocket relay and compile-and-run", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the room relay server
    Serve {
        #[arg(long, default_value = "127.0.0.1:9090")]
        bind: String,

        /// Peers allowed in one room
        #[arg(long, default_value_t = 100)]
        max_peers: usize,

        /// Frames buffered per peer before a slow peer starts skipping
        #[arg(long, default_value_t = 256)]
        broadcast_capacity: usize,
    },

    /// Compile and run a source file, printing the report
    Run {
        file: PathBuf,

        /// javascript, python, java or c++ (guessed from the extension if omitted)
        #[arg(short, long)]
        language: Option<Language>,

        #[arg(long)]
        max_steps: Option<u64>,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Serve {
            bind,
            max_peers,
            broadcast_capacity,
        } => serve(ServerConfig {
            bind_addr: bind,
            max_peers_per_room: max_peers,
            broadcast_capacity,
        }),
        Commands::Run {
            file,
            language,
            max_steps,
            timeout_ms,
        } => {
            let mut limits = ExecutionLimits::default();
            if let Some(steps) = max_steps {
                limits = limits.with_max_steps(steps);
            }
            if let Some(ms) = timeout_ms {
                limits = limits.with_timeout(Duration::from_millis(ms));
            }
            run(&file, language, limits)
        }
    }
}

fn serve(config: ServerConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        info!(
            "Starting relay on {} (max {} peers per room)",
            config.bind_addr, config.max_peers_per_room
        );
        RelayServer::new(config).run().await?;
        Ok::<(), anyhow::Error>(())
    })
}

fn run(file: &Path, language: Option<Language>, limits: ExecutionLimits) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let language = language.unwrap_or_else(|| language_for(file));
    info!("Compiling {} as {language}", file.display());

    let report = CompileRunPipeline::default()
        .with_limits(limits)
        .compile_and_run(&source, language);
    println!("{report}");
    Ok(())
}

/// Language implied by a file extension; JavaScript when unknown.
fn language_for(path: &Path) -> Language {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("py") => Language::Python,
        Some("java") => Language::Java,
        Some("cpp" | "cc" | "cxx" | "hpp" | "h") => Language::Cpp,
        _ => Language::JavaScript,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_language_from_extension() {
        assert_eq!(language_for(Path::new("main.py")), Language::Python);
        assert_eq!(language_for(Path::new("Main.java")), Language::Java);
        assert_eq!(language_for(Path::new("a.cc")), Language::Cpp);
        assert_eq!(language_for(Path::new("index.js")), Language::JavaScript);
        assert_eq!(language_for(Path::new("README")), Language::JavaScript);
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from(["syncpad", "run", "x.txt", "--language", "cpp", "--max-steps", "10"]).unwrap();
        match cli.command {
            Commands::Run {
                file,
                language,
                max_steps,
                timeout_ms,
            } => {
                assert_eq!(file, PathBuf::from("x.txt"));
                assert_eq!(language, Some(Language::Cpp));
                assert_eq!(max_steps, Some(10));
                assert_eq!(timeout_ms, None);
            }
            Commands::Serve { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_unknown_language_is_rejected() {
        assert!(Cli::try_parse_from(["syncpad", "run", "x", "--language", "cobol"]).is_err());
    }
}
