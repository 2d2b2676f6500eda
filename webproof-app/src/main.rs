use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use webproof_common::observability::{init_logging, LogConfig, LogFormat};
use webproof_config::{default_config_path, DisclosureConfig, WebProofConfig, WebProofConfigLoader};
use webproof_transcript::{paths::get_string_paths, Transcript};

mod capture;
mod redact;
mod session;

#[derive(Parser)]
#[command(name = "webproof", version, about = "Drive web proof sessions and inspect transcripts")]
struct Cli {
    /// Log encoding: text or json.
    #[arg(long, env = "WEBPROOF_LOG_FORMAT", default_value = "text", global = true)]
    log_format: String,
    /// Mirror logs to stderr.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full proving session and print proofs and extracted variables.
    Prove {
        #[arg(long, env = "WEBPROOF_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Compute the redaction sets a notarize step would use for a captured pair.
    Redact {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        response: PathBuf,
        #[arg(long, env = "WEBPROOF_CONFIG")]
        config: Option<PathBuf>,
        /// Index of the notarize step whose disclosure applies.
        #[arg(long, requires = "config")]
        step: Option<usize>,
    },
    /// Print the dot-paths of every string leaf in a JSON document.
    Paths { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        emit_stderr: cli.verbose,
        format: LogFormat::from_name(&cli.log_format),
        ..LogConfig::default()
    })?;

    match cli.command {
        Command::Prove { config } => prove(config).await,
        Command::Redact {
            request,
            response,
            config,
            step,
        } => {
            let disclosure = match (config, step) {
                (Some(path), Some(step)) => redact::step_disclosure(&load_config(Some(path))?, step)?,
                _ => DisclosureConfig::default(),
            };
            let request = Transcript::new(read(&request)?);
            let response = Transcript::new(read(&response)?);
            let report = redact::redact(&request, &response, &disclosure)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Paths { file } => {
            let text = String::from_utf8(read(&file)?)
                .with_context(|| format!("{} is not UTF-8", file.display()))?;
            for path in get_string_paths(&text)? {
                println!("{path}");
            }
            Ok(())
        }
    }
}

async fn prove(config: Option<PathBuf>) -> Result<()> {
    let cfg = load_config(config)?;
    let (deps, browser) = session::live_deps(&cfg).await?;
    let report = session::run_session(&cfg, deps).await;

    match Arc::try_unwrap(browser) {
        Ok(browser) => browser.close().await?,
        Err(_) => tracing::warn!("browser.still_shared"),
    }
    println!("{}", serde_json::to_string_pretty(&report?)?);
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<WebProofConfig> {
    let path = path
        .or_else(|| Some(PathBuf::from("webproof.yaml")).filter(|p| p.exists()))
        .or_else(default_config_path)
        .context("no configuration file; pass --config")?;
    WebProofConfigLoader::new()
        .with_file(&path)
        .load()
        .with_context(|| format!("load {}", path.display()))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read {}", path.display()))
}
