//! Command surface.
//!
//! Exit codes: 0 ok, 1 other failure, 2 usage, 3 validation, 4 destination
//! not found, 5 stale entity lookup, 6 remote/transport.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;

use crate::config::{self, CONFIG_DIR_ENV, ConfigError, ConfigKind, MainConfig};
use crate::push::{ErrorKind, Push, PushError, PushReport};
use crate::remote::{HttpSession, MemorySession, SharedSession};

#[derive(Parser, Debug)]
#[command(
    name = "dagpush",
    version,
    about = "Mirror local files into a remote entity tree, with annotations and an audit trail"
)]
pub struct Cli {
    /// Directory holding site.yaml and users.yaml
    #[arg(long, global = true, env = CONFIG_DIR_ENV, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Machine-readable output on stdout, structured errors on stderr
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload the files described by a push-config document
    Push {
        /// User id as listed in users.yaml
        #[arg(short, long)]
        user: String,

        /// Path to the push-config YAML document
        #[arg(value_name = "PUSH_CONFIG")]
        push_config: PathBuf,

        /// Run against an in-memory store; nothing is sent anywhere
        #[arg(long)]
        dry_run: bool,
    },

    /// Write factory-default config files (existing files are kept)
    Config {
        #[arg(short, long, value_enum, default_value_t = ConfigKind::All)]
        kind: ConfigKind,
    },
}

impl Cli {
    /// Default tracing filter implied by `-v` / `-q`.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

pub fn run(cli: &Cli) -> Result<()> {
    match cli.color {
        ColorChoice::Always => colored::control::set_override(true),
        ColorChoice::Never => colored::control::set_override(false),
        ColorChoice::Auto => {}
    }

    let config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => config::default_config_dir()?,
    };

    match &cli.command {
        Commands::Push {
            user,
            push_config,
            dry_run,
        } => run_push(cli, &config_dir, user, push_config, *dry_run),
        Commands::Config { kind } => run_config(cli, &config_dir, *kind),
    }
}

fn run_push(
    cli: &Cli,
    config_dir: &Path,
    user: &str,
    push_config: &Path,
    dry_run: bool,
) -> Result<()> {
    let main = MainConfig::load(config_dir)?;
    let session: SharedSession = if dry_run {
        tracing::info!("dry run: using an in-memory store");
        Arc::new(MemorySession::new())
    } else {
        let remote = main.remote()?;
        Arc::new(HttpSession::new(&remote.url, remote.timeout()).map_err(PushError::from)?)
    };

    let mut push = Push::new(&main, user, push_config, session)?;
    let report = push.run()?;

    if cli.json {
        let out = serde_json::to_string_pretty(&PushOutput {
            dry_run,
            report: &report,
        })
        .context("serializing push report")?;
        println!("{out}");
    } else {
        print_report(&report, dry_run);
    }
    Ok(())
}

#[derive(Serialize)]
struct PushOutput<'a> {
    dry_run: bool,
    #[serde(flatten)]
    report: &'a PushReport,
}

fn print_report(report: &PushReport, dry_run: bool) {
    let heading = if dry_run {
        "Dry run complete".yellow().bold()
    } else {
        "Push complete".green().bold()
    };
    println!(
        "{heading}: {} file(s) in {} interaction(s) to {} ({})",
        report.files_uploaded(),
        report.interactions.len(),
        report.project_name.bold(),
        report.project_id
    );
    println!("  push id: {}", report.push_id.dimmed());
    for interaction in &report.interactions {
        let id = interaction
            .destination_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        println!(
            "  {} ({}): {} file(s)",
            interaction.destination.cyan(),
            id,
            interaction.files.len()
        );
    }
}

fn run_config(cli: &Cli, config_dir: &Path, kind: ConfigKind) -> Result<()> {
    let written = config::write_defaults(config_dir, kind)?;
    if cli.json {
        let out = serde_json::json!({ "written": written });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for path in &written {
            println!("{} {}", "wrote".green(), path.display());
        }
    }
    Ok(())
}

/// Failure class of an error returned by [`run`].
pub fn error_kind(err: &anyhow::Error) -> ErrorKind {
    if let Some(push) = err.downcast_ref::<PushError>() {
        return push.kind();
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return ErrorKind::Validation;
    }
    ErrorKind::Internal
}

/// Print `err` to stderr and return the process exit code.
pub fn report_error(err: &anyhow::Error, json: bool) -> u8 {
    let kind = error_kind(err);
    let code = kind.exit_code();
    if json {
        let payload = serde_json::json!({
            "error": {
                "kind": kind,
                "message": format!("{err:#}"),
                "exit_code": code,
            }
        });
        eprintln!("{payload}");
    } else {
        eprintln!("{} {err:#}", "error:".red().bold());
    }
    code
}
