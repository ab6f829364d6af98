//! canirun - can this PC run a game?
//!
//! Detects the local hardware, looks up the game's published PC requirements
//! and asks an AI backend for an honest comparison:
//! - Hardware detection never fails; unknown parts are reported as such
//! - Requirements come from the Steam store
//! - The analysis runs on a hosted API, a local server, or an in-process model

mod catalog;
mod config;
mod hardware;
mod inference;
mod logging;
mod orchestrator;
mod report;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::io::{self, IsTerminal, Write};
use std::process::ExitCode;
use tracing::{debug, warn};

use crate::catalog::CatalogClient;
use crate::config::{BackendKind, Config};
use crate::hardware::{HardwareProbe, Resolution};
use crate::orchestrator::{
    CompatibilityOrchestrator, CompatibilityReport, FailureReason, RunEvent, RunFailure, Stage,
};

#[cfg(target_os = "windows")]
use windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE;
#[cfg(target_os = "windows")]
use windows_sys::Win32::System::Console::{
    GetConsoleMode, GetStdHandle, SetConsoleMode, SetConsoleOutputCP,
    ENABLE_PROCESSED_OUTPUT, ENABLE_VIRTUAL_TERMINAL_PROCESSING, STD_OUTPUT_HANDLE,
};

const DEFAULT_GAME: &str = "Cyberpunk 2077";

/// canirun - Check whether your PC can run a game
#[derive(Parser)]
#[command(name = "canirun")]
#[command(version)]
#[command(about = "Compare your PC against a game's requirements with an AI verdict")]
struct Cli {
    /// Show debug logs on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether this PC can run a game
    Check {
        /// Game name (e.g. "Cyberpunk 2077"); quotes are optional
        #[arg(required = true, num_args = 1..)]
        game: Vec<String>,

        /// Inference backend for this run
        #[arg(short, long, value_enum)]
        backend: Option<BackendKind>,

        /// Target resolution instead of the detected one (e.g. "1440p", "3840x2160")
        #[arg(short, long)]
        resolution: Option<Resolution>,
    },

    /// Detect and display your system hardware
    Specs {
        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Search the game catalog
    Search {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,

        /// Maximum number of matches to list
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },

    /// Show the PC requirements of the best catalog match
    Requirements {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },

    /// Show configuration file location and effective settings
    Config {
        /// Write the default configuration file if none exists
        #[arg(long, default_value_t = false)]
        init: bool,
    },
}

fn main() -> Result<ExitCode> {
    #[cfg(target_os = "windows")]
    init_windows_console();

    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Some(Commands::Check {
            game,
            backend,
            resolution,
        }) => {
            let mut config = load_config();
            if let Some(backend) = backend {
                config.inference.backend = backend;
            }
            run_check(&config, &game.join(" "), resolution)
        }
        Some(Commands::Specs { json }) => {
            show_specs(&load_config(), json)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Search { name, limit }) => run_search(&load_config(), &name.join(" "), limit),
        Some(Commands::Requirements { name }) => run_requirements(&load_config(), &name.join(" ")),
        Some(Commands::Config { init }) => {
            show_config_info(init)?;
            Ok(ExitCode::SUCCESS)
        }
        None => run_interactive(),
    }
}

/// File plus environment overrides; a broken file falls back to defaults.
fn load_config() -> Config {
    match Config::resolve() {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "configuration unusable, using defaults");
            println!(
                "{} {}",
                "Config ignored:".bright_yellow(),
                format!("{:#}", err).bright_black()
            );
            Config::default()
        }
    }
}

/// No subcommand: ask for a game and run one check.
fn run_interactive() -> Result<ExitCode> {
    print_welcome();
    let config = load_config();

    if !io::stdin().is_terminal() {
        println!(
            "{}",
            format!("No game given, checking {}.", DEFAULT_GAME).bright_black()
        );
        return run_check(&config, DEFAULT_GAME, None);
    }

    print!(
        "{} ",
        format!("Enter a game name (default: {}):", DEFAULT_GAME).bright_white()
    );
    let input = read_line();
    let game = if input.is_empty() {
        DEFAULT_GAME.to_string()
    } else {
        input
    };
    println!();
    run_check(&config, &game, None)
}

fn run_check(config: &Config, game: &str, resolution: Option<Resolution>) -> Result<ExitCode> {
    let orchestrator = CompatibilityOrchestrator::from_config(config);
    println!(
        "{} {} {}",
        "Checking".bright_cyan(),
        game.bright_white().bold(),
        format!("(backend: {})", orchestrator.backend().name()).bright_black()
    );

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async {
        let mut handle = orchestrator.start(game, resolution);
        debug!(run_id = %handle.id(), "check started");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut interrupted = false;

        loop {
            tokio::select! {
                _ = &mut ctrl_c, if !interrupted => {
                    interrupted = true;
                    println!("  {}", "Cancelling...".bright_yellow());
                    handle.cancel();
                }
                event = handle.next_event() => match event {
                    Some(RunEvent::Stage(stage)) => print_stage(stage),
                    Some(RunEvent::Finished(outcome)) => return Some(outcome),
                    None => return None,
                },
            }
        }
    });

    match outcome {
        Some(Ok(report)) => {
            print_report(&report);
            Ok(ExitCode::SUCCESS)
        }
        Some(Err(failure)) => {
            print_failure(&failure);
            Ok(ExitCode::FAILURE)
        }
        None => anyhow::bail!("the check ended without a result"),
    }
}

fn print_stage(stage: Stage) {
    match stage {
        Stage::Done | Stage::Failed | Stage::Idle => {}
        _ => println!("  {} {}...", "→".bright_cyan(), stage.to_string().bright_white()),
    }
}

fn print_report(summary: &CompatibilityReport) {
    println!();
    println!("{}", report::format_specs(&summary.specs));
    println!("{}", report::format_requirements(&summary.requirements));
    if !summary.requirements.has_minimum() && !summary.requirements.has_recommended() {
        println!(
            "{}",
            "The store lists no PC requirements for this game; the analysis is a best guess."
                .bright_yellow()
        );
    }
    if summary.target_resolution != summary.specs.resolution {
        println!(
            "{} {}",
            "Target resolution:".bright_yellow(),
            summary.target_resolution.to_string().bright_white()
        );
    }

    println!();
    println!(
        "{}",
        format!("CAN I RUN {}?", summary.game.name.to_uppercase())
            .bright_green()
            .bold()
    );
    println!("{}", "=".repeat(50).bright_green());
    println!("{}", summary.analysis);
}

fn print_failure(failure: &RunFailure) {
    println!();
    match &failure.reason {
        FailureReason::NoCredential(instructions) => {
            println!("{}", "Setup required".bright_yellow().bold());
            println!("{}", instructions);
        }
        FailureReason::GameNotFound(msg) => {
            println!("{} {}", "✗".bright_red(), msg.bright_red());
            println!(
                "{}",
                "Try the exact store name, or `canirun search <name>` to see matches.".bright_black()
            );
        }
        FailureReason::Cancelled => {
            println!("{}", "Check cancelled.".bright_yellow());
        }
        FailureReason::RequirementsUnavailable(msg)
        | FailureReason::BackendUnreachable(msg)
        | FailureReason::BackendError(msg) => {
            println!(
                "{} {}",
                format!("✗ {} failed:", failure.stage).bright_red(),
                msg.bright_red()
            );
        }
    }
}

fn show_specs(config: &Config, json: bool) -> Result<()> {
    let probe = HardwareProbe::for_current_os(config.probe.command_timeout());
    if !json {
        println!(
            "{}",
            format!("Detecting hardware ({})...", probe.platform().os_family()).bright_cyan()
        );
    }
    let specs = probe.probe();

    if json {
        let text = serde_json::to_string_pretty(&specs).context("Failed to serialize specs")?;
        println!("{}", text);
    } else {
        println!();
        print!("{}", report::format_specs(&specs));
    }
    Ok(())
}

fn run_search(config: &Config, name: &str, limit: usize) -> Result<ExitCode> {
    let catalog = CatalogClient::new(&config.catalog);
    let rt = tokio::runtime::Runtime::new()?;
    let results = rt.block_on(catalog.search(name));

    if results.is_empty() {
        println!(
            "{} '{}'",
            "No games found matching".bright_red(),
            name.bright_yellow()
        );
        return Ok(ExitCode::FAILURE);
    }

    let (shown, more) = listing_counts(results.len(), limit);
    println!("{}", "Matches:".bright_cyan().bold());
    for (index, game) in results.iter().take(shown).enumerate() {
        println!(
            "  {} {} {}",
            format!("{}.", index + 1).bright_cyan(),
            game.name.bright_white(),
            format!("(id {})", game.catalog_id).bright_black()
        );
    }
    if more > 0 {
        println!("{}", format!("  ... and {} more", more).bright_black());
    }
    Ok(ExitCode::SUCCESS)
}

/// Rows to print and rows left over; at least one match is always listed.
fn listing_counts(total: usize, limit: usize) -> (usize, usize) {
    let shown = total.min(limit.max(1));
    (shown, total - shown)
}

fn run_requirements(config: &Config, name: &str) -> Result<ExitCode> {
    let catalog = CatalogClient::new(&config.catalog);
    let rt = tokio::runtime::Runtime::new()?;

    let outcome = rt.block_on(async {
        let game = catalog.search(name).await.into_iter().next()?;
        Some(catalog.fetch_requirements(game.catalog_id).await)
    });

    match outcome {
        None => {
            println!(
                "{} '{}'",
                "No games found matching".bright_red(),
                name.bright_yellow()
            );
            Ok(ExitCode::FAILURE)
        }
        Some(Err(err)) => {
            println!("{} {}", "✗".bright_red(), err.to_string().bright_red());
            Ok(ExitCode::FAILURE)
        }
        Some(Ok(requirements)) => {
            print!("{}", report::format_requirements(&requirements));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn show_config_info(init: bool) -> Result<()> {
    println!("{}", "canirun Configuration\n".bright_cyan().bold());

    match config::get_config_path() {
        Ok(path) => {
            println!("{} {}", "Config file:".bright_yellow(), path.bright_white());
            if std::path::Path::new(&path).exists() {
                println!("  {} {}", "Status:".bright_cyan(), "Exists".bright_green());
            } else if !init {
                println!(
                    "  {} {}",
                    "Status:".bright_cyan(),
                    "Not created yet (using defaults; `canirun config --init` writes one)"
                        .bright_yellow()
                );
            }
        }
        Err(e) => {
            println!(
                "{} Could not determine config path: {}",
                "Error:".bright_red(),
                e
            );
        }
    }

    if init {
        Config::init().context("Failed to write default config")?;
        println!("  {} {}", "Status:".bright_cyan(), "Written".bright_green());
    }

    let cfg = load_config();
    println!("\n{}", "Effective settings:".bright_white().bold());
    let text = toml::to_string_pretty(&cfg).context("Failed to render config")?;
    for line in text.lines() {
        println!("  {}", line);
    }
    Ok(())
}

fn print_welcome() {
    println!("{}", "canirun".bright_cyan().bold());
    println!(
        "{}",
        "Compares your PC against a game's published requirements and asks an AI".bright_white()
    );
    println!("{}", "for an honest verdict.\n".bright_white());
}

fn read_line() -> String {
    let _ = io::stdout().flush();
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap_or_default();
    input.trim().to_string()
}

#[cfg(target_os = "windows")]
fn init_windows_console() {
    // Best-effort ANSI colors in legacy consoles; fails harmlessly when redirected.
    unsafe {
        let _ = SetConsoleOutputCP(65001);

        let handle = GetStdHandle(STD_OUTPUT_HANDLE);
        if handle.is_null() || handle == INVALID_HANDLE_VALUE {
            return;
        }

        let mut mode: u32 = 0;
        if GetConsoleMode(handle, &mut mode) == 0 {
            return;
        }
        let _ = SetConsoleMode(
            handle,
            mode | ENABLE_PROCESSED_OUTPUT | ENABLE_VIRTUAL_TERMINAL_PROCESSING,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn check_accepts_unquoted_names_and_labels() {
        let cli = Cli::try_parse_from([
            "canirun",
            "check",
            "Half-Life",
            "2",
            "--backend",
            "in-process",
            "--resolution",
            "1440p",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Check {
                game,
                backend,
                resolution,
            }) => {
                assert_eq!(game.join(" "), "Half-Life 2");
                assert_eq!(backend, Some(BackendKind::InProcess));
                assert_eq!(resolution, Some(Resolution::new(2560, 1440)));
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn bad_resolution_is_rejected() {
        assert!(Cli::try_parse_from(["canirun", "check", "Doom", "-r", "huge"]).is_err());
    }

    #[test]
    fn no_subcommand_is_interactive() {
        let cli = Cli::try_parse_from(["canirun", "-v"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.verbose);
    }

    #[test]
    fn search_footer_counts_what_was_not_listed() {
        assert_eq!(listing_counts(5, 0), (1, 4));
        assert_eq!(listing_counts(5, 3), (3, 2));
        assert_eq!(listing_counts(2, 10), (2, 0));
    }
}
