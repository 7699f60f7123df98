//! countrycache - browse the REST Countries catalogue from the terminal.
//!
//! Reads are served from the local store when possible, so `list` and
//! `show` keep working offline once a country has been seen.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use countrycache_core::utils::{format_optional, format_population};
use countrycache_core::{Config, Country, CountryRepository, EntityKind, RequestStatus};

// ============================================================================
// Constants
// ============================================================================

/// Overrides `api_base_url` from the config file
const ENV_API_URL: &str = "COUNTRYCACHE_API_URL";

/// Overrides `cache_dir` from the config file
const ENV_CACHE_DIR: &str = "COUNTRYCACHE_CACHE_DIR";

/// Exit status for bad command-line arguments
const USAGE_ERROR: u8 = 2;

const USAGE: &str = "\
Usage:
  countrycache list [--refresh]
  countrycache show <name> [--refresh]

Options:
  --refresh   Skip the local cache and fetch from the network

Environment:
  RUST_LOG                 Log filter (default: warn)
  COUNTRYCACHE_API_URL     API base URL
  COUNTRYCACHE_CACHE_DIR   Cache directory";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    List { refresh: bool },
    Show { name: String, refresh: bool },
    Help,
}

impl Command {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut refresh = false;
        let mut positional = Vec::new();
        for arg in args {
            match arg.as_str() {
                "--refresh" | "-r" => refresh = true,
                "--help" | "-h" => return Ok(Command::Help),
                flag if flag.starts_with('-') => return Err(format!("Unknown option: {}", flag)),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        match positional.next().as_deref() {
            None | Some("help") => Ok(Command::Help),
            Some("list") => match positional.next() {
                None => Ok(Command::List { refresh }),
                Some(extra) => Err(format!("Unexpected argument: {}", extra)),
            },
            Some("show") => {
                let name = positional.collect::<Vec<_>>().join(" ");
                if name.trim().is_empty() {
                    Err("show needs a country name".to_string())
                } else {
                    Ok(Command::Show { name, refresh })
                }
            }
            Some(other) => Err(format!("Unknown command: {}", other)),
        }
    }

    fn kind(&self) -> Option<EntityKind> {
        match self {
            Command::List { .. } => Some(EntityKind::List),
            Command::Show { .. } => Some(EntityKind::Detail),
            Command::Help => None,
        }
    }
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=countrycache_core=debug)
fn init_tracing() -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

/// Config file values, with environment overrides applied on top.
fn load_config() -> Result<Config> {
    let mut config = Config::load()?;
    if let Ok(url) = std::env::var(ENV_API_URL) {
        config.api_base_url = Some(url);
    }
    if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
        config.cache_dir = Some(PathBuf::from(dir));
    }
    Ok(config)
}

/// Parse the arguments into a command to run, or the exit status to stop with
/// after printing usage.
fn parse_command(args: impl IntoIterator<Item = String>) -> Result<Command, u8> {
    match Command::parse(args) {
        Ok(Command::Help) => {
            println!("{}", USAGE);
            Err(0)
        }
        Ok(command) => Ok(command),
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            Err(USAGE_ERROR)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let command = match parse_command(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(code) => return Ok(ExitCode::from(code)),
    };

    // Dropping the guard on return flushes buffered log lines
    let _log_guard = init_tracing();

    let config = load_config()?;
    debug!(?config, "Config loaded");
    let repo = CountryRepository::from_config(&config)?;
    info!("countrycache starting");

    let result = run(&repo, &command).await;
    repo.shutdown().await;
    result.map(|()| ExitCode::SUCCESS)
}

async fn run(repo: &CountryRepository, command: &Command) -> Result<()> {
    let Some(kind) = command.kind() else {
        return Ok(());
    };

    match command {
        Command::List { refresh: true } => repo.refresh_countries(),
        Command::List { refresh: false } => repo.load_countries(),
        Command::Show { name, refresh: true } => repo.refresh_country(name),
        Command::Show { name, refresh: false } => repo.load_country(name),
        Command::Help => {}
    }

    let Some(status) = wait_settled(repo, kind).await? else {
        eprintln!("Cancelled.");
        return Ok(());
    };

    match command {
        Command::List { .. } => print_list(repo, status),
        Command::Show { name, .. } => print_country(repo, name, status),
        Command::Help => {}
    }
    Ok(())
}

/// Wait until `kind` stops loading. Ctrl-C cancels the request and yields `None`.
async fn wait_settled(repo: &CountryRepository, kind: EntityKind) -> Result<Option<RequestStatus>> {
    let mut status = repo.status(kind);
    tokio::select! {
        settled = status.wait_for(|s| !s.loading) => Ok(Some(*settled?)),
        _ = tokio::signal::ctrl_c() => {
            repo.cancel(kind);
            Ok(None)
        }
    }
}

fn print_list(repo: &CountryRepository, status: RequestStatus) {
    let countries = repo.countries().borrow().clone();
    match countries {
        Some(countries) => {
            for country in &countries {
                println!("{}", country.name);
            }
            println!("\n{} countries", countries.len());
            if status.failed {
                eprintln!("Warning: showing cached data, the network request failed");
            }
        }
        None if status.failed => eprintln!("Could not load countries. Check your connection and try again."),
        None => eprintln!("No countries found."),
    }
}

fn print_country(repo: &CountryRepository, name: &str, status: RequestStatus) {
    let country = repo.country().borrow().clone();
    let Some(country) = country else {
        if status.failed {
            eprintln!("Could not load {}. Check the name and your connection.", name.trim());
        } else {
            eprintln!("No data for {}.", name.trim());
        }
        return;
    };

    println!("{}", render_country(&country));
    if let Some(cached) = repo.store().get(&country.name) {
        println!("{:<12}{}", "Cached:", cached.age_display());
    }
}

fn render_country(country: &Country) -> String {
    let population = country
        .population
        .map(format_population)
        .unwrap_or_else(|| "-".to_string());
    let currencies = country.currency_names();
    let languages = country.language_names();

    [
        ("Name:", country.name.clone()),
        ("Capital:", format_optional(country.capital.as_deref(), "-")),
        ("Population:", population),
        ("Currencies:", format_optional(Some(currencies.as_str()), "-")),
        ("Languages:", format_optional(Some(languages.as_str()), "-")),
        ("Flag:", format_optional(country.flag.as_deref(), "-")),
    ]
    .iter()
    .map(|(label, value)| format!("{:<12}{}", label, value))
    .collect::<Vec<_>>()
    .join("\n")
}
