//! meetupfinder - find upcoming meetups near a coordinate.
//!
//! Looks events up through the directory API and keeps one cached result set
//! per geo bucket, so repeated lookups nearby are served from the cache.

mod format;

use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use meetupfinder_core::auth::{resolve_api_key, CredentialStore};
use meetupfinder_core::config::API_KEY_ENV;
use meetupfinder_core::{
    CacheBackend, CacheStore, Config, Coordinate, EventRepository, EventSnapshot, FileStore,
    FirebaseStore, GeoKeyer, MeetupClient, MemoryStore, SnapshotOrigin,
};

// ============================================================================
// Constants
// ============================================================================

/// Log file written inside the configured log directory
const LOG_FILE_NAME: &str = "meetupfinder.log";

const USAGE: &str = "\
Usage:
  meetupfinder <latitude> <longitude> [--open]   list events near a coordinate
  meetupfinder --store-key <api-key>             save the API key in the OS keychain
  meetupfinder --forget-key                      remove the saved API key
  meetupfinder --help                            show this message

Options:
  --open    only list events that still accept RSVPs and have a venue

Environment:
  MEETUP_API_KEY               directory API key (overrides the keychain)
  MEETUPFINDER_FIREBASE_URL    use this Firebase database as the cache
  MEETUPFINDER_CACHE_BACKEND   firebase | file | memory
  RUST_LOG                     log filter (default: warn)";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Find { coord: Coordinate, open_only: bool },
    StoreKey(String),
    ForgetKey,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let mut positional = Vec::new();
    let mut open_only = false;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--forget-key" => return Ok(Command::ForgetKey),
            "--store-key" => {
                let key = iter.next().context("--store-key needs a value")?;
                return Ok(Command::StoreKey(key.clone()));
            }
            "--open" => open_only = true,
            flag if flag.starts_with("--") => bail!("Unknown option: {}", flag),
            value => positional.push(value),
        }
    }

    match positional.as_slice() {
        [lat, lon] => {
            let latitude: f64 = lat
                .parse()
                .with_context(|| format!("Invalid latitude: {}", lat))?;
            let longitude: f64 = lon
                .parse()
                .with_context(|| format!("Invalid longitude: {}", lon))?;
            Ok(Command::Find {
                coord: Coordinate::new(latitude, longitude),
                open_only,
            })
        }
        [] => Ok(Command::Help),
        _ => bail!("Expected <latitude> <longitude>"),
    }
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, or to a file in `log_dir` when one is configured. The
/// returned guard must be held until exit so buffered file logs are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    run(command, Config::load).await
}

/// Dispatch a command. Only lookups read the config file, so help and the
/// keychain commands still work when it is missing or broken.
async fn run<L>(command: Command, load_config: L) -> Result<()>
where
    L: FnOnce() -> Result<Config>,
{
    match command {
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        Command::StoreKey(key) => {
            let _log_guard = init_tracing(None);
            CredentialStore::store_api_key(&key)?;
            println!("API key saved to the keychain");
            Ok(())
        }
        Command::ForgetKey => {
            let _log_guard = init_tracing(None);
            CredentialStore::delete_api_key()?;
            println!("API key removed from the keychain");
            Ok(())
        }
        Command::Find { coord, open_only } => {
            let config = load_config()?;
            let _log_guard = init_tracing(config.log_dir.as_deref());
            find(&config, coord, open_only).await
        }
    }
}

async fn find(config: &Config, coord: Coordinate, open_only: bool) -> Result<()> {
    let api_key = resolve_api_key(std::env::var(API_KEY_ENV).ok())?;
    let source = MeetupClient::with_timeout(api_key, Duration::from_secs(config.request_timeout_secs))?
        .with_endpoint(config.api_base_url.clone(), config.find_events_method.clone());
    let keyer = GeoKeyer::new(config.key_precision)?;

    info!(%coord, backend = ?config.cache_backend, "Looking up nearby events");

    match config.cache_backend {
        CacheBackend::Firebase => {
            let url = config
                .firebase_url
                .as_deref()
                .context("The firebase cache backend needs firebase_url (or MEETUPFINDER_FIREBASE_URL)")?;
            let store = FirebaseStore::new(
                url,
                config.firebase_auth.clone(),
                Duration::from_secs(config.request_timeout_secs),
            )?;
            lookup(source, store, keyer, coord, open_only).await
        }
        CacheBackend::File => {
            let store = FileStore::new(config.cache_dir()?)?;
            lookup(source, store, keyer, coord, open_only).await
        }
        CacheBackend::Memory => lookup(source, MemoryStore::new(), keyer, coord, open_only).await,
    }
}

async fn lookup<C>(
    source: MeetupClient,
    store: C,
    keyer: GeoKeyer,
    coord: Coordinate,
    open_only: bool,
) -> Result<()>
where
    C: CacheStore + Send + Sync + 'static,
{
    let repository = EventRepository::new(source, store, keyer);
    let snapshot = repository.fetch_nearby(coord).await?;
    print_snapshot(&snapshot, coord, open_only);
    Ok(())
}

fn print_snapshot(snapshot: &EventSnapshot, coord: Coordinate, open_only: bool) {
    let events = if open_only {
        &snapshot.open_events
    } else {
        &snapshot.all_events
    };

    let origin = match snapshot.origin {
        SnapshotOrigin::Cache => "cached",
        SnapshotOrigin::Remote => "live",
        SnapshotOrigin::Stale | SnapshotOrigin::Empty => "lookup failed",
    };

    println!(
        "{} {} near {} ({}, {} open of {})",
        events.len(),
        if open_only { "open events" } else { "events" },
        coord,
        origin,
        snapshot.open_events.len(),
        snapshot.all_events.len(),
    );
    for event in events {
        println!("{}", format::event_line(event));
    }
}
