//! evtresolve: provider database management tool.
//!
//! Entry point: initialises structured logging, parses the command line and
//! runs one database operation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::Layer as _;

use evtresolve::core::provider_details::ProviderDetails;
use evtresolve::database;
use evtresolve::resolver::database::sort_database_paths;
use evtresolve::util::settings::ResolverSettings;
use evtresolve::util::constants;

fn cli() -> Command {
    let filter = || {
        Arg::new("filter")
            .long("filter")
            .short('f')
            .value_name("TEXT")
            .help("Only providers whose name contains TEXT (case-insensitive)")
    };
    let json = || {
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("Print full provider details as JSON")
    };

    Command::new(constants::APP_NAME)
        .version(constants::APP_VERSION)
        .about("Build, inspect and maintain event provider databases")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("create")
                .about("Create a database from the providers registered on this machine")
                .arg(Arg::new("path").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(filter()),
        )
        .subcommand(
            Command::new("merge")
                .about("Copy every provider of SOURCE into TARGET")
                .arg(Arg::new("source").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(Arg::new("target").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(
                    Arg::new("overwrite")
                        .long("overwrite")
                        .action(ArgAction::SetTrue)
                        .help("Replace providers already present in TARGET"),
                ),
        )
        .subcommand(
            Command::new("diff")
                .about("Write the providers of B that A lacks to a new database OUT")
                .arg(Arg::new("a").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(Arg::new("b").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(Arg::new("out").required(true).value_parser(clap::value_parser!(PathBuf))),
        )
        .subcommand(
            Command::new("showlocal")
                .about("Show the metadata of providers registered on this machine")
                .arg(filter())
                .arg(json()),
        )
        .subcommand(
            Command::new("showdatabase")
                .about("Show the providers stored in a database")
                .arg(Arg::new("path").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(filter())
                .arg(json()),
        )
        .subcommand(
            Command::new("settings")
                .about("Show resolver settings and the database search order")
                .arg(
                    Arg::new("save")
                        .long("save")
                        .action(ArgAction::SetTrue)
                        .help("Write the effective settings back to the settings file"),
                ),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade a database to the current format")
                .arg(Arg::new("path").required(true).value_parser(clap::value_parser!(PathBuf))),
        )
}

fn main() -> Result<()> {
    let log_dir = init_log_dir();
    init_logging(&log_dir);

    tracing::info!("{} v{} starting", constants::APP_NAME, constants::APP_VERSION);
    if let Some(dir) = &log_dir {
        tracing::debug!("Log file: {}", dir.join(constants::LOG_FILE_NAME).display());
    }

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("create", m)) => run_create(path_arg(m, "path"), filter_arg(m)),
        Some(("merge", m)) => {
            let summary = database::merge(
                path_arg(m, "source"),
                path_arg(m, "target"),
                m.get_flag("overwrite"),
            )?;
            println!(
                "{} added, {} replaced, {} skipped",
                summary.added, summary.replaced, summary.skipped
            );
            Ok(())
        }
        Some(("diff", m)) => {
            let written = database::diff(path_arg(m, "a"), path_arg(m, "b"), path_arg(m, "out"))?;
            println!("{written} providers written");
            Ok(())
        }
        Some(("showlocal", m)) => {
            let providers = load_local(filter_arg(m))?;
            print_providers(&providers, m.get_flag("json"))
        }
        Some(("showdatabase", m)) => {
            let path = path_arg(m, "path");
            let providers = database::show_database(path, filter_arg(m))
                .with_context(|| format!("reading {}", path.display()))?;
            print_providers(&providers, m.get_flag("json"))
        }
        Some(("upgrade", m)) => run_upgrade(path_arg(m, "path")),
        Some(("settings", m)) => run_settings(m.get_flag("save")),
        _ => unreachable!("clap enforces a subcommand"),
    }
}

fn path_arg<'a>(m: &'a ArgMatches, name: &str) -> &'a Path {
    m.get_one::<PathBuf>(name)
        .map(PathBuf::as_path)
        .unwrap_or_else(|| Path::new(""))
}

fn filter_arg(m: &ArgMatches) -> Option<&str> {
    m.get_one::<String>("filter").map(String::as_str)
}

fn run_create(path: &Path, filter: Option<&str>) -> Result<()> {
    let providers: Vec<ProviderDetails> = load_local(filter)?
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
    let count = database::create(path, &providers)
        .with_context(|| format!("creating {}", path.display()))?;
    println!("{count} providers written to {}", path.display());
    Ok(())
}

fn run_upgrade(path: &Path) -> Result<()> {
    let (needs_v2, needs_v3) = database::needs_upgrade(path)?;
    if !needs_v2 && !needs_v3 {
        println!("{} is already current", path.display());
        return Ok(());
    }
    let start = std::time::Instant::now();
    database::upgrade(path).with_context(|| format!("upgrading {}", path.display()))?;
    println!(
        "{} upgraded in {}",
        path.display(),
        evtresolve::util::time::format_duration(start.elapsed())
    );
    Ok(())
}

fn run_settings(save: bool) -> Result<()> {
    let path = ResolverSettings::default_path()
        .context("LOCALAPPDATA is not set; no settings location")?;
    let settings = ResolverSettings::load(&path);
    println!("{}", path.display());
    println!("{}", serde_json::to_string_pretty(&settings)?);

    let mut databases = settings.database_paths();
    sort_database_paths(&mut databases);
    if databases.is_empty() {
        println!("No provider databases configured; local metadata is used");
    }
    for (i, db) in databases.iter().enumerate() {
        println!("{:>3}. {}", i + 1, db.display());
    }

    if save {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        settings
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Settings saved");
    }
    Ok(())
}

#[cfg(windows)]
fn load_local(filter: Option<&str>) -> Result<Vec<ProviderDetails>> {
    Ok(evtresolve::resolver::local::show_local(filter)?)
}

#[cfg(not(windows))]
fn load_local(_filter: Option<&str>) -> Result<Vec<ProviderDetails>> {
    anyhow::bail!("reading local provider metadata requires Windows")
}

fn print_providers(providers: &[ProviderDetails], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(providers)?);
    } else {
        for p in providers {
            println!("{}", p.summary());
        }
    }
    println!("{} providers", providers.len());
    Ok(())
}

/// Create the persistent log directory under `%LOCALAPPDATA%`.
///
/// Returns `Some(path)` to the log directory on success, `None` if the
/// directory cannot be created (logging falls back to stderr only).
fn init_log_dir() -> Option<PathBuf> {
    let local_app_data = std::env::var("LOCALAPPDATA").ok()?;
    let log_dir = PathBuf::from(local_app_data)
        .join(constants::APP_DATA_DIR)
        .join(constants::LOG_DIR);
    std::fs::create_dir_all(&log_dir).ok()?;

    // Rotate the log file if it exceeds the size limit.
    let log_file = log_dir.join(constants::LOG_FILE_NAME);
    if let Ok(meta) = std::fs::metadata(&log_file) {
        if meta.len() > constants::MAX_LOG_FILE_SIZE {
            let backup = log_dir.join(format!("{}.old", constants::LOG_FILE_NAME));
            let _ = std::fs::rename(&log_file, &backup);
        }
    }

    Some(log_dir)
}

/// Initialise the dual-layer tracing subscriber.
///
/// - **stderr layer**: filtered by `RUST_LOG` env var (default: `info`).
/// - **file layer** (if `log_dir` is `Some`): always writes at `debug` level.
fn init_logging(log_dir: &Option<PathBuf>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    if let Some(dir) = log_dir {
        let log_path = dir.join(constants::LOG_FILE_NAME);
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .with_filter(tracing_subscriber::EnvFilter::new("debug"));

            tracing_subscriber::registry()
                .with(stderr_layer.with_filter(env_filter))
                .with(file_layer)
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(stderr_layer.with_filter(env_filter))
        .init();
}
