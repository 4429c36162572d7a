//! `psync` command line driver

mod simulator;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use psync_core::{
    plan_correction, Correction, FileProfileStore, ProfileSync, RemoteProfileStore, SignalBus,
    SyncConfig,
};
use psync_model::{
    default_profile, ProfileConfig, ProfileId, DEFAULT_PROFILE_ID, DEFAULT_PROFILE_REVISION,
};
use simulator::{run_simulator, SimulatorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("psync")
        .version(psync_core::VERSION)
        .about("Profile list synchronization across windows")
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Sync configuration file (TOML)"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run several windows against one store and check they converge")
                .arg(
                    Arg::new("windows")
                        .long("windows")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of participating windows"),
                )
                .arg(
                    Arg::new("operations")
                        .long("operations")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Number of mutations to issue"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("fault-rate")
                        .long("fault-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a store write fails"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Show the correction a profile file needs")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("repair")
                .about("Reconcile a profile file until the default profile is in place")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("default")
                .about("Print the bundled default profile")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<SyncConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading sync config from {}", path.display())),
        None => Ok(SyncConfig::new()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(args, config).await,
        Some(("check", args)) => check(required_path(args)?).await,
        Some(("repair", args)) => repair(required_path(args)?, config).await,
        Some(("default", args)) => print_default(args.get_flag("json")),
        _ => Ok(()),
    }
}

fn required_path(args: &ArgMatches) -> Result<PathBuf> {
    args.get_one::<PathBuf>("file")
        .cloned()
        .context("missing profile file argument")
}

async fn simulate(args: &ArgMatches, sync: SyncConfig) -> Result<()> {
    let config = SimulatorConfig {
        seed: *args.get_one::<u64>("seed").context("missing --seed")?,
        windows: *args.get_one::<usize>("windows").context("missing --windows")?,
        operations: *args
            .get_one::<u64>("operations")
            .context("missing --operations")?,
        fault_rate: *args
            .get_one::<f64>("fault-rate")
            .context("missing --fault-rate")?,
        sync,
    };

    println!("Running profile sync simulator...");
    println!("Windows: {}", config.windows);
    println!("Operations: {}", config.operations);
    println!("Seed: {}", config.seed);
    println!();

    let report = run_simulator(config).await?;
    println!("{}", report.generate_text());

    std::process::exit(if report.passed() { 0 } else { 1 });
}

async fn check(path: PathBuf) -> Result<()> {
    let store = FileProfileStore::new(path.clone());
    let config = store
        .read_all()
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    println!("{}: {} profiles", path.display(), config.len());
    let needs_fix = match plan_correction(&config, &ProfileId::from(DEFAULT_PROFILE_ID)) {
        Correction::None => {
            println!("default profile in place");
            false
        }
        Correction::Insert => {
            println!("default profile missing: would append it");
            true
        }
        Correction::Reposition(items) => {
            println!("default profile misplaced: would rewrite the list as");
            print_items(&config.with_items(items));
            true
        }
    };

    std::process::exit(i32::from(needs_fix));
}

async fn repair(path: PathBuf, mut config: SyncConfig) -> Result<()> {
    config.ensure_default_profile = true;
    let store = Arc::new(FileProfileStore::new(path.clone()));
    let sync = ProfileSync::new(store, Arc::new(SignalBus::new()), config);

    let initial = sync.start().await?;
    if let Some(err) = initial.error() {
        sync.shutdown().await;
        anyhow::bail!("reading {}: {err}", path.display());
    }

    let settled = sync.settled().await;
    let stats = sync.reconciler().stats();
    sync.shutdown().await;
    let repaired = settled.with_context(|| format!("repairing {}", path.display()))?;

    println!(
        "{}: {} correction(s) applied",
        path.display(),
        stats.corrections
    );
    print_items(&repaired);
    Ok(())
}

fn print_items(config: &ProfileConfig) {
    for (i, item) in config.items.iter().enumerate() {
        let active = if config.current_id.as_ref() == Some(&item.id) {
            "*"
        } else {
            " "
        };
        println!("{active} {:>3}. {:<40} {}", i + 1, item.id, item.name);
    }
}

fn print_default(json: bool) -> Result<()> {
    let descriptor = default_profile();
    if json {
        let value = serde_json::json!({
            "revision": DEFAULT_PROFILE_REVISION,
            "profile": descriptor,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Default Profile (revision {DEFAULT_PROFILE_REVISION})");
        println!("==========================");
        println!("Id:   {DEFAULT_PROFILE_ID}");
        if let Some(name) = &descriptor.name {
            println!("Name: {name}");
        }
        if let Some(url) = &descriptor.source_url {
            println!("Url:  {url}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn simulate_defaults_parse() {
        let matches = cli().try_get_matches_from(["psync", "simulate"]).unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "simulate");
        assert_eq!(args.get_one::<usize>("windows"), Some(&3));
        assert_eq!(args.get_one::<f64>("fault-rate"), Some(&0.1));
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let matches = cli()
            .try_get_matches_from(["psync", "default", "--json", "--log-json"])
            .unwrap();
        assert!(matches.get_flag("log-json"));
    }

    #[test]
    fn missing_config_uses_defaults() {
        let matches = cli().try_get_matches_from(["psync", "default"]).unwrap();
        let config = load_config(&matches).unwrap();
        assert!(config.ensure_default_profile);
    }
}
