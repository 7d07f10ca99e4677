//! boxsmith CLI: pick a recipe, provision a container, print the JSON
//! report. Progress and warnings go to stderr so stdout stays machine
//! readable.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use boxsmith::backend::lxc::{self, LxcBackend};
use boxsmith::recipes::{self, RecipeOptions};
use boxsmith::release;

#[derive(Parser)]
#[command(
    name = "boxsmith",
    version,
    about = "Provision ready-to-use LXC service containers"
)]
struct Cli {
    /// Display each provisioning step as it runs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pass through command output from inside the container
    #[arg(short, long, global = true)]
    debug: bool,

    /// Release codename used when the current stable release cannot be
    /// resolved from the Debian archive
    #[arg(long, global = true, default_value = release::FALLBACK_CODENAME)]
    fallback_release: String,

    #[command(subcommand)]
    recipe: Recipe,
}

#[derive(Subcommand)]
enum Recipe {
    /// Create and start a container running a PostgreSQL database
    Postgresql {
        /// Prefix for the container name and generated identifiers
        #[arg(default_value = "test")]
        prefix: String,
    },
    /// Create and start a container running a barebones Django site
    Django {
        /// Prefix for the container name and generated identifiers
        #[arg(default_value = "test")]
        prefix: String,
    },
    /// Create a container with the PyDev IDE installed, plus a host launcher
    Pydev {
        /// Prefix for the container name and generated identifiers
        #[arg(default_value = "test")]
        prefix: String,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Host name for config entries that must admit connections from the host.
/// Resolved here, once, and passed into the recipes explicitly.
fn host_name() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|name| name.trim().to_string())
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Resolution failure is never fatal; fall back to the pinned codename.
    let release_codename =
        release::stable_codename().unwrap_or_else(|| cli.fallback_release.clone());

    let options = |prefix: &str| RecipeOptions {
        prefix: prefix.to_string(),
        release: release_codename.clone(),
        host_name: host_name(),
        lxc_data_dir: lxc::default_data_dir(),
        debug: cli.debug,
    };

    let backend = LxcBackend::new();
    let result = match &cli.recipe {
        Recipe::Postgresql { prefix } => recipes::postgresql::run(&backend, &options(prefix)),
        Recipe::Django { prefix } => recipes::django::run(&backend, &options(prefix)),
        Recipe::Pydev { prefix } => recipes::pydev::run(&backend, &options(prefix)),
    };

    match result.map(|report| report.to_json()) {
        Ok(Ok(json)) => println!("{json}"),
        Ok(Err(err)) => {
            eprintln!("Error: {err}!");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Error: {err}!");
            std::process::exit(1);
        }
    }
}
