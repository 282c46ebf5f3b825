//! rbacfs - mount a directory tree behind a role-based access control policy.
//!
//! ```text
//! rbacfs [OPTIONS] <MOUNT> <ROOT> <DEFS>
//! rbacfs --check <DEFS>
//! ```
//!
//! Logging goes to stderr, filtered by `RUST_LOG`, then `RBACFS_LOG`, then
//! `info`.

mod config;
mod error;
#[cfg(feature = "fuse")]
mod fuse;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use rbacfs_policy::Policy;
use rbacfs_vfs::{Dispatcher, Passthrough};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::MountConfig;
use crate::error::StartupError;

#[derive(Parser, Debug)]
#[command(name = "rbacfs")]
#[command(version, about = "Mount a directory tree behind a role-based access control policy")]
struct Cli {
    /// Directory to mount on
    #[arg(required_unless_present = "check")]
    mount: Option<PathBuf>,

    /// Backing directory whose contents are exposed
    #[arg(required_unless_present = "check")]
    root: Option<PathBuf>,

    /// RBAC definitions file
    #[arg(required_unless_present = "check")]
    defs: Option<PathBuf>,

    /// Mount option: allow_other, ro, rw, default_permissions, auto_unmount
    #[arg(short = 'o', value_name = "OPTION")]
    options: Vec<String>,

    /// Compile a definitions file, print its summary as JSON and exit
    #[arg(long, value_name = "DEFS", conflicts_with_all = ["mount", "root", "defs"])]
    check: Option<PathBuf>,

    /// Runtime worker threads (overrides RBACFS_WORKERS)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    init_tracing();

    let result = match &cli.check {
        Some(defs) => check(defs),
        None => run(&cli),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("RBACFS_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_policy(defs: &Path) -> Result<Policy, StartupError> {
    rbacfs_policy::load(defs).map_err(|source| StartupError::Definitions {
        path: defs.to_path_buf(),
        source,
    })
}

/// `--check`: compile and summarize without mounting.
fn check(defs: &Path) -> Result<(), StartupError> {
    let policy = load_policy(defs)?;
    let json = serde_json::to_string_pretty(&policy.summary()).map_err(StartupError::Summary)?;
    println!("{json}");
    Ok(())
}

fn run(cli: &Cli) -> Result<(), StartupError> {
    let (Some(mountpoint), Some(root), Some(defs)) = (&cli.mount, &cli.root, &cli.defs) else {
        // clap enforces the positionals outside --check
        return Ok(());
    };

    let mut config = MountConfig::from_env()?;
    for option in &cli.options {
        config.apply_mount_option(option)?;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;

    let policy = load_policy(defs)?;
    let backend = Passthrough::new(root)
        .map_err(|source| StartupError::Root {
            path: root.clone(),
            source,
        })?
        .with_read_only(config.read_only);

    tracing::info!(
        mountpoint = %mountpoint.display(),
        root = %backend.root().display(),
        read_only = config.read_only,
        workers = config.workers,
        "Starting rbacfs"
    );

    let dispatcher = Dispatcher::new(Arc::new(policy), backend);
    mount(&config, mountpoint, dispatcher)
}

#[cfg(feature = "fuse")]
fn mount(config: &MountConfig, mountpoint: &Path, dispatcher: Dispatcher<Passthrough>) -> Result<(), StartupError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .thread_name("rbacfs-worker")
        .enable_all()
        .build()
        .map_err(StartupError::Runtime)?;

    fuse::mount(config, mountpoint, dispatcher, runtime.handle().clone()).map_err(StartupError::Mount)?;
    tracing::info!(mountpoint = %mountpoint.display(), "Unmounted");
    Ok(())
}

#[cfg(not(feature = "fuse"))]
fn mount(_config: &MountConfig, _mountpoint: &Path, _dispatcher: Dispatcher<Passthrough>) -> Result<(), StartupError> {
    Err(StartupError::FuseUnavailable)
}
