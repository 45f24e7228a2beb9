//! gpkg entrypoint: the grim plugin package manager.
//!
//! Thin CLI over `core-package`. Exit codes are part of the contract:
//! 0 success, 1 not found, 2 fetch/build/verification failure.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use core_package::install::{detect_artifacts, install_pack, update_all};
use core_package::{
    LockGuard, Lockfile, Pack, PackageError, VerifyStatus, build_plugin, install_plugin,
    list_installed, lockfile_path, plugins_dir, remove_plugin, verify,
};
use core_plugin::manifest::{MANIFEST_FILE, PluginManifest};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;
const EXIT_NOT_FOUND: u8 = 1;
const EXIT_FAILURE: u8 = 2;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "gpkg", version, about = "grim plugin package manager", disable_version_flag = true)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Install all plugins from the pack manifest, or a single plugin.
    Install {
        /// Pack entry name, local path, or git URL. Omit to install the
        /// whole pack manifest.
        name: Option<String>,
    },
    /// Refresh all installed plugins from their recorded sources.
    Update,
    /// Print installed plugin names, one per line.
    List,
    /// Delete a plugin directory.
    Remove { name: String },
    /// Invoke the plugin build in PATH (default `.`).
    Build { path: Option<PathBuf> },
    /// Print plugin metadata and detected artifacts.
    Info { name: String },
    /// Regenerate the lockfile from the installed tree.
    Lock,
    /// Verify installed plugins against the lockfile.
    Verify,
    /// Print version.
    Version,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();
    match run(args.command) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(target: "gpkg", error = %err, "command failed");
            eprintln!("gpkg: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("GRIM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();
    // Keep the worker alive for the process lifetime.
    std::mem::forget(guard);
}

fn run(command: Cmd) -> Result<u8> {
    match command {
        Cmd::Install { name } => cmd_install(name),
        Cmd::Update => cmd_update(),
        Cmd::List => cmd_list(),
        Cmd::Remove { name } => cmd_remove(&name),
        Cmd::Build { path } => cmd_build(path.unwrap_or_else(|| PathBuf::from("."))),
        Cmd::Info { name } => cmd_info(&name),
        Cmd::Lock => cmd_lock(),
        Cmd::Verify => cmd_verify(),
        Cmd::Version => {
            println!("gpkg {}", env!("CARGO_PKG_VERSION"));
            Ok(EXIT_OK)
        }
    }
}

/// Pack manifest location: `./grim-pack.toml`, else the config dir sibling
/// of the lockfile.
fn pack_path() -> Result<PathBuf> {
    let local = PathBuf::from("grim-pack.toml");
    if local.is_file() {
        return Ok(local);
    }
    let lock = lockfile_path()?;
    Ok(lock.with_file_name("grim-pack.toml"))
}

fn cmd_install(name: Option<String>) -> Result<u8> {
    let plugins = plugins_dir()?;
    let lock_path = lockfile_path()?;
    let _guard = LockGuard::acquire(&lock_path)?;

    let code = match name {
        None => {
            let path = pack_path()?;
            if !path.is_file() {
                eprintln!("gpkg: no pack manifest at {}", path.display());
                return Ok(EXIT_NOT_FOUND);
            }
            let pack = Pack::load(&path)?;
            let mut failed = false;
            for (entry, outcome) in install_pack(&plugins, &pack) {
                match outcome {
                    Ok(id) => println!("installed {id}"),
                    Err(err) => {
                        failed = true;
                        eprintln!("gpkg: {entry}: {err}");
                    }
                }
            }
            if failed { EXIT_FAILURE } else { EXIT_OK }
        }
        Some(name) => {
            let source = resolve_source(&name)?;
            let Some(source) = source else {
                eprintln!("gpkg: plugin {name:?} not found");
                return Ok(EXIT_NOT_FOUND);
            };
            match install_plugin(&plugins, &source) {
                Ok(id) => {
                    println!("installed {id}");
                    EXIT_OK
                }
                Err(err @ (PackageError::Fetch { .. } | PackageError::Build { .. })) => {
                    eprintln!("gpkg: {err}");
                    EXIT_FAILURE
                }
                Err(err) => return Err(err.into()),
            }
        }
    };
    refresh_lockfile(&plugins, &lock_path)?;
    Ok(code)
}

/// A bare name resolves through the pack manifest; paths and URLs pass
/// through as-is. `None` means the name matched nothing.
fn resolve_source(name: &str) -> Result<Option<String>> {
    if PathBuf::from(name).is_dir()
        || name.contains("://")
        || name.starts_with("git@")
        || name.ends_with(".git")
    {
        return Ok(Some(name.to_string()));
    }
    let path = pack_path()?;
    if path.is_file() {
        let pack = Pack::load(&path)?;
        if let Some(entry) = pack.plugins.get(name) {
            return Ok(Some(entry.source.clone()));
        }
    }
    Ok(None)
}

fn cmd_update() -> Result<u8> {
    let plugins = plugins_dir()?;
    let lock_path = lockfile_path()?;
    let _guard = LockGuard::acquire(&lock_path)?;
    let lockfile = match Lockfile::read(&lock_path) {
        Ok(lockfile) => lockfile,
        Err(_) => Lockfile::from_installed(&plugins, None)?,
    };
    let mut failed = false;
    for (id, outcome) in update_all(&plugins, &lockfile) {
        match outcome {
            Ok(_) => println!("updated {id}"),
            Err(err) => {
                failed = true;
                eprintln!("gpkg: {id}: {err}");
            }
        }
    }
    refresh_lockfile(&plugins, &lock_path)?;
    Ok(if failed { EXIT_FAILURE } else { EXIT_OK })
}

fn cmd_list() -> Result<u8> {
    for id in list_installed(&plugins_dir()?)? {
        println!("{id}");
    }
    Ok(EXIT_OK)
}

fn cmd_remove(name: &str) -> Result<u8> {
    let plugins = plugins_dir()?;
    let lock_path = lockfile_path()?;
    let _guard = LockGuard::acquire(&lock_path)?;
    match remove_plugin(&plugins, name) {
        Ok(()) => {
            println!("removed {name}");
            refresh_lockfile(&plugins, &lock_path)?;
            Ok(EXIT_OK)
        }
        Err(PackageError::NotInstalled { .. }) => {
            eprintln!("gpkg: plugin {name:?} not found");
            Ok(EXIT_NOT_FOUND)
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_build(path: PathBuf) -> Result<u8> {
    match build_plugin(&path) {
        Ok(Some(system)) => {
            println!("built with {system:?}");
            Ok(EXIT_OK)
        }
        Ok(None) => {
            println!("nothing to build");
            Ok(EXIT_OK)
        }
        Err(err) => {
            eprintln!("gpkg: {err}");
            Ok(EXIT_FAILURE)
        }
    }
}

fn cmd_info(name: &str) -> Result<u8> {
    let plugins = plugins_dir()?;
    let dir = plugins.join(name);
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        eprintln!("gpkg: plugin {name:?} not found");
        return Ok(EXIT_NOT_FOUND);
    }
    let manifest = PluginManifest::load(&manifest_path)
        .map_err(|err| anyhow::anyhow!("manifest: {err}"))?;
    println!("id:          {}", manifest.id);
    println!("name:        {}", manifest.name);
    println!("version:     {}", manifest.version);
    if !manifest.author.is_empty() {
        println!("author:      {}", manifest.author);
    }
    if !manifest.description.is_empty() {
        println!("description: {}", manifest.description);
    }
    println!("entry point: {}", manifest.entry_point);
    if !manifest.dependencies.is_empty() {
        println!("depends on:  {}", manifest.dependencies.join(", "));
    }
    let artifacts = detect_artifacts(&dir);
    if !artifacts.is_empty() {
        println!("artifacts:");
        for artifact in artifacts {
            println!("  {artifact}");
        }
    }
    Ok(EXIT_OK)
}

fn cmd_lock() -> Result<u8> {
    let plugins = plugins_dir()?;
    let lock_path = lockfile_path()?;
    let _guard = LockGuard::acquire(&lock_path)?;
    refresh_lockfile(&plugins, &lock_path)?;
    println!("lockfile written: {}", lock_path.display());
    Ok(EXIT_OK)
}

fn cmd_verify() -> Result<u8> {
    let plugins = plugins_dir()?;
    let lock_path = lockfile_path()?;
    let report = verify(&lock_path, &plugins)?;
    let mut failed = false;
    for (id, status) in &report.results {
        match status {
            VerifyStatus::Ok => println!("{id}: ok"),
            VerifyStatus::NotInstalled => {
                failed = true;
                println!("{id}: not installed");
            }
            VerifyStatus::HashMismatch { .. } => {
                failed = true;
                println!("{id}: hash mismatch");
            }
        }
    }
    Ok(if failed { EXIT_NOT_FOUND } else { EXIT_OK })
}

fn refresh_lockfile(plugins: &std::path::Path, lock_path: &std::path::Path) -> Result<()> {
    let previous = Lockfile::read(lock_path).ok();
    let lockfile = Lockfile::from_installed(plugins, previous.as_ref())?;
    lockfile.write(lock_path)?;
    info!(target: "gpkg", plugins = lockfile.plugins.len(), "lockfile refreshed");
    Ok(())
}
