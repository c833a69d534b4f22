// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for the adbfs device filesystem bridge.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! CLI entry point for the adbfs device filesystem bridge.

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

use adbfs::config::{default_config_path, load_config, AdbfsConfig, CONFIG_ENV};
use adbfs::{mount, AdbSession, AdbShell};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, LevelFilter};

#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "Mount an adb-attached device filesystem")]
struct Cli {
    /// Path to the adbfs configuration TOML.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// adb program to invoke (overrides the configuration).
    #[arg(long, value_name = "PATH")]
    adb: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Mount the device filesystem via FUSE.
    Mount(MountArgs),
    /// Print the decoded attributes of a remote path.
    Stat(PathArgs),
    /// List a remote directory in device order.
    Ls(PathArgs),
    /// Read a remote file through the chunked read pipeline.
    Cat(CatArgs),
}

#[derive(Debug, Parser)]
struct MountArgs {
    /// Mount point on the host filesystem.
    #[arg(long, value_name = "DIR")]
    at: PathBuf,
    /// Local mirror store root (overrides the configuration).
    #[arg(long, value_name = "DIR")]
    mirror: Option<PathBuf>,
    /// Skip staging and pulling chunks into the mirror store.
    #[arg(long, default_value_t = false)]
    no_stage: bool,
}

#[derive(Debug, Parser)]
struct PathArgs {
    /// Absolute path on the device.
    path: String,
}

#[derive(Debug, Parser)]
struct CatArgs {
    /// Absolute path on the device.
    path: String,
    /// Byte offset to start reading at.
    #[arg(long, default_value_t = 0)]
    offset: u64,
    /// Maximum number of bytes to read (default: to end of file).
    #[arg(long)]
    size: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let mut config = resolve_config(cli.config)?;
    if let Some(program) = cli.adb {
        config.adb.program = program;
    }
    match cli.command {
        Command::Mount(args) => run_mount(config, args),
        Command::Stat(args) => run_stat(&config, &args),
        Command::Ls(args) => run_ls(&config, &args),
        Command::Cat(args) => run_cat(&config, &args),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn resolve_config_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path);
    }
    if let Ok(value) = env::var(CONFIG_ENV) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    default_config_path()
}

fn resolve_config(cli_path: Option<PathBuf>) -> Result<AdbfsConfig> {
    match resolve_config_path(cli_path) {
        Some(path) => {
            info!("loading configuration from {}", path.display());
            load_config(&path)
        }
        None => Ok(AdbfsConfig::default()),
    }
}

fn open_session(config: &AdbfsConfig) -> AdbSession<AdbShell> {
    let shell = AdbShell::new(config.adb.program.clone());
    AdbSession::new(shell, config.session_options())
}

fn run_mount(mut config: AdbfsConfig, args: MountArgs) -> Result<()> {
    if let Some(root) = args.mirror {
        config.mirror.root = root;
    }
    if args.no_stage {
        config.transfer.stage_chunks = false;
    }
    config.validate()?;
    let session = open_session(&config);
    mount::mount(session, &args.at)
}

fn run_stat(config: &AdbfsConfig, args: &PathArgs) -> Result<()> {
    let session = open_session(config);
    let attr = session
        .get_attributes(&args.path)
        .with_context(|| format!("stat {}", args.path))?;
    println!("path:  {}", args.path);
    println!("type:  {:?}", attr.file_type());
    println!("size:  {}", attr.size);
    println!("mode:  {:o}", attr.mode);
    println!("owner: {}:{}", attr.uid, attr.gid);
    println!("inode: {} (dev {:x}, links {})", attr.ino, attr.dev, attr.nlink);
    println!("atime: {}", attr.atime);
    println!("mtime: {}", attr.mtime);
    println!("ctime: {}", attr.ctime);
    Ok(())
}

fn run_ls(config: &AdbfsConfig, args: &PathArgs) -> Result<()> {
    let session = open_session(config);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for name in session.list_children(&args.path).iter() {
        writeln!(out, "{name}").context("write listing")?;
    }
    Ok(())
}

fn run_cat(config: &AdbfsConfig, args: &CatArgs) -> Result<()> {
    let session = open_session(config);
    let attr = session
        .get_attributes(&args.path)
        .with_context(|| format!("stat {}", args.path))?;
    let size = args
        .size
        .unwrap_or_else(|| attr.size.saturating_sub(args.offset));
    let data = session
        .try_read(&args.path, size, args.offset)
        .with_context(|| format!("read {}", args.path))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    out.write_all(&data).context("write file contents")?;
    out.flush().context("flush stdout")?;
    Ok(())
}
