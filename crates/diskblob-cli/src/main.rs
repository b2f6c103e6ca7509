//! # diskblob CLI
//!
//! Command-line interface for a file-per-blob content-addressed store.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use diskblob_config::{log_cli_debug, log_cli_info, log_cli_warn, Config, LogLevel};
use diskblob_store::{
    is_storage_dir, shard, BlobRef, DiskStorage, HashAlgo, SizedRef, StoreOptions,
};

/// diskblob - content-addressed blobs, one file each
#[derive(Parser)]
#[command(name = "diskblob")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Blob store root directory (overrides configuration)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Load this config file instead of the standard locations
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store files as blobs and print their references
    Put {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Hash algorithm (defaults to storage.hash)
        #[arg(long)]
        hash: Option<String>,
    },

    /// Write a blob, or a byte range of it, to stdout or a file
    Get {
        #[arg(value_name = "REF")]
        blob: String,

        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i64>,

        #[arg(long, allow_hyphen_values = true)]
        length: Option<i64>,

        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Remove blobs (missing ones are ignored)
    Rm {
        #[arg(value_name = "REF", required = true)]
        blobs: Vec<String>,

        /// Also remove shard directories left empty
        #[arg(long)]
        cleanup: bool,
    },

    /// Print the size of each stored blob
    Stat {
        #[arg(value_name = "REF", required = true)]
        blobs: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// List stored blobs in reference order
    Ls {
        /// Start after this reference
        #[arg(long, value_name = "REF")]
        after: Option<String>,

        #[arg(long, default_value_t = 1000)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Describe the store
    Info,

    /// Create the store root and initialise it
    Init {
        #[arg(value_name = "DIR")]
        directory: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        config.log_level()
    };
    diskblob_config::init_logging(level);

    let root = cli.root.clone().unwrap_or_else(|| config.root_path());
    log_cli_debug!("Resolved store root", root = root.display().to_string());

    match cli.command {
        Commands::Put { files, hash } => {
            let algo_name = hash.unwrap_or_else(|| config.storage.hash.clone());
            let algo: HashAlgo = algo_name.parse()?;
            cmd_put(&open_store(&root, &config)?, algo, &files)
        }
        Commands::Get {
            blob,
            offset,
            length,
            output,
        } => cmd_get(
            &open_store(&root, &config)?,
            &parse_ref(&blob)?,
            offset,
            length,
            output.as_deref(),
        ),
        Commands::Rm { blobs, cleanup } => {
            cmd_rm(&open_store(&root, &config)?, &parse_refs(&blobs)?, cleanup)
        }
        Commands::Stat { blobs, json } => {
            cmd_stat(&open_store(&root, &config)?, &parse_refs(&blobs)?, json)
        }
        Commands::Ls { after, limit, json } => {
            let after = after.as_deref().map(parse_ref).transpose()?;
            cmd_ls(&open_store(&root, &config)?, after.as_ref(), limit, json)
        }
        Commands::Info => cmd_info(&open_store(&root, &config)?),
        Commands::Init { directory } => {
            cmd_init(directory.as_deref().unwrap_or(&root), &config)
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn store_options(config: &Config) -> StoreOptions {
    StoreOptions {
        stat_gate_size: config.limits.stat_gate_size,
        fd_budget_percent: config.limits.fd_budget_percent,
        min_fd_limit: config.limits.min_fd_limit,
        recommended_fd_limit: config.limits.recommended_fd_limit,
        self_check: config.limits.self_check,
        ..StoreOptions::default()
    }
}

fn open_store(root: &Path, config: &Config) -> Result<DiskStorage> {
    if !root.exists() {
        bail!(
            "Store root {} does not exist (run `diskblob init` first)",
            root.display()
        );
    }
    DiskStorage::open(root, store_options(config))
        .with_context(|| format!("Failed to open store at {}", root.display()))
}

fn parse_ref(s: &str) -> Result<BlobRef> {
    BlobRef::parse(s).with_context(|| format!("Invalid blob reference {s:?}"))
}

fn parse_refs(refs: &[String]) -> Result<Vec<BlobRef>> {
    refs.iter().map(|s| parse_ref(s)).collect()
}

fn cmd_put(storage: &DiskStorage, algo: HashAlgo, files: &[PathBuf]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    for path in files {
        let open = || {
            fs::File::open(path).with_context(|| format!("Failed to read {}", path.display()))
        };

        let (blob, hashed) = BlobRef::compute_reader(algo, &mut io::BufReader::new(open()?))
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        let sized = storage
            .receive(&blob, &mut io::BufReader::new(open()?))
            .with_context(|| format!("Failed to store {}", path.display()))?;
        if u64::from(sized.size) != hashed {
            storage.remove_blobs(std::slice::from_ref(&blob))?;
            bail!("{} changed while it was being stored", path.display());
        }
        log_cli_info!(
            "Stored blob",
            blob = sized.blob.to_string(),
            size = sized.size
        );
        writeln!(stdout, "{} {}", sized.blob, sized.size)?;
    }
    Ok(())
}

fn cmd_get(
    storage: &DiskStorage,
    blob: &BlobRef,
    offset: Option<i64>,
    length: Option<i64>,
    output: Option<&Path>,
) -> Result<()> {
    let mut reader = if offset.is_some() || length.is_some() {
        storage.range_fetch(blob, offset.unwrap_or(0), length.unwrap_or(i64::MAX))?
    } else {
        storage.fetch(blob)?.0
    };

    let copied = match output {
        Some(path) => {
            let mut file = fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            io::copy(&mut reader, &mut file)?
        }
        None => io::copy(&mut reader, &mut io::stdout().lock())?,
    };
    log_cli_debug!("Fetched blob", blob = blob.to_string(), bytes = copied);
    Ok(())
}

fn cmd_rm(storage: &DiskStorage, blobs: &[BlobRef], cleanup: bool) -> Result<()> {
    storage.remove_blobs(blobs)?;
    if cleanup {
        storage.remove_empty_shards(blobs);
    }
    log_cli_info!("Removed blobs", count = blobs.len(), cleanup = cleanup);
    Ok(())
}

fn print_sized(refs: &[SizedRef], json: bool) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, refs)?;
        writeln!(stdout)?;
    } else {
        for sized in refs {
            writeln!(stdout, "{} {}", sized.blob, sized.size)?;
        }
    }
    Ok(())
}

fn cmd_stat(storage: &DiskStorage, blobs: &[BlobRef], json: bool) -> Result<()> {
    let found = storage.stat_blobs(blobs)?;
    for blob in blobs {
        if !found.iter().any(|s| &s.blob == blob) {
            log_cli_warn!("Blob not found", blob = blob.to_string());
            eprintln!("missing: {blob}");
        }
    }
    print_sized(&found, json)
}

fn cmd_ls(storage: &DiskStorage, after: Option<&BlobRef>, limit: usize, json: bool) -> Result<()> {
    print_sized(&storage.enumerate(after, limit)?, json)
}

fn cmd_info(storage: &DiskStorage) -> Result<()> {
    println!("{storage}");

    let generation = storage.storage_generation()?;
    let init_secs = generation
        .init_time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!(
        "Generation: {} (initialised at unix time {init_secs})",
        generation.random
    );

    if is_storage_dir(storage.root()) {
        println!("Layout: sharded, version {}", shard::LAYOUT_VERSION);
    } else {
        println!("Layout: empty");
    }
    match storage.tmp_file_gate_capacity() {
        Some(n) => println!("Temp file gate: {n}"),
        None => println!("Temp file gate: unbounded"),
    }
    println!("Stat gate: {}", storage.stat_gate_capacity());
    Ok(())
}

fn cmd_init(directory: &Path, config: &Config) -> Result<()> {
    fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create {}", directory.display()))?;
    let storage = open_store(directory, config)?;
    let generation = storage.storage_generation()?;
    println!(
        "Initialized blob store at {} (generation {})",
        storage.root().display(),
        generation.random
    );
    Ok(())
}
