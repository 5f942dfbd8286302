//! RoomDB command-line driver
//!
//! Thin wrapper over the store for inspecting files and exercising the
//! record locks from several threads.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use roomdb_core::{RecordId, Store, StoreConfig, StoreError};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "roomdb", about = "Inspect and exercise a RoomDB store file")]
struct Cli {
    /// JSON store configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty store file
    Init { path: PathBuf },
    /// Print the header and every record slot
    Dump { path: PathBuf },
    /// Print live records matching the given prefixes
    Find {
        path: PathBuf,
        #[command(flatten)]
        criteria: Criteria,
    },
    /// Lock, rewrite and unlock records from several threads
    Stress {
        path: PathBuf,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 100)]
        iterations: usize,
    },
}

#[derive(Args)]
struct Criteria {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    size: Option<String>,
    #[arg(long)]
    smoking: Option<String>,
    #[arg(long)]
    rate: Option<String>,
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    owner: Option<String>,
}

impl Criteria {
    fn into_vec(self) -> Vec<String> {
        [
            self.name,
            self.location,
            self.size,
            self.smoking,
            self.rate,
            self.date,
            self.owner,
        ]
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect()
    }
}

fn get_env_filter() -> EnvFilter {
    if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else if cfg!(debug_assertions) {
        EnvFilter::new("roomdb=debug,roomdb_core=debug")
    } else {
        EnvFilter::new("roomdb=info,roomdb_core=info")
    }
}

fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(get_env_filter()).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StoreConfig::load_from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => StoreConfig::default(),
    };

    match cli.command {
        Command::Init { path } => {
            Store::create_file(&path)?;
            println!("{} {}", "Created".bright_green(), path.display());
        }
        Command::Dump { path } => {
            let store = Store::open_with_config(&path, config)?;
            print_store(&store);
        }
        Command::Find { path, criteria } => {
            let store = Store::open_with_config(&path, config)?;
            let ids = store.find(&criteria.into_vec())?;
            for id in &ids {
                println!("{:>5} {}", id.0.to_string().bright_cyan(), store.read(*id)?.join(" | "));
            }
            println!("{} match(es)", ids.len());
        }
        Command::Stress {
            path,
            workers,
            iterations,
        } => {
            let store = Arc::new(Store::open_with_config(&path, config)?);
            print_store(&store);
            run_stress(&store, workers, iterations)?;
            print_store(&store);
        }
    }

    Ok(())
}

fn print_store(store: &Store) {
    let schema = store.schema();
    println!("{}", "HEADER".bright_yellow());
    println!("  Fields: {}", schema.field_count().to_string().bright_cyan());
    println!("  Record size: {}", schema.record_size().to_string().bright_cyan());
    for (i, field) in schema.fields().iter().enumerate() {
        println!("  Field {}: \"{}\" length {}", i, field.name, field.length);
    }

    println!("\n{}", "RECORDS".bright_yellow());
    for view in store.snapshot() {
        println!("{}", view);
    }
}

/// Each worker walks the live records, rewriting each one with its own values
/// under the lock.
fn run_stress(store: &Arc<Store>, workers: usize, iterations: usize) -> anyhow::Result<()> {
    let ids = store.find::<&str>(&[])?;
    if ids.is_empty() {
        println!("{}", "No live records to exercise".bright_yellow());
        return Ok(());
    }

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let store = Arc::clone(store);
            let ids = ids.clone();
            thread::Builder::new()
                .name(format!("stress-{}", worker))
                .spawn(move || -> Result<usize, StoreError> {
                    let mut rewritten = 0;
                    for i in 0..iterations {
                        let id = ids[(worker * 7 + i) % ids.len()];
                        match rewrite(&store, id) {
                            Ok(()) => rewritten += 1,
                            Err(StoreError::RecordNotFound(_)) => continue,
                            Err(e) => return Err(e),
                        }
                    }
                    Ok(rewritten)
                })
        })
        .collect::<Result<_, _>>()?;

    let mut total = 0;
    for handle in handles {
        match handle.join() {
            Ok(result) => total += result?,
            Err(_) => anyhow::bail!("stress worker panicked"),
        }
    }

    println!(
        "{} {} rewrites across {} workers\n",
        "Completed".bright_green(),
        total,
        workers
    );
    Ok(())
}

fn rewrite(store: &Store, id: RecordId) -> Result<(), StoreError> {
    let cookie = store.lock(id)?;
    let result = store
        .read(id)
        .and_then(|values| store.update(id, &values, cookie));
    store.unlock(id, cookie)?;
    result
}
