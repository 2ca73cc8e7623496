//! Strata CLI
//!
//! Entry point for the `strata` command-line tool.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process;
use strata::{Runtime, Settings};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "STRATA_LOG";

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Layered configuration resolver", version)]
struct Cli {
    /// Base directory holding strata.toml, config/ and var/
    #[arg(long, global = true, default_value = ".")]
    base: PathBuf,

    /// Fail on malformed fragments, bad paths and cache I/O errors
    #[arg(long, global = true)]
    strict: bool,

    /// Build the tree without reading or writing the object cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Pool to read, in priority order (repeatable; default: all, by name)
    #[arg(long = "pool", global = true)]
    pools: Vec<String>,

    /// Lifetime of the cached configuration tree in seconds
    #[arg(long, global = true)]
    ttl: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a path against the merged configuration
    Get {
        /// Path expression, e.g. layout/routes/*/name=home (default: whole tree)
        path: Option<String>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,

        /// Bind a {placeholder} value, as NAME=VALUE (repeatable)
        #[arg(long = "bind", value_name = "NAME=VALUE")]
        bindings: Vec<String>,
    },

    /// List the pools in priority order
    Pools,

    /// Print the effective settings and where they came from
    Dump,

    /// Object cache commands
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached objects with their expiry
    List,

    /// Print a cached object
    Show {
        /// Object id
        id: String,
    },

    /// Remove an object from the cache
    Evict {
        /// Object id
        id: String,
    },

    /// Remove expired objects
    Purge,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .try_init()
        .ok();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::build(&cli.base, Some(cli_overrides(&cli)))
        .with_context(|| format!("loading settings from {}", cli.base.display()))?;

    match cli.command {
        Commands::Dump => run_dump(&settings),
        Commands::Pools => {
            let runtime = open(settings)?;
            for pool in runtime.pools() {
                println!("{pool}");
            }
            finish(runtime)
        }
        Commands::Get {
            path,
            pretty,
            bindings,
        } => run_get(settings, path.as_deref(), pretty, &bindings),
        Commands::Cache { action } => run_cache(settings, action),
    }
}

fn cli_overrides(cli: &Cli) -> Value {
    let mut overrides = Map::new();
    let mut cache = Map::new();
    if cli.strict {
        overrides.insert("strict".to_string(), json!(true));
    }
    if !cli.pools.is_empty() {
        overrides.insert("pools".to_string(), json!(cli.pools));
    }
    if cli.no_cache {
        cache.insert("enabled".to_string(), json!(false));
    }
    if let Some(ttl) = cli.ttl {
        cache.insert("config_ttl_seconds".to_string(), json!(ttl));
    }
    if !cache.is_empty() {
        overrides.insert("cache".to_string(), Value::Object(cache));
    }
    Value::Object(overrides)
}

fn open(settings: Settings) -> Result<Runtime> {
    Runtime::open(settings).context("building configuration")
}

fn finish(runtime: Runtime) -> Result<()> {
    runtime.finish().context("flushing object cache")?;
    Ok(())
}

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

fn run_get(settings: Settings, path: Option<&str>, pretty: bool, bindings: &[String]) -> Result<()> {
    let mut runtime = open(settings)?;
    for binding in bindings {
        let Some((name, value)) = binding.split_once('=') else {
            bail!("invalid binding {binding:?}, expected NAME=VALUE");
        };
        runtime.config_mut().bind(name, value);
    }

    let value = runtime.config().get_config(path, None)?;
    let found = match value {
        Some(value) => {
            print_json(&value, pretty)?;
            true
        }
        None => false,
    };
    finish(runtime)?;

    if !found {
        bail!("nothing at {}", path.unwrap_or("/"));
    }
    Ok(())
}

fn run_dump(settings: &Settings) -> Result<()> {
    let dump = json!({
        "base_dir": settings.base_dir(),
        "config_dir": settings.config_dir(),
        "var_dir": settings.var_dir(),
        "settings": settings.merged(),
        "sources": settings.sources(),
    });
    print_json(&dump, true)
}

fn run_cache(settings: Settings, action: CacheCommands) -> Result<()> {
    let mut runtime = open(settings)?;
    let Some(cache) = runtime.cache_mut() else {
        bail!("object cache is disabled");
    };

    match action {
        CacheCommands::List => {
            let ids: Vec<String> = cache.ids().map(str::to_string).collect();
            if ids.is_empty() {
                println!("Cache is empty.");
            }
            for id in ids {
                let Some(entry) = cache.entry(&id) else {
                    continue;
                };
                let expiry = entry
                    .expiry
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                let pending = if cache.is_dirty(&id) { " (unflushed)" } else { "" };
                println!("{id}\t{}\t{expiry}{pending}", entry.store);
            }
        }
        CacheCommands::Show { id } => match cache.load::<Value>(&id)? {
            Some(value) => print_json(&value, true)?,
            None => bail!("no live cache object {id:?}"),
        },
        CacheCommands::Evict { id } => {
            if cache.evict(&id)? {
                println!("Evicted {id}");
            } else {
                println!("No cache object {id:?}");
            }
        }
        CacheCommands::Purge => {
            let evicted = cache.purge_expired()?;
            println!("Purged {evicted} expired object(s)");
        }
    }

    finish(runtime)
}
