//! CLI administration tool for shortlink-core.
//!
//! Runs maintenance against the same backends as the server without going
//! through the HTTP API.
//!
//! # Usage
//!
//! ```bash
//! # Rebuild the bloom filter (fleet-safe, waits for no one)
//! cargo run --bin admin -- bloom rebuild
//!
//! # Compare filter answers with the store
//! cargo run --bin admin -- bloom check aZ3x9Qk1 docs
//!
//! # Which partition owns a code
//! cargo run --bin admin -- shard locate aZ3x9Qk1
//!
//! # Create missing partitions / check connectivity
//! cargo run --bin admin -- db init
//! cargo run --bin admin -- db check
//!
//! # Access counters for a link
//! cargo run --bin admin -- stats aZ3x9Qk1
//! ```
//!
//! # Environment Variables
//!
//! Same as the server; see [`shortlink_core::config`].

use shortlink_core::application::ingest::CounterStore;
use shortlink_core::application::services::StatsService;
use shortlink_core::config::{self, Config};
use shortlink_core::domain::repositories::{AccessRepository, LinkRepository};
use shortlink_core::domain::sharding::{ACCESS_TABLE, LINKS_TABLE, ShardRouter, hash_key};
use shortlink_core::infrastructure::bloom::{BloomError, BloomGate};
use shortlink_core::infrastructure::lock::DistributedMutex;
use shortlink_core::infrastructure::persistence::{PgAccessRepository, PgLinkRepository};
use shortlink_core::server::{connect_backends, connect_database};

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Confirm;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;

/// CLI tool for managing shortlink-core.
#[derive(Parser)]
#[command(name = "admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bloom filter maintenance
    Bloom {
        #[command(subcommand)]
        action: BloomAction,
    },

    /// Shard routing
    Shard {
        #[command(subcommand)]
        action: ShardAction,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Show access counters for a link
    Stats {
        code: String,
    },
}

#[derive(Subcommand)]
enum BloomAction {
    /// Rebuild the filter from every link partition
    Rebuild {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Compare filter membership with the store for some codes
    Check {
        #[arg(required = true)]
        codes: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ShardAction {
    /// Print the partition that owns a code
    Locate {
        code: String,

        /// Override SHARD_COUNT
        #[arg(short, long)]
        shards: Option<u32>,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Create missing link and access partitions
    Init,

    /// Check database connection and partitions
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        // Routing is pure; it works without any backend configured.
        Commands::Shard {
            action: ShardAction::Locate { code, shards },
        } => {
            let shards = shards.unwrap_or_else(|| {
                std::env::var("SHARD_COUNT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(16)
            });
            locate(&code, shards);
        }
        Commands::Bloom { action } => {
            let (config, pool) = connect().await?;
            handle_bloom_action(action, &config, pool).await?
        }
        Commands::Db { action } => {
            let (config, pool) = connect().await?;
            handle_db_action(action, &config, pool).await?
        }
        Commands::Stats { code } => {
            let (config, pool) = connect().await?;
            handle_stats(&code, &config, pool).await?
        }
    }

    Ok(())
}

async fn connect() -> Result<(Config, PgPool)> {
    let config = config::load_from_env()?;
    let pool = connect_database(&config).await?;
    Ok((config, pool))
}

fn repositories(
    config: &Config,
    pool: PgPool,
) -> (Arc<dyn LinkRepository>, Arc<dyn AccessRepository>) {
    let pool = Arc::new(pool);
    let router = ShardRouter::new(config.shard_count);
    (
        Arc::new(PgLinkRepository::new(pool.clone(), router)),
        Arc::new(PgAccessRepository::new(pool, router)),
    )
}

/// Prints hash, index and partition names for `code`.
fn locate(code: &str, shards: u32) {
    let router = ShardRouter::new(shards);

    println!("{}", "🧭 Shard location".bright_blue().bold());
    println!();
    println!("  Code:      {}", code.cyan());
    println!("  Hash:      {}", hash_key(code).to_string().bright_black());
    println!(
        "  Shard:     {} of {}",
        router.index(code).to_string().bright_white().bold(),
        router.shard_count()
    );
    println!("  Links:     {}", router.partition(LINKS_TABLE, code).green());
    println!("  Accesses:  {}", router.partition(ACCESS_TABLE, code).green());
    println!();
}

async fn handle_bloom_action(action: BloomAction, config: &Config, pool: PgPool) -> Result<()> {
    let (links, _) = repositories(config, pool);
    let (remote, _) = connect_backends(config).await?;
    let bloom = BloomGate::new(
        remote.clone(),
        DistributedMutex::new(remote),
        config.bloom_settings(),
    );

    match action {
        BloomAction::Rebuild { yes } => rebuild(&bloom, links, yes).await,
        BloomAction::Check { codes } => check(&bloom, links, codes).await,
    }
}

/// Rebuilds the filter after confirmation.
///
/// Refuses politely when another instance already holds the rebuild lock.
async fn rebuild(bloom: &BloomGate, links: Arc<dyn LinkRepository>, skip_confirm: bool) -> Result<()> {
    println!("{}", "🌸 Rebuild bloom filter".bright_blue().bold());
    println!();
    println!("  Filter:    {}", bloom.settings().name.cyan());
    println!("  Shards:    {}", links.shard_count());
    println!();

    if !skip_confirm {
        let confirmed = Confirm::new()
            .with_prompt("Scan every link partition and replace the filter?")
            .default(true)
            .interact()?;

        if !confirmed {
            println!("{}", "❌ Cancelled".red());
            return Ok(());
        }
    }

    match bloom.rebuild(links).await {
        Ok(report) => {
            println!("{}", "✅ Bloom filter rebuilt".green().bold());
            println!(
                "  Indexed:   {}",
                report.indexed.to_string().bright_green().bold()
            );
            println!("  Caught up: {}", report.caught_up.to_string().bright_green());
            println!();
            Ok(())
        }
        Err(BloomError::RebuildInProgress { holder }) => {
            println!(
                "{}",
                "⚠️  A rebuild is already running on another instance".yellow()
            );
            println!("  Lock holder: {}", holder.bright_black());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Prints filter and store membership side by side.
///
/// A code present in the store but absent from the filter means the filter
/// is broken and should be rebuilt.
async fn check(bloom: &BloomGate, links: Arc<dyn LinkRepository>, codes: Vec<String>) -> Result<()> {
    println!("{}", "🔍 Bloom filter check".bright_blue().bold());
    println!();

    let name = bloom.settings().name.clone();
    let (in_filter, stored) = tokio::try_join!(
        async { bloom.mexists(&name, &codes).await.map_err(anyhow::Error::from) },
        async { links.find_by_codes(&codes).await.map_err(anyhow::Error::from) },
    )?;
    let stored: HashSet<String> = stored.into_iter().map(|link| link.code).collect();

    println!(
        "  {:<34} {:<8} {:<8}",
        "Code".bright_white().bold(),
        "Filter".bright_white().bold(),
        "Store".bright_white().bold()
    );
    println!("  {}", "─".repeat(52).bright_black());

    let mut false_negatives = 0;
    for (code, present) in codes.iter().zip(in_filter) {
        let in_store = stored.contains(code);
        if in_store && !present {
            false_negatives += 1;
        }

        println!(
            "  {:<34} {:<8} {:<8}",
            code.cyan(),
            if present { "yes".green() } else { "no".bright_black() },
            if in_store { "yes".green() } else { "no".bright_black() },
        );
    }

    println!();
    if false_negatives > 0 {
        println!(
            "{}",
            format!("❌ {false_negatives} stored code(s) missing from the filter, run `bloom rebuild`")
                .red()
                .bold()
        );
    } else {
        println!("{}", "✅ No false negatives".green().bold());
    }
    println!();

    Ok(())
}

async fn handle_stats(code: &str, config: &Config, pool: PgPool) -> Result<()> {
    let (links, access) = repositories(config, pool);
    let (remote, _) = connect_backends(config).await?;
    let service = StatsService::new(links, access, CounterStore::new(remote));

    println!("{}", "📊 Statistics".bright_blue().bold());
    println!();

    let stats = service.link_stats(code).await?;

    println!("  Code:             {}", stats.code.cyan());
    println!("  Destination:      {}", stats.long_url.bright_white());
    println!(
        "  Created:          {}",
        stats
            .created_at
            .format("%Y-%m-%d %H:%M")
            .to_string()
            .bright_black()
    );
    println!(
        "  Page views:       {}",
        stats.counters.page_views.to_string().bright_green().bold()
    );
    println!(
        "  Unique visitors:  {}",
        stats.counters.unique_visitors.to_string().bright_green()
    );
    println!(
        "  Unique IPs:       {}",
        stats.counters.unique_ips.to_string().bright_green()
    );
    println!(
        "  Stored accesses:  {}",
        stats.stored_accesses.to_string().bright_green()
    );
    println!();

    Ok(())
}

async fn handle_db_action(action: DbAction, config: &Config, pool: PgPool) -> Result<()> {
    match action {
        DbAction::Init => {
            println!("{}", "🛠  Creating partitions...".bright_blue());

            let (links, access) = repositories(config, pool);
            links.ensure_schema().await?;
            access.ensure_schema().await?;

            println!(
                "{}",
                format!("✅ {} link and access partitions ready", config.shard_count)
                    .green()
                    .bold()
            );
        }
        DbAction::Check => {
            println!("{}", "🔍 Checking database connection...".bright_blue());

            sqlx::query("SELECT 1").fetch_one(&pool).await?;
            println!("{}", "✅ Database connection OK".green().bold());

            let router = ShardRouter::new(config.shard_count);
            let expected: Vec<String> = router
                .partitions(LINKS_TABLE)
                .into_iter()
                .chain(router.partitions(ACCESS_TABLE))
                .collect();

            let existing: Vec<String> = sqlx::query_scalar(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = ANY($1)",
            )
            .bind(&expected)
            .fetch_all(&pool)
            .await?;
            let existing: HashSet<String> = existing.into_iter().collect();

            let missing: Vec<&String> =
                expected.iter().filter(|t| !existing.contains(*t)).collect();

            if missing.is_empty() {
                println!(
                    "{}",
                    format!("✅ All {} partitions present", expected.len())
                        .green()
                        .bold()
                );
            } else {
                println!(
                    "{}",
                    format!("⚠️  {} partitions missing, run `db init`", missing.len()).yellow()
                );
                for table in missing {
                    println!("  {}", table.bright_black());
                }
            }
        }
    }

    Ok(())
}
