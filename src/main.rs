//! Sumi-Sieve main entry point
//!
//! This is the command-line interface for the Sumi-Sieve site archiver.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use sumi_sieve::config::{load_config_with_hash, Config};
use sumi_sieve::crawler::{crawl, CrawlOptions, Extractor, HtmlExtractor};
use sumi_sieve::output::{
    load_statistics, print_report, print_statistics, EXIT_CONFIG_ERROR, EXIT_OK,
};
use sumi_sieve::state::{CrawlItem, Discarded};
use sumi_sieve::storage::{PersistenceLedger, LEDGER_FILE_NAME};
use sumi_sieve::url::{normalize_url, PathResolver};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Sumi-Sieve: a rule-driven site archiver
///
/// Sumi-Sieve walks a site from a start URL, matching every discovered URL against
/// an ordered list of rules. Matching resources are fetched, the selected content is
/// written below the save directory, and a ledger remembers what is done so a
/// re-run only fetches what is missing.
#[derive(Parser, Debug)]
#[command(name = "sumi-sieve")]
#[command(version)]
#[command(about = "A rule-driven site archiver", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Re-fetch resources even if the ledger says they are done
    #[arg(long)]
    force_refresh: bool,

    /// Number of concurrent workers (overrides the config file)
    #[arg(long, value_name = "W", value_parser = clap::value_parser!(u32).range(1..=100))]
    concurrency: Option<u32>,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the ledger and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    // Handle different modes
    let result = if cli.dry_run {
        handle_dry_run(&config).map(|()| EXIT_OK)
    } else if cli.stats {
        handle_stats(&config).map(|()| EXIT_OK)
    } else {
        let options = CrawlOptions {
            force_refresh: cli.force_refresh,
            concurrency: cli.concurrency.map(|c| c as usize),
        };
        handle_crawl(&config, &config_hash, &options).await
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_sieve=info,warn"),
            1 => EnvFilter::new("sumi_sieve=debug,info"),
            2 => EnvFilter::new("sumi_sieve=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Sumi-Sieve Dry Run ===\n");

    println!("Crawl Configuration:");
    println!("  Start URL: {}", config.start_url);
    println!("  Save dir: {}", config.save_dir);
    println!("  Concurrency: {}", config.concurrency);
    println!(
        "  Retries: {} (base delay {}ms)",
        config.max_retries, config.retry_base_delay_ms
    );
    println!("  Request delay: {}ms", config.http.request_delay_ms);
    if let Some(login) = &config.login {
        println!("  Login: {} ({} fields)", login.url, login.formdata.len());
    }

    let rules = config.rule_set()?;
    let extractor = HtmlExtractor::new();

    println!("\nRules ({}):", rules.len());
    for rule in rules.iter() {
        println!("  [{}] {}", rule.index, rule.url_pattern.as_str());
        if let Some(selector) = &rule.content_selector {
            extractor.check_selector(selector)?;
            println!("      selector: {}", selector);
        }
        if let Some(template) = &rule.as_url_template {
            println!("      as-url: {}", template.as_str());
        }
        if let Some(template) = &rule.file_path_template {
            println!("      file-path: {}", template.as_str());
        }
        if rule.paging {
            extractor.check_selector(&rule.next_page_selector)?;
            println!("      paging via: {}", rule.next_page_selector);
        }
        if !rule.follow {
            println!("      links not followed");
        }
    }

    if !config.ignore_url.is_empty() {
        println!("\nIgnored URLs ({}):", config.ignore_url.len());
        for pattern in &config.ignore_url {
            println!("  - {}", pattern);
        }
    }

    let start_url = normalize_url(&config.start_url)?;
    println!("\nStart URL:");
    match CrawlItem::discover(&rules, start_url, None)? {
        Ok(item) => {
            let rule = rules
                .get(item.rule)
                .ok_or("start URL matched an unknown rule")?;
            println!("  Rule: {}", item.rule);
            println!("  Resource id: {}", item.id);
            println!("  Fetch URL: {}", item.fetch_url);

            if rule.content_selector.is_some() || rule.file_path_template.is_some() {
                let resolver = PathResolver::new(&config.save_dir);
                let path = resolver.resolve(rule, &item.groups, &item.path_url)?;
                println!("  Output: {}", path.display());
            } else {
                println!("  Output: none (links only)");
            }

            let ledger_path = Path::new(&config.save_dir).join(LEDGER_FILE_NAME);
            if ledger_path.exists() {
                let ledger = PersistenceLedger::open(Path::new(&config.save_dir))?;
                let status = if ledger.get(&item.id).is_some() {
                    "done (would be skipped)"
                } else {
                    "not done"
                };
                println!("  Ledger: {} ({} records)", status, ledger.len());
            } else {
                println!("  Ledger: none yet");
            }
        }
        Err(Discarded::Ignored) => println!("  Ignored by an ignore-url pattern"),
        Err(Discarded::NoRule) => println!("  No rule matches"),
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the ledger
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let save_dir = Path::new(&config.save_dir);
    println!("Ledger: {}\n", save_dir.join(LEDGER_FILE_NAME).display());

    let ledger = PersistenceLedger::open(save_dir)?;
    let stats = load_statistics(&ledger)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: &Config,
    config_hash: &str,
    options: &CrawlOptions,
) -> Result<u8, Box<dyn std::error::Error>> {
    if options.force_refresh {
        tracing::info!("Force refresh: ledger entries will be re-fetched");
    }
    tracing::info!(
        "Rules: {}, ignore patterns: {}",
        config.rules.len(),
        config.ignore_url.len()
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping crawl");
            let _ = stop_tx.send(true);
        }
    });

    match crawl(config, config_hash, options, stop_rx).await {
        Ok(report) => {
            print_report(&report);
            Ok(report.exit_code())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
