//! BetterBlocker CLI
//!
//! Compiles baseline filter lists into a static rule index and drives the
//! diff-update sync engine against state kept in a local directory.

mod fetcher;
mod index;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use bb_core::{StaticRuleIndex, SubscriptionOptions};
use bb_compiler::FilterCompiler;
use bb_sync::{EngineConfig, JsonFilePersistence, SyncEngine, SyncOutcome};

use fetcher::FileFetcher;
use index::{compile_static_index, parse_url_file, read_index, write_index, UrlFile};

#[derive(Parser)]
#[command(name = "bb-cli")]
#[command(about = "BetterBlocker filter list compiler and subscription sync")]
struct Cli {
    /// Directory holding subscription and rule state
    #[arg(long, global = true, default_value = ".bb-state")]
    state_dir: PathBuf,

    /// Engine config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Static rule index, overriding the config
    #[arg(long, global = true)]
    static_rules: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile baseline filter lists into a static rule index
    Compile {
        /// Baseline lists as <subscription url>=<path>
        #[arg(short, long = "list", required = true, value_parser = parse_url_file)]
        lists: Vec<UrlFile>,

        /// Output index file
        #[arg(short, long, default_value = "static-rules.json")]
        output: PathBuf,
    },

    /// Dump static rule index info
    Info {
        /// Index file to inspect
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Add a subscription
    Add {
        url: String,

        /// Diff endpoint; omit for lists that are never diff-updated
        #[arg(long)]
        diff_endpoint: Option<String>,

        /// Add without installing rules
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a subscription
    Remove { url: String },

    /// Enable a subscription, reinstalling its last filter set
    Enable { url: String },

    /// Disable a subscription, releasing its rules
    Disable { url: String },

    /// Apply diffs to one subscription, or to all of them
    Sync {
        url: Option<String>,

        /// Diff documents as <subscription url>=<path>
        #[arg(short, long = "diff", value_parser = parse_url_file)]
        diffs: Vec<UrlFile>,
    },

    /// Add a user filter
    UserAdd { filter: String },

    /// Remove a user filter
    UserRemove { filter: String },

    /// Show subscriptions, user filters and quota usage
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = run(cli);

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn run(cli: Cli) -> Result<(), String> {
    match &cli.command {
        Commands::Compile { lists, output } => return cmd_compile(lists, output, cli.verbose),
        Commands::Info { input } => return cmd_info(input),
        _ => {}
    }

    let config = load_config(cli.config.as_deref())?;
    let statics = match cli.static_rules.as_ref().or(config.static_rules.as_ref()) {
        Some(path) => read_index(path)?,
        None => {
            log::warn!("No static rule index given, subscriptions start without a baseline");
            StaticRuleIndex::new()
        }
    };
    let diffs = match &cli.command {
        Commands::Sync { diffs, .. } => diffs.as_slice(),
        _ => &[],
    };
    let engine = open_engine(&config, statics, FileFetcher::new(diffs), &cli.state_dir)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;

    runtime.block_on(dispatch(&engine, cli.command))
}

async fn dispatch(engine: &SyncEngine<FileFetcher>, command: Commands) -> Result<(), String> {
    match command {
        Commands::Add {
            url,
            diff_endpoint,
            disabled,
        } => {
            let options = SubscriptionOptions {
                diff_endpoint,
                enabled: !disabled,
            };
            let info = engine.add(&url, options).await.map_err(|e| e.to_string())?;
            println!("Added {} ({} filters)", info.url, info.filter_count);
            Ok(())
        }
        Commands::Remove { url } => {
            engine.remove(&url).await.map_err(|e| e.to_string())?;
            println!("Removed {}", url);
            Ok(())
        }
        Commands::Enable { url } => {
            let changed = engine.enable(&url).await.map_err(|e| e.to_string())?;
            println!("{} {}", if changed { "Enabled" } else { "Already enabled:" }, url);
            Ok(())
        }
        Commands::Disable { url } => {
            let changed = engine.disable(&url).await.map_err(|e| e.to_string())?;
            println!("{} {}", if changed { "Disabled" } else { "Already disabled:" }, url);
            Ok(())
        }
        Commands::Sync { url, .. } => cmd_sync(engine, url.as_deref()).await,
        Commands::UserAdd { filter } => {
            let added = engine.add_user_filter(&filter).map_err(|e| e.to_string())?;
            println!("{} {}", if added { "Added" } else { "Already present:" }, filter.trim());
            Ok(())
        }
        Commands::UserRemove { filter } => {
            engine.remove_user_filter(&filter).map_err(|e| e.to_string())?;
            println!("Removed {}", filter.trim());
            Ok(())
        }
        Commands::Status { json } => cmd_status(engine, json),
        Commands::Compile { .. } | Commands::Info { .. } => Ok(()),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => EngineConfig::load(path).map_err(|e| e.to_string()),
        None => Ok(EngineConfig::default()),
    }
}

fn open_engine(
    config: &EngineConfig,
    statics: StaticRuleIndex,
    fetcher: FileFetcher,
    state_dir: &Path,
) -> Result<SyncEngine<FileFetcher>, String> {
    let persistence = JsonFilePersistence::open(state_dir).map_err(|e| e.to_string())?;
    log::debug!("State directory: {}", persistence.dir().display());
    SyncEngine::open(config, statics, fetcher, FilterCompiler::new(), persistence).map_err(|e| e.to_string())
}

fn cmd_compile(lists: &[UrlFile], output: &Path, verbose: bool) -> Result<(), String> {
    let (index, stats) = compile_static_index(lists, verbose)?;
    write_index(output, &index)?;

    println!("Compiled {} filter lists to '{}'", stats.lists, output.display());
    let totals = &stats.totals;
    println!("  Lines:    {}", totals.lines);
    println!("  Filters:  {} (duplicates removed {})", totals.filters, totals.deduped);
    println!(
        "  Rules:    {} (block {}, allow {}, redirect {})",
        totals.rules,
        totals.rules - totals.allow_rules - totals.redirect_rules,
        totals.allow_rules,
        totals.redirect_rules
    );
    println!("  Important: {}", totals.important_rules);
    println!("  Time:     {:.1}ms", stats.total_ms);

    Ok(())
}

fn cmd_info(input: &Path) -> Result<(), String> {
    let index = read_index(input)?;

    println!("Static rule index: {}", input.display());
    for (subscription, ruleset) in index.rulesets() {
        println!("  {}", subscription);
        println!("    Filters:   {}", ruleset.filter_count());
        println!("    Rules:     {}", ruleset.rule_count());
    }

    Ok(())
}

async fn cmd_sync(engine: &SyncEngine<FileFetcher>, url: Option<&str>) -> Result<(), String> {
    let results = engine.sync(url).await.map_err(|e| e.to_string())?;

    for result in results {
        match result.outcome {
            SyncOutcome::Applied(report) => println!(
                "{}: +{} -{} ({} skipped)",
                result.subscription,
                report.added.len(),
                report.removed.len(),
                report.skipped.len()
            ),
            SyncOutcome::Rejected(exceeded) => println!("{}: rejected, {}", result.subscription, exceeded),
            SyncOutcome::Failed(err) => println!("{}: failed, {}", result.subscription, err),
            SyncOutcome::Skipped => println!("{}: skipped", result.subscription),
        }
    }

    Ok(())
}

fn cmd_status(engine: &SyncEngine<FileFetcher>, json: bool) -> Result<(), String> {
    let subscriptions = engine.subscriptions();
    let user_filters = engine.user_filters();
    let usage = engine.usage();

    if json {
        let status = serde_json::json!({
            "subscriptions": subscriptions,
            "userFilters": user_filters,
            "usage": usage,
        });
        let text = serde_json::to_string_pretty(&status).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    println!("Subscriptions:");
    for info in &subscriptions {
        println!("  {}", info.url);
        println!("    Enabled:   {}", info.enabled);
        println!("    Updatable: {}", info.updatable);
        println!(
            "    Status:    {}",
            info.download_status.as_ref().map_or("-", |status| status.as_str())
        );
        println!("    Version:   {}", info.last_version.as_deref().unwrap_or("-"));
        println!("    Downloads: {}", info.download_count);
        println!("    Filters:   {}", info.filter_count);
    }
    println!("User filters: {}", user_filters.len());
    for filter in &user_filters {
        println!("  {}", filter);
    }
    println!("Quota:");
    println!("  Dynamic rules:  {}", usage.dynamic_rules);
    println!("  Disabled rules: {}", usage.disabled_static_rules);

    Ok(())
}
