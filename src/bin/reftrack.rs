//! Reftrack CLI: track external work items seen in tabs and notifications.
//!
//! Usage:
//!   reftrack entities [--family github] [--json] [--refresh] [--force]
//!   reftrack snapshot <name> --file tabs.json
//!   reftrack reconcile <source> --file items.json
//!   reftrack signals [--source slack] [--all] [--json]
//!   reftrack signal <complete|reopen|pin|unpin> <id>
//!   reftrack backfill

use clap::{Parser, Subcommand};
use reftrack::config::default_config_path;
use reftrack::format::{entities_json, entities_markdown, signals_json, signals_markdown};
use reftrack::refresh::{ChainedCredentials, EnvCredentials, GhCliCredentials};
use reftrack::{
    CancellationToken, Clock, EntityFilter, EntityStore, Extractor, Family, HttpClient, Ingestor,
    OpenStore, Refresher, SignalFilter, SignalItem, SignalStore, SnapshotStore, SnapshotTab,
    SqliteStore, SystemClock, TrackerConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "reftrack",
    version,
    about = "Track pull requests, issues and bugs seen in tabs and notifications"
)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Path to SQLite database file (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tracked entities
    Entities {
        /// github or bugzilla
        #[arg(long)]
        family: Option<Family>,
        /// Exact state, e.g. open or RESOLVED
        #[arg(long)]
        state: Option<String>,
        /// Sub-kind, e.g. pull or issue
        #[arg(long)]
        kind: Option<String>,
        /// owner/repo or Bugzilla host
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Output JSON instead of markdown
        #[arg(long)]
        json: bool,
        /// Refresh status from remotes before listing
        #[arg(long)]
        refresh: bool,
        /// Ignore the refresh cooldown
        #[arg(long, requires = "refresh")]
        force: bool,
    },
    /// Show the timeline of one entity
    Events {
        id: i64,
    },
    /// Store a tab snapshot and extract entities from it
    Snapshot {
        name: String,
        /// JSON array of {"url", "title"} objects
        #[arg(long)]
        file: PathBuf,
    },
    /// Reconcile a fresh scrape of one signal source
    Reconcile {
        /// Source name, e.g. slack or gmail
        source: String,
        /// JSON array of {"title", "preview", "snippet", "source_ts", "kind"} objects
        #[arg(long)]
        file: PathBuf,
    },
    /// List signals
    Signals {
        #[arg(long)]
        source: Option<String>,
        /// Include completed signals
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Act on one signal
    Signal {
        #[command(subcommand)]
        action: SignalAction,
    },
    /// Replay all stored snapshots and signals through extraction
    Backfill,
}

#[derive(Subcommand)]
enum SignalAction {
    /// Mark done; reconciliation will not revive it
    Complete { id: i64 },
    /// Mark active again and pin it
    Reopen { id: i64 },
    /// Protect from auto-completion
    Pin { id: i64 },
    Unpin { id: i64 },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reftrack=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<PathBuf>) -> Result<TrackerConfig, String> {
    let path = path.unwrap_or_else(default_config_path);
    TrackerConfig::load(&path).map_err(|e| e.to_string())
}

fn open_store(config: &TrackerConfig, db: Option<PathBuf>) -> Result<Arc<SqliteStore>, String> {
    let db_path = db.unwrap_or_else(|| config.db_path());
    let store = SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(Arc::new(store))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}

fn build_refresher(config: &TrackerConfig, store: Arc<SqliteStore>) -> Result<Refresher, String> {
    let client = HttpClient::new()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?
        .with_graphql_url(config.github.graphql_url.clone())
        .with_timeouts(config.graphql_timeout(), config.bugzilla_timeout());
    let credentials = ChainedCredentials::new()
        .with(EnvCredentials::new(config.github.token_env.clone()))
        .with(GhCliCredentials);
    Ok(Refresher::new(store, Arc::new(client), Arc::new(credentials)).with_cooldown(config.cooldown()))
}

fn cmd_entities(
    config: &TrackerConfig,
    store: &Arc<SqliteStore>,
    filter: EntityFilter,
    json: bool,
    refresh: bool,
    force: bool,
) -> i32 {
    let family = filter.family;
    if refresh {
        let entities = match store.list_entities(&filter) {
            Ok(e) => e,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };
        let refresher = match build_refresher(config, store.clone()) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                eprintln!("Error: failed to start runtime: {}", e);
                return 1;
            }
        };
        let outcome = runtime.block_on(async {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });
            refresher.refresh_with_cancel(&entities, force, &cancel).await
        });
        match outcome {
            Ok(report) => {
                for transition in &report.transitions {
                    eprintln!("{}: {}", transition.key, transition.detail);
                }
                if report.skipped_no_credentials > 0 {
                    eprintln!(
                        "Skipped {} GitHub entities: no token. Run 'gh auth login' or set {}.",
                        report.skipped_no_credentials, config.github.token_env
                    );
                }
            }
            // a failed refresh still lists what is stored
            Err(e) => eprintln!("Warning: refresh failed: {}", e),
        }
    }

    let entities = match store.list_entities(&filter) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if json {
        match entities_json(&entities) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        print!("{}", entities_markdown(&entities, family, SystemClock.now()));
    }
    0
}

fn cmd_events(store: &SqliteStore, id: i64) -> i32 {
    let entity = match store.get_entity_by_id(id) {
        Ok(Some(e)) => e,
        Ok(None) => {
            eprintln!("Error: entity {} not found", id);
            return 1;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let events = match store.list_events(id) {
        Ok(events) => events,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    println!("{} {}", entity.entity_ref().key(), entity.url());
    if events.is_empty() {
        println!("No events found.");
    }
    for event in events {
        let mut line = format!("{}  {}", event.created_at.format("%Y-%m-%d %H:%M"), event.event_type);
        if let Some(snapshot) = event.snapshot_id {
            line.push_str(&format!("  snapshot={}", snapshot));
        }
        if let Some(signal) = event.signal_id {
            line.push_str(&format!("  signal={}", signal));
        }
        if !event.detail.is_empty() {
            line.push_str(&format!("  {}", event.detail));
        }
        println!("{}", line);
    }
    0
}

fn cmd_snapshot(ingestor: &Ingestor<SqliteStore>, store: &SqliteStore, name: &str, file: &Path) -> i32 {
    let tabs: Vec<SnapshotTab> = match read_json(file) {
        Ok(tabs) => tabs,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let snapshot_id = match store.create_snapshot(name, &tabs) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match ingestor.ingest_snapshot(snapshot_id) {
        Ok(report) => {
            println!(
                "Snapshot {} saved ({} tabs): {} references, {} new entities",
                snapshot_id,
                tabs.len(),
                report.matched,
                report.created
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_reconcile(ingestor: &Ingestor<SqliteStore>, store: &SqliteStore, source: &str, file: &Path) -> i32 {
    let items: Vec<SignalItem> = match read_json(file) {
        Ok(items) => items,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let report = match store.reconcile_signals(source, &items, SystemClock.now()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let mut inserted = Vec::with_capacity(report.inserted_ids.len());
    for id in &report.inserted_ids {
        match store.get_signal(*id) {
            Ok(Some(signal)) => inserted.push(signal),
            Ok(None) => {}
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }
    let extracted = ingestor.ingest_signals(&inserted);
    println!(
        "{}: {} new, {} auto-completed, {} reactivated; {} new entities",
        source, report.inserted, report.auto_completed, report.reactivated, extracted.created
    );
    0
}

fn cmd_signals(store: &SqliteStore, source: Option<String>, all: bool, json: bool) -> i32 {
    let mut filter = SignalFilter::new();
    if let Some(source) = source {
        filter = filter.with_source(source);
    }
    if all {
        filter = filter.include_completed();
    }
    let signals = match store.list_signals(&filter) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if json {
        match signals_json(&signals) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        print!("{}", signals_markdown(&signals, SystemClock.now()));
    }
    0
}

fn cmd_signal(store: &SqliteStore, action: SignalAction) -> i32 {
    let (result, verb, id) = match action {
        SignalAction::Complete { id } => (store.complete_signal(id), "Completed", id),
        SignalAction::Reopen { id } => (store.reopen_signal(id), "Reopened and pinned", id),
        SignalAction::Pin { id } => (store.set_pinned(id, true), "Pinned", id),
        SignalAction::Unpin { id } => (store.set_pinned(id, false), "Unpinned", id),
    };
    match result {
        Ok(()) => {
            println!("{} signal {}", verb, id);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_backfill(ingestor: &Ingestor<SqliteStore>) -> i32 {
    match ingestor.backfill() {
        Ok(report) => {
            println!(
                "Backfill: {} entities referenced, {} new, {} failed rows",
                report.entities, report.created, report.failed
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let config = match load_config(cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let store = match open_store(&config, cli.db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let ingestor = Ingestor::new(store.clone(), Extractor::new(config.extractor_config()));

    let code = match cli.command {
        Commands::Entities {
            family,
            state,
            kind,
            scope,
            limit,
            json,
            refresh,
            force,
        } => {
            let filter = EntityFilter {
                family,
                state,
                kind,
                scope,
                limit,
            };
            cmd_entities(&config, &store, filter, json, refresh, force)
        }
        Commands::Events { id } => cmd_events(&store, id),
        Commands::Snapshot { name, file } => cmd_snapshot(&ingestor, &store, &name, &file),
        Commands::Reconcile { source, file } => cmd_reconcile(&ingestor, &store, &source, &file),
        Commands::Signals { source, all, json } => cmd_signals(&store, source, all, json),
        Commands::Signal { action } => cmd_signal(&store, action),
        Commands::Backfill => cmd_backfill(&ingestor),
    };
    std::process::exit(code);
}
