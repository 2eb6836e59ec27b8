mod catalog;
mod runner;
mod settings;

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use deedsync_core::{
    scan_partition, scan_range, summarize_range, Aborted, BackfillReport, CancellationToken,
    DocNumber, Partition, PartitionId, RunId,
};
use deedsync_store_sqlite::SqliteStore;
use serde::Serialize;
use serde_json::Value;
use signal_hook::consts::{SIGINT, SIGTERM};
use time::OffsetDateTime;

use crate::runner::{LiveEngine, PartitionOutcome, RunContext};
use crate::settings::{FileConfig, Overrides};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "deedsync")]
#[command(about = "Deed registry range reconciliation CLI")]
struct Cli {
    #[arg(long, env = "DEEDSYNC_DB", default_value = "./deedsync.sqlite3")]
    db: PathBuf,

    /// YAML file with optional `engine` and `remote` sections.
    #[arg(long, env = "DEEDSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Tracing filter, e.g. `info` or `deedsync_core=debug`. Overrides `RUST_LOG`.
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, env = "DEEDSYNC_SESSION", hide_env_values = true)]
    session: Option<String>,

    /// File holding the session token; re-read for every partition.
    #[arg(long, env = "DEEDSYNC_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[arg(long, env = "DEEDSYNC_BASE_URL")]
    base_url: Option<String>,

    #[arg(long)]
    request_delay_ms: Option<u64>,

    #[arg(long)]
    registration_year: Option<i32>,

    #[arg(long)]
    not_found_threshold: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Partitions {
        #[command(subcommand)]
        command: Box<PartitionsCommand>,
    },
    Cursor {
        #[command(subcommand)]
        command: Box<CursorCommand>,
    },
    /// Binary-search the highest existing document number and seed the cursor.
    Bound(BoundArgs),
    /// Walk forward from the cursor until the not-found threshold is reached.
    Acquire(AcquireArgs),
    /// Report gaps from the store alone; no network access.
    Gaps(GapsArgs),
    /// Coverage summary per partition; no network access.
    Summary(SelectArgs),
    /// Re-fetch the gaps below the cursor, capped per partition.
    Backfill(BackfillArgs),
    /// Optional acquisition, then gap detection and capped backfill.
    Reconcile(ReconcileArgs),
    /// Backfill gaps among the newest numbers below the cursor.
    RefetchWindow(WindowArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum PartitionsCommand {
    Seed(SeedArgs),
    List,
}

#[derive(Debug, Args)]
struct SeedArgs {
    /// YAML catalog; the built-in office list is used when omitted.
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum CursorCommand {
    Show(SelectArgs),
    Set(CursorSetArgs),
}

#[derive(Debug, Args)]
struct CursorSetArgs {
    #[arg(long)]
    partition: String,
    /// Next unexplored document number.
    #[arg(long)]
    frontier: DocNumber,
}

#[derive(Debug, Args)]
struct SelectArgs {
    /// Partition (SRO) code. Repeat for several; defaults to every seeded partition.
    #[arg(long = "partition")]
    partitions: Vec<String>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Partitions processed concurrently.
    #[arg(long, default_value_t = 1)]
    jobs: usize,
}

#[derive(Debug, Args)]
struct BoundArgs {
    #[command(flatten)]
    run: RunArgs,

    #[arg(long, default_value_t = 1)]
    low: DocNumber,

    /// Upper end of the search; defaults to `engine.max_doc_number`.
    #[arg(long)]
    max: Option<DocNumber>,
}

#[derive(Debug, Args)]
struct AcquireArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Start here instead of at the stored cursor.
    #[arg(long)]
    from: Option<DocNumber>,
}

#[derive(Debug, Args)]
struct GapsArgs {
    #[command(flatten)]
    select: SelectArgs,

    #[arg(long, requires = "end")]
    start: Option<DocNumber>,

    #[arg(long, requires = "start")]
    end: Option<DocNumber>,
}

#[derive(Debug, Args)]
struct BackfillArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Fetch attempts per partition; defaults to `engine.backfill_cap`.
    #[arg(long)]
    cap: Option<usize>,
}

#[derive(Debug, Args)]
struct ReconcileArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Acquire forward before scanning for gaps.
    #[arg(long)]
    extend: bool,
}

#[derive(Debug, Args)]
struct WindowArgs {
    #[command(flatten)]
    run: RunArgs,

    #[arg(long)]
    window: DocNumber,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    settings::init_logging(cli.log_level.as_deref())?;

    let overrides = Overrides {
        base_url: cli.base_url.clone(),
        request_delay_ms: cli.request_delay_ms,
        registration_year: cli.registration_year,
        not_found_threshold: cli.not_found_threshold,
    };
    let config = FileConfig::load(cli.config.as_deref())?.with_overrides(&overrides);
    config.validate()?;

    match &cli.command {
        Command::Db { command } => {
            let mut store = SqliteStore::open(&cli.db)?;
            run_db(command, &mut store)
        }
        Command::Partitions { command } => run_partitions_command(&cli, command),
        Command::Cursor { command } => run_cursor(&cli, command),
        Command::Gaps(args) => run_gaps(&cli, &config, args),
        Command::Summary(args) => run_summary(&cli, &config, args),
        Command::Bound(args) => {
            let (low, max) = (args.low, args.max);
            run_remote(&cli, config, "bound", &args.run, move |engine: &mut LiveEngine, partition| {
                let high = max.unwrap_or(engine.config().max_doc_number);
                engine.find_upper_bound(partition, low, high).map_err(Aborted::from)
            })
        }
        Command::Acquire(args) => {
            let from = args.from;
            run_remote(&cli, config, "acquire", &args.run, move |engine: &mut LiveEngine, partition| {
                match from {
                    Some(start) => engine.acquire_from(partition, start),
                    None => engine.acquire(partition),
                }
            })
        }
        Command::Backfill(args) => {
            let cap = args.cap;
            run_remote(&cli, config, "backfill", &args.run, move |engine: &mut LiveEngine, partition| {
                backfill_partition(engine, partition, cap)
            })
        }
        Command::Reconcile(args) => {
            let extend = args.extend;
            run_remote(&cli, config, "reconcile", &args.run, move |engine: &mut LiveEngine, partition| {
                engine.reconcile(partition, extend)
            })
        }
        Command::RefetchWindow(args) => {
            let window = args.window;
            run_remote(
                &cli,
                config,
                "refetch_window",
                &args.run,
                move |engine: &mut LiveEngine, partition| engine.refetch_window(partition, window),
            )
        }
    }
}

fn run_db(command: &DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(store),
        DbCommand::Migrate(args) => run_db_migrate(args, store),
        DbCommand::IntegrityCheck => run_db_integrity_check(store),
    }
}

fn run_db_schema_version(store: &SqliteStore) -> Result<()> {
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty(),
        "inferred_from_legacy": status.inferred_from_legacy
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions,
            "inferred_from_legacy": before.inferred_from_legacy
        }))?;
        return Ok(());
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_db_integrity_check(store: &SqliteStore) -> Result<()> {
    let report = store.integrity_check()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
}

/// Open the database and bring the schema up to date.
fn open_store(cli: &Cli) -> Result<SqliteStore> {
    let mut store = SqliteStore::open(&cli.db)?;
    store.migrate()?;
    Ok(store)
}

fn run_partitions_command(cli: &Cli, command: &PartitionsCommand) -> Result<()> {
    let mut store = open_store(cli)?;
    match command {
        PartitionsCommand::Seed(args) => {
            let (partitions, source) = match &args.file {
                Some(path) => (catalog::load(path)?, path.display().to_string()),
                None => (catalog::builtin(), "builtin".to_string()),
            };
            let seeded = store.seed_partitions(&partitions)?;
            tracing::info!(seeded, source = %source, "partitions seeded");
            emit_json(serde_json::json!({
                "seeded": seeded,
                "source": source,
                "partition_ids": partitions.iter().map(|partition| partition.id.as_str()).collect::<Vec<_>>()
            }))
        }
        PartitionsCommand::List => {
            let partitions = store.list_partitions()?;
            let stats = store.partition_stats()?;
            emit_json(serde_json::json!({
                "count": partitions.len(),
                "partitions": partitions,
                "stats": stats
            }))
        }
    }
}

fn run_cursor(cli: &Cli, command: &CursorCommand) -> Result<()> {
    let mut store = open_store(cli)?;
    match command {
        CursorCommand::Show(args) => {
            let selected = select_partitions(&store, &args.partitions)?;
            let cursors = store
                .list_cursors()?
                .into_iter()
                .filter(|cursor| selected.iter().any(|partition| partition.id == cursor.partition_id))
                .map(|cursor| -> Result<Value, serde_json::Error> {
                    let last_explored = cursor.last_explored();
                    let mut value = serde_json::to_value(&cursor)?;
                    value["last_explored"] = serde_json::json!(last_explored);
                    Ok(value)
                })
                .collect::<Result<Vec<_>, serde_json::Error>>()?;
            emit_json(serde_json::json!({ "cursors": cursors }))
        }
        CursorCommand::Set(args) => {
            if args.frontier == 0 {
                bail!("frontier must be at least 1");
            }
            let partition = PartitionId::new(args.partition.trim());
            if store.get_partition(&partition)?.is_none() {
                bail!("unknown partition {partition}");
            }
            let previous = store.get_cursor(&partition)?.map(|cursor| cursor.frontier);
            store.set_cursor(&partition, args.frontier, OffsetDateTime::now_utc())?;
            tracing::info!(partition = %partition, frontier = args.frontier, ?previous, "cursor set");
            emit_json(serde_json::json!({
                "partition_id": partition,
                "previous_frontier": previous,
                "frontier": args.frontier
            }))
        }
    }
}

fn run_gaps(cli: &Cli, config: &FileConfig, args: &GapsArgs) -> Result<()> {
    let store = open_store(cli)?;
    let partitions = select_partitions(&store, &args.select.partitions)?;
    let outcomes: Vec<_> = partitions
        .iter()
        .map(|partition| {
            let scan = match (args.start, args.end) {
                (Some(start), Some(end)) => scan_range(&store, &partition.id, start, end),
                _ => scan_partition(&store, &partition.id, config.engine.floor_run_length),
            };
            PartitionOutcome::from_result(partition.id.clone(), scan)
        })
        .collect();
    finish("gaps", None, &outcomes)
}

fn run_summary(cli: &Cli, config: &FileConfig, args: &SelectArgs) -> Result<()> {
    let store = open_store(cli)?;
    let partitions = select_partitions(&store, &args.partitions)?;
    let outcomes: Vec<_> = partitions
        .iter()
        .map(|partition| {
            let summary = summarize_range(&store, &partition.id, config.engine.floor_run_length);
            PartitionOutcome::from_result(partition.id.clone(), summary)
        })
        .collect();
    finish("summary", None, &outcomes)
}

#[derive(Debug, Serialize)]
struct BackfillRun {
    range_start: DocNumber,
    range_end: DocNumber,
    missing_detected: u64,
    backfill: BackfillReport,
}

fn backfill_partition(
    engine: &mut LiveEngine,
    partition: &Partition,
    cap: Option<usize>,
) -> Result<BackfillRun, Aborted<BackfillRun>> {
    let scan = engine.find_gaps(&partition.id)?;
    let cap = cap.unwrap_or(engine.config().backfill_cap);
    let run = |backfill: BackfillReport| BackfillRun {
        range_start: scan.range_start,
        range_end: scan.range_end,
        missing_detected: scan.missing.len() as u64,
        backfill,
    };
    engine
        .backfill(partition, &scan.missing, cap)
        .map(run)
        .map_err(|aborted| aborted.map(run))
}

/// Shared driver for every command that talks to the registry.
fn run_remote<T, F>(cli: &Cli, config: FileConfig, command: &str, args: &RunArgs, op: F) -> Result<()>
where
    T: Serialize,
    F: Fn(&mut LiveEngine, &Partition) -> Result<T, Aborted<T>> + Sync,
{
    if args.jobs == 0 {
        bail!("--jobs must be at least 1");
    }
    let store = open_store(cli)?;
    let partitions = select_partitions(&store, &args.select.partitions)?;
    drop(store);

    let credential = settings::credential(cli.session.as_deref(), cli.session_file.as_ref())?;
    let (halt, interrupt) = install_cancellation()?;
    let ctx = RunContext::new(cli.db.clone(), config, credential, halt, interrupt);
    tracing::info!(
        command,
        run_id = %ctx.run_id,
        partitions = partitions.len(),
        jobs = args.jobs,
        "run started"
    );

    let outcomes = runner::run_partitions(&ctx, &partitions, args.jobs, op);
    finish(command, Some(&ctx), &outcomes)
}

/// Print every partition's outcome, then fail if any of them did not complete.
///
/// `cancelled` reports an operator signal only; a rejected session is
/// reported as `session_expired`.
fn finish(command: &str, run: Option<&RunContext>, outcomes: &[PartitionOutcome]) -> Result<()> {
    let incomplete = outcomes.iter().filter(|outcome| !outcome.is_completed()).count();
    let mut value = serde_json::json!({
        "command": command,
        "cancelled": run.is_some_and(RunContext::interrupted),
        "session_expired": run.is_some_and(RunContext::session_expired),
        "incomplete": incomplete,
        "partitions": outcomes
    });
    if let Some(run) = run {
        value["run_id"] = Value::String(run.run_id.to_string());
    }
    emit_json(value)?;

    if incomplete > 0 {
        bail!("{incomplete} of {} partition(s) did not complete", outcomes.len());
    }
    Ok(())
}

fn select_partitions(store: &SqliteStore, codes: &[String]) -> Result<Vec<Partition>> {
    let known = store.list_partitions()?;
    if codes.is_empty() {
        if known.is_empty() {
            bail!("no partitions seeded; run `deedsync partitions seed` first");
        }
        return Ok(known);
    }

    let mut selected: Vec<Partition> = Vec::with_capacity(codes.len());
    for code in codes {
        let code = code.trim();
        let partition = known
            .iter()
            .find(|partition| partition.id.as_str() == code)
            .ok_or_else(|| anyhow!("unknown partition {code}"))?;
        if !selected.iter().any(|chosen| chosen.id == partition.id) {
            selected.push(partition.clone());
        }
    }
    Ok(selected)
}

/// First SIGINT or SIGTERM requests a clean stop between fetches; a second one exits.
///
/// Returns the halt token every engine watches and the interrupt token that
/// only signals set. Session expiry sets the halt token alone, so it never
/// arms the second-signal exit.
fn install_cancellation() -> Result<(CancellationToken, CancellationToken)> {
    let halt = CancellationToken::new();
    let interrupt = CancellationToken::new();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(signal, 1, interrupt.flag())
            .with_context(|| format!("failed to register shutdown for signal {signal}"))?;
        signal_hook::flag::register(signal, interrupt.flag())
            .with_context(|| format!("failed to register handler for signal {signal}"))?;
        signal_hook::flag::register(signal, halt.flag())
            .with_context(|| format!("failed to register handler for signal {signal}"))?;
    }
    Ok((halt, interrupt))
}
