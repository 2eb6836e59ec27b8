use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use anyhow::Result;
use deedsync_core::{
    Aborted, CancellationToken, Engine, EngineError, Partition, PartitionId, RunId, Throttle,
};
use deedsync_remote::{HtmlTableParser, HttpProbe, SessionCredential};
use deedsync_store_sqlite::SqliteStore;
use serde::Serialize;
use serde_json::Value;

use crate::settings::FileConfig;

pub type LiveEngine = Engine<HttpProbe, HtmlTableParser, SqliteStore>;

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Aborted,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeError {
    pub code: String,
    pub message: String,
}

/// Result line for one partition in a multi-partition command.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionOutcome {
    pub partition_id: PartitionId,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl PartitionOutcome {
    /// An aborted partition keeps whatever report the pass had built so far.
    pub fn from_result<T, E>(partition_id: PartitionId, result: Result<T, E>) -> Self
    where
        T: Serialize,
        E: Into<Aborted<T>>,
    {
        match result.map_err(Into::into) {
            Ok(report) => match serde_json::to_value(&report) {
                Ok(report) => Self {
                    partition_id,
                    status: OutcomeStatus::Completed,
                    report: Some(report),
                    error: None,
                },
                Err(err) => Self::aborted(partition_id, "serialize", err.to_string()),
            },
            Err(aborted) => {
                let mut outcome =
                    Self::aborted(partition_id, aborted.code(), aborted.error.to_string());
                outcome.report = aborted.partial.and_then(|partial| {
                    serde_json::to_value(&partial)
                        .map_err(|err| tracing::warn!(error = %err, "partial report dropped"))
                        .ok()
                });
                outcome
            }
        }
    }

    fn aborted(partition_id: PartitionId, code: &str, message: String) -> Self {
        Self {
            partition_id,
            status: OutcomeStatus::Aborted,
            report: None,
            error: Some(OutcomeError { code: code.to_string(), message }),
        }
    }

    fn skipped(partition_id: PartitionId, code: &str) -> Self {
        Self {
            partition_id,
            status: OutcomeStatus::Skipped,
            report: None,
            error: Some(OutcomeError {
                code: code.to_string(),
                message: "run halted before this partition started".to_string(),
            }),
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

/// Everything a worker needs to build its own engine. Each partition gets a
/// fresh SQLite connection and a freshly resolved session token.
pub struct RunContext {
    pub db: PathBuf,
    pub config: FileConfig,
    pub credential: SessionCredential,
    pub run_id: RunId,
    /// Seen by every engine. Set by a signal or by session expiry.
    halt: CancellationToken,
    /// Set only by SIGINT or SIGTERM.
    interrupt: CancellationToken,
    session_expired: AtomicBool,
}

impl RunContext {
    #[must_use]
    pub fn new(
        db: PathBuf,
        config: FileConfig,
        credential: SessionCredential,
        halt: CancellationToken,
        interrupt: CancellationToken,
    ) -> Self {
        Self {
            db,
            config,
            credential,
            run_id: RunId::new(),
            halt,
            interrupt,
            session_expired: AtomicBool::new(false),
        }
    }

    /// Stop the remaining partitions without marking the run as interrupted,
    /// so a later signal still gets the graceful path.
    pub fn halt_for_session_expiry(&self) {
        self.session_expired.store(true, Ordering::SeqCst);
        self.halt.cancel();
    }

    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    #[must_use]
    pub fn session_expired(&self) -> bool {
        self.session_expired.load(Ordering::SeqCst)
    }

    fn halt_reason(&self) -> &'static str {
        if self.session_expired() {
            "session_expired"
        } else {
            "cancelled"
        }
    }

    fn engine(&self, throttle: &Throttle) -> Result<LiveEngine> {
        let store = SqliteStore::open(&self.db)?;
        let probe = HttpProbe::new(self.config.remote.clone(), &self.credential)?;
        let parser = HtmlTableParser::new()?;
        Ok(Engine::new(probe, parser, store, self.config.engine.clone())
            .with_cancellation(self.halt.clone())
            .with_throttle(throttle.clone())
            .with_run_id(self.run_id))
    }
}

/// Run `op` once per partition on up to `jobs` worker threads.
///
/// Outcomes come back in input order. A failed partition never stops the
/// others, except session expiry, which halts the whole run. Each worker keeps
/// one throttle across its partitions so the request delay also applies at
/// partition boundaries.
pub fn run_partitions<T, F>(
    ctx: &RunContext,
    partitions: &[Partition],
    jobs: usize,
    op: F,
) -> Vec<PartitionOutcome>
where
    T: Serialize,
    F: Fn(&mut LiveEngine, &Partition) -> Result<T, Aborted<T>> + Sync,
{
    let jobs = jobs.clamp(1, partitions.len().max(1));
    let next = AtomicUsize::new(0);
    let finished = Mutex::new(Vec::with_capacity(partitions.len()));

    thread::scope(|scope| {
        for _ in 0..jobs {
            let (next, finished, op) = (&next, &finished, &op);
            scope.spawn(move || {
                let mut throttle = Throttle::new(ctx.config.engine.request_delay());
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(partition) = partitions.get(index) else {
                        break;
                    };
                    let outcome = run_one(ctx, partition, &mut throttle, op);
                    finished.lock().unwrap_or_else(PoisonError::into_inner).push((index, outcome));
                }
            });
        }
    });

    let mut finished = finished.into_inner().unwrap_or_else(PoisonError::into_inner);
    finished.sort_by_key(|(index, _)| *index);
    finished.into_iter().map(|(_, outcome)| outcome).collect()
}

fn run_one<T, F>(
    ctx: &RunContext,
    partition: &Partition,
    throttle: &mut Throttle,
    op: &F,
) -> PartitionOutcome
where
    T: Serialize,
    F: Fn(&mut LiveEngine, &Partition) -> Result<T, Aborted<T>>,
{
    let _span =
        tracing::info_span!("partition", partition = %partition.id, run_id = %ctx.run_id).entered();
    if ctx.halt.is_cancelled() {
        tracing::warn!(reason = ctx.halt_reason(), "skipping partition, run already halted");
        return PartitionOutcome::skipped(partition.id.clone(), ctx.halt_reason());
    }

    let mut engine = match ctx.engine(throttle) {
        Ok(engine) => engine,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "failed to prepare partition");
            return PartitionOutcome::aborted(partition.id.clone(), "setup", format!("{err:#}"));
        }
    };

    let result = op(&mut engine, partition);
    throttle.clone_from(engine.throttle());
    match &result {
        Err(aborted) if matches!(aborted.error, EngineError::SessionExpired { .. }) => {
            tracing::error!(error = %aborted, "session expired, halting run");
            ctx.halt_for_session_expiry();
        }
        Err(aborted) => tracing::error!(code = aborted.code(), error = %aborted, "partition aborted"),
        Ok(_) => tracing::debug!(probes = engine.probes_issued(), "partition completed"),
    }
    PartitionOutcome::from_result(partition.id.clone(), result)
}
