use crate::config::IngestConfig;
use crate::domain::Violation;
use crate::error::{Result, TrackerError};
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::run::{AdapterStatus, AdapterSummary, RunContext, RunStatus, RunSummary};
use crate::storage::{UpsertOutcome, ViolationStore};
use crate::types::{RecordPage, RecordStream, SourceAdapter};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// When false every run is a full refresh
    pub incremental: bool,
    pub lease_timeout: chrono::Duration,
    pub channel_capacity: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            incremental: config.incremental,
            lease_timeout: chrono::Duration::minutes(config.lease_timeout_minutes.max(1)),
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

/// Runs adapters against the store, one run at a time.
pub struct IngestPipeline {
    store: Arc<dyn ViolationStore>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    normalizer: Arc<Normalizer>,
    options: IngestOptions,
    running: Arc<Mutex<()>>,
}

enum AdapterEvent {
    Page {
        adapter: &'static str,
        page: RecordPage,
    },
    Finished {
        adapter: &'static str,
        outcome: AdapterOutcome,
    },
}

enum AdapterOutcome {
    Completed { checkpoint: Option<String> },
    Failed(String),
    TimedOut(Duration),
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn ViolationStore>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        options: IngestOptions,
    ) -> Result<Self> {
        Ok(Self {
            store,
            adapters,
            normalizer: Arc::new(Normalizer::new()?),
            options,
            running: Arc::new(Mutex::new(())),
        })
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Claim the run lease. Fails with `RunInProgress` if a run is active in
    /// this process or, via the store lease, in another one.
    pub async fn try_begin(&self, full_refresh: bool) -> Result<IngestRun> {
        let guard = self.running.clone().try_lock_owned().map_err(|_| {
            TrackerError::RunInProgress("an ingestion run is already active in this process".into())
        })?;
        let full_refresh = full_refresh || !self.options.incremental;

        let mut cursors = HashMap::new();
        if !full_refresh {
            for adapter in &self.adapters {
                if let Some(cursor) = self.store.source_cursor(adapter.name()).await? {
                    cursors.insert(adapter.name().to_string(), cursor);
                }
            }
        }
        let ctx = RunContext::new(full_refresh).with_cursors(cursors);
        let summary = RunSummary::started(&ctx);
        self.store.begin_run(&summary, self.options.lease_timeout).await?;
        info!(run_id = %ctx.run_id, full_refresh, "ingestion run started");

        Ok(IngestRun {
            ctx: Arc::new(ctx),
            summary,
            store: self.store.clone(),
            adapters: self.adapters.clone(),
            normalizer: self.normalizer.clone(),
            channel_capacity: self.options.channel_capacity,
            _guard: guard,
        })
    }

    /// Begin and execute a run to completion.
    pub async fn run(&self, full_refresh: bool) -> Result<RunSummary> {
        self.try_begin(full_refresh).await?.execute().await
    }
}

/// A run that holds the lease and is ready to execute
pub struct IngestRun {
    ctx: Arc<RunContext>,
    summary: RunSummary,
    store: Arc<dyn ViolationStore>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    normalizer: Arc<Normalizer>,
    channel_capacity: usize,
    _guard: OwnedMutexGuard<()>,
}

async fn drive_adapter(
    adapter: Arc<dyn SourceAdapter>,
    ctx: Arc<RunContext>,
    tx: mpsc::Sender<AdapterEvent>,
) {
    let name = adapter.name();
    let since = ctx.since(name).map(str::to_string);
    debug!(adapter = name, since = ?since, "adapter starting");

    let limit = adapter.run_timeout();
    let pages_tx = tx.clone();
    let work = async move {
        let mut stream = RecordStream::new(adapter, ctx, since);
        while let Some(page) = stream.next_page().await {
            let page = page?;
            if pages_tx.send(AdapterEvent::Page { adapter: name, page }).await.is_err() {
                return Err(TrackerError::Store("ingestion writer stopped".into()));
            }
        }
        Ok(stream.checkpoint().map(str::to_string))
    };

    let outcome = match limit {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => completed_or_failed(result),
            Err(_) => AdapterOutcome::TimedOut(limit),
        },
        None => completed_or_failed(work.await),
    };
    let _ = tx.send(AdapterEvent::Finished { adapter: name, outcome }).await;
}

fn completed_or_failed(result: Result<Option<String>>) -> AdapterOutcome {
    match result {
        Ok(checkpoint) => AdapterOutcome::Completed { checkpoint },
        Err(e) => AdapterOutcome::Failed(e.to_string()),
    }
}

impl IngestRun {
    pub fn run_id(&self) -> Uuid {
        self.ctx.run_id
    }

    #[instrument(skip(self), fields(run_id = %self.ctx.run_id, full_refresh = self.ctx.full_refresh))]
    pub async fn execute(mut self) -> Result<RunSummary> {
        let started = Instant::now();
        let (tx, mut rx) = mpsc::channel(self.channel_capacity);

        let mut summaries: Vec<AdapterSummary> = Vec::with_capacity(self.adapters.len());
        let mut tasks = JoinSet::new();
        for adapter in &self.adapters {
            summaries.push(AdapterSummary::new(adapter.name()));
            tasks.spawn(drive_adapter(adapter.clone(), self.ctx.clone(), tx.clone()));
        }
        drop(tx);

        let mut finished: HashSet<&'static str> = HashSet::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut fatal: Option<TrackerError> = None;

        while let Some(event) = rx.recv().await {
            let result = match event {
                AdapterEvent::Page { adapter, page } => match summary_for(&mut summaries, adapter) {
                    Some(summary) => self.apply_page(summary, page, &mut seen).await,
                    None => Ok(()),
                },
                AdapterEvent::Finished { adapter, outcome } => {
                    finished.insert(adapter);
                    let elapsed = started.elapsed();
                    match summary_for(&mut summaries, adapter) {
                        Some(summary) => self.finish_adapter(summary, outcome, elapsed).await,
                        None => Ok(()),
                    }
                }
            };
            if let Err(e) = result {
                error!(error = %e, "store failure, aborting ingestion run");
                fatal = Some(e);
                break;
            }
        }
        drop(rx);
        if fatal.is_some() {
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("adapter task panicked: {}", e);
                }
            }
        }

        for summary in summaries.iter_mut() {
            if !finished.contains(summary.adapter.as_str()) && summary.error.is_none() {
                summary.status = AdapterStatus::Failed;
                summary.error = Some("adapter did not finish".to_string());
            }
        }

        self.summary.adapters = summaries;
        self.summary.finished_at = Some(Utc::now());
        self.summary.status = if fatal.is_some() {
            RunStatus::Failed
        } else if self
            .summary
            .adapters
            .iter()
            .any(|a| a.status != AdapterStatus::Succeeded)
        {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };
        self.summary.error = fatal.as_ref().map(|e| e.to_string());

        if let Err(e) = self.store.finish_run(&self.summary).await {
            error!(error = %e, "could not record ingestion run result");
            if fatal.is_none() {
                fatal = Some(e);
            }
        }
        crate::metrics::ingest::run_finished(self.summary.status.as_str(), started.elapsed().as_secs_f64());

        let totals = self.summary.totals();
        info!(
            status = self.summary.status.as_str(),
            fetched = totals.fetched,
            inserted = totals.inserted,
            updated = totals.updated,
            unchanged = totals.unchanged,
            duplicates = totals.duplicates,
            rejected = totals.rejected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingestion run finished"
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(self.summary),
        }
    }

    async fn apply_page(
        &self,
        summary: &mut AdapterSummary,
        page: RecordPage,
        seen: &mut HashSet<Uuid>,
    ) -> Result<()> {
        let adapter = summary.adapter.clone();
        let fetched = (page.records.len() + page.rejected.len()) as u64 + page.skipped;
        summary.counts.fetched += fetched;
        summary.counts.skipped += page.skipped;
        crate::metrics::ingest::records(&adapter, "fetched", fetched);
        crate::metrics::ingest::records(&adapter, "skipped", page.skipped);

        for rejection in page.rejected {
            debug!(adapter = %adapter, item = %rejection.item_ref, "schema mismatch: {}", rejection.message);
            summary.reject("schema_mapping");
            crate::metrics::ingest::rejected(&adapter, "schema_mapping");
        }

        for raw in page.records {
            let normalized = match self.normalizer.normalize(&self.ctx, raw) {
                Ok(normalized) => normalized,
                Err(rejection) => {
                    debug!(adapter = %adapter, reason = rejection.reason, "{}", rejection.message);
                    summary.reject(rejection.reason);
                    crate::metrics::ingest::rejected(&adapter, rejection.reason);
                    continue;
                }
            };
            if normalized.unparsed_date {
                summary.counts.unparsed_dates += 1;
            }
            self.store_one(summary, &normalized.violation, seen).await?;
        }
        Ok(())
    }

    async fn store_one(
        &self,
        summary: &mut AdapterSummary,
        violation: &Violation,
        seen: &mut HashSet<Uuid>,
    ) -> Result<()> {
        if !seen.insert(violation.id) {
            summary.counts.duplicates += 1;
            crate::metrics::ingest::records(&summary.adapter, "duplicate", 1);
        }
        let outcome = self.store.upsert(violation).await?;
        match outcome {
            UpsertOutcome::Inserted => summary.counts.inserted += 1,
            UpsertOutcome::Updated => summary.counts.updated += 1,
            UpsertOutcome::Unchanged => summary.counts.unchanged += 1,
        }
        crate::metrics::ingest::records(&summary.adapter, outcome.as_str(), 1);
        Ok(())
    }

    async fn finish_adapter(
        &self,
        summary: &mut AdapterSummary,
        outcome: AdapterOutcome,
        elapsed: Duration,
    ) -> Result<()> {
        summary.duration_ms = elapsed.as_millis() as u64;
        match outcome {
            AdapterOutcome::Completed { checkpoint } => {
                summary.status = AdapterStatus::Succeeded;
                if let Some(cursor) = checkpoint {
                    self.store.set_source_cursor(&summary.adapter, &cursor).await?;
                }
                info!(
                    adapter = %summary.adapter,
                    fetched = summary.counts.fetched,
                    inserted = summary.counts.inserted,
                    updated = summary.counts.updated,
                    rejected = summary.counts.rejected,
                    "adapter finished"
                );
            }
            AdapterOutcome::Failed(message) => {
                warn!(adapter = %summary.adapter, "adapter failed, skipping it for this run: {}", message);
                summary.status = AdapterStatus::Failed;
                summary.error = Some(message);
                crate::metrics::ingest::adapter_failed(&summary.adapter);
            }
            AdapterOutcome::TimedOut(limit) => {
                warn!(adapter = %summary.adapter, limit_ms = limit.as_millis() as u64, "adapter timed out");
                summary.status = AdapterStatus::TimedOut;
                summary.error = Some(format!("timed out after {:?}", limit));
                crate::metrics::ingest::adapter_failed(&summary.adapter);
            }
        }
        Ok(())
    }
}

fn summary_for<'a>(summaries: &'a mut [AdapterSummary], adapter: &str) -> Option<&'a mut AdapterSummary> {
    summaries.iter_mut().find(|s| s.adapter == adapter)
}
