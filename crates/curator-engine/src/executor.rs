//! Directive executor: the per-table state machine and the repair loop.
//!
//! For every table of a directive:
//!
//! 1. consult repair memory; a remembered `SkipTable` ends the table
//!    before any source I/O,
//! 2. extract, transform, write the local artifact, then optionally
//!    upload and load the warehouse,
//! 3. on a classified failure, reuse the remembered action for its
//!    signature or record the policy's action, and apply it.
//!
//! `Retry` re-runs the whole table once with identical inputs. `Abort`
//! stops the directive and returns the outcomes gathered so far.
//!
//! Every step gets its own [`CancelToken`]. A step that times out, or
//! that is still running when a sibling aborts the directive, is
//! cancelled before it can commit; a step that already committed is
//! waited for and reported.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use curator_state::RepairStore;
use curator_types::{
    Directive, DirectiveOutcome, DirectiveReport, ErrorClass, ErrorSignature, LoadResult,
    PipelineError, RepairAction, RepairDecision, SchemaCatalog, TableName, TableStatus, Target,
};
use tokio::task::JoinSet;

use crate::cancel::CancelToken;
use crate::catalog::{load_catalog, CatalogHandle};
use crate::config::EngineSettings;
use crate::connector::{
    Artifact, Connector, CsvEncoder, FsObjectStore, LoadMode, LoadOptions, LocalConnector,
    ObjectStorageConnector, RowEncoder, SqliteWarehouse,
};
use crate::errors::EngineError;
use crate::extract::{extract, SourcePattern};
use crate::policy::{DefaultPolicy, RepairPolicy};
use crate::transform::{read_sources, transform, TransformOptions};

static DEFAULT_PATTERN: LazyLock<SourcePattern> =
    LazyLock::new(|| SourcePattern::new("*.json").expect("valid default glob"));

/// A step either fails inside the taxonomy or outside of it, or stops
/// because the directive was cancelled.
enum StepError {
    Pipeline(PipelineError),
    Engine(EngineError),
    Cancelled,
}

impl From<PipelineError> for StepError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

impl From<EngineError> for StepError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

/// Result of one successful pass over a table.
enum Pass {
    Loaded(LoadResult),
    NoRows,
}

/// Terminal outcome of one table and whether it stops the directive.
struct Verdict {
    outcome: DirectiveOutcome,
    abort: bool,
}

/// Run blocking work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, StepError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(StepError::Pipeline),
        Err(join_err) => Err(StepError::Engine(join_err.into())),
    }
}

/// Bound a step by the directive's step timeout.
///
/// On expiry the step's token is cancelled. If the step already claimed
/// its commit point it is awaited instead, so its outcome is never lost.
async fn bounded<T>(
    limit: Option<Duration>,
    cancel: &CancelToken,
    table: &TableName,
    stage: &'static str,
    step: impl Future<Output = Result<T, StepError>>,
) -> Result<T, StepError> {
    let Some(limit) = limit else {
        return step.await;
    };
    let mut step = std::pin::pin!(step);
    let timed = tokio::time::timeout(limit, &mut step).await;
    match timed {
        Ok(result) => result,
        Err(_) if cancel.cancel() => Err(StepError::Pipeline(PipelineError::Timeout {
            table: table.to_string(),
            stage: stage.to_string(),
            timeout: limit,
        })),
        Err(_) => {
            tracing::warn!(table = %table, stage, "Step timed out after committing, awaiting it");
            step.await
        }
    }
}

/// Everything one table needs, shared by every table of a directive.
#[derive(Clone)]
struct TableRunner {
    catalog: Arc<SchemaCatalog>,
    directive: Arc<Directive>,
    store: Arc<dyn RepairStore>,
    policy: Arc<dyn RepairPolicy>,
    local: Arc<dyn Connector>,
    object_storage: Option<Arc<dyn Connector>>,
    warehouse: Option<Arc<dyn Connector>>,
    pattern: SourcePattern,
    /// Directive-wide; every step token is a child of it.
    cancel: CancelToken,
}

impl TableRunner {
    async fn store_call<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RepairStore) -> curator_state::error::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || f(store.as_ref())).await?;
        Ok(result?)
    }

    /// A remembered `SkipTable` whose signature still names a known class.
    async fn remembered_skip(&self, table: &TableName) -> Result<Option<RepairDecision>, EngineError> {
        let key = table.clone();
        let decisions = self
            .store_call(move |store| store.decisions_for_table(&key))
            .await?;
        Ok(decisions.into_iter().find(|d| {
            d.action == RepairAction::SkipTable
                && ErrorClass::from_signature(d.error_signature.as_str()).is_some()
        }))
    }

    fn checkpoint(&self) -> Result<(), StepError> {
        if self.cancel.is_cancelled() {
            Err(StepError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Step options carrying a fresh child token.
    fn for_step(&self, base: &LoadOptions) -> Arc<LoadOptions> {
        Arc::new(LoadOptions {
            cancel: self.cancel.child(),
            ..base.clone()
        })
    }

    /// Reuse the remembered action for this failure, or record the policy's.
    async fn decide(
        &self,
        table: &TableName,
        error: &PipelineError,
    ) -> Result<RepairDecision, EngineError> {
        let class = error.class();
        let proposed = self.policy.action_for(class);
        let key = table.clone();
        let signature: ErrorSignature = class.signature();
        let reason = error.to_string();

        self.store_call(move |store| {
            store.touch_or_insert(&key, &signature, proposed, Some(reason.as_str()))
        })
        .await
    }

    /// One pass: extract, transform, persist, upload, warehouse.
    async fn run_once(&self, table: &TableName, malformed: &mut u64) -> Result<Pass, StepError> {
        let directive = &self.directive;
        let options = &directive.options;
        let limit = options.step_timeout;

        self.checkpoint()?;
        tracing::info!(table = %table, stage = "extract", "Extracting");
        let extracted = {
            let catalog = Arc::clone(&self.catalog);
            let name = table.clone();
            let raw_dir = directive.raw_dir.clone();
            let pattern = self.pattern.clone();
            bounded(
                limit,
                &self.cancel.child(),
                table,
                "extract",
                blocking(move || extract(&catalog, name.as_str(), &raw_dir, &pattern)),
            )
            .await?
        };

        tracing::info!(table = %table, stage = "transform", sources = extracted.source_count, "Transforming");
        self.checkpoint()?;
        let documents = bounded(
            limit,
            &self.cancel.child(),
            table,
            "transform",
            blocking(move || Ok(read_sources(&extracted.sources))),
        )
        .await?;
        let data = transform(
            &self.catalog,
            table,
            &documents,
            TransformOptions {
                max_records: options.max_records,
                require_rows: options.require_rows,
            },
        )?;
        drop(documents);
        *malformed = data.malformed;
        if data.rows.is_empty() {
            return Ok(Pass::NoRows);
        }
        let data = Arc::new(data);

        tracing::info!(table = %table, stage = "load", rows = data.rows.len(), "Writing artifact");
        let load_options = LoadOptions {
            mode: LoadMode::select(options.truncate, options.upsert),
            chunk_size: options.chunk_size,
            primary_key: self
                .catalog
                .resolve(table.as_str())?
                .primary_key
                .clone(),
            cancel: CancelToken::new(),
        };
        self.checkpoint()?;
        let delivery = {
            let local = Arc::clone(&self.local);
            let data = Arc::clone(&data);
            let opts = self.for_step(&load_options);
            let token = opts.cancel.clone();
            bounded(
                limit,
                &token,
                table,
                "load",
                blocking(move || local.persist(&data, &opts)),
            )
            .await?
        };
        let artifact = Arc::new(Artifact {
            table: table.clone(),
            path: delivery.location.clone().into(),
            row_count: data.row_count(),
        });

        let mut remote_uri = None;
        if options.enable_upload {
            let connector = self.object_storage.clone().ok_or_else(|| {
                PipelineError::unsupported("object_storage", "load_from_artifact")
            })?;
            self.checkpoint()?;
            tracing::info!(table = %table, stage = "upload", "Uploading artifact");
            let artifact = Arc::clone(&artifact);
            let opts = self.for_step(&load_options);
            let token = opts.cancel.clone();
            let uploaded = bounded(
                limit,
                &token,
                table,
                "upload",
                blocking(move || connector.load_from_artifact(&artifact, &opts)),
            )
            .await?;
            remote_uri = Some(uploaded.location);
        }

        let mut warehouse_rows = None;
        if options.enable_warehouse_load {
            let connector = self
                .warehouse
                .clone()
                .ok_or_else(|| PipelineError::unsupported("warehouse", "load_from_artifact"))?;
            self.checkpoint()?;
            tracing::info!(
                table = %table,
                stage = "warehouse_load",
                mode = load_options.mode.as_str(),
                chunk_size = options.chunk_size,
                "Loading warehouse"
            );
            let artifact = Arc::clone(&artifact);
            let opts = self.for_step(&load_options);
            let token = opts.cancel.clone();
            let loaded = bounded(
                limit,
                &token,
                table,
                "warehouse_load",
                blocking(move || connector.load_from_artifact(&artifact, &opts)),
            )
            .await?;
            warehouse_rows = Some(loaded.rows);
        }

        Ok(Pass::Loaded(LoadResult {
            table: table.clone(),
            local_path: artifact.path.clone(),
            remote_uri,
            row_count: data.row_count(),
            warehouse_rows,
        }))
    }

    /// `None` when the directive was cancelled before this table finished.
    async fn process_table(&self, table: TableName) -> Result<Option<Verdict>, EngineError> {
        if let Some(decision) = self.remembered_skip(&table).await? {
            tracing::info!(
                table = %table,
                signature = %decision.error_signature,
                action = %decision.action,
                "Skipping table from repair memory"
            );
            return Ok(Some(Verdict {
                outcome: DirectiveOutcome::skipped(
                    table,
                    decision.error_signature.to_string(),
                    None,
                ),
                abort: false,
            }));
        }

        let mut attempts = 0u32;
        let mut retried = false;
        loop {
            attempts += 1;
            let mut malformed = 0u64;
            let error = match self.run_once(&table, &mut malformed).await {
                Ok(Pass::Loaded(load)) => {
                    tracing::info!(
                        table = %table,
                        rows = load.row_count,
                        attempts,
                        "Table loaded"
                    );
                    return Ok(Some(Verdict {
                        outcome: DirectiveOutcome::loaded(table, load, attempts, malformed),
                        abort: false,
                    }));
                }
                Ok(Pass::NoRows) => {
                    tracing::info!(table = %table, "No rows produced, skipping table");
                    return Ok(Some(Verdict {
                        outcome: DirectiveOutcome::skipped(table, "no_rows", None)
                            .with_attempts(attempts)
                            .with_malformed(malformed),
                        abort: false,
                    }));
                }
                Err(StepError::Engine(e)) => return Err(e),
                Err(StepError::Cancelled) => {
                    tracing::info!(table = %table, "Directive cancelled, table not finished");
                    return Ok(None);
                }
                Err(StepError::Pipeline(error)) if self.cancel.is_cancelled() => {
                    tracing::info!(table = %table, error = %error, "Directive cancelled, table not finished");
                    return Ok(None);
                }
                Err(StepError::Pipeline(error)) => error,
            };

            let class = error.class();
            let decision = self.decide(&table, &error).await?;
            tracing::warn!(
                table = %table,
                signature = %decision.error_signature,
                action = %decision.action,
                attempt = attempts,
                error = %error,
                "Table step failed"
            );

            let outcome = match decision.action {
                RepairAction::Retry if !retried => {
                    retried = true;
                    continue;
                }
                RepairAction::Retry => match self.policy.exhausted_status(class) {
                    TableStatus::Skipped => {
                        DirectiveOutcome::skipped(table, class.as_str(), Some(&error))
                    }
                    _ => DirectiveOutcome::failed(table, &error),
                },
                RepairAction::SkipTable => {
                    DirectiveOutcome::skipped(table, class.as_str(), Some(&error))
                }
                RepairAction::Fail | RepairAction::Abort => DirectiveOutcome::failed(table, &error),
            };
            return Ok(Some(Verdict {
                outcome: outcome.with_attempts(attempts).with_malformed(malformed),
                abort: decision.action == RepairAction::Abort,
            }));
        }
    }
}

/// Runs directives against a catalog, a repair store and a set of media.
pub struct DirectiveExecutor {
    catalog: Arc<CatalogHandle>,
    store: Arc<dyn RepairStore>,
    policy: Arc<dyn RepairPolicy>,
    encoder: Arc<dyn RowEncoder>,
    object_storage: Option<Arc<dyn Connector>>,
    warehouse: Option<Arc<dyn Connector>>,
    pattern: SourcePattern,
    parallelism: usize,
}

impl DirectiveExecutor {
    /// Executor with the default policy, CSV artifacts, `*.json` sources,
    /// sequential tables and no upload or warehouse medium.
    pub fn new(catalog: Arc<CatalogHandle>, store: Arc<dyn RepairStore>) -> Self {
        Self {
            catalog,
            store,
            policy: Arc::new(DefaultPolicy::new()),
            encoder: Arc::new(CsvEncoder),
            object_storage: None,
            warehouse: None,
            pattern: DEFAULT_PATTERN.clone(),
            parallelism: 1,
        }
    }

    /// Build an executor from settings: `FsObjectStore` when a bucket is
    /// configured, `SqliteWarehouse` when the warehouse is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the source pattern is invalid or the warehouse
    /// cannot be opened.
    pub fn from_settings(
        settings: &EngineSettings,
        catalog: Arc<CatalogHandle>,
        store: Arc<dyn RepairStore>,
    ) -> anyhow::Result<Self> {
        let encoder: Arc<dyn RowEncoder> = Arc::new(CsvEncoder);
        let mut executor = Self::new(catalog, store)
            .with_source_pattern(&settings.source_pattern)?
            .with_parallelism(settings.parallelism);

        if let Some(bucket) = settings.upload.bucket.as_deref() {
            executor = executor.with_object_storage(Arc::new(ObjectStorageConnector::new(
                Arc::new(FsObjectStore::new(&settings.upload.root)),
                bucket,
                &settings.upload.prefix,
                Arc::clone(&encoder),
            )));
        }
        if settings.warehouse.enabled {
            executor = executor.with_warehouse(Arc::new(SqliteWarehouse::open(
                &settings.warehouse.path,
                Arc::clone(&encoder),
            )?));
        }
        Ok(executor)
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn RepairPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn RowEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    #[must_use]
    pub fn with_object_storage(mut self, connector: Arc<dyn Connector>) -> Self {
        self.object_storage = Some(connector);
        self
    }

    #[must_use]
    pub fn with_warehouse(mut self, connector: Arc<dyn Connector>) -> Self {
        self.warehouse = Some(connector);
        self
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// # Errors
    ///
    /// Returns an error if `glob` cannot be compiled.
    pub fn with_source_pattern(mut self, glob: &str) -> anyhow::Result<Self> {
        self.pattern = SourcePattern::new(glob)?;
        Ok(self)
    }

    #[must_use]
    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    fn catalog_for(&self, schema_config: Option<&Path>) -> Result<Arc<SchemaCatalog>, EngineError> {
        match schema_config {
            Some(path) => Ok(Arc::new(load_catalog(path)?)),
            None => Ok(self.catalog.snapshot()),
        }
    }

    /// Execute a directive.
    ///
    /// Table-level failures are reported in the returned
    /// [`DirectiveReport`]; they are never returned as errors.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the directive's catalog cannot be loaded,
    /// the repair store fails or a worker task panics.
    pub async fn run(&self, directive: Directive) -> Result<DirectiveReport, EngineError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let catalog = self.catalog_for(directive.schema_config.as_deref())?;
        let target = directive.target.clone();

        tracing::info!(
            scope = %target,
            raw_dir = %directive.raw_dir.display(),
            processed_dir = %directive.processed_dir.display(),
            upload = directive.options.enable_upload,
            warehouse = directive.options.enable_warehouse_load,
            "Starting directive"
        );

        let tables: Vec<TableName> = match &target {
            Target::All => catalog.table_names().cloned().collect(),
            Target::Table(name) => match catalog.resolve(name.as_str()) {
                Ok(entry) => vec![entry.table.clone()],
                Err(error) => {
                    tracing::error!(table = %name, error = %error, "Rejecting directive");
                    let outcome = DirectiveOutcome::failed(name.clone(), &error);
                    return Ok(DirectiveReport::new(
                        directive.target.clone(),
                        vec![outcome],
                        true,
                        started_at,
                        clock.elapsed().as_secs_f64(),
                    ));
                }
            },
        };

        let runner = TableRunner {
            local: Arc::new(LocalConnector::new(
                directive.processed_dir.clone(),
                Arc::clone(&self.encoder),
            )),
            catalog: Arc::clone(&catalog),
            directive: Arc::new(directive),
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
            object_storage: self.object_storage.clone(),
            warehouse: self.warehouse.clone(),
            pattern: self.pattern.clone(),
            cancel: CancelToken::new(),
        };

        let (mut outcomes, aborted) = if self.parallelism > 1 && tables.len() > 1 {
            self.run_parallel(&runner, tables).await?
        } else {
            Self::run_sequential(&runner, tables).await?
        };

        let order: HashMap<&TableName, usize> =
            catalog.table_names().enumerate().map(|(i, t)| (t, i)).collect();
        outcomes.sort_by_key(|o| order.get(&o.table).copied().unwrap_or(usize::MAX));

        let report = DirectiveReport::new(
            target,
            outcomes,
            aborted,
            started_at,
            clock.elapsed().as_secs_f64(),
        );
        tracing::info!(
            scope = %report.target,
            status = %report.status,
            tables = report.outcomes.len(),
            rows = report.total_rows(),
            duration_secs = report.duration_secs,
            "Directive finished"
        );
        Ok(report)
    }

    async fn run_sequential(
        runner: &TableRunner,
        tables: Vec<TableName>,
    ) -> Result<(Vec<DirectiveOutcome>, bool), EngineError> {
        let mut outcomes = Vec::with_capacity(tables.len());
        for table in tables {
            let Some(verdict) = runner.process_table(table).await? else {
                break;
            };
            outcomes.push(verdict.outcome);
            if verdict.abort {
                tracing::error!("Abort decision, halting directive");
                return Ok((outcomes, true));
            }
        }
        Ok((outcomes, false))
    }

    /// Run tables concurrently. An abort decision cancels the siblings'
    /// tokens, then drains them: a sibling that already committed a step
    /// still reports its outcome.
    async fn run_parallel(
        &self,
        runner: &TableRunner,
        tables: Vec<TableName>,
    ) -> Result<(Vec<DirectiveOutcome>, bool), EngineError> {
        let mut join_set: JoinSet<Result<Option<Verdict>, EngineError>> = JoinSet::new();
        let mut pending = tables.into_iter();
        let mut outcomes = Vec::new();
        let mut aborted = false;

        loop {
            while !aborted && join_set.len() < self.parallelism {
                let Some(table) = pending.next() else { break };
                let runner = runner.clone();
                join_set.spawn(async move { runner.process_table(table).await });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok(Ok(Some(verdict))) => {
                    if verdict.abort && !aborted {
                        tracing::error!(table = %verdict.outcome.table, "Abort decision, cancelling sibling tables");
                        aborted = true;
                        runner.cancel.cancel();
                    }
                    outcomes.push(verdict.outcome);
                }
                Ok(Ok(None)) => {}
                Ok(Err(error)) => {
                    runner.cancel.cancel();
                    join_set.abort_all();
                    return Err(error);
                }
                Err(join_err) => {
                    runner.cancel.cancel();
                    join_set.abort_all();
                    return Err(EngineError::Infrastructure(anyhow::anyhow!(
                        "table task panicked: {join_err}"
                    )));
                }
            }
        }
        Ok((outcomes, aborted))
    }
}
