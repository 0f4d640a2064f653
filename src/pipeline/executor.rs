//! Pipeline executor: merge phase, barrier, sync phase.
//!
//! The merge phase reads every source in configuration order, fanning out
//! reads under the `w_source` semaphore, and folds the results into one
//! base bundle (same-path collisions compose with deep merge in source
//! order). After an explicit barrier the sync phase walks the plan level
//! by level: targets within a level fan out under `w_target`, resolve
//! their bundle from imports and overrides, diff against the store
//! snapshot, and apply entries with per-entry error isolation. Dry-run
//! suppresses every write, including blob persistence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use super::planner::{self, Plan};
use super::{EntryFailure, RunOutcome, RunReport, TargetReport};
use crate::breaker::{Breakers, RetryPolicy};
use crate::config::{AppConfig, DefaultsConfig, FilterConfig, TargetConfig, BASE_MERGED};
use crate::context::{Clock, RequestContext, SystemClock};
use crate::diff::{compute_diff, render, DiffKind, DiffSummary, RenderOptions};
use crate::discovery::{self, DiscoveryService, OrgDirectoryClient};
use crate::errors::{Result, VaultSyncError};
use crate::merge::{deep_merge, deep_merge_bounded, MergedBundle, SecretTree};
use crate::observability::metrics;
use crate::source::{path, SourceClient, SourceReader};
use crate::store::blob::{merge_store_disabled, BlobClient, BlobMergeStore};
use crate::store::{ListingCache, SecretRecord, SecretStoreFactory, TargetStore};

/// Per-run overrides layered over `defaults` in the configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: Option<bool>,
    pub render_diff: Option<RenderOptions>,
}

/// Builder wiring collaborator clients into a [`PipelineExecutor`]
pub struct PipelineBuilder {
    config: AppConfig,
    source_clients: Vec<Arc<dyn SourceClient>>,
    store_factory: Option<Arc<dyn SecretStoreFactory>>,
    blob_client: Option<Arc<dyn BlobClient>>,
    org_client: Option<Arc<dyn OrgDirectoryClient>>,
    clock: Arc<dyn Clock>,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            source_clients: Vec::new(),
            store_factory: None,
            blob_client: None,
            org_client: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Register the client for the next configured source (in order)
    pub fn with_source_client(mut self, client: Arc<dyn SourceClient>) -> Self {
        self.source_clients.push(client);
        self
    }

    pub fn with_store_factory(mut self, factory: Arc<dyn SecretStoreFactory>) -> Self {
        self.store_factory = Some(factory);
        self
    }

    pub fn with_blob_client(mut self, client: Arc<dyn BlobClient>) -> Self {
        self.blob_client = Some(client);
        self
    }

    pub fn with_org_client(mut self, client: Arc<dyn OrgDirectoryClient>) -> Self {
        self.org_client = Some(client);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<PipelineExecutor> {
        self.config.validate()?;

        if self.source_clients.len() != self.config.sources.len() {
            return Err(VaultSyncError::validation(format!(
                "{} sources configured but {} source clients registered",
                self.config.sources.len(),
                self.source_clients.len()
            )));
        }
        let store_factory = self
            .store_factory
            .ok_or_else(|| VaultSyncError::validation("no secret store factory registered"))?;

        let breakers =
            Breakers::new(self.config.circuit_breaker.to_breaker_config(), self.clock.clone());
        let retry = RetryPolicy {
            call_timeout: Some(Duration::from_secs(self.config.defaults.per_call_timeout_secs)),
            ..RetryPolicy::default()
        };

        let sources = self
            .source_clients
            .into_iter()
            .zip(self.config.sources.iter().cloned())
            .map(|(client, source_config)| {
                SourceReader::new(client, source_config, breakers.source.clone(), retry.clone())
            })
            .collect();

        let blob_store = if self.config.merge_store.enabled {
            let client = self.blob_client.ok_or_else(|| {
                VaultSyncError::validation("merge store enabled but no blob client registered")
            })?;
            Some(BlobMergeStore::new(
                client,
                self.config.merge_store.prefix.clone(),
                breakers.blob_store.clone(),
                retry.clone(),
            ))
        } else {
            None
        };

        let discovery_service = if self.config.discovery.enabled {
            let client = self.org_client.ok_or_else(|| {
                VaultSyncError::validation(
                    "discovery enabled but no organization directory client registered",
                )
            })?;
            Some(DiscoveryService::new(
                client,
                self.clock.clone(),
                breakers.discovery.clone(),
                retry.clone(),
            ))
        } else {
            None
        };

        Ok(PipelineExecutor {
            listing_cache: Arc::new(ListingCache::with_default_ttl(self.clock.clone())),
            config: self.config,
            sources,
            store_factory,
            blob_store,
            discovery: discovery_service,
            breakers,
            retry,
        })
    }
}

/// Drives one run of the two-phase pipeline.
///
/// The executor exclusively owns its plan and in-memory base bundle for
/// the duration of a run; collaborator clients are shared by reference
/// across targets.
pub struct PipelineExecutor {
    config: AppConfig,
    sources: Vec<SourceReader>,
    store_factory: Arc<dyn SecretStoreFactory>,
    blob_store: Option<BlobMergeStore>,
    discovery: Option<DiscoveryService>,
    listing_cache: Arc<ListingCache>,
    breakers: Breakers,
    retry: RetryPolicy,
}

impl PipelineExecutor {
    /// Execute the full pipeline: discovery expansion, planning, merge
    /// phase, sync phase.
    ///
    /// Plan-level failures (cycles, invalid config) and merge-phase
    /// failures return `Err`; per-target failures are isolated into the
    /// report.
    pub async fn run(&self, ctx: &RequestContext, options: RunOptions) -> Result<RunReport> {
        let started = Instant::now();
        let run_ctx = self.run_context(ctx);
        let dry_run = options.dry_run.unwrap_or(self.config.defaults.dry_run);
        let render_options = self.render_options(&options);

        let span = info_span!("pipeline_run", request_id = %run_ctx.request_id(), dry_run = dry_run);
        async {
            let (targets, discovered, skipped) = self.discover_targets(&run_ctx).await?;
            let plan = planner::plan(&targets)?;
            info!(
                targets = plan.len(),
                levels = plan.levels().len(),
                order = ?plan.ordered_names(),
                "Plan built"
            );

            let base = self.run_merge_phase(&run_ctx).await?;
            info!(paths = base.len(), "Merge phase complete");

            if let (Some(blob), false) = (&self.blob_store, dry_run) {
                blob.write_bundle(&run_ctx, BASE_MERGED, &base).await?;
            }

            // Barrier: the sync phase only starts once the base bundle is
            // fully materialized.
            let merged_paths = base.len();
            let (reports, cancelled) =
                self.run_sync_phase(&run_ctx, &plan, Arc::new(base), dry_run, &render_options).await;

            let outcome = Self::classify(&reports, cancelled);
            metrics::record_run(outcome.as_str(), started.elapsed());
            info!(
                outcome = outcome.as_str(),
                targets = reports.len(),
                cancelled = cancelled,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Run complete"
            );

            Ok(RunReport {
                request_id: run_ctx.request_id().to_string(),
                outcome,
                merged_paths,
                discovered_accounts: discovered,
                discovery_skipped_subtrees: skipped,
                cancelled,
                targets: reports,
                elapsed: started.elapsed(),
            })
        }
        .instrument(span)
        .await
    }

    fn run_context(&self, ctx: &RequestContext) -> RequestContext {
        let child = ctx.child();
        match self.config.defaults.run_timeout_secs {
            Some(secs) => {
                let timeout = Duration::from_secs(secs);
                // Never extend an inherited deadline.
                if child.remaining().map_or(true, |remaining| remaining > timeout) {
                    child.with_timeout(timeout)
                } else {
                    child
                }
            }
            None => child,
        }
    }

    fn render_options(&self, options: &RunOptions) -> Option<RenderOptions> {
        if let Some(render) = &options.render_diff {
            return Some(render.clone());
        }
        if self.config.defaults.diff {
            return Some(RenderOptions {
                format: self.config.defaults.output_format,
                show_values: self.config.defaults.show_values,
                color: true,
            });
        }
        None
    }

    async fn discover_targets(
        &self,
        ctx: &RequestContext,
    ) -> Result<(Vec<TargetConfig>, Option<usize>, usize)> {
        let Some(service) = &self.discovery else {
            return Ok((self.config.targets.clone(), None, 0));
        };

        let outcome = service.discover(ctx, &self.config.discovery).await?;
        let expanded = discovery::expand_targets(&self.config.targets, &outcome.accounts);
        info!(
            accounts = outcome.accounts.len(),
            targets = expanded.len(),
            "Discovery expanded target templates"
        );
        Ok((expanded, Some(outcome.accounts.len()), outcome.skipped_subtrees))
    }

    /// Merge phase: list and read every source, fold in configuration order
    async fn run_merge_phase(&self, ctx: &RequestContext) -> Result<MergedBundle> {
        let node_limit = self.config.defaults.merge_node_limit;
        let mut base = MergedBundle::new();

        for reader in &self.sources {
            ctx.check("merge_phase")?;
            let leaves = reader.list_leaves(ctx).await?;
            debug!(mount = %reader.mount(), leaves = leaves.len(), "Listed source");

            let semaphore = Arc::new(Semaphore::new(self.config.concurrency.w_source));
            let mut join_set: JoinSet<Result<(usize, SecretTree)>> = JoinSet::new();

            for (index, leaf) in leaves.iter().enumerate() {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| VaultSyncError::internal("source semaphore closed"))?;
                let reader = reader.clone();
                let leaf = leaf.clone();
                let task_ctx = ctx.child();
                join_set.spawn(async move {
                    let _permit = permit;
                    let (value, _version) = reader.read(&task_ctx, &leaf).await?;
                    Ok((index, value))
                });
            }

            // Reads complete in any order; reassemble in listing order so
            // the fold stays deterministic.
            let mut values: Vec<Option<SecretTree>> = vec![None; leaves.len()];
            while let Some(joined) = join_set.join_next().await {
                let (index, value) = joined
                    .map_err(|e| VaultSyncError::internal(format!("source read task failed: {}", e)))??;
                values[index] = Some(value);
            }

            let mut source_bundle = MergedBundle::new();
            for (leaf, value) in leaves.into_iter().zip(values) {
                if let Some(value) = value {
                    source_bundle.insert(leaf, value);
                }
            }
            fold_bundle(&mut base, source_bundle, node_limit)?;
        }

        Ok(base)
    }

    /// Sync phase: walk plan levels, fanning targets out within each level
    async fn run_sync_phase(
        &self,
        ctx: &RequestContext,
        plan: &Plan,
        base: Arc<MergedBundle>,
        dry_run: bool,
        render_options: &Option<RenderOptions>,
    ) -> (Vec<TargetReport>, bool) {
        let mut reports: Vec<TargetReport> = Vec::new();
        let mut cancelled = false;

        'levels: for level in plan.levels() {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }

            let semaphore = Arc::new(Semaphore::new(self.config.concurrency.w_target));
            let mut join_set: JoinSet<TargetReport> = JoinSet::new();

            for target in level {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break 'levels;
                };
                let task = SyncTask {
                    target: target.clone(),
                    base: base.clone(),
                    blob_store: self.blob_store.clone(),
                    store_factory: self.store_factory.clone(),
                    listing_cache: self.listing_cache.clone(),
                    breakers: self.breakers.clone(),
                    retry: self.retry.clone(),
                    defaults: self.config.defaults.clone(),
                    w_entry: self.config.concurrency.w_entry,
                    dry_run,
                    render_options: render_options.clone(),
                };
                let task_ctx = ctx.child();
                join_set.spawn(async move {
                    let _permit = permit;
                    task.run(&task_ctx).await
                });
            }

            // Barrier between levels: importers only start after every
            // dependency in this level has settled.
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        reports.push(TargetReport::failed(
                            "<unknown>",
                            format!("sync task failed: {}", e),
                            dry_run,
                        ));
                    }
                }
            }

            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }
        }

        // Deterministic report order regardless of completion interleaving.
        reports.sort_by(|a, b| a.target.cmp(&b.target));
        (reports, cancelled)
    }

    fn classify(reports: &[TargetReport], cancelled: bool) -> RunOutcome {
        let erred = |r: &TargetReport| r.has_errors();
        let all_erred = !reports.is_empty() && reports.iter().all(erred);
        let any_erred = reports.iter().any(erred);
        let any_applied = reports.iter().any(|r| r.applied > 0 && !r.dry_run);

        if all_erred {
            RunOutcome::Failed
        } else if any_erred || cancelled {
            RunOutcome::PartialFailure
        } else if any_applied {
            RunOutcome::Changed
        } else {
            RunOutcome::Ok
        }
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("sources", &self.sources.len())
            .field("targets", &self.config.targets.len())
            .field("merge_store", &self.blob_store.is_some())
            .field("discovery", &self.discovery.is_some())
            .finish()
    }
}

/// Fold `overlay` into `base`, composing same-path values with deep merge
/// under the optional node budget
fn fold_bundle(
    base: &mut MergedBundle,
    overlay: MergedBundle,
    node_limit: Option<usize>,
) -> Result<()> {
    for (record_path, overlay_value) in overlay {
        match base.get_mut(&record_path) {
            Some(slot) => {
                let base_value = std::mem::replace(slot, SecretTree::Null);
                *slot = match node_limit {
                    Some(limit) => deep_merge_bounded(base_value, overlay_value, limit)?,
                    None => deep_merge(base_value, overlay_value),
                };
            }
            None => {
                base.insert(record_path, overlay_value);
            }
        }
    }
    Ok(())
}

/// Compiled per-target filters
struct CompiledFilters {
    path_regex: Option<regex::Regex>,
    exclude_regex: Option<regex::Regex>,
    tag_match: Vec<(glob::Pattern, glob::Pattern)>,
}

impl CompiledFilters {
    fn compile(filters: Option<&FilterConfig>) -> Result<Self> {
        let Some(filters) = filters else {
            return Ok(Self { path_regex: None, exclude_regex: None, tag_match: Vec::new() });
        };
        let path_regex = filters.path_regex.as_deref().map(regex::Regex::new).transpose()?;
        let exclude_regex = filters.exclude_regex.as_deref().map(regex::Regex::new).transpose()?;
        let mut tag_match = Vec::new();
        if let Some(tags) = &filters.tag_match {
            for (key, value) in tags {
                tag_match.push((glob::Pattern::new(key)?, glob::Pattern::new(value)?));
            }
        }
        Ok(Self { path_regex, exclude_regex, tag_match })
    }

    fn path_in_scope(&self, record_path: &str) -> bool {
        if let Some(keep) = &self.path_regex {
            if !keep.is_match(record_path) {
                return false;
            }
        }
        if let Some(drop) = &self.exclude_regex {
            if drop.is_match(record_path) {
                return false;
            }
        }
        true
    }

    /// Store records additionally pass the tag filter; all pairs must match
    fn record_in_scope(&self, record: &SecretRecord) -> bool {
        self.path_in_scope(&record.path)
            && self.tag_match.iter().all(|(key_glob, value_glob)| {
                record
                    .tags
                    .iter()
                    .any(|(key, value)| key_glob.matches(key) && value_glob.matches(value))
            })
    }
}

/// One target's sync, isolated from its peers
struct SyncTask {
    target: TargetConfig,
    base: Arc<MergedBundle>,
    blob_store: Option<BlobMergeStore>,
    store_factory: Arc<dyn SecretStoreFactory>,
    listing_cache: Arc<ListingCache>,
    breakers: Breakers,
    retry: RetryPolicy,
    defaults: DefaultsConfig,
    w_entry: Option<usize>,
    dry_run: bool,
    render_options: Option<RenderOptions>,
}

impl SyncTask {
    async fn run(self, ctx: &RequestContext) -> TargetReport {
        let name = self.target.name.clone();
        let dry_run = self.dry_run;
        let span = info_span!("sync_target", target = %name, request_id = %ctx.request_id());
        match self.execute(ctx).instrument(span).await {
            Ok(report) => report,
            Err(err) => {
                warn!(target = %name, error = %err, "Target sync failed");
                TargetReport::failed(name, err, dry_run)
            }
        }
    }

    async fn execute(self, ctx: &RequestContext) -> Result<TargetReport> {
        let filters = CompiledFilters::compile(self.target.filters.as_ref())?;
        let mut bundle = self.resolve_bundle(ctx).await?;

        bundle.retain(|record_path, _| filters.path_in_scope(record_path));
        if self.defaults.no_empty_secrets {
            bundle.retain(|_, value| !value.is_empty_mapping());
        }

        let store = Arc::new(TargetStore::new(
            &self.target.name,
            self.store_factory.client_for(&self.target).await?,
            self.listing_cache.clone(),
            self.breakers.target_store.clone(),
            self.retry.clone(),
        ));

        // Snapshot the managed scope of the store.
        let records = store.list(ctx).await?;
        let managed: Vec<SecretRecord> =
            records.into_iter().filter(|r| filters.record_in_scope(r)).collect();

        let mut before = MergedBundle::new();
        let mut before_versions: HashMap<String, String> = HashMap::new();
        for record in &managed {
            ctx.check("target_store.get")?;
            let value = store.get(ctx, &record.path).await?;
            if self.defaults.no_empty_secrets && value.is_empty_mapping() {
                continue;
            }
            before.insert(record.path.clone(), value);
            if let Some(version) = &record.version {
                before_versions.insert(record.path.clone(), version.clone());
            }
        }

        let mut entries = compute_diff(&before, &bundle);
        for entry in &mut entries {
            entry.before_version = before_versions.get(&entry.path).cloned();
        }
        let summary = DiffSummary::from_entries(&entries);
        metrics::record_diff(&self.target.name, summary.added, summary.modified, summary.deleted);

        let rendered_diff =
            self.render_options.as_ref().map(|options| render(&entries, options));

        if self.dry_run {
            debug!(target = %self.target.name, changes = summary.total(), "Dry-run: skipping apply");
            return Ok(TargetReport {
                target: self.target.name.clone(),
                summary,
                applied: 0,
                failures: Vec::new(),
                error: None,
                dry_run: true,
                rendered_diff,
            });
        }

        let (applied, failures) = self.apply_entries(ctx, &store, &entries).await;

        // Persist this target's bundle for downstream importers.
        let mut error = None;
        if let Some(blob) = &self.blob_store {
            if let Err(err) = blob.write_bundle(ctx, &self.target.name, &bundle).await {
                warn!(target = %self.target.name, error = %err, "Failed to persist merged bundle");
                error = Some(format!("failed to persist merged bundle: {}", err));
            }
        }

        Ok(TargetReport {
            target: self.target.name.clone(),
            summary,
            applied,
            failures,
            error,
            dry_run: false,
            rendered_diff,
        })
    }

    /// Fold imports, then overrides, into this target's bundle
    async fn resolve_bundle(&self, ctx: &RequestContext) -> Result<MergedBundle> {
        let node_limit = self.defaults.merge_node_limit;
        let mut bundle = MergedBundle::new();

        for import in &self.target.imports {
            ctx.check("resolve_imports")?;
            if import == &self.target.name {
                return Err(VaultSyncError::CircularImports {
                    target: self.target.name.clone(),
                    import: import.clone(),
                });
            }

            let imported = if import == BASE_MERGED {
                // The merge-phase output is already in memory; reading the
                // blob store back would only round-trip the same bytes.
                (*self.base).clone()
            } else {
                let blob = self
                    .blob_store
                    .as_ref()
                    .ok_or_else(|| merge_store_disabled(&self.target.name, import))?;
                let imported = blob.read_bundle(ctx, import).await?;
                if imported.is_empty() {
                    warn!(
                        target = %self.target.name,
                        import = %import,
                        "Import resolved to an empty bundle; upstream may not have materialized"
                    );
                }
                imported
            };
            fold_bundle(&mut bundle, imported, node_limit)?;
        }

        if let Some(overrides) = self.target.overrides.as_mapping() {
            let mut overlay = MergedBundle::new();
            for (record_path, value) in overrides {
                let validated = path::validate_path(record_path)?;
                overlay.insert(validated, value.clone());
            }
            fold_bundle(&mut bundle, overlay, node_limit)?;
        }

        Ok(bundle)
    }

    /// Apply diff entries; per-entry failures are recorded, not fatal.
    ///
    /// Sequential in lexicographic path order by default; bounded fan-out
    /// when `w_entry` is configured.
    async fn apply_entries(
        &self,
        ctx: &RequestContext,
        store: &Arc<TargetStore>,
        entries: &[crate::diff::DiffEntry],
    ) -> (usize, Vec<EntryFailure>) {
        let mut applied = 0usize;
        let mut failures: Vec<EntryFailure> = Vec::new();

        match self.w_entry {
            None | Some(1) => {
                for entry in entries {
                    if ctx.is_cancelled() {
                        failures.push(EntryFailure {
                            path: entry.path.clone(),
                            operation: operation_name(entry.kind).to_string(),
                            error: "cancelled".to_string(),
                        });
                        continue;
                    }
                    match store.apply(ctx, entry).await {
                        Ok(_) => applied += 1,
                        Err(err) => failures.push(EntryFailure {
                            path: entry.path.clone(),
                            operation: operation_name(entry.kind).to_string(),
                            error: err.to_string(),
                        }),
                    }
                }
            }
            Some(width) => {
                let semaphore = Arc::new(Semaphore::new(width));
                let mut join_set: JoinSet<std::result::Result<String, EntryFailure>> =
                    JoinSet::new();
                for entry in entries.iter().cloned() {
                    let Ok(permit) = semaphore.clone().acquire_owned().await else { break };
                    let store = store.clone();
                    let task_ctx = ctx.child();
                    join_set.spawn(async move {
                        let _permit = permit;
                        match store.apply(&task_ctx, &entry).await {
                            Ok(_) => Ok(entry.path),
                            Err(err) => Err(EntryFailure {
                                path: entry.path,
                                operation: operation_name(entry.kind).to_string(),
                                error: err.to_string(),
                            }),
                        }
                    });
                }
                while let Some(joined) = join_set.join_next().await {
                    match joined {
                        Ok(Ok(_)) => applied += 1,
                        Ok(Err(failure)) => failures.push(failure),
                        Err(e) => failures.push(EntryFailure {
                            path: "<unknown>".to_string(),
                            operation: "apply".to_string(),
                            error: format!("apply task failed: {}", e),
                        }),
                    }
                }
                failures.sort_by(|a, b| a.path.cmp(&b.path));
            }
        }

        (applied, failures)
    }
}

fn operation_name(kind: DiffKind) -> &'static str {
    match kind {
        DiffKind::Added => "create",
        DiffKind::Modified => "update",
        DiffKind::Deleted => "delete",
    }
}
