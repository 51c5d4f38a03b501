//! Incremental Update Controller
//!
//! Wraps the three passes and decides which files each run touches. Every file
//! moves through `Unknown -> Collected -> Resolved`, drops back to `Stale` when
//! something it points at changes, and to `Failed` when its collector gives up.
//!
//! A change to file F re-resolves F, every file owning an edge into F's old or
//! new symbols, and every file pointing at a placeholder that F now defines.
//! Nothing else is touched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::{Config, EnrichmentConfig};
use crate::core::error::{CoreError, CoreResult};
use crate::core::model::{Diagnostic, DiagnosticKind, Edge, Symbol, SymbolId, SymbolKind};
use crate::core::parser::{CodeParser, SourceFile};
use crate::core::pipeline::{collect_sources, enrich_files, resolve_files, TaskOutcome, WorkerPool};
use crate::core::plugins::{config_owner_symbol, PluginRegistry, ProjectContext, CONFIG_OWNER};
use crate::core::resolver::{ResolveScope, SketchIndex};
use crate::core::sink::{write_with_retry, GraphBatch, GraphSink};
use crate::core::sketch::FileSketches;
use crate::core::table::{SymbolLookup, SymbolTable};
use crate::languages::LanguageRegistry;

/// Lifecycle of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Unknown,
    Collected,
    Resolved,
    Stale,
    Failed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Unknown => "unknown",
            FileState::Collected => "collected",
            FileState::Resolved => "resolved",
            FileState::Stale => "stale",
            FileState::Failed => "failed",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(FileState::Unknown),
            "collected" => Ok(FileState::Collected),
            "resolved" => Ok(FileState::Resolved),
            "stale" => Ok(FileState::Stale),
            "failed" => Ok(FileState::Failed),
            other => Err(format!("unknown file state '{}'", other)),
        }
    }
}

/// What the controller remembers about one source file
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: String,
    pub language: String,
    pub content_fingerprint: String,
    pub state: FileState,
    pub last_resolved_at: Option<DateTime<Utc>>,
    /// Order of the last successful collection; later wins duplicate FQNs
    pub collected_seq: u64,
    /// Sketches of the last successful collection, reused to re-resolve
    pub sketches: Option<Arc<FileSketches>>,
}

impl FileRecord {
    pub fn new(path: &str, language: &str, fingerprint: &str) -> Self {
        Self {
            path: path.to_string(),
            language: language.to_string(),
            content_fingerprint: fingerprint.to_string(),
            state: FileState::Unknown,
            last_resolved_at: None,
            collected_seq: 0,
            sketches: None,
        }
    }

    /// Record of a removed file whose rows the sink has not dropped yet
    pub fn tombstone(path: &str) -> Self {
        Self {
            state: FileState::Stale,
            ..Self::new(path, "", "")
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.sketches.is_none() && self.state == FileState::Stale && self.path != CONFIG_OWNER
    }
}

/// One observed change to the project
#[derive(Debug, Clone)]
pub enum FileChange {
    Modified(SourceFile),
    Removed(String),
}

/// Pass a file failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Collect,
    Resolve,
    Enrich,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileFailure {
    pub path: String,
    pub stage: FailureStage,
    pub error: String,
}

/// Summary of one controller run
#[derive(Debug, Default)]
pub struct RunReport {
    pub files_collected: usize,
    /// Unchanged files that needed no work
    pub files_skipped: usize,
    pub files_removed: usize,
    /// Files whose edges were recomputed, in path order
    pub resolved: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub symbols: usize,
    pub edges: usize,
    /// Edges of this run pointing at placeholders
    pub unresolved: usize,
    pub cancelled: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub sink_failures: usize,
}

impl RunReport {
    /// Whether any file failed Pass 1; later passes are retried on their own
    pub fn has_parse_failures(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.stage == FailureStage::Collect)
    }
}

/// Working sets of one run
#[derive(Default)]
struct RunState {
    affected: BTreeSet<String>,
    config_affected: bool,
    removed: Vec<String>,
    /// Records deleted from storage without retracting anything
    forgotten: Vec<String>,
    dropped_ids: BTreeSet<SymbolId>,
    touched: BTreeSet<String>,
}

pub struct IncrementalController<S: GraphSink> {
    root: PathBuf,
    config: Config,
    table: Arc<SymbolTable>,
    parser: CodeParser,
    plugins: Arc<PluginRegistry>,
    project: Arc<ProjectContext>,
    records: BTreeMap<String, FileRecord>,
    sink: S,
    cancel: CancellationToken,
    seq: u64,
    /// Restored config-derived edges were dropped and must be recomputed
    config_dirty: bool,
}

impl<S: GraphSink> IncrementalController<S> {
    pub fn new(root: impl Into<PathBuf>, config: Config, sink: S) -> Self {
        let root = root.into();
        let project = ProjectContext::new(&root, config.enrichment.clone());
        Self {
            root,
            config,
            table: Arc::new(SymbolTable::new()),
            parser: CodeParser::new(Arc::new(LanguageRegistry::new())),
            plugins: Arc::new(PluginRegistry::with_defaults()),
            project: Arc::new(project),
            records: BTreeMap::new(),
            sink,
            cancel: CancellationToken::new(),
            seq: 0,
            config_dirty: false,
        }
    }

    pub fn with_collectors(mut self, registry: LanguageRegistry) -> Self {
        self.parser = CodeParser::new(Arc::new(registry));
        self
    }

    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = Arc::new(plugins);
        self
    }

    /// Token that stops the current and every later run at file granularity
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn table(&self) -> &Arc<SymbolTable> {
        &self.table
    }

    pub fn records(&self) -> &BTreeMap<String, FileRecord> {
        &self.records
    }

    pub fn record(&self, path: &str) -> Option<&FileRecord> {
        self.records.get(path)
    }

    pub fn parser(&self) -> &CodeParser {
        &self.parser
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Rebuild the table from persisted state without running any pass.
    ///
    /// Stored edges are trusted only for files the sink acknowledged. Edges of
    /// files left `Collected` or `Stale` by a failed batch, and edges whose
    /// endpoints no longer exist, are left out and their owners re-resolved by
    /// the next run. Edges of owners without a record get a tombstone so the
    /// next run retracts them.
    pub fn restore(
        &mut self,
        records: Vec<FileRecord>,
        placeholders: Vec<Symbol>,
        edges: Vec<Edge>,
    ) -> CoreResult<()> {
        let mut ordered = records;
        ordered.sort_by(|a, b| (a.collected_seq, &a.path).cmp(&(b.collected_seq, &b.path)));

        for record in ordered {
            if let Some(sketches) = &record.sketches {
                self.table
                    .upsert_symbols(&record.path, sketches.assemble_symbols())?;
            }
            self.seq = self.seq.max(record.collected_seq);
            self.records.insert(record.path.clone(), record);
        }
        for placeholder in placeholders.into_iter().filter(Symbol::is_external) {
            self.table.get_or_create_placeholder(placeholder);
        }

        let mut by_owner: BTreeMap<String, Vec<Edge>> = BTreeMap::new();
        for edge in edges {
            by_owner.entry(edge.owner().to_string()).or_default().push(edge);
        }
        if by_owner.contains_key(CONFIG_OWNER) {
            self.table
                .upsert_symbols(CONFIG_OWNER, vec![config_owner_symbol()])?;
        }

        let mut dropped = 0;
        for (owner, edges) in by_owner {
            let table = &self.table;
            let intact = edges.iter().all(|e| {
                table.lookup_id(&e.source_id).is_some() && table.lookup_id(&e.target_id).is_some()
            });

            if owner == CONFIG_OWNER {
                if intact {
                    self.table.replace_edges(&owner, edges)?;
                } else {
                    dropped += edges.len();
                    self.config_dirty = true;
                }
                continue;
            }
            match self.records.get_mut(&owner) {
                None => {
                    dropped += edges.len();
                    self.records
                        .insert(owner.clone(), FileRecord::tombstone(&owner));
                }
                Some(record) => {
                    let acknowledged = record.sketches.is_some()
                        && matches!(record.state, FileState::Resolved | FileState::Failed);
                    if acknowledged && intact {
                        self.table.replace_edges(&owner, edges)?;
                    } else {
                        dropped += edges.len();
                        if record.state == FileState::Resolved {
                            record.state = FileState::Stale;
                        }
                    }
                }
            }
        }
        if dropped > 0 {
            warn!("Left out {} stored edges that no longer match their files", dropped);
        }
        self.table.verify_integrity()?;
        // Restoring replays old duplicates; those were reported when first seen
        self.table.take_diagnostics();

        info!(
            "Restored {} files, {} symbols, {} edges",
            self.records.len(),
            self.table.symbol_count(),
            self.table.edge_count()
        );
        Ok(())
    }

    /// Bring the whole project up to date: new and changed files are
    /// collected, vanished files removed, config-derived edges recomputed
    pub async fn sync_project(&mut self) -> anyhow::Result<RunReport> {
        let files = self.parser.collect_files(&self.root)?;
        info!("Found {} source files under {:?}", files.len(), self.root);

        let mut changes = Vec::with_capacity(files.len());
        let mut unreadable = Vec::new();
        let present: BTreeSet<&str> = files.iter().map(|(path, _)| path.as_str()).collect();
        for (path, language) in &files {
            match self.parser.read_source(&self.root, path, language) {
                Ok(source) => changes.push(FileChange::Modified(source)),
                Err(e) => {
                    warn!("Skipping {}: {:#}", path, e);
                    unreadable.push(FileFailure {
                        path: path.clone(),
                        stage: FailureStage::Collect,
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        for path in self.records.keys() {
            if path != CONFIG_OWNER && !present.contains(path.as_str()) {
                changes.push(FileChange::Removed(path.clone()));
            }
        }

        let mut report = self.run(changes, true).await?;
        report.failures.extend(unreadable);
        Ok(report)
    }

    /// Re-examine the given project-relative paths only
    pub async fn update_paths(&mut self, paths: &[String]) -> anyhow::Result<RunReport> {
        let mut changes = Vec::with_capacity(paths.len());
        let mut unreadable = Vec::new();
        for path in paths {
            let path = normalize(path);
            if !self.root.join(&path).is_file() {
                changes.push(FileChange::Removed(path));
                continue;
            }
            let Some(language) = self.parser.language_of(&path) else {
                debug!("No collector for {}, ignoring", path);
                continue;
            };
            match self.parser.read_source(&self.root, &path, &language) {
                Ok(source) => changes.push(FileChange::Modified(source)),
                Err(e) => unreadable.push(FileFailure {
                    path,
                    stage: FailureStage::Collect,
                    error: format!("{:#}", e),
                }),
            }
        }

        let mut report = self.run(changes, false).await?;
        report.failures.extend(unreadable);
        Ok(report)
    }

    /// Apply a batch of changes. Only a corrupted table is an error.
    pub async fn apply(&mut self, changes: Vec<FileChange>) -> CoreResult<RunReport> {
        self.run(changes, false).await
    }

    async fn run(&mut self, changes: Vec<FileChange>, full: bool) -> CoreResult<RunReport> {
        let mut report = RunReport::default();
        let mut state = RunState {
            config_affected: full || std::mem::take(&mut self.config_dirty),
            ..Default::default()
        };
        let pool = WorkerPool::new(
            self.config.pipeline.effective_workers(),
            Duration::from_millis(self.config.pipeline.file_timeout_ms),
            self.cancel.clone(),
        );

        // Leftovers of interrupted or partially failed runs
        for record in self.records.values() {
            if matches!(record.state, FileState::Stale | FileState::Collected) && record.sketches.is_some() {
                state.affected.insert(record.path.clone());
            }
        }

        self.check_enrichment_settings(&mut state);

        // Removed files whose retraction never reached the sink
        let mut removals: BTreeSet<String> = self
            .records
            .values()
            .filter(|r| r.is_tombstone())
            .map(|r| r.path.clone())
            .collect();
        let mut modified = BTreeMap::new();
        for change in changes {
            match change {
                FileChange::Removed(path) => {
                    modified.remove(&path);
                    removals.insert(path);
                }
                FileChange::Modified(source) => {
                    removals.remove(&source.path);
                    modified.insert(source.path.clone(), source);
                }
            }
        }

        // Removals go first so their dependents are known before anything is collected
        for path in removals {
            if path == CONFIG_OWNER {
                continue;
            }
            if self.records.remove(&path).is_none() && !self.table.contains_file(&path) {
                continue;
            }
            let removed = self.table.remove_file(&path);
            self.mark_stale(&removed.stale_dependents, &mut state);
            state.affected.remove(&path);
            state.dropped_ids.extend(removed.removed_ids);
            state.removed.push(path);
            report.files_removed += 1;
        }

        let mut sources = Vec::new();
        let mut observed = BTreeMap::new();
        for (path, source) in modified {
            match self.records.get(&path) {
                Some(r) if r.content_fingerprint == source.fingerprint && r.sketches.is_some() => {
                    if r.state == FileState::Resolved {
                        report.files_skipped += 1;
                    } else if r.state != FileState::Failed {
                        state.affected.insert(path);
                    } else {
                        observed.insert(path, (source.language.clone(), source.fingerprint.clone()));
                        sources.push(source);
                    }
                }
                _ => {
                    observed.insert(path, (source.language.clone(), source.fingerprint.clone()));
                    sources.push(source);
                }
            }
        }

        // Pass 1
        if !sources.is_empty() {
            info!("Pass 1: collecting {} files", sources.len());
        }
        let outcomes = collect_sources(&pool, &self.parser, sources).await;
        let mut collected = Vec::new();
        for (path, outcome) in outcomes {
            let (language, fingerprint) = observed.remove(&path).unwrap_or_default();
            match outcome {
                TaskOutcome::Done(sketches) => collected.push((path, language, fingerprint, sketches)),
                TaskOutcome::Failed(err) => {
                    self.fail(&path, &language, &fingerprint, DiagnosticKind::ParseFailure, err, &mut report);
                    state.touched.insert(path);
                }
                TaskOutcome::TimedOut => {
                    let err = CoreError::Timeout {
                        path: path.clone(),
                        timeout_ms: self.config.pipeline.file_timeout_ms,
                    };
                    self.fail(&path, &language, &fingerprint, DiagnosticKind::Timeout, err, &mut report);
                    state.touched.insert(path);
                }
                TaskOutcome::Cancelled => report.cancelled = true,
            }
        }

        // Affected set, computed before any symbol of this batch lands
        for (path, _, _, sketches) in &collected {
            state.affected.insert(path.clone());
            let mut ids: BTreeSet<SymbolId> = self
                .table
                .symbols_in_file(path)
                .iter()
                .map(|s| s.id.clone())
                .collect();
            let incoming = sketches.assemble_symbols();
            ids.extend(incoming.iter().map(|s| s.id.clone()));
            // A new name can take over references that resolved by namespace or
            // short name to another definition, or to a placeholder
            for symbol in &incoming {
                ids.extend(self.table.named(&symbol.name).iter().map(|c| c.id.clone()));
            }
            let dependents: BTreeSet<String> = ids
                .iter()
                .flat_map(|id| self.table.reverse_dependents(id))
                .collect();
            self.mark_stale(&dependents, &mut state);
        }

        // Delete before insert
        for path in &state.affected {
            self.table.clear_edges(path);
            if let Some(record) = self.records.get_mut(path) {
                if record.state == FileState::Resolved {
                    record.state = FileState::Stale;
                }
            }
        }
        if state.config_affected {
            self.table.clear_edges(CONFIG_OWNER);
        }

        // Barrier: commit every Pass 1 result, in path order
        for (path, language, fingerprint, sketches) in collected {
            let issues = sketches.parse_errors.len();
            match self.table.upsert_symbols(&path, sketches.assemble_symbols()) {
                Ok(summary) => {
                    self.mark_stale(&summary.stale_dependents, &mut state);
                    state.dropped_ids.extend(summary.removed_ids);
                    if issues > 0 {
                        self.table.record(Diagnostic::new(
                            DiagnosticKind::SyntaxError,
                            path.as_str(),
                            format!("{} syntax issue(s), collected what parsed", issues),
                        ));
                    }
                    self.seq += 1;
                    let record = self
                        .records
                        .entry(path.clone())
                        .or_insert_with(|| FileRecord::new(&path, &language, &fingerprint));
                    record.language = language;
                    record.content_fingerprint = fingerprint;
                    record.state = FileState::Collected;
                    record.collected_seq = self.seq;
                    record.sketches = Some(Arc::new(sketches));
                    report.files_collected += 1;
                    state.touched.insert(path);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.fail(&path, &language, &fingerprint, DiagnosticKind::ParseFailure, e, &mut report);
                    state.touched.insert(path);
                }
            }
        }

        let index = Arc::new(self.sketch_index());
        let targets: Vec<Arc<FileSketches>> = state
            .affected
            .iter()
            .filter_map(|path| index.get(path).cloned())
            .collect();
        self.refresh_languages();

        // Pass 2
        info!("Pass 2: resolving {} files", targets.len());
        let snapshot = self.table.snapshot();
        let outcomes = resolve_files(&pool, &self.table, &snapshot, &index, targets).await;
        let mut resolved = Vec::new();
        for (path, outcome) in outcomes {
            match outcome {
                TaskOutcome::Done(resolution) => {
                    report.unresolved += resolution.unresolved;
                    self.commit_edges(&path, resolution.edges, FailureStage::Resolve, &mut report)?;
                    resolved.push(path);
                }
                other => self.pass_incomplete(&path, FailureStage::Resolve, other, &mut report),
            }
        }

        // Pass 3
        let snapshot = self.table.snapshot();
        let active = self.plugins.active(&self.project).len();
        let mut enriched = Vec::with_capacity(resolved.len());
        if active > 0 {
            info!("Pass 3: {} plugins over {} files", active, resolved.len());
            let files = resolved
                .iter()
                .filter_map(|path| index.get(path).cloned())
                .collect();
            let outcomes = enrich_files(
                &pool,
                &self.plugins,
                &self.project,
                &self.table,
                &snapshot,
                &index,
                files,
            )
            .await;
            for (path, outcome) in outcomes {
                match outcome {
                    TaskOutcome::Done(edges) => {
                        self.commit_edges(&path, edges, FailureStage::Enrich, &mut report)?;
                        enriched.push(path);
                    }
                    other => self.pass_incomplete(&path, FailureStage::Enrich, other, &mut report),
                }
            }
        } else {
            enriched = resolved;
        }

        let mut flush = enriched;
        if state.config_affected && !self.cancel.is_cancelled() {
            self.refresh_config_edges(&index, &mut state)?;
            flush.push(CONFIG_OWNER.to_string());
        }
        if self.cancel.is_cancelled() {
            report.cancelled = true;
        }
        for path in &flush {
            if let Some(record) = self.records.get_mut(path) {
                if record.state != FileState::Failed {
                    record.state = FileState::Collected;
                }
            }
            state.touched.insert(path.clone());
        }

        state.dropped_ids.extend(self.table.prune_externals());
        self.table.verify_integrity()?;

        let unretracted = self.flush(&flush, &state, &mut report).await;

        // Storage forgets a removed file only once its rows are gone from the sink
        let mut forget = state.forgotten.clone();
        for path in &state.removed {
            if unretracted.contains(path) {
                self.records
                    .insert(path.clone(), FileRecord::tombstone(path));
                state.touched.insert(path.clone());
            } else {
                forget.push(path.clone());
            }
        }
        let touched: Vec<&FileRecord> = state
            .touched
            .iter()
            .filter_map(|path| self.records.get(path))
            .collect();
        if let Err(e) = self.sink.save_files(&touched, &forget) {
            warn!("Failed to persist file records: {}", e);
            self.table.record(Diagnostic::new(
                DiagnosticKind::SinkWriteFailure,
                "",
                format!("file records not persisted: {}", e),
            ));
        }

        report.resolved = flush
            .into_iter()
            .filter(|path| path != CONFIG_OWNER)
            .collect();
        report.resolved.sort();
        report.symbols = self.table.symbol_count();
        report.edges = self.table.edge_count();
        report.diagnostics = self.table.take_diagnostics();
        info!(
            "Run finished: {} collected, {} skipped, {} removed, {} resolved, {} failed",
            report.files_collected,
            report.files_skipped,
            report.files_removed,
            report.resolved.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Queue dependents for re-resolution
    fn mark_stale(&mut self, dependents: &BTreeSet<String>, state: &mut RunState) {
        for path in dependents {
            if path == CONFIG_OWNER {
                state.config_affected = true;
                continue;
            }
            if let Some(record) = self.records.get_mut(path) {
                if record.state != FileState::Failed {
                    record.state = FileState::Stale;
                }
                state.affected.insert(path.clone());
                state.touched.insert(path.clone());
            }
        }
    }

    /// Compare the enrichment settings with those of the previous run. A
    /// change re-resolves every file, since any file's Pass 3 edges may read them.
    fn check_enrichment_settings(&mut self, state: &mut RunState) {
        let current = self.project.enrichment.fingerprint();
        let default = EnrichmentConfig::default().fingerprint();
        let previous = self
            .records
            .get(CONFIG_OWNER)
            .map(|r| r.content_fingerprint.clone())
            .unwrap_or_else(|| default.clone());
        if previous == current {
            return;
        }

        let everything: BTreeSet<String> = self
            .records
            .values()
            .filter(|r| r.sketches.is_some())
            .map(|r| r.path.clone())
            .collect();
        if !everything.is_empty() {
            info!("Enrichment settings changed, re-resolving {} files", everything.len());
        }
        self.mark_stale(&everything, state);
        state.config_affected = true;

        if current == default {
            self.records.remove(CONFIG_OWNER);
            state.forgotten.push(CONFIG_OWNER.to_string());
        } else {
            let mut record = FileRecord::new(CONFIG_OWNER, "config", &current);
            record.state = FileState::Resolved;
            record.last_resolved_at = Some(Utc::now());
            self.records.insert(CONFIG_OWNER.to_string(), record);
            state.touched.insert(CONFIG_OWNER.to_string());
        }
    }

    /// Mark a file failed; whatever it contributed before stays in place
    fn fail(
        &mut self,
        path: &str,
        language: &str,
        fingerprint: &str,
        kind: DiagnosticKind,
        error: CoreError,
        report: &mut RunReport,
    ) {
        let message = error.to_string();
        warn!("{}", message);
        self.table
            .record(Diagnostic::new(kind, path, message.as_str()));
        let record = self
            .records
            .entry(path.to_string())
            .or_insert_with(|| FileRecord::new(path, language, fingerprint));
        record.state = FileState::Failed;
        report.failures.push(FileFailure {
            path: path.to_string(),
            stage: FailureStage::Collect,
            error: message,
        });
    }

    /// A Pass 2/3 task that did not finish leaves its file stale for the next run
    fn pass_incomplete<T>(
        &mut self,
        path: &str,
        stage: FailureStage,
        outcome: TaskOutcome<T>,
        report: &mut RunReport,
    ) {
        let (kind, error) = match outcome {
            TaskOutcome::Done(_) => return,
            TaskOutcome::Cancelled => {
                report.cancelled = true;
                return;
            }
            TaskOutcome::TimedOut => (
                DiagnosticKind::Timeout,
                CoreError::Timeout {
                    path: path.to_string(),
                    timeout_ms: self.config.pipeline.file_timeout_ms,
                },
            ),
            TaskOutcome::Failed(error) => (DiagnosticKind::TaskFailure, error),
        };
        let message = format!("{:?}: {}", stage, error);
        warn!("{}: {}", path, message);
        self.table.record(Diagnostic::new(kind, path, message.as_str()));
        if let Some(record) = self.records.get_mut(path) {
            if record.state != FileState::Failed {
                record.state = FileState::Stale;
            }
        }
        report.failures.push(FileFailure {
            path: path.to_string(),
            stage,
            error: message,
        });
    }

    fn commit_edges(
        &mut self,
        path: &str,
        edges: Vec<Edge>,
        stage: FailureStage,
        report: &mut RunReport,
    ) -> CoreResult<()> {
        let committed = match stage {
            FailureStage::Enrich => self.table.append_edges(path, edges),
            _ => self.table.replace_edges(path, edges),
        };
        match committed {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let message = e.to_string();
                warn!("{}: {}", path, message);
                report.failures.push(FileFailure {
                    path: path.to_string(),
                    stage,
                    error: message,
                });
                Ok(())
            }
        }
    }

    /// Recompute every config-derived edge
    fn refresh_config_edges(&mut self, index: &Arc<SketchIndex>, state: &mut RunState) -> CoreResult<()> {
        let scope_snapshot = self.table.snapshot();
        let scope = ResolveScope::new(&scope_snapshot, &self.table, index);
        let edges = self.plugins.analyze_config(&self.project, &scope);

        if edges.is_empty() {
            if self.table.contains_file(CONFIG_OWNER) {
                let removed = self.table.remove_file(CONFIG_OWNER);
                state.dropped_ids.extend(removed.removed_ids);
            }
            return Ok(());
        }
        if !self.table.contains_file(CONFIG_OWNER) {
            self.table
                .upsert_symbols(CONFIG_OWNER, vec![config_owner_symbol()])?;
        }
        debug!("{} config-derived edges", edges.len());
        self.table.replace_edges(CONFIG_OWNER, edges)
    }

    /// Hand finished files to the sink in bounded batches. Returns the removed
    /// files whose retraction the sink did not accept.
    async fn flush(&mut self, files: &[String], state: &RunState, report: &mut RunReport) -> BTreeSet<String> {
        let mut unretracted = BTreeSet::new();
        let batch_size = self.config.pipeline.batch_size.max(1);
        let retries = self.config.pipeline.sink_retries;
        let backoff = Duration::from_millis(self.config.pipeline.sink_backoff_ms);

        let mut drop_nodes: Vec<SymbolId> = state
            .dropped_ids
            .iter()
            .filter(|id| self.table.lookup_id(id).is_none())
            .cloned()
            .collect();

        let mut batches = Vec::new();
        let mut batch = GraphBatch {
            retract: state.removed.clone(),
            ..Default::default()
        };
        for path in files {
            batch.retract.push(path.clone());
            let (nodes, edges) = self.file_rows(path);
            batch.nodes.extend(nodes);
            batch.edges.extend(edges);
            if batch.size() >= batch_size {
                batches.push(std::mem::take(&mut batch));
            }
        }
        batch.drop_nodes.append(&mut drop_nodes);
        if !batch.is_empty() {
            batches.push(batch);
        }

        for batch in batches {
            match write_with_retry(&mut self.sink, &batch, retries, backoff).await {
                Ok(attempts) => {
                    debug!(
                        "Sink accepted {} files in {} attempt(s)",
                        batch.retract.len(),
                        attempts
                    );
                    let now = Utc::now();
                    for path in &batch.retract {
                        if let Some(record) = self.records.get_mut(path) {
                            if record.state == FileState::Collected {
                                record.state = FileState::Resolved;
                                record.last_resolved_at = Some(now);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    report.sink_failures += 1;
                    for path in &batch.retract {
                        self.table.record(Diagnostic::new(
                            DiagnosticKind::SinkWriteFailure,
                            path.as_str(),
                            e.to_string(),
                        ));
                        if state.removed.contains(path) {
                            unretracted.insert(path.clone());
                        }
                    }
                }
            }
        }
        unretracted
    }

    /// Nodes and edges written for one file: its symbols, its namespace module
    /// and every placeholder its edges point at
    fn file_rows(&self, path: &str) -> (Vec<Symbol>, Vec<Edge>) {
        let edges = self.table.edges_of(path);
        let mut nodes: Vec<Symbol> = self
            .table
            .symbols_in_file(path)
            .iter()
            .map(|s| (**s).clone())
            .collect();

        let mut shared = BTreeSet::new();
        if let Some(namespace) = nodes.iter().find_map(|s| s.namespace.clone()) {
            shared.insert(SymbolId::for_fqn(&namespace));
        }
        shared.extend(edges.iter().map(|e| e.target_id.clone()));
        for id in shared {
            if let Some(symbol) = self.table.lookup_id(&id) {
                if symbol.file_path.is_empty()
                    && matches!(symbol.kind, SymbolKind::External | SymbolKind::Module)
                {
                    nodes.push((*symbol).clone());
                }
            }
        }
        (nodes, edges)
    }

    fn sketch_index(&self) -> SketchIndex {
        self.records
            .values()
            .filter_map(|r| r.sketches.clone().map(|s| (r.path.clone(), s)))
            .collect()
    }

    fn refresh_languages(&mut self) {
        let languages = self
            .records
            .values()
            .filter(|r| r.sketches.is_some())
            .map(|r| r.language.clone())
            .collect();
        Arc::make_mut(&mut self.project).languages = languages;
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_start_matches("./");
    Path::new(trimmed)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
