//! The Symbol Table: single source of truth for symbol identity and edges
//!
//! Writers (Pass 1 upserts, Pass 2/3 edge commits) go through sharded
//! [`DashMap`]s so that concurrent work on different FQNs never contends on a
//! global lock. Once the Pass 1 barrier is crossed, readers take a frozen
//! [`TableSnapshot`] and resolve against it without any locking.
//!
//! Lock order, where two maps are held at once: files -> modules -> symbols ->
//! {ids, names, shadowed}, and edges -> dependents.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::core::context::ResolutionContext;
use crate::core::error::{CoreError, CoreResult};
use crate::core::model::{Diagnostic, DiagnosticKind, Edge, Symbol, SymbolId, SymbolKind};

/// Restricts the unqualified global fallback to a family of kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFilter {
    Any,
    Types,
    Callables,
    Values,
}

impl LookupFilter {
    fn accepts(&self, kind: SymbolKind) -> bool {
        match self {
            LookupFilter::Any => true,
            LookupFilter::Types => kind.is_type(),
            LookupFilter::Callables => kind.is_callable(),
            LookupFilter::Values => matches!(kind, SymbolKind::Property | SymbolKind::Constant),
        }
    }
}

/// Read access shared by the live table and its frozen snapshots
pub trait SymbolLookup {
    fn lookup_fqn(&self, fqn: &str) -> Option<Arc<Symbol>>;

    fn lookup_id(&self, id: &SymbolId) -> Option<Arc<Symbol>>;

    /// All symbols with the given short name, ordered by FQN
    fn named(&self, name: &str) -> Vec<Arc<Symbol>>;

    /// Exact match that only accepts symbols defined in the project
    fn lookup_defined(&self, fqn: &str) -> Option<Arc<Symbol>> {
        self.lookup_fqn(fqn).filter(|s| !s.is_external())
    }

    /// Resolve a name as written in a file.
    ///
    /// Order: exact FQN, import alias (then wildcard imports), enclosing type
    /// and namespace, unqualified global match. External placeholders never
    /// count as a resolution.
    fn resolve(&self, name: &str, ctx: &ResolutionContext) -> Option<Arc<Symbol>> {
        self.resolve_filtered(name, ctx, LookupFilter::Any)
    }

    fn resolve_filtered(
        &self,
        name: &str,
        ctx: &ResolutionContext,
        filter: LookupFilter,
    ) -> Option<Arc<Symbol>> {
        if name.is_empty() {
            return None;
        }

        if let Some(symbol) = self.lookup_defined(name) {
            return Some(symbol);
        }

        if let Some(expanded) = ctx.imports.expand(name, ctx.separator) {
            if let Some(symbol) = self.lookup_defined(&expanded) {
                return Some(symbol);
            }
        }
        for namespace in ctx.imports.wildcards() {
            let candidate = format!("{}{}{}", namespace, ctx.separator, name);
            if let Some(symbol) = self.lookup_defined(&candidate) {
                return Some(symbol);
            }
        }

        if let Some(enclosing) = &ctx.enclosing_type {
            let nested = format!("{}{}{}", enclosing, ctx.separator, name);
            if let Some(symbol) = self.lookup_defined(&nested) {
                return Some(symbol);
            }
        }
        if let Some(qualified) = ctx.qualify_in_namespace(name) {
            if let Some(symbol) = self.lookup_defined(&qualified) {
                return Some(symbol);
            }
        }

        if ctx.is_qualified(name) {
            return None;
        }
        let candidates: Vec<_> = self
            .named(name)
            .into_iter()
            .filter(|s| {
                !matches!(
                    s.kind,
                    SymbolKind::External | SymbolKind::File | SymbolKind::Directory
                ) && filter.accepts(s.kind)
            })
            .collect();
        candidates
            .iter()
            .find(|s| s.file_path == ctx.file_path)
            .cloned()
            .or_else(|| candidates.into_iter().next())
    }
}

/// Outcome of an atomic per-file symbol replacement
#[derive(Debug, Default, Clone)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub removed_ids: BTreeSet<SymbolId>,
    /// Other files whose edges targeted removed symbols and were dropped, or
    /// whose shadowed definitions resurfaced
    pub stale_dependents: BTreeSet<String>,
    pub duplicates: usize,
}

#[derive(Debug, Default, Clone)]
pub struct RemovedFile {
    pub removed_ids: BTreeSet<SymbolId>,
    pub stale_dependents: BTreeSet<String>,
}

enum Removal {
    /// The symbol no longer exists
    Gone(SymbolId),
    /// A shadowed definition from this file took its place
    Restored(String),
    NotOwned,
}

#[derive(Debug, Default)]
struct FileEntry {
    fqns: Vec<String>,
    namespace: Option<String>,
}

/// Concurrent, indexed store of every known symbol and edge
#[derive(Default)]
pub struct SymbolTable {
    symbols: DashMap<String, Arc<Symbol>>,
    ids: DashMap<SymbolId, String>,
    names: DashMap<String, BTreeSet<String>>,
    files: DashMap<String, FileEntry>,
    /// Definitions that lost a duplicate-FQN tie-break, most recent last
    shadowed: DashMap<String, Vec<Arc<Symbol>>>,
    /// Declared namespace -> files declaring it
    modules: DashMap<String, BTreeSet<String>>,
    /// Owner file -> edges, kept sorted
    edges: DashMap<String, Vec<Edge>>,
    /// Target id -> owner file -> number of edges
    dependents: DashMap<SymbolId, BTreeMap<String, usize>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Symbols ====================

    /// Atomically replace every symbol attributed to `file_path`.
    ///
    /// The whole set is validated first; a rejected set leaves the table as it
    /// was. When another file already defines one of the FQNs, the incoming
    /// (most recently collected) definition wins and a diagnostic is recorded.
    pub fn upsert_symbols(&self, file_path: &str, symbols: Vec<Symbol>) -> CoreResult<UpsertSummary> {
        let incoming = self.validate_symbols(file_path, symbols)?;
        let mut summary = UpsertSummary::default();

        let namespace = incoming
            .iter()
            .find(|s| s.kind == SymbolKind::File)
            .and_then(|s| s.namespace.clone())
            .or_else(|| incoming.iter().find_map(|s| s.namespace.clone()));
        let new_fqns: BTreeSet<&str> = incoming.iter().map(|s| s.fqn.as_str()).collect();

        let mut entry = self.files.entry(file_path.to_string()).or_default();

        let old_fqns = std::mem::take(&mut entry.fqns);
        for fqn in old_fqns.iter().filter(|f| !new_fqns.contains(f.as_str())) {
            match self.remove_owned(fqn, file_path) {
                Removal::Gone(id) => {
                    summary.removed_ids.insert(id);
                }
                Removal::Restored(owner) => {
                    summary.stale_dependents.insert(owner);
                }
                Removal::NotOwned => {}
            }
        }

        if entry.namespace != namespace {
            if let Some(old) = entry.namespace.take() {
                summary.removed_ids.extend(self.release_module(&old, file_path));
            }
            if let Some(ns) = &namespace {
                self.acquire_module(ns, file_path);
            }
            entry.namespace = namespace;
        }

        for symbol in incoming {
            self.purge_shadowed(&symbol.fqn, file_path);
            entry.fqns.push(symbol.fqn.clone());
            if self.insert_symbol(Arc::new(symbol)) {
                summary.duplicates += 1;
            }
            summary.inserted += 1;
        }
        drop(entry);

        let stale = self.cascade_removed(&summary.removed_ids, file_path);
        summary.stale_dependents.extend(stale);
        summary.stale_dependents.remove(file_path);
        debug!(
            "Upserted {} symbols for {} ({} removed, {} duplicates)",
            summary.inserted,
            file_path,
            summary.removed_ids.len(),
            summary.duplicates
        );
        Ok(summary)
    }

    fn validate_symbols(&self, file_path: &str, symbols: Vec<Symbol>) -> CoreResult<Vec<Symbol>> {
        let invalid = |message: String| CoreError::InvalidSymbols {
            path: file_path.to_string(),
            message,
        };

        let mut by_fqn: BTreeMap<String, Symbol> = BTreeMap::new();
        let mut order = Vec::new();
        for symbol in symbols {
            if symbol.fqn.is_empty() {
                return Err(invalid("symbol with empty FQN".to_string()));
            }
            if symbol.file_path != file_path {
                return Err(invalid(format!(
                    "{} is attributed to {}",
                    symbol.fqn, symbol.file_path
                )));
            }
            if symbol.is_external() {
                return Err(invalid(format!("{} is an external placeholder", symbol.fqn)));
            }
            if symbol.id != SymbolId::for_fqn(&symbol.fqn) {
                return Err(invalid(format!("{} carries a foreign id", symbol.fqn)));
            }
            if let Some(existing) = self.ids.get(&symbol.id) {
                if existing.value() != &symbol.fqn {
                    return Err(CoreError::TableCorruption(format!(
                        "id {} maps to both {} and {}",
                        symbol.id,
                        existing.value(),
                        symbol.fqn
                    )));
                }
            }
            if by_fqn.contains_key(&symbol.fqn) {
                self.record(Diagnostic::new(
                    DiagnosticKind::DuplicateFqn,
                    file_path,
                    format!("{} is defined more than once; the later definition wins", symbol.fqn),
                ));
            } else {
                order.push(symbol.fqn.clone());
            }
            by_fqn.insert(symbol.fqn.clone(), symbol);
        }

        Ok(order
            .into_iter()
            .filter_map(|fqn| by_fqn.remove(&fqn))
            .collect())
    }

    /// Insert or replace one symbol. Returns true when it shadowed another file's definition.
    fn insert_symbol(&self, symbol: Arc<Symbol>) -> bool {
        let mut shadowed = false;
        match self.symbols.entry(symbol.fqn.clone()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get().clone();
                let foreign = !existing.is_external()
                    && !existing.file_path.is_empty()
                    && existing.file_path != symbol.file_path;
                if foreign {
                    warn!(
                        "Duplicate FQN {}: {} replaces the definition in {}",
                        symbol.fqn, symbol.file_path, existing.file_path
                    );
                    self.record(Diagnostic::new(
                        DiagnosticKind::DuplicateFqn,
                        symbol.file_path.clone(),
                        format!(
                            "{} also defined in {}; most recently collected definition wins",
                            symbol.fqn, existing.file_path
                        ),
                    ));
                    self.shadowed
                        .entry(symbol.fqn.clone())
                        .or_default()
                        .push(existing.clone());
                    shadowed = true;
                }
                if existing.name != symbol.name {
                    self.unindex_name(&existing.name, &existing.fqn);
                }
                self.index(&symbol);
                occupied.insert(symbol);
            }
            Entry::Vacant(vacant) => {
                self.index(&symbol);
                vacant.insert(symbol);
            }
        }
        shadowed
    }

    fn index(&self, symbol: &Symbol) {
        self.ids.insert(symbol.id.clone(), symbol.fqn.clone());
        self.names
            .entry(symbol.name.clone())
            .or_default()
            .insert(symbol.fqn.clone());
    }

    fn unindex_name(&self, name: &str, fqn: &str) {
        if let Some(mut fqns) = self.names.get_mut(name) {
            fqns.remove(fqn);
        }
        self.names.remove_if(name, |_, fqns| fqns.is_empty());
    }

    /// Remove `fqn` if `file_path` currently owns it
    fn remove_owned(&self, fqn: &str, file_path: &str) -> Removal {
        self.purge_shadowed(fqn, file_path);

        let owned = self
            .symbols
            .get(fqn)
            .map(|s| s.file_path == file_path && !s.is_external())
            .unwrap_or(false);
        if !owned {
            return Removal::NotOwned;
        }

        let restored = self.shadowed.get_mut(fqn).and_then(|mut stack| stack.pop());
        self.shadowed.remove_if(fqn, |_, stack| stack.is_empty());
        if let Some(previous) = restored {
            debug!("Restoring shadowed definition of {} from {}", fqn, previous.file_path);
            let owner = previous.file_path.clone();
            self.symbols.insert(fqn.to_string(), previous);
            return Removal::Restored(owner);
        }

        let Some((_, removed)) = self.symbols.remove(fqn) else {
            return Removal::NotOwned;
        };
        self.unindex_name(&removed.name, fqn);

        if self.modules.get(fqn).map(|f| !f.is_empty()).unwrap_or(false) {
            let module = Arc::new(module_symbol(fqn));
            self.index(&module);
            self.symbols.insert(fqn.to_string(), module);
            return Removal::NotOwned;
        }

        self.ids.remove(&removed.id);
        Removal::Gone(removed.id.clone())
    }

    fn purge_shadowed(&self, fqn: &str, file_path: &str) {
        if let Some(mut stack) = self.shadowed.get_mut(fqn) {
            stack.retain(|s| s.file_path != file_path);
        }
        self.shadowed.remove_if(fqn, |_, stack| stack.is_empty());
    }

    fn acquire_module(&self, namespace: &str, file_path: &str) {
        let mut declaring = self.modules.entry(namespace.to_string()).or_default();
        declaring.insert(file_path.to_string());
        if let Entry::Vacant(vacant) = self.symbols.entry(namespace.to_string()) {
            let module = Arc::new(module_symbol(namespace));
            self.index(&module);
            vacant.insert(module);
        }
    }

    fn release_module(&self, namespace: &str, file_path: &str) -> Option<SymbolId> {
        let now_empty = match self.modules.get_mut(namespace) {
            Some(mut declaring) => {
                declaring.remove(file_path);
                declaring.is_empty()
            }
            None => return None,
        };
        if !now_empty {
            return None;
        }
        self.modules.remove(namespace);

        let (_, removed) = self
            .symbols
            .remove_if(namespace, |_, s| s.kind == SymbolKind::Module && s.file_path.is_empty())?;
        self.unindex_name(&removed.name, namespace);
        self.ids.remove(&removed.id);
        Some(removed.id.clone())
    }

    /// Returns the existing symbol for `fqn`, or creates an external placeholder
    pub fn get_or_create_external(&self, fqn: &str) -> Arc<Symbol> {
        self.get_or_create_placeholder(Symbol::external(fqn, short_name(fqn)))
    }

    /// Like [`get_or_create_external`](Self::get_or_create_external) with a caller-built template
    pub fn get_or_create_placeholder(&self, mut template: Symbol) -> Arc<Symbol> {
        template.kind = SymbolKind::External;
        template.file_path.clear();
        template.id = SymbolId::for_fqn(&template.fqn);

        match self.symbols.entry(template.fqn.clone()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let symbol = Arc::new(template);
                self.index(&symbol);
                vacant.insert(symbol.clone());
                symbol
            }
        }
    }

    /// Remove every symbol and edge owned by a deleted file.
    ///
    /// Edges in other files that targeted the removed symbols are dropped too;
    /// those files are returned so the caller can re-resolve them.
    pub fn remove_file(&self, file_path: &str) -> RemovedFile {
        let mut removed_ids = BTreeSet::new();
        let mut restored_owners = BTreeSet::new();
        if let Some((_, entry)) = self.files.remove(file_path) {
            for fqn in &entry.fqns {
                match self.remove_owned(fqn, file_path) {
                    Removal::Gone(id) => {
                        removed_ids.insert(id);
                    }
                    Removal::Restored(owner) => {
                        restored_owners.insert(owner);
                    }
                    Removal::NotOwned => {}
                }
            }
            if let Some(ns) = &entry.namespace {
                removed_ids.extend(self.release_module(ns, file_path));
            }
        }
        self.clear_edges(file_path);
        let mut stale_dependents = self.cascade_removed(&removed_ids, file_path);
        stale_dependents.extend(restored_owners);

        debug!(
            "Removed {} ({} symbols gone, {} dependents stale)",
            file_path,
            removed_ids.len(),
            stale_dependents.len()
        );
        RemovedFile {
            removed_ids,
            stale_dependents,
        }
    }

    /// Drop edges targeting removed ids; returns the affected owners except `origin`
    fn cascade_removed(&self, removed: &BTreeSet<SymbolId>, origin: &str) -> BTreeSet<String> {
        let mut owners = BTreeSet::new();
        for id in removed {
            if let Some(by_owner) = self.dependents.get(id) {
                owners.extend(by_owner.keys().cloned());
            }
        }
        for owner in &owners {
            self.remove_edges_targeting(owner, removed);
        }
        owners.remove(origin);
        owners
    }

    pub fn symbols_in_file(&self, file_path: &str) -> Vec<Arc<Symbol>> {
        let fqns = match self.files.get(file_path) {
            Some(entry) => entry.fqns.clone(),
            None => return Vec::new(),
        };
        let mut symbols: Vec<_> = fqns
            .iter()
            .filter_map(|fqn| self.lookup_fqn(fqn))
            .filter(|s| s.file_path == file_path)
            .collect();
        symbols.sort_by(|a, b| (a.line, a.column, &a.fqn).cmp(&(b.line, b.column, &b.fqn)));
        symbols
    }

    /// Files owning at least one edge whose target is `symbol_id`
    pub fn reverse_dependents(&self, symbol_id: &SymbolId) -> Vec<String> {
        self.dependents
            .get(symbol_id)
            .map(|by_owner| by_owner.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains_file(&self, file_path: &str) -> bool {
        self.files.contains_key(file_path)
    }

    pub fn file_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.files.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Every symbol, ordered by FQN
    pub fn all_symbols(&self) -> Vec<Arc<Symbol>> {
        let mut symbols: Vec<_> = self.symbols.iter().map(|e| e.value().clone()).collect();
        symbols.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        symbols
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn external_count(&self) -> usize {
        self.symbols.iter().filter(|e| e.value().is_external()).count()
    }

    /// Drop placeholders no edge points at any more, returning their ids
    pub fn prune_externals(&self) -> Vec<SymbolId> {
        let orphans: Vec<_> = self
            .symbols
            .iter()
            .filter(|e| e.value().is_external() && !self.dependents.contains_key(&e.value().id))
            .map(|e| e.key().clone())
            .collect();

        let mut pruned = Vec::new();
        for fqn in orphans {
            if let Some((_, symbol)) = self.symbols.remove_if(&fqn, |_, s| {
                s.is_external() && !self.dependents.contains_key(&s.id)
            }) {
                self.ids.remove(&symbol.id);
                self.unindex_name(&symbol.name, &fqn);
                pruned.push(symbol.id.clone());
            }
        }
        if !pruned.is_empty() {
            debug!("Pruned {} orphan placeholders", pruned.len());
        }
        pruned
    }

    /// Freeze the current state for lock-free concurrent reads
    pub fn snapshot(&self) -> Arc<TableSnapshot> {
        let mut symbols = HashMap::with_capacity(self.symbols.len());
        let mut ids = HashMap::with_capacity(self.symbols.len());
        let mut names: HashMap<String, Vec<Arc<Symbol>>> = HashMap::new();

        for entry in self.symbols.iter() {
            let symbol = entry.value().clone();
            ids.insert(symbol.id.clone(), symbol.clone());
            names.entry(symbol.name.clone()).or_default().push(symbol.clone());
            symbols.insert(entry.key().clone(), symbol);
        }
        for candidates in names.values_mut() {
            candidates.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        }

        Arc::new(TableSnapshot { symbols, ids, names })
    }

    // ==================== Edges ====================

    /// Replace every edge owned by `owner`
    pub fn replace_edges(&self, owner: &str, edges: Vec<Edge>) -> CoreResult<()> {
        let edges = self.validate_edges(owner, edges)?;
        let previous = match self.edges.entry(owner.to_string()) {
            Entry::Occupied(mut occupied) => {
                let previous = std::mem::replace(occupied.get_mut(), Vec::new());
                for edge in &edges {
                    self.add_dependent(&edge.target_id, owner);
                }
                *occupied.get_mut() = edges;
                previous
            }
            Entry::Vacant(vacant) => {
                for edge in &edges {
                    self.add_dependent(&edge.target_id, owner);
                }
                vacant.insert(edges);
                Vec::new()
            }
        };
        for edge in &previous {
            self.release_dependent(&edge.target_id, owner);
        }
        Ok(())
    }

    /// Add edges to those already owned by `owner`
    pub fn append_edges(&self, owner: &str, edges: Vec<Edge>) -> CoreResult<()> {
        let edges = self.validate_edges(owner, edges)?;
        if edges.is_empty() {
            return Ok(());
        }
        let mut existing = self.edges.entry(owner.to_string()).or_default();
        for edge in edges {
            if existing.iter().any(|e| e == &edge) {
                continue;
            }
            self.add_dependent(&edge.target_id, owner);
            existing.push(edge);
        }
        existing.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(())
    }

    /// Delete every edge owned by `owner`, returning them
    pub fn clear_edges(&self, owner: &str) -> Vec<Edge> {
        let removed = self
            .edges
            .remove(owner)
            .map(|(_, edges)| edges)
            .unwrap_or_default();
        for edge in &removed {
            self.release_dependent(&edge.target_id, owner);
        }
        removed
    }

    fn remove_edges_targeting(&self, owner: &str, targets: &BTreeSet<SymbolId>) {
        let mut dropped = Vec::new();
        if let Some(mut edges) = self.edges.get_mut(owner) {
            edges.retain(|edge| {
                if targets.contains(&edge.target_id) {
                    dropped.push(edge.target_id.clone());
                    false
                } else {
                    true
                }
            });
            for target in &dropped {
                self.release_dependent(target, owner);
            }
        }
        self.edges.remove_if(owner, |_, edges| edges.is_empty());
    }

    fn validate_edges(&self, owner: &str, mut edges: Vec<Edge>) -> CoreResult<Vec<Edge>> {
        for edge in &edges {
            if edge.owner() != owner {
                return Err(CoreError::InvalidSymbols {
                    path: owner.to_string(),
                    message: format!("edge located in {} cannot be owned here", edge.owner()),
                });
            }
            if !self.ids.contains_key(&edge.target_id) {
                return Err(CoreError::TableCorruption(format!(
                    "{} edge from {} targets unknown id {}",
                    edge.edge_type, owner, edge.target_id
                )));
            }
        }
        edges.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        edges.dedup();
        Ok(edges)
    }

    fn add_dependent(&self, target: &SymbolId, owner: &str) {
        *self
            .dependents
            .entry(target.clone())
            .or_default()
            .entry(owner.to_string())
            .or_insert(0) += 1;
    }

    fn release_dependent(&self, target: &SymbolId, owner: &str) {
        if let Some(mut by_owner) = self.dependents.get_mut(target) {
            if let Some(count) = by_owner.get_mut(owner) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    by_owner.remove(owner);
                }
            }
        }
        self.dependents.remove_if(target, |_, by_owner| by_owner.is_empty());
    }

    pub fn edges_of(&self, owner: &str) -> Vec<Edge> {
        self.edges.get(owner).map(|e| e.clone()).unwrap_or_default()
    }

    /// Every edge, grouped by owner in path order
    pub fn all_edges(&self) -> Vec<Edge> {
        let mut owners: Vec<_> = self.edges.iter().map(|e| e.key().clone()).collect();
        owners.sort();
        owners.iter().flat_map(|owner| self.edges_of(owner)).collect()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(|e| e.value().len()).sum()
    }

    /// Verify that no edge points at a missing symbol
    pub fn verify_integrity(&self) -> CoreResult<()> {
        for entry in self.edges.iter() {
            for edge in entry.value() {
                if !self.ids.contains_key(&edge.target_id) {
                    return Err(CoreError::TableCorruption(format!(
                        "dangling {} edge in {} to {}",
                        edge.edge_type,
                        entry.key(),
                        edge.target_id
                    )));
                }
            }
        }
        for entry in self.ids.iter() {
            if !self.symbols.contains_key(entry.value()) {
                return Err(CoreError::TableCorruption(format!(
                    "id {} points at missing FQN {}",
                    entry.key(),
                    entry.value()
                )));
            }
        }
        Ok(())
    }

    // ==================== Diagnostics ====================

    pub fn record(&self, diagnostic: Diagnostic) {
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            diagnostics.push(diagnostic);
        }
    }

    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .map(|mut d| std::mem::take(&mut *d))
            .unwrap_or_default()
    }
}

impl SymbolLookup for SymbolTable {
    fn lookup_fqn(&self, fqn: &str) -> Option<Arc<Symbol>> {
        self.symbols.get(fqn).map(|s| s.value().clone())
    }

    fn lookup_id(&self, id: &SymbolId) -> Option<Arc<Symbol>> {
        let fqn = self.ids.get(id).map(|f| f.value().clone())?;
        self.lookup_fqn(&fqn)
    }

    fn named(&self, name: &str) -> Vec<Arc<Symbol>> {
        let fqns: Vec<String> = match self.names.get(name) {
            Some(fqns) => fqns.iter().cloned().collect(),
            None => return Vec::new(),
        };
        fqns.iter().filter_map(|fqn| self.lookup_fqn(fqn)).collect()
    }
}

/// Immutable view of the table taken after the Pass 1 barrier
#[derive(Debug, Default)]
pub struct TableSnapshot {
    symbols: HashMap<String, Arc<Symbol>>,
    ids: HashMap<SymbolId, Arc<Symbol>>,
    names: HashMap<String, Vec<Arc<Symbol>>>,
}

impl TableSnapshot {
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolLookup for TableSnapshot {
    fn lookup_fqn(&self, fqn: &str) -> Option<Arc<Symbol>> {
        self.symbols.get(fqn).cloned()
    }

    fn lookup_id(&self, id: &SymbolId) -> Option<Arc<Symbol>> {
        self.ids.get(id).cloned()
    }

    fn named(&self, name: &str) -> Vec<Arc<Symbol>> {
        self.names.get(name).cloned().unwrap_or_default()
    }
}

fn module_symbol(namespace: &str) -> Symbol {
    Symbol::new(namespace, short_name(namespace), SymbolKind::Module)
}

/// Last segment of a name under any of the common separators
pub fn short_name(fqn: &str) -> &str {
    let cut = ["::", "\\", "/", "."]
        .iter()
        .filter_map(|sep| fqn.rfind(sep).map(|at| at + sep.len()))
        .max()
        .unwrap_or(0);
    if cut >= fqn.len() {
        fqn
    } else {
        &fqn[cut..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{ImportBinding, LiteralBindings};
    use crate::core::model::{EdgeType, Location};
    use crate::core::sketch::FileSketches;

    fn class(fqn: &str, file: &str, line: u32) -> Symbol {
        Symbol::new(fqn, short_name(fqn), SymbolKind::Class).located(file, line, 1)
    }

    fn edge(owner: &str, from: &Symbol, to: &SymbolId) -> Edge {
        Edge::new(
            EdgeType::Extends,
            from.id.clone(),
            to.clone(),
            1.0,
            Location {
                file_path: owner.to_string(),
                line: 1,
            },
        )
    }

    #[test]
    fn test_upsert_replaces_previous_symbols_of_file() {
        let table = SymbolTable::new();
        table
            .upsert_symbols("a.java", vec![class("Base", "a.java", 1), class("Old", "a.java", 2)])
            .unwrap();
        let summary = table
            .upsert_symbols("a.java", vec![class("Base", "a.java", 1), class("New", "a.java", 3)])
            .unwrap();

        assert_eq!(summary.removed_ids.len(), 1);
        let fqns: Vec<_> = table
            .symbols_in_file("a.java")
            .iter()
            .map(|s| s.fqn.clone())
            .collect();
        assert_eq!(fqns, vec!["Base", "New"]);
        assert!(table.lookup_fqn("Old").is_none());
    }

    #[test]
    fn test_invalid_upsert_leaves_table_untouched() {
        let table = SymbolTable::new();
        table.upsert_symbols("a.java", vec![class("Base", "a.java", 1)]).unwrap();

        let result = table.upsert_symbols("a.java", vec![class("Other", "b.java", 1)]);
        assert!(result.is_err());
        assert!(table.lookup_fqn("Base").is_some());
        assert!(table.lookup_fqn("Other").is_none());
    }

    #[test]
    fn test_duplicate_fqn_last_collected_wins_and_resurfaces() {
        let table = SymbolTable::new();
        table.upsert_symbols("a.java", vec![class("Dup", "a.java", 1)]).unwrap();
        let summary = table.upsert_symbols("b.java", vec![class("Dup", "b.java", 7)]).unwrap();

        assert_eq!(summary.duplicates, 1);
        assert_eq!(table.lookup_fqn("Dup").unwrap().file_path, "b.java");
        let diagnostics = table.take_diagnostics();
        assert!(diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::DuplicateFqn));

        let removed = table.remove_file("b.java");
        assert!(removed.removed_ids.is_empty());
        assert_eq!(table.lookup_fqn("Dup").unwrap().file_path, "a.java");
    }

    #[test]
    fn test_external_placeholder_is_reused_and_upgraded() {
        let table = SymbolTable::new();
        let first = table.get_or_create_external("Unknown");
        let second = table.get_or_create_external("Unknown");
        assert_eq!(first.id, second.id);
        assert!(first.is_external());

        table.upsert_symbols("u.java", vec![class("Unknown", "u.java", 1)]).unwrap();
        let upgraded = table.lookup_fqn("Unknown").unwrap();
        assert_eq!(upgraded.kind, SymbolKind::Class);
        assert_eq!(upgraded.id, first.id);
    }

    #[test]
    fn test_dangling_edge_is_rejected() {
        let table = SymbolTable::new();
        let child = class("Child", "b.java", 1);
        table.upsert_symbols("b.java", vec![child.clone()]).unwrap();

        let result = table.replace_edges("b.java", vec![edge("b.java", &child, &SymbolId::for_fqn("Nope"))]);
        assert!(matches!(result, Err(CoreError::TableCorruption(_))));
        assert_eq!(table.edge_count(), 0);
    }

    #[test]
    fn test_reverse_dependents_and_cascade_on_remove() {
        let table = SymbolTable::new();
        let base = class("Base", "a.java", 1);
        let child = class("Child", "b.java", 1);
        table.upsert_symbols("a.java", vec![base.clone()]).unwrap();
        table.upsert_symbols("b.java", vec![child.clone()]).unwrap();
        table
            .replace_edges("b.java", vec![edge("b.java", &child, &base.id)])
            .unwrap();

        assert_eq!(table.reverse_dependents(&base.id), vec!["b.java".to_string()]);

        let removed = table.remove_file("a.java");
        assert!(removed.removed_ids.contains(&base.id));
        assert!(removed.stale_dependents.contains("b.java"));
        assert!(table.edges_of("b.java").is_empty());
        assert!(table.reverse_dependents(&base.id).is_empty());
        table.verify_integrity().unwrap();
    }

    #[test]
    fn test_prune_keeps_referenced_placeholders() {
        let table = SymbolTable::new();
        let child = class("Child", "b.java", 1);
        table.upsert_symbols("b.java", vec![child.clone()]).unwrap();
        let used = table.get_or_create_external("Used");
        table.get_or_create_external("Orphan");
        table
            .replace_edges("b.java", vec![edge("b.java", &child, &used.id)])
            .unwrap();

        assert_eq!(table.prune_externals().len(), 1);
        assert!(table.lookup_fqn("Used").is_some());
        assert!(table.lookup_fqn("Orphan").is_none());
    }

    #[test]
    fn test_module_lives_while_declared() {
        let table = SymbolTable::new();
        let mut file_a = Symbol::file("a.java");
        file_a.namespace = Some("com.app".to_string());
        let mut file_b = Symbol::file("b.java");
        file_b.namespace = Some("com.app".to_string());

        table.upsert_symbols("a.java", vec![file_a]).unwrap();
        table.upsert_symbols("b.java", vec![file_b]).unwrap();
        assert_eq!(table.lookup_fqn("com.app").unwrap().kind, SymbolKind::Module);

        table.remove_file("a.java");
        assert!(table.lookup_fqn("com.app").is_some());
        table.remove_file("b.java");
        assert!(table.lookup_fqn("com.app").is_none());
    }

    #[test]
    fn test_resolve_order() {
        let table = SymbolTable::new();
        table
            .upsert_symbols(
                "lib.java",
                vec![
                    class("com.lib.Base", "lib.java", 1),
                    class("app.Local", "lib.java", 2),
                    class("other.Global", "lib.java", 3),
                ],
            )
            .unwrap();
        table.get_or_create_external("Phantom");
        let snapshot = table.snapshot();

        let mut file = FileSketches::new("main.java", "java", ".");
        file.namespace = Some("app".to_string());
        file.imports.push(crate::core::sketch::ImportSketch {
            target: "com.lib.Base".to_string(),
            alias: None,
            wildcard: false,
            line: 1,
        });
        let imports = ImportBinding::from_file(&file);
        let literals = LiteralBindings::default();
        let ctx = ResolutionContext::for_file(&file, &imports, &literals);

        assert_eq!(snapshot.resolve("com.lib.Base", &ctx).unwrap().fqn, "com.lib.Base");
        assert_eq!(snapshot.resolve("Base", &ctx).unwrap().fqn, "com.lib.Base");
        assert_eq!(snapshot.resolve("Local", &ctx).unwrap().fqn, "app.Local");
        assert_eq!(snapshot.resolve("Global", &ctx).unwrap().fqn, "other.Global");
        assert!(snapshot.resolve("Phantom", &ctx).is_none());
        assert!(snapshot.resolve("missing.Global", &ctx).is_none());
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("java.util.List"), "List");
        assert_eq!(short_name("App\\Models\\User"), "User");
        assert_eq!(short_name("crate::a::b"), "b");
        assert_eq!(short_name("plain"), "plain");
    }
}
