//! Pass 2: turn one file's reference sketches into confidence-scored edges
//!
//! Every reference yields exactly one edge. Names that cannot be resolved point
//! at an external placeholder instead of being dropped, and dynamic constructs
//! are kept with a low score and `dynamic = true`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::core::context::{ImportBinding, LiteralBindings, ResolutionContext};
use crate::core::model::{
    Diagnostic, DiagnosticKind, Edge, EdgeType, Location, Symbol, SymbolId, SymbolKind,
};
use crate::core::sketch::{FileSketches, ReferenceKind, ReferenceSketch, Receiver, Target};
use crate::core::table::{LookupFilter, SymbolLookup, SymbolTable, TableSnapshot};

pub const CONFIDENCE_EXACT: f64 = 1.0;
pub const CONFIDENCE_PLACEHOLDER: f64 = 0.5;
pub const CONFIDENCE_INHERITED: f64 = 0.9;
pub const CONFIDENCE_DYNAMIC_RECEIVER: f64 = 0.3;
pub const CONFIDENCE_PROPAGATION_MISS: f64 = 0.2;
pub const CONFIDENCE_COMPUTED: f64 = 0.1;

/// Supertype chains deeper than this are not searched for inherited members
const MAX_HIERARCHY_DEPTH: usize = 8;

/// Prefix of placeholders standing for names only known at runtime
pub const DYNAMIC_PREFIX: &str = "dynamic::";

/// Cached sketches of every collected file, keyed by path
pub type SketchIndex = HashMap<String, Arc<FileSketches>>;

/// Read scope shared by Pass 2 and Pass 3 workers.
///
/// Lookups go to the frozen snapshot; only placeholder creation touches the
/// live table.
#[derive(Clone, Copy)]
pub struct ResolveScope<'a> {
    pub snapshot: &'a TableSnapshot,
    pub table: &'a SymbolTable,
    pub sketches: &'a SketchIndex,
}

impl<'a> ResolveScope<'a> {
    pub fn new(snapshot: &'a TableSnapshot, table: &'a SymbolTable, sketches: &'a SketchIndex) -> Self {
        Self {
            snapshot,
            table,
            sketches,
        }
    }

    pub fn external(&self, fqn: &str) -> Arc<Symbol> {
        self.table.get_or_create_external(fqn)
    }

    /// Resolve `name`, falling back to a placeholder. The flag is true on a real hit.
    pub fn resolve_or_external(
        &self,
        name: &str,
        ctx: &ResolutionContext,
        filter: LookupFilter,
    ) -> (Arc<Symbol>, bool) {
        match self.snapshot.resolve_filtered(name, ctx, filter) {
            Some(symbol) => (symbol, true),
            None => (self.external(&ctx.placeholder_fqn(name)), false),
        }
    }

    fn separator_of(&self, symbol: &Symbol) -> &str {
        self.sketches
            .get(&symbol.file_path)
            .map(|f| f.separator.as_str())
            .unwrap_or(".")
    }

    /// Member declared directly on `owner`
    pub fn member_of(&self, owner: &Symbol, member: &str) -> Option<Arc<Symbol>> {
        let fqn = format!("{}{}{}", owner.fqn, self.separator_of(owner), member);
        self.snapshot.lookup_defined(&fqn)
    }

    /// Resolved supertypes of a project type, read from its recorded supertype names
    pub fn supertypes_of(&self, symbol: &Symbol) -> Vec<Arc<Symbol>> {
        let names = symbol.supertype_names();
        if names.is_empty() {
            return Vec::new();
        }
        let Some(file) = self.sketches.get(&symbol.file_path) else {
            return Vec::new();
        };
        let imports = ImportBinding::from_file(file);
        let literals = LiteralBindings::default();
        let mut ctx = ResolutionContext::for_file(file, &imports, &literals);
        ctx.enter(file, Some(file.relative_of(&symbol.fqn)));

        names
            .iter()
            .filter_map(|name| self.snapshot.resolve_filtered(name, &ctx, LookupFilter::Types))
            .filter(|parent| parent.fqn != symbol.fqn)
            .collect()
    }

    /// Breadth-first search for `member` along the supertype graph of `owner`
    pub fn inherited_member(&self, owner: &Symbol, member: &str) -> Option<Arc<Symbol>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(owner.fqn.clone());
        queue.push_back((self.supertypes_of(owner), 1usize));

        while let Some((parents, depth)) = queue.pop_front() {
            for parent in parents {
                if !seen.insert(parent.fqn.clone()) {
                    continue;
                }
                if let Some(found) = self.member_of(&parent, member) {
                    return Some(found);
                }
                if depth < MAX_HIERARCHY_DEPTH {
                    queue.push_back((self.supertypes_of(&parent), depth + 1));
                }
            }
        }
        None
    }
}

/// Edges produced for one file
#[derive(Debug, Clone, Default)]
pub struct FileResolution {
    pub path: String,
    pub edges: Vec<Edge>,
    /// Edges whose target is a placeholder
    pub unresolved: usize,
}

/// Resolve every import and non-enrichment reference of `file`
pub fn resolve_file(file: &FileSketches, scope: &ResolveScope) -> FileResolution {
    let imports = ImportBinding::from_file(file);
    let literals = LiteralBindings::from_assignments(&file.assignments);
    let mut ctx = ResolutionContext::for_file(file, &imports, &literals);
    let resolver = FileResolver { file, scope };

    let mut edges = Vec::with_capacity(file.imports.len() + file.references.len());
    edges.extend(resolver.imports());
    for reference in file.references.iter().filter(|r| !r.kind.is_enrichment()) {
        ctx.enter(file, reference.from.as_deref());
        edges.push(resolver.reference(reference, &ctx));
    }
    edges.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let unresolved = edges
        .iter()
        .filter(|e| {
            scope
                .table
                .lookup_id(&e.target_id)
                .map(|s| s.is_external())
                .unwrap_or(true)
        })
        .count();
    debug!(
        "Resolved {}: {} edges, {} unresolved",
        file.path,
        edges.len(),
        unresolved
    );

    FileResolution {
        path: file.path.clone(),
        edges,
        unresolved,
    }
}

/// Id of the definition a reference sits in, or the file itself
pub fn source_id(file: &FileSketches, from: Option<&str>) -> SymbolId {
    match from {
        Some(relative) if file.symbol_at(relative).is_some() => {
            SymbolId::for_fqn(&file.qualify(relative))
        }
        _ => SymbolId::for_fqn(&file.path),
    }
}

struct FileResolver<'f, 's> {
    file: &'f FileSketches,
    scope: &'f ResolveScope<'s>,
}

impl<'f, 's> FileResolver<'f, 's> {
    fn edge(&self, edge_type: EdgeType, source: SymbolId, target: &Symbol, confidence: f64, line: u32) -> Edge {
        Edge::new(
            edge_type,
            source,
            target.id.clone(),
            confidence,
            Location {
                file_path: self.file.path.clone(),
                line,
            },
        )
    }

    fn imports(&self) -> Vec<Edge> {
        let file_id = SymbolId::for_fqn(&self.file.path);
        self.file
            .imports
            .iter()
            .map(|import| {
                let target = self
                    .scope
                    .snapshot
                    .lookup_defined(&import.target)
                    .unwrap_or_else(|| self.scope.external(&import.target));
                let mut edge = self.edge(
                    EdgeType::Imports,
                    file_id.clone(),
                    &target,
                    CONFIDENCE_EXACT,
                    import.line,
                );
                if let Some(alias) = &import.alias {
                    edge = edge.with_meta("alias", alias.as_str());
                }
                if import.wildcard {
                    edge = edge.with_meta("wildcard", true);
                }
                edge
            })
            .collect()
    }

    fn reference(&self, reference: &ReferenceSketch, ctx: &ResolutionContext) -> Edge {
        let source = source_id(self.file, reference.from.as_deref());
        match reference.kind {
            ReferenceKind::Call => self.call(reference, ctx, source),
            ReferenceKind::Instantiate => {
                self.typed(EdgeType::Instantiates, reference, ctx, source, LookupFilter::Types)
            }
            ReferenceKind::Extends => {
                self.typed(EdgeType::Extends, reference, ctx, source, LookupFilter::Types)
            }
            ReferenceKind::Implements => {
                self.typed(EdgeType::Implements, reference, ctx, source, LookupFilter::Types)
            }
            ReferenceKind::UsesMixin => {
                self.typed(EdgeType::UsesMixin, reference, ctx, source, LookupFilter::Types)
            }
            ReferenceKind::Throws => {
                self.typed(EdgeType::Throws, reference, ctx, source, LookupFilter::Types)
            }
            ReferenceKind::ReturnsType => {
                self.typed(EdgeType::ReturnsType, reference, ctx, source, LookupFilter::Types)
            }
            ReferenceKind::AcceptsType => {
                self.typed(EdgeType::AcceptsType, reference, ctx, source, LookupFilter::Types)
            }
            ReferenceKind::Reads => {
                self.typed(EdgeType::Reads, reference, ctx, source, LookupFilter::Values)
            }
            ReferenceKind::Writes => {
                self.typed(EdgeType::Writes, reference, ctx, source, LookupFilter::Values)
            }
            // Enrichment kinds never reach Pass 2
            ReferenceKind::ServiceLookup
            | ReferenceKind::EventEmit
            | ReferenceKind::EventListen
            | ReferenceKind::Route => self.computed(EdgeType::Calls, reference, source),
        }
    }

    /// Type-like references, including construction through a variable
    fn typed(
        &self,
        edge_type: EdgeType,
        reference: &ReferenceSketch,
        ctx: &ResolutionContext,
        source: SymbolId,
        filter: LookupFilter,
    ) -> Edge {
        match &reference.target {
            Target::Name(name) => {
                let (target, found) = self.scope.resolve_or_external(name, ctx, filter);
                let confidence = if found {
                    CONFIDENCE_EXACT
                } else {
                    CONFIDENCE_PLACEHOLDER
                };
                self.edge(edge_type, source, &target, confidence, reference.line)
            }
            Target::Variable(variable) => match ctx.literal(variable, reference.line) {
                Some(literal) => {
                    let (target, found) = self.scope.resolve_or_external(literal, ctx, filter);
                    let confidence = if found {
                        CONFIDENCE_EXACT
                    } else {
                        CONFIDENCE_PLACEHOLDER
                    };
                    self.edge(edge_type, source, &target, confidence, reference.line)
                        .with_meta("via_propagation", true)
                        .with_meta("variable", variable.as_str())
                }
                None => {
                    let target = self.scope.external(&format!("{}{}", DYNAMIC_PREFIX, variable));
                    self.edge(edge_type, source, &target, CONFIDENCE_PROPAGATION_MISS, reference.line)
                        .with_meta("dynamic", true)
                        .with_meta("variable", variable.as_str())
                }
            },
            Target::Dynamic(_) => self.computed(edge_type, reference, source),
        }
    }

    /// A target only known at runtime
    fn computed(&self, edge_type: EdgeType, reference: &ReferenceSketch, source: SymbolId) -> Edge {
        let text = reference.target.text();
        let target = self.scope.external(&format!("{}{}", DYNAMIC_PREFIX, text));
        self.edge(edge_type, source, &target, CONFIDENCE_COMPUTED, reference.line)
            .with_meta("dynamic", true)
            .with_meta("expression", text)
    }

    fn call(&self, reference: &ReferenceSketch, ctx: &ResolutionContext, source: SymbolId) -> Edge {
        let name = match &reference.target {
            Target::Name(name) => name.as_str(),
            Target::Variable(_) | Target::Dynamic(_) => {
                return self.computed(EdgeType::Calls, reference, source)
            }
        };
        let line = reference.line;

        match &reference.receiver {
            Receiver::None | Receiver::SelfRef => {
                let owner = ctx
                    .enclosing_type
                    .as_deref()
                    .and_then(|fqn| self.scope.snapshot.lookup_defined(fqn));
                if let Some(owner) = &owner {
                    if let Some(method) = self.scope.member_of(owner, name) {
                        return self.edge(EdgeType::Calls, source, &method, CONFIDENCE_EXACT, line);
                    }
                    if let Some(method) = self.scope.inherited_member(owner, name) {
                        return self
                            .edge(EdgeType::Calls, source, &method, CONFIDENCE_INHERITED, line)
                            .with_meta("inherited", true);
                    }
                }
                if reference.receiver == Receiver::None {
                    let found = self
                        .scope
                        .snapshot
                        .resolve_filtered(name, ctx, LookupFilter::Callables)
                        .filter(|s| s.kind == SymbolKind::Function || ctx.is_qualified(name));
                    if let Some(function) = found {
                        return self.edge(EdgeType::Calls, source, &function, CONFIDENCE_EXACT, line);
                    }
                }
                let placeholder = match (&owner, reference.receiver == Receiver::SelfRef) {
                    (Some(owner), true) => {
                        format!("{}{}{}", owner.fqn, self.scope.separator_of(owner), name)
                    }
                    _ => ctx.placeholder_fqn(name),
                };
                let target = self.scope.external(&placeholder);
                self.edge(EdgeType::Calls, source, &target, CONFIDENCE_PLACEHOLDER, line)
                    .with_meta("unresolved", true)
            }
            Receiver::Type(type_name) => {
                match self.scope.snapshot.resolve(type_name, ctx) {
                    Some(owner) => {
                        if let Some(method) = self.scope.member_of(&owner, name) {
                            return self.edge(EdgeType::CallsStatic, source, &method, CONFIDENCE_EXACT, line);
                        }
                        if let Some(method) = self.scope.inherited_member(&owner, name) {
                            return self
                                .edge(EdgeType::CallsStatic, source, &method, CONFIDENCE_INHERITED, line)
                                .with_meta("inherited", true);
                        }
                        let fqn = format!("{}{}{}", owner.fqn, self.scope.separator_of(&owner), name);
                        let target = self.scope.external(&fqn);
                        self.edge(EdgeType::CallsStatic, source, &target, CONFIDENCE_PLACEHOLDER, line)
                            .with_meta("unresolved", true)
                    }
                    None => {
                        let fqn = format!(
                            "{}{}{}",
                            ctx.placeholder_fqn(type_name),
                            ctx.separator,
                            name
                        );
                        let target = self.scope.external(&fqn);
                        self.edge(EdgeType::CallsStatic, source, &target, CONFIDENCE_PLACEHOLDER, line)
                            .with_meta("unresolved", true)
                    }
                }
            }
            Receiver::Expression(expression) => self.dynamic_call(reference, name, expression, source),
        }
    }

    /// Receiver type unknown: guess only when the method name is unique in the project
    fn dynamic_call(
        &self,
        reference: &ReferenceSketch,
        name: &str,
        expression: &str,
        source: SymbolId,
    ) -> Edge {
        let candidates: Vec<_> = self
            .scope
            .snapshot
            .named(name)
            .into_iter()
            .filter(|s| s.kind == SymbolKind::Method)
            .collect();

        let edge = match candidates.as_slice() {
            [only] => self
                .edge(EdgeType::Calls, source, only, CONFIDENCE_DYNAMIC_RECEIVER, reference.line)
                .with_meta("candidates", 1),
            _ => {
                if candidates.len() > 1 {
                    self.scope.table.record(Diagnostic::new(
                        DiagnosticKind::ResolutionAmbiguity,
                        self.file.path.clone(),
                        format!(
                            "line {}: {}.{}() matches {} methods",
                            reference.line,
                            expression,
                            name,
                            candidates.len()
                        ),
                    ));
                }
                let target = self.scope.external(&format!("{}{}", DYNAMIC_PREFIX, name));
                self.edge(EdgeType::Calls, source, &target, CONFIDENCE_PROPAGATION_MISS, reference.line)
                    .with_meta("candidates", candidates.len())
            }
        };
        edge.with_meta("dynamic", true)
            .with_meta("receiver", expression)
    }
}
