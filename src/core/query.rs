//! Read-only queries over a resolved graph

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::model::{Edge, Symbol, SymbolId};
use crate::core::table::{SymbolLookup, SymbolTable};

/// Information about a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub fqn: String,
    pub name: String,
    pub kind: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl From<&Symbol> for SymbolInfo {
    fn from(symbol: &Symbol) -> Self {
        Self {
            fqn: symbol.fqn.clone(),
            name: symbol.name.clone(),
            kind: symbol.kind.to_string(),
            file: symbol.file_path.clone(),
            line: symbol.line,
            column: symbol.column,
        }
    }
}

/// One edge with both endpoints spelled out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub edge_type: String,
    pub source: String,
    pub target: String,
    pub confidence: f64,
    pub file: String,
    pub line: u32,
    pub dynamic: bool,
}

/// Result of a references query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencesResult {
    pub symbol: SymbolInfo,
    pub count: usize,
    pub references: Vec<EdgeInfo>,
}

/// Row counts of the in-memory graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSummary {
    pub files: usize,
    pub symbols: usize,
    pub placeholders: usize,
    pub edges: usize,
}

pub struct GraphQuery<'a> {
    table: &'a SymbolTable,
}

impl<'a> GraphQuery<'a> {
    pub fn new(table: &'a SymbolTable) -> Self {
        Self { table }
    }

    /// Definitions matching an FQN, or every definition with that short name
    pub fn definition(&self, name: &str) -> Vec<SymbolInfo> {
        if let Some(symbol) = self.table.lookup_defined(name) {
            return vec![SymbolInfo::from(symbol.as_ref())];
        }
        let mut found: Vec<SymbolInfo> = self
            .table
            .named(name)
            .iter()
            .filter(|s| !s.is_external())
            .map(|s| SymbolInfo::from(s.as_ref()))
            .collect();
        found.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        found
    }

    /// Incoming edges of a symbol, placeholders included
    pub fn references(&self, fqn: &str) -> Option<ReferencesResult> {
        let symbol = self.table.lookup_fqn(fqn)?;
        let references: Vec<EdgeInfo> = self
            .table
            .all_edges()
            .iter()
            .filter(|e| e.target_id == symbol.id)
            .map(|e| self.describe(e))
            .collect();

        Some(ReferencesResult {
            symbol: SymbolInfo::from(symbol.as_ref()),
            count: references.len(),
            references,
        })
    }

    /// Edges scored below `threshold`, lowest first
    pub fn low_confidence(&self, threshold: f64) -> Vec<EdgeInfo> {
        let mut edges: Vec<EdgeInfo> = self
            .table
            .all_edges()
            .iter()
            .filter(|e| e.confidence < threshold)
            .map(|e| self.describe(e))
            .collect();
        edges.sort_by(|a, b| {
            a.confidence
                .total_cmp(&b.confidence)
                .then_with(|| (&a.file, a.line).cmp(&(&b.file, b.line)))
        });
        edges
    }

    /// Cycles in the EXTENDS / IMPLEMENTS / USES_MIXIN graph, each as sorted FQNs.
    ///
    /// The table stores cyclic hierarchies as written; this only reports them.
    pub fn inheritance_cycles(&self) -> Vec<Vec<String>> {
        let mut graph: BTreeMap<SymbolId, BTreeSet<SymbolId>> = BTreeMap::new();
        for edge in self.table.all_edges() {
            if edge.edge_type.is_hierarchy() {
                graph
                    .entry(edge.source_id.clone())
                    .or_default()
                    .insert(edge.target_id.clone());
            }
        }

        let mut cycles: Vec<Vec<String>> = StronglyConnected::of(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || graph
                        .get(&component[0])
                        .map(|targets| targets.contains(&component[0]))
                        .unwrap_or(false)
            })
            .map(|component| {
                let mut fqns: Vec<String> = component
                    .iter()
                    .map(|id| {
                        self.table
                            .lookup_id(id)
                            .map(|s| s.fqn.clone())
                            .unwrap_or_else(|| id.to_string())
                    })
                    .collect();
                fqns.sort();
                fqns
            })
            .collect();
        cycles.sort();
        cycles
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            files: self.table.file_paths().len(),
            symbols: self.table.symbol_count(),
            placeholders: self.table.external_count(),
            edges: self.table.edge_count(),
        }
    }

    fn describe(&self, edge: &Edge) -> EdgeInfo {
        let name = |id: &SymbolId| {
            self.table
                .lookup_id(id)
                .map(|s| s.fqn.clone())
                .unwrap_or_else(|| id.to_string())
        };
        EdgeInfo {
            edge_type: edge.edge_type.to_string(),
            source: name(&edge.source_id),
            target: name(&edge.target_id),
            confidence: edge.confidence,
            file: edge.location.file_path.clone(),
            line: edge.location.line,
            dynamic: edge.is_dynamic(),
        }
    }
}

/// Tarjan's strongly connected components
struct StronglyConnected<'g> {
    graph: &'g BTreeMap<SymbolId, BTreeSet<SymbolId>>,
    index: usize,
    indices: BTreeMap<&'g SymbolId, usize>,
    lowlink: BTreeMap<&'g SymbolId, usize>,
    stack: Vec<&'g SymbolId>,
    on_stack: BTreeSet<&'g SymbolId>,
    components: Vec<Vec<SymbolId>>,
}

impl<'g> StronglyConnected<'g> {
    fn of(graph: &'g BTreeMap<SymbolId, BTreeSet<SymbolId>>) -> Vec<Vec<SymbolId>> {
        let mut tarjan = Self {
            graph,
            index: 0,
            indices: BTreeMap::new(),
            lowlink: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        };
        for node in graph.keys() {
            if !tarjan.indices.contains_key(node) {
                tarjan.visit(node);
            }
        }
        tarjan.components
    }

    fn visit(&mut self, node: &'g SymbolId) {
        self.indices.insert(node, self.index);
        self.lowlink.insert(node, self.index);
        self.index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let graph = self.graph;
        if let Some(targets) = graph.get(node) {
            for target in targets {
                if !self.indices.contains_key(target) {
                    self.visit(target);
                    let low = self.lowlink[target].min(self.lowlink[node]);
                    self.lowlink.insert(node, low);
                } else if self.on_stack.contains(target) {
                    let low = self.indices[target].min(self.lowlink[node]);
                    self.lowlink.insert(node, low);
                }
            }
        }

        if self.lowlink[node] == self.indices[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member.clone());
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{EdgeType, Location, SymbolKind};
    use crate::core::table::short_name;

    fn class(fqn: &str, file: &str, line: u32) -> Symbol {
        Symbol::new(fqn, short_name(fqn), SymbolKind::Class).located(file, line, 1)
    }

    fn edge(edge_type: EdgeType, owner: &str, from: &str, to: &str, confidence: f64, line: u32) -> Edge {
        Edge::new(
            edge_type,
            SymbolId::for_fqn(from),
            SymbolId::for_fqn(to),
            confidence,
            Location {
                file_path: owner.to_string(),
                line,
            },
        )
    }

    fn table() -> SymbolTable {
        let table = SymbolTable::new();
        table
            .upsert_symbols("a.java", vec![class("app.A", "a.java", 1), class("app.B", "a.java", 5)])
            .unwrap();
        table
            .upsert_symbols("c.java", vec![class("app.C", "c.java", 1), class("other.B", "c.java", 9)])
            .unwrap();
        table.get_or_create_external("lib.Missing");
        table
            .replace_edges(
                "a.java",
                vec![
                    edge(EdgeType::Extends, "a.java", "app.A", "app.B", 1.0, 1),
                    edge(EdgeType::Extends, "a.java", "app.B", "app.A", 1.0, 5),
                ],
            )
            .unwrap();
        table
            .replace_edges(
                "c.java",
                vec![
                    edge(EdgeType::Implements, "c.java", "app.C", "lib.Missing", 0.5, 1),
                    edge(EdgeType::Calls, "c.java", "app.C", "app.A", 0.3, 2),
                    edge(EdgeType::UsesMixin, "c.java", "app.C", "app.C", 1.0, 3),
                ],
            )
            .unwrap();
        table
    }

    #[test]
    fn test_definition_by_fqn_and_short_name() {
        let table = table();
        let query = GraphQuery::new(&table);

        let exact = query.definition("app.C");
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].file, "c.java");

        let by_name: Vec<_> = query.definition("B").into_iter().map(|s| s.fqn).collect();
        assert_eq!(by_name, vec!["app.B", "other.B"]);
        assert!(query.definition("Missing").is_empty());
    }

    #[test]
    fn test_references_and_low_confidence() {
        let table = table();
        let query = GraphQuery::new(&table);

        let refs = query.references("app.A").unwrap();
        assert_eq!(refs.count, 2);
        assert!(refs.references.iter().any(|r| r.source == "app.C" && r.edge_type == "CALLS"));
        assert!(query.references("nope").is_none());

        let low = query.low_confidence(0.9);
        assert_eq!(low.len(), 2);
        assert_eq!(low[0].confidence, 0.3);
        assert_eq!(low[1].target, "lib.Missing");
    }

    #[test]
    fn test_inheritance_cycles() {
        let table = table();
        let cycles = GraphQuery::new(&table).inheritance_cycles();
        assert_eq!(
            cycles,
            vec![
                vec!["app.A".to_string(), "app.B".to_string()],
                vec!["app.C".to_string()],
            ]
        );
    }
}
