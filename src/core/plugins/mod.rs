//! Pass 3: enrichment plugins
//!
//! Plugins see the whole table through a frozen snapshot and only ever add
//! edges. Edges derived from code are owned by the analyzed file; edges
//! derived from the project configuration are owned by [`CONFIG_OWNER`].

pub mod events;
pub mod routes;
pub mod services;

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::core::config::{EnrichmentConfig, PROJECT_CONFIG_FILE};
use crate::core::context::{ImportBinding, LiteralBindings, ResolutionContext};
use crate::core::model::{Edge, EdgeType, Location, Symbol, SymbolId};
use crate::core::resolver::ResolveScope;
use crate::core::sketch::FileSketches;

/// Owner of every configuration-derived edge
pub const CONFIG_OWNER: &str = PROJECT_CONFIG_FILE;

/// What plugins know about the project as a whole
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    pub root: PathBuf,
    pub enrichment: EnrichmentConfig,
    /// Languages present among the collected files
    pub languages: BTreeSet<String>,
}

impl ProjectContext {
    pub fn new(root: impl Into<PathBuf>, enrichment: EnrichmentConfig) -> Self {
        Self {
            root: root.into(),
            enrichment,
            languages: BTreeSet::new(),
        }
    }

    pub fn config_owner_id(&self) -> SymbolId {
        SymbolId::for_fqn(CONFIG_OWNER)
    }
}

pub trait EnrichmentPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the plugin applies to this project at all
    fn detect(&self, project: &ProjectContext) -> bool;

    /// Edges derived from one file's sketches
    fn analyze_file(&self, file: &FileSketches, scope: &ResolveScope, project: &ProjectContext) -> Vec<Edge>;

    /// Edges derived from project configuration, owned by [`CONFIG_OWNER`]
    fn analyze_config(&self, _project: &ProjectContext, _scope: &ResolveScope) -> Vec<Edge> {
        Vec::new()
    }
}

/// Closed set of plugins run by the pipeline
pub struct PluginRegistry {
    plugins: Vec<Box<dyn EnrichmentPlugin>>,
}

impl PluginRegistry {
    pub fn with_defaults() -> Self {
        Self {
            plugins: vec![
                Box::new(services::ServiceContainerPlugin),
                Box::new(events::EventPlugin),
                Box::new(routes::RoutePlugin),
            ],
        }
    }

    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn EnrichmentPlugin>) {
        self.plugins.push(plugin);
    }

    /// Plugins whose detection succeeds for `project`
    pub fn active<'a>(&'a self, project: &ProjectContext) -> Vec<&'a dyn EnrichmentPlugin> {
        self.plugins
            .iter()
            .filter(|p| p.detect(project))
            .map(|p| p.as_ref())
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Config-owned edges of every active plugin
    pub fn analyze_config(&self, project: &ProjectContext, scope: &ResolveScope) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .active(project)
            .into_iter()
            .flat_map(|p| p.analyze_config(project, scope))
            .collect();
        edges.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        edges
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// The synthetic file node owning config-derived edges
pub fn config_owner_symbol() -> Symbol {
    let mut symbol = Symbol::file(CONFIG_OWNER);
    symbol
        .metadata
        .insert("language".to_string(), "toml".into());
    symbol
}

/// Per-file import and literal bindings, reused for every reference of the file
pub(crate) struct FileBindings {
    imports: ImportBinding,
    literals: LiteralBindings,
}

impl FileBindings {
    pub(crate) fn of(file: &FileSketches) -> Self {
        Self {
            imports: ImportBinding::from_file(file),
            literals: LiteralBindings::from_assignments(&file.assignments),
        }
    }

    pub(crate) fn context<'a>(&'a self, file: &'a FileSketches, from: Option<&str>) -> ResolutionContext<'a> {
        let mut ctx = ResolutionContext::for_file(file, &self.imports, &self.literals);
        ctx.enter(file, from);
        ctx
    }
}

/// Edge owned by `owner`
pub(crate) fn plugin_edge(
    edge_type: EdgeType,
    source: SymbolId,
    target: &Symbol,
    confidence: f64,
    owner: &str,
    line: u32,
) -> Edge {
    Edge::new(
        edge_type,
        source,
        target.id.clone(),
        confidence,
        Location {
            file_path: owner.to_string(),
            line,
        },
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::core::resolver::SketchIndex;
    use crate::core::sketch::FileSketches;
    use crate::core::table::SymbolTable;

    /// Commit files to a fresh table and index their sketches
    pub fn table_with(files: &[&FileSketches]) -> (SymbolTable, SketchIndex) {
        let table = SymbolTable::new();
        let mut index = SketchIndex::new();
        for file in files {
            table
                .upsert_symbols(&file.path, file.assemble_symbols())
                .unwrap();
            index.insert(file.path.clone(), Arc::new((*file).clone()));
        }
        (table, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_filters_plugins() {
        let registry = PluginRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["services", "events", "routes"]);

        let mut enrichment = EnrichmentConfig::default();
        enrichment.events.enabled = false;
        enrichment.route_annotations = false;
        let project = ProjectContext::new("/tmp/p", enrichment);
        assert!(registry.active(&project).is_empty());

        let mut enrichment = EnrichmentConfig::default();
        enrichment
            .services
            .insert("mailer".to_string(), "app.Smtp".to_string());
        let project = ProjectContext::new("/tmp/p", enrichment);
        let names: Vec<_> = registry.active(&project).iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["services", "events", "routes"]);
    }
}
