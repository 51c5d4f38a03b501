//! Route to handler mapping

use crate::core::model::{Edge, EdgeType, SymbolId};
use crate::core::plugins::{plugin_edge, EnrichmentPlugin, FileBindings, ProjectContext, CONFIG_OWNER};
use crate::core::resolver::{
    source_id, ResolveScope, CONFIDENCE_COMPUTED, CONFIDENCE_EXACT, CONFIDENCE_PLACEHOLDER,
    DYNAMIC_PREFIX,
};
use crate::core::sketch::{FileSketches, ReferenceKind, ReferenceSketch, Target};
use crate::core::table::{LookupFilter, SymbolLookup};

pub struct RoutePlugin;

impl EnrichmentPlugin for RoutePlugin {
    fn name(&self) -> &'static str {
        "routes"
    }

    fn detect(&self, project: &ProjectContext) -> bool {
        project.enrichment.route_annotations || !project.enrichment.routes.is_empty()
    }

    fn analyze_file(&self, file: &FileSketches, scope: &ResolveScope, project: &ProjectContext) -> Vec<Edge> {
        if !project.enrichment.route_annotations {
            return Vec::new();
        }
        let bindings = FileBindings::of(file);
        file.references
            .iter()
            .filter(|r| r.kind == ReferenceKind::Route)
            .map(|reference| route_edge(file, &bindings, reference, scope))
            .collect()
    }

    fn analyze_config(&self, project: &ProjectContext, scope: &ResolveScope) -> Vec<Edge> {
        project
            .enrichment
            .routes
            .iter()
            .enumerate()
            .map(|(index, route)| {
                let (target, confidence) = match scope.snapshot.lookup_defined(&route.handler) {
                    Some(handler) => (handler, CONFIDENCE_EXACT),
                    None => (scope.external(&route.handler), CONFIDENCE_PLACEHOLDER),
                };
                plugin_edge(
                    EdgeType::RoutesTo,
                    project.config_owner_id(),
                    &target,
                    confidence,
                    CONFIG_OWNER,
                    index as u32 + 1,
                )
                .with_meta("method", route.method.to_uppercase())
                .with_meta("path", route.path.as_str())
            })
            .collect()
    }
}

fn route_edge(
    file: &FileSketches,
    bindings: &FileBindings,
    reference: &ReferenceSketch,
    scope: &ResolveScope,
) -> Edge {
    let file_id = SymbolId::for_fqn(&file.path);
    let annotated = reference
        .extra
        .get("annotation")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let edge = match &reference.target {
        // The annotated definition is the handler
        _ if annotated => {
            let handler = source_id(file, reference.from.as_deref());
            let target = scope
                .snapshot
                .lookup_id(&handler)
                .unwrap_or_else(|| scope.external(&file.path));
            plugin_edge(EdgeType::RoutesTo, file_id, &target, CONFIDENCE_EXACT, &file.path, reference.line)
        }
        Target::Name(name) => {
            let ctx = bindings.context(file, reference.from.as_deref());
            let (target, found) = scope.resolve_or_external(name, &ctx, LookupFilter::Callables);
            let confidence = if found {
                CONFIDENCE_EXACT
            } else {
                CONFIDENCE_PLACEHOLDER
            };
            plugin_edge(EdgeType::RoutesTo, file_id, &target, confidence, &file.path, reference.line)
        }
        Target::Variable(_) | Target::Dynamic(_) => {
            let target = scope.external(&format!("{}{}", DYNAMIC_PREFIX, reference.target.text()));
            plugin_edge(EdgeType::RoutesTo, file_id, &target, CONFIDENCE_COMPUTED, &file.path, reference.line)
                .with_meta("dynamic", true)
        }
    };

    let method = reference.extra_str("method").unwrap_or("ANY").to_uppercase();
    let edge = edge.with_meta("method", method);
    match reference.extra_str("path") {
        Some(path) => edge.with_meta("path", path),
        None => edge,
    }
}
