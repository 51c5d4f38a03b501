//! Event emit/listen correlation
//!
//! Emitters and listeners never point at each other directly. Both point at a
//! shared event node keyed by the literal event name, so correlation does not
//! depend on which side was analyzed first.

use std::sync::Arc;

use crate::core::model::{Edge, EdgeType, Symbol, SymbolId, SymbolKind};
use crate::core::plugins::{plugin_edge, EnrichmentPlugin, FileBindings, ProjectContext, CONFIG_OWNER};
use crate::core::resolver::{
    source_id, ResolveScope, CONFIDENCE_COMPUTED, CONFIDENCE_EXACT, CONFIDENCE_PLACEHOLDER,
    DYNAMIC_PREFIX,
};
use crate::core::sketch::{FileSketches, ReferenceKind, ReferenceSketch, Target};
use crate::core::table::SymbolLookup;

use super::services::CONFIDENCE_PROPAGATED_KEY;

pub const EVENT_PREFIX: &str = "event:";

pub struct EventPlugin;

impl EnrichmentPlugin for EventPlugin {
    fn name(&self) -> &'static str {
        "events"
    }

    fn detect(&self, project: &ProjectContext) -> bool {
        project.enrichment.events.enabled
    }

    fn analyze_file(&self, file: &FileSketches, scope: &ResolveScope, _project: &ProjectContext) -> Vec<Edge> {
        let bindings = FileBindings::of(file);
        file.references
            .iter()
            .filter_map(|reference| {
                let edge_type = match reference.kind {
                    ReferenceKind::EventEmit => EdgeType::Emits,
                    ReferenceKind::EventListen => EdgeType::Listens,
                    _ => return None,
                };
                Some(event_edge(file, &bindings, reference, edge_type, scope))
            })
            .collect()
    }

    fn analyze_config(&self, project: &ProjectContext, scope: &ResolveScope) -> Vec<Edge> {
        let mut edges = Vec::new();
        for (event, listeners) in &project.enrichment.events.listeners {
            let target = event_node(scope, event);
            for listener in listeners {
                let edge = match scope.snapshot.lookup_defined(listener) {
                    Some(handler) => plugin_edge(
                        EdgeType::Listens,
                        handler.id.clone(),
                        &target,
                        CONFIDENCE_EXACT,
                        CONFIG_OWNER,
                        0,
                    ),
                    None => plugin_edge(
                        EdgeType::Listens,
                        project.config_owner_id(),
                        &target,
                        CONFIDENCE_PLACEHOLDER,
                        CONFIG_OWNER,
                        0,
                    ),
                };
                edges.push(edge.with_meta("listener", listener.as_str()));
            }
        }
        edges
    }
}

/// Shared node standing for one named event
pub fn event_node(scope: &ResolveScope, event: &str) -> Arc<Symbol> {
    let mut template = Symbol::new(format!("{}{}", EVENT_PREFIX, event), event, SymbolKind::External);
    template
        .metadata
        .insert("event".to_string(), serde_json::Value::Bool(true));
    scope.table.get_or_create_placeholder(template)
}

fn event_edge(
    file: &FileSketches,
    bindings: &FileBindings,
    reference: &ReferenceSketch,
    edge_type: EdgeType,
    scope: &ResolveScope,
) -> Edge {
    let source = source_id(file, reference.from.as_deref());
    let ctx = bindings.context(file, reference.from.as_deref());

    match &reference.target {
        Target::Name(event) => {
            let target = event_node(scope, event);
            plugin_edge(edge_type, source, &target, CONFIDENCE_EXACT, &file.path, reference.line)
                .with_meta("event", event.as_str())
        }
        Target::Variable(variable) => match ctx.literal(variable, reference.line) {
            Some(event) => {
                let target = event_node(scope, event);
                plugin_edge(
                    edge_type,
                    source,
                    &target,
                    CONFIDENCE_PROPAGATED_KEY,
                    &file.path,
                    reference.line,
                )
                .with_meta("event", event)
                .with_meta("via_propagation", true)
            }
            None => dynamic_event(file, reference, edge_type, source, scope),
        },
        Target::Dynamic(_) => dynamic_event(file, reference, edge_type, source, scope),
    }
}

fn dynamic_event(
    file: &FileSketches,
    reference: &ReferenceSketch,
    edge_type: EdgeType,
    source: SymbolId,
    scope: &ResolveScope,
) -> Edge {
    let target = scope.external(&format!("{}{}", DYNAMIC_PREFIX, reference.target.text()));
    plugin_edge(edge_type, source, &target, CONFIDENCE_COMPUTED, &file.path, reference.line)
        .with_meta("dynamic", true)
        .with_meta("expression", reference.target.text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EnrichmentConfig;
    use crate::core::plugins::testing::table_with;
    use crate::core::sketch::SymbolSketch;

    fn file(path: &str, class: &str, kind: ReferenceKind, event: &str) -> FileSketches {
        let mut file = FileSketches::new(path, "java", ".");
        file.symbols
            .push(SymbolSketch::new(class, None, SymbolKind::Class, 1, 1));
        file.symbols
            .push(SymbolSketch::new("handle", Some(class), SymbolKind::Method, 2, 5));
        let handler = format!("{}.handle", class);
        file.references.push(ReferenceSketch::new(
            kind,
            Target::Name(event.to_string()),
            Some(&handler),
            3,
            9,
        ));
        file
    }

    #[test]
    fn test_emitter_and_listener_share_event_node() {
        let emitter = file("a.java", "Signup", ReferenceKind::EventEmit, "user.created");
        let listener = file("b.java", "Audit", ReferenceKind::EventListen, "user.created");
        let (table, sketches) = table_with(&[&emitter, &listener]);
        let snapshot = table.snapshot();
        let scope = ResolveScope::new(&snapshot, &table, &sketches);
        let project = ProjectContext::new("/tmp/p", EnrichmentConfig::default());

        // Listener analyzed first on purpose
        let listens = EventPlugin.analyze_file(&listener, &scope, &project);
        let emits = EventPlugin.analyze_file(&emitter, &scope, &project);

        assert_eq!(listens[0].edge_type, EdgeType::Listens);
        assert_eq!(emits[0].edge_type, EdgeType::Emits);
        assert_eq!(listens[0].target_id, emits[0].target_id);
        assert_eq!(emits[0].source_id, SymbolId::for_fqn("Signup.handle"));

        let node = table.lookup_id(&emits[0].target_id).unwrap();
        assert_eq!(node.fqn, "event:user.created");
        assert_eq!(node.metadata.get("event"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn test_config_listeners() {
        let listener = file("b.java", "Audit", ReferenceKind::EventListen, "other");
        let (table, sketches) = table_with(&[&listener]);
        let snapshot = table.snapshot();
        let scope = ResolveScope::new(&snapshot, &table, &sketches);
        let mut enrichment = EnrichmentConfig::default();
        enrichment.events.listeners.insert(
            "user.created".to_string(),
            vec!["Audit.handle".to_string(), "Missing.handle".to_string()],
        );
        let project = ProjectContext::new("/tmp/p", enrichment);

        let edges = EventPlugin.analyze_config(&project, &scope);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].source_id, SymbolId::for_fqn("Audit.handle"));
        assert_eq!(edges[0].confidence, 1.0);
        assert_eq!(edges[1].source_id, project.config_owner_id());
        assert_eq!(edges[1].confidence, CONFIDENCE_PLACEHOLDER);
        assert!(edges.iter().all(|e| e.owner() == CONFIG_OWNER));
    }
}
