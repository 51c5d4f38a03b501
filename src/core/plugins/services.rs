//! Service container lookups and constructor injection

use crate::core::model::{Edge, EdgeType, SymbolId};
use crate::core::plugins::{plugin_edge, EnrichmentPlugin, FileBindings, ProjectContext};
use crate::core::resolver::{
    source_id, ResolveScope, CONFIDENCE_COMPUTED, CONFIDENCE_EXACT, DYNAMIC_PREFIX,
};
use crate::core::sketch::{FileSketches, ReferenceKind, ReferenceSketch, Target};
use crate::core::table::{LookupFilter, SymbolLookup};

/// A key recovered through a local literal
pub const CONFIDENCE_PROPAGATED_KEY: f64 = 0.8;

/// Maps container keys to implementations through the project service map
pub struct ServiceContainerPlugin;

impl EnrichmentPlugin for ServiceContainerPlugin {
    fn name(&self) -> &'static str {
        "services"
    }

    fn detect(&self, project: &ProjectContext) -> bool {
        !project.enrichment.services.is_empty()
    }

    fn analyze_file(&self, file: &FileSketches, scope: &ResolveScope, project: &ProjectContext) -> Vec<Edge> {
        let bindings = FileBindings::of(file);
        let mut edges = Vec::new();

        for reference in &file.references {
            match reference.kind {
                ReferenceKind::ServiceLookup => {
                    edges.push(lookup(file, &bindings, reference, scope, project));
                }
                ReferenceKind::AcceptsType if in_constructor(file, reference) => {
                    edges.extend(constructor_injection(file, &bindings, reference, scope, project));
                }
                _ => {}
            }
        }
        edges
    }
}

fn in_constructor(file: &FileSketches, reference: &ReferenceSketch) -> bool {
    reference
        .from
        .as_deref()
        .and_then(|from| file.symbol_at(from))
        .and_then(|s| s.metadata.get("constructor"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// `container.get("key")` style lookups
fn lookup(
    file: &FileSketches,
    bindings: &FileBindings,
    reference: &ReferenceSketch,
    scope: &ResolveScope,
    project: &ProjectContext,
) -> Edge {
    let ctx = bindings.context(file, reference.from.as_deref());
    let source = source_id(file, reference.from.as_deref());

    let (key, base, propagated) = match &reference.target {
        Target::Name(key) => (Some(key.clone()), CONFIDENCE_EXACT, false),
        Target::Variable(variable) => match ctx.literal(variable, reference.line) {
            Some(key) => (Some(key.to_string()), CONFIDENCE_PROPAGATED_KEY, true),
            None => (None, CONFIDENCE_COMPUTED, false),
        },
        Target::Dynamic(_) => (None, CONFIDENCE_COMPUTED, false),
    };

    let Some(key) = key else {
        let target = scope.external(&format!("{}{}", DYNAMIC_PREFIX, reference.target.text()));
        return plugin_edge(EdgeType::Injects, source, &target, CONFIDENCE_COMPUTED, &file.path, reference.line)
            .with_meta("dynamic", true)
            .with_meta("expression", reference.target.text());
    };

    let Some(implementation) = project.enrichment.services.get(&key) else {
        let target = scope.external(&format!("service:{}", key));
        return plugin_edge(EdgeType::Injects, source, &target, CONFIDENCE_COMPUTED, &file.path, reference.line)
            .with_meta("dynamic", true)
            .with_meta("service_key", key.as_str());
    };

    let edge = injection(scope, implementation, source, base, &file.path, reference.line)
        .with_meta("service_key", key.as_str());
    if propagated {
        edge.with_meta("via_propagation", true)
    } else {
        edge
    }
}

/// Constructor parameters typed by a mapped interface
fn constructor_injection(
    file: &FileSketches,
    bindings: &FileBindings,
    reference: &ReferenceSketch,
    scope: &ResolveScope,
    project: &ProjectContext,
) -> Option<Edge> {
    let Target::Name(type_name) = &reference.target else {
        return None;
    };
    let ctx = bindings.context(file, reference.from.as_deref());
    let interface = scope
        .snapshot
        .resolve_filtered(type_name, &ctx, LookupFilter::Types)
        .map(|s| s.fqn.clone())
        .unwrap_or_else(|| ctx.placeholder_fqn(type_name));

    let services = &project.enrichment.services;
    let implementation = services
        .get(&interface)
        .or_else(|| services.get(ctx.short_name(&interface)))?;

    let source = match &ctx.enclosing_type {
        Some(owner) => SymbolId::for_fqn(owner),
        None => source_id(file, reference.from.as_deref()),
    };
    Some(
        injection(scope, implementation, source, CONFIDENCE_EXACT, &file.path, reference.line)
            .with_meta("interface", interface.as_str())
            .with_meta("via", "constructor"),
    )
}

/// INJECTS edge to an implementation; implementations outside the project score half
fn injection(
    scope: &ResolveScope,
    implementation: &str,
    source: SymbolId,
    base: f64,
    owner: &str,
    line: u32,
) -> Edge {
    match scope.snapshot.lookup_defined(implementation) {
        Some(target) => plugin_edge(EdgeType::Injects, source, &target, base, owner, line),
        None => {
            let target = scope.external(implementation);
            plugin_edge(EdgeType::Injects, source, &target, base * 0.5, owner, line)
                .with_meta("external_implementation", true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EnrichmentConfig;
    use crate::core::model::SymbolKind;
    use crate::core::plugins::testing::table_with;
    use crate::core::sketch::{LiteralAssignment, SymbolSketch};

    fn project() -> ProjectContext {
        let mut enrichment = EnrichmentConfig::default();
        enrichment
            .services
            .insert("mailer".to_string(), "app.SmtpMailer".to_string());
        enrichment
            .services
            .insert("cache".to_string(), "vendor.RedisCache".to_string());
        enrichment
            .services
            .insert("app.Mailer".to_string(), "app.SmtpMailer".to_string());
        ProjectContext::new("/tmp/p", enrichment)
    }

    fn app_file() -> FileSketches {
        let mut file = FileSketches::new("app.java", "java", ".");
        file.namespace = Some("app".to_string());
        file.symbols
            .push(SymbolSketch::new("Mailer", None, SymbolKind::Interface, 1, 1));
        file.symbols
            .push(SymbolSketch::new("SmtpMailer", None, SymbolKind::Class, 2, 1));
        file.symbols
            .push(SymbolSketch::new("Signup", None, SymbolKind::Class, 3, 1));
        let mut ctor = SymbolSketch::new("Signup", Some("Signup"), SymbolKind::Method, 4, 5);
        ctor.metadata
            .insert("constructor".to_string(), serde_json::json!(true));
        file.symbols.push(ctor);
        file.symbols
            .push(SymbolSketch::new("run", Some("Signup"), SymbolKind::Method, 6, 5));
        file.assignments.push(LiteralAssignment {
            scope: Some("Signup.run".to_string()),
            variable: "key".to_string(),
            literal: "mailer".to_string(),
            line: 7,
        });
        for (target, line) in [
            (Target::Name("mailer".to_string()), 8),
            (Target::Variable("key".to_string()), 9),
            (Target::Name("cache".to_string()), 10),
            (Target::Dynamic("prefix + name".to_string()), 11),
        ] {
            file.references.push(ReferenceSketch::new(
                ReferenceKind::ServiceLookup,
                target,
                Some("Signup.run"),
                line,
                9,
            ));
        }
        file.references.push(ReferenceSketch::new(
            ReferenceKind::AcceptsType,
            Target::Name("Mailer".to_string()),
            Some("Signup.Signup"),
            4,
            20,
        ));
        file
    }

    #[test]
    fn test_service_lookup_confidences() {
        let file = app_file();
        let (table, sketches) = table_with(&[&file]);
        let snapshot = table.snapshot();
        let scope = ResolveScope::new(&snapshot, &table, &sketches);

        let mut edges = ServiceContainerPlugin.analyze_file(&file, &scope, &project());
        edges.sort_by_key(|e| e.location.line);
        let scores: Vec<_> = edges.iter().map(|e| (e.location.line, e.confidence)).collect();
        assert_eq!(
            scores,
            vec![(4, 1.0), (8, 1.0), (9, 0.8), (10, 0.5), (11, 0.1)]
        );

        let smtp = SymbolId::for_fqn("app.SmtpMailer");
        assert_eq!(edges[0].target_id, smtp);
        assert_eq!(edges[0].source_id, SymbolId::for_fqn("app.Signup"));
        assert_eq!(edges[1].target_id, smtp);
        assert_eq!(
            edges[2].metadata.get("via_propagation"),
            Some(&serde_json::json!(true))
        );
        assert!(edges[4].is_dynamic());
        assert!(edges.iter().all(|e| e.edge_type == EdgeType::Injects));
    }

    #[test]
    fn test_unknown_key_is_dynamic() {
        let mut file = FileSketches::new("x.java", "java", ".");
        file.references.push(ReferenceSketch::new(
            ReferenceKind::ServiceLookup,
            Target::Name("nope".to_string()),
            None,
            1,
            1,
        ));
        let (table, sketches) = table_with(&[&file]);
        let snapshot = table.snapshot();
        let scope = ResolveScope::new(&snapshot, &table, &sketches);

        let edges = ServiceContainerPlugin.analyze_file(&file, &scope, &project());
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].confidence, CONFIDENCE_COMPUTED);
        assert!(edges[0].is_dynamic());
        assert!(table.lookup_fqn("service:nope").unwrap().is_external());
    }
}
