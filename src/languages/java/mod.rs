//! Java collector

use std::collections::HashMap;

use anyhow::Result;
use serde_json::json;
use tree_sitter::Node;

use crate::core::model::SymbolKind;
use crate::core::sketch::{
    FileSketches, ImportSketch, LiteralAssignment, ReferenceKind, ReferenceSketch, Receiver,
    SymbolSketch, Target,
};
use crate::languages::{
    ensure_recoverable, node_text, parse_tree, position, syntax_issues, unquote, LanguageCollector,
};

const ROUTE_ANNOTATIONS: &[(&str, &str)] = &[
    ("GetMapping", "GET"),
    ("PostMapping", "POST"),
    ("PutMapping", "PUT"),
    ("DeleteMapping", "DELETE"),
    ("PatchMapping", "PATCH"),
    ("RequestMapping", "ANY"),
];

const ROUTE_REGISTRARS: &[&str] = &["app", "router", "routes", "server", "http", "spark"];

pub struct JavaCollector;

impl JavaCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JavaCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageCollector for JavaCollector {
    fn language_id(&self) -> &str {
        "java"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".java"]
    }

    fn collect(&self, path: &str, source: &str) -> Result<FileSketches> {
        let tree = parse_tree(tree_sitter_java::LANGUAGE.into(), path, source)?;
        let mut extractor = JavaSketchExtractor::new(path, source);
        extractor.extract(tree.root_node());

        let mut sketches = extractor.file;
        sketches.parse_errors = syntax_issues(&tree);
        ensure_recoverable(&tree, &sketches)?;
        Ok(sketches)
    }
}

/// Walks one Java tree, tracking the enclosing type and callable
struct JavaSketchExtractor<'a> {
    source: &'a str,
    file: FileSketches,
    /// Relative path of the enclosing type
    current_type: Option<String>,
    /// Relative path of the enclosing method or constructor
    current_callable: Option<String>,
    /// Route prefix declared on the enclosing type
    route_prefix: Option<String>,
    /// Relative path -> index into `file.symbols`, for overload folding
    defined: HashMap<String, usize>,
}

impl<'a> JavaSketchExtractor<'a> {
    fn new(path: &str, source: &'a str) -> Self {
        Self {
            source,
            file: FileSketches::new(path, "java", "."),
            current_type: None,
            current_callable: None,
            route_prefix: None,
            defined: HashMap::new(),
        }
    }

    fn extract(&mut self, node: Node) {
        match node.kind() {
            "package_declaration" => self.extract_package(node),
            "import_declaration" => self.extract_import(node),
            "class_declaration" | "interface_declaration" | "enum_declaration" => {
                self.extract_type(node)
            }
            "method_declaration" | "constructor_declaration" => self.extract_callable(node),
            "field_declaration" => self.extract_field(node),
            "local_variable_declaration" => self.extract_local(node),
            "method_invocation" => self.extract_invocation(node),
            "object_creation_expression" => self.extract_creation(node),
            "assignment_expression" => self.extract_assignment(node),
            "field_access" => self.extract_field_access(node, ReferenceKind::Reads),
            _ => self.extract_children(node),
        }
    }

    fn extract_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.extract(child);
        }
    }

    fn extract_package(&mut self, node: Node) {
        let mut cursor = node.walk();
        let name = node
            .named_children(&mut cursor)
            .find(|c| matches!(c.kind(), "scoped_identifier" | "identifier"))
            .map(|c| self.text(c));
        self.file.namespace = name;
    }

    fn extract_import(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        let Some(name) = children
            .iter()
            .find(|c| matches!(c.kind(), "scoped_identifier" | "identifier"))
        else {
            return;
        };
        let wildcard = children.iter().any(|c| c.kind() == "asterisk");
        let mut target = self.text(*name);
        let is_static = (0..node.child_count())
            .filter_map(|i| node.child(i))
            .any(|c| c.kind() == "static");
        // A static member import binds the member; resolve it through its type
        if is_static && !wildcard {
            if let Some((owner, _)) = target.rsplit_once('.') {
                target = owner.to_string();
            }
        }

        let (line, _) = position(node);
        self.file.imports.push(ImportSketch {
            target,
            alias: None,
            wildcard,
            line,
        });
    }

    fn extract_type(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let kind = match node.kind() {
            "interface_declaration" => SymbolKind::Interface,
            _ => SymbolKind::Class,
        };
        let (line, column) = position(node);
        let parent = self.current_type.clone();
        let mut sketch = SymbolSketch::new(&name, parent.as_deref(), kind, line, column);
        sketch.exported = self.has_modifier(node, "public");
        if node.kind() == "enum_declaration" {
            sketch.metadata.insert("enum".to_string(), json!(true));
        }
        let relative = sketch.relative_path(".");

        let mut supertypes = Vec::new();
        if let Some(superclass) = node.child_by_field_name("superclass") {
            for ty in self.type_names(superclass) {
                self.reference(ReferenceKind::Extends, Target::Name(ty.clone()), Some(&relative), superclass);
                supertypes.push(ty);
            }
        }
        if let Some(interfaces) = node.child_by_field_name("interfaces") {
            for ty in self.type_names(interfaces) {
                self.reference(ReferenceKind::Implements, Target::Name(ty.clone()), Some(&relative), interfaces);
                supertypes.push(ty);
            }
        }
        let mut cursor = node.walk();
        let extended: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "extends_interfaces")
            .collect();
        for clause in extended {
            for ty in self.type_names(clause) {
                self.reference(ReferenceKind::Extends, Target::Name(ty.clone()), Some(&relative), clause);
                supertypes.push(ty);
            }
        }
        if !supertypes.is_empty() {
            sketch.metadata.insert("supertypes".to_string(), json!(supertypes));
        }
        let prefix = self.route_annotation(node).map(|(_, path)| path);
        self.define(sketch);

        let old_type = self.current_type.replace(relative);
        let old_callable = self.current_callable.take();
        let old_prefix = std::mem::replace(&mut self.route_prefix, prefix);
        if let Some(body) = node.child_by_field_name("body") {
            self.extract_body(body);
        }
        self.current_type = old_type;
        self.current_callable = old_callable;
        self.route_prefix = old_prefix;
    }

    fn extract_body(&mut self, body: Node) {
        let mut cursor = body.walk();
        let members: Vec<Node> = body.named_children(&mut cursor).collect();
        for member in members {
            match member.kind() {
                "enum_constant" => self.extract_enum_constant(member),
                "enum_body_declarations" => self.extract_body(member),
                _ => self.extract(member),
            }
        }
    }

    fn extract_enum_constant(&mut self, node: Node) {
        if let Some(name) = node.child_by_field_name("name") {
            let (line, column) = position(node);
            let name = self.text(name);
            self.define(SymbolSketch::new(
                &name,
                self.current_type.as_deref(),
                SymbolKind::Constant,
                line,
                column,
            ));
        }
        self.extract_children(node);
    }

    fn extract_callable(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let constructor = node.kind() == "constructor_declaration";
        let (line, column) = position(node);
        let mut sketch = SymbolSketch::new(
            &name,
            self.current_type.as_deref(),
            SymbolKind::Method,
            line,
            column,
        );
        sketch.exported = self.has_modifier(node, "public");
        if constructor {
            sketch.metadata.insert("constructor".to_string(), json!(true));
        }
        if self.has_modifier(node, "static") {
            sketch.metadata.insert("static".to_string(), json!(true));
        }
        let relative = sketch.relative_path(".");

        let mut parameters = Vec::new();
        let mut parameter_types = Vec::new();
        if let Some(params) = node.child_by_field_name("parameters") {
            let mut cursor = params.walk();
            let formal: Vec<Node> = params
                .named_children(&mut cursor)
                .filter(|p| matches!(p.kind(), "formal_parameter" | "spread_parameter"))
                .collect();
            for param in formal {
                if let Some(param_name) = param.child_by_field_name("name") {
                    parameters.push(self.text(param_name));
                }
                if let Some(ty) = param.child_by_field_name("type").and_then(|t| self.type_name(t)) {
                    parameter_types.push(ty.clone());
                    self.reference(ReferenceKind::AcceptsType, Target::Name(ty), Some(&relative), param);
                }
            }
        }
        sketch.metadata.insert("parameters".to_string(), json!(parameters));

        if let Some(ty) = node.child_by_field_name("type").and_then(|t| self.type_name(t)) {
            self.reference(ReferenceKind::ReturnsType, Target::Name(ty), Some(&relative), node);
        }
        let mut cursor = node.walk();
        let throws: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "throws")
            .collect();
        for clause in throws {
            for ty in self.type_names(clause) {
                self.reference(ReferenceKind::Throws, Target::Name(ty), Some(&relative), clause);
            }
        }

        self.method_annotations(node, &name, &relative, &parameter_types);
        self.define(sketch);

        let old_callable = self.current_callable.replace(relative);
        if let Some(body) = node.child_by_field_name("body") {
            self.extract(body);
        }
        self.current_callable = old_callable;
    }

    /// Route and event-listener annotations on a method
    fn method_annotations(&mut self, node: Node, name: &str, relative: &str, parameter_types: &[String]) {
        if let Some((method, path)) = self.route_annotation(node) {
            let full = join_route(self.route_prefix.as_deref(), &path);
            let reference = ReferenceSketch::new(
                ReferenceKind::Route,
                Target::Name(name.to_string()),
                Some(relative),
                position(node).0,
                position(node).1,
            )
            .with_extra("annotation", true)
            .with_extra("method", method)
            .with_extra("path", full);
            self.file.references.push(reference);
        }

        for annotation in self.annotations(node) {
            if self.annotation_name(annotation) != "EventListener" {
                continue;
            }
            let event = self
                .annotation_value(annotation)
                .map(|value| self.event_target(value))
                .or_else(|| parameter_types.first().cloned().map(Target::Name));
            if let Some(target) = event {
                self.reference(ReferenceKind::EventListen, target, Some(relative), annotation);
            }
        }
    }

    fn extract_field(&mut self, node: Node) {
        let field_type = node
            .child_by_field_name("type")
            .and_then(|t| self.type_name(t));
        let constant = self.has_modifier(node, "static") && self.has_modifier(node, "final");
        let exported = self.has_modifier(node, "public");

        let mut cursor = node.walk();
        let declarators: Vec<Node> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        for declarator in declarators {
            let Some(name_node) = declarator.child_by_field_name("name") else {
                continue;
            };
            let name = self.text(name_node);
            let (line, column) = position(declarator);
            let kind = if constant {
                SymbolKind::Constant
            } else {
                SymbolKind::Property
            };
            let mut sketch = SymbolSketch::new(&name, self.current_type.as_deref(), kind, line, column);
            sketch.exported = exported;
            if let Some(ty) = &field_type {
                sketch.metadata.insert("type".to_string(), json!(ty));
            }
            self.define(sketch);

            if let Some(value) = declarator.child_by_field_name("value") {
                if let Some(literal) = self.string_literal(value) {
                    // Class-level literals are visible from the type's own scope
                    self.file.assignments.push(LiteralAssignment {
                        scope: self.current_type.clone(),
                        variable: name.clone(),
                        literal,
                        line,
                    });
                }
                self.extract(value);
            }
        }
    }

    fn extract_local(&mut self, node: Node) {
        let mut cursor = node.walk();
        let declarators: Vec<Node> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        for declarator in declarators {
            let name = declarator
                .child_by_field_name("name")
                .map(|n| self.text(n));
            let Some(value) = declarator.child_by_field_name("value") else {
                continue;
            };
            if let (Some(name), Some(literal)) = (name, self.string_literal(value)) {
                self.file.assignments.push(LiteralAssignment {
                    scope: self.from(),
                    variable: name,
                    literal,
                    line: position(declarator).0,
                });
            }
            self.extract(value);
        }
    }

    fn extract_invocation(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return self.extract_children(node);
        };
        let name = self.text(name_node);
        let object = node.child_by_field_name("object");
        let object_text = object.map(|o| self.text(o)).unwrap_or_default();
        let args = self.arguments(node);

        let handled = match name.as_str() {
            "forName" if object_text == "Class" => {
                let target = args
                    .first()
                    .map(|a| self.value_target(*a))
                    .unwrap_or_else(|| Target::Dynamic(self.text(node)));
                self.reference(ReferenceKind::Instantiate, target, None, node);
                true
            }
            "getBean" => self.lookup_reference(ReferenceKind::ServiceLookup, &args, node),
            "get" | "resolve" if object_text.to_lowercase().contains("container") => {
                self.lookup_reference(ReferenceKind::ServiceLookup, &args, node)
            }
            "publishEvent" | "emit" | "dispatch" | "fire" => {
                self.event_reference(ReferenceKind::EventEmit, &args, node)
            }
            "on" | "addListener" | "subscribe" | "listen" => {
                self.event_reference(ReferenceKind::EventListen, &args, node)
            }
            "get" | "post" | "put" | "delete" | "patch"
                if args.len() == 2
                    && (object.is_none() || ROUTE_REGISTRARS.contains(&object_text.to_lowercase().as_str())) =>
            {
                self.route_registration(&name, &args, node)
            }
            _ => false,
        };

        if !handled {
            let receiver = match object {
                None => Receiver::None,
                Some(o) if matches!(o.kind(), "this" | "super") => Receiver::SelfRef,
                Some(o) if o.kind() == "identifier" && starts_uppercase(&object_text) => {
                    Receiver::Type(self.text(o))
                }
                Some(_) => Receiver::Expression(object_text),
            };
            let (line, column) = position(name_node);
            let reference = ReferenceSketch::new(
                ReferenceKind::Call,
                Target::Name(name),
                self.from().as_deref(),
                line,
                column,
            )
            .with_receiver(receiver);
            self.file.references.push(reference);
        }

        if let Some(object) = object {
            self.extract(object);
        }
        for arg in args {
            self.extract(arg);
        }
    }

    fn lookup_reference(&mut self, kind: ReferenceKind, args: &[Node], node: Node) -> bool {
        let Some(first) = args.first() else {
            return false;
        };
        let target = match first.kind() {
            // getBean(Mailer.class) asks for a type, not a key
            "class_literal" => return false,
            _ => self.value_target(*first),
        };
        self.reference(kind, target, None, node);
        true
    }

    fn event_reference(&mut self, kind: ReferenceKind, args: &[Node], node: Node) -> bool {
        let Some(first) = args.first() else {
            return false;
        };
        let target = self.event_target(*first);
        self.reference(kind, target, None, node);
        true
    }

    fn route_registration(&mut self, verb: &str, args: &[Node], node: Node) -> bool {
        let Some(path) = self.string_literal(args[0]) else {
            return false;
        };
        let handler = args[1];
        let target = match handler.kind() {
            "method_reference" => Target::Name(self.text(handler).replace("::", ".")),
            "identifier" => Target::Name(self.text(handler)),
            _ => Target::Dynamic(self.text(handler)),
        };
        let (line, column) = position(node);
        let reference = ReferenceSketch::new(ReferenceKind::Route, target, self.from().as_deref(), line, column)
            .with_extra("method", verb.to_uppercase())
            .with_extra("path", path);
        self.file.references.push(reference);
        true
    }

    fn extract_creation(&mut self, node: Node) {
        if let Some(ty) = node.child_by_field_name("type").and_then(|t| self.type_name(t)) {
            self.reference(ReferenceKind::Instantiate, Target::Name(ty), None, node);
        }
        self.extract_children(node);
    }

    fn extract_assignment(&mut self, node: Node) {
        match node.child_by_field_name("left") {
            Some(left) if left.kind() == "field_access" => {
                self.extract_field_access(left, ReferenceKind::Writes)
            }
            Some(left) => self.extract(left),
            None => {}
        }
        if let Some(right) = node.child_by_field_name("right") {
            if let (Some(left), Some(literal)) =
                (node.child_by_field_name("left"), self.string_literal(right))
            {
                if left.kind() == "identifier" {
                    self.file.assignments.push(LiteralAssignment {
                        scope: self.from(),
                        variable: self.text(left),
                        literal,
                        line: position(node).0,
                    });
                }
            }
            self.extract(right);
        }
    }

    /// `this.field` reads and writes; other field accesses only recurse
    fn extract_field_access(&mut self, node: Node, kind: ReferenceKind) {
        let object = node.child_by_field_name("object");
        match (object, node.child_by_field_name("field")) {
            (Some(object), Some(field)) if object.kind() == "this" => {
                let name = self.text(field);
                self.reference(kind, Target::Name(name), None, field);
            }
            (Some(object), _) => self.extract(object),
            _ => {}
        }
    }

    // ==================== Helpers ====================

    fn define(&mut self, sketch: SymbolSketch) {
        let relative = sketch.relative_path(".");
        if let Some(&index) = self.defined.get(&relative) {
            // Overloads share one symbol
            let existing = &mut self.file.symbols[index];
            let count = existing
                .metadata
                .get("overloads")
                .and_then(|v| v.as_u64())
                .unwrap_or(1);
            existing
                .metadata
                .insert("overloads".to_string(), json!(count + 1));
            return;
        }
        self.defined.insert(relative, self.file.symbols.len());
        self.file.symbols.push(sketch);
    }

    fn reference(&mut self, kind: ReferenceKind, target: Target, from: Option<&str>, at: Node) {
        let (line, column) = position(at);
        let from = from.map(str::to_string).or_else(|| self.from());
        self.file
            .references
            .push(ReferenceSketch::new(kind, target, from.as_deref(), line, column));
    }

    fn from(&self) -> Option<String> {
        self.current_callable
            .clone()
            .or_else(|| self.current_type.clone())
    }

    fn text(&self, node: Node) -> String {
        node_text(node, self.source).to_string()
    }

    fn arguments<'t>(&self, node: Node<'t>) -> Vec<Node<'t>> {
        let Some(args) = node.child_by_field_name("arguments") else {
            return Vec::new();
        };
        let mut cursor = args.walk();
        args.named_children(&mut cursor).collect()
    }

    fn string_literal(&self, node: Node) -> Option<String> {
        if node.kind() != "string_literal" {
            return None;
        }
        unquote(node_text(node, self.source)).map(str::to_string)
    }

    /// Literal, variable, or anything else
    fn value_target(&self, node: Node) -> Target {
        if let Some(literal) = self.string_literal(node) {
            return Target::Name(literal);
        }
        match node.kind() {
            "identifier" => Target::Variable(self.text(node)),
            _ => Target::Dynamic(self.text(node)),
        }
    }

    /// Events are named by a literal or by the class of the event object
    fn event_target(&self, node: Node) -> Target {
        match node.kind() {
            "object_creation_expression" => node
                .child_by_field_name("type")
                .and_then(|t| self.type_name(t))
                .map(Target::Name)
                .unwrap_or_else(|| Target::Dynamic(self.text(node))),
            "class_literal" => {
                let text = self.text(node);
                Target::Name(text.trim_end_matches(".class").to_string())
            }
            _ => self.value_target(node),
        }
    }

    /// Name of a reference type, without generics; None for primitives
    fn type_name(&self, node: Node) -> Option<String> {
        match node.kind() {
            "type_identifier" | "scoped_type_identifier" => Some(self.text(node)),
            "generic_type" => {
                let mut cursor = node.walk();
                let base = node
                    .named_children(&mut cursor)
                    .find(|c| matches!(c.kind(), "type_identifier" | "scoped_type_identifier"));
                base.map(|b| self.text(b))
            }
            "array_type" => node
                .child_by_field_name("element")
                .and_then(|e| self.type_name(e)),
            _ => None,
        }
    }

    /// Every type named in a clause such as `extends A` or `implements B, C`
    fn type_names(&self, clause: Node) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = clause.walk();
        for child in clause.named_children(&mut cursor) {
            match self.type_name(child) {
                Some(name) => names.push(name),
                None if child.kind() == "type_list" => names.extend(self.type_names(child)),
                None => {}
            }
        }
        names
    }

    fn modifiers<'t>(&self, node: Node<'t>) -> Option<Node<'t>> {
        let mut cursor = node.walk();
        let found = node
            .named_children(&mut cursor)
            .find(|c| c.kind() == "modifiers");
        found
    }

    fn has_modifier(&self, node: Node, modifier: &str) -> bool {
        let Some(modifiers) = self.modifiers(node) else {
            return false;
        };
        (0..modifiers.child_count())
            .filter_map(|i| modifiers.child(i))
            .any(|c| c.kind() == modifier)
    }

    fn annotations<'t>(&self, node: Node<'t>) -> Vec<Node<'t>> {
        let Some(modifiers) = self.modifiers(node) else {
            return Vec::new();
        };
        let mut cursor = modifiers.walk();
        modifiers
            .named_children(&mut cursor)
            .filter(|c| matches!(c.kind(), "annotation" | "marker_annotation"))
            .collect()
    }

    fn annotation_name(&self, annotation: Node) -> String {
        annotation
            .child_by_field_name("name")
            .map(|n| self.text(n))
            .map(|n| n.rsplit('.').next().unwrap_or_default().to_string())
            .unwrap_or_default()
    }

    /// The single or `value =` argument of an annotation
    fn annotation_value<'t>(&self, annotation: Node<'t>) -> Option<Node<'t>> {
        let args = annotation.child_by_field_name("arguments")?;
        let mut cursor = args.walk();
        let children: Vec<Node> = args.named_children(&mut cursor).collect();
        for child in children {
            if child.kind() == "element_value_pair" {
                let key = child.child_by_field_name("key").map(|k| self.text(k));
                if matches!(key.as_deref(), Some("value") | Some("path")) {
                    return child.child_by_field_name("value");
                }
            } else {
                return Some(child);
            }
        }
        None
    }

    /// HTTP method and path of a mapping annotation
    fn route_annotation(&self, node: Node) -> Option<(String, String)> {
        for annotation in self.annotations(node) {
            let name = self.annotation_name(annotation);
            let Some((_, method)) = ROUTE_ANNOTATIONS.iter().find(|(a, _)| *a == name) else {
                continue;
            };
            let path = self
                .annotation_value(annotation)
                .and_then(|v| self.string_literal(v))
                .unwrap_or_default();
            return Some((method.to_string(), path));
        }
        None
    }
}

fn starts_uppercase(text: &str) -> bool {
    text.chars().next().map(char::is_uppercase).unwrap_or(false)
}

fn join_route(prefix: Option<&str>, path: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!(
            "{}/{}",
            prefix.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
        .trim_end_matches('/')
        .to_string(),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(source: &str) -> FileSketches {
        JavaCollector::new().collect("src/App.java", source).unwrap()
    }

    fn refs(file: &FileSketches, kind: ReferenceKind) -> Vec<&ReferenceSketch> {
        file.references.iter().filter(|r| r.kind == kind).collect()
    }

    #[test]
    fn test_java_collector_identity() {
        let java = JavaCollector::default();
        assert_eq!(java.language_id(), "java");
        assert!(java.file_extensions().contains(&".java"));
        assert_eq!(java.separator(), ".");
    }

    #[test]
    fn test_package_and_imports() {
        let file = collect(
            r#"
package com.example.app;

import java.util.List;
import com.example.model.*;
import static java.util.Collections.sort;
"#,
        );
        assert_eq!(file.namespace.as_deref(), Some("com.example.app"));
        assert_eq!(file.imports.len(), 3);
        assert_eq!(file.imports[0].target, "java.util.List");
        assert!(file.imports[1].wildcard);
        assert_eq!(file.imports[1].target, "com.example.model");
        assert_eq!(file.imports[2].target, "java.util.Collections");
    }

    #[test]
    fn test_types_and_supertypes() {
        let file = collect(
            r#"
public class Child extends Base implements Runnable, Comparable<Child> {
    static class Inner {}
}
interface Shape extends Drawable {}
enum Color { RED, GREEN }
"#,
        );
        let child = file.symbol_at("Child").unwrap();
        assert_eq!(child.kind, SymbolKind::Class);
        assert!(child.exported);
        assert_eq!(
            child.metadata.get("supertypes"),
            Some(&json!(["Base", "Runnable", "Comparable"]))
        );
        assert!(file.symbol_at("Child.Inner").is_some());
        assert_eq!(file.symbol_at("Shape").unwrap().kind, SymbolKind::Interface);
        assert_eq!(file.symbol_at("Color.RED").unwrap().kind, SymbolKind::Constant);

        let extends = refs(&file, ReferenceKind::Extends);
        assert_eq!(extends.len(), 2);
        assert_eq!(extends[0].target, Target::Name("Base".to_string()));
        assert_eq!(extends[0].from.as_deref(), Some("Child"));
        assert_eq!(refs(&file, ReferenceKind::Implements).len(), 2);
    }

    #[test]
    fn test_methods_constructors_and_overloads() {
        let file = collect(
            r#"
public class Service {
    private final Repo repo;
    public static final String NAME = "svc";

    public Service(Repo repo) { this.repo = repo; }

    public User find(long id) throws NotFound { return repo.load(id); }
    public User find(String name) { return null; }
}
"#,
        );
        let ctor = file.symbol_at("Service.Service").unwrap();
        assert_eq!(ctor.metadata.get("constructor"), Some(&json!(true)));
        let find = file.symbol_at("Service.find").unwrap();
        assert_eq!(find.metadata.get("overloads"), Some(&json!(2)));
        assert_eq!(file.symbol_at("Service.repo").unwrap().kind, SymbolKind::Property);
        assert_eq!(file.symbol_at("Service.NAME").unwrap().kind, SymbolKind::Constant);

        assert_eq!(refs(&file, ReferenceKind::Throws)[0].target.text(), "NotFound");
        assert!(refs(&file, ReferenceKind::AcceptsType)
            .iter()
            .any(|r| r.target.text() == "Repo" && r.from.as_deref() == Some("Service.Service")));
        assert!(refs(&file, ReferenceKind::ReturnsType)
            .iter()
            .all(|r| r.target.text() == "User"));
        let writes = refs(&file, ReferenceKind::Writes);
        assert_eq!(writes[0].target.text(), "repo");
        assert_eq!(file.assignments[0].variable, "NAME");
    }

    #[test]
    fn test_call_receivers() {
        let file = collect(
            r#"
class Worker extends Base {
    void run() {
        helper();
        this.step();
        super.start();
        Util.format();
        items.add(new Item());
    }
}
"#,
        );
        let calls = refs(&file, ReferenceKind::Call);
        let receivers: Vec<_> = calls.iter().map(|c| (c.target.text(), c.receiver.clone())).collect();
        assert_eq!(
            receivers,
            vec![
                ("helper", Receiver::None),
                ("step", Receiver::SelfRef),
                ("start", Receiver::SelfRef),
                ("format", Receiver::Type("Util".to_string())),
                ("add", Receiver::Expression("items".to_string())),
            ]
        );
        assert!(calls.iter().all(|c| c.from.as_deref() == Some("Worker.run")));
        assert_eq!(refs(&file, ReferenceKind::Instantiate)[0].target.text(), "Item");
    }

    #[test]
    fn test_reflection_with_local_literal() {
        let file = collect(
            r#"
class Loader {
    Object make(String other) throws Exception {
        String cls = "com.example.Plugin";
        Object a = Class.forName(cls);
        Object b = Class.forName("com.example.Direct");
        return Class.forName(other + "Impl");
    }
}
"#,
        );
        let made = refs(&file, ReferenceKind::Instantiate);
        assert_eq!(made[0].target, Target::Variable("cls".to_string()));
        assert_eq!(made[1].target, Target::Name("com.example.Direct".to_string()));
        assert!(matches!(made[2].target, Target::Dynamic(_)));
        assert_eq!(file.assignments.len(), 1);
        assert_eq!(file.assignments[0].scope.as_deref(), Some("Loader.make"));
        assert!(refs(&file, ReferenceKind::Call).is_empty());
    }

    #[test]
    fn test_enrichment_references() {
        let file = collect(
            r#"
@RestController
@RequestMapping("/api")
class Users {
    @GetMapping("/users")
    public List<User> list() {
        Mailer m = context.getBean("mailer");
        publisher.publishEvent(new UserListed());
        bus.emit("users.listed");
        return null;
    }

    @EventListener
    public void onCreated(UserCreated event) {}
}
"#,
        );
        let route = refs(&file, ReferenceKind::Route)[0];
        assert_eq!(route.extra_str("path"), Some("/api/users"));
        assert_eq!(route.extra_str("method"), Some("GET"));
        assert_eq!(route.from.as_deref(), Some("Users.list"));

        assert_eq!(refs(&file, ReferenceKind::ServiceLookup)[0].target.text(), "mailer");
        let emits: Vec<_> = refs(&file, ReferenceKind::EventEmit)
            .iter()
            .map(|r| r.target.text().to_string())
            .collect();
        assert_eq!(emits, vec!["UserListed", "users.listed"]);
        let listens = refs(&file, ReferenceKind::EventListen);
        assert_eq!(listens[0].target.text(), "UserCreated");
        assert_eq!(listens[0].from.as_deref(), Some("Users.onCreated"));
    }

    #[test]
    fn test_syntax_errors_are_recoverable() {
        let file = collect("public class Broken { void run() { int x = ; } }");
        assert!(!file.parse_errors.is_empty());
        assert!(file.symbol_at("Broken").is_some());
    }

    #[test]
    fn test_join_route() {
        assert_eq!(join_route(Some("/api/"), "/users"), "/api/users");
        assert_eq!(join_route(Some("/api"), ""), "/api");
        assert_eq!(join_route(None, "/x"), "/x");
    }
}
