//! Go collector

use std::collections::HashSet;

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

/// Predeclared identifiers; calls and type uses of these never resolve
const BUILTINS: &[&str] = &[
    "append", "cap", "clear", "close", "complex", "copy", "delete", "imag", "len", "make", "max",
    "min", "new", "panic", "print", "println", "real", "recover", "any", "bool", "byte",
    "comparable", "complex64", "complex128", "error", "float32", "float64", "int", "int8",
    "int16", "int32", "int64", "rune", "string", "uint", "uint8", "uint16", "uint32", "uint64",
    "uintptr",
];

const HTTP_VERBS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

pub struct GoCollector;

impl GoCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GoCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageCollector for GoCollector {
    fn language_id(&self) -> &str {
        "go"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".go"]
    }

    fn collect(&self, path: &str, source: &str) -> Result<FileSketches> {
        let tree = parse_tree(tree_sitter_go::LANGUAGE.into(), path, source)?;
        let mut extractor = GoSketchExtractor::new(path, source);
        extractor.extract(tree.root_node());

        let mut sketches = extractor.file;
        sketches.parse_errors = syntax_issues(&tree);
        ensure_recoverable(&tree, &sketches)?;
        Ok(sketches)
    }
}

struct GoSketchExtractor<'a> {
    source: &'a str,
    file: FileSketches,
    /// Local names bound by imports
    packages: HashSet<String>,
    current_func: Option<String>,
    /// Receiver variable of the enclosing method (`s` in `func (s *Server)`)
    current_receiver: Option<String>,
}

impl<'a> GoSketchExtractor<'a> {
    fn new(path: &str, source: &'a str) -> Self {
        Self {
            source,
            file: FileSketches::new(path, "go", "."),
            packages: HashSet::new(),
            current_func: None,
            current_receiver: None,
        }
    }

    fn extract(&mut self, node: Node) {
        match node.kind() {
            "package_clause" => self.extract_package(node),
            "import_spec" => self.extract_import_spec(node),
            "function_declaration" => self.extract_function(node),
            "method_declaration" => self.extract_method(node),
            "type_spec" => self.extract_type_spec(node),
            "const_spec" => self.extract_const_spec(node),
            "var_spec" => self.extract_var_spec(node),
            "short_var_declaration" | "assignment_statement" => self.extract_assignment(node),
            "call_expression" => self.extract_call(node),
            "composite_literal" => self.extract_composite(node),
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
            .find(|c| c.kind() == "package_identifier")
            .map(|c| self.text(c));
        self.file.namespace = name;
    }

    fn extract_import_spec(&mut self, node: Node) {
        let Some(path) = node
            .child_by_field_name("path")
            .and_then(|p| unquote(node_text(p, self.source)))
        else {
            return;
        };
        let target = path.rsplit('/').next().unwrap_or(path).to_string();
        let (alias, wildcard) = match node.child_by_field_name("name") {
            Some(name) => match name.kind() {
                "dot" => (None, true),
                // Side-effect import binds nothing
                "blank_identifier" => return,
                _ => (Some(self.text(name)), false),
            },
            None => (None, false),
        };
        if !wildcard {
            self.packages
                .insert(alias.clone().unwrap_or_else(|| target.clone()));
        }

        let (line, _) = position(node);
        let mut import = ImportSketch {
            target,
            alias,
            wildcard,
            line,
        };
        if import.alias.as_deref() == Some(import.target.as_str()) {
            import.alias = None;
        }
        self.file.imports.push(import);
    }

    fn extract_function(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let (line, column) = position(node);
        let mut sketch = SymbolSketch::new(&name, None, SymbolKind::Function, line, column);
        sketch.exported = is_exported(&name);
        self.extract_callable(node, sketch, None);
    }

    fn extract_method(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let receiver = node.child_by_field_name("receiver");
        let (receiver_type, receiver_var) = receiver
            .map(|r| self.receiver(r))
            .unwrap_or((None, None));
        let (line, column) = position(node);
        let mut sketch = SymbolSketch::new(
            &name,
            receiver_type.as_deref(),
            SymbolKind::Method,
            line,
            column,
        );
        sketch.exported = is_exported(&name);
        if let Some(receiver) = receiver {
            if receiver_is_pointer(receiver) {
                sketch.metadata.insert("pointer_receiver".to_string(), json!(true));
            }
        }
        self.extract_callable(node, sketch, receiver_var);
    }

    /// Shared by functions and methods: signature references, then the body
    fn extract_callable(&mut self, node: Node, mut sketch: SymbolSketch, receiver_var: Option<String>) {
        let relative = sketch.relative_path(".");

        let mut parameters = Vec::new();
        if let Some(params) = node.child_by_field_name("parameters") {
            for (names, ty) in self.parameter_declarations(params) {
                parameters.extend(names);
                if let Some(ty) = ty {
                    self.reference(ReferenceKind::AcceptsType, Target::Name(ty), Some(&relative), params);
                }
            }
        }
        sketch.metadata.insert("parameters".to_string(), json!(parameters));

        if let Some(result) = node.child_by_field_name("result") {
            let types: Vec<String> = match result.kind() {
                "parameter_list" => self
                    .parameter_declarations(result)
                    .into_iter()
                    .filter_map(|(_, ty)| ty)
                    .collect(),
                _ => self.type_name(result).into_iter().collect(),
            };
            for ty in types.into_iter().filter(|t| !BUILTINS.contains(&t.as_str())) {
                self.reference(ReferenceKind::ReturnsType, Target::Name(ty), Some(&relative), result);
            }
        }
        self.file.symbols.push(sketch);

        let old_func = self.current_func.replace(relative);
        let old_receiver = std::mem::replace(&mut self.current_receiver, receiver_var);
        if let Some(body) = node.child_by_field_name("body") {
            self.extract(body);
        }
        self.current_func = old_func;
        self.current_receiver = old_receiver;
    }

    fn extract_type_spec(&mut self, node: Node) {
        let (Some(name_node), Some(type_node)) =
            (node.child_by_field_name("name"), node.child_by_field_name("type"))
        else {
            return;
        };
        let name = self.text(name_node);
        let kind = match type_node.kind() {
            "interface_type" => SymbolKind::Interface,
            _ => SymbolKind::Class,
        };
        let (line, column) = position(node);
        let mut sketch = SymbolSketch::new(&name, None, kind, line, column);
        sketch.exported = is_exported(&name);

        let supertypes = match type_node.kind() {
            "struct_type" => self.extract_struct(&name, type_node),
            "interface_type" => self.extract_interface(&name, type_node),
            _ => {
                sketch
                    .metadata
                    .insert("underlying".to_string(), json!(self.text(type_node)));
                Vec::new()
            }
        };
        if !supertypes.is_empty() {
            sketch.metadata.insert("supertypes".to_string(), json!(supertypes));
        }
        // Members were pushed first; keep the type ahead of them
        let index = self
            .file
            .symbols
            .iter()
            .position(|s| s.parent.as_deref() == Some(name.as_str()))
            .unwrap_or(self.file.symbols.len());
        self.file.symbols.insert(index, sketch);
    }

    /// Fields become properties; embedded types become mixins
    fn extract_struct(&mut self, owner: &str, node: Node) -> Vec<String> {
        let mut embedded = Vec::new();
        let mut cursor = node.walk();
        let Some(list) = node
            .named_children(&mut cursor)
            .find(|c| c.kind() == "field_declaration_list")
        else {
            return embedded;
        };
        let mut cursor = list.walk();
        let fields: Vec<Node> = list
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "field_declaration")
            .collect();

        for field in fields {
            let field_type = field.child_by_field_name("type");
            let mut names_cursor = field.walk();
            let names: Vec<Node> = field
                .children_by_field_name("name", &mut names_cursor)
                .collect();

            if names.is_empty() {
                if let Some(ty) = field_type.and_then(|t| self.type_name(t)) {
                    self.reference(ReferenceKind::UsesMixin, Target::Name(ty.clone()), Some(owner), field);
                    embedded.push(ty);
                }
                continue;
            }
            for name in names {
                let name_text = self.text(name);
                let (line, column) = position(name);
                let mut sketch = SymbolSketch::new(&name_text, Some(owner), SymbolKind::Property, line, column);
                sketch.exported = is_exported(&name_text);
                if let Some(ty) = field_type {
                    sketch.metadata.insert("type".to_string(), json!(self.text(ty)));
                }
                self.file.symbols.push(sketch);
            }
        }
        embedded
    }

    /// Method elements become methods; embedded interfaces are extended
    fn extract_interface(&mut self, owner: &str, node: Node) -> Vec<String> {
        let mut extended = Vec::new();
        let mut cursor = node.walk();
        let elements: Vec<Node> = node.named_children(&mut cursor).collect();

        for element in elements {
            match element.kind() {
                "method_elem" | "method_spec" => {
                    let Some(name) = element.child_by_field_name("name") else {
                        continue;
                    };
                    let name_text = self.text(name);
                    let (line, column) = position(element);
                    let mut sketch = SymbolSketch::new(&name_text, Some(owner), SymbolKind::Method, line, column);
                    sketch.exported = is_exported(&name_text);
                    sketch.metadata.insert("abstract".to_string(), json!(true));
                    self.file.symbols.push(sketch);
                }
                "type_elem" | "constraint_elem" | "interface_type_name" | "type_identifier"
                | "qualified_type" => {
                    let types = match self.type_name(element) {
                        Some(ty) => vec![ty],
                        None => {
                            let mut inner = element.walk();
                            let children: Vec<Node> = element.named_children(&mut inner).collect();
                            children.into_iter().filter_map(|c| self.type_name(c)).collect()
                        }
                    };
                    for ty in types {
                        self.reference(ReferenceKind::Extends, Target::Name(ty.clone()), Some(owner), element);
                        extended.push(ty);
                    }
                }
                _ => {}
            }
        }
        extended
    }

    fn extract_const_spec(&mut self, node: Node) {
        let mut cursor = node.walk();
        let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
        let values = node
            .child_by_field_name("value")
            .map(|v| self.expression_list(v))
            .unwrap_or_default();

        for (index, name) in names.iter().enumerate() {
            let name_text = self.text(*name);
            let (line, column) = position(*name);
            if self.current_func.is_none() {
                let mut sketch = SymbolSketch::new(&name_text, None, SymbolKind::Constant, line, column);
                sketch.exported = is_exported(&name_text);
                self.file.symbols.push(sketch);
            }
            if let Some(literal) = values.get(index).and_then(|v| self.string_literal(*v)) {
                self.file.assignments.push(LiteralAssignment {
                    scope: self.current_func.clone(),
                    variable: name_text,
                    literal,
                    line,
                });
            }
        }
        for value in values {
            self.extract(value);
        }
    }

    fn extract_var_spec(&mut self, node: Node) {
        let mut cursor = node.walk();
        let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
        let values = node
            .child_by_field_name("value")
            .map(|v| self.expression_list(v))
            .unwrap_or_default();
        self.bind_literals(&names, &values, position(node).0);
        if let Some(ty) = node.child_by_field_name("type") {
            self.extract(ty);
        }
        for value in values {
            self.extract(value);
        }
    }

    fn extract_assignment(&mut self, node: Node) {
        let left = node
            .child_by_field_name("left")
            .map(|l| self.expression_list(l))
            .unwrap_or_default();
        let right = node
            .child_by_field_name("right")
            .map(|r| self.expression_list(r))
            .unwrap_or_default();
        let names: Vec<Node> = left
            .iter()
            .copied()
            .filter(|n| n.kind() == "identifier")
            .collect();
        if names.len() == left.len() {
            self.bind_literals(&names, &right, position(node).0);
        }
        for value in right {
            self.extract(value);
        }
    }

    fn bind_literals(&mut self, names: &[Node], values: &[Node], line: u32) {
        for (name, value) in names.iter().zip(values) {
            if let Some(literal) = self.string_literal(*value) {
                self.file.assignments.push(LiteralAssignment {
                    scope: self.current_func.clone(),
                    variable: self.text(*name),
                    literal,
                    line,
                });
            }
        }
    }

    fn extract_call(&mut self, node: Node) {
        let Some(function) = node.child_by_field_name("function") else {
            return self.extract_children(node);
        };
        let args = self.arguments(node);

        match function.kind() {
            "identifier" => {
                let name = self.text(function);
                if !BUILTINS.contains(&name.as_str()) {
                    self.call(Target::Name(name), Receiver::None, function);
                }
            }
            "selector_expression" => {
                if let (Some(operand), Some(field)) = (
                    function.child_by_field_name("operand"),
                    function.child_by_field_name("field"),
                ) {
                    let operand_text = self.text(operand);
                    let method = self.text(field);
                    if !self.enrichment_call(&operand_text, &method, &args, node) {
                        let (target, receiver) = if self.packages.contains(&operand_text) {
                            (format!("{}.{}", operand_text, method), Receiver::None)
                        } else if self.current_receiver.as_deref() == Some(operand_text.as_str()) {
                            (method, Receiver::SelfRef)
                        } else {
                            (method, Receiver::Expression(operand_text))
                        };
                        self.call(Target::Name(target), receiver, field);
                    }
                    self.extract(operand);
                }
            }
            _ => self.extract(function),
        }

        for arg in args {
            self.extract(arg);
        }
    }

    /// Routes, events and container lookups; true when the call was consumed
    fn enrichment_call(&mut self, operand: &str, method: &str, args: &[Node], node: Node) -> bool {
        let receiver = operand.to_lowercase();
        match method {
            "Get" | "Resolve" | "MustGet" | "MustResolve"
                if receiver.contains("container") || receiver == "di" || receiver.contains("injector") =>
            {
                let Some(first) = args.first() else {
                    return false;
                };
                let target = self.value_target(*first);
                self.reference(ReferenceKind::ServiceLookup, target, None, node);
                true
            }
            "Publish" | "Emit" | "Dispatch" | "Fire" => self.event(ReferenceKind::EventEmit, args, node),
            "Subscribe" | "On" | "Listen" | "AddListener" => {
                self.event(ReferenceKind::EventListen, args, node)
            }
            "HandleFunc" | "Handle" => self.route("ANY", args, node),
            _ => {
                let verb = method.to_uppercase();
                if HTTP_VERBS.contains(&verb.as_str()) && args.len() == 2 {
                    self.route(&verb, args, node)
                } else {
                    false
                }
            }
        }
    }

    fn event(&mut self, kind: ReferenceKind, args: &[Node], node: Node) -> bool {
        let Some(first) = args.first() else {
            return false;
        };
        let target = match first.kind() {
            "composite_literal" => first
                .child_by_field_name("type")
                .and_then(|t| self.type_name(t))
                .map(Target::Name)
                .unwrap_or_else(|| Target::Dynamic(self.text(*first))),
            "unary_expression" => match first.child_by_field_name("operand") {
                Some(inner) if inner.kind() == "composite_literal" => inner
                    .child_by_field_name("type")
                    .and_then(|t| self.type_name(t))
                    .map(Target::Name)
                    .unwrap_or_else(|| Target::Dynamic(self.text(*first))),
                _ => self.value_target(*first),
            },
            _ => self.value_target(*first),
        };
        self.reference(kind, target, None, node);
        true
    }

    fn route(&mut self, verb: &str, args: &[Node], node: Node) -> bool {
        let (Some(path), Some(handler)) = (
            args.first().and_then(|a| self.string_literal(*a)),
            args.get(1),
        ) else {
            return false;
        };
        let target = match handler.kind() {
            "identifier" => Target::Name(self.text(*handler)),
            "selector_expression" => {
                let operand = handler
                    .child_by_field_name("operand")
                    .map(|o| self.text(o))
                    .unwrap_or_default();
                let field = handler
                    .child_by_field_name("field")
                    .map(|f| self.text(f))
                    .unwrap_or_default();
                if self.packages.contains(&operand) {
                    Target::Name(format!("{}.{}", operand, field))
                } else {
                    Target::Name(field)
                }
            }
            _ => Target::Dynamic(self.text(*handler)),
        };
        let (line, column) = position(node);
        let reference = ReferenceSketch::new(
            ReferenceKind::Route,
            target,
            self.current_func.as_deref(),
            line,
            column,
        )
        .with_extra("method", verb)
        .with_extra("path", path);
        self.file.references.push(reference);
        true
    }

    fn extract_composite(&mut self, node: Node) {
        if let Some(ty) = node.child_by_field_name("type").and_then(|t| self.type_name(t)) {
            if !BUILTINS.contains(&ty.as_str()) {
                self.reference(ReferenceKind::Instantiate, Target::Name(ty), None, node);
            }
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.extract(body);
        }
    }

    // ==================== Helpers ====================

    fn call(&mut self, target: Target, receiver: Receiver, at: Node) {
        let (line, column) = position(at);
        let reference = ReferenceSketch::new(
            ReferenceKind::Call,
            target,
            self.current_func.as_deref(),
            line,
            column,
        )
        .with_receiver(receiver);
        self.file.references.push(reference);
    }

    fn reference(&mut self, kind: ReferenceKind, target: Target, from: Option<&str>, at: Node) {
        let (line, column) = position(at);
        let from = from.map(str::to_string).or_else(|| self.current_func.clone());
        self.file
            .references
            .push(ReferenceSketch::new(kind, target, from.as_deref(), line, column));
    }

    fn text(&self, node: Node) -> String {
        node_text(node, self.source).to_string()
    }

    /// Receiver type (pointer stripped) and variable of a method
    fn receiver(&self, receiver: Node) -> (Option<String>, Option<String>) {
        let mut cursor = receiver.walk();
        let Some(param) = receiver
            .named_children(&mut cursor)
            .find(|c| c.kind() == "parameter_declaration")
        else {
            return (None, None);
        };
        let ty = param.child_by_field_name("type").and_then(|t| self.type_name(t));
        let var = param.child_by_field_name("name").map(|n| self.text(n));
        (ty, var)
    }

    /// Names and type of each parameter declaration in a list
    fn parameter_declarations(&self, list: Node) -> Vec<(Vec<String>, Option<String>)> {
        let mut cursor = list.walk();
        let params: Vec<Node> = list
            .named_children(&mut cursor)
            .filter(|p| matches!(p.kind(), "parameter_declaration" | "variadic_parameter_declaration"))
            .collect();
        params
            .into_iter()
            .map(|param| {
                let mut names_cursor = param.walk();
                let names = param
                    .children_by_field_name("name", &mut names_cursor)
                    .map(|n| self.text(n))
                    .collect();
                let ty = param
                    .child_by_field_name("type")
                    .and_then(|t| self.type_name(t))
                    .filter(|t| !BUILTINS.contains(&t.as_str()));
                (names, ty)
            })
            .collect()
    }

    fn arguments<'t>(&self, node: Node<'t>) -> Vec<Node<'t>> {
        let Some(args) = node.child_by_field_name("arguments") else {
            return Vec::new();
        };
        let mut cursor = args.walk();
        args.named_children(&mut cursor).collect()
    }

    fn expression_list<'t>(&self, node: Node<'t>) -> Vec<Node<'t>> {
        if node.kind() != "expression_list" {
            return vec![node];
        }
        let mut cursor = node.walk();
        node.named_children(&mut cursor).collect()
    }

    fn string_literal(&self, node: Node) -> Option<String> {
        if !matches!(node.kind(), "interpreted_string_literal" | "raw_string_literal") {
            return None;
        }
        unquote(node_text(node, self.source)).map(str::to_string)
    }

    fn value_target(&self, node: Node) -> Target {
        if let Some(literal) = self.string_literal(node) {
            return Target::Name(literal);
        }
        match node.kind() {
            "identifier" => Target::Variable(self.text(node)),
            _ => Target::Dynamic(self.text(node)),
        }
    }

    /// Named type of a type expression, looking through pointers, slices and generics
    fn type_name(&self, node: Node) -> Option<String> {
        match node.kind() {
            "type_identifier" | "qualified_type" => Some(self.text(node)),
            "pointer_type" | "slice_type" | "array_type" | "parenthesized_type" => {
                let inner = node
                    .child_by_field_name("element")
                    .or_else(|| node.named_child(node.named_child_count().saturating_sub(1)));
                inner.and_then(|i| self.type_name(i))
            }
            "generic_type" => node
                .child_by_field_name("type")
                .and_then(|t| self.type_name(t)),
            _ => None,
        }
    }
}

fn is_exported(name: &str) -> bool {
    name.chars().next().map(char::is_uppercase).unwrap_or(false)
}

fn receiver_is_pointer(receiver: Node) -> bool {
    let mut cursor = receiver.walk();
    let found = receiver
        .named_children(&mut cursor)
        .filter_map(|p| p.child_by_field_name("type"))
        .any(|t| t.kind() == "pointer_type");
    found
}
