//! Raw, unresolved output of a language collector
//!
//! Sketches carry names exactly as written in the source. Symbol sketches are
//! relative to the file's namespace; the core assembles fully-qualified names.

use serde::{Deserialize, Serialize};

use crate::core::model::{Metadata, Symbol, SymbolKind};

/// Everything a collector extracted from one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSketches {
    pub path: String,
    pub language: String,
    /// Declared namespace / package, if any
    pub namespace: Option<String>,
    /// Separator between FQN segments in this language
    pub separator: String,
    pub symbols: Vec<SymbolSketch>,
    pub imports: Vec<ImportSketch>,
    pub references: Vec<ReferenceSketch>,
    pub assignments: Vec<LiteralAssignment>,
    /// Recoverable syntax problems; the file was still collected
    pub parse_errors: Vec<ParseIssue>,
}

impl FileSketches {
    pub fn new(path: &str, language: &str, separator: &str) -> Self {
        Self {
            path: path.to_string(),
            language: language.to_string(),
            separator: separator.to_string(),
            ..Default::default()
        }
    }

    /// Qualify a path relative to this file's namespace
    pub fn qualify(&self, relative: &str) -> String {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("{}{}{}", ns, self.separator, relative),
            _ => relative.to_string(),
        }
    }

    /// Inverse of [`qualify`](Self::qualify) for symbols this file defines
    pub fn relative_of<'f>(&self, fqn: &'f str) -> &'f str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => fqn
                .strip_prefix(ns)
                .and_then(|rest| rest.strip_prefix(self.separator.as_str()))
                .unwrap_or(fqn),
            _ => fqn,
        }
    }

    /// Find the sketch defined at a relative path
    pub fn symbol_at(&self, relative: &str) -> Option<&SymbolSketch> {
        self.symbols
            .iter()
            .rev()
            .find(|s| s.relative_path(&self.separator) == relative)
    }

    /// Assemble the final symbols this file defines, including its file node
    pub fn assemble_symbols(&self) -> Vec<Symbol> {
        let mut symbols = Vec::with_capacity(self.symbols.len() + 1);
        let mut file_symbol = Symbol::file(&self.path);
        file_symbol.namespace = self.namespace.clone();
        file_symbol
            .metadata
            .insert("language".to_string(), self.language.clone().into());
        symbols.push(file_symbol);

        for sketch in &self.symbols {
            let relative = sketch.relative_path(&self.separator);
            let mut symbol = Symbol::new(self.qualify(&relative), &sketch.name, sketch.kind)
                .located(&self.path, sketch.line, sketch.column);
            symbol.namespace = self.namespace.clone();
            symbol.exported = sketch.exported;
            symbol.metadata = sketch.metadata.clone();
            symbol
                .metadata
                .insert("language".to_string(), self.language.clone().into());
            symbols.push(symbol);
        }

        symbols
    }
}

/// A definition as seen by the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSketch {
    pub name: String,
    /// Relative path of the enclosing definition (e.g. the class of a method)
    pub parent: Option<String>,
    pub kind: SymbolKind,
    pub line: u32,
    pub column: u32,
    pub exported: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SymbolSketch {
    pub fn new(name: &str, parent: Option<&str>, kind: SymbolKind, line: u32, column: u32) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            kind,
            line,
            column,
            exported: true,
            metadata: Metadata::new(),
        }
    }

    pub fn relative_path(&self, separator: &str) -> String {
        match &self.parent {
            Some(parent) => format!("{}{}{}", parent, separator, self.name),
            None => self.name.clone(),
        }
    }
}

/// An import / use statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSketch {
    /// Target in FQN space (e.g. `com.example.Base`, or `models` for a Go path)
    pub target: String,
    /// Local name bound by the import; defaults to the target's last segment
    pub alias: Option<String>,
    /// `import a.b.*` style: binds every name of the namespace
    pub wildcard: bool,
    pub line: u32,
}

/// Kind of a reference sketch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Extends,
    Implements,
    UsesMixin,
    Call,
    Instantiate,
    Throws,
    Reads,
    Writes,
    ReturnsType,
    AcceptsType,
    ServiceLookup,
    EventEmit,
    EventListen,
    Route,
}

impl ReferenceKind {
    /// Kinds only meaningful to enrichment plugins; Pass 2 skips them
    pub fn is_enrichment(&self) -> bool {
        matches!(
            self,
            ReferenceKind::ServiceLookup
                | ReferenceKind::EventEmit
                | ReferenceKind::EventListen
                | ReferenceKind::Route
        )
    }
}

/// What a call is invoked on
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum Receiver {
    /// Unqualified call (`foo()`)
    #[default]
    None,
    /// `this` / `self` / `super`
    SelfRef,
    /// A type or namespace name (`Math.max`, `fmt.Println`)
    Type(String),
    /// Any other expression whose type is unknown
    Expression(String),
}

/// The referenced name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Target {
    /// Written literally
    Name(String),
    /// Held in a local variable (`new $class()`, `Class.forName(cls)`)
    Variable(String),
    /// Computed at runtime; the payload is the source text
    Dynamic(String),
}

impl Target {
    pub fn text(&self) -> &str {
        match self {
            Target::Name(s) | Target::Variable(s) | Target::Dynamic(s) => s,
        }
    }
}

/// A use of a name, unresolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSketch {
    pub kind: ReferenceKind,
    pub target: Target,
    /// Relative path of the enclosing definition; `None` means the file itself
    pub from: Option<String>,
    #[serde(default)]
    pub receiver: Receiver,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub extra: Metadata,
}

impl ReferenceSketch {
    pub fn new(kind: ReferenceKind, target: Target, from: Option<&str>, line: u32, column: u32) -> Self {
        Self {
            kind,
            target,
            from: from.map(str::to_string),
            receiver: Receiver::None,
            line,
            column,
            extra: Metadata::new(),
        }
    }

    pub fn with_receiver(mut self, receiver: Receiver) -> Self {
        self.receiver = receiver;
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// `variable = "Literal"` observed in a scope, feeding constant propagation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralAssignment {
    /// Relative path of the enclosing callable; `None` at file level
    pub scope: Option<String>,
    pub variable: String,
    pub literal: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseIssue {
    pub line: u32,
    pub column: u32,
    pub message: String,
}
