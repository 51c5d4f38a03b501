//! Symbols, edges and diagnostics shared by every pass

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Free-form, deterministically ordered metadata attached to symbols and edges
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Stable identifier of a symbol, derived from its fully-qualified name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(String);

impl SymbolId {
    /// Hash a fully-qualified name into its id
    pub fn for_fqn(fqn: &str) -> Self {
        let digest = Sha256::digest(fqn.as_bytes());
        Self(hex::encode(&digest[..12]))
    }

    /// Wrap an id read back from storage
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a named entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Module,
    Class,
    Interface,
    Trait,
    Function,
    Method,
    Property,
    Constant,
    File,
    Directory,
    #[serde(rename = "external_placeholder")]
    External,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Module => "module",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Trait => "trait",
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Property => "property",
            SymbolKind::Constant => "constant",
            SymbolKind::File => "file",
            SymbolKind::Directory => "directory",
            SymbolKind::External => "external_placeholder",
        }
    }

    /// Types can enclose members and be the receiver of `this`/`self`
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            SymbolKind::Class | SymbolKind::Interface | SymbolKind::Trait
        )
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "module" => SymbolKind::Module,
            "class" => SymbolKind::Class,
            "interface" => SymbolKind::Interface,
            "trait" => SymbolKind::Trait,
            "function" => SymbolKind::Function,
            "method" => SymbolKind::Method,
            "property" => SymbolKind::Property,
            "constant" => SymbolKind::Constant,
            "file" => SymbolKind::File,
            "directory" => SymbolKind::Directory,
            "external_placeholder" => SymbolKind::External,
            other => return Err(format!("unknown symbol kind '{}'", other)),
        };
        Ok(kind)
    }
}

/// A named, located entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub fqn: String,
    /// Short (unqualified) name, indexed for global lookups
    pub name: String,
    pub kind: SymbolKind,
    /// Owning file; empty for placeholders and namespace modules
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub namespace: Option<String>,
    pub exported: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Symbol {
    pub fn new(fqn: impl Into<String>, name: impl Into<String>, kind: SymbolKind) -> Self {
        let fqn = fqn.into();
        Self {
            id: SymbolId::for_fqn(&fqn),
            fqn,
            name: name.into(),
            kind,
            file_path: String::new(),
            line: 0,
            column: 0,
            namespace: None,
            exported: true,
            metadata: Metadata::new(),
        }
    }

    /// Placeholder for a name referenced but defined outside the project
    pub fn external(fqn: &str, short_name: &str) -> Self {
        Self::new(fqn, short_name, SymbolKind::External)
    }

    /// Synthetic node standing for a whole source file
    pub fn file(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        let mut symbol = Self::new(path, name, SymbolKind::File);
        symbol.file_path = path.to_string();
        symbol
    }

    pub fn located(mut self, file_path: &str, line: u32, column: u32) -> Self {
        self.file_path = file_path.to_string();
        self.line = line;
        self.column = column;
        self
    }

    pub fn is_external(&self) -> bool {
        self.kind == SymbolKind::External
    }

    /// Raw supertype names recorded by the collector, before resolution
    pub fn supertype_names(&self) -> Vec<String> {
        self.metadata
            .get("supertypes")
            .and_then(|v| v.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Relationship types between symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    Extends,
    Implements,
    UsesMixin,
    Calls,
    CallsStatic,
    Instantiates,
    Imports,
    Throws,
    Reads,
    Writes,
    ReturnsType,
    AcceptsType,
    Injects,
    Emits,
    Listens,
    RoutesTo,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Extends => "EXTENDS",
            EdgeType::Implements => "IMPLEMENTS",
            EdgeType::UsesMixin => "USES_MIXIN",
            EdgeType::Calls => "CALLS",
            EdgeType::CallsStatic => "CALLS_STATIC",
            EdgeType::Instantiates => "INSTANTIATES",
            EdgeType::Imports => "IMPORTS",
            EdgeType::Throws => "THROWS",
            EdgeType::Reads => "READS",
            EdgeType::Writes => "WRITES",
            EdgeType::ReturnsType => "RETURNS_TYPE",
            EdgeType::AcceptsType => "ACCEPTS_TYPE",
            EdgeType::Injects => "INJECTS",
            EdgeType::Emits => "EMITS",
            EdgeType::Listens => "LISTENS",
            EdgeType::RoutesTo => "ROUTES_TO",
        }
    }

    /// Edge types forming the type hierarchy
    pub fn is_hierarchy(&self) -> bool {
        matches!(
            self,
            EdgeType::Extends | EdgeType::Implements | EdgeType::UsesMixin
        )
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let edge_type = match s {
            "EXTENDS" => EdgeType::Extends,
            "IMPLEMENTS" => EdgeType::Implements,
            "USES_MIXIN" => EdgeType::UsesMixin,
            "CALLS" => EdgeType::Calls,
            "CALLS_STATIC" => EdgeType::CallsStatic,
            "INSTANTIATES" => EdgeType::Instantiates,
            "IMPORTS" => EdgeType::Imports,
            "THROWS" => EdgeType::Throws,
            "READS" => EdgeType::Reads,
            "WRITES" => EdgeType::Writes,
            "RETURNS_TYPE" => EdgeType::ReturnsType,
            "ACCEPTS_TYPE" => EdgeType::AcceptsType,
            "INJECTS" => EdgeType::Injects,
            "EMITS" => EdgeType::Emits,
            "LISTENS" => EdgeType::Listens,
            "ROUTES_TO" => EdgeType::RoutesTo,
            other => return Err(format!("unknown edge type '{}'", other)),
        };
        Ok(edge_type)
    }
}

/// Position of the syntax that produced an edge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    /// Also the edge's owner: re-resolving this file replaces the edge
    pub file_path: String,
    pub line: u32,
}

/// A directed, typed and confidence-scored relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub edge_type: EdgeType,
    pub source_id: SymbolId,
    pub target_id: SymbolId,
    pub confidence: f64,
    pub location: Location,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Edge {
    pub fn new(
        edge_type: EdgeType,
        source_id: SymbolId,
        target_id: SymbolId,
        confidence: f64,
        location: Location,
    ) -> Self {
        Self {
            edge_type,
            source_id,
            target_id,
            confidence: confidence.clamp(0.0, 1.0),
            location,
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn owner(&self) -> &str {
        &self.location.file_path
    }

    pub fn is_dynamic(&self) -> bool {
        self.metadata
            .get("dynamic")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Total order used to keep per-file edge lists reproducible
    pub fn sort_key(&self) -> (u32, EdgeType, &str, &str) {
        (
            self.location.line,
            self.edge_type,
            self.source_id.as_str(),
            self.target_id.as_str(),
        )
    }
}

/// Non-fatal findings recorded during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    DuplicateFqn,
    ResolutionAmbiguity,
    ParseFailure,
    SyntaxError,
    Timeout,
    /// A resolution or enrichment task died; the file is retried next run
    TaskFailure,
    SinkWriteFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub file_path: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, file_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            file_path: file_path.into(),
            message: message.into(),
        }
    }
}
