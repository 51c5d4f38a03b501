//! Language collectors
//!
//! A collector turns one file into raw [`FileSketches`]: definitions relative
//! to the file's namespace, imports, unresolved references and literal
//! assignments. Collectors never look at other files.

pub mod go;
pub mod java;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tree_sitter::{Node, Tree};

use crate::core::sketch::{FileSketches, ParseIssue};

/// Trait for per-language symbol collectors
pub trait LanguageCollector: Send + Sync {
    /// Get the language identifier (e.g., "java", "go")
    fn language_id(&self) -> &str;

    /// Get supported file extensions (e.g., [".java"], [".go"])
    fn file_extensions(&self) -> &[&str];

    /// Separator between FQN segments
    fn separator(&self) -> &str {
        "."
    }

    /// Extract sketches from one file. `path` is project-relative.
    fn collect(&self, path: &str, source: &str) -> Result<FileSketches>;
}

/// Registry for managing language collectors
pub struct LanguageRegistry {
    languages: Vec<Arc<dyn LanguageCollector>>,
}

impl LanguageRegistry {
    /// Create a new registry with the built-in collectors
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(Arc::new(java::JavaCollector::new()));
        registry.register(Arc::new(go::GoCollector::new()));

        registry
    }

    /// A registry without any collector
    pub fn empty() -> Self {
        Self {
            languages: Vec::new(),
        }
    }

    /// Register a collector; a later registration for the same id wins
    pub fn register(&mut self, language: Arc<dyn LanguageCollector>) {
        self.languages
            .retain(|l| l.language_id() != language.language_id());
        self.languages.push(language);
    }

    /// Get a collector by ID
    pub fn get(&self, language_id: &str) -> Option<&Arc<dyn LanguageCollector>> {
        self.languages.iter().find(|l| l.language_id() == language_id)
    }

    /// Get a collector by file extension
    pub fn get_by_extension(&self, extension: &str) -> Option<&Arc<dyn LanguageCollector>> {
        let ext = if extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{}", extension)
        };

        self.languages
            .iter()
            .find(|l| l.file_extensions().contains(&ext.as_str()))
    }

    /// Collector responsible for a path, by extension
    pub fn for_path(&self, path: &Path) -> Option<&Arc<dyn LanguageCollector>> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        self.get_by_extension(ext)
    }

    /// List all registered collectors
    pub fn list_languages(&self) -> &[Arc<dyn LanguageCollector>] {
        &self.languages
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `source` with a tree-sitter grammar
pub(crate) fn parse_tree(grammar: tree_sitter::Language, path: &str, source: &str) -> Result<Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&grammar)
        .with_context(|| format!("Failed to set grammar for {}", path))?;
    parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse file: {}", path))
}

/// ERROR and MISSING nodes of a tree, as recoverable issues
pub(crate) fn syntax_issues(tree: &Tree) -> Vec<ParseIssue> {
    let mut issues = Vec::new();
    if tree.root_node().has_error() {
        collect_issues(tree.root_node(), &mut issues);
    }
    issues
}

/// Fail the file when its syntax errors left nothing to collect
pub(crate) fn ensure_recoverable(tree: &Tree, sketches: &FileSketches) -> Result<()> {
    if sketches.parse_errors.is_empty() {
        return Ok(());
    }
    let root = tree.root_node();
    let mut cursor = root.walk();
    let only_errors = root.named_child_count() > 0
        && root.named_children(&mut cursor).all(|child| child.is_error());
    if root.is_error() || only_errors || sketches.symbols.is_empty() {
        let first = &sketches.parse_errors[0];
        anyhow::bail!(
            "unparseable: {} syntax issue(s), first at {}:{}",
            sketches.parse_errors.len(),
            first.line,
            first.column
        );
    }
    Ok(())
}

fn collect_issues(node: Node, issues: &mut Vec<ParseIssue>) {
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        let message = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "unexpected syntax".to_string()
        };
        issues.push(ParseIssue {
            line: pos.row as u32 + 1,
            column: pos.column as u32 + 1,
            message,
        });
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() || child.is_missing() {
            collect_issues(child, issues);
        }
    }
}

/// Text of a node
pub(crate) fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// 1-based (line, column) of a node
pub(crate) fn position(node: Node) -> (u32, u32) {
    let pos = node.start_position();
    (pos.row as u32 + 1, pos.column as u32 + 1)
}

/// Content of a string literal without its quotes
pub(crate) fn unquote(text: &str) -> Option<&str> {
    let text = text.trim();
    let quoted = text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('`') && text.ends_with('`')));
    quoted.then(|| &text[1..text.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookups() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.get("java").unwrap().language_id(), "java");
        assert_eq!(registry.get_by_extension("go").unwrap().language_id(), "go");
        assert_eq!(
            registry
                .for_path(Path::new("src/App.java"))
                .unwrap()
                .language_id(),
            "java"
        );
        assert!(registry.get_by_extension(".py").is_none());
        assert!(LanguageRegistry::empty().list_languages().is_empty());
    }

    #[test]
    fn test_garbage_is_not_recoverable() {
        let registry = LanguageRegistry::new();
        for (lang, path) in [("java", "Junk.java"), ("go", "junk.go")] {
            let collector = registry.get(lang).unwrap();
            let err = collector.collect(path, "%%% }}}} ((( ;;;").unwrap_err();
            assert!(err.to_string().contains("unparseable"), "{}: {}", lang, err);
        }
        // Empty files are fine, there is just nothing in them
        assert!(registry.get("java").unwrap().collect("Empty.java", "").is_ok());
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"user.created\""), Some("user.created"));
        assert_eq!(unquote("`raw`"), Some("raw"));
        assert_eq!(unquote("name"), None);
        assert_eq!(unquote("\""), None);
    }
}
