//! Source discovery and per-file collection

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::core::error::CoreError;
use crate::core::sketch::FileSketches;
use crate::languages::LanguageRegistry;

/// One source file read from disk
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Project-relative path with `/` separators
    pub path: String,
    pub language: String,
    pub content: String,
    /// SHA-256 of the content, hex encoded
    pub fingerprint: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, language: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            language: language.into(),
            fingerprint: compute_hash(&content),
            content,
        }
    }
}

/// Finds and reads the files a registry has collectors for
#[derive(Clone)]
pub struct CodeParser {
    registry: Arc<LanguageRegistry>,
}

impl CodeParser {
    /// Create a new parser with the given language registry
    pub fn new(registry: Arc<LanguageRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Collect all parseable files under `root` as (relative path, language), sorted by path
    pub fn collect_files(&self, root: &Path) -> Result<Vec<(String, String)>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        {
            let entry = entry.with_context(|| format!("Failed to walk {:?}", root))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(lang) = self.registry.for_path(entry.path()) {
                let relative = relative_path(root, entry.path());
                files.push((relative, lang.language_id().to_string()));
            }
        }

        files.sort();
        Ok(files)
    }

    /// Language of a project-relative path, if any collector handles it
    pub fn language_of(&self, relative: &str) -> Option<String> {
        self.registry
            .for_path(Path::new(relative))
            .map(|l| l.language_id().to_string())
    }

    /// Read a file as a [`SourceFile`]
    pub fn read_source(&self, root: &Path, relative: &str, language: &str) -> Result<SourceFile> {
        let full = root.join(relative);
        // Read file as bytes first to handle non-UTF8 encodings
        let bytes = fs::read(&full).with_context(|| format!("Failed to read file: {:?}", full))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        Ok(SourceFile::new(relative, language, content))
    }

    /// Run the file's collector (Pass 1 for one file)
    pub fn parse_file(&self, source: &SourceFile) -> Result<FileSketches> {
        let collector = self
            .registry
            .get(&source.language)
            .ok_or_else(|| CoreError::UnsupportedLanguage(source.language.clone()))?;

        let sketches = collector
            .collect(&source.path, &source.content)
            .map_err(|e| CoreError::ParseFailure {
                path: source.path.clone(),
                message: format!("{:#}", e),
            })?;

        debug!(
            "Collected {}: {} symbols, {} references, {} syntax issues",
            source.path,
            sketches.symbols.len(),
            sketches.references.len(),
            sketches.parse_errors.len()
        );
        Ok(sketches)
    }
}

/// Relative `/`-separated form of `path` under `root`
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative: PathBuf = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Check if a directory entry is hidden
fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Compute SHA-256 hash of content
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_files_skips_hidden_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/app")).unwrap();
        fs::create_dir_all(dir.path().join(".symgraph")).unwrap();
        fs::write(dir.path().join("src/app/Main.java"), "class Main {}").unwrap();
        fs::write(dir.path().join("src/main.go"), "package main").unwrap();
        fs::write(dir.path().join("README.md"), "# readme").unwrap();
        fs::write(dir.path().join(".symgraph/Cached.java"), "class Cached {}").unwrap();

        let parser = CodeParser::new(Arc::new(LanguageRegistry::new()));
        let files = parser.collect_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                ("src/app/Main.java".to_string(), "java".to_string()),
                ("src/main.go".to_string(), "go".to_string()),
            ]
        );
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = SourceFile::new("a.java", "java", "class A {}");
        let b = SourceFile::new("a.java", "java", "class A {}");
        let c = SourceFile::new("a.java", "java", "class A { }");
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn test_parse_file_rejects_unknown_language() {
        let parser = CodeParser::new(Arc::new(LanguageRegistry::new()));
        let source = SourceFile::new("a.rb", "ruby", "class A; end");
        let err = parser.parse_file(&source).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::UnsupportedLanguage(lang)) if lang == "ruby"
        ));
    }
}
