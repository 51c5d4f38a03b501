//! Row types of the graph database and their mapping to core types

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::incremental::{FileRecord, FileState};
use crate::core::model::{Edge, EdgeType, Location, Metadata, Symbol, SymbolId, SymbolKind};
use crate::core::sketch::FileSketches;

/// Row of the `files` table
#[derive(Debug, Clone)]
pub struct FileRow {
    pub path: String,
    pub language: String,
    pub content_hash: String,
    pub state: String,
    pub last_resolved_at: Option<String>,
    pub collected_seq: i64,
    /// Sketches of the last successful collection, as JSON
    pub sketches: Option<String>,
}

impl FileRow {
    pub fn from_record(record: &FileRecord) -> serde_json::Result<Self> {
        let sketches = record
            .sketches
            .as_deref()
            .map(serde_json::to_string)
            .transpose()?;
        Ok(Self {
            path: record.path.clone(),
            language: record.language.clone(),
            content_hash: record.content_fingerprint.clone(),
            state: record.state.to_string(),
            last_resolved_at: record.last_resolved_at.map(|t| t.to_rfc3339()),
            collected_seq: record.collected_seq as i64,
            sketches,
        })
    }

    pub fn into_record(self) -> Result<FileRecord> {
        let state: FileState = self
            .state
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .with_context(|| format!("Bad state for {}", self.path))?;
        let last_resolved_at = self
            .last_resolved_at
            .map(|t| DateTime::parse_from_rfc3339(&t).map(|t| t.with_timezone(&Utc)))
            .transpose()
            .with_context(|| format!("Bad timestamp for {}", self.path))?;
        let sketches = self
            .sketches
            .map(|json| serde_json::from_str::<FileSketches>(&json))
            .transpose()
            .with_context(|| format!("Bad sketches for {}", self.path))?
            .map(Arc::new);

        Ok(FileRecord {
            path: self.path,
            language: self.language,
            content_fingerprint: self.content_hash,
            state,
            last_resolved_at,
            collected_seq: self.collected_seq.max(0) as u64,
            sketches,
        })
    }
}

/// Row of the `nodes` table
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub id: String,
    pub fqn: String,
    pub name: String,
    pub kind: String,
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub namespace: Option<String>,
    pub exported: bool,
    pub metadata: String,
}

impl NodeRow {
    pub fn from_symbol(symbol: &Symbol) -> serde_json::Result<Self> {
        Ok(Self {
            id: symbol.id.as_str().to_string(),
            fqn: symbol.fqn.clone(),
            name: symbol.name.clone(),
            kind: symbol.kind.to_string(),
            file_path: symbol.file_path.clone(),
            line: symbol.line,
            column: symbol.column,
            namespace: symbol.namespace.clone(),
            exported: symbol.exported,
            metadata: serde_json::to_string(&symbol.metadata)?,
        })
    }

    pub fn into_symbol(self) -> Result<Symbol> {
        let kind: SymbolKind = self
            .kind
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let metadata: Metadata = serde_json::from_str(&self.metadata)
            .with_context(|| format!("Bad metadata for node {}", self.fqn))?;
        Ok(Symbol {
            id: SymbolId::from_raw(self.id),
            fqn: self.fqn,
            name: self.name,
            kind,
            file_path: self.file_path,
            line: self.line,
            column: self.column,
            namespace: self.namespace,
            exported: self.exported,
            metadata,
        })
    }
}

/// Row of the `edges` table
#[derive(Debug, Clone)]
pub struct EdgeRow {
    pub owner: String,
    pub edge_type: String,
    pub source_id: String,
    pub target_id: String,
    pub confidence: f64,
    pub line: u32,
    pub metadata: String,
}

impl EdgeRow {
    pub fn from_edge(edge: &Edge) -> serde_json::Result<Self> {
        Ok(Self {
            owner: edge.owner().to_string(),
            edge_type: edge.edge_type.to_string(),
            source_id: edge.source_id.as_str().to_string(),
            target_id: edge.target_id.as_str().to_string(),
            confidence: edge.confidence,
            line: edge.location.line,
            metadata: serde_json::to_string(&edge.metadata)?,
        })
    }

    pub fn into_edge(self) -> Result<Edge> {
        let edge_type: EdgeType = self
            .edge_type
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let metadata: Metadata = serde_json::from_str(&self.metadata)
            .with_context(|| format!("Bad metadata for edge owned by {}", self.owner))?;
        let mut edge = Edge::new(
            edge_type,
            SymbolId::from_raw(self.source_id),
            SymbolId::from_raw(self.target_id),
            self.confidence,
            Location {
                file_path: self.owner,
                line: self.line,
            },
        );
        edge.metadata = metadata;
        Ok(edge)
    }
}

/// Row counts of a stored graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub files: usize,
    pub failed_files: usize,
    pub nodes: usize,
    pub placeholders: usize,
    pub edges: usize,
}
