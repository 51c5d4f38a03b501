//! SQLite graph sink

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use super::models::{EdgeRow, FileRow, GraphStats, NodeRow};
use crate::core::error::SinkError;
use crate::core::incremental::FileRecord;
use crate::core::model::{Edge, Symbol, SymbolKind};
use crate::core::sink::{GraphBatch, GraphSink};

/// SQLite database wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Initialize the database schema
    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Per-file incremental state
            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                language TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                state TEXT NOT NULL,
                last_resolved_at TEXT,
                collected_seq INTEGER NOT NULL DEFAULT 0,
                sketches TEXT
            );

            -- Nodes (symbols, file nodes, modules, placeholders)
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                fqn TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                file_path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                start_column INTEGER NOT NULL,
                namespace TEXT,
                exported INTEGER NOT NULL,
                metadata TEXT NOT NULL
            );

            -- Edges, owned by the file whose syntax produced them
            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY,
                owner TEXT NOT NULL,
                edge_type TEXT NOT NULL,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                confidence REAL NOT NULL,
                line INTEGER NOT NULL,
                metadata TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_nodes_file ON nodes(file_path);
            CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);
            CREATE INDEX IF NOT EXISTS idx_nodes_fqn ON nodes(fqn);
            CREATE INDEX IF NOT EXISTS idx_edges_owner ON edges(owner);
            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
            "#,
        )?;

        Ok(())
    }

    // ==================== State Loading ====================

    /// Everything needed to resume incrementally: file records,
    /// placeholders and edges
    pub fn load_state(&self) -> Result<(Vec<FileRecord>, Vec<Symbol>, Vec<Edge>)> {
        let records = self
            .file_rows()?
            .into_iter()
            .map(FileRow::into_record)
            .collect::<Result<Vec<_>>>()?;
        let placeholders = self
            .node_rows("WHERE kind = ?1", SymbolKind::External.as_str())?
            .into_iter()
            .map(NodeRow::into_symbol)
            .collect::<Result<Vec<_>>>()?;
        let edges = self
            .edge_rows()?
            .into_iter()
            .map(EdgeRow::into_edge)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Loaded {} files, {} placeholders, {} edges",
            records.len(),
            placeholders.len(),
            edges.len()
        );
        Ok((records, placeholders, edges))
    }

    fn file_rows(&self) -> Result<Vec<FileRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, language, content_hash, state, last_resolved_at, collected_seq, sketches
             FROM files ORDER BY path",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(FileRow {
                path: row.get(0)?,
                language: row.get(1)?,
                content_hash: row.get(2)?,
                state: row.get(3)?,
                last_resolved_at: row.get(4)?,
                collected_seq: row.get(5)?,
                sketches: row.get(6)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn node_rows(&self, filter: &str, value: &str) -> Result<Vec<NodeRow>> {
        let sql = format!(
            "SELECT id, fqn, name, kind, file_path, start_line, start_column, namespace, exported, metadata
             FROM nodes {} ORDER BY fqn",
            filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], |row| {
            Ok(NodeRow {
                id: row.get(0)?,
                fqn: row.get(1)?,
                name: row.get(2)?,
                kind: row.get(3)?,
                file_path: row.get(4)?,
                line: row.get(5)?,
                column: row.get(6)?,
                namespace: row.get(7)?,
                exported: row.get(8)?,
                metadata: row.get(9)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn edge_rows(&self) -> Result<Vec<EdgeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT owner, edge_type, source_id, target_id, confidence, line, metadata
             FROM edges ORDER BY owner, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EdgeRow {
                owner: row.get(0)?,
                edge_type: row.get(1)?,
                source_id: row.get(2)?,
                target_id: row.get(3)?,
                confidence: row.get(4)?,
                line: row.get(5)?,
                metadata: row.get(6)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // ==================== Queries ====================

    /// Look up one stored node by FQN
    pub fn get_node(&self, fqn: &str) -> Result<Option<Symbol>> {
        self.node_rows("WHERE fqn = ?1", fqn)?
            .into_iter()
            .next()
            .map(NodeRow::into_symbol)
            .transpose()
    }

    /// Nodes written for one file
    pub fn nodes_in_file(&self, path: &str) -> Result<Vec<Symbol>> {
        self.node_rows("WHERE file_path = ?1", path)?
            .into_iter()
            .map(NodeRow::into_symbol)
            .collect()
    }

    /// State column of one file, if recorded
    pub fn file_state(&self, path: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT state FROM files WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn stats(&self) -> Result<GraphStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(GraphStats {
            files: count("SELECT COUNT(*) FROM files")?,
            failed_files: count("SELECT COUNT(*) FROM files WHERE state = 'failed'")?,
            nodes: count("SELECT COUNT(*) FROM nodes")?,
            placeholders: count("SELECT COUNT(*) FROM nodes WHERE kind = 'external_placeholder'")?,
            edges: count("SELECT COUNT(*) FROM edges")?,
        })
    }
}

// ==================== Sink ====================

fn apply_batch(tx: &Transaction, batch: &GraphBatch) -> Result<(), SinkError> {
    for file in &batch.retract {
        tx.execute("DELETE FROM nodes WHERE file_path = ?1", params![file])?;
        tx.execute("DELETE FROM edges WHERE owner = ?1", params![file])?;
    }
    for id in &batch.drop_nodes {
        tx.execute("DELETE FROM nodes WHERE id = ?1", params![id.as_str()])?;
    }

    let mut insert_node = tx.prepare_cached(
        "INSERT OR REPLACE INTO nodes
         (id, fqn, name, kind, file_path, start_line, start_column, namespace, exported, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for node in &batch.nodes {
        let row = NodeRow::from_symbol(node)?;
        insert_node.execute(params![
            row.id,
            row.fqn,
            row.name,
            row.kind,
            row.file_path,
            row.line,
            row.column,
            row.namespace,
            row.exported,
            row.metadata
        ])?;
    }

    let mut insert_edge = tx.prepare_cached(
        "INSERT INTO edges (owner, edge_type, source_id, target_id, confidence, line, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for edge in &batch.edges {
        let row = EdgeRow::from_edge(edge)?;
        insert_edge.execute(params![
            row.owner,
            row.edge_type,
            row.source_id,
            row.target_id,
            row.confidence,
            row.line,
            row.metadata
        ])?;
    }
    Ok(())
}

impl GraphSink for Database {
    fn write_batch(&mut self, batch: &GraphBatch) -> Result<(), SinkError> {
        let tx = self.conn.transaction()?;
        apply_batch(&tx, batch)?;
        tx.commit()?;
        debug!(
            "Wrote batch: {} retracted, {} nodes, {} edges",
            batch.retract.len(),
            batch.nodes.len(),
            batch.edges.len()
        );
        Ok(())
    }

    fn save_files(&mut self, records: &[&FileRecord], removed: &[String]) -> Result<(), SinkError> {
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare_cached(
                "INSERT OR REPLACE INTO files
                 (path, language, content_hash, state, last_resolved_at, collected_seq, sketches)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for record in records {
                let row = FileRow::from_record(record)?;
                upsert.execute(params![
                    row.path,
                    row.language,
                    row.content_hash,
                    row.state,
                    row.last_resolved_at,
                    row.collected_seq,
                    row.sketches
                ])?;
            }
            for path in removed {
                tx.execute("DELETE FROM files WHERE path = ?1", params![path])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::incremental::FileState;
    use crate::core::model::{EdgeType, Location, SymbolId};

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db
    }

    fn batch() -> GraphBatch {
        let base = Symbol::new("app.Base", "Base", SymbolKind::Class).located("a.java", 2, 1);
        let external = Symbol::external("lib.Remote", "Remote");
        let edge = Edge::new(
            EdgeType::Extends,
            SymbolId::for_fqn("app.Child"),
            base.id.clone(),
            1.0,
            Location {
                file_path: "b.java".to_string(),
                line: 3,
            },
        )
        .with_meta("inherited", false);
        GraphBatch {
            retract: vec!["a.java".to_string(), "b.java".to_string()],
            drop_nodes: Vec::new(),
            nodes: vec![base, external],
            edges: vec![edge],
        }
    }

    #[test]
    fn test_write_and_load_state() {
        let mut db = db();
        db.write_batch(&batch()).unwrap();

        let mut record = FileRecord::new("a.java", "java", "h1");
        record.state = FileState::Resolved;
        db.save_files(&[&record], &[]).unwrap();

        let (records, placeholders, edges) = db.load_state().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, FileState::Resolved);
        assert_eq!(placeholders.len(), 1);
        assert_eq!(placeholders[0].fqn, "lib.Remote");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].owner(), "b.java");
        assert_eq!(edges[0].metadata.get("inherited"), Some(&serde_json::json!(false)));

        let base = db.get_node("app.Base").unwrap().unwrap();
        assert_eq!(base.line, 2);
    }

    #[test]
    fn test_retract_replaces_file_rows() {
        let mut db = db();
        db.write_batch(&batch()).unwrap();
        db.write_batch(&batch()).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.placeholders, 1);

        let retract_only = GraphBatch {
            retract: vec!["b.java".to_string()],
            drop_nodes: vec![SymbolId::for_fqn("lib.Remote")],
            ..Default::default()
        };
        db.write_batch(&retract_only).unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.edges, 0);
        assert_eq!(stats.placeholders, 0);
        assert_eq!(db.nodes_in_file("a.java").unwrap().len(), 1);
    }

    #[test]
    fn test_removed_files_are_forgotten() {
        let mut db = db();
        let record = FileRecord::new("gone.go", "go", "h");
        db.save_files(&[&record], &[]).unwrap();
        assert_eq!(db.file_state("gone.go").unwrap().as_deref(), Some("unknown"));

        db.save_files(&[], &["gone.go".to_string()]).unwrap();
        assert!(db.file_state("gone.go").unwrap().is_none());
    }
}
