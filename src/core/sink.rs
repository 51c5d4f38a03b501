//! Graph Sink boundary
//!
//! The controller hands finished per-file results to a sink in bounded
//! batches. A batch first retracts every row previously written for its files,
//! then upserts the nodes and edges that replace them.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::warn;

use crate::core::error::{CoreError, SinkError};
use crate::core::incremental::FileRecord;
use crate::core::model::{Edge, Symbol, SymbolId};

/// One unit of work for the sink
#[derive(Debug, Clone, Default)]
pub struct GraphBatch {
    /// Files whose previously written nodes and edges are dropped first
    pub retract: Vec<String>,
    /// Nodes no longer present in the table (pruned placeholders, removed modules)
    pub drop_nodes: Vec<SymbolId>,
    pub nodes: Vec<Symbol>,
    pub edges: Vec<Edge>,
}

impl GraphBatch {
    pub fn is_empty(&self) -> bool {
        self.retract.is_empty()
            && self.drop_nodes.is_empty()
            && self.nodes.is_empty()
            && self.edges.is_empty()
    }

    pub fn size(&self) -> usize {
        self.nodes.len() + self.edges.len() + self.drop_nodes.len()
    }
}

/// External store receiving the graph
pub trait GraphSink: Send {
    fn write_batch(&mut self, batch: &GraphBatch) -> Result<(), SinkError>;

    /// Persist file records so a later process can resume incrementally
    fn save_files(&mut self, _records: &[&FileRecord], _removed: &[String]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Write `batch`, retrying with exponential backoff. Returns the attempts used.
pub async fn write_with_retry<S: GraphSink + ?Sized>(
    sink: &mut S,
    batch: &GraphBatch,
    retries: u32,
    backoff: Duration,
) -> Result<u32, CoreError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match sink.write_batch(batch) {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt <= retries => {
                let delay = backoff.saturating_mul(2u32.saturating_pow(attempt - 1));
                warn!(
                    "Sink write failed (attempt {}/{}): {}; retrying in {:?}",
                    attempt,
                    retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(CoreError::SinkWriteFailure {
                    files: batch.retract.len(),
                    attempts: attempt,
                    source: e,
                })
            }
        }
    }
}

/// In-memory sink, also used to observe what reached the sink in tests
#[derive(Debug, Default)]
pub struct MemorySink {
    pub nodes: BTreeMap<SymbolId, Symbol>,
    /// Owner file -> edges
    pub edges: BTreeMap<String, Vec<Edge>>,
    pub batches: usize,
    pub saved_files: BTreeSet<String>,
    fail_next: u32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` batches
    pub fn fail_next(&mut self, n: u32) {
        self.fail_next = n;
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn all_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values().flatten()
    }
}

impl GraphSink for MemorySink {
    fn write_batch(&mut self, batch: &GraphBatch) -> Result<(), SinkError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(SinkError::Rejected("injected failure".to_string()));
        }

        for file in &batch.retract {
            self.nodes.retain(|_, node| &node.file_path != file);
            self.edges.remove(file);
        }
        for id in &batch.drop_nodes {
            self.nodes.remove(id);
        }
        for node in &batch.nodes {
            self.nodes.insert(node.id.clone(), node.clone());
        }
        for edge in &batch.edges {
            self.edges
                .entry(edge.owner().to_string())
                .or_default()
                .push(edge.clone());
        }
        self.batches += 1;
        Ok(())
    }

    fn save_files(&mut self, records: &[&FileRecord], removed: &[String]) -> Result<(), SinkError> {
        for record in records {
            self.saved_files.insert(record.path.clone());
        }
        for path in removed {
            self.saved_files.remove(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{EdgeType, Location, SymbolKind};

    fn batch() -> GraphBatch {
        let node = Symbol::new("Base", "Base", SymbolKind::Class).located("a.java", 1, 1);
        let edge = Edge::new(
            EdgeType::Extends,
            SymbolId::for_fqn("Child"),
            node.id.clone(),
            1.0,
            Location {
                file_path: "b.java".to_string(),
                line: 1,
            },
        );
        GraphBatch {
            retract: vec!["a.java".to_string(), "b.java".to_string()],
            drop_nodes: Vec::new(),
            nodes: vec![node],
            edges: vec![edge],
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let mut sink = MemorySink::new();
        sink.fail_next(2);

        let attempts = write_with_retry(&mut sink, &batch(), 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(sink.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let mut sink = MemorySink::new();
        sink.fail_next(5);

        let err = write_with_retry(&mut sink, &batch(), 1, Duration::from_millis(1))
            .await
            .unwrap_err();
        match err {
            CoreError::SinkWriteFailure { files, attempts, .. } => {
                assert_eq!(files, 2);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.batches, 0);
    }

    #[test]
    fn test_retract_replaces_previous_rows() {
        let mut sink = MemorySink::new();
        sink.write_batch(&batch()).unwrap();
        sink.write_batch(&batch()).unwrap();
        assert_eq!(sink.edge_count(), 1);
        assert_eq!(sink.nodes.len(), 1);
    }
}
