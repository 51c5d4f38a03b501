//! symgraph - cross-file symbol resolution library
//!
//! Collects symbols from Java and Go sources, resolves references across
//! files into a confidence-scored graph, and keeps that graph up to date
//! incrementally.

pub mod core;
pub mod languages;
pub mod storage;

pub use crate::core::config::Config;
pub use crate::core::incremental::{FileChange, IncrementalController, RunReport};
pub use crate::core::parser::CodeParser;
pub use crate::core::query::GraphQuery;
pub use crate::core::sink::{GraphBatch, GraphSink, MemorySink};
pub use crate::core::table::SymbolTable;
pub use crate::languages::LanguageRegistry;
pub use crate::storage::Database;
