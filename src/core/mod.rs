//! Resolution core: symbol table, passes, enrichment and incremental control

pub mod config;
pub mod context;
pub mod error;
pub mod incremental;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod plugins;
pub mod query;
pub mod resolver;
pub mod sink;
pub mod sketch;
pub mod table;

use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::core::config::Config;
use crate::core::incremental::IncrementalController;
use crate::storage::Database;

/// Open a project's graph database and restore the state of the previous run
pub fn open_project(root: &Path, config: Config) -> anyhow::Result<IncrementalController<Database>> {
    let db_path = config.database_path(root);
    let db = Database::open(&db_path)?;
    db.init_schema()?;
    let (records, placeholders, edges) = db
        .load_state()
        .with_context(|| format!("Failed to load graph state from {:?}", db_path))?;

    info!("Opened graph database {:?}", db_path);
    let mut controller = IncrementalController::new(root, config, db);
    if !records.is_empty() {
        controller.restore(records, placeholders, edges)?;
    }
    Ok(controller)
}
