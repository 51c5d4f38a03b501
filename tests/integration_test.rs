//! Integration tests for symgraph
//!
//! These tests run the controller end to end over real Java and Go files
//! written to temporary project directories.

use std::path::Path;

use tempfile::TempDir;

use symgraph::core::error::SinkError;
use symgraph::core::incremental::{FileChange, FileRecord, FileState};
use symgraph::core::model::{Edge, EdgeType, SymbolKind};
use symgraph::core::parser::SourceFile;
use symgraph::core::table::SymbolLookup;
use symgraph::{Config, Database, GraphBatch, GraphQuery, GraphSink, IncrementalController, MemorySink};

fn write_file(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn controller(dir: &TempDir) -> IncrementalController<MemorySink> {
    IncrementalController::new(dir.path(), Config::default(), MemorySink::new())
}

const BASE: &str = r#"
package app;

public class Base {
    public void run() {}
}
"#;

const CHILD: &str = r#"
package app;

public class Child extends Base {
    public void go() {
        run();
    }
}
"#;

const ORPHAN: &str = r#"
package app;

public class Orphan extends Unknown {}
"#;

fn edges_of_type<S: GraphSink>(
    controller: &IncrementalController<S>,
    owner: &str,
    edge_type: EdgeType,
) -> Vec<symgraph::core::model::Edge> {
    controller
        .table()
        .edges_of(owner)
        .into_iter()
        .filter(|e| e.edge_type == edge_type)
        .collect()
}

#[tokio::test]
async fn test_base_child_extends_across_files() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/Base.java", BASE);
    write_file(dir.path(), "app/Child.java", CHILD);

    let mut controller = controller(&dir);
    let report = controller.sync_project().await.unwrap();
    assert_eq!(report.files_collected, 2);
    assert!(report.failures.is_empty());

    let extends = edges_of_type(&controller, "app/Child.java", EdgeType::Extends);
    assert_eq!(extends.len(), 1);
    let base = controller.table().lookup_fqn("app.Base").unwrap();
    assert_eq!(extends[0].target_id, base.id);
    assert_eq!(extends[0].confidence, 1.0);

    // Inherited call resolves through the hierarchy
    let calls = edges_of_type(&controller, "app/Child.java", EdgeType::Calls);
    let run = controller.table().lookup_fqn("app.Base.run").unwrap();
    assert!(calls.iter().any(|c| c.target_id == run.id));

    // Everything the table holds reached the sink
    assert_eq!(controller.sink().edge_count(), controller.table().edge_count());
}

#[tokio::test]
async fn test_unknown_supertype_gets_placeholder() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/Orphan.java", ORPHAN);

    let mut controller = controller(&dir);
    let report = controller.sync_project().await.unwrap();
    assert!(report.unresolved >= 1);

    let extends = edges_of_type(&controller, "app/Orphan.java", EdgeType::Extends);
    assert_eq!(extends.len(), 1);
    assert_eq!(extends[0].confidence, 0.5);
    let target = controller.table().lookup_id(&extends[0].target_id).unwrap();
    assert_eq!(target.kind, SymbolKind::External);
}

#[tokio::test]
async fn test_deleting_supertype_degrades_to_placeholder() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/Base.java", BASE);
    write_file(dir.path(), "app/Child.java", CHILD);

    let mut controller = controller(&dir);
    controller.sync_project().await.unwrap();

    std::fs::remove_file(dir.path().join("app/Base.java")).unwrap();
    let report = controller
        .update_paths(&["app/Base.java".to_string()])
        .await
        .unwrap();
    assert_eq!(report.files_removed, 1);
    assert!(report.resolved.contains(&"app/Child.java".to_string()));

    assert!(controller.table().lookup_defined("app.Base").is_none());
    assert!(controller.record("app/Base.java").is_none());
    let extends = edges_of_type(&controller, "app/Child.java", EdgeType::Extends);
    assert_eq!(extends.len(), 1);
    assert_eq!(extends[0].confidence, 0.5);
    assert!(controller
        .table()
        .lookup_id(&extends[0].target_id)
        .unwrap()
        .is_external());
    assert_eq!(
        controller.record("app/Child.java").unwrap().state,
        FileState::Resolved
    );
    controller.table().verify_integrity().unwrap();
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/Base.java", BASE);
    write_file(dir.path(), "app/Child.java", CHILD);
    write_file(dir.path(), "app/Orphan.java", ORPHAN);

    let mut controller = controller(&dir);
    controller.sync_project().await.unwrap();
    let first = controller.table().all_edges();

    let report = controller.sync_project().await.unwrap();
    assert_eq!(report.files_skipped, 3);
    assert_eq!(report.files_collected, 0);
    assert_eq!(controller.table().all_edges(), first);
}

#[tokio::test]
async fn test_edges_do_not_depend_on_arrival_order() {
    let dir = TempDir::new().unwrap();
    let base = SourceFile::new("app/Base.java", "java", BASE);
    let child = SourceFile::new("app/Child.java", "java", CHILD);

    let mut forward = controller(&dir);
    forward
        .apply(vec![
            FileChange::Modified(base.clone()),
            FileChange::Modified(child.clone()),
        ])
        .await
        .unwrap();

    let mut backward = controller(&dir);
    backward
        .apply(vec![FileChange::Modified(child)])
        .await
        .unwrap();
    backward
        .apply(vec![FileChange::Modified(base)])
        .await
        .unwrap();

    assert_eq!(forward.table().all_edges(), backward.table().all_edges());
}

#[tokio::test]
async fn test_update_touches_only_dependents() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/Base.java", BASE);
    write_file(dir.path(), "app/Child.java", CHILD);
    write_file(dir.path(), "app/Orphan.java", ORPHAN);

    let mut controller = controller(&dir);
    controller.sync_project().await.unwrap();
    let orphan_seq = controller.record("app/Orphan.java").unwrap().collected_seq;

    write_file(
        dir.path(),
        "app/Base.java",
        "package app;\n\npublic class Base {\n    public void run() {}\n    public void stop() {}\n}\n",
    );
    let report = controller
        .update_paths(&["app/Base.java".to_string()])
        .await
        .unwrap();

    assert_eq!(
        report.resolved,
        vec!["app/Base.java".to_string(), "app/Child.java".to_string()]
    );
    assert_eq!(
        controller.record("app/Orphan.java").unwrap().collected_seq,
        orphan_seq
    );
    assert!(controller.table().lookup_fqn("app.Base.stop").is_some());
}

#[tokio::test]
async fn test_no_dangling_edges_in_mixed_project() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/Base.java", BASE);
    write_file(dir.path(), "app/Child.java", CHILD);
    write_file(dir.path(), "app/Orphan.java", ORPHAN);
    write_file(
        dir.path(),
        "svc/Loader.java",
        r#"
package svc;

import app.Base;

public class Loader {
    public Object load(String name) throws Exception {
        String cls = "app.Child";
        Object made = Class.forName(cls);
        helper.process(name);
        return Class.forName(name + "Impl");
    }
}
"#,
    );

    let mut controller = controller(&dir);
    controller.sync_project().await.unwrap();

    let table = controller.table();
    table.verify_integrity().unwrap();
    for edge in table.all_edges() {
        assert!(table.lookup_id(&edge.target_id).is_some(), "dangling {:?}", edge);
    }

    // Literal propagated into reflection
    let instantiates = edges_of_type(&controller, "svc/Loader.java", EdgeType::Instantiates);
    let child = table.lookup_fqn("app.Child").unwrap();
    assert!(instantiates.iter().any(|e| e.target_id == child.id));
    assert!(instantiates.iter().any(|e| e.is_dynamic() && e.confidence == 0.1));
}

#[tokio::test]
async fn test_go_package_calls_and_embedding() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "models/user.go",
        r#"
package models

type Base struct {
    ID int
}

type User struct {
    Base
    Name string
}

func NewUser(name string) *User {
    return &User{Name: name}
}
"#,
    );
    write_file(
        dir.path(),
        "main.go",
        r#"
package main

import "github.com/acme/app/models"

func main() {
    u := models.NewUser("ann")
    _ = u
}
"#,
    );

    let mut controller = controller(&dir);
    controller.sync_project().await.unwrap();
    let table = controller.table();

    let mixins = edges_of_type(&controller, "models/user.go", EdgeType::UsesMixin);
    assert_eq!(mixins.len(), 1);
    assert_eq!(mixins[0].target_id, table.lookup_fqn("models.Base").unwrap().id);

    let calls = edges_of_type(&controller, "main.go", EdgeType::Calls);
    let new_user = table.lookup_fqn("models.NewUser").unwrap();
    assert!(calls
        .iter()
        .any(|c| c.target_id == new_user.id && c.confidence == 1.0));
}

#[tokio::test]
async fn test_sqlite_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/Base.java", BASE);
    write_file(dir.path(), "app/Child.java", CHILD);
    write_file(dir.path(), "app/Orphan.java", ORPHAN);

    let first_edges = {
        let mut controller = symgraph::core::open_project(dir.path(), Config::default()).unwrap();
        controller.sync_project().await.unwrap();
        controller.table().all_edges()
    };

    let db_path = Config::default().database_path(dir.path());
    assert!(db_path.exists());
    let stats = Database::open(&db_path).unwrap().stats().unwrap();
    assert_eq!(stats.files, 3);
    assert_eq!(stats.edges, first_edges.len());

    let mut controller = symgraph::core::open_project(dir.path(), Config::default()).unwrap();
    assert_eq!(controller.table().all_edges(), first_edges);
    assert!(controller.table().lookup_fqn("app.Child").is_some());

    let report = controller.sync_project().await.unwrap();
    assert_eq!(report.files_skipped, 3);
    assert!(report.resolved.is_empty());

    let query = GraphQuery::new(controller.table());
    assert_eq!(query.definition("Child")[0].fqn, "app.Child");
    let refs = query.references("app.Base").unwrap();
    assert!(refs.references.iter().any(|r| r.edge_type == "EXTENDS"));
}

#[tokio::test]
async fn test_config_routes_and_services() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "web/Users.java",
        r#"
package web;

public class Users {
    public void list() {
        Object mailer = context.getBean("mailer");
    }
}
"#,
    );
    write_file(dir.path(), "web/SmtpMailer.java", "package web;\n\npublic class SmtpMailer {}\n");
    write_file(
        dir.path(),
        "symgraph.toml",
        r#"
[enrichment.services]
mailer = "web.SmtpMailer"

[[enrichment.routes]]
method = "get"
path = "/users"
handler = "web.Users.list"
"#,
    );

    let config = Config::discover(dir.path()).unwrap();
    let mut controller = IncrementalController::new(dir.path(), config, MemorySink::new());
    controller.sync_project().await.unwrap();
    let table = controller.table();

    let injects = edges_of_type(&controller, "web/Users.java", EdgeType::Injects);
    assert_eq!(injects.len(), 1);
    assert_eq!(injects[0].target_id, table.lookup_fqn("web.SmtpMailer").unwrap().id);

    let routes: Vec<_> = table
        .all_edges()
        .into_iter()
        .filter(|e| e.edge_type == EdgeType::RoutesTo)
        .collect();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].target_id, table.lookup_fqn("web.Users.list").unwrap().id);
}

// ==================== Sink failures and restarts ====================

/// Graph database whose batch writes can be switched off
struct FlakyDatabase {
    db: Database,
    reject: bool,
}

impl GraphSink for FlakyDatabase {
    fn write_batch(&mut self, batch: &GraphBatch) -> Result<(), SinkError> {
        if self.reject {
            return Err(SinkError::Storage("disk full".to_string()));
        }
        self.db.write_batch(batch)
    }

    fn save_files(&mut self, records: &[&FileRecord], removed: &[String]) -> Result<(), SinkError> {
        self.db.save_files(records, removed)
    }
}

fn no_retries() -> Config {
    let mut config = Config::default();
    config.pipeline.sink_retries = 0;
    config.pipeline.sink_backoff_ms = 1;
    config
}

/// Same as `open_project`, but every batch write fails
fn open_rejecting(dir: &TempDir) -> IncrementalController<FlakyDatabase> {
    let config = no_retries();
    let db = Database::open(&config.database_path(dir.path())).unwrap();
    db.init_schema().unwrap();
    let (records, placeholders, edges) = db.load_state().unwrap();
    let mut controller =
        IncrementalController::new(dir.path(), config, FlakyDatabase { db, reject: true });
    controller.restore(records, placeholders, edges).unwrap();
    controller
}

fn stored_edges(dir: &TempDir) -> Vec<Edge> {
    let db = Database::open(&Config::default().database_path(dir.path())).unwrap();
    db.load_state().unwrap().2
}

/// Edges of a from-scratch run over the same directory
async fn fresh_edges(dir: &TempDir, config: Config) -> Vec<Edge> {
    let mut controller = IncrementalController::new(dir.path(), config, MemorySink::new());
    controller.sync_project().await.unwrap();
    controller.table().all_edges()
}

#[tokio::test]
async fn test_failed_batch_does_not_break_reopening() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/Base.java", BASE);
    write_file(dir.path(), "app/Child.java", CHILD);
    write_file(dir.path(), "app/Orphan.java", ORPHAN);
    {
        let mut controller = symgraph::core::open_project(dir.path(), Config::default()).unwrap();
        controller.sync_project().await.unwrap();
    }

    write_file(dir.path(), "app/Base.java", "package app;\n\npublic class Other {}\n");
    {
        let mut controller = open_rejecting(&dir);
        let report = controller
            .update_paths(&["app/Base.java".to_string()])
            .await
            .unwrap();
        assert!(report.sink_failures > 0);
        assert_eq!(
            controller.record("app/Child.java").unwrap().state,
            FileState::Collected
        );
    }

    // The rows on disk still describe the old Base; reopening must cope
    let mut controller = symgraph::core::open_project(dir.path(), Config::default()).unwrap();
    controller.table().verify_integrity().unwrap();
    let report = controller.sync_project().await.unwrap();
    assert_eq!(report.sink_failures, 0);
    assert!(report.resolved.contains(&"app/Child.java".to_string()));
    assert!(controller
        .records()
        .values()
        .all(|r| r.state == FileState::Resolved));

    let extends = edges_of_type(&controller, "app/Child.java", EdgeType::Extends);
    assert_eq!(extends.len(), 1);
    assert_eq!(extends[0].confidence, 0.5);

    let edges = controller.table().all_edges();
    assert_eq!(edges, fresh_edges(&dir, Config::default()).await);
    assert_eq!(stored_edges(&dir).len(), edges.len());
}

#[tokio::test]
async fn test_removal_with_failed_batch_is_retracted_later() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/Base.java", BASE);
    write_file(dir.path(), "app/Child.java", CHILD);
    {
        let mut controller = symgraph::core::open_project(dir.path(), Config::default()).unwrap();
        controller.sync_project().await.unwrap();
    }

    std::fs::remove_file(dir.path().join("app/Child.java")).unwrap();
    {
        let mut controller = open_rejecting(&dir);
        let report = controller
            .update_paths(&["app/Child.java".to_string()])
            .await
            .unwrap();
        assert_eq!(report.sink_failures, 1);
    }
    assert!(stored_edges(&dir)
        .iter()
        .any(|e| e.owner() == "app/Child.java"));

    let mut controller = symgraph::core::open_project(dir.path(), Config::default()).unwrap();
    let report = controller.sync_project().await.unwrap();
    assert_eq!(report.files_removed, 1);
    assert!(controller.record("app/Child.java").is_none());

    assert!(stored_edges(&dir)
        .iter()
        .all(|e| e.owner() != "app/Child.java"));
    let db = Database::open(&Config::default().database_path(dir.path())).unwrap();
    assert_eq!(db.stats().unwrap().files, 1);
}

const USERS: &str = r#"
package web;

public class Users {
    public void list() {
        Object mailer = context.getBean("mailer");
    }
}
"#;

#[tokio::test]
async fn test_service_map_change_re_resolves_lookups() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "web/Users.java", USERS);
    write_file(dir.path(), "web/SmtpMailer.java", "package web;\n\npublic class SmtpMailer {}\n");
    write_file(dir.path(), "web/SesMailer.java", "package web;\n\npublic class SesMailer {}\n");
    write_file(dir.path(), "symgraph.toml", "[enrichment.services]\nmailer = \"web.SmtpMailer\"\n");
    {
        let config = Config::discover(dir.path()).unwrap();
        let mut controller = symgraph::core::open_project(dir.path(), config).unwrap();
        controller.sync_project().await.unwrap();
    }

    write_file(dir.path(), "symgraph.toml", "[enrichment.services]\nmailer = \"web.SesMailer\"\n");
    let config = Config::discover(dir.path()).unwrap();
    let mut controller = symgraph::core::open_project(dir.path(), config.clone()).unwrap();
    let report = controller.sync_project().await.unwrap();
    assert!(report.resolved.contains(&"web/Users.java".to_string()));

    let injects = edges_of_type(&controller, "web/Users.java", EdgeType::Injects);
    assert_eq!(injects.len(), 1);
    let ses = controller.table().lookup_fqn("web.SesMailer").unwrap();
    assert_eq!(injects[0].target_id, ses.id);
    assert_eq!(controller.table().all_edges(), fresh_edges(&dir, config).await);

    // Same settings again: nothing to do
    let report = controller.sync_project().await.unwrap();
    assert_eq!(report.files_skipped, 3);
    assert!(report.resolved.is_empty());
}

#[tokio::test]
async fn test_new_definition_takes_over_short_name() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "lib/Model.java", "package lib;\n\npublic class Model {}\n");
    write_file(
        dir.path(),
        "app/User.java",
        "package app;\n\npublic class User extends Model {}\n",
    );

    let mut controller = controller(&dir);
    controller.sync_project().await.unwrap();
    let extends = edges_of_type(&controller, "app/User.java", EdgeType::Extends);
    let lib_model = controller.table().lookup_fqn("lib.Model").unwrap();
    assert_eq!(extends[0].target_id, lib_model.id);

    write_file(dir.path(), "app/Model.java", "package app;\n\npublic class Model {}\n");
    let report = controller
        .update_paths(&["app/Model.java".to_string()])
        .await
        .unwrap();
    assert!(report.resolved.contains(&"app/User.java".to_string()));

    let extends = edges_of_type(&controller, "app/User.java", EdgeType::Extends);
    let app_model = controller.table().lookup_fqn("app.Model").unwrap();
    assert_eq!(extends[0].target_id, app_model.id);
    assert_eq!(
        controller.table().all_edges(),
        fresh_edges(&dir, Config::default()).await
    );
}

#[tokio::test]
async fn test_unparseable_file_is_a_parse_failure() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "app/Base.java", BASE);
    write_file(dir.path(), "app/Junk.java", "%%% }}}} ((( ;;;");

    let mut controller = controller(&dir);
    let report = controller.sync_project().await.unwrap();
    assert!(report.has_parse_failures());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "app/Junk.java");
    assert_eq!(
        controller.record("app/Junk.java").unwrap().state,
        FileState::Failed
    );
    assert_eq!(
        controller.record("app/Base.java").unwrap().state,
        FileState::Resolved
    );
}
