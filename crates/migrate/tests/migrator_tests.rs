use std::sync::Arc;

use elif_migrate::{
    Dialect, Executor, LedgerOperation, MemoryConnection, MigrateError, Migration, MigrationConfig,
    MigrationDirection, MigrationSet, MigrationState, Migrator, MySqlDialect, PostgresDialect,
    YdbDialect,
};

const V1: &str = "20240101000000";
const V2: &str = "20240102000000";
const V3: &str = "20240103000000";
const LEDGER: &str = "schema_migration";

fn tables() -> [(&'static str, &'static str); 3] {
    [(V1, "widgets"), (V2, "gadgets"), (V3, "gizmos")]
}

/// Three create/drop pairs, pushed out of order to exercise sorting
fn table_migrations() -> (MigrationSet, MigrationSet) {
    let mut up = MigrationSet::new(MigrationDirection::Up);
    let mut down = MigrationSet::new(MigrationDirection::Down);
    for (version, table) in tables().iter().rev() {
        let name = format!("create_{}", table);
        up.push(Migration::sql(
            version,
            &name,
            MigrationDirection::Up,
            &format!("CREATE TABLE {} (id INT)", table),
        ))
        .unwrap();
        down.push(Migration::sql(
            version,
            &name,
            MigrationDirection::Down,
            &format!("DROP TABLE {}", table),
        ))
        .unwrap();
    }
    (up, down)
}

fn migrator(dialect: Arc<dyn Dialect>) -> (MemoryConnection, Migrator<MemoryConnection>) {
    let conn = MemoryConnection::new(dialect);
    let (up, down) = table_migrations();
    let migrator = Migrator::new(conn.clone(), MigrationConfig::default()).with_migrations(up, down);
    (conn, migrator)
}

fn postgres() -> (MemoryConnection, Migrator<MemoryConnection>) {
    migrator(Arc::new(PostgresDialect::new()))
}

fn ydb() -> (MemoryConnection, Migrator<MemoryConnection>) {
    migrator(Arc::new(YdbDialect::new()))
}

#[tokio::test]
async fn test_ledger_creation_is_idempotent() {
    let (conn, mut migrator) = postgres();

    assert!(migrator.ensure_ledger().await.unwrap());
    assert!(!migrator.ensure_ledger().await.unwrap());

    assert_eq!(conn.statement_count("CREATE TABLE"), 1);
    assert!(conn.has_table(LEDGER));
}

#[tokio::test]
async fn test_up_applies_in_order_and_is_monotonic() {
    let (conn, mut migrator) = postgres();

    let result = migrator.up().await.unwrap();
    assert_eq!(result.applied_count, 3);
    assert_eq!(result.applied_migrations, vec![V1, V2, V3]);
    assert_eq!(conn.rows(LEDGER), vec![V1, V2, V3]);
    assert!(conn.has_table("widgets") && conn.has_table("gadgets") && conn.has_table("gizmos"));

    let again = migrator.up().await.unwrap();
    assert_eq!(again.applied_count, 0);
    assert_eq!(again.skipped_count, 3);
    assert_eq!(conn.rows(LEDGER).len(), 3);
}

#[tokio::test]
async fn test_up_to_applies_only_requested_steps() {
    let (conn, mut migrator) = postgres();

    let result = migrator.up_to(1).await.unwrap();
    assert_eq!(result.applied_migrations, vec![V1]);
    assert_eq!(conn.rows(LEDGER), vec![V1]);
    assert!(!conn.has_table("gadgets"));

    let result = migrator.up_to(1).await.unwrap();
    assert_eq!(result.applied_migrations, vec![V2]);
    assert_eq!(result.skipped_count, 1);
}

#[tokio::test]
async fn test_dialect_specific_migrations_are_filtered() {
    let build = |dialect: Arc<dyn Dialect>| {
        let conn = MemoryConnection::new(dialect);
        let mut migrator = Migrator::new(conn.clone(), MigrationConfig::default());
        migrator
            .add_migration(
                Migration::sql(V1, "mysql_only", MigrationDirection::Up, "CREATE TABLE m (id INT)")
                    .for_dialect("mysql"),
            )
            .unwrap();
        migrator
            .add_migration(
                Migration::sql(V1, "mysql_only", MigrationDirection::Down, "DROP TABLE m")
                    .for_dialect("mysql"),
            )
            .unwrap();
        migrator
            .add_migration(Migration::sql(
                V2,
                "everywhere",
                MigrationDirection::Up,
                "CREATE TABLE e (id INT)",
            ))
            .unwrap();
        migrator
            .add_migration(Migration::sql(
                V2,
                "everywhere",
                MigrationDirection::Down,
                "DROP TABLE e",
            ))
            .unwrap();
        (conn, migrator)
    };

    let (pg_conn, mut pg) = build(Arc::new(PostgresDialect::new()));
    pg.up().await.unwrap();
    assert_eq!(pg_conn.rows(LEDGER), vec![V2]);
    assert!(!pg_conn.has_table("m"));

    let (my_conn, mut my) = build(Arc::new(MySqlDialect::new()));
    my.up().await.unwrap();
    assert_eq!(my_conn.rows(LEDGER), vec![V1, V2]);
    assert!(my_conn.has_table("m"));
}

#[tokio::test]
async fn test_failed_migration_rolls_back_on_transactional_engine() {
    let conn = MemoryConnection::new(Arc::new(PostgresDialect::new()));
    let mut migrator = Migrator::new(conn.clone(), MigrationConfig::default());
    migrator
        .add_migration(Migration::sql(
            V1,
            "half_broken",
            MigrationDirection::Up,
            "CREATE TABLE widgets (id INT); INSERT INTO missing_table (id) VALUES (1);",
        ))
        .unwrap();

    let err = migrator.up().await.unwrap_err();
    match err {
        MigrateError::Execution {
            version, direction, ..
        } => {
            assert_eq!(version, V1);
            assert_eq!(direction, MigrationDirection::Up);
        }
        other => panic!("unexpected error: {}", other),
    }

    assert!(!conn.has_table("widgets"));
    assert!(conn.rows(LEDGER).is_empty());
}

#[tokio::test]
async fn test_failed_ledger_insert_rolls_back_on_transactional_engine() {
    let (conn, mut migrator) = postgres();
    migrator.ensure_ledger().await.unwrap();
    conn.fail_when("INSERT INTO \"schema_migration\"");

    let err = migrator.up().await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Ledger {
            operation: LedgerOperation::Insert,
            ..
        }
    ));
    assert!(!conn.has_table("widgets"));
    assert_eq!(conn.statement_count("DROP TABLE"), 0);
}

#[tokio::test]
async fn test_failed_ledger_insert_runs_compensation_once() {
    let (conn, mut migrator) = ydb();
    migrator.ensure_ledger().await.unwrap();
    conn.fail_when("INSERT INTO `schema_migration`");

    let err = migrator.up().await.unwrap_err();
    match &err {
        MigrateError::Ledger {
            operation, version, ..
        } => {
            assert_eq!(*operation, LedgerOperation::Insert);
            assert_eq!(version, V1);
        }
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(conn.statement_count("DROP TABLE widgets"), 1);
    assert!(!conn.has_table("widgets"));
    assert!(!conn.has_table("gadgets"));
    assert!(conn.rows(LEDGER).is_empty());
}

#[tokio::test]
async fn test_failed_compensation_still_returns_ledger_error() {
    let (conn, mut migrator) = ydb();
    migrator.ensure_ledger().await.unwrap();
    conn.fail_when("INSERT INTO `schema_migration`");
    conn.fail_when("DROP TABLE");

    let err = migrator.up().await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Ledger {
            operation: LedgerOperation::Insert,
            ..
        }
    ));
    assert_eq!(conn.statement_count("DROP TABLE widgets"), 1);
    // The schema change stays behind without a ledger row
    assert!(conn.has_table("widgets"));
    assert!(conn.rows(LEDGER).is_empty());
}

#[tokio::test]
async fn test_missing_opposite_is_rejected_before_execution() {
    let conn = MemoryConnection::new(Arc::new(YdbDialect::new()));
    let (up, _) = table_migrations();
    let mut down = MigrationSet::new(MigrationDirection::Down);
    down.push(Migration::sql(V1, "create_widgets", MigrationDirection::Down, "DROP TABLE widgets"))
        .unwrap();
    let mut migrator = Migrator::new(conn.clone(), MigrationConfig::default()).with_migrations(up, down);

    let err = migrator.up().await.unwrap_err();
    assert!(matches!(
        &err,
        MigrateError::MissingOpposite { version, direction: MigrationDirection::Down } if version == V2
    ));
    assert_eq!(conn.statement_count("widgets"), 0);
    assert!(conn.rows(LEDGER).is_empty());

    // Only pending candidates within the step need an opposite
    let result = migrator.up_to(1).await.unwrap();
    assert_eq!(result.applied_migrations, vec![V1]);
}

#[tokio::test]
async fn test_non_transactional_up_and_down() {
    let (conn, mut migrator) = ydb();

    assert_eq!(migrator.up().await.unwrap().applied_count, 3);
    assert_eq!(conn.rows(LEDGER), vec![V1, V2, V3]);

    let result = migrator.down(2).await.unwrap();
    assert_eq!(result.rolled_back_migrations, vec![V3, V2]);
    assert_eq!(conn.rows(LEDGER), vec![V1]);
    assert!(conn.has_table("widgets"));
    assert!(!conn.has_table("gizmos"));
}

#[tokio::test]
async fn test_failed_ledger_delete_reapplies_up_migration() {
    let (conn, mut migrator) = ydb();
    migrator.up().await.unwrap();
    conn.fail_when("DELETE FROM `schema_migration`");

    let err = migrator.down(1).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Ledger {
            operation: LedgerOperation::Delete,
            ..
        }
    ));
    assert_eq!(conn.statement_count("CREATE TABLE gizmos"), 2);
    assert!(conn.has_table("gizmos"));
    assert_eq!(conn.rows(LEDGER), vec![V1, V2, V3]);
}

#[tokio::test]
async fn test_down_never_exceeds_applied_count() {
    let (conn, mut migrator) = postgres();
    migrator.up_to(2).await.unwrap();

    let result = migrator.down(10).await.unwrap();
    assert_eq!(result.rolled_back_count, 2);
    assert_eq!(result.rolled_back_migrations, vec![V2, V1]);
    assert!(conn.rows(LEDGER).is_empty());
    assert_eq!(conn.statement_count("DROP TABLE gizmos"), 0);

    let nothing = migrator.down(0).await.unwrap();
    assert_eq!(nothing.rolled_back_count, 0);
}

#[tokio::test]
async fn test_down_fails_for_untracked_version() {
    let (conn, mut migrator) = postgres();
    migrator.up().await.unwrap();
    let mut raw = conn.clone();
    raw.execute(&format!("DELETE FROM {} WHERE version = '{}'", LEDGER, V2), &[])
        .await
        .unwrap();

    let err = migrator.down(1).await.unwrap_err();
    match err {
        MigrateError::NotApplied(version) => assert_eq!(version, V2),
        other => panic!("unexpected error: {}", other),
    }
    assert!(conn.has_table("gizmos"));
    assert_eq!(conn.statement_count("DROP TABLE"), 0);
}

#[tokio::test]
async fn test_status_reports_in_version_order() {
    let (_conn, mut migrator) = postgres();

    let before = migrator.status().await.unwrap();
    assert!(before.iter().all(|s| s.state == MigrationState::Pending));

    migrator.up_to(2).await.unwrap();
    let statuses = migrator.status().await.unwrap();
    let summary: Vec<(&str, MigrationState)> = statuses
        .iter()
        .map(|s| (s.version.as_str(), s.state))
        .collect();
    assert_eq!(
        summary,
        vec![
            (V1, MigrationState::Applied),
            (V2, MigrationState::Applied),
            (V3, MigrationState::Pending),
        ]
    );

    let mut out = Vec::new();
    migrator.write_status(&mut out).await.unwrap();
    let table = String::from_utf8(out).unwrap();
    assert!(table.starts_with("Version"));
    assert!(table
        .lines()
        .any(|line| line.starts_with(V3) && line.ends_with("Pending")));
}

#[tokio::test]
async fn test_reset_rolls_back_and_reapplies() {
    let (conn, mut migrator) = postgres();
    migrator.up().await.unwrap();

    let (rolled_back, applied) = migrator.reset().await.unwrap();
    assert_eq!(rolled_back.rolled_back_count, 3);
    assert_eq!(applied.applied_count, 3);
    assert_eq!(conn.rows(LEDGER), vec![V1, V2, V3]);
    assert_eq!(conn.statement_count("CREATE TABLE widgets"), 2);
}

#[tokio::test]
async fn test_log_only_records_without_running() {
    let (conn, mut migrator) = postgres();
    migrator.up_to(1).await.unwrap();

    let result = migrator.up_log_only().await.unwrap();
    assert_eq!(result.applied_migrations, vec![V2, V3]);
    assert_eq!(result.skipped_count, 1);
    assert_eq!(conn.rows(LEDGER), vec![V1, V2, V3]);
    assert!(!conn.has_table("gadgets"));
    assert_eq!(conn.statement_count("CREATE TABLE gadgets"), 0);
}

#[tokio::test]
async fn test_log_only_failure_records_nothing_on_transactional_engine() {
    let (conn, mut migrator) = postgres();
    migrator.ensure_ledger().await.unwrap();
    conn.fail_when("INSERT INTO \"schema_migration\"");

    assert!(migrator.up_log_only().await.is_err());
    assert!(conn.rows(LEDGER).is_empty());
}

#[tokio::test]
async fn test_dump_failure_leaves_no_schema_file() {
    let dir = tempfile::tempdir().unwrap();
    let conn = MemoryConnection::new(Arc::new(PostgresDialect::new()));
    let (up, down) = table_migrations();
    let config = MigrationConfig::default().with_schema_path(dir.path());
    let mut migrator = Migrator::new(conn, config).with_migrations(up, down);

    // Dump failures are logged, not returned
    assert_eq!(migrator.up().await.unwrap().applied_count, 3);
    assert!(!dir.path().join("schema.sql").exists());
    assert!(matches!(
        migrator.dump_schema().await,
        Err(MigrateError::Unsupported(_))
    ));
}

#[tokio::test]
async fn test_dump_without_schema_path_is_noop() {
    let (_conn, migrator) = postgres();
    assert_eq!(migrator.dump_schema().await.unwrap(), None);
}

#[tokio::test]
async fn test_failed_ledger_delete_rolls_back_on_transactional_engine() {
    let (conn, mut migrator) = postgres();
    migrator.up().await.unwrap();
    conn.fail_when("DELETE FROM \"schema_migration\"");

    let err = migrator.down(1).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Ledger {
            operation: LedgerOperation::Delete,
            ..
        }
    ));
    assert!(conn.has_table("gizmos"));
    assert_eq!(conn.rows(LEDGER), vec![V1, V2, V3]);
    assert_eq!(conn.statement_count("CREATE TABLE gizmos"), 1);
}

#[tokio::test]
async fn test_failed_down_body_keeps_ledger_row() {
    let (conn, mut migrator) = postgres();
    migrator.up().await.unwrap();
    conn.fail_when("DROP TABLE gizmos");

    let err = migrator.down(0).await.unwrap_err();
    assert!(matches!(err, MigrateError::Execution { .. }));
    assert!(conn.has_table("gizmos"));
    assert_eq!(conn.rows(LEDGER), vec![V1, V2, V3]);
}

fn variant_migrator() -> (MemoryConnection, Migrator<MemoryConnection>) {
    let conn = MemoryConnection::new(Arc::new(MySqlDialect::new()));
    let mut migrator = Migrator::new(conn.clone(), MigrationConfig::default());
    for (db_type, table) in [("all", "generic_things"), ("mysql", "mysql_things")] {
        let name = format!("create_{}", table);
        migrator
            .add_migration(
                Migration::sql(
                    V1,
                    &name,
                    MigrationDirection::Up,
                    &format!("CREATE TABLE {} (id INT)", table),
                )
                .for_dialect(db_type),
            )
            .unwrap();
        migrator
            .add_migration(
                Migration::sql(
                    V1,
                    &name,
                    MigrationDirection::Down,
                    &format!("DROP TABLE {}", table),
                )
                .for_dialect(db_type),
            )
            .unwrap();
    }
    (conn, migrator)
}

#[tokio::test]
async fn test_dialect_variant_replaces_generic_migration() {
    let (conn, mut migrator) = variant_migrator();

    let result = migrator.up().await.unwrap();
    assert_eq!(result.applied_migrations, vec![V1]);
    assert_eq!(conn.rows(LEDGER), vec![V1]);
    assert!(conn.has_table("mysql_things"));
    assert!(!conn.has_table("generic_things"));
    assert_eq!(conn.statement_count("generic_things"), 0);

    let statuses = migrator.status().await.unwrap();
    assert_eq!(statuses.len(), 1);

    let rolled_back = migrator.down(0).await.unwrap();
    assert_eq!(rolled_back.rolled_back_migrations, vec![V1]);
    assert!(!conn.has_table("mysql_things"));
    assert!(conn.rows(LEDGER).is_empty());
}

#[tokio::test]
async fn test_compensation_uses_matching_dialect_variant() {
    let (conn, mut migrator) = variant_migrator();
    migrator.ensure_ledger().await.unwrap();
    conn.fail_when("INSERT INTO `schema_migration`");

    assert!(migrator.up().await.is_err());
    assert_eq!(conn.statement_count("DROP TABLE mysql_things"), 1);
    assert_eq!(conn.statement_count("generic_things"), 0);
    assert!(!conn.has_table("mysql_things"));
}
