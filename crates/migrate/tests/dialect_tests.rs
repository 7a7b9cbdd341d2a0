use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use elif_migrate::{
    Dialect, DialectCapabilities, DialectRegistry, MemoryConnection, MigrateResult, Migration,
    MigrationConfig, MigrationDirection, Migrator, PostgresDialect, SchemaTranslator,
};

const DUMP: &str = "CREATE TABLE widgets (id INT);\n";

/// Engine without transactional DDL whose schema dump is a fixed script
#[derive(Debug, Default)]
struct SnapshotDialect {
    sql: PostgresDialect,
    loaded: Mutex<String>,
}

#[async_trait]
impl Dialect for SnapshotDialect {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            transactional_ddl: false,
            primary_key_index: true,
        }
    }

    fn translator(&self) -> &dyn SchemaTranslator {
        self.sql.translator()
    }

    fn placeholder(&self, index: usize) -> String {
        self.sql.placeholder(index)
    }

    async fn dump_schema(&self, out: &mut (dyn Write + Send)) -> MigrateResult<()> {
        out.write_all(DUMP.as_bytes())?;
        Ok(())
    }

    async fn load_schema(&self, input: &mut (dyn Read + Send)) -> MigrateResult<()> {
        let mut script = String::new();
        input.read_to_string(&mut script)?;
        *self.loaded.lock().unwrap() = script;
        Ok(())
    }
}

fn migrator(
    dialect: Arc<dyn Dialect>,
    config: MigrationConfig,
) -> (MemoryConnection, Migrator<MemoryConnection>) {
    let conn = MemoryConnection::new(dialect);
    let mut migrator = Migrator::new(conn.clone(), config);
    for direction in [MigrationDirection::Up, MigrationDirection::Down] {
        let sql = match direction {
            MigrationDirection::Up => "CREATE TABLE widgets (id INT)",
            MigrationDirection::Down => "DROP TABLE widgets",
        };
        migrator
            .add_migration(Migration::sql("20240101000000", "create_widgets", direction, sql))
            .unwrap();
    }
    (conn, migrator)
}

#[test]
fn test_registry_accepts_new_dialect() {
    let mut registry = DialectRegistry::with_defaults();
    registry.register(Arc::new(SnapshotDialect::default()));

    let dialect = registry.get("Snapshot").unwrap();
    assert_eq!(dialect.name(), "snapshot");
    assert!(!dialect.capabilities().transactional_ddl);
    assert_eq!(registry.names().len(), 5);
}

#[tokio::test]
async fn test_new_non_transactional_dialect_gets_compensation() {
    let (conn, mut migrator) = migrator(
        Arc::new(SnapshotDialect::default()),
        MigrationConfig::default(),
    );
    migrator.ensure_ledger().await.unwrap();
    conn.fail_when("INSERT INTO \"schema_migration\"");

    assert!(migrator.up().await.is_err());
    assert_eq!(conn.statement_count("DROP TABLE widgets"), 1);
    assert!(!conn.has_table("widgets"));
}

#[tokio::test]
async fn test_schema_is_dumped_after_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = MigrationConfig::default().with_schema_path(dir.path().join("db"));
    let (_conn, mut migrator) = migrator(Arc::new(SnapshotDialect::default()), config);

    migrator.up().await.unwrap();

    let dumped = std::fs::read_to_string(dir.path().join("db").join("schema.sql")).unwrap();
    assert_eq!(dumped, DUMP);
}

#[tokio::test]
async fn test_load_schema_then_log_only() {
    let dir = tempfile::tempdir().unwrap();
    let schema = dir.path().join("schema.sql");
    std::fs::write(&schema, DUMP).unwrap();

    let dialect = Arc::new(SnapshotDialect::default());
    let (conn, mut migrator) = migrator(dialect.clone(), MigrationConfig::default());

    let result = migrator.load_schema(&schema).await.unwrap();
    assert_eq!(result.applied_migrations, vec!["20240101000000"]);
    assert_eq!(*dialect.loaded.lock().unwrap(), DUMP);
    assert_eq!(conn.rows("schema_migration"), vec!["20240101000000"]);
    assert_eq!(conn.statement_count("CREATE TABLE widgets"), 0);
}

#[tokio::test]
async fn test_load_missing_schema_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_conn, mut migrator) = migrator(
        Arc::new(SnapshotDialect::default()),
        MigrationConfig::default(),
    );
    assert!(migrator
        .load_schema(&dir.path().join("missing.sql"))
        .await
        .is_err());
}
