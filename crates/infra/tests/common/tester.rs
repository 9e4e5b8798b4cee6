//! Direct access to the tables behind a [`SqliteRepository`], bypassing the
//! repository's own reads and writes.
//!
//! [`SqliteRepository`]: repograph_infra::SqliteRepository

use std::path::Path;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, SqliteConnection};
use tokio::runtime::Runtime;

pub struct SqliteTester {
    runtime: Runtime,
    conn: SqliteConnection,
}

impl SqliteTester {
    pub fn open(path: &Path) -> Self {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let options = SqliteConnectOptions::new().filename(path).foreign_keys(true);
        let conn = runtime.block_on(options.connect()).unwrap();
        Self { runtime, conn }
    }

    pub fn tables(&mut self) -> Vec<String> {
        let query = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        );
        self.runtime.block_on(query.fetch_all(&mut self.conn)).unwrap()
    }

    pub fn assert_schema_exists(&mut self, expected: &[&str]) {
        let tables = self.tables();
        for table in expected {
            assert!(tables.iter().any(|t| t == table), "missing table {table} in {tables:?}");
        }
    }

    /// Number of rows in `table`.
    pub fn count(&mut self, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM \"{table}\"");
        let query = sqlx::query_scalar::<_, i64>(&sql);
        self.runtime.block_on(query.fetch_one(&mut self.conn)).unwrap()
    }

    /// Run a statement, typically an insert seeding rows by hand.
    pub fn execute(&mut self, sql: &str) {
        self.runtime.block_on(sqlx::query(sql).execute(&mut self.conn)).unwrap();
    }

    /// First column of every row `sql` returns, as text.
    pub fn texts(&mut self, sql: &str) -> Vec<Option<String>> {
        let query = sqlx::query_scalar::<_, Option<String>>(sql);
        self.runtime.block_on(query.fetch_all(&mut self.conn)).unwrap()
    }
}
