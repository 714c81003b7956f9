// 💾 Batched Persistence Sink
// One parameterized insert per reference, a run-wide row counter and a
// checkpoint commit every `row_checkpoint` rows.
//
// Storage faults never escape: they are logged with context and counted.

use rusqlite::{params_from_iter, Connection};
use std::path::Path;

use crate::cluster::Cluster;
use crate::columns::{validate_identifier, ColumnMap};
use crate::error::Result;

/// Default run-wide row interval between checkpoint commits
pub const DEFAULT_ROW_CHECKPOINT: u64 = 100_000;

// ============================================================================
// STORAGE PRIMITIVE
// ============================================================================

/// Store - the storage connection/transaction seam
///
/// `values` are the mapped columns in position order; the identifier always
/// binds first.
pub trait Store {
    /// Execute one insert; returns the number of affected rows
    fn insert_row(&mut self, id: &str, values: &[Option<&str>]) -> Result<usize>;

    /// Commit the open transaction and start a new one
    fn commit(&mut self) -> Result<()>;
}

/// SQLite store: one long-lived explicit transaction, committed at checkpoints
pub struct SqliteStore {
    conn: Connection,
    insert_sql: String,
}

impl SqliteStore {
    /// Open (or create) the database file and prepare the target table
    pub fn open(
        path: &Path,
        table: &str,
        id_column: &str,
        columns: &ColumnMap,
        create_table: bool,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;
        // Enable WAL mode for crash recovery
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::from_connection(conn, table, id_column, columns, create_table)
    }

    pub fn from_connection(
        conn: Connection,
        table: &str,
        id_column: &str,
        columns: &ColumnMap,
        create_table: bool,
    ) -> Result<Self> {
        validate_identifier(table)?;
        validate_identifier(id_column)?;

        if create_table {
            conn.execute(&columns.create_table_sql(table, id_column), [])?;
        }

        let insert_sql = columns.insert_sql(table, id_column);
        // Fail early on a table/column mismatch instead of on every row
        conn.prepare_cached(&insert_sql)?;
        conn.execute_batch("BEGIN")?;

        Ok(SqliteStore { conn, insert_sql })
    }

    /// Final commit; hands the connection back to the caller
    pub fn finish(self) -> Result<Connection> {
        self.conn.execute_batch("COMMIT")?;
        Ok(self.conn)
    }
}

impl Store for SqliteStore {
    fn insert_row(&mut self, id: &str, values: &[Option<&str>]) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(&self.insert_sql)?;
        let params = std::iter::once(Some(id)).chain(values.iter().copied());
        Ok(stmt.execute(params_from_iter(params))?)
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT; BEGIN")?;
        Ok(())
    }
}

// ============================================================================
// BATCHING
// ============================================================================

pub struct BatchedSink<S: Store> {
    store: S,
    columns: ColumnMap,
    row_checkpoint: u64,

    rows_processed: u64,
    rows_inserted: u64,
    failed_inserts: u64,
    commit_requests: u64,
    failed_commits: u64,
}

impl<S: Store> BatchedSink<S> {
    pub fn new(store: S, columns: ColumnMap) -> Self {
        BatchedSink {
            store,
            columns,
            row_checkpoint: DEFAULT_ROW_CHECKPOINT,
            rows_processed: 0,
            rows_inserted: 0,
            failed_inserts: 0,
            commit_requests: 0,
            failed_commits: 0,
        }
    }

    /// Builder: change the row interval between checkpoint commits
    pub fn with_row_checkpoint(mut self, rows: u64) -> Self {
        self.row_checkpoint = rows.max(1);
        self
    }

    /// Insert every reference of `cluster`; returns rows affected for this cluster
    pub fn insert_cluster(&mut self, cluster: &Cluster) -> usize {
        let Some(id) = cluster.id() else {
            tracing::warn!(
                references = cluster.len(),
                "cluster has no Identifier, nothing persisted"
            );
            return 0;
        };

        let mut affected = 0;

        for (index, reference) in cluster.references().iter().enumerate() {
            let values = self.columns.row_values(reference.as_ref());

            match self.store.insert_row(id, &values) {
                Ok(rows) => {
                    affected += rows;
                    self.rows_inserted += rows as u64;
                }
                Err(e) => {
                    self.failed_inserts += 1;
                    tracing::error!(
                        cluster = id,
                        reference = index,
                        values = ?values,
                        error = %e,
                        "insert failed"
                    );
                }
            }

            self.rows_processed += 1;
            if self.rows_processed % self.row_checkpoint == 0 {
                tracing::info!("Inserting {}...", self.rows_processed);
                self.checkpoint();
            }
        }

        affected
    }

    /// Request a commit; a failure is logged and counted, never returned
    pub fn checkpoint(&mut self) -> bool {
        self.commit_requests += 1;
        match self.store.commit() {
            Ok(()) => true,
            Err(e) => {
                self.failed_commits += 1;
                tracing::error!(error = %e, "checkpoint commit failed");
                false
            }
        }
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed
    }

    pub fn rows_inserted(&self) -> u64 {
        self.rows_inserted
    }

    pub fn failed_inserts(&self) -> u64 {
        self.failed_inserts
    }

    pub fn commit_requests(&self) -> u64 {
        self.commit_requests
    }

    pub fn failed_commits(&self) -> u64 {
        self.failed_commits
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

// ============================================================================
// TEST DOUBLE
// ============================================================================
