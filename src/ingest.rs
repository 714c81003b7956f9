// 🚚 Ingest entry points
// Wire config → store → sink → parser → document driver.

use std::path::Path;

use crate::columns::ColumnMap;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::parser::IdentityParser;
use crate::reader::{parse_file, Aborted, ParseOutcome};
use crate::report::IngestReport;
use crate::sink::{BatchedSink, SqliteStore, Store};

/// Parse `document` into any store; the caller owns the final commit
///
/// On a fatal fault the store comes back inside `Aborted` with its transaction
/// still open, so rows since the last checkpoint are neither kept nor lost yet.
pub fn parse<S: Store>(document: &Path, config: &IngestConfig, store: S) -> ParseOutcome<S> {
    let columns = match config.column_map() {
        Ok(columns) => columns,
        Err(e) => {
            let idle = IdentityParser::new(BatchedSink::new(store, ColumnMap::default()), config.record_type);
            return Err(Aborted::new(e, idle));
        }
    };
    let sink = BatchedSink::new(store, columns).with_row_checkpoint(config.row_checkpoint);
    let parser = IdentityParser::new(sink, config.record_type)
        .with_cluster_checkpoint(config.cluster_checkpoint);

    parse_file(document, parser).inspect_err(|aborted| {
        tracing::error!(
            document = %document.display(),
            error = %aborted.error,
            rows = aborted.report.rows_inserted,
            "ingest aborted"
        );
    })
}

/// Full run against the SQLite database named in `config`, final commit included
///
/// A run cut short by a fatal fault still commits the rows inserted before it
/// and fails with `IngestError::Aborted` carrying the partial report.
pub fn run(document: &Path, config: &IngestConfig) -> Result<IngestReport> {
    let columns = config.column_map()?;
    let store = SqliteStore::open(
        &config.database,
        &config.table,
        &config.id_column,
        &columns,
        config.create_table,
    )?;

    match parse(document, config, store) {
        Ok((mut report, store)) => {
            commit_final(store, &mut report);
            tracing::info!(
                run_id = %report.run_id,
                clusters = report.clusters,
                references = report.references,
                rows = report.rows_inserted,
                malformed = report.malformed_references,
                failed_inserts = report.failed_inserts,
                failed_commits = report.failed_commits,
                "ingest finished"
            );
            Ok(report)
        }
        Err(Aborted {
            error,
            mut report,
            store,
        }) => {
            if commit_final(store, &mut report) {
                tracing::error!(
                    run_id = %report.run_id,
                    rows = report.rows_inserted,
                    "ingest aborted, rows inserted before the fault committed"
                );
            }
            Err(IngestError::Aborted {
                error: Box::new(error),
                report: Box::new(report),
            })
        }
    }
}

/// Final commit; a failure is counted on the report. Returns true on success.
fn commit_final(store: SqliteStore, report: &mut IngestReport) -> bool {
    match store.finish() {
        Ok(_) => true,
        Err(e) => {
            report.failed_commits += 1;
            tracing::error!(error = %e, "final commit failed, open transaction rolled back");
            false
        }
    }
}
