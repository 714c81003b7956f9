// ⚠️ Error taxonomy for an ingest run
//
// Data faults (MalformedReferenceValue) and storage faults (Storage) are
// absorbed by the parser session: logged, counted, and the run goes on.
// Only Io / Xml / InvalidDocument / Config ever escape to the caller, and a
// run cut short by one of them comes back as Aborted with its partial report.

use thiserror::Error;

use crate::report::IngestReport;

#[derive(Debug, Error)]
pub enum IngestError {
    /// A `tag^value` token without the `^` separator (or an empty value string)
    #[error("malformed reference value {value:?}: {reason}")]
    MalformedReferenceValue { value: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("document tokenizer error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("ingest aborted after {rows} rows: {error}", rows = .report.rows_inserted)]
    Aborted {
        error: Box<IngestError>,
        report: Box<IngestReport>,
    },
}

impl IngestError {
    pub fn malformed(value: &str, reason: impl Into<String>) -> Self {
        IngestError::MalformedReferenceValue {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
