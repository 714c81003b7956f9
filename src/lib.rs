// Oyster Ingest - Core Library
// Streams an identity-cluster document into a relational store and rebuilds
// the modification audit trail. Used by the CLI and by tests.

pub mod error;
pub mod record;         // Reference variants + value codec
pub mod cluster;        // Cluster + attribute mapping
pub mod modification;   // Audit entries + date-keyed aggregator
pub mod columns;        // Column position → field metadata table
pub mod sink;           // Store seam + batched persistence
pub mod parser;         // Parse state machine
pub mod report;
pub mod reader;         // quick-xml document driver
pub mod config;
pub mod ingest;

// Re-export commonly used types
pub use error::{IngestError, Result};
pub use record::{
    IdentityRecord, RecordType, MapRecord, CodosaRecord,
    new_record, decode_reference_value, encode_reference_value,
};
pub use cluster::{Cluster, AttributeMap, parse_creation_date, CREATION_DATE_FORMAT};
pub use modification::{ModificationRecord, ModificationLog, write_modifications_csv};
pub use columns::{ColumnMap, ColumnSpec};
pub use sink::{Store, SqliteStore, BatchedSink, DEFAULT_ROW_CHECKPOINT};
pub use parser::{IdentityParser, ElementKind, AttributeKind, DEFAULT_CLUSTER_CHECKPOINT};
pub use report::IngestReport;
pub use reader::{parse_file, parse_reader, Aborted, HashingReader, ParseOutcome};
pub use config::IngestConfig;
pub use ingest::{parse, run};
