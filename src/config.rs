// ⚙️ Ingest configuration
// JSON file describing the target store and the column → field mapping.
//
// {
//   "database": "identities.db",
//   "table": "identity_references",
//   "id_column": "oyster_id",
//   "record_type": "map",
//   "columns": [ { "position": 2, "column": "first_name", "field": "FirstName" } ]
// }

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::columns::{validate_identifier, ColumnMap, ColumnSpec};
use crate::error::{IngestError, Result};
use crate::parser::DEFAULT_CLUSTER_CHECKPOINT;
use crate::record::RecordType;
use crate::sink::DEFAULT_ROW_CHECKPOINT;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database: PathBuf,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_id_column")]
    pub id_column: String,

    #[serde(default)]
    pub record_type: RecordType,

    /// Create the target table when it does not exist yet
    #[serde(default = "default_true")]
    pub create_table: bool,

    pub columns: Vec<ColumnSpec>,

    #[serde(default = "default_cluster_checkpoint")]
    pub cluster_checkpoint: u64,

    #[serde(default = "default_row_checkpoint")]
    pub row_checkpoint: u64,
}

fn default_table() -> String {
    "identity_references".to_string()
}

fn default_id_column() -> String {
    "oyster_id".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cluster_checkpoint() -> u64 {
    DEFAULT_CLUSTER_CHECKPOINT
}

fn default_row_checkpoint() -> u64 {
    DEFAULT_ROW_CHECKPOINT
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: IngestConfig = serde_json::from_str(text)
            .map_err(|e| IngestError::Config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.table)?;
        validate_identifier(&self.id_column)?;

        if self.cluster_checkpoint == 0 || self.row_checkpoint == 0 {
            return Err(IngestError::Config(
                "checkpoint intervals must be positive".to_string(),
            ));
        }

        self.column_map().map(|_| ())
    }

    pub fn column_map(&self) -> Result<ColumnMap> {
        ColumnMap::new(self.columns.clone())
    }
}
