// 🗂️ Attribute Metadata Table
// Storage-column position → source field, consulted once per reference row.
// Position 1 is always the cluster identifier; mapped columns start at 2.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{IngestError, Result};
use crate::record::IdentityRecord;

/// Parameter position reserved for the cluster identifier
pub const IDENTIFIER_POSITION: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Statement parameter position (>= 2)
    pub position: usize,

    /// Storage column name
    pub column: String,

    /// Semantic field name looked up in each reference
    pub field: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    columns: BTreeMap<usize, ColumnSpec>,
}

impl ColumnMap {
    pub fn new(specs: Vec<ColumnSpec>) -> Result<Self> {
        let mut columns = BTreeMap::new();

        for spec in specs {
            if spec.position <= IDENTIFIER_POSITION {
                return Err(IngestError::Config(format!(
                    "column {} uses position {}; positions start at {}",
                    spec.column,
                    spec.position,
                    IDENTIFIER_POSITION + 1
                )));
            }
            validate_identifier(&spec.column)?;

            let position = spec.position;
            if let Some(previous) = columns.insert(position, spec) {
                return Err(IngestError::Config(format!(
                    "position {} declared twice (column {})",
                    position, previous.column
                )));
            }
        }

        Ok(ColumnMap { columns })
    }

    /// Columns in ascending position order
    pub fn iter(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.values()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// One value per column, in position order. Missing fields are None (NULL).
    pub fn row_values<'a>(&self, record: &'a dyn IdentityRecord) -> Vec<Option<&'a str>> {
        self.columns
            .values()
            .map(|spec| record.get(&spec.field))
            .collect()
    }

    /// `INSERT INTO table (id, c2, c3, ...) VALUES (?1, ?2, ?3, ...)`
    pub fn insert_sql(&self, table: &str, id_column: &str) -> String {
        let mut names = vec![id_column.to_string()];
        names.extend(self.columns.values().map(|spec| spec.column.clone()));

        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            placeholders.join(", ")
        )
    }

    pub fn create_table_sql(&self, table: &str, id_column: &str) -> String {
        let mut defs = vec![
            "row_id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            format!("{} TEXT NOT NULL", id_column),
        ];
        defs.extend(self.columns.values().map(|spec| format!("{} TEXT", spec.column)));

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            table,
            defs.join(",\n    ")
        )
    }
}

/// Table / column names are interpolated into SQL, so only plain identifiers pass
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(IngestError::Config(format!(
            "{:?} is not a valid SQL identifier",
            name
        )))
    }
}
