// 🕓 Modification Aggregator
// Audit trail of Creation / Modification wrappers, keyed by date.
// Same date twice = last write wins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// One Creation or Modification entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationRecord {
    #[serde(rename = "OysterVersion")]
    pub oyster_version: Option<String>,

    #[serde(rename = "Date")]
    pub date: Option<String>,

    #[serde(rename = "RunScript")]
    pub run_script: Option<String>,
}

impl ModificationRecord {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Date-ordered table of modification entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModificationLog {
    entries: BTreeMap<String, ModificationRecord>,
}

impl ModificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry` under its date. Entries without a date are dropped.
    ///
    /// Returns false when the entry was dropped.
    pub fn record(&mut self, entry: ModificationRecord) -> bool {
        let Some(date) = entry.date.clone() else {
            tracing::warn!(?entry, "modification entry has no Date, dropped");
            return false;
        };

        if self.entries.insert(date.clone(), entry).is_some() {
            tracing::debug!(%date, "modification entry replaced an earlier one");
        }
        true
    }

    pub fn get(&self, date: &str) -> Option<&ModificationRecord> {
        self.entries.get(date)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModificationRecord)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the table as CSV (header: OysterVersion,Date,RunScript), date order
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let mut wtr = csv::Writer::from_writer(writer);
        for entry in self.entries.values() {
            wtr.serialize(entry)?;
        }
        wtr.flush()?;
        Ok(self.entries.len())
    }
}

/// Export the modification table to a CSV file
pub fn write_modifications_csv(log: &ModificationLog, path: &Path) -> Result<usize> {
    let file = std::fs::File::create(path)?;
    log.write_csv(file)
}
