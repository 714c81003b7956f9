// 📊 Run report handed back to the caller once the document is consumed

use serde::{Deserialize, Serialize};

use crate::modification::ModificationLog;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    /// Unique id of this ingest run
    pub run_id: String,

    /// SHA-256 of the document bytes, when read through the document driver
    pub source_digest: Option<String>,

    /// Identity clusters closed (persisted or skipped)
    pub clusters: u64,

    /// References decoded and added to a cluster
    pub references: u64,
    pub malformed_references: u64,

    /// Identity clusters closed without an Identifier
    pub skipped_clusters: u64,

    pub rows_processed: u64,
    pub rows_inserted: u64,
    pub failed_inserts: u64,
    pub commit_requests: u64,
    pub failed_commits: u64,

    pub modifications: ModificationLog,

    /// Fatal fault that cut the run short; counts above cover what ran before it
    #[serde(default)]
    pub aborted: Option<String>,
}

impl IngestReport {
    /// A run is degraded when any storage fault was absorbed or it was aborted
    pub fn is_degraded(&self) -> bool {
        self.failed_inserts > 0 || self.failed_commits > 0 || self.aborted.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_only_on_storage_faults() {
        let mut report = IngestReport {
            malformed_references: 3,
            ..Default::default()
        };
        assert!(!report.is_degraded());

        report.failed_commits = 1;
        assert!(report.is_degraded());
    }

    #[test]
    fn test_aborted_run_is_degraded() {
        let report = IngestReport {
            aborted: Some("document tokenizer error".to_string()),
            ..Default::default()
        };
        assert!(report.is_degraded());
    }

    #[test]
    fn test_report_serializes_modifications_by_date() {
        use crate::modification::ModificationRecord;

        let mut report = IngestReport::default();
        report.modifications.record(ModificationRecord {
            oyster_version: Some("3.6".to_string()),
            date: Some("2024-01-02".to_string()),
            run_script: None,
        });

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["modifications"]["2024-01-02"]["OysterVersion"], "3.6");
    }
}
