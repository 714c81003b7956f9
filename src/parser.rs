// 🏗️ Parse State Machine
// Push-driven: the tokenizer calls on_element_start / on_character_data /
// on_element_end in document order, and the session emits finished clusters
// to the sink and finished audit entries to the modification log.

use chrono::Utc;
use uuid::Uuid;

use crate::cluster::{parse_creation_date, AttributeMap, Cluster};
use crate::modification::{ModificationLog, ModificationRecord};
use crate::record::{new_record, IdentityRecord, RecordType};
use crate::report::IngestReport;
use crate::sink::{BatchedSink, Store};

/// Default number of identity clusters between checkpoint commits
pub const DEFAULT_CLUSTER_CHECKPOINT: u64 = 10_000;

// ============================================================================
// VOCABULARY
// ============================================================================

/// Element names the session reacts to (matched case-insensitively)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Identity,
    Creation,
    Modification,
    Attribute,
    Reference,
    Oid,
    PositiveLinks,
    NegativeLinks,
}

impl ElementKind {
    pub fn classify(name: &str) -> Option<Self> {
        const TABLE: &[(&str, ElementKind)] = &[
            ("Identity", ElementKind::Identity),
            ("Creation", ElementKind::Creation),
            ("Modification", ElementKind::Modification),
            ("Attribute", ElementKind::Attribute),
            ("Reference", ElementKind::Reference),
            ("OID", ElementKind::Oid),
            ("StrToStr", ElementKind::PositiveLinks),
            ("negStrToStr", ElementKind::NegativeLinks),
            ("NegStrStr", ElementKind::NegativeLinks),
        ];

        TABLE
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|(_, kind)| *kind)
    }
}

/// Attribute names the session reacts to (matched case-insensitively)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Identifier,
    Name,
    Tag,
    Value,
    OysterVersion,
    Date,
    RunScript,
    CDate,
}

impl AttributeKind {
    pub fn classify(name: &str) -> Option<Self> {
        const TABLE: &[(&str, AttributeKind)] = &[
            ("Identifier", AttributeKind::Identifier),
            ("Name", AttributeKind::Name),
            ("Tag", AttributeKind::Tag),
            ("Value", AttributeKind::Value),
            ("OysterVersion", AttributeKind::OysterVersion),
            ("Date", AttributeKind::Date),
            ("RunScript", AttributeKind::RunScript),
            ("CDate", AttributeKind::CDate),
        ];

        TABLE
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|(_, kind)| *kind)
    }
}

/// Which link set OID leaves currently feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkContext {
    Positive,
    Negative,
}

// ============================================================================
// SESSION
// ============================================================================

/// IdentityParser - one parse run
///
/// Owns the sink, the modification log and every counter of the run; nothing
/// is shared between sessions.
pub struct IdentityParser<S: Store> {
    sink: BatchedSink<S>,
    record_type: RecordType,
    cluster_checkpoint: u64,
    run_id: String,

    /// Declarations made outside any cluster; every new cluster starts from these
    default_attributes: AttributeMap,

    cluster: Option<Cluster>,
    modification: Option<ModificationRecord>,
    reference: Option<Box<dyn IdentityRecord>>,
    parent: Option<LinkContext>,

    pending_name: Option<String>,
    pending_tag: Option<String>,
    pending_value: Option<String>,
    text: String,

    modifications: ModificationLog,
    clusters: u64,
    references: u64,
    malformed_references: u64,
    skipped_clusters: u64,
}

impl<S: Store> IdentityParser<S> {
    pub fn new(sink: BatchedSink<S>, record_type: RecordType) -> Self {
        IdentityParser {
            sink,
            record_type,
            cluster_checkpoint: DEFAULT_CLUSTER_CHECKPOINT,
            run_id: Uuid::new_v4().to_string(),
            default_attributes: AttributeMap::new(),
            cluster: None,
            modification: None,
            reference: None,
            parent: None,
            pending_name: None,
            pending_tag: None,
            pending_value: None,
            text: String::new(),
            modifications: ModificationLog::new(),
            clusters: 0,
            references: 0,
            malformed_references: 0,
            skipped_clusters: 0,
        }
    }

    /// Builder: change the cluster interval between checkpoint commits
    pub fn with_cluster_checkpoint(mut self, clusters: u64) -> Self {
        self.cluster_checkpoint = clusters.max(1);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cluster_count(&self) -> u64 {
        self.clusters
    }

    pub fn reference_count(&self) -> u64 {
        self.references
    }

    pub fn modifications(&self) -> &ModificationLog {
        &self.modifications
    }

    pub fn sink(&self) -> &BatchedSink<S> {
        &self.sink
    }

    // ------------------------------------------------------------------------
    // Event intake
    // ------------------------------------------------------------------------

    pub fn on_element_start<'a, I>(&mut self, name: &str, attributes: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.text.clear();

        match ElementKind::classify(name) {
            Some(ElementKind::Identity) => self.open_cluster(true),
            Some(ElementKind::Creation) | Some(ElementKind::Modification) => {
                self.open_cluster(false);
                self.modification = Some(ModificationRecord::new());
            }
            Some(ElementKind::PositiveLinks) => self.parent = Some(LinkContext::Positive),
            Some(ElementKind::NegativeLinks) => self.parent = Some(LinkContext::Negative),
            Some(_) => {}
            None => tracing::trace!(element = name, "element ignored"),
        }

        for (attr, raw) in attributes {
            match AttributeKind::classify(attr) {
                Some(kind) => self.apply_attribute(kind, raw.trim()),
                None => tracing::trace!(element = name, attribute = attr, "attribute ignored"),
            }
        }
    }

    pub fn on_character_data(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub fn on_element_end(&mut self, name: &str) {
        match ElementKind::classify(name) {
            Some(ElementKind::Identity) => self.close_identity(),
            Some(ElementKind::Attribute) => self.close_attribute(),
            Some(ElementKind::Reference) => self.close_reference(),
            Some(ElementKind::Creation) | Some(ElementKind::Modification) => self.close_audit(),
            Some(ElementKind::Oid) => self.close_oid(),
            Some(ElementKind::PositiveLinks) | Some(ElementKind::NegativeLinks) => {
                self.parent = None
            }
            None => {}
        }
    }

    /// End the session: report plus the store, for the caller's final commit
    pub fn finish(self) -> (IngestReport, S) {
        if let Some(cluster) = &self.cluster {
            tracing::warn!(
                cluster = ?cluster.id(),
                references = cluster.len(),
                "document ended inside an open cluster, not persisted"
            );
        }

        let report = IngestReport {
            run_id: self.run_id,
            source_digest: None,
            clusters: self.clusters,
            references: self.references,
            malformed_references: self.malformed_references,
            skipped_clusters: self.skipped_clusters,
            rows_processed: self.sink.rows_processed(),
            rows_inserted: self.sink.rows_inserted(),
            failed_inserts: self.sink.failed_inserts(),
            commit_requests: self.sink.commit_requests(),
            failed_commits: self.sink.failed_commits(),
            modifications: self.modifications,
            aborted: None,
        };

        (report, self.sink.into_store())
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn open_cluster(&mut self, persistent: bool) {
        if let Some(previous) = &self.cluster {
            tracing::warn!(
                cluster = ?previous.id(),
                references = previous.len(),
                "cluster opened before the previous one closed; previous discarded"
            );
        }
        self.cluster = Some(Cluster::new(persistent, self.default_attributes.clone()));
    }

    fn apply_attribute(&mut self, kind: AttributeKind, token: &str) {
        match kind {
            AttributeKind::Identifier => match self.cluster.as_mut() {
                Some(cluster) => cluster.set_id(token),
                None => tracing::debug!(identifier = token, "Identifier outside a cluster"),
            },
            AttributeKind::Name => self.pending_name = Some(token.to_string()),
            AttributeKind::Tag => self.pending_tag = Some(token.to_string()),
            AttributeKind::Value => {
                self.pending_value = Some(token.to_string());
                self.reference = Some(new_record(self.record_type));
            }
            AttributeKind::OysterVersion | AttributeKind::Date | AttributeKind::RunScript => {
                let Some(entry) = self.modification.as_mut() else {
                    tracing::debug!(?kind, value = token, "audit attribute outside an audit wrapper");
                    return;
                };
                let slot = match kind {
                    AttributeKind::OysterVersion => &mut entry.oyster_version,
                    AttributeKind::Date => &mut entry.date,
                    _ => &mut entry.run_script,
                };
                *slot = Some(token.to_string());
            }
            AttributeKind::CDate => {
                let Some(cluster) = self.cluster.as_mut() else {
                    tracing::debug!(cdate = token, "CDate outside a cluster");
                    return;
                };
                let date = parse_creation_date(token).unwrap_or_else(|| {
                    tracing::warn!(
                        cluster = ?cluster.id(),
                        cdate = token,
                        "unparsable CDate, using current time"
                    );
                    Utc::now()
                });
                cluster.set_creation_date(date);
            }
        }
    }

    fn close_identity(&mut self) {
        let Some(cluster) = self.cluster.take() else {
            tracing::warn!("Identity closed with no open cluster");
            return;
        };

        if cluster.id().is_some() {
            self.sink.insert_cluster(&cluster);
        } else {
            self.skipped_clusters += 1;
            tracing::warn!(
                references = cluster.len(),
                "Identity without Identifier skipped"
            );
        }

        self.clusters += 1;
        if self.clusters % self.cluster_checkpoint == 0 {
            tracing::info!("Loading {}...", self.clusters);
            self.sink.checkpoint();
        }
    }

    fn close_attribute(&mut self) {
        let (Some(name), Some(tag)) = (self.pending_name.take(), self.pending_tag.take()) else {
            tracing::warn!("Attribute declaration without both Name and Tag ignored");
            return;
        };

        match self.cluster.as_mut() {
            Some(cluster) => cluster.update_attribute(&name, &tag),
            None => self.default_attributes.update(&name, &tag),
        }
    }

    fn close_reference(&mut self) {
        let value = self.pending_value.take();
        let record = self.reference.take();

        let (Some(value), Some(mut record)) = (value, record) else {
            tracing::warn!("Reference closed without a Value");
            return;
        };
        let Some(cluster) = self.cluster.as_mut() else {
            tracing::warn!(value = %value, "Reference outside a cluster ignored");
            return;
        };

        match cluster.fill_reference(record.as_mut(), &value) {
            Ok(unmapped) => {
                if !unmapped.is_empty() {
                    tracing::warn!(
                        cluster = ?cluster.id(),
                        tags = ?unmapped,
                        "tags with no declared attribute dropped"
                    );
                }
                record.set_input(true);
                cluster.insert_reference(record);
                self.references += 1;
            }
            Err(e) => {
                self.malformed_references += 1;
                tracing::warn!(cluster = ?cluster.id(), error = %e, "reference skipped");
            }
        }
    }

    fn close_audit(&mut self) {
        match self.modification.take() {
            Some(entry) => {
                self.modifications.record(entry);
            }
            None => tracing::warn!("audit wrapper closed with no open entry"),
        }

        if self.cluster.as_ref().is_some_and(|c| !c.is_persistent()) {
            self.cluster = None;
        }
    }

    fn close_oid(&mut self) {
        let oid = self.text.trim().to_string();
        let Some(cluster) = self.cluster.as_mut() else {
            tracing::debug!(oid = %oid, "OID outside a cluster");
            return;
        };

        match self.parent {
            Some(LinkContext::Positive) => cluster.add_positive_link(oid),
            Some(LinkContext::Negative) => cluster.add_negative_link(oid),
            None => tracing::debug!(oid = %oid, "OID outside a link list"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{ColumnMap, ColumnSpec};
    use crate::sink::testing::RecordingStore;

    fn columns() -> ColumnMap {
        ColumnMap::new(vec![
            ColumnSpec {
                position: 2,
                column: "first_name".to_string(),
                field: "first".to_string(),
            },
            ColumnSpec {
                position: 3,
                column: "last_name".to_string(),
                field: "last".to_string(),
            },
        ])
        .unwrap()
    }

    fn session() -> IdentityParser<RecordingStore> {
        IdentityParser::new(
            BatchedSink::new(RecordingStore::default(), columns()),
            RecordType::Map,
        )
    }

    const NO_ATTRS: [(&str, &str); 0] = [];

    fn declare(p: &mut IdentityParser<RecordingStore>, name: &str, tag: &str) {
        p.on_element_start("Attribute", [("Name", name), ("Tag", tag)]);
        p.on_element_end("Attribute");
    }

    fn reference(p: &mut IdentityParser<RecordingStore>, value: &str) {
        p.on_element_start("Reference", [("Value", value)]);
        p.on_element_end("Reference");
    }

    fn identity(p: &mut IdentityParser<RecordingStore>, id: &str, values: &[&str]) {
        p.on_element_start("Identity", [("Identifier", id)]);
        declare(p, "first", "F1");
        declare(p, "last", "F2");
        for value in values {
            reference(p, value);
        }
        p.on_element_end("Identity");
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(ElementKind::classify("IDENTITY"), Some(ElementKind::Identity));
        assert_eq!(ElementKind::classify("oid"), Some(ElementKind::Oid));
        assert_eq!(
            ElementKind::classify("NEGSTRTOSTR"),
            Some(ElementKind::NegativeLinks)
        );
        assert_eq!(ElementKind::classify("Metadata"), None);
        assert_eq!(AttributeKind::classify("cdate"), Some(AttributeKind::CDate));
        assert_eq!(AttributeKind::classify("ID"), None);
    }

    #[test]
    fn test_reference_decodes_into_named_row() {
        let mut p = session();
        identity(&mut p, "C1", &["F1^A|F2^B"]);

        let (report, store) = p.finish();
        assert_eq!(report.clusters, 1);
        assert_eq!(report.references, 1);
        assert_eq!(
            store.rows_for("C1"),
            vec![&vec![Some("A".to_string()), Some("B".to_string())]]
        );
    }

    #[test]
    fn test_rows_equal_references_minus_malformed() {
        let mut p = session();
        identity(&mut p, "C1", &["F1^A|F2^B", "F1^broken|F2", "F1^C", "nocaret"]);
        identity(&mut p, "C2", &["F2^Z"]);

        let (report, store) = p.finish();
        assert_eq!(store.rows_for("C1").len(), 2);
        assert_eq!(store.rows_for("C2").len(), 1);
        assert_eq!(report.malformed_references, 2);
        assert_eq!(report.references, 3);
        assert_eq!(report.rows_inserted, 3);
    }

    #[test]
    fn test_attribute_mapping_is_cluster_scoped() {
        let mut p = session();
        identity(&mut p, "C1", &["F1^A"]);

        // No declarations in this cluster: F1 is unknown here
        p.on_element_start("Identity", [("Identifier", "C2")]);
        reference(&mut p, "F1^A");
        p.on_element_end("Identity");

        let (_, store) = p.finish();
        assert_eq!(store.rows_for("C2"), vec![&vec![None, None]]);
    }

    #[test]
    fn test_document_level_attributes_seed_every_cluster() {
        let mut p = session();
        p.on_element_start("Attributes", NO_ATTRS);
        declare(&mut p, "first", "A");
        declare(&mut p, "last", "B");
        p.on_element_end("Attributes");

        for id in ["X1", "X2"] {
            p.on_element_start("Identity", [("Identifier", id)]);
            reference(&mut p, "A^Ann|B^Lee");
            p.on_element_end("Identity");
        }

        let (_, store) = p.finish();
        for id in ["X1", "X2"] {
            assert_eq!(
                store.rows_for(id),
                vec![&vec![Some("Ann".to_string()), Some("Lee".to_string())]]
            );
        }
    }

    #[test]
    fn test_same_date_modifications_overwrite() {
        let mut p = session();
        for (kind, version, date) in [
            ("Creation", "3.0", "2024-01-01"),
            ("Modification", "3.1", "2024-01-01"),
            ("Modification", "3.2", "2024-02-01"),
        ] {
            p.on_element_start(
                kind,
                [("OysterVersion", version), ("Date", date), ("RunScript", "run.xml")],
            );
            p.on_element_end(kind);
        }

        let (report, store) = p.finish();
        assert_eq!(report.modifications.len(), 2);
        assert_eq!(
            report.modifications.get("2024-01-01").unwrap().oyster_version.as_deref(),
            Some("3.1")
        );
        assert!(store.rows.is_empty(), "audit clusters are never persisted");
        assert_eq!(report.clusters, 0);
    }

    #[test]
    fn test_invalid_cdate_falls_back_to_now() {
        let mut p = session();
        let before = Utc::now();
        p.on_element_start("Identity", [("Identifier", "C1"), ("CDate", "2024-13-45")]);
        let after = Utc::now();

        let created = p.cluster.as_ref().unwrap().creation_date();
        assert!(created >= before && created <= after);

        p.on_element_end("Identity");
        assert_eq!(p.cluster_count(), 1);
    }

    #[test]
    fn test_valid_cdate_is_used() {
        let mut p = session();
        p.on_element_start("identity", [("identifier", "C1"), ("cdate", " 2020-05-17 ")]);

        let created = p.cluster.as_ref().unwrap().creation_date();
        assert_eq!(created.format("%Y-%m-%d").to_string(), "2020-05-17");
    }

    #[test]
    fn test_cluster_checkpoint_every_ten_thousand() {
        let mut p = session();
        for i in 0..10_000 {
            p.on_element_start("Identity", [("Identifier", format!("C{}", i).as_str())]);
            p.on_element_end("Identity");
        }
        assert_eq!(p.sink().store().commits, 1);

        p.on_element_start("Identity", [("Identifier", "C10000")]);
        p.on_element_end("Identity");
        assert_eq!(p.sink().store().commits, 1);
        assert_eq!(p.cluster_count(), 10_001);
    }

    #[test]
    fn test_link_lists_collect_oids() {
        let mut p = session();
        p.on_element_start("Identity", [("Identifier", "C1")]);

        p.on_element_start("StrToStr", NO_ATTRS);
        for oid in ["X", "Y"] {
            p.on_element_start("OID", NO_ATTRS);
            p.on_character_data(oid);
            p.on_element_end("OID");
        }
        p.on_element_end("StrToStr");

        p.on_element_start("negStrToStr", NO_ATTRS);
        p.on_element_start("OID", NO_ATTRS);
        p.on_character_data("Z");
        p.on_element_end("OID");
        p.on_element_end("negStrToStr");

        // Repository documents close the negative list as NegStrStr
        p.on_element_start("negStrToStr", NO_ATTRS);
        p.on_element_start("OID", NO_ATTRS);
        p.on_character_data("V");
        p.on_element_end("OID");
        p.on_element_end("NegStrStr");

        // Outside any link list: ignored
        p.on_element_start("OID", NO_ATTRS);
        p.on_character_data("W");
        p.on_element_end("OID");

        let cluster = p.cluster.as_ref().unwrap();
        let positive: Vec<&str> = cluster.positive_links().iter().map(String::as_str).collect();
        let negative: Vec<&str> = cluster.negative_links().iter().map(String::as_str).collect();
        assert_eq!(positive, vec!["X", "Y"]);
        assert_eq!(negative, vec!["V", "Z"]);
    }

    #[test]
    fn test_identity_without_identifier_is_skipped() {
        let mut p = session();
        p.on_element_start("Identity", NO_ATTRS);
        declare(&mut p, "first", "F1");
        reference(&mut p, "F1^A");
        p.on_element_end("Identity");

        let (report, store) = p.finish();
        assert_eq!(report.skipped_clusters, 1);
        assert_eq!(report.clusters, 1);
        assert!(store.rows.is_empty());
    }

    #[test]
    fn test_unknown_elements_and_attributes_are_ignored() {
        let mut p = session();
        p.on_element_start("Root", [("Version", "9")]);
        p.on_element_start("Identity", [("Identifier", "C1"), ("Color", "blue")]);
        p.on_element_start("Extra", [("Whatever", "x")]);
        p.on_element_end("Extra");
        declare(&mut p, "first", "F1");
        reference(&mut p, "F1^A");
        p.on_element_end("Identity");
        p.on_element_end("Root");

        let (report, store) = p.finish();
        assert_eq!(report.rows_inserted, 1);
        assert_eq!(store.rows_for("C1").len(), 1);
    }

    #[test]
    fn test_insert_faults_do_not_stop_the_run() {
        let mut store = RecordingStore::default();
        store.failing_ids.insert("BAD".to_string());
        let mut p = IdentityParser::new(BatchedSink::new(store, columns()), RecordType::Codosa);

        identity(&mut p, "BAD", &["F1^A", "F1^B"]);
        identity(&mut p, "GOOD", &["F1^C"]);

        let (report, store) = p.finish();
        assert_eq!(report.failed_inserts, 2);
        assert_eq!(report.rows_inserted, 1);
        assert!(report.is_degraded());
        assert_eq!(store.rows_for("GOOD").len(), 1);
    }

    #[test]
    fn test_commit_faults_mark_run_degraded() {
        let store = RecordingStore {
            fail_commits: true,
            ..Default::default()
        };
        let mut p = IdentityParser::new(BatchedSink::new(store, columns()), RecordType::Map)
            .with_cluster_checkpoint(2);

        identity(&mut p, "C1", &["F1^A"]);
        identity(&mut p, "C2", &["F1^B"]);
        identity(&mut p, "C3", &["F1^C"]);

        let (report, _) = p.finish();
        assert_eq!(report.commit_requests, 1);
        assert_eq!(report.failed_commits, 1);
        assert_eq!(report.rows_inserted, 3);
    }

    #[test]
    fn test_sessions_do_not_share_state() {
        let mut first = session();
        identity(&mut first, "C1", &["F1^A"]);
        let second = session();

        assert_eq!(first.cluster_count(), 1);
        assert_eq!(second.cluster_count(), 0);
        assert_ne!(first.run_id(), second.run_id());
    }
}
