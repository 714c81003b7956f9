// 🧩 Record Model - clusters
// A Cluster is one resolved identity group: identifier, creation date,
// cluster-scoped attribute mapping, its References and the link-hint sets.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::record::{decode_reference_value, encode_reference_value, IdentityRecord};

/// CDate attribute pattern (yyyy-MM-dd)
pub const CREATION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a CDate attribute value into midnight UTC of that day
pub fn parse_creation_date(token: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(token, CREATION_DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ============================================================================
// ATTRIBUTE MAPPING
// ============================================================================

/// AttributeMap - ordered (name, tag) declarations
///
/// Translates the raw tags used in Reference values into semantic field names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    entries: Vec<(String, String)>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or redeclare) the tag for an attribute name
    pub fn update(&mut self, name: &str, tag: &str) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = tag.to_string(),
            None => self.entries.push((name.to_string(), tag.to_string())),
        }
    }

    pub fn name_by_tag(&self, tag: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, t)| t == tag)
            .map(|(name, _)| name.as_str())
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tag)| tag.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// CLUSTER
// ============================================================================

#[derive(Debug)]
pub struct Cluster {
    id: Option<String>,
    creation_date: DateTime<Utc>,
    attributes: AttributeMap,
    references: Vec<Box<dyn IdentityRecord>>,
    positive_links: BTreeSet<String>,
    negative_links: BTreeSet<String>,
    persistent: bool,
}

impl Cluster {
    /// New cluster whose mapping starts from `attributes`
    pub fn new(persistent: bool, attributes: AttributeMap) -> Self {
        Cluster {
            id: None,
            creation_date: Utc::now(),
            attributes,
            references: Vec::new(),
            positive_links: BTreeSet::new(),
            negative_links: BTreeSet::new(),
            persistent,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    pub fn set_creation_date(&mut self, date: DateTime<Utc>) {
        self.creation_date = date;
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn update_attribute(&mut self, name: &str, tag: &str) {
        self.attributes.update(name, tag);
    }

    pub fn insert_reference(&mut self, reference: Box<dyn IdentityRecord>) {
        self.references.push(reference);
    }

    pub fn references(&self) -> &[Box<dyn IdentityRecord>] {
        &self.references
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn positive_links(&self) -> &BTreeSet<String> {
        &self.positive_links
    }

    pub fn negative_links(&self) -> &BTreeSet<String> {
        &self.negative_links
    }

    pub fn add_positive_link(&mut self, oid: impl Into<String>) {
        self.positive_links.insert(oid.into());
    }

    pub fn add_negative_link(&mut self, oid: impl Into<String>) {
        self.negative_links.insert(oid.into());
    }

    /// Decode a Reference value into `record`, resolving each tag through
    /// this cluster's mapping.
    ///
    /// Returns the tags that had no mapping; their values are not written.
    /// On a malformed value nothing is written to `record`.
    pub fn fill_reference(
        &self,
        record: &mut dyn IdentityRecord,
        value: &str,
    ) -> Result<Vec<String>> {
        let pairs = decode_reference_value(value)?;
        let mut unknown = Vec::new();

        for (tag, val) in pairs {
            match self.attributes.name_by_tag(tag) {
                Some(name) => record.add(name, val),
                None => unknown.push(tag.to_string()),
            }
        }

        Ok(unknown)
    }

    /// Re-encode a record's fields as `tag^value|...` using this cluster's mapping
    pub fn encode_reference(&self, record: &dyn IdentityRecord) -> String {
        let fields = record.fields();
        encode_reference_value(
            fields
                .into_iter()
                .filter_map(|(name, value)| self.attributes.tag_by_name(name).map(|t| (t, value))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{new_record, RecordType};
    use std::collections::HashSet;

    fn name_mapping() -> AttributeMap {
        let mut map = AttributeMap::new();
        map.update("first", "F1");
        map.update("last", "F2");
        map
    }

    #[test]
    fn test_attribute_map_lookup_both_ways() {
        let mut map = name_mapping();
        assert_eq!(map.name_by_tag("F1"), Some("first"));
        assert_eq!(map.tag_by_name("last"), Some("F2"));
        assert_eq!(map.name_by_tag("F9"), None);

        map.update("first", "FN");
        assert_eq!(map.len(), 2);
        assert_eq!(map.name_by_tag("FN"), Some("first"));
        assert_eq!(map.name_by_tag("F1"), None);
    }

    #[test]
    fn test_fill_reference_resolves_tags() {
        let cluster = Cluster::new(true, name_mapping());
        let mut record = new_record(RecordType::Map);

        let unknown = cluster.fill_reference(record.as_mut(), "F1^A|F2^B").unwrap();

        assert!(unknown.is_empty());
        assert_eq!(record.get("first"), Some("A"));
        assert_eq!(record.get("last"), Some("B"));
    }

    #[test]
    fn test_fill_reference_reports_unknown_tags() {
        let cluster = Cluster::new(true, name_mapping());
        let mut record = new_record(RecordType::Codosa);

        let unknown = cluster
            .fill_reference(record.as_mut(), "F1^A|ZZ^lost")
            .unwrap();

        assert_eq!(unknown, vec!["ZZ".to_string()]);
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_fill_reference_malformed_writes_nothing() {
        let cluster = Cluster::new(true, name_mapping());
        let mut record = new_record(RecordType::Map);

        assert!(cluster.fill_reference(record.as_mut(), "F1^A|F2").is_err());
        assert!(record.is_empty());
    }

    #[test]
    fn test_decode_then_encode_reproduces_pairs() {
        for record_type in [RecordType::Map, RecordType::Codosa] {
            let cluster = Cluster::new(true, name_mapping());
            let mut record = new_record(record_type);
            cluster.fill_reference(record.as_mut(), "F2^B|F1^A").unwrap();

            let encoded = cluster.encode_reference(record.as_ref());
            let expected: HashSet<&str> = ["F1^A", "F2^B"].into_iter().collect();
            let actual: HashSet<&str> = encoded.split('|').collect();
            assert_eq!(actual, expected, "{:?}", record_type);
        }
    }

    #[test]
    fn test_parse_creation_date() {
        let date = parse_creation_date("2024-02-29").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-02-29T00:00:00+00:00");
        assert!(parse_creation_date("2024-13-45").is_none());
        assert!(parse_creation_date("02/29/2024").is_none());
    }

    #[test]
    fn test_link_sets_deduplicate() {
        let mut cluster = Cluster::new(true, AttributeMap::new());
        cluster.add_positive_link("X");
        cluster.add_positive_link("X");
        cluster.add_negative_link("Y");

        assert_eq!(cluster.positive_links().len(), 1);
        assert!(cluster.negative_links().contains("Y"));
    }
}
