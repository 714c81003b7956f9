// 🧾 Record Model - identity references
// One Reference = one raw input record contributing fields to a cluster.
//
// Two variants share the IdentityRecord capability:
// - MapRecord: plain ordered field/value pairs
// - CodosaRecord: all fields packed into a single delimited value string

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IngestError, Result};

/// Separator between sub-records in a Reference `Value` attribute
pub const TOKEN_SEPARATOR: char = '|';

/// Separator between tag and value inside one sub-record
pub const PAIR_SEPARATOR: char = '^';

// ============================================================================
// RECORD TYPE SELECTOR
// ============================================================================

/// Which Reference variant the parser instantiates for each `Value` it sees
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    #[default]
    Map,
    Codosa,
}

// ============================================================================
// CORE TRAIT
// ============================================================================

/// IdentityRecord - shared capability of both Reference variants
///
/// Field names are semantic names (already resolved through the cluster's
/// attribute mapping), never raw tags.
pub trait IdentityRecord: fmt::Debug {
    /// Set `field` to `value`, replacing any previous value for that field
    fn add(&mut self, field: &str, value: &str);

    fn get(&self, field: &str) -> Option<&str>;

    fn set_input(&mut self, input: bool);

    fn is_input(&self) -> bool;

    /// All fields in insertion order
    fn fields(&self) -> Vec<(&str, &str)>;

    fn record_type(&self) -> RecordType;

    fn len(&self) -> usize {
        self.fields().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Factory: Box<dyn IdentityRecord> for the configured record type
pub fn new_record(record_type: RecordType) -> Box<dyn IdentityRecord> {
    match record_type {
        RecordType::Map => Box::new(MapRecord::new()),
        RecordType::Codosa => Box::new(CodosaRecord::new()),
    }
}

// ============================================================================
// SIMPLE VARIANT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapRecord {
    fields: Vec<(String, String)>,
    input: bool,
}

impl MapRecord {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityRecord for MapRecord {
    fn add(&mut self, field: &str, value: &str) {
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.fields.push((field.to_string(), value.to_string())),
        }
    }

    fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    fn set_input(&mut self, input: bool) {
        self.input = input;
    }

    fn is_input(&self) -> bool {
        self.input
    }

    fn fields(&self) -> Vec<(&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect()
    }

    fn record_type(&self) -> RecordType {
        RecordType::Map
    }

    fn len(&self) -> usize {
        self.fields.len()
    }
}

// ============================================================================
// COMPOSITE VARIANT
// ============================================================================

// ASCII unit/record separators: cannot collide with `|` or `^` in input values
const FIELD_SEP: char = '\u{1F}';
const ENTRY_SEP: char = '\u{1E}';

/// Stands in for a separator character inside a packed name or value
const REPLACEMENT: char = '\u{FFFD}';

fn is_separator(c: char) -> bool {
    c == FIELD_SEP || c == ENTRY_SEP
}

fn push_escaped(packed: &mut String, text: &str) {
    packed.extend(text.chars().map(|c| if is_separator(c) { REPLACEMENT } else { c }));
}

/// CodosaRecord - fields packed into one delimited string
///
/// Layout: `name␟value␞name␟value␞...`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodosaRecord {
    packed: String,
    input: bool,
}

impl CodosaRecord {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_entry(packed: &mut String, field: &str, value: &str) {
        if !packed.is_empty() {
            packed.push(ENTRY_SEP);
        }
        push_escaped(packed, field);
        packed.push(FIELD_SEP);
        push_escaped(packed, value);
    }

    fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.packed
            .split(ENTRY_SEP)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| entry.split_once(FIELD_SEP))
    }
}

impl IdentityRecord for CodosaRecord {
    /// Separator characters in `field` or `value` are stored as U+FFFD
    fn add(&mut self, field: &str, value: &str) {
        let key: String = field.chars().map(|c| if is_separator(c) { REPLACEMENT } else { c }).collect();
        if self.get(&key).is_none() {
            Self::push_entry(&mut self.packed, &key, value);
            return;
        }

        let mut rebuilt = String::with_capacity(self.packed.len() + value.len());
        for (name, old) in self.entries() {
            let v = if name == key { value } else { old };
            Self::push_entry(&mut rebuilt, name, v);
        }
        self.packed = rebuilt;
    }

    fn get(&self, field: &str) -> Option<&str> {
        self.entries()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value)
    }

    fn set_input(&mut self, input: bool) {
        self.input = input;
    }

    fn is_input(&self) -> bool {
        self.input
    }

    fn fields(&self) -> Vec<(&str, &str)> {
        self.entries().collect()
    }

    fn record_type(&self) -> RecordType {
        RecordType::Codosa
    }
}

// ============================================================================
// VALUE CODEC
// ============================================================================

/// Split a Reference value `tag1^value1|tag2^value2|...` into (tag, value) pairs
///
/// Trailing `|` are ignored. Everything after the first `^` of a token is the
/// value, so values may be empty or contain further `^`. The ASCII unit and
/// record separators (U+001F, U+001E) are reserved and make the value malformed.
pub fn decode_reference_value(value: &str) -> Result<Vec<(&str, &str)>> {
    let body = value.trim_end_matches(TOKEN_SEPARATOR);
    if body.is_empty() {
        return Err(IngestError::malformed(value, "empty value string"));
    }
    if body.contains(is_separator) {
        return Err(IngestError::malformed(value, "contains a reserved separator character"));
    }

    body.split(TOKEN_SEPARATOR)
        .map(|token| {
            let (tag, val) = token.split_once(PAIR_SEPARATOR).ok_or_else(|| {
                IngestError::malformed(value, format!("token {:?} has no '^'", token))
            })?;
            if tag.is_empty() {
                return Err(IngestError::malformed(
                    value,
                    format!("token {:?} has an empty tag", token),
                ));
            }
            Ok((tag, val))
        })
        .collect()
}

/// Inverse of `decode_reference_value`
pub fn encode_reference_value<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(tag, value)| format!("{}{}{}", tag, PAIR_SEPARATOR, value))
        .collect::<Vec<_>>()
        .join("|")
}
