//! Item Mapper: turns one [`SourceRecord`] into a remote-API-shaped [`NormalizedItem`].
//!
//! Mapping is a pure function of its inputs. Collection ids and attachment
//! references are resolved beforehand (see [`crate::collections`] and
//! [`crate::attachments`]) and passed in.

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::attachments::AttachmentRef;
use crate::error::{ConfigError, MappingError};
use crate::record::{CreatorRef, KeywordRef, KeywordType, Label, SourceRecord};

/// Characters allowed in a Zotero object key.
const KEY_ALPHABET: &[u8] = b"23456789ABCDEFGHIJKLMNPQRSTUVWXYZ";
const KEY_LEN: usize = 8;

/// Tag type Zotero uses for automatic tags.
const AUTO_TAG_TYPE: u8 = 1;

/// Deterministic remote object key for a source record (`scope = "item"`) or
/// one of its children (e.g. `"note:0"`, `"attachment:1"`).
pub fn remote_key(source_id: i64, scope: &str) -> String {
    let digest = Sha256::digest(format!("papers2:{source_id}:{scope}").as_bytes());
    digest
        .iter()
        .take(KEY_LEN)
        .map(|b| KEY_ALPHABET[usize::from(*b) % KEY_ALPHABET.len()] as char)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub tag: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<u8>,
}

impl Tag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into(), kind: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Creator {
    #[serde(rename_all = "camelCase")]
    Person {
        creator_type: String,
        first_name: String,
        last_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Institution { creator_type: String, name: String },
}

/// The remote-API-shaped representation of exactly one source record.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedItem {
    pub source_id: i64,
    pub key: String,
    pub item_type: String,
    /// Candidate fields; the sync client drops those the item type does not accept.
    pub fields: BTreeMap<String, Value>,
    pub creators: Vec<Creator>,
    pub tags: Vec<Tag>,
    pub collections: Vec<String>,
    pub notes: Vec<String>,
    pub attachments: Vec<AttachmentRef>,
}

impl NormalizedItem {
    pub fn title(&self) -> &str {
        self.fields
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("<untitled>")
    }

    /// Tag names as a set, for order-insensitive comparison.
    pub fn tag_names(&self) -> BTreeSet<&str> {
        self.tags.iter().map(|t| t.tag.as_str()).collect()
    }
}

/// Which keyword categories become tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTypes(BTreeSet<KeywordType>);

impl KeywordTypes {
    pub fn all() -> Self {
        Self::from_types([KeywordType::User, KeywordType::Auto, KeywordType::Label])
    }

    pub fn from_types(types: impl IntoIterator<Item = KeywordType>) -> Self {
        Self(types.into_iter().collect())
    }

    /// Parse a comma-delimited list such as `user,label,auto`.
    pub fn parse(list: &str) -> Result<Self, ConfigError> {
        let mut types = Vec::new();
        for part in list.split(',').filter(|p| !p.trim().is_empty()) {
            let t = part.parse::<KeywordType>().map_err(|reason| ConfigError::Invalid {
                setting: "keyword_types",
                value: list.to_string(),
                reason,
            })?;
            types.push(t);
        }
        Ok(Self::from_types(types))
    }

    pub fn contains(&self, t: KeywordType) -> bool {
        self.0.contains(&t)
    }
}

impl Default for KeywordTypes {
    fn default() -> Self {
        Self::all()
    }
}

/// Color label → tag name table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    names: HashMap<Label, Option<String>>,
}

impl LabelMap {
    pub const DEFAULT_PREFIX: &'static str = "Label";

    /// Every color maps to `<prefix><Color>`; `None` maps to no tag.
    pub fn with_prefix(prefix: &str) -> Self {
        let names = Label::ALL
            .into_iter()
            .map(|label| match label {
                Label::None => (label, None),
                _ => (label, Some(format!("{prefix}{}", label.name()))),
            })
            .collect();
        Self { names }
    }

    /// Parse `Color=Name` pairs, e.g. `Purple=PriorityCurrent,Red=Urgent`, on
    /// top of the default naming rule.
    pub fn parse(pairs: &str, prefix: &str) -> Result<Self, ConfigError> {
        let mut map = Self::with_prefix(prefix);
        for pair in pairs.split(',').filter(|p| !p.trim().is_empty()) {
            let invalid = |reason: String| ConfigError::Invalid {
                setting: "label_map",
                value: pair.to_string(),
                reason,
            };
            let (color, name) = pair
                .split_once('=')
                .ok_or_else(|| invalid("expected Color=Name".to_string()))?;
            let label = color.parse::<Label>().map_err(invalid)?;
            let name = name.trim();
            map.names
                .insert(label, (!name.is_empty()).then(|| name.to_string()));
        }
        Ok(map)
    }

    pub fn tag_for(&self, label: Label) -> Option<&str> {
        self.names.get(&label).and_then(|n| n.as_deref())
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::with_prefix(Self::DEFAULT_PREFIX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingOptions {
    pub keyword_types: KeywordTypes,
    pub label_map: LabelMap,
}

/// Check that a record is structurally mappable, before any side effects
/// (attachment moves, collection creation) are spent on it.
pub fn validate(record: &SourceRecord) -> Result<(), MappingError> {
    if non_empty(&record.title).is_none() {
        return Err(MappingError::MissingTitle { id: record.id });
    }
    if let Some(c) = record.creators.iter().find(|c| !matches!(c.role, 0 | 1)) {
        return Err(MappingError::UnsupportedCreatorRole { id: record.id, role: c.role });
    }
    Ok(())
}

pub fn map(
    record: &SourceRecord,
    options: &MappingOptions,
    collections: Vec<String>,
    attachments: Vec<AttachmentRef>,
) -> Result<NormalizedItem, MappingError> {
    validate(record)?;

    let mut item = NormalizedItem {
        source_id: record.id,
        key: remote_key(record.id, "item"),
        item_type: record.pub_type.item_type().to_string(),
        fields: extract_fields(record),
        creators: record.creators.iter().map(map_creator).collect(),
        tags: Vec::new(),
        collections: dedup(collections),
        notes: notes(record),
        attachments,
    };

    for keyword in &record.keywords {
        if !options.keyword_types.contains(keyword.keyword_type()) {
            continue;
        }
        match keyword {
            KeywordRef::User(name) => push_tag(&mut item.tags, Tag::new(name.trim())),
            KeywordRef::Auto(name) => push_tag(
                &mut item.tags,
                Tag { tag: name.trim().to_string(), kind: Some(AUTO_TAG_TYPE) },
            ),
            KeywordRef::Label(label) => {
                if let Some(name) = options.label_map.tag_for(*label) {
                    push_tag(&mut item.tags, Tag::new(name));
                }
            }
        }
    }

    for collection in &record.collections {
        push_tag(&mut item.tags, Tag::new(format!("C:{}", collection.name)));
    }
    if non_empty(&record.citekey).is_some() {
        push_tag(&mut item.tags, Tag::new("&cited"));
    }
    if record.rating > 0 {
        let stars = usize::try_from(record.rating).unwrap_or(0).min(5);
        push_tag(&mut item.tags, Tag::new("⭐".repeat(stars)));
    }

    Ok(item)
}

fn push_tag(tags: &mut Vec<Tag>, tag: Tag) {
    if tag.tag.is_empty() || tags.iter().any(|t| t.tag == tag.tag) {
        return;
    }
    tags.push(tag);
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn map_creator(creator: &CreatorRef) -> Creator {
    let creator_type = if creator.role == 1 { "editor" } else { "author" }.to_string();
    let surname = creator.surname.clone().unwrap_or_default();
    if creator.institutional {
        Creator::Institution { creator_type, name: surname }
    } else {
        Creator::Person {
            creator_type,
            first_name: creator.prename.clone().unwrap_or_default(),
            last_name: surname,
        }
    }
}

fn notes(record: &SourceRecord) -> Vec<String> {
    let mut notes = Vec::new();
    if let Some(text) = non_empty(&record.notes) {
        notes.push(text.to_string());
    }
    for review in &record.reviews {
        notes.push(format!("{} Rating: {}", review.content, review.rating));
    }
    notes
}

fn extract_fields(record: &SourceRecord) -> BTreeMap<String, Value> {
    let m = &record.metadata;
    let mut fields = BTreeMap::new();
    let mut put = |name: &str, value: Option<String>| {
        if let Some(v) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            fields.insert(name.to_string(), Value::String(v));
        }
    };

    put("title", record.title.clone());
    put("DOI", m.doi.clone());
    put("ISBN", m.isbn.first().cloned());
    put("abstractNote", m.summary.clone());
    put("accessDate", m.imported_date.and_then(format_timestamp));
    put("date", m.publication_date.as_deref().and_then(format_pub_date));
    put("edition", m.version.clone());
    put("extra", m.pubmed_ids.first().map(|id| format!("PMID: {id}")));
    put("issue", m.number.clone());
    put("journalAbbreviation", m.bundle_abbreviation.clone());
    put("language", m.language.clone());
    put("number", m.document_number.clone());
    put("pages", format_pages(m.start_page.as_deref(), m.end_page.as_deref()));
    put("numPages", m.start_page.clone());
    put("place", m.place.clone());
    put("publicationTitle", m.bundle_title.clone().or_else(|| m.bundle_abbreviation.clone()));
    put("publisher", m.publisher.clone());
    put("rights", m.copyright.clone());
    put("university", m.bundle_title.clone().or_else(|| m.bundle_abbreviation.clone()));
    put("url", m.urls.first().cloned());
    put("volume", m.volume.clone());
    fields
}

/// Papers2 stores dates as `99YYYYMMDD...`; unknown month/day are `00`.
pub fn format_pub_date(code: &str) -> Option<String> {
    let year = code.get(2..6)?;
    let mut date = year.to_string();
    if let Some(month) = code.get(6..8) {
        date.push('-');
        date.push_str(if month == "00" { "01" } else { month });
        if let Some(day) = code.get(8..10) {
            date.push('-');
            date.push_str(if day == "00" { "01" } else { day });
        }
    }
    Some(date)
}

fn format_timestamp(secs: f64) -> Option<String> {
    DateTime::from_timestamp(secs as i64, 0).map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

fn format_pages(start: Option<&str>, end: Option<&str>) -> Option<String> {
    let start = start.map(str::trim).filter(|s| !s.is_empty());
    let end = end.map(str::trim).filter(|s| !s.is_empty());
    match (start, end) {
        (Some(s), Some(e)) => Some(format!("{s}-{e}")),
        (Some(s), None) => Some(s.to_string()),
        (None, _) => None,
    }
}
