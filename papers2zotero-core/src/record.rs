//! Source-side data model: one Papers2 publication and everything hanging off it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Papers2 publication types, keyed by the `subtype` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PubType {
    Book,
    BookSection,
    Thesis,
    EBook,
    Pamphlet,
    Website,
    Poster,
    Presentation,
    Abstract,
    Lecture,
    Photo,
    Software,
    DataFile,
    JournalArticle,
    MagazineArticle,
    NewspaperArticle,
    WebsiteArticle,
    Manuscript,
    Preprint,
    ConferencePaper,
    Patent,
    Report,
    TechReport,
    ScientificReport,
    Grant,
    Assignment,
    Reference,
    Protocol,
}

impl PubType {
    pub const ALL: [PubType; 28] = [
        PubType::Book,
        PubType::BookSection,
        PubType::Thesis,
        PubType::EBook,
        PubType::Pamphlet,
        PubType::Website,
        PubType::Poster,
        PubType::Presentation,
        PubType::Abstract,
        PubType::Lecture,
        PubType::Photo,
        PubType::Software,
        PubType::DataFile,
        PubType::JournalArticle,
        PubType::MagazineArticle,
        PubType::NewspaperArticle,
        PubType::WebsiteArticle,
        PubType::Manuscript,
        PubType::Preprint,
        PubType::ConferencePaper,
        PubType::Patent,
        PubType::Report,
        PubType::TechReport,
        PubType::ScientificReport,
        PubType::Grant,
        PubType::Assignment,
        PubType::Reference,
        PubType::Protocol,
    ];

    /// The Papers2 `subtype` code.
    pub fn subtype(self) -> i64 {
        match self {
            PubType::Book => 0,
            PubType::BookSection => -1000,
            PubType::Thesis => 10,
            PubType::EBook => 20,
            PubType::Pamphlet => 30,
            PubType::Website => 300,
            PubType::Poster => 313,
            PubType::Presentation => 314,
            PubType::Abstract => 315,
            PubType::Lecture => 319,
            PubType::Photo => 325,
            PubType::Software => 341,
            PubType::DataFile => 345,
            PubType::JournalArticle => 400,
            PubType::MagazineArticle => 401,
            PubType::NewspaperArticle => 402,
            PubType::WebsiteArticle => 403,
            PubType::Manuscript => 410,
            PubType::Preprint => 415,
            PubType::ConferencePaper => 420,
            PubType::Patent => 500,
            PubType::Report => 700,
            PubType::TechReport => 701,
            PubType::ScientificReport => 702,
            PubType::Grant => 703,
            PubType::Assignment => 704,
            PubType::Reference => 713,
            PubType::Protocol => 717,
        }
    }

    pub fn from_subtype(code: i64) -> Option<Self> {
        PubType::ALL.into_iter().find(|t| t.subtype() == code)
    }

    /// Zotero item type for this publication type.
    pub fn item_type(self) -> &'static str {
        match self {
            PubType::Book | PubType::EBook => "book",
            PubType::BookSection => "bookSection",
            PubType::Thesis => "thesis",
            PubType::Pamphlet => "document",
            PubType::Website | PubType::WebsiteArticle => "webpage",
            PubType::Poster | PubType::Presentation | PubType::Abstract | PubType::Lecture => {
                "presentation"
            }
            PubType::Photo => "artwork",
            PubType::Software => "computerProgram",
            PubType::DataFile => "dataset",
            PubType::JournalArticle => "journalArticle",
            PubType::MagazineArticle => "magazineArticle",
            PubType::NewspaperArticle => "newspaperArticle",
            PubType::Manuscript => "manuscript",
            PubType::Preprint => "preprint",
            PubType::ConferencePaper => "conferencePaper",
            PubType::Patent => "patent",
            PubType::Report
            | PubType::TechReport
            | PubType::ScientificReport
            | PubType::Grant
            | PubType::Assignment
            | PubType::Reference
            | PubType::Protocol => "report",
        }
    }

    /// Top-level folder used for linked attachments (ZotFile `%T` layout).
    pub fn folder(self) -> &'static str {
        match self {
            PubType::Book | PubType::EBook => "Book",
            PubType::BookSection => "Book Section",
            PubType::Thesis => "Thesis",
            PubType::Pamphlet => "Document",
            PubType::Website | PubType::WebsiteArticle => "Web Page",
            PubType::Poster | PubType::Presentation | PubType::Abstract | PubType::Lecture => {
                "Presentation"
            }
            PubType::Photo => "Artwork",
            PubType::Software => "Software",
            PubType::DataFile => "Dataset",
            PubType::JournalArticle | PubType::Manuscript => "Journal Article",
            PubType::MagazineArticle => "Magazine Article",
            PubType::NewspaperArticle => "Newspaper Article",
            PubType::Preprint => "Preprint",
            PubType::ConferencePaper => "Conference Paper",
            PubType::Patent => "Patent",
            PubType::Report
            | PubType::TechReport
            | PubType::ScientificReport
            | PubType::Grant
            | PubType::Assignment
            | PubType::Reference
            | PubType::Protocol => "Report",
        }
    }
}

/// Papers2 color labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    None,
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Gray,
}

impl Label {
    pub const ALL: [Label; 8] = [
        Label::None,
        Label::Red,
        Label::Orange,
        Label::Yellow,
        Label::Green,
        Label::Blue,
        Label::Purple,
        Label::Gray,
    ];

    pub fn from_num(num: i64) -> Option<Self> {
        usize::try_from(num).ok().and_then(|i| Label::ALL.get(i).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            Label::None => "None",
            Label::Red => "Red",
            Label::Orange => "Orange",
            Label::Yellow => "Yellow",
            Label::Green => "Green",
            Label::Blue => "Blue",
            Label::Purple => "Purple",
            Label::Gray => "Gray",
        }
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .into_iter()
            .find(|l| l.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown label color {s:?}"))
    }
}

/// Keyword categories that can be converted into tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordType {
    User,
    Auto,
    Label,
}

impl FromStr for KeywordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(KeywordType::User),
            "auto" => Ok(KeywordType::Auto),
            "label" => Ok(KeywordType::Label),
            other => Err(format!("unknown keyword type {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum KeywordRef {
    User(String),
    Auto(String),
    Label(Label),
}

impl KeywordRef {
    pub fn keyword_type(&self) -> KeywordType {
        match self {
            KeywordRef::User(_) => KeywordType::User,
            KeywordRef::Auto(_) => KeywordType::Auto,
            KeywordRef::Label(_) => KeywordType::Label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRef {
    pub name: String,
}

impl CollectionRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    /// Absolute location on the local filesystem.
    pub path: PathBuf,
    /// Location relative to the Papers2 library folder, e.g. `Articles/A/Abe/Abe 2008.pdf`.
    pub relative_path: PathBuf,
    pub mime_type: Option<String>,
    pub read: bool,
    pub primary: bool,
}

/// An author or editor as stored in Papers2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorRef {
    pub prename: Option<String>,
    pub surname: Option<String>,
    pub institutional: bool,
    /// 0 = author, 1 = editor.
    pub role: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub content: String,
    pub rating: i64,
}

/// Bibliographic fields, enumerated explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub doi: Option<String>,
    pub summary: Option<String>,
    /// Seconds since the Unix epoch.
    pub imported_date: Option<f64>,
    /// Papers2 date code, e.g. `99200803121200000000222000`.
    pub publication_date: Option<String>,
    pub version: Option<String>,
    pub number: Option<String>,
    pub document_number: Option<String>,
    pub start_page: Option<String>,
    pub end_page: Option<String>,
    pub language: Option<String>,
    pub place: Option<String>,
    pub publisher: Option<String>,
    pub copyright: Option<String>,
    pub volume: Option<String>,
    /// Title of the containing journal or book.
    pub bundle_title: Option<String>,
    pub bundle_abbreviation: Option<String>,
    pub isbn: Vec<String>,
    pub pubmed_ids: Vec<String>,
    /// Most recent first.
    pub urls: Vec<String>,
}

/// Immutable snapshot of one publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: i64,
    pub pub_type: PubType,
    pub title: Option<String>,
    pub metadata: Metadata,
    pub creators: Vec<CreatorRef>,
    pub citekey: Option<String>,
    pub rating: i64,
    pub notes: Option<String>,
    pub reviews: Vec<Review>,
    pub keywords: Vec<KeywordRef>,
    pub collections: Vec<CollectionRef>,
    pub attachments: Vec<AttachmentDescriptor>,
}

impl SourceRecord {
    /// A record with only the required fields set.
    pub fn new(id: i64, pub_type: PubType, title: impl Into<String>) -> Self {
        Self {
            id,
            pub_type,
            title: Some(title.into()),
            metadata: Metadata::default(),
            creators: Vec::new(),
            citekey: None,
            rating: 0,
            notes: None,
            reviews: Vec::new(),
            keywords: Vec::new(),
            collections: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("<untitled>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_codes_round_trip_for_every_type() {
        for t in PubType::ALL {
            assert_eq!(PubType::from_subtype(t.subtype()), Some(t));
        }
        assert_eq!(PubType::from_subtype(12345), None);
    }

    #[test]
    fn label_lookup() {
        assert_eq!(Label::from_num(6), Some(Label::Purple));
        assert_eq!(Label::from_num(8), None);
        assert_eq!(Label::from_num(-1), None);
        assert_eq!("purple".parse::<Label>(), Ok(Label::Purple));
        assert!("Magenta".parse::<Label>().is_err());
    }
}
