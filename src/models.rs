//! Data structures shared across the seforim build and query pipeline.

use serde::{Deserialize, Serialize};

/// Kinds of connection between two lines. Stored by integer id; the
/// directionality rule in the link resolver decides which kind the reverse
/// edge carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    Commentary,
    Targum,
    Reference,
    Source,
    Other,
}

impl ConnectionType {
    /// Stable integer id used in the `link` table.
    pub fn id(self) -> i64 {
        match self {
            ConnectionType::Commentary => 1,
            ConnectionType::Targum => 2,
            ConnectionType::Reference => 3,
            ConnectionType::Source => 4,
            ConnectionType::Other => 5,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(ConnectionType::Commentary),
            2 => Some(ConnectionType::Targum),
            3 => Some(ConnectionType::Reference),
            4 => Some(ConnectionType::Source),
            5 => Some(ConnectionType::Other),
            _ => None,
        }
    }

    /// Parse the connection-type column of an upstream links CSV.
    pub fn from_csv(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "commentary" => Some(ConnectionType::Commentary),
            "targum" => Some(ConnectionType::Targum),
            "reference" => Some(ConnectionType::Reference),
            "source" => Some(ConnectionType::Source),
            "other" | "" => Some(ConnectionType::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Commentary => "commentary",
            ConnectionType::Targum => "targum",
            ConnectionType::Reference => "reference",
            ConnectionType::Source => "source",
            ConnectionType::Other => "other",
        }
    }

    /// The type carried by the reverse edge of a bidirectional pair when
    /// the forward edge points at the primary book. Commentary reverses to
    /// source; every other kind is its own complement.
    pub fn complementary(self) -> Self {
        match self {
            ConnectionType::Commentary => ConnectionType::Source,
            ConnectionType::Source => ConnectionType::Commentary,
            other => other,
        }
    }
}

/// A provenance label for ingested books (e.g. `Sefaria`, `Otzaria`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
}

/// A node of the category forest. `parent_id` is `None` iff `level` is 0;
/// siblings are ordered by `(order, title)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub level: i64,
    pub order: i64,
}

/// A book row. The four `has_*_connection` flags are derived and refreshed
/// after link insertion; `total_lines` equals the count of lines carrying
/// this book id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub category_id: i64,
    pub source_id: i64,
    pub title: String,
    pub authors: Vec<String>,
    pub pub_places: Vec<String>,
    pub pub_dates: Vec<String>,
    pub he_short_desc: Option<String>,
    pub order: f64,
    pub total_lines: i64,
    pub is_base_book: bool,
    pub has_targum_connection: bool,
    pub has_reference_connection: bool,
    pub has_commentary_connection: bool,
    pub has_other_connection: bool,
    pub has_alt_structures: bool,
}

/// A single line of a book. `content` is HTML-tagged text; heading lines
/// carry `en_ref = None`. Within a book, `line_index` runs 0..total_lines
/// with no gaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub id: i64,
    pub book_id: i64,
    pub line_index: i64,
    pub content: String,
    pub he_ref: Option<String>,
    pub en_ref: Option<String>,
}

/// A table-of-contents entry. Forms a forest per book; `parent_id` and
/// `line_id` always reference entities of the same book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocEntry {
    pub id: i64,
    pub book_id: i64,
    pub parent_id: Option<i64>,
    pub text: String,
    pub level: i64,
    pub line_id: Option<i64>,
    pub is_last_child: bool,
    pub has_children: bool,
}

/// An alternative structure over a book (e.g. Parasha/Aliyah), keyed by
/// `(book_id, structure_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AltTocStructure {
    pub id: i64,
    pub book_id: i64,
    pub structure_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AltTocEntry {
    pub id: i64,
    pub structure_id: i64,
    pub book_id: i64,
    pub parent_id: Option<i64>,
    pub text: String,
    pub level: i64,
    pub line_id: Option<i64>,
}

/// A directed link between two lines. Every forward link has exactly one
/// reverse companion whose type follows the directionality rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub source_book_id: i64,
    pub target_book_id: i64,
    pub source_line_id: i64,
    pub target_line_id: i64,
    pub connection_type: ConnectionType,
}

/// One resolvable reference inside a book: the English and Hebrew citation
/// strings of a content line, plus its 1-based index into the book's line
/// sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefEntry {
    pub en_ref: String,
    pub he_ref: String,
    pub line_index: i64,
}

/// Build-time options for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Rows per write batch; tuned so a batch stays around 1 MiB.
    pub batch_size: usize,
    /// Bound of the prepared-payload queue between workers and the writer.
    pub queue_depth: usize,
    pub show_progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 2000,
            queue_depth: 8,
            show_progress: false,
        }
    }
}

/// Query-time options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Phrase slop; 0 means exact phrase.
    pub near: u32,
    /// Restrict hits to base books.
    pub base_book_only: bool,
    /// Restrict hits to one category subtree.
    pub category_id: Option<i64>,
    /// Restrict hits to a set of books.
    pub book_ids: Vec<i64>,
    /// Restrict hits to a set of lines.
    pub line_ids: Vec<i64>,
}

impl SearchOptions {
    pub fn with_near(near: u32) -> Self {
        Self {
            near,
            ..Default::default()
        }
    }
}

/// Counters returned by an ingestion run. Per-record failures land here
/// instead of aborting the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub books_processed: u64,
    pub books_skipped: u64,
    pub lines_inserted: u64,
    pub links_resolved: u64,
    pub links_unresolved: u64,
}

impl IngestSummary {
    pub fn merge(&mut self, other: &IngestSummary) {
        self.books_processed += other.books_processed;
        self.books_skipped += other.books_skipped;
        self.lines_inserted += other.lines_inserted;
        self.links_resolved += other.links_resolved;
        self.links_unresolved += other.links_unresolved;
    }
}

/// Corpus statistics loaded from the relational store.
#[derive(Debug, Serialize)]
pub struct CorpusStats {
    pub total_categories: u64,
    pub total_books: u64,
    pub total_lines: u64,
    pub total_links: u64,
    pub total_toc_entries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_type_ids_roundtrip() {
        for ct in [
            ConnectionType::Commentary,
            ConnectionType::Targum,
            ConnectionType::Reference,
            ConnectionType::Source,
            ConnectionType::Other,
        ] {
            assert_eq!(ConnectionType::from_id(ct.id()), Some(ct));
        }
        assert_eq!(ConnectionType::from_id(0), None);
    }

    #[test]
    fn test_complementary_types() {
        assert_eq!(
            ConnectionType::Commentary.complementary(),
            ConnectionType::Source
        );
        assert_eq!(
            ConnectionType::Reference.complementary(),
            ConnectionType::Reference
        );
        assert_eq!(
            ConnectionType::Targum.complementary(),
            ConnectionType::Targum
        );
    }

    #[test]
    fn test_from_csv_is_case_insensitive() {
        assert_eq!(
            ConnectionType::from_csv("Commentary"),
            Some(ConnectionType::Commentary)
        );
        assert_eq!(
            ConnectionType::from_csv(" targum "),
            Some(ConnectionType::Targum)
        );
        assert_eq!(ConnectionType::from_csv("quotation"), None);
    }
}
