//! Text index schema and writer.
//!
//! One tantivy index holds two document types, discriminated by a
//! `doc_type` field: `line` documents carry the normalized per-line text
//! with ancestor-category denormalization, `book_title` documents feed the
//! prefix autocomplete. Writes are buffered; `commit` is the atomic
//! visibility boundary.

use crate::db::{DbError, SeforimDb};
use crate::hebrew::normalize;
use crate::snippet::strip_html;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tantivy::schema::{
    Field, IndexRecordOption, NumericOptions, Schema, TextFieldIndexing, TextOptions, STORED,
    STRING,
};
use tantivy::tokenizer::{LowerCaser, NgramTokenizer, TextAnalyzer, WhitespaceTokenizer};
use tantivy::{doc, Index, IndexWriter};
use thiserror::Error;

/// Whitespace + lowercase analyzer shared by text and title fields. The
/// content is already normalized, so tokenization stays trivial.
pub const TEXT_TOKENIZER: &str = "heb_ws";
/// Edge n-gram analyzer backing title prefix autocomplete.
pub const PREFIX_TOKENIZER: &str = "heb_prefix";

/// Document type discriminants.
pub const DOC_TYPE_LINE: &str = "line";
pub const DOC_TYPE_BOOK_TITLE: &str = "book_title";

const WRITER_HEAP_BYTES: usize = 128_000_000;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
    #[error("index directory error: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

/// Resolved fields of the index schema.
#[derive(Clone, Copy)]
pub struct TextIndexFields {
    pub doc_type: Field,
    pub book_id: Field,
    pub category_id: Field,
    pub book_title: Field,
    pub line_id: Field,
    pub line_index: Field,
    pub text: Field,
    pub text_raw: Field,
    pub text_ng4: Field,
    pub ancestor_categories: Field,
    pub is_base_book: Field,
    pub order_index: Field,
    pub title: Field,
    pub title_prefix: Field,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    let numeric = NumericOptions::default()
        .set_indexed()
        .set_stored()
        .set_fast();
    let indexed_text = |tokenizer: &str| {
        TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(tokenizer)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
    };

    builder.add_text_field("doc_type", STRING);
    builder.add_u64_field("book_id", numeric.clone());
    builder.add_u64_field("category_id", numeric.clone());
    builder.add_text_field("book_title", STORED);
    builder.add_u64_field("line_id", numeric.clone());
    builder.add_u64_field("line_index", numeric.clone());
    builder.add_text_field("text", indexed_text(TEXT_TOKENIZER));
    builder.add_text_field("text_raw", STORED);
    builder.add_text_field("text_ng4", indexed_text(TEXT_TOKENIZER));
    builder.add_text_field("ancestor_categories", STORED);
    builder.add_u64_field("is_base_book", numeric.clone());
    builder.add_u64_field("order_index", numeric);
    builder.add_text_field("title", indexed_text(TEXT_TOKENIZER));
    builder.add_text_field("title_prefix", indexed_text(PREFIX_TOKENIZER));

    builder.build()
}

fn resolve_fields(schema: &Schema) -> Result<TextIndexFields, IndexError> {
    let field = |name: &str| -> Result<Field, IndexError> { Ok(schema.get_field(name)?) };
    Ok(TextIndexFields {
        doc_type: field("doc_type")?,
        book_id: field("book_id")?,
        category_id: field("category_id")?,
        book_title: field("book_title")?,
        line_id: field("line_id")?,
        line_index: field("line_index")?,
        text: field("text")?,
        text_raw: field("text_raw")?,
        text_ng4: field("text_ng4")?,
        ancestor_categories: field("ancestor_categories")?,
        is_base_book: field("is_base_book")?,
        order_index: field("order_index")?,
        title: field("title")?,
        title_prefix: field("title_prefix")?,
    })
}

fn register_tokenizers(index: &Index) -> Result<(), IndexError> {
    index.tokenizers().register(
        TEXT_TOKENIZER,
        TextAnalyzer::builder(WhitespaceTokenizer::default())
            .filter(LowerCaser)
            .build(),
    );
    let prefix = NgramTokenizer::new(1, 24, true)?;
    index.tokenizers().register(
        PREFIX_TOKENIZER,
        TextAnalyzer::builder(prefix).filter(LowerCaser).build(),
    );
    Ok(())
}

/// An opened index plus its resolved fields.
pub struct TextIndex {
    pub index: Index,
    pub fields: TextIndexFields,
}

impl TextIndex {
    /// Create a fresh index directory, wiping any previous one.
    pub fn create(path: &Path) -> Result<Self, IndexError> {
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        fs::create_dir_all(path)?;
        let index = Index::create_in_dir(path, build_schema())?;
        register_tokenizers(&index)?;
        let fields = resolve_fields(&index.schema())?;
        Ok(Self { index, fields })
    }

    /// Open an existing index directory read-write.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let index = Index::open_in_dir(path)?;
        register_tokenizers(&index)?;
        let fields = resolve_fields(&index.schema())?;
        Ok(Self { index, fields })
    }

    pub fn writer(&self) -> Result<TextIndexWriter, IndexError> {
        Ok(TextIndexWriter {
            writer: self.index.writer(WRITER_HEAP_BYTES)?,
            fields: self.fields,
            seen_lines: HashSet::new(),
        })
    }
}

/// One line ready for indexing.
pub struct LineDocument<'a> {
    pub book_id: i64,
    pub category_id: i64,
    pub ancestor_categories: &'a [i64],
    pub book_title: &'a str,
    pub line_id: i64,
    pub line_index: i64,
    /// Original HTML-bearing content; normalization happens here.
    pub content: &'a str,
    pub is_base_book: bool,
    /// Rank of the book in catalog order, used by the base-book boost.
    pub order_index: u64,
}

/// Buffered writer facade. Two documents never share a `line_id`;
/// duplicates are dropped here as a last line of defense even though
/// callers dedupe upstream.
pub struct TextIndexWriter {
    writer: IndexWriter,
    fields: TextIndexFields,
    seen_lines: HashSet<i64>,
}

impl TextIndexWriter {
    pub fn add_line(&mut self, line: &LineDocument<'_>) -> Result<bool, IndexError> {
        if !self.seen_lines.insert(line.line_id) {
            return Ok(false);
        }
        let plain = normalize(&strip_html(line.content));
        let ngrams = ngram_text(&plain);
        let ancestors = line
            .ancestor_categories
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        self.writer.add_document(doc!(
            self.fields.doc_type => DOC_TYPE_LINE,
            self.fields.book_id => line.book_id as u64,
            self.fields.category_id => line.category_id as u64,
            self.fields.book_title => line.book_title,
            self.fields.line_id => line.line_id as u64,
            self.fields.line_index => line.line_index as u64,
            self.fields.text => plain,
            self.fields.text_raw => line.content,
            self.fields.text_ng4 => ngrams,
            self.fields.ancestor_categories => ancestors,
            self.fields.is_base_book => u64::from(line.is_base_book),
            self.fields.order_index => line.order_index,
        ))?;
        Ok(true)
    }

    pub fn add_book_title_term(
        &mut self,
        book_id: i64,
        category_id: i64,
        term: &str,
        display_title: &str,
    ) -> Result<(), IndexError> {
        let normalized = normalize(term);
        let mut document = doc!(
            self.fields.doc_type => DOC_TYPE_BOOK_TITLE,
            self.fields.book_id => book_id as u64,
            self.fields.category_id => category_id as u64,
            self.fields.book_title => display_title,
            self.fields.title => normalized.clone(),
        );
        // Every word suffix becomes a prefix-tokenized value, so a query
        // token can prefix-match any word of the title, not just the
        // first.
        let words: Vec<&str> = normalized.split(' ').collect();
        for i in 0..words.len() {
            document.add_text(self.fields.title_prefix, words[i..].join(" "));
        }
        self.writer.add_document(document)?;
        Ok(())
    }

    /// Atomic visibility boundary for everything added so far.
    pub fn commit(&mut self) -> Result<(), IndexError> {
        self.writer.commit()?;
        Ok(())
    }

    pub fn close(self) -> Result<(), IndexError> {
        self.writer.wait_merging_threads()?;
        Ok(())
    }
}

/// Space-joined 4-grams over each whitespace token of length >= 4. Both
/// the writer and the query side use this, so the grams always agree.
pub fn ngram_text(plain: &str) -> String {
    let mut out = Vec::new();
    for token in plain.split_whitespace() {
        out.extend(token_ngrams(token));
    }
    out.join(" ")
}

/// 4-grams of one token; empty for tokens shorter than 4 characters.
pub fn token_ngrams(token: &str) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < 4 {
        return Vec::new();
    }
    chars
        .windows(4)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Index every line and book title in the store. The closure table must be
/// rebuilt first so ancestor categories denormalize correctly.
pub fn build_text_index(db: &SeforimDb, index_path: &Path) -> Result<(u64, u64), IndexError> {
    let text_index = TextIndex::create(index_path)?;
    let mut writer = text_index.writer()?;

    let mut lines_indexed = 0u64;
    let mut titles_indexed = 0u64;
    let mut ancestor_cache: HashMap<i64, Vec<i64>> = HashMap::new();

    let books = db.get_all_books()?;
    for (order_index, book) in books.iter().enumerate() {
        let ancestors = match ancestor_cache.get(&book.category_id) {
            Some(a) => a.clone(),
            None => {
                let mut a = vec![book.category_id];
                a.extend(db.get_category_ancestors(book.category_id)?);
                ancestor_cache.insert(book.category_id, a.clone());
                a
            }
        };

        for line in db.get_book_lines(book.id)? {
            writer.add_line(&LineDocument {
                book_id: book.id,
                category_id: book.category_id,
                ancestor_categories: &ancestors,
                book_title: &book.title,
                line_id: line.id,
                line_index: line.line_index,
                content: &line.content,
                is_base_book: book.is_base_book,
                order_index: order_index as u64,
            })?;
            lines_indexed += 1;
        }

        writer.add_book_title_term(book.id, book.category_id, &book.title, &book.title)?;
        titles_indexed += 1;
    }

    writer.commit()?;
    writer.close()?;
    Ok((lines_indexed, titles_indexed))
}
