//! Query engine: expanded boolean queries, paginated sessions, facets.
//!
//! A query string is normalized, tokenized, and expanded through the
//! dictionary; the resulting boolean query filters on token presence and
//! scores with phrase proximity, expansion boosts, n-gram presence, and
//! optional fuzzy matching. Hits of base books get a rank boost and every
//! session pages over one immutable snapshot of the index.

use crate::db::SeforimDb;
use crate::dictionary::{DictionaryIndex, Expansion};
use crate::hebrew::{is_hebrew_letter, normalize};
use crate::index::{token_ngrams, TextIndex, TextIndexFields, DOC_TYPE_BOOK_TITLE, DOC_TYPE_LINE};
use crate::models::SearchOptions;
use crate::snippet::{build_snippet, Snippet, MIN_SOURCE_CHARS, NEIGHBOR_WINDOW};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tantivy::collector::{Collector, SegmentCollector, TopDocs};
use tantivy::columnar::Column;
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, PhraseQuery, Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{
    DocAddress, DocId, IndexReader, ReloadPolicy, Score, Searcher, SegmentOrdinal, SegmentReader,
    TantivyDocument, Term,
};
use thiserror::Error;

/// Cap on hits materialized per session.
const MAX_SESSION_HITS: usize = 5_000;
/// Cap on expansion alternatives per token.
const MAX_TERMS_PER_TOKEN: usize = 32;
/// Cap on expansion alternatives across the whole query.
const MAX_TERMS_TOTAL: usize = 256;

const PHRASE_EXACT_BOOST: Score = 50.0;
const PHRASE_NEAR_BOOST: Score = 20.0;
const PHRASE_SLOP_BOOST: Score = 5.0;
const SURFACE_BOOST: Score = 2.0;
const VARIANT_BOOST: Score = 1.5;
const BASE_BOOST: Score = 1.0;

/// Hebrew function words dropped from queries.
const STOP_WORDS: [&str; 12] = [
    "את", "של", "על", "אל", "כי", "לא", "גם", "אם", "או", "כל", "זה", "הוא",
];

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("index error: {0}")]
    Index(#[from] crate::index::IndexError),
}

/// Pulls the snippet source text for a hit; implementations may widen the
/// line with its neighbors from the relational store.
pub trait SnippetProvider: Send + Sync {
    fn snippet_source(&self, book_id: i64, line_id: i64, line_index: i64) -> Option<String>;
}

/// Snippet provider over the relational store: a short line is widened
/// with up to [`NEIGHBOR_WINDOW`] neighbors on each side until it reaches
/// [`MIN_SOURCE_CHARS`].
pub struct StoreSnippetProvider {
    db: Mutex<SeforimDb>,
}

impl StoreSnippetProvider {
    pub fn new(db: SeforimDb) -> Self {
        Self { db: Mutex::new(db) }
    }
}

impl SnippetProvider for StoreSnippetProvider {
    fn snippet_source(&self, book_id: i64, _line_id: i64, line_index: i64) -> Option<String> {
        let db = self.db.lock().ok()?;
        let center = db.get_line_by_index(book_id, line_index).ok()??;
        if center.content.chars().count() >= MIN_SOURCE_CHARS {
            return Some(center.content);
        }
        let mut radius = 1i64;
        let mut lines = vec![center];
        while radius <= NEIGHBOR_WINDOW {
            let window = db
                .get_lines_range(book_id, line_index - radius, line_index + radius)
                .ok()?;
            if window.is_empty() {
                break;
            }
            let total: usize = window.iter().map(|l| l.content.chars().count()).sum();
            lines = window;
            if total >= MIN_SOURCE_CHARS {
                break;
            }
            radius += 1;
        }
        Some(
            lines
                .iter()
                .map(|l| l.content.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}

/// One scored line hit.
#[derive(Debug, Clone)]
pub struct LineHit {
    pub line_id: i64,
    pub book_id: i64,
    pub category_id: i64,
    pub book_title: String,
    pub line_index: i64,
    pub score: f32,
    pub snippet: Option<Snippet>,
}

/// One page of results.
#[derive(Debug, Clone)]
pub struct Page {
    pub hits: Vec<LineHit>,
    pub is_last_page: bool,
}

/// Facet counts per book id and per ancestor category id.
#[derive(Debug, Clone, Default)]
pub struct FacetCounts {
    pub books: HashMap<i64, u64>,
    pub categories: HashMap<i64, u64>,
}

/// A cancellation handle detached from the session; usable from any
/// thread.
#[derive(Clone)]
pub struct SessionHandle {
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

struct SessionHit {
    score: f32,
    address: DocAddress,
    line_id: i64,
    book_id: i64,
    category_id: i64,
    line_index: i64,
}

/// The query engine. Holds the index reader plus its pluggable
/// collaborators; immutable at query time, so engines are shared freely.
pub struct SearchEngine {
    text_index: TextIndex,
    reader: IndexReader,
    dictionary: Option<Box<dyn DictionaryIndex>>,
    snippets: Option<Box<dyn SnippetProvider>>,
    /// category id -> ancestors including itself, for facet roll-up.
    category_ancestors: HashMap<i64, Vec<i64>>,
}

impl SearchEngine {
    pub fn open(index_path: &Path) -> Result<Self, SearchError> {
        let text_index = TextIndex::open(index_path)?;
        let reader = text_index
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            text_index,
            reader,
            dictionary: None,
            snippets: None,
            category_ancestors: HashMap::new(),
        })
    }

    pub fn with_dictionary(mut self, dictionary: Box<dyn DictionaryIndex>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    pub fn with_snippet_provider(mut self, provider: Box<dyn SnippetProvider>) -> Self {
        self.snippets = Some(provider);
        self
    }

    pub fn with_category_ancestors(mut self, ancestors: HashMap<i64, Vec<i64>>) -> Self {
        self.category_ancestors = ancestors;
        self
    }

    /// Ancestor map from the store's closure table, for facet roll-up.
    pub fn load_category_ancestors(
        db: &SeforimDb,
    ) -> Result<HashMap<i64, Vec<i64>>, crate::db::DbError> {
        let mut out = HashMap::new();
        for category in db.get_all_categories()? {
            let mut chain = vec![category.id];
            chain.extend(db.get_category_ancestors(category.id)?);
            out.insert(category.id, chain);
        }
        Ok(out)
    }

    /// Pick up a rebuilt index. Active sessions keep their snapshot; the
    /// new one becomes visible at the next `open_session`.
    pub fn reload(&self) -> Result<(), SearchError> {
        self.reader.reload()?;
        Ok(())
    }

    fn fields(&self) -> &TextIndexFields {
        &self.text_index.fields
    }

    /// Open a paginated session. Returns `None` for queries that
    /// normalize to nothing.
    pub fn open_session(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Option<SearchSession<'_>>, SearchError> {
        let contains_hashem = query.contains("ה'") || query.contains("ה׳");
        let normalized = normalize(query);
        if normalized.is_empty() {
            return Ok(None);
        }

        let tokens = analyze_tokens(&normalized, contains_hashem);
        if tokens.is_empty() {
            return Ok(None);
        }

        let expansions: Vec<Option<Expansion>> = match &self.dictionary {
            Some(dict) => tokens.iter().map(|t| dict.expansion_for(t)).collect(),
            None => tokens.iter().map(|_| None).collect(),
        };

        let highlight_terms = self.highlight_terms(&tokens, &expansions, contains_hashem);
        let query = self.build_query(&tokens, &expansions, options);

        let searcher = self.reader.searcher();
        let top = searcher.search(&query, &TopDocs::with_limit(MAX_SESSION_HITS))?;

        let mut columns: HashMap<SegmentOrdinal, HitColumns> = HashMap::new();
        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let segment = columns.entry(address.segment_ord).or_insert_with(|| {
                HitColumns::open(searcher.segment_reader(address.segment_ord))
            });
            let Some(segment) = segment.as_loaded() else {
                continue;
            };
            let doc = address.doc_id;
            let order_index = segment.order_index.first(doc).unwrap_or(0);
            let is_base = segment.is_base_book.first(doc).unwrap_or(0) == 1;
            let boosted = if is_base {
                score * (1.0 + (120u64.saturating_sub(order_index)) as f32 / 60.0)
            } else {
                score
            };
            hits.push(SessionHit {
                score: boosted,
                address,
                line_id: segment.line_id.first(doc).unwrap_or(0) as i64,
                book_id: segment.book_id.first(doc).unwrap_or(0) as i64,
                category_id: segment.category_id.first(doc).unwrap_or(0) as i64,
                line_index: segment.line_index.first(doc).unwrap_or(0) as i64,
            });
        }

        // Strict session order: boosted score descending, line id as the
        // tiebreaker.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.line_id.cmp(&b.line_id))
        });

        Ok(Some(SearchSession {
            engine: self,
            searcher,
            query,
            hits,
            cursor: 0,
            closed: Arc::new(AtomicBool::new(false)),
            highlight_terms,
        }))
    }

    /// Highlight terms: the tokens plus their expansion surfaces and
    /// variants, with blacklisted `(token, base)` pairs dropped and the
    /// divine-name surfaces added when the query literally contains
    /// Hashem.
    fn highlight_terms(
        &self,
        tokens: &[String],
        expansions: &[Option<Expansion>],
        contains_hashem: bool,
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut terms = Vec::new();
        let mut push = |term: &str| {
            let term = normalize(term);
            if !term.is_empty() && seen.insert(term.clone()) {
                terms.push(term);
            }
        };

        for (token, expansion) in tokens.iter().zip(expansions) {
            push(token);
            let Some(expansion) = expansion else { continue };
            let blacklisted = self.dictionary.as_deref().is_some_and(|d| {
                expansion.bases.iter().any(|b| d.is_blacklisted(token, b))
            });
            if blacklisted {
                continue;
            }
            for surface in &expansion.surfaces {
                push(surface);
            }
            for variant in &expansion.variants {
                push(variant);
            }
        }

        if contains_hashem {
            if let Some(dict) = &self.dictionary {
                for surface in dict.load_hashem_surfaces() {
                    push(&surface);
                }
            }
        }
        terms
    }

    fn build_query(
        &self,
        tokens: &[String],
        expansions: &[Option<Expansion>],
        options: &SearchOptions,
    ) -> Box<dyn Query> {
        let fields = self.fields();
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        // Filters carry no score weight.
        let filter = |q: Box<dyn Query>| -> Box<dyn Query> { Box::new(BoostQuery::new(q, 0.0)) };
        let text_term = |text: &str| Term::from_field_text(fields.text, text);

        clauses.push((
            Occur::Must,
            filter(Box::new(TermQuery::new(
                Term::from_field_text(fields.doc_type, DOC_TYPE_LINE),
                IndexRecordOption::Basic,
            ))),
        ));

        if let Some(category_id) = options.category_id {
            clauses.push((
                Occur::Must,
                filter(u64_term_query(fields.category_id, category_id as u64)),
            ));
        }
        if !options.book_ids.is_empty() {
            clauses.push((
                Occur::Must,
                filter(u64_set_query(fields.book_id, &options.book_ids)),
            ));
        }
        if !options.line_ids.is_empty() {
            clauses.push((
                Occur::Must,
                filter(u64_set_query(fields.line_id, &options.line_ids)),
            ));
        }
        if options.base_book_only {
            clauses.push((
                Occur::Must,
                filter(u64_term_query(fields.is_base_book, 1)),
            ));
        }

        // Presence: every token must appear as itself, via its 4-grams,
        // or as one of its synonyms.
        let mut total_terms = 0usize;
        let synonym_budget = |used: &mut usize, wanted: usize| -> usize {
            let granted = wanted
                .min(MAX_TERMS_PER_TOKEN)
                .min(MAX_TERMS_TOTAL.saturating_sub(*used));
            *used += granted;
            granted
        };

        for (token, expansion) in tokens.iter().zip(expansions) {
            let mut presence: Vec<(Occur, Box<dyn Query>)> = vec![(
                Occur::Should,
                Box::new(TermQuery::new(text_term(token), IndexRecordOption::WithFreqs)),
            )];

            let grams = token_ngrams(token);
            if !grams.is_empty() {
                let gram_clauses: Vec<(Occur, Box<dyn Query>)> = grams
                    .iter()
                    .map(|g| {
                        (
                            Occur::Must,
                            Box::new(TermQuery::new(
                                Term::from_field_text(fields.text_ng4, g),
                                IndexRecordOption::Basic,
                            )) as Box<dyn Query>,
                        )
                    })
                    .collect();
                presence.push((Occur::Should, Box::new(BooleanQuery::new(gram_clauses))));
            }

            if let Some(expansion) = expansion {
                let synonyms = expansion_terms(expansion, token);
                let budget = synonym_budget(&mut total_terms, synonyms.len());
                for synonym in synonyms.iter().take(budget) {
                    presence.push((
                        Occur::Should,
                        Box::new(TermQuery::new(
                            text_term(synonym),
                            IndexRecordOption::WithFreqs,
                        )),
                    ));
                }
            }

            clauses.push((Occur::Must, filter(Box::new(BooleanQuery::new(presence)))));
        }

        // Scoring: phrase tiers over the token sequence.
        if tokens.len() >= 2 {
            let terms: Vec<Term> = tokens.iter().map(|t| text_term(t)).collect();
            clauses.push((
                Occur::Should,
                boosted_phrase(terms.clone(), 0, PHRASE_EXACT_BOOST),
            ));
            clauses.push((
                Occur::Should,
                boosted_phrase(terms.clone(), 3, PHRASE_NEAR_BOOST),
            ));
            if options.near > 0 {
                clauses.push((
                    Occur::Should,
                    boosted_phrase(terms.clone(), options.near, PHRASE_SLOP_BOOST),
                ));
            }

            // Bounded single-position substitutions of expansion terms.
            let mut variants = 0usize;
            'outer: for (position, expansion) in expansions.iter().enumerate() {
                let Some(expansion) = expansion else { continue };
                for alternative in expansion_terms(expansion, &tokens[position]) {
                    if variants >= MAX_TERMS_PER_TOKEN {
                        break 'outer;
                    }
                    let mut substituted = terms.clone();
                    substituted[position] = text_term(&alternative);
                    clauses.push((
                        Occur::Should,
                        boosted_phrase(substituted, options.near.max(3), PHRASE_SLOP_BOOST),
                    ));
                    variants += 1;
                }
            }
        }

        // Scoring: per-token expansion boosts.
        let mut total_terms = 0usize;
        for (token, expansion) in tokens.iter().zip(expansions) {
            let Some(expansion) = expansion else { continue };
            let mut per_token = 0usize;
            let mut push_boost = |clauses: &mut Vec<(Occur, Box<dyn Query>)>,
                                  term: &str,
                                  boost: Score| {
                if term == token
                    || per_token >= MAX_TERMS_PER_TOKEN
                    || total_terms >= MAX_TERMS_TOTAL
                {
                    return;
                }
                per_token += 1;
                total_terms += 1;
                clauses.push((
                    Occur::Should,
                    Box::new(BoostQuery::new(
                        Box::new(TermQuery::new(
                            Term::from_field_text(self.fields().text, term),
                            IndexRecordOption::WithFreqs,
                        )),
                        boost,
                    )),
                ));
            };
            for surface in &expansion.surfaces {
                push_boost(&mut clauses, surface, SURFACE_BOOST);
            }
            for variant in &expansion.variants {
                push_boost(&mut clauses, variant, VARIANT_BOOST);
            }
            for base in &expansion.bases {
                push_boost(&mut clauses, base, BASE_BOOST);
            }
        }

        // Scoring: 4-gram presence.
        let gram_shoulds: Vec<(Occur, Box<dyn Query>)> = tokens
            .iter()
            .flat_map(|t| token_ngrams(t))
            .map(|g| {
                (
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_text(fields.text_ng4, &g),
                        IndexRecordOption::WithFreqs,
                    )) as Box<dyn Query>,
                )
            })
            .collect();
        if !gram_shoulds.is_empty() {
            clauses.push((Occur::Should, Box::new(BooleanQuery::new(gram_shoulds))));
        }

        // Scoring: edit-distance-1 fuzzy on long tokens.
        if options.near > 0 {
            for token in tokens {
                if token.chars().count() >= 4 {
                    clauses.push((
                        Occur::Should,
                        Box::new(FuzzyTermQuery::new(text_term(token), 1, true)),
                    ));
                }
            }
        }

        Box::new(BooleanQuery::new(clauses))
    }

    /// Prefix autocomplete over book titles: every normalized query token
    /// must prefix-match a word of the title. Returns up to `limit` book
    /// ids in first-match order.
    pub fn search_books_by_title_prefix(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<i64>, SearchError> {
        let fields = self.fields();
        let normalized = normalize(query);
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(
            Occur::Must,
            Box::new(TermQuery::new(
                Term::from_field_text(fields.doc_type, DOC_TYPE_BOOK_TITLE),
                IndexRecordOption::Basic,
            )),
        )];
        let mut token_count = 0usize;
        for token in normalized.split_whitespace() {
            token_count += 1;
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(fields.title_prefix, token),
                    IndexRecordOption::Basic,
                )),
            ));
        }
        if token_count == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query = BooleanQuery::new(clauses);
        let top = searcher.search(&query, &TopDocs::with_limit(limit.max(1) * 4))?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (_score, address) in top {
            let doc: TantivyDocument = searcher.doc(address)?;
            let Some(book_id) = doc.get_first(fields.book_id).and_then(|v| v.as_u64()) else {
                continue;
            };
            if seen.insert(book_id) {
                out.push(book_id as i64);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}

/// Tokenize a normalized query: lowercase whitespace tokens, minus single
/// Hebrew letters and stop words. A bare `ה` survives when the original
/// query contained Hashem; numeric tokens always survive for dictionary
/// expansion.
fn analyze_tokens(normalized: &str, contains_hashem: bool) -> Vec<String> {
    normalized
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| {
            let mut chars = t.chars();
            let (first, rest) = (chars.next(), chars.next());
            let single_hebrew = rest.is_none() && first.is_some_and(is_hebrew_letter);
            if single_hebrew {
                return contains_hashem && t == "ה";
            }
            if t.chars().all(|c| c.is_ascii_digit()) {
                return true;
            }
            !STOP_WORDS.contains(&t.as_str())
        })
        .collect()
}

/// Distinct expansion terms of one token, surfaces first, the token
/// itself excluded.
fn expansion_terms(expansion: &Expansion, token: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for term in expansion
        .surfaces
        .iter()
        .chain(expansion.variants.iter())
        .chain(expansion.bases.iter())
    {
        let term = normalize(term);
        if term.is_empty() || term == token {
            continue;
        }
        if seen.insert(term.clone()) {
            out.push(term);
        }
    }
    out
}

fn boosted_phrase(terms: Vec<Term>, slop: u32, boost: Score) -> Box<dyn Query> {
    let mut phrase = PhraseQuery::new(terms);
    phrase.set_slop(slop);
    Box::new(BoostQuery::new(Box::new(phrase), boost))
}

fn u64_term_query(field: tantivy::schema::Field, value: u64) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_u64(field, value),
        IndexRecordOption::Basic,
    ))
}

fn u64_set_query(field: tantivy::schema::Field, values: &[i64]) -> Box<dyn Query> {
    let clauses: Vec<(Occur, Box<dyn Query>)> = values
        .iter()
        .map(|&v| (Occur::Should, u64_term_query(field, v as u64)))
        .collect();
    Box::new(BooleanQuery::new(clauses))
}

struct LoadedColumns {
    book_id: Column<u64>,
    category_id: Column<u64>,
    line_id: Column<u64>,
    line_index: Column<u64>,
    is_base_book: Column<u64>,
    order_index: Column<u64>,
}

enum HitColumns {
    Loaded(Box<LoadedColumns>),
    Missing,
}

impl HitColumns {
    fn open(reader: &SegmentReader) -> Self {
        let ff = reader.fast_fields();
        let load = || -> tantivy::Result<LoadedColumns> {
            Ok(LoadedColumns {
                book_id: ff.u64("book_id")?,
                category_id: ff.u64("category_id")?,
                line_id: ff.u64("line_id")?,
                line_index: ff.u64("line_index")?,
                is_base_book: ff.u64("is_base_book")?,
                order_index: ff.u64("order_index")?,
            })
        };
        match load() {
            Ok(columns) => HitColumns::Loaded(Box::new(columns)),
            Err(_) => HitColumns::Missing,
        }
    }

    fn as_loaded(&self) -> Option<&LoadedColumns> {
        match self {
            HitColumns::Loaded(columns) => Some(columns),
            HitColumns::Missing => None,
        }
    }
}

/// A paginated result session over one index snapshot. Not thread-safe;
/// one session per logical consumer. Closing is idempotent and observable
/// from any thread through [`SessionHandle`].
pub struct SearchSession<'a> {
    engine: &'a SearchEngine,
    searcher: Searcher,
    query: Box<dyn Query>,
    hits: Vec<SessionHit>,
    cursor: usize,
    closed: Arc<AtomicBool>,
    highlight_terms: Vec<String>,
}

impl SearchSession<'_> {
    pub fn total_hits(&self) -> usize {
        self.hits.len()
    }

    pub fn highlight_terms(&self) -> &[String] {
        &self.highlight_terms
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            closed: self.closed.clone(),
        }
    }

    /// Release the snapshot. Closing a closed session is a no-op.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// The next page of at most `limit` hits, or `None` when the session
    /// is exhausted or closed. Cancellation is observed between scored
    /// docs; a partial page is returned and the cursor stays consistent.
    pub fn next_page(&mut self, limit: usize) -> Result<Option<Page>, SearchError> {
        if self.is_closed() || self.cursor >= self.hits.len() {
            return Ok(None);
        }
        let end = (self.cursor + limit.max(1)).min(self.hits.len());
        let mut hits = Vec::with_capacity(end - self.cursor);

        while self.cursor < end {
            if self.is_closed() {
                break;
            }
            let session_hit = &self.hits[self.cursor];
            hits.push(self.materialize(session_hit)?);
            self.cursor += 1;
        }

        let is_last_page = self.cursor >= self.hits.len();
        Ok(Some(Page { hits, is_last_page }))
    }

    fn materialize(&self, hit: &SessionHit) -> Result<LineHit, SearchError> {
        let fields = self.engine.fields();
        let doc: TantivyDocument = self.searcher.doc(hit.address)?;
        let book_title = doc
            .get_first(fields.book_title)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let raw_text = doc
            .get_first(fields.text_raw)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let source = self
            .engine
            .snippets
            .as_ref()
            .and_then(|p| p.snippet_source(hit.book_id, hit.line_id, hit.line_index))
            .unwrap_or(raw_text);
        let snippet = build_snippet(&source, &self.highlight_terms);

        Ok(LineHit {
            line_id: hit.line_id,
            book_id: hit.book_id,
            category_id: hit.category_id,
            book_title,
            line_index: hit.line_index,
            score: hit.score,
            snippet,
        })
    }

    /// Facet counts over the full match set, streamed scorelessly from
    /// the fast fields and rolled up to ancestor categories.
    pub fn compute_facets(&self) -> Result<FacetCounts, SearchError> {
        let raw = self
            .searcher
            .search(&self.query, &FacetStreamCollector)?;
        let mut rolled = FacetCounts {
            books: raw.books,
            categories: HashMap::new(),
        };
        for (category_id, count) in raw.categories {
            match self.engine.category_ancestors.get(&category_id) {
                Some(chain) => {
                    for ancestor in chain {
                        *rolled.categories.entry(*ancestor).or_default() += count;
                    }
                }
                None => {
                    *rolled.categories.entry(category_id).or_default() += count;
                }
            }
        }
        Ok(rolled)
    }
}

/// Scoreless collector accumulating book and direct-category counts from
/// fast fields, without touching stored fields.
struct FacetStreamCollector;

struct FacetSegmentStream {
    book_id: Option<Column<u64>>,
    category_id: Option<Column<u64>>,
    counts: FacetCounts,
}

impl Collector for FacetStreamCollector {
    type Fruit = FacetCounts;
    type Child = FacetSegmentStream;

    fn for_segment(
        &self,
        _segment_local_id: SegmentOrdinal,
        reader: &SegmentReader,
    ) -> tantivy::Result<FacetSegmentStream> {
        Ok(FacetSegmentStream {
            book_id: reader.fast_fields().u64("book_id").ok(),
            category_id: reader.fast_fields().u64("category_id").ok(),
            counts: FacetCounts::default(),
        })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(&self, fruits: Vec<FacetCounts>) -> tantivy::Result<FacetCounts> {
        let mut merged = FacetCounts::default();
        for fruit in fruits {
            for (book, count) in fruit.books {
                *merged.books.entry(book).or_default() += count;
            }
            for (category, count) in fruit.categories {
                *merged.categories.entry(category).or_default() += count;
            }
        }
        Ok(merged)
    }
}

impl SegmentCollector for FacetSegmentStream {
    type Fruit = FacetCounts;

    fn collect(&mut self, doc: DocId, _score: Score) {
        if let Some(book_id) = self.book_id.as_ref().and_then(|c| c.first(doc)) {
            *self.counts.books.entry(book_id as i64).or_default() += 1;
        }
        if let Some(category_id) = self.category_id.as_ref().and_then(|c| c.first(doc)) {
            *self.counts.categories.entry(category_id as i64).or_default() += 1;
        }
    }

    fn harvest(self) -> FacetCounts {
        self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_drops_single_letters_and_stop_words() {
        let tokens = analyze_tokens("ב בראשית את הארץ", false);
        assert_eq!(tokens, vec!["בראשית", "הארץ"]);
    }

    #[test]
    fn test_analyze_keeps_hashem_he() {
        let tokens = analyze_tokens("ה ברוך", true);
        assert_eq!(tokens, vec!["ה", "ברוך"]);
        let tokens = analyze_tokens("ה ברוך", false);
        assert_eq!(tokens, vec!["ברוך"]);
    }

    #[test]
    fn test_analyze_keeps_numeric_tokens() {
        let tokens = analyze_tokens("613 מצוות", false);
        assert_eq!(tokens, vec!["613", "מצוות"]);
    }

    #[test]
    fn test_expansion_terms_distinct_and_exclude_token() {
        let expansion = Expansion {
            token: "ברא".to_string(),
            surfaces: vec!["ברא".to_string(), "בראה".to_string()],
            variants: vec!["בראה".to_string(), "ברה".to_string()],
            bases: vec!["ברא".to_string()],
        };
        let terms = expansion_terms(&expansion, "ברא");
        assert_eq!(terms, vec!["בראה".to_string(), "ברה".to_string()]);
    }
}
