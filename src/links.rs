//! Citation link resolution and bidirectional link insertion.
//!
//! Link dumps arrive as CSV rows `(citation1, citation2, connection_type)`.
//! Each citation is normalized to its canonical string and resolved against
//! the lookup maps produced during ingestion; resolved pairs are inserted
//! in both directions inside one transaction so no reader ever observes
//! half of a pair. Rows that fail to parse or resolve are counted, never
//! fatal.

use crate::citation::{self, canonical, canonical_base};
use crate::db::{DbError, SeforimDb};
use crate::flatten::FlattenedBook;
use crate::models::{BuildOptions, ConnectionType, Link};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("worker pool failure")]
    WorkerPanic,
}

/// One resolvable location inside the ingested corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRef {
    pub book_id: i64,
    pub line_id: i64,
    /// 1-based index into the book's line sequence.
    pub line_index: i64,
    /// Tail fallback is disabled for books spanning multiple sections.
    pub multi_section: bool,
}

/// Lookup maps over every book ingested in this run.
#[derive(Debug, Default)]
pub struct ResolverMaps {
    /// canonical(citation) -> all matching locations.
    pub by_canonical: HashMap<String, Vec<ResolvedRef>>,
    /// canonical citation without trailing refs -> lowest-index location.
    pub by_base: HashMap<String, ResolvedRef>,
}

impl ResolverMaps {
    /// Fold one book's flattened refs into the global maps, swapping its
    /// 1-based line indices for persistent row ids.
    pub fn extend_from_book(&mut self, book_id: i64, flat: &FlattenedBook, line_ids: &[i64]) {
        for (key, entries) in &flat.refs_by_canonical {
            let bucket = self.by_canonical.entry(key.clone()).or_default();
            for entry in entries {
                bucket.push(ResolvedRef {
                    book_id,
                    line_id: line_ids[(entry.line_index - 1) as usize],
                    line_index: entry.line_index,
                    multi_section: flat.multi_section,
                });
            }
        }
        for (key, entry) in &flat.refs_by_base {
            let candidate = ResolvedRef {
                book_id,
                line_id: line_ids[(entry.line_index - 1) as usize],
                line_index: entry.line_index,
                multi_section: flat.multi_section,
            };
            self.by_base
                .entry(key.clone())
                .and_modify(|existing| {
                    if candidate.line_index < existing.line_index {
                        *existing = candidate;
                    }
                })
                .or_insert(candidate);
        }
    }

    /// Resolve one citation string.
    ///
    /// Exact canonical match first; a range retries with its start; a
    /// citation with positional refs may fall back to its section base
    /// unless the target book is multi-section, where siman-level
    /// citations from different sections would collapse onto one line.
    pub fn resolve(&self, raw: &str) -> Option<ResolvedRef> {
        let key = canonical(raw);
        if let Some(entries) = self.by_canonical.get(&key) {
            if let Some(first) = entries.first() {
                return Some(*first);
            }
        }

        if let Some((start, _)) = raw.rsplit_once('-') {
            let key = canonical(start);
            if let Some(entries) = self.by_canonical.get(&key) {
                if let Some(first) = entries.first() {
                    return Some(*first);
                }
            }
        }

        let parsed = citation::parse(raw)?;
        if parsed.refs.is_empty() {
            return None;
        }
        let base = self.by_base.get(&canonical_base(raw))?;
        if base.multi_section {
            return None;
        }
        Some(*base)
    }
}

/// Book attributes consulted by the directionality rule.
#[derive(Debug, Clone, Copy)]
pub struct BookRank {
    pub is_base_book: bool,
    pub category_level: i64,
    pub order: f64,
}

/// Load the rank of every ingested book once, keyed by book id.
pub fn load_book_ranks(db: &SeforimDb) -> Result<HashMap<i64, BookRank>, DbError> {
    let mut ranks = HashMap::new();
    for book in db.get_all_books()? {
        let category_level = db
            .get_category(book.category_id)?
            .map(|c| c.level)
            .unwrap_or(0);
        ranks.insert(
            book.id,
            BookRank {
                is_base_book: book.is_base_book,
                category_level,
                order: book.order,
            },
        );
    }
    Ok(ranks)
}

/// Decide which endpoint is primary. A base book beats a non-base book;
/// between two base books (or two non-base books) the lower
/// `(category_level, order)` tuple wins, first endpoint on a tie.
fn first_is_primary(a: BookRank, b: BookRank) -> bool {
    match (a.is_base_book, b.is_base_book) {
        (true, false) => true,
        (false, true) => false,
        _ => (a.category_level, a.order) <= (b.category_level, b.order),
    }
}

/// Build both directions of a link. The forward edge runs from the
/// non-primary endpoint to the primary and keeps the base type; the
/// reverse edge carries the complementary type.
pub fn link_pair(
    a: ResolvedRef,
    b: ResolvedRef,
    base_type: ConnectionType,
    ranks: &HashMap<i64, BookRank>,
) -> [Link; 2] {
    let default_rank = BookRank {
        is_base_book: false,
        category_level: i64::MAX,
        order: f64::MAX,
    };
    let rank_a = ranks.get(&a.book_id).copied().unwrap_or(default_rank);
    let rank_b = ranks.get(&b.book_id).copied().unwrap_or(default_rank);

    let (primary, secondary) = if first_is_primary(rank_a, rank_b) {
        (a, b)
    } else {
        (b, a)
    };

    [
        Link {
            id: 0,
            source_book_id: secondary.book_id,
            target_book_id: primary.book_id,
            source_line_id: secondary.line_id,
            target_line_id: primary.line_id,
            connection_type: base_type,
        },
        Link {
            id: 0,
            source_book_id: primary.book_id,
            target_book_id: secondary.book_id,
            source_line_id: primary.line_id,
            target_line_id: secondary.line_id,
            connection_type: base_type.complementary(),
        },
    ]
}

/// Counters for one link-resolution run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct LinkSummary {
    pub resolved: u64,
    pub unresolved: u64,
    pub malformed: u64,
}

impl LinkSummary {
    fn merge(&mut self, other: &LinkSummary) {
        self.resolved += other.resolved;
        self.unresolved += other.unresolved;
        self.malformed += other.malformed;
    }
}

struct FileOutcome {
    links: Vec<Link>,
    summary: LinkSummary,
}

/// Resolve one CSV file against the maps. The first row is treated as a
/// header, matching the upstream dumps.
fn resolve_csv_file(
    path: &Path,
    maps: &ResolverMaps,
    ranks: &HashMap<i64, BookRank>,
) -> Result<FileOutcome, LinkError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut outcome = FileOutcome {
        links: Vec::new(),
        summary: LinkSummary::default(),
    };

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(_) => {
                outcome.summary.malformed += 1;
                continue;
            }
        };
        let (Some(citation_a), Some(citation_b)) = (record.get(0), record.get(1)) else {
            outcome.summary.malformed += 1;
            continue;
        };
        let Some(base_type) = ConnectionType::from_csv(record.get(2).unwrap_or("")) else {
            outcome.summary.malformed += 1;
            continue;
        };

        let (Some(a), Some(b)) = (maps.resolve(citation_a), maps.resolve(citation_b)) else {
            outcome.summary.unresolved += 1;
            continue;
        };
        outcome.links.extend(link_pair(a, b, base_type, ranks));
        outcome.summary.resolved += 1;
    }

    Ok(outcome)
}

/// Resolve a set of CSV files and insert the resulting link pairs.
///
/// Resolution is parallel by file; inserts stay serialized on the calling
/// thread, one transaction per file so both directions of every pair land
/// atomically.
pub fn resolve_links_from_csv_files(
    db: &SeforimDb,
    maps: &ResolverMaps,
    csv_paths: &[PathBuf],
    options: &BuildOptions,
) -> Result<LinkSummary, LinkError> {
    let ranks = load_book_ranks(db)?;
    let mut total = LinkSummary::default();

    thread::scope(|scope| -> Result<(), LinkError> {
        let (tx, rx) =
            mpsc::sync_channel::<Result<FileOutcome, LinkError>>(options.queue_depth.max(1));
        let maps_ref = maps;
        let ranks_ref = &ranks;
        scope.spawn(move || {
            csv_paths.par_iter().for_each_with(tx, |tx, path| {
                let outcome = resolve_csv_file(path, maps_ref, ranks_ref);
                let _ = tx.send(outcome);
            });
        });

        for outcome in rx {
            let outcome = outcome?;
            db.run_in_transaction(|db| {
                db.insert_links(&outcome.links)?;
                Ok(())
            })?;
            total.merge(&outcome.summary);
        }
        Ok(())
    })?;

    Ok(total)
}

/// Post-pass over every book: recompute the four connection flags and the
/// source/target presence from the inserted links.
pub fn refresh_connection_flags(db: &SeforimDb) -> Result<(), DbError> {
    let books = db.get_all_books()?;
    db.run_in_transaction(|db| {
        for book in &books {
            let (targum, reference, commentary, other) = db.book_connection_presence(book.id)?;
            db.update_book_connection_flags(book.id, targum, reference, commentary, other)?;
            let (as_source, as_target) = db.book_link_directions(book.id)?;
            db.set_book_has_links(book.id, as_source, as_target)?;
        }
        Ok(())
    })
}
