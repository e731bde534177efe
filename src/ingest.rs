//! Ingestion pipeline: upstream exports to relational store.
//!
//! Per-book preparation (JSON parsing, flattening, TOC drafting) runs in
//! parallel across books; prepared payloads flow through a bounded channel
//! into a single writer that owns the store. The channel bound is the
//! backpressure: producers block while the writer drains.

use crate::db::{DbError, SeforimDb};
use crate::flatten::{flatten_book, BookSchemaFile, FlattenedBook, SchemaError, SchemaNodeSpec};
use crate::hebrew::{normalize, to_gematria};
use crate::links::{ResolvedRef, ResolverMaps};
use crate::models::{AltTocEntry, Book, BuildOptions, Category, IngestSummary, Line, TocEntry};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("worker pool failure")]
    WorkerPanic,
}

/// Metadata for one book, gathered from the upstream table of contents.
#[derive(Debug, Clone, Default)]
pub struct BookMeta {
    /// Caller-supplied id, honored when > 0.
    pub id: i64,
    pub title: String,
    pub he_title: String,
    pub category_path: Vec<String>,
    pub order: f64,
    pub is_base_book: bool,
    pub authors: Vec<String>,
    pub pub_places: Vec<String>,
    pub pub_dates: Vec<String>,
    pub he_short_desc: Option<String>,
    pub source: String,
}

/// One book queued for ingestion. Files are read inside the worker so the
/// IO parallelizes with the parsing.
#[derive(Debug, Clone)]
pub struct BookInput {
    pub meta: BookMeta,
    pub schema_path: PathBuf,
    pub text_path: PathBuf,
}

/// An alternative structure in draft form, leaves still holding citation
/// strings.
#[derive(Debug, Clone)]
pub struct AltStructureDraft {
    pub key: String,
    pub entries: Vec<AltEntryDraft>,
}

#[derive(Debug, Clone)]
pub struct AltEntryDraft {
    pub text: String,
    pub level: i64,
    pub parent: Option<usize>,
    pub citation: Option<String>,
}

/// A fully prepared book, ready for the single writer.
pub struct BookPayload {
    pub meta: BookMeta,
    pub flat: FlattenedBook,
    pub alt_structures: Vec<AltStructureDraft>,
}

/// Schema file wrapper that also captures alternative structures.
#[derive(Debug, Deserialize)]
struct SchemaFileWithAlts {
    #[serde(flatten)]
    schema: BookSchemaFile,
    #[serde(default)]
    alts: HashMap<String, AltsSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AltsSpec {
    nodes: Vec<SchemaNodeSpec>,
}

/// Prepare one book from its files. Pure with respect to the store.
pub fn prepare_book(input: &BookInput) -> Result<BookPayload, IngestError> {
    let schema_raw = fs::read_to_string(&input.schema_path)?;
    let text_raw = fs::read_to_string(&input.text_path)?;
    let with_alts: SchemaFileWithAlts = serde_json::from_str(&schema_raw)?;
    let text_file: Value = serde_json::from_str(&text_raw)?;
    let text = text_file.get("text").unwrap_or(&text_file);
    prepare_book_from_values(input.meta.clone(), &with_alts.schema, text, &with_alts.alts)
}

fn prepare_book_from_values(
    meta: BookMeta,
    schema: &BookSchemaFile,
    text: &Value,
    alts: &HashMap<String, AltsSpec>,
) -> Result<BookPayload, IngestError> {
    let flat = flatten_book(schema, text)?;
    let alt_structures = alts
        .iter()
        .map(|(key, spec)| draft_alt_structure(key, spec))
        .collect();
    Ok(BookPayload {
        meta,
        flat,
        alt_structures,
    })
}

/// In-memory entry point used by tests and the Otzaria append path.
pub fn prepare_book_in_memory(
    meta: BookMeta,
    schema: &BookSchemaFile,
    text: &Value,
) -> Result<BookPayload, IngestError> {
    prepare_book_from_values(meta, schema, text, &HashMap::new())
}

fn draft_alt_structure(key: &str, spec: &AltsSpec) -> AltStructureDraft {
    let mut entries = Vec::new();
    for node in &spec.nodes {
        let parent_idx = entries.len();
        entries.push(AltEntryDraft {
            text: node.display_he_title().to_string(),
            level: 1,
            parent: None,
            citation: node.whole_ref.clone(),
        });
        for (i, citation) in node.refs.iter().enumerate() {
            entries.push(AltEntryDraft {
                text: to_gematria(i as u32 + 1),
                level: 2,
                parent: Some(parent_idx),
                citation: Some(citation.clone()),
            });
        }
    }
    AltStructureDraft {
        key: key.to_string(),
        entries,
    }
}

/// Resolve a citation against one book's own lookup maps, mirroring the
/// link resolver's rules: exact canonical first, then range start, then
/// the section base unless the book spans multiple sections.
fn resolve_in_book(flat: &FlattenedBook, citation: &str) -> Option<i64> {
    use crate::citation as cite;

    let key = cite::canonical(citation);
    if let Some(entries) = flat.refs_by_canonical.get(&key) {
        return entries.first().map(|e| e.line_index);
    }
    if let Some((start, _)) = citation.rsplit_once('-') {
        let key = cite::canonical(start);
        if let Some(entries) = flat.refs_by_canonical.get(&key) {
            return entries.first().map(|e| e.line_index);
        }
    }
    let parsed = cite::parse(citation)?;
    if parsed.refs.is_empty() || flat.multi_section {
        return None;
    }
    flat.refs_by_base
        .get(&cite::canonical_base(citation))
        .map(|e| e.line_index)
}

/// Ingest a set of books. Preparation fans out over the rayon pool; the
/// calling thread is the single writer. Returns the run summary plus the
/// resolver maps for the link pass.
pub fn ingest_books(
    db: &SeforimDb,
    inputs: Vec<BookInput>,
    options: &BuildOptions,
) -> Result<(IngestSummary, ResolverMaps), IngestError> {
    let total = inputs.len() as u64;
    let progress = if options.show_progress {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} books")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let (tx, rx) = mpsc::sync_channel::<Result<BookPayload, (String, IngestError)>>(
        options.queue_depth.max(1),
    );
    let producer = thread::spawn(move || {
        inputs.into_par_iter().for_each_with(tx, |tx, input| {
            let title = input.meta.title.clone();
            let prepared = prepare_book(&input).map_err(|e| (title, e));
            // send blocks when the queue is full; that is the backpressure.
            let _ = tx.send(prepared);
        });
    });

    let mut summary = IngestSummary::default();
    let mut maps = ResolverMaps::default();
    let mut categories = CategoryCache::default();
    let mut sources: HashMap<String, i64> = HashMap::new();

    for prepared in rx {
        match prepared {
            Ok(payload) => {
                let inserted = write_book_payload(
                    db,
                    &payload,
                    &mut maps,
                    &mut categories,
                    &mut sources,
                    options.batch_size,
                )?;
                summary.books_processed += 1;
                summary.lines_inserted += inserted;
            }
            Err((title, err)) => {
                eprintln!("warning: skipping book '{title}': {err}");
                summary.books_skipped += 1;
            }
        }
        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }
    producer.join().map_err(|_| IngestError::WorkerPanic)?;

    Ok((summary, maps))
}

#[derive(Default)]
struct CategoryCache {
    by_path: HashMap<Vec<String>, i64>,
}

fn ensure_category_path(
    db: &SeforimDb,
    cache: &mut CategoryCache,
    path: &[String],
) -> Result<i64, IngestError> {
    let mut parent: Option<i64> = None;
    let mut walked: Vec<String> = Vec::with_capacity(path.len());
    for (level, segment) in path.iter().enumerate() {
        walked.push(segment.clone());
        let id = match cache.by_path.get(&walked) {
            Some(&id) => id,
            None => {
                let id = db.insert_category(&Category {
                    id: 0,
                    parent_id: parent,
                    title: segment.clone(),
                    level: level as i64,
                    order: 0,
                })?;
                cache.by_path.insert(walked.clone(), id);
                id
            }
        };
        parent = Some(id);
    }
    parent.ok_or_else(|| {
        IngestError::Db(DbError::Integrity("book without category path".to_string()))
    })
}

fn ensure_source(
    db: &SeforimDb,
    cache: &mut HashMap<String, i64>,
    name: &str,
) -> Result<i64, IngestError> {
    if let Some(&id) = cache.get(name) {
        return Ok(id);
    }
    let id = db.insert_source(name)?;
    cache.insert(name.to_string(), id);
    Ok(id)
}

/// Write one prepared book inside a single transaction: book row, lines in
/// bounded batches, TOC, alt structures, title terms. Extends the resolver
/// maps with the book's now-persistent line ids.
fn write_book_payload(
    db: &SeforimDb,
    payload: &BookPayload,
    maps: &mut ResolverMaps,
    categories: &mut CategoryCache,
    sources: &mut HashMap<String, i64>,
    batch_size: usize,
) -> Result<u64, IngestError> {
    let meta = &payload.meta;
    let flat = &payload.flat;

    let category_id = ensure_category_path(db, categories, &meta.category_path)?;
    let source_id = ensure_source(db, sources, &meta.source)?;

    let line_ids = db.run_in_transaction(|db| {
        let book_id = db.insert_book(&Book {
            id: meta.id,
            category_id,
            source_id,
            title: meta.title.clone(),
            authors: meta.authors.clone(),
            pub_places: meta.pub_places.clone(),
            pub_dates: meta.pub_dates.clone(),
            he_short_desc: meta.he_short_desc.clone(),
            order: meta.order,
            total_lines: flat.lines.len() as i64,
            is_base_book: meta.is_base_book,
            has_alt_structures: !payload.alt_structures.is_empty(),
            ..Default::default()
        })?;

        // Lines, in strict lineIndex order, batched.
        let mut line_ids: Vec<i64> = Vec::with_capacity(flat.lines.len());
        let mut batch: Vec<Line> = Vec::with_capacity(batch_size.max(1));
        for (index, line) in flat.lines.iter().enumerate() {
            batch.push(Line {
                id: 0,
                book_id,
                line_index: index as i64,
                content: line.content.clone(),
                he_ref: line.he_ref.clone(),
                en_ref: line.en_ref.clone(),
            });
            if batch.len() >= batch_size.max(1) {
                line_ids.extend(db.insert_lines(&batch)?);
                batch.clear();
            }
        }
        if !batch.is_empty() {
            line_ids.extend(db.insert_lines(&batch)?);
        }

        // TOC entries in file order; draft parents become row ids.
        let mut toc_ids: Vec<i64> = Vec::with_capacity(flat.toc.len());
        for draft in &flat.toc {
            let id = db.insert_toc_entry(&TocEntry {
                id: 0,
                book_id,
                parent_id: draft.parent.map(|p| toc_ids[p]),
                text: draft.text.clone(),
                level: draft.level,
                line_id: draft.line_index.map(|l| line_ids[l]),
                is_last_child: draft.is_last_child,
                has_children: draft.has_children,
            })?;
            toc_ids.push(id);
        }

        let mappings: Vec<(i64, i64)> = flat
            .line_toc
            .iter()
            .map(|&(line_idx, toc_idx)| (line_ids[line_idx], toc_ids[toc_idx]))
            .collect();
        for chunk in mappings.chunks(batch_size.max(1)) {
            db.insert_line_toc_mappings(chunk)?;
        }

        // Alternative structures; unresolved citations are skipped.
        for alt in &payload.alt_structures {
            let structure_id = db.insert_alt_structure(book_id, &alt.key)?;
            let mut alt_ids: Vec<Option<i64>> = Vec::with_capacity(alt.entries.len());
            for entry in &alt.entries {
                let line_index = entry
                    .citation
                    .as_deref()
                    .and_then(|c| resolve_in_book(flat, c));
                let line_id = line_index.map(|ix| line_ids[(ix - 1) as usize]);
                // An unresolved leaf citation is skipped outright; group
                // entries survive so their siblings keep a parent.
                if entry.citation.is_some() && line_id.is_none() && entry.level > 1 {
                    alt_ids.push(None);
                    continue;
                }
                let parent_id = entry.parent.and_then(|p| alt_ids.get(p).copied().flatten());
                let id = db.insert_alt_toc_entry(&AltTocEntry {
                    id: 0,
                    structure_id,
                    book_id,
                    parent_id,
                    text: entry.text.clone(),
                    level: entry.level,
                    line_id,
                })?;
                if let Some(line_id) = line_id {
                    db.insert_line_alt_toc_mapping(line_id, id)?;
                }
                alt_ids.push(Some(id));
            }
        }

        // Title terms for prefix suggestions, normalized both ways.
        db.insert_book_title_term(book_id, &normalize(&meta.title), &meta.title, category_id)?;
        if !meta.he_title.is_empty() && meta.he_title != meta.title {
            db.insert_book_title_term(
                book_id,
                &normalize(&meta.he_title),
                &meta.title,
                category_id,
            )?;
        }

        maps.extend_from_book(book_id, flat, &line_ids);
        Ok(line_ids)
    })?;

    Ok(line_ids.len() as u64)
}

// ----------------------------------------------------------------------
// Upstream export scanners
// ----------------------------------------------------------------------

/// One node of the upstream table of contents, either a category (with
/// `contents`) or a book entry.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TocNodeFile {
    category: Option<String>,
    he_category: Option<String>,
    title: Option<String>,
    he_title: Option<String>,
    order: Option<f64>,
    base: Option<bool>,
    authors: Vec<String>,
    pub_places: Vec<String>,
    pub_dates: Vec<String>,
    he_short_desc: Option<String>,
    contents: Vec<TocNodeFile>,
}

/// Top-level categories whose books attach commentaries rather than being
/// commentaries themselves.
const BASE_CATEGORIES: [&str; 4] = ["Tanakh", "Mishnah", "Talmud", "Torah"];

/// Scan a Sefaria-style export: `table_of_contents.json`, per-book
/// `schemas/*.json`, and `json/<categories...>/<title>/Hebrew/merged.json`.
pub fn scan_sefaria_export(root: &Path) -> Result<Vec<BookInput>, IngestError> {
    let toc_raw = fs::read_to_string(root.join("table_of_contents.json"))?;
    let toc: Vec<TocNodeFile> = serde_json::from_str(&toc_raw)?;

    let mut inputs = Vec::new();
    let mut path = Vec::new();
    for node in &toc {
        collect_toc_books(root, node, &mut path, &mut inputs);
    }
    Ok(inputs)
}

fn collect_toc_books(
    root: &Path,
    node: &TocNodeFile,
    path: &mut Vec<String>,
    out: &mut Vec<BookInput>,
) {
    if let Some(category) = &node.category {
        path.push(category.clone());
        for child in &node.contents {
            collect_toc_books(root, child, path, out);
        }
        path.pop();
        return;
    }
    let Some(title) = &node.title else { return };
    if path.is_empty() {
        return;
    }

    let schema_path = root
        .join("schemas")
        .join(format!("{}.json", title.replace(' ', "_")));
    let mut text_path = root.join("json");
    for segment in path.iter() {
        text_path.push(segment);
    }
    text_path.push(title);
    text_path.push("Hebrew");
    text_path.push("merged.json");

    let is_base = node
        .base
        .unwrap_or_else(|| BASE_CATEGORIES.contains(&path[0].as_str()));

    out.push(BookInput {
        meta: BookMeta {
            id: 0,
            title: title.clone(),
            he_title: node.he_title.clone().unwrap_or_default(),
            category_path: path.clone(),
            order: node.order.unwrap_or((out.len() + 1) as f64),
            is_base_book: is_base,
            authors: node.authors.clone(),
            pub_places: node.pub_places.clone(),
            pub_dates: node.pub_dates.clone(),
            he_short_desc: node.he_short_desc.clone(),
            source: "Sefaria".to_string(),
        },
        schema_path,
        text_path,
    });
}

/// Scan an Otzaria-style export: a directory tree whose folders are
/// categories and whose `.json` files each hold a self-describing book
/// (schema fields plus a `text` value).
pub fn scan_otzaria_export(root: &Path) -> Result<Vec<BookInput>, IngestError> {
    let mut inputs = Vec::new();
    let mut path = Vec::new();
    scan_otzaria_dir(root, &mut path, &mut inputs)?;
    Ok(inputs)
}

fn scan_otzaria_dir(
    dir: &Path,
    path: &mut Vec<String>,
    out: &mut Vec<BookInput>,
) -> Result<(), IngestError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let entry_path = entry.path();
        if entry_path.is_dir() {
            path.push(entry.file_name().to_string_lossy().into_owned());
            scan_otzaria_dir(&entry_path, path, out)?;
            path.pop();
        } else if entry_path.extension().is_some_and(|e| e == "json") && !path.is_empty() {
            let title = entry_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            out.push(BookInput {
                meta: BookMeta {
                    id: 0,
                    title: title.clone(),
                    he_title: title,
                    category_path: path.clone(),
                    order: (out.len() + 1) as f64,
                    is_base_book: false,
                    source: "Otzaria".to_string(),
                    ..Default::default()
                },
                // Self-describing file: schema and text share the path.
                schema_path: entry_path.clone(),
                text_path: entry_path,
            });
        }
    }
    Ok(())
}

/// Write `release_info.txt` (a single `yyyyMMddHHmmss` UTC line) beside
/// the database.
pub fn write_release_info(dir: &Path) -> Result<(), IngestError> {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
    fs::write(dir.join("release_info.txt"), stamp)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verse_schema(title: &str, he_title: &str) -> BookSchemaFile {
        BookSchemaFile {
            title: title.to_string(),
            he_title: he_title.to_string(),
            categories: vec![],
            he_categories: vec![],
            schema: SchemaNodeSpec {
                node_type: Some("JaggedArrayNode".to_string()),
                depth: 2,
                section_names: vec!["Chapter".to_string(), "Verse".to_string()],
                he_section_names: vec!["פרק".to_string(), "פסוק".to_string()],
                ..Default::default()
            },
        }
    }

    fn meta(title: &str, he_title: &str) -> BookMeta {
        BookMeta {
            title: title.to_string(),
            he_title: he_title.to_string(),
            category_path: vec!["Tanakh".to_string(), "Torah".to_string()],
            is_base_book: true,
            source: "Sefaria".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_write_payload_line_identity() {
        let db = SeforimDb::open_in_memory().unwrap();
        let schema = verse_schema("Genesis", "בראשית");
        let text = json!([["בראשית ברא אלהים", "והארץ היתה תהו"], ["ויכלו השמים"]]);
        let payload =
            prepare_book_in_memory(meta("Genesis", "בראשית"), &schema, &text).unwrap();

        let mut maps = ResolverMaps::default();
        let mut cats = CategoryCache::default();
        let mut sources = HashMap::new();
        let inserted =
            write_book_payload(&db, &payload, &mut maps, &mut cats, &mut sources, 2).unwrap();
        assert_eq!(inserted, 5);

        let book = db.get_book_by_title("Genesis").unwrap().unwrap();
        assert_eq!(book.total_lines, 5);
        let lines = db.get_book_lines(book.id).unwrap();
        let indices: Vec<i64> = lines.iter().map(|l| l.line_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_write_payload_builds_toc() {
        let db = SeforimDb::open_in_memory().unwrap();
        let schema = verse_schema("Genesis", "בראשית");
        let text = json!([["א"], ["ב"]]);
        let payload =
            prepare_book_in_memory(meta("Genesis", "בראשית"), &schema, &text).unwrap();

        let mut maps = ResolverMaps::default();
        let mut cats = CategoryCache::default();
        let mut sources = HashMap::new();
        write_book_payload(&db, &payload, &mut maps, &mut cats, &mut sources, 100).unwrap();

        let book = db.get_book_by_title("Genesis").unwrap().unwrap();
        let toc = db.get_toc_entries(book.id).unwrap();
        assert_eq!(toc.len(), 2);
        assert!(toc.iter().all(|t| t.parent_id.is_none()));
        assert!(toc.iter().all(|t| t.line_id.is_some()));

        // Each content line maps to its chapter entry.
        let lines = db.get_book_lines(book.id).unwrap();
        let verse = lines.iter().find(|l| l.en_ref.is_some()).unwrap();
        assert!(db.get_line_toc_entry(verse.id).unwrap().is_some());
    }

    #[test]
    fn test_resolver_maps_extended() {
        let db = SeforimDb::open_in_memory().unwrap();
        let schema = verse_schema("Psalms", "תהלים");
        let text = json!([["אשרי האיש"]]);
        let payload = prepare_book_in_memory(meta("Psalms", "תהלים"), &schema, &text).unwrap();

        let mut maps = ResolverMaps::default();
        let mut cats = CategoryCache::default();
        let mut sources = HashMap::new();
        write_book_payload(&db, &payload, &mut maps, &mut cats, &mut sources, 100).unwrap();

        let hit = maps.by_canonical.get("psalms 1:1").unwrap();
        assert_eq!(hit.len(), 1);
        let line = db.get_line(hit[0].line_id).unwrap().unwrap();
        assert_eq!(line.en_ref.as_deref(), Some("Psalms 1:1"));
    }

    #[test]
    fn test_categories_shared_between_books() {
        let db = SeforimDb::open_in_memory().unwrap();
        let mut cats = CategoryCache::default();
        let mut sources = HashMap::new();
        let mut maps = ResolverMaps::default();

        for title in ["Genesis", "Exodus"] {
            let schema = verse_schema(title, title);
            let text = json!([["טקסט"]]);
            let payload = prepare_book_in_memory(meta(title, title), &schema, &text).unwrap();
            write_book_payload(&db, &payload, &mut maps, &mut cats, &mut sources, 100).unwrap();
        }

        let roots = db.get_root_categories().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].title, "Tanakh");
        let children = db.get_child_categories(roots[0].id).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(db.get_books_in_category(children[0].id).unwrap().len(), 2);
    }
}
