//! End-to-end tests over a synthetic corpus.
//!
//! Builds a small Sefaria-style export on disk, runs the full pipeline
//! (ingestion, link resolution, closure, catalog, text index), and checks
//! the structural invariants and search behavior of the result.

use seforim_core::catalog::{build_catalog, load_catalog, save_catalog};
use seforim_core::db::SeforimDb;
use seforim_core::hebrew::normalize;
use seforim_core::index::build_text_index;
use seforim_core::ingest::{ingest_books, scan_sefaria_export, write_release_info};
use seforim_core::links::{refresh_connection_flags, resolve_links_from_csv_files};
use seforim_core::models::{Book, BuildOptions, ConnectionType, SearchOptions};
use seforim_core::search::{SearchEngine, StoreSnippetProvider};
use seforim_core::snippet::strip_html;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Corpus {
    _dir: TempDir,
    db_path: PathBuf,
    index_path: PathBuf,
    out_dir: PathBuf,
    resolved: u64,
    unresolved: u64,
    books_processed: u64,
    lines_inserted: u64,
}

fn write_json(path: &Path, value: &Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn depth2_schema(title: &str, he_title: &str) -> Value {
    json!({
        "title": title,
        "heTitle": he_title,
        "schema": {
            "nodeType": "JaggedArrayNode",
            "depth": 2,
            "sectionNames": ["Chapter", "Verse"],
            "heSectionNames": ["פרק", "פסוק"],
            "addressTypes": ["Perek", "Pasuk"]
        }
    })
}

fn write_book(root: &Path, path: &[&str], title: &str, schema: &Value, text: &Value) {
    write_json(
        &root
            .join("schemas")
            .join(format!("{}.json", title.replace(' ', "_"))),
        schema,
    );
    let mut text_path = root.join("json");
    for segment in path {
        text_path.push(segment);
    }
    text_path.push(title);
    text_path.push("Hebrew");
    text_path.push("merged.json");
    write_json(&text_path, &json!({ "title": title, "text": text }));
}

fn build_corpus() -> Corpus {
    let dir = TempDir::new().unwrap();
    let export = dir.path().join("export");
    let out_dir = dir.path().join("out");
    fs::create_dir_all(&out_dir).unwrap();
    let db_path = out_dir.join("seforim.db");
    let index_path = out_dir.join("index");

    write_json(
        &export.join("table_of_contents.json"),
        &json!([
            {"category": "Tanakh", "contents": [
                {"category": "Writings", "contents": [
                    {"title": "Psalms", "heTitle": "תהלים", "order": 1}
                ]},
                {"category": "Torah", "contents": [
                    {"title": "Genesis", "heTitle": "בראשית", "order": 1}
                ]}
            ]},
            {"category": "Halakhah", "contents": [
                {"title": "Tur", "heTitle": "טור", "order": 1},
                {"title": "Alpha", "heTitle": "אלפא", "order": 2, "base": true},
                {"title": "Beta", "heTitle": "ביתא", "order": 3, "base": true}
            ]},
            {"category": "Midrash", "contents": [
                {"title": "בראשית רבה", "heTitle": "בראשית רבה", "order": 1},
                {"title": "שמות רבה", "heTitle": "שמות רבה", "order": 2},
                {"title": "ויקרא רבה", "heTitle": "ויקרא רבה", "order": 3}
            ]},
            {"category": "Misc", "contents": [
                {"title": "Words", "heTitle": "מילים", "order": 1}
            ]}
        ]),
    );

    write_book(
        &export,
        &["Tanakh", "Writings"],
        "Psalms",
        &depth2_schema("Psalms", "תהלים"),
        &json!([
            ["אשרי האיש אשר לא הלך", "כי אם בתורת יהוה חפצו"],
            ["למה רגשו גוים"]
        ]),
    );

    write_book(
        &export,
        &["Tanakh", "Torah"],
        "Genesis",
        &depth2_schema("Genesis", "בראשית"),
        &json!([["בראשית ברא אלהים את השמים ואת הארץ"]]),
    );

    // Multi-section book: two sections, each with an Introduction node of
    // depth 1 followed by a default node of depth 2.
    let section = |key: &str, he: &str| {
        json!({
            "nodeType": "SchemaNode",
            "key": key,
            "title": key,
            "heTitle": he,
            "nodes": [
                {
                    "nodeType": "JaggedArrayNode",
                    "key": "Introduction",
                    "title": "Introduction",
                    "heTitle": "הקדמה",
                    "depth": 1,
                    "sectionNames": ["Paragraph"],
                    "heSectionNames": ["פסקה"]
                },
                {
                    "nodeType": "JaggedArrayNode",
                    "default": true,
                    "depth": 2,
                    "sectionNames": ["Siman", "Seif"],
                    "heSectionNames": ["סימן", "סעיף"]
                }
            ]
        })
    };
    let tur_schema = json!({
        "title": "Tur",
        "heTitle": "טור",
        "schema": {
            "nodeType": "SchemaNode",
            "nodes": [section("Orach Chayim", "אורח חיים"), section("Yoreh Deah", "יורה דעה")]
        },
        "alts": {
            "Sections": {
                "nodes": [
                    {"title": "Orach Chayim", "heTitle": "אורח חיים",
                     "wholeRef": "Tur, Orach Chayim, Introduction", "refs": []},
                    {"title": "Yoreh Deah", "heTitle": "יורה דעה",
                     "wholeRef": "Tur, Yoreh Deah, Introduction", "refs": []}
                ]
            }
        }
    });
    let intro: Vec<String> = (1..=8).map(|i| format!("פסקת הקדמה מספר {i}")).collect();
    write_book(
        &export,
        &["Halakhah"],
        "Tur",
        &tur_schema,
        &json!({
            "Orach Chayim": {
                "Introduction": intro,
                "default": [["סעיף ראשון בסימן הראשון"], ["סעיף ראשון בסימן השני"]]
            },
            "Yoreh Deah": {
                "Introduction": ["פתיחה ליורה דעה"],
                "default": [["דין ראשון"]]
            }
        }),
    );

    for (title, he) in [("Alpha", "אלפא"), ("Beta", "ביתא")] {
        let verses: Vec<String> = (1..=10).map(|i| format!("פסוק מספר {i} בספר {he}")).collect();
        write_book(
            &export,
            &["Halakhah"],
            title,
            &depth2_schema(title, he),
            &json!([verses]),
        );
    }

    for (title, line) in [
        ("בראשית רבה", "דרש ראשון"),
        ("שמות רבה", "דרש שני"),
        ("ויקרא רבה", "דרש שלישי"),
    ] {
        write_book(
            &export,
            &["Midrash"],
            title,
            &depth2_schema(title, title),
            &json!([[line]]),
        );
    }

    let words: Vec<String> = (1..=25).map(|i| format!("טקסט פסקה {i}")).collect();
    write_book(
        &export,
        &["Misc"],
        "Words",
        &json!({
            "title": "Words",
            "heTitle": "מילים",
            "schema": {
                "nodeType": "JaggedArrayNode",
                "depth": 1,
                "sectionNames": ["Paragraph"],
                "heSectionNames": ["פסקה"]
            }
        }),
        &json!(words),
    );

    let links_dir = export.join("links");
    fs::create_dir_all(&links_dir).unwrap();
    fs::write(
        links_dir.join("links_a.csv"),
        concat!(
            "Citation 1,Citation 2,Connection Type\n",
            "\"Tur, Orach Chayim, Introduction\",Psalms 1:1,commentary\n",
            "\"Tur, Orach Chayim 1:1\",Psalms 1:2,reference\n",
            "Nowhere Book 3:4,Psalms 1:1,commentary\n",
        ),
    )
    .unwrap();
    let mut commentary_rows = String::from("Citation 1,Citation 2,Connection Type\n");
    for i in 1..=10 {
        commentary_rows.push_str(&format!("Alpha 1:{i},Beta 1:{i},commentary\n"));
    }
    fs::write(links_dir.join("links_b.csv"), commentary_rows).unwrap();

    // Full pipeline.
    let options = BuildOptions::default();
    let db = SeforimDb::open(&db_path).unwrap();
    let inputs = scan_sefaria_export(&export).unwrap();
    let (summary, maps) = ingest_books(&db, inputs, &options).unwrap();
    assert_eq!(summary.books_skipped, 0);

    let csvs = vec![
        links_dir.join("links_a.csv"),
        links_dir.join("links_b.csv"),
    ];
    let links = resolve_links_from_csv_files(&db, &maps, &csvs, &options).unwrap();
    refresh_connection_flags(&db).unwrap();
    db.rebuild_category_closure().unwrap();

    let catalog = build_catalog(&db).unwrap();
    save_catalog(&catalog, &out_dir).unwrap();
    build_text_index(&db, &index_path).unwrap();
    write_release_info(&out_dir).unwrap();

    Corpus {
        _dir: dir,
        db_path,
        index_path,
        out_dir,
        resolved: links.resolved,
        unresolved: links.unresolved + links.malformed,
        books_processed: summary.books_processed,
        lines_inserted: summary.lines_inserted,
    }
}

fn open_db(corpus: &Corpus) -> SeforimDb {
    SeforimDb::open_read_only(&corpus.db_path).unwrap()
}

fn open_engine(corpus: &Corpus) -> SearchEngine {
    let db = open_db(corpus);
    let ancestors = SearchEngine::load_category_ancestors(&db).unwrap();
    SearchEngine::open(&corpus.index_path)
        .unwrap()
        .with_snippet_provider(Box::new(StoreSnippetProvider::new(db)))
        .with_category_ancestors(ancestors)
}

fn book_by_title(db: &SeforimDb, title: &str) -> Book {
    db.get_book_by_title(title).unwrap().unwrap()
}

#[test]
fn test_build_summary() {
    let corpus = build_corpus();
    assert_eq!(corpus.books_processed, 9);
    assert_eq!(corpus.lines_inserted, 75);
    // Two rows in links_a resolve, ten in links_b; one row names an
    // unknown book.
    assert_eq!(corpus.resolved, 12);
    assert_eq!(corpus.unresolved, 1);
}

#[test]
fn test_line_identity_per_book() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    for book in db.get_all_books().unwrap() {
        let lines = db.get_book_lines(book.id).unwrap();
        assert_eq!(lines.len() as i64, book.total_lines, "{}", book.title);
        let indices: Vec<i64> = lines.iter().map(|l| l.line_index).collect();
        let expected: Vec<i64> = (0..book.total_lines).collect();
        assert_eq!(indices, expected, "{}", book.title);
    }
}

#[test]
fn test_toc_parent_invariant() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    for book in db.get_all_books().unwrap() {
        let entries = db.get_toc_entries(book.id).unwrap();
        for entry in &entries {
            if let Some(parent_id) = entry.parent_id {
                let parent = entries.iter().find(|e| e.id == parent_id).unwrap();
                assert_eq!(parent.book_id, entry.book_id);
                assert!(parent.level < entry.level);
            }
        }
    }
}

#[test]
fn test_introduction_resolution() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let tur = book_by_title(&db, "Tur");
    let psalms = book_by_title(&db, "Psalms");

    // The first introduction paragraph is line index 0 of the book.
    let lines = db.get_book_lines(tur.id).unwrap();
    let intro_first = lines
        .iter()
        .find(|l| l.en_ref.as_deref() == Some("Tur, Orach Chayim, Introduction 1"))
        .unwrap();
    assert_eq!(intro_first.line_index, 0);

    // The section-only citation resolved onto that line, bidirectionally.
    let from_line = db.get_links_for_line(intro_first.id).unwrap();
    let forward = from_line
        .iter()
        .find(|l| {
            l.target_book_id == psalms.id && l.connection_type == ConnectionType::Commentary
        })
        .unwrap();
    let links = db.get_all_links().unwrap();
    let reverse = links
        .iter()
        .find(|l| {
            l.source_line_id == forward.target_line_id
                && l.target_line_id == intro_first.id
                && l.connection_type == ConnectionType::Source
        })
        .unwrap();
    assert_ne!(forward.id, reverse.id);
}

#[test]
fn test_first_siman_does_not_collapse_onto_intro() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let tur = book_by_title(&db, "Tur");

    let links = db.get_all_links().unwrap();
    let tur_reference_lines: Vec<i64> = links
        .iter()
        .filter(|l| l.connection_type == ConnectionType::Reference)
        .flat_map(|l| {
            [
                (l.source_book_id, l.source_line_id),
                (l.target_book_id, l.target_line_id),
            ]
        })
        .filter(|&(book_id, _)| book_id == tur.id)
        .map(|(_, line_id)| line_id)
        .collect();
    assert!(!tur_reference_lines.is_empty());
    for line_id in tur_reference_lines {
        let line = db.get_line(line_id).unwrap().unwrap();
        // Strictly past the eight introduction lines.
        assert!(line.line_index > 8, "resolved to {}", line.line_index);
    }
}

#[test]
fn test_bidirectional_link_counts() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let alpha = book_by_title(&db, "Alpha");
    let beta = book_by_title(&db, "Beta");

    let links = db.get_all_links().unwrap();
    let between = |ct: ConnectionType| {
        links
            .iter()
            .filter(|l| {
                l.connection_type == ct
                    && [alpha.id, beta.id].contains(&l.source_book_id)
                    && [alpha.id, beta.id].contains(&l.target_book_id)
            })
            .count()
    };
    assert_eq!(between(ConnectionType::Commentary), 10);
    assert_eq!(between(ConnectionType::Source), 10);

    // Corpus-wide totals include the one introduction commentary pair.
    assert_eq!(db.count_links_of_type(ConnectionType::Commentary).unwrap(), 11);
    assert_eq!(db.count_links_of_type(ConnectionType::Source).unwrap(), 11);
}

#[test]
fn test_every_link_has_exactly_one_reverse() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let links = db.get_all_links().unwrap();
    assert!(!links.is_empty());

    for link in &links {
        let reverses: Vec<_> = links
            .iter()
            .filter(|r| {
                r.source_line_id == link.target_line_id
                    && r.target_line_id == link.source_line_id
                    && r.connection_type == link.connection_type.complementary()
            })
            .collect();
        assert_eq!(reverses.len(), 1, "link {} lacks a unique reverse", link.id);
        assert_ne!(reverses[0].id, link.id);
    }
}

#[test]
fn test_category_closure_complete() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    for category in db.get_all_categories().unwrap() {
        assert_eq!(db.closure_contains(category.id, category.id).unwrap(), Some(0));
        let mut distance = 1;
        let mut parent = category.parent_id;
        while let Some(ancestor) = parent {
            assert_eq!(
                db.closure_contains(ancestor, category.id).unwrap(),
                Some(distance)
            );
            parent = db.get_category(ancestor).unwrap().unwrap().parent_id;
            distance += 1;
        }
    }
}

#[test]
fn test_connection_flags_refreshed() {
    let corpus = build_corpus();
    let db = open_db(&corpus);

    let psalms = book_by_title(&db, "Psalms");
    assert!(psalms.has_commentary_connection);
    assert!(psalms.has_reference_connection);
    assert!(!psalms.has_targum_connection);

    let alpha = book_by_title(&db, "Alpha");
    assert!(alpha.has_commentary_connection);

    let words = book_by_title(&db, "Words");
    assert!(!words.has_commentary_connection);
    assert!(!words.has_reference_connection);
    assert!(!words.has_other_connection);
    assert_eq!(db.book_link_directions(words.id).unwrap(), (false, false));
}

#[test]
fn test_query_normalization_equivalence() {
    let corpus = build_corpus();
    let engine = open_engine(&corpus);
    let options = SearchOptions::with_near(5);

    let collect = |query: &str| -> Vec<i64> {
        let mut session = engine.open_session(query, &options).unwrap().unwrap();
        let page = session.next_page(100).unwrap().unwrap();
        page.hits.iter().map(|h| h.line_id).collect()
    };

    let plain = collect("בראשית");
    let vocalized = collect("בְּרֵאשִׁית");
    assert!(!plain.is_empty());
    assert_eq!(plain, vocalized);
}

#[test]
fn test_prefix_suggestion() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let engine = open_engine(&corpus);

    let bereshit_rabbah = book_by_title(&db, "בראשית רבה");
    let hits = engine.search_books_by_title_prefix("בראש", 10).unwrap();
    assert_eq!(hits, vec![bereshit_rabbah.id]);

    // A shared word prefix-matches all three midrash titles.
    let hits = engine.search_books_by_title_prefix("רב", 10).unwrap();
    assert_eq!(hits.len(), 3);
}

#[test]
fn test_pagination() {
    let corpus = build_corpus();
    let engine = open_engine(&corpus);
    let options = SearchOptions::with_near(5);

    let mut session = engine.open_session("טקסט", &options).unwrap().unwrap();
    assert_eq!(session.total_hits(), 25);

    let first = session.next_page(10).unwrap().unwrap();
    assert_eq!(first.hits.len(), 10);
    assert!(!first.is_last_page);
    let second = session.next_page(10).unwrap().unwrap();
    assert_eq!(second.hits.len(), 10);
    assert!(!second.is_last_page);
    let third = session.next_page(10).unwrap().unwrap();
    assert_eq!(third.hits.len(), 5);
    assert!(third.is_last_page);
    assert!(session.next_page(10).unwrap().is_none());

    // Concatenated pages equal one big page, in order.
    let paged: Vec<i64> = [first, second, third]
        .iter()
        .flat_map(|p| p.hits.iter().map(|h| h.line_id))
        .collect();
    let mut single = engine.open_session("טקסט", &options).unwrap().unwrap();
    let all = single.next_page(100).unwrap().unwrap();
    let whole: Vec<i64> = all.hits.iter().map(|h| h.line_id).collect();
    assert_eq!(paged, whole);
}

#[test]
fn test_hits_contain_required_tokens() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let engine = open_engine(&corpus);
    let options = SearchOptions::with_near(5);

    let mut session = engine.open_session("טקסט", &options).unwrap().unwrap();
    let page = session.next_page(100).unwrap().unwrap();
    assert!(!page.hits.is_empty());
    for hit in &page.hits {
        let line = db.get_line(hit.line_id).unwrap().unwrap();
        let plain = normalize(&strip_html(&line.content));
        assert!(plain.contains("טקסט"), "hit without token: {plain}");
    }
}

#[test]
fn test_snippets_highlight_whole_words() {
    let corpus = build_corpus();
    let engine = open_engine(&corpus);
    let options = SearchOptions::with_near(5);

    let mut session = engine.open_session("טקסט", &options).unwrap().unwrap();
    let page = session.next_page(5).unwrap().unwrap();
    for hit in &page.hits {
        let snippet = hit.snippet.as_ref().unwrap();
        assert!(snippet.html.contains("<b>טקסט</b>"));
        for (i, _) in snippet.html.match_indices("<b>") {
            if i > 0 {
                let prev = snippet.html[..i].chars().next_back().unwrap();
                assert!(!prev.is_alphanumeric(), "tag opened mid-word: {}", snippet.html);
            }
        }
    }
}

#[test]
fn test_base_book_filter() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let engine = open_engine(&corpus);

    let options = SearchOptions {
        near: 5,
        base_book_only: true,
        ..Default::default()
    };
    // Words is not a base book, so the filter leaves nothing.
    let session = engine.open_session("טקסט", &options).unwrap().unwrap();
    assert_eq!(session.total_hits(), 0);

    // Alpha is a base book and keeps its hits under the filter.
    let mut session = engine.open_session("פסוק", &options).unwrap().unwrap();
    let page = session.next_page(100).unwrap().unwrap();
    let alpha = book_by_title(&db, "Alpha");
    let beta = book_by_title(&db, "Beta");
    for hit in &page.hits {
        assert!([alpha.id, beta.id].contains(&hit.book_id));
    }
}

#[test]
fn test_facets() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let engine = open_engine(&corpus);
    let options = SearchOptions::with_near(5);

    let words = book_by_title(&db, "Words");
    let session = engine.open_session("טקסט", &options).unwrap().unwrap();
    let facets = session.compute_facets().unwrap();
    assert_eq!(facets.books.get(&words.id), Some(&25));
    assert_eq!(facets.categories.get(&words.category_id), Some(&25));
}

#[test]
fn test_session_cancellation() {
    let corpus = build_corpus();
    let engine = open_engine(&corpus);
    let options = SearchOptions::with_near(5);

    let mut session = engine.open_session("טקסט", &options).unwrap().unwrap();
    let handle = session.handle();
    handle.close();
    assert!(session.next_page(10).unwrap().is_none());
    // Closing again is a no-op.
    session.close();
    assert!(session.is_closed());
}

#[test]
fn test_empty_query_yields_no_session() {
    let corpus = build_corpus();
    let engine = open_engine(&corpus);
    let options = SearchOptions::with_near(5);
    assert!(engine.open_session("", &options).unwrap().is_none());
    assert!(engine.open_session("   ", &options).unwrap().is_none());
    // Nothing but diacritics normalizes to nothing.
    assert!(engine.open_session("ְֳִ", &options).unwrap().is_none());
}

#[test]
fn test_catalog_roundtrip_against_store() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let catalog = load_catalog(&corpus.out_dir).unwrap();

    assert_eq!(catalog.total_books, 9);
    let all = catalog.extract_all_books();
    assert_eq!(all.len(), 9);

    let psalms = book_by_title(&db, "Psalms");
    let from_catalog = catalog.find_book_by_id(psalms.id).unwrap();
    assert_eq!(from_catalog.title, "Psalms");
    assert!(from_catalog.is_base_book);
    assert_eq!(from_catalog.total_lines, psalms.total_lines);
    assert!(from_catalog.has_commentary_connection);

    let path = catalog.get_category_path(psalms.category_id);
    let titles: Vec<&str> = path.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Tanakh", "Writings"]);
}

#[test]
fn test_alt_toc_sections_anchor_distinct_lines() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let tur = book_by_title(&db, "Tur");
    assert!(tur.has_alt_structures);

    let structures = db.get_alt_structures(tur.id).unwrap();
    assert_eq!(structures.len(), 1);
    let entries = db.get_alt_toc_entries(structures[0].id).unwrap();
    let line_ids: Vec<i64> = entries.iter().filter_map(|e| e.line_id).collect();
    assert_eq!(line_ids.len(), 2);
    assert_ne!(line_ids[0], line_ids[1]);
}

#[test]
fn test_title_prefix_search_in_store() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let bereshit_rabbah = book_by_title(&db, "בראשית רבה");
    let hits = db.search_books_by_title_prefix("בראשית רבה", 10).unwrap();
    assert!(hits.contains(&bereshit_rabbah.id));
}

#[test]
fn test_release_info_written() {
    let corpus = build_corpus();
    let stamp = fs::read_to_string(corpus.out_dir.join("release_info.txt")).unwrap();
    let stamp = stamp.trim();
    assert_eq!(stamp.len(), 14);
    assert!(stamp.chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn test_books_under_category_tree() {
    let corpus = build_corpus();
    let db = open_db(&corpus);
    let tanakh = db
        .get_root_categories()
        .unwrap()
        .into_iter()
        .find(|c| c.title == "Tanakh")
        .unwrap();
    let books = db.get_books_under_category_tree(tanakh.id).unwrap();
    let titles: Vec<String> = books.into_iter().map(|b| b.title).collect();
    assert!(titles.contains(&"Psalms".to_string()));
    assert!(titles.contains(&"Genesis".to_string()));
    assert!(!titles.contains(&"Tur".to_string()));
}
