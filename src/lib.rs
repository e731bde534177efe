//! Seforim Core
//!
//! Builds and queries a corpus of Hebrew religious texts: ingestion of
//! upstream JSON exports into a relational SQLite store, citation link
//! resolution, a precomputed navigation catalog, and a Hebrew-tuned
//! full-text index with dictionary-expanded queries.
//!
//! # Build example
//!
//! ```no_run
//! use seforim_core::prelude::*;
//! use std::path::Path;
//!
//! let db = SeforimDb::open(Path::new("seforim.db")).unwrap();
//! let inputs = scan_sefaria_export(Path::new("export/")).unwrap();
//! let options = BuildOptions::default();
//!
//! let (summary, maps) = ingest_books(&db, inputs, &options).unwrap();
//! println!("{} books ingested", summary.books_processed);
//!
//! let links = resolve_links_from_csv_files(&db, &maps, &[], &options).unwrap();
//! refresh_connection_flags(&db).unwrap();
//! db.rebuild_category_closure().unwrap();
//! println!("{} links resolved", links.resolved);
//! ```
//!
//! # Query example
//!
//! ```no_run
//! use seforim_core::prelude::*;
//! use std::path::Path;
//!
//! let engine = SearchEngine::open(Path::new("index/")).unwrap();
//! let options = SearchOptions::with_near(5);
//!
//! if let Some(mut session) = engine.open_session("בראשית ברא", &options).unwrap() {
//!     while let Some(page) = session.next_page(10).unwrap() {
//!         for hit in &page.hits {
//!             println!("{}: {:?}", hit.book_title, hit.snippet);
//!         }
//!         if page.is_last_page {
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod catalog;
pub mod citation;
pub mod db;
pub mod dictionary;
pub mod flatten;
pub mod hebrew;
pub mod index;
pub mod ingest;
pub mod links;
pub mod models;
pub mod search;
pub mod snippet;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::catalog::{
        build_catalog, load_catalog, save_catalog, CatalogBook, CatalogCategory, CatalogError,
        PrecomputedCatalog,
    };
    pub use crate::citation::{canonical, canonical_base, parse, Citation};
    pub use crate::db::{DbError, SeforimDb};
    pub use crate::dictionary::{
        write_dictionary, DictError, DictionaryEntry, DictionaryIndex, Expansion,
        StoredDictionary,
    };
    pub use crate::flatten::{flatten_book, BookSchemaFile, FlatLine, FlattenedBook, SchemaError};
    pub use crate::hebrew::{
        is_diacritic, normalize, replace_finals_with_base, strip_diacritics_with_map, to_gematria,
    };
    pub use crate::index::{build_text_index, IndexError, LineDocument, TextIndex};
    pub use crate::ingest::{
        ingest_books, prepare_book_in_memory, scan_otzaria_export, scan_sefaria_export,
        write_release_info, BookInput, BookMeta, IngestError,
    };
    pub use crate::links::{
        link_pair, load_book_ranks, refresh_connection_flags, resolve_links_from_csv_files,
        LinkError, LinkSummary, ResolvedRef, ResolverMaps,
    };
    pub use crate::models::{
        Book, BuildOptions, Category, ConnectionType, CorpusStats, IngestSummary, Line, Link,
        RefEntry, SearchOptions, TocEntry,
    };
    pub use crate::search::{
        FacetCounts, LineHit, Page, SearchEngine, SearchError, SearchSession, SnippetProvider,
        StoreSnippetProvider,
    };
    pub use crate::snippet::{build_snippet, strip_html, Snippet};
}

// Re-export commonly used types at the crate root
pub use db::SeforimDb;
pub use models::{BuildOptions, ConnectionType, IngestSummary, SearchOptions};
pub use search::SearchEngine;
