//! Seforim corpus build and search pipeline.
//!
//! Ingests upstream Sefaria/Otzaria exports into a SQLite store, resolves
//! citation links, builds the precomputed catalog and the Hebrew full-text
//! index, and serves queries against the result.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use seforim_core::catalog::{build_catalog, load_catalog, save_catalog};
use seforim_core::db::SeforimDb;
use seforim_core::dictionary::StoredDictionary;
use seforim_core::index::build_text_index;
use seforim_core::ingest::{
    ingest_books, scan_otzaria_export, scan_sefaria_export, write_release_info,
};
use seforim_core::links::{refresh_connection_flags, resolve_links_from_csv_files};
use seforim_core::models::{BuildOptions, SearchOptions};
use seforim_core::search::{SearchEngine, StoreSnippetProvider};

#[derive(Parser)]
#[command(name = "seforim")]
#[command(about = "Hebrew library corpus builder and search engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest upstream exports and build all artifacts
    Build {
        /// Path to a Sefaria-style export directory
        #[arg(long)]
        sefaria: Option<PathBuf>,

        /// Path to an Otzaria-style export directory
        #[arg(long)]
        otzaria: Option<PathBuf>,

        /// Output database file
        #[arg(long, default_value = "seforim.db")]
        database: PathBuf,

        /// Output text index directory
        #[arg(long, default_value = "index")]
        index: PathBuf,

        /// Rows per write batch
        #[arg(long, default_value = "2000")]
        batch_size: usize,

        /// Show progress bars
        #[arg(long)]
        progress: bool,
    },

    /// Run a full-text query against a built corpus
    Search {
        /// Database file
        #[arg(long, default_value = "seforim.db")]
        database: PathBuf,

        /// Text index directory
        #[arg(long, default_value = "index")]
        index: PathBuf,

        /// Optional dictionary store for query expansion
        #[arg(long)]
        dictionary: Option<PathBuf>,

        /// Phrase slop; 0 means exact phrase
        #[arg(long, default_value = "5")]
        near: u32,

        /// Restrict hits to base books
        #[arg(long)]
        base_books_only: bool,

        /// Maximum hits to print
        #[arg(long, default_value = "10")]
        limit: usize,

        /// The query string
        query: String,
    },

    /// Suggest book titles for a prefix
    Suggest {
        /// Text index directory
        #[arg(long, default_value = "index")]
        index: PathBuf,

        /// Maximum suggestions
        #[arg(long, default_value = "10")]
        limit: usize,

        /// The title prefix
        prefix: String,
    },

    /// Print corpus statistics
    Stats {
        /// Database file
        #[arg(long, default_value = "seforim.db")]
        database: PathBuf,
    },

    /// Print the precomputed catalog summary
    Catalog {
        /// Directory holding catalog.pb
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Build {
            sefaria,
            otzaria,
            database,
            index,
            batch_size,
            progress,
        } => {
            let options = BuildOptions {
                batch_size,
                show_progress: progress,
                ..Default::default()
            };

            let mut inputs = Vec::new();
            let mut csv_files = Vec::new();
            if let Some(root) = &sefaria {
                inputs.extend(scan_sefaria_export(root)?);
                let links_dir = root.join("links");
                if links_dir.is_dir() {
                    for entry in std::fs::read_dir(&links_dir)? {
                        let path = entry?.path();
                        if path.extension().is_some_and(|e| e == "csv") {
                            csv_files.push(path);
                        }
                    }
                    csv_files.sort();
                }
            }
            if let Some(root) = &otzaria {
                inputs.extend(scan_otzaria_export(root)?);
            }
            if inputs.is_empty() {
                return Err("no books found; pass --sefaria and/or --otzaria".into());
            }

            let db = SeforimDb::open(&database)?;

            eprintln!("Ingesting {} books...", inputs.len());
            let (mut summary, maps) = ingest_books(&db, inputs, &options)?;

            eprintln!("Resolving links from {} CSV files...", csv_files.len());
            let links = resolve_links_from_csv_files(&db, &maps, &csv_files, &options)?;
            summary.links_resolved = links.resolved;
            summary.links_unresolved = links.unresolved + links.malformed;
            refresh_connection_flags(&db)?;

            eprintln!("Rebuilding category closure...");
            db.rebuild_category_closure()?;

            eprintln!("Building catalog...");
            let catalog = build_catalog(&db)?;
            let out_dir = database
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(std::path::Path::new("."))
                .to_path_buf();
            save_catalog(&catalog, &out_dir)?;

            eprintln!("Building text index...");
            let (lines_indexed, titles_indexed) = build_text_index(&db, &index)?;
            write_release_info(&out_dir)?;

            println!("=== Build Summary ===");
            println!("Books processed: {}", summary.books_processed);
            println!("Books skipped: {}", summary.books_skipped);
            println!("Lines inserted: {}", summary.lines_inserted);
            println!("Links resolved: {}", summary.links_resolved);
            println!("Links unresolved: {}", summary.links_unresolved);
            println!("Lines indexed: {lines_indexed}");
            println!("Titles indexed: {titles_indexed}");
            println!(
                "Catalog: {} categories, {} books",
                catalog.total_categories, catalog.total_books
            );
        }

        Commands::Search {
            database,
            index,
            dictionary,
            near,
            base_books_only,
            limit,
            query,
        } => {
            let db = SeforimDb::open_read_only(&database)?;
            let ancestors = SearchEngine::load_category_ancestors(&db)?;
            let mut engine = SearchEngine::open(&index)?
                .with_snippet_provider(Box::new(StoreSnippetProvider::new(db)))
                .with_category_ancestors(ancestors);
            if let Some(path) = dictionary {
                engine = engine.with_dictionary(Box::new(StoredDictionary::open(&path)?));
            }

            let options = SearchOptions {
                near,
                base_book_only: base_books_only,
                ..Default::default()
            };
            let Some(mut session) = engine.open_session(&query, &options)? else {
                println!("Empty query.");
                return Ok(());
            };

            println!("{} hits", session.total_hits());
            if let Some(page) = session.next_page(limit)? {
                for hit in &page.hits {
                    let snippet = hit
                        .snippet
                        .as_ref()
                        .map(|s| s.html.as_str())
                        .unwrap_or("");
                    println!(
                        "[{:.2}] {} #{}: {}",
                        hit.score, hit.book_title, hit.line_index, snippet
                    );
                }
            }
            let facets = session.compute_facets()?;
            let mut books: Vec<_> = facets.books.iter().collect();
            books.sort_by(|a, b| b.1.cmp(a.1));
            println!("--- Books ---");
            for (book_id, count) in books.into_iter().take(10) {
                println!("book {book_id}: {count}");
            }
            session.close();
        }

        Commands::Suggest {
            index,
            limit,
            prefix,
        } => {
            let engine = SearchEngine::open(&index)?;
            for book_id in engine.search_books_by_title_prefix(&prefix, limit)? {
                println!("{book_id}");
            }
        }

        Commands::Stats { database } => {
            let db = SeforimDb::open_read_only(&database)?;
            let stats = db.load_corpus_stats()?;
            println!("=== Corpus Statistics ===");
            println!("Categories: {}", stats.total_categories);
            println!("Books: {}", stats.total_books);
            println!("Lines: {}", stats.total_lines);
            println!("Links: {}", stats.total_links);
            println!("TOC entries: {}", stats.total_toc_entries);
        }

        Commands::Catalog { dir } => match load_catalog(&dir) {
            Some(catalog) => {
                println!(
                    "Catalog v{}: {} categories, {} books",
                    catalog.version, catalog.total_categories, catalog.total_books
                );
                for root in &catalog.root_categories {
                    println!(
                        "  {} ({} books, {} subcategories)",
                        root.title,
                        root.books.len(),
                        root.subcategories.len()
                    );
                }
            }
            None => println!("No catalog found in {}", dir.display()),
        },
    }
    Ok(())
}
