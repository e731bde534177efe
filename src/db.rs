//! SQLite store facade for the seforim database.
//!
//! Owns the embedded database and exposes typed operations over categories,
//! books, lines, TOC entries, links, and the category closure. Higher
//! layers pass domain objects; no SQL strings leave this module.

use crate::models::{
    AltTocEntry, AltTocStructure, Book, Category, ConnectionType, CorpusStats, Line, Link,
    TocEntry,
};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("book not found: {0}")]
    BookNotFound(i64),
    #[error("integrity violation: {0}")]
    Integrity(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Facade over the seforim SQLite file.
///
/// During ingestion exactly one `SeforimDb` holds write access; at query
/// time the file may be reopened read-only by any number of readers.
pub struct SeforimDb {
    conn: Connection,
}

impl SeforimDb {
    /// Open (or create) the database and apply the performance pragmas:
    /// write-ahead logging, synchronous=NORMAL, a 10,000 page cache, and
    /// in-memory temp storage.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;
        let db = Self { conn };
        db.create_schema()?;
        Ok(db)
    }

    /// Open an existing database file read-only.
    pub fn open_read_only(path: &Path) -> DbResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "cache_size", 10_000)?;
        Ok(Self { conn })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self { conn };
        db.create_schema()?;
        Ok(db)
    }

    fn apply_pragmas(conn: &Connection) -> DbResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", 10_000)?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn create_schema(&self) -> DbResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS source (
                 id INTEGER PRIMARY KEY,
                 name TEXT NOT NULL UNIQUE
             );
             CREATE TABLE IF NOT EXISTS category (
                 id INTEGER PRIMARY KEY,
                 parentId INTEGER REFERENCES category(id),
                 title TEXT NOT NULL,
                 level INTEGER NOT NULL,
                 \"order\" INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_category_parent ON category(parentId);
             CREATE TABLE IF NOT EXISTS book (
                 id INTEGER PRIMARY KEY,
                 categoryId INTEGER NOT NULL REFERENCES category(id),
                 sourceId INTEGER NOT NULL REFERENCES source(id),
                 title TEXT NOT NULL,
                 authors TEXT NOT NULL DEFAULT '[]',
                 pubPlaces TEXT NOT NULL DEFAULT '[]',
                 pubDates TEXT NOT NULL DEFAULT '[]',
                 heShortDesc TEXT,
                 \"order\" REAL NOT NULL DEFAULT 0,
                 totalLines INTEGER NOT NULL DEFAULT 0,
                 isBaseBook INTEGER NOT NULL DEFAULT 0,
                 hasTargumConnection INTEGER NOT NULL DEFAULT 0,
                 hasReferenceConnection INTEGER NOT NULL DEFAULT 0,
                 hasCommentaryConnection INTEGER NOT NULL DEFAULT 0,
                 hasOtherConnection INTEGER NOT NULL DEFAULT 0,
                 hasAltStructures INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_book_category ON book(categoryId);
             CREATE INDEX IF NOT EXISTS idx_book_title ON book(title);
             CREATE INDEX IF NOT EXISTS idx_book_order ON book(\"order\");
             CREATE TABLE IF NOT EXISTS line (
                 id INTEGER PRIMARY KEY,
                 bookId INTEGER NOT NULL REFERENCES book(id),
                 lineIndex INTEGER NOT NULL,
                 content TEXT NOT NULL,
                 heRef TEXT,
                 ref TEXT,
                 UNIQUE(bookId, lineIndex)
             );
             CREATE INDEX IF NOT EXISTS idx_line_book ON line(bookId, lineIndex);
             CREATE INDEX IF NOT EXISTS idx_line_ref ON line(ref);
             CREATE INDEX IF NOT EXISTS idx_line_heref ON line(heRef);
             CREATE TABLE IF NOT EXISTS tocEntry (
                 id INTEGER PRIMARY KEY,
                 bookId INTEGER NOT NULL REFERENCES book(id),
                 parentId INTEGER REFERENCES tocEntry(id),
                 text TEXT NOT NULL,
                 level INTEGER NOT NULL,
                 lineId INTEGER REFERENCES line(id),
                 isLastChild INTEGER NOT NULL DEFAULT 0,
                 hasChildren INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_toc_book ON tocEntry(bookId);
             CREATE INDEX IF NOT EXISTS idx_toc_parent ON tocEntry(parentId);
             CREATE TABLE IF NOT EXISTS line_toc (
                 lineId INTEGER NOT NULL REFERENCES line(id),
                 tocEntryId INTEGER NOT NULL REFERENCES tocEntry(id),
                 PRIMARY KEY (lineId)
             );
             CREATE TABLE IF NOT EXISTS altTocStructure (
                 id INTEGER PRIMARY KEY,
                 bookId INTEGER NOT NULL REFERENCES book(id),
                 structureKey TEXT NOT NULL,
                 UNIQUE(bookId, structureKey)
             );
             CREATE TABLE IF NOT EXISTS altTocEntry (
                 id INTEGER PRIMARY KEY,
                 structureId INTEGER NOT NULL REFERENCES altTocStructure(id),
                 bookId INTEGER NOT NULL REFERENCES book(id),
                 parentId INTEGER REFERENCES altTocEntry(id),
                 text TEXT NOT NULL,
                 level INTEGER NOT NULL,
                 lineId INTEGER REFERENCES line(id)
             );
             CREATE INDEX IF NOT EXISTS idx_alt_toc_structure ON altTocEntry(structureId);
             CREATE TABLE IF NOT EXISTS line_alt_toc_mapping (
                 lineId INTEGER NOT NULL REFERENCES line(id),
                 altTocEntryId INTEGER NOT NULL REFERENCES altTocEntry(id),
                 PRIMARY KEY (lineId, altTocEntryId)
             );
             CREATE TABLE IF NOT EXISTS link (
                 id INTEGER PRIMARY KEY,
                 sourceBookId INTEGER NOT NULL REFERENCES book(id),
                 targetBookId INTEGER NOT NULL REFERENCES book(id),
                 sourceLineId INTEGER NOT NULL REFERENCES line(id),
                 targetLineId INTEGER NOT NULL REFERENCES line(id),
                 connectionTypeId INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_link_source_book ON link(sourceBookId);
             CREATE INDEX IF NOT EXISTS idx_link_target_book ON link(targetBookId);
             CREATE INDEX IF NOT EXISTS idx_link_source_line ON link(sourceLineId);
             CREATE INDEX IF NOT EXISTS idx_link_target_line ON link(targetLineId);
             CREATE INDEX IF NOT EXISTS idx_link_type ON link(connectionTypeId);
             CREATE TABLE IF NOT EXISTS book_has_links (
                 bookId INTEGER PRIMARY KEY REFERENCES book(id),
                 hasSourceLinks INTEGER NOT NULL DEFAULT 0,
                 hasTargetLinks INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS category_closure (
                 ancestor INTEGER NOT NULL,
                 descendant INTEGER NOT NULL,
                 distance INTEGER NOT NULL,
                 PRIMARY KEY (ancestor, descendant)
             );
             CREATE INDEX IF NOT EXISTS idx_closure_descendant ON category_closure(descendant);
             CREATE VIRTUAL TABLE IF NOT EXISTS book_title_fts USING fts5(
                 term,
                 displayTitle UNINDEXED,
                 bookId UNINDEXED,
                 categoryId UNINDEXED
             );",
        )?;
        Ok(())
    }

    /// Run `block` inside a single transaction. All statements issued on
    /// this facade from within the block join the transaction; an error
    /// rolls everything back.
    pub fn run_in_transaction<T>(&self, block: impl FnOnce(&Self) -> DbResult<T>) -> DbResult<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = block(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Sources and categories
    // ------------------------------------------------------------------

    /// Insert a provenance source, returning the existing id on conflict.
    pub fn insert_source(&self, name: &str) -> DbResult<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO source (name) VALUES (?1)",
            params![name],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM source WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Insert a category, idempotent on `(parentId, title, level, order)`.
    pub fn insert_category(&self, category: &Category) -> DbResult<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM category
                 WHERE parentId IS ?1 AND title = ?2 AND level = ?3 AND \"order\" = ?4",
                params![category.parent_id, category.title, category.level, category.order],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn.execute(
            "INSERT INTO category (parentId, title, level, \"order\") VALUES (?1, ?2, ?3, ?4)",
            params![category.parent_id, category.title, category.level, category.order],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_category(&self, id: i64) -> DbResult<Option<Category>> {
        let cat = self
            .conn
            .query_row(
                "SELECT id, parentId, title, level, \"order\" FROM category WHERE id = ?1",
                params![id],
                category_from_row,
            )
            .optional()?;
        Ok(cat)
    }

    /// All categories ordered by `(level, order, title)`.
    pub fn get_all_categories(&self) -> DbResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, parentId, title, level, \"order\" FROM category
             ORDER BY level, \"order\", title",
        )?;
        let rows = stmt.query_map([], category_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_root_categories(&self) -> DbResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, parentId, title, level, \"order\" FROM category
             WHERE parentId IS NULL ORDER BY \"order\", title",
        )?;
        let rows = stmt.query_map([], category_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_child_categories(&self, parent_id: i64) -> DbResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, parentId, title, level, \"order\" FROM category
             WHERE parentId = ?1 ORDER BY \"order\", title",
        )?;
        let rows = stmt.query_map(params![parent_id], category_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ------------------------------------------------------------------
    // Books
    // ------------------------------------------------------------------

    /// Insert a book. A caller-supplied id (> 0) is honored; if a row with
    /// that id already exists under a different category, the row is
    /// corrected to the input's category and the id returned.
    pub fn insert_book(&self, book: &Book) -> DbResult<i64> {
        if book.id > 0 {
            let existing: Option<i64> = self
                .conn
                .query_row(
                    "SELECT categoryId FROM book WHERE id = ?1",
                    params![book.id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(category_id) = existing {
                if category_id != book.category_id {
                    self.conn.execute(
                        "UPDATE book SET categoryId = ?1 WHERE id = ?2",
                        params![book.category_id, book.id],
                    )?;
                }
                return Ok(book.id);
            }
        }
        let authors = serde_json::to_string(&book.authors)?;
        let pub_places = serde_json::to_string(&book.pub_places)?;
        let pub_dates = serde_json::to_string(&book.pub_dates)?;
        self.conn.execute(
            "INSERT INTO book (id, categoryId, sourceId, title, authors, pubPlaces, pubDates,
                               heShortDesc, \"order\", totalLines, isBaseBook,
                               hasTargumConnection, hasReferenceConnection,
                               hasCommentaryConnection, hasOtherConnection, hasAltStructures)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                if book.id > 0 { Some(book.id) } else { None },
                book.category_id,
                book.source_id,
                book.title,
                authors,
                pub_places,
                pub_dates,
                book.he_short_desc,
                book.order,
                book.total_lines,
                book.is_base_book,
                book.has_targum_connection,
                book.has_reference_connection,
                book.has_commentary_connection,
                book.has_other_connection,
                book.has_alt_structures,
            ],
        )?;
        Ok(if book.id > 0 {
            book.id
        } else {
            self.conn.last_insert_rowid()
        })
    }

    pub fn get_book(&self, id: i64) -> DbResult<Option<Book>> {
        let book = self
            .conn
            .query_row(
                &format!("{BOOK_SELECT} WHERE id = ?1"),
                params![id],
                book_from_row,
            )
            .optional()?;
        Ok(book)
    }

    pub fn get_book_by_title(&self, title: &str) -> DbResult<Option<Book>> {
        let book = self
            .conn
            .query_row(
                &format!("{BOOK_SELECT} WHERE title = ?1"),
                params![title],
                book_from_row,
            )
            .optional()?;
        Ok(book)
    }

    pub fn get_all_books(&self) -> DbResult<Vec<Book>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{BOOK_SELECT} ORDER BY \"order\", title"))?;
        let rows = stmt.query_map([], book_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_books_in_category(&self, category_id: i64) -> DbResult<Vec<Book>> {
        let mut stmt = self.conn.prepare(&format!(
            "{BOOK_SELECT} WHERE categoryId = ?1 ORDER BY \"order\", title"
        ))?;
        let rows = stmt.query_map(params![category_id], book_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Books anywhere under a category subtree. O(hits) through the
    /// closure table instead of a recursive walk.
    pub fn get_books_under_category_tree(&self, category_id: i64) -> DbResult<Vec<Book>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT b.id, b.categoryId, b.sourceId, b.title, b.authors, b.pubPlaces,
                    b.pubDates, b.heShortDesc, b.\"order\", b.totalLines, b.isBaseBook,
                    b.hasTargumConnection, b.hasReferenceConnection,
                    b.hasCommentaryConnection, b.hasOtherConnection, b.hasAltStructures
             FROM book b
             JOIN category_closure cc ON cc.descendant = b.categoryId
             WHERE cc.ancestor = ?1
             ORDER BY b.\"order\", b.title",
        ))?;
        let rows = stmt.query_map(params![category_id], book_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_book_total_lines(&self, book_id: i64, total_lines: i64) -> DbResult<()> {
        self.conn.execute(
            "UPDATE book SET totalLines = ?1 WHERE id = ?2",
            params![total_lines, book_id],
        )?;
        Ok(())
    }

    pub fn set_book_has_alt_structures(&self, book_id: i64, value: bool) -> DbResult<()> {
        self.conn.execute(
            "UPDATE book SET hasAltStructures = ?1 WHERE id = ?2",
            params![value, book_id],
        )?;
        Ok(())
    }

    pub fn update_book_connection_flags(
        &self,
        book_id: i64,
        has_targum: bool,
        has_reference: bool,
        has_commentary: bool,
        has_other: bool,
    ) -> DbResult<()> {
        self.conn.execute(
            "UPDATE book SET hasTargumConnection = ?1, hasReferenceConnection = ?2,
                             hasCommentaryConnection = ?3, hasOtherConnection = ?4
             WHERE id = ?5",
            params![has_targum, has_reference, has_commentary, has_other, book_id],
        )?;
        Ok(())
    }

    pub fn set_book_has_links(
        &self,
        book_id: i64,
        has_source_links: bool,
        has_target_links: bool,
    ) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO book_has_links (bookId, hasSourceLinks, hasTargetLinks)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(bookId) DO UPDATE SET hasSourceLinks = ?2, hasTargetLinks = ?3",
            params![book_id, has_source_links, has_target_links],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lines
    // ------------------------------------------------------------------

    pub fn insert_line(&self, line: &Line) -> DbResult<i64> {
        self.conn.execute(
            "INSERT INTO line (bookId, lineIndex, content, heRef, ref)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                line.book_id,
                line.line_index,
                line.content,
                line.he_ref,
                line.en_ref
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert a batch of lines with one prepared statement, returning the
    /// assigned ids in input order. Callers wrap batches in a transaction.
    pub fn insert_lines(&self, lines: &[Line]) -> DbResult<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO line (bookId, lineIndex, content, heRef, ref)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        let mut ids = Vec::with_capacity(lines.len());
        for line in lines {
            stmt.execute(params![
                line.book_id,
                line.line_index,
                line.content,
                line.he_ref,
                line.en_ref
            ])?;
            ids.push(self.conn.last_insert_rowid());
        }
        Ok(ids)
    }

    pub fn get_line(&self, id: i64) -> DbResult<Option<Line>> {
        let line = self
            .conn
            .query_row(
                "SELECT id, bookId, lineIndex, content, heRef, ref FROM line WHERE id = ?1",
                params![id],
                line_from_row,
            )
            .optional()?;
        Ok(line)
    }

    pub fn get_line_by_index(&self, book_id: i64, line_index: i64) -> DbResult<Option<Line>> {
        let line = self
            .conn
            .query_row(
                "SELECT id, bookId, lineIndex, content, heRef, ref FROM line
                 WHERE bookId = ?1 AND lineIndex = ?2",
                params![book_id, line_index],
                line_from_row,
            )
            .optional()?;
        Ok(line)
    }

    /// Lines of a book in `[start_index, end_index]`, ordered by index.
    /// Used by the snippet provider to widen short lines with neighbors.
    pub fn get_lines_range(
        &self,
        book_id: i64,
        start_index: i64,
        end_index: i64,
    ) -> DbResult<Vec<Line>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, bookId, lineIndex, content, heRef, ref FROM line
             WHERE bookId = ?1 AND lineIndex >= ?2 AND lineIndex <= ?3
             ORDER BY lineIndex",
        )?;
        let rows = stmt.query_map(params![book_id, start_index, end_index], line_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_book_lines(&self, book_id: i64) -> DbResult<Vec<Line>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, bookId, lineIndex, content, heRef, ref FROM line
             WHERE bookId = ?1 ORDER BY lineIndex",
        )?;
        let rows = stmt.query_map(params![book_id], line_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ------------------------------------------------------------------
    // TOC
    // ------------------------------------------------------------------

    pub fn insert_toc_entry(&self, entry: &TocEntry) -> DbResult<i64> {
        self.conn.execute(
            "INSERT INTO tocEntry (bookId, parentId, text, level, lineId, isLastChild, hasChildren)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.book_id,
                entry.parent_id,
                entry.text,
                entry.level,
                entry.line_id,
                entry.is_last_child,
                entry.has_children
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_toc_entry_line_id(&self, toc_entry_id: i64, line_id: i64) -> DbResult<()> {
        self.conn.execute(
            "UPDATE tocEntry SET lineId = ?1 WHERE id = ?2",
            params![line_id, toc_entry_id],
        )?;
        Ok(())
    }

    pub fn update_toc_entry_flags(
        &self,
        toc_entry_id: i64,
        is_last_child: bool,
        has_children: bool,
    ) -> DbResult<()> {
        self.conn.execute(
            "UPDATE tocEntry SET isLastChild = ?1, hasChildren = ?2 WHERE id = ?3",
            params![is_last_child, has_children, toc_entry_id],
        )?;
        Ok(())
    }

    pub fn get_toc_entries(&self, book_id: i64) -> DbResult<Vec<TocEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, bookId, parentId, text, level, lineId, isLastChild, hasChildren
             FROM tocEntry WHERE bookId = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![book_id], toc_entry_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Map a content line to the TOC entry governing it.
    pub fn update_line_toc_entry(&self, line_id: i64, toc_entry_id: i64) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO line_toc (lineId, tocEntryId) VALUES (?1, ?2)
             ON CONFLICT(lineId) DO UPDATE SET tocEntryId = ?2",
            params![line_id, toc_entry_id],
        )?;
        Ok(())
    }

    /// Batched form of [`update_line_toc_entry`].
    pub fn insert_line_toc_mappings(&self, mappings: &[(i64, i64)]) -> DbResult<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO line_toc (lineId, tocEntryId) VALUES (?1, ?2)
             ON CONFLICT(lineId) DO UPDATE SET tocEntryId = ?2",
        )?;
        for (line_id, toc_entry_id) in mappings {
            stmt.execute(params![line_id, toc_entry_id])?;
        }
        Ok(())
    }

    pub fn get_line_toc_entry(&self, line_id: i64) -> DbResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT tocEntryId FROM line_toc WHERE lineId = ?1",
                params![line_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Alternative TOC structures
    // ------------------------------------------------------------------

    pub fn insert_alt_structure(&self, book_id: i64, structure_key: &str) -> DbResult<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO altTocStructure (bookId, structureKey) VALUES (?1, ?2)",
            params![book_id, structure_key],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM altTocStructure WHERE bookId = ?1 AND structureKey = ?2",
            params![book_id, structure_key],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn insert_alt_toc_entry(&self, entry: &AltTocEntry) -> DbResult<i64> {
        self.conn.execute(
            "INSERT INTO altTocEntry (structureId, bookId, parentId, text, level, lineId)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.structure_id,
                entry.book_id,
                entry.parent_id,
                entry.text,
                entry.level,
                entry.line_id
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_line_alt_toc_mapping(&self, line_id: i64, alt_entry_id: i64) -> DbResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO line_alt_toc_mapping (lineId, altTocEntryId) VALUES (?1, ?2)",
            params![line_id, alt_entry_id],
        )?;
        Ok(())
    }

    pub fn get_alt_structures(&self, book_id: i64) -> DbResult<Vec<AltTocStructure>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, bookId, structureKey FROM altTocStructure WHERE bookId = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![book_id], |row| {
            Ok(AltTocStructure {
                id: row.get(0)?,
                book_id: row.get(1)?,
                structure_key: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_alt_toc_entries(&self, structure_id: i64) -> DbResult<Vec<AltTocEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, structureId, bookId, parentId, text, level, lineId
             FROM altTocEntry WHERE structureId = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![structure_id], |row| {
            Ok(AltTocEntry {
                id: row.get(0)?,
                structure_id: row.get(1)?,
                book_id: row.get(2)?,
                parent_id: row.get(3)?,
                text: row.get(4)?,
                level: row.get(5)?,
                line_id: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Insert one link row. Never deduplicated; callers own pair symmetry.
    pub fn insert_link(&self, link: &Link) -> DbResult<i64> {
        self.conn.execute(
            "INSERT INTO link (sourceBookId, targetBookId, sourceLineId, targetLineId,
                               connectionTypeId)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                link.source_book_id,
                link.target_book_id,
                link.source_line_id,
                link.target_line_id,
                link.connection_type.id()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert a batch of links with one prepared statement. Callers wrap
    /// the batch in a transaction so both directions of every pair become
    /// visible atomically.
    pub fn insert_links(&self, links: &[Link]) -> DbResult<u64> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO link (sourceBookId, targetBookId, sourceLineId, targetLineId,
                               connectionTypeId)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for link in links {
            stmt.execute(params![
                link.source_book_id,
                link.target_book_id,
                link.source_line_id,
                link.target_line_id,
                link.connection_type.id()
            ])?;
        }
        Ok(links.len() as u64)
    }

    pub fn get_all_links(&self) -> DbResult<Vec<Link>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, sourceBookId, targetBookId, sourceLineId, targetLineId, connectionTypeId
             FROM link ORDER BY id",
        )?;
        let rows = stmt.query_map([], link_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_links_for_book(&self, book_id: i64) -> DbResult<Vec<Link>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, sourceBookId, targetBookId, sourceLineId, targetLineId, connectionTypeId
             FROM link WHERE sourceBookId = ?1 OR targetBookId = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![book_id], link_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_links_for_line(&self, line_id: i64) -> DbResult<Vec<Link>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, sourceBookId, targetBookId, sourceLineId, targetLineId, connectionTypeId
             FROM link WHERE sourceLineId = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![line_id], link_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_links_of_type(&self, connection_type: ConnectionType) -> DbResult<u64> {
        let count: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM link WHERE connectionTypeId = ?1",
            params![connection_type.id()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Per-type link counts for a book, counting both directions.
    /// Returns `(targum, reference, commentary, other)` presence.
    pub fn book_connection_presence(&self, book_id: i64) -> DbResult<(bool, bool, bool, bool)> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT COUNT(*) FROM link
             WHERE (sourceBookId = ?1 OR targetBookId = ?1) AND connectionTypeId = ?2",
        )?;
        let mut count_of = |ct: ConnectionType| -> DbResult<u64> {
            let n: u64 = stmt.query_row(params![book_id, ct.id()], |row| row.get(0))?;
            Ok(n)
        };
        let targum = count_of(ConnectionType::Targum)? > 0;
        let reference = count_of(ConnectionType::Reference)? > 0;
        let commentary = count_of(ConnectionType::Commentary)? > 0
            || count_of(ConnectionType::Source)? > 0;
        let other = count_of(ConnectionType::Other)? > 0;
        Ok((targum, reference, commentary, other))
    }

    /// Whether a book appears as source / as target of any link.
    pub fn book_link_directions(&self, book_id: i64) -> DbResult<(bool, bool)> {
        let as_source: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM link WHERE sourceBookId = ?1",
            params![book_id],
            |row| row.get(0),
        )?;
        let as_target: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM link WHERE targetBookId = ?1",
            params![book_id],
            |row| row.get(0),
        )?;
        Ok((as_source > 0, as_target > 0))
    }

    // ------------------------------------------------------------------
    // Category closure
    // ------------------------------------------------------------------

    /// Rebuild the `(ancestor, descendant, distance)` closure from scratch.
    pub fn rebuild_category_closure(&self) -> DbResult<()> {
        self.run_in_transaction(|db| {
            db.conn.execute("DELETE FROM category_closure", [])?;
            db.conn.execute(
                "INSERT INTO category_closure (ancestor, descendant, distance)
                 WITH RECURSIVE walk(ancestor, descendant, distance) AS (
                     SELECT id, id, 0 FROM category
                     UNION ALL
                     SELECT w.ancestor, c.id, w.distance + 1
                     FROM walk w
                     JOIN category c ON c.parentId = w.descendant
                 )
                 SELECT ancestor, descendant, distance FROM walk",
                [],
            )?;
            Ok(())
        })
    }

    /// Ancestor ids of a category (nearest first), excluding itself.
    pub fn get_category_ancestors(&self, category_id: i64) -> DbResult<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT ancestor FROM category_closure
             WHERE descendant = ?1 AND distance > 0 ORDER BY distance",
        )?;
        let rows = stmt.query_map(params![category_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn closure_contains(&self, ancestor: i64, descendant: i64) -> DbResult<Option<i64>> {
        let distance = self
            .conn
            .query_row(
                "SELECT distance FROM category_closure WHERE ancestor = ?1 AND descendant = ?2",
                params![ancestor, descendant],
                |row| row.get(0),
            )
            .optional()?;
        Ok(distance)
    }

    // ------------------------------------------------------------------
    // Book title search
    // ------------------------------------------------------------------

    /// Insert a searchable title term for prefix suggestions.
    pub fn insert_book_title_term(
        &self,
        book_id: i64,
        term: &str,
        display_title: &str,
        category_id: i64,
    ) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO book_title_fts (term, displayTitle, bookId, categoryId)
             VALUES (?1, ?2, ?3, ?4)",
            params![term, display_title, book_id, category_id],
        )?;
        Ok(())
    }

    /// Prefix search over book title terms; every whitespace token of
    /// `query` must match as a prefix. Returns book ids in match order.
    pub fn search_books_by_title_prefix(&self, query: &str, limit: usize) -> DbResult<Vec<i64>> {
        let tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = tokens.join(" ");
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT bookId FROM book_title_fts WHERE book_title_fts MATCH ?1 LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![match_expr, limit as i64], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    pub fn load_corpus_stats(&self) -> DbResult<CorpusStats> {
        let count = |sql: &str| -> DbResult<u64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok(CorpusStats {
            total_categories: count("SELECT COUNT(*) FROM category")?,
            total_books: count("SELECT COUNT(*) FROM book")?,
            total_lines: count("SELECT COUNT(*) FROM line")?,
            total_links: count("SELECT COUNT(*) FROM link")?,
            total_toc_entries: count("SELECT COUNT(*) FROM tocEntry")?,
        })
    }
}

const BOOK_SELECT: &str = "SELECT id, categoryId, sourceId, title, authors, pubPlaces, pubDates,
        heShortDesc, \"order\", totalLines, isBaseBook, hasTargumConnection,
        hasReferenceConnection, hasCommentaryConnection, hasOtherConnection, hasAltStructures
 FROM book";

fn category_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        title: row.get(2)?,
        level: row.get(3)?,
        order: row.get(4)?,
    })
}

fn line_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Line> {
    Ok(Line {
        id: row.get(0)?,
        book_id: row.get(1)?,
        line_index: row.get(2)?,
        content: row.get(3)?,
        he_ref: row.get(4)?,
        en_ref: row.get(5)?,
    })
}

fn toc_entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TocEntry> {
    Ok(TocEntry {
        id: row.get(0)?,
        book_id: row.get(1)?,
        parent_id: row.get(2)?,
        text: row.get(3)?,
        level: row.get(4)?,
        line_id: row.get(5)?,
        is_last_child: row.get(6)?,
        has_children: row.get(7)?,
    })
}

fn link_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Link> {
    let type_id: i64 = row.get(5)?;
    Ok(Link {
        id: row.get(0)?,
        source_book_id: row.get(1)?,
        target_book_id: row.get(2)?,
        source_line_id: row.get(3)?,
        target_line_id: row.get(4)?,
        connection_type: ConnectionType::from_id(type_id).unwrap_or(ConnectionType::Other),
    })
}

fn book_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
    let authors: String = row.get(4)?;
    let pub_places: String = row.get(5)?;
    let pub_dates: String = row.get(6)?;
    Ok(Book {
        id: row.get(0)?,
        category_id: row.get(1)?,
        source_id: row.get(2)?,
        title: row.get(3)?,
        authors: serde_json::from_str(&authors).unwrap_or_default(),
        pub_places: serde_json::from_str(&pub_places).unwrap_or_default(),
        pub_dates: serde_json::from_str(&pub_dates).unwrap_or_default(),
        he_short_desc: row.get(7)?,
        order: row.get(8)?,
        total_lines: row.get(9)?,
        is_base_book: row.get(10)?,
        has_targum_connection: row.get(11)?,
        has_reference_connection: row.get(12)?,
        has_commentary_connection: row.get(13)?,
        has_other_connection: row.get(14)?,
        has_alt_structures: row.get(15)?,
    })
}
