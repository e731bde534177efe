//! Precomputed navigation catalog.
//!
//! Clients navigate categories and books from a compact binary tree loaded
//! at startup instead of querying the database. The tree is a
//! length-prefixed, field-numbered record (protobuf wire format) with
//! stable field numbers; readers ignore unknown fields, so old clients can
//! open new files.

use crate::db::{DbError, SeforimDb};
use crate::models::{Book, Category};
use prost::Message;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File name of the catalog, beside the database file.
pub const CATALOG_FILE_NAME: &str = "catalog.pb";

/// Bumped when the wire layout changes incompatibly.
pub const CATALOG_VERSION: i32 = 1;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

#[derive(Clone, PartialEq, Message)]
pub struct CatalogBook {
    #[prost(sint64, tag = "1")]
    pub id: i64,
    #[prost(sint64, tag = "2")]
    pub category_id: i64,
    #[prost(string, tag = "3")]
    pub title: String,
    #[prost(string, repeated, tag = "4")]
    pub authors: Vec<String>,
    #[prost(bool, tag = "5")]
    pub is_base_book: bool,
    #[prost(bool, tag = "6")]
    pub has_targum_connection: bool,
    #[prost(bool, tag = "7")]
    pub has_reference_connection: bool,
    #[prost(bool, tag = "8")]
    pub has_commentary_connection: bool,
    #[prost(bool, tag = "9")]
    pub has_other_connection: bool,
    #[prost(double, tag = "10")]
    pub order: f64,
    #[prost(sint64, tag = "11")]
    pub total_lines: i64,
    #[prost(bool, tag = "12")]
    pub has_alt_structures: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct CatalogCategory {
    #[prost(sint64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub title: String,
    #[prost(sint64, tag = "3")]
    pub level: i64,
    #[prost(sint64, optional, tag = "4")]
    pub parent_id: Option<i64>,
    #[prost(message, repeated, tag = "5")]
    pub books: Vec<CatalogBook>,
    #[prost(message, repeated, tag = "6")]
    pub subcategories: Vec<CatalogCategory>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PrecomputedCatalog {
    #[prost(int32, tag = "1")]
    pub version: i32,
    #[prost(sint64, tag = "2")]
    pub total_categories: i64,
    #[prost(sint64, tag = "3")]
    pub total_books: i64,
    #[prost(message, repeated, tag = "4")]
    pub root_categories: Vec<CatalogCategory>,
}

impl From<&Book> for CatalogBook {
    fn from(book: &Book) -> Self {
        CatalogBook {
            id: book.id,
            category_id: book.category_id,
            title: book.title.clone(),
            authors: book.authors.clone(),
            is_base_book: book.is_base_book,
            has_targum_connection: book.has_targum_connection,
            has_reference_connection: book.has_reference_connection,
            has_commentary_connection: book.has_commentary_connection,
            has_other_connection: book.has_other_connection,
            order: book.order,
            total_lines: book.total_lines,
            has_alt_structures: book.has_alt_structures,
        }
    }
}

/// Build the catalog with a depth-first walk of the category forest.
pub fn build_catalog(db: &SeforimDb) -> Result<PrecomputedCatalog, CatalogError> {
    let mut total_categories = 0i64;
    let mut total_books = 0i64;

    let mut roots = Vec::new();
    for root in db.get_root_categories()? {
        roots.push(build_category(
            db,
            &root,
            &mut total_categories,
            &mut total_books,
        )?);
    }

    Ok(PrecomputedCatalog {
        version: CATALOG_VERSION,
        total_categories,
        total_books,
        root_categories: roots,
    })
}

fn build_category(
    db: &SeforimDb,
    category: &Category,
    total_categories: &mut i64,
    total_books: &mut i64,
) -> Result<CatalogCategory, CatalogError> {
    *total_categories += 1;

    let books: Vec<CatalogBook> = db
        .get_books_in_category(category.id)?
        .iter()
        .map(CatalogBook::from)
        .collect();
    *total_books += books.len() as i64;

    let mut subcategories = Vec::new();
    for child in db.get_child_categories(category.id)? {
        subcategories.push(build_category(db, &child, total_categories, total_books)?);
    }

    Ok(CatalogCategory {
        id: category.id,
        title: category.title.clone(),
        level: category.level,
        parent_id: category.parent_id,
        books,
        subcategories,
    })
}

/// Encode the catalog and write `catalog.pb` into `dir`.
pub fn save_catalog(catalog: &PrecomputedCatalog, dir: &Path) -> Result<(), CatalogError> {
    let mut buf = Vec::with_capacity(catalog.encoded_len());
    catalog
        .encode(&mut buf)
        .expect("Vec<u8> writes are infallible");
    fs::write(dir.join(CATALOG_FILE_NAME), buf)?;
    Ok(())
}

/// Load `catalog.pb` from `dir`. Missing or corrupt files yield `None`;
/// the caller falls back to querying the store.
pub fn load_catalog(dir: &Path) -> Option<PrecomputedCatalog> {
    let bytes = fs::read(dir.join(CATALOG_FILE_NAME)).ok()?;
    PrecomputedCatalog::decode(bytes.as_slice()).ok()
}

impl PrecomputedCatalog {
    /// All books in the tree, deduplicated by id, in walk order.
    pub fn extract_all_books(&self) -> Vec<&CatalogBook> {
        let mut seen = std::collections::HashSet::new();
        let mut books = Vec::new();
        let mut stack: Vec<&CatalogCategory> = self.root_categories.iter().rev().collect();
        while let Some(category) = stack.pop() {
            for book in &category.books {
                if seen.insert(book.id) {
                    books.push(book);
                }
            }
            for sub in category.subcategories.iter().rev() {
                stack.push(sub);
            }
        }
        books
    }

    pub fn find_category_by_id(&self, id: i64) -> Option<&CatalogCategory> {
        let mut stack: Vec<&CatalogCategory> = self.root_categories.iter().collect();
        while let Some(category) = stack.pop() {
            if category.id == id {
                return Some(category);
            }
            stack.extend(category.subcategories.iter());
        }
        None
    }

    pub fn find_book_by_id(&self, id: i64) -> Option<&CatalogBook> {
        let mut stack: Vec<&CatalogCategory> = self.root_categories.iter().collect();
        while let Some(category) = stack.pop() {
            if let Some(book) = category.books.iter().find(|b| b.id == id) {
                return Some(book);
            }
            stack.extend(category.subcategories.iter());
        }
        None
    }

    /// Categories from a root down to the one with `id`, inclusive.
    pub fn get_category_path(&self, id: i64) -> Vec<&CatalogCategory> {
        fn walk<'a>(
            category: &'a CatalogCategory,
            id: i64,
            path: &mut Vec<&'a CatalogCategory>,
        ) -> bool {
            path.push(category);
            if category.id == id {
                return true;
            }
            for sub in &category.subcategories {
                if walk(sub, id, path) {
                    return true;
                }
            }
            path.pop();
            false
        }

        let mut path = Vec::new();
        for root in &self.root_categories {
            if walk(root, id, &mut path) {
                return path;
            }
        }
        Vec::new()
    }

    /// Books directly inside the category with `id`.
    pub fn get_books_in_category(&self, id: i64) -> Vec<&CatalogBook> {
        self.find_category_by_id(id)
            .map(|c| c.books.iter().collect())
            .unwrap_or_default()
    }
}
