//! Lexical dictionary: surface/variant/base expansions for query tokens.
//!
//! The dictionary is a read-only key/value store mapping normalized tokens
//! to expansion sets. A token may belong to several bases; the engine asks
//! for one preferred expansion per token. Lookups are cached; the store is
//! only a few tokens per query away from the hot path.

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

const EXPANSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("expansions");
const HASHEM_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("hashem");
const HASHEM_KEY: &str = "surfaces";

#[derive(Error, Debug)]
pub enum DictError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("store error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("store error: {0}")]
    Table(#[from] redb::TableError),
    #[error("store error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("store error: {0}")]
    Commit(#[from] redb::CommitError),
}

/// One expansion set for a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expansion {
    pub token: String,
    pub surfaces: Vec<String>,
    pub variants: Vec<String>,
    pub bases: Vec<String>,
}

impl Expansion {
    pub fn size(&self) -> usize {
        self.surfaces.len() + self.variants.len() + self.bases.len()
    }
}

/// The stored value for one token: all candidate expansions, one per base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub expansions: Vec<Expansion>,
}

/// The narrow interface the query engine depends on.
pub trait DictionaryIndex: Send + Sync {
    /// The preferred expansion for one token, or `None` for blank or
    /// unknown tokens.
    fn expansion_for(&self, token: &str) -> Option<Expansion>;

    /// Distinct expansions over a token sequence, in first-seen order.
    fn expansions_for(&self, tokens: &[String]) -> Vec<Expansion> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for token in tokens {
            if let Some(expansion) = self.expansion_for(token) {
                if seen.insert(expansion.token.clone()) {
                    out.push(expansion);
                }
            }
        }
        out
    }

    /// Surface forms of the divine name, used to enrich highlight terms
    /// when the query literally contains Hashem.
    fn load_hashem_surfaces(&self) -> Vec<String>;

    /// Whether a `(token, base)` pair is excluded from highlight
    /// expansion. Filtering applies to highlighting only.
    fn is_blacklisted(&self, _token: &str, _base: &str) -> bool {
        false
    }
}

/// Dictionary over a redb file, with a per-token cache. Safe for
/// concurrent readers; the writer (cache insert) is rare.
pub struct StoredDictionary {
    db: Database,
    cache: RwLock<HashMap<String, Option<Expansion>>>,
    blacklist: HashSet<(String, String)>,
}

impl StoredDictionary {
    /// Open an existing dictionary file.
    pub fn open(path: &Path) -> Result<Self, DictError> {
        let db = Database::open(path)?;
        Ok(Self {
            db,
            cache: RwLock::new(HashMap::new()),
            blacklist: HashSet::new(),
        })
    }

    /// Open with a blacklist TSV of `token<TAB>base` pairs to exclude
    /// from highlight expansion.
    pub fn open_with_blacklist(path: &Path, blacklist_tsv: &str) -> Result<Self, DictError> {
        let mut dict = Self::open(path)?;
        dict.blacklist = parse_blacklist(blacklist_tsv);
        Ok(dict)
    }

    fn lookup(&self, token: &str) -> Result<Option<Expansion>, DictError> {
        let read = self.db.begin_read()?;
        let table = match read.open_table(EXPANSIONS_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let Some(guard) = table.get(token)? else {
            return Ok(None);
        };
        let entry: DictionaryEntry = serde_json::from_slice(guard.value())?;
        Ok(prefer_expansion(token, entry))
    }
}

/// Pick one expansion: a base matching the token itself wins, otherwise
/// the largest expansion set.
fn prefer_expansion(token: &str, entry: DictionaryEntry) -> Option<Expansion> {
    let mut expansions = entry.expansions;
    if expansions.is_empty() {
        return None;
    }
    if let Some(pos) = expansions
        .iter()
        .position(|e| e.bases.iter().any(|b| b == token))
    {
        return Some(expansions.swap_remove(pos));
    }
    expansions.into_iter().max_by_key(Expansion::size)
}

fn parse_blacklist(tsv: &str) -> HashSet<(String, String)> {
    tsv.lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let token = parts.next()?.trim();
            let base = parts.next()?.trim();
            if token.is_empty() || base.is_empty() {
                return None;
            }
            Some((token.to_string(), base.to_string()))
        })
        .collect()
}

impl DictionaryIndex for StoredDictionary {
    fn expansion_for(&self, token: &str) -> Option<Expansion> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        if let Some(cached) = self.cache.read().ok()?.get(token) {
            return cached.clone();
        }
        // Degrade silently on store errors: the engine continues without
        // expansions.
        let result = self.lookup(token).unwrap_or(None);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(token.to_string(), result.clone());
        }
        result
    }

    fn load_hashem_surfaces(&self) -> Vec<String> {
        let load = || -> Result<Vec<String>, DictError> {
            let read = self.db.begin_read()?;
            let table = match read.open_table(HASHEM_TABLE) {
                Ok(table) => table,
                Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(err) => return Err(err.into()),
            };
            let Some(guard) = table.get(HASHEM_KEY)? else {
                return Ok(Vec::new());
            };
            Ok(serde_json::from_slice(guard.value())?)
        };
        load().unwrap_or_default()
    }

    fn is_blacklisted(&self, token: &str, base: &str) -> bool {
        self.blacklist
            .contains(&(token.to_string(), base.to_string()))
    }
}

/// Write a dictionary file. Used by the build pipeline and tests; the
/// query path never writes.
pub fn write_dictionary(
    path: &Path,
    entries: &[(String, DictionaryEntry)],
    hashem_surfaces: &[String],
) -> Result<(), DictError> {
    let db = Database::create(path)?;
    let write = db.begin_write()?;
    {
        let mut table = write.open_table(EXPANSIONS_TABLE)?;
        for (token, entry) in entries {
            let bytes = serde_json::to_vec(entry)?;
            table.insert(token.as_str(), bytes.as_slice())?;
        }
    }
    {
        let mut table = write.open_table(HASHEM_TABLE)?;
        let bytes = serde_json::to_vec(hashem_surfaces)?;
        table.insert(HASHEM_KEY, bytes.as_slice())?;
    }
    write.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expansion(token: &str, surfaces: &[&str], variants: &[&str], bases: &[&str]) -> Expansion {
        Expansion {
            token: token.to_string(),
            surfaces: surfaces.iter().map(|s| s.to_string()).collect(),
            variants: variants.iter().map(|s| s.to_string()).collect(),
            bases: bases.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn sample_dictionary(dir: &Path) -> StoredDictionary {
        let path = dir.join("dict.redb");
        let entries = vec![
            (
                "ברא".to_string(),
                DictionaryEntry {
                    expansions: vec![
                        expansion("ברא", &["ברא", "בראה"], &["ברה"], &["ברא"]),
                        expansion("ברא", &["בר"], &[], &["בר"]),
                    ],
                },
            ),
            (
                "אמר".to_string(),
                DictionaryEntry {
                    expansions: vec![expansion(
                        "אמר",
                        &["אמר", "ויאמר", "אמרו"],
                        &["אמירה"],
                        &["אמר"],
                    )],
                },
            ),
        ];
        write_dictionary(
            &path,
            &entries,
            &["ה".to_string(), "יהוה".to_string(), "אלהים".to_string()],
        )
        .unwrap();
        StoredDictionary::open(&path).unwrap()
    }

    #[test]
    fn test_expansion_prefers_own_base() {
        let dir = tempfile::tempdir().unwrap();
        let dict = sample_dictionary(dir.path());
        let e = dict.expansion_for("ברא").unwrap();
        assert!(e.bases.contains(&"ברא".to_string()));
    }

    #[test]
    fn test_expansion_largest_set_when_no_own_base() {
        let entry = DictionaryEntry {
            expansions: vec![
                expansion("x", &["a"], &[], &["p"]),
                expansion("x", &["a", "b", "c"], &[], &["q"]),
            ],
        };
        let chosen = prefer_expansion("x", entry).unwrap();
        assert_eq!(chosen.bases, vec!["q".to_string()]);
    }

    #[test]
    fn test_unknown_and_blank_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let dict = sample_dictionary(dir.path());
        assert!(dict.expansion_for("שלום").is_none());
        assert!(dict.expansion_for("").is_none());
        assert!(dict.expansion_for("   ").is_none());
    }

    #[test]
    fn test_lookup_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let dict = sample_dictionary(dir.path());
        assert!(dict.expansion_for("אמר").is_some());
        assert!(dict.cache.read().unwrap().contains_key("אמר"));
        // Second call hits the cache and agrees.
        assert_eq!(
            dict.expansion_for("אמר"),
            dict.cache.read().unwrap().get("אמר").cloned().unwrap()
        );
    }

    #[test]
    fn test_expansions_for_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let dict = sample_dictionary(dir.path());
        let tokens = vec!["ברא".to_string(), "אמר".to_string(), "ברא".to_string()];
        let all = dict.expansions_for(&tokens);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_hashem_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let dict = sample_dictionary(dir.path());
        let surfaces = dict.load_hashem_surfaces();
        assert!(surfaces.contains(&"יהוה".to_string()));
    }

    #[test]
    fn test_blacklist_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.redb");
        write_dictionary(&path, &[], &[]).unwrap();
        let dict =
            StoredDictionary::open_with_blacklist(&path, "ברא\tבר\nשלום\tשלם\n").unwrap();
        assert!(dict.is_blacklisted("ברא", "בר"));
        assert!(!dict.is_blacklisted("ברא", "ברא"));
    }
}
