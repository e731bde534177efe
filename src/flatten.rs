//! Flattening of nested upstream text trees into ordered line sequences.
//!
//! Each upstream book arrives as a schema (depth, section names, optional
//! named nodes) plus a nested JSON text tree. Flattening walks the tree and
//! produces the ordered lines, the primary table of contents, per-line
//! citation strings, and the lookup maps the link resolver needs.

use crate::citation::{canonical, canonical_base};
use crate::hebrew::to_gematria;
use crate::models::RefEntry;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema for '{0}' has neither depth nor nodes")]
    EmptySchema(String),
    #[error("schema for '{0}': section names do not cover depth {1}")]
    SectionNamesMismatch(String, usize),
    #[error("text for '{0}' does not match its schema shape")]
    ShapeMismatch(String),
}

/// Discriminant for schema node dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaNodeKind {
    /// Nested arrays of strings, `depth` levels deep.
    JaggedArray,
    /// A named grouping node with child nodes.
    Group,
    /// A node mapping an array of citations onto another structure.
    ArrayMap,
}

/// One node of an upstream schema. A single struct with a discriminant
/// keeps deserialization tolerant of the upstream's sparse field usage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaNodeSpec {
    pub node_type: Option<String>,
    pub key: Option<String>,
    pub title: Option<String>,
    pub he_title: Option<String>,
    pub depth: usize,
    pub section_names: Vec<String>,
    pub he_section_names: Vec<String>,
    pub address_types: Vec<String>,
    pub referenceable_sections: Vec<bool>,
    pub default: bool,
    pub nodes: Vec<SchemaNodeSpec>,
    pub whole_ref: Option<String>,
    pub refs: Vec<String>,
}

impl SchemaNodeSpec {
    pub fn kind(&self) -> SchemaNodeKind {
        match self.node_type.as_deref() {
            Some("JaggedArrayNode") => SchemaNodeKind::JaggedArray,
            Some("ArrayMapNode") => SchemaNodeKind::ArrayMap,
            Some("SchemaNode") => SchemaNodeKind::Group,
            _ if !self.nodes.is_empty() => SchemaNodeKind::Group,
            _ => SchemaNodeKind::JaggedArray,
        }
    }

    /// The key under which this node's content appears in the text tree.
    pub fn text_key(&self) -> &str {
        if self.default {
            return "default";
        }
        self.key
            .as_deref()
            .or(self.title.as_deref())
            .unwrap_or("default")
    }

    pub fn is_default(&self) -> bool {
        self.default || self.key.as_deref() == Some("default")
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().or(self.key.as_deref()).unwrap_or("")
    }

    pub fn display_he_title(&self) -> &str {
        let he = self.he_title.as_deref().unwrap_or("");
        if he.is_empty() {
            self.display_title()
        } else {
            he
        }
    }
}

/// A whole upstream schema file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSchemaFile {
    pub title: String,
    #[serde(default)]
    pub he_title: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub he_categories: Vec<String>,
    pub schema: SchemaNodeSpec,
}

impl BookSchemaFile {
    /// Structural validation; a failing book is skipped, not fatal.
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_node(&self.schema, &self.title)
    }

    /// A schema whose top-level node has multiple keyed children spans
    /// multiple sections; the resolver's tail fallback is disabled for
    /// such books.
    pub fn is_multi_section(&self) -> bool {
        self.schema.kind() == SchemaNodeKind::Group
            && self
                .schema
                .nodes
                .iter()
                .filter(|n| !n.is_default())
                .count()
                > 1
    }
}

fn validate_node(node: &SchemaNodeSpec, book_title: &str) -> Result<(), SchemaError> {
    match node.kind() {
        SchemaNodeKind::Group => {
            if node.nodes.is_empty() {
                return Err(SchemaError::EmptySchema(book_title.to_string()));
            }
            for child in &node.nodes {
                validate_node(child, book_title)?;
            }
            Ok(())
        }
        SchemaNodeKind::JaggedArray => {
            if node.depth == 0 {
                return Err(SchemaError::EmptySchema(book_title.to_string()));
            }
            if !node.section_names.is_empty() && node.section_names.len() < node.depth {
                return Err(SchemaError::SectionNamesMismatch(
                    book_title.to_string(),
                    node.depth,
                ));
            }
            if !node.address_types.is_empty() && node.address_types.len() < node.depth {
                return Err(SchemaError::SectionNamesMismatch(
                    book_title.to_string(),
                    node.depth,
                ));
            }
            Ok(())
        }
        SchemaNodeKind::ArrayMap => Ok(()),
    }
}

/// One flattened line, before it receives a database id.
#[derive(Debug, Clone)]
pub struct FlatLine {
    /// HTML-tagged content; headings are wrapped in `<h1>`..`<h5>`.
    pub content: String,
    /// `Some(level)` for heading lines, `None` for content lines.
    pub heading_level: Option<u8>,
    pub en_ref: Option<String>,
    pub he_ref: Option<String>,
}

impl FlatLine {
    pub fn is_heading(&self) -> bool {
        self.heading_level.is_some()
    }
}

/// A table-of-contents entry in draft form: parents are indices into the
/// draft list, resolved to row ids at insert time.
#[derive(Debug, Clone)]
pub struct TocDraft {
    pub text: String,
    pub level: i64,
    pub parent: Option<usize>,
    pub line_index: Option<usize>,
    pub is_last_child: bool,
    pub has_children: bool,
}

/// The complete result of flattening one book.
#[derive(Debug, Default)]
pub struct FlattenedBook {
    pub lines: Vec<FlatLine>,
    pub toc: Vec<TocDraft>,
    /// `(line index, toc draft index)` for every content line.
    pub line_toc: Vec<(usize, usize)>,
    /// canonical(citation) -> entries, 1-based line indices.
    pub refs_by_canonical: HashMap<String, Vec<RefEntry>>,
    /// canonical citation without trailing refs -> entry with the lowest
    /// line index.
    pub refs_by_base: HashMap<String, RefEntry>,
    pub multi_section: bool,
}

struct Walker<'a> {
    en_title: &'a str,
    he_title: &'a str,
    out: FlattenedBook,
}

impl<'a> Walker<'a> {
    fn emit_heading(&mut self, text: &str, level: usize) {
        let level = level.clamp(1, 5);
        self.out.lines.push(FlatLine {
            content: format!("<h{level}>{text}</h{level}>"),
            heading_level: Some(level as u8),
            en_ref: None,
            he_ref: None,
        });
        self.out.toc.push(TocDraft {
            text: text.to_string(),
            level: level as i64,
            parent: None,
            line_index: Some(self.out.lines.len() - 1),
            is_last_child: false,
            has_children: false,
        });
    }

    /// TOC entry for a named schema node. Contributes no line of its own;
    /// its `line_index` is patched to the first line beneath it.
    fn emit_node_toc(&mut self, text: &str, level: usize) -> usize {
        self.out.toc.push(TocDraft {
            text: text.to_string(),
            level: level.clamp(1, 5) as i64,
            parent: None,
            line_index: None,
            is_last_child: false,
            has_children: false,
        });
        self.out.toc.len() - 1
    }

    fn emit_leaf(
        &mut self,
        text: &str,
        en_path: &[String],
        he_path: &[String],
        refs: &[u32],
        prefix_leaf: bool,
    ) {
        let en_ref = join_ref(self.en_title, en_path, &format_refs_en(refs));
        let he_ref = join_ref(self.he_title, he_path, &format_refs_he(refs));

        let content = if prefix_leaf {
            let n = refs.last().copied().unwrap_or(0);
            format!("({}) {}", to_gematria(n), text)
        } else {
            text.to_string()
        };

        self.out.lines.push(FlatLine {
            content,
            heading_level: None,
            en_ref: Some(en_ref.clone()),
            he_ref: Some(he_ref.clone()),
        });

        let entry = RefEntry {
            en_ref: en_ref.clone(),
            he_ref: he_ref.clone(),
            line_index: self.out.lines.len() as i64,
        };
        self.out
            .refs_by_canonical
            .entry(canonical(&en_ref))
            .or_default()
            .push(entry.clone());
        self.out
            .refs_by_canonical
            .entry(canonical(&he_ref))
            .or_default()
            .push(entry.clone());
        self.out
            .refs_by_base
            .entry(canonical_base(&en_ref))
            .or_insert_with(|| entry.clone());
        self.out
            .refs_by_base
            .entry(canonical_base(&he_ref))
            .or_insert(entry);
    }

    fn walk_node(
        &mut self,
        node: &SchemaNodeSpec,
        text: &Value,
        en_path: &[String],
        he_path: &[String],
        level: usize,
    ) {
        match node.kind() {
            SchemaNodeKind::Group => {
                for child in &node.nodes {
                    let child_text = match text {
                        Value::Object(map) => {
                            map.get(child.text_key()).unwrap_or(&Value::Null)
                        }
                        // A group over a non-object tree has nothing to
                        // hand its children.
                        _ => &Value::Null,
                    };
                    if child.is_default() {
                        self.walk_node(child, child_text, en_path, he_path, level);
                    } else {
                        let toc_idx = self.emit_node_toc(child.display_he_title(), level);
                        let first_line = self.out.lines.len();
                        let mut en2 = en_path.to_vec();
                        en2.push(child.display_title().to_string());
                        let mut he2 = he_path.to_vec();
                        he2.push(child.display_he_title().to_string());
                        self.walk_node(child, child_text, &en2, &he2, level + 1);
                        if self.out.lines.len() > first_line {
                            self.out.toc[toc_idx].line_index = Some(first_line);
                            // Section-only citations ("Tur, Orach Chayim,
                            // Introduction") resolve to the section's
                            // first line through the canonical map.
                            let entry = RefEntry {
                                en_ref: join_ref(self.en_title, &en2, ""),
                                he_ref: join_ref(self.he_title, &he2, ""),
                                line_index: first_line as i64 + 1,
                            };
                            self.out
                                .refs_by_canonical
                                .entry(canonical(&entry.en_ref))
                                .or_default()
                                .push(entry.clone());
                            self.out
                                .refs_by_canonical
                                .entry(canonical(&entry.he_ref))
                                .or_default()
                                .push(entry);
                        }
                    }
                }
            }
            SchemaNodeKind::JaggedArray | SchemaNodeKind::ArrayMap => {
                let mut refs = Vec::new();
                self.walk_jagged(node, text, en_path, he_path, level, node.depth.max(1), &mut refs);
            }
        }
    }

    fn walk_jagged(
        &mut self,
        node: &SchemaNodeSpec,
        value: &Value,
        en_path: &[String],
        he_path: &[String],
        level: usize,
        depth_remaining: usize,
        refs: &mut Vec<u32>,
    ) {
        match value {
            Value::Array(items) if depth_remaining > 1 => {
                let name_idx = node.depth - depth_remaining;
                for (i, item) in items.iter().enumerate() {
                    if item_is_empty(item) {
                        continue;
                    }
                    refs.push(i as u32 + 1);
                    let name = node
                        .he_section_names
                        .get(name_idx)
                        .or_else(|| node.section_names.get(name_idx))
                        .map(String::as_str)
                        .unwrap_or("");
                    let heading = if name.is_empty() {
                        to_gematria(i as u32 + 1)
                    } else {
                        format!("{} {}", name, to_gematria(i as u32 + 1))
                    };
                    self.emit_heading(&heading, level);
                    self.walk_jagged(
                        node,
                        item,
                        en_path,
                        he_path,
                        level + 1,
                        depth_remaining - 1,
                        refs,
                    );
                    refs.pop();
                }
            }
            Value::Array(items) => {
                let leaf_level = node.depth.saturating_sub(1);
                let prefix_leaf = node
                    .referenceable_sections
                    .get(leaf_level)
                    .copied()
                    .unwrap_or(false);
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::String(s) if !s.trim().is_empty() => {
                            refs.push(i as u32 + 1);
                            self.emit_leaf(s.trim(), en_path, he_path, refs, prefix_leaf);
                            refs.pop();
                        }
                        // Deeper nesting than the declared depth: descend
                        // without adding a reference level.
                        Value::Array(_) => {
                            refs.push(i as u32 + 1);
                            self.walk_jagged(node, item, en_path, he_path, level, 1, refs);
                            refs.pop();
                        }
                        _ => {}
                    }
                }
            }
            Value::String(s) if !s.trim().is_empty() => {
                refs.push(1);
                self.emit_leaf(s.trim(), en_path, he_path, refs, false);
                refs.pop();
            }
            _ => {}
        }
    }
}

fn item_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.iter().all(item_is_empty),
        _ => false,
    }
}

fn join_ref(title: &str, path: &[String], refs: &str) -> String {
    let mut out = String::from(title);
    for segment in path {
        out.push_str(", ");
        out.push_str(segment);
    }
    if !refs.is_empty() {
        out.push(' ');
        out.push_str(refs);
    }
    out
}

fn format_refs_en(refs: &[u32]) -> String {
    refs.iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(":")
}

fn format_refs_he(refs: &[u32]) -> String {
    refs.iter()
        .map(|&n| to_gematria(n))
        .collect::<Vec<_>>()
        .join(":")
}

/// Flatten one book: walk the text tree, then wire up TOC parents, derived
/// flags, and the line-to-TOC mapping.
pub fn flatten_book(schema: &BookSchemaFile, text: &Value) -> Result<FlattenedBook, SchemaError> {
    schema.validate()?;

    let mut walker = Walker {
        en_title: &schema.title,
        he_title: if schema.he_title.is_empty() {
            &schema.title
        } else {
            &schema.he_title
        },
        out: FlattenedBook {
            multi_section: schema.is_multi_section(),
            ..Default::default()
        },
    };
    walker.walk_node(&schema.schema, text, &[], &[], 1);
    let mut out = walker.out;

    if out.lines.is_empty() {
        return Err(SchemaError::ShapeMismatch(schema.title.clone()));
    }

    wire_toc(&mut out);
    Ok(out)
}

/// Attach TOC parents with a level stack, derive `has_children` and
/// `is_last_child`, and map every content line to the most recent entry.
fn wire_toc(out: &mut FlattenedBook) {
    // Pass 1: parents via a stack of (level, draft index) in file order.
    let mut stack: Vec<(i64, usize)> = Vec::new();
    for idx in 0..out.toc.len() {
        let level = out.toc[idx].level;
        while let Some(&(top_level, _)) = stack.last() {
            if top_level >= level {
                stack.pop();
            } else {
                break;
            }
        }
        out.toc[idx].parent = stack.last().map(|&(_, i)| i);
        stack.push((level, idx));
    }

    // Pass 2: derived flags. The maximum-order sibling per parent group is
    // the last child.
    let mut last_child_of: HashMap<Option<usize>, usize> = HashMap::new();
    for idx in 0..out.toc.len() {
        if let Some(parent) = out.toc[idx].parent {
            out.toc[parent].has_children = true;
        }
        last_child_of.insert(out.toc[idx].parent, idx);
    }
    for (_, idx) in last_child_of {
        out.toc[idx].is_last_child = true;
    }

    // Pass 3: each content line maps to the most recent TOC entry whose
    // position is at or before it.
    let mut positions: Vec<(usize, usize)> = out
        .toc
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.line_index.map(|line| (line, i)))
        .collect();
    positions.sort();

    for (line_idx, line) in out.lines.iter().enumerate() {
        if line.is_heading() {
            continue;
        }
        let governing = positions
            .iter()
            .take_while(|&&(pos, _)| pos <= line_idx)
            .last()
            .map(|&(_, toc_idx)| toc_idx);
        if let Some(toc_idx) = governing {
            out.line_toc.push((line_idx, toc_idx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn simple_schema(depth: usize) -> BookSchemaFile {
        BookSchemaFile {
            title: "Genesis".to_string(),
            he_title: "בראשית".to_string(),
            categories: vec!["Tanakh".to_string(), "Torah".to_string()],
            he_categories: vec![],
            schema: SchemaNodeSpec {
                node_type: Some("JaggedArrayNode".to_string()),
                depth,
                section_names: vec!["Chapter".to_string(), "Verse".to_string()],
                he_section_names: vec!["פרק".to_string(), "פסוק".to_string()],
                address_types: vec!["Perek".to_string(), "Pasuk".to_string()],
                ..Default::default()
            },
        }
    }

    /// Tur-shaped schema: one section with an Introduction node of depth 1
    /// followed by a default node of depth 2.
    fn sectioned_schema(sections: &[&str]) -> BookSchemaFile {
        let section_nodes: Vec<SchemaNodeSpec> = sections
            .iter()
            .map(|name| SchemaNodeSpec {
                node_type: Some("SchemaNode".to_string()),
                key: Some(name.to_string()),
                title: Some(name.to_string()),
                he_title: Some(name.to_string()),
                nodes: vec![
                    SchemaNodeSpec {
                        node_type: Some("JaggedArrayNode".to_string()),
                        key: Some("Introduction".to_string()),
                        title: Some("Introduction".to_string()),
                        he_title: Some("הקדמה".to_string()),
                        depth: 1,
                        section_names: vec!["Paragraph".to_string()],
                        he_section_names: vec!["פסקה".to_string()],
                        ..Default::default()
                    },
                    SchemaNodeSpec {
                        node_type: Some("JaggedArrayNode".to_string()),
                        default: true,
                        depth: 2,
                        section_names: vec!["Siman".to_string(), "Seif".to_string()],
                        he_section_names: vec!["סימן".to_string(), "סעיף".to_string()],
                        ..Default::default()
                    },
                ],
                ..Default::default()
            })
            .collect();

        BookSchemaFile {
            title: "Tur".to_string(),
            he_title: "טור".to_string(),
            categories: vec!["Halakhah".to_string()],
            he_categories: vec![],
            schema: SchemaNodeSpec {
                node_type: Some("SchemaNode".to_string()),
                nodes: section_nodes,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_flat_book_lines_and_refs() {
        let schema = simple_schema(2);
        let text = json!([["בראשית ברא", "והארץ היתה"], ["ויכלו השמים"]]);
        let flat = flatten_book(&schema, &text).unwrap();

        // Two chapter headings plus three verses.
        assert_eq!(flat.lines.len(), 5);
        assert!(flat.lines[0].is_heading());
        assert_eq!(flat.lines[0].content, "<h1>פרק א</h1>");
        assert_eq!(flat.lines[1].en_ref.as_deref(), Some("Genesis 1:1"));
        assert_eq!(flat.lines[2].en_ref.as_deref(), Some("Genesis 1:2"));
        assert!(flat.lines[3].is_heading());
        assert_eq!(flat.lines[4].en_ref.as_deref(), Some("Genesis 2:1"));
        assert_eq!(flat.lines[4].he_ref.as_deref(), Some("בראשית ב:א"));
        assert!(!flat.multi_section);
    }

    #[test]
    fn test_headings_have_no_refs() {
        let schema = simple_schema(2);
        let text = json!([["a"]]);
        let flat = flatten_book(&schema, &text).unwrap();
        assert!(flat.lines[0].is_heading());
        assert!(flat.lines[0].en_ref.is_none());
        assert!(flat.lines[0].he_ref.is_none());
    }

    #[test]
    fn test_empty_strings_skipped_but_numbering_kept() {
        let schema = simple_schema(2);
        let text = json!([["", "שני", ""], ["שלישי"]]);
        let flat = flatten_book(&schema, &text).unwrap();
        // Empty verses disappear but the surviving verse keeps index 2.
        assert_eq!(flat.lines[1].en_ref.as_deref(), Some("Genesis 1:2"));
    }

    #[test]
    fn test_ref_lookup_maps() {
        let schema = simple_schema(2);
        let text = json!([["בראשית ברא"]]);
        let flat = flatten_book(&schema, &text).unwrap();

        let entries = flat.refs_by_canonical.get("genesis 1:1").unwrap();
        assert_eq!(entries.len(), 1);
        // 1-based over the whole line sequence: heading is line 1.
        assert_eq!(entries[0].line_index, 2);
        assert!(flat.refs_by_base.contains_key("genesis"));
    }

    #[test]
    fn test_sectioned_book_intro_first() {
        let schema = sectioned_schema(&["Orach Chayim"]);
        let text = json!({
            "Orach Chayim": {
                "Introduction": ["פתיחה ראשונה", "פתיחה שניה"],
                "default": [["סימן א סעיף א"], ["סימן ב סעיף א"]]
            }
        });
        let flat = flatten_book(&schema, &text).unwrap();

        // Named nodes contribute TOC entries, not lines: the first
        // introduction paragraph is line index 0.
        assert_eq!(
            flat.lines[0].en_ref.as_deref(),
            Some("Tur, Orach Chayim, Introduction 1")
        );
        assert_eq!(flat.lines[1].en_ref.as_deref(), Some("Tur, Orach Chayim, Introduction 2"));

        // The first siman's content sits after the intro lines and the
        // siman heading.
        let first_siman = flat
            .lines
            .iter()
            .position(|l| l.en_ref.as_deref() == Some("Tur, Orach Chayim 1:1"))
            .unwrap();
        assert!(first_siman > 2);
        assert!(flat.lines[first_siman - 1].is_heading());
    }

    #[test]
    fn test_multi_section_flag() {
        let schema = sectioned_schema(&["Orach Chayim", "Yoreh Deah"]);
        assert!(schema.is_multi_section());
        let schema = sectioned_schema(&["Orach Chayim"]);
        assert!(!schema.is_multi_section());
    }

    #[test]
    fn test_multi_section_refs_stay_distinct() {
        let schema = sectioned_schema(&["Orach Chayim", "Yoreh Deah"]);
        let text = json!({
            "Orach Chayim": {
                "Introduction": ["פתיחה"],
                "default": [["תוכן או"]]
            },
            "Yoreh Deah": {
                "Introduction": ["פתיחה"],
                "default": [["תוכן יד"]]
            }
        });
        let flat = flatten_book(&schema, &text).unwrap();
        let oc = &flat.refs_by_canonical["tur orach chayim 1:1"];
        let yd = &flat.refs_by_canonical["tur yoreh deah 1:1"];
        assert_ne!(oc[0].line_index, yd[0].line_index);
    }

    #[test]
    fn test_toc_structure() {
        let schema = simple_schema(2);
        let text = json!([["a", "b"], ["c"]]);
        let flat = flatten_book(&schema, &text).unwrap();

        assert_eq!(flat.toc.len(), 2);
        assert!(flat.toc.iter().all(|t| t.parent.is_none()));
        assert!(!flat.toc[0].is_last_child);
        assert!(flat.toc[1].is_last_child);

        // Verses a and b map to chapter 1, c to chapter 2.
        assert_eq!(flat.line_toc.len(), 3);
        assert_eq!(flat.line_toc[0], (1, 0));
        assert_eq!(flat.line_toc[1], (2, 0));
        assert_eq!(flat.line_toc[2], (4, 1));
    }

    #[test]
    fn test_nested_toc_parents() {
        let schema = sectioned_schema(&["Orach Chayim"]);
        let text = json!({
            "Orach Chayim": {
                "Introduction": ["פתיחה"],
                "default": [["תוכן"]]
            }
        });
        let flat = flatten_book(&schema, &text).unwrap();

        // Section node, introduction node, then the siman heading.
        let section = flat.toc.iter().position(|t| t.text == "Orach Chayim").unwrap();
        let intro = flat.toc.iter().position(|t| t.text == "הקדמה").unwrap();
        assert_eq!(flat.toc[intro].parent, Some(section));
        assert!(flat.toc[section].has_children);
    }

    #[test]
    fn test_referenceable_leaf_prefix() {
        let mut schema = simple_schema(2);
        schema.schema.referenceable_sections = vec![false, true];
        let text = json!([["בראשית ברא"]]);
        let flat = flatten_book(&schema, &text).unwrap();
        assert_eq!(flat.lines[1].content, "(א) בראשית ברא");
    }

    #[test]
    fn test_malformed_schema_rejected() {
        let mut schema = simple_schema(2);
        schema.schema.depth = 0;
        assert!(matches!(
            flatten_book(&schema, &json!([["a"]])),
            Err(SchemaError::EmptySchema(_))
        ));

        let mut schema = simple_schema(2);
        schema.schema.section_names = vec!["Chapter".to_string()];
        assert!(matches!(
            flatten_book(&schema, &json!([["a"]])),
            Err(SchemaError::SectionNamesMismatch(_, _))
        ));
    }

    #[test]
    fn test_empty_text_rejected() {
        let schema = simple_schema(2);
        assert!(flatten_book(&schema, &json!([])).is_err());
    }
}
