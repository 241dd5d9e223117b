//! `.docx` templates: the package is kept part-for-part and only the story
//! parts (document body, headers, footers) are parsed for substitution.

use anyhow::{Context, Result};
use quill_core::QuillError;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::engine::{
    KeywordMatcher, ReplaceStats, WordNames, normalize_runs, paragraph_runs, rewrite_paragraphs,
    run_text,
};
use crate::rules::RuleSet;
use crate::sheet::DataRow;
use crate::xml::{XmlDocument, XmlElement};

const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Clone, Copy)]
pub struct TemplateOptions {
    /// Also substitute inside `word/header*.xml` and `word/footer*.xml`.
    pub include_headers_footers: bool,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            include_headers_footers: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryKind {
    Body,
    Header,
    Footer,
}

#[derive(Debug, Clone)]
struct Part {
    name: String,
    data: Vec<u8>,
    compression: CompressionMethod,
}

#[derive(Debug, Clone)]
struct Story {
    part: usize,
    kind: StoryKind,
    names: WordNames,
    doc: XmlDocument,
}

/// A parsed `.docx` package. Immutable once loaded; every render works on
/// its own copy of the story trees.
#[derive(Debug, Clone)]
pub struct Template {
    source: Vec<u8>,
    parts: Vec<Part>,
    stories: Vec<Story>,
}

/// Output of rendering one row.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub stats: ReplaceStats,
    /// Replacement value per rule, as substituted.
    pub values: Vec<String>,
    /// False when no keyword matched and `bytes` is the template itself.
    pub changed: bool,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Template {
    pub fn open(path: &Path, options: TemplateOptions) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read template: {}", path.display()))?;
        let template = Self::from_bytes_with(bytes, options)?;
        info!(
            "Loaded template {} ({} parts, {} stories)",
            path.display(),
            template.parts.len(),
            template.stories.len()
        );
        Ok(template)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with(bytes, TemplateOptions::default())
    }

    pub fn from_bytes_with(bytes: Vec<u8>, options: TemplateOptions) -> Result<Self> {
        let parts = read_parts(&bytes)?;

        let mut stories = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            let Some(kind) = story_kind(&part.name, options) else {
                continue;
            };
            let mut doc = XmlDocument::parse(&part.data)
                .map_err(|e| QuillError::MalformedTemplate(format!("{}: {e:#}", part.name)))?;
            let Some(root) = doc.root_mut() else {
                continue;
            };
            let names = WordNames::for_root(root);
            normalize_runs(root, &names);
            debug!("Parsed story part {} ({:?})", part.name, kind);
            stories.push(Story {
                part: index,
                kind,
                names,
                doc,
            });
        }

        if !stories.iter().any(|s| s.kind == StoryKind::Body) {
            return Err(QuillError::MalformedTemplate(format!("missing {DOCUMENT_PART}")).into());
        }
        // Body first so previews and keyword counts read in document order.
        stories.sort_by_key(|s| s.kind != StoryKind::Body);

        Ok(Self {
            source: bytes,
            parts,
            stories,
        })
    }

    /// Names of the parts that are searched for keywords.
    pub fn story_parts(&self) -> Vec<(&str, StoryKind)> {
        self.stories
            .iter()
            .map(|s| (self.parts[s.part].name.as_str(), s.kind))
            .collect()
    }
}

fn read_parts(bytes: &[u8]) -> Result<Vec<Part>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| QuillError::MalformedTemplate(format!("not a docx package: {e}")))?;

    let mut parts = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| QuillError::MalformedTemplate(format!("zip entry {i}: {e}")))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let compression = match file.compression() {
            CompressionMethod::Stored => CompressionMethod::Stored,
            _ => CompressionMethod::Deflated,
        };
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| QuillError::MalformedTemplate(format!("{name}: {e}")))?;
        parts.push(Part {
            name,
            data,
            compression,
        });
    }
    Ok(parts)
}

fn story_kind(name: &str, options: TemplateOptions) -> Option<StoryKind> {
    if name == DOCUMENT_PART {
        return Some(StoryKind::Body);
    }
    if !options.include_headers_footers {
        return None;
    }
    let file = name.strip_prefix("word/")?;
    if file.contains('/') || !file.ends_with(".xml") {
        return None;
    }
    if file.starts_with("header") {
        Some(StoryKind::Header)
    } else if file.starts_with("footer") {
        Some(StoryKind::Footer)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

impl Template {
    /// Render one data row with `rules`.
    pub fn render(&self, rules: &RuleSet, row: &DataRow<'_>) -> Result<Rendered> {
        let matcher = KeywordMatcher::compile(rules)?;
        let values = rules.values_for(row)?;
        self.render_values(&matcher, values)
    }

    /// Render with a precompiled matcher; `values[i]` replaces rule `i`.
    ///
    /// Only story parts that changed are re-serialized. When nothing matched
    /// the template bytes are returned untouched.
    pub fn render_values(&self, matcher: &KeywordMatcher, values: Vec<String>) -> Result<Rendered> {
        let mut stats = ReplaceStats::new(matcher.rule_count());
        let mut rewritten: Vec<(usize, Vec<u8>)> = Vec::new();

        if !matcher.is_empty() {
            for story in &self.stories {
                let mut doc = story.doc.clone();
                let Some(root) = doc.root_mut() else {
                    continue;
                };
                if rewrite_paragraphs(root, &story.names, matcher, &values, &mut stats) {
                    let part = &self.parts[story.part];
                    let data = doc
                        .to_bytes()
                        .with_context(|| format!("Failed to serialize {}", part.name))?;
                    rewritten.push((story.part, data));
                }
            }
        }

        if rewritten.is_empty() {
            return Ok(Rendered {
                bytes: self.source.clone(),
                stats,
                values,
                changed: false,
            });
        }

        let bytes = self.write_package(&rewritten)?;
        Ok(Rendered {
            bytes,
            stats,
            values,
            changed: true,
        })
    }

    fn write_package(&self, rewritten: &[(usize, Vec<u8>)]) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (index, part) in self.parts.iter().enumerate() {
            let data = rewritten
                .iter()
                .find(|(i, _)| *i == index)
                .map(|(_, data)| data.as_slice())
                .unwrap_or(&part.data);
            let options = SimpleFileOptions::default().compression_method(part.compression);
            zip.start_file(part.name.as_str(), options)
                .with_context(|| format!("Failed to create {}", part.name))?;
            zip.write_all(data)
                .with_context(|| format!("Failed to write {}", part.name))?;
        }
        let cursor = zip.finish().context("Failed to finalize DOCX zip")?;
        Ok(cursor.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunView {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParagraphView {
    pub runs: Vec<RunView>,
}

impl ParagraphView {
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(ParagraphView),
    /// Rows, then cells, then the paragraphs of each cell.
    Table(Vec<Vec<Vec<ParagraphView>>>),
}

impl Template {
    fn body(&self) -> Option<(&XmlElement, &WordNames)> {
        let story = self.stories.iter().find(|s| s.kind == StoryKind::Body)?;
        let body = story.doc.root()?.child(&story.names.body)?;
        Some((body, &story.names))
    }

    /// Top-level paragraphs and tables of the document body.
    pub fn outline(&self) -> Vec<Block> {
        let Some((body, names)) = self.body() else {
            return Vec::new();
        };
        let mut blocks = Vec::new();
        for el in body.elements() {
            if el.name == names.p {
                blocks.push(Block::Paragraph(paragraph_view(el, names)));
            } else if el.name == names.tbl {
                blocks.push(Block::Table(table_view(el, names)));
            }
        }
        blocks
    }

    /// Body text, one line per paragraph (table cells included).
    pub fn plain_text(&self) -> String {
        let Some((body, names)) = self.body() else {
            return String::new();
        };
        let mut paragraphs = Vec::new();
        collect_paragraphs(body, names, &mut paragraphs);
        paragraphs
            .iter()
            .map(|p| paragraph_runs(p, names).concat())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Occurrences of each rule's keyword across all story parts.
    pub fn find_keywords(&self, rules: &RuleSet) -> Result<Vec<usize>> {
        let matcher = KeywordMatcher::compile(rules)?;
        let mut stats = ReplaceStats::new(rules.len());
        for story in &self.stories {
            let Some(root) = story.doc.root() else {
                continue;
            };
            let mut paragraphs = Vec::new();
            collect_paragraphs(root, &story.names, &mut paragraphs);
            for p in paragraphs {
                stats.add(&matcher.count(&paragraph_runs(p, &story.names).concat()));
            }
        }
        Ok(stats.counts)
    }
}

fn collect_paragraphs<'a>(el: &'a XmlElement, names: &WordNames, out: &mut Vec<&'a XmlElement>) {
    for child in el.elements() {
        if child.name == names.p {
            out.push(child);
        }
        collect_paragraphs(child, names, out);
    }
}

fn table_view(tbl: &XmlElement, names: &WordNames) -> Vec<Vec<Vec<ParagraphView>>> {
    tbl.elements()
        .filter(|row| row.name == names.tr)
        .map(|row| {
            row.elements()
                .filter(|cell| cell.name == names.tc)
                .map(|cell| {
                    cell.elements()
                        .filter(|p| p.name == names.p)
                        .map(|p| paragraph_view(p, names))
                        .collect()
                })
                .collect()
        })
        .collect()
}

fn paragraph_view(p: &XmlElement, names: &WordNames) -> ParagraphView {
    let mut runs = Vec::new();
    collect_runs(p, names, &mut runs);
    ParagraphView {
        runs: runs.into_iter().map(|r| run_view(r, names)).collect(),
    }
}

fn collect_runs<'a>(el: &'a XmlElement, names: &WordNames, out: &mut Vec<&'a XmlElement>) {
    for child in el.elements() {
        if child.name == names.r {
            out.push(child);
        } else if child.name != names.p {
            collect_runs(child, names, out);
        }
    }
}

fn run_view(run: &XmlElement, names: &WordNames) -> RunView {
    let text = run_text(run, names);
    let Some(props) = run.child(&names.rpr) else {
        return RunView {
            text,
            ..RunView::default()
        };
    };
    let val = names.qualify("val");
    let toggle = |local: &str| {
        props
            .child(&names.qualify(local))
            .is_some_and(|el| !matches!(el.attr(&val), Some("0" | "false" | "none")))
    };
    let color = props
        .child(&names.qualify("color"))
        .and_then(|el| el.attr(&val))
        .filter(|v| !v.eq_ignore_ascii_case("auto"))
        .map(str::to_string);
    RunView {
        text,
        bold: toggle("b"),
        italic: toggle("i"),
        underline: toggle("u"),
        color,
    }
}
