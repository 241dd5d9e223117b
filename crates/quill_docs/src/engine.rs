//! Keyword substitution across the runs of a paragraph.
//!
//! A paragraph's runs are concatenated into one string together with a map
//! from every byte to the run it came from. Keywords are matched against the
//! concatenated text, so a keyword that Word fragmented across several runs
//! is still found. On rebuild, surviving characters stay in their own run and
//! each inserted value goes to the run holding the keyword's first character.

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::rules::RuleSet;
use crate::text::{FLEXIBLE_SPACE_CLASS, clean_keyword};
use crate::xml::{XmlElement, XmlNode};

// ---------------------------------------------------------------------------
// KeywordMatcher
// ---------------------------------------------------------------------------

/// All keywords of a [`RuleSet`] compiled into one regex.
///
/// Alternatives are ordered longest keyword first, so among keywords matching
/// at the same position the longest wins. Matching is leftmost and
/// non-overlapping; inserted values are never scanned again.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    regex: Option<Regex>,
    /// Capture group `i + 1` belongs to rule `rule_of_group[i]`.
    rule_of_group: Vec<usize>,
    rule_count: usize,
}

impl KeywordMatcher {
    pub fn compile(rules: &RuleSet) -> Result<Self> {
        let mut keyed: Vec<(usize, String)> = rules
            .rules()
            .iter()
            .enumerate()
            .map(|(i, rule)| (i, clean_keyword(&rule.keyword)))
            .filter(|(_, kw)| !kw.is_empty())
            .collect();
        keyed.sort_by(|a, b| b.1.chars().count().cmp(&a.1.chars().count()));

        let regex = if keyed.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = keyed
                .iter()
                .map(|(_, kw)| format!("({})", keyword_pattern(kw)))
                .collect();
            let pattern = alternatives.join("|");
            Some(Regex::new(&pattern).context("Failed to compile keyword pattern")?)
        };

        Ok(Self {
            regex,
            rule_of_group: keyed.into_iter().map(|(i, _)| i).collect(),
            rule_count: rules.len(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.regex.is_none()
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// Count keyword occurrences per rule in `text`.
    pub fn count(&self, text: &str) -> Vec<usize> {
        let mut counts = vec![0; self.rule_count];
        if let Some(regex) = &self.regex {
            for caps in regex.captures_iter(text) {
                if let Some(rule) = self.matched_rule(&caps) {
                    counts[rule] += 1;
                }
            }
        }
        counts
    }

    /// Substitute keywords in a paragraph given as run texts.
    ///
    /// `values[i]` is the replacement for rule `i`. Returns `None` when no
    /// keyword matched; otherwise the new text of every run plus per-rule
    /// occurrence counts.
    pub fn substitute(&self, runs: &[String], values: &[String]) -> Option<RunRewrite> {
        let regex = self.regex.as_ref()?;

        let mut text = String::new();
        let mut owner: Vec<usize> = Vec::new();
        for (i, run) in runs.iter().enumerate() {
            text.push_str(run);
            owner.extend(std::iter::repeat_n(i, run.len()));
        }

        let mut texts = vec![String::new(); runs.len()];
        let mut counts = vec![0; self.rule_count];
        let mut cursor = 0;
        let mut matched = false;

        for caps in regex.captures_iter(&text) {
            let (Some(whole), Some(rule)) = (caps.get(0), self.matched_rule(&caps)) else {
                continue;
            };
            copy_original(&text, &owner, cursor, whole.start(), &mut texts);
            let value = values.get(rule).map(String::as_str).unwrap_or_default();
            texts[owner[whole.start()]].push_str(value);
            counts[rule] += 1;
            cursor = whole.end();
            matched = true;
        }

        if !matched {
            return None;
        }
        copy_original(&text, &owner, cursor, text.len(), &mut texts);

        Some(RunRewrite { texts, counts })
    }

    fn matched_rule(&self, caps: &regex::Captures<'_>) -> Option<usize> {
        (1..caps.len())
            .find(|&group| caps.get(group).is_some())
            .and_then(|group| self.rule_of_group.get(group - 1).copied())
    }
}

/// Escape a cleaned keyword; each single space matches any whitespace run.
fn keyword_pattern(keyword: &str) -> String {
    keyword
        .split(' ')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(FLEXIBLE_SPACE_CLASS)
}

/// Append `text[start..end]` to the runs that originally owned each byte.
fn copy_original(text: &str, owner: &[usize], start: usize, end: usize, texts: &mut [String]) {
    let mut seg_start = start;
    while seg_start < end {
        let run = owner[seg_start];
        let mut seg_end = seg_start;
        while seg_end < end && owner[seg_end] == run {
            seg_end += 1;
        }
        texts[run].push_str(&text[seg_start..seg_end]);
        seg_start = seg_end;
    }
}

/// Result of substituting one paragraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRewrite {
    pub texts: Vec<String>,
    pub counts: Vec<usize>,
}

// ---------------------------------------------------------------------------
// ReplaceStats
// ---------------------------------------------------------------------------

/// Per-rule replacement counts for one rendered document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceStats {
    pub counts: Vec<usize>,
}

impl ReplaceStats {
    pub fn new(rule_count: usize) -> Self {
        Self {
            counts: vec![0; rule_count],
        }
    }

    pub fn add(&mut self, counts: &[usize]) {
        if self.counts.len() < counts.len() {
            self.counts.resize(counts.len(), 0);
        }
        for (total, n) in self.counts.iter_mut().zip(counts) {
            *total += n;
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Human-readable summary: `keyword -> value (n×)` per matched rule.
    pub fn describe(&self, rules: &RuleSet, values: &[String]) -> String {
        let lines: Vec<String> = rules
            .rules()
            .iter()
            .zip(&self.counts)
            .enumerate()
            .filter(|(_, (_, n))| **n > 0)
            .map(|(i, (rule, n))| {
                let value = values.get(i).map(String::as_str).unwrap_or_default();
                format!("{} -> {} ({n}×)", rule.keyword, value)
            })
            .collect();
        if lines.is_empty() {
            "no keywords found".to_string()
        } else {
            lines.join("; ")
        }
    }
}

// ---------------------------------------------------------------------------
// WordprocessingML story rewriting
// ---------------------------------------------------------------------------

/// Qualified element names for the WordprocessingML prefix used by a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordNames {
    pub prefix: String,
    pub p: String,
    pub r: String,
    pub t: String,
    pub rpr: String,
    pub tbl: String,
    pub tr: String,
    pub tc: String,
    pub body: String,
}

const WML_NAMESPACE: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

impl WordNames {
    pub fn with_prefix(prefix: &str) -> Self {
        let q = |local: &str| {
            if prefix.is_empty() {
                local.to_string()
            } else {
                format!("{prefix}:{local}")
            }
        };
        Self {
            prefix: prefix.to_string(),
            p: q("p"),
            r: q("r"),
            t: q("t"),
            rpr: q("rPr"),
            tbl: q("tbl"),
            tr: q("tr"),
            tc: q("tc"),
            body: q("body"),
        }
    }

    /// Qualify any WordprocessingML local name, e.g. `val` -> `w:val`.
    pub fn qualify(&self, local: &str) -> String {
        if self.prefix.is_empty() {
            local.to_string()
        } else {
            format!("{}:{local}", self.prefix)
        }
    }

    /// Names for the prefix the root element binds to the main namespace,
    /// falling back to `w`.
    pub fn for_root(root: &XmlElement) -> Self {
        let prefix = root
            .attributes
            .iter()
            .find(|(_, v)| v == WML_NAMESPACE)
            .map(|(k, _)| k.strip_prefix("xmlns:").unwrap_or(""))
            .unwrap_or("w");
        Self::with_prefix(prefix)
    }
}

/// Split every run that holds text next to other content (`w:t`, `w:tab`,
/// `w:t`, ...) into one run per content element, each with a copy of the run
/// properties. Afterwards a text-bearing run holds exactly one `w:t`.
pub fn normalize_runs(el: &mut XmlElement, names: &WordNames) {
    for child in el.elements_mut() {
        normalize_runs(child, names);
    }
    let any_split = el.elements().any(|child| needs_split(child, names));
    if !any_split {
        return;
    }

    let children = std::mem::take(&mut el.children);
    for node in children {
        match node {
            XmlNode::Element(run) if needs_split(&run, names) => {
                el.children.extend(split_run(run, names).into_iter().map(XmlNode::Element));
            }
            other => el.children.push(other),
        }
    }
}

fn needs_split(el: &XmlElement, names: &WordNames) -> bool {
    if el.name != names.r {
        return false;
    }
    let content: Vec<&XmlElement> = el.elements().filter(|c| c.name != names.rpr).collect();
    content.len() > 1 && content.iter().any(|c| c.name == names.t)
}

fn split_run(run: XmlElement, names: &WordNames) -> Vec<XmlElement> {
    let props = run.child(&names.rpr).cloned();
    let XmlElement {
        name,
        attributes,
        children,
    } = run;
    children
        .into_iter()
        .filter_map(|node| match node {
            XmlNode::Element(content) if content.name != names.rpr => Some(content),
            _ => None,
        })
        .map(|content| {
            let mut piece = XmlElement::new(name.clone());
            piece.attributes = attributes.clone();
            if let Some(props) = &props {
                piece.children.push(XmlNode::Element(props.clone()));
            }
            piece.children.push(XmlNode::Element(content));
            piece
        })
        .collect()
}

/// Text of a run: its `w:t` children concatenated.
pub fn run_text(run: &XmlElement, names: &WordNames) -> String {
    run.elements()
        .filter(|c| c.name == names.t)
        .map(XmlElement::text)
        .collect()
}

/// Texts of a paragraph's runs in document order. Descends through wrappers
/// such as hyperlinks and tracked insertions, never into nested paragraphs.
pub fn paragraph_runs(p: &XmlElement, names: &WordNames) -> Vec<String> {
    let mut out = Vec::new();
    collect_run_texts(p, names, &mut out);
    out
}

fn collect_run_texts(el: &XmlElement, names: &WordNames, out: &mut Vec<String>) {
    for child in el.elements() {
        if child.name == names.r {
            out.push(run_text(child, names));
        } else if child.name != names.p {
            collect_run_texts(child, names, out);
        }
    }
}

/// Rewrite every paragraph below `el` (table cells, text boxes and content
/// controls included). Returns true if any paragraph changed.
pub fn rewrite_paragraphs(
    el: &mut XmlElement,
    names: &WordNames,
    matcher: &KeywordMatcher,
    values: &[String],
    stats: &mut ReplaceStats,
) -> bool {
    let mut changed = false;
    if el.name == names.p {
        changed |= rewrite_paragraph(el, names, matcher, values, stats);
    }
    for child in el.elements_mut() {
        changed |= rewrite_paragraphs(child, names, matcher, values, stats);
    }
    changed
}

fn rewrite_paragraph(
    p: &mut XmlElement,
    names: &WordNames,
    matcher: &KeywordMatcher,
    values: &[String],
    stats: &mut ReplaceStats,
) -> bool {
    let original = paragraph_runs(p, names);
    let Some(rewrite) = matcher.substitute(&original, values) else {
        return false;
    };
    stats.add(&rewrite.counts);
    debug!(
        "Paragraph rewritten: {:?} -> {:?}",
        original.concat(),
        rewrite.texts.concat()
    );

    let mut cursor = 0;
    apply_run_texts(p, names, &original, &rewrite.texts, &mut cursor);
    true
}

fn apply_run_texts(
    el: &mut XmlElement,
    names: &WordNames,
    original: &[String],
    texts: &[String],
    cursor: &mut usize,
) {
    let mut keep = Vec::with_capacity(el.children.len());
    for node in el.children.iter_mut() {
        let mut retain = true;
        if let XmlNode::Element(child) = node {
            if child.name == names.r {
                let i = *cursor;
                *cursor += 1;
                if let (Some(old), Some(new)) = (original.get(i), texts.get(i)) {
                    if old != new {
                        if new.is_empty() && is_text_only_run(child, names) {
                            retain = false;
                        } else {
                            set_run_text(child, names, new);
                        }
                    }
                }
            } else if child.name != names.p {
                apply_run_texts(child, names, original, texts, cursor);
            }
        }
        keep.push(retain);
    }
    let mut flags = keep.into_iter();
    el.children.retain(|_| flags.next().unwrap_or(true));
}

fn is_text_only_run(run: &XmlElement, names: &WordNames) -> bool {
    run.elements().all(|c| c.name == names.rpr || c.name == names.t)
}

/// Replace the run's text. Line breaks and tabs in `text` become `w:br` and
/// `w:tab` siblings of the text pieces, as Word itself stores them.
fn set_run_text(run: &mut XmlElement, names: &WordNames, text: &str) {
    let mut pieces = Some(text_content(names, text));
    let children = std::mem::take(&mut run.children);
    for node in children {
        match node {
            XmlNode::Element(child) if child.name == names.t => {
                if let Some(pieces) = pieces.take() {
                    run.children.extend(pieces.into_iter().map(XmlNode::Element));
                }
            }
            other => run.children.push(other),
        }
    }
}

/// `w:t`, `w:br` and `w:tab` elements spelling out `text`. `\r\n` is one
/// break.
fn text_content(names: &WordNames, text: &str) -> Vec<XmlElement> {
    let mut out = Vec::new();
    let mut segment = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let control = match c {
            '\t' => "tab",
            '\n' => "br",
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                "br"
            }
            _ => {
                segment.push(c);
                continue;
            }
        };
        if !segment.is_empty() {
            out.push(text_element(names, &std::mem::take(&mut segment)));
        }
        out.push(XmlElement::new(names.qualify(control)));
    }
    if !segment.is_empty() || out.is_empty() {
        out.push(text_element(names, &segment));
    }
    out
}

fn text_element(names: &WordNames, text: &str) -> XmlElement {
    let mut t = XmlElement::new(names.t.clone());
    t.set_text(text);
    if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
        t.set_attr("xml:space", "preserve");
    }
    t
}
