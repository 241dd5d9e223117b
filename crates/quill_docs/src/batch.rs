use anyhow::Result;
use quill_core::QuillError;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{info, warn};

use crate::docx::Template;
use crate::engine::{KeywordMatcher, ReplaceStats};
use crate::rules::RuleSet;
use crate::sheet::{DataRow, DataTable};
use crate::text::{clean_filename, clean_text};

// ---------------------------------------------------------------------------
// Row selection
// ---------------------------------------------------------------------------

/// Which data rows to render. Row numbers are 1-based.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RowSelection {
    #[default]
    All,
    /// Inclusive range, clamped to the table.
    Range { start: usize, end: usize },
    Indices(Vec<usize>),
}

impl FromStr for RowSelection {
    type Err = QuillError;

    /// Accepts `all`, `A-B`, `A-` (to the end) or `1,3,5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        let number = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| QuillError::InvalidSelection(format!("\"{part}\" is not a row number")))
        };
        if let Some((start, end)) = s.split_once('-') {
            let start = number(start)?;
            let end = if end.trim().is_empty() {
                usize::MAX
            } else {
                number(end)?
            };
            return Ok(Self::Range { start, end });
        }
        let indices = s.split(',').map(number).collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Indices(indices))
    }
}

impl RowSelection {
    /// 0-based row indices into a table of `len` rows, in processing order.
    pub fn resolve(&self, len: usize) -> Result<Vec<usize>> {
        match self {
            Self::All => Ok((0..len).collect()),
            Self::Range { start, end } => {
                if *start == 0 {
                    return Err(QuillError::InvalidSelection("rows start at 1".into()).into());
                }
                if start > end {
                    return Err(QuillError::InvalidSelection(format!(
                        "start row {start} is after end row {end}"
                    ))
                    .into());
                }
                if *start > len {
                    return Err(QuillError::InvalidSelection(format!(
                        "start row {start} is past the last row {len}"
                    ))
                    .into());
                }
                let end = (*end).min(len);
                Ok((start - 1..end).collect())
            }
            Self::Indices(rows) => {
                let mut seen = HashSet::new();
                let mut out = Vec::with_capacity(rows.len());
                for &row in rows {
                    if row == 0 || row > len {
                        return Err(QuillError::InvalidSelection(format!(
                            "row {row} is outside 1..={len}"
                        ))
                        .into());
                    }
                    if seen.insert(row) {
                        out.push(row - 1);
                    }
                }
                Ok(out)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// File naming
// ---------------------------------------------------------------------------

/// How output file names are built: `prefix + stem + suffix + ".docx"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePolicy {
    /// Column whose cell supplies the stem.
    pub column: Option<String>,
    pub prefix: String,
    pub suffix: String,
    /// Stem used as `<fallback_stem>_<row number>` when the column is unset,
    /// missing or blank.
    pub fallback_stem: String,
}

impl Default for FilenamePolicy {
    fn default() -> Self {
        Self {
            column: None,
            prefix: String::new(),
            suffix: String::new(),
            fallback_stem: "result".into(),
        }
    }
}

impl FilenamePolicy {
    pub fn stem(&self, row: &DataRow<'_>) -> String {
        self.column
            .as_deref()
            .and_then(|column| row.get(column))
            .map(clean_text)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("{}_{}", self.fallback_stem, row.number()))
    }

    pub fn filename(&self, row: &DataRow<'_>) -> String {
        clean_filename(&format!(
            "{}{}{}.docx",
            self.prefix,
            self.stem(row),
            self.suffix
        ))
    }
}

/// Hands out unique file names, appending `_2`, `_3`, ... to repeats.
/// Names are compared case-insensitively.
#[derive(Debug, Default)]
pub struct NameRegistry {
    taken: HashSet<String>,
}

impl NameRegistry {
    pub fn claim(&mut self, filename: &str) -> String {
        if self.taken.insert(filename.to_lowercase()) {
            return filename.to_string();
        }
        let (stem, ext) = match filename.rfind('.') {
            Some(dot) if dot > 0 => filename.split_at(dot),
            _ => (filename, ""),
        };
        let mut n = 2;
        loop {
            let candidate = format!("{stem}_{n}{ext}");
            if self.taken.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub selection: RowSelection,
    pub naming: FilenamePolicy,
}

#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// 0-based index of the source row.
    pub row_index: usize,
    pub stats: ReplaceStats,
    /// One-line description of the substitutions.
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Rendered {
        row: usize,
        filename: String,
        log: String,
    },
    Failed {
        row: usize,
        error: String,
    },
}

impl RowOutcome {
    /// 1-based row number.
    pub fn row(&self) -> usize {
        match self {
            Self::Rendered { row, .. } | Self::Failed { row, .. } => *row,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<RowOutcome>,
}

impl BatchReport {
    pub fn rendered_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RowOutcome::Rendered { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.rendered_count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub documents: Vec<RenderedDocument>,
    pub report: BatchReport,
}

/// Render every selected row of `table` through `template`.
///
/// Bad selections and bad rules stop the batch before any row is rendered.
/// A row that fails is logged and recorded in the report; the rest still run.
pub fn run_batch(
    template: &Template,
    rules: &RuleSet,
    table: &DataTable,
    options: &BatchOptions,
) -> Result<BatchOutput> {
    let indices = options.selection.resolve(table.len())?;
    let matcher = KeywordMatcher::compile(rules)?;

    let missing = rules.missing_columns(table.columns());
    if !missing.is_empty() {
        warn!("Columns not found in data: {}", missing.join(", "));
    }
    if let Some(column) = &options.naming.column {
        if table.column_index(column).is_none() {
            warn!("Name column \"{column}\" not found; using fallback names");
        }
    }
    info!(
        "Merging {} of {} rows with {} rules ({} scope)",
        indices.len(),
        table.len(),
        rules.len(),
        rules.scope()
    );

    let mut names = NameRegistry::default();
    let mut output = BatchOutput::default();

    for index in indices {
        let Some(row) = table.row(index) else {
            continue;
        };
        match render_row(template, rules, &matcher, &row) {
            Ok((bytes, stats, log)) => {
                let filename = names.claim(&options.naming.filename(&row));
                info!("Row {}: {} ({})", row.number(), filename, log);
                output.report.outcomes.push(RowOutcome::Rendered {
                    row: row.number(),
                    filename: filename.clone(),
                    log: log.clone(),
                });
                output.documents.push(RenderedDocument {
                    filename,
                    bytes,
                    row_index: index,
                    stats,
                    log,
                });
            }
            Err(e) => {
                warn!("Row {} failed: {e:#}", row.number());
                output.report.outcomes.push(RowOutcome::Failed {
                    row: row.number(),
                    error: format!("{e:#}"),
                });
            }
        }
    }

    info!(
        "Batch finished: {} rendered, {} failed",
        output.report.rendered_count(),
        output.report.failed_count()
    );
    Ok(output)
}

fn render_row(
    template: &Template,
    rules: &RuleSet,
    matcher: &KeywordMatcher,
    row: &DataRow<'_>,
) -> Result<(Vec<u8>, ReplaceStats, String)> {
    let values = rules.values_for(row)?;
    let rendered = template.render_values(matcher, values)?;
    let log = rendered.stats.describe(rules, &rendered.values);
    Ok((rendered.bytes, rendered.stats, log))
}
