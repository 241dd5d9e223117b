use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Args};
use quill_core::{QuillConfig, QuillError};
use quill_docs::archive::{pack_zip, write_to_dir};
use quill_docs::report::generate_report_xlsx;
use quill_docs::{
    BatchOptions, Block, DataTable, FilenamePolicy, ParagraphView, ReplaceScope, ReplacementRule,
    RowOutcome, RowSelection, RuleSet, RunView, Template, TemplateOptions, run_batch,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Args)]
pub struct RuleArgs {
    /// Rule file: JSON array of {"keyword", "excel_column"} objects
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Extra rule, repeatable; later rules win on the same keyword
    #[arg(long = "rule", value_name = "KEYWORD=COLUMN")]
    pub rule: Vec<String>,

    /// Replace the whole keyword (full) or only the inside of its brackets
    #[arg(long, value_name = "full|brackets")]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Args)]
#[command(group(ArgGroup::new("output").required(true).args(["out", "out_dir"])))]
pub struct MergeArgs {
    /// Word template (.docx)
    #[arg(long)]
    pub template: PathBuf,

    /// Data file (.xlsx, .xlsm, .xls, .ods, .csv)
    #[arg(long)]
    pub data: PathBuf,

    #[command(flatten)]
    pub rules: RuleArgs,

    /// Rows to render: all, A-B or 1,3,5 (1-based)
    #[arg(long)]
    pub rows: Option<String>,

    /// Column whose value names each output file
    #[arg(long)]
    pub name_column: Option<String>,

    #[arg(long)]
    pub prefix: Option<String>,

    #[arg(long)]
    pub suffix: Option<String>,

    /// Worksheet name (default: first sheet)
    #[arg(long)]
    pub sheet: Option<String>,

    /// Write all documents into one ZIP archive
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Write documents into a directory
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Add report.xlsx with one line per row
    #[arg(long)]
    pub report: bool,

    /// Leave headers and footers untouched
    #[arg(long)]
    pub no_headers_footers: bool,
}

/// Where a merge writes its documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Destination<'a> {
    Zip(&'a Path),
    Dir(&'a Path),
}

impl MergeArgs {
    fn destination(&self) -> Result<Destination<'_>> {
        match (&self.out, &self.out_dir) {
            (Some(path), None) => Ok(Destination::Zip(path)),
            (None, Some(dir)) => Ok(Destination::Dir(dir)),
            _ => bail!("exactly one of --out or --out-dir is required"),
        }
    }
}

/// Build the rule set from a rule file and `--rule` flags, in that order.
pub fn load_rules(args: &RuleArgs, config: &QuillConfig) -> Result<RuleSet> {
    let scope: ReplaceScope = args
        .scope
        .as_deref()
        .unwrap_or(&config.replace_scope)
        .parse()?;
    let mut set = RuleSet::new(scope);

    if let Some(path) = &args.rules {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules: {}", path.display()))?;
        let count = set.import_json(&json)?;
        info!("Imported {count} rules from {}", path.display());
    }
    for spec in &args.rule {
        set.push(ReplacementRule::parse_cli(spec)?)?;
    }
    Ok(set)
}

// ---------------------------------------------------------------------------
// preview
// ---------------------------------------------------------------------------

pub fn preview(path: &Path, out: &mut impl Write) -> Result<()> {
    let template = Template::open(path, TemplateOptions::default())?;
    for block in template.outline() {
        match block {
            Block::Paragraph(p) => writeln!(out, "{}", render_paragraph(&p))?,
            Block::Table(rows) => {
                for row in rows {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|cell| {
                            cell.iter()
                                .map(render_paragraph)
                                .collect::<Vec<_>>()
                                .join(" / ")
                        })
                        .collect();
                    writeln!(out, "| {} |", cells.join(" | "))?;
                }
            }
        }
    }
    Ok(())
}

fn render_paragraph(p: &ParagraphView) -> String {
    p.runs.iter().map(render_run).collect()
}

/// Markdown-like markers: `**bold**`, `*italic*`, `_underline_`,
/// `{#RRGGBB}colored{/}`.
fn render_run(run: &RunView) -> String {
    if run.text.is_empty() {
        return String::new();
    }
    let mut text = run.text.clone();
    if run.underline {
        text = format!("_{text}_");
    }
    if run.italic {
        text = format!("*{text}*");
    }
    if run.bold {
        text = format!("**{text}**");
    }
    if let Some(color) = &run.color {
        text = format!("{{#{color}}}{text}{{/}}");
    }
    text
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

pub fn inspect(
    data: &Path,
    sheet: Option<&str>,
    rows: Option<usize>,
    config: &QuillConfig,
    out: &mut impl Write,
) -> Result<()> {
    let table = DataTable::open(data, sheet)?;
    let limit = rows.unwrap_or(config.preview_rows);

    writeln!(out, "Columns ({}): {}", table.columns().len(), table.columns().join(", "))?;
    writeln!(out, "Rows: {}", table.len())?;
    writeln!(out)?;
    writeln!(out, "#\t{}", table.columns().join("\t"))?;
    for row in table.preview(limit) {
        writeln!(out, "{}\t{}", row.number(), row.values().join("\t"))?;
    }
    if table.len() > limit {
        writeln!(out, "... {} more rows", table.len() - limit)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// rules
// ---------------------------------------------------------------------------

/// Print, per rule, whether its column exists and how often its keyword
/// occurs in the template. Fails when any column is missing.
pub fn rules_check(
    args: &RuleArgs,
    template: &Path,
    data: &Path,
    sheet: Option<&str>,
    config: &QuillConfig,
    out: &mut impl Write,
) -> Result<()> {
    let rules = load_rules(args, config)?;
    let template = Template::open(template, TemplateOptions::default())?;
    let table = DataTable::open(data, sheet)?;

    let counts = template.find_keywords(&rules)?;
    let missing = rules.missing_columns(table.columns());

    writeln!(out, "{} rules ({} scope)", rules.len(), rules.scope())?;
    for (rule, count) in rules.rules().iter().zip(&counts) {
        let column = if missing.contains(&rule.column.as_str()) {
            "MISSING"
        } else {
            "ok"
        };
        writeln!(
            out,
            "  {} -> {}  column: {column}  found: {count}",
            rule.keyword, rule.column
        )?;
    }

    if !missing.is_empty() {
        return Err(QuillError::InvalidRules(format!(
            "columns not found in data: {}",
            missing.join(", ")
        ))
        .into());
    }
    Ok(())
}

pub fn rules_export(
    args: &RuleArgs,
    path: &Path,
    config: &QuillConfig,
    out: &mut impl Write,
) -> Result<()> {
    let rules = load_rules(args, config)?;
    std::fs::write(path, rules.to_json()?)
        .map_err(|e| QuillError::Io(format!("{}: {e}", path.display())))?;
    writeln!(out, "Exported {} rules to {}", rules.len(), path.display())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

pub fn merge(args: &MergeArgs, config: &QuillConfig, out: &mut impl Write) -> Result<()> {
    let destination = args.destination()?;
    let rules = load_rules(&args.rules, config)?;
    if rules.is_empty() {
        warn!("No replacement rules; every document will equal the template");
    }

    let options = TemplateOptions {
        include_headers_footers: config.include_headers_footers && !args.no_headers_footers,
    };
    let template = Template::open(&args.template, options)?;
    let table = DataTable::open(&args.data, args.sheet.as_deref())?;

    let selection = match &args.rows {
        Some(rows) => rows.parse::<RowSelection>()?,
        None => RowSelection::All,
    };
    let batch = BatchOptions {
        selection,
        naming: FilenamePolicy {
            column: args.name_column.clone(),
            prefix: args.prefix.clone().unwrap_or_else(|| config.default_prefix.clone()),
            suffix: args.suffix.clone().unwrap_or_else(|| config.default_suffix.clone()),
            fallback_stem: config.fallback_stem.clone(),
        },
    };

    let output = run_batch(&template, &rules, &table, &batch)?;
    for outcome in &output.report.outcomes {
        match outcome {
            RowOutcome::Rendered { row, filename, log } => {
                writeln!(out, "row {row}: {filename} ({log})")?
            }
            RowOutcome::Failed { row, error } => writeln!(out, "row {row}: FAILED {error}")?,
        }
    }

    let report = if args.report || config.write_report {
        Some(generate_report_xlsx(&output.report)?)
    } else {
        None
    };

    let written = match destination {
        Destination::Zip(path) => {
            let bytes = pack_zip(&output.documents, report.as_deref())?;
            std::fs::write(path, bytes)
                .map_err(|e| QuillError::Io(format!("{}: {e}", path.display())))?;
            path
        }
        Destination::Dir(dir) => {
            write_to_dir(dir, &output.documents, report.as_deref())?;
            dir
        }
    };

    writeln!(
        out,
        "Rendered {} of {} rows ({} failed) -> {}",
        output.report.rendered_count(),
        output.report.outcomes.len(),
        output.report.failed_count(),
        written.display()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use zip::write::SimpleFileOptions;
    use zip::{ZipArchive, ZipWriter};

    const DOCUMENT: &str = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t xml:space="preserve">Dear </w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>[NAME]</w:t></w:r><w:r><w:t>, see you in {city}.</w:t></w:r></w:p></w:body></w:document>"#;

    fn write_template(dir: &Path) -> PathBuf {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(DOCUMENT.as_bytes()).unwrap();
        let path = dir.join("letter.docx");
        std::fs::write(&path, zip.finish().unwrap().into_inner()).unwrap();
        path
    }

    fn write_data(dir: &Path) -> PathBuf {
        let path = dir.join("people.csv");
        std::fs::write(&path, "Name,City\nAnn,Oslo\nBob,Rome\nAnn,Lima\n").unwrap();
        path
    }

    fn rule_args(rules: &[&str]) -> RuleArgs {
        RuleArgs {
            rule: rules.iter().map(|r| r.to_string()).collect(),
            ..RuleArgs::default()
        }
    }

    fn merge_args(dir: &Path) -> MergeArgs {
        MergeArgs {
            template: write_template(dir),
            data: write_data(dir),
            rules: rule_args(&["[NAME]=Name", "{city}=City"]),
            rows: None,
            name_column: Some("Name".into()),
            prefix: Some("letter_".into()),
            suffix: None,
            sheet: None,
            out: None,
            out_dir: Some(dir.join("out")),
            report: true,
            no_headers_footers: false,
        }
    }

    #[test]
    fn test_merge_to_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let args = merge_args(tmp.path());
        let mut out = Vec::new();
        merge(&args, &QuillConfig::default(), &mut out).unwrap();

        let out_dir = tmp.path().join("out");
        assert!(out_dir.join("letter_Ann.docx").exists());
        assert!(out_dir.join("letter_Bob.docx").exists());
        assert!(out_dir.join("letter_Ann_2.docx").exists());
        assert!(out_dir.join("report.xlsx").exists());

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Rendered 3 of 3 rows (0 failed)"));
        assert!(printed.contains("row 2: letter_Bob.docx ([NAME] -> Bob (1×); {city} -> Rome (1×))"));
    }

    #[test]
    fn test_merge_to_zip_with_row_range() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("merged.zip");
        let args = MergeArgs {
            rows: Some("2-3".into()),
            out: Some(zip_path.clone()),
            out_dir: None,
            report: false,
            ..merge_args(tmp.path())
        };
        merge(&args, &QuillConfig::default(), &mut Vec::new()).unwrap();

        let mut archive = ZipArchive::new(std::fs::File::open(&zip_path).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(String::from).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"letter_Bob.docx".to_string()));

        let docx = {
            let mut bytes = Vec::new();
            archive
                .by_name("letter_Ann.docx")
                .unwrap()
                .read_to_end(&mut bytes)
                .unwrap();
            bytes
        };
        let template = Template::from_bytes(docx).unwrap();
        assert_eq!(template.plain_text(), "Dear Ann, see you in Lima.");
    }

    #[test]
    fn test_merge_needs_exactly_one_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let mut args = merge_args(tmp.path());
        assert_eq!(
            args.destination().unwrap(),
            Destination::Dir(&tmp.path().join("out"))
        );

        args.out_dir = None;
        let err = merge(&args, &QuillConfig::default(), &mut Vec::new()).unwrap_err();
        assert!(err.downcast_ref::<QuillError>().is_none());
        assert!(err.to_string().contains("--out"));

        args.out = Some(tmp.path().join("a.zip"));
        args.out_dir = Some(tmp.path().join("out"));
        assert!(args.destination().is_err());
        assert!(!tmp.path().join("a.zip").exists());
    }

    #[test]
    fn test_preview_marks_formatting() {
        let tmp = tempfile::tempdir().unwrap();
        let template = write_template(tmp.path());
        let mut out = Vec::new();
        preview(&template, &mut out).unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.trim_end(), "Dear **[NAME]**, see you in {city}.");
    }

    #[test]
    fn test_inspect_lists_columns_and_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let data = write_data(tmp.path());
        let mut out = Vec::new();
        inspect(&data, None, Some(2), &QuillConfig::default(), &mut out).unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Columns (2): Name, City"));
        assert!(printed.contains("Rows: 3"));
        assert!(printed.contains("2\tBob\tRome"));
        assert!(printed.contains("... 1 more rows"));
    }

    #[test]
    fn test_rules_check_reports_missing_column() {
        let tmp = tempfile::tempdir().unwrap();
        let template = write_template(tmp.path());
        let data = write_data(tmp.path());
        let args = rule_args(&["[NAME]=Name", "{zip}=Zip"]);
        let mut out = Vec::new();
        let err = rules_check(&args, &template, &data, None, &QuillConfig::default(), &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("Zip"));

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("[NAME] -> Name  column: ok  found: 1"));
        assert!(printed.contains("{zip} -> Zip  column: MISSING  found: 0"));
    }

    #[test]
    fn test_rules_export_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rules.json");
        let config = QuillConfig::default();
        rules_export(&rule_args(&["[NAME]=Name"]), &path, &config, &mut Vec::new()).unwrap();

        let args = RuleArgs {
            rules: Some(path),
            rule: vec!["{city}=City".into()],
            scope: Some("brackets".into()),
        };
        let set = load_rules(&args, &config).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.scope(), ReplaceScope::BracketContents);
        assert_eq!(set.rules()[0], ReplacementRule::new("[NAME]", "Name"));
    }

    #[test]
    fn test_bad_scope_is_rejected() {
        let args = RuleArgs {
            scope: Some("half".into()),
            ..RuleArgs::default()
        };
        assert!(load_rules(&args, &QuillConfig::default()).is_err());
    }
}
