use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook};

use crate::batch::{BatchReport, RowOutcome};

const HEADERS: [&str; 4] = ["Row", "File", "Status", "Details"];

/// Summarise a batch as an XLSX workbook: one line per processed row with a
/// bold header, followed by rendered/failed totals.
pub fn generate_report_xlsx(report: &BatchReport) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name("Report")
        .context("Failed to set sheet name")?;

    let header_format = Format::new().set_bold();
    for (col, header) in HEADERS.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *header, &header_format)
            .with_context(|| format!("Failed to write header at column {col}"))?;
    }

    for (i, outcome) in report.outcomes.iter().enumerate() {
        let excel_row = (i + 1) as u32;
        let (file, status, details) = match outcome {
            RowOutcome::Rendered { filename, log, .. } => (filename.as_str(), "rendered", log.as_str()),
            RowOutcome::Failed { error, .. } => ("", "failed", error.as_str()),
        };
        worksheet
            .write_number(excel_row, 0, outcome.row() as f64)
            .with_context(|| format!("Failed to write row number at row {excel_row}"))?;
        for (col, text) in [file, status, details].into_iter().enumerate() {
            worksheet
                .write_string(excel_row, (col + 1) as u16, text)
                .with_context(|| format!("Failed to write cell at ({excel_row}, {})", col + 1))?;
        }
    }

    let totals_row = (report.outcomes.len() + 2) as u32;
    let totals = [
        ("Rendered", report.rendered_count()),
        ("Failed", report.failed_count()),
    ];
    for (offset, (label, count)) in totals.into_iter().enumerate() {
        let row = totals_row + offset as u32;
        worksheet
            .write_string_with_format(row, 0, label, &header_format)
            .with_context(|| format!("Failed to write total label at row {row}"))?;
        worksheet
            .write_number(row, 1, count as f64)
            .with_context(|| format!("Failed to write total at row {row}"))?;
    }

    worksheet.autofit();

    let bytes = workbook
        .save_to_buffer()
        .context("Failed to save workbook to buffer")?;
    Ok(bytes)
}
