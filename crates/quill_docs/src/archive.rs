use anyhow::{Context, Result};
use quill_core::QuillError;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::batch::RenderedDocument;

/// File name of the batch summary inside archives and output directories.
pub const REPORT_FILE: &str = "report.xlsx";

/// Pack rendered documents into one deflated ZIP, optionally with the
/// batch report alongside them.
pub fn pack_zip(docs: &[RenderedDocument], report: Option<&[u8]>) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for doc in docs {
        zip.start_file(doc.filename.as_str(), options)
            .with_context(|| format!("Failed to create {}", doc.filename))?;
        zip.write_all(&doc.bytes)
            .with_context(|| format!("Failed to write {}", doc.filename))?;
    }

    if let Some(report) = report {
        zip.start_file(REPORT_FILE, options)
            .context("Failed to create report.xlsx")?;
        zip.write_all(report)
            .context("Failed to write report.xlsx")?;
    }

    let cursor = zip.finish().context("Failed to finalize output zip")?;
    let bytes = cursor.into_inner();
    info!("Packed {} documents ({} bytes)", docs.len(), bytes.len());
    Ok(bytes)
}

/// Write each rendered document (and the report, if any) into `dir`,
/// creating it when needed. Returns the written paths.
pub fn write_to_dir(
    dir: &Path,
    docs: &[RenderedDocument],
    report: Option<&[u8]>,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .map_err(|e| QuillError::Io(format!("{}: {e}", dir.display())))?;

    let mut written = Vec::with_capacity(docs.len() + 1);
    let files = docs
        .iter()
        .map(|doc| (doc.filename.as_str(), doc.bytes.as_slice()))
        .chain(report.map(|r| (REPORT_FILE, r)));
    for (name, bytes) in files {
        let path = dir.join(name);
        std::fs::write(&path, bytes)
            .map_err(|e| QuillError::Io(format!("{}: {e}", path.display())))?;
        written.push(path);
    }
    info!("Wrote {} files to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReplaceStats;
    use std::io::Read;

    fn doc(name: &str, body: &[u8]) -> RenderedDocument {
        RenderedDocument {
            filename: name.into(),
            bytes: body.to_vec(),
            row_index: 0,
            stats: ReplaceStats::default(),
            log: String::new(),
        }
    }

    #[test]
    fn test_pack_zip_contains_every_document() {
        let docs = vec![doc("a.docx", b"one"), doc("张三.docx", b"two")];
        let bytes = pack_zip(&docs, None).unwrap();
        assert_eq!(&bytes[0..2], b"PK");

        let mut archive = zip::ZipArchive::new(Cursor::new(&bytes)).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"张三.docx"));

        let mut content = String::new();
        archive
            .by_name("a.docx")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "one");
    }

    #[test]
    fn test_pack_zip_with_report() {
        let bytes = pack_zip(&[doc("a.docx", b"x")], Some(b"report".as_slice())).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(&bytes)).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert!(names.contains(&REPORT_FILE));
    }

    #[test]
    fn test_pack_zip_empty() {
        let bytes = pack_zip(&[], None).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(&bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }

    #[test]
    fn test_write_to_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("nested").join("out");
        let paths = write_to_dir(&out, &[doc("a.docx", b"aa")], Some(b"rr".as_slice())).unwrap();

        assert_eq!(paths.len(), 2);
        assert_eq!(std::fs::read(out.join("a.docx")).unwrap(), b"aa");
        assert_eq!(std::fs::read(out.join(REPORT_FILE)).unwrap(), b"rr");
    }
}
