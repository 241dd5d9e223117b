// Template mail-merge: docx templates, spreadsheet data, batch output

pub mod archive;
pub mod batch;
pub mod docx;
pub mod engine;
pub mod report;
pub mod rules;
pub mod sheet;
pub mod text;
pub mod xml;

pub use batch::{
    BatchOptions, BatchOutput, BatchReport, FilenamePolicy, RenderedDocument, RowOutcome,
    RowSelection, run_batch,
};
pub use docx::{Block, ParagraphView, Rendered, RunView, Template, TemplateOptions};
pub use rules::{ReplaceScope, ReplacementRule, RuleSet};
pub use sheet::{DataRow, DataTable, SheetFormat};
