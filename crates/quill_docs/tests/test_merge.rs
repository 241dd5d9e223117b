use docx_rs::{Docx, Paragraph, Run, Table, TableCell, TableRow};
use quill_docs::archive::pack_zip;
use quill_docs::*;
use std::io::{Cursor, Read};

fn pack(docx: Docx) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    docx.build().pack(&mut buf).unwrap();
    buf.into_inner()
}

/// "Dear [NA" + "ME]," with the keyword split over a bold and an italic run,
/// plus a one-cell table holding another keyword.
fn letter_template() -> Vec<u8> {
    let greeting = Paragraph::new()
        .add_run(Run::new().add_text("Dear "))
        .add_run(Run::new().add_text("[NA").bold())
        .add_run(Run::new().add_text("ME],").italic());
    let cell = TableCell::new().add_paragraph(
        Paragraph::new().add_run(Run::new().add_text("Order {order} for [NAME]")),
    );
    let docx = Docx::new()
        .add_paragraph(greeting)
        .add_table(Table::new(vec![TableRow::new(vec![cell])]))
        .add_paragraph(Paragraph::new().add_run(Run::new().add_text("No keywords here.")));
    pack(docx)
}

fn customers(names: &[&str]) -> DataTable {
    DataTable::new(
        vec!["NAME".into(), "Order".into()],
        names
            .iter()
            .enumerate()
            .map(|(i, n)| vec![n.to_string(), format!("A-{}", i + 1)])
            .collect(),
    )
}

fn rules() -> RuleSet {
    RuleSet::from_pairs(ReplaceScope::Full, [("[NAME]", "NAME"), ("{order}", "Order")]).unwrap()
}

fn first_paragraph(template: &Template) -> ParagraphView {
    match template.outline().into_iter().next() {
        Some(Block::Paragraph(p)) => p,
        other => panic!("expected paragraph, got {other:?}"),
    }
}

#[test]
fn test_split_keyword_takes_first_run_formatting() {
    let template = Template::from_bytes(letter_template()).unwrap();
    let table = customers(&["Alice"]);
    let rendered = template.render(&rules(), &table.row(0).unwrap()).unwrap();

    let out = Template::from_bytes(rendered.bytes).unwrap();
    let p = first_paragraph(&out);
    assert_eq!(p.text(), "Dear Alice,");

    let alice = p.runs.iter().find(|r| r.text == "Alice").unwrap();
    assert!(alice.bold);
    assert!(!alice.italic);
    let comma = p.runs.iter().find(|r| r.text == ",").unwrap();
    assert!(comma.italic);
}

#[test]
fn test_table_cells_are_substituted() {
    let template = Template::from_bytes(letter_template()).unwrap();
    let table = customers(&["Alice"]);
    let rendered = template.render(&rules(), &table.row(0).unwrap()).unwrap();
    let out = Template::from_bytes(rendered.bytes).unwrap();

    let Some(Block::Table(rows)) = out.outline().into_iter().nth(1) else {
        panic!("expected table");
    };
    assert_eq!(rows[0][0][0].text(), "Order A-1 for Alice");
    assert_eq!(rendered.stats.counts, vec![2, 1]);
}

#[test]
fn test_identity_without_matching_keywords() {
    let source = letter_template();
    let template = Template::from_bytes(source.clone()).unwrap();
    let before = template.plain_text();

    let table = DataTable::new(vec!["X".into()], vec![vec!["value".into()]]);
    let set = RuleSet::from_pairs(ReplaceScope::Full, [("<<absent>>", "X")]).unwrap();
    let rendered = template.render(&set, &table.row(0).unwrap()).unwrap();

    assert_eq!(rendered.bytes, source);
    assert_eq!(Template::from_bytes(rendered.bytes).unwrap().plain_text(), before);
}

#[test]
fn test_value_count_matches_keyword_count() {
    let template = Template::from_bytes(letter_template()).unwrap();
    let keyword_hits = template.find_keywords(&rules()).unwrap()[0];

    let table = customers(&["Zebediah"]);
    let rendered = template.render(&rules(), &table.row(0).unwrap()).unwrap();
    let text = Template::from_bytes(rendered.bytes).unwrap().plain_text();
    assert_eq!(text.matches("Zebediah").count(), keyword_hits);
    assert!(!text.contains("[NAME]"));
}

#[test]
fn test_bracket_scope_keeps_brackets() {
    let docx = Docx::new().add_paragraph(
        Paragraph::new()
            .add_run(Run::new().add_text("甲方：【"))
            .add_run(Run::new().add_text("张三】").bold()),
    );
    let template = Template::from_bytes(pack(docx)).unwrap();
    let table = DataTable::new(vec!["姓名".into()], vec![vec!["李四".into()]]);
    let set = RuleSet::from_pairs(ReplaceScope::BracketContents, [("【张三】", "姓名")]).unwrap();

    let rendered = template.render(&set, &table.row(0).unwrap()).unwrap();
    let out = Template::from_bytes(rendered.bytes).unwrap();
    assert_eq!(out.plain_text(), "甲方：【李四】");
}

#[test]
fn test_batch_names_and_archive() {
    let template = Template::from_bytes(letter_template()).unwrap();
    let table = customers(&["Ann", "Ann", "Bea"]);
    let options = BatchOptions {
        naming: FilenamePolicy {
            column: Some("NAME".into()),
            suffix: "_letter".into(),
            ..FilenamePolicy::default()
        },
        ..BatchOptions::default()
    };
    let output = run_batch(&template, &rules(), &table, &options).unwrap();

    let names: Vec<&str> = output.documents.iter().map(|d| d.filename.as_str()).collect();
    assert_eq!(names, vec!["Ann_letter.docx", "Ann_letter_2.docx", "Bea_letter.docx"]);

    let zip_bytes = pack_zip(&output.documents, None).unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(zip_bytes)).unwrap();
    assert_eq!(archive.len(), 3);

    let mut docx = Vec::new();
    archive
        .by_name("Bea_letter.docx")
        .unwrap()
        .read_to_end(&mut docx)
        .unwrap();
    let text = Template::from_bytes(docx).unwrap().plain_text();
    assert!(text.starts_with("Dear Bea,"));
    assert!(text.contains("Order A-3 for Bea"));
}

#[test]
fn test_empty_rule_set_is_a_no_op() {
    let source = letter_template();
    let template = Template::from_bytes(source.clone()).unwrap();
    let table = customers(&["Ann", "Bob"]);
    let output = run_batch(
        &template,
        &RuleSet::new(ReplaceScope::Full),
        &table,
        &BatchOptions::default(),
    )
    .unwrap();

    assert_eq!(output.documents.len(), 2);
    for doc in &output.documents {
        assert_eq!(doc.bytes, source);
        assert_eq!(doc.log, "no keywords found");
    }
}

fn document_xml(docx: &[u8]) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(docx)).unwrap();
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    xml
}

#[test]
fn test_cell_line_breaks_and_control_chars() {
    let template = Template::from_bytes(letter_template()).unwrap();
    let table = customers(&["Ann\u{1}\nSmith"]);
    let output = run_batch(&template, &rules(), &table, &BatchOptions::default()).unwrap();

    let xml = document_xml(&output.documents[0].bytes);
    assert!(!xml.contains('\u{1}'));
    assert!(xml.contains("<w:br/>"));
    assert!(!xml.contains("Ann\nSmith"));

    let text = Template::from_bytes(output.documents[0].bytes.clone())
        .unwrap()
        .plain_text();
    assert!(text.starts_with("Dear AnnSmith,"));
}
