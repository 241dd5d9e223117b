//! A small owned XML tree for OOXML story parts.
//!
//! Parts are read with `quick-xml` into [`XmlDocument`], edited in place and
//! written back. Declarations, comments, processing instructions and CDATA
//! are kept as raw events so a part survives a load/save cycle intact.

use anyhow::{Context, Result, bail};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

#[derive(Debug, Clone)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    Other(Event<'static>),
}

#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    /// Qualified name as written, e.g. `w:p`.
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attributes.push((key.to_string(), value.to_string())),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            _ => None,
        })
    }

    /// First direct child element with the given qualified name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|el| el.name == name)
    }

    /// Concatenated direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: &str) {
        self.children = vec![XmlNode::Text(text.to_string())];
    }
}

/// A parsed XML part: top-level nodes around exactly one root element.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    pub nodes: Vec<XmlNode>,
}

impl XmlDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut top: Vec<XmlNode> = Vec::new();
        let mut buf = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .with_context(|| format!("XML error at byte {}", reader.buffer_position()))?;
            match event {
                Event::Start(e) => stack.push(element_from_start(&e)?),
                Event::Empty(e) => {
                    let el = element_from_start(&e)?;
                    push_node(&mut stack, &mut top, XmlNode::Element(el));
                }
                Event::End(_) => {
                    let Some(el) = stack.pop() else {
                        bail!("unbalanced end tag");
                    };
                    push_node(&mut stack, &mut top, XmlNode::Element(el));
                }
                Event::Text(e) => {
                    let text = e.unescape()?.into_owned();
                    push_node(&mut stack, &mut top, XmlNode::Text(text));
                }
                Event::Eof => break,
                other => push_node(&mut stack, &mut top, XmlNode::Other(other.into_owned())),
            }
            buf.clear();
        }

        if !stack.is_empty() {
            bail!("unexpected end of document inside <{}>", stack[stack.len() - 1].name);
        }
        let doc = Self { nodes: top };
        if doc.root().is_none() {
            bail!("document has no root element");
        }
        Ok(doc)
    }

    pub fn root(&self) -> Option<&XmlElement> {
        self.nodes.iter().find_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn root_mut(&mut self) -> Option<&mut XmlElement> {
        self.nodes.iter_mut().find_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        for node in &self.nodes {
            write_node(&mut writer, node)?;
        }
        Ok(writer.into_inner())
    }
}

fn element_from_start(e: &BytesStart<'_>) -> Result<XmlElement> {
    let mut el = XmlElement::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

fn push_node(stack: &mut [XmlElement], top: &mut Vec<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => top.push(node),
    }
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &XmlNode) -> Result<()> {
    match node {
        XmlNode::Element(el) => {
            let mut start = BytesStart::new(el.name.as_str());
            for (key, value) in &el.attributes {
                start.push_attribute((key.as_str(), value.as_str()));
            }
            if el.children.is_empty() {
                writer.write_event(Event::Empty(start))?;
            } else {
                writer.write_event(Event::Start(start))?;
                for child in &el.children {
                    write_node(writer, child)?;
                }
                writer.write_event(Event::End(BytesEnd::new(el.name.as_str())))?;
            }
        }
        XmlNode::Text(text) => writer.write_event(Event::Text(BytesText::new(text)))?,
        XmlNode::Other(event) => writer.write_event(event.clone())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="urn:w"><!-- note --><w:body><w:p><w:r><w:t xml:space="preserve">A &amp; B </w:t></w:r></w:p><w:sectPr/></w:body></w:document>"#;

    #[test]
    fn test_parse_builds_tree() {
        let doc = XmlDocument::parse(SAMPLE.as_bytes()).unwrap();
        let root = doc.root().unwrap();
        assert_eq!(root.name, "w:document");
        assert_eq!(root.attr("xmlns:w"), Some("urn:w"));

        let body = root.child("w:body").unwrap();
        let t = body
            .child("w:p")
            .and_then(|p| p.child("w:r"))
            .and_then(|r| r.child("w:t"))
            .unwrap();
        assert_eq!(t.text(), "A & B ");
        assert_eq!(t.attr("xml:space"), Some("preserve"));
        assert!(body.child("w:sectPr").unwrap().children.is_empty());
    }

    #[test]
    fn test_write_keeps_declaration_and_comment() {
        let doc = XmlDocument::parse(SAMPLE.as_bytes()).unwrap();
        let out = String::from_utf8(doc.to_bytes().unwrap()).unwrap();
        assert!(out.starts_with("<?xml version=\"1.0\""));
        assert!(out.contains("<!-- note -->"));
        assert!(out.contains("<w:sectPr/>"));
        assert!(out.contains("A &amp; B "));
    }

    fn first_mut<'a>(el: &'a mut XmlElement, name: &str) -> &'a mut XmlElement {
        el.elements_mut().find(|c| c.name == name).unwrap()
    }

    #[test]
    fn test_reparse_after_edit() {
        let mut doc = XmlDocument::parse(SAMPLE.as_bytes()).unwrap();
        let body = first_mut(doc.root_mut().unwrap(), "w:body");
        let t = first_mut(first_mut(first_mut(body, "w:p"), "w:r"), "w:t");
        t.set_text("<x> \"quoted\"");

        let again = XmlDocument::parse(&doc.to_bytes().unwrap()).unwrap();
        let t = again
            .root()
            .and_then(|r| r.child("w:body"))
            .and_then(|b| b.child("w:p"))
            .and_then(|p| p.child("w:r"))
            .and_then(|r| r.child("w:t"))
            .unwrap();
        assert_eq!(t.text(), "<x> \"quoted\"");
    }

    #[test]
    fn test_rejects_truncated_xml() {
        assert!(XmlDocument::parse(b"<a><b></b>").is_err());
    }

    #[test]
    fn test_rejects_empty_input() {
        assert!(XmlDocument::parse(b"").is_err());
    }
}
