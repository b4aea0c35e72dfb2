//! Tree building from serialized XML
//!
//! Event-driven construction over quick-xml. Parsing never publishes a
//! partial tree: any well-formedness violation aborts with a `ParseError`
//! carrying line/column information, and every successful parse yields a
//! fresh, independent tree.

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::name::QName;
use crate::node::{TreeBuilder, XdmNode};

/// What to do with whitespace-only text nodes. The policy is always
/// explicit: instance documents preserve, stylesheets and schemas strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitespacePolicy {
    Preserve,
    Strip,
}

/// Parse XML text into a document-root node, preserving whitespace.
pub fn parse_xml_str(xml: &str) -> Result<XdmNode> {
    parse_xml_str_with_policy(xml, WhitespacePolicy::Preserve)
}

/// Parse XML text into a document-root node with an explicit whitespace
/// policy.
pub fn parse_xml_str_with_policy(xml: &str, policy: WhitespacePolicy) -> Result<XdmNode> {
    Parsing::new(xml, policy).run()
}

/// Parse an XML file into a document-root node.
pub fn parse_xml_file(path: impl AsRef<Path>) -> Result<XdmNode> {
    let content = std::fs::read_to_string(path)?;
    parse_xml_str(&content)
}

struct Parsing<'a> {
    source: &'a str,
    policy: WhitespacePolicy,
    builder: TreeBuilder,
    // One frame per open element: the xmlns declarations it introduced.
    ns_stack: Vec<Vec<(String, String)>>,
    depth: usize,
    seen_root: bool,
}

impl<'a> Parsing<'a> {
    fn new(source: &'a str, policy: WhitespacePolicy) -> Self {
        Self {
            source,
            policy,
            builder: TreeBuilder::document(),
            ns_stack: Vec::new(),
            depth: 0,
            seen_root: false,
        }
    }

    fn err_at(&self, offset: usize, message: impl Into<String>) -> Error {
        Error::parse_at(self.source, offset, message)
    }

    fn run(mut self) -> Result<XdmNode> {
        let mut reader = Reader::from_str(self.source);
        loop {
            match reader.read_event() {
                Err(e) => {
                    return Err(
                        self.err_at(reader.buffer_position() as usize, e.to_string())
                    )
                }
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    self.start_element(&e, reader.buffer_position() as usize)?;
                }
                Ok(Event::Empty(e)) => {
                    self.start_element(&e, reader.buffer_position() as usize)?;
                    self.end_element();
                }
                Ok(Event::End(_)) => self.end_element(),
                Ok(Event::Text(e)) => {
                    let pos = reader.buffer_position() as usize;
                    let text = e
                        .unescape()
                        .map_err(|err| self.err_at(pos, err.to_string()))?;
                    self.text(&text, pos)?;
                }
                Ok(Event::CData(e)) => {
                    let content = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    let pos = reader.buffer_position() as usize;
                    self.text(&content, pos)?;
                }
                Ok(Event::Comment(e)) => {
                    if self.depth > 0 {
                        let content = String::from_utf8_lossy(&e).into_owned();
                        self.builder.comment(&content);
                    }
                }
                Ok(Event::PI(e)) => {
                    if self.depth > 0 {
                        let target = String::from_utf8_lossy(e.target()).into_owned();
                        let content = String::from_utf8_lossy(e.content())
                            .trim_start()
                            .to_string();
                        self.builder.processing_instruction(&target, &content);
                    }
                }
                Ok(Event::Decl(_)) | Ok(Event::DocType(_)) => {}
            }
        }
        if self.depth != 0 {
            return Err(self.err_at(
                self.source.len(),
                "unexpected end of document: unclosed element",
            ));
        }
        if !self.seen_root {
            return Err(self.err_at(self.source.len(), "no root element"));
        }
        let root = self.builder.finish();
        tracing::debug!(nodes = root.descendants().len() + 1, "parsed XML document");
        Ok(root)
    }

    fn start_element(&mut self, e: &BytesStart<'_>, pos: usize) -> Result<()> {
        if self.depth == 0 {
            if self.seen_root {
                return Err(self.err_at(pos, "document has more than one root element"));
            }
            self.seen_root = true;
        }

        // First pass: namespace declarations introduced by this element.
        let mut frame: Vec<(String, String)> = Vec::new();
        let mut plain: Vec<(String, String)> = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.err_at(pos, err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| self.err_at(pos, err.to_string()))?
                .into_owned();
            if key == "xmlns" {
                frame.push((String::new(), value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                frame.push((prefix.to_string(), value));
            } else {
                plain.push((key, value));
            }
        }
        self.ns_stack.push(frame);

        let raw = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let name = self.element_name(&raw, pos)?;
        self.builder.start_element(name);
        if let Some(frame) = self.ns_stack.last() {
            for (prefix, uri) in frame {
                self.builder.namespace(prefix, uri);
            }
        }
        self.depth += 1;

        for (key, value) in plain {
            let name = self.attribute_name(&key, pos)?;
            self.builder
                .attribute(name, value)
                .map_err(|err| self.err_at(pos, err.to_string()))?;
        }
        Ok(())
    }

    fn end_element(&mut self) {
        self.builder.end_element();
        self.ns_stack.pop();
        self.depth -= 1;
    }

    fn text(&mut self, content: &str, pos: usize) -> Result<()> {
        if self.depth == 0 {
            if content.trim().is_empty() {
                return Ok(());
            }
            return Err(self.err_at(pos, "character content outside the root element"));
        }
        if self.policy == WhitespacePolicy::Strip && content.trim().is_empty() {
            return Ok(());
        }
        self.builder.text(content);
        Ok(())
    }

    fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        if prefix == "xml" {
            return Some("http://www.w3.org/XML/1998/namespace".to_string());
        }
        for frame in self.ns_stack.iter().rev() {
            for (p, uri) in frame.iter().rev() {
                if p == prefix {
                    if uri.is_empty() {
                        return None;
                    }
                    return Some(uri.clone());
                }
            }
        }
        None
    }

    fn element_name(&self, raw: &str, pos: usize) -> Result<QName> {
        match raw.split_once(':') {
            Some((prefix, local)) => {
                let uri = self.resolve_prefix(prefix).ok_or_else(|| {
                    self.err_at(pos, format!("undeclared namespace prefix '{}'", prefix))
                })?;
                Ok(QName::new(
                    Some(prefix.to_string()),
                    Some(uri),
                    local,
                ))
            }
            // Unprefixed element names pick up the default namespace.
            None => Ok(QName::new(None, self.resolve_prefix(""), raw)),
        }
    }

    fn attribute_name(&self, raw: &str, pos: usize) -> Result<QName> {
        match raw.split_once(':') {
            Some((prefix, local)) => {
                let uri = self.resolve_prefix(prefix).ok_or_else(|| {
                    self.err_at(pos, format!("undeclared namespace prefix '{}'", prefix))
                })?;
                Ok(QName::new(
                    Some(prefix.to_string()),
                    Some(uri),
                    local,
                ))
            }
            // Unprefixed attributes are in no namespace.
            None => Ok(QName::local(raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    const PERSONS: &str = "<out>\n    <person att1='value1' att2='value2'>text1</person>\n    <person>text2</person>\n</out>";

    #[test]
    fn parse_well_formed() {
        let doc = parse_xml_str(PERSONS).unwrap();
        assert_eq!(doc.node_kind(), NodeKind::Document);
        let out = &doc.children()[0];
        assert_eq!(out.name().unwrap().local_part(), "out");
        // Whitespace preserved: text, person, text, person, text.
        assert_eq!(out.children().len(), 5);
        let person = &out.children()[1];
        assert_eq!(person.attributes().len(), 2);
        assert_eq!(person.attribute_value("att2").as_deref(), Some("value2"));
    }

    #[test]
    fn strip_policy_drops_whitespace_only_text() {
        let doc = parse_xml_str_with_policy(PERSONS, WhitespacePolicy::Strip).unwrap();
        let out = &doc.children()[0];
        assert_eq!(out.children().len(), 2);
        // Non-whitespace text survives stripping.
        assert_eq!(out.children()[0].string_value(), "text1");
    }

    #[test]
    fn ill_formed_reports_location() {
        let err = parse_xml_str("<a>\n  <b></a>").unwrap_err();
        match err {
            Error::Parse { line, message, .. } => {
                assert!(line >= 1);
                assert!(!message.is_empty());
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn unclosed_root_fails() {
        assert!(matches!(
            parse_xml_str("<a><b/>"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn empty_input_fails() {
        assert!(matches!(parse_xml_str(""), Err(Error::Parse { .. })));
    }

    #[test]
    fn each_parse_is_independent() {
        let a = parse_xml_str("<z/>").unwrap();
        let b = parse_xml_str("<z/>").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn namespace_resolution() {
        let doc = parse_xml_str(
            "<f:root xmlns:f='http://localhost/'><f:child/><plain/></f:root>",
        )
        .unwrap();
        let root = &doc.children()[0];
        let name = root.name().unwrap();
        assert_eq!(name.ns_uri(), Some("http://localhost/"));
        assert_eq!(name.local_part(), "root");
        // xmlns declarations are not attribute nodes.
        assert!(root.attributes().is_empty());
        let plain = &root.children()[1];
        assert_eq!(plain.name().unwrap().ns_uri(), None);
    }

    #[test]
    fn in_scope_namespaces_accumulate() {
        let doc = parse_xml_str(
            "<root xmlns:a='http://a/'><mid xmlns:b='http://b/'><leaf/></mid></root>",
        )
        .unwrap();
        let leaf = &doc.children()[0].children()[0].children()[0];
        let scope = leaf.in_scope_namespaces();
        assert!(scope.contains(&("a".to_string(), "http://a/".to_string())));
        assert!(scope.contains(&("b".to_string(), "http://b/".to_string())));
    }

    #[test]
    fn undeclared_prefix_fails() {
        assert!(matches!(
            parse_xml_str("<p:a>x</p:a>"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn comments_and_pis_are_kept() {
        let doc = parse_xml_str("<r><!--note--><?go now?></r>").unwrap();
        let kids = doc.children()[0].children();
        assert_eq!(kids[0].node_kind(), NodeKind::Comment);
        assert_eq!(kids[0].string_value(), "note");
        assert_eq!(kids[1].node_kind(), NodeKind::ProcessingInstruction);
        assert_eq!(kids[1].name().unwrap().local_part(), "go");
        assert_eq!(kids[1].string_value(), "now");
    }
}
