//! XML serialization of node trees

use crate::node::{NodeKind, XdmNode};

/// Serialization-level settings, applied only when a value is rendered to
/// text or a file, never to intermediate structured results.
#[derive(Debug, Clone)]
pub struct SerializationOptions {
    /// Suppress the XML declaration emitted for document nodes.
    pub omit_xml_declaration: bool,
    /// Indent element-only content. Mixed content is never indented.
    pub indent: bool,
    /// Separator between the top-level items of a document node. When
    /// absent, the separator recorded on the result tree (if any) applies;
    /// the default is the empty string.
    pub item_separator: Option<String>,
}

impl Default for SerializationOptions {
    fn default() -> Self {
        Self {
            omit_xml_declaration: true,
            indent: false,
            item_separator: None,
        }
    }
}

/// Serialize a node. Document nodes render their children joined by the
/// item separator, preceded by an XML declaration unless suppressed.
pub fn serialize(node: &XdmNode, options: &SerializationOptions) -> String {
    let mut out = String::new();
    match node.node_kind() {
        NodeKind::Document => {
            if !options.omit_xml_declaration {
                out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
            }
            let separator = options
                .item_separator
                .clone()
                .or_else(|| node.tree_item_separator().map(str::to_string))
                .unwrap_or_default();
            let children = node.children();
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    out.push_str(&separator);
                }
                write_node(child, options, 0, &mut out);
            }
        }
        _ => write_node(node, options, 0, &mut out),
    }
    out
}

fn write_node(node: &XdmNode, options: &SerializationOptions, depth: usize, out: &mut String) {
    match node.node_kind() {
        NodeKind::Document => {
            for child in node.children() {
                write_node(&child, options, depth, out);
            }
        }
        NodeKind::Element => write_element(node, options, depth, out),
        NodeKind::Text => out.push_str(&escape_text(&node.string_value())),
        NodeKind::Comment => {
            out.push_str("<!--");
            out.push_str(&node.string_value());
            out.push_str("-->");
        }
        NodeKind::ProcessingInstruction => {
            out.push_str("<?");
            if let Some(name) = node.name() {
                out.push_str(name.local_part());
            }
            let content = node.string_value();
            if !content.is_empty() {
                out.push(' ');
                out.push_str(&content);
            }
            out.push_str("?>");
        }
        NodeKind::Attribute => {
            if let Some(name) = node.name() {
                out.push_str(&name.lexical());
                out.push_str("=\"");
                out.push_str(&escape_attribute(&node.string_value()));
                out.push('"');
            }
        }
        NodeKind::Namespace | NodeKind::Unknown => {}
    }
}

fn write_element(node: &XdmNode, options: &SerializationOptions, depth: usize, out: &mut String) {
    let name = match node.name() {
        Some(n) => n.clone(),
        None => return,
    };
    out.push('<');
    out.push_str(&name.lexical());

    if let Some(uri) = name.ns_uri() {
        if needs_ns_declaration(node, name.prefix(), uri) {
            match name.prefix() {
                Some(p) => {
                    out.push_str(&format!(" xmlns:{}=\"{}\"", p, escape_attribute(uri)))
                }
                None => out.push_str(&format!(" xmlns=\"{}\"", escape_attribute(uri))),
            }
        }
    }

    for attr in node.attributes() {
        if let Some(attr_name) = attr.name() {
            out.push(' ');
            out.push_str(&attr_name.lexical());
            out.push_str("=\"");
            out.push_str(&escape_attribute(&attr.string_value()));
            out.push('"');
        }
    }

    let children = node.children();
    if children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');

    let indentable = options.indent
        && children.iter().all(|c| {
            matches!(
                c.node_kind(),
                NodeKind::Element | NodeKind::Comment | NodeKind::ProcessingInstruction
            )
        });
    for child in &children {
        if indentable {
            out.push('\n');
            out.push_str(&"   ".repeat(depth + 1));
        }
        write_node(child, options, depth + 1, out);
    }
    if indentable {
        out.push('\n');
        out.push_str(&"   ".repeat(depth));
    }

    out.push_str("</");
    out.push_str(&name.lexical());
    out.push('>');
}

// An ancestor element carrying the same prefix binding already declared it.
fn needs_ns_declaration(node: &XdmNode, prefix: Option<&str>, uri: &str) -> bool {
    let mut current = node.parent();
    while let Some(p) = current {
        if p.node_kind() == NodeKind::Element {
            if let Some(name) = p.name() {
                if name.prefix() == prefix && name.ns_uri() == Some(uri) {
                    return false;
                }
            }
        }
        current = p.parent();
    }
    true
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attribute(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
