//! Immutable node trees
//!
//! A tree is a flat arena owned by its root; `XdmNode` is a cheap
//! (tree, index) handle. Arena indices are assigned in document order, so
//! index comparison within one tree is document-order comparison. Trees are
//! read-only once built and safe to share across threads.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::name::QName;
use crate::serialize::{serialize, SerializationOptions};

/// Kind of an XDM node. Closed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
    Unknown,
}

impl NodeKind {
    /// Numeric node-kind code (document=9, element=1, attribute=2, text=3,
    /// comment=8, processing-instruction=7, namespace=13, unknown=0).
    pub fn code(&self) -> u8 {
        match self {
            NodeKind::Document => 9,
            NodeKind::Element => 1,
            NodeKind::Attribute => 2,
            NodeKind::Text => 3,
            NodeKind::Comment => 8,
            NodeKind::ProcessingInstruction => 7,
            NodeKind::Namespace => 13,
            NodeKind::Unknown => 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct NodeData {
    pub(crate) kind: NodeKind,
    pub(crate) name: Option<QName>,
    pub(crate) value: String,
    pub(crate) parent: Option<usize>,
    pub(crate) attributes: Vec<usize>,
    pub(crate) children: Vec<usize>,
    /// Namespace declarations appearing on this element: (prefix, uri),
    /// with "" as the prefix of the default namespace.
    pub(crate) namespaces: Vec<(String, String)>,
}

#[derive(Debug)]
pub(crate) struct TreeData {
    pub(crate) nodes: Vec<NodeData>,
    /// Separator used between top-level items when this tree was built as a
    /// result document; consulted by the serializer when no explicit
    /// separator option is given.
    pub(crate) item_separator: Option<String>,
}

/// A location in a document tree.
///
/// Handles are non-owning views: cloning a node never copies the tree, and
/// two handles are equal only if they designate the same location in the
/// same tree.
#[derive(Clone)]
pub struct XdmNode {
    pub(crate) tree: Arc<TreeData>,
    pub(crate) id: usize,
}

impl XdmNode {
    fn data(&self) -> &NodeData {
        &self.tree.nodes[self.id]
    }

    fn handle(&self, id: usize) -> XdmNode {
        XdmNode {
            tree: Arc::clone(&self.tree),
            id,
        }
    }

    pub fn node_kind(&self) -> NodeKind {
        self.data().kind
    }

    /// Qualified name; `None` for document, text and comment nodes.
    pub fn name(&self) -> Option<&QName> {
        self.data().name.as_ref()
    }

    /// The string value: text content for documents and elements, the stored
    /// value for attributes, text, comments and processing instructions.
    pub fn string_value(&self) -> String {
        match self.data().kind {
            NodeKind::Document | NodeKind::Element => {
                let mut out = String::new();
                self.collect_text(self.id, &mut out);
                out
            }
            _ => self.data().value.clone(),
        }
    }

    fn collect_text(&self, id: usize, out: &mut String) {
        let data = &self.tree.nodes[id];
        if data.kind == NodeKind::Text {
            out.push_str(&data.value);
        }
        for &child in &data.children {
            self.collect_text(child, out);
        }
    }

    /// Ordered child nodes.
    pub fn children(&self) -> Vec<XdmNode> {
        self.data().children.iter().map(|&c| self.handle(c)).collect()
    }

    /// Ordered attribute nodes of an element; empty for other kinds.
    pub fn attributes(&self) -> Vec<XdmNode> {
        self.data()
            .attributes
            .iter()
            .map(|&a| self.handle(a))
            .collect()
    }

    /// Value of the named attribute, if present.
    pub fn attribute_value(&self, name: &str) -> Option<String> {
        self.data().attributes.iter().find_map(|&a| {
            let attr = &self.tree.nodes[a];
            match &attr.name {
                Some(q) if q.local_part() == name || q.lexical() == name => {
                    Some(attr.value.clone())
                }
                _ => None,
            }
        })
    }

    pub fn parent(&self) -> Option<XdmNode> {
        self.data().parent.map(|p| self.handle(p))
    }

    /// Namespace declarations written on this element.
    pub fn namespace_declarations(&self) -> &[(String, String)] {
        &self.data().namespaces
    }

    /// All namespace bindings in scope at this node: declarations on the
    /// node and its ancestors, nearest declaration winning.
    pub fn in_scope_namespaces(&self) -> Vec<(String, String)> {
        let mut bindings: Vec<(String, String)> = Vec::new();
        let mut current = Some(self.clone());
        while let Some(node) = current {
            for (prefix, uri) in node.namespace_declarations() {
                if !bindings.iter().any(|(p, _)| p == prefix) {
                    bindings.push((prefix.clone(), uri.clone()));
                }
            }
            current = node.parent();
        }
        bindings
    }

    /// The root of the owning tree (usually a document node).
    pub fn root(&self) -> XdmNode {
        self.handle(0)
    }

    /// A single node is a sequence of one item.
    pub fn size(&self) -> usize {
        1
    }

    /// Position of this node in document order within its tree.
    pub fn document_order(&self) -> usize {
        self.id
    }

    /// All descendant nodes (children, attributes excluded) in document
    /// order, without self.
    pub fn descendants(&self) -> Vec<XdmNode> {
        let mut out = Vec::new();
        self.push_descendants(self.id, &mut out);
        out
    }

    fn push_descendants(&self, id: usize, out: &mut Vec<XdmNode>) {
        for &child in &self.tree.nodes[id].children {
            out.push(self.handle(child));
            self.push_descendants(child, out);
        }
    }

    /// True when both handles designate the same location in the same tree.
    pub fn is_same_node(&self, other: &XdmNode) -> bool {
        Arc::ptr_eq(&self.tree, &other.tree) && self.id == other.id
    }

    /// Stable per-tree identity token, usable for ordering nodes from
    /// different trees deterministically.
    pub fn tree_token(&self) -> usize {
        Arc::as_ptr(&self.tree) as usize
    }

    /// Serialize this node with explicit options.
    pub fn serialize(&self, options: &SerializationOptions) -> String {
        serialize(self, options)
    }

    pub(crate) fn tree_item_separator(&self) -> Option<&str> {
        self.tree.item_separator.as_deref()
    }
}

impl PartialEq for XdmNode {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_node(other)
    }
}

impl Eq for XdmNode {}

impl std::hash::Hash for XdmNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.tree_token().hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for XdmNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XdmNode")
            .field("kind", &self.node_kind())
            .field("name", &self.name().map(|q| q.lexical()))
            .field("order", &self.id)
            .finish()
    }
}

impl fmt::Display for XdmNode {
    /// Serialized form without an XML declaration.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serialize(self, &SerializationOptions::default()))
    }
}

/// Incremental constructor for a fresh tree.
///
/// Used both by the XML parser and by node-constructing evaluators. Nodes
/// are appended in document order: an element, then its attributes, then its
/// content.
pub struct TreeBuilder {
    nodes: Vec<NodeData>,
    stack: Vec<usize>,
    item_separator: Option<String>,
}

impl TreeBuilder {
    /// Start a tree rooted at a document node.
    pub fn document() -> Self {
        Self::with_root(NodeKind::Document, None)
    }

    /// Start a tree rooted at an element node.
    pub fn element_root(name: QName) -> Self {
        Self::with_root(NodeKind::Element, Some(name))
    }

    fn with_root(kind: NodeKind, name: Option<QName>) -> Self {
        TreeBuilder {
            nodes: vec![NodeData {
                kind,
                name,
                value: String::new(),
                parent: None,
                attributes: Vec::new(),
                children: Vec::new(),
                namespaces: Vec::new(),
            }],
            stack: vec![0],
            item_separator: None,
        }
    }

    /// Record the item separator the eventual result document serializes
    /// its top-level items with.
    pub fn set_item_separator(&mut self, separator: impl Into<String>) {
        self.item_separator = Some(separator.into());
    }

    fn current(&self) -> usize {
        *self.stack.last().expect("builder stack never empty")
    }

    fn append(&mut self, kind: NodeKind, name: Option<QName>, value: String) -> usize {
        let parent = self.current();
        let id = self.nodes.len();
        self.nodes.push(NodeData {
            kind,
            name,
            value,
            parent: Some(parent),
            attributes: Vec::new(),
            children: Vec::new(),
            namespaces: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Open a child element; subsequent content goes inside it until
    /// [`TreeBuilder::end_element`].
    pub fn start_element(&mut self, name: QName) {
        let id = self.append(NodeKind::Element, Some(name), String::new());
        self.stack.push(id);
    }

    pub fn end_element(&mut self) {
        debug_assert!(self.stack.len() > 1, "unbalanced end_element");
        self.stack.pop();
    }

    /// Record a namespace declaration on the currently open element.
    /// The default namespace uses an empty prefix.
    pub fn namespace(&mut self, prefix: &str, uri: &str) {
        let current = self.current();
        if self.nodes[current].kind == NodeKind::Element {
            self.nodes[current]
                .namespaces
                .push((prefix.to_string(), uri.to_string()));
        }
    }

    /// Attach an attribute to the currently open element.
    pub fn attribute(&mut self, name: QName, value: impl Into<String>) -> Result<()> {
        let parent = self.current();
        if self.nodes[parent].kind != NodeKind::Element {
            return Err(Error::NodeAccess(
                "attributes can only be attached to elements".into(),
            ));
        }
        let id = self.nodes.len();
        self.nodes.push(NodeData {
            kind: NodeKind::Attribute,
            name: Some(name),
            value: value.into(),
            parent: Some(parent),
            attributes: Vec::new(),
            children: Vec::new(),
            namespaces: Vec::new(),
        });
        self.nodes[parent].attributes.push(id);
        Ok(())
    }

    /// Append character content, merging with an immediately preceding text
    /// sibling.
    pub fn text(&mut self, content: &str) {
        if content.is_empty() {
            return;
        }
        let parent = self.current();
        if let Some(&last) = self.nodes[parent].children.last() {
            if self.nodes[last].kind == NodeKind::Text {
                self.nodes[last].value.push_str(content);
                return;
            }
        }
        self.append(NodeKind::Text, None, content.to_string());
    }

    pub fn comment(&mut self, content: &str) {
        self.append(NodeKind::Comment, None, content.to_string());
    }

    pub fn processing_instruction(&mut self, target: &str, content: &str) {
        self.append(
            NodeKind::ProcessingInstruction,
            Some(QName::local(target)),
            content.to_string(),
        );
    }

    /// Deep-copy a node from another tree into the current position.
    /// Copying a document node splices its children.
    pub fn copy_node(&mut self, node: &XdmNode) -> Result<()> {
        match node.node_kind() {
            NodeKind::Document => {
                for child in node.children() {
                    self.copy_node(&child)?;
                }
                Ok(())
            }
            NodeKind::Element => {
                let name = node.name().cloned().ok_or_else(|| {
                    Error::NodeAccess("element without a name".into())
                })?;
                self.start_element(name);
                for (prefix, uri) in node.namespace_declarations() {
                    self.namespace(prefix, uri);
                }
                for attr in node.attributes() {
                    let attr_name = attr.name().cloned().ok_or_else(|| {
                        Error::NodeAccess("attribute without a name".into())
                    })?;
                    self.attribute(attr_name, attr.string_value())?;
                }
                for child in node.children() {
                    self.copy_node(&child)?;
                }
                self.end_element();
                Ok(())
            }
            NodeKind::Text => {
                self.text(&node.string_value());
                Ok(())
            }
            NodeKind::Comment => {
                self.comment(&node.string_value());
                Ok(())
            }
            NodeKind::ProcessingInstruction => {
                let target = node
                    .name()
                    .map(|q| q.local_part().to_string())
                    .unwrap_or_default();
                self.processing_instruction(&target, &node.string_value());
                Ok(())
            }
            NodeKind::Attribute => {
                let name = node.name().cloned().ok_or_else(|| {
                    Error::NodeAccess("attribute without a name".into())
                })?;
                self.attribute(name, node.string_value())
            }
            other => Err(Error::NodeAccess(format!(
                "cannot copy a {:?} node",
                other
            ))),
        }
    }

    /// Freeze the tree and return a handle to its root.
    pub fn finish(self) -> XdmNode {
        debug_assert_eq!(self.stack.len(), 1, "unbalanced element nesting");
        XdmNode {
            tree: Arc::new(TreeData {
                nodes: self.nodes,
                item_separator: self.item_separator,
            }),
            id: 0,
        }
    }
}
