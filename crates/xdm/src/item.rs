//! Items: the union of atomic values, nodes and function references

use std::fmt;

use crate::atomic::XdmAtomicValue;
use crate::name::QName;
use crate::node::XdmNode;

/// A reference to a compiled function bound to an arity. Invocation goes
/// through the owning processor; the item itself only carries identity.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionItem {
    name: Option<QName>,
    arity: usize,
}

impl FunctionItem {
    pub fn named(name: QName, arity: usize) -> Self {
        Self {
            name: Some(name),
            arity,
        }
    }

    pub fn anonymous(arity: usize) -> Self {
        Self { name: None, arity }
    }

    pub fn name(&self) -> Option<&QName> {
        self.name.as_ref()
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl fmt::Display for FunctionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(q) => write!(f, "function {}#{}", q.lexical(), self.arity),
            None => write!(f, "function (anonymous)#{}", self.arity),
        }
    }
}

/// A single XDM item. Closed union: atomic value, node, or function.
#[derive(Debug, Clone, PartialEq)]
pub enum XdmItem {
    Atomic(XdmAtomicValue),
    Node(XdmNode),
    Function(FunctionItem),
}

impl XdmItem {
    /// Distinguishes atomic values from nodes and functions.
    pub fn is_atomic(&self) -> bool {
        matches!(self, XdmItem::Atomic(_))
    }

    /// Every item is a sequence of one.
    pub fn size(&self) -> usize {
        1
    }

    pub fn as_atomic(&self) -> Option<&XdmAtomicValue> {
        match self {
            XdmItem::Atomic(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&XdmNode> {
        match self {
            XdmItem::Node(n) => Some(n),
            _ => None,
        }
    }

    /// String form: node serialization or atomic canonical form.
    pub fn string_value(&self) -> String {
        match self {
            XdmItem::Atomic(a) => a.string_value(),
            XdmItem::Node(n) => n.to_string(),
            XdmItem::Function(f) => f.to_string(),
        }
    }
}

impl fmt::Display for XdmItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string_value())
    }
}

impl From<XdmAtomicValue> for XdmItem {
    fn from(a: XdmAtomicValue) -> Self {
        XdmItem::Atomic(a)
    }
}

impl From<XdmNode> for XdmItem {
    fn from(n: XdmNode) -> Self {
        XdmItem::Node(n)
    }
}
