//! XDM value model: immutable node trees, atomic values, item sequences.
//!
//! This crate defines the data model shared by the XPath, XSLT and XQuery
//! processors: atomic values with numeric promotion, node trees with stable
//! identity, items as a closed tagged union, and ordered value sequences.
//! Trees are built once (from XML text, a file, or programmatically) and are
//! read-only afterwards; handles and sequences are cheap to clone and safe
//! to share across threads.

pub mod atomic;
pub mod builder;
pub mod error;
pub mod item;
pub mod name;
pub mod node;
pub mod serialize;
pub mod value;

pub use atomic::{format_double, XdmAtomicValue};
pub use builder::{parse_xml_file, parse_xml_str, parse_xml_str_with_policy, WhitespacePolicy};
pub use error::{Error, Result};
pub use item::{FunctionItem, XdmItem};
pub use name::QName;
pub use node::{NodeKind, TreeBuilder, XdmNode};
pub use serialize::{serialize, SerializationOptions};
pub use value::{LazyValue, XdmValue};
