//! Value sequences

use std::fmt;

use crate::error::{Error, Result};
use crate::item::XdmItem;
use crate::node::XdmNode;

/// An ordered sequence of zero or more items: the universal result and
/// argument type. Items keep the order the producer emitted them in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XdmValue {
    items: Vec<XdmItem>,
}

impl XdmValue {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<XdmItem>) -> Self {
        Self { items }
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First item, absent when the sequence is empty.
    pub fn head(&self) -> Option<&XdmItem> {
        self.items.first()
    }

    /// Item at `index`, failing on out-of-bounds access.
    pub fn item_at(&self, index: usize) -> Result<&XdmItem> {
        self.items.get(index).ok_or(Error::Index {
            index,
            size: self.items.len(),
        })
    }

    /// Append an item; sequences are built incrementally or materialized
    /// from an evaluation result.
    pub fn push(&mut self, item: XdmItem) {
        self.items.push(item);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, XdmItem> {
        self.items.iter()
    }

    pub fn items(&self) -> &[XdmItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<XdmItem> {
        self.items
    }

    /// Concatenation of each item's serialization joined by `separator`.
    pub fn to_joined_string(&self, separator: &str) -> String {
        self.items
            .iter()
            .map(|i| i.string_value())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl fmt::Display for XdmValue {
    /// Item serializations concatenated with no separator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            write!(f, "{}", item.string_value())?;
        }
        Ok(())
    }
}

impl From<XdmItem> for XdmValue {
    fn from(item: XdmItem) -> Self {
        Self { items: vec![item] }
    }
}

impl From<XdmNode> for XdmValue {
    fn from(node: XdmNode) -> Self {
        XdmItem::Node(node).into()
    }
}

impl From<Vec<XdmItem>> for XdmValue {
    fn from(items: Vec<XdmItem>) -> Self {
        Self { items }
    }
}

impl IntoIterator for XdmValue {
    type Item = XdmItem;
    type IntoIter = std::vec::IntoIter<XdmItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a XdmValue {
    type Item = &'a XdmItem;
    type IntoIter = std::slice::Iter<'a, XdmItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<XdmItem> for XdmValue {
    fn from_iter<T: IntoIterator<Item = XdmItem>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// A lazily produced sequence: forward-only, single pass, finite. A consumed
/// `LazyValue` cannot be re-iterated; re-evaluate the producer or
/// [`LazyValue::materialize`] first if multiple passes are needed.
pub struct LazyValue {
    inner: Box<dyn Iterator<Item = Result<XdmItem>> + Send>,
}

impl LazyValue {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<XdmItem>> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
        }
    }

    /// Next item, `None` once the sequence is exhausted.
    pub fn next(&mut self) -> Option<Result<XdmItem>> {
        self.inner.next()
    }

    /// Drain the remaining items into a materialized, re-iterable value.
    pub fn materialize(self) -> Result<XdmValue> {
        let mut value = XdmValue::empty();
        for item in self.inner {
            value.push(item?);
        }
        Ok(value)
    }
}

impl Iterator for LazyValue {
    type Item = Result<XdmItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::XdmAtomicValue;

    fn ints(values: &[i64]) -> XdmValue {
        values
            .iter()
            .map(|&i| XdmItem::Atomic(XdmAtomicValue::Integer(i)))
            .collect()
    }

    #[test]
    fn head_and_size() {
        let v = ints(&[2, 3, 4]);
        assert_eq!(v.size(), 3);
        assert_eq!(v.head().unwrap().string_value(), "2");
        assert!(XdmValue::empty().head().is_none());
    }

    #[test]
    fn item_at_out_of_bounds() {
        let v = ints(&[1]);
        assert!(v.item_at(0).is_ok());
        match v.item_at(3) {
            Err(Error::Index { index: 3, size: 1 }) => {}
            other => panic!("expected index error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn string_conversion_has_no_default_separator() {
        let v = ints(&[2, 3, 4]);
        assert_eq!(v.to_string(), "234");
        assert_eq!(v.to_joined_string("§"), "2§3§4");
    }

    #[test]
    fn lazy_is_single_pass() {
        let lazy = LazyValue::new(
            ints(&[1, 2]).into_items().into_iter().map(Ok),
        );
        let materialized = lazy.materialize().unwrap();
        assert_eq!(materialized.size(), 2);

        let mut lazy = LazyValue::new(
            ints(&[1, 2]).into_items().into_iter().map(Ok),
        );
        assert!(lazy.next().is_some());
        assert!(lazy.next().is_some());
        assert!(lazy.next().is_none());
        // Exhausted: further pulls stay empty.
        assert!(lazy.next().is_none());
    }
}
