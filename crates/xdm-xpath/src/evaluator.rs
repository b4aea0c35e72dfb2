//! Expression evaluation over the XDM value model.
//!
//! Evaluation is eager and recursive. Step evaluation applies each
//! predicate list per origin node, so positional predicates count
//! within one origin's candidates, then merges results into document
//! order with duplicates removed.

use std::collections::HashSet;

use xdm::{XdmAtomicValue, XdmItem, XdmNode, XdmValue};

use crate::ast::{ArithOp, Axis, CompOp, Expr, NodeTest, PathExpr, PathStart, Step};
use crate::context::DynamicContext;
use crate::error::{Error, Result};
use crate::functions;

/// The focus of an evaluation: context item, position and size.
pub(crate) struct Focus {
    pub item: XdmItem,
    pub position: usize,
    pub size: usize,
}

pub(crate) struct Eval<'a> {
    pub dynamic: &'a DynamicContext,
    pub base_uri: Option<&'a str>,
}

impl<'a> Eval<'a> {
    pub(crate) fn eval(&self, expr: &Expr, focus: Option<&Focus>) -> Result<XdmValue> {
        match expr {
            Expr::Literal(atom) => Ok(XdmValue::from_items(vec![XdmItem::Atomic(atom.clone())])),
            Expr::ContextItem => {
                let focus = focus.ok_or_else(|| {
                    Error::dynamic("XPDY0002", "the context item is absent")
                })?;
                Ok(XdmValue::from_items(vec![focus.item.clone()]))
            }
            Expr::VarRef(name) => self
                .dynamic
                .variable(name)
                .cloned()
                .ok_or_else(|| Error::Name(format!("variable ${name} is not bound"))),
            Expr::Sequence(members) => {
                let mut items = Vec::new();
                for member in members {
                    items.extend(self.eval(member, focus)?.into_items());
                }
                Ok(XdmValue::from_items(items))
            }
            Expr::Or(lhs, rhs) => {
                let truth = effective_boolean_value(&self.eval(lhs, focus)?)?
                    || effective_boolean_value(&self.eval(rhs, focus)?)?;
                Ok(boolean_value(truth))
            }
            Expr::And(lhs, rhs) => {
                let truth = effective_boolean_value(&self.eval(lhs, focus)?)?
                    && effective_boolean_value(&self.eval(rhs, focus)?)?;
                Ok(boolean_value(truth))
            }
            Expr::Compare(op, lhs, rhs) => {
                let lv = self.eval(lhs, focus)?;
                let rv = self.eval(rhs, focus)?;
                self.compare(*op, &lv, &rv)
            }
            Expr::Arith(op, lhs, rhs) => {
                let lv = atomize_singleton(&self.eval(lhs, focus)?)?;
                let rv = atomize_singleton(&self.eval(rhs, focus)?)?;
                match (lv, rv) {
                    (Some(a), Some(b)) => {
                        let result = arithmetic(*op, &a, &b)?;
                        Ok(XdmValue::from_items(vec![XdmItem::Atomic(result)]))
                    }
                    _ => Ok(XdmValue::empty()),
                }
            }
            Expr::Concat(lhs, rhs) => {
                let a = self.operand_string(lhs, focus)?;
                let b = self.operand_string(rhs, focus)?;
                Ok(string_value(a + &b))
            }
            Expr::Union(branches) => {
                let mut nodes = Vec::new();
                for branch in branches {
                    for item in self.eval(branch, focus)?.into_items() {
                        match item {
                            XdmItem::Node(node) => nodes.push(node),
                            other => {
                                return Err(Error::dynamic(
                                    "XPTY0004",
                                    format!(
                                        "union operand must be nodes, found {}",
                                        other.string_value()
                                    ),
                                ))
                            }
                        }
                    }
                }
                Ok(XdmValue::from_items(
                    document_order_dedup(nodes)
                        .into_iter()
                        .map(XdmItem::Node)
                        .collect(),
                ))
            }
            Expr::Neg(inner) => match atomize_singleton(&self.eval(inner, focus)?)? {
                None => Ok(XdmValue::empty()),
                Some(atom) => {
                    let negated = match to_numeric(&atom)? {
                        Numeric::Int(i) => XdmAtomicValue::Integer(-i),
                        Numeric::Dbl(d) => XdmAtomicValue::Double(-d),
                    };
                    Ok(XdmValue::from_items(vec![XdmItem::Atomic(negated)]))
                }
            },
            Expr::Path(path) => self.eval_path(path, focus),
            Expr::Filter { base, predicates } => {
                let items = self.eval(base, focus)?.into_items();
                let kept = self.apply_predicates(items, predicates)?;
                Ok(XdmValue::from_items(kept))
            }
            Expr::FunctionCall { name, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args.iter() {
                    evaluated.push(self.eval(arg, focus)?);
                }
                let func = functions::lookup(name).ok_or_else(|| {
                    Error::StaticType(format!("unknown function '{name}'"))
                })?;
                let ctx = functions::CallCtx {
                    focus,
                    base_uri: self.base_uri,
                };
                (func.invoke)(&ctx, &evaluated)
            }
            Expr::UserFunctionCall { name, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args.iter() {
                    evaluated.push(self.eval(arg, focus)?);
                }
                let resolver = self.dynamic.function_resolver().ok_or_else(|| {
                    Error::Name(format!("no implementation available for function {name}"))
                })?;
                resolver(name, &evaluated)
            }
        }
    }

    /// Atomized string of a `||` operand: empty becomes "".
    fn operand_string(&self, expr: &Expr, focus: Option<&Focus>) -> Result<String> {
        match atomize_singleton(&self.eval(expr, focus)?)? {
            Some(atom) => Ok(atom.string_value()),
            None => Ok(String::new()),
        }
    }

    fn eval_path(&self, path: &PathExpr, focus: Option<&Focus>) -> Result<XdmValue> {
        let start_item = match focus {
            Some(f) => f.item.clone(),
            None => {
                return Err(Error::dynamic(
                    "XPDY0002",
                    "the context item is absent for a path expression",
                ))
            }
        };
        let mut current: Vec<XdmItem> = match path.start {
            PathStart::Root => match &start_item {
                XdmItem::Node(node) => vec![XdmItem::Node(node.root())],
                _ => {
                    return Err(Error::dynamic(
                        "XPTY0020",
                        "the context item for '/' is not a node",
                    ))
                }
            },
            PathStart::Relative => vec![start_item],
        };
        for step in &path.steps {
            let mut collected: Vec<XdmNode> = Vec::new();
            for origin in &current {
                let node = match origin {
                    XdmItem::Node(node) => node,
                    other => {
                        return Err(Error::dynamic(
                            "XPTY0019",
                            format!(
                                "axis step applied to a non-node value '{}'",
                                other.string_value()
                            ),
                        ))
                    }
                };
                let candidates: Vec<XdmItem> = apply_axis(node, step)
                    .into_iter()
                    .map(XdmItem::Node)
                    .collect();
                let kept = self.apply_predicates(candidates, &step.predicates)?;
                for item in kept {
                    if let XdmItem::Node(node) = item {
                        collected.push(node);
                    }
                }
            }
            current = document_order_dedup(collected)
                .into_iter()
                .map(XdmItem::Node)
                .collect();
        }
        Ok(XdmValue::from_items(current))
    }

    /// Filters items through each predicate in turn. A predicate whose
    /// value is a single number is a position test; anything else is
    /// taken by effective boolean value.
    pub(crate) fn apply_predicates(
        &self,
        items: Vec<XdmItem>,
        predicates: &[Expr],
    ) -> Result<Vec<XdmItem>> {
        let mut current = items;
        for predicate in predicates {
            let size = current.len();
            let mut kept = Vec::new();
            for (index, item) in current.into_iter().enumerate() {
                let focus = Focus {
                    item: item.clone(),
                    position: index + 1,
                    size,
                };
                let value = self.eval(predicate, Some(&focus))?;
                let keep = match value.head() {
                    Some(XdmItem::Atomic(XdmAtomicValue::Integer(n))) if value.size() == 1 => {
                        *n == (index + 1) as i64
                    }
                    Some(XdmItem::Atomic(XdmAtomicValue::Double(d))) if value.size() == 1 => {
                        *d == (index + 1) as f64
                    }
                    _ => effective_boolean_value(&value)?,
                };
                if keep {
                    kept.push(item);
                }
            }
            current = kept;
        }
        Ok(current)
    }

    fn compare(&self, op: CompOp, lhs: &XdmValue, rhs: &XdmValue) -> Result<XdmValue> {
        use CompOp::*;
        match op {
            GeneralEq | GeneralNe | GeneralLt | GeneralLe | GeneralGt | GeneralGe => {
                let left = atomize(lhs)?;
                let right = atomize(rhs)?;
                let rel = general_relation(op);
                for a in &left {
                    for b in &right {
                        if compare_pair(rel, a, b, true)? {
                            return Ok(boolean_value(true));
                        }
                    }
                }
                Ok(boolean_value(false))
            }
            ValueEq | ValueNe | ValueLt | ValueLe | ValueGt | ValueGe => {
                if lhs.is_empty() || rhs.is_empty() {
                    return Ok(XdmValue::empty());
                }
                let a = atomize_singleton(lhs)?.ok_or_else(|| {
                    Error::dynamic("XPTY0004", "value comparison operand is not a singleton")
                })?;
                let b = atomize_singleton(rhs)?.ok_or_else(|| {
                    Error::dynamic("XPTY0004", "value comparison operand is not a singleton")
                })?;
                let rel = value_relation(op);
                Ok(boolean_value(compare_pair(rel, &a, &b, false)?))
            }
        }
    }
}

fn boolean_value(b: bool) -> XdmValue {
    XdmValue::from_items(vec![XdmItem::Atomic(XdmAtomicValue::Boolean(b))])
}

fn string_value(s: String) -> XdmValue {
    XdmValue::from_items(vec![XdmItem::Atomic(XdmAtomicValue::String(s))])
}

// ---------------------------------------------------------------------------
// Axes and node tests
// ---------------------------------------------------------------------------

fn apply_axis(origin: &XdmNode, step: &Step) -> Vec<XdmNode> {
    let attribute_axis = step.axis == Axis::Attribute;
    let candidates: Vec<XdmNode> = match step.axis {
        Axis::Child => origin.children(),
        Axis::Attribute => origin.attributes(),
        Axis::SelfAxis => vec![origin.clone()],
        Axis::Parent => origin.parent().into_iter().collect(),
        Axis::Descendant => origin.descendants(),
        Axis::DescendantOrSelf => {
            let mut nodes = vec![origin.clone()];
            nodes.extend(origin.descendants());
            nodes
        }
    };
    candidates
        .into_iter()
        .filter(|node| node_test_matches(&step.test, node, attribute_axis))
        .collect()
}

/// Whether a node passes a node test. The principal node kind is
/// attribute on the attribute axis and element everywhere else.
pub(crate) fn node_test_matches(test: &NodeTest, node: &XdmNode, attribute_axis: bool) -> bool {
    use xdm::NodeKind;
    let principal = if attribute_axis {
        NodeKind::Attribute
    } else {
        NodeKind::Element
    };
    match test {
        NodeTest::AnyKind => true,
        NodeTest::Text => node.node_kind() == NodeKind::Text,
        NodeTest::Comment => node.node_kind() == NodeKind::Comment,
        NodeTest::Pi(target) => {
            node.node_kind() == NodeKind::ProcessingInstruction
                && target.as_deref().is_none_or(|t| {
                    node.name().map(|n| n.local_part() == t).unwrap_or(false)
                })
        }
        NodeTest::Wildcard => node.node_kind() == principal,
        NodeTest::PrefixWildcard(uri) => {
            node.node_kind() == principal
                && node.name().and_then(|n| n.ns_uri()) == Some(uri.as_str())
        }
        NodeTest::Name { ns_uri, local } => {
            node.node_kind() == principal
                && node
                    .name()
                    .map(|n| n.local_part() == local && n.ns_uri() == ns_uri.as_deref())
                    .unwrap_or(false)
        }
    }
}

/// Removes duplicates and sorts into document order. Nodes from
/// different trees are grouped by tree in a stable but arbitrary order.
pub(crate) fn document_order_dedup(nodes: Vec<XdmNode>) -> Vec<XdmNode> {
    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut unique: Vec<XdmNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if seen.insert((node.tree_token(), node.document_order())) {
            unique.push(node);
        }
    }
    unique.sort_by_key(|n| (n.tree_token(), n.document_order()));
    unique
}

// ---------------------------------------------------------------------------
// Atomization and the effective boolean value
// ---------------------------------------------------------------------------

pub(crate) fn atomize_item(item: &XdmItem) -> Result<XdmAtomicValue> {
    match item {
        XdmItem::Atomic(atom) => Ok(atom.clone()),
        XdmItem::Node(node) => Ok(XdmAtomicValue::UntypedAtomic(node.string_value())),
        XdmItem::Function(f) => Err(Error::dynamic(
            "FOTY0013",
            format!("a function item (arity {}) cannot be atomized", f.arity()),
        )),
    }
}

pub(crate) fn atomize(value: &XdmValue) -> Result<Vec<XdmAtomicValue>> {
    value.iter().map(atomize_item).collect()
}

/// Atomizes a value expected to hold at most one item.
pub(crate) fn atomize_singleton(value: &XdmValue) -> Result<Option<XdmAtomicValue>> {
    match value.size() {
        0 => Ok(None),
        1 => Ok(Some(atomize_item(value.head().expect("non-empty"))?)),
        n => Err(Error::dynamic(
            "XPTY0004",
            format!("expected a single item, found a sequence of {n}"),
        )),
    }
}

/// String value of an item for functions like `string()` and
/// `string-join()`: the node's text content, not its serialization.
pub(crate) fn string_data(item: &XdmItem) -> Result<String> {
    match item {
        XdmItem::Atomic(atom) => Ok(atom.string_value()),
        XdmItem::Node(node) => Ok(node.string_value()),
        XdmItem::Function(_) => Err(Error::dynamic(
            "FOTY0014",
            "a function item has no string value",
        )),
    }
}

pub(crate) fn effective_boolean_value(value: &XdmValue) -> Result<bool> {
    let first = match value.head() {
        None => return Ok(false),
        Some(item) => item,
    };
    if matches!(first, XdmItem::Node(_)) {
        return Ok(true);
    }
    if value.size() > 1 {
        return Err(Error::dynamic(
            "FORG0006",
            "effective boolean value of a sequence starting with an atomic value",
        ));
    }
    match first {
        XdmItem::Atomic(XdmAtomicValue::QName(_)) => Err(Error::dynamic(
            "FORG0006",
            "a QName has no effective boolean value",
        )),
        XdmItem::Atomic(atom) => Ok(atom.boolean_value()),
        XdmItem::Function(_) => Err(Error::dynamic(
            "FORG0006",
            "a function item has no effective boolean value",
        )),
        XdmItem::Node(_) => Ok(true),
    }
}

// ---------------------------------------------------------------------------
// Comparisons
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn general_relation(op: CompOp) -> Relation {
    match op {
        CompOp::GeneralEq => Relation::Eq,
        CompOp::GeneralNe => Relation::Ne,
        CompOp::GeneralLt => Relation::Lt,
        CompOp::GeneralLe => Relation::Le,
        CompOp::GeneralGt => Relation::Gt,
        _ => Relation::Ge,
    }
}

fn value_relation(op: CompOp) -> Relation {
    match op {
        CompOp::ValueEq => Relation::Eq,
        CompOp::ValueNe => Relation::Ne,
        CompOp::ValueLt => Relation::Lt,
        CompOp::ValueLe => Relation::Le,
        CompOp::ValueGt => Relation::Gt,
        _ => Relation::Ge,
    }
}

enum Category {
    Num,
    Str,
    Bool,
    Untyped,
}

fn category(atom: &XdmAtomicValue) -> Category {
    match atom {
        XdmAtomicValue::Integer(_) | XdmAtomicValue::Double(_) => Category::Num,
        XdmAtomicValue::Boolean(_) => Category::Bool,
        XdmAtomicValue::UntypedAtomic(_) => Category::Untyped,
        _ => Category::Str,
    }
}

/// Compares one pair of atomics. In a general comparison an untyped
/// operand is cast to the other operand's type; in a value comparison
/// untyped behaves as a string.
pub(crate) fn compare_pair(
    rel: Relation,
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
    general: bool,
) -> Result<bool> {
    use Category::*;
    match (category(a), category(b)) {
        (Num, Num) => Ok(apply_relation_f64(rel, a.double_value(), b.double_value())),
        (Untyped, Num) if general => {
            Ok(apply_relation_f64(rel, untyped_double(a)?, b.double_value()))
        }
        (Num, Untyped) if general => {
            Ok(apply_relation_f64(rel, a.double_value(), untyped_double(b)?))
        }
        (Untyped, Bool) | (Bool, Untyped) if general => {
            let av = cast_boolean(a)?;
            let bv = cast_boolean(b)?;
            Ok(apply_relation_ord(rel, av.cmp(&bv)))
        }
        (Str, Str) | (Untyped, Str) | (Str, Untyped) | (Untyped, Untyped) => Ok(
            apply_relation_ord(rel, a.string_value().cmp(&b.string_value())),
        ),
        (Bool, Bool) => {
            let av = matches!(a, XdmAtomicValue::Boolean(true));
            let bv = matches!(b, XdmAtomicValue::Boolean(true));
            Ok(apply_relation_ord(rel, av.cmp(&bv)))
        }
        _ => Err(Error::dynamic(
            "XPTY0004",
            format!(
                "cannot compare {} with {}",
                a.primitive_type_name(),
                b.primitive_type_name()
            ),
        )),
    }
}

fn untyped_double(atom: &XdmAtomicValue) -> Result<f64> {
    atom.string_value().trim().parse().map_err(|_| {
        Error::dynamic(
            "FORG0001",
            format!("'{}' is not a valid number", atom.string_value()),
        )
    })
}

fn cast_boolean(atom: &XdmAtomicValue) -> Result<bool> {
    match atom {
        XdmAtomicValue::Boolean(b) => Ok(*b),
        other => match other.string_value().trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            text => Err(Error::dynamic(
                "FORG0001",
                format!("'{text}' is not a valid boolean"),
            )),
        },
    }
}

fn apply_relation_f64(rel: Relation, a: f64, b: f64) -> bool {
    match rel {
        Relation::Eq => a == b,
        Relation::Ne => a != b,
        Relation::Lt => a < b,
        Relation::Le => a <= b,
        Relation::Gt => a > b,
        Relation::Ge => a >= b,
    }
}

fn apply_relation_ord(rel: Relation, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match rel {
        Relation::Eq => ord == Equal,
        Relation::Ne => ord != Equal,
        Relation::Lt => ord == Less,
        Relation::Le => ord != Greater,
        Relation::Gt => ord == Greater,
        Relation::Ge => ord != Less,
    }
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

pub(crate) enum Numeric {
    Int(i64),
    Dbl(f64),
}

pub(crate) fn to_numeric(atom: &XdmAtomicValue) -> Result<Numeric> {
    match atom {
        XdmAtomicValue::Integer(i) => Ok(Numeric::Int(*i)),
        XdmAtomicValue::Double(d) => Ok(Numeric::Dbl(*d)),
        XdmAtomicValue::UntypedAtomic(_) => Ok(Numeric::Dbl(untyped_double(atom)?)),
        other => Err(Error::dynamic(
            "XPTY0004",
            format!(
                "{} is not usable as a number",
                other.primitive_type_name()
            ),
        )),
    }
}

/// Binary arithmetic with numeric promotion: two integers stay integral
/// except for `div`, anything else goes through double.
pub(crate) fn arithmetic(
    op: ArithOp,
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
) -> Result<XdmAtomicValue> {
    let lhs = to_numeric(a)?;
    let rhs = to_numeric(b)?;
    match op {
        ArithOp::Add | ArithOp::Sub | ArithOp::Mul => Ok(match (lhs, rhs) {
            (Numeric::Int(x), Numeric::Int(y)) => {
                let result = match op {
                    ArithOp::Add => x.checked_add(y),
                    ArithOp::Sub => x.checked_sub(y),
                    _ => x.checked_mul(y),
                };
                match result {
                    Some(v) => XdmAtomicValue::Integer(v),
                    None => {
                        return Err(Error::dynamic("FOAR0002", "integer overflow"));
                    }
                }
            }
            (x, y) => {
                let (x, y) = (as_f64(x), as_f64(y));
                XdmAtomicValue::Double(match op {
                    ArithOp::Add => x + y,
                    ArithOp::Sub => x - y,
                    _ => x * y,
                })
            }
        }),
        ArithOp::Div => match (lhs, rhs) {
            // Integer division follows decimal semantics: dividing by
            // zero is an error rather than infinity.
            (Numeric::Int(_), Numeric::Int(0)) => {
                Err(Error::dynamic("FOAR0001", "division by zero"))
            }
            (Numeric::Int(x), Numeric::Int(y)) => Ok(XdmAtomicValue::Double(x as f64 / y as f64)),
            (x, y) => Ok(XdmAtomicValue::Double(as_f64(x) / as_f64(y))),
        },
        ArithOp::IDiv => {
            let y = as_f64(rhs);
            if y == 0.0 {
                return Err(Error::dynamic("FOAR0001", "integer division by zero"));
            }
            let quotient = (as_f64(lhs) / y).trunc();
            if !quotient.is_finite() {
                return Err(Error::dynamic("FOAR0002", "overflow in idiv"));
            }
            Ok(XdmAtomicValue::Integer(quotient as i64))
        }
        ArithOp::Mod => match (lhs, rhs) {
            (Numeric::Int(_), Numeric::Int(0)) => {
                Err(Error::dynamic("FOAR0001", "division by zero in mod"))
            }
            (Numeric::Int(x), Numeric::Int(y)) => Ok(XdmAtomicValue::Integer(x % y)),
            (x, y) => Ok(XdmAtomicValue::Double(as_f64(x) % as_f64(y))),
        },
    }
}

fn as_f64(n: Numeric) -> f64 {
    match n {
        Numeric::Int(i) => i as f64,
        Numeric::Dbl(d) => d,
    }
}
