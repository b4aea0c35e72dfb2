//! Abstract syntax for compiled XPath expressions.
//!
//! Namespace prefixes are resolved against the static context during
//! parsing, so name tests here carry resolved URIs rather than prefixes.

use smallvec::SmallVec;
use xdm::XdmAtomicValue;

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(XdmAtomicValue),
    ContextItem,
    /// Variable reference by lexical name, `$` stripped.
    VarRef(String),
    /// Comma sequence of two or more member expressions. An empty list
    /// is the empty-parentheses expression `()`.
    Sequence(Vec<Expr>),
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CompOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Concat(Box<Expr>, Box<Expr>),
    Union(Vec<Expr>),
    Neg(Box<Expr>),
    Path(PathExpr),
    /// Primary expression filtered by predicates, e.g. `$seq[2]`.
    Filter {
        base: Box<Expr>,
        predicates: Vec<Expr>,
    },
    FunctionCall {
        name: String,
        args: SmallVec<[Box<Expr>; 2]>,
    },
    /// Call to a user-declared function, keyed by Clark name. Resolved
    /// through the dynamic context at evaluation time.
    UserFunctionCall {
        name: String,
        args: SmallVec<[Box<Expr>; 2]>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    /// General comparisons: existential over both sequences.
    GeneralEq,
    GeneralNe,
    GeneralLt,
    GeneralLe,
    GeneralGt,
    GeneralGe,
    /// Value comparisons: singleton operands, empty propagates.
    ValueEq,
    ValueNe,
    ValueLt,
    ValueLe,
    ValueGt,
    ValueGe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
}

#[derive(Debug, Clone)]
pub struct PathExpr {
    pub start: PathStart,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStart {
    /// Leading `/`: starts from the root of the context node's tree.
    Root,
    /// Starts from the context item itself.
    Relative,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    pub fn descendant_or_self_node() -> Self {
        Step {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::AnyKind,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    SelfAxis,
    Parent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// Name test with a resolved namespace URI (None means no namespace).
    Name {
        ns_uri: Option<String>,
        local: String,
    },
    /// `*`: any node of the axis's principal kind.
    Wildcard,
    /// `prefix:*`, with the prefix resolved to its URI.
    PrefixWildcard(String),
    /// `node()`
    AnyKind,
    /// `text()`
    Text,
    /// `comment()`
    Comment,
    /// `processing-instruction()` with an optional target name.
    Pi(Option<String>),
}
