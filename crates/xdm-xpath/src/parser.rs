//! Recursive-descent parser producing the [`crate::ast`] tree.
//!
//! XPath has no reserved words, so `div`, `and`, axis names and the
//! rest are recognized by where they sit: a name in operator position
//! is an operator, a name in operand position starts a step or a
//! function call.

use smallvec::SmallVec;

use crate::ast::{ArithOp, Axis, CompOp, Expr, NodeTest, PathExpr, PathStart, Step};
use crate::context::StaticContext;
use crate::error::{Error, Result};
use crate::functions;
use crate::lexer::{tokenize, Tok};

pub(crate) fn parse(source: &str, sc: &StaticContext) -> Result<Expr> {
    let toks = tokenize(source)?;
    let mut p = Parser { toks, pos: 0, sc };
    let expr = p.parse_expr()?;
    if p.cur() != &Tok::End {
        return Err(Error::Syntax(format!(
            "unexpected trailing input in '{source}'"
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    sc: &'a StaticContext,
}

const KIND_TESTS: &[&str] = &["node", "text", "comment", "processing-instruction"];
const AXES: &[(&str, Axis)] = &[
    ("child", Axis::Child),
    ("descendant", Axis::Descendant),
    ("descendant-or-self", Axis::DescendantOrSelf),
    ("attribute", Axis::Attribute),
    ("self", Axis::SelfAxis),
    ("parent", Axis::Parent),
];

impl<'a> Parser<'a> {
    fn cur(&self) -> &Tok {
        &self.toks[self.pos]
    }

    fn peek(&self) -> &Tok {
        self.toks.get(self.pos + 1).unwrap_or(&Tok::End)
    }

    fn bump(&mut self) -> Tok {
        let tok = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        if self.cur() == &tok {
            self.bump();
            Ok(())
        } else {
            Err(Error::Syntax(format!(
                "expected {tok:?}, found {:?}",
                self.cur()
            )))
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.cur(), Tok::Name(n) if n == kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let first = self.parse_single()?;
        if self.cur() != &Tok::Comma {
            return Ok(first);
        }
        let mut members = vec![first];
        while self.cur() == &Tok::Comma {
            self.bump();
            members.push(self.parse_single()?);
        }
        Ok(Expr::Sequence(members))
    }

    fn parse_single(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_comparison()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison_op(&self) -> Option<CompOp> {
        match self.cur() {
            Tok::Eq => Some(CompOp::GeneralEq),
            Tok::Ne => Some(CompOp::GeneralNe),
            Tok::Lt => Some(CompOp::GeneralLt),
            Tok::Le => Some(CompOp::GeneralLe),
            Tok::Gt => Some(CompOp::GeneralGt),
            Tok::Ge => Some(CompOp::GeneralGe),
            Tok::Name(n) => match n.as_str() {
                "eq" => Some(CompOp::ValueEq),
                "ne" => Some(CompOp::ValueNe),
                "lt" => Some(CompOp::ValueLt),
                "le" => Some(CompOp::ValueLe),
                "gt" => Some(CompOp::ValueGt),
                "ge" => Some(CompOp::ValueGe),
                _ => None,
            },
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_concat()?;
        // Value comparison keywords only count when an operand follows;
        // otherwise `a eq` at end of input would swallow the name.
        if let Some(op) = self.comparison_op() {
            if matches!(self.cur(), Tok::Name(_)) && self.peek() == &Tok::End {
                return Ok(lhs);
            }
            self.bump();
            let rhs = self.parse_concat()?;
            return Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        while self.cur() == &Tok::ConcatOp {
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = Expr::Concat(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.cur() {
                Tok::Plus => ArithOp::Add,
                Tok::Minus => ArithOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Arith(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_union()?;
        loop {
            let op = match self.cur() {
                Tok::Star => ArithOp::Mul,
                Tok::Name(n) => match n.as_str() {
                    "div" => ArithOp::Div,
                    "idiv" => ArithOp::IDiv,
                    "mod" => ArithOp::Mod,
                    _ => break,
                },
                _ => break,
            };
            self.bump();
            let rhs = self.parse_union()?;
            lhs = Expr::Arith(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_union(&mut self) -> Result<Expr> {
        let first = self.parse_unary()?;
        if self.cur() != &Tok::Pipe {
            return Ok(first);
        }
        let mut branches = vec![first];
        while self.cur() == &Tok::Pipe {
            self.bump();
            branches.push(self.parse_unary()?);
        }
        Ok(Expr::Union(branches))
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.cur() == &Tok::Minus {
            self.bump();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_path()
    }

    fn parse_path(&mut self) -> Result<Expr> {
        match self.cur() {
            Tok::Slash => {
                self.bump();
                let steps = if self.starts_step() {
                    self.parse_relative_steps()?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path(PathExpr {
                    start: PathStart::Root,
                    steps,
                }))
            }
            Tok::DoubleSlash => {
                self.bump();
                let mut steps = vec![Step::descendant_or_self_node()];
                steps.extend(self.parse_relative_steps()?);
                Ok(Expr::Path(PathExpr {
                    start: PathStart::Root,
                    steps,
                }))
            }
            _ if self.starts_step() => {
                let steps = self.parse_relative_steps()?;
                Ok(Expr::Path(PathExpr {
                    start: PathStart::Relative,
                    steps,
                }))
            }
            _ => self.parse_postfix(),
        }
    }

    /// Whether the current token opens an axis step rather than a
    /// primary expression.
    fn starts_step(&self) -> bool {
        match self.cur() {
            Tok::At | Tok::DotDot | Tok::Star => true,
            Tok::Name(n) => {
                if self.peek() == &Tok::ColonColon {
                    return true;
                }
                if self.peek() == &Tok::LParen {
                    return KIND_TESTS.contains(&n.as_str());
                }
                true
            }
            _ => false,
        }
    }

    fn parse_relative_steps(&mut self) -> Result<Vec<Step>> {
        let mut steps = vec![self.parse_step()?];
        loop {
            match self.cur() {
                Tok::Slash => {
                    self.bump();
                    steps.push(self.parse_step()?);
                }
                Tok::DoubleSlash => {
                    self.bump();
                    steps.push(Step::descendant_or_self_node());
                    steps.push(self.parse_step()?);
                }
                _ => break,
            }
        }
        Ok(steps)
    }

    fn parse_step(&mut self) -> Result<Step> {
        let (axis, test) = match self.cur().clone() {
            Tok::DotDot => {
                self.bump();
                (Axis::Parent, NodeTest::AnyKind)
            }
            Tok::At => {
                self.bump();
                (Axis::Attribute, self.parse_node_test()?)
            }
            Tok::Name(n) if self.peek() == &Tok::ColonColon => {
                let axis = AXES
                    .iter()
                    .find(|(name, _)| *name == n)
                    .map(|(_, axis)| *axis)
                    .ok_or_else(|| Error::StaticType(format!("unsupported axis '{n}'")))?;
                self.bump();
                self.bump();
                (axis, self.parse_node_test()?)
            }
            _ => (Axis::Child, self.parse_node_test()?),
        };
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest> {
        match self.bump() {
            Tok::Star => Ok(NodeTest::Wildcard),
            Tok::Name(name) => {
                if self.cur() == &Tok::LParen && KIND_TESTS.contains(&name.as_str()) {
                    self.bump();
                    let test = match name.as_str() {
                        "node" => NodeTest::AnyKind,
                        "text" => NodeTest::Text,
                        "comment" => NodeTest::Comment,
                        _ => {
                            let target = match self.cur().clone() {
                                Tok::StrLit(s) => {
                                    self.bump();
                                    Some(s)
                                }
                                Tok::Name(s) => {
                                    self.bump();
                                    Some(s)
                                }
                                _ => None,
                            };
                            NodeTest::Pi(target)
                        }
                    };
                    self.expect(Tok::RParen)?;
                    return Ok(test);
                }
                if let Some(prefix) = name.strip_suffix(":*") {
                    let uri = self.resolve_prefix(prefix)?;
                    return Ok(NodeTest::PrefixWildcard(uri));
                }
                let (ns_uri, local) = match name.split_once(':') {
                    Some((prefix, local)) => {
                        (Some(self.resolve_prefix(prefix)?), local.to_string())
                    }
                    None => (None, name),
                };
                Ok(NodeTest::Name { ns_uri, local })
            }
            other => Err(Error::Syntax(format!(
                "expected a node test, found {other:?}"
            ))),
        }
    }

    fn resolve_prefix(&self, prefix: &str) -> Result<String> {
        self.sc
            .namespace(prefix)
            .map(String::from)
            .ok_or_else(|| Error::StaticType(format!("undeclared namespace prefix '{prefix}'")))
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>> {
        let mut predicates = Vec::new();
        while self.cur() == &Tok::LBracket {
            self.bump();
            predicates.push(self.parse_expr()?);
            self.expect(Tok::RBracket)?;
        }
        Ok(predicates)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if self.cur() != &Tok::LBracket {
            return Ok(base);
        }
        let predicates = self.parse_predicates()?;
        Ok(Expr::Filter {
            base: Box::new(base),
            predicates,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Tok::Number(text) => Ok(Expr::Literal(parse_number_literal(&text)?)),
            Tok::StrLit(s) => Ok(Expr::Literal(xdm::XdmAtomicValue::String(s))),
            Tok::Dot => Ok(Expr::ContextItem),
            Tok::Dollar => match self.bump() {
                Tok::Name(name) => Ok(Expr::VarRef(name)),
                other => Err(Error::Syntax(format!(
                    "expected a variable name after '$', found {other:?}"
                ))),
            },
            Tok::LParen => {
                if self.cur() == &Tok::RParen {
                    self.bump();
                    return Ok(Expr::Sequence(Vec::new()));
                }
                let inner = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Tok::Name(name) if self.cur() == &Tok::LParen => {
                self.bump();
                let mut args: SmallVec<[Box<Expr>; 2]> = SmallVec::new();
                if self.cur() != &Tok::RParen {
                    args.push(Box::new(self.parse_single()?));
                    while self.cur() == &Tok::Comma {
                        self.bump();
                        args.push(Box::new(self.parse_single()?));
                    }
                }
                self.expect(Tok::RParen)?;
                let local = name.strip_prefix("fn:").unwrap_or(&name);
                if name.contains(':') && !name.starts_with("fn:") {
                    // A prefixed call targets a user-declared function.
                    let (prefix, local) = name.split_once(':').expect("prefixed");
                    let uri = self.resolve_prefix(prefix)?;
                    let clark = format!("{{{uri}}}{local}");
                    if !self.sc.has_function(&clark, args.len()) {
                        if self.sc.has_function_name(&clark) {
                            return Err(Error::StaticType(format!(
                                "function '{name}' exists but not with {} arguments",
                                args.len()
                            )));
                        }
                        return Err(Error::StaticType(format!("unknown function '{name}'")));
                    }
                    return Ok(Expr::UserFunctionCall { name: clark, args });
                }
                let func = functions::lookup(local)
                    .ok_or_else(|| Error::StaticType(format!("unknown function '{local}'")))?;
                if args.len() < func.min_arity || args.len() > func.max_arity {
                    return Err(Error::StaticType(format!(
                        "function '{local}' does not accept {} arguments",
                        args.len()
                    )));
                }
                Ok(Expr::FunctionCall {
                    name: local.to_string(),
                    args,
                })
            }
            other => Err(Error::Syntax(format!(
                "unexpected token {other:?} where an expression was expected"
            ))),
        }
    }
}

fn parse_number_literal(text: &str) -> Result<xdm::XdmAtomicValue> {
    if text.contains('.') || text.contains('e') || text.contains('E') {
        let value: f64 = text
            .parse()
            .map_err(|_| Error::Syntax(format!("invalid numeric literal '{text}'")))?;
        Ok(xdm::XdmAtomicValue::Double(value))
    } else {
        match text.parse::<i64>() {
            Ok(value) => Ok(xdm::XdmAtomicValue::Integer(value)),
            Err(_) => {
                let value: f64 = text
                    .parse()
                    .map_err(|_| Error::Syntax(format!("invalid numeric literal '{text}'")))?;
                Ok(xdm::XdmAtomicValue::Double(value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Expr {
        parse(src, &StaticContext::new()).unwrap()
    }

    #[test]
    fn absolute_path_with_predicate() {
        match parse_ok("/doc/item[2]") {
            Expr::Path(p) => {
                assert_eq!(p.start, PathStart::Root);
                assert_eq!(p.steps.len(), 2);
                assert_eq!(p.steps[1].predicates.len(), 1);
            }
            other => panic!("expected path, got {other:?}"),
        }
    }

    #[test]
    fn double_slash_inserts_descendant_step() {
        match parse_ok("//person") {
            Expr::Path(p) => {
                assert_eq!(p.steps.len(), 2);
                assert_eq!(p.steps[0].axis, Axis::DescendantOrSelf);
                assert_eq!(p.steps[0].test, NodeTest::AnyKind);
            }
            other => panic!("expected path, got {other:?}"),
        }
    }

    #[test]
    fn div_is_operator_in_operator_position() {
        assert!(matches!(
            parse_ok("4 div 2"),
            Expr::Arith(ArithOp::Div, _, _)
        ));
    }

    #[test]
    fn div_is_name_in_operand_position() {
        assert!(matches!(parse_ok("div"), Expr::Path(_)));
    }

    #[test]
    fn unknown_function_is_static_error() {
        let err = parse("no-such-fn()", &StaticContext::new()).unwrap_err();
        assert!(matches!(err, Error::StaticType(_)));
    }

    #[test]
    fn undeclared_prefix_is_static_error() {
        let err = parse("/p:root", &StaticContext::new()).unwrap_err();
        assert!(matches!(err, Error::StaticType(_)));
    }

    #[test]
    fn declared_prefix_resolves() {
        let mut sc = StaticContext::new();
        sc.declare_namespace("p", "http://example.com/p");
        match parse("/p:root", &sc).unwrap() {
            Expr::Path(p) => assert_eq!(
                p.steps[0].test,
                NodeTest::Name {
                    ns_uri: Some("http://example.com/p".into()),
                    local: "root".into()
                }
            ),
            other => panic!("expected path, got {other:?}"),
        }
    }

    #[test]
    fn comma_sequence() {
        match parse_ok("1, 2, 3") {
            Expr::Sequence(items) => assert_eq!(items.len(), 3),
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn trailing_garbage_rejected() {
        assert!(parse("1 2", &StaticContext::new()).is_err());
    }

    #[test]
    fn empty_parens_are_empty_sequence() {
        match parse_ok("()") {
            Expr::Sequence(items) => assert!(items.is_empty()),
            other => panic!("expected empty sequence, got {other:?}"),
        }
    }
}
