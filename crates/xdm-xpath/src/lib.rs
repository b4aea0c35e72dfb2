//! XPath compilation and evaluation over the XDM value model.
//!
//! Expressions are compiled once against a [`StaticContext`]
//! (namespace bindings, static base URI) and can then be evaluated any
//! number of times against different [`DynamicContext`]s. Compiled
//! expressions are immutable and safe to share across threads.
//!
//! ```
//! use xdm::{parse_xml_str, XdmItem};
//! use xdm_xpath::{compile, DynamicContext, StaticContext};
//!
//! let doc = parse_xml_str("<a><b>1</b><b>2</b></a>").unwrap();
//! let expr = compile("count(/a/b)", &StaticContext::new()).unwrap();
//! let ctx = DynamicContext::with_context_item(XdmItem::Node(doc));
//! assert_eq!(expr.evaluate(&ctx).unwrap().to_string(), "2");
//! ```

mod ast;
mod context;
mod error;
mod evaluator;
mod functions;
mod lexer;
mod parser;
mod pattern;

use std::sync::Arc;

use xdm::{LazyValue, XdmItem, XdmValue};

pub use context::{DynamicContext, FunctionResolver, StaticContext};
pub use error::{Error, Result};
pub use pattern::{compile_pattern, Pattern};

use evaluator::{Eval, Focus};

/// A compiled XPath expression.
#[derive(Debug, Clone)]
pub struct CompiledXPath {
    expr: Arc<ast::Expr>,
    base_uri: Option<String>,
    source: String,
}

/// Compiles an expression against the static context. Namespace
/// prefixes and function names are resolved here; unknown ones are
/// compile-time errors.
pub fn compile(source: &str, sc: &StaticContext) -> Result<CompiledXPath> {
    let expr = parser::parse(source, sc)?;
    tracing::trace!(source, "compiled xpath expression");
    Ok(CompiledXPath {
        expr: Arc::new(expr),
        base_uri: sc.base_uri().map(String::from),
        source: source.to_string(),
    })
}

impl CompiledXPath {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression, returning the full result sequence.
    pub fn evaluate(&self, ctx: &DynamicContext) -> Result<XdmValue> {
        self.evaluate_focused(ctx, 1, 1)
    }

    /// Evaluates with an explicit focus position and size, as when the
    /// context item is one of several being processed in turn.
    pub fn evaluate_focused(
        &self,
        ctx: &DynamicContext,
        position: usize,
        size: usize,
    ) -> Result<XdmValue> {
        let eval = Eval {
            dynamic: ctx,
            base_uri: self.base_uri.as_deref(),
        };
        let focus = ctx.context_item().map(|item| Focus {
            item: item.clone(),
            position,
            size,
        });
        eval.eval(&self.expr, focus.as_ref())
    }

    /// Evaluates and returns exactly one item. Any other cardinality
    /// is an error.
    pub fn evaluate_single(&self, ctx: &DynamicContext) -> Result<XdmItem> {
        let value = self.evaluate(ctx)?;
        let mut items = value.into_items().into_iter();
        match (items.next(), items.next()) {
            (Some(item), None) => Ok(item),
            (None, _) => Err(Error::Cardinality(
                "expected exactly one item, got an empty sequence".into(),
            )),
            (Some(_), Some(_)) => Err(Error::Cardinality(
                "expected exactly one item, got more than one".into(),
            )),
        }
    }

    /// The effective boolean value of the result.
    pub fn effective_boolean_value(&self, ctx: &DynamicContext) -> Result<bool> {
        let value = self.evaluate(ctx)?;
        evaluator::effective_boolean_value(&value)
    }

    /// Evaluates into a pull-style iterator of items.
    pub fn evaluate_lazy(&self, ctx: &DynamicContext) -> Result<LazyValue> {
        let value = self.evaluate(ctx)?;
        Ok(LazyValue::new(
            value.into_items().into_iter().map(Ok),
        ))
    }
}

/// The effective boolean value of an already materialized sequence.
pub fn effective_boolean_value(value: &XdmValue) -> Result<bool> {
    evaluator::effective_boolean_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdm::{parse_xml_str, NodeKind, XdmAtomicValue};

    fn ctx_for(xml: &str) -> DynamicContext {
        let doc = parse_xml_str(xml).unwrap();
        DynamicContext::with_context_item(XdmItem::Node(doc))
    }

    fn eval(expr: &str, ctx: &DynamicContext) -> XdmValue {
        compile(expr, &StaticContext::new())
            .unwrap()
            .evaluate(ctx)
            .unwrap()
    }

    #[test]
    fn child_and_descendant_steps() {
        let ctx = ctx_for("<out><person>text1</person><person>text2</person></out>");
        assert_eq!(eval("/out/person", &ctx).size(), 2);
        assert_eq!(eval("//person", &ctx).size(), 2);
        assert_eq!(eval("count(//person)", &ctx).to_string(), "2");
    }

    #[test]
    fn positional_predicate_counts_per_origin() {
        let ctx = ctx_for("<out><person>a</person><person>b</person></out>");
        let first = eval("//person[1]", &ctx);
        assert_eq!(first.size(), 1);
        assert_eq!(first.head().unwrap().as_node().unwrap().string_value(), "a");
        let second = eval("/out/person[2]", &ctx);
        assert_eq!(second.head().unwrap().as_node().unwrap().string_value(), "b");
    }

    #[test]
    fn attribute_axis() {
        let ctx = ctx_for("<e a=\"1\" b=\"2\"/>");
        let a = eval("/e/@a", &ctx);
        assert_eq!(a.to_string(), "a=\"1\"");
        assert_eq!(a.head().unwrap().as_node().unwrap().string_value(), "1");
        assert_eq!(eval("count(/e/@*)", &ctx).to_string(), "2");
    }

    #[test]
    fn function_calls_nest_as_arguments() {
        let ctx = ctx_for("<out><person>a</person></out>");
        let v = eval("not(empty(//person))", &ctx);
        assert_eq!(
            v.head().unwrap().as_atomic(),
            Some(&XdmAtomicValue::Boolean(true))
        );
        assert_eq!(
            eval("concat(string(count(//person)), '-', 'x')", &ctx).to_string(),
            "1-x"
        );
    }

    #[test]
    fn evaluate_single_requires_exactly_one_item() {
        let ctx = ctx_for("<out><p>a</p><p>b</p></out>");
        let sc = StaticContext::new();
        let one = compile("/out/p[1]", &sc).unwrap();
        let item = one.evaluate_single(&ctx).unwrap();
        assert_eq!(item.as_node().unwrap().string_value(), "a");
        let none = compile("/out/missing", &sc).unwrap();
        assert!(matches!(
            none.evaluate_single(&ctx),
            Err(Error::Cardinality(_))
        ));
        let many = compile("/out/p", &sc).unwrap();
        assert!(matches!(
            many.evaluate_single(&ctx),
            Err(Error::Cardinality(_))
        ));
    }

    #[test]
    fn attribute_comparison_in_predicate() {
        let ctx = ctx_for("<out><p id=\"x\">1</p><p id=\"y\">2</p></out>");
        let hit = eval("/out/p[@id='y']", &ctx);
        assert_eq!(hit.size(), 1);
        assert_eq!(hit.head().unwrap().as_node().unwrap().string_value(), "2");
    }

    #[test]
    fn results_come_back_in_document_order() {
        let ctx = ctx_for("<r><a><x>1</x></a><b><x>2</x></b></r>");
        let hits = eval("//x | //a", &ctx);
        assert_eq!(hits.size(), 3);
        let names: Vec<String> = hits
            .iter()
            .map(|i| {
                i.as_node()
                    .unwrap()
                    .name()
                    .map(|n| n.lexical())
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(names, vec!["a", "x", "x"]);
    }

    #[test]
    fn arithmetic_promotion() {
        let ctx = DynamicContext::new();
        let v = eval("1 + 2", &ctx);
        assert_eq!(
            v.head().unwrap().as_atomic(),
            Some(&XdmAtomicValue::Integer(3))
        );
        let v = eval("1 + 2.5", &ctx);
        assert_eq!(
            v.head().unwrap().as_atomic(),
            Some(&XdmAtomicValue::Double(3.5))
        );
        let v = eval("4 div 2", &ctx);
        assert_eq!(
            v.head().unwrap().as_atomic(),
            Some(&XdmAtomicValue::Double(2.0))
        );
        let v = eval("7 idiv 2", &ctx);
        assert_eq!(
            v.head().unwrap().as_atomic(),
            Some(&XdmAtomicValue::Integer(3))
        );
    }

    #[test]
    fn integer_division_by_zero_raises_foar0001() {
        let err = compile("1 div 0", &StaticContext::new())
            .unwrap()
            .evaluate(&DynamicContext::new())
            .unwrap_err();
        assert_eq!(err.code(), Some("FOAR0001"));
    }

    #[test]
    fn untyped_node_content_compares_numerically() {
        let ctx = ctx_for("<out><n>10</n><n>3</n></out>");
        let hits = eval("/out/n[. > 5]", &ctx);
        assert_eq!(hits.size(), 1);
        assert_eq!(hits.head().unwrap().as_node().unwrap().string_value(), "10");
    }

    #[test]
    fn general_comparison_is_existential() {
        let ctx = ctx_for("<out><n>1</n><n>2</n></out>");
        assert_eq!(eval("/out/n = 2", &ctx).to_string(), "true");
        assert_eq!(eval("/out/n = 9", &ctx).to_string(), "false");
    }

    #[test]
    fn effective_boolean_value_rules() {
        let ctx = ctx_for("<out><a/></out>");
        let compiled = compile("/out/a", &StaticContext::new()).unwrap();
        assert!(compiled.effective_boolean_value(&ctx).unwrap());
        let compiled = compile("/out/missing", &StaticContext::new()).unwrap();
        assert!(!compiled.effective_boolean_value(&ctx).unwrap());
        let compiled = compile("''", &StaticContext::new()).unwrap();
        assert!(!compiled.effective_boolean_value(&ctx).unwrap());
        let compiled = compile("(1, 2)", &StaticContext::new()).unwrap();
        assert_eq!(
            compiled.effective_boolean_value(&ctx).unwrap_err().code(),
            Some("FORG0006")
        );
    }

    #[test]
    fn variables_resolve_by_lexical_name() {
        let mut ctx = DynamicContext::new();
        ctx.bind_variable(
            "err:code",
            XdmValue::from_items(vec![XdmItem::Atomic(XdmAtomicValue::String(
                "FOAR0001".into(),
            ))]),
        );
        assert_eq!(eval("$err:code", &ctx).to_string(), "FOAR0001");
    }

    #[test]
    fn unbound_variable_is_name_error() {
        let err = compile("$nope", &StaticContext::new())
            .unwrap()
            .evaluate(&DynamicContext::new())
            .unwrap_err();
        assert!(matches!(err, Error::Name(_)));
    }

    #[test]
    fn concat_operator_and_function() {
        let ctx = DynamicContext::new();
        assert_eq!(eval("'a' || 'b'", &ctx).to_string(), "ab");
        assert_eq!(eval("concat('a', 'b', 'c')", &ctx).to_string(), "abc");
    }

    #[test]
    fn string_and_number_functions() {
        let ctx = ctx_for("<n>42</n>");
        assert_eq!(eval("string(/n)", &ctx).to_string(), "42");
        assert_eq!(eval("number(/n) + 1", &ctx).to_string(), "43");
        assert_eq!(eval("string-length('abcd')", &ctx).to_string(), "4");
    }

    #[test]
    fn position_and_last_in_predicates() {
        let ctx = ctx_for("<out><i/><i/><i/></out>");
        assert_eq!(eval("/out/i[position() = 2]", &ctx).size(), 1);
        assert_eq!(eval("/out/i[last()]", &ctx).size(), 1);
    }

    #[test]
    fn parent_and_self_axes() {
        let ctx = ctx_for("<out><mid><leaf/></mid></out>");
        let leaf_parent = eval("//leaf/..", &ctx);
        assert_eq!(
            leaf_parent
                .head()
                .unwrap()
                .as_node()
                .unwrap()
                .name()
                .unwrap()
                .lexical(),
            "mid"
        );
        assert_eq!(eval("//leaf/self::leaf", &ctx).size(), 1);
    }

    #[test]
    fn text_and_comment_kind_tests() {
        let ctx = ctx_for("<out>hi<!--note--></out>");
        let texts = eval("/out/text()", &ctx);
        assert_eq!(texts.to_string(), "hi");
        let comments = eval("/out/comment()", &ctx);
        assert_eq!(
            comments.head().unwrap().as_node().unwrap().node_kind(),
            NodeKind::Comment
        );
    }

    #[test]
    fn root_expression_returns_document() {
        let ctx = ctx_for("<out/>");
        let root = eval("/", &ctx);
        assert_eq!(
            root.head().unwrap().as_node().unwrap().node_kind(),
            NodeKind::Document
        );
    }

    #[test]
    fn filter_on_variable_sequence() {
        let mut ctx = DynamicContext::new();
        ctx.bind_variable(
            "seq",
            XdmValue::from_items(vec![
                XdmItem::Atomic(XdmAtomicValue::Integer(10)),
                XdmItem::Atomic(XdmAtomicValue::Integer(20)),
                XdmItem::Atomic(XdmAtomicValue::Integer(30)),
            ]),
        );
        assert_eq!(eval("$seq[2]", &ctx).to_string(), "20");
        assert_eq!(eval("$seq[. > 15]", &ctx).size(), 2);
    }

    #[test]
    fn missing_context_item_is_dynamic_error() {
        let err = compile("/a", &StaticContext::new())
            .unwrap()
            .evaluate(&DynamicContext::new())
            .unwrap_err();
        assert_eq!(err.code(), Some("XPDY0002"));
    }

    #[test]
    fn lazy_evaluation_streams_items() {
        let ctx = ctx_for("<out><i>1</i><i>2</i></out>");
        let compiled = compile("//i", &StaticContext::new()).unwrap();
        let mut lazy = compiled.evaluate_lazy(&ctx).unwrap();
        assert!(lazy.next().is_some());
        assert!(lazy.next().is_some());
        assert!(lazy.next().is_none());
    }

    #[test]
    fn user_function_call_through_resolver() {
        let mut sc = StaticContext::new();
        sc.declare_namespace("mf", "http://example.com/mf");
        sc.declare_function("{http://example.com/mf}double", 1);
        let compiled = compile("mf:double(21)", &sc).unwrap();
        let mut ctx = DynamicContext::new();
        ctx.set_function_resolver(std::sync::Arc::new(|name: &str, args: &[XdmValue]| {
            assert_eq!(name, "{http://example.com/mf}double");
            let n = args[0]
                .head()
                .and_then(|i| i.as_atomic())
                .map(|a| a.integer_value())
                .unwrap_or(0);
            Ok(XdmValue::from_items(vec![XdmItem::Atomic(
                XdmAtomicValue::Integer(n * 2),
            )]))
        }));
        assert_eq!(compiled.evaluate(&ctx).unwrap().to_string(), "42");
    }

    #[test]
    fn undeclared_user_function_is_static_error() {
        let mut sc = StaticContext::new();
        sc.declare_namespace("mf", "http://example.com/mf");
        assert!(matches!(
            compile("mf:nope()", &sc),
            Err(Error::StaticType(_))
        ));
    }

    #[test]
    fn focused_evaluation_reports_position() {
        let ctx = ctx_for("<out/>");
        let compiled = compile("position() = 3", &StaticContext::new()).unwrap();
        assert_eq!(compiled.evaluate_focused(&ctx, 3, 5).unwrap().to_string(), "true");
    }

    #[test]
    fn resolve_uri_against_explicit_base() {
        let ctx = DynamicContext::new();
        let v = eval(
            "resolve-uri('code', 'http://example.com/dir/')",
            &ctx,
        );
        assert_eq!(v.to_string(), "http://example.com/dir/code");
    }

    #[test]
    fn resolve_uri_without_base_is_forg0002() {
        let err = compile("resolve-uri('code')", &StaticContext::new())
            .unwrap()
            .evaluate(&DynamicContext::new())
            .unwrap_err();
        assert_eq!(err.code(), Some("FORG0002"));
    }
}
