//! Match patterns for template rules.
//!
//! A pattern is the path subset of XPath read right to left: the last
//! step must match the node itself and the earlier steps constrain its
//! ancestors. Compilation reuses the expression parser and then checks
//! that the shape is a union of paths.

use xdm::{NodeKind, XdmNode};

use crate::ast::{Axis, Expr, NodeTest, PathExpr, PathStart, Step};
use crate::context::{DynamicContext, StaticContext};
use crate::error::{Error, Result};
use crate::evaluator::{effective_boolean_value, node_test_matches, Eval, Focus};

#[derive(Debug, Clone)]
pub struct Pattern {
    alternatives: Vec<PathPattern>,
    source: String,
}

#[derive(Debug, Clone)]
struct PathPattern {
    anchored: bool,
    steps: Vec<Step>,
}

pub fn compile_pattern(source: &str, sc: &StaticContext) -> Result<Pattern> {
    let expr = crate::parser::parse(source, sc)?;
    let branches = match expr {
        Expr::Union(branches) => branches,
        other => vec![other],
    };
    let mut alternatives = Vec::with_capacity(branches.len());
    for branch in branches {
        match branch {
            Expr::Path(path) => alternatives.push(path_pattern(path, source)?),
            _ => {
                return Err(Error::Syntax(format!(
                    "'{source}' is not a valid match pattern"
                )))
            }
        }
    }
    Ok(Pattern {
        alternatives,
        source: source.to_string(),
    })
}

fn path_pattern(path: PathExpr, source: &str) -> Result<PathPattern> {
    for step in &path.steps {
        match step.axis {
            Axis::Child | Axis::Attribute | Axis::DescendantOrSelf => {}
            _ => {
                return Err(Error::Syntax(format!(
                    "'{source}' uses an axis not allowed in match patterns"
                )))
            }
        }
    }
    Ok(PathPattern {
        anchored: path.start == PathStart::Root,
        steps: path.steps,
    })
}

impl Pattern {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the pattern matches the node. Predicates are evaluated
    /// with the candidate node as the context item.
    pub fn matches(&self, node: &XdmNode) -> Result<bool> {
        for alternative in &self.alternatives {
            if alternative.matches(node)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The XSLT default priority of this pattern.
    ///
    /// `/` is -0.5; a bare name test is 0.0; `*` and kind tests are
    /// -0.5; `p:*` is -0.25; anything with several steps or a predicate
    /// is 0.5. A union takes 0.5.
    pub fn default_priority(&self) -> f64 {
        if self.alternatives.len() != 1 {
            return 0.5;
        }
        let alt = &self.alternatives[0];
        match alt.steps.len() {
            0 => -0.5,
            1 => {
                let step = &alt.steps[0];
                if alt.anchored || !step.predicates.is_empty() {
                    return 0.5;
                }
                match &step.test {
                    NodeTest::Name { .. } | NodeTest::Pi(Some(_)) => 0.0,
                    NodeTest::PrefixWildcard(_) => -0.25,
                    _ => -0.5,
                }
            }
            _ => 0.5,
        }
    }
}

impl PathPattern {
    fn matches(&self, node: &XdmNode) -> Result<bool> {
        if self.steps.is_empty() {
            // The pattern "/" matches only a document node.
            return Ok(self.anchored && node.node_kind() == NodeKind::Document);
        }
        match_from(&self.steps, node, self.anchored)
    }
}

/// Matches the step list right to left starting at `node`.
fn match_from(steps: &[Step], node: &XdmNode, anchored: bool) -> Result<bool> {
    let (last, earlier) = steps.split_last().expect("non-empty steps");
    if last.axis == Axis::DescendantOrSelf && last.test == NodeTest::AnyKind {
        // A trailing `//` separator step: delegate to the step before it
        // from any position. Does not occur in practice since `a//b`
        // always has a step after the separator.
        return match_ancestors(earlier, Some(node.clone()), true, anchored);
    }
    if !step_matches(last, node)? {
        return Ok(false);
    }
    match_ancestors(earlier, node.parent(), false, anchored)
}

/// Consumes the remaining steps against the ancestor chain. `skipping`
/// means the separator to the right was `//`, so any number of
/// intermediate ancestors may be skipped.
fn match_ancestors(
    steps: &[Step],
    mut current: Option<XdmNode>,
    mut skipping: bool,
    anchored: bool,
) -> Result<bool> {
    let mut remaining = steps;
    loop {
        let (step, earlier) = match remaining.split_last() {
            Some(split) => split,
            None => {
                // A pending `//` separator absorbs the rest of the
                // ancestor chain, so the anchor is always satisfied.
                if !anchored || skipping {
                    return Ok(true);
                }
                // An anchored pattern requires the chain to sit just
                // below the document node.
                return Ok(match current {
                    Some(node) => node.node_kind() == NodeKind::Document,
                    None => false,
                });
            }
        };
        if step.axis == Axis::DescendantOrSelf && step.test == NodeTest::AnyKind {
            skipping = true;
            remaining = earlier;
            continue;
        }
        let node = match current {
            Some(ref node) => node.clone(),
            None => return Ok(false),
        };
        if step_matches(step, &node)? {
            if match_ancestors(earlier, node.parent(), false, anchored)? {
                return Ok(true);
            }
        }
        if skipping {
            // Try the same step one ancestor further up.
            current = node.parent();
            continue;
        }
        return Ok(false);
    }
}

fn step_matches(step: &Step, node: &XdmNode) -> Result<bool> {
    let attribute_axis = step.axis == Axis::Attribute;
    if attribute_axis != (node.node_kind() == NodeKind::Attribute) {
        return Ok(false);
    }
    if !node_test_matches(&step.test, node, attribute_axis) {
        return Ok(false);
    }
    if step.predicates.is_empty() {
        return Ok(true);
    }
    let dynamic = DynamicContext::new();
    let eval = Eval {
        dynamic: &dynamic,
        base_uri: None,
    };
    let focus = Focus {
        item: xdm::XdmItem::Node(node.clone()),
        position: 1,
        size: 1,
    };
    for predicate in &step.predicates {
        let value = eval.eval(predicate, Some(&focus))?;
        if !effective_boolean_value(&value)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdm::parse_xml_str;

    fn doc() -> XdmNode {
        parse_xml_str("<out><person id=\"p1\">a</person><person>b</person><other/></out>")
            .unwrap()
    }

    fn sc() -> StaticContext {
        StaticContext::new()
    }

    #[test]
    fn name_pattern_matches_elements() {
        let root = doc();
        let out = &root.children()[0];
        let person = &out.children()[0];
        let p = compile_pattern("person", &sc()).unwrap();
        assert!(p.matches(person).unwrap());
        assert!(!p.matches(out).unwrap());
        assert!(!p.matches(&root).unwrap());
    }

    #[test]
    fn slash_matches_only_document() {
        let root = doc();
        let p = compile_pattern("/", &sc()).unwrap();
        assert!(p.matches(&root).unwrap());
        assert!(!p.matches(&root.children()[0]).unwrap());
    }

    #[test]
    fn parent_step_constrains_match() {
        let root = doc();
        let out = &root.children()[0];
        let person = &out.children()[0];
        let p = compile_pattern("out/person", &sc()).unwrap();
        assert!(p.matches(person).unwrap());
        let q = compile_pattern("nope/person", &sc()).unwrap();
        assert!(!q.matches(person).unwrap());
    }

    #[test]
    fn anchored_pattern_requires_document_root() {
        let root = doc();
        let out = &root.children()[0];
        let person = &out.children()[0];
        let p = compile_pattern("/out/person", &sc()).unwrap();
        assert!(p.matches(person).unwrap());
        let q = compile_pattern("/person", &sc()).unwrap();
        assert!(!q.matches(person).unwrap());
    }

    #[test]
    fn double_slash_skips_ancestors() {
        let root = doc();
        let person = &root.children()[0].children()[0];
        let p = compile_pattern("//person", &sc()).unwrap();
        assert!(p.matches(person).unwrap());
    }

    #[test]
    fn predicate_filters_match() {
        let root = doc();
        let out = &root.children()[0];
        let with_id = &out.children()[0];
        let without_id = &out.children()[1];
        let p = compile_pattern("person[@id]", &sc()).unwrap();
        assert!(p.matches(with_id).unwrap());
        assert!(!p.matches(without_id).unwrap());
    }

    #[test]
    fn attribute_pattern() {
        let root = doc();
        let attr = &root.children()[0].children()[0].attributes()[0];
        let p = compile_pattern("@id", &sc()).unwrap();
        assert!(p.matches(attr).unwrap());
        assert!(!p.matches(&root.children()[0]).unwrap());
    }

    #[test]
    fn default_priorities() {
        let sc = sc();
        assert_eq!(compile_pattern("/", &sc).unwrap().default_priority(), -0.5);
        assert_eq!(
            compile_pattern("person", &sc).unwrap().default_priority(),
            0.0
        );
        assert_eq!(compile_pattern("*", &sc).unwrap().default_priority(), -0.5);
        assert_eq!(
            compile_pattern("text()", &sc).unwrap().default_priority(),
            -0.5
        );
        assert_eq!(
            compile_pattern("out/person", &sc).unwrap().default_priority(),
            0.5
        );
        assert_eq!(
            compile_pattern("person[@id]", &sc)
                .unwrap()
                .default_priority(),
            0.5
        );
    }

    #[test]
    fn wildcard_matches_any_element() {
        let root = doc();
        let out = &root.children()[0];
        let p = compile_pattern("*", &sc()).unwrap();
        assert!(p.matches(out).unwrap());
        assert!(!p.matches(&root).unwrap());
    }
}
