//! Stylesheet execution.
//!
//! Instructions evaluate to item sequences. Element construction runs
//! through a `TreeBuilder`; when a sequence is appended to a builder,
//! nodes are deep-copied and adjacent atomic items are joined with a
//! single space into one text node.

use std::collections::HashMap;
use std::sync::Arc;

use xdm::{NodeKind, TreeBuilder, XdmAtomicValue, XdmItem, XdmNode, XdmValue};
use xdm_xpath::{CompiledXPath, DynamicContext};

use super::compiler::{
    Avt, AvtPart, Instruction, ParamDecl, Stylesheet, TemplateRule, TypeName, WithParam,
};
use crate::error::{Error, Result};

/// A prepared execution: the stylesheet plus its evaluated global
/// bindings. Cloneable so the function resolver handed to the XPath
/// evaluator can re-enter it.
#[derive(Clone)]
pub(crate) struct Execution {
    sheet: Arc<Stylesheet>,
    globals: Arc<HashMap<String, XdmValue>>,
}

/// Focus and local bindings of one sequence constructor.
#[derive(Clone, Default)]
struct Env {
    context: Option<XdmItem>,
    position: usize,
    size: usize,
    locals: HashMap<String, XdmValue>,
}

impl Env {
    fn for_item(item: XdmItem, position: usize, size: usize) -> Self {
        Env {
            context: Some(item),
            position,
            size,
            locals: HashMap::new(),
        }
    }
}

impl Execution {
    /// Evaluates the global parameters and variables in declaration
    /// order. Externally supplied parameter values win over defaults.
    pub fn prepare(
        sheet: Arc<Stylesheet>,
        external_params: &HashMap<String, XdmValue>,
        global_context: Option<&XdmItem>,
    ) -> Result<Execution> {
        let mut globals: HashMap<String, XdmValue> = HashMap::new();
        for binding in &sheet.globals {
            if binding.is_param {
                if let Some(value) = external_params.get(&binding.name) {
                    globals.insert(binding.name.clone(), value.clone());
                    continue;
                }
            }
            let partial = Execution {
                sheet: Arc::clone(&sheet),
                globals: Arc::new(globals.clone()),
            };
            let mut env = Env::default();
            env.context = global_context.cloned();
            env.position = 1;
            env.size = 1;
            let value = match &binding.select {
                Some(select) => partial.eval_xpath(select, &env)?,
                None => {
                    let items = partial.execute_sequence(&binding.content, &mut env.clone())?;
                    XdmValue::from_items(items)
                }
            };
            globals.insert(binding.name.clone(), value);
        }
        Ok(Execution {
            sheet,
            globals: Arc::new(globals),
        })
    }

    // -- entry points -------------------------------------------------

    pub fn apply_to(
        &self,
        selection: &XdmValue,
        params: &HashMap<String, XdmValue>,
    ) -> Result<Vec<XdmItem>> {
        self.apply_templates(selection.items(), None, params)
    }

    pub fn call_named_template(
        &self,
        clark_name: &str,
        params: &HashMap<String, XdmValue>,
        context: Option<&XdmItem>,
    ) -> Result<Vec<XdmItem>> {
        let template = self.sheet.named.get(clark_name).ok_or_else(|| {
            Error::Name(format!("no template is named '{clark_name}'"))
        })?;
        let mut env = Env::default();
        env.context = context.cloned();
        env.position = 1;
        env.size = 1;
        env.locals = self.bind_params(&template.params, params, &env)?;
        self.execute_sequence(&template.body, &mut env)
    }

    pub fn call_function(&self, clark_name: &str, args: &[XdmValue]) -> Result<XdmValue> {
        let function = match self.sheet.functions.get(&(clark_name.to_string(), args.len())) {
            Some(f) => f,
            None => {
                let declared_arities: Vec<usize> = self
                    .sheet
                    .functions
                    .keys()
                    .filter(|(name, _)| name == clark_name)
                    .map(|(_, arity)| *arity)
                    .collect();
                if declared_arities.is_empty() {
                    return Err(Error::Name(format!(
                        "no function is named '{clark_name}'"
                    )));
                }
                return Err(Error::Arity(format!(
                    "function '{clark_name}' takes {declared_arities:?} arguments, not {}",
                    args.len()
                )));
            }
        };
        let mut env = Env::default();
        for (decl, arg) in function.params.iter().zip(args) {
            let value = coerce(arg.clone(), decl.as_type, &format!("parameter ${}", decl.name))?;
            env.locals.insert(decl.name.clone(), value);
        }
        let items = self.execute_sequence(&function.body, &mut env)?;
        coerce(
            XdmValue::from_items(items),
            function.result_type,
            &format!("result of function '{clark_name}'"),
        )
    }

    // -- template rule selection --------------------------------------

    fn apply_templates(
        &self,
        items: &[XdmItem],
        mode: Option<&str>,
        params: &HashMap<String, XdmValue>,
    ) -> Result<Vec<XdmItem>> {
        let mut out = Vec::new();
        let size = items.len();
        for (index, item) in items.iter().enumerate() {
            out.extend(self.apply_one(item, index + 1, size, mode, params)?);
        }
        Ok(out)
    }

    fn apply_one(
        &self,
        item: &XdmItem,
        position: usize,
        size: usize,
        mode: Option<&str>,
        params: &HashMap<String, XdmValue>,
    ) -> Result<Vec<XdmItem>> {
        if let XdmItem::Node(node) = item {
            if let Some(rule) = self.best_rule(node, mode)? {
                let mut env = Env::for_item(item.clone(), position, size);
                env.locals = self.bind_params(&rule.params, params, &env)?;
                return self.execute_sequence(&rule.body, &mut env);
            }
            return self.builtin_rule(node, mode, params);
        }
        // Built-in rule for atomic items: their string value as text.
        Ok(vec![XdmItem::Node(make_text_node(&item_text(item)?))])
    }

    /// Highest priority wins; among equals the latest declaration wins.
    fn best_rule(&self, node: &XdmNode, mode: Option<&str>) -> Result<Option<&TemplateRule>> {
        let mut best: Option<&TemplateRule> = None;
        for rule in &self.sheet.rules {
            if rule.mode.as_deref() != mode {
                continue;
            }
            if !rule.pattern.matches(node)? {
                continue;
            }
            best = match best {
                None => Some(rule),
                Some(current)
                    if rule.priority > current.priority
                        || (rule.priority == current.priority && rule.order > current.order) =>
                {
                    Some(rule)
                }
                other => other,
            };
        }
        Ok(best)
    }

    fn builtin_rule(
        &self,
        node: &XdmNode,
        mode: Option<&str>,
        params: &HashMap<String, XdmValue>,
    ) -> Result<Vec<XdmItem>> {
        match node.node_kind() {
            NodeKind::Document | NodeKind::Element => {
                let children: Vec<XdmItem> =
                    node.children().into_iter().map(XdmItem::Node).collect();
                self.apply_templates(&children, mode, params)
            }
            NodeKind::Text | NodeKind::Attribute => {
                Ok(vec![XdmItem::Node(make_text_node(&node.string_value()))])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn bind_params(
        &self,
        decls: &[ParamDecl],
        supplied: &HashMap<String, XdmValue>,
        env: &Env,
    ) -> Result<HashMap<String, XdmValue>> {
        let mut locals = env.locals.clone();
        for decl in decls {
            let value = match supplied.get(&decl.name) {
                Some(value) => coerce(
                    value.clone(),
                    decl.as_type,
                    &format!("parameter ${}", decl.name),
                )?,
                None => match &decl.default {
                    Some(select) => self.eval_xpath(select, env)?,
                    None if decl.required => {
                        return Err(Error::dynamic(
                            "XTDE0700",
                            format!("required parameter ${} was not supplied", decl.name),
                        ))
                    }
                    None => XdmValue::empty(),
                },
            };
            locals.insert(decl.name.clone(), value);
        }
        Ok(locals)
    }

    // -- instruction execution ----------------------------------------

    fn execute_sequence(&self, body: &[Instruction], env: &mut Env) -> Result<Vec<XdmItem>> {
        let mut out = Vec::new();
        for instruction in body {
            out.extend(self.execute_one(instruction, env)?);
        }
        Ok(out)
    }

    fn execute_one(&self, instruction: &Instruction, env: &mut Env) -> Result<Vec<XdmItem>> {
        match instruction {
            Instruction::LiteralText(text) => {
                Ok(vec![XdmItem::Node(make_text_node(text))])
            }
            Instruction::LiteralElement {
                name,
                namespaces,
                attributes,
                content,
            } => {
                let mut builder = TreeBuilder::element_root(name.clone());
                for (prefix, uri) in namespaces {
                    builder.namespace(prefix, uri);
                }
                for (attr_name, avt) in attributes {
                    let value = self.eval_avt(avt, env)?;
                    builder.attribute(attr_name.clone(), value)?;
                }
                let items = self.execute_sequence(content, &mut env.clone())?;
                append_items(&mut builder, &items)?;
                Ok(vec![XdmItem::Node(builder.finish())])
            }
            Instruction::ValueOf { select, separator } => {
                let value = self.eval_xpath(select, env)?;
                let parts: Vec<String> = value
                    .iter()
                    .map(item_text)
                    .collect::<Result<Vec<_>>>()?;
                Ok(vec![XdmItem::Node(make_text_node(&parts.join(separator)))])
            }
            Instruction::Sequence { select } => {
                Ok(self.eval_xpath(select, env)?.into_items())
            }
            Instruction::CopyOf { select } => {
                let value = self.eval_xpath(select, env)?;
                let mut out = Vec::new();
                for item in value.iter() {
                    match item {
                        XdmItem::Node(node) => out.push(XdmItem::Node(copy_to_fresh_tree(node)?)),
                        other => out.push(other.clone()),
                    }
                }
                Ok(out)
            }
            Instruction::ForEach { select, body } => {
                let selection = self.eval_xpath(select, env)?;
                let size = selection.size();
                let mut out = Vec::new();
                for (index, item) in selection.iter().enumerate() {
                    let mut inner = Env {
                        context: Some(item.clone()),
                        position: index + 1,
                        size,
                        locals: env.locals.clone(),
                    };
                    out.extend(self.execute_sequence(body, &mut inner)?);
                }
                Ok(out)
            }
            Instruction::If { test, body } => {
                let value = self.eval_xpath(test, env)?;
                if xdm_xpath::effective_boolean_value(&value)? {
                    self.execute_sequence(body, &mut env.clone())
                } else {
                    Ok(Vec::new())
                }
            }
            Instruction::ApplyTemplates {
                select,
                mode,
                with_params,
            } => {
                let selection = match select {
                    Some(expr) => self.eval_xpath(expr, env)?,
                    None => match &env.context {
                        Some(XdmItem::Node(node)) => XdmValue::from_items(
                            node.children().into_iter().map(XdmItem::Node).collect(),
                        ),
                        _ => {
                            return Err(Error::dynamic(
                                "XPTY0004",
                                "xsl:apply-templates without select requires a node context",
                            ))
                        }
                    },
                };
                let params = self.eval_with_params(with_params, env)?;
                self.apply_templates(selection.items(), mode.as_deref(), &params)
            }
            Instruction::CallTemplate { name, with_params } => {
                let params = self.eval_with_params(with_params, env)?;
                let template = self.sheet.named.get(name).ok_or_else(|| {
                    Error::Name(format!("no template is named '{name}'"))
                })?;
                let mut inner = Env {
                    context: env.context.clone(),
                    position: env.position,
                    size: env.size,
                    locals: HashMap::new(),
                };
                inner.locals = self.bind_params(&template.params, &params, &inner)?;
                self.execute_sequence(&template.body, &mut inner)
            }
            Instruction::Variable {
                name,
                select,
                content,
            } => {
                let value = match select {
                    Some(expr) => self.eval_xpath(expr, env)?,
                    None => XdmValue::from_items(
                        self.execute_sequence(content, &mut env.clone())?,
                    ),
                };
                env.locals.insert(name.clone(), value);
                Ok(Vec::new())
            }
            Instruction::Comment { content } => {
                let items = self.execute_sequence(content, &mut env.clone())?;
                let text: String = items
                    .iter()
                    .map(item_text)
                    .collect::<Result<Vec<_>>>()?
                    .concat();
                Ok(vec![XdmItem::Node(make_comment_node(&text))])
            }
            Instruction::Message { select, content } => {
                let text = match select {
                    Some(expr) => {
                        let value = self.eval_xpath(expr, env)?;
                        value
                            .iter()
                            .map(item_text)
                            .collect::<Result<Vec<_>>>()?
                            .join(" ")
                    }
                    None => {
                        let items = self.execute_sequence(content, &mut env.clone())?;
                        items
                            .iter()
                            .map(item_text)
                            .collect::<Result<Vec<_>>>()?
                            .concat()
                    }
                };
                tracing::info!(target: "xsl::message", "{text}");
                Ok(Vec::new())
            }
            Instruction::ResultDocument { href, content } => {
                let target = self.eval_avt(href, env)?;
                let items = self.execute_sequence(content, &mut env.clone())?;
                let mut builder = TreeBuilder::document();
                append_items(&mut builder, &items)?;
                let document = builder.finish();
                let serialized = document.serialize(&xdm::SerializationOptions {
                    omit_xml_declaration: false,
                    ..Default::default()
                });
                if let Err(err) = std::fs::write(&target, &serialized) {
                    tracing::warn!(href = %target, error = %err, "xsl:result-document write failed");
                    return Err(Error::Io(err));
                }
                tracing::debug!(href = %target, bytes = serialized.len(), "wrote result document");
                // Secondary results never appear in the primary output.
                Ok(Vec::new())
            }
            Instruction::Try { body, catch } => {
                match self.execute_sequence(body, &mut env.clone()) {
                    Ok(items) => Ok(items),
                    Err(err) => {
                        let (code, description) = match &err {
                            Error::Dynamic { code, description } => {
                                (code.clone(), description.clone())
                            }
                            other => ("FOER0000".to_string(), other.to_string()),
                        };
                        tracing::debug!(code = %code, "xsl:try caught a dynamic error");
                        let mut inner = env.clone();
                        inner.locals.insert(
                            "err:code".to_string(),
                            XdmValue::from_items(vec![XdmItem::Atomic(
                                XdmAtomicValue::String(code),
                            )]),
                        );
                        inner.locals.insert(
                            "err:description".to_string(),
                            XdmValue::from_items(vec![XdmItem::Atomic(
                                XdmAtomicValue::String(description),
                            )]),
                        );
                        self.execute_sequence(catch, &mut inner)
                    }
                }
            }
        }
    }

    fn eval_with_params(
        &self,
        with_params: &[WithParam],
        env: &Env,
    ) -> Result<HashMap<String, XdmValue>> {
        let mut out = HashMap::new();
        for wp in with_params {
            let value = match &wp.select {
                Some(expr) => self.eval_xpath(expr, env)?,
                None => XdmValue::from_items(
                    self.execute_sequence(&wp.content, &mut env.clone())?,
                ),
            };
            out.insert(wp.name.clone(), value);
        }
        Ok(out)
    }

    fn eval_avt(&self, avt: &Avt, env: &Env) -> Result<String> {
        let mut out = String::new();
        for part in &avt.parts {
            match part {
                AvtPart::Text(text) => out.push_str(text),
                AvtPart::Expr(expr) => {
                    let value = self.eval_xpath(expr, env)?;
                    let parts: Vec<String> = value
                        .iter()
                        .map(item_text)
                        .collect::<Result<Vec<_>>>()?;
                    out.push_str(&parts.join(" "));
                }
            }
        }
        Ok(out)
    }

    fn eval_xpath(&self, expr: &CompiledXPath, env: &Env) -> Result<XdmValue> {
        let mut ctx = DynamicContext::new();
        if let Some(item) = &env.context {
            ctx.set_context_item(item.clone());
        }
        for (name, value) in self.globals.iter() {
            ctx.bind_variable(name, value.clone());
        }
        for (name, value) in &env.locals {
            ctx.bind_variable(name, value.clone());
        }
        let respawn = self.clone();
        ctx.set_function_resolver(Arc::new(move |name: &str, args: &[XdmValue]| {
            respawn.call_function(name, args).map_err(|err| match err {
                Error::Dynamic { code, description } => {
                    xdm_xpath::Error::Dynamic { code, description }
                }
                other => xdm_xpath::Error::Dynamic {
                    code: "FOER0000".to_string(),
                    description: other.to_string(),
                },
            })
        }));
        let position = env.position.max(1);
        let size = env.size.max(1);
        Ok(expr.evaluate_focused(&ctx, position, size)?)
    }
}

// ---------------------------------------------------------------------------
// Sequence-to-tree assembly
// ---------------------------------------------------------------------------

/// Appends a result sequence as content of the open node: nodes are
/// deep-copied, runs of adjacent atomic items become one space-joined
/// text node.
pub(crate) fn append_items(builder: &mut TreeBuilder, items: &[XdmItem]) -> Result<()> {
    let mut pending: Vec<String> = Vec::new();
    for item in items {
        match item {
            XdmItem::Atomic(atom) => pending.push(atom.string_value()),
            XdmItem::Node(node) => {
                flush_text(builder, &mut pending);
                builder.copy_node(node)?;
            }
            XdmItem::Function(_) => {
                return Err(Error::Type(
                    "a function item cannot be serialized into a tree".into(),
                ))
            }
        }
    }
    flush_text(builder, &mut pending);
    Ok(())
}

fn flush_text(builder: &mut TreeBuilder, pending: &mut Vec<String>) {
    if !pending.is_empty() {
        builder.text(&pending.join(" "));
        pending.clear();
    }
}

pub(crate) fn make_text_node(text: &str) -> XdmNode {
    let mut builder = TreeBuilder::document();
    builder.text(text);
    let doc = builder.finish();
    doc.children().into_iter().next().unwrap_or(doc)
}

fn make_comment_node(text: &str) -> XdmNode {
    let mut builder = TreeBuilder::document();
    builder.comment(text);
    let doc = builder.finish();
    doc.children().into_iter().next().unwrap_or(doc)
}

fn copy_to_fresh_tree(node: &XdmNode) -> Result<XdmNode> {
    let mut builder = TreeBuilder::document();
    builder.copy_node(node)?;
    let doc = builder.finish();
    Ok(doc.children().into_iter().next().unwrap_or(doc))
}

fn item_text(item: &XdmItem) -> Result<String> {
    match item {
        XdmItem::Atomic(atom) => Ok(atom.string_value()),
        XdmItem::Node(node) => Ok(node.string_value()),
        XdmItem::Function(_) => Err(Error::Type(
            "a function item has no string value".into(),
        )),
    }
}

/// Function conversion rules for declared parameter and result types:
/// untyped casts to the target, integers promote to double, anything
/// else incompatible is a type error.
pub(crate) fn coerce(value: XdmValue, target: TypeName, what: &str) -> Result<XdmValue> {
    if target == TypeName::AnyItem {
        return Ok(value);
    }
    let mut items = Vec::with_capacity(value.size());
    for item in value.iter() {
        items.push(coerce_item(item, target, what)?);
    }
    Ok(XdmValue::from_items(items))
}

fn coerce_item(item: &XdmItem, target: TypeName, what: &str) -> Result<XdmItem> {
    use XdmAtomicValue as A;
    let atom = match item {
        XdmItem::Atomic(atom) => atom.clone(),
        XdmItem::Node(node) => A::UntypedAtomic(node.string_value()),
        XdmItem::Function(_) => {
            return Err(Error::Type(format!(
                "{what}: a function item cannot be converted to {}",
                target.describe()
            )))
        }
    };
    let mismatch = || {
        Error::Type(format!(
            "{what}: cannot convert {} to {}",
            atom.primitive_type_name(),
            target.describe()
        ))
    };
    let converted = match (target, &atom) {
        (TypeName::Boolean, A::Boolean(_)) => atom,
        (TypeName::Boolean, A::UntypedAtomic(s)) => match s.trim() {
            "true" | "1" => A::Boolean(true),
            "false" | "0" => A::Boolean(false),
            _ => return Err(mismatch()),
        },
        (TypeName::Integer, A::Integer(_)) => atom,
        (TypeName::Integer, A::UntypedAtomic(s)) => {
            A::Integer(s.trim().parse().map_err(|_| mismatch())?)
        }
        (TypeName::Double, A::Double(_)) => atom,
        (TypeName::Double, A::Integer(i)) => A::Double(*i as f64),
        (TypeName::Double, A::UntypedAtomic(s)) => {
            A::Double(s.trim().parse().map_err(|_| mismatch())?)
        }
        (TypeName::String, A::String(_)) => atom,
        (TypeName::String, A::UntypedAtomic(s)) | (TypeName::String, A::AnyUri(s)) => {
            A::String(s.clone())
        }
        _ => return Err(mismatch()),
    };
    Ok(XdmItem::Atomic(converted))
}
