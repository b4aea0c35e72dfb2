//! XQuery processing.
//!
//! The query language is the XPath subset extended with direct element
//! constructors, where `{expr}` encloses a dynamic expression inside
//! element content and attribute values.

use std::collections::HashMap;
use std::path::Path;

use xdm::{QName, SerializationOptions, TreeBuilder, XdmItem, XdmNode, XdmValue};
use xdm_xpath::{compile, CompiledXPath, DynamicContext, StaticContext};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::xslt::append_items;

/// Runs queries against a source document.
#[derive(Debug)]
pub struct XQueryProcessor {
    engine: Engine,
    query_text: Option<String>,
    source_node: Option<XdmNode>,
    namespaces: HashMap<String, String>,
    parameters: HashMap<String, XdmValue>,
    properties: HashMap<String, String>,
}

/// A parsed query: a plain expression or a direct element constructor.
#[derive(Debug)]
enum Query {
    Expr(CompiledXPath),
    Constructor(ElementCtor),
}

#[derive(Debug)]
struct ElementCtor {
    name: QName,
    attributes: Vec<(QName, Vec<ValuePart>)>,
    content: Vec<Content>,
}

#[derive(Debug)]
enum ValuePart {
    Text(String),
    Expr(CompiledXPath),
}

#[derive(Debug)]
enum Content {
    Text(String),
    Expr(CompiledXPath),
    Child(ElementCtor),
}

impl XQueryProcessor {
    pub(crate) fn new(engine: Engine) -> Self {
        XQueryProcessor {
            engine,
            query_text: None,
            source_node: None,
            namespaces: HashMap::new(),
            parameters: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    // -- configuration ------------------------------------------------

    pub fn set_query_text(&mut self, query: &str) {
        self.query_text = Some(query.to_string());
    }

    pub fn set_source_node(&mut self, node: XdmNode) {
        self.source_node = Some(node);
    }

    pub fn declare_namespace(&mut self, prefix: &str, uri: &str) {
        self.namespaces.insert(prefix.to_string(), uri.to_string());
    }

    pub fn set_parameter(&mut self, name: &str, value: XdmValue) {
        self.parameters.insert(name.to_string(), value);
    }

    /// `s` names a source file, `qs` carries query text. Other names
    /// are held without interpretation.
    pub fn set_property(&mut self, name: &str, value: &str) {
        self.properties.insert(name.to_string(), value.to_string());
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    pub fn clear_properties(&mut self) {
        self.properties.clear();
    }

    // -- execution ----------------------------------------------------

    pub fn run_query_to_value(&mut self) -> Result<XdmValue> {
        self.engine.ensure_live()?;
        let text = self
            .query_text
            .clone()
            .or_else(|| self.properties.get("qs").cloned())
            .ok_or_else(|| Error::Configuration("no query has been set".into()))?;
        let source = match &self.source_node {
            Some(node) => Some(node.clone()),
            None => match self.properties.get("s") {
                Some(path) => Some(self.engine.parse_xml_file(path)?),
                None => None,
            },
        };
        let query = self.parse_query(&text)?;
        let mut ctx = DynamicContext::new();
        if let Some(node) = &source {
            ctx.set_context_item(XdmItem::Node(node.clone()));
        }
        for (name, value) in &self.parameters {
            ctx.bind_variable(name, value.clone());
        }
        tracing::debug!(query = %text, "running query");
        self.evaluate_query(&query, &ctx)
    }

    pub fn run_query_to_string(&mut self) -> Result<String> {
        let value = self.run_query_to_value()?;
        let options = SerializationOptions::default();
        Ok(match value.items() {
            [XdmItem::Node(node)] => node.serialize(&options),
            items => items
                .iter()
                .map(|item| match item {
                    XdmItem::Node(node) => node.serialize(&options),
                    other => other.string_value(),
                })
                .collect::<Vec<_>>()
                .join(" "),
        })
    }

    pub fn run_query_to_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let text = self.run_query_to_string()?;
        std::fs::write(path, text)?;
        Ok(())
    }

    // -- query parsing ------------------------------------------------

    fn static_context(&self) -> StaticContext {
        let mut sc = StaticContext::new();
        for (prefix, uri) in &self.namespaces {
            sc.declare_namespace(prefix, uri);
        }
        sc
    }

    fn parse_query(&self, text: &str) -> Result<Query> {
        let trimmed = text.trim();
        if trimmed.starts_with('<') {
            let mut parser = CtorParser {
                chars: trimmed.char_indices().peekable(),
                input: trimmed,
                sc: self.static_context(),
                namespaces: &self.namespaces,
            };
            let ctor = parser.element()?;
            parser.skip_whitespace();
            if parser.chars.next().is_some() {
                return Err(Error::Syntax(
                    "unexpected content after the direct constructor".into(),
                ));
            }
            Ok(Query::Constructor(ctor))
        } else {
            let compiled = compile(trimmed, &self.static_context())?;
            Ok(Query::Expr(compiled))
        }
    }

    fn evaluate_query(&self, query: &Query, ctx: &DynamicContext) -> Result<XdmValue> {
        match query {
            Query::Expr(expr) => Ok(expr.evaluate(ctx)?),
            Query::Constructor(ctor) => {
                let node = self.construct(ctor, ctx)?;
                Ok(XdmValue::from_items(vec![XdmItem::Node(node)]))
            }
        }
    }

    fn construct(&self, ctor: &ElementCtor, ctx: &DynamicContext) -> Result<XdmNode> {
        let mut builder = TreeBuilder::element_root(ctor.name.clone());
        self.fill(&mut builder, ctor, ctx, true)?;
        Ok(builder.finish())
    }

    fn fill(
        &self,
        builder: &mut TreeBuilder,
        ctor: &ElementCtor,
        ctx: &DynamicContext,
        at_root: bool,
    ) -> Result<()> {
        if !at_root {
            builder.start_element(ctor.name.clone());
        }
        for (name, parts) in &ctor.attributes {
            let mut value = String::new();
            for part in parts {
                match part {
                    ValuePart::Text(text) => value.push_str(text),
                    ValuePart::Expr(expr) => {
                        let result = expr.evaluate(ctx)?;
                        value.push_str(&joined_string(&result));
                    }
                }
            }
            builder.attribute(name.clone(), value)?;
        }
        for item in &ctor.content {
            match item {
                Content::Text(text) => builder.text(text),
                Content::Expr(expr) => {
                    let result = expr.evaluate(ctx)?;
                    append_items(builder, result.items())?;
                }
                Content::Child(child) => self.fill(builder, child, ctx, false)?,
            }
        }
        if !at_root {
            builder.end_element();
        }
        Ok(())
    }
}

fn joined_string(value: &XdmValue) -> String {
    value
        .iter()
        .map(XdmItem::string_value)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hand parser for direct element constructors. Enclosed expressions
/// are compiled eagerly against the processor's declared namespaces.
struct CtorParser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
    sc: StaticContext,
    namespaces: &'a HashMap<String, String>,
}

impl CtorParser<'_> {
    fn element(&mut self) -> Result<ElementCtor> {
        self.expect('<')?;
        let name = self.qname()?;
        let mut attributes = Vec::new();
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some((_, '/')) => {
                    self.chars.next();
                    self.expect('>')?;
                    return Ok(ElementCtor {
                        name,
                        attributes,
                        content: Vec::new(),
                    });
                }
                Some((_, '>')) => {
                    self.chars.next();
                    break;
                }
                Some(_) => {
                    let attr_name = self.qname()?;
                    self.skip_whitespace();
                    self.expect('=')?;
                    self.skip_whitespace();
                    attributes.push((attr_name, self.attribute_value()?));
                }
                None => return Err(Error::Syntax("unterminated start tag".into())),
            }
        }
        let content = self.content()?;
        let close = self.qname()?;
        if close.lexical() != name.lexical() {
            return Err(Error::Syntax(format!(
                "end tag </{}> does not match <{}>",
                close.lexical(),
                name.lexical()
            )));
        }
        self.skip_whitespace();
        self.expect('>')?;
        Ok(ElementCtor {
            name,
            attributes,
            content,
        })
    }

    /// Children until the matching `</`; leaves the parser after the
    /// two closing delimiter characters.
    fn content(&mut self) -> Result<Vec<Content>> {
        let mut out = Vec::new();
        let mut text = String::new();
        loop {
            match self.chars.peek().copied() {
                Some((start, '<')) => {
                    if !text.is_empty() {
                        out.push(Content::Text(std::mem::take(&mut text)));
                    }
                    if self.input[start..].starts_with("</") {
                        self.chars.next();
                        self.chars.next();
                        return Ok(out);
                    }
                    out.push(Content::Child(self.element()?));
                }
                Some((_, '{')) => {
                    if !text.is_empty() {
                        out.push(Content::Text(std::mem::take(&mut text)));
                    }
                    out.push(Content::Expr(self.enclosed_expr()?));
                }
                Some((_, c)) => {
                    self.chars.next();
                    text.push(c);
                }
                None => return Err(Error::Syntax("unterminated element content".into())),
            }
        }
    }

    fn attribute_value(&mut self) -> Result<Vec<ValuePart>> {
        let quote = match self.chars.next() {
            Some((_, c @ ('"' | '\''))) => c,
            _ => return Err(Error::Syntax("expected a quoted attribute value".into())),
        };
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.chars.peek().copied() {
                Some((_, c)) if c == quote => {
                    self.chars.next();
                    if !text.is_empty() {
                        parts.push(ValuePart::Text(text));
                    }
                    return Ok(parts);
                }
                Some((_, '{')) => {
                    if !text.is_empty() {
                        parts.push(ValuePart::Text(std::mem::take(&mut text)));
                    }
                    parts.push(ValuePart::Expr(self.enclosed_expr()?));
                }
                Some((_, c)) => {
                    self.chars.next();
                    text.push(c);
                }
                None => return Err(Error::Syntax("unterminated attribute value".into())),
            }
        }
    }

    /// `{ expr }` with brace nesting so predicates inside the enclosed
    /// expression survive.
    fn enclosed_expr(&mut self) -> Result<CompiledXPath> {
        self.expect('{')?;
        let mut depth = 1usize;
        let mut expr = String::new();
        for (_, c) in self.chars.by_ref() {
            match c {
                '{' => {
                    depth += 1;
                    expr.push(c);
                }
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(compile(&expr, &self.sc)?);
                    }
                    expr.push(c);
                }
                _ => expr.push(c),
            }
        }
        Err(Error::Syntax("unterminated enclosed expression".into()))
    }

    fn qname(&mut self) -> Result<QName> {
        let mut lexical = String::new();
        while let Some((_, c)) = self.chars.peek().copied() {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':') {
                self.chars.next();
                lexical.push(c);
            } else {
                break;
            }
        }
        if lexical.is_empty() {
            return Err(Error::Syntax("expected a name".into()));
        }
        match lexical.split_once(':') {
            Some((prefix, local)) => {
                let uri = self.namespaces.get(prefix).ok_or_else(|| {
                    Error::Syntax(format!("undeclared namespace prefix '{prefix}'"))
                })?;
                Ok(QName::new(
                    Some(prefix.to_string()),
                    Some(uri.clone()),
                    local,
                ))
            }
            None => Ok(QName::local(lexical)),
        }
    }

    fn expect(&mut self, wanted: char) -> Result<()> {
        match self.chars.next() {
            Some((_, c)) if c == wanted => Ok(()),
            Some((at, c)) => Err(Error::Syntax(format!(
                "expected '{wanted}' at offset {at}, found '{c}'"
            ))),
            None => Err(Error::Syntax(format!(
                "expected '{wanted}' at end of query"
            ))),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }
}
