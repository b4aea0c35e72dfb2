//! Stylesheet compilation: XSLT document to an executable form.
//!
//! The stylesheet is parsed with whitespace stripping, then walked into
//! an instruction tree. XPath expressions and match patterns are
//! compiled here, each against a static context carrying the namespace
//! bindings in scope at its element and the signatures of every
//! stylesheet function.

use std::collections::HashMap;

use xdm::{QName, XdmNode};
use xdm_xpath::{compile, compile_pattern, CompiledXPath, Pattern, StaticContext};

use crate::error::{Error, Result};

pub(crate) const XSL_NS: &str = "http://www.w3.org/1999/XSL/Transform";

#[derive(Debug)]
pub(crate) struct Stylesheet {
    pub rules: Vec<TemplateRule>,
    pub named: HashMap<String, NamedTemplate>,
    pub functions: HashMap<(String, usize), UserFunction>,
    pub globals: Vec<GlobalBinding>,
    pub output: OutputDecl,
}

#[derive(Debug)]
pub(crate) struct TemplateRule {
    pub pattern: Pattern,
    pub mode: Option<String>,
    pub priority: f64,
    /// Declaration order, used to break priority ties in favor of the
    /// latest declaration.
    pub order: usize,
    pub params: Vec<ParamDecl>,
    pub body: Vec<Instruction>,
}

#[derive(Debug)]
pub(crate) struct NamedTemplate {
    pub params: Vec<ParamDecl>,
    pub body: Vec<Instruction>,
}

#[derive(Debug)]
pub(crate) struct UserFunction {
    pub params: Vec<ParamDecl>,
    pub result_type: TypeName,
    pub body: Vec<Instruction>,
}

#[derive(Debug)]
pub(crate) struct GlobalBinding {
    pub name: String,
    pub is_param: bool,
    pub select: Option<CompiledXPath>,
    pub content: Vec<Instruction>,
}

#[derive(Debug, Default)]
pub(crate) struct OutputDecl {
    pub method: Option<String>,
    pub indent: bool,
    pub omit_xml_declaration: Option<bool>,
    pub item_separator: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ParamDecl {
    pub name: String,
    pub required: bool,
    pub default: Option<CompiledXPath>,
    pub as_type: TypeName,
}

/// Declared item type of a parameter or function result. Occurrence
/// indicators are accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeName {
    AnyItem,
    Boolean,
    Integer,
    Double,
    String,
}

impl TypeName {
    fn parse(text: Option<String>) -> TypeName {
        let text = match text {
            Some(t) => t,
            None => return TypeName::AnyItem,
        };
        let base = text.trim().trim_end_matches(['?', '*', '+']);
        match base {
            "xs:boolean" => TypeName::Boolean,
            "xs:integer" | "xs:int" | "xs:long" => TypeName::Integer,
            "xs:double" | "xs:decimal" | "xs:float" => TypeName::Double,
            "xs:string" => TypeName::String,
            _ => TypeName::AnyItem,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            TypeName::AnyItem => "item()*",
            TypeName::Boolean => "xs:boolean",
            TypeName::Integer => "xs:integer",
            TypeName::Double => "xs:double",
            TypeName::String => "xs:string",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Instruction {
    LiteralElement {
        name: QName,
        namespaces: Vec<(String, String)>,
        attributes: Vec<(QName, Avt)>,
        content: Vec<Instruction>,
    },
    LiteralText(String),
    ValueOf {
        select: CompiledXPath,
        separator: String,
    },
    Sequence {
        select: CompiledXPath,
    },
    CopyOf {
        select: CompiledXPath,
    },
    ForEach {
        select: CompiledXPath,
        body: Vec<Instruction>,
    },
    If {
        test: CompiledXPath,
        body: Vec<Instruction>,
    },
    ApplyTemplates {
        select: Option<CompiledXPath>,
        mode: Option<String>,
        with_params: Vec<WithParam>,
    },
    CallTemplate {
        name: String,
        with_params: Vec<WithParam>,
    },
    Variable {
        name: String,
        select: Option<CompiledXPath>,
        content: Vec<Instruction>,
    },
    Comment {
        content: Vec<Instruction>,
    },
    Message {
        select: Option<CompiledXPath>,
        content: Vec<Instruction>,
    },
    ResultDocument {
        href: Avt,
        content: Vec<Instruction>,
    },
    Try {
        body: Vec<Instruction>,
        catch: Vec<Instruction>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct WithParam {
    pub name: String,
    pub select: Option<CompiledXPath>,
    pub content: Vec<Instruction>,
}

/// An attribute value template: literal text interleaved with `{expr}`
/// parts.
#[derive(Debug, Clone)]
pub(crate) struct Avt {
    pub parts: Vec<AvtPart>,
}

#[derive(Debug, Clone)]
pub(crate) enum AvtPart {
    Text(String),
    Expr(CompiledXPath),
}

pub(crate) fn compile_stylesheet(doc: &XdmNode) -> Result<Stylesheet> {
    let root = doc
        .children()
        .into_iter()
        .find(|c| c.node_kind() == xdm::NodeKind::Element)
        .ok_or_else(|| Error::Compile("stylesheet has no root element".into()))?;
    let root_name = root
        .name()
        .ok_or_else(|| Error::Compile("stylesheet root element has no name".into()))?;
    if root_name.ns_uri() != Some(XSL_NS)
        || !matches!(root_name.local_part(), "stylesheet" | "transform")
    {
        return Err(Error::Compile(format!(
            "root element {} is not xsl:stylesheet or xsl:transform",
            root_name.lexical()
        )));
    }

    // First pass: function signatures, so any expression can call any
    // stylesheet function regardless of declaration order.
    let mut signatures: Vec<(String, usize)> = Vec::new();
    for child in root.children() {
        if is_xsl(&child, "function") {
            let name = function_name(&child)?;
            let arity = child
                .children()
                .iter()
                .filter(|c| is_xsl(c, "param"))
                .count();
            signatures.push((name, arity));
        }
    }

    let mut compiler = Compiler { signatures };
    let mut sheet = Stylesheet {
        rules: Vec::new(),
        named: HashMap::new(),
        functions: HashMap::new(),
        globals: Vec::new(),
        output: OutputDecl::default(),
    };

    for child in root.children() {
        let name = match child.name() {
            Some(n) if child.node_kind() == xdm::NodeKind::Element => n.clone(),
            _ => continue,
        };
        if name.ns_uri() != Some(XSL_NS) {
            continue;
        }
        match name.local_part() {
            "template" => compiler.compile_template(&child, &mut sheet)?,
            "function" => compiler.compile_function(&child, &mut sheet)?,
            "param" | "variable" => {
                let binding = compiler.compile_global(&child)?;
                sheet.globals.push(binding);
            }
            "output" => {
                sheet.output = OutputDecl {
                    method: child.attribute_value("method"),
                    indent: child.attribute_value("indent").as_deref() == Some("yes"),
                    omit_xml_declaration: child
                        .attribute_value("omit-xml-declaration")
                        .map(|v| v == "yes"),
                    item_separator: child.attribute_value("item-separator"),
                };
            }
            "import" | "include" => {
                return Err(Error::Compile(format!(
                    "xsl:{} is not supported",
                    name.local_part()
                )))
            }
            // Declarations with no effect on this processor.
            "strip-space" | "preserve-space" | "mode" => {}
            other => {
                return Err(Error::Compile(format!(
                    "unknown top-level declaration xsl:{other}"
                )))
            }
        }
    }

    tracing::debug!(
        rules = sheet.rules.len(),
        named = sheet.named.len(),
        functions = sheet.functions.len(),
        "compiled stylesheet"
    );
    Ok(sheet)
}

fn is_xsl(node: &XdmNode, local: &str) -> bool {
    node.node_kind() == xdm::NodeKind::Element
        && node
            .name()
            .map(|n| n.ns_uri() == Some(XSL_NS) && n.local_part() == local)
            .unwrap_or(false)
}

/// Resolves the `name` attribute of an xsl:function to Clark form using
/// the namespaces in scope at the element. Functions must live in a
/// namespace.
fn function_name(node: &XdmNode) -> Result<String> {
    let lexical = node
        .attribute_value("name")
        .ok_or_else(|| Error::Compile("xsl:function requires a name".into()))?;
    let (prefix, local) = lexical.split_once(':').ok_or_else(|| {
        Error::Compile(format!("function name '{lexical}' must carry a prefix"))
    })?;
    let uri = resolve_prefix(node, prefix).ok_or_else(|| {
        Error::Compile(format!("undeclared prefix '{prefix}' in function name"))
    })?;
    Ok(format!("{{{uri}}}{local}"))
}

fn resolve_prefix(node: &XdmNode, prefix: &str) -> Option<String> {
    node.in_scope_namespaces()
        .into_iter()
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri)
}

/// Clark form of a template name: prefixed names resolve against the
/// element's scope, unprefixed names are in no namespace.
fn template_name(node: &XdmNode, lexical: &str) -> Result<String> {
    match lexical.split_once(':') {
        Some((prefix, local)) => {
            let uri = resolve_prefix(node, prefix).ok_or_else(|| {
                Error::Compile(format!("undeclared prefix '{prefix}' in template name"))
            })?;
            Ok(format!("{{{uri}}}{local}"))
        }
        None => Ok(lexical.to_string()),
    }
}

struct Compiler {
    signatures: Vec<(String, usize)>,
}

impl Compiler {
    /// Static context for expressions at this element: its in-scope
    /// namespaces (default namespace excluded, as XPath unprefixed
    /// names never pick it up) plus all stylesheet function signatures.
    fn static_context(&self, node: &XdmNode) -> StaticContext {
        let mut sc = StaticContext::new();
        for (prefix, uri) in node.in_scope_namespaces() {
            if !prefix.is_empty() {
                sc.declare_namespace(&prefix, &uri);
            }
        }
        for (name, arity) in &self.signatures {
            sc.declare_function(name, *arity);
        }
        sc
    }

    fn compile_expr(&self, node: &XdmNode, text: &str, construct: &str) -> Result<CompiledXPath> {
        compile(text, &self.static_context(node)).map_err(|e| {
            Error::Compile(format!("in {construct} expression '{text}': {e}"))
        })
    }

    fn compile_template(&mut self, node: &XdmNode, sheet: &mut Stylesheet) -> Result<()> {
        let match_attr = node.attribute_value("match");
        let name_attr = node.attribute_value("name");
        if match_attr.is_none() && name_attr.is_none() {
            return Err(Error::Compile(
                "xsl:template requires a match pattern or a name".into(),
            ));
        }
        let (params, body) = self.compile_params_and_body(node)?;
        if let Some(name) = name_attr {
            let clark = template_name(node, &name)?;
            sheet.named.insert(
                clark,
                NamedTemplate {
                    params: params.clone(),
                    body: body.clone(),
                },
            );
        }
        if let Some(pattern_text) = match_attr {
            let pattern = compile_pattern(&pattern_text, &self.static_context(node))
                .map_err(|e| {
                    Error::Compile(format!("in match pattern '{pattern_text}': {e}"))
                })?;
            let priority = match node.attribute_value("priority") {
                Some(p) => p.parse::<f64>().map_err(|_| {
                    Error::Compile(format!("invalid template priority '{p}'"))
                })?,
                None => pattern.default_priority(),
            };
            sheet.rules.push(TemplateRule {
                pattern,
                mode: node.attribute_value("mode"),
                priority,
                order: sheet.rules.len(),
                params,
                body,
            });
        }
        Ok(())
    }

    fn compile_function(&mut self, node: &XdmNode, sheet: &mut Stylesheet) -> Result<()> {
        let name = function_name(node)?;
        let (params, body) = self.compile_params_and_body(node)?;
        let result_type = TypeName::parse(node.attribute_value("as"));
        sheet
            .functions
            .insert((name, params.len()), UserFunction {
                params,
                result_type,
                body,
            });
        Ok(())
    }

    fn compile_global(&self, node: &XdmNode) -> Result<GlobalBinding> {
        let name = node
            .attribute_value("name")
            .ok_or_else(|| Error::Compile("global binding requires a name".into()))?;
        let select = match node.attribute_value("select") {
            Some(text) => Some(self.compile_expr(node, &text, "global binding")?),
            None => None,
        };
        let content = if select.is_none() {
            self.compile_sequence_ctor(&node.children())?
        } else {
            Vec::new()
        };
        Ok(GlobalBinding {
            name,
            is_param: is_xsl(node, "param"),
            select,
            content,
        })
    }

    /// Leading xsl:param children become the parameter list; the rest
    /// is the body.
    fn compile_params_and_body(
        &self,
        node: &XdmNode,
    ) -> Result<(Vec<ParamDecl>, Vec<Instruction>)> {
        let children = node.children();
        let mut params = Vec::new();
        let mut rest = Vec::new();
        let mut in_params = true;
        for child in children {
            if in_params && is_xsl(&child, "param") {
                params.push(self.compile_param(&child)?);
            } else {
                in_params = false;
                rest.push(child);
            }
        }
        let body = self.compile_sequence_ctor(&rest)?;
        Ok((params, body))
    }

    fn compile_param(&self, node: &XdmNode) -> Result<ParamDecl> {
        let name = node
            .attribute_value("name")
            .ok_or_else(|| Error::Compile("xsl:param requires a name".into()))?;
        let default = match node.attribute_value("select") {
            Some(text) => Some(self.compile_expr(node, &text, "parameter default")?),
            None => None,
        };
        Ok(ParamDecl {
            name,
            required: node.attribute_value("required").as_deref() == Some("yes"),
            default,
            as_type: TypeName::parse(node.attribute_value("as")),
        })
    }

    fn compile_sequence_ctor(&self, children: &[XdmNode]) -> Result<Vec<Instruction>> {
        let mut out = Vec::new();
        for child in children {
            match child.node_kind() {
                xdm::NodeKind::Text => {
                    out.push(Instruction::LiteralText(child.string_value()));
                }
                xdm::NodeKind::Element => {
                    out.push(self.compile_element(child)?);
                }
                // Comments and PIs in the stylesheet are not output.
                _ => {}
            }
        }
        Ok(out)
    }

    fn compile_element(&self, node: &XdmNode) -> Result<Instruction> {
        let name = node
            .name()
            .cloned()
            .ok_or_else(|| Error::Compile("element without a name".into()))?;
        if name.ns_uri() != Some(XSL_NS) {
            return self.compile_literal_element(node, name);
        }
        match name.local_part() {
            "value-of" => {
                let select = self.required_expr(node, "xsl:value-of")?;
                Ok(Instruction::ValueOf {
                    select,
                    separator: node
                        .attribute_value("separator")
                        .unwrap_or_else(|| " ".to_string()),
                })
            }
            "sequence" => Ok(Instruction::Sequence {
                select: self.required_expr(node, "xsl:sequence")?,
            }),
            "copy-of" => Ok(Instruction::CopyOf {
                select: self.required_expr(node, "xsl:copy-of")?,
            }),
            "for-each" => Ok(Instruction::ForEach {
                select: self.required_expr(node, "xsl:for-each")?,
                body: self.compile_sequence_ctor(&node.children())?,
            }),
            "if" => {
                let test = node.attribute_value("test").ok_or_else(|| {
                    Error::Compile("xsl:if requires a test expression".into())
                })?;
                Ok(Instruction::If {
                    test: self.compile_expr(node, &test, "xsl:if test")?,
                    body: self.compile_sequence_ctor(&node.children())?,
                })
            }
            "apply-templates" => {
                let select = match node.attribute_value("select") {
                    Some(text) => Some(self.compile_expr(node, &text, "xsl:apply-templates")?),
                    None => None,
                };
                Ok(Instruction::ApplyTemplates {
                    select,
                    mode: node.attribute_value("mode"),
                    with_params: self.compile_with_params(node)?,
                })
            }
            "call-template" => {
                let name_attr = node.attribute_value("name").ok_or_else(|| {
                    Error::Compile("xsl:call-template requires a name".into())
                })?;
                Ok(Instruction::CallTemplate {
                    name: template_name(node, &name_attr)?,
                    with_params: self.compile_with_params(node)?,
                })
            }
            "variable" => {
                let var_name = node.attribute_value("name").ok_or_else(|| {
                    Error::Compile("xsl:variable requires a name".into())
                })?;
                let select = match node.attribute_value("select") {
                    Some(text) => Some(self.compile_expr(node, &text, "xsl:variable")?),
                    None => None,
                };
                let content = if select.is_none() {
                    self.compile_sequence_ctor(&node.children())?
                } else {
                    Vec::new()
                };
                Ok(Instruction::Variable {
                    name: var_name,
                    select,
                    content,
                })
            }
            "text" => Ok(Instruction::LiteralText(node.string_value())),
            "comment" => Ok(Instruction::Comment {
                content: self.compile_sequence_ctor(&node.children())?,
            }),
            "message" => {
                let select = match node.attribute_value("select") {
                    Some(text) => Some(self.compile_expr(node, &text, "xsl:message")?),
                    None => None,
                };
                Ok(Instruction::Message {
                    select,
                    content: self.compile_sequence_ctor(&node.children())?,
                })
            }
            "result-document" => {
                let href = node.attribute_value("href").ok_or_else(|| {
                    Error::Compile("xsl:result-document requires an href".into())
                })?;
                Ok(Instruction::ResultDocument {
                    href: self.compile_avt(node, &href)?,
                    content: self.compile_sequence_ctor(&node.children())?,
                })
            }
            "try" => {
                let mut body_nodes = Vec::new();
                let mut catch = Vec::new();
                for child in node.children() {
                    if is_xsl(&child, "catch") {
                        catch = self.compile_sequence_ctor(&child.children())?;
                    } else {
                        body_nodes.push(child);
                    }
                }
                Ok(Instruction::Try {
                    body: self.compile_sequence_ctor(&body_nodes)?,
                    catch,
                })
            }
            "param" => Err(Error::Compile(
                "xsl:param is only allowed at the start of a template or function".into(),
            )),
            other => Err(Error::Compile(format!(
                "unsupported instruction xsl:{other}"
            ))),
        }
    }

    fn compile_literal_element(&self, node: &XdmNode, name: QName) -> Result<Instruction> {
        let namespaces = node
            .namespace_declarations()
            .iter()
            .filter(|(_, uri)| uri != XSL_NS)
            .cloned()
            .collect();
        let mut attributes = Vec::new();
        for attr in node.attributes() {
            let attr_name = attr
                .name()
                .cloned()
                .ok_or_else(|| Error::Compile("attribute without a name".into()))?;
            attributes.push((attr_name, self.compile_avt(node, &attr.string_value())?));
        }
        Ok(Instruction::LiteralElement {
            name,
            namespaces,
            attributes,
            content: self.compile_sequence_ctor(&node.children())?,
        })
    }

    fn compile_with_params(&self, node: &XdmNode) -> Result<Vec<WithParam>> {
        let mut out = Vec::new();
        for child in node.children() {
            if !is_xsl(&child, "with-param") {
                continue;
            }
            let name = child.attribute_value("name").ok_or_else(|| {
                Error::Compile("xsl:with-param requires a name".into())
            })?;
            let select = match child.attribute_value("select") {
                Some(text) => Some(self.compile_expr(&child, &text, "xsl:with-param")?),
                None => None,
            };
            let content = if select.is_none() {
                self.compile_sequence_ctor(&child.children())?
            } else {
                Vec::new()
            };
            out.push(WithParam {
                name,
                select,
                content,
            });
        }
        Ok(out)
    }

    fn required_expr(&self, node: &XdmNode, construct: &str) -> Result<CompiledXPath> {
        let text = node.attribute_value("select").ok_or_else(|| {
            Error::Compile(format!("{construct} requires a select expression"))
        })?;
        self.compile_expr(node, &text, construct)
    }

    /// Splits attribute text into literal and `{expr}` parts. Doubled
    /// braces are literal braces.
    fn compile_avt(&self, node: &XdmNode, text: &str) -> Result<Avt> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    if !literal.is_empty() {
                        parts.push(AvtPart::Text(std::mem::take(&mut literal)));
                    }
                    let mut expr = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        expr.push(c);
                    }
                    if !closed {
                        return Err(Error::Compile(format!(
                            "unclosed '{{' in attribute value template '{text}'"
                        )));
                    }
                    parts.push(AvtPart::Expr(self.compile_expr(
                        node,
                        &expr,
                        "attribute value template",
                    )?));
                }
                '}' => {
                    return Err(Error::Compile(format!(
                        "unmatched '}}' in attribute value template '{text}'"
                    )))
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            parts.push(AvtPart::Text(literal));
        }
        Ok(Avt { parts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdm::parse_xml_str_with_policy;
    use xdm::WhitespacePolicy;

    fn compile_text(xsl: &str) -> Result<Stylesheet> {
        let doc = parse_xml_str_with_policy(xsl, WhitespacePolicy::Strip).unwrap();
        compile_stylesheet(&doc)
    }

    #[test]
    fn avt_brace_escapes() {
        let compiler = Compiler {
            signatures: Vec::new(),
        };
        let node = parse_xml_str_with_policy("<x/>", WhitespacePolicy::Strip).unwrap();
        let avt = compiler.compile_avt(&node, "a{{b}}c").unwrap();
        assert_eq!(avt.parts.len(), 1);
        assert!(matches!(&avt.parts[0], AvtPart::Text(t) if t == "a{b}c"));
        assert!(compiler.compile_avt(&node, "open{").is_err());
        assert!(compiler.compile_avt(&node, "close}").is_err());
    }

    #[test]
    fn type_name_parsing_ignores_occurrence() {
        assert_eq!(TypeName::parse(Some("xs:integer?".into())), TypeName::Integer);
        assert_eq!(TypeName::parse(Some("xs:string*".into())), TypeName::String);
        assert_eq!(TypeName::parse(None), TypeName::AnyItem);
        assert_eq!(TypeName::parse(Some("element()".into())), TypeName::AnyItem);
    }

    #[test]
    fn named_and_matching_template_registers_both_ways() {
        let sheet = compile_text(
            r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
                 <xsl:template name="both" match="x"><hit/></xsl:template>
               </xsl:stylesheet>"#,
        )
        .unwrap();
        assert!(sheet.named.contains_key("both"));
        assert_eq!(sheet.rules.len(), 1);
    }

    #[test]
    fn import_is_rejected() {
        let err = compile_text(
            r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
                 <xsl:import href="other.xsl"/>
               </xsl:stylesheet>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("xsl:import"));
    }

    #[test]
    fn function_names_resolve_to_clark_form() {
        let sheet = compile_text(
            r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform"
                              xmlns:mf="http://example.com/mf" version="3.0">
                 <xsl:function name="mf:id" as="xs:string">
                   <xsl:param name="v" as="xs:string"/>
                   <xsl:sequence select="$v"/>
                 </xsl:function>
               </xsl:stylesheet>"#,
        )
        .unwrap();
        assert!(sheet
            .functions
            .contains_key(&("{http://example.com/mf}id".to_string(), 1)));
    }
}
