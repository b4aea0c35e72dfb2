//! Schema validation.
//!
//! Schemas accumulate additively: each registered document contributes
//! its top-level element declarations and named types. Validation walks
//! the instance against the declarations and records failures in a
//! report; an invalid document is an outcome, not an error return.

use std::collections::HashMap;
use std::path::Path;

use base64::Engine as _;
use serde::Serialize;
use xdm::{NodeKind, QName, TreeBuilder, XdmItem, XdmNode};
use xdm_xpath::{compile, CompiledXPath, DynamicContext, StaticContext};

use crate::engine::Engine;
use crate::error::{Error, Result};

const XS_NS: &str = "http://www.w3.org/2001/XMLSchema";

/// Validates instance documents against registered schemas.
#[derive(Debug)]
pub struct SchemaValidator {
    engine: Engine,
    schemas: SchemaSet,
    source: Option<XdmNode>,
    report: Option<ValidationReport>,
}

#[derive(Debug, Default)]
struct SchemaSet {
    elements: HashMap<String, TypeRef>,
    complex_types: HashMap<String, ComplexType>,
    simple_types: HashMap<String, SimpleType>,
}

#[derive(Debug, Clone)]
enum TypeRef {
    Simple(SimpleType),
    Complex(ComplexType),
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimpleType {
    String,
    Boolean,
    Integer,
    Decimal,
    Double,
    Date,
    DateTime,
    Base64Binary,
    HexBinary,
    AnyUri,
}

#[derive(Debug, Clone)]
struct ComplexType {
    particles: Vec<Particle>,
    asserts: Vec<Assert>,
    /// Simple content: text directly inside the element.
    text_type: Option<SimpleType>,
}

#[derive(Debug, Clone)]
struct Particle {
    name: String,
    type_ref: TypeRef,
    min_occurs: usize,
    /// `None` means unbounded.
    max_occurs: Option<usize>,
}

#[derive(Debug, Clone)]
struct Assert {
    test: String,
    compiled: CompiledXPath,
}

/// Structured validation outcome. Present only when validation failed.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub timestamp: String,
    pub source: Option<String>,
    pub failures: Vec<ValidationFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationFailure {
    pub message: String,
    pub location: Option<String>,
}

impl ValidationReport {
    /// Renders the report as a document for callers that want XML.
    pub fn to_node(&self) -> Result<XdmNode> {
        let mut builder = TreeBuilder::document();
        builder.start_element(QName::local("validation-report"));
        // Attributes precede child content on a freshly opened element.
        builder.attribute(QName::local("timestamp"), self.timestamp.clone())?;
        if let Some(source) = &self.source {
            builder.attribute(QName::local("source"), source.clone())?;
        }
        for failure in &self.failures {
            builder.start_element(QName::local("failure"));
            if let Some(location) = &failure.location {
                builder.attribute(QName::local("location"), location.clone())?;
            }
            builder.text(&failure.message);
            builder.end_element();
        }
        builder.end_element();
        Ok(builder.finish())
    }
}

impl SchemaValidator {
    pub(crate) fn new(engine: Engine) -> Self {
        SchemaValidator {
            engine,
            schemas: SchemaSet::default(),
            source: None,
            report: None,
        }
    }

    // -- schema registration ------------------------------------------

    pub fn register_schema_text(&mut self, xml: &str) -> Result<()> {
        self.engine.ensure_live()?;
        let doc = self.engine.parse_xml_str(xml)?;
        self.schemas.absorb(&doc)
    }

    pub fn register_schema_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.register_schema_text(&text)
    }

    pub fn set_source_node(&mut self, node: XdmNode) {
        self.source = Some(node);
    }

    // -- validation ---------------------------------------------------

    /// Validates the named file, or the bound source node when no file
    /// is given. Failures land in the report; only infrastructure
    /// problems (missing input, unparseable XML) surface as errors.
    pub fn validate(&mut self, file_name: Option<&str>) -> Result<()> {
        self.engine.ensure_live()?;
        self.report = None;
        let (doc, source_name) = match file_name {
            Some(path) => (self.engine.parse_xml_file(path)?, Some(path.to_string())),
            None => match &self.source {
                Some(node) => (node.clone(), None),
                None => {
                    return Err(Error::Configuration(
                        "no source has been set for validation".into(),
                    ))
                }
            },
        };
        let root = doc
            .children()
            .into_iter()
            .find(|c| c.node_kind() == NodeKind::Element);
        let mut failures = Vec::new();
        match root {
            Some(element) => {
                let name = element_local_name(&element);
                match self.schemas.elements.get(&name) {
                    Some(type_ref) => {
                        let walker = Walker {
                            schemas: &self.schemas,
                        };
                        walker.check_element(&element, type_ref, &format!("/{name}"), &mut failures);
                    }
                    None => failures.push(ValidationFailure {
                        message: format!("no element declaration matches '{name}'"),
                        location: Some(format!("/{name}")),
                    }),
                }
            }
            None => failures.push(ValidationFailure {
                message: "the instance document has no root element".into(),
                location: None,
            }),
        }
        if failures.is_empty() {
            tracing::debug!("validation passed");
        } else {
            tracing::debug!(failures = failures.len(), "validation failed");
            self.report = Some(ValidationReport {
                timestamp: chrono::Utc::now().to_rfc3339(),
                source: source_name,
                failures,
            });
        }
        Ok(())
    }

    /// True when the last validation recorded failures.
    pub fn exception_occurred(&self) -> bool {
        self.report.is_some()
    }

    pub fn validation_report(&self) -> Option<&ValidationReport> {
        self.report.as_ref()
    }
}

fn element_local_name(node: &XdmNode) -> String {
    node.name()
        .map(|q| q.local_part().to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Schema absorption
// ---------------------------------------------------------------------------

impl SchemaSet {
    fn absorb(&mut self, doc: &XdmNode) -> Result<()> {
        let root = doc
            .children()
            .into_iter()
            .find(|c| is_xs(c, "schema"))
            .ok_or_else(|| Error::Compile("schema document has no xs:schema root".into()))?;
        for child in root.children() {
            if is_xs(&child, "element") {
                let (name, type_ref) = element_decl(&child)?;
                self.elements.insert(name, type_ref);
            } else if is_xs(&child, "complexType") {
                let name = child.attribute_value("name").ok_or_else(|| {
                    Error::Compile("top-level complex type requires a name".into())
                })?;
                self.complex_types.insert(name, complex_type(&child)?);
            } else if is_xs(&child, "simpleType") {
                let name = child.attribute_value("name").ok_or_else(|| {
                    Error::Compile("top-level simple type requires a name".into())
                })?;
                self.simple_types.insert(name, simple_type_def(&child)?);
            }
        }
        tracing::debug!(
            elements = self.elements.len(),
            complex_types = self.complex_types.len(),
            "registered schema"
        );
        Ok(())
    }

    fn resolve<'a>(&'a self, type_ref: &'a TypeRef) -> Option<ResolvedType<'a>> {
        match type_ref {
            TypeRef::Simple(simple) => Some(ResolvedType::Simple(*simple)),
            TypeRef::Complex(complex) => Some(ResolvedType::Complex(complex)),
            TypeRef::Named(name) => {
                if let Some(complex) = self.complex_types.get(name) {
                    Some(ResolvedType::Complex(complex))
                } else {
                    self.simple_types.get(name).map(|s| ResolvedType::Simple(*s))
                }
            }
        }
    }
}

enum ResolvedType<'a> {
    Simple(SimpleType),
    Complex(&'a ComplexType),
}

fn is_xs(node: &XdmNode, local: &str) -> bool {
    node.node_kind() == NodeKind::Element
        && node
            .name()
            .map(|q| q.ns_uri() == Some(XS_NS) && q.local_part() == local)
            .unwrap_or(false)
}

fn element_decl(node: &XdmNode) -> Result<(String, TypeRef)> {
    let name = node
        .attribute_value("name")
        .ok_or_else(|| Error::Compile("element declaration requires a name".into()))?;
    let type_ref = if let Some(type_name) = node.attribute_value("type") {
        named_type_ref(&type_name)
    } else if let Some(inline) = node.children().iter().find(|c| is_xs(c, "complexType")) {
        TypeRef::Complex(complex_type(inline)?)
    } else if let Some(inline) = node.children().iter().find(|c| is_xs(c, "simpleType")) {
        TypeRef::Simple(simple_type_def(inline)?)
    } else {
        // No declared type: anything goes.
        TypeRef::Simple(SimpleType::String)
    };
    Ok((name, type_ref))
}

/// An `xs:`-prefixed type maps to a builtin; anything else is a
/// reference into the registered named types.
fn named_type_ref(type_name: &str) -> TypeRef {
    match builtin_simple_type(type_name) {
        Some(simple) => TypeRef::Simple(simple),
        None => TypeRef::Named(
            type_name
                .split_once(':')
                .map(|(_, local)| local.to_string())
                .unwrap_or_else(|| type_name.to_string()),
        ),
    }
}

fn builtin_simple_type(type_name: &str) -> Option<SimpleType> {
    let local = type_name.strip_prefix("xs:")?;
    Some(match local {
        "string" | "normalizedString" | "token" => SimpleType::String,
        "boolean" => SimpleType::Boolean,
        "integer" | "int" | "long" | "short" | "byte" | "nonNegativeInteger"
        | "positiveInteger" => SimpleType::Integer,
        "decimal" => SimpleType::Decimal,
        "double" | "float" => SimpleType::Double,
        "date" => SimpleType::Date,
        "dateTime" => SimpleType::DateTime,
        "base64Binary" => SimpleType::Base64Binary,
        "hexBinary" => SimpleType::HexBinary,
        "anyURI" => SimpleType::AnyUri,
        _ => return None,
    })
}

fn complex_type(node: &XdmNode) -> Result<ComplexType> {
    let mut particles = Vec::new();
    let mut asserts = Vec::new();
    let mut text_type = None;
    for child in node.children() {
        if is_xs(&child, "sequence") {
            for particle in child.children() {
                if is_xs(&particle, "element") {
                    particles.push(particle_decl(&particle)?);
                }
            }
        } else if is_xs(&child, "assert") {
            let test = child.attribute_value("test").ok_or_else(|| {
                Error::Compile("xs:assert requires a test expression".into())
            })?;
            let compiled = compile(&test, &StaticContext::new()).map_err(|e| {
                Error::Compile(format!("in assertion '{test}': {e}"))
            })?;
            asserts.push(Assert { test, compiled });
        } else if is_xs(&child, "simpleContent") {
            // xs:extension base=... carries the text type.
            if let Some(ext) = child.children().iter().find(|c| is_xs(c, "extension")) {
                if let Some(base) = ext.attribute_value("base") {
                    text_type = builtin_simple_type(&base);
                }
            }
        }
    }
    Ok(ComplexType {
        particles,
        asserts,
        text_type,
    })
}

fn particle_decl(node: &XdmNode) -> Result<Particle> {
    let (name, type_ref) = element_decl(node)?;
    let min_occurs = match node.attribute_value("minOccurs") {
        Some(v) => v
            .parse()
            .map_err(|_| Error::Compile(format!("invalid minOccurs '{v}'")))?,
        None => 1,
    };
    let max_occurs = match node.attribute_value("maxOccurs").as_deref() {
        Some("unbounded") => None,
        Some(v) => Some(
            v.parse()
                .map_err(|_| Error::Compile(format!("invalid maxOccurs '{v}'")))?,
        ),
        None => Some(1),
    };
    Ok(Particle {
        name,
        type_ref,
        min_occurs,
        max_occurs,
    })
}

fn simple_type_def(node: &XdmNode) -> Result<SimpleType> {
    let restriction = node
        .children()
        .into_iter()
        .find(|c| is_xs(c, "restriction"))
        .ok_or_else(|| Error::Compile("simple type requires a restriction".into()))?;
    let base = restriction
        .attribute_value("base")
        .ok_or_else(|| Error::Compile("restriction requires a base type".into()))?;
    builtin_simple_type(&base)
        .ok_or_else(|| Error::Compile(format!("unsupported restriction base '{base}'")))
}

// ---------------------------------------------------------------------------
// Instance walking
// ---------------------------------------------------------------------------

struct Walker<'a> {
    schemas: &'a SchemaSet,
}

impl Walker<'_> {
    fn check_element(
        &self,
        element: &XdmNode,
        type_ref: &TypeRef,
        path: &str,
        failures: &mut Vec<ValidationFailure>,
    ) {
        match self.schemas.resolve(type_ref) {
            Some(ResolvedType::Simple(simple)) => {
                self.check_simple_value(&element.string_value(), simple, path, failures);
            }
            Some(ResolvedType::Complex(complex)) => {
                self.check_complex(element, complex, path, failures);
            }
            None => failures.push(ValidationFailure {
                message: format!("reference to an undeclared type at {path}"),
                location: Some(path.to_string()),
            }),
        }
    }

    fn check_complex(
        &self,
        element: &XdmNode,
        complex: &ComplexType,
        path: &str,
        failures: &mut Vec<ValidationFailure>,
    ) {
        if let Some(text_type) = complex.text_type {
            self.check_simple_value(&element.string_value(), text_type, path, failures);
        }
        let children: Vec<XdmNode> = element
            .children()
            .into_iter()
            .filter(|c| c.node_kind() == NodeKind::Element)
            .collect();
        let mut index = 0;
        for particle in &complex.particles {
            let mut count = 0;
            while index < children.len()
                && element_local_name(&children[index]) == particle.name
                && particle.max_occurs.map(|max| count < max).unwrap_or(true)
            {
                let child_path = format!("{path}/{}[{}]", particle.name, count + 1);
                self.check_element(&children[index], &particle.type_ref, &child_path, failures);
                index += 1;
                count += 1;
            }
            if count < particle.min_occurs {
                failures.push(ValidationFailure {
                    message: format!(
                        "element '{}' occurs {count} times, at least {} required",
                        particle.name, particle.min_occurs
                    ),
                    location: Some(path.to_string()),
                });
            }
        }
        for extra in &children[index.min(children.len())..] {
            failures.push(ValidationFailure {
                message: format!(
                    "element '{}' is not allowed here",
                    element_local_name(extra)
                ),
                location: Some(path.to_string()),
            });
        }
        for assert in &complex.asserts {
            let ctx = DynamicContext::with_context_item(XdmItem::Node(element.clone()));
            match assert.compiled.effective_boolean_value(&ctx) {
                Ok(true) => {}
                Ok(false) => failures.push(ValidationFailure {
                    message: format!("assertion '{}' is not satisfied", assert.test),
                    location: Some(path.to_string()),
                }),
                Err(err) => failures.push(ValidationFailure {
                    message: format!("assertion '{}' failed to evaluate: {err}", assert.test),
                    location: Some(path.to_string()),
                }),
            }
        }
    }

    fn check_simple_value(
        &self,
        value: &str,
        simple: SimpleType,
        path: &str,
        failures: &mut Vec<ValidationFailure>,
    ) {
        let lexical = value.trim();
        let ok = match simple {
            SimpleType::String | SimpleType::AnyUri => true,
            SimpleType::Boolean => matches!(lexical, "true" | "false" | "1" | "0"),
            SimpleType::Integer => lexical.parse::<i64>().is_ok(),
            SimpleType::Decimal | SimpleType::Double => lexical.parse::<f64>().is_ok(),
            SimpleType::Date => {
                chrono::NaiveDate::parse_from_str(lexical, "%Y-%m-%d").is_ok()
            }
            SimpleType::DateTime => chrono::DateTime::parse_from_rfc3339(lexical).is_ok(),
            SimpleType::Base64Binary => base64::engine::general_purpose::STANDARD
                .decode(lexical.as_bytes())
                .is_ok(),
            SimpleType::HexBinary => hex::decode(lexical).is_ok(),
        };
        if !ok {
            failures.push(ValidationFailure {
                message: format!(
                    "'{lexical}' is not a valid value for {}",
                    simple.describe()
                ),
                location: Some(path.to_string()),
            });
        }
    }
}

impl SimpleType {
    fn describe(&self) -> &'static str {
        match self {
            SimpleType::String => "xs:string",
            SimpleType::Boolean => "xs:boolean",
            SimpleType::Integer => "xs:integer",
            SimpleType::Decimal => "xs:decimal",
            SimpleType::Double => "xs:double",
            SimpleType::Date => "xs:date",
            SimpleType::DateTime => "xs:dateTime",
            SimpleType::Base64Binary => "xs:base64Binary",
            SimpleType::HexBinary => "xs:hexBinary",
            SimpleType::AnyUri => "xs:anyURI",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_type_mapping() {
        assert_eq!(builtin_simple_type("xs:int"), Some(SimpleType::Integer));
        assert_eq!(
            builtin_simple_type("xs:base64Binary"),
            Some(SimpleType::Base64Binary)
        );
        assert_eq!(builtin_simple_type("myType"), None);
    }

    #[test]
    fn simple_value_checks() {
        let schemas = SchemaSet::default();
        let walker = Walker { schemas: &schemas };
        let mut failures = Vec::new();
        walker.check_simple_value("42", SimpleType::Integer, "/n", &mut failures);
        walker.check_simple_value("2024-03-01", SimpleType::Date, "/d", &mut failures);
        walker.check_simple_value("deadbeef", SimpleType::HexBinary, "/h", &mut failures);
        assert!(failures.is_empty());
        walker.check_simple_value("abc", SimpleType::Integer, "/n", &mut failures);
        walker.check_simple_value("2024-13-01", SimpleType::Date, "/d", &mut failures);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].location.as_deref(), Some("/n"));
    }

    #[test]
    fn report_renders_as_xml() {
        let report = ValidationReport {
            timestamp: "2026-01-01T00:00:00+00:00".into(),
            source: None,
            failures: vec![ValidationFailure {
                message: "element 'b' occurs 0 times, at least 1 required".into(),
                location: Some("/a".into()),
            }],
        };
        let text = report.to_node().unwrap().to_string();
        assert!(text.contains("<validation-report"));
        assert!(text.contains("location=\"/a\""));
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"failures\""));
    }
}
