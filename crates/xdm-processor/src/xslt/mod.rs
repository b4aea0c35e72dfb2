//! XSLT 3.0 processing: stylesheet compilation, template application,
//! named template and stylesheet function invocation.

mod compiler;
mod interpreter;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use xdm::{SerializationOptions, TreeBuilder, XdmItem, XdmNode, XdmValue};

use crate::engine::Engine;
use crate::error::{Error, Result};
use compiler::Stylesheet;
use interpreter::Execution;

pub(crate) use interpreter::append_items;

const DEFAULT_TEMPLATE: &str = "{http://www.w3.org/1999/XSL/Transform}initial-template";

/// Compiles and runs XSLT stylesheets.
///
/// Bindings (selection, context item, parameters, properties) persist
/// across runs until cleared; each execution call evaluates the
/// stylesheet's global bindings afresh against the current state.
#[derive(Debug)]
pub struct Xslt30Processor {
    engine: Engine,
    stylesheet: Option<Arc<Stylesheet>>,
    parameters: HashMap<String, XdmValue>,
    initial_template_parameters: HashMap<String, XdmValue>,
    initial_match_selection: Option<XdmValue>,
    global_context_item: Option<XdmItem>,
    raw: bool,
    properties: HashMap<String, String>,
}

impl Xslt30Processor {
    pub(crate) fn new(engine: Engine) -> Self {
        Xslt30Processor {
            engine,
            stylesheet: None,
            parameters: HashMap::new(),
            initial_template_parameters: HashMap::new(),
            initial_match_selection: None,
            global_context_item: None,
            raw: false,
            properties: HashMap::new(),
        }
    }

    // -- compilation --------------------------------------------------

    pub fn compile_stylesheet_text(&mut self, text: &str) -> Result<()> {
        let doc = self.engine.parse_stylesheet_module(text)?;
        let sheet = compiler::compile_stylesheet(&doc)?;
        self.stylesheet = Some(Arc::new(sheet));
        Ok(())
    }

    pub fn compile_stylesheet_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.compile_stylesheet_text(&text)
    }

    // -- bindings -----------------------------------------------------

    pub fn set_initial_match_selection(&mut self, selection: XdmValue) {
        self.initial_match_selection = Some(selection);
    }

    pub fn set_global_context_item(&mut self, item: XdmItem) {
        self.global_context_item = Some(item);
    }

    /// Supplies a value for a global stylesheet parameter.
    pub fn set_parameter(&mut self, name: &str, value: XdmValue) {
        self.parameters.insert(name.to_string(), value);
    }

    pub fn set_initial_template_parameters(&mut self, params: HashMap<String, XdmValue>) {
        self.initial_template_parameters = params;
    }

    /// In raw mode execution results are returned as the produced
    /// sequence instead of being wrapped in a document node.
    pub fn set_result_as_raw_value(&mut self, raw: bool) {
        self.raw = raw;
    }

    /// Names starting with `!` are serialization properties, applied
    /// only when a result is rendered to a string or file.
    pub fn set_property(&mut self, name: &str, value: &str) {
        self.properties.insert(name.to_string(), value.to_string());
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
        self.initial_template_parameters.clear();
    }

    pub fn clear_properties(&mut self) {
        self.properties.clear();
    }

    // -- execution ----------------------------------------------------

    /// Applies template rules to the initial match selection. Returns
    /// `None` when no stylesheet has been compiled.
    pub fn apply_templates_returning_value(&mut self) -> Result<Option<XdmValue>> {
        self.engine.ensure_live()?;
        let sheet = match &self.stylesheet {
            Some(sheet) => Arc::clone(sheet),
            None => return Ok(None),
        };
        let selection = self.initial_match_selection.clone().ok_or_else(|| {
            Error::Configuration("no initial match selection has been set".into())
        })?;
        let execution = self.prepare(&sheet, Some(&selection))?;
        tracing::debug!(items = selection.size(), "applying templates");
        let items = execution.apply_to(&selection, &self.initial_template_parameters)?;
        Ok(Some(self.normalize(&sheet, items)?))
    }

    pub fn apply_templates_returning_string(&mut self) -> Result<Option<String>> {
        match self.apply_templates_returning_value()? {
            Some(value) => {
                let sheet = self.stylesheet.as_ref().map(Arc::clone);
                Ok(Some(self.serialize_terminal(sheet.as_deref(), &value)))
            }
            None => Ok(None),
        }
    }

    /// Invokes a named template, `xsl:initial-template` by default.
    /// Returns `None` when no stylesheet has been compiled.
    pub fn call_template_returning_value(
        &mut self,
        name: Option<&str>,
    ) -> Result<Option<XdmValue>> {
        self.engine.ensure_live()?;
        let sheet = match &self.stylesheet {
            Some(sheet) => Arc::clone(sheet),
            None => return Ok(None),
        };
        let execution = self.prepare(&sheet, None)?;
        let context = self.global_context_item.clone();
        let items = execution.call_named_template(
            name.unwrap_or(DEFAULT_TEMPLATE),
            &self.initial_template_parameters,
            context.as_ref(),
        )?;
        Ok(Some(self.normalize(&sheet, items)?))
    }

    /// Invokes a stylesheet function by its `{uri}local` name. The
    /// result is the function's value sequence, never wrapped in a
    /// document. Returns `None` when no stylesheet has been compiled.
    pub fn call_function_returning_value(
        &mut self,
        name: &str,
        args: &[XdmValue],
    ) -> Result<Option<XdmValue>> {
        self.engine.ensure_live()?;
        let sheet = match &self.stylesheet {
            Some(sheet) => Arc::clone(sheet),
            None => return Ok(None),
        };
        let execution = self.prepare(&sheet, None)?;
        Ok(Some(execution.call_function(name, args)?))
    }

    /// One-shot transform: optionally compiles a stylesheet file and
    /// sets the source as the initial match selection, then applies
    /// templates and serializes.
    pub fn transform_to_string(
        &mut self,
        source: Option<&XdmNode>,
        stylesheet_file: Option<&Path>,
    ) -> Result<Option<String>> {
        if let Some(path) = stylesheet_file {
            self.compile_stylesheet_file(path)?;
        }
        if let Some(node) = source {
            self.initial_match_selection = Some(XdmValue::from_items(vec![XdmItem::Node(
                node.clone(),
            )]));
        }
        self.apply_templates_returning_string()
    }

    // -- result shaping -----------------------------------------------

    fn prepare(&self, sheet: &Arc<Stylesheet>, selection: Option<&XdmValue>) -> Result<Execution> {
        let context = self.global_context_item.clone().or_else(|| {
            // A singleton selection doubles as the global context item.
            selection.and_then(|s| match s.items() {
                [only] => Some(only.clone()),
                _ => None,
            })
        });
        Execution::prepare(Arc::clone(sheet), &self.parameters, context.as_ref())
    }

    /// Raw mode passes the sequence through; otherwise the output is
    /// assembled as the content of a fresh document node.
    fn normalize(&self, sheet: &Stylesheet, items: Vec<XdmItem>) -> Result<XdmValue> {
        if self.raw {
            return Ok(XdmValue::from_items(items));
        }
        let mut builder = TreeBuilder::document();
        if let Some(separator) = self.serialization_property(
            "item-separator",
            sheet.output.item_separator.as_deref(),
        ) {
            builder.set_item_separator(separator);
        }
        append_items(&mut builder, &items)?;
        Ok(XdmValue::from_items(vec![XdmItem::Node(builder.finish())]))
    }

    fn serialization_property(&self, name: &str, from_output: Option<&str>) -> Option<String> {
        self.properties
            .get(&format!("!{name}"))
            .cloned()
            .or_else(|| from_output.map(str::to_string))
    }

    fn serialize_terminal(&self, sheet: Option<&Stylesheet>, value: &XdmValue) -> String {
        let output = sheet.map(|s| &s.output);
        let omit = self
            .serialization_property(
                "omit-xml-declaration",
                output
                    .and_then(|o| o.omit_xml_declaration)
                    .map(|b| if b { "yes" } else { "no" }),
            )
            .as_deref()
            == Some("yes");
        let indent = self
            .serialization_property(
                "indent",
                output.map(|o| if o.indent { "yes" } else { "no" }),
            )
            .as_deref()
            == Some("yes");
        let options = SerializationOptions {
            omit_xml_declaration: omit,
            indent,
            item_separator: self.serialization_property(
                "item-separator",
                output.and_then(|o| o.item_separator.as_deref()),
            ),
        };
        match value.items() {
            [XdmItem::Node(node)] => node.serialize(&options),
            items => {
                let separator = options.item_separator.clone().unwrap_or_default();
                items
                    .iter()
                    .map(|item| match item {
                        XdmItem::Node(node) => node.serialize(&SerializationOptions {
                            item_separator: None,
                            ..options.clone()
                        }),
                        other => other.string_value(),
                    })
                    .collect::<Vec<_>>()
                    .join(&separator)
            }
        }
    }
}
