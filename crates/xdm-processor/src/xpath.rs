//! The XPath processor: a reusable static context plus per-evaluation
//! bindings.

use std::collections::HashMap;

use xdm::{XdmItem, XdmValue};
use xdm_xpath::{compile, CompiledXPath, DynamicContext, StaticContext};

use crate::engine::Engine;
use crate::error::{Error, Result};

/// Declared type of a parameter. Kept deliberately coarse: the
/// occurrence indicator is always "exactly one" except for `AnyItem`,
/// which accepts any sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceType {
    AnyItem,
    Boolean,
    Integer,
    Double,
    String,
    Node,
}

impl SequenceType {
    /// `None` when the value conforms; otherwise a description of what
    /// the value actually is.
    fn check(&self, value: &XdmValue) -> Option<String> {
        use xdm::XdmAtomicValue as A;
        if *self == SequenceType::AnyItem {
            return None;
        }
        if value.size() != 1 {
            return Some(format!("a sequence of {} items", value.size()));
        }
        let item = value.head().expect("singleton");
        let ok = matches!(
            (self, item),
            (SequenceType::Boolean, XdmItem::Atomic(A::Boolean(_)))
                | (SequenceType::Integer, XdmItem::Atomic(A::Integer(_)))
                | (SequenceType::Double, XdmItem::Atomic(A::Double(_)))
                | (SequenceType::String, XdmItem::Atomic(A::String(_)))
                | (SequenceType::Node, XdmItem::Node(_))
        );
        if ok {
            None
        } else {
            Some(match item {
                XdmItem::Atomic(atom) => atom.primitive_type_name(),
                XdmItem::Node(_) => "a node".to_string(),
                XdmItem::Function(_) => "a function item".to_string(),
            })
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SequenceType::AnyItem => "item()*",
            SequenceType::Boolean => "xs:boolean",
            SequenceType::Integer => "xs:integer",
            SequenceType::Double => "xs:double",
            SequenceType::String => "xs:string",
            SequenceType::Node => "node()",
        }
    }
}

/// Compiles and evaluates XPath expressions against a static context
/// built up through declarations.
///
/// Namespace and parameter declarations are accepted until the first
/// compilation; afterwards the static context is frozen and further
/// declarations fail with a configuration error. Parameter values and
/// the context item stay re-bindable between evaluations.
pub struct XPathProcessor {
    engine: Engine,
    static_ctx: StaticContext,
    declared: HashMap<String, Option<SequenceType>>,
    parameters: HashMap<String, XdmValue>,
    context_item: Option<XdmItem>,
    frozen: bool,
}

impl XPathProcessor {
    pub(crate) fn new(engine: Engine) -> Self {
        XPathProcessor {
            engine,
            static_ctx: StaticContext::new(),
            declared: HashMap::new(),
            parameters: HashMap::new(),
            context_item: None,
            frozen: false,
        }
    }

    fn ensure_unfrozen(&self, what: &str) -> Result<()> {
        if self.frozen {
            return Err(Error::Configuration(format!(
                "cannot declare {what} after an expression has been compiled"
            )));
        }
        Ok(())
    }

    pub fn declare_namespace(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.engine.ensure_live()?;
        self.ensure_unfrozen("a namespace")?;
        self.static_ctx.declare_namespace(prefix, uri);
        Ok(())
    }

    pub fn declare_parameter(
        &mut self,
        name: &str,
        sequence_type: Option<SequenceType>,
    ) -> Result<()> {
        self.engine.ensure_live()?;
        self.ensure_unfrozen("a parameter")?;
        self.declared.insert(name.to_string(), sequence_type);
        Ok(())
    }

    /// Binds a parameter value. A value violating the parameter's
    /// declared type is rejected here, naming the parameter.
    pub fn set_parameter(&mut self, name: &str, value: XdmValue) -> Result<()> {
        self.engine.ensure_live()?;
        if let Some(Some(expected)) = self.declared.get(name) {
            if let Some(actual) = expected.check(&value) {
                return Err(Error::Type(format!(
                    "parameter ${name} requires {}, got {actual}",
                    expected.name()
                )));
            }
        }
        self.parameters.insert(name.to_string(), value);
        Ok(())
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    /// Sets the context item; re-bindable without recompilation.
    pub fn set_context(&mut self, item: XdmItem) {
        self.context_item = Some(item);
    }

    /// Compiles an expression against the accumulated static context,
    /// freezing it.
    pub fn compile(&mut self, expr: &str) -> Result<CompiledXPath> {
        self.engine.ensure_live()?;
        self.frozen = true;
        Ok(compile(expr, &self.static_ctx)?)
    }

    fn dynamic_context(&self) -> DynamicContext {
        let mut ctx = DynamicContext::new();
        if let Some(item) = &self.context_item {
            ctx.set_context_item(item.clone());
        }
        for (name, value) in &self.parameters {
            ctx.bind_variable(name, value.clone());
        }
        ctx
    }

    /// Compiles and evaluates in one step.
    pub fn evaluate(&mut self, expr: &str) -> Result<XdmValue> {
        let compiled = self.compile(expr)?;
        let result = compiled.evaluate(&self.dynamic_context())?;
        tracing::debug!(expr, size = result.size(), "evaluated xpath");
        Ok(result)
    }

    /// Evaluates expecting exactly one item. Empty results and
    /// multi-item results are both cardinality errors.
    pub fn evaluate_single(&mut self, expr: &str) -> Result<XdmItem> {
        let value = self.evaluate(expr)?;
        let n = value.size();
        match value.into_items().into_iter().next() {
            Some(item) if n == 1 => Ok(item),
            _ => Err(Error::Cardinality(format!(
                "'{expr}' produced {n} items where exactly one was expected"
            ))),
        }
    }

    pub fn effective_boolean_value(&mut self, expr: &str) -> Result<bool> {
        let value = self.evaluate(expr)?;
        Ok(xdm_xpath::effective_boolean_value(&value)?)
    }

    /// Evaluates a previously compiled expression against the current
    /// bindings.
    pub fn evaluate_compiled(&self, compiled: &CompiledXPath) -> Result<XdmValue> {
        self.engine.ensure_live()?;
        Ok(compiled.evaluate(&self.dynamic_context())?)
    }
}
