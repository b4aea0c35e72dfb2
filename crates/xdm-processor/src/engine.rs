//! Process-wide engine lifecycle and factory surface.
//!
//! The engine is a singleton: one `init` per process, one `teardown`,
//! no re-initialization afterwards. The [`Engine`] value itself is a
//! cheap cloneable handle that can be shared across threads; every
//! operation on it or on a processor created from it first checks
//! liveness.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use xdm::{WhitespacePolicy, XdmAtomicValue, XdmItem, XdmNode, XdmValue};

use crate::error::{Error, Result};
use crate::validator::SchemaValidator;
use crate::xpath::XPathProcessor;
use crate::xquery::XQueryProcessor;
use crate::xslt::Xslt30Processor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Uninitialized,
    Live,
    TornDown,
}

static LIFECYCLE: Mutex<LifecycleState> = Mutex::new(LifecycleState::Uninitialized);

#[derive(Debug)]
struct EngineInner {
    live: AtomicBool,
    properties: Mutex<HashMap<String, String>>,
}

/// Handle to the process-wide engine.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Initializes the engine. Fails if it is already live or has been
    /// torn down; the lifecycle never restarts within a process.
    pub fn init() -> Result<Engine> {
        let mut state = LIFECYCLE.lock().expect("lifecycle lock poisoned");
        match *state {
            LifecycleState::Uninitialized => {
                *state = LifecycleState::Live;
                tracing::debug!("engine initialized");
                Ok(Engine {
                    inner: Arc::new(EngineInner {
                        live: AtomicBool::new(true),
                        properties: Mutex::new(HashMap::new()),
                    }),
                })
            }
            LifecycleState::Live => Err(Error::Lifecycle(
                "the engine is already initialized".into(),
            )),
            LifecycleState::TornDown => Err(Error::Lifecycle(
                "the engine cannot be re-initialized after teardown".into(),
            )),
        }
    }

    /// Releases the engine. Further operations through any handle fail
    /// with a lifecycle error.
    pub fn teardown(&self) -> Result<()> {
        self.ensure_live()?;
        let mut state = LIFECYCLE.lock().expect("lifecycle lock poisoned");
        self.inner.live.store(false, Ordering::SeqCst);
        *state = LifecycleState::TornDown;
        tracing::debug!("engine torn down");
        Ok(())
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.inner.live.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Lifecycle(
                "the engine has been torn down".into(),
            ))
        }
    }

    /// Engine identification string.
    pub fn version(&self) -> Result<String> {
        self.ensure_live()?;
        Ok(format!(
            "{} {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ))
    }

    // -- configuration ------------------------------------------------

    pub fn set_configuration_property(&self, name: &str, value: &str) -> Result<()> {
        self.ensure_live()?;
        self.inner
            .properties
            .lock()
            .expect("property lock poisoned")
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn configuration_property(&self, name: &str) -> Result<Option<String>> {
        self.ensure_live()?;
        Ok(self
            .inner
            .properties
            .lock()
            .expect("property lock poisoned")
            .get(name)
            .cloned())
    }

    /// Schema processing is available unless explicitly switched off
    /// with the `schema-validation` property.
    pub fn is_schema_aware(&self) -> Result<bool> {
        Ok(self.configuration_property("schema-validation")?.as_deref() != Some("off"))
    }

    // -- document and value factories ---------------------------------

    pub fn parse_xml_str(&self, xml: &str) -> Result<XdmNode> {
        self.ensure_live()?;
        Ok(xdm::parse_xml_str(xml)?)
    }

    pub fn parse_xml_file(&self, path: impl AsRef<Path>) -> Result<XdmNode> {
        self.ensure_live()?;
        Ok(xdm::parse_xml_file(path)?)
    }

    pub(crate) fn parse_stylesheet_module(&self, xml: &str) -> Result<XdmNode> {
        self.ensure_live()?;
        Ok(xdm::parse_xml_str_with_policy(
            xml,
            WhitespacePolicy::Strip,
        )?)
    }

    pub fn make_integer_value(&self, value: i64) -> XdmValue {
        XdmValue::from_items(vec![XdmItem::Atomic(XdmAtomicValue::Integer(value))])
    }

    pub fn make_double_value(&self, value: f64) -> XdmValue {
        XdmValue::from_items(vec![XdmItem::Atomic(XdmAtomicValue::Double(value))])
    }

    pub fn make_boolean_value(&self, value: bool) -> XdmValue {
        XdmValue::from_items(vec![XdmItem::Atomic(XdmAtomicValue::Boolean(value))])
    }

    pub fn make_string_value(&self, value: &str) -> XdmValue {
        XdmValue::from_items(vec![XdmItem::Atomic(XdmAtomicValue::String(
            value.to_string(),
        ))])
    }

    // -- processor factories ------------------------------------------

    pub fn new_xpath_processor(&self) -> Result<XPathProcessor> {
        self.ensure_live()?;
        Ok(XPathProcessor::new(self.clone()))
    }

    pub fn new_xslt30_processor(&self) -> Result<Xslt30Processor> {
        self.ensure_live()?;
        Ok(Xslt30Processor::new(self.clone()))
    }

    pub fn new_xquery_processor(&self) -> Result<XQueryProcessor> {
        self.ensure_live()?;
        Ok(XQueryProcessor::new(self.clone()))
    }

    /// Creating a validator fails when schema processing has been
    /// switched off; this is a configuration failure, distinct from a
    /// validation outcome.
    pub fn new_schema_validator(&self) -> Result<SchemaValidator> {
        self.ensure_live()?;
        if !self.is_schema_aware()? {
            return Err(Error::Configuration(
                "schema validation is disabled for this engine".into(),
            ));
        }
        Ok(SchemaValidator::new(self.clone()))
    }
}
