//! Static and dynamic evaluation contexts.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use xdm::{XdmItem, XdmValue};

use crate::error::Result;

/// Callback invoked for user-declared function calls: Clark name of the
/// function plus the evaluated arguments.
pub type FunctionResolver = Arc<dyn Fn(&str, &[XdmValue]) -> Result<XdmValue> + Send + Sync>;

/// Information fixed at compile time: in-scope namespace bindings, the
/// static base URI, and the signatures of user-declared functions.
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    namespaces: HashMap<String, String>,
    base_uri: Option<String>,
    functions: HashSet<(String, usize)>,
}

impl StaticContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_namespace(&mut self, prefix: &str, uri: &str) {
        self.namespaces.insert(prefix.to_string(), uri.to_string());
    }

    pub fn namespace(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some("http://www.w3.org/XML/1998/namespace");
        }
        self.namespaces.get(prefix).map(String::as_str)
    }

    pub fn set_base_uri(&mut self, uri: &str) {
        self.base_uri = Some(uri.to_string());
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }

    /// Declares a user function by Clark name (`{uri}local`) and arity,
    /// making prefixed calls to it compile.
    pub fn declare_function(&mut self, clark_name: &str, arity: usize) {
        self.functions.insert((clark_name.to_string(), arity));
    }

    pub fn has_function(&self, clark_name: &str, arity: usize) -> bool {
        self.functions
            .contains(&(clark_name.to_string(), arity))
    }

    /// Whether a function of this name is declared at any arity.
    pub fn has_function_name(&self, clark_name: &str) -> bool {
        self.functions.iter().any(|(name, _)| name == clark_name)
    }
}

/// Per-evaluation state: the context item, variable bindings and an
/// optional resolver for user-declared functions.
///
/// Variables are keyed by lexical name as written after `$`, so a
/// binding made under `err:code` is found by the reference `$err:code`.
#[derive(Clone, Default)]
pub struct DynamicContext {
    context_item: Option<XdmItem>,
    variables: HashMap<String, XdmValue>,
    resolver: Option<FunctionResolver>,
}

impl DynamicContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context_item(item: XdmItem) -> Self {
        DynamicContext {
            context_item: Some(item),
            ..Default::default()
        }
    }

    pub fn set_context_item(&mut self, item: XdmItem) {
        self.context_item = Some(item);
    }

    pub fn context_item(&self) -> Option<&XdmItem> {
        self.context_item.as_ref()
    }

    /// Binds a variable; rebinding the same name replaces the value.
    pub fn bind_variable(&mut self, name: &str, value: XdmValue) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&XdmValue> {
        self.variables.get(name)
    }

    pub fn clear_variables(&mut self) {
        self.variables.clear();
    }

    pub fn set_function_resolver(&mut self, resolver: FunctionResolver) {
        self.resolver = Some(resolver);
    }

    pub(crate) fn function_resolver(&self) -> Option<&FunctionResolver> {
        self.resolver.as_ref()
    }
}

impl fmt::Debug for DynamicContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicContext")
            .field("context_item", &self.context_item)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}
