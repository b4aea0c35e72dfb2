//! The built-in function library.
//!
//! A flat static table keyed by local name. Arity is checked at
//! compile time by the parser; context-dependent functions receive the
//! current focus through [`CallCtx`].

use url::Url;
use xdm::{XdmAtomicValue, XdmItem, XdmValue};

use crate::error::{Error, Result};
use crate::evaluator::{atomize_singleton, effective_boolean_value, string_data, Focus};

pub(crate) struct CallCtx<'a, 'b> {
    pub focus: Option<&'a Focus>,
    pub base_uri: Option<&'b str>,
}

pub(crate) struct Function {
    pub name: &'static str,
    pub min_arity: usize,
    pub max_arity: usize,
    pub invoke: fn(&CallCtx, &[XdmValue]) -> Result<XdmValue>,
}

const FUNCTIONS: &[Function] = &[
    Function {
        name: "boolean",
        min_arity: 1,
        max_arity: 1,
        invoke: fn_boolean,
    },
    Function {
        name: "concat",
        min_arity: 2,
        max_arity: usize::MAX,
        invoke: fn_concat,
    },
    Function {
        name: "count",
        min_arity: 1,
        max_arity: 1,
        invoke: fn_count,
    },
    Function {
        name: "empty",
        min_arity: 1,
        max_arity: 1,
        invoke: fn_empty,
    },
    Function {
        name: "exists",
        min_arity: 1,
        max_arity: 1,
        invoke: fn_exists,
    },
    Function {
        name: "false",
        min_arity: 0,
        max_arity: 0,
        invoke: fn_false,
    },
    Function {
        name: "last",
        min_arity: 0,
        max_arity: 0,
        invoke: fn_last,
    },
    Function {
        name: "local-name",
        min_arity: 0,
        max_arity: 1,
        invoke: fn_local_name,
    },
    Function {
        name: "name",
        min_arity: 0,
        max_arity: 1,
        invoke: fn_name,
    },
    Function {
        name: "not",
        min_arity: 1,
        max_arity: 1,
        invoke: fn_not,
    },
    Function {
        name: "number",
        min_arity: 0,
        max_arity: 1,
        invoke: fn_number,
    },
    Function {
        name: "position",
        min_arity: 0,
        max_arity: 0,
        invoke: fn_position,
    },
    Function {
        name: "resolve-uri",
        min_arity: 1,
        max_arity: 2,
        invoke: fn_resolve_uri,
    },
    Function {
        name: "string",
        min_arity: 0,
        max_arity: 1,
        invoke: fn_string,
    },
    Function {
        name: "string-join",
        min_arity: 1,
        max_arity: 2,
        invoke: fn_string_join,
    },
    Function {
        name: "string-length",
        min_arity: 0,
        max_arity: 1,
        invoke: fn_string_length,
    },
    Function {
        name: "true",
        min_arity: 0,
        max_arity: 0,
        invoke: fn_true,
    },
];

pub(crate) fn lookup(name: &str) -> Option<&'static Function> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

fn singleton(atom: XdmAtomicValue) -> XdmValue {
    XdmValue::from_items(vec![XdmItem::Atomic(atom)])
}

fn context_item<'a>(ctx: &'a CallCtx) -> Result<&'a XdmItem> {
    ctx.focus
        .map(|f| &f.item)
        .ok_or_else(|| Error::dynamic("XPDY0002", "the context item is absent"))
}

/// The argument if given, otherwise the context item as a singleton.
fn arg_or_context(ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    match args.first() {
        Some(value) => Ok(value.clone()),
        None => Ok(XdmValue::from_items(vec![context_item(ctx)?.clone()])),
    }
}

fn fn_boolean(_ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    Ok(singleton(XdmAtomicValue::Boolean(effective_boolean_value(
        &args[0],
    )?)))
}

fn fn_not(_ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    Ok(singleton(XdmAtomicValue::Boolean(
        !effective_boolean_value(&args[0])?,
    )))
}

fn fn_true(_ctx: &CallCtx, _args: &[XdmValue]) -> Result<XdmValue> {
    Ok(singleton(XdmAtomicValue::Boolean(true)))
}

fn fn_false(_ctx: &CallCtx, _args: &[XdmValue]) -> Result<XdmValue> {
    Ok(singleton(XdmAtomicValue::Boolean(false)))
}

fn fn_count(_ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    Ok(singleton(XdmAtomicValue::Integer(args[0].size() as i64)))
}

fn fn_empty(_ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    Ok(singleton(XdmAtomicValue::Boolean(args[0].is_empty())))
}

fn fn_exists(_ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    Ok(singleton(XdmAtomicValue::Boolean(!args[0].is_empty())))
}

fn fn_string(ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    let value = arg_or_context(ctx, args)?;
    let text = match value.size() {
        0 => String::new(),
        1 => string_data(value.head().expect("non-empty"))?,
        n => {
            return Err(Error::dynamic(
                "XPTY0004",
                format!("string() requires at most one item, found {n}"),
            ))
        }
    };
    Ok(singleton(XdmAtomicValue::String(text)))
}

fn fn_string_length(ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    let as_string = fn_string(ctx, args)?;
    let length = match as_string.head() {
        Some(XdmItem::Atomic(XdmAtomicValue::String(s))) => s.chars().count(),
        _ => 0,
    };
    Ok(singleton(XdmAtomicValue::Integer(length as i64)))
}

fn fn_concat(_ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    let mut out = String::new();
    for arg in args {
        if let Some(atom) = atomize_singleton(arg)? {
            out.push_str(&atom.string_value());
        }
    }
    Ok(singleton(XdmAtomicValue::String(out)))
}

fn fn_string_join(_ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    let separator = match args.get(1) {
        Some(sep) => match atomize_singleton(sep)? {
            Some(atom) => atom.string_value(),
            None => String::new(),
        },
        None => String::new(),
    };
    let parts: Vec<String> = args[0]
        .iter()
        .map(string_data)
        .collect::<Result<Vec<_>>>()?;
    Ok(singleton(XdmAtomicValue::String(parts.join(&separator))))
}

fn fn_number(ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    let value = arg_or_context(ctx, args)?;
    let result = match atomize_singleton(&value) {
        Ok(Some(atom)) => atom.double_value(),
        _ => f64::NAN,
    };
    Ok(singleton(XdmAtomicValue::Double(result)))
}

fn fn_name(ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    node_name(ctx, args, |q| q.lexical())
}

fn fn_local_name(ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    node_name(ctx, args, |q| q.local_part().to_string())
}

fn node_name(
    ctx: &CallCtx,
    args: &[XdmValue],
    project: fn(&xdm::QName) -> String,
) -> Result<XdmValue> {
    let value = arg_or_context(ctx, args)?;
    let text = match value.head() {
        None => String::new(),
        Some(XdmItem::Node(node)) => node.name().map(project).unwrap_or_default(),
        Some(other) => {
            return Err(Error::dynamic(
                "XPTY0004",
                format!("name() requires a node, found {}", other.string_value()),
            ))
        }
    };
    Ok(singleton(XdmAtomicValue::String(text)))
}

fn fn_position(ctx: &CallCtx, _args: &[XdmValue]) -> Result<XdmValue> {
    let focus = ctx
        .focus
        .ok_or_else(|| Error::dynamic("XPDY0002", "position() requires a focus"))?;
    Ok(singleton(XdmAtomicValue::Integer(focus.position as i64)))
}

fn fn_last(ctx: &CallCtx, _args: &[XdmValue]) -> Result<XdmValue> {
    let focus = ctx
        .focus
        .ok_or_else(|| Error::dynamic("XPDY0002", "last() requires a focus"))?;
    Ok(singleton(XdmAtomicValue::Integer(focus.size as i64)))
}

fn fn_resolve_uri(ctx: &CallCtx, args: &[XdmValue]) -> Result<XdmValue> {
    let relative = match atomize_singleton(&args[0])? {
        Some(atom) => atom.string_value(),
        None => return Ok(XdmValue::empty()),
    };
    let base = match args.get(1) {
        Some(value) => atomize_singleton(value)?
            .map(|atom| atom.string_value())
            .ok_or_else(|| {
                Error::dynamic("FORG0002", "resolve-uri() base argument is empty")
            })?,
        None => ctx
            .base_uri
            .map(String::from)
            .ok_or_else(|| Error::dynamic("FORG0002", "no base URI available"))?,
    };
    // An already absolute URI resolves to itself.
    if let Ok(absolute) = Url::parse(&relative) {
        return Ok(singleton(XdmAtomicValue::AnyUri(absolute.to_string())));
    }
    let base = Url::parse(&base)
        .map_err(|e| Error::dynamic("FORG0002", format!("invalid base URI '{base}': {e}")))?;
    let resolved = base
        .join(&relative)
        .map_err(|e| Error::dynamic("FORG0002", format!("cannot resolve '{relative}': {e}")))?;
    Ok(singleton(XdmAtomicValue::AnyUri(resolved.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_functions() {
        assert!(lookup("count").is_some());
        assert!(lookup("resolve-uri").is_some());
        assert!(lookup("no-such").is_none());
    }

    #[test]
    fn concat_accepts_many_arguments() {
        let f = lookup("concat").unwrap();
        assert_eq!(f.max_arity, usize::MAX);
    }
}
