//! Atomic values

use std::fmt;

use crate::name::QName;

const XS: &str = "http://www.w3.org/2001/XMLSchema";

/// An atomic value: a primitive type plus a canonical string form.
#[derive(Debug, Clone, PartialEq)]
pub enum XdmAtomicValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    UntypedAtomic(String),
    AnyUri(String),
    QName(QName),
}

impl XdmAtomicValue {
    /// Canonical lexical representation.
    pub fn string_value(&self) -> String {
        match self {
            XdmAtomicValue::Boolean(b) => b.to_string(),
            XdmAtomicValue::Integer(i) => i.to_string(),
            XdmAtomicValue::Double(d) => format_double(*d),
            XdmAtomicValue::String(s)
            | XdmAtomicValue::UntypedAtomic(s)
            | XdmAtomicValue::AnyUri(s) => s.clone(),
            XdmAtomicValue::QName(q) => q.lexical(),
        }
    }

    /// Effective boolean value of this single atomic.
    pub fn boolean_value(&self) -> bool {
        match self {
            XdmAtomicValue::Boolean(b) => *b,
            XdmAtomicValue::Integer(i) => *i != 0,
            XdmAtomicValue::Double(d) => *d != 0.0 && !d.is_nan(),
            XdmAtomicValue::String(s)
            | XdmAtomicValue::UntypedAtomic(s)
            | XdmAtomicValue::AnyUri(s) => !s.is_empty(),
            XdmAtomicValue::QName(_) => true,
        }
    }

    /// Numeric view as a double; NaN when the value has no numeric form.
    pub fn double_value(&self) -> f64 {
        match self {
            XdmAtomicValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            XdmAtomicValue::Integer(i) => *i as f64,
            XdmAtomicValue::Double(d) => *d,
            XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => {
                s.trim().parse().unwrap_or(f64::NAN)
            }
            _ => f64::NAN,
        }
    }

    /// Numeric view as an integer, truncating doubles; 0 when the value has
    /// no numeric form.
    pub fn integer_value(&self) -> i64 {
        match self {
            XdmAtomicValue::Boolean(b) => *b as i64,
            XdmAtomicValue::Integer(i) => *i,
            XdmAtomicValue::Double(d) => *d as i64,
            XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => {
                let t = s.trim();
                t.parse::<i64>()
                    .unwrap_or_else(|_| t.parse::<f64>().map(|d| d as i64).unwrap_or(0))
            }
            _ => 0,
        }
    }

    /// True for the numeric primitives.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            XdmAtomicValue::Integer(_) | XdmAtomicValue::Double(_)
        )
    }

    /// The primitive type name in `Q{uri}local` notation, e.g.
    /// `Q{http://www.w3.org/2001/XMLSchema}double`.
    pub fn primitive_type_name(&self) -> String {
        let local = match self {
            XdmAtomicValue::Boolean(_) => "boolean",
            XdmAtomicValue::Integer(_) => "integer",
            XdmAtomicValue::Double(_) => "double",
            XdmAtomicValue::String(_) => "string",
            XdmAtomicValue::UntypedAtomic(_) => "untypedAtomic",
            XdmAtomicValue::AnyUri(_) => "anyURI",
            XdmAtomicValue::QName(_) => "QName",
        };
        format!("Q{{{}}}{}", XS, local)
    }
}

/// Canonical double formatting: integral values drop the fraction.
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "INF" } else { "-INF" }.to_string()
    } else if d == d.trunc() && d.abs() < 1e18 {
        format!("{}", d as i64)
    } else {
        format!("{}", d)
    }
}

impl fmt::Display for XdmAtomicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string_value())
    }
}
