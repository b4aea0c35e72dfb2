//! Qualified names

use std::fmt;

/// A qualified name: optional prefix, optional namespace URI, local part.
///
/// Equality ignores the prefix; two names are the same when their namespace
/// URI and local part agree.
#[derive(Debug, Clone)]
pub struct QName {
    prefix: Option<String>,
    ns_uri: Option<String>,
    local: String,
}

impl QName {
    /// A name in no namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            ns_uri: None,
            local: local.into(),
        }
    }

    /// A name in a namespace, without a prefix.
    pub fn with_uri(ns_uri: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            ns_uri: Some(ns_uri.into()),
            local: local.into(),
        }
    }

    /// A fully specified name.
    pub fn new(
        prefix: Option<String>,
        ns_uri: Option<String>,
        local: impl Into<String>,
    ) -> Self {
        Self {
            prefix,
            ns_uri,
            local: local.into(),
        }
    }

    /// Parse a Clark-notation name: `{uri}local` or plain `local`.
    pub fn parse_clark(name: &str) -> Option<Self> {
        if let Some(rest) = name.strip_prefix('{') {
            let end = rest.find('}')?;
            let (uri, local) = rest.split_at(end);
            let local = &local[1..];
            if local.is_empty() {
                return None;
            }
            Some(Self::with_uri(uri, local))
        } else if name.is_empty() {
            None
        } else {
            Some(Self::local(name))
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn ns_uri(&self) -> Option<&str> {
        self.ns_uri.as_deref()
    }

    pub fn local_part(&self) -> &str {
        &self.local
    }

    /// Lexical form, `prefix:local` or `local`.
    pub fn lexical(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }

    /// Clark notation, `{uri}local` or `local`.
    pub fn clark(&self) -> String {
        match &self.ns_uri {
            Some(uri) => format!("{{{}}}{}", uri, self.local),
            None => self.local.clone(),
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.ns_uri == other.ns_uri && self.local == other.local
    }
}

impl Eq for QName {}

impl std::hash::Hash for QName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ns_uri.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lexical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clark_round_trip() {
        let q = QName::parse_clark("{http://localhost/}add").unwrap();
        assert_eq!(q.ns_uri(), Some("http://localhost/"));
        assert_eq!(q.local_part(), "add");
        assert_eq!(q.clark(), "{http://localhost/}add");
    }

    #[test]
    fn plain_clark_name() {
        let q = QName::parse_clark("go").unwrap();
        assert_eq!(q.ns_uri(), None);
        assert_eq!(q.local_part(), "go");
    }

    #[test]
    fn equality_ignores_prefix() {
        let a = QName::new(Some("f".into()), Some("http://x/".into()), "add");
        let b = QName::with_uri("http://x/", "add");
        assert_eq!(a, b);
        assert_eq!(a.lexical(), "f:add");
    }

    #[test]
    fn empty_clark_rejected() {
        assert!(QName::parse_clark("").is_none());
        assert!(QName::parse_clark("{u}").is_none());
    }
}
