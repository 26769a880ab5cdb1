use std::{fmt, str::FromStr};

/// Identifies a namespaced resource. Used as the reconcile key.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid resource key: {0:?}")]
pub struct ParseError(String);

impl ResourceId {
    pub fn new(namespace: String, name: String) -> Self {
        Self { namespace, name }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Parses a `namespace/name` key.
impl FromStr for ResourceId {
    type Err = ParseError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        match key.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace.to_string(), name.to_string()))
            }
            _ => Err(ParseError(key.to_string())),
        }
    }
}
