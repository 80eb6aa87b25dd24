use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;
use std::str::FromStr;

new_key_type! {
    /// Identifies an active process inside a machine.
    pub struct ProcessId;
}

/// A `namespace:path` identifier. Ordered by its textual form so that sorting
/// a list of ids is reproducible across runs and containers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespacedId {
    namespace: String,
    path: String,
}

/// Errors produced when parsing a [`NamespacedId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("identifier '{0}' is missing a ':' separator")]
    MissingSeparator(String),
    #[error("identifier '{0}' has an empty namespace or path")]
    EmptyPart(String),
}

impl NamespacedId {
    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for NamespacedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl FromStr for NamespacedId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, path) = s
            .split_once(':')
            .ok_or_else(|| IdParseError::MissingSeparator(s.to_string()))?;
        if namespace.is_empty() || path.is_empty() {
            return Err(IdParseError::EmptyPart(s.to_string()));
        }
        Ok(Self::new(namespace, path))
    }
}

impl TryFrom<String> for NamespacedId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NamespacedId> for String {
    fn from(id: NamespacedId) -> Self {
        id.to_string()
    }
}

impl PartialOrd for NamespacedId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NamespacedId {
    // Compares as if both sides were rendered to "namespace:path".
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.namespace
            .bytes()
            .chain(std::iter::once(b':'))
            .chain(self.path.bytes())
            .cmp(
                other
                    .namespace
                    .bytes()
                    .chain(std::iter::once(b':'))
                    .chain(other.path.bytes()),
            )
    }
}

/// Identifies a requirement kind (item, fluid, energy, ...). Handlers are
/// registered per kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequirementKind(pub NamespacedId);

impl RequirementKind {
    pub fn new(namespace: &str, path: &str) -> Self {
        Self(NamespacedId::new(namespace, path))
    }

    pub fn id(&self) -> &NamespacedId {
        &self.0
    }
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let id: NamespacedId = "machina:process_speed".parse().unwrap();
        assert_eq!(id.namespace(), "machina");
        assert_eq!(id.path(), "process_speed");
        assert_eq!(id.to_string(), "machina:process_speed");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(
            "no_separator".parse::<NamespacedId>(),
            Err(IdParseError::MissingSeparator("no_separator".into()))
        );
        assert!(matches!(
            ":path".parse::<NamespacedId>(),
            Err(IdParseError::EmptyPart(_))
        ));
        assert!(matches!(
            "ns:".parse::<NamespacedId>(),
            Err(IdParseError::EmptyPart(_))
        ));
    }

    #[test]
    fn ordering_matches_textual_form() {
        // "a:zz" < "ab:a" because ':' (0x3A) sorts below 'b'.
        let a = NamespacedId::new("a", "zz");
        let b = NamespacedId::new("ab", "a");
        assert!(a < b);
        assert_eq!(a.cmp(&b), a.to_string().cmp(&b.to_string()));
    }

    #[test]
    fn requirement_kinds_sort_lexicographically() {
        let mut kinds = vec![
            RequirementKind::new("machina", "item"),
            RequirementKind::new("machina", "energy"),
            RequirementKind::new("addon", "heat"),
        ];
        kinds.sort();
        let rendered: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["addon:heat", "machina:energy", "machina:item"]);
    }

    #[test]
    fn string_conversion_round_trips() {
        let id = NamespacedId::new("machina", "item");
        let text = String::from(id.clone());
        assert_eq!(text, "machina:item");
        assert_eq!(NamespacedId::try_from(text), Ok(id));
    }
}
