use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// A set of labels attached to a workload or namespace.
#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Expression {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: BTreeSet<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects a set of labeled entities (pods or namespaces).
///
/// An empty selector matches everything of the appropriate kind.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    match_labels: Option<Map>,
    match_expressions: Option<Expressions>,
}

/// A validated selector with fast paths for the trivial cases.
///
/// Policy evaluation compiles each selector once and then matches it against
/// many label sets, so the matches-all/matches-none cases are detected up
/// front and short-circuited by callers.
#[derive(Clone, Debug)]
pub struct CompiledSelector(Compiled);

#[derive(Clone, Debug)]
enum Compiled {
    All,
    None,
    Match {
        labels: Map,
        expressions: Expressions,
    },
}

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(exprs),
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: Some(map),
            match_expressions: None,
        }
    }

    /// Validates the selector and reduces it to a matcher.
    ///
    /// An `In` expression with no values is unsatisfiable and compiles to the
    /// matches-none fast path. A `NotIn` expression with no values is trivially
    /// true and is dropped. Malformed expressions (empty keys, values on an
    /// existence check) are rejected.
    pub fn compile(&self) -> Result<CompiledSelector> {
        let labels = self.match_labels.clone().unwrap_or_default();

        let mut expressions = Expressions::new();
        for expr in self.match_expressions.iter().flatten() {
            if expr.key.is_empty() {
                bail!("selector expression has an empty key");
            }
            match expr.operator {
                Operator::In => {
                    if expr.values.is_empty() {
                        return Ok(CompiledSelector(Compiled::None));
                    }
                }
                Operator::NotIn => {
                    if expr.values.is_empty() {
                        continue;
                    }
                }
                Operator::Exists | Operator::DoesNotExist => {
                    if !expr.values.is_empty() {
                        bail!(
                            "selector expression on key {} must not carry values",
                            expr.key
                        );
                    }
                }
            }
            expressions.push(expr.clone());
        }

        if labels.is_empty() && expressions.is_empty() {
            return Ok(CompiledSelector(Compiled::All));
        }

        Ok(CompiledSelector(Compiled::Match {
            labels,
            expressions,
        }))
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === CompiledSelector ===

impl CompiledSelector {
    /// The selector matches every label set.
    #[inline]
    pub fn matches_all(&self) -> bool {
        matches!(self.0, Compiled::All)
    }

    /// The selector cannot match any label set.
    #[inline]
    pub fn matches_none(&self) -> bool {
        matches!(self.0, Compiled::None)
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        match &self.0 {
            Compiled::All => true,
            Compiled::None => false,
            Compiled::Match {
                labels: required,
                expressions,
            } => {
                for (k, v) in required.iter() {
                    if labels.0.get(k) != Some(v) {
                        return false;
                    }
                }
                expressions.iter().all(|expr| expr.matches(labels.as_ref()))
            }
        }
    }
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Expression ===

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            Operator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.contains(v))
                .unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    fn expr(key: &str, operator: Operator, values: &[&str]) -> Expression {
        Expression {
            key: key.to_string(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Labels::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "bar"))),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "baz"))),
                false,
                "value mismatch",
            ),
            (
                Selector::from_iter(Some(expr("foo", Operator::In, &["bar"]))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "expression match",
            ),
            (
                Selector::from_iter(Some(expr("foo", Operator::NotIn, &["bar"]))),
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "not-in rejects",
            ),
            (
                Selector::from_iter(Some(expr("foo", Operator::NotIn, &["bar"]))),
                Labels::default(),
                true,
                "not-in matches absent key",
            ),
            (
                Selector::from_iter(Some(expr("foo", Operator::Exists, &[]))),
                Labels::from_iter(Some(("foo", "anything"))),
                true,
                "exists",
            ),
            (
                Selector::from_iter(Some(expr("foo", Operator::DoesNotExist, &[]))),
                Labels::from_iter(Some(("foo", "anything"))),
                false,
                "does-not-exist rejects present key",
            ),
        ] {
            let compiled = selector.compile().expect("selector must compile");
            assert_eq!(compiled.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn empty_selector_matches_all() {
        let compiled = Selector::default().compile().unwrap();
        assert!(compiled.matches_all());
        assert!(compiled.matches(&Labels::default()));
        assert!(compiled.matches(&Labels::from_iter(Some(("any", "labels")))));
    }

    #[test]
    fn unsatisfiable_selector_matches_none() {
        let compiled = Selector::from_iter(Some(expr("key", Operator::In, &[])))
            .compile()
            .unwrap();
        assert!(compiled.matches_none());
        assert!(!compiled.matches(&Labels::from_iter(Some(("key", "value")))));
    }

    #[test]
    fn invalid_selectors_fail_to_compile() {
        assert!(Selector::from_iter(Some(expr("", Operator::In, &["v"])))
            .compile()
            .is_err());
        assert!(
            Selector::from_iter(Some(expr("key", Operator::Exists, &["v"])))
                .compile()
                .is_err()
        );
    }

    #[test]
    fn trivial_not_in_is_dropped() {
        let compiled = Selector::from_iter(Some(expr("key", Operator::NotIn, &[])))
            .compile()
            .unwrap();
        assert!(compiled.matches_all());
    }
}
