//! Claim scopes and their canonical form.
//!
//! A scope qualifies a claim: `{altitude: "vac"}`, `{throttle: "65%"}`, or
//! the deriver's `{profile: "domain_default_v1", field: ..., derived_from_scope: ...}`.
//! Canonicalization is part of the claim-key hash contract:
//! - keys sorted (BTreeMap ordering),
//! - textual values lowercased,
//! - NaN forbidden,
//! - null values dropped on construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LedgerError, LedgerResult};

/// A single scope value. Nested maps appear only under `derived_from_scope`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Nested(Scope),
}

/// An ordered scope mapping. Iteration order is key order, which makes the
/// serialized form deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(pub BTreeMap<String, ScopeValue>);

impl Scope {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build a scope from key/text pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut scope = Self::new();
        for (k, v) in pairs {
            scope.0.insert(k.into(), ScopeValue::Text(v.into()));
        }
        scope
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ScopeValue) {
        self.0.insert(key.into(), value);
    }

    pub fn insert_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key, ScopeValue::Text(value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&ScopeValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Parse a scope from an arbitrary JSON object, dropping null values.
    /// Arrays and non-object roots are rejected.
    pub fn from_json(value: &serde_json::Value) -> LedgerResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| LedgerError::Validation("scope must be a JSON object".to_string()))?;
        let mut scope = Scope::new();
        for (k, v) in obj {
            match v {
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => scope.insert_text(k.clone(), s.clone()),
                serde_json::Value::Number(n) => {
                    let f = n.as_f64().ok_or_else(|| {
                        LedgerError::Validation(format!("scope key {k}: unrepresentable number"))
                    })?;
                    scope.insert(k.clone(), ScopeValue::Number(f));
                }
                serde_json::Value::Bool(b) => scope.insert(k.clone(), ScopeValue::Bool(*b)),
                serde_json::Value::Object(_) => {
                    scope.insert(k.clone(), ScopeValue::Nested(Scope::from_json(v)?));
                }
                serde_json::Value::Array(_) => {
                    return Err(LedgerError::Validation(format!(
                        "scope key {k}: arrays are not valid scope values"
                    )));
                }
            }
        }
        Ok(scope)
    }

    /// The canonical form: same keys, textual values lowercased, nested
    /// scopes canonicalized recursively. Fails on NaN.
    pub fn canonicalize(&self) -> LedgerResult<Scope> {
        let mut out = Scope::new();
        for (k, v) in &self.0 {
            let canon = match v {
                ScopeValue::Text(s) => ScopeValue::Text(s.to_lowercase()),
                ScopeValue::Number(n) => {
                    if n.is_nan() {
                        return Err(LedgerError::Validation(format!(
                            "scope key {k}: NaN is forbidden"
                        )));
                    }
                    ScopeValue::Number(*n)
                }
                ScopeValue::Bool(b) => ScopeValue::Bool(*b),
                ScopeValue::Nested(inner) => ScopeValue::Nested(inner.canonicalize()?),
            };
            out.0.insert(k.clone(), canon);
        }
        Ok(out)
    }

    /// Deterministic serialized form of the canonicalized scope. This string
    /// is the hash input for the claim key.
    pub fn canonical_json(&self) -> LedgerResult<String> {
        let canon = self.canonicalize()?;
        serde_json::to_string(&canon)
            .map_err(|e| LedgerError::Internal(format!("scope serialization: {e}")))
    }

    /// Subset match: every key/value of `filter` appears in `self` with an
    /// equal (canonicalized) value. Used by derivation rules' scope filters.
    pub fn is_superset_of(&self, filter: &Scope) -> bool {
        let me = match self.canonicalize() {
            Ok(s) => s,
            Err(_) => return false,
        };
        let them = match filter.canonicalize() {
            Ok(s) => s,
            Err(_) => return false,
        };
        them.0
            .iter()
            .all(|(k, v)| me.0.get(k).map(|mine| scope_values_equal(mine, v)).unwrap_or(false))
    }
}

fn scope_values_equal(a: &ScopeValue, b: &ScopeValue) -> bool {
    match (a, b) {
        (ScopeValue::Text(x), ScopeValue::Text(y)) => x == y,
        (ScopeValue::Number(x), ScopeValue::Number(y)) => x == y,
        (ScopeValue::Bool(x), ScopeValue::Bool(y)) => x == y,
        (ScopeValue::Nested(x), ScopeValue::Nested(y)) => {
            x.0.len() == y.0.len()
                && x.0
                    .iter()
                    .all(|(k, v)| y.0.get(k).map(|w| scope_values_equal(v, w)).unwrap_or(false))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonical_json_sorts_keys_and_lowercases() {
        let mut scope = Scope::new();
        scope.insert_text("throttle", "100%");
        scope.insert_text("altitude", "VAC");
        let json = scope.canonical_json().unwrap();
        assert_eq!(json, r#"{"altitude":"vac","throttle":"100%"}"#);
    }

    #[test]
    fn from_json_drops_nulls() {
        let value = serde_json::json!({"altitude": "sl", "orbit": null});
        let scope = Scope::from_json(&value).unwrap();
        assert_eq!(scope.len(), 1);
        assert!(scope.get("orbit").is_none());
    }

    #[test]
    fn nan_is_rejected() {
        let mut scope = Scope::new();
        scope.insert("x", ScopeValue::Number(f64::NAN));
        assert!(matches!(
            scope.canonical_json(),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn arrays_are_rejected() {
        let value = serde_json::json!({"tags": ["a", "b"]});
        assert!(Scope::from_json(&value).is_err());
    }

    #[test]
    fn superset_matches_subset_filters() {
        let mut claim_scope = Scope::new();
        claim_scope.insert_text("altitude", "vac");
        claim_scope.insert_text("throttle", "100%");

        let filter = Scope::from_pairs([("altitude", "VAC")]);
        assert!(claim_scope.is_superset_of(&filter));

        let wrong = Scope::from_pairs([("altitude", "sl")]);
        assert!(!claim_scope.is_superset_of(&wrong));

        // Empty filter matches everything.
        assert!(claim_scope.is_superset_of(&Scope::new()));
    }

    #[test]
    fn nested_scope_round_trips() {
        let mut inner = Scope::new();
        inner.insert_text("altitude", "SL");
        let mut scope = Scope::new();
        scope.insert_text("profile", "domain_default_v1");
        scope.insert("derived_from_scope", ScopeValue::Nested(inner));

        let json = scope.canonical_json().unwrap();
        assert!(json.contains(r#""derived_from_scope":{"altitude":"sl"}"#));
    }

    proptest! {
        #[test]
        fn canonical_json_is_insertion_order_independent(
            keys in proptest::collection::hash_set("[a-z]{1,8}", 1..6),
            values in proptest::collection::vec("[a-zA-Z0-9%]{1,10}", 1..6),
        ) {
            let pairs: Vec<(String, String)> = keys
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect();

            let forward = Scope::from_pairs(pairs.clone());
            let mut reversed_pairs = pairs;
            reversed_pairs.reverse();
            let reversed = Scope::from_pairs(reversed_pairs);

            prop_assert_eq!(
                forward.canonical_json().unwrap(),
                reversed.canonical_json().unwrap()
            );
        }

        #[test]
        fn canonicalize_is_idempotent(
            keys in proptest::collection::vec("[a-z]{1,8}", 0..5),
        ) {
            let mut scope = Scope::new();
            for (i, k) in keys.iter().enumerate() {
                scope.insert_text(k.clone(), format!("Value{i}"));
            }
            let once = scope.canonicalize().unwrap();
            let twice = once.canonicalize().unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
