// Phase Options
// Typed option schema: declared defaults merged with string overrides

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while merging option overrides
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    #[error("unknown option '{name}'")]
    Unknown { name: String },

    #[error("option '{name}' expects {expected}, got '{value}'")]
    Mismatch {
        name: String,
        expected: OptionKind,
        value: String,
    },

    #[error("option '{name}' is not a valid literal: {message}")]
    MalformedLiteral { name: String, message: String },
}

/// Semantic type of an option value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Integer,
    Float,
    Boolean,
    String,
    /// Structured JSON literal (arrays, objects, nested values)
    Literal,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptionKind::Integer => "an integer",
            OptionKind::Float => "a number",
            OptionKind::Boolean => "a boolean",
            OptionKind::String => "a string",
            OptionKind::Literal => "a JSON literal",
        };
        write!(f, "{}", name)
    }
}

impl OptionKind {
    /// Parse an override against this kind; never evaluates anything
    pub fn parse(&self, name: &str, raw: &str) -> Result<Value, OptionError> {
        let mismatch = || OptionError::Mismatch {
            name: name.to_string(),
            expected: *self,
            value: raw.to_string(),
        };
        let trimmed = raw.trim();

        match self {
            OptionKind::Integer => trimmed
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch()),
            OptionKind::Float => trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(mismatch),
            OptionKind::Boolean => match trimmed {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            OptionKind::String => Ok(Value::String(raw.to_string())),
            OptionKind::Literal => {
                serde_json::from_str(trimmed).map_err(|e| OptionError::MalformedLiteral {
                    name: name.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            OptionKind::Integer => value.is_i64(),
            OptionKind::Float => value.is_number(),
            OptionKind::Boolean => value.is_boolean(),
            OptionKind::String => value.is_string(),
            OptionKind::Literal => true,
        }
    }
}

/// A single declared option
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDecl {
    pub name: String,
    pub kind: OptionKind,
    pub default: Value,
}

/// Declared options of a phase definition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSchema {
    decls: Vec<OptionDecl>,
}

impl OptionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an option.
    ///
    /// # Panics
    ///
    /// Panics when the default does not fit `kind`; that is a definition bug.
    pub fn option(mut self, name: impl Into<String>, kind: OptionKind, default: Value) -> Self {
        let name = name.into();
        assert!(
            kind.accepts(&default),
            "default for option '{}' is not {}",
            name,
            kind
        );
        self.decls.retain(|decl| decl.name != name);
        self.decls.push(OptionDecl {
            name,
            kind,
            default,
        });
        self
    }

    pub fn integer(self, name: impl Into<String>, default: i64) -> Self {
        self.option(name, OptionKind::Integer, Value::from(default))
    }

    pub fn float(self, name: impl Into<String>, default: f64) -> Self {
        let default = Number::from_f64(default).map_or(Value::Null, Value::Number);
        self.option(name, OptionKind::Float, default)
    }

    pub fn boolean(self, name: impl Into<String>, default: bool) -> Self {
        self.option(name, OptionKind::Boolean, Value::Bool(default))
    }

    pub fn string(self, name: impl Into<String>, default: impl Into<String>) -> Self {
        self.option(name, OptionKind::String, Value::String(default.into()))
    }

    pub fn literal(self, name: impl Into<String>, default: Value) -> Self {
        self.option(name, OptionKind::Literal, default)
    }

    pub fn decls(&self) -> &[OptionDecl] {
        &self.decls
    }

    pub fn get(&self, name: &str) -> Option<&OptionDecl> {
        self.decls.iter().find(|decl| decl.name == name)
    }

    /// Every declared option with its default
    pub fn defaults(&self) -> PhaseOptions {
        let mut options = PhaseOptions::new();
        for decl in &self.decls {
            options.insert(decl.name.clone(), decl.default.clone());
        }
        options
    }

    /// Merge overrides onto the defaults.
    ///
    /// Each override is parsed against the declared kind of its option.
    /// Overrides naming undeclared options are rejected.
    pub fn merge(&self, overrides: &BTreeMap<String, String>) -> Result<PhaseOptions, OptionError> {
        if let Some(name) = overrides.keys().find(|name| self.get(name).is_none()) {
            return Err(OptionError::Unknown { name: name.clone() });
        }

        let mut options = PhaseOptions::new();
        for decl in &self.decls {
            let value = match overrides.get(&decl.name) {
                Some(raw) => decl.kind.parse(&decl.name, raw)?,
                None => decl.default.clone(),
            };
            options.insert(decl.name.clone(), value);
        }
        Ok(options)
    }
}

/// Resolved option values handed to a phase implementation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseOptions {
    values: BTreeMap<String, Value>,
}

impl PhaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn schema() -> OptionSchema {
        OptionSchema::new()
            .integer("count", 3)
            .boolean("verbose", false)
            .string("label", "none")
            .float("ratio", 0.5)
            .literal("fields", json!(["a"]))
    }

    #[test]
    fn test_defaults_without_overrides() {
        let options = schema().merge(&BTreeMap::new()).unwrap();

        assert_eq!(options.get_i64("count"), Some(3));
        assert_eq!(options.get_bool("verbose"), Some(false));
        assert_eq!(options.get_str("label"), Some("none"));
        assert_eq!(options.get_f64("ratio"), Some(0.5));
        assert_eq!(options.get("fields"), Some(&json!(["a"])));
        assert_eq!(options, schema().defaults());
    }

    #[test]
    fn test_typed_overrides() {
        let options = schema()
            .merge(&overrides(&[
                ("count", " 12 "),
                ("verbose", "true"),
                ("label", "42"),
                ("ratio", "2"),
                ("fields", r#"{"x": [1, 2]}"#),
            ]))
            .unwrap();

        assert_eq!(options.get_i64("count"), Some(12));
        assert_eq!(options.get_bool("verbose"), Some(true));
        // strings stay strings even when they look numeric
        assert_eq!(options.get_str("label"), Some("42"));
        assert_eq!(options.get_f64("ratio"), Some(2.0));
        assert_eq!(options.get("fields"), Some(&json!({"x": [1, 2]})));
    }

    #[test]
    fn test_mismatch_is_an_error() {
        let err = schema()
            .merge(&overrides(&[("count", "three")]))
            .unwrap_err();

        assert_eq!(
            err,
            OptionError::Mismatch {
                name: "count".to_string(),
                expected: OptionKind::Integer,
                value: "three".to_string(),
            }
        );

        assert!(schema().merge(&overrides(&[("verbose", "1")])).is_err());
        assert!(schema().merge(&overrides(&[("ratio", "NaN")])).is_err());
    }

    #[test]
    fn test_expressions_are_not_evaluated() {
        let err = schema()
            .merge(&overrides(&[("count", "1 + 1")]))
            .unwrap_err();
        assert!(matches!(err, OptionError::Mismatch { .. }));

        let err = schema()
            .merge(&overrides(&[("fields", "process.exit()")]))
            .unwrap_err();
        assert!(matches!(err, OptionError::MalformedLiteral { .. }));
    }

    #[test]
    fn test_unknown_override_rejected() {
        let err = schema().merge(&overrides(&[("colour", "red")])).unwrap_err();
        assert_eq!(
            err,
            OptionError::Unknown {
                name: "colour".to_string()
            }
        );
    }

    #[test]
    #[should_panic(expected = "default for option 'count'")]
    fn test_default_must_fit_kind() {
        let _ = OptionSchema::new().option("count", OptionKind::Integer, json!("three"));
    }
}
