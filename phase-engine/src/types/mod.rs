// Port Type Layer
// Data types, type variables and stream type descriptors checked at composition time

use crate::stream::{Selector, TagValue};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_TYPE_VAR: AtomicU64 = AtomicU64::new(0);

/// A type variable, unified with concrete types during composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeVar(u64);

/// Allocate a type variable never handed out before
pub fn new_type_var() -> TypeVar {
    TypeVar(NEXT_TYPE_VAR.fetch_add(1, Ordering::Relaxed))
}

impl fmt::Display for TypeVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'t{}", self.0)
    }
}

/// Type of the data carried on a port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// Nothing flows on this port
    #[default]
    Unit,
    /// A named concrete type ("number", "string", "trace-event", ...)
    Named(String),
    /// A list of values of one type
    List(Box<DataType>),
    /// Placeholder resolved by unification
    Var(TypeVar),
}

impl DataType {
    pub fn named(name: impl Into<String>) -> Self {
        DataType::Named(name.into())
    }

    pub fn list(inner: DataType) -> Self {
        DataType::List(Box::new(inner))
    }

    pub fn fresh() -> Self {
        DataType::Var(new_type_var())
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, DataType::Unit)
    }

    /// Replace every type variable with a fresh one, consistently.
    ///
    /// `mapping` is shared across calls so that the input and output of one
    /// definition keep referring to the same variable.
    pub fn instantiate(&self, mapping: &mut HashMap<TypeVar, TypeVar>) -> DataType {
        match self {
            DataType::Var(var) => DataType::Var(*mapping.entry(*var).or_insert_with(new_type_var)),
            DataType::List(inner) => DataType::List(Box::new(inner.instantiate(mapping))),
            other => other.clone(),
        }
    }

    fn contains_var(&self, var: TypeVar) -> bool {
        match self {
            DataType::Var(v) => *v == var,
            DataType::List(inner) => inner.contains_var(var),
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Unit => write!(f, "unit"),
            DataType::Named(name) => write!(f, "{}", name),
            DataType::List(inner) => write!(f, "[{}]", inner),
            DataType::Var(var) => write!(f, "{}", var),
        }
    }
}

/// A typed port: the tag selector items travel under and their data type
#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    pub name: Option<String>,
    pub key: String,
    pub value: Option<TagValue>,
    pub data_type: DataType,
}

impl PortSpec {
    pub fn new(key: impl Into<String>, value: Option<TagValue>, data_type: DataType) -> Self {
        Self {
            name: None,
            key: key.into(),
            value,
            data_type,
        }
    }

    /// A port addressed by name, selected by `key == name`
    pub fn named(name: impl Into<String>, key: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            key: key.into(),
            value: Some(TagValue::Text(name.clone())),
            name: Some(name),
            data_type,
        }
    }

    pub fn selector(&self) -> Selector {
        Selector::new(self.key.clone(), self.value.clone())
    }
}

/// Type descriptor of a stream: the set of ports flowing through it
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamType {
    pub ports: Vec<PortSpec>,
}

impl StreamType {
    pub fn new(ports: Vec<PortSpec>) -> Self {
        Self { ports }
    }

    pub fn port(&self, name: &str) -> Option<&PortSpec> {
        self.ports
            .iter()
            .find(|port| port.name.as_deref() == Some(name))
    }
}

/// Two types that cannot be made equal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("type mismatch: expected {expected}, found {found}")]
pub struct TypeMismatch {
    pub expected: DataType,
    pub found: DataType,
}

/// Substitution built up while checking a composition
#[derive(Debug, Clone, Default)]
pub struct TypeEnv {
    bindings: HashMap<TypeVar, DataType>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow variable bindings until a concrete type or an unbound variable
    pub fn resolve(&self, ty: &DataType) -> DataType {
        match ty {
            DataType::Var(var) => match self.bindings.get(var) {
                Some(bound) => self.resolve(bound),
                None => ty.clone(),
            },
            DataType::List(inner) => DataType::List(Box::new(self.resolve(inner))),
            other => other.clone(),
        }
    }

    /// Make `expected` and `found` equal, binding variables as needed
    pub fn unify(&mut self, expected: &DataType, found: &DataType) -> Result<(), TypeMismatch> {
        let expected = self.resolve(expected);
        let found = self.resolve(found);

        match (&expected, &found) {
            _ if expected == found => Ok(()),
            (DataType::Var(var), other) | (other, DataType::Var(var)) => {
                if other.contains_var(*var) {
                    return Err(TypeMismatch {
                        expected: expected.clone(),
                        found: found.clone(),
                    });
                }
                self.bindings.insert(*var, other.clone());
                Ok(())
            }
            (DataType::List(a), DataType::List(b)) => {
                self.unify(a, b).map_err(|_| TypeMismatch {
                    expected: expected.clone(),
                    found: found.clone(),
                })
            }
            _ => Err(TypeMismatch {
                expected: expected.clone(),
                found: found.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_vars_are_distinct() {
        assert_ne!(new_type_var(), new_type_var());
    }

    #[test]
    fn test_unify_concrete() {
        let mut env = TypeEnv::new();
        assert!(env.unify(&DataType::named("number"), &DataType::named("number")).is_ok());

        let err = env
            .unify(&DataType::named("number"), &DataType::named("string"))
            .unwrap_err();
        assert_eq!(err.expected, DataType::named("number"));
        assert_eq!(err.found, DataType::named("string"));
    }

    #[test]
    fn test_unify_binds_variable() {
        let var = DataType::fresh();
        let mut env = TypeEnv::new();

        env.unify(&var, &DataType::named("number")).unwrap();

        assert_eq!(env.resolve(&var), DataType::named("number"));
        assert!(env.unify(&var, &DataType::named("string")).is_err());
    }

    #[test]
    fn test_shared_variable_links_ports() {
        let shared = DataType::fresh();
        let mut env = TypeEnv::new();

        env.unify(&shared, &DataType::named("event")).unwrap();
        let err = env.unify(&DataType::named("string"), &shared).unwrap_err();
        assert_eq!(err.found, DataType::named("event"));
    }

    #[test]
    fn test_occurs_check() {
        let var = DataType::fresh();
        let mut env = TypeEnv::new();
        assert!(env.unify(&var, &DataType::list(var.clone())).is_err());
    }

    #[test]
    fn test_instantiate_is_consistent() {
        let var = new_type_var();
        let mut mapping = HashMap::new();

        let a = DataType::Var(var).instantiate(&mut mapping);
        let b = DataType::list(DataType::Var(var)).instantiate(&mut mapping);

        assert_ne!(a, DataType::Var(var));
        assert_eq!(b, DataType::list(a));
    }

    #[test]
    fn test_stream_type_port_lookup() {
        let ty = StreamType::new(vec![PortSpec::named("a", "eto", DataType::Unit)]);
        assert!(ty.port("a").is_some());
        assert!(ty.port("b").is_none());
        assert_eq!(
            ty.port("a").unwrap().selector(),
            Selector::exact("eto", "a")
        );
    }
}
