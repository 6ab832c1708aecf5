// Phase Declaration
// Arity, port layout and the declarative description a phase is built from

use crate::types::{DataType, PortSpec, TypeVar};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Cardinality pattern of a phase's input/output per invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arity {
    /// Seeds a stream from nothing
    #[serde(rename = "0:N")]
    Init,
    /// One output per input item
    #[serde(rename = "1:1")]
    OneToOne,
    /// Any number of framed outputs per input item
    #[serde(rename = "1:N")]
    OneToMany,
    /// One output per completed frame group
    #[serde(rename = "N:1")]
    ManyToOne,
    /// Port-to-port wiring
    #[serde(rename = "N:N")]
    ManyToMany,
}

impl Arity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arity::Init => "0:N",
            Arity::OneToOne => "1:1",
            Arity::OneToMany => "1:N",
            Arity::ManyToOne => "N:1",
            Arity::ManyToMany => "N:N",
        }
    }

    /// Whether the arity reads and writes through a single typed port
    pub fn needs_single_ports(&self) -> bool {
        matches!(self, Arity::Init | Arity::OneToOne | Arity::OneToMany)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Arity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0:N" => Ok(Arity::Init),
            "1:1" => Ok(Arity::OneToOne),
            "1:N" => Ok(Arity::OneToMany),
            "N:1" => Ok(Arity::ManyToOne),
            "N:N" => Ok(Arity::ManyToMany),
            other => Err(format!("unknown arity '{}'", other)),
        }
    }
}

/// How a phase's input or output side is typed
#[derive(Debug, Clone, PartialEq)]
pub enum PortLayout {
    /// One port, selected by the phase's configurable key/value
    Single(DataType),
    /// Several named ports, each with its own selector
    Named(Vec<PortSpec>),
}

impl Default for PortLayout {
    fn default() -> Self {
        PortLayout::Single(DataType::Unit)
    }
}

impl PortLayout {
    pub fn single(&self) -> Option<&DataType> {
        match self {
            PortLayout::Single(ty) => Some(ty),
            PortLayout::Named(_) => None,
        }
    }

    pub fn port(&self, name: &str) -> Option<&PortSpec> {
        match self {
            PortLayout::Single(_) => None,
            PortLayout::Named(ports) => ports
                .iter()
                .find(|port| port.name.as_deref() == Some(name)),
        }
    }

    fn instantiate(&self, mapping: &mut HashMap<TypeVar, TypeVar>) -> PortLayout {
        match self {
            PortLayout::Single(ty) => PortLayout::Single(ty.instantiate(mapping)),
            PortLayout::Named(ports) => PortLayout::Named(
                ports
                    .iter()
                    .map(|port| PortSpec {
                        data_type: port.data_type.instantiate(mapping),
                        ..port.clone()
                    })
                    .collect(),
            ),
        }
    }
}

/// Declarative description of a phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseInfo {
    pub name: String,
    pub id: Option<String>,
    pub arity: Arity,
    pub is_async: bool,
    pub input: PortLayout,
    pub output: PortLayout,
}

impl PhaseInfo {
    pub fn new(name: impl Into<String>, arity: Arity) -> Self {
        Self {
            name: name.into(),
            id: None,
            arity,
            is_async: false,
            input: PortLayout::default(),
            output: PortLayout::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn with_input(mut self, ty: DataType) -> Self {
        self.input = PortLayout::Single(ty);
        self
    }

    pub fn with_output(mut self, ty: DataType) -> Self {
        self.output = PortLayout::Single(ty);
        self
    }

    pub fn with_inputs(mut self, ports: Vec<PortSpec>) -> Self {
        self.input = PortLayout::Named(ports);
        self
    }

    pub fn with_outputs(mut self, ports: Vec<PortSpec>) -> Self {
        self.output = PortLayout::Named(ports);
        self
    }

    /// Copy with every type variable renamed to a fresh one, so two phases
    /// built from one generic definition do not constrain each other.
    pub fn instantiate(&self) -> PhaseInfo {
        let mut mapping = HashMap::new();
        PhaseInfo {
            input: self.input.instantiate(&mut mapping),
            output: self.output.instantiate(&mut mapping),
            ..self.clone()
        }
    }
}
