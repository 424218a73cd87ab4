// crates/risk-batch-core/src/core/values.rs
// ============================================================================
// Module: Risk Batch Values
// Description: Value specifications, requirements, targets, and computed results.
// Purpose: Model the typed result fragments delivered by a computation cycle.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! A computation cycle produces [`ComputedValueResult`]s: a produced
//! [`ValueSpecification`], the raw [`ResultValue`], and the invocation
//! outcome. Specifications and requirements carry [`ValueProperties`] whose
//! synthesized text form is the identity used for interning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ComputeNodeId;
use crate::core::identifiers::FunctionId;
use crate::core::identifiers::UniqueId;

// ============================================================================
// SECTION: Value Properties
// ============================================================================

/// Characters escaped in the synthesized property form.
const SYNTHESIS_RESERVED: [char; 7] = ['\\', '{', '}', '[', ']', '=', ','];

/// Named, multi-valued property set attached to specifications and requirements.
///
/// # Invariants
/// - Property names and values are kept sorted, so the synthesized form is
///   independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueProperties(BTreeMap<String, BTreeSet<String>>);

impl ValueProperties {
    /// Creates an empty property set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns the property set with `value` added under `name`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds `value` under `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().insert(value.into());
    }

    /// Returns the values recorded under `name`.
    #[must_use]
    pub fn values(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.0.get(name)
    }

    /// Returns true when no properties are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the canonical text form used as the interning key.
    ///
    /// The form is `{name=[v1,v2],other=[v]}` with reserved characters
    /// backslash-escaped, so distinct property sets never share a form.
    #[must_use]
    pub fn synthesize(&self) -> String {
        let mut out = String::from("{");
        for (index, (name, values)) in self.0.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            push_escaped(&mut out, name);
            out.push_str("=[");
            for (value_index, value) in values.iter().enumerate() {
                if value_index > 0 {
                    out.push(',');
                }
                push_escaped(&mut out, value);
            }
            out.push(']');
        }
        out.push('}');
        out
    }
}

/// Appends `text` to `out`, escaping synthesis delimiters.
fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        if SYNTHESIS_RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
}

// ============================================================================
// SECTION: Computation Targets
// ============================================================================

/// Kind of entity a value is computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationTargetType {
    /// Free-standing primitive (curve, surface, currency pair).
    Primitive,
    /// Security.
    Security,
    /// Position within a portfolio.
    Position,
    /// Trade within a position.
    Trade,
    /// Portfolio node aggregate.
    PortfolioNode,
}

impl ComputationTargetType {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primitive => "PRIMITIVE",
            Self::Security => "SECURITY",
            Self::Position => "POSITION",
            Self::Trade => "TRADE",
            Self::PortfolioNode => "PORTFOLIO_NODE",
        }
    }

    /// Parses a stored label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "PRIMITIVE" => Some(Self::Primitive),
            "SECURITY" => Some(Self::Security),
            "POSITION" => Some(Self::Position),
            "TRADE" => Some(Self::Trade),
            "PORTFOLIO_NODE" => Some(Self::PortfolioNode),
            _ => None,
        }
    }
}

impl fmt::Display for ComputationTargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the entity a value is computed on.
///
/// # Invariants
/// - `unique_id` is absent only for anonymous targets; an absent version is
///   its own equality class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputationTargetSpecification {
    /// Target kind.
    pub target_type: ComputationTargetType,
    /// Target identifier, when the target has one.
    pub unique_id: Option<UniqueId>,
}

impl ComputationTargetSpecification {
    /// Creates a target specification for an identified entity.
    #[must_use]
    pub const fn new(target_type: ComputationTargetType, unique_id: UniqueId) -> Self {
        Self {
            target_type,
            unique_id: Some(unique_id),
        }
    }

    /// Creates a target specification without an identifier.
    #[must_use]
    pub const fn anonymous(target_type: ComputationTargetType) -> Self {
        Self {
            target_type,
            unique_id: None,
        }
    }
}

impl fmt::Display for ComputationTargetSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unique_id {
            Some(unique_id) => write!(f, "{}:{unique_id}", self.target_type),
            None => write!(f, "{}:<anonymous>", self.target_type),
        }
    }
}

// ============================================================================
// SECTION: Specifications and Requirements
// ============================================================================

/// A value that a function has produced (or was asked to produce).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueSpecification {
    /// Value name, e.g. `Present Value`.
    pub value_name: String,
    /// Target the value is computed on.
    pub target: ComputationTargetSpecification,
    /// Producing function.
    pub function_id: FunctionId,
    /// Resolved properties.
    pub properties: ValueProperties,
}

impl ValueSpecification {
    /// Creates a value specification.
    #[must_use]
    pub fn new(
        value_name: impl Into<String>,
        target: ComputationTargetSpecification,
        function_id: FunctionId,
        properties: ValueProperties,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            function_id,
            properties,
        }
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VSpec[{}, {}, {}]",
            self.value_name,
            self.target,
            self.properties.synthesize()
        )
    }
}

/// A requested value, satisfied by one or more specifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRequirement {
    /// Requested value name.
    pub value_name: String,
    /// Requested target.
    pub target: ComputationTargetSpecification,
    /// Property constraints.
    pub constraints: ValueProperties,
}

impl ValueRequirement {
    /// Creates a value requirement.
    #[must_use]
    pub fn new(
        value_name: impl Into<String>,
        target: ComputationTargetSpecification,
        constraints: ValueProperties,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            constraints,
        }
    }
}

// ============================================================================
// SECTION: Computed Results
// ============================================================================

/// Raw value produced by a function.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    /// Single number.
    Double(f64),
    /// Ordered numbers.
    Vector(Vec<f64>),
    /// Numbers keyed by label.
    LabelledVector(Vec<(String, f64)>),
    /// Row-major numeric matrix.
    Matrix(Vec<Vec<f64>>),
    /// Bundle of market data already belonging to a snapshot.
    SnapshotBundle(BTreeMap<String, f64>),
    /// Free text with no numeric form.
    Text(String),
    /// Placeholder for a value whose inputs were missing.
    Missing,
}

impl ResultValue {
    /// Returns the type label used in diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Double(_) => "Double",
            Self::Vector(_) => "Vector",
            Self::LabelledVector(_) => "LabelledVector",
            Self::Matrix(_) => "Matrix",
            Self::SnapshotBundle(_) => "SnapshotBundle",
            Self::Text(_) => "Text",
            Self::Missing => "MissingInput",
        }
    }
}

/// Outcome of invoking a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationResult {
    /// Function produced its outputs.
    Success,
    /// Function raised an error.
    FunctionThrewException,
    /// Function was not run because inputs were missing.
    MissingInputs,
    /// Function was suppressed by the engine.
    Suppressed,
}

/// Error details captured while executing a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExecutionLog {
    /// Error class name.
    pub exception_class: Option<String>,
    /// Error message.
    pub exception_message: Option<String>,
    /// Error stack trace.
    pub exception_stack_trace: Option<String>,
}

/// A value paired with its specification, as carried in market data.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedValue {
    /// Value specification.
    pub specification: ValueSpecification,
    /// Raw value.
    pub value: ResultValue,
}

impl ComputedValue {
    /// Creates a computed value.
    #[must_use]
    pub const fn new(specification: ValueSpecification, value: ResultValue) -> Self {
        Self {
            specification,
            value,
        }
    }
}

/// A computed value with its invocation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedValueResult {
    /// Value specification.
    pub specification: ValueSpecification,
    /// Raw value; [`ResultValue::Missing`] when not produced.
    pub value: ResultValue,
    /// Invocation outcome.
    pub invocation_result: InvocationResult,
    /// Execution diagnostics.
    pub execution_log: ExecutionLog,
    /// Inputs that were unavailable, for [`InvocationResult::MissingInputs`].
    pub missing_inputs: Vec<ValueSpecification>,
    /// Node that evaluated the function.
    pub compute_node_id: ComputeNodeId,
}

impl ComputedValueResult {
    /// Creates a successful result.
    #[must_use]
    pub const fn success(
        specification: ValueSpecification,
        value: ResultValue,
        compute_node_id: ComputeNodeId,
    ) -> Self {
        Self {
            specification,
            value,
            invocation_result: InvocationResult::Success,
            execution_log: ExecutionLog {
                exception_class: None,
                exception_message: None,
                exception_stack_trace: None,
            },
            missing_inputs: Vec::new(),
            compute_node_id,
        }
    }

    /// Creates a result for a function that raised an error.
    #[must_use]
    pub const fn threw(
        specification: ValueSpecification,
        execution_log: ExecutionLog,
        compute_node_id: ComputeNodeId,
    ) -> Self {
        Self {
            specification,
            value: ResultValue::Missing,
            invocation_result: InvocationResult::FunctionThrewException,
            execution_log,
            missing_inputs: Vec::new(),
            compute_node_id,
        }
    }

    /// Creates a result for a function whose inputs were missing.
    #[must_use]
    pub const fn missing_inputs(
        specification: ValueSpecification,
        missing_inputs: Vec<ValueSpecification>,
        compute_node_id: ComputeNodeId,
    ) -> Self {
        Self {
            specification,
            value: ResultValue::Missing,
            invocation_result: InvocationResult::MissingInputs,
            execution_log: ExecutionLog {
                exception_class: None,
                exception_message: None,
                exception_stack_trace: None,
            },
            missing_inputs,
            compute_node_id,
        }
    }
}
