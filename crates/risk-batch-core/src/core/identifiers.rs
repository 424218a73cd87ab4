// crates/risk-batch-core/src/core/identifiers.rs
// ============================================================================
// Module: Risk Batch Identifiers
// Description: Store-assigned numeric ids and external unique identifiers.
// Purpose: Provide strongly typed identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Numeric identifiers are allocated by the store from a shared sequence and
//! are opaque to callers. [`UniqueId`] models the external
//! `scheme~value~version` identifiers carried by view definitions, market
//! data snapshots, and computation targets.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Store Identifiers
// ============================================================================

/// Risk run identifier allocated by the store.
///
/// # Invariants
/// - Allocated from the shared batch sequence; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(i64);

impl RunId {
    /// Creates a run identifier from a raw store value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Market data snapshot identifier allocated by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketDataId(i64);

impl MarketDataId {
    /// Creates a market data identifier from a raw store value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MarketDataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Compute failure identifier allocated by the store.
///
/// # Invariants
/// - One identifier per distinct compute failure signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputeFailureId(i64);

impl ComputeFailureId {
    /// Creates a compute failure identifier from a raw store value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ComputeFailureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: External Identifiers
// ============================================================================

/// Separator used in the textual form of a [`UniqueId`].
const UNIQUE_ID_SEPARATOR: char = '~';

/// External identifier with scheme, value, and optional version.
///
/// # Invariants
/// - An absent version is distinct from every present version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId {
    /// Identifier scheme.
    pub scheme: String,
    /// Identifier value within the scheme.
    pub value: String,
    /// Optional version.
    pub version: Option<String>,
}

impl UniqueId {
    /// Creates an unversioned identifier.
    #[must_use]
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
            version: None,
        }
    }

    /// Creates a versioned identifier.
    #[must_use]
    pub fn versioned(
        scheme: impl Into<String>,
        value: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
            version: Some(version.into()),
        }
    }

    /// Parses the `scheme~value[~version]` textual form.
    ///
    /// Returns `None` when the scheme or value is missing.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.splitn(3, UNIQUE_ID_SEPARATOR);
        let scheme = parts.next().filter(|part| !part.is_empty())?;
        let value = parts.next().filter(|part| !part.is_empty())?;
        let version = parts.next().map(str::to_string);
        Some(Self {
            scheme: scheme.to_string(),
            value: value.to_string(),
            version,
        })
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{UNIQUE_ID_SEPARATOR}{}", self.scheme, self.value)?;
        if let Some(version) = &self.version {
            write!(f, "{UNIQUE_ID_SEPARATOR}{version}")?;
        }
        Ok(())
    }
}

/// Function identifier naming the analytic that produced a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    /// Creates a new function identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Compute node identifier, conventionally `host/node`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputeNodeId(String);

impl ComputeNodeId {
    /// Creates a new compute node identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the host portion: everything before the first `/`.
    #[must_use]
    pub fn host(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(host, _)| host)
    }
}

impl fmt::Display for ComputeNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComputeNodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
