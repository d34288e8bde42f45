//! Shared value types for the batchgate domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. spend is finite and non-negative,
//! object locations always resolve to a container and key) and participate in
//! domain computations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Spend and budget types
// ---------------------------------------------------------------------------

/// Accumulated monetary spend attributable to the pipeline, in US dollars.
///
/// Produced by the external cost-accounting collaborator; this crate never
/// computes spend itself.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Spend(f64);

impl Spend {
    /// Creates a [`Spend`] from a raw float value (USD).
    ///
    /// Returns `None` if `value` is negative, infinite, or NaN.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && value >= 0.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a [`Spend`] of exactly zero.
    pub fn zero() -> Self {
        Self(0.0)
    }

    /// Returns the underlying `f64` value (USD).
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Spend {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("spend must be finite and non-negative, got {value}"))
    }
}

impl From<Spend> for f64 {
    fn from(value: Spend) -> Self {
        value.0
    }
}

impl std::fmt::Display for Spend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Spend {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

// ---------------------------------------------------------------------------

/// Spend ceiling for one budget period, in US dollars.
///
/// A ceiling of zero is valid: any spend at all breaches it.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct BudgetCeiling(f64);

impl BudgetCeiling {
    /// Creates a [`BudgetCeiling`] (USD).
    ///
    /// Returns `None` if `limit` is negative, infinite, or NaN.
    #[must_use]
    pub fn new(limit: f64) -> Option<Self> {
        if limit.is_finite() && limit >= 0.0 {
            Some(Self(limit))
        } else {
            None
        }
    }

    /// Returns the ceiling as a `f64` (USD).
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Returns `true` if `spend` equals or exceeds this ceiling.
    pub fn is_exceeded_by(self, spend: Spend) -> bool {
        spend.as_f64() >= self.0
    }

    /// Returns `spend` as a percentage of this ceiling.
    ///
    /// Returns `None` for a zero ceiling, where the ratio is undefined.
    pub fn percent_used(self, spend: Spend) -> Option<f64> {
        if self.0 == 0.0 {
            None
        } else {
            Some(spend.as_f64() / self.0 * 100.0)
        }
    }
}

impl TryFrom<f64> for BudgetCeiling {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
            .ok_or_else(|| format!("budget ceiling must be finite and non-negative, got {value}"))
    }
}

impl From<BudgetCeiling> for f64 {
    fn from(value: BudgetCeiling) -> Self {
        value.0
    }
}

impl std::fmt::Display for BudgetCeiling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// A resolvable object location of the form `scheme://container/key`.
///
/// For object storage the container is the bucket. Both the container and the
/// key are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectLocation {
    scheme: String,
    container: String,
    key: String,
}

impl ObjectLocation {
    /// Builds a location from its parts, returning `None` if any part is empty
    /// or the container contains a `/`.
    pub fn new(
        scheme: impl Into<String>,
        container: impl Into<String>,
        key: impl Into<String>,
    ) -> Option<Self> {
        let (scheme, container, key) = (scheme.into(), container.into(), key.into());
        if scheme.is_empty() || container.is_empty() || key.is_empty() || container.contains('/') {
            return None;
        }
        Some(Self {
            scheme,
            container,
            key,
        })
    }

    /// Parses `scheme://container/key`.
    ///
    /// Returns `None` when the URI has no scheme, no container, or no key.
    pub fn parse(uri: &str) -> Option<Self> {
        let (scheme, rest) = uri.split_once("://")?;
        let (container, key) = rest.split_once('/')?;
        Self::new(scheme, container, key)
    }

    /// The URI scheme (e.g. `"s3"`).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The container (bucket) holding the object.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// The object key within the container.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.container, self.key)
    }
}

impl TryFrom<String> for ObjectLocation {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unresolvable object location: '{value}'"))
    }
}

impl From<ObjectLocation> for String {
    fn from(value: ObjectLocation) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parses an RFC 3339 timestamp, normalising it to UTC.
    pub fn parse_rfc3339(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
