//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`JobId`] with an [`ArtifactId`] even though both are strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id! {
    /// Identifies an input artifact by its key within the monitored location
    /// (e.g. `"samples/NA12878.cram"`).
    ArtifactId
}

string_id! {
    /// Identifies one submitted job.
    ///
    /// Generated by the submission gateway (see [`JobId::generate`]) or reported
    /// back by the job substrate on status events.
    JobId
}

string_id! {
    /// Human-readable job name handed to the job substrate.
    ///
    /// Derived from the artifact key; see [`JobName::from_artifact`].
    JobName
}

string_id! {
    /// Name of the substrate queue jobs are submitted to.
    JobQueueName
}

string_id! {
    /// Name of the job definition (the executable step) jobs are created from.
    JobDefinitionName
}

/// Maximum length the job substrate accepts for a job name.
pub const MAX_JOB_NAME_LEN: usize = 127;

impl JobId {
    /// Generates a fresh, globally unique job identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl JobName {
    /// Derives a substrate-safe job name from an artifact key.
    ///
    /// Every run of characters outside `[A-Za-z0-9_-]` collapses into a single
    /// `_`, and the result is truncated to [`MAX_JOB_NAME_LEN`] characters.
    pub fn from_artifact(artifact: &ArtifactId) -> Self {
        let mut name = String::with_capacity(artifact.as_str().len());
        let mut in_run = false;
        for c in artifact.as_str().chars() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                name.push(c);
                in_run = false;
            } else if !in_run {
                name.push('_');
                in_run = true;
            }
        }
        name.truncate(MAX_JOB_NAME_LEN);
        Self(name)
    }
}
