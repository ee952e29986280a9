use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an identifier. Surrounding whitespace is trimmed and the
            /// remainder must be non-empty.
            pub fn new(value: impl AsRef<str>) -> Result<Self> {
                let trimmed = value.as_ref().trim();
                if trimmed.is_empty() {
                    return Err(WorkflowError::InvalidId(format!(
                        "{} must not be empty",
                        $kind
                    )));
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Create an identifier from the next value of an id generator.
            pub fn generate(generator: &dyn IdGenerator) -> Result<Self> {
                Self::new(generator.next_id($kind))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = WorkflowError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = WorkflowError;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl std::str::FromStr for $name {
            type Err = WorkflowError;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

string_id!(
    /// Identifier of a node within one graph.
    NodeId,
    "node"
);
string_id!(
    /// Identifier of a directed edge.
    EdgeId,
    "edge"
);
string_id!(
    /// Identifier of one workflow run, shared by all of its branches.
    WorkflowId,
    "workflow"
);

/// Source of fresh identifiers.
///
/// Injected into the builder so id generation stays deterministic in tests.
/// `kind` is one of `"node"`, `"edge"` or `"workflow"`.
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self, kind: &str) -> String;
}

/// Random v4 UUIDs. The default generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self, _kind: &str) -> String {
        Uuid::new_v4().to_string()
    }
}

/// `{prefix}-{kind}-{n}` with a monotonically increasing counter.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new("skein")
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self, kind: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.prefix, kind, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_trimmed() {
        let id = NodeId::new("  review ").unwrap();
        assert_eq!(id.as_str(), "review");
        assert_eq!(id, NodeId::new("review").unwrap());
    }

    #[test]
    fn test_blank_ids_rejected() {
        assert!(matches!(NodeId::new(""), Err(WorkflowError::InvalidId(_))));
        assert!(EdgeId::new("   ").is_err());
        assert!(WorkflowId::try_from("\t".to_string()).is_err());
    }

    #[test]
    fn test_serde_rejects_blank() {
        let ok: NodeId = serde_json::from_str("\"a\"").unwrap();
        assert_eq!(ok.as_str(), "a");
        assert!(serde_json::from_str::<NodeId>("\"  \"").is_err());
    }

    #[test]
    fn test_sequential_generator() {
        let gen = SequentialIdGenerator::new("t");
        assert_eq!(WorkflowId::generate(&gen).unwrap().as_str(), "t-workflow-1");
        assert_eq!(EdgeId::generate(&gen).unwrap().as_str(), "t-edge-2");
    }

    #[test]
    fn test_uuid_generator() {
        let gen = UuidIdGenerator;
        let a = WorkflowId::generate(&gen).unwrap();
        let b = WorkflowId::generate(&gen).unwrap();
        assert_ne!(a, b);
    }
}
