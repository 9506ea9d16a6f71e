//! Common types and utilities shared across all crates.
//!
//! This crate provides the shared error type, result alias, identifier
//! types, and re-exports used throughout the temporal HTN planner.

use std::fmt;

/// Re-export commonly used external crates
pub use async_trait::async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use tracing;
pub use uuid;

/// Common result type used across the codebase
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the planner.
///
/// Method-level kinds (`MethodFailure`, `EntityUnavailable`, `CommandFailure`)
/// are recovered locally by blacklisting and replanning; plan-level kinds
/// (`InvalidInput`, `InconsistentPlan`, `DepthExceeded`) surface to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No method for task: {0}")]
    NoMethod(String),

    #[error("Method failure: {0}")]
    MethodFailure(String),

    #[error("Inconsistent plan: {0}")]
    InconsistentPlan(String),

    #[error("Entity unavailable: {0}")]
    EntityUnavailable(String),

    #[error("Command failure: {0}")]
    CommandFailure(String),

    #[error("Value out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Planning depth exceeded after {0} iterations")]
    DepthExceeded(usize),

    #[error("Solver unavailable: {0}")]
    SolverUnavailable(String),

    #[error("Solver model error: {0}")]
    ModelError(String),

    #[error("Solver timed out after {0} ms")]
    SolverTimeout(u64),

    #[error("Unsatisfiable: {0}")]
    Unsatisfiable(String),

    #[error("Solver output parse error: {0}")]
    ParseError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// True for failures the engine recovers from by blacklisting the
    /// responsible method and retrying at the parent node.
    pub fn is_method_level(&self) -> bool {
        matches!(
            self,
            Error::MethodFailure(_) | Error::EntityUnavailable(_) | Error::CommandFailure(_)
        )
    }
}

/// Unique identifier for plan requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PlanId(pub uuid::Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp type alias for consistency
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current timestamp
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Utility functions
pub mod utils {
    /// Truncate a string to a maximum length for log output
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.len() <= max_len {
            s.to_string()
        } else {
            format!("{}...", &s[..max_len.saturating_sub(3)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plan_id_generation() {
        let id1 = PlanId::new();
        let id2 = PlanId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_method_level_errors() {
        assert!(Error::MethodFailure("m1".to_string()).is_method_level());
        assert!(Error::EntityUnavailable("chef".to_string()).is_method_level());
        assert!(!Error::InvalidInput("bad".to_string()).is_method_level());
        assert!(!Error::DepthExceeded(100).is_method_level());
    }

    proptest! {
        #[test]
        fn test_plan_id_roundtrip(_n in 0u8..8) {
            let id = PlanId::new();
            let serialized = serde_json::to_string(&id).unwrap();
            let deserialized: PlanId = serde_json::from_str(&serialized).unwrap();
            prop_assert_eq!(id, deserialized);
        }

        #[test]
        fn test_truncate_never_longer(s in "[a-zA-Z0-9_ ]{0,128}", max in 3usize..64) {
            let out = utils::truncate(&s, max);
            prop_assert!(out.len() <= max.max(s.len()));
        }
    }
}
