/// Base abstractions for the domain layer
use std::fmt::Debug;
use thiserror::Error;

/// Trait for value objects - immutable objects defined by their attributes
/// Value objects are equal if all their attributes are equal
pub trait ValueObject: Clone + PartialEq + Debug {}

/// Trait for entities - objects with identity
/// Entities are equal if their IDs are equal, regardless of other attributes
pub trait Entity: Debug {
    type Id: ValueObject;

    fn id(&self) -> &Self::Id;
}

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-specific errors
///
/// `DimensionMismatch`, `ModelMismatch` and `IndexCorrupt` are integrity errors:
/// callers abort the operation instead of repairing or rebuilding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid value provided
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Vectors of different dimensions were mixed
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Embedding model identity differs from the one the index was built with
    #[error("Model mismatch: expected {expected}, found {found}")]
    ModelMismatch { expected: String, found: String },

    /// Persisted index failed an integrity check
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestId(String);
    impl ValueObject for TestId {}

    #[derive(Debug)]
    struct TestEntity {
        id: TestId,
        #[allow(dead_code)]
        value: String,
    }

    impl Entity for TestEntity {
        type Id = TestId;

        fn id(&self) -> &Self::Id {
            &self.id
        }
    }

    #[test]
    fn test_entity_has_identity() {
        let entity1 = TestEntity {
            id: TestId("doc-1".to_string()),
            value: "original".to_string(),
        };

        let entity2 = TestEntity {
            id: TestId("doc-1".to_string()),
            value: "re-scraped".to_string(),
        };

        assert_eq!(entity1.id(), entity2.id());
    }

    #[test]
    fn test_domain_error_display() {
        let error = DomainError::InvalidValue("test".to_string());
        assert_eq!(error.to_string(), "Invalid value: test");

        let error = DomainError::DimensionMismatch {
            expected: 384,
            found: 768,
        };
        assert_eq!(error.to_string(), "Dimension mismatch: expected 384, found 768");
    }
}
