//! Project parameter lookup against the shared registry.

use async_trait::async_trait;
use thiserror::Error;

use crate::{ProjectKey, ProjectParams};

/// Errors returned by [`ProjectResolver::resolve`].
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No registry row matched the key.
    #[error("no project registered for {key}")]
    NotFound {
        /// Key that was looked up.
        key: ProjectKey,
    },
    /// More than one registry row matched the key.
    #[error("{rows} projects registered for {key}; expected exactly one")]
    Ambiguous {
        /// Key that was looked up.
        key: ProjectKey,
        /// Number of matching rows.
        rows: usize,
    },
    /// Querying the registry failed.
    #[error("failed to query the project registry for {key}: {source}")]
    Query {
        /// Key that was looked up.
        key: ProjectKey,
        /// Driver error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Fetch [`ProjectParams`] for a project.
///
/// Implementations must be side-effect free apart from reading the registry,
/// and safe to call repeatedly for the same key.
#[async_trait]
pub trait ProjectResolver: Send + Sync {
    /// Resolve the registry row matching `key`.
    async fn resolve(&self, key: &ProjectKey) -> Result<ProjectParams, ResolveError>;
}

/// Reduce the rows returned for `key` to the single expected match.
pub fn single_project(
    key: &ProjectKey,
    mut rows: Vec<ProjectParams>,
) -> Result<ProjectParams, ResolveError> {
    match rows.len() {
        0 => Err(ResolveError::NotFound { key: key.clone() }),
        1 => rows.pop().ok_or_else(|| ResolveError::NotFound { key: key.clone() }),
        count => Err(ResolveError::Ambiguous {
            key: key.clone(),
            rows: count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn params(schema: &str) -> ProjectParams {
        ProjectParams::new("mapboard", schema, format!("{schema}_topology"), 4326, 1e-5)
    }

    #[rstest]
    fn single_row_is_returned() {
        let key = ProjectKey::data_schema("proj1");
        let found = single_project(&key, vec![params("proj1")]).expect("one row");
        assert_eq!(found, params("proj1"));
    }

    #[rstest]
    fn missing_row_is_not_found() {
        let key = ProjectKey::data_schema("ghost");
        let err = single_project(&key, Vec::new()).expect_err("no rows");
        match err {
            ResolveError::NotFound { key: missing } => assert_eq!(missing, key),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[rstest]
    fn duplicate_rows_are_ambiguous() {
        let key = ProjectKey::slug("proj1");
        let err = single_project(&key, vec![params("proj1"), params("proj1")])
            .expect_err("two rows");
        assert!(matches!(err, ResolveError::Ambiguous { rows: 2, .. }));
    }
}
