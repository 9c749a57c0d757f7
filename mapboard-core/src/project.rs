//! Project parameters read from the shared registry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection and geometry parameters for one Mapboard project.
///
/// A project lives in one physical database and owns a data schema plus a
/// topology schema inside it. Values are immutable once fetched.
///
/// # Examples
///
/// ```
/// use mapboard_core::ProjectParams;
///
/// let params = ProjectParams::new("mapboard", "naukluft", "naukluft_topology", 32733, 0.1);
/// assert_eq!(params.topo_schema, "naukluft_topology");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectParams {
    /// Physical database holding the project schemas.
    pub database: String,
    /// Schema containing the project's mapping data.
    pub data_schema: String,
    /// Schema containing the derived topology.
    pub topo_schema: String,
    /// Spatial reference identifier of the project geometries.
    pub srid: i32,
    /// Snapping tolerance used when building topology.
    pub tolerance: f64,
}

impl ProjectParams {
    /// Construct parameters from their individual parts.
    pub fn new(
        database: impl Into<String>,
        data_schema: impl Into<String>,
        topo_schema: impl Into<String>,
        srid: i32,
        tolerance: f64,
    ) -> Self {
        Self {
            database: database.into(),
            data_schema: data_schema.into(),
            topo_schema: topo_schema.into(),
            srid,
            tolerance,
        }
    }
}

/// Lookup key for a registry row.
///
/// Watchers identify projects by their data schema, which is what change
/// notifications carry. Operators usually refer to projects by slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProjectKey {
    /// Match on the `data_schema` column.
    DataSchema(String),
    /// Match on the `slug` column.
    Slug(String),
}

impl ProjectKey {
    /// Key a lookup by data schema.
    pub fn data_schema(schema: impl Into<String>) -> Self {
        Self::DataSchema(schema.into())
    }

    /// Key a lookup by project slug.
    pub fn slug(slug: impl Into<String>) -> Self {
        Self::Slug(slug.into())
    }

    /// The raw value being looked up.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::DataSchema(value) | Self::Slug(value) => value,
        }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataSchema(schema) => write!(f, "data schema {schema:?}"),
            Self::Slug(slug) => write!(f, "project slug {slug:?}"),
        }
    }
}
