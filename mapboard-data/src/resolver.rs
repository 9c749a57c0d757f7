//! Registry-backed project lookup.
//!
//! Project parameters live in the `projects` table of the core database.
//! Each lookup opens its own short-lived connection; the client registry
//! caches the result, so a schema is looked up at most once per process.

use std::fmt;

use async_trait::async_trait;
use log::debug;
use mapboard_core::{ProjectKey, ProjectParams, ProjectResolver, ResolveError, single_project};
use tokio_postgres::Row;

use crate::{ConnectionSettings, SettingsError, connection::connect};

const BY_DATA_SCHEMA: &str = "SELECT database, data_schema, topo_schema, srid::integer, \
     tolerance::double precision FROM projects WHERE data_schema = $1";

const BY_SLUG: &str = "SELECT database, data_schema, topo_schema, srid::integer, \
     tolerance::double precision FROM projects WHERE slug = $1";

/// Query selecting the registry rows matching `key`.
#[must_use]
pub const fn lookup_query(key: &ProjectKey) -> &'static str {
    match key {
        ProjectKey::DataSchema(_) => BY_DATA_SCHEMA,
        ProjectKey::Slug(_) => BY_SLUG,
    }
}

/// [`ProjectResolver`] reading the `projects` table of the core database.
pub struct PgProjectResolver {
    url: String,
    database: String,
}

impl fmt::Debug for PgProjectResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgProjectResolver")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl PgProjectResolver {
    /// Resolve projects through the core database named in `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when no connection URL can be built.
    pub fn new(settings: &ConnectionSettings) -> Result<Self, SettingsError> {
        let database = settings.core_database().to_owned();
        let url = settings.connection_url(&database)?;
        Ok(Self {
            url: url.into(),
            database,
        })
    }

    /// Database the registry is read from.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }
}

fn query_error(key: &ProjectKey, err: tokio_postgres::Error) -> ResolveError {
    ResolveError::Query {
        key: key.clone(),
        source: Box::new(err),
    }
}

fn params_from_row(row: &Row) -> Result<ProjectParams, tokio_postgres::Error> {
    Ok(ProjectParams {
        database: row.try_get(0)?,
        data_schema: row.try_get(1)?,
        topo_schema: row.try_get(2)?,
        srid: row.try_get(3)?,
        tolerance: row.try_get(4)?,
    })
}

#[async_trait]
impl ProjectResolver for PgProjectResolver {
    async fn resolve(&self, key: &ProjectKey) -> Result<ProjectParams, ResolveError> {
        let (client, driver) = connect(&self.url)
            .await
            .map_err(|err| query_error(key, err))?;
        let value = key.value();
        let rows = client
            .query(lookup_query(key), &[&value])
            .await
            .map_err(|err| query_error(key, err))?;
        drop(client);
        driver.abort();

        debug!("Registry returned {} row(s) for {key}", rows.len());
        let projects = rows
            .iter()
            .map(params_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| query_error(key, err))?;
        single_project(key, projects)
    }
}
