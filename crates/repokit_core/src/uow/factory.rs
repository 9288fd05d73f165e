//! Store bootstrap and per-unit connection factory.

use crate::config::{SchemaMode, StoreConfig};
use crate::db::{create_schema, open_db, verify_schema};
use crate::model::Model;
use crate::repo::RepoResult;
use crate::session::PersistenceSession;
use crate::uow::UnitOfWork;
use log::info;
use std::sync::Arc;
use std::time::Instant;

/// Shared model plus store settings; opens one connection per unit of work.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    config: StoreConfig,
    model: Arc<Model>,
}

impl SessionFactory {
    /// Opens the store once and creates or verifies the schema per `config.schema_mode`.
    ///
    /// # Errors
    /// - `StoreUnavailable` when the database cannot be opened.
    /// - `Db` when verification finds a missing table or mismatched column.
    pub fn new(config: StoreConfig, model: Model) -> RepoResult<Self> {
        let started = Instant::now();
        let mut conn = open_db(&config.database_path, &config.connection_options())?;
        match config.schema_mode {
            SchemaMode::Create => create_schema(&mut conn, &model)?,
            SchemaMode::Verify => verify_schema(&conn, &model)?,
        }
        conn.close().map_err(|(_, err)| err)?;
        info!(
            "event=factory_init module=uow status=ok schema_mode={:?} entities={} duration_ms={}",
            config.schema_mode,
            model.entities().count(),
            started.elapsed().as_millis()
        );
        Ok(Self {
            config,
            model: Arc::new(model),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// A session over a fresh connection.
    pub fn open_session(&self) -> RepoResult<PersistenceSession> {
        let conn = open_db(&self.config.database_path, &self.config.connection_options())?;
        Ok(PersistenceSession::new(conn, Arc::clone(&self.model)))
    }

    pub fn unit_of_work(&self) -> RepoResult<UnitOfWork> {
        Ok(UnitOfWork::new(self.open_session()?))
    }
}
