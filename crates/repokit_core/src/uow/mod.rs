//! Unit of work: one session, many repositories, one atomic commit.
//!
//! # Responsibility
//! - Hand out repositories that share a single persistence session.
//! - Commit staged changes from all of them together.
//! - Release the connection exactly once.
//!
//! # Invariants
//! - A unit and its repositories are `!Sync`; the session sits in a `RefCell`.
//! - After `dispose` every operation fails with `InvalidState`.

mod cancel;
mod factory;
mod transaction;

pub use factory::SessionFactory;
pub use transaction::UnitTransaction;

use crate::db::{create_schema, open_db_in_memory, ConnectionOptions};
use crate::model::{Entity, Model};
use crate::repo::{RepoError, RepoResult, Repository};
use crate::session::{borrow_session, PersistenceSession};
use cancel::SaveInterrupt;
use log::{debug, warn};
use std::cell::RefCell;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct UnitOfWork {
    id: Uuid,
    session: Option<RefCell<PersistenceSession>>,
}

impl UnitOfWork {
    pub fn new(session: PersistenceSession) -> Self {
        let id = Uuid::new_v4();
        debug!("event=uow_open module=uow status=ok unit={id}");
        Self {
            id,
            session: Some(RefCell::new(session)),
        }
    }

    /// A unit over a private in-memory store with the model's schema created.
    pub fn in_memory(model: Arc<Model>) -> RepoResult<Self> {
        let mut conn = open_db_in_memory(&ConnectionOptions::default())?;
        create_schema(&mut conn, &model)?;
        Ok(Self::new(PersistenceSession::new(conn, model)))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Repository for `T` sharing this unit's session.
    ///
    /// # Errors
    /// - `Unmapped` when `T` is not part of the model.
    pub fn repository<T: Entity>(&self) -> RepoResult<Repository<'_, T>> {
        let session = self.session()?;
        if !borrow_session(session)?.maps::<T>() {
            return Err(RepoError::Unmapped(T::descriptor().type_name));
        }
        Ok(Repository::new(session))
    }

    /// Commits staged changes of every repository and returns the affected row count.
    pub fn save(&self) -> RepoResult<usize> {
        borrow_session(self.session()?)?.save_changes()
    }

    /// `save` that can be cancelled, before it starts or while a statement is
    /// running. A cancelled save writes nothing and keeps the staged changes.
    ///
    /// Cancelling mid-statement needs a multi-thread runtime, since the save
    /// blocks the worker it runs on.
    pub async fn save_async(&self, cancel: &CancellationToken) -> RepoResult<usize> {
        if cancel.is_cancelled() {
            debug!("event=save_changes module=uow status=cancelled unit={}", self.id);
            return Err(RepoError::Cancelled);
        }

        let mut session = borrow_session(self.session()?)?;
        let interrupt = SaveInterrupt::arm(session.interrupt_handle(), cancel);
        let result = session.save_changes();
        drop(interrupt);

        match result {
            Err(err) if cancel.is_cancelled() => {
                debug!(
                    "event=save_changes module=uow status=cancelled unit={} error={}",
                    self.id, err
                );
                Err(RepoError::Cancelled)
            }
            other => other,
        }
    }

    /// Opens an explicit transaction grouping several saves and statements.
    ///
    /// # Errors
    /// - `InvalidState` when a transaction is already open.
    pub fn begin_transaction(&self) -> RepoResult<UnitTransaction<'_>> {
        UnitTransaction::begin(self.session()?)
    }

    pub fn has_changes(&self) -> RepoResult<bool> {
        Ok(borrow_session(self.session()?)?.has_changes())
    }

    pub fn discard_changes(&self) -> RepoResult<()> {
        borrow_session(self.session()?)?.discard_changes();
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.session.is_none()
    }

    /// Releases the connection. Later calls are no-ops.
    pub fn dispose(&mut self) -> RepoResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let outcome = session.into_inner().close();
        match &outcome {
            Ok(()) => debug!("event=uow_dispose module=uow status=ok unit={}", self.id),
            Err(err) => warn!(
                "event=uow_dispose module=uow status=error unit={} error={}",
                self.id, err
            ),
        }
        outcome
    }

    fn session(&self) -> RepoResult<&RefCell<PersistenceSession>> {
        self.session
            .as_ref()
            .ok_or_else(|| RepoError::InvalidState("unit of work is disposed".to_string()))
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}
