//! Explicit transaction handle spanning several saves.

use crate::repo::RepoResult;
use crate::session::{borrow_session, PersistenceSession};
use log::warn;
use rusqlite::Params;
use std::cell::RefCell;

/// An open transaction on a unit's connection.
///
/// Dropping the handle without `commit` rolls the transaction back.
#[must_use = "dropping a transaction handle rolls it back"]
pub struct UnitTransaction<'u> {
    session: &'u RefCell<PersistenceSession>,
    finished: bool,
}

impl<'u> UnitTransaction<'u> {
    pub(crate) fn begin(session: &'u RefCell<PersistenceSession>) -> RepoResult<Self> {
        borrow_session(session)?.begin_transaction()?;
        Ok(Self {
            session,
            finished: false,
        })
    }

    /// Runs a raw statement inside the transaction.
    pub fn execute<P: Params>(&self, statement: &str, params: P) -> RepoResult<usize> {
        borrow_session(self.session)?.execute(statement, params)
    }

    /// Commits; on failure the handle is dropped and the transaction rolled back.
    pub fn commit(mut self) -> RepoResult<()> {
        borrow_session(self.session)?.commit_transaction()?;
        self.finished = true;
        Ok(())
    }

    /// Discards every save and statement made in the transaction and detaches
    /// all tracked entities.
    pub fn rollback(mut self) -> RepoResult<()> {
        self.finished = true;
        borrow_session(self.session)?.rollback_transaction()
    }
}

impl Drop for UnitTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let outcome = borrow_session(self.session).and_then(|mut session| {
            if session.in_transaction() {
                session.rollback_transaction()
            } else {
                Ok(())
            }
        });
        if let Err(err) = outcome {
            warn!("event=transaction_drop module=uow status=error error={err}");
        }
    }
}
