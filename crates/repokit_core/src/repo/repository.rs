//! Typed repository facade over a unit's shared session.
//!
//! # Responsibility
//! - Expose lookup, lazy query and staging operations for one entity type.
//! - Share staged state with every other repository of the same unit.
//!
//! # Invariants
//! - Lookups see the unit's staged changes.
//! - Staging never writes to the store; `UnitOfWork::save` does.

use crate::model::{self, Entity, Value};
use crate::query::{Criteria, Query};
use crate::repo::RepoResult;
use crate::session::{borrow_session, EntryState, PersistenceSession};
use std::cell::RefCell;
use std::marker::PhantomData;

/// Repository for entity type `T`, borrowed from a unit of work.
pub struct Repository<'u, T: Entity> {
    session: &'u RefCell<PersistenceSession>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<'_, T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            _entity: PhantomData,
        }
    }
}

impl<'u, T: Entity> Repository<'u, T> {
    pub(crate) fn new(session: &'u RefCell<PersistenceSession>) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    /// Unfiltered lazy query.
    pub fn query(&self) -> Query<'u, T> {
        Query::new(self.session, Criteria::all())
    }

    /// Lazy query filtered by `criteria`.
    pub fn query_where(&self, criteria: Criteria) -> Query<'u, T> {
        Query::new(self.session, criteria)
    }

    /// All matches as a lazy query; never fails on zero matches.
    pub fn find(&self, criteria: Criteria) -> Query<'u, T> {
        self.query_where(criteria)
    }

    /// Exactly one match.
    ///
    /// # Errors
    /// - `NotFound` when nothing matches.
    /// - `MultipleMatches` when more than one entity matches.
    pub fn single(&self, criteria: Criteria) -> RepoResult<T> {
        self.query_where(criteria).single()
    }

    pub fn single_or_default(&self, criteria: Criteria) -> RepoResult<Option<T>> {
        self.query_where(criteria).single_or_default()
    }

    pub fn find_one(&self, criteria: Criteria) -> RepoResult<Option<T>> {
        self.query_where(criteria).first()
    }

    /// First match with the named relations loaded.
    ///
    /// Unknown relation names fail with `UnknownRelation` even when nothing matches.
    pub fn find_one_with(&self, criteria: Criteria, includes: &[&str]) -> RepoResult<Option<T>> {
        includes
            .iter()
            .fold(self.query_where(criteria), |query, relation| {
                query.include(*relation)
            })
            .first()
    }

    pub fn count(&self) -> RepoResult<usize> {
        self.query().count()
    }

    pub fn count_where(&self, criteria: Criteria) -> RepoResult<usize> {
        self.query_where(criteria).count()
    }

    pub fn any(&self, criteria: Criteria) -> RepoResult<bool> {
        self.query_where(criteria).any()
    }

    /// Stages an insert. `None` is ignored.
    pub fn add<'e>(&self, entity: impl Into<Option<&'e T>>) -> RepoResult<()> {
        match entity.into() {
            Some(entity) => borrow_session(self.session)?.stage_add(entity),
            None => Ok(()),
        }
    }

    pub fn add_range<'e>(&self, entities: impl IntoIterator<Item = &'e T>) -> RepoResult<()> {
        let mut session = borrow_session(self.session)?;
        for entity in entities {
            session.stage_add(entity)?;
        }
        Ok(())
    }

    /// Stages a full-row replace of the persisted entity with the same key.
    pub fn update(&self, entity: &T) -> RepoResult<()> {
        borrow_session(self.session)?.stage_update(entity)
    }

    pub fn update_range<'e>(&self, entities: impl IntoIterator<Item = &'e T>) -> RepoResult<()> {
        let mut session = borrow_session(self.session)?;
        for entity in entities {
            session.stage_update(entity)?;
        }
        Ok(())
    }

    /// Copies the non-key fields of `values` onto the single entity matched
    /// by `criteria`, keeping its identity, and returns the merged entity.
    ///
    /// # Errors
    /// - `NotFound` / `MultipleMatches` as for [`Repository::single`].
    pub fn update_where(&self, values: &T, criteria: Criteria) -> RepoResult<T> {
        borrow_session(self.session)?.stage_merge(values, &criteria)
    }

    /// Stages a delete. `None` is ignored; a staged insert is just detached.
    pub fn remove<'e>(&self, entity: impl Into<Option<&'e T>>) -> RepoResult<()> {
        match entity.into() {
            Some(entity) => borrow_session(self.session)?.stage_remove(entity),
            None => Ok(()),
        }
    }

    pub fn remove_range<'e>(&self, entities: impl IntoIterator<Item = &'e T>) -> RepoResult<()> {
        let mut session = borrow_session(self.session)?;
        for entity in entities {
            session.stage_remove(entity)?;
        }
        Ok(())
    }

    /// Discards staged changes of `entity` and re-reads its persisted values.
    pub fn reload(&self, entity: &mut T) -> RepoResult<()> {
        borrow_session(self.session)?.reload(entity)
    }

    pub fn entry_state(&self, entity: &T) -> RepoResult<Option<EntryState>> {
        borrow_session(self.session)?.entry_state(entity)
    }

    pub fn has_field(&self, name: &str) -> bool {
        model::has_field::<T>(name)
    }

    pub fn get_field(&self, entity: &T, name: &str) -> RepoResult<Value> {
        model::get_field(entity, name)
    }

    pub fn set_field(&self, entity: &mut T, name: &str, value: impl Into<Value>) -> RepoResult<()> {
        model::set_field(entity, name, value)
    }
}
