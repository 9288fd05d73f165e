//! Lazy, restartable entity queries bound to a unit's session.
//!
//! # Invariants
//! - Building a query never touches the store; every materialization
//!   re-runs it against the current session view.
//! - Eager-load directives are validated before the query runs.

use crate::model::Entity;
use crate::query::criteria::Criteria;
use crate::query::QueryTracking;
use crate::repo::{RepoError, RepoResult};
use crate::session::{borrow_session, PersistenceSession};
use std::cell::RefCell;
use std::marker::PhantomData;

/// A composable query over entities of type `T`.
pub struct Query<'u, T: Entity> {
    session: &'u RefCell<PersistenceSession>,
    criteria: Criteria,
    includes: Vec<String>,
    tracking: QueryTracking,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Query<'_, T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            criteria: self.criteria.clone(),
            includes: self.includes.clone(),
            tracking: self.tracking,
            _entity: PhantomData,
        }
    }
}

impl<'u, T: Entity> Query<'u, T> {
    pub(crate) fn new(session: &'u RefCell<PersistenceSession>, criteria: Criteria) -> Self {
        Self {
            session,
            criteria,
            includes: Vec::new(),
            tracking: QueryTracking::Tracking,
            _entity: PhantomData,
        }
    }

    /// Narrows the query; the result is the AND of both criteria.
    pub fn filter(mut self, criteria: Criteria) -> Self {
        self.criteria = std::mem::take(&mut self.criteria).and(criteria);
        self
    }

    /// Adds an eager-load directive for a named relation.
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.includes.push(relation.into());
        self
    }

    pub fn no_tracking(mut self) -> Self {
        self.tracking = QueryTracking::NoTracking;
        self
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn tracking(&self) -> QueryTracking {
        self.tracking
    }

    /// Every matching entity, in store order followed by staged entities.
    pub fn to_vec(&self) -> RepoResult<Vec<T>> {
        let mut session = borrow_session(self.session)?;
        session.validate_includes::<T>(&self.includes)?;
        let mut items = session.fetch::<T>(&self.criteria, self.tracking)?;
        for item in &mut items {
            session.load_relations(item, &self.includes)?;
        }
        Ok(items)
    }

    pub fn first(&self) -> RepoResult<Option<T>> {
        let mut session = borrow_session(self.session)?;
        session.validate_includes::<T>(&self.includes)?;
        match session.find_first::<T>(&self.criteria, self.tracking)? {
            Some(mut item) => {
                session.load_relations(&mut item, &self.includes)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// The only match; `NotFound` or `MultipleMatches` otherwise.
    pub fn single(&self) -> RepoResult<T> {
        self.single_or_default()?.ok_or(RepoError::NotFound {
            entity: T::descriptor().type_name,
        })
    }

    /// The only match or `None`; `MultipleMatches` when ambiguous.
    pub fn single_or_default(&self) -> RepoResult<Option<T>> {
        let mut session = borrow_session(self.session)?;
        session.validate_includes::<T>(&self.includes)?;
        let mut items = session.fetch::<T>(&self.criteria, self.tracking)?;
        match items.len() {
            0 => Ok(None),
            1 => {
                let mut item = items.remove(0);
                session.load_relations(&mut item, &self.includes)?;
                Ok(Some(item))
            }
            count => Err(RepoError::MultipleMatches {
                entity: T::descriptor().type_name,
                count,
            }),
        }
    }

    pub fn count(&self) -> RepoResult<usize> {
        borrow_session(self.session)?.count::<T>(&self.criteria)
    }

    pub fn any(&self) -> RepoResult<bool> {
        Ok(self.count()? > 0)
    }
}
