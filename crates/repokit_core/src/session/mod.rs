//! Persistence session: one live connection plus its change tracker.
//!
//! # Responsibility
//! - Read entity rows through compiled criteria and merge them with staged
//!   changes into one consistent session view.
//! - Stage inserts, updates and deletes, then flush them in one atomic step.
//! - Own explicit transaction state for the connection.
//!
//! # Invariants
//! - A failed `save_changes` leaves the store untouched and every staged
//!   change in place.
//! - Each identity has at most one tracked entry per table; rows read from the
//!   store are resolved against it before being returned.
//! - Staged values are always normalized for their column, so a tracked
//!   entry compares equal to what the store returns after a flush.

pub(crate) mod codec;
mod tracker;

pub use tracker::EntryState;

use crate::db::schema::quote_ident;
use crate::model::{Entity, EntityModel, Model, Value};
use crate::query::criteria::Criteria;
use crate::query::{sql, QueryTracking};
use crate::repo::{RepoError, RepoResult};
use log::{debug, error, info, warn};
use rusqlite::{params_from_iter, Connection, InterruptHandle, Params};
use std::cell::{RefCell, RefMut};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracker::{ChangeTracker, EntryKey, TrackedEntry};

const SAVE_SAVEPOINT: &str = "uow_save";

/// A single-caller persistence context over one SQLite connection.
///
/// Not safe for concurrent use; units of work wrap it in a `RefCell`.
pub struct PersistenceSession {
    conn: Connection,
    model: Arc<Model>,
    tracker: ChangeTracker,
    transaction_active: bool,
}

impl PersistenceSession {
    /// Wraps an open connection. The schema is expected to match `model`.
    pub fn new(conn: Connection, model: Arc<Model>) -> Self {
        Self {
            conn,
            model,
            tracker: ChangeTracker::default(),
            transaction_active: false,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Returns whether `T` is mapped by this session's model.
    pub fn maps<T: Entity>(&self) -> bool {
        self.model.entity_of::<T>().is_some()
    }

    /// Entities of type `T` matching `criteria` in the session view.
    pub fn fetch<T: Entity>(
        &mut self,
        criteria: &Criteria,
        tracking: QueryTracking,
    ) -> RepoResult<Vec<T>> {
        let model = Arc::clone(&self.model);
        let entity = mapped::<T>(&model)?;
        let started = Instant::now();
        let rows = self.view_rows(entity, criteria, tracking)?;
        debug!(
            "event=fetch module=session status=ok entity={} rows={} tracking={} duration_ms={}",
            entity.type_name,
            rows.len(),
            tracking.as_str(),
            started.elapsed().as_millis()
        );

        let descriptor = T::descriptor();
        rows.into_iter()
            .map(|values| descriptor.materialize(values))
            .collect()
    }

    /// First entity matching `criteria`, or `None`.
    pub fn find_first<T: Entity>(
        &mut self,
        criteria: &Criteria,
        tracking: QueryTracking,
    ) -> RepoResult<Option<T>> {
        Ok(self.fetch::<T>(criteria, tracking)?.into_iter().next())
    }

    /// Number of entities matching `criteria` in the session view.
    pub fn count<T: Entity>(&mut self, criteria: &Criteria) -> RepoResult<usize> {
        let model = Arc::clone(&self.model);
        let entity = mapped::<T>(&model)?;
        Ok(self.view_rows(entity, criteria, QueryTracking::NoTracking)?.len())
    }

    /// Fails with `UnknownRelation` unless every name is a relation of `T`.
    pub fn validate_includes<T: Entity>(&self, includes: &[String]) -> RepoResult<()> {
        let descriptor = T::descriptor();
        for name in includes {
            if descriptor.relation(name).is_none() {
                return Err(RepoError::UnknownRelation {
                    entity: descriptor.type_name,
                    relation: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Runs the named relation loaders for `item`.
    pub fn load_relations<T: Entity>(&mut self, item: &mut T, includes: &[String]) -> RepoResult<()> {
        let descriptor = T::descriptor();
        for name in includes {
            let relation = descriptor
                .relation(name)
                .ok_or_else(|| RepoError::UnknownRelation {
                    entity: descriptor.type_name,
                    relation: name.clone(),
                })?;
            (relation.load)(self, item)?;
        }
        Ok(())
    }

    /// Stages an insert.
    ///
    /// Re-adding an entity staged for deletion turns the delete into an
    /// update when its row exists, and into an insert when it does not.
    pub fn stage_add<T: Entity>(&mut self, item: &T) -> RepoResult<()> {
        let model = Arc::clone(&self.model);
        let entity = mapped::<T>(&model)?;
        let values = snapshot(entity, item)?;
        let key = identity(entity, &values)?;

        let tracked = self
            .tracker
            .get(&key)
            .map(|entry| (entry.state, entry.original.is_empty()));
        match tracked {
            None => self.tracker.insert(key, TrackedEntry::added(values)),
            Some((EntryState::Deleted, true)) => {
                let entry = match self.persisted_row(entity, &values)? {
                    Some(original) => {
                        let mut entry = TrackedEntry::unchanged(original);
                        entry.current = values;
                        entry.refresh_state();
                        entry
                    }
                    None => TrackedEntry::added(values),
                };
                self.tracker.insert(key, entry);
            }
            Some((EntryState::Deleted, false)) => {
                if let Some(entry) = self.tracker.get_mut(&key) {
                    entry.current = values;
                    entry.state = EntryState::Modified;
                    entry.refresh_state();
                }
            }
            Some(_) => {
                return Err(RepoError::InvalidState(format!(
                    "{} `{}` is already tracked",
                    entity.type_name, key.identity
                )))
            }
        }
        Ok(())
    }

    /// Stages a full-row replace by identity.
    ///
    /// An untracked entity is attached as modified; its row must exist at save.
    pub fn stage_update<T: Entity>(&mut self, item: &T) -> RepoResult<()> {
        let model = Arc::clone(&self.model);
        let entity = mapped::<T>(&model)?;
        let values = snapshot(entity, item)?;
        let key = identity(entity, &values)?;

        match self.tracker.get_mut(&key) {
            Some(entry) => match entry.state {
                EntryState::Deleted => {
                    return Err(RepoError::InvalidState(format!(
                        "{} `{}` is staged for deletion",
                        entity.type_name, key.identity
                    )))
                }
                EntryState::Added => entry.current = values,
                EntryState::Unchanged | EntryState::Modified => {
                    entry.current = values;
                    entry.refresh_state();
                }
            },
            None => self.tracker.insert(
                key,
                TrackedEntry {
                    state: EntryState::Modified,
                    original: Vec::new(),
                    current: values,
                },
            ),
        }
        Ok(())
    }

    /// Copies every non-key field of `source` onto the single entity matched
    /// by `criteria` and returns the merged entity.
    pub fn stage_merge<T: Entity>(&mut self, source: &T, criteria: &Criteria) -> RepoResult<T> {
        let model = Arc::clone(&self.model);
        let entity = mapped::<T>(&model)?;
        let incoming = snapshot(entity, source)?;

        let mut rows = self.view_rows(entity, criteria, QueryTracking::Tracking)?;
        let target = match rows.len() {
            0 => {
                return Err(RepoError::NotFound {
                    entity: entity.type_name,
                })
            }
            1 => rows.remove(0),
            count => {
                return Err(RepoError::MultipleMatches {
                    entity: entity.type_name,
                    count,
                })
            }
        };
        let key = identity(entity, &target)?;
        let entry = self.tracker.get_mut(&key).ok_or_else(|| {
            RepoError::InvalidState(format!("{} `{}` is not tracked", entity.type_name, key.identity))
        })?;

        for (index, value) in incoming.into_iter().enumerate() {
            if index != entity.key_index {
                entry.current[index] = value;
            }
        }
        entry.refresh_state();
        T::descriptor().materialize(entry.current.clone())
    }

    /// Stages a delete. Removing a staged insert just detaches it; removing an
    /// untracked entity stages a delete by key.
    pub fn stage_remove<T: Entity>(&mut self, item: &T) -> RepoResult<()> {
        let model = Arc::clone(&self.model);
        let entity = mapped::<T>(&model)?;
        let values = snapshot(entity, item)?;
        let key = identity(entity, &values)?;

        match self.tracker.get(&key).map(|entry| entry.state) {
            Some(EntryState::Added) => {
                self.tracker.detach(&key);
            }
            Some(_) => {
                if let Some(entry) = self.tracker.get_mut(&key) {
                    entry.state = EntryState::Deleted;
                }
            }
            None => self.tracker.insert(
                key,
                TrackedEntry {
                    state: EntryState::Deleted,
                    original: Vec::new(),
                    current: values,
                },
            ),
        }
        Ok(())
    }

    /// Discards staged changes of `item` and overwrites it with persisted values.
    ///
    /// # Errors
    /// - `InvalidState` when `item` is not tracked.
    /// - `NotFound` when the row no longer exists; the entry is detached.
    pub fn reload<T: Entity>(&mut self, item: &mut T) -> RepoResult<()> {
        let model = Arc::clone(&self.model);
        let entity = mapped::<T>(&model)?;
        let values = snapshot(entity, item)?;
        let key = identity(entity, &values)?;
        if self.tracker.get(&key).is_none() {
            return Err(RepoError::InvalidState(format!(
                "{} `{}` is not tracked",
                entity.type_name, key.identity
            )));
        }

        match self.persisted_row(entity, &values)? {
            Some(persisted) => {
                self.tracker
                    .insert(key, TrackedEntry::unchanged(persisted.clone()));
                T::descriptor().apply(item, persisted)
            }
            None => {
                self.tracker.detach(&key);
                Err(RepoError::NotFound {
                    entity: entity.type_name,
                })
            }
        }
    }

    /// Tracked state of `item`, or `None` when it is detached.
    pub fn entry_state<T: Entity>(&self, item: &T) -> RepoResult<Option<EntryState>> {
        let entity = mapped::<T>(&self.model)?;
        let values = snapshot(entity, item)?;
        let key = identity(entity, &values)?;
        Ok(self.tracker.get(&key).map(|entry| entry.state))
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    /// Drops staged changes and restores tracked entities to their persisted values.
    pub fn discard_changes(&mut self) {
        let pending = self.tracker.pending_count();
        self.tracker.reject_all();
        debug!("event=discard_changes module=session status=ok pending={pending}");
    }

    /// Flushes all staged changes atomically and returns the affected row count.
    ///
    /// # Errors
    /// - `PersistenceConflict` on constraint violations or when a staged update
    ///   or delete matched no row.
    /// - `StoreUnavailable` when the store is busy or unreachable.
    pub fn save_changes(&mut self) -> RepoResult<usize> {
        let pending = self.tracker.pending_count();
        if pending == 0 {
            return Ok(0);
        }

        let started = Instant::now();
        info!("event=save_changes module=session status=start pending={pending}");
        self.conn
            .execute_batch(&format!("SAVEPOINT {SAVE_SAVEPOINT};"))?;

        let outcome = flush(&self.conn, &self.model, &self.tracker).and_then(|affected| {
            self.conn
                .execute_batch(&format!("RELEASE SAVEPOINT {SAVE_SAVEPOINT};"))?;
            Ok(affected)
        });

        match outcome {
            Ok(affected) => {
                self.tracker.accept_all();
                info!(
                    "event=save_changes module=session status=ok affected={} duration_ms={}",
                    affected,
                    started.elapsed().as_millis()
                );
                Ok(affected)
            }
            Err(err) => {
                if let Err(rollback_err) = self.conn.execute_batch(&format!(
                    "ROLLBACK TO SAVEPOINT {SAVE_SAVEPOINT}; RELEASE SAVEPOINT {SAVE_SAVEPOINT};"
                )) {
                    warn!(
                        "event=save_changes module=session status=rollback_failed error={rollback_err}"
                    );
                }
                error!(
                    "event=save_changes module=session status=error duration_ms={} error={}",
                    started.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_active
    }

    /// Starts an explicit transaction spanning several saves and statements.
    pub fn begin_transaction(&mut self) -> RepoResult<()> {
        if self.transaction_active {
            return Err(RepoError::InvalidState(
                "a transaction is already active".to_string(),
            ));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.transaction_active = true;
        debug!("event=transaction module=session status=begin");
        Ok(())
    }

    pub fn commit_transaction(&mut self) -> RepoResult<()> {
        if !self.transaction_active {
            return Err(RepoError::InvalidState("no active transaction".to_string()));
        }
        self.conn.execute_batch("COMMIT;")?;
        self.transaction_active = false;
        debug!("event=transaction module=session status=commit");
        Ok(())
    }

    /// Rolls back the active transaction and detaches every tracked entity.
    pub fn rollback_transaction(&mut self) -> RepoResult<()> {
        if !self.transaction_active {
            return Err(RepoError::InvalidState("no active transaction".to_string()));
        }
        self.transaction_active = false;
        self.tracker.clear();
        self.conn.execute_batch("ROLLBACK;")?;
        debug!("event=transaction module=session status=rollback");
        Ok(())
    }

    /// Executes a raw statement on the session connection.
    pub fn execute<P: Params>(&mut self, statement: &str, params: P) -> RepoResult<usize> {
        Ok(self.conn.execute(statement, params)?)
    }

    /// Handle that aborts the statement currently running on this session.
    pub(crate) fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    /// Closes the connection, rolling back an unfinished transaction first.
    pub fn close(mut self) -> RepoResult<()> {
        if self.transaction_active {
            self.rollback_transaction()?;
        }
        let tracked = self.tracker.len();
        self.conn.close().map_err(|(_, err)| RepoError::from(err))?;
        debug!("event=session_close module=session status=ok tracked={tracked}");
        Ok(())
    }

    /// Persisted rows matching a resolved criteria, in store order.
    /// The stored row with the same identity as `values`, if any.
    fn persisted_row(&self, entity: &EntityModel, values: &[Value]) -> RepoResult<Option<Vec<Value>>> {
        let by_key = Criteria::field(entity.key_column().name).eq(values[entity.key_index].clone());
        let resolved = by_key.resolve(entity)?;
        Ok(self.select_rows(entity, &resolved)?.into_iter().next())
    }

    fn select_rows(&self, entity: &EntityModel, resolved: &Criteria) -> RepoResult<Vec<Vec<Value>>> {
        let filter = sql::compile(resolved, entity)?;
        let columns = entity
            .columns
            .iter()
            .map(|column| quote_ident(column.name))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "SELECT {columns} FROM {} WHERE {};",
            quote_ident(entity.table),
            filter.clause
        );

        let mut stmt = self.conn.prepare_cached(&statement)?;
        let mut rows = stmt.query(params_from_iter(filter.params.iter()))?;
        let mut selected = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(entity.columns.len());
            for (index, column) in entity.columns.iter().enumerate() {
                values.push(codec::from_storage(row.get_ref(index)?, column, entity.table)?);
            }
            selected.push(values);
        }
        Ok(selected)
    }

    /// Store rows merged with staged changes.
    fn view_rows(
        &mut self,
        entity: &EntityModel,
        criteria: &Criteria,
        tracking: QueryTracking,
    ) -> RepoResult<Vec<Vec<Value>>> {
        let resolved = criteria.resolve(entity)?;
        let persisted = self.select_rows(entity, &resolved)?;

        let mut seen = HashSet::with_capacity(persisted.len());
        let mut rows = Vec::with_capacity(persisted.len());
        for values in persisted {
            let key = identity(entity, &values)?;
            match self.tracker.get_mut(&key) {
                Some(entry) if entry.state == EntryState::Deleted => {}
                Some(entry) => {
                    if entry.original.is_empty() && entry.state == EntryState::Modified {
                        entry.original = values;
                        entry.refresh_state();
                    }
                    if resolved.matches(entity, &entry.current)? {
                        rows.push(entry.current.clone());
                    }
                }
                None => {
                    if tracking == QueryTracking::Tracking {
                        self.tracker
                            .insert(key.clone(), TrackedEntry::unchanged(values.clone()));
                    }
                    rows.push(values);
                }
            }
            seen.insert(key);
        }

        for (key, entry) in self.tracker.entries_for(entity.table) {
            if seen.contains(key)
                || !matches!(entry.state, EntryState::Added | EntryState::Modified)
            {
                continue;
            }
            if resolved.matches(entity, &entry.current)? {
                rows.push(entry.current.clone());
            }
        }
        Ok(rows)
    }
}

/// Mutable access to a shared session, failing instead of panicking on reentry.
pub(crate) fn borrow_session(
    cell: &RefCell<PersistenceSession>,
) -> RepoResult<RefMut<'_, PersistenceSession>> {
    cell.try_borrow_mut()
        .map_err(|_| RepoError::InvalidState("session is already in use".to_string()))
}

fn mapped<T: Entity>(model: &Model) -> RepoResult<&EntityModel> {
    model
        .entity_of::<T>()
        .ok_or(RepoError::Unmapped(T::descriptor().type_name))
}

/// Normalized field values of `item` in column order.
fn snapshot<T: Entity>(entity: &EntityModel, item: &T) -> RepoResult<Vec<Value>> {
    T::descriptor()
        .values(item)
        .into_iter()
        .zip(&entity.columns)
        .map(|(value, column)| codec::normalize(value, column))
        .collect()
}

fn identity(entity: &EntityModel, values: &[Value]) -> RepoResult<EntryKey> {
    let key = values
        .get(entity.key_index)
        .and_then(Value::key_text)
        .ok_or_else(|| RepoError::InvalidValue {
            field: entity.key_column().name.to_string(),
            message: "key value is required".to_string(),
        })?;
    Ok(EntryKey::new(entity.table, key))
}

/// Writes every pending entry in staging order.
fn flush(conn: &Connection, model: &Model, tracker: &ChangeTracker) -> RepoResult<usize> {
    let mut affected = 0;
    for (key, entry) in tracker.pending() {
        let entity = model.entity_by_table(key.table).ok_or_else(|| {
            RepoError::InvalidState(format!("table `{}` is not mapped", key.table))
        })?;
        let key_column = entity.key_column();
        let key_value = codec::to_storage(&entry.current[entity.key_index], key_column)?;

        let changed = match entry.state {
            EntryState::Added => {
                let columns = entity
                    .columns
                    .iter()
                    .map(|column| quote_ident(column.name))
                    .collect::<Vec<_>>();
                let placeholders = vec!["?"; columns.len()].join(", ");
                let params = stored_values(entity, &entry.current)?;
                conn.prepare_cached(&format!(
                    "INSERT INTO {} ({}) VALUES ({placeholders});",
                    quote_ident(entity.table),
                    columns.join(", ")
                ))?
                .execute(params_from_iter(params.iter()))?
            }
            EntryState::Modified => {
                let assignments = entity
                    .columns
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| *index != entity.key_index)
                    .map(|(_, column)| format!("{} = ?", quote_ident(column.name)))
                    .collect::<Vec<_>>();
                let mut params = stored_values(entity, &entry.current)?;
                params.remove(entity.key_index);
                params.push(key_value);
                let changed = if assignments.is_empty() {
                    conn.prepare_cached(&format!(
                        "SELECT COUNT(*) FROM {} WHERE {} = ?;",
                        quote_ident(entity.table),
                        quote_ident(key_column.name)
                    ))?
                    .query_row(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?
                        as usize
                } else {
                    conn.prepare_cached(&format!(
                        "UPDATE {} SET {} WHERE {} = ?;",
                        quote_ident(entity.table),
                        assignments.join(", "),
                        quote_ident(key_column.name)
                    ))?
                    .execute(params_from_iter(params.iter()))?
                };
                if changed == 0 {
                    return Err(lost_row(entity, key));
                }
                changed
            }
            EntryState::Deleted => {
                let changed = conn
                    .prepare_cached(&format!(
                        "DELETE FROM {} WHERE {} = ?;",
                        quote_ident(entity.table),
                        quote_ident(key_column.name)
                    ))?
                    .execute(params_from_iter([key_value]))?;
                if changed == 0 {
                    return Err(lost_row(entity, key));
                }
                changed
            }
            EntryState::Unchanged => 0,
        };
        affected += changed;
    }
    Ok(affected)
}

fn stored_values(entity: &EntityModel, values: &[Value]) -> RepoResult<Vec<rusqlite::types::Value>> {
    values
        .iter()
        .zip(&entity.columns)
        .map(|(value, column)| codec::to_storage(value, column))
        .collect()
}

fn lost_row(entity: &EntityModel, key: &EntryKey) -> RepoError {
    RepoError::PersistenceConflict(format!(
        "{} `{}` no longer exists in {}",
        entity.type_name, key.identity, entity.table
    ))
}
