//! In-memory repository.
//!
//! Evaluates relational predicates over rows held in a `Vec`. Every write is
//! journaled as a [`RawChangeEvent`], which makes it a self-contained change
//! feed for tests and local runs.

use std::cmp::Ordering;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::compiler::{CompiledPredicate, Condition, Conjunction, SortKey};
use crate::fanout::{ChangeType, RawChangeEvent};
use crate::repository::Repository;
use crate::request::SortDir;
use crate::value::{compare, loosely_equal};
use crate::{Row, IDENTITY_FIELD};

#[derive(Debug, Default)]
struct State {
    rows: Vec<Row>,
    journal: Vec<RawChangeEvent>,
}

#[derive(Debug)]
pub struct MemoryRepository {
    table: String,
    state: Mutex<State>,
}

fn condition_matches(value: &Value, condition: &Condition) -> bool {
    let ordered = |target: &Value, accept: fn(Ordering) -> bool| {
        compare(value, target).map(accept).unwrap_or(false)
    };
    match condition {
        Condition::Eq(v) => loosely_equal(value, v),
        Condition::Ne(v) => !loosely_equal(value, v),
        Condition::Lt(v) => ordered(v, Ordering::is_lt),
        Condition::Lte(v) => ordered(v, Ordering::is_le),
        Condition::Gt(v) => ordered(v, Ordering::is_gt),
        Condition::Gte(v) => ordered(v, Ordering::is_ge),
        Condition::Between(low, high) => ordered(low, Ordering::is_ge) && ordered(high, Ordering::is_le),
        Condition::In(values) => values.iter().any(|v| loosely_equal(value, v)),
        Condition::Like(term) => {
            let haystack = match value {
                Value::String(s) => s.to_lowercase(),
                Value::Null => return false,
                other => other.to_string().to_lowercase(),
            };
            haystack.contains(&term.to_lowercase())
        }
    }
}

fn conjunction_matches(row: &Row, conjunction: &Conjunction) -> bool {
    conjunction.iter().all(|(field, conditions)| {
        let value = row.get(field).unwrap_or(&Value::Null);
        conditions.iter().all(|c| condition_matches(value, c))
    })
}

fn keys_match(row: &Row, keys: &Row) -> bool {
    keys.iter().all(|(field, expected)| {
        row.get(field)
            .map(|v| loosely_equal(v, expected))
            .unwrap_or(false)
    })
}

fn compare_rows(a: &Row, b: &Row, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let left = a.get(&key.field).unwrap_or(&Value::Null);
        let right = b.get(&key.field).unwrap_or(&Value::Null);
        let ordering = compare(left, right).unwrap_or(Ordering::Equal);
        let ordering = match key.dir {
            SortDir::Asc => ordering,
            SortDir::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

impl MemoryRepository {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Seed rows without journaling them.
    pub fn with_rows(table: &str, rows: Vec<Row>) -> Self {
        let repository = Self::new(table);
        if let Ok(mut state) = repository.state.lock() {
            state.rows = rows;
        }
        repository
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory repository '{}' lock poisoned", self.table))
    }

    /// Take the change events recorded since the last call.
    pub fn drain_changes(&self) -> anyhow::Result<Vec<RawChangeEvent>> {
        Ok(std::mem::take(&mut self.lock()?.journal))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matching<'r>(
        rows: &'r [Row],
        predicate: &CompiledPredicate,
    ) -> anyhow::Result<Vec<&'r Row>> {
        let CompiledPredicate::Relational(predicate) = predicate else {
            bail!("memory repository only evaluates relational predicates");
        };
        Ok(rows
            .iter()
            .filter(|row| {
                predicate.matches_all()
                    || predicate
                        .branches
                        .iter()
                        .any(|branch| conjunction_matches(row, branch))
            })
            .collect())
    }

    fn event(&self, change_type: ChangeType, old_data: Option<Row>, new_data: Option<Row>) -> RawChangeEvent {
        let id = new_data
            .as_ref()
            .or(old_data.as_ref())
            .and_then(|row| row.get(IDENTITY_FIELD).cloned());
        let changes = match (&old_data, &new_data) {
            (Some(old), Some(new)) => Some(
                new.iter()
                    .filter(|(field, value)| old.get(*field) != Some(*value))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect(),
            ),
            _ => None,
        };
        RawChangeEvent {
            table: self.table.clone(),
            change_type,
            id,
            changes,
            old_data,
            new_data,
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn find(
        &self,
        predicate: &CompiledPredicate,
        sort: &[SortKey],
        limit: usize,
        select: Option<&[String]>,
    ) -> anyhow::Result<Vec<Row>> {
        let state = self.lock()?;
        let mut rows = Self::matching(&state.rows, predicate)?;
        rows.sort_by(|a, b| compare_rows(a, b, sort));
        rows.truncate(limit);

        Ok(rows
            .into_iter()
            .map(|row| match select {
                Some(fields) => row
                    .iter()
                    .filter(|(field, _)| fields.contains(field))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect(),
                None => row.clone(),
            })
            .collect())
    }

    async fn find_one(&self, predicate: &CompiledPredicate) -> anyhow::Result<Option<Row>> {
        let state = self.lock()?;
        let rows = Self::matching(&state.rows, predicate)?;
        Ok(rows.first().map(|row| (*row).clone()))
    }

    async fn save(&self, row: Row) -> anyhow::Result<Row> {
        let event = self.event(ChangeType::Added, None, Some(row.clone()));
        let mut state = self.lock()?;
        state.rows.push(row.clone());
        state.journal.push(event);
        Ok(row)
    }

    async fn update(&self, keys: &Row, patch: &Row) -> anyhow::Result<Value> {
        if keys.is_empty() {
            bail!("Refusing to update '{}' without keys", self.table);
        }
        let mut state = self.lock()?;
        let mut events = Vec::new();
        for row in state.rows.iter_mut().filter(|row| keys_match(row, keys)) {
            let before = row.clone();
            row.extend(patch.clone());
            if *row != before {
                events.push(self.event(ChangeType::Modified, Some(before), Some(row.clone())));
            }
        }
        let affected = events.len();
        state.journal.extend(events);
        Ok(json!({ "affected": affected }))
    }

    async fn delete(&self, keys: &Row) -> anyhow::Result<Value> {
        if keys.is_empty() {
            bail!("Refusing to delete from '{}' without keys", self.table);
        }
        let mut state = self.lock()?;
        let (removed, kept): (Vec<Row>, Vec<Row>) = std::mem::take(&mut state.rows)
            .into_iter()
            .partition(|row| keys_match(row, keys));
        state.rows = kept;
        let affected = removed.len();
        for row in removed {
            let event = self.event(ChangeType::Removed, Some(row), None);
            state.journal.push(event);
        }
        Ok(json!({ "affected": affected }))
    }
}
