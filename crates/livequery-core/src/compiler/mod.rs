//! Query compiler.
//!
//! Turns a [`QueryRequest`] into a [`QueryPlan`]: a backend-specific
//! predicate plus ordering, page size and projection.
//!
//! The pipeline, in precedence order:
//!
//! 1. client filters
//! 2. cursor conditions
//! 3. key equalities (replace anything else on the same field)
//! 4. per-operator rendering for the route's family
//! 5. grouping by field
//! 6. search
//! 7. document stores: identity field → native primary-key match
//!
//! Internally everything is first collected into a [`LogicalPredicate`]: one
//! base conjunction ANDed with zero or more OR-groups. The relational
//! renderer expands it into disjunctive normal form; the document renderer
//! maps the groups onto `$or`.

mod document;
mod relational;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::cursor;
use crate::error::{LivequeryError, Result};
use crate::request::{Operator, QueryRequest, SortDir};
use crate::route::{DbFamily, RouteEntry, SearchMode};
use crate::{Row, IDENTITY_FIELD};

pub use relational::RelationalPredicate;

/// A typed condition on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    /// Lower and upper bound
    Between(Value, Value),
    In(Vec<Value>),
    /// Case-insensitive substring match
    Like(String),
}

impl Condition {
    pub fn new(op: Operator, field: &str, value: Value) -> Result<Self> {
        Ok(match op {
            Operator::Eq => Condition::Eq(value),
            Operator::Ne => Condition::Ne(value),
            Operator::Lt => Condition::Lt(value),
            Operator::Lte => Condition::Lte(value),
            Operator::Gt => Condition::Gt(value),
            Operator::Gte => Condition::Gte(value),
            Operator::Between => {
                let bounds = match value {
                    Value::Array(bounds) => <[Value; 2]>::try_from(bounds).map_err(Value::Array),
                    other => Err(other),
                };
                match bounds {
                    Ok([low, high]) => Condition::Between(low, high),
                    Err(other) => {
                        return Err(LivequeryError::InvalidFilter {
                            field: field.to_string(),
                            reason: format!("between expects [low, high], got {other}"),
                        })
                    }
                }
            }
            Operator::In => match value {
                Value::Array(values) => Condition::In(values),
                scalar => Condition::In(vec![scalar]),
            },
            Operator::Like => match value {
                Value::String(s) => Condition::Like(s),
                other => Condition::Like(other.to_string()),
            },
        })
    }

    fn strict(dir: SortDir, value: Value) -> Self {
        match dir {
            SortDir::Asc => Condition::Gt(value),
            SortDir::Desc => Condition::Lt(value),
        }
    }
}

/// Conditions ANDed together, grouped by field.
pub type Conjunction = BTreeMap<String, Vec<Condition>>;

fn single(field: &str, condition: Condition) -> Conjunction {
    BTreeMap::from([(field.to_string(), vec![condition])])
}

fn merge_into(target: &mut Conjunction, other: &Conjunction) {
    for (field, conditions) in other {
        target
            .entry(field.clone())
            .or_default()
            .extend(conditions.iter().cloned());
    }
}

/// Backend-independent predicate shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogicalPredicate {
    pub base: Conjunction,
    /// Each group is an OR of conjunctions; groups are ANDed with the base
    pub groups: Vec<Vec<Conjunction>>,
    /// Native full-text search term (document stores only)
    pub text_search: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledPredicate {
    Relational(RelationalPredicate),
    /// Query document in MongoDB extended JSON
    Document(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub dir: SortDir,
}

impl SortKey {
    fn new(field: &str, dir: SortDir) -> Self {
        Self {
            field: field.to_string(),
            dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilerSettings {
    /// Field that totally orders rows and breaks sort ties
    pub tie_break_field: String,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            tie_break_field: "created_at".to_string(),
            default_limit: 20,
            max_limit: 1000,
        }
    }
}

/// Output of the compiler, ready to hand to a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub predicate: CompiledPredicate,
    pub sort: Vec<SortKey>,
    /// Rows returned to the caller; one more is fetched to detect `has_more`
    pub limit: usize,
    pub select: Option<Vec<String>>,
}

/// One page of a collection query.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Row>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

impl QueryPlan {
    pub fn fetch_limit(&self) -> usize {
        self.limit + 1
    }

    /// Trim the over-fetched rows and derive the next cursor from the last
    /// returned row.
    pub fn paginate(&self, mut rows: Vec<Row>) -> Page {
        let has_more = rows.len() > self.limit;
        rows.truncate(self.limit);

        let next_cursor = match rows.last() {
            Some(last) if has_more => {
                let mut values = Row::new();
                for key in &self.sort {
                    if let Some(value) = last.get(&key.field) {
                        values.insert(key.field.clone(), value.clone());
                    }
                }
                Some(cursor::encode(&values))
            }
            _ => None,
        };

        Page {
            items: rows,
            has_more,
            next_cursor,
        }
    }
}

/// Ordering: a single key when `order_by` is unset or is the tie-break field,
/// otherwise `order_by` followed by the tie-break field descending.
pub fn sort_keys(order_by: Option<&str>, dir: SortDir, tie_break: &str) -> Vec<SortKey> {
    match order_by {
        Some(field) if field != tie_break => vec![
            SortKey::new(field, dir),
            SortKey::new(tie_break, SortDir::Desc),
        ],
        _ => vec![SortKey::new(tie_break, dir)],
    }
}

/// Cursor conditions for the given ordering.
///
/// With a single sort key every cursor field gets the strict inequality in
/// the sort direction. With a composite ordering the keyset disjunction
/// `(order_by ▷ v) OR (order_by = v AND tie_break < t)` is returned as an
/// OR-group.
fn cursor_conditions(sort: &[SortKey], values: Row) -> (Conjunction, Option<Vec<Conjunction>>) {
    if let [primary, tie_break] = sort {
        if let (Some(v), Some(t)) = (values.get(&primary.field), values.get(&tie_break.field)) {
            let after = single(&primary.field, Condition::strict(primary.dir, v.clone()));
            let mut tied = single(&primary.field, Condition::Eq(v.clone()));
            tied.insert(
                tie_break.field.clone(),
                vec![Condition::strict(tie_break.dir, t.clone())],
            );
            return (Conjunction::new(), Some(vec![after, tied]));
        }
    }

    let dir = sort.first().map(|k| k.dir).unwrap_or_default();
    let conjunction = values
        .into_iter()
        .map(|(field, value)| (field, vec![Condition::strict(dir, value)]))
        .collect();
    (conjunction, None)
}

/// Compile a `get` request for the given route.
pub fn compile(
    request: &QueryRequest,
    entry: &RouteEntry,
    settings: &CompilerSettings,
) -> Result<QueryPlan> {
    let options = &request.options;

    let limit = options.limit.unwrap_or(settings.default_limit);
    if limit == 0 || limit > settings.max_limit {
        return Err(LivequeryError::InvalidLimit {
            limit,
            max: settings.max_limit,
        });
    }

    let mut logical = LogicalPredicate::default();
    let mut likes: Vec<Conjunction> = Vec::new();

    for filter in &request.filters {
        let op: Operator = filter.op.parse()?;
        match Condition::new(op, &filter.field, filter.value.clone())? {
            like @ Condition::Like(_) => likes.push(single(&filter.field, like)),
            condition => logical
                .base
                .entry(filter.field.clone())
                .or_default()
                .push(condition),
        }
    }

    let sort = sort_keys(
        options.order_by.as_deref(),
        options.sort,
        &settings.tie_break_field,
    );

    if request.is_collection {
        let values = cursor::decode(options.cursor.as_deref())?;
        if !values.is_empty() {
            let (conjunction, keyset) = cursor_conditions(&sort, values);
            merge_into(&mut logical.base, &conjunction);
            logical.groups.extend(keyset);
        }
    }

    if let Some(term) = options.search.as_deref().filter(|t| !t.is_empty()) {
        match (entry.search_mode, entry.family) {
            (SearchMode::FanOut, _) if !entry.search_fields.is_empty() => {
                likes.extend(
                    entry
                        .search_fields
                        .iter()
                        .map(|field| single(field, Condition::Like(term.to_string()))),
                );
            }
            (_, DbFamily::Document) => logical.text_search = Some(term.to_string()),
            (_, family) => return Err(LivequeryError::SearchNotSupported(family)),
        }
    }

    if !likes.is_empty() {
        logical.groups.insert(0, likes);
    }

    for (field, value) in &request.keys {
        logical
            .base
            .insert(field.clone(), vec![Condition::Eq(value.clone())]);
        for alternative in logical.groups.iter_mut().flatten() {
            alternative.remove(field);
        }
    }

    let predicate = match entry.family {
        DbFamily::Relational => CompiledPredicate::Relational(relational::render(&logical)),
        DbFamily::Document => CompiledPredicate::Document(document::render(&logical)),
    };

    let select = options.select.as_ref().map(|fields| {
        let mut fields = fields.clone();
        let required = sort
            .iter()
            .map(|k| k.field.as_str())
            .chain(std::iter::once(IDENTITY_FIELD));
        for field in required {
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        }
        fields
    });

    Ok(QueryPlan {
        predicate,
        sort,
        limit,
        select,
    })
}
