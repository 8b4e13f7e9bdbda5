//! SQL text for repository statements.
//!
//! All values travel as `jsonb` parameters and are compared in the `jsonb`
//! domain (`to_jsonb(t."col") < $1::jsonb`). Rows come back as `to_jsonb(t)`,
//! so a cursor value read from a returned row compares exactly against the
//! column it came from.

use livequery_core::compiler::{Conjunction, RelationalPredicate};
use livequery_core::{Condition, Row, SortDir, SortKey};
use serde_json::Value;

use crate::trigger::{quote_ident, quote_literal};

/// Alias of the queried table in every statement.
const ALIAS: &str = "t";

/// SQL text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Default)]
struct Params(Vec<Value>);

impl Params {
    fn push(&mut self, value: Value) -> String {
        self.0.push(value);
        format!("${}::jsonb", self.0.len())
    }
}

fn column(field: &str) -> String {
    format!("{ALIAS}.{}", quote_ident(field))
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn render_condition(field: &str, condition: &Condition, params: &mut Params) -> String {
    let col = column(field);
    let json = format!("to_jsonb({col})");

    match condition {
        Condition::Eq(Value::Null) => format!("{col} IS NULL"),
        Condition::Ne(Value::Null) => format!("{col} IS NOT NULL"),
        // Path-bound keys arrive as strings whatever the column type. The
        // column side is rendered through jsonb so timestamps compare in the
        // same text form the returned rows (and their cursors) carry.
        Condition::Eq(value @ Value::String(_)) => {
            format!("({json} #>> '{{}}') = ({} #>> '{{}}')", params.push(value.clone()))
        }
        Condition::Ne(value @ Value::String(_)) => format!(
            "({json} #>> '{{}}') IS DISTINCT FROM ({} #>> '{{}}')",
            params.push(value.clone())
        ),
        Condition::Eq(value) => format!("{json} = {}", params.push(value.clone())),
        Condition::Ne(value) => format!("{json} IS DISTINCT FROM {}", params.push(value.clone())),
        Condition::Lt(value) => format!("{json} < {}", params.push(value.clone())),
        Condition::Lte(value) => format!("{json} <= {}", params.push(value.clone())),
        Condition::Gt(value) => format!("{json} > {}", params.push(value.clone())),
        Condition::Gte(value) => format!("{json} >= {}", params.push(value.clone())),
        Condition::Between(low, high) => format!(
            "{json} BETWEEN {} AND {}",
            params.push(low.clone()),
            params.push(high.clone())
        ),
        Condition::In(values) => {
            format!("{} @> jsonb_build_array({json})", params.push(Value::Array(values.clone())))
        }
        Condition::Like(term) => format!(
            "{col}::text ILIKE ({} #>> '{{}}')",
            params.push(Value::String(like_pattern(term)))
        ),
    }
}

fn render_conjunction(conjunction: &Conjunction, params: &mut Params) -> String {
    let parts: Vec<String> = conjunction
        .iter()
        .flat_map(|(field, conditions)| conditions.iter().map(move |c| (field, c)))
        .map(|(field, condition)| render_condition(field, condition, params))
        .collect();
    if parts.is_empty() {
        "TRUE".to_string()
    } else {
        parts.join(" AND ")
    }
}

fn where_clause(predicate: &RelationalPredicate, params: &mut Params) -> String {
    if predicate.matches_all() {
        return String::new();
    }
    let branches: Vec<String> = predicate
        .branches
        .iter()
        .map(|branch| format!("({})", render_conjunction(branch, params)))
        .collect();
    format!(" WHERE {}", branches.join(" OR "))
}

fn keys_clause(keys: &Row, params: &mut Params) -> String {
    let conjunction: Conjunction = keys
        .iter()
        .map(|(field, value)| (field.clone(), vec![Condition::Eq(value.clone())]))
        .collect();
    format!(" WHERE {}", render_conjunction(&conjunction, params))
}

fn projection(select: Option<&[String]>) -> String {
    match select {
        None => format!("to_jsonb({ALIAS})"),
        Some(fields) => {
            let pairs: Vec<String> = fields
                .iter()
                .map(|f| format!("{}, {}", quote_literal(f), column(f)))
                .collect();
            format!("jsonb_build_object({})", pairs.join(", "))
        }
    }
}

fn order_by(sort: &[SortKey]) -> String {
    if sort.is_empty() {
        return String::new();
    }
    let keys: Vec<String> = sort
        .iter()
        .map(|key| {
            let dir = match key.dir {
                SortDir::Asc => "ASC",
                SortDir::Desc => "DESC",
            };
            format!("{} {dir}", column(&key.field))
        })
        .collect();
    format!(" ORDER BY {}", keys.join(", "))
}

pub fn select(
    table: &str,
    predicate: &RelationalPredicate,
    sort: &[SortKey],
    limit: Option<usize>,
    fields: Option<&[String]>,
) -> Statement {
    let mut params = Params::default();
    let mut sql = format!(
        "SELECT {} FROM {} AS {ALIAS}",
        projection(fields),
        quote_ident(table)
    );
    sql.push_str(&where_clause(predicate, &mut params));
    sql.push_str(&order_by(sort));
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Statement { sql, params: params.0 }
}

fn column_list(row: &Row) -> String {
    row.keys().map(|k| quote_ident(k)).collect::<Vec<_>>().join(", ")
}

/// Insert one row, letting the table type coerce JSON values into columns.
pub fn insert(table: &str, row: &Row) -> Statement {
    let table_ident = quote_ident(table);
    let columns = column_list(row);
    let sql = format!(
        "INSERT INTO {table_ident} AS {ALIAS} ({columns}) \
         SELECT {columns} FROM jsonb_populate_record(NULL::{table_ident}, $1::jsonb) \
         RETURNING to_jsonb({ALIAS})"
    );
    Statement {
        sql,
        params: vec![Value::Object(row.clone())],
    }
}

/// Update rows matching `keys`. Returns `None` when `patch` is empty.
pub fn update(table: &str, keys: &Row, patch: &Row) -> Option<Statement> {
    if patch.is_empty() {
        return None;
    }
    let table_ident = quote_ident(table);
    let columns = column_list(patch);
    let mut params = Params::default();
    params.push(Value::Object(patch.clone()));

    let mut sql = format!(
        "UPDATE {table_ident} AS {ALIAS} SET ({columns}) = \
         (SELECT {columns} FROM jsonb_populate_record(NULL::{table_ident}, $1::jsonb))"
    );
    if !keys.is_empty() {
        sql.push_str(&keys_clause(keys, &mut params));
    }
    Some(Statement { sql, params: params.0 })
}

pub fn delete(table: &str, keys: &Row) -> Statement {
    let mut params = Params::default();
    let mut sql = format!("DELETE FROM {} AS {ALIAS}", quote_ident(table));
    if !keys.is_empty() {
        sql.push_str(&keys_clause(keys, &mut params));
    }
    Statement { sql, params: params.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livequery_core::{compile, CompilerSettings, DbFamily, QueryRequest, RouteConfig, RouteRegistry};
    use livequery_core::CompiledPredicate;
    use serde_json::json;
    use std::collections::HashMap;

    fn plan(request: QueryRequest) -> livequery_core::QueryPlan {
        let connections = HashMap::from([("default".to_string(), DbFamily::Relational)]);
        let routes = vec![RouteConfig::new(&["users/:user_id/orders"], "orders").search_fields(&["title", "note"])];
        let registry = RouteRegistry::register(&routes, &connections, "").unwrap();
        let entry = registry.resolve("users/orders").unwrap();
        compile(&request, entry, &CompilerSettings::default()).unwrap()
    }

    fn relational(plan: &livequery_core::QueryPlan) -> &RelationalPredicate {
        match &plan.predicate {
            CompiledPredicate::Relational(p) => p,
            other => panic!("unexpected predicate {other:?}"),
        }
    }

    #[test]
    fn test_select_with_key_and_filters() {
        let request = QueryRequest::get("users/orders", true)
            .with_key("user_id", json!("u1"))
            .with_filter("total", "gte", json!(10));
        let plan = plan(request);
        let statement = select("orders", relational(&plan), &plan.sort, Some(plan.fetch_limit()), None);

        assert_eq!(
            statement.sql,
            r#"SELECT to_jsonb(t) FROM "orders" AS t WHERE (to_jsonb(t."total") >= $1::jsonb AND (to_jsonb(t."user_id") #>> '{}') = ($2::jsonb #>> '{}')) ORDER BY t."created_at" DESC LIMIT 21"#
        );
        assert_eq!(statement.params, vec![json!(10), json!("u1")]);
    }

    #[test]
    fn test_keyset_tie_compares_in_row_text_form() {
        // Rows come back through to_jsonb, so a timestamp cursor value looks
        // like "2024-01-01T10:00:00", not the "2024-01-01 10:00:00" of ::text
        let cursor = livequery_core::cursor::encode(
            json!({"updated_at": "2024-01-01T10:00:00", "created_at": 5})
                .as_object()
                .unwrap(),
        );
        let mut request = QueryRequest::get("users/orders", true);
        request.options.order_by = Some("updated_at".to_string());
        request.options.cursor = Some(cursor);
        let plan = plan(request);
        let statement = select("orders", relational(&plan), &plan.sort, None, None);

        assert!(statement
            .sql
            .contains(r#"(to_jsonb(t."updated_at") #>> '{}') = ($"#));
        assert!(!statement.sql.contains("::text ="));
        assert!(statement.sql.contains(r#"to_jsonb(t."updated_at") < $"#));
        assert!(statement.params.contains(&json!("2024-01-01T10:00:00")));
    }

    #[test]
    fn test_search_expands_to_branches() {
        let mut request = QueryRequest::get("users/orders", true);
        request.options.search = Some("50%".to_string());
        let plan = plan(request);
        let statement = select("orders", relational(&plan), &[], None, None);

        assert_eq!(
            statement.sql,
            r#"SELECT to_jsonb(t) FROM "orders" AS t WHERE (t."title"::text ILIKE ($1::jsonb #>> '{}')) OR (t."note"::text ILIKE ($2::jsonb #>> '{}'))"#
        );
        assert_eq!(statement.params, vec![json!("%50\\%%"), json!("%50\\%%")]);
    }

    #[test]
    fn test_unfiltered_select_with_projection() {
        let predicate = RelationalPredicate::default();
        let fields = vec!["id".to_string(), "total".to_string()];
        let statement = select("orders", &predicate, &[], Some(5), Some(&fields));
        assert_eq!(
            statement.sql,
            r#"SELECT jsonb_build_object('id', t."id", 'total', t."total") FROM "orders" AS t LIMIT 5"#
        );
        assert!(statement.params.is_empty());
    }

    #[test]
    fn test_in_between_and_null() {
        let mut branch = Conjunction::new();
        branch.insert("status".to_string(), vec![Condition::In(vec![json!("a"), json!("b")])]);
        branch.insert("total".to_string(), vec![Condition::Between(json!(1), json!(9))]);
        branch.insert("deleted_at".to_string(), vec![Condition::Eq(Value::Null)]);
        let predicate = RelationalPredicate { branches: vec![branch] };

        let statement = select("orders", &predicate, &[], None, None);
        assert_eq!(
            statement.sql,
            r#"SELECT to_jsonb(t) FROM "orders" AS t WHERE (t."deleted_at" IS NULL AND $1::jsonb @> jsonb_build_array(to_jsonb(t."status")) AND to_jsonb(t."total") BETWEEN $2::jsonb AND $3::jsonb)"#
        );
        assert_eq!(statement.params, vec![json!(["a", "b"]), json!(1), json!(9)]);
    }

    #[test]
    fn test_insert_statement() {
        let row = json!({"id": "o1", "total": 3}).as_object().cloned().unwrap();
        let statement = insert("orders", &row);
        assert_eq!(
            statement.sql,
            r#"INSERT INTO "orders" AS t ("id", "total") SELECT "id", "total" FROM jsonb_populate_record(NULL::"orders", $1::jsonb) RETURNING to_jsonb(t)"#
        );
        assert_eq!(statement.params, vec![json!({"id": "o1", "total": 3})]);
    }

    #[test]
    fn test_update_and_delete_statements() {
        let keys = json!({"id": "o1"}).as_object().cloned().unwrap();
        let patch = json!({"total": 4}).as_object().cloned().unwrap();

        let statement = update("orders", &keys, &patch).unwrap();
        assert_eq!(
            statement.sql,
            r#"UPDATE "orders" AS t SET ("total") = (SELECT "total" FROM jsonb_populate_record(NULL::"orders", $1::jsonb)) WHERE (to_jsonb(t."id") #>> '{}') = ($2::jsonb #>> '{}')"#
        );
        assert_eq!(statement.params, vec![json!({"total": 4}), json!("o1")]);
        assert!(update("orders", &keys, &Row::new()).is_none());

        let statement = delete("orders", &keys);
        assert_eq!(
            statement.sql,
            r#"DELETE FROM "orders" AS t WHERE (to_jsonb(t."id") #>> '{}') = ($1::jsonb #>> '{}')"#
        );
    }
}
