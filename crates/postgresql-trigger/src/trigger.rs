//! Change capture SQL generation.
//!
//! Every realtime table gets a row-level trigger that publishes one
//! notification per mutated row on [`NOTIFY_CHANNEL`]. The notification
//! carries every reference the row belongs to, so the listener does not
//! need one round trip per template:
//!
//! ```json
//! {"type": "modified", "table": "orders", "id": "o1",
//!  "data": {"user_id": "u2"},
//!  "refs": [{"ref": "users/u2/orders", "old_ref": "users/u1/orders"}],
//!  "new_doc": {"id": "o1", "user_id": "u2", "total": 42}}
//! ```
//!
//! The builders here are pure string functions; [`crate::listener`]
//! executes them.

use livequery_core::reference::{Segment, Template};
use livequery_core::IDENTITY_FIELD;

/// Channel every generated trigger notifies on.
pub const NOTIFY_CHANNEL: &str = "realtime_sync";

/// Quote an identifier for use in generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for use in generated SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sanitize(table: &str) -> String {
    table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub fn function_name(table: &str) -> String {
    format!("livequery_notify_{}", sanitize(table))
}

pub fn trigger_name(table: &str) -> String {
    format!("livequery_trigger_{}", sanitize(table))
}

/// SQL expression rendering `template` against the `NEW` or `OLD` record.
///
/// A NULL key column makes the whole expression NULL.
fn ref_expression(template: &Template, record: &str) -> String {
    let mut parts = Vec::new();
    let mut literal = String::new();

    for (i, segment) in template.segments().iter().enumerate() {
        if i > 0 {
            literal.push('/');
        }
        match segment {
            Segment::Label(label) => literal.push_str(label),
            Segment::Key(key) => {
                if !literal.is_empty() {
                    parts.push(quote_literal(&literal));
                    literal.clear();
                }
                parts.push(format!("({record}.{})::text", quote_ident(key)));
            }
        }
    }
    if !literal.is_empty() {
        parts.push(quote_literal(&literal));
    }

    parts.join(" || ")
}

fn json_array(objects: Vec<String>) -> String {
    format!(
        "jsonb_build_array(\n                    {}\n                )",
        objects.join(",\n                    ")
    )
}

/// `[{ref}]` bound against one record.
fn refs_array(templates: &[Template], record: &str) -> String {
    json_array(
        templates
            .iter()
            .map(|t| format!("jsonb_build_object('ref', {})", ref_expression(t, record)))
            .collect(),
    )
}

/// `[{ref, old_ref}]` bound against `NEW` and `OLD`.
fn moved_refs_array(templates: &[Template]) -> String {
    json_array(
        templates
            .iter()
            .map(|t| {
                format!(
                    "jsonb_build_object('ref', {}, 'old_ref', {})",
                    ref_expression(t, "NEW"),
                    ref_expression(t, "OLD")
                )
            })
            .collect(),
    )
}

/// Build the trigger function for `table`.
///
/// `templates` are the collection-level realtime templates of the table.
/// Returns the function name and its `CREATE OR REPLACE FUNCTION` statement.
pub fn create_notify_function_sql(table: &str, templates: &[Template]) -> (String, String) {
    let func_name = function_name(table);
    let channel = quote_literal(NOTIFY_CHANNEL);
    let id_field = quote_literal(IDENTITY_FIELD);

    let inserted_refs = refs_array(templates, "NEW");
    let updated_refs = moved_refs_array(templates);
    let deleted_refs = refs_array(templates, "OLD");

    let sql = format!(
        "CREATE OR REPLACE FUNCTION {func_name}() RETURNS TRIGGER AS $$
            DECLARE
                refs jsonb;
                diff jsonb;
                new_json jsonb;
                old_json jsonb;
            BEGIN
                IF TG_OP = 'INSERT' THEN
                    new_json := to_jsonb(NEW);
                    refs := {inserted_refs};
                    PERFORM pg_notify({channel}, jsonb_build_object(
                        'type', 'added',
                        'table', TG_TABLE_NAME,
                        'id', new_json->{id_field},
                        'data', new_json,
                        'refs', refs
                    )::text);
                    RETURN NEW;
                ELSIF TG_OP = 'UPDATE' THEN
                    new_json := to_jsonb(NEW);
                    old_json := to_jsonb(OLD);
                    refs := {updated_refs};
                    SELECT COALESCE(jsonb_object_agg(n.key, n.value), '{{}}'::jsonb) INTO diff
                    FROM jsonb_each(new_json) AS n
                    LEFT JOIN jsonb_each(old_json) AS o ON o.key = n.key
                    WHERE o.value IS DISTINCT FROM n.value;
                    PERFORM pg_notify({channel}, jsonb_build_object(
                        'type', 'modified',
                        'table', TG_TABLE_NAME,
                        'id', new_json->{id_field},
                        'data', diff,
                        'refs', refs,
                        'new_doc', new_json
                    )::text);
                    RETURN NEW;
                ELSIF TG_OP = 'DELETE' THEN
                    old_json := to_jsonb(OLD);
                    refs := {deleted_refs};
                    PERFORM pg_notify({channel}, jsonb_build_object(
                        'type', 'removed',
                        'table', TG_TABLE_NAME,
                        'id', old_json->{id_field},
                        'data', old_json,
                        'refs', refs
                    )::text);
                    RETURN OLD;
                END IF;
                RETURN NULL;
            END;
            $$ LANGUAGE plpgsql"
    );

    (func_name, sql)
}

/// `DROP TRIGGER IF EXISTS` followed by `CREATE TRIGGER` for `table`.
pub fn create_table_trigger_sql(table: &str) -> (String, String) {
    let trigger = trigger_name(table);
    let func = function_name(table);
    let table = quote_ident(table);

    let drop = format!("DROP TRIGGER IF EXISTS {trigger} ON {table}");
    let create = format!(
        "CREATE TRIGGER {trigger}
                AFTER INSERT OR UPDATE OR DELETE ON {table}
                FOR EACH ROW EXECUTE FUNCTION {func}()"
    );
    (drop, create)
}

/// Every statement needed to install change capture on `table`, in order.
pub fn install_statements(table: &str, templates: &[Template]) -> Vec<String> {
    let (_, function) = create_notify_function_sql(table, templates);
    let (drop, create) = create_table_trigger_sql(table);
    vec![function, drop, create]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates(refs: &[&str]) -> Vec<Template> {
        refs.iter().map(|r| Template::parse(r).unwrap()).collect()
    }

    #[test]
    fn test_ref_expression() {
        let template = Template::parse("users/:user_id/orders").unwrap();
        assert_eq!(
            ref_expression(&template, "NEW"),
            r#"'users/' || (NEW."user_id")::text || '/orders'"#
        );

        let nested = Template::parse("shops/:shop_id/users/:user_id/orders").unwrap();
        assert_eq!(
            ref_expression(&nested, "OLD"),
            r#"'shops/' || (OLD."shop_id")::text || '/users/' || (OLD."user_id")::text || '/orders'"#
        );

        let root = Template::parse("orders").unwrap();
        assert_eq!(ref_expression(&root, "NEW"), "'orders'");
    }

    #[test]
    fn test_function_names_are_sanitized() {
        assert_eq!(function_name("order-items"), "livequery_notify_order_items");
        assert_eq!(trigger_name("order-items"), "livequery_trigger_order_items");
    }

    #[test]
    fn test_notify_function_fixture() {
        let (name, sql) =
            create_notify_function_sql("orders", &templates(&["users/:user_id/orders", "shops/:shop_id/orders"]));
        assert_eq!(name, "livequery_notify_orders");
        assert!(sql.starts_with("CREATE OR REPLACE FUNCTION livequery_notify_orders() RETURNS TRIGGER AS $$"));

        // INSERT binds refs against NEW only
        assert!(sql.contains(
            r#"jsonb_build_object('ref', 'users/' || (NEW."user_id")::text || '/orders')"#
        ));
        // UPDATE carries both sides of each template
        assert!(sql.contains(
            r#"jsonb_build_object('ref', 'shops/' || (NEW."shop_id")::text || '/orders', 'old_ref', 'shops/' || (OLD."shop_id")::text || '/orders')"#
        ));
        // DELETE binds against OLD
        assert!(sql.contains(
            r#"jsonb_build_object('ref', 'users/' || (OLD."user_id")::text || '/orders')"#
        ));

        assert_eq!(sql.matches("pg_notify('realtime_sync'").count(), 3);
        assert!(sql.contains("'type', 'added'"));
        assert!(sql.contains("'type', 'modified'"));
        assert!(sql.contains("'type', 'removed'"));
        assert!(sql.contains("'new_doc', new_json"));
        assert!(sql.contains("WHERE o.value IS DISTINCT FROM n.value"));
        assert!(sql.contains("'{}'::jsonb"));
        assert!(sql.contains("'id', new_json->'id'"));
        assert!(sql.trim_end().ends_with("$$ LANGUAGE plpgsql"));
    }

    #[test]
    fn test_table_trigger_fixture() {
        let (drop, create) = create_table_trigger_sql("orders");
        assert_eq!(drop, r#"DROP TRIGGER IF EXISTS livequery_trigger_orders ON "orders""#);
        assert!(create.starts_with("CREATE TRIGGER livequery_trigger_orders"));
        assert!(create.contains(r#"AFTER INSERT OR UPDATE OR DELETE ON "orders""#));
        assert!(create.ends_with("FOR EACH ROW EXECUTE FUNCTION livequery_notify_orders()"));
    }

    #[test]
    fn test_install_statement_order() {
        let statements = install_statements("orders", &templates(&["orders"]));
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE OR REPLACE FUNCTION"));
        assert!(statements[1].starts_with("DROP TRIGGER"));
        assert!(statements[2].starts_with("CREATE TRIGGER"));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }
}
