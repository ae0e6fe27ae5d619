//! Literal SQL rendering.
//!
//! Statements render with inline literals (single quotes escaped) so the
//! provenance log carries exactly the text the shipped engines execute.

use serde_json::Value;

use crate::condition::{Changes, Condition, SetValue};
use crate::query::{AggregateFunc, QueryPlan};

/// A statement an engine can render ahead of execution.
#[derive(Debug)]
pub enum Statement<'a> {
    Select(&'a QueryPlan),
    Aggregate {
        plan: &'a QueryPlan,
        func: AggregateFunc,
        field: &'a str,
    },
    BatchInsert {
        table: &'a str,
        columns: &'a [String],
        rows: &'a [Vec<Value>],
    },
    Update {
        table: &'a str,
        changes: &'a Changes,
        condition: &'a Condition,
    },
    Delete {
        table: &'a str,
        condition: &'a Condition,
    },
}

/// Renders a statement to literal SQL.
pub fn render(statement: &Statement<'_>) -> String {
    match statement {
        Statement::Select(plan) => render_select(plan),
        Statement::Aggregate { plan, func, field } => render_aggregate(plan, *func, field),
        Statement::BatchInsert {
            table,
            columns,
            rows,
        } => render_batch_insert(table, columns, rows),
        Statement::Update {
            table,
            changes,
            condition,
        } => render_update(table, changes, condition),
        Statement::Delete { table, condition } => render_delete(table, condition),
    }
}

fn render_select(plan: &QueryPlan) -> String {
    let mut sql = String::from("SELECT ");
    if plan.fields.is_empty() {
        sql.push('*');
    } else {
        sql.push_str(&plan.fields);
    }
    sql.push_str(" FROM ");
    sql.push_str(&plan.table);
    if let Some(where_sql) = render_condition(&plan.condition) {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    if !plan.order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&plan.order);
    }
    if let Some(limit) = plan.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = plan.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
    sql
}

fn render_aggregate(plan: &QueryPlan, func: AggregateFunc, field: &str) -> String {
    let mut sql = format!("SELECT {}({}) FROM {}", func.as_sql(), field, plan.table);
    if let Some(where_sql) = render_condition(&plan.condition) {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    sql
}

fn render_batch_insert(table: &str, columns: &[String], rows: &[Vec<Value>]) -> String {
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = row.iter().map(format_value).collect();
            format!("({})", values.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        tuples.join(", ")
    )
}

fn render_update(table: &str, changes: &Changes, condition: &Condition) -> String {
    let assignments: Vec<String> = changes
        .iter()
        .map(|(column, change)| match change {
            SetValue::Value(value) => format!("{} = {}", column, format_value(value)),
            SetValue::Expr(expr) => format!("{} = {}", column, expr.0),
        })
        .collect();
    let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
    if let Some(where_sql) = render_condition(condition) {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    sql
}

fn render_delete(table: &str, condition: &Condition) -> String {
    let mut sql = format!("DELETE FROM {table}");
    if let Some(where_sql) = render_condition(condition) {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    sql
}

/// Renders a condition tree; `None` when it matches everything.
pub fn render_condition(condition: &Condition) -> Option<String> {
    match condition {
        Condition::Map(map) => {
            if map.is_empty() {
                return None;
            }
            let pairs: Vec<String> = map
                .iter()
                .map(|(column, value)| format!("{} = {}", column, format_value(value)))
                .collect();
            Some(pairs.join(" AND "))
        }
        Condition::Expr(text, params) => {
            if text.is_empty() {
                return None;
            }
            Some(bind_params(text, params))
        }
        Condition::All(parts) => {
            let rendered: Vec<String> = parts.iter().filter_map(render_condition).collect();
            match rendered.len() {
                0 => None,
                1 => Some(rendered.into_iter().next().unwrap_or_default()),
                _ => Some(
                    rendered
                        .iter()
                        .map(|part| format!("({part})"))
                        .collect::<Vec<_>>()
                        .join(" AND "),
                ),
            }
        }
    }
}

/// Substitutes `?` placeholders with the parameters in order.
fn bind_params(text: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut values = params.iter();
    for ch in text.chars() {
        if ch == '?' {
            match values.next() {
                Some(value) => out.push_str(&format_value(value)),
                None => out.push(ch),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Formats a value as a SQL literal. Single quotes are escaped; arrays and
/// objects have no literal form and render as NULL.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "NULL".to_string(),
        _ => "NULL".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{raw, Condition, SetValue};
    use serde_json::json;

    fn cond(value: serde_json::Value) -> Condition {
        Condition::from(value)
    }

    #[test]
    fn test_select_renders_every_clause_in_order() {
        let plan = QueryPlan::new("tickets")
            .condition(Condition::All(vec![
                cond(json!({"status": 1})),
                cond(json!({"tenant": 7})),
            ]))
            .fields("id,subject")
            .order("id DESC")
            .limit(10)
            .offset(20);
        assert_eq!(
            render(&Statement::Select(&plan)),
            "SELECT id,subject FROM tickets WHERE (status = 1) AND (tenant = 7) \
             ORDER BY id DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_empty_selection_renders_star_and_empty_condition_drops_where() {
        let plan = QueryPlan::new("tickets");
        assert_eq!(render(&Statement::Select(&plan)), "SELECT * FROM tickets");
    }

    #[test]
    fn test_single_part_condition_is_not_parenthesized() {
        let plan = QueryPlan::new("tickets")
            .condition(Condition::All(vec![cond(json!({"status": 1}))]));
        assert_eq!(
            render(&Statement::Select(&plan)),
            "SELECT * FROM tickets WHERE status = 1"
        );
    }

    #[test]
    fn test_string_literals_escape_single_quotes() {
        let plan = QueryPlan::new("tickets").condition(cond(json!({"owner": "O'Brien"})));
        assert_eq!(
            render(&Statement::Select(&plan)),
            "SELECT * FROM tickets WHERE owner = 'O''Brien'"
        );
    }

    #[test]
    fn test_expr_condition_binds_positional_params() {
        let plan = QueryPlan::new("tickets").condition(Condition::expr(
            "status >= ? AND owner = ?",
            vec![json!(2), json!("ann")],
        ));
        assert_eq!(
            render(&Statement::Select(&plan)),
            "SELECT * FROM tickets WHERE status >= 2 AND owner = 'ann'"
        );
    }

    #[test]
    fn test_batch_insert_renders_multi_row_values() {
        let columns = vec!["status".to_string(), "subject".to_string()];
        let rows = vec![
            vec![json!(1), json!("first")],
            vec![json!(2), json!("second")],
        ];
        assert_eq!(
            render(&Statement::BatchInsert {
                table: "tickets",
                columns: &columns,
                rows: &rows,
            }),
            "INSERT INTO tickets (status, subject) VALUES (1, 'first'), (2, 'second')"
        );
    }

    #[test]
    fn test_update_renders_values_and_raw_expressions() {
        let mut changes = Changes::new();
        changes.insert("count".to_string(), SetValue::Expr(raw("count + 5")));
        changes.insert("subject".to_string(), SetValue::Value(json!("renamed")));
        assert_eq!(
            render(&Statement::Update {
                table: "tickets",
                changes: &changes,
                condition: &cond(json!({"id": 3})),
            }),
            "UPDATE tickets SET count = count + 5, subject = 'renamed' WHERE id = 3"
        );
    }

    #[test]
    fn test_delete_without_condition_targets_the_whole_table() {
        assert_eq!(
            render(&Statement::Delete {
                table: "tickets",
                condition: &Condition::none(),
            }),
            "DELETE FROM tickets"
        );
    }

    #[test]
    fn test_aggregate_renders_function_call() {
        let plan = QueryPlan::new("tickets").condition(cond(json!({"status": 1})));
        assert_eq!(
            render(&Statement::Aggregate {
                plan: &plan,
                func: AggregateFunc::Sum,
                field: "amount",
            }),
            "SELECT SUM(amount) FROM tickets WHERE status = 1"
        );
    }
}
