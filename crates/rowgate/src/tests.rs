//! Behavior tests for the access layer, run against the in-memory engine.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::condition::Condition;
use crate::dao::{Dao, DaoConfig, Fetched};
use crate::engine::memory::MemoryEngine;
use crate::engine::Engine;
use crate::error::{AccessError, ValidationError};
use crate::record::{Record, Row};

/// Test model with a validation rule per field class.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Ticket {
    id: i64,
    subject: String,
    status: i64,
    amount: f64,
}

impl Record for Ticket {
    fn table_name() -> &'static str {
        "tickets"
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.subject.is_empty() {
            errors.push(ValidationError::new("subject", "subject cannot be blank"));
        }
        if self.amount < 0.0 {
            errors.push(ValidationError::new("amount", "amount cannot be negative"));
        }
        errors
    }
}

fn setup() -> (Arc<MemoryEngine>, Dao<Ticket>) {
    let engine = Arc::new(MemoryEngine::new());
    let dao = Dao::new(Arc::clone(&engine) as Arc<dyn Engine>);
    (engine, dao)
}

fn as_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

async fn seed(dao: &Dao<Ticket>, tickets: &[(&str, i64, f64)]) {
    for (subject, status, amount) in tickets {
        let id = dao
            .add(json!({"subject": subject, "status": status, "amount": amount}))
            .await;
        assert!(id > 0, "seed insert failed: {:?}", dao.errors());
    }
}

mod fetch {
    use super::*;

    #[tokio::test]
    async fn test_numeric_where_is_the_primary_key_shortcut() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0), ("b", 1, 2.0)]).await;
        let by_key = dao.get(2, "", "").await;
        let by_map = dao.get(json!({"id": 2}), "", "").await;
        assert_eq!(by_key, by_map);
        assert_eq!(
            by_key.into_record().map(|t| t.subject),
            Some("b".to_string())
        );
    }

    #[tokio::test]
    async fn test_get_miss_is_the_empty_sentinel_not_an_error() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0)]).await;
        let fetched = dao.get(99, "", "").await;
        assert!(fetched.is_empty());
        assert!(dao.errors().is_empty());
    }

    #[tokio::test]
    async fn test_get_all_defaults_to_descending_key_order() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0), ("b", 1, 1.0), ("c", 1, 1.0)]).await;
        let ids: Vec<i64> = dao
            .get_all(Condition::none(), "", "")
            .await
            .into_records()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_explicit_order_wins_over_the_default() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0), ("b", 1, 1.0)]).await;
        let ids: Vec<i64> = dao
            .get_all(Condition::none(), "", "id")
            .await
            .into_records()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_page_and_limit_clamp_to_their_defaults() {
        let (_engine, dao) = setup();
        let rows: Vec<(String, i64, f64)> = (1..=15).map(|i| (format!("t{i}"), 1, 1.0)).collect();
        let borrowed: Vec<(&str, i64, f64)> =
            rows.iter().map(|(s, a, b)| (s.as_str(), *a, *b)).collect();
        seed(&dao, &borrowed).await;

        let clamped = dao.get_page(Condition::none(), 0, 0, "", "id").await;
        let explicit = dao.get_page(Condition::none(), 1, 10, "", "id").await;
        assert_eq!(clamped, explicit);
        assert_eq!(clamped.len(), 10);

        let second = dao.get_page(Condition::none(), 2, 10, "", "id").await;
        let ids: Vec<i64> = second.into_records().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![11, 12, 13, 14, 15]);
    }

    #[tokio::test]
    async fn test_field_alias_forces_raw_rows() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0)]).await;
        let fetched = dao.get(1, "subject AS title", "").await;
        let row = fetched.into_row().expect("alias selects a raw row");
        assert_eq!(row.get("title"), Some(&json!("a")));

        // shape forcing is case-insensitive
        let fetched = dao.get(1, "subject as title", "").await;
        assert!(matches!(fetched, Fetched::Row(_)));
    }

    #[tokio::test]
    async fn test_configured_row_shape_skips_record_binding() {
        let engine = Arc::new(MemoryEngine::new());
        let dao: Dao<Ticket> = Dao::with_config(
            engine,
            DaoConfig {
                as_rows: true,
                ..DaoConfig::default()
            },
        );
        seed(&dao, &[("a", 1, 1.0)]).await;
        assert!(matches!(dao.get(1, "", "").await, Fetched::Row(_)));
    }

    #[tokio::test]
    async fn test_base_filter_is_merged_into_every_composed_query() {
        let (_engine, dao) = setup();
        seed(&dao, &[("visible", 1, 1.0), ("hidden", 0, 1.0)]).await;
        dao.set_base_where(json!({"status": 1}));

        let listed = dao.get_all(Condition::none(), "", "").await;
        let subjects: Vec<String> = listed.into_records().iter().map(|t| t.subject.clone()).collect();
        assert_eq!(subjects, vec!["visible"]);

        dao.get(1, "", "").await;
        assert_eq!(
            dao.last_sql().as_deref(),
            Some("SELECT * FROM tickets WHERE (id = 1) AND (status = 1) ORDER BY id DESC")
        );
    }
}

mod writes {
    use super::*;

    #[tokio::test]
    async fn test_add_returns_the_new_key_and_persists() {
        let (engine, dao) = setup();
        let id = dao.add(json!({"subject": "a", "amount": 2.0})).await;
        assert_eq!(id, 1);
        assert_eq!(engine.rows_in("tickets"), 1);
        let fetched = dao.get(id, "", "").await.into_record();
        assert_eq!(fetched.map(|t| t.subject), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_add_validation_failure_returns_zero_and_logs() {
        let (engine, dao) = setup();
        let id = dao.add(json!({"subject": ""})).await;
        assert_eq!(id, 0);
        assert_eq!(engine.rows_in("tickets"), 0);
        match dao.error() {
            Some(AccessError::Validation(errors)) => {
                assert_eq!(errors[0].field, "subject");
            }
            other => panic!("expected a validation entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_with_ill_typed_data_is_an_execution_fault() {
        let (_engine, dao) = setup();
        let id = dao.add(json!({"subject": 5})).await;
        assert_eq!(id, 0);
        assert!(matches!(dao.error(), Some(AccessError::Execution(_))));
    }

    #[tokio::test]
    async fn test_add_all_commits_every_row() {
        let (engine, dao) = setup();
        let ids = dao
            .add_all(vec![
                json!({"subject": "a"}),
                json!({"subject": "b"}),
                json!({"subject": "c"}),
            ])
            .await;
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(engine.rows_in("tickets"), 3);
    }

    #[tokio::test]
    async fn test_add_all_returns_the_partial_ids_and_rolls_back() {
        let (engine, dao) = setup();
        let ids = dao
            .add_all(vec![
                json!({"subject": "a"}),
                json!({"subject": ""}),
                json!({"subject": "c"}),
            ])
            .await;
        // ids collected before the failure come back even though the
        // transaction rolled their rows back
        assert_eq!(ids, vec![1]);
        assert_eq!(engine.rows_in("tickets"), 0);
        // only the failing add itself logged an entry
        assert_eq!(dao.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_insert_splits_into_chunks_of_one_thousand() {
        let (engine, dao) = setup();
        let rows: Vec<Value> = (0..2500).map(|i| json!({"subject": format!("s{i}")})).collect();
        let inserted = dao.batch_insert(rows).await;
        assert_eq!(inserted, 2500);
        assert_eq!(engine.rows_in("tickets"), 2500);

        let chunks: Vec<String> = dao
            .sql()
            .into_iter()
            .filter(|sql| sql.starts_with("INSERT INTO tickets"))
            .collect();
        assert_eq!(chunks.len(), 3);
        let sizes: Vec<usize> = chunks
            .iter()
            .map(|sql| sql.matches("), (").count() + 1)
            .collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[tokio::test]
    async fn test_batch_insert_failure_reverts_committed_chunks() {
        let (engine, dao) = setup();
        let mut rows: Vec<Value> = (0..1500).map(|i| json!({"subject": format!("s{i}")})).collect();
        // the second chunk leads with a key already assigned in the first
        // chunk; its column list therefore carries the id column
        rows[1000] = json!({"id": 500, "subject": "collision"});
        let inserted = dao.batch_insert(rows).await;
        assert_eq!(inserted, 0);
        assert_eq!(engine.rows_in("tickets"), 0);
        assert!(matches!(dao.error(), Some(AccessError::Execution(_))));
    }

    #[tokio::test]
    async fn test_batch_insert_drops_undeclared_columns() {
        let (engine, dao) = setup();
        let inserted = dao
            .batch_insert(vec![json!({"subject": "a", "ghost": 1})])
            .await;
        assert_eq!(inserted, 1);
        let stored = engine
            .fetch_one(&crate::query::QueryPlan::new("tickets"))
            .await
            .expect("fetch")
            .expect("row");
        assert!(stored.get("ghost").is_none());
        assert!(dao.last_sql().is_some_and(|sql| !sql.contains("ghost")));
    }

    #[tokio::test]
    async fn test_update_touches_only_the_supplied_fields() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 2.5)]).await;
        assert!(dao.update(1, json!({"status": 5})).await);
        let ticket = dao.get(1, "", "").await.into_record().expect("record");
        assert_eq!(ticket.status, 5);
        assert_eq!(ticket.subject, "a");
        assert_eq!(ticket.amount, 2.5);
    }

    #[tokio::test]
    async fn test_update_validation_failure_leaves_storage_untouched() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 2.5)]).await;
        assert!(!dao.update(1, json!({"subject": ""})).await);
        assert!(matches!(dao.error(), Some(AccessError::Validation(_))));
        let ticket = dao.get(1, "", "").await.into_record().expect("record");
        assert_eq!(ticket.subject, "a");
    }

    #[tokio::test]
    async fn test_update_without_match_fails_silently() {
        let (_engine, dao) = setup();
        assert!(!dao.update(99, json!({"status": 1})).await);
        assert!(dao.errors().is_empty());
    }

    #[tokio::test]
    async fn test_update_all_projects_the_written_fields_plus_the_key() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0), ("b", 1, 1.0), ("c", 2, 1.0)]).await;
        assert!(dao.update_all(json!({"status": 1}), json!({"status": 7})).await);
        assert_eq!(dao.count(json!({"status": 7}), "*").await, 2);
        assert!(dao
            .sql()
            .iter()
            .any(|sql| sql.starts_with("SELECT status,id FROM tickets")));
    }

    #[tokio::test]
    async fn test_update_all_rolls_back_at_the_first_bad_row() {
        let (engine, dao) = setup();
        // a row this layer could never have written: the subject column
        // carries a number and cannot bind onto the record
        engine
            .insert(
                "tickets",
                "id",
                as_row(json!({"subject": 123, "status": 1, "amount": 1.0})),
            )
            .await
            .expect("seed row");
        seed(&dao, &[("a", 1, 1.0)]).await;

        assert!(!dao.update_all(json!({"status": 1}), json!({"subject": "renamed"})).await);
        assert_eq!(dao.errors().len(), 1);
        let kept = dao.get(2, "", "").await.into_record().expect("record");
        assert_eq!(kept.subject, "a");
    }

    #[tokio::test]
    async fn test_delete_loads_by_key_and_removes_the_row() {
        let (engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0)]).await;
        assert!(dao.delete(1).await);
        assert_eq!(engine.rows_in("tickets"), 0);
        // the load selected only the key column
        assert!(dao
            .sql()
            .iter()
            .any(|sql| sql.starts_with("SELECT id FROM tickets")));
    }

    #[tokio::test]
    async fn test_delete_without_match_fails_silently() {
        let (_engine, dao) = setup();
        assert!(!dao.delete(99).await);
        assert!(dao.errors().is_empty());
    }

    #[tokio::test]
    async fn test_delete_all_skips_base_filter_composition() {
        let (engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0), ("b", 0, 1.0)]).await;
        dao.set_base_where(json!({"status": 1}));
        let removed = dao.delete_all(Condition::none()).await;
        assert_eq!(removed, 2);
        assert_eq!(engine.rows_in("tickets"), 0);
    }
}

mod counters_and_aggregates {
    use super::*;

    #[tokio::test]
    async fn test_count_on_nothing_is_integer_zero() {
        let (_engine, dao) = setup();
        assert_eq!(dao.count(Condition::none(), "*").await, 0);
    }

    #[tokio::test]
    async fn test_aggregates_truncate_to_integers() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.5), ("b", 1, 2.25), ("c", 1, 10.0)]).await;
        assert_eq!(dao.count(Condition::none(), "*").await, 3);
        assert_eq!(dao.sum(Condition::none(), "amount").await, 13);
        assert_eq!(dao.min(Condition::none(), "amount").await, 1);
        assert_eq!(dao.max(Condition::none(), "amount").await, 10);
    }

    #[tokio::test]
    async fn test_sum_of_no_rows_is_zero() {
        let (_engine, dao) = setup();
        assert_eq!(dao.sum(json!({"status": 9}), "amount").await, 0);
    }

    #[tokio::test]
    async fn test_aggregate_provenance_is_the_composed_select() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0)]).await;
        dao.count(json!({"status": 1}), "*").await;
        assert_eq!(
            dao.last_sql().as_deref(),
            Some("SELECT * FROM tickets WHERE status = 1 ORDER BY id DESC")
        );
    }

    #[tokio::test]
    async fn test_inc_applies_database_side_arithmetic() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0)]).await;
        assert!(dao.inc(1, "status", 5).await);
        let ticket = dao.get(1, "", "").await.into_record().expect("record");
        assert_eq!(ticket.status, 6);
    }

    #[tokio::test]
    async fn test_inc_shares_the_step_across_a_column_list() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.5)]).await;
        assert!(dao.inc(1, vec!["status", "amount"], 2).await);
        let ticket = dao.get(1, "", "").await.into_record().expect("record");
        assert_eq!(ticket.status, 3);
        assert_eq!(ticket.amount, 3.5);
    }

    #[tokio::test]
    async fn test_per_column_steps_override_the_shared_step() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0)]).await;
        assert!(dao.inc(1, vec![("status", 5)], 1).await);
        let ticket = dao.get(1, "", "").await.into_record().expect("record");
        assert_eq!(ticket.status, 6);
    }

    #[tokio::test]
    async fn test_dec_subtracts_only_for_per_column_steps() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 10, 1.0)]).await;

        // per-column steps subtract
        assert!(dao.dec(1, vec![("status", 3)], 1).await);
        let ticket = dao.get(1, "", "").await.into_record().expect("record");
        assert_eq!(ticket.status, 7);

        // the column and column-list forms keep the additive direction
        assert!(dao.dec(1, "status", 4).await);
        let ticket = dao.get(1, "", "").await.into_record().expect("record");
        assert_eq!(ticket.status, 11);

        assert!(dao.dec(1, vec!["status"], 1).await);
        let ticket = dao.get(1, "", "").await.into_record().expect("record");
        assert_eq!(ticket.status, 12);
    }

    #[tokio::test]
    async fn test_counters_skip_base_filter_composition() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0)]).await;
        dao.set_base_where(json!({"status": 99}));
        assert!(dao.inc(1, "status", 1).await);
    }

    #[tokio::test]
    async fn test_counter_without_match_reports_failure() {
        let (_engine, dao) = setup();
        assert!(!dao.inc(99, "status", 1).await);
    }
}

mod provenance {
    use super::*;

    #[tokio::test]
    async fn test_page_queries_log_the_select_before_pagination() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0)]).await;
        dao.get_page(Condition::none(), 2, 5, "", "").await;
        let logged = dao.last_sql().expect("captured");
        assert!(!logged.contains("LIMIT"));
        assert!(!logged.contains("OFFSET"));
    }

    #[tokio::test]
    async fn test_sql_log_accumulates_oldest_first() {
        let (_engine, dao) = setup();
        seed(&dao, &[("a", 1, 1.0)]).await;
        dao.get(1, "", "").await;
        dao.get(json!({"status": 1}), "", "").await;
        let log = dao.sql();
        // the seed insert does not run through the composer
        assert_eq!(log.len(), 2);
        assert_eq!(dao.last_sql(), log.last().cloned());
        assert!(log[0].contains("id = 1"));
        assert!(log[1].contains("status = 1"));
    }

    #[tokio::test]
    async fn test_disabled_logging_suppresses_select_capture() {
        let engine = Arc::new(MemoryEngine::new());
        let dao: Dao<Ticket> = Dao::with_config(
            engine,
            DaoConfig {
                log_sql: false,
                ..DaoConfig::default()
            },
        );
        seed(&dao, &[("a", 1, 1.0)]).await;
        dao.get(1, "", "").await;
        assert!(dao.sql().is_empty());
    }

    #[tokio::test]
    async fn test_error_reads_the_first_entry_without_consuming() {
        let (_engine, dao) = setup();
        dao.add(json!({"subject": ""})).await;
        dao.add(json!({"subject": "ok", "amount": -1.0})).await;
        let errors = dao.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(dao.error().as_ref(), errors.first());
        assert_eq!(dao.error().as_ref(), errors.first());
    }
}

mod timestamped {
    use super::*;
    use chrono::{DateTime, Utc};

    #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct AuditEntry {
        id: i64,
        action: String,
        recorded_at: Option<DateTime<Utc>>,
    }

    impl Record for AuditEntry {
        fn table_name() -> &'static str {
            "audit_log"
        }
    }

    #[tokio::test]
    async fn test_timestamped_records_round_trip() {
        let engine = Arc::new(MemoryEngine::new());
        let dao: Dao<AuditEntry> = Dao::new(engine);
        let now = Utc::now();
        let id = dao
            .add(json!({"action": "login", "recorded_at": now}))
            .await;
        assert!(id > 0);
        let entry = dao.get(id, "", "").await.into_record().expect("record");
        assert_eq!(entry.action, "login");
        assert_eq!(entry.recorded_at, Some(now));
    }
}
