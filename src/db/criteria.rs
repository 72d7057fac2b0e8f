//! Renders [`Criteria`] into SQL over the queue item table.
//!
//! Identifiers become a primary key lookup (`id = ANY(..)`); predicates
//! become bound comparisons. All values are bound, never interpolated.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::QUEUE_ITEMS_TABLE;
use crate::error::{Error, Result};
use crate::model::criteria::{Criteria, Predicate, Value};

pub(crate) const ITEM_COLUMNS: &str =
    "id, name, queue, tid, payload, parent, created, \"when\", done, retry_count";

/// `SELECT` matching items, oldest first.
pub(crate) fn select_items(criteria: &Criteria) -> Result<QueryBuilder<'static, Postgres>> {
    let mut qb = QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM {QUEUE_ITEMS_TABLE}"));
    push_where(&mut qb, criteria)?;
    qb.push(" ORDER BY created ASC, id ASC");
    Ok(qb)
}

/// `DELETE` matching items.
pub(crate) fn delete_items(criteria: &Criteria) -> Result<QueryBuilder<'static, Postgres>> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {QUEUE_ITEMS_TABLE}"));
    push_where(&mut qb, criteria)?;
    Ok(qb)
}

fn push_where(qb: &mut QueryBuilder<'static, Postgres>, criteria: &Criteria) -> Result<()> {
    criteria.check().map_err(Error::InvalidCriteria)?;

    let mut first = true;
    let mut next_clause = |qb: &mut QueryBuilder<'static, Postgres>| {
        qb.push(if first { " WHERE " } else { " AND " });
        first = false;
    };

    // An empty id list renders `id = ANY('{}')`, which matches no row.
    if let Some(ids) = &criteria.ids {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        next_clause(qb);
        qb.push("id = ANY(").push_bind(ids).push(")");
    }

    for predicate in &criteria.predicates {
        next_clause(qb);
        match predicate {
            Predicate::Compare { field, op, value } => {
                qb.push(field.column()).push(" ").push(op.sql()).push(" ");
                match value {
                    Value::Text(s) => qb.push_bind(s.clone()),
                    Value::Id(id) => qb.push_bind(id.0),
                    Value::Time(t) => qb.push_bind(*t),
                    Value::Int(n) => qb.push_bind(*n),
                };
            }
            Predicate::IsNull(field) => {
                qb.push(field.column()).push(" IS NULL");
            }
            Predicate::IsNotNull(field) => {
                qb.push(field.column()).push(" IS NOT NULL");
            }
            Predicate::PayloadContains(json) => {
                qb.push("payload @> ").push_bind(json.clone());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemId;
    use crate::model::criteria::{Field, Op};

    #[test]
    fn empty_criteria_select_everything() {
        let qb = select_items(&Criteria::all()).unwrap();
        assert_eq!(
            qb.sql(),
            format!("SELECT {ITEM_COLUMNS} FROM wrkr_qitems ORDER BY created ASC, id ASC")
        );
    }

    #[test]
    fn ids_use_primary_key_lookup() {
        let qb = select_items(&Criteria::by_ids([ItemId::new(), ItemId::new()])).unwrap();
        assert!(qb.sql().contains(" WHERE id = ANY($1)"), "{}", qb.sql());
    }

    #[test]
    fn empty_id_list_keeps_the_lookup() {
        let qb = delete_items(&Criteria::by_ids(Vec::new())).unwrap();
        assert_eq!(qb.sql(), "DELETE FROM wrkr_qitems WHERE id = ANY($1)");
    }

    #[test]
    fn predicates_are_joined_with_and() {
        let criteria = Criteria::all().queue("q").name("x").pending();
        let qb = delete_items(&criteria).unwrap();
        assert_eq!(
            qb.sql(),
            "DELETE FROM wrkr_qitems WHERE queue = $1 AND name = $2 AND done IS NULL"
        );
    }

    #[test]
    fn ids_and_predicates_combine() {
        let criteria = Criteria::by_id(ItemId::new()).claimed();
        let qb = select_items(&criteria).unwrap();
        assert!(
            qb.sql()
                .contains(" WHERE id = ANY($1) AND done IS NOT NULL"),
            "{}",
            qb.sql()
        );
    }

    #[test]
    fn when_column_is_quoted() {
        let criteria = Criteria::all().filter(Field::When, Op::Le, Value::Time(chrono::Utc::now()));
        let qb = delete_items(&criteria).unwrap();
        assert!(qb.sql().ends_with("WHERE \"when\" <= $1"), "{}", qb.sql());
    }

    #[test]
    fn payload_match_uses_containment() {
        let criteria = Criteria::all().payload_contains(serde_json::json!({"a": 1}));
        let qb = select_items(&criteria).unwrap();
        assert!(qb.sql().contains("WHERE payload @> $1"), "{}", qb.sql());
    }

    #[test]
    fn mistyped_criteria_fail_before_any_sql() {
        let criteria = Criteria::all().filter(Field::RetryCount, Op::Gt, Value::Text("3".into()));
        assert!(matches!(
            select_items(&criteria),
            Err(Error::InvalidCriteria(_))
        ));
    }
}
