//! SQL rendering of query plans
//!
//! The watermark is always passed as a bound parameter, never inlined.

use crate::dialect::SqlDialect;
use crate::planner::QueryPlan;
use crate::types::Value;

/// Render a plan as one statement, optionally capped at `limit` rows
pub fn render_plan(
    plan: &QueryPlan,
    dialect: &dyn SqlDialect,
    limit: Option<u64>,
) -> (String, Vec<Value>) {
    render_page(plan, dialect, limit, None)
}

/// Render one page of a plan.
///
/// Pages are stable only when the plan has an `order_by`.
pub fn render_page(
    plan: &QueryPlan,
    dialect: &dyn SqlDialect,
    limit: Option<u64>,
    offset: Option<u64>,
) -> (String, Vec<Value>) {
    let mut params = Vec::new();

    let where_clause = plan.filter().map(|(column, after)| {
        params.push(after.clone());
        format!(
            "{} > {}",
            dialect.quote_identifier(column),
            dialect.placeholder(params.len())
        )
    });

    let columns: Vec<&str> = plan.columns.iter().map(String::as_str).collect();
    let order_by: Vec<(&str, bool)> = plan.order_by.iter().map(|c| (c.as_str(), true)).collect();

    let sql = dialect.build_select(
        plan.schema.as_deref(),
        &plan.table,
        &columns,
        where_clause.as_deref(),
        (!order_by.is_empty()).then_some(order_by.as_slice()),
        limit,
        offset.filter(|o| *o > 0),
    );

    (sql, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySqlDialect, PostgresDialect, SqlServerDialect};
    use crate::planner::PlanKind;

    fn plan(kind: PlanKind) -> QueryPlan {
        QueryPlan {
            schema: Some("shop".into()),
            table: "orders".into(),
            columns: vec!["id".into(), "ts".into()],
            kind,
            order_by: vec!["ts".into()],
            watermark_column: Some("ts".into()),
        }
    }

    #[test]
    fn test_incremental_postgres() {
        let plan = plan(PlanKind::Incremental {
            column: "ts".into(),
            after: Value::Int64(100),
        });
        let (sql, params) = render_plan(&plan, &PostgresDialect, Some(1000));
        assert!(sql.starts_with(r#"SELECT "id", "ts" FROM "shop"."orders""#));
        assert!(sql.contains(r#""ts" > $1"#));
        assert!(sql.ends_with(r#"ORDER BY "ts" ASC LIMIT 1000"#));
        assert_eq!(params, vec![Value::Int64(100)]);
    }

    #[test]
    fn test_incremental_mysql_page() {
        let plan = plan(PlanKind::Incremental {
            column: "ts".into(),
            after: Value::from("2024-01-01 00:00:00"),
        });
        let (sql, params) = render_page(&plan, &MySqlDialect, Some(500), Some(1000));
        assert!(sql.contains("WHERE `ts` > ?"));
        assert!(sql.contains("ORDER BY `ts` ASC"));
        assert!(sql.contains("LIMIT 500"));
        assert!(sql.contains("OFFSET 1000"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_full_sqlserver() {
        let plan = plan(PlanKind::Full);
        let (sql, params) = render_plan(&plan, &SqlServerDialect, None);
        assert_eq!(
            sql,
            "SELECT [id], [ts] FROM [shop].[orders] ORDER BY [ts] ASC"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_unordered_full_scan() {
        let mut plan = plan(PlanKind::Full);
        plan.order_by.clear();
        let (sql, _) = render_plan(&plan, &PostgresDialect, None);
        assert!(!sql.contains("ORDER BY"));
    }
}
