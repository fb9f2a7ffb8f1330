use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::models::{Comparison, SnapshotRow};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Stores one comparison run and all of its metrics atomically.
pub async fn save_comparison(pool: &PgPool, comparison: &Comparison) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO crisis_metrics.comparison_runs (id, pre_period, crisis_period)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(run_id)
    .bind(comparison.pre_period.to_string())
    .bind(comparison.crisis_period.to_string())
    .execute(&mut *tx)
    .await?;

    for (metric, delta) in &comparison.metrics {
        sqlx::query(
            r#"
            INSERT INTO crisis_metrics.metric_snapshots
            (run_id, metric, pre_value, crisis_value, absolute_delta,
             percent_delta, point_delta, favorable, target_gap)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(run_id)
        .bind(metric)
        .bind(delta.pre_value)
        .bind(delta.crisis_value)
        .bind(delta.absolute_delta)
        .bind(delta.percent_delta)
        .bind(delta.point_delta)
        .bind(delta.favorable)
        .bind(delta.target_gap)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(%run_id, metrics = comparison.metrics.len(), "comparison saved");
    Ok(run_id)
}

pub async fn fetch_history(
    pool: &PgPool,
    metric: &str,
    limit: i64,
) -> anyhow::Result<Vec<SnapshotRow>> {
    let rows = sqlx::query(
        r#"
        SELECT r.id AS run_id, r.created_at, r.pre_period, r.crisis_period,
               s.pre_value, s.crisis_value, s.percent_delta, s.point_delta, s.favorable
        FROM crisis_metrics.metric_snapshots s
        JOIN crisis_metrics.comparison_runs r ON r.id = s.run_id
        WHERE s.metric = $1
        ORDER BY r.created_at DESC
        LIMIT $2
        "#,
    )
    .bind(metric)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut history = Vec::new();
    for row in rows {
        history.push(SnapshotRow {
            run_id: row.get("run_id"),
            created_at: row.get("created_at"),
            pre_period: row.get("pre_period"),
            crisis_period: row.get("crisis_period"),
            pre_value: row.get("pre_value"),
            crisis_value: row.get("crisis_value"),
            percent_delta: row.get("percent_delta"),
            point_delta: row.get("point_delta"),
            favorable: row.get("favorable"),
        });
    }

    Ok(history)
}
