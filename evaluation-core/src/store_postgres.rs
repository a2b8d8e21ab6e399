//! Postgres implementation of [`EvaluationStore`].
//!
//! All SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`) so the crate
//! builds without a live database.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::query::{PageRequest, ResultFilter};
use crate::store::{EvaluationStore, ResultPage};
use crate::types::{EvaluationResult, EvaluationStatus};

const COLUMNS: &str = "id, timestamp, target_of_evaluation_id, audit_scope_id, control_id, \
     control_category_name, control_catalog_id, parent_control_id, status, \
     assessment_result_ids, comment, valid_until, data";

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS evaluation_results (
        id                      UUID PRIMARY KEY,
        timestamp               TIMESTAMPTZ NOT NULL,
        target_of_evaluation_id TEXT NOT NULL,
        audit_scope_id          TEXT NOT NULL,
        control_id              TEXT NOT NULL,
        control_category_name   TEXT NOT NULL,
        control_catalog_id      TEXT NOT NULL,
        parent_control_id       TEXT,
        status                  TEXT NOT NULL,
        assessment_result_ids   TEXT[] NOT NULL DEFAULT '{}',
        comment                 TEXT,
        valid_until             TIMESTAMPTZ,
        data                    BYTEA NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS evaluation_results_control_idx
        ON evaluation_results (control_catalog_id, control_id, timestamp DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS evaluation_results_target_idx
        ON evaluation_results (target_of_evaluation_id, timestamp)
    "#,
];

#[derive(Debug, sqlx::FromRow)]
struct PgEvaluationRow {
    id: Uuid,
    timestamp: DateTime<Utc>,
    target_of_evaluation_id: String,
    audit_scope_id: String,
    control_id: String,
    control_category_name: String,
    control_catalog_id: String,
    parent_control_id: Option<String>,
    status: String,
    assessment_result_ids: Vec<String>,
    comment: Option<String>,
    valid_until: Option<DateTime<Utc>>,
    data: Vec<u8>,
}

impl TryFrom<PgEvaluationRow> for EvaluationResult {
    type Error = anyhow::Error;

    fn try_from(row: PgEvaluationRow) -> Result<Self> {
        let status: EvaluationStatus = row.status.parse().map_err(|e: String| anyhow!(e))?;
        Ok(Self {
            id: row.id,
            timestamp: row.timestamp,
            target_of_evaluation_id: row.target_of_evaluation_id,
            audit_scope_id: row.audit_scope_id,
            control_id: row.control_id,
            control_category_name: row.control_category_name,
            control_catalog_id: row.control_catalog_id,
            parent_control_id: row.parent_control_id,
            status,
            assessment_result_ids: row.assessment_result_ids,
            comment: row.comment,
            valid_until: row.valid_until,
            data: row.data,
        })
    }
}

/// Escape `LIKE` metacharacters so a control-id prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ResultFilter, now: DateTime<Utc>) {
    qb.push(" WHERE TRUE");

    if let Some(toe) = &filter.target_of_evaluation_id {
        qb.push(" AND target_of_evaluation_id = ").push_bind(toe.clone());
    }
    if let Some(catalog) = &filter.catalog_id {
        qb.push(" AND control_catalog_id = ").push_bind(catalog.clone());
    }
    if let Some(control) = &filter.control_id {
        qb.push(" AND control_id = ").push_bind(control.clone());
    }
    if let Some(prefix) = &filter.sub_controls {
        qb.push(" AND control_id LIKE ").push_bind(like_prefix(prefix));
    }
    if filter.parents_only {
        qb.push(" AND parent_control_id IS NULL");
    }
    if filter.valid_manual_only {
        let manual: Vec<String> = EvaluationStatus::MANUAL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        qb.push(" AND status = ANY(").push_bind(manual).push(")");
        qb.push(" AND (valid_until IS NULL OR valid_until >= ")
            .push_bind(now)
            .push(")");
    }
}

/// Postgres-backed evaluation result store.
pub struct PgEvaluationStore {
    pool: PgPool,
}

impl PgEvaluationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        info!(max_connections, "Database connection pool created");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the results table and its indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create evaluation_results schema")?;
        }
        Ok(())
    }
}

#[async_trait]
impl EvaluationStore for PgEvaluationStore {
    async fn create(&self, result: &EvaluationResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO evaluation_results (
                id, timestamp, target_of_evaluation_id, audit_scope_id, control_id,
                control_category_name, control_catalog_id, parent_control_id, status,
                assessment_result_ids, comment, valid_until, data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(result.id)
        .bind(result.timestamp)
        .bind(&result.target_of_evaluation_id)
        .bind(&result.audit_scope_id)
        .bind(&result.control_id)
        .bind(&result.control_category_name)
        .bind(&result.control_catalog_id)
        .bind(&result.parent_control_id)
        .bind(result.status.as_str())
        .bind(&result.assessment_result_ids)
        .bind(&result.comment)
        .bind(result.valid_until)
        .bind(&result.data)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert evaluation result {}", result.id))?;

        Ok(())
    }

    async fn list(
        &self,
        filter: &ResultFilter,
        now: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<ResultPage> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM evaluation_results"));
        push_filter(&mut qb, filter, now);
        qb.push(" ORDER BY timestamp, id LIMIT ")
            .push_bind(i64::from(page.limit) + 1)
            .push(" OFFSET ")
            .push_bind(i64::try_from(page.offset).unwrap_or(i64::MAX));

        let rows = qb
            .build_query_as::<PgEvaluationRow>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to list evaluation results")?;

        let has_more = rows.len() > page.limit as usize;
        let results = rows
            .into_iter()
            .take(page.limit as usize)
            .map(EvaluationResult::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(ResultPage { results, has_more })
    }

    async fn latest_by_control_id(
        &self,
        filter: &ResultFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationResult>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {COLUMNS} FROM (SELECT {COLUMNS}, ROW_NUMBER() OVER \
             (PARTITION BY control_catalog_id, control_id ORDER BY timestamp DESC, id DESC) AS rn \
             FROM evaluation_results"
        ));
        push_filter(&mut qb, filter, now);
        qb.push(") ranked WHERE rn = 1 ORDER BY control_catalog_id, control_id");

        let rows = qb
            .build_query_as::<PgEvaluationRow>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query latest evaluation results")?;

        rows.into_iter().map(EvaluationResult::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_prefix_escapes_metacharacters() {
        assert_eq!(like_prefix("OPS-01"), "OPS-01%");
        assert_eq!(like_prefix("A_B%"), "A\\_B\\%%");
    }

    #[test]
    fn filter_sql_shape() {
        let filter = ResultFilter {
            target_of_evaluation_id: Some("toe".into()),
            sub_controls: Some("OPS".into()),
            parents_only: true,
            valid_manual_only: true,
            ..Default::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM evaluation_results");
        push_filter(&mut qb, &filter, Utc::now());

        assert_eq!(
            qb.sql(),
            "SELECT 1 FROM evaluation_results WHERE TRUE \
             AND target_of_evaluation_id = $1 \
             AND control_id LIKE $2 \
             AND parent_control_id IS NULL \
             AND status = ANY($3) \
             AND (valid_until IS NULL OR valid_until >= $4)"
        );
    }
}
