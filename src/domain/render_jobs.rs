//! Render job and asset domain - DB queries for the render ledger
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct RenderJobRow {
    pub id: Uuid,
    pub user_id: i64,
    pub job_type: String,
    pub engine: String,
    pub params: serde_json::Value,
    pub status: String,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_seconds: Option<f64>,
    pub asset_count: i64,
}

/// Insert a job in `processing` with `started_at = NOW()`
pub async fn insert_job<'e, E>(
    executor: E,
    id: Uuid,
    user_id: i64,
    job_type: &str,
    engine: &str,
    params: serde_json::Value,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO render_jobs (id, user_id, job_type, engine, params, status, started_at)
        VALUES ($1, $2, $3, $4, $5, 'processing', NOW())
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(job_type)
    .bind(engine)
    .bind(params)
    .execute(executor)
    .await?;

    Ok(())
}

/// Move a processing job to `completed`. Terminal rows are left alone.
pub async fn complete_job<'e, E>(
    executor: E,
    job_id: Uuid,
    processing_time_seconds: f64,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE render_jobs
        SET status = 'completed', completed_at = NOW(), processing_time_seconds = $2
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(job_id)
    .bind(processing_time_seconds)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Move a processing job to `failed`. Terminal rows are left alone.
pub async fn fail_job<'e, E>(executor: E, job_id: Uuid, error_message: &str) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE render_jobs
        SET status = 'failed',
            completed_at = NOW(),
            error_message = $2,
            processing_time_seconds = EXTRACT(EPOCH FROM (NOW() - started_at))::float8
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(job_id)
    .bind(error_message)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_asset<'e, E>(
    executor: E,
    id: Uuid,
    render_job_id: Uuid,
    source_media_id: &str,
    output_type: &str,
    storage_path: &str,
    duration_seconds: f64,
    metadata: serde_json::Value,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO assets (id, render_job_id, source_media_id, output_type, storage_path, duration_seconds, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(render_job_id)
    .bind(source_media_id)
    .bind(output_type)
    .bind(storage_path)
    .bind(duration_seconds)
    .bind(metadata)
    .execute(executor)
    .await?;

    Ok(())
}

/// All render attempts for a clip, newest first, with their asset counts
pub async fn list_jobs_for_clip<'e, E>(executor: E, clip_id: &str) -> Result<Vec<RenderJobRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT j.id, j.user_id, j.job_type, j.engine, j.params, j.status, j.error_message,
               j.started_at, j.completed_at, j.processing_time_seconds,
               COUNT(a.id) AS asset_count
        FROM render_jobs j
        LEFT JOIN assets a ON a.render_job_id = j.id
        WHERE j.params->>'clip_id' = $1
        GROUP BY j.id
        ORDER BY j.started_at DESC
        "#,
    )
    .bind(clip_id)
    .fetch_all(executor)
    .await
}
