//! Clip domain - DB queries for the parent clip record
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use sqlx::{Executor, Postgres};

#[derive(Debug, sqlx::FromRow)]
pub struct ClipRow {
    pub id: String,
    pub user_id: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
    pub vertical_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Get a clip by id
pub async fn get_clip<'e, E>(executor: E, clip_id: &str) -> Result<Option<ClipRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, user_id, status, error_message, vertical_url, thumbnail_url
        FROM clips
        WHERE id = $1
        "#,
    )
    .bind(clip_id)
    .fetch_optional(executor)
    .await
}

/// Enter `processing`, clearing any error left by a previous attempt
pub async fn mark_processing<'e, E>(executor: E, clip_id: &str) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE clips
        SET status = 'processing', error_message = NULL, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(clip_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Terminal success: both derivative URLs are written together
pub async fn mark_ready<'e, E>(
    executor: E,
    clip_id: &str,
    vertical_url: &str,
    thumbnail_url: &str,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE clips
        SET status = 'ready',
            error_message = NULL,
            vertical_url = $2,
            thumbnail_url = $3,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(clip_id)
    .bind(vertical_url)
    .bind(thumbnail_url)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Terminal failure. URLs of derivatives that did render are kept.
pub async fn mark_failed<'e, E>(
    executor: E,
    clip_id: &str,
    error_message: &str,
    vertical_url: Option<&str>,
    thumbnail_url: Option<&str>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE clips
        SET status = 'failed',
            error_message = $2,
            vertical_url = $3,
            thumbnail_url = $4,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(clip_id)
    .bind(error_message)
    .bind(vertical_url)
    .bind(thumbnail_url)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
