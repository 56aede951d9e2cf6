//! Persistence seams for the render pipeline.
//!
//! `ClipStore` covers the parent clip (owned by the calling system),
//! `JobStore` the append-only render ledger. `PgStore` implements both on
//! Postgres; every call goes straight to the database.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::constants::{ENGINE_CLOUDFLARE_STREAM, JOB_TYPE_CLIP_RENDER};
use crate::domain::{clips, render_jobs};
use crate::models::{Clip, ClipStatus, JobStatus, NewAsset, NewRenderJob, RenderJob, RenderJobSummary};
use crate::services::error::StoreError;

#[async_trait]
pub trait ClipStore: Send + Sync {
    async fn get_clip(&self, clip_id: &str) -> Result<Option<Clip>, StoreError>;

    async fn mark_processing(&self, clip_id: &str) -> Result<(), StoreError>;

    async fn mark_ready(
        &self,
        clip_id: &str,
        vertical_url: &str,
        thumbnail_url: &str,
    ) -> Result<(), StoreError>;

    async fn mark_failed(
        &self,
        clip_id: &str,
        error_message: &str,
        vertical_url: Option<&str>,
        thumbnail_url: Option<&str>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// New job in `processing`, `started_at = now`
    async fn create_job(&self, job: &NewRenderJob) -> Result<Uuid, StoreError>;

    async fn complete_job(&self, job_id: Uuid, processing_time_seconds: f64) -> Result<(), StoreError>;

    async fn fail_job(&self, job_id: Uuid, error_message: &str) -> Result<(), StoreError>;

    async fn create_asset(&self, asset: &NewAsset) -> Result<Uuid, StoreError>;

    async fn list_jobs_for_clip(&self, clip_id: &str) -> Result<Vec<RenderJobSummary>, StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ClipStore for PgStore {
    async fn get_clip(&self, clip_id: &str) -> Result<Option<Clip>, StoreError> {
        let Some(row) = clips::get_clip(&self.db, clip_id).await? else {
            return Ok(None);
        };
        let status = ClipStatus::parse(&row.status)
            .ok_or_else(|| StoreError::InvalidRow(format!("clip {} has status {:?}", row.id, row.status)))?;
        Ok(Some(Clip {
            id: row.id,
            user_id: row.user_id,
            status,
            error_message: row.error_message,
            vertical_url: row.vertical_url,
            thumbnail_url: row.thumbnail_url,
        }))
    }

    async fn mark_processing(&self, clip_id: &str) -> Result<(), StoreError> {
        clips::mark_processing(&self.db, clip_id).await?;
        Ok(())
    }

    async fn mark_ready(
        &self,
        clip_id: &str,
        vertical_url: &str,
        thumbnail_url: &str,
    ) -> Result<(), StoreError> {
        clips::mark_ready(&self.db, clip_id, vertical_url, thumbnail_url).await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        clip_id: &str,
        error_message: &str,
        vertical_url: Option<&str>,
        thumbnail_url: Option<&str>,
    ) -> Result<(), StoreError> {
        clips::mark_failed(&self.db, clip_id, error_message, vertical_url, thumbnail_url).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create_job(&self, job: &NewRenderJob) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let params = serde_json::to_value(&job.params)?;
        render_jobs::insert_job(
            &self.db,
            id,
            job.user_id,
            JOB_TYPE_CLIP_RENDER,
            ENGINE_CLOUDFLARE_STREAM,
            params,
        )
        .await?;
        Ok(id)
    }

    async fn complete_job(&self, job_id: Uuid, processing_time_seconds: f64) -> Result<(), StoreError> {
        let updated = render_jobs::complete_job(&self.db, job_id, processing_time_seconds).await?;
        if updated == 0 {
            tracing::warn!(%job_id, "complete_job: job was not in processing state");
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error_message: &str) -> Result<(), StoreError> {
        let updated = render_jobs::fail_job(&self.db, job_id, error_message).await?;
        if updated == 0 {
            tracing::warn!(%job_id, "fail_job: job was not in processing state");
        }
        Ok(())
    }

    async fn create_asset(&self, asset: &NewAsset) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let metadata = serde_json::to_value(&asset.metadata)?;
        render_jobs::insert_asset(
            &self.db,
            id,
            asset.render_job_id,
            &asset.source_media_id,
            asset.output_type.as_str(),
            &asset.storage_path,
            asset.duration_seconds,
            metadata,
        )
        .await?;
        Ok(id)
    }

    async fn list_jobs_for_clip(&self, clip_id: &str) -> Result<Vec<RenderJobSummary>, StoreError> {
        render_jobs::list_jobs_for_clip(&self.db, clip_id)
            .await?
            .into_iter()
            .map(|row| {
                let status = JobStatus::parse(&row.status).ok_or_else(|| {
                    StoreError::InvalidRow(format!("render job {} has status {:?}", row.id, row.status))
                })?;
                Ok(RenderJobSummary {
                    job: RenderJob {
                        id: row.id,
                        user_id: row.user_id,
                        job_type: row.job_type,
                        engine: row.engine,
                        params: row.params,
                        status,
                        error_message: row.error_message,
                        started_at: row.started_at,
                        completed_at: row.completed_at,
                        processing_time_seconds: row.processing_time_seconds,
                    },
                    asset_count: row.asset_count,
                })
            })
            .collect()
    }
}
