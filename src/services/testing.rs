//! In-memory fakes for pipeline tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{
    AssetMetadata, Clip, ClipStatus, JobStatus, NewAsset, NewRenderJob, OutputFormat, RenderJob,
    RenderJobSummary, RenderParams,
};
use crate::services::cloudflare::{TranscodeError, TranscodeProvider};
use crate::services::error::StoreError;
use crate::services::job_store::{ClipStore, JobStore};

#[derive(Debug, Clone)]
pub struct StoredJob {
    pub id: Uuid,
    pub user_id: i64,
    pub params: RenderParams,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub processing_time_seconds: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StoredAsset {
    pub id: Uuid,
    pub render_job_id: Uuid,
    pub output_type: OutputFormat,
    pub storage_path: String,
    pub metadata: AssetMetadata,
}

#[derive(Default)]
struct MemoryState {
    clips: HashMap<String, Clip>,
    jobs: Vec<StoredJob>,
    assets: Vec<StoredAsset>,
    /// Every status written to any clip, in order
    clip_writes: Vec<ClipStatus>,
}

/// ClipStore + JobStore backed by a mutex-guarded map
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    pub fail_create_job: AtomicBool,
    pub fail_create_asset: AtomicBool,
    pub fail_complete_job: AtomicBool,
    pub fail_mark_ready: AtomicBool,
}

impl MemoryStore {
    pub fn with_clip(clip_id: &str) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().clips.insert(
            clip_id.to_string(),
            Clip {
                id: clip_id.to_string(),
                user_id: Some(7),
                status: ClipStatus::Pending,
                error_message: None,
                vertical_url: None,
                thumbnail_url: None,
            },
        );
        store
    }

    pub fn clip(&self, clip_id: &str) -> Clip {
        self.state.lock().unwrap().clips[clip_id].clone()
    }

    pub fn jobs(&self) -> Vec<StoredJob> {
        self.state.lock().unwrap().jobs.clone()
    }

    pub fn assets(&self) -> Vec<StoredAsset> {
        self.state.lock().unwrap().assets.clone()
    }

    pub fn assets_for(&self, job_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .assets
            .iter()
            .filter(|a| a.render_job_id == job_id)
            .count()
    }

    pub fn clip_writes(&self) -> Vec<ClipStatus> {
        self.state.lock().unwrap().clip_writes.clone()
    }

    fn write_clip(&self, clip_id: &str, update: impl FnOnce(&mut Clip)) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let clip = state
            .clips
            .get_mut(clip_id)
            .ok_or_else(|| StoreError::InvalidRow(format!("no clip {}", clip_id)))?;
        update(clip);
        let status = clip.status;
        state.clip_writes.push(status);
        Ok(())
    }

    fn finish_job(&self, job_id: Uuid, update: impl FnOnce(&mut StoredJob)) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| StoreError::InvalidRow(format!("no job {}", job_id)))?;
        if job.status == JobStatus::Processing {
            update(job);
        }
        Ok(())
    }
}

#[async_trait]
impl ClipStore for MemoryStore {
    async fn get_clip(&self, clip_id: &str) -> Result<Option<Clip>, StoreError> {
        Ok(self.state.lock().unwrap().clips.get(clip_id).cloned())
    }

    async fn mark_processing(&self, clip_id: &str) -> Result<(), StoreError> {
        self.write_clip(clip_id, |c| {
            c.status = ClipStatus::Processing;
            c.error_message = None;
        })
    }

    async fn mark_ready(
        &self,
        clip_id: &str,
        vertical_url: &str,
        thumbnail_url: &str,
    ) -> Result<(), StoreError> {
        if self.fail_mark_ready.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidRow("simulated write failure".into()));
        }
        self.write_clip(clip_id, |c| {
            c.status = ClipStatus::Ready;
            c.error_message = None;
            c.vertical_url = Some(vertical_url.to_string());
            c.thumbnail_url = Some(thumbnail_url.to_string());
        })
    }

    async fn mark_failed(
        &self,
        clip_id: &str,
        error_message: &str,
        vertical_url: Option<&str>,
        thumbnail_url: Option<&str>,
    ) -> Result<(), StoreError> {
        self.write_clip(clip_id, |c| {
            c.status = ClipStatus::Failed;
            c.error_message = Some(error_message.to_string());
            c.vertical_url = vertical_url.map(str::to_string);
            c.thumbnail_url = thumbnail_url.map(str::to_string);
        })
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, job: &NewRenderJob) -> Result<Uuid, StoreError> {
        if self.fail_create_job.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidRow("simulated insert failure".into()));
        }
        let id = Uuid::new_v4();
        self.state.lock().unwrap().jobs.push(StoredJob {
            id,
            user_id: job.user_id,
            params: job.params.clone(),
            status: JobStatus::Processing,
            error_message: None,
            processing_time_seconds: None,
        });
        Ok(id)
    }

    async fn complete_job(&self, job_id: Uuid, processing_time_seconds: f64) -> Result<(), StoreError> {
        if self.fail_complete_job.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidRow("simulated completion failure".into()));
        }
        self.finish_job(job_id, |j| {
            j.status = JobStatus::Completed;
            j.processing_time_seconds = Some(processing_time_seconds);
        })
    }

    async fn fail_job(&self, job_id: Uuid, error_message: &str) -> Result<(), StoreError> {
        self.finish_job(job_id, |j| {
            j.status = JobStatus::Failed;
            j.error_message = Some(error_message.to_string());
        })
    }

    async fn create_asset(&self, asset: &NewAsset) -> Result<Uuid, StoreError> {
        if self.fail_create_asset.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidRow("simulated asset insert failure".into()));
        }
        let id = Uuid::new_v4();
        self.state.lock().unwrap().assets.push(StoredAsset {
            id,
            render_job_id: asset.render_job_id,
            output_type: asset.output_type,
            storage_path: asset.storage_path.clone(),
            metadata: asset.metadata.clone(),
        });
        Ok(id)
    }

    async fn list_jobs_for_clip(&self, clip_id: &str) -> Result<Vec<RenderJobSummary>, StoreError> {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .iter()
            .filter(|j| j.params.clip_id == clip_id)
            .map(|j| {
                Ok(RenderJobSummary {
                    job: RenderJob {
                        id: j.id,
                        user_id: j.user_id,
                        job_type: crate::constants::JOB_TYPE_CLIP_RENDER.to_string(),
                        engine: crate::constants::ENGINE_CLOUDFLARE_STREAM.to_string(),
                        params: serde_json::to_value(&j.params)?,
                        status: j.status,
                        error_message: j.error_message.clone(),
                        started_at: chrono::Utc::now(),
                        completed_at: None,
                        processing_time_seconds: j.processing_time_seconds,
                    },
                    asset_count: state.assets.iter().filter(|a| a.render_job_id == j.id).count() as i64,
                })
            })
            .collect()
    }
}

/// Scriptable transcoding provider that counts calls
#[derive(Default)]
pub struct FakeTranscoder {
    pub upload_calls: AtomicUsize,
    /// Labels passed to `create_clip`, in call order
    pub clip_calls: Mutex<Vec<String>>,
    /// Popped one per upload call; empty means success
    pub upload_failures: Mutex<VecDeque<TranscodeError>>,
    /// Labels whose `create_clip` answers with this HTTP status
    pub failing_labels: Mutex<HashMap<String, u16>>,
    /// Cancelled while `create_clip` is in flight, after the remote clip exists
    pub cancel_during_clip: Mutex<Option<CancellationToken>>,
}

impl FakeTranscoder {
    pub fn failing_upload(err: TranscodeError) -> Self {
        let fake = Self::default();
        fake.upload_failures.lock().unwrap().push_back(err);
        fake
    }

    pub fn failing_clip(label: &str, status: u16) -> Self {
        let fake = Self::default();
        fake.failing_labels
            .lock()
            .unwrap()
            .insert(label.to_string(), status);
        fake
    }

    pub fn clip_labels(&self) -> Vec<String> {
        self.clip_calls.lock().unwrap().clone()
    }
}

pub fn rejected(operation: &'static str, status: u16, message: &str) -> TranscodeError {
    TranscodeError::Rejected {
        operation,
        status,
        message: message.to_string(),
        payload: format!(
            r#"{{"success":false,"errors":[{{"code":1003,"message":"{}"}}]}}"#,
            message
        ),
    }
}

#[async_trait]
impl TranscodeProvider for FakeTranscoder {
    async fn upload_source(&self, _source_url: &str, _name: &str) -> Result<String, TranscodeError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        match self.upload_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok("vid-1".to_string()),
        }
    }

    async fn create_clip(
        &self,
        video_id: &str,
        _start: f64,
        _end: f64,
        label: &str,
    ) -> Result<String, TranscodeError> {
        self.clip_calls.lock().unwrap().push(label.to_string());
        if let Some(token) = self.cancel_during_clip.lock().unwrap().as_ref() {
            token.cancel();
        }
        // Let the caller observe the cancellation before this call resolves
        tokio::task::yield_now().await;
        let status = self.failing_labels.lock().unwrap().get(label).copied();
        match status {
            Some(status) => Err(rejected("clip", status, "clip creation refused")),
            None => Ok(format!("{}-{}", video_id, label)),
        }
    }

    fn playback_url(&self, clip_id: &str, width: u32, height: u32) -> String {
        format!(
            "https://customer-test.cloudflarestream.com/{}/downloads/default.mp4?width={}&height={}&fit=crop",
            clip_id, width, height
        )
    }
}
