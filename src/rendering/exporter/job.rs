//! Background export jobs.
//!
//! Each export runs on a `spawn_blocking` task holding the instance's export
//! guard, so transport calls on that instance fail with `Busy` until the job
//! ends. Other instances keep playing and exporting independently.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ts_rs::TS;

use crate::error::{EditorError, EditorResult};
use crate::rendering::registry::InstanceRegistry;
use crate::rendering::types::JobId;

use super::{export_instance, EncoderFactory, ExportOptions, ExportProgress, ExportResult, ExportStage};

/// Current state of an export job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "status", rename_all = "camelCase")]
#[ts(export)]
pub enum ExportJobStatus {
    Running { progress: f32, stage: ExportStage },
    Completed { result: ExportResult },
    Failed { message: String },
    Cancelled,
}

impl ExportJobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, ExportJobStatus::Running { .. })
    }
}

struct ExportJob {
    instance_id: String,
    status: Arc<Mutex<ExportJobStatus>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Starts, tracks and cancels export jobs.
pub struct ExportManager {
    registry: Arc<InstanceRegistry>,
    factory: Arc<dyn EncoderFactory>,
    jobs: RwLock<HashMap<JobId, Arc<ExportJob>>>,
}

impl ExportManager {
    pub fn new(registry: Arc<InstanceRegistry>, factory: Arc<dyn EncoderFactory>) -> Self {
        Self {
            registry,
            factory,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Start exporting an instance. Fails with `Busy` if it is already
    /// exporting.
    pub fn start_export(&self, instance_id: &str, options: ExportOptions) -> EditorResult<JobId> {
        let instance = self.registry.get(instance_id)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EditorError::Other(format!("No async runtime for export: {}", e)))?;
        let guard = instance.begin_export()?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let status = Arc::new(Mutex::new(ExportJobStatus::Running {
            progress: 0.0,
            stage: ExportStage::Preparing,
        }));
        let cancel = CancellationToken::new();

        let task = {
            let status = Arc::clone(&status);
            let cancel = cancel.clone();
            let factory = Arc::clone(&self.factory);
            let job_id = job_id.clone();
            move || {
                let progress_status = Arc::clone(&status);
                let on_progress = move |p: ExportProgress| {
                    let mut status = progress_status.lock();
                    if !status.is_finished() {
                        *status = ExportJobStatus::Running {
                            progress: p.progress,
                            stage: p.stage,
                        };
                    }
                };

                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    export_instance(&guard, &options, factory.as_ref(), &cancel, Some(&on_progress))
                }));
                // Release transport before publishing the final status
                drop(guard);

                let final_status = match outcome {
                    Ok(Ok(result)) => ExportJobStatus::Completed { result },
                    Ok(Err(_)) if cancel.is_cancelled() => ExportJobStatus::Cancelled,
                    Ok(Err(e)) => ExportJobStatus::Failed {
                        message: e.to_string(),
                    },
                    Err(payload) => ExportJobStatus::Failed {
                        message: format!("Export panicked: {}", panic_message(payload.as_ref())),
                    },
                };
                log::info!("[EXPORT] Job {} finished: {:?}", job_id, final_status);
                *status.lock() = final_status;
            }
        };

        let handle = runtime.spawn_blocking(task);
        self.jobs.write().insert(
            job_id.clone(),
            Arc::new(ExportJob {
                instance_id: instance_id.to_string(),
                status,
                cancel,
                handle: Mutex::new(Some(handle)),
            }),
        );

        log::info!("[EXPORT] Started job {} for instance {}", job_id, instance_id);
        Ok(job_id)
    }

    fn job(&self, job_id: &str) -> EditorResult<Arc<ExportJob>> {
        self.jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| EditorError::NotFound(format!("Export job not found: {}", job_id)))
    }

    /// Request cancellation. The job stops before its next frame.
    pub fn cancel_export(&self, job_id: &str) -> EditorResult<()> {
        let job = self.job(job_id)?;
        if !job.status.lock().is_finished() {
            log::info!("[EXPORT] Cancelling job {}", job_id);
            job.cancel.cancel();
        }
        Ok(())
    }

    pub fn status(&self, job_id: &str) -> EditorResult<ExportJobStatus> {
        Ok(self.job(job_id)?.status.lock().clone())
    }

    /// Instance the job is exporting.
    pub fn instance_of(&self, job_id: &str) -> EditorResult<String> {
        Ok(self.job(job_id)?.instance_id.clone())
    }

    /// Wait for a job to finish and return its final status.
    pub async fn wait(&self, job_id: &str) -> EditorResult<ExportJobStatus> {
        let job = self.job(job_id)?;
        let handle = job.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                let message = format!("Export task failed: {}", e);
                log::error!("[EXPORT] Job {}: {}", job_id, message);
                *job.status.lock() = ExportJobStatus::Failed { message };
            }
        }
        // Another waiter owns the handle
        loop {
            let status = job.status.lock().clone();
            if status.is_finished() {
                return Ok(status);
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    /// Drop bookkeeping for finished jobs.
    pub fn clear_finished(&self) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| !job.status.lock().is_finished());
        before - jobs.len()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
