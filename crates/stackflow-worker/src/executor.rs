//! Job executor
//!
//! Runs deployments on a fixed-size pool. Each job runs in its own task, so
//! an error or a panic inside the deployer becomes a `failure` response for
//! that job and nothing else.

use crate::deploy::Deployer;
use crate::job::Job;
use crate::log::{LogSink, TracingSink};
use crate::response::Response;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct JobExecutor {
    deployer: Arc<dyn Deployer>,
    slots: Arc<Semaphore>,
    pool_size: usize,
}

impl JobExecutor {
    pub fn new(deployer: Arc<dyn Deployer>, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            deployer,
            slots: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run `job` and wait for its response
    pub async fn submit(&self, job: Job) -> Response {
        let job_name = job.name.clone();
        let request_id = job.request_id.clone();

        let permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!(job = %job_name, request_id = %request_id, "Worker pool is closed");
                return Response::failure(job_name, request_id, "Worker pool is closed");
            }
        };

        let deployer = self.deployer.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let log: Arc<dyn LogSink> =
                Arc::new(TracingSink::new(job.name.clone(), job.request_id.clone()));
            deployer.deploy(&job, log).await
        });

        match handle.await {
            Ok(Ok(())) => {
                tracing::info!(job = %job_name, request_id = %request_id, "Job succeeded");
                Response::success(job_name, request_id)
            }
            Ok(Err(error)) => {
                tracing::error!(
                    job = %job_name,
                    request_id = %request_id,
                    "Job failed: {:?}",
                    error
                );
                Response::failure(job_name, request_id, &format!("{:#}", error))
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    format!("Deployment panicked: {}", panic_message(join_error.into_panic()))
                } else {
                    "Deployment was cancelled".to_string()
                };
                tracing::error!(job = %job_name, request_id = %request_id, "{}", message);
                Response::failure(job_name, request_id, &message)
            }
        }
    }

    /// Stop accepting jobs; queued submissions fail
    pub fn close(&self) {
        self.slots.close();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
