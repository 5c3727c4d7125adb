use crate::core::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// A tracked background operation (reindex, bulk op, index deletion).
/// At most one exists per index at a time; the admin path uses
/// [`JobManager::count_for`] as the "busy" gate before starting a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub index: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub progress: f64,
}

pub struct JobManager {
    jobs: RwLock<HashMap<String, Job>>,
    poll_interval: Duration,
}

impl JobManager {
    pub fn new(poll_interval: Duration) -> Self {
        JobManager { jobs: RwLock::new(HashMap::new()), poll_interval }
    }

    /// Register a new job for `index`. Fails with `Error::Busy` if one is
    /// already running, enforcing the one-job-per-index invariant.
    pub fn create(&self, index: &str, title: &str) -> Result<Job> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(index) {
            return Err(Error::Busy(index.to_string()));
        }
        let job = Job {
            id: Uuid::new_v4().to_string(),
            index: index.to_string(),
            title: title.to_string(),
            start: Utc::now(),
            progress: 0.0,
        };
        jobs.insert(index.to_string(), job.clone());
        info!(index, title, job_id = %job.id, "job created");
        Ok(job)
    }

    pub fn update(&self, index: &str, progress: f64) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(index).ok_or_else(|| {
            warn!(index, "progress update for index with no running job");
            Error::InvalidUpdate(format!("no job running for index '{index}'"))
        })?;
        job.progress = progress.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn finish(&self, index: &str) {
        if let Some(job) = self.jobs.write().remove(index) {
            info!(index, title = %job.title, job_id = %job.id, "job finished");
        }
    }

    pub fn get(&self, index: &str) -> Option<Job> {
        self.jobs.read().get(index).cloned()
    }

    pub fn count_for(&self, index: &str) -> usize {
        usize::from(self.jobs.read().contains_key(index))
    }

    /// Poll until no jobs remain, used at shutdown to drain in-flight admin
    /// operations before the store closes.
    pub async fn wait_for_all(&self) {
        loop {
            if self.jobs.read().is_empty() {
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_second_job_for_same_index() {
        let manager = JobManager::new(Duration::from_millis(10));
        manager.create("tickets", "reindex").unwrap();
        assert!(manager.create("tickets", "reindex").is_err());
    }

    #[test]
    fn update_then_finish_clears_job() {
        let manager = JobManager::new(Duration::from_millis(10));
        manager.create("tickets", "reindex").unwrap();
        manager.update("tickets", 0.5).unwrap();
        assert_eq!(manager.get("tickets").unwrap().progress, 0.5);
        manager.finish("tickets");
        assert_eq!(manager.count_for("tickets"), 0);
    }

    #[tokio::test]
    async fn wait_for_all_returns_once_jobs_drain() {
        let manager = std::sync::Arc::new(JobManager::new(Duration::from_millis(5)));
        manager.create("tickets", "reindex").unwrap();
        let waiter = manager.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_all().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.finish("tickets");
        handle.await.unwrap();
    }
}
