use crate::downloader::DownloadJob;
use crate::model::JobId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Currently active download jobs, keyed by job identity.
///
/// No deduplication: two jobs for the same URL are tracked independently.
#[derive(Default)]
pub struct DownloadRegistry {
    jobs: Mutex<HashMap<JobId, Arc<DownloadJob>>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_active_download(&self, job: Arc<DownloadJob>) {
        self.jobs.lock().insert(job.id(), job);
    }

    pub fn remove_active_download(&self, id: JobId) -> Option<Arc<DownloadJob>> {
        self.jobs.lock().remove(&id)
    }

    pub fn get(&self, id: JobId) -> Option<Arc<DownloadJob>> {
        self.jobs.lock().get(&id).cloned()
    }

    pub fn active(&self) -> Vec<Arc<DownloadJob>> {
        self.jobs.lock().values().cloned().collect()
    }

    /// All tracked jobs whose canonical URL equals `url`.
    pub fn jobs_for(&self, url: &str) -> Vec<Arc<DownloadJob>> {
        self.jobs
            .lock()
            .values()
            .filter(|job| job.url() == url)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Requests cancellation of every job; returns how many were downloading.
    pub fn cancel_all(&self) -> usize {
        let jobs = self.active();
        let canceled = jobs.iter().filter(|job| job.cancel()).count();
        info!("Canceled {} of {} tracked downloads", canceled, jobs.len());
        canceled
    }

    /// Drops jobs that reached a terminal state and returns them.
    pub fn prune_finished(&self) -> Vec<Arc<DownloadJob>> {
        let mut jobs = self.jobs.lock();
        let finished: Vec<JobId> = jobs
            .iter()
            .filter(|(_, job)| job.status().is_terminal())
            .map(|(id, _)| *id)
            .collect();
        finished.iter().filter_map(|id| jobs.remove(id)).collect()
    }
}
