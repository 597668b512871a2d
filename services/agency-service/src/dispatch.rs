//! In-process queue for follow-on posting work triggered by other
//! workflows. Jobs are best effort: a full queue drops the job with a log
//! line and the triggering request still succeeds.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::service;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub struct PostingJob {
    pub client_id: i64,
    /// `None` covers every posting asset of the client.
    pub asset_ids: Option<Vec<i64>>,
    pub actor_id: Option<i64>,
    pub reason: &'static str,
}

#[derive(Clone)]
pub struct PostingDispatcher {
    sender: mpsc::Sender<PostingJob>,
}

impl PostingDispatcher {
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<PostingJob>) {
        let (sender, receiver) = mpsc::channel(depth.max(1));
        (Self { sender }, receiver)
    }

    pub fn dispatch(&self, job: PostingJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                tracing::warn!(
                    client_id = job.client_id,
                    reason = job.reason,
                    "posting queue full, dropping job"
                );
                false
            }
            Err(TrySendError::Closed(job)) => {
                tracing::error!(
                    client_id = job.client_id,
                    reason = job.reason,
                    "posting worker stopped, dropping job"
                );
                false
            }
        }
    }
}

pub fn spawn_posting_worker(
    state: AppState,
    mut receiver: mpsc::Receiver<PostingJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let result = service::run_posting_job(&state, &job).await;
            match result {
                Ok(response) => tracing::info!(
                    client_id = job.client_id,
                    reason = job.reason,
                    batch_id = response.batch_id.as_str(),
                    created = response.created_task_ids.len(),
                    "posting job finished"
                ),
                Err(err) => tracing::warn!(
                    client_id = job.client_id,
                    reason = job.reason,
                    code = err.body.code,
                    message = err.body.message.as_str(),
                    "posting job failed"
                ),
            }
        }
        tracing::info!("posting worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::{PostingDispatcher, PostingJob};

    fn job(client_id: i64) -> PostingJob {
        PostingJob {
            client_id,
            asset_ids: Some(vec![4]),
            actor_id: Some(1),
            reason: "qc_approved",
        }
    }

    #[test]
    fn queues_until_full() {
        let (dispatcher, mut receiver) = PostingDispatcher::channel(1);
        assert!(dispatcher.dispatch(job(1)));
        assert!(!dispatcher.dispatch(job(2)));
        assert_eq!(receiver.try_recv().ok(), Some(job(1)));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn closed_queue_drops_jobs() {
        let (dispatcher, receiver) = PostingDispatcher::channel(4);
        drop(receiver);
        assert!(!dispatcher.dispatch(job(1)));
    }
}
