// Job publisher implementation for NATS JetStream

use crate::errors::QueueError;
use crate::models::Job;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::context::PublishAckFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Wire format for a job dispatched to a worker. Carries just enough to re-fetch the
/// authoritative `Job` row; the payload itself never travels over the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_uuid: Uuid,
    pub job_id: String,
    pub job_queue_name: String,
    pub attempt: i32,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl JobMessage {
    pub fn for_job(job: &Job, attempt: i32) -> Self {
        Self {
            job_uuid: job.uuid,
            job_id: job.job_id.clone(),
            job_queue_name: job.job_queue_name.clone(),
            attempt,
            published_at: chrono::Utc::now(),
        }
    }
}

/// Publishes jobs onto the `(task_type, engine)`-keyed work queue.
#[async_trait::async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, job: &Job, attempt: i32) -> Result<(), QueueError>;

    async fn publish_with_retry(
        &self,
        job: &Job,
        attempt: i32,
        max_retries: u32,
    ) -> Result<(), QueueError>;
}

/// NATS-based job publisher. One subject per queue name keeps worker pools scoped to a
/// single `(task_type, engine)` pairing without needing separate streams per engine.
pub struct NatsJobPublisher {
    client: NatsClient,
    subject_prefix: String,
    publish_timeout: Duration,
}

impl NatsJobPublisher {
    pub fn new(client: NatsClient) -> Self {
        let subject_prefix = format!("jobs.{}", client.config().stream_name.to_lowercase());
        Self { client, subject_prefix, publish_timeout: Duration::from_secs(5) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    fn subject_for(&self, job_queue_name: &str) -> String {
        format!("{}.{}", self.subject_prefix, job_queue_name)
    }
}

#[async_trait::async_trait]
impl JobPublisher for NatsJobPublisher {
    #[instrument(skip(self, job), fields(
        job_uuid = %job.uuid,
        job_id = %job.job_id,
        job_queue_name = %job.job_queue_name,
        attempt = attempt,
    ))]
    async fn publish(&self, job: &Job, attempt: i32) -> Result<(), QueueError> {
        info!("Publishing job to queue");

        let message = JobMessage::for_job(job, attempt);
        let payload = serde_json::to_vec(&message)
            .map_err(|e| QueueError::SerializationFailed(format!("Failed to serialize job message: {}", e)))?;

        let subject = self.subject_for(&job.job_queue_name);
        let jetstream = self.client.jetstream();

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", job.job_id.as_str());
        headers.insert("Job-Uuid", job.uuid.to_string().as_str());

        let publish_future: PublishAckFuture = jetstream
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        let ack_result = tokio::time::timeout(self.publish_timeout, publish_future).await;

        match ack_result {
            Ok(Ok(_ack)) => {
                info!(subject = %subject, "Job published successfully");
                Ok(())
            }
            Ok(Err(e)) => {
                Err(QueueError::PublishFailed(format!("Failed to get publish acknowledgment: {}", e)))
            }
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }

    #[instrument(skip(self, job), fields(job_uuid = %job.uuid, max_retries = max_retries))]
    async fn publish_with_retry(
        &self,
        job: &Job,
        attempt: i32,
        max_retries: u32,
    ) -> Result<(), QueueError> {
        let mut tries = 0;
        let mut last_error = None;

        while tries <= max_retries {
            match self.publish(job, attempt).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tries += 1;
                    last_error = Some(e);

                    if tries <= max_retries {
                        let delay = Duration::from_millis(100 * 2_u64.pow(tries - 1));
                        warn!(attempt = tries, delay_ms = delay.as_millis(), "Publish failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            QueueError::PublishFailed("Unknown error during publish with retry".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, TriggerSource};
    use chrono::Utc;
    use serde_json::json;

    fn sample_job() -> Job {
        Job {
            uuid: Uuid::new_v4(),
            job_id: "job-123".to_string(),
            api_key_id: Uuid::new_v4(),
            job_type: crate::models::TaskType::Scrape,
            job_queue_name: "scrape-cheerio".to_string(),
            url: "https://example.com".to_string(),
            payload: json!({}),
            origin: TriggerSource::Scheduler,
            status: JobStatus::Pending,
            is_success: None,
            total: 1,
            completed: 0,
            failed: 0,
            credits_used: 0,
            deducted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expire_at: Utc::now() + chrono::Duration::days(1),
        }
    }

    #[test]
    fn job_message_carries_queue_name_and_attempt() {
        let job = sample_job();
        let message = JobMessage::for_job(&job, 2);
        assert_eq!(message.job_uuid, job.uuid);
        assert_eq!(message.job_queue_name, "scrape-cheerio");
        assert_eq!(message.attempt, 2);
    }

    #[test]
    fn job_message_round_trips_through_json() {
        let message = JobMessage::for_job(&sample_job(), 0);
        let json = serde_json::to_string(&message).unwrap();
        let deserialized: JobMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(message.job_uuid, deserialized.job_uuid);
        assert_eq!(message.job_queue_name, deserialized.job_queue_name);
    }
}
