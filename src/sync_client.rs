//src/sync_client.rs
use crate::models::{ExerciseSessionRecord, TraineeRecord, TrainingCatalog};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

/// The remote side of sync. The server is treated as an opaque store: only
/// success/failure of each call matters.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// GET the comprehensive trainee record (defaults, progress, history, FTE flag).
    async fn fetch_trainee_record(&self) -> Result<TraineeRecord>;
    /// POST a full-record resync.
    async fn push_trainee_record(&self, record: &TraineeRecord) -> Result<()>;
    /// POST a single completed exercise.
    async fn push_exercise_session(&self, record: &ExerciseSessionRecord) -> Result<()>;
    /// GET the trainee's assigned training plan(s).
    async fn fetch_training_plans(&self) -> Result<Vec<TrainingCatalog>>;
}

pub struct SyncClient {
    http_client: Client,
    server_url: String,
    trainee_id: String,
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>, trainee_id: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            trainee_id: trainee_id.into(),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/trainees/{}/{}", self.server_url, self.trainee_id, suffix)
    }

    async fn check(response: Response, what: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Could not read error body".to_string());
        error!("{} failed with status: {}. Body: {}", what, status, error_body);
        bail!("Server returned error: {} - {}", status, error_body);
    }

    async fn get_json<T: DeserializeOwned>(&self, suffix: &str) -> Result<T> {
        let url = self.url(suffix);
        debug!("Sending GET to {}", url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to send GET request to {url}"))?;
        Self::check(response, &format!("GET {url}"))
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to deserialize response from GET {url}"))
    }

    async fn post_json<T: serde::Serialize + ?Sized>(&self, suffix: &str, body: &T) -> Result<()> {
        let url = self.url(suffix);
        debug!("Sending POST to {}", url);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send POST request to {url}"))?;
        Self::check(response, &format!("POST {url}")).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for SyncClient {
    async fn fetch_trainee_record(&self) -> Result<TraineeRecord> {
        let record: TraineeRecord = self.get_json("record").await?;
        info!(
            "Received trainee record: {} plans with defaults, {} trainings with progress, {} exercises with history",
            record.defaults.len(),
            record.progress.len(),
            record.history.len()
        );
        Ok(record)
    }

    async fn push_trainee_record(&self, record: &TraineeRecord) -> Result<()> {
        info!(
            "Pushing full resync: {} exercises with history",
            record.history.len()
        );
        self.post_json("record", record).await
    }

    async fn push_exercise_session(&self, record: &ExerciseSessionRecord) -> Result<()> {
        info!(
            "Pushing completed exercise '{}' ({} sets)",
            record.exercise,
            record.entry.sets_data.len()
        );
        self.post_json("sessions", record).await
    }

    async fn fetch_training_plans(&self) -> Result<Vec<TrainingCatalog>> {
        let plans: Vec<TrainingCatalog> = self.get_json("plans").await?;
        info!("Received {} assigned training plan(s)", plans.len());
        Ok(plans)
    }
}
