//! Batches: a view over the jobs sharing a `batch_id`.
//!
//! A batch owns no state beyond its id and priority; membership is a query
//! against the store and only matters to the scheduler as a fairness key.

use serde::Serialize;
use serde_json::Value;

use crate::client::{span, Client, WaitOptions};
use crate::error::SchedResult;
use crate::job::{Job, JobFilter, JobId, NewJob, Priority};
use crate::registry::Registry;

/// Batch identifier. Generated ids are 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BatchId(String);

impl BatchId {
    /// Generate a new random batch id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Arguments → result for a set of jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultTable {
    entries: Vec<ResultEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEntry {
    pub job_id: JobId,
    pub args: Vec<Value>,
    pub result: Option<Value>,
}

impl ResultTable {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        Self {
            entries: jobs
                .iter()
                .map(|job| ResultEntry {
                    job_id: job.id,
                    args: job.args.clone(),
                    result: job.result.clone(),
                })
                .collect(),
        }
    }

    /// Result for the given arguments. The newest job wins on duplicates.
    pub fn get(&self, args: &[Value]) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.args == args)
            .and_then(|entry| entry.result.as_ref())
    }

    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A group of jobs enqueued under one id and priority.
#[derive(Clone)]
pub struct Batch {
    id: BatchId,
    priority: Priority,
    client: Client,
}

impl Batch {
    /// Start a new batch with a generated id.
    pub fn new(client: Client) -> Self {
        Self::with_id(client, BatchId::generate())
    }

    /// Attach to an existing batch.
    pub fn with_id(client: Client, id: BatchId) -> Self {
        Self {
            id,
            priority: Priority::default(),
            client,
        }
    }

    /// Priority for jobs enqueued from now on.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> &BatchId {
        &self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    fn new_job(&self, path: &str, args: Vec<Value>) -> NewJob {
        NewJob::new(path, args)
            .in_batch(self.id.as_str())
            .with_priority(self.priority)
    }

    /// Enqueue a job under this batch.
    pub async fn enqueue(&self, path: &str, args: Vec<Value>) -> SchedResult<Job> {
        self.client.enqueue(self.new_job(path, args)).await
    }

    /// Enqueue after checking the path against a registry.
    pub async fn enqueue_checked(
        &self,
        registry: &Registry,
        path: &str,
        args: Vec<Value>,
    ) -> SchedResult<Job> {
        self.client
            .enqueue_checked(registry, self.new_job(path, args))
            .await
    }

    /// Every job in the batch, oldest first.
    pub async fn jobs(&self) -> SchedResult<Vec<Job>> {
        self.client
            .list_jobs(&JobFilter::for_batch(self.id.as_str()))
            .await
    }

    pub async fn job_ids(&self) -> SchedResult<Vec<JobId>> {
        Ok(self.jobs().await?.into_iter().map(|job| job.id).collect())
    }

    /// Block until every member is terminal, reporting percent complete.
    pub async fn wait<F>(&self, options: &WaitOptions, progress: F) -> SchedResult<Vec<Job>>
    where
        F: FnMut(f64),
    {
        let ids = self.job_ids().await?;
        self.client.wait_for_jobs(&ids, options, progress).await
    }

    pub async fn result_table(&self) -> SchedResult<ResultTable> {
        Ok(ResultTable::from_jobs(&self.jobs().await?))
    }

    /// Cancel every member. Returns how many jobs were touched.
    pub async fn cancel_all(&self) -> SchedResult<usize> {
        let ids = self.job_ids().await?;
        for id in &ids {
            self.client.cancel(*id).await?;
        }
        Ok(ids.len())
    }

    pub async fn completed_percent(&self) -> SchedResult<f64> {
        let ids = self.job_ids().await?;
        self.client.completed_percent(&ids).await
    }

    pub async fn time_taken(&self) -> SchedResult<Option<chrono::Duration>> {
        Ok(span(&self.jobs().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobState, Outcome};
    use crate::persistence::SqliteStore;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn client() -> Client {
        Client::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[test]
    fn test_generated_batch_id_format() {
        let id = BatchId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_ne!(id, BatchId::generate());
    }

    #[tokio::test]
    async fn test_batch_membership_and_priority() {
        let client = client();
        let batch = Batch::new(client.clone()).with_priority(Priority::new(2));
        let other = Batch::new(client.clone());

        batch.enqueue("string#concatenate", vec![json!("a"), json!("b")]).await.unwrap();
        batch.enqueue("string#concatenate", vec![json!("c"), json!("d")]).await.unwrap();
        other.enqueue("string#concatenate", vec![json!("e"), json!("f")]).await.unwrap();
        client.enqueue_path("string#concatenate", vec![]).await.unwrap();

        let jobs = batch.jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|job| job.priority.value() == 2));
        assert!(jobs
            .iter()
            .all(|job| job.batch_id.as_deref() == Some(batch.id().as_str())));
    }

    #[tokio::test]
    async fn test_batch_cancel_all_and_results() {
        let client = client();
        let batch = Batch::new(client.clone());

        let first = batch.enqueue("sleep#add_snoozes", vec![json!(2), json!(5)]).await.unwrap();
        let second = batch.enqueue("sleep#add_snoozes", vec![json!(1), json!(1)]).await.unwrap();

        let now = Utc::now();
        client.store().claim_job(first.id, now).await.unwrap();
        client
            .store()
            .finalize(first.id, &Outcome::Success(json!(7)), now)
            .await
            .unwrap();

        assert_eq!(batch.completed_percent().await.unwrap(), 50.0);
        assert_eq!(batch.cancel_all().await.unwrap(), 2);

        assert_eq!(client.status(first.id).await.unwrap(), JobState::Succeeded);
        assert_eq!(client.status(second.id).await.unwrap(), JobState::Cancelled);
        assert_eq!(batch.completed_percent().await.unwrap(), 100.0);

        let table = batch.result_table().await.unwrap();
        assert_eq!(table.get(&[json!(2), json!(5)]), Some(&json!(7)));
        assert_eq!(table.get(&[json!(1), json!(1)]), None);
        assert!(batch.time_taken().await.unwrap().is_none());

        let jobs = batch.wait(&WaitOptions::default(), |_| {}).await.unwrap();
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_result_table_newest_wins() {
        let mut older = crate::job::tests::make_job(1);
        older.result = Some(json!("old"));
        let mut newer = crate::job::tests::make_job(2);
        newer.args = older.args.clone();
        newer.result = Some(json!("new"));

        let table = ResultTable::from_jobs(&[older.clone(), newer]);
        assert_eq!(table.get(&older.args), Some(&json!("new")));
        assert_eq!(table.len(), 2);
    }
}
