//! Durable destination for generated content
//!
//! The processor writes through a [`ResultSink`] before marking a job
//! completed. Writes are keyed by job id and idempotent, so a redelivered
//! message that reaches the sink again overwrites rather than duplicates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use tracing::{error, instrument};
use uuid::Uuid;

use super::client::GenerationOutput;
use crate::job::{Job, JobKind};

/// Error type for result sink writes
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(String),

    /// Backend returned nothing storable for this kind
    #[error("generation output has no {0}")]
    EmptyOutput(&'static str),
}

/// Content as stored by a sink
#[derive(Debug, Clone, PartialEq)]
pub struct StoredContent {
    pub content_id: Uuid,
    pub job_id: Uuid,
    pub owner_id: String,
    pub kind: JobKind,
    pub content: Option<String>,
    pub asset_url: Option<String>,
    pub body: Value,
}

impl StoredContent {
    fn from_output(content_id: Uuid, job: &Job, output: &GenerationOutput) -> Result<Self, SinkError> {
        let content = output.content().map(str::to_string);
        let asset_url = output.asset_url().map(str::to_string);

        match job.kind() {
            JobKind::Article if content.is_none() => return Err(SinkError::EmptyOutput("content")),
            JobKind::Image | JobKind::Video if asset_url.is_none() => {
                return Err(SinkError::EmptyOutput("asset url"))
            }
            _ => {}
        }

        Ok(Self {
            content_id,
            job_id: job.id,
            owner_id: job.owner_id.clone(),
            kind: job.kind(),
            content,
            asset_url,
            body: output.body.clone(),
        })
    }

    /// Reference stored in the job's `result` field
    pub fn reference(&self) -> Value {
        let mut reference = json!({
            "contentId": self.content_id,
            "kind": self.kind,
        });
        if let (Some(url), Value::Object(map)) = (&self.asset_url, &mut reference) {
            map.insert("assetUrl".to_string(), Value::String(url.clone()));
        }
        reference
    }
}

/// Durable write of generated content
#[async_trait]
pub trait ResultSink: Send + Sync + 'static {
    /// Store the output for `job` and return the reference to record on the job
    async fn persist(&self, job: &Job, output: &GenerationOutput) -> Result<Value, SinkError>;
}

/// In-memory implementation of ResultSink
pub struct InMemoryResultSink {
    items: RwLock<HashMap<Uuid, StoredContent>>,
    failing: AtomicBool,
}

impl InMemoryResultSink {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Stored content for a job
    pub fn get(&self, job_id: Uuid) -> Option<StoredContent> {
        self.items.read().get(&job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Make subsequent writes fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

impl Default for InMemoryResultSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultSink for InMemoryResultSink {
    async fn persist(&self, job: &Job, output: &GenerationOutput) -> Result<Value, SinkError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(SinkError::Database("injected sink failure".to_string()));
        }

        let mut items = self.items.write();
        let content_id = items
            .get(&job.id)
            .map_or_else(Uuid::now_v7, |existing| existing.content_id);
        let stored = StoredContent::from_output(content_id, job, output)?;
        let reference = stored.reference();
        items.insert(job.id, stored);
        Ok(reference)
    }
}

/// PostgreSQL implementation of ResultSink (`generated_content` table)
#[derive(Clone)]
pub struct PostgresResultSink {
    pool: PgPool,
}

impl PostgresResultSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ResultSink for PostgresResultSink {
    #[instrument(skip(self, job, output), fields(job_id = %job.id, kind = %job.kind()))]
    async fn persist(&self, job: &Job, output: &GenerationOutput) -> Result<Value, SinkError> {
        let stored = StoredContent::from_output(Uuid::now_v7(), job, output)?;

        // Upsert keeps the first content id on redelivery
        let row = sqlx::query(
            r#"
            INSERT INTO generated_content (id, job_id, owner_id, kind, content, asset_url, body, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (job_id) DO UPDATE
            SET content = EXCLUDED.content,
                asset_url = EXCLUDED.asset_url,
                body = EXCLUDED.body
            RETURNING id
            "#,
        )
        .bind(stored.content_id)
        .bind(stored.job_id)
        .bind(&stored.owner_id)
        .bind(stored.kind.as_str())
        .bind(&stored.content)
        .bind(&stored.asset_url)
        .bind(&stored.body)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to persist generated content: {}", e);
            SinkError::Database(e.to_string())
        })?;

        let stored = StoredContent {
            content_id: row.get("id"),
            ..stored
        };
        Ok(stored.reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ArticlePayload, GenerationRequest, ImagePayload};

    #[tokio::test]
    async fn test_persist_is_idempotent_per_job() {
        let sink = InMemoryResultSink::new();
        let job = Job::new("u1", GenerationRequest::Image(ImagePayload::new("fox")));
        let output = GenerationOutput::new(json!({"success": true, "image_url": "https://cdn/fox.png"}));

        let first = sink.persist(&job, &output).await.unwrap();
        let second = sink.persist(&job, &output).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first["assetUrl"], "https://cdn/fox.png");
        assert_eq!(first["kind"], "image");
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_rejects_empty_article() {
        let sink = InMemoryResultSink::new();
        let job = Job::new("u1", GenerationRequest::Article(ArticlePayload::topic("rust")));

        let err = sink
            .persist(&job, &GenerationOutput::new(json!({"success": true})))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::EmptyOutput("content")));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let sink = InMemoryResultSink::new();
        sink.set_failing(true);
        let job = Job::new("u1", GenerationRequest::Article(ArticlePayload::topic("rust")));

        let result = sink
            .persist(&job, &GenerationOutput::new(json!({"content": "# Rust"})))
            .await;
        assert!(matches!(result, Err(SinkError::Database(_))));
    }
}
