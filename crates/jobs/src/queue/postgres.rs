//! PostgreSQL-backed visibility-timeout queue
//!
//! Messages live in `generation_queue_messages`. Receiving claims visible
//! rows with `FOR UPDATE SKIP LOCKED`, pushes `visible_at` forward by the
//! visibility timeout and issues a fresh receipt handle, so concurrent
//! workers never receive the same delivery.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{error, instrument, trace};
use uuid::Uuid;

use super::transport::*;

/// How often an empty long poll re-checks the table
const LONG_POLL_STEP: Duration = Duration::from_millis(250);

/// PostgreSQL implementation of QueueTransport
#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
}

impl PostgresQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn claim(
        &self,
        queue: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let rows = sqlx::query(
            r#"
            WITH visible AS (
                SELECT id
                FROM generation_queue_messages
                WHERE queue_name = $1
                  AND visible_at <= NOW()
                ORDER BY created_at, id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE generation_queue_messages m
            SET visible_at = NOW() + make_interval(secs => $3),
                receipt_handle = gen_random_uuid(),
                receive_count = m.receive_count + 1
            FROM visible v
            WHERE m.id = v.id
            RETURNING m.id, m.body, m.receipt_handle, m.receive_count, m.created_at
            "#,
        )
        .bind(queue)
        .bind(max_messages as i64)
        .bind(visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| transport_error("Failed to receive messages", e))?;

        let mut claimed: Vec<(DateTime<Utc>, RawMessage)> = rows
            .iter()
            .map(|row| {
                let handle: Uuid = row.get("receipt_handle");
                let receive_count: i32 = row.get("receive_count");
                (
                    row.get("created_at"),
                    RawMessage {
                        message_id: row.get("id"),
                        receipt_handle: handle.to_string(),
                        body: row.get("body"),
                        receive_count: receive_count.max(0) as u32,
                    },
                )
            })
            .collect();

        // RETURNING does not preserve the CTE order
        claimed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.message_id.cmp(&b.1.message_id)));
        Ok(claimed.into_iter().map(|(_, message)| message).collect())
    }
}

fn transport_error(context: &str, e: sqlx::Error) -> QueueError {
    error!("{}: {}", context, e);
    QueueError::Transport(e.to_string())
}

fn parse_handle(message: &RawMessage) -> Result<Uuid, QueueError> {
    Uuid::parse_str(&message.receipt_handle)
        .map_err(|_| QueueError::ReceiptExpired(message.message_id))
}

#[async_trait]
impl QueueTransport for PostgresQueue {
    #[instrument(skip(self, body))]
    async fn send(&self, queue: &str, body: String) -> Result<Uuid, QueueError> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO generation_queue_messages (id, queue_name, body)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| transport_error("Failed to send message", e))?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<RawMessage>, QueueError> {
        if max_messages == 0 {
            return Ok(vec![]);
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let messages = self.claim(queue, max_messages, visibility_timeout).await?;
            let now = tokio::time::Instant::now();
            if !messages.is_empty() || now >= deadline {
                return Ok(messages);
            }
            trace!(queue, "No visible messages, waiting");
            tokio::time::sleep(LONG_POLL_STEP.min(deadline - now)).await;
        }
    }

    #[instrument(skip(self, message), fields(message_id = %message.message_id))]
    async fn delete(&self, queue: &str, message: &RawMessage) -> Result<(), QueueError> {
        let handle = parse_handle(message)?;
        let result = sqlx::query(
            r#"
            DELETE FROM generation_queue_messages
            WHERE id = $1 AND queue_name = $2 AND receipt_handle = $3
            "#,
        )
        .bind(message.message_id)
        .bind(queue)
        .bind(handle)
        .execute(&self.pool)
        .await
        .map_err(|e| transport_error("Failed to delete message", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::ReceiptExpired(message.message_id));
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(message_id = %message.message_id))]
    async fn extend_visibility(
        &self,
        queue: &str,
        message: &RawMessage,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let handle = parse_handle(message)?;
        let result = sqlx::query(
            r#"
            UPDATE generation_queue_messages
            SET visible_at = NOW() + make_interval(secs => $4)
            WHERE id = $1 AND queue_name = $2 AND receipt_handle = $3
            "#,
        )
        .bind(message.message_id)
        .bind(queue)
        .bind(handle)
        .bind(timeout.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| transport_error("Failed to extend message visibility", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::ReceiptExpired(message.message_id));
        }
        Ok(())
    }
}
