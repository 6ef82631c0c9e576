//! Redis Streams source.
//!
//! Reads through a consumer group so several dispatcher replicas share one
//! stream. Entries are acknowledged as soon as they are read: delivery is
//! at-most-once, and a request lost after the ack is not redelivered.

use super::MessageSource;
use crate::server::config::StreamConfig;
use async_trait::async_trait;
use coderealm_core::{Error, Result};
use redis::{
    AsyncCommands,
    aio::MultiplexedConnection,
    streams::{StreamReadOptions, StreamReadReply},
};
use std::collections::VecDeque;

/// Entry field holding the JSON request.
pub const PAYLOAD_FIELD: &str = "payload";

/// Entries fetched per `XREADGROUP` call.
const READ_BATCH: usize = 16;

pub struct RedisStreamSource {
    stream: String,
    group: String,
    consumer: String,
    block_ms: usize,
    conn: MultiplexedConnection,
    pending: VecDeque<Vec<u8>>,
}

impl RedisStreamSource {
    /// Opens a dedicated connection and creates the consumer group if it does
    /// not exist yet.
    ///
    /// Blocking reads hold the connection, so each source gets its own
    /// rather than sharing the cache's.
    pub async fn connect(
        uri: &str,
        config: &StreamConfig,
        consumer: &str,
        block_ms: usize,
    ) -> Result<Self> {
        let source_error = |e: redis::RedisError| Error::Source {
            stream: config.stream.clone(),
            reason: e.to_string(),
        };

        let client = redis::Client::open(uri).map_err(source_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(source_error)?;

        let mut source = Self {
            stream: config.stream.clone(),
            group: config.group.clone(),
            consumer: consumer.to_string(),
            block_ms,
            conn,
            pending: VecDeque::new(),
        };
        source.ensure_group().await?;
        Ok(source)
    }

    async fn ensure_group(&mut self) -> Result<()> {
        let created: redis::RedisResult<()> = self
            .conn
            .xgroup_create_mkstream(&self.stream, &self.group, "$")
            .await;

        match created {
            Ok(()) => {
                tracing::info!(stream = %self.stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(self.error(&e)),
        }
    }

    /// Reads one batch of new entries into `pending` and acknowledges them.
    async fn fill(&mut self) -> Result<()> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .block(self.block_ms)
            .count(READ_BATCH);

        // `None` when the block timeout elapses with nothing new.
        let reply: redis::RedisResult<Option<StreamReadReply>> = self
            .conn
            .xread_options(&[&self.stream], &[">"], &opts)
            .await;
        let Some(reply) = reply.map_err(|e| self.error(&e))? else {
            return Ok(());
        };

        let mut ids = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                match entry.get::<Vec<u8>>(PAYLOAD_FIELD) {
                    Some(payload) => self.pending.push_back(payload),
                    None => tracing::warn!(
                        stream = %self.stream,
                        id = %entry.id,
                        "Entry has no {PAYLOAD_FIELD} field"
                    ),
                }
                ids.push(entry.id);
            }
        }

        if !ids.is_empty() {
            let acked: redis::RedisResult<usize> =
                self.conn.xack(&self.stream, &self.group, &ids).await;
            acked.map_err(|e| self.error(&e))?;
        }
        Ok(())
    }

    fn error(&self, err: &redis::RedisError) -> Error {
        Error::Source {
            stream: self.stream.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl MessageSource for RedisStreamSource {
    fn name(&self) -> &str {
        &self.stream
    }

    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(payload) = self.pending.pop_front() {
                return Ok(Some(payload));
            }
            self.fill().await?;
        }
    }
}
