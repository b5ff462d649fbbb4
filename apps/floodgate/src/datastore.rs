//! Stream-metadata storage. The gateway records which streams are
//! publishing; everything else about persistence lives behind the
//! [`DataStore`] trait so backends stay interchangeable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::Config;

pub const DB_TYPE_MEMORYDB: &str = "memorydb";
pub const DB_TYPE_REDISDB: &str = "redisdb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Publishing,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream_id: String,
    pub status: StreamStatus,
    pub created_at: DateTime<Utc>,
}

impl StreamRecord {
    pub fn publishing(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            status: StreamStatus::Publishing,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DataStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn put_stream(&self, record: StreamRecord) -> Result<(), DataStoreError>;
    async fn get_stream(&self, stream_id: &str) -> Result<Option<StreamRecord>, DataStoreError>;
    async fn set_status(&self, stream_id: &str, status: StreamStatus)
        -> Result<(), DataStoreError>;
    async fn remove_stream(&self, stream_id: &str) -> Result<(), DataStoreError>;
}

/// In-process backend, the default for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryDataStore {
    streams: RwLock<HashMap<String, StreamRecord>>,
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn put_stream(&self, record: StreamRecord) -> Result<(), DataStoreError> {
        self.streams
            .write()
            .await
            .insert(record.stream_id.clone(), record);
        Ok(())
    }

    async fn get_stream(&self, stream_id: &str) -> Result<Option<StreamRecord>, DataStoreError> {
        Ok(self.streams.read().await.get(stream_id).cloned())
    }

    async fn set_status(
        &self,
        stream_id: &str,
        status: StreamStatus,
    ) -> Result<(), DataStoreError> {
        if let Some(record) = self.streams.write().await.get_mut(stream_id) {
            record.status = status;
        }
        Ok(())
    }

    async fn remove_stream(&self, stream_id: &str) -> Result<(), DataStoreError> {
        self.streams.write().await.remove(stream_id);
        Ok(())
    }
}

/// Redis backend: `stream:{id}` keys holding JSON records.
#[derive(Clone)]
pub struct RedisDataStore {
    redis: ConnectionManager,
}

impl RedisDataStore {
    pub async fn connect(redis_url: &str) -> Result<Self, DataStoreError> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }
}

fn stream_key(stream_id: &str) -> String {
    format!("stream:{stream_id}")
}

#[async_trait]
impl DataStore for RedisDataStore {
    async fn put_stream(&self, record: StreamRecord) -> Result<(), DataStoreError> {
        let mut conn = self.redis.clone();
        let value = serde_json::to_string(&record)?;
        conn.set::<_, _, ()>(stream_key(&record.stream_id), value)
            .await?;
        Ok(())
    }

    async fn get_stream(&self, stream_id: &str) -> Result<Option<StreamRecord>, DataStoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(stream_key(stream_id)).await?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_status(
        &self,
        stream_id: &str,
        status: StreamStatus,
    ) -> Result<(), DataStoreError> {
        if let Some(mut record) = self.get_stream(stream_id).await? {
            record.status = status;
            self.put_stream(record).await?;
        }
        Ok(())
    }

    async fn remove_stream(&self, stream_id: &str) -> Result<(), DataStoreError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(stream_key(stream_id)).await?;
        Ok(())
    }
}

/// Picks the backend named by `db_type`. Unknown types are a startup
/// error rather than a silent fallback.
pub async fn create(config: &Config) -> anyhow::Result<Arc<dyn DataStore>> {
    let store: Arc<dyn DataStore> = match config.db_type.as_str() {
        DB_TYPE_MEMORYDB => Arc::new(MemoryDataStore::default()),
        DB_TYPE_REDISDB => Arc::new(RedisDataStore::connect(&config.redis_url).await?),
        other => anyhow::bail!("unknown datastore type: {other}"),
    };
    info!(db_type = %config.db_type, "datastore ready");
    Ok(store)
}
