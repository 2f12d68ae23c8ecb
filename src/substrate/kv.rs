//! The KV storage seam every bucket-backed component (plan manager, review
//! loop state) talks through instead of `Substrate` directly, so their
//! transition/error logic can be exercised against an in-memory backend
//! without a running NATS instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use tokio::sync::Mutex;

use super::{BucketSpec, Substrate};

#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    /// All keys currently in the bucket. Used by scans that can't be
    /// keyed directly (the question SLA monitor sweeping for overdue
    /// entries); not on the hot path of any per-key operation.
    async fn keys(&self) -> anyhow::Result<Vec<String>>;
}

/// Production backend: one fixed KV bucket on the shared substrate.
pub struct BucketKv {
    substrate: Arc<Substrate>,
    spec: BucketSpec,
}

impl BucketKv {
    pub fn new(substrate: Arc<Substrate>, spec: BucketSpec) -> Self {
        Self { substrate, spec }
    }
}

#[async_trait]
impl KvBackend for BucketKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let bucket = self.substrate.bucket(&self.spec).await?;
        Ok(bucket.get(key).await?.map(|b| b.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        let bucket = self.substrate.bucket(&self.spec).await?;
        bucket.put(key, value.into()).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let bucket = self.substrate.bucket(&self.spec).await?;
        bucket.delete(key).await?;
        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let bucket = self.substrate.bucket(&self.spec).await?;
        let keys = bucket.keys().await?.try_collect::<Vec<_>>().await?;
        Ok(keys)
    }
}

/// In-memory backend for unit tests.
#[derive(Default)]
pub struct MemoryKv {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.data.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.data.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.data.lock().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_kv_put_then_get_round_trips() {
        let kv = MemoryKv::default();
        kv.put("a", b"hello".to_vec()).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn memory_kv_delete_removes_key() {
        let kv = MemoryKv::default();
        kv.put("a", b"hello".to_vec()).await.unwrap();
        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_kv_keys_lists_everything_put() {
        let kv = MemoryKv::default();
        kv.put("a", b"1".to_vec()).await.unwrap();
        kv.put("b", b"2".to_vec()).await.unwrap();
        let mut keys = kv.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
