//! In-memory watermark store.
//!
//! Used by tests and by ephemeral runs without a database. Honors the same
//! compare-and-swap contract as the PostgreSQL store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use watchtower_core::error::{StorageError, StorageResult};
use watchtower_core::models::Watermark;
use watchtower_core::ports::WatermarkStore;

/// Process-local implementation of [`WatermarkStore`].
#[derive(Default)]
pub struct InMemoryWatermarkStore {
    watermarks: RwLock<HashMap<String, Watermark>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, job_id: &str) -> StorageResult<Option<Watermark>> {
        Ok(self.watermarks.read().await.get(job_id).cloned())
    }

    async fn compare_and_set(
        &self,
        expected: Option<u64>,
        new: &Watermark,
    ) -> StorageResult<()> {
        let mut watermarks = self.watermarks.write().await;
        let current = watermarks.get(&new.job_id).map(|w| w.position);
        if current != expected {
            return Err(StorageError::Conflict {
                job_id: new.job_id.clone(),
                expected,
            });
        }
        watermarks.insert(new.job_id.clone(), new.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_commit_requires_no_prior_row() {
        let store = InMemoryWatermarkStore::new();
        let mark = Watermark::new("job-a", 100);

        store.compare_and_set(None, &mark).await.unwrap();
        let stored = store.get("job-a").await.unwrap().unwrap();
        assert_eq!(stored.position, 100);
    }

    #[tokio::test]
    async fn advance_from_observed_position() {
        let store = InMemoryWatermarkStore::new();
        store
            .compare_and_set(None, &Watermark::new("job-a", 100))
            .await
            .unwrap();

        store
            .compare_and_set(Some(100), &Watermark::new("job-a", 150))
            .await
            .unwrap();
        assert_eq!(store.get("job-a").await.unwrap().unwrap().position, 150);
    }

    // Test critique: un écrivain en retard ne doit jamais écraser une
    // position plus récente
    #[tokio::test]
    async fn stale_writer_is_rejected() {
        let store = InMemoryWatermarkStore::new();
        store
            .compare_and_set(None, &Watermark::new("job-a", 200))
            .await
            .unwrap();

        let err = store
            .compare_and_set(Some(100), &Watermark::new("job-a", 150))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict { expected: Some(100), .. }
        ));
        // Position intacte
        assert_eq!(store.get("job-a").await.unwrap().unwrap().position, 200);
    }

    #[tokio::test]
    async fn double_insert_conflicts() {
        let store = InMemoryWatermarkStore::new();
        store
            .compare_and_set(None, &Watermark::new("job-a", 1))
            .await
            .unwrap();

        let err = store
            .compare_and_set(None, &Watermark::new("job-a", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { expected: None, .. }));
    }

    #[tokio::test]
    async fn jobs_are_isolated() {
        let store = InMemoryWatermarkStore::new();
        store
            .compare_and_set(None, &Watermark::new("job-a", 10))
            .await
            .unwrap();
        store
            .compare_and_set(None, &Watermark::new("job-b", 20))
            .await
            .unwrap();

        assert_eq!(store.get("job-a").await.unwrap().unwrap().position, 10);
        assert_eq!(store.get("job-b").await.unwrap().unwrap().position, 20);
        assert!(store.get("job-c").await.unwrap().is_none());
    }
}
