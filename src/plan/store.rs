//! Filesystem-mirrored KV persistence for plan/phase/task documents.
//!
//! The `PLANS` KV bucket is the source of truth. `PlanStore` talks to it
//! through the [`KvBackend`] trait rather than `Substrate` directly, so
//! tests exercise the manager's transition/error logic against an
//! in-memory backend without a running NATS instance.

use std::path::PathBuf;
use std::sync::Arc;

use planloop_types::{Phase, PlanManagerError, Task};
use tracing::warn;

use crate::substrate::{BucketKv, BucketSpec, KvBackend, Substrate};

const BUCKET: &str = "PLANS";

pub struct PlanStore {
    kv: Arc<dyn KvBackend>,
    mirror_root: PathBuf,
}

impl PlanStore {
    pub fn new(substrate: Arc<Substrate>, mirror_root: PathBuf) -> Self {
        Self {
            kv: Arc::new(BucketKv::new(substrate, BucketSpec::new(BUCKET))),
            mirror_root,
        }
    }

    pub fn with_backend(kv: Arc<dyn KvBackend>, mirror_root: PathBuf) -> Self {
        Self { kv, mirror_root }
    }

    fn plan_key(slug: &str) -> String {
        format!("plan.{slug}")
    }

    fn phases_key(slug: &str) -> String {
        format!("phases.{slug}")
    }

    fn tasks_key(slug: &str) -> String {
        format!("tasks.{slug}")
    }

    pub async fn load_plan(&self, slug: &str) -> Result<planloop_types::Plan, PlanManagerError> {
        let bytes = self
            .kv
            .get(&Self::plan_key(slug))
            .await
            .map_err(|e| PlanManagerError::Io {
                slug: slug.to_string(),
                source: std::io::Error::other(e.to_string()),
            })?
            .ok_or_else(|| PlanManagerError::PlanNotFound { slug: slug.to_string() })?;
        serde_json::from_slice(&bytes).map_err(|source| PlanManagerError::Corrupt {
            slug: slug.to_string(),
            source,
        })
    }

    pub async fn save_plan(&self, plan: &planloop_types::Plan) -> Result<(), PlanManagerError> {
        let bytes = serde_json::to_vec_pretty(plan).map_err(|source| PlanManagerError::Corrupt {
            slug: plan.slug.clone(),
            source,
        })?;
        self.kv
            .put(&Self::plan_key(&plan.slug), bytes.clone())
            .await
            .map_err(|e| PlanManagerError::Io {
                slug: plan.slug.clone(),
                source: std::io::Error::other(e.to_string()),
            })?;
        self.mirror(&plan.slug, "plan.json", &bytes).await;
        Ok(())
    }

    /// Every plan currently in the bucket, derived from the `plan.*` keys.
    pub async fn list_plans(&self) -> Result<Vec<planloop_types::Plan>, PlanManagerError> {
        let keys = self.kv.keys().await.map_err(|e| PlanManagerError::Io {
            slug: String::new(),
            source: std::io::Error::other(e.to_string()),
        })?;
        let mut plans = Vec::new();
        for key in keys {
            let Some(slug) = key.strip_prefix("plan.") else { continue };
            plans.push(self.load_plan(slug).await?);
        }
        Ok(plans)
    }

    pub async fn delete_plan(&self, slug: &str) -> Result<(), PlanManagerError> {
        self.kv
            .delete(&Self::plan_key(slug))
            .await
            .map_err(|e| PlanManagerError::Io {
                slug: slug.to_string(),
                source: std::io::Error::other(e.to_string()),
            })
    }

    pub async fn load_phases(&self, slug: &str) -> Result<Vec<Phase>, PlanManagerError> {
        match self.kv.get(&Self::phases_key(slug)).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).map_err(|source| PlanManagerError::Corrupt {
                slug: slug.to_string(),
                source,
            }),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(PlanManagerError::Io {
                slug: slug.to_string(),
                source: std::io::Error::other(e.to_string()),
            }),
        }
    }

    pub async fn save_phases(&self, slug: &str, phases: &[Phase]) -> Result<(), PlanManagerError> {
        let bytes = serde_json::to_vec_pretty(phases).map_err(|source| PlanManagerError::Corrupt {
            slug: slug.to_string(),
            source,
        })?;
        self.kv
            .put(&Self::phases_key(slug), bytes.clone())
            .await
            .map_err(|e| PlanManagerError::Io {
                slug: slug.to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;
        self.mirror(slug, "phases.json", &bytes).await;
        Ok(())
    }

    pub async fn load_tasks(&self, slug: &str) -> Result<Vec<Task>, PlanManagerError> {
        match self.kv.get(&Self::tasks_key(slug)).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).map_err(|source| PlanManagerError::Corrupt {
                slug: slug.to_string(),
                source,
            }),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(PlanManagerError::Io {
                slug: slug.to_string(),
                source: std::io::Error::other(e.to_string()),
            }),
        }
    }

    pub async fn save_tasks(&self, slug: &str, tasks: &[Task]) -> Result<(), PlanManagerError> {
        let bytes = serde_json::to_vec_pretty(tasks).map_err(|source| PlanManagerError::Corrupt {
            slug: slug.to_string(),
            source,
        })?;
        self.kv
            .put(&Self::tasks_key(slug), bytes.clone())
            .await
            .map_err(|e| PlanManagerError::Io {
                slug: slug.to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;
        self.mirror(slug, "tasks.json", &bytes).await;
        Ok(())
    }

    /// Best-effort write of the same bytes under `{mirror_root}/{slug}/{file}`.
    /// Failures are logged, never propagated — the KV bucket already has the
    /// durable copy.
    async fn mirror(&self, slug: &str, file: &str, bytes: &[u8]) {
        let dir = self.mirror_root.join(slug);
        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            warn!(slug, error = %err, "failed to create plan mirror directory");
            return;
        }
        if let Err(err) = tokio::fs::write(dir.join(file), bytes).await {
            warn!(slug, file, error = %err, "failed to write plan mirror file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::MemoryKv;
    use planloop_types::Plan;

    fn store(dir: &tempfile::TempDir) -> PlanStore {
        PlanStore::with_backend(Arc::new(MemoryKv::default()), dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let plan = Plan::new("add-caching", "Add caching");
        store.save_plan(&plan).await.unwrap();
        let loaded = store.load_plan("add-caching").await.unwrap();
        assert_eq!(loaded.slug, "add-caching");
    }

    #[tokio::test]
    async fn load_missing_plan_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let err = store.load_plan("missing").await.unwrap_err();
        assert!(matches!(err, PlanManagerError::PlanNotFound { .. }));
    }

    #[tokio::test]
    async fn save_plan_mirrors_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let plan = Plan::new("add-caching", "Add caching");
        store.save_plan(&plan).await.unwrap();
        assert!(dir.path().join("add-caching/plan.json").exists());
    }

    #[tokio::test]
    async fn load_phases_defaults_to_empty_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let phases = store.load_phases("add-caching").await.unwrap();
        assert!(phases.is_empty());
    }

    #[tokio::test]
    async fn list_plans_returns_every_saved_plan() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.save_plan(&Plan::new("add-caching", "Add caching")).await.unwrap();
        store.save_plan(&Plan::new("add-rate-limiting", "Add rate limiting")).await.unwrap();
        let mut slugs: Vec<_> = store.list_plans().await.unwrap().into_iter().map(|p| p.slug).collect();
        slugs.sort();
        assert_eq!(slugs, vec!["add-caching".to_string(), "add-rate-limiting".to_string()]);
    }

    #[tokio::test]
    async fn list_plans_ignores_phases_and_tasks_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.save_plan(&Plan::new("add-caching", "Add caching")).await.unwrap();
        store.save_phases("add-caching", &[]).await.unwrap();
        let plans = store.list_plans().await.unwrap();
        assert_eq!(plans.len(), 1);
    }
}
