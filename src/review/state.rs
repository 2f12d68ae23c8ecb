//! Loop state held in the `REACTIVE_STATE` KV bucket, keyed by
//! `{slug, loop-kind}` (spec §4.3.2). One entry tracks the iteration
//! counter and latest verdict for exactly one `{plan, kind}` pair; the loop
//! engine loads it at the top of every trigger and persists it after every
//! increment.

use std::sync::Arc;

use planloop_types::{ReviewKind, Verdict};
use serde::{Deserialize, Serialize};

use crate::errors::ReviewLoopError;
use crate::substrate::{BucketKv, BucketSpec, KvBackend, Substrate};

const BUCKET: &str = "REACTIVE_STATE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub slug: String,
    pub kind: ReviewKind,
    pub iteration: u32,
    pub verdict: Option<Verdict>,
}

impl LoopState {
    fn fresh(slug: &str, kind: ReviewKind) -> Self {
        Self {
            slug: slug.to_string(),
            kind,
            iteration: 0,
            verdict: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self.verdict, Some(Verdict::Approved))
    }
}

pub struct LoopStateStore {
    kv: Arc<dyn KvBackend>,
}

impl LoopStateStore {
    pub fn new(substrate: Arc<Substrate>) -> Self {
        Self {
            kv: Arc::new(BucketKv::new(substrate, BucketSpec::new(BUCKET))),
        }
    }

    pub fn with_backend(kv: Arc<dyn KvBackend>) -> Self {
        Self { kv }
    }

    fn key(slug: &str, kind: ReviewKind) -> String {
        format!("{slug}.{}", kind.as_str())
    }

    /// Load the state for `{slug, kind}`, creating a fresh iteration-0
    /// record if none exists yet (spec §4.3.2 step 1).
    pub async fn load_or_create(&self, slug: &str, kind: ReviewKind) -> Result<LoopState, ReviewLoopError> {
        let key = Self::key(slug, kind);
        match self.kv.get(&key).await.map_err(|source| ReviewLoopError::StateIo {
            kind: kind.as_str().to_string(),
            slug: slug.to_string(),
            source,
        })? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| ReviewLoopError::StateCorrupt {
                kind: kind.as_str().to_string(),
                slug: slug.to_string(),
                source,
            }),
            None => {
                let state = LoopState::fresh(slug, kind);
                self.save(&state).await?;
                Ok(state)
            }
        }
    }

    pub async fn save(&self, state: &LoopState) -> Result<(), ReviewLoopError> {
        let bytes = serde_json::to_vec(state).map_err(|source| ReviewLoopError::StateCorrupt {
            kind: state.kind.as_str().to_string(),
            slug: state.slug.clone(),
            source,
        })?;
        self.kv
            .put(&Self::key(&state.slug, state.kind), bytes)
            .await
            .map_err(|source| ReviewLoopError::StateIo {
                kind: state.kind.as_str().to_string(),
                slug: state.slug.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::MemoryKv;

    fn store() -> LoopStateStore {
        LoopStateStore::with_backend(Arc::new(MemoryKv::default()))
    }

    #[tokio::test]
    async fn load_or_create_starts_at_iteration_zero() {
        let store = store();
        let state = store.load_or_create("add-caching", ReviewKind::Plan).await.unwrap();
        assert_eq!(state.iteration, 0);
        assert!(state.verdict.is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_iteration() {
        let store = store();
        let mut state = store.load_or_create("add-caching", ReviewKind::Phase).await.unwrap();
        state.iteration = 2;
        state.verdict = Some(Verdict::NeedsChanges);
        store.save(&state).await.unwrap();
        let reloaded = store.load_or_create("add-caching", ReviewKind::Phase).await.unwrap();
        assert_eq!(reloaded.iteration, 2);
        assert!(!reloaded.is_approved());
    }

    #[tokio::test]
    async fn distinct_kinds_for_the_same_slug_do_not_collide() {
        let store = store();
        let mut plan_state = store.load_or_create("add-caching", ReviewKind::Plan).await.unwrap();
        plan_state.iteration = 3;
        store.save(&plan_state).await.unwrap();
        let task_state = store.load_or_create("add-caching", ReviewKind::Task).await.unwrap();
        assert_eq!(task_state.iteration, 0);
    }
}
