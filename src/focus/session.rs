//! Per-planner state slots for one coordination run: `pending → running →
//! completed|failed`, guarded by a lock so the HTTP surface can report
//! in-flight fan-out progress without racing the workers updating it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FocusSession {
    pub plan_slug: String,
    pub area: String,
    pub state: FocusState,
}

/// Keyed by `{plan_slug}/{area}`. Cloning shares the same underlying map —
/// every fan-out worker clones a handle rather than borrowing one.
#[derive(Clone)]
pub struct SessionMap {
    inner: Arc<RwLock<HashMap<String, FocusState>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn key(plan_slug: &str, area: &str) -> String {
        format!("{plan_slug}/{area}")
    }

    pub async fn set(&self, plan_slug: &str, area: &str, state: FocusState) {
        self.inner
            .write()
            .await
            .insert(Self::key(plan_slug, area), state);
    }

    pub async fn get(&self, plan_slug: &str, area: &str) -> Option<FocusState> {
        self.inner.read().await.get(&Self::key(plan_slug, area)).copied()
    }

    /// Snapshot every slot belonging to `plan_slug`, for status reporting.
    pub async fn snapshot(&self, plan_slug: &str) -> Vec<FocusSession> {
        let prefix = format!("{plan_slug}/");
        self.inner
            .read()
            .await
            .iter()
            .filter_map(|(key, state)| {
                key.strip_prefix(&prefix).map(|area| FocusSession {
                    plan_slug: plan_slug.to_string(),
                    area: area.to_string(),
                    state: *state,
                })
            })
            .collect()
    }
}

impl Default for SessionMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let sessions = SessionMap::new();
        sessions.set("add-caching", "api", FocusState::Running).await;
        assert_eq!(sessions.get("add-caching", "api").await, Some(FocusState::Running));
    }

    #[tokio::test]
    async fn snapshot_only_returns_matching_plan() {
        let sessions = SessionMap::new();
        sessions.set("add-caching", "api", FocusState::Completed).await;
        sessions.set("other-plan", "api", FocusState::Pending).await;
        let snapshot = sessions.snapshot("add-caching").await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].area, "api");
    }

    #[tokio::test]
    async fn clone_shares_the_same_backing_map() {
        let sessions = SessionMap::new();
        let clone = sessions.clone();
        clone.set("add-caching", "data", FocusState::Failed).await;
        assert_eq!(
            sessions.get("add-caching", "data").await,
            Some(FocusState::Failed)
        );
    }
}
