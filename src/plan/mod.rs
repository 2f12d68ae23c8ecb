//! The plan manager: the pure state-keeper every other component mutates
//! plan/phase/task documents through. The KV bucket `PLANS` is the source
//! of truth; a filesystem mirror under the configured repo root is written
//! best-effort after every successful KV write, for operator inspection.

mod slug;
mod store;

pub use slug::derive_slug;
pub use store::PlanStore;

use std::path::PathBuf;
use std::sync::Arc;

use planloop_types::{
    Phase, PhaseApproval, Plan, PlanManagerError, PlanStatus, Task, TaskStatus,
};
use tracing::instrument;

use crate::substrate::Substrate;

pub struct PlanManager {
    store: PlanStore,
}

impl PlanManager {
    pub fn new(substrate: Arc<Substrate>, mirror_root: PathBuf) -> Self {
        Self {
            store: PlanStore::new(substrate, mirror_root),
        }
    }

    pub fn with_store(store: PlanStore) -> Self {
        Self { store }
    }

    #[instrument(skip(self, description))]
    pub async fn create_plan(&self, description: &str) -> Result<Plan, PlanManagerError> {
        let slug = slug::derive_slug(description);
        let mut plan = Plan::new(&slug, description);
        plan.context = description.to_string();
        self.store.save_plan(&plan).await?;
        Ok(plan)
    }

    pub async fn load_plan(&self, slug: &str) -> Result<Plan, PlanManagerError> {
        self.store.load_plan(slug).await
    }

    pub async fn save_plan(&self, plan: &Plan) -> Result<(), PlanManagerError> {
        self.store.save_plan(plan).await
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>, PlanManagerError> {
        self.store.list_plans().await
    }

    /// Idempotent: re-approving an already-approved plan returns
    /// `AlreadyApproved`, which callers treat as success.
    #[instrument(skip(self))]
    pub async fn approve_plan(&self, slug: &str) -> Result<Plan, PlanManagerError> {
        let mut plan = self.store.load_plan(slug).await?;
        if plan.approved {
            return Err(PlanManagerError::AlreadyApproved { slug: slug.to_string() });
        }
        if !plan.status.can_transition_to(PlanStatus::Approved) {
            return Err(PlanManagerError::InvalidTransition {
                slug: slug.to_string(),
                from: plan.status.to_string(),
                to: PlanStatus::Approved.to_string(),
            });
        }
        plan.status = PlanStatus::Approved;
        plan.approved = true;
        plan.approved_at = Some(chrono::Utc::now());
        plan.touch();
        self.store.save_plan(&plan).await?;
        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn approve_phase_plan(&self, slug: &str) -> Result<Plan, PlanManagerError> {
        let mut plan = self.store.load_plan(slug).await?;
        if plan.phases_approved {
            return Err(PlanManagerError::AlreadyApproved { slug: slug.to_string() });
        }
        if !plan.status.can_transition_to(PlanStatus::PhasesApproved) {
            return Err(PlanManagerError::InvalidTransition {
                slug: slug.to_string(),
                from: plan.status.to_string(),
                to: PlanStatus::PhasesApproved.to_string(),
            });
        }
        plan.status = PlanStatus::PhasesApproved;
        plan.phases_approved = true;
        plan.phases_approved_at = Some(chrono::Utc::now());
        plan.touch();
        self.store.save_plan(&plan).await?;
        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn approve_tasks_plan(&self, slug: &str) -> Result<Plan, PlanManagerError> {
        let mut plan = self.store.load_plan(slug).await?;
        if plan.tasks_approved {
            return Err(PlanManagerError::TasksAlreadyApproved { slug: slug.to_string() });
        }
        if !plan.status.can_transition_to(PlanStatus::TasksApproved) {
            return Err(PlanManagerError::InvalidTransition {
                slug: slug.to_string(),
                from: plan.status.to_string(),
                to: PlanStatus::TasksApproved.to_string(),
            });
        }
        plan.status = PlanStatus::TasksApproved;
        plan.tasks_approved = true;
        plan.tasks_approved_at = Some(chrono::Utc::now());
        plan.touch();
        self.store.save_plan(&plan).await?;
        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn archive_plan(&self, slug: &str) -> Result<Plan, PlanManagerError> {
        let mut plan = self.store.load_plan(slug).await?;
        if !plan.status.can_transition_to(PlanStatus::Archived) {
            return Err(PlanManagerError::InvalidTransition {
                slug: slug.to_string(),
                from: plan.status.to_string(),
                to: PlanStatus::Archived.to_string(),
            });
        }
        plan.status = PlanStatus::Archived;
        plan.touch();
        self.store.save_plan(&plan).await?;
        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn delete_plan(&self, slug: &str) -> Result<(), PlanManagerError> {
        let plan = self.store.load_plan(slug).await?;
        if matches!(plan.status, PlanStatus::Implementing) {
            return Err(PlanManagerError::PlanNotDeletable { slug: slug.to_string() });
        }
        self.store.delete_plan(slug).await
    }

    pub async fn load_phases(&self, slug: &str) -> Result<Vec<Phase>, PlanManagerError> {
        self.store.load_phases(slug).await
    }

    pub async fn save_phases(&self, slug: &str, phases: &[Phase]) -> Result<(), PlanManagerError> {
        self.store.save_phases(slug, phases).await
    }

    pub async fn create_phase(&self, phase: Phase) -> Result<(), PlanManagerError> {
        let plan = self.store.load_plan(&phase.plan_slug).await?;
        if !plan.approved {
            return Err(PlanManagerError::PlanNotUpdatable { slug: phase.plan_slug.clone() });
        }
        let mut phases = self.store.load_phases(&phase.plan_slug).await?;
        phases.push(phase.clone());
        self.store.save_phases(&phase.plan_slug, &phases).await
    }

    pub async fn update_phase(&self, slug: &str, phase_id: &str, f: impl FnOnce(&mut Phase)) -> Result<Phase, PlanManagerError> {
        let mut phases = self.store.load_phases(slug).await?;
        let phase = phases
            .iter_mut()
            .find(|p| p.id == phase_id)
            .ok_or_else(|| PlanManagerError::PhaseNotFound {
                slug: slug.to_string(),
                phase_id: phase_id.to_string(),
            })?;
        f(phase);
        let updated = phase.clone();
        self.store.save_phases(slug, &phases).await?;
        Ok(updated)
    }

    pub async fn delete_phase(&self, slug: &str, phase_id: &str) -> Result<(), PlanManagerError> {
        let mut phases = self.store.load_phases(slug).await?;
        let before = phases.len();
        phases.retain(|p| p.id != phase_id);
        if phases.len() == before {
            return Err(PlanManagerError::PhaseNotFound {
                slug: slug.to_string(),
                phase_id: phase_id.to_string(),
            });
        }
        self.store.save_phases(slug, &phases).await
    }

    pub async fn approve_phase(&self, slug: &str, phase_id: &str) -> Result<Phase, PlanManagerError> {
        self.update_phase(slug, phase_id, |phase| phase.approve()).await
    }

    pub async fn reject_phase(&self, slug: &str, phase_id: &str) -> Result<Phase, PlanManagerError> {
        self.update_phase(slug, phase_id, |phase| phase.reject()).await
    }

    pub async fn reorder_phase(&self, slug: &str, phase_id: &str, sequence: u32) -> Result<Phase, PlanManagerError> {
        self.update_phase(slug, phase_id, |phase| phase.sequence = sequence).await
    }

    pub async fn approve_all_phases(&self, slug: &str) -> Result<Vec<Phase>, PlanManagerError> {
        let mut phases = self.store.load_phases(slug).await?;
        for phase in phases.iter_mut() {
            if phase.approval != PhaseApproval::Approved {
                phase.approve();
            }
        }
        self.store.save_phases(slug, &phases).await?;
        Ok(phases)
    }

    pub async fn load_tasks(&self, slug: &str) -> Result<Vec<Task>, PlanManagerError> {
        self.store.load_tasks(slug).await
    }

    pub async fn save_tasks(&self, slug: &str, tasks: &[Task]) -> Result<(), PlanManagerError> {
        self.store.save_tasks(slug, tasks).await
    }

    pub async fn create_task(&self, task: Task) -> Result<(), PlanManagerError> {
        let mut tasks = self.store.load_tasks(&task.plan_slug).await?;
        tasks.push(task.clone());
        self.store.save_tasks(&task.plan_slug, &tasks).await
    }

    pub async fn update_task(&self, slug: &str, task_id: &str, f: impl FnOnce(&mut Task)) -> Result<Task, PlanManagerError> {
        let mut tasks = self.store.load_tasks(slug).await?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| PlanManagerError::TaskNotFound {
                slug: slug.to_string(),
                task_id: task_id.to_string(),
            })?;
        f(task);
        let updated = task.clone();
        self.store.save_tasks(slug, &tasks).await?;
        Ok(updated)
    }

    pub async fn delete_task(&self, slug: &str, task_id: &str) -> Result<(), PlanManagerError> {
        let mut tasks = self.store.load_tasks(slug).await?;
        let before = tasks.len();
        tasks.retain(|t| t.id != task_id);
        if tasks.len() == before {
            return Err(PlanManagerError::TaskNotFound {
                slug: slug.to_string(),
                task_id: task_id.to_string(),
            });
        }
        self.store.save_tasks(slug, &tasks).await
    }

    pub async fn approve_task(&self, slug: &str, task_id: &str) -> Result<Task, PlanManagerError> {
        let mut tasks = self.store.load_tasks(slug).await?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| PlanManagerError::TaskNotFound {
                slug: slug.to_string(),
                task_id: task_id.to_string(),
            })?;
        if task.status != TaskStatus::PendingApproval {
            return Err(PlanManagerError::TaskNotPendingApproval {
                slug: slug.to_string(),
                task_id: task_id.to_string(),
            });
        }
        task.status = TaskStatus::Approved;
        let updated = task.clone();
        self.store.save_tasks(slug, &tasks).await?;
        Ok(updated)
    }

    pub async fn reject_task(&self, slug: &str, task_id: &str) -> Result<Task, PlanManagerError> {
        let mut tasks = self.store.load_tasks(slug).await?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| PlanManagerError::TaskNotFound {
                slug: slug.to_string(),
                task_id: task_id.to_string(),
            })?;
        if task.status != TaskStatus::PendingApproval {
            return Err(PlanManagerError::TaskNotPendingApproval {
                slug: slug.to_string(),
                task_id: task_id.to_string(),
            });
        }
        task.status = TaskStatus::Rejected;
        let updated = task.clone();
        self.store.save_tasks(slug, &tasks).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::MemoryKv;

    fn manager(dir: &tempfile::TempDir) -> PlanManager {
        let store = PlanStore::with_backend(Arc::new(MemoryKv::default()), dir.path().to_path_buf());
        PlanManager::with_store(store)
    }

    #[test]
    fn derive_slug_is_url_safe() {
        let slug = slug::derive_slug("Add Rate Limiting!!");
        assert_eq!(slug, "add-rate-limiting");
    }

    #[tokio::test]
    async fn create_plan_starts_drafting() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let plan = manager.create_plan("Add rate limiting").await.unwrap();
        assert_eq!(plan.slug, "add-rate-limiting");
        assert_eq!(plan.status, PlanStatus::Drafting);
    }

    #[tokio::test]
    async fn approve_plan_requires_drafted_status() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        manager.create_plan("Add rate limiting").await.unwrap();
        let err = manager.approve_plan("add-rate-limiting").await.unwrap_err();
        assert!(matches!(err, PlanManagerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn approve_plan_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let mut plan = manager.create_plan("Add rate limiting").await.unwrap();
        plan.status = PlanStatus::Reviewed;
        manager.save_plan(&plan).await.unwrap();
        manager.approve_plan("add-rate-limiting").await.unwrap();
        let err = manager.approve_plan("add-rate-limiting").await.unwrap_err();
        assert!(matches!(err, PlanManagerError::AlreadyApproved { .. }));
    }

    #[tokio::test]
    async fn approve_tasks_plan_requires_tasks_generated_status() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let mut plan = manager.create_plan("Add rate limiting").await.unwrap();
        plan.status = PlanStatus::TasksGenerated;
        manager.save_plan(&plan).await.unwrap();
        manager.approve_tasks_plan("add-rate-limiting").await.unwrap();
        let err = manager.approve_tasks_plan("add-rate-limiting").await.unwrap_err();
        assert!(matches!(err, PlanManagerError::TasksAlreadyApproved { .. }));
    }

    #[tokio::test]
    async fn approve_task_requires_pending_approval() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        manager.create_plan("Add rate limiting").await.unwrap();
        let task = planloop_types::Task::new(
            "add-rate-limiting",
            "t1",
            1,
            "p1",
            "wire the limiter",
            planloop_types::TaskType::Implement,
        );
        manager.create_task(task).await.unwrap();
        manager.approve_task("add-rate-limiting", "t1").await.unwrap();
        let err = manager.approve_task("add-rate-limiting", "t1").await.unwrap_err();
        assert!(matches!(err, PlanManagerError::TaskNotPendingApproval { .. }));
    }

    #[tokio::test]
    async fn delete_phase_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        manager.create_plan("Add rate limiting").await.unwrap();
        let err = manager.delete_phase("add-rate-limiting", "missing").await.unwrap_err();
        assert!(matches!(err, PlanManagerError::PhaseNotFound { .. }));
    }

    #[tokio::test]
    async fn approve_all_phases_approves_every_pending_phase() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        manager.create_plan("Add rate limiting").await.unwrap();
        let phase_a = Phase::new("add-rate-limiting", "p1", 1, "API layer", "desc");
        let phase_b = Phase::new("add-rate-limiting", "p2", 2, "Data layer", "desc");
        manager.create_phase(phase_a).await.unwrap_err(); // plan not yet approved
        manager.save_phases("add-rate-limiting", &[phase_b.clone()]).await.unwrap();
        let approved = manager.approve_all_phases("add-rate-limiting").await.unwrap();
        assert!(approved.iter().all(|p| p.is_approved()));
    }
}
