//! Shared domain types for the planloop orchestrator.
//!
//! Every processor component (model caller, focus coordinator, review loop
//! engine, event router, question subsystem, plan manager, HTTP surface)
//! exchanges these types over the message log or the KV store, so they live
//! in their own crate rather than any one component.

pub mod envelope;
pub mod errors;
pub mod phase;
pub mod plan;
pub mod question;
pub mod review;
pub mod task;
pub mod trace;

pub use envelope::{MessageEnvelope, MessageType};
pub use errors::PlanManagerError;
pub use phase::Phase;
pub use plan::{Plan, PlanStage, PlanStatus, Scope};
pub use question::{Gap, Question, QuestionStatus, Urgency};
pub use review::{Finding, FindingSeverity, IterationCalls, ReviewIteration, ReviewKind, Verdict};
pub use task::{AcceptanceCriterion, Task, TaskStatus, TaskType};
pub use trace::TraceContext;
