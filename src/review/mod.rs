//! The review loop engine: the OODA-style generate/review/revise loop that
//! gates every advance through the plan/phase/task pipeline (spec §4.3).
//!
//! ## Components
//!
//! - [`subjects`]: subject-name builders, one source of truth shared by the
//!   engine and the event router it publishes to.
//! - [`state`]: the `REACTIVE_STATE`-backed iteration counter per `{slug,
//!   kind}`.
//! - [`producer`]: the generate step — the focus coordinator for plans,
//!   direct LLM calls for phases and tasks.
//! - [`reviewer`]: the review step — one LLM call parsed into a verdict and
//!   findings.
//! - [`engine`]: ties the above into the bounded generate/review/revise
//!   loop, publishing events as it advances.
//! - [`consumer`]: the durable pull-consumer fetch loop that feeds triggers
//!   into the engine and acks/naks/terms based on the outcome.
//! - [`promote`]: the synchronous alternative path for an operator request
//!   that wants to wait for one result instead of polling.

pub mod consumer;
pub mod engine;
pub mod producer;
pub mod promote;
pub mod reviewer;
pub mod state;
pub mod subjects;

pub use consumer::ReviewConsumer;
pub use engine::ReviewLoopEngine;
pub use producer::{PhaseProducer, PlanProducer, Producer, ProducerEntity, ProducerOutput, TaskProducer};
pub use reviewer::{ReviewOutcome, Reviewer};
pub use state::{LoopState, LoopStateStore};
