//! The event router (spec §4.4): the single writer of plan status and
//! approval fields, reacting to the events the review loop engine
//! publishes and to the `user.signal.>` escalation/error surface.

pub mod router;

pub use router::EventRouter;
