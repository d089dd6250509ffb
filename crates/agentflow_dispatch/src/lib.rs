//! Inline command dispatch (spec.md §4.4) and query routing (spec.md §4.5).
//!
//! Two independent concerns, kept in separate modules the way the teacher
//! splits routing from handling in `casparian_sentinel::control`:
//! [`router`] decides *whether* a message goes to `InlineDispatcher`, the
//! Oracle, or a worker; [`registry`] and [`dispatcher`] decide what an
//! inline-tier message actually does.

pub mod dispatcher;
pub mod registry;
pub mod router;

pub use dispatcher::{
    media_action_to_payload, AdminAction, DispatchContext, DispatchOutcome, HbJobMutation,
    HeartbeatControl, InlineDispatcher, MediaKind, QueueSnapshot, ResourceSnapshot, SessionInfo,
    TrafficLight,
};
pub use registry::{find, validate_registry, CommandCategory, CommandSpec, COMMANDS};
pub use router::{classify_query, Classification, Tier};
