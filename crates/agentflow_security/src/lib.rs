//! Security primitives shared by the worker runtime and scheduler.
//!
//! - [`ipc`]: HMAC-SHA256 signing/verification of worker IPC events (spec.md §6
//!   Worker IPC), with constant-time comparison.
//! - [`mount`]: the Mount Allowlist that [`WorkerRuntime`] consults before
//!   every spawn (spec.md §4.2 Mount safety).

pub mod ipc;
pub mod mount;

pub use ipc::{sign_event, verify_event, IpcSecret, VerifyOutcome};
pub use mount::{MountAllowlist, MountReport, SecurityError};
