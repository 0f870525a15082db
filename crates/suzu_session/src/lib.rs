//! suzu_session — the per-session attention state machine.
//!
//! Routes inbound messages into debounced entry decisions or a running focus
//! loop, owns the outbound reaction/reply flow, and triggers memory
//! consolidation as history accumulates.

pub mod scheduler;
pub mod state;

pub use scheduler::SessionScheduler;
pub use state::{SessionEntry, SessionMode, SessionState};
