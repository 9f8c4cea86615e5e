//! Turn orchestration: context assembly, model invocation, permission gates,
//! change application, and the per-turn retry budget.

mod apply;
mod engine;
mod protocol;

pub use apply::{ApplyReport, PendingChanges, apply_all, apply_deletes, apply_patches, apply_writes};
pub use engine::{AgentEngine, RetryBudget, TurnOutcome, TurnResult};
pub use protocol::{ProtocolError, ResponsePatch, ResponseWrite, StructuredResponse, parse_response};
